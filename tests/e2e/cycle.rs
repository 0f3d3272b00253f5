use crate::e2e::*;

#[test]
fn dependency_cycle_is_fatal() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[CAT_RULE, "build a: cat b", "build b: cat a", ""].join("\n"),
    )?;
    let out = space.run(&mut ninja_command(vec!["a"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "dependency cycle: a -> b -> a");
    Ok(())
}

#[test]
fn self_cycle_is_fatal() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[CAT_RULE, "build a: cat a", ""].join("\n"),
    )?;
    let out = space.run(&mut ninja_command(vec!["a"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "dependency cycle: a -> a");
    Ok(())
}

#[test]
fn phony_self_reference_is_only_a_warning() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build real: touch", "build all: phony all real", ""].join("\n"),
    )?;
    space.run_expect(&mut ninja_command(vec!["all"]))?;
    assert!(space.read("real").is_ok());

    // With -w phonycycle=err it becomes fatal.
    let out = space.run(&mut ninja_command(vec!["-w", "phonycycle=err", "all"]))?;
    assert!(!out.status.success());
    Ok(())
}
