use crate::e2e::*;

#[test]
fn tool_list() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.ninja", "")?;
    let out = space.run(&mut ninja_command(vec!["-t", "list"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "clean");
    assert_output_contains(&out, "restat");
    Ok(())
}

#[test]
fn unknown_tool_suggests_spelling() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.ninja", "")?;
    let out = space.run(&mut ninja_command(vec!["-t", "claen"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "unknown tool 'claen', did you mean 'clean'?");
    Ok(())
}

#[test]
fn clean_removes_outputs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[CAT_RULE, "build mid: cat in", "build out: cat mid", ""].join("\n"),
    )?;
    space.write("in", "x")?;
    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert!(space.read("out").is_ok());

    let out = space.run_expect(&mut ninja_command(vec!["-t", "clean"]))?;
    assert_output_contains(&out, "2 files.");
    assert!(space.read("out").is_err());
    assert!(space.read("mid").is_err());
    assert!(space.read("in").is_ok());
    Ok(())
}

#[test]
fn clean_specific_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            TOUCH_RULE,
            "build a: touch",
            "build b: touch",
            "",
        ]
        .join("\n"),
    )?;
    space.run_expect(&mut ninja_command(vec![]))?;
    space.run_expect(&mut ninja_command(vec!["-t", "clean", "a"]))?;
    assert!(space.read("a").is_err());
    assert!(space.read("b").is_ok());
    Ok(())
}

#[test]
fn restat_tool_rewrites_log() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch", ""].join("\n"),
    )?;
    space.run_expect(&mut ninja_command(vec!["out"]))?;
    let log_before = space.read_to_string(".ninja_log")?;

    space.run_expect(&mut ninja_command(vec!["-t", "restat"]))?;
    let log_after = space.read_to_string(".ninja_log")?;
    assert!(log_after.starts_with("# ninja log v5"));
    assert_eq!(log_before.lines().count(), log_after.lines().count());

    // The rewritten log still makes the build a no-op.
    let out = space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn debug_list_exits() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.ninja", "")?;
    let out = space.run(&mut ninja_command(vec!["-d", "list"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_output_contains(&out, "explain");
    Ok(())
}

#[test]
fn unknown_debug_flag_suggests_spelling() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.ninja", "")?;
    let out = space.run(&mut ninja_command(vec!["-d", "explian"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "did you mean 'explain'?");
    Ok(())
}

#[test]
fn explain_prints_reasons() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch", ""].join("\n"),
    )?;
    let out = space.run_expect(&mut ninja_command(vec!["-d", "explain", "out"]))?;
    assert_output_contains(&out, "ninja explain: output out doesn't exist");
    Ok(())
}

#[test]
fn stats_prints_metrics() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch", ""].join("\n"),
    )?;
    let out = space.run_expect(&mut ninja_command(vec!["-d", "stats", "out"]))?;
    assert_output_contains(&out, "metric");
    assert_output_contains(&out, "manifest load");
    Ok(())
}
