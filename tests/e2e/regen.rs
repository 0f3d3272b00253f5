use crate::e2e::*;

/// A manifest that can rebuild itself is regenerated first, then the
/// requested targets build against the fresh manifest.
#[cfg(unix)]
#[test]
fn manifest_regenerates_then_builds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let manifest = "
rule regen
  command = cp build.ninja.in build.ninja
  generator = 1
rule touch
  command = touch $out
build build.ninja: regen build.ninja.in
build out: touch
";
    space.write("build.ninja", manifest)?;
    // Written second, so it's newer than build.ninja.
    space.write("build.ninja.in", manifest)?;

    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert!(space.read("out").is_ok());

    // Once regenerated, everything settles.
    let out = space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

/// A regeneration rule that never produces an up-to-date manifest must not
/// loop forever.
#[cfg(unix)]
#[test]
fn manifest_regen_cycle_limit() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule bad_regen
  command = touch -t 200001010000 build.ninja
  generator = 1
build build.ninja: bad_regen build.ninja.in
",
    )?;
    space.write("build.ninja.in", "")?;

    let out = space.run(&mut ninja_command(vec![]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "still dirty after 100 tries");
    Ok(())
}
