use crate::e2e::*;

/// A restat rule that doesn't touch its output should clean downstream
/// edges out of the plan without running them.
#[cfg(unix)]
#[test]
fn restat_cleans_downstream() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule create_if_missing
  command = [ -f $out ] || touch $out
  restat = 1
rule record
  command = touch $out && echo ran >> runs.txt
build mid: create_if_missing in
build out: record mid
",
    )?;
    space.write("in", "")?;

    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_eq!(space.read_to_string("runs.txt")?.lines().count(), 1);

    // Touch the input: mid's command runs again but leaves mid untouched,
    // so out must not re-run.
    space.write("in", "poke")?;
    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_eq!(space.read_to_string("runs.txt")?.lines().count(), 1);

    // And the restat mtime recorded in the log makes the next run a no-op.
    let out = space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

/// When the restat command does change its output, downstream still runs.
#[cfg(unix)]
#[test]
fn restat_still_rebuilds_on_change() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule copy
  command = cp $in $out
  restat = 1
rule record
  command = touch $out && echo ran >> runs.txt
build mid: copy in
build out: record mid
",
    )?;
    space.write("in", "one")?;
    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_eq!(space.read_to_string("runs.txt")?.lines().count(), 1);

    space.write("in", "two")?;
    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_eq!(space.read_to_string("runs.txt")?.lines().count(), 2);
    Ok(())
}
