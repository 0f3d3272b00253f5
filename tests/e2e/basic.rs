use crate::e2e::*;

#[test]
fn empty_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.ninja", "")?;
    let out = space.run_expect(&mut ninja_command(vec![]))?;
    assert_output_contains(&out, "ninja: no work to do.");
    Ok(())
}

#[test]
fn basic_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert!(space.read("out").is_ok());
    Ok(())
}

#[test]
fn two_step_chain_builds_in_order() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[CAT_RULE, "build mid: cat in", "build out: cat mid", ""].join("\n"),
    )?;
    space.write("in", "hello")?;
    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_eq!(space.read("out")?, b"hello");

    // A second run does nothing.
    let out = space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");
    Ok(())
}

#[test]
fn default_targets_are_roots() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[CAT_RULE, "build mid: cat in", "build out: cat mid", ""].join("\n"),
    )?;
    space.write("in", "x")?;
    space.run_expect(&mut ninja_command(vec![]))?;
    assert!(space.read("out").is_ok());
    Ok(())
}

#[test]
fn create_subdir_for_output() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build subdir/out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut ninja_command(vec!["subdir/out"]))?;
    assert!(space.read("subdir/out").is_ok());
    Ok(())
}

#[test]
fn rebuild_when_input_changes() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[CAT_RULE, "build out: cat in", ""].join("\n"),
    )?;
    space.write("in", "one")?;
    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_eq!(space.read("out")?, b"one");

    space.write("in", "two")?;
    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_eq!(space.read("out")?, b"two");
    Ok(())
}

#[test]
fn rebuild_when_command_changes() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch", ""].join("\n"),
    )?;
    space.run_expect(&mut ninja_command(vec!["out"]))?;

    // Same output, different command: must re-run.
    space.write(
        "build.ninja",
        "
rule touch2
  command = touch $out && touch marker
build out: touch2
",
    )?;
    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert!(space.read("marker").is_ok());
    Ok(())
}

#[test]
fn unknown_target_suggests_spelling() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch in", ""].join("\n"),
    )?;
    space.write("in", "")?;
    let out = space.run(&mut ninja_command(vec!["owt"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "unknown target 'owt', did you mean 'out'?");
    Ok(())
}

#[test]
fn missing_input_is_an_error() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch missing", ""].join("\n"),
    )?;
    let out = space.run(&mut ninja_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "missing and no known rule to make it");
    Ok(())
}

#[test]
fn parallel_independent_edges() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let mut manifest = String::from(TOUCH_RULE);
    for i in 0..10 {
        manifest.push_str(&format!("build out{}: touch\n", i));
    }
    space.write("build.ninja", &manifest)?;
    space.run_expect(&mut ninja_command(vec!["-j", "2"]))?;
    for i in 0..10 {
        assert!(space.read(&format!("out{}", i)).is_ok());
    }
    // Every edge got its own build log entry.
    let log = space.read_to_string(".ninja_log")?;
    assert_eq!(log.lines().count(), 11); // header + 10 entries
    Ok(())
}

#[cfg(unix)]
#[test]
fn keep_going_controls_failure_tolerance() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule fail
  command = false
rule touch
  command = touch $out
build bad1: fail
build bad2: fail
build good: touch
build all: phony bad1 bad2 good
",
    )?;

    // Default -k 1: the build stops, but already-started work completes.
    let out = space.run(&mut ninja_command(vec!["-j", "1", "all"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "FAILED: ");

    // -k 0 keeps going past failures; independent work still runs.
    let out = space.run(&mut ninja_command(vec!["-j", "1", "-k", "0", "all"]))?;
    assert!(!out.status.success());
    assert!(space.read("good").is_ok());
    Ok(())
}

#[cfg(unix)]
#[test]
fn failed_command_output_is_shown() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule fail
  command = echo boom && false
build out: fail
",
    )?;
    let out = space.run(&mut ninja_command(vec!["out"]))?;
    assert!(!out.status.success());
    assert_output_contains(&out, "FAILED: out");
    assert_output_contains(&out, "echo boom && false");
    assert_output_contains(&out, "boom");
    Ok(())
}

#[test]
fn verbose_shows_command_lines() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch", ""].join("\n"),
    )?;
    let out = space.run_expect(&mut ninja_command(vec!["-v", "out"]))?;
    assert_output_contains(&out, "touch out");
    Ok(())
}

#[test]
fn dry_run_runs_nothing() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[CAT_RULE, "build mid: cat in", "build out: cat mid", ""].join("\n"),
    )?;
    space.write("in", "x")?;
    space.run_expect(&mut ninja_command(vec!["-n", "out"]))?;
    assert!(space.read("mid").is_err());
    assert!(space.read("out").is_err());
    Ok(())
}

#[test]
fn phony_groups_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            TOUCH_RULE,
            "build a: touch",
            "build b: touch",
            "build all: phony a b",
            "",
        ]
        .join("\n"),
    )?;
    space.run_expect(&mut ninja_command(vec!["all"]))?;
    assert!(space.read("a").is_ok());
    assert!(space.read("b").is_ok());
    Ok(())
}

#[test]
fn bad_ninja_status_is_fatal() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[TOUCH_RULE, "build out: touch", ""].join("\n"),
    )?;
    let mut cmd = ninja_command(vec!["out"]);
    cmd.env("NINJA_STATUS", "[%x]");
    let out = space.run(&mut cmd)?;
    assert!(!out.status.success());
    assert_output_contains(&out, "unknown placeholder '%x' in $NINJA_STATUS");
    Ok(())
}

#[test]
fn validations_build_alongside() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        &[
            TOUCH_RULE,
            "build check: touch",
            "build out: touch in |@ check",
            "",
        ]
        .join("\n"),
    )?;
    space.write("in", "")?;
    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert!(space.read("out").is_ok());
    assert!(space.read("check").is_ok());
    Ok(())
}

#[cfg(unix)]
#[test]
fn rspfile_is_written_and_removed() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule cat_rsp
  command = cat ${out}.rsp > ${out}
  rspfile = ${out}.rsp
  rspfile_content = 1 $in 2
build out: cat_rsp foo bar
",
    )?;
    space.write("foo", "")?;
    space.write("bar", "")?;
    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_eq!(space.read("out")?, b"1 foo bar 2");
    // Removed on success by default.
    assert!(space.read("out.rsp").is_err());

    // -d keeprsp leaves it behind.
    space.write("foo", "poke")?;
    space.run_expect(&mut ninja_command(vec!["-d", "keeprsp", "out"]))?;
    assert!(space.read("out.rsp").is_ok());
    Ok(())
}
