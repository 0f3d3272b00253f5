use crate::e2e::*;

/// A depth-1 pool never runs two of its edges at once, even when the
/// global parallelism would allow it.  Each command fails loudly if it
/// finds another holder's lock file.
#[cfg(unix)]
#[test]
fn depth_one_pool_serializes() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
pool serial
  depth = 1
rule locked
  command = test ! -f lock && touch lock && sleep 0.2 && rm lock && touch $out
  pool = serial
build a: locked
build b: locked
build c: locked
",
    )?;
    space.run_expect(&mut ninja_command(vec!["-j", "8", "a", "b", "c"]))?;
    assert!(space.read("a").is_ok());
    assert!(space.read("b").is_ok());
    assert!(space.read("c").is_ok());
    Ok(())
}

/// The console pool behaves like a depth-1 pool for scheduling.
#[cfg(unix)]
#[test]
fn console_pool_is_exclusive() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule locked
  command = test ! -f lock && touch lock && sleep 0.2 && rm lock && touch $out
  pool = console
build a: locked
build b: locked
",
    )?;
    space.run_expect(&mut ninja_command(vec!["-j", "8", "a", "b"]))?;
    assert!(space.read("a").is_ok());
    assert!(space.read("b").is_ok());
    Ok(())
}

/// Edges outside the pool still run in parallel with pooled ones.
#[cfg(unix)]
#[test]
fn pool_does_not_block_other_edges() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
pool serial
  depth = 1
rule slow
  command = sleep 0.2 && touch $out
  pool = serial
rule touch
  command = touch $out
build a: slow
build b: slow
build free: touch
",
    )?;
    space.run_expect(&mut ninja_command(vec!["-j", "8", "a", "b", "free"]))?;
    assert!(space.read("free").is_ok());
    Ok(())
}
