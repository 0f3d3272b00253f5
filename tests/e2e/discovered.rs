use crate::e2e::*;

#[cfg(unix)]
const CC_DEPS_MANIFEST: &str = "
rule cc
  command = touch $out && echo \"$out: hdr.h\" > $out.d
  deps = gcc
  depfile = $out.d
build out: cc in
";

/// Header deps discovered via a depfile land in the deps log and drive
/// later rebuilds; the depfile itself is deleted once read.
#[cfg(unix)]
#[test]
fn discovered_deps_drive_rebuilds() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.ninja", CC_DEPS_MANIFEST)?;
    space.write("in", "")?;
    space.write("hdr.h", "one")?;

    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert!(space.read(".ninja_deps").is_ok());
    // The depfile was consumed.
    assert!(space.read("out.d").is_err());

    // Nothing changed: nothing to do, without running the compiler.
    let out = space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");

    // Touching the header reruns the edge even though the manifest never
    // mentions it.
    space.write("hdr.h", "two")?;
    let out = space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_output_not_contains(&out, "no work to do");
    Ok(())
}

#[cfg(unix)]
#[test]
fn keepdepfile_preserves_the_depfile() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("build.ninja", CC_DEPS_MANIFEST)?;
    space.write("in", "")?;
    space.write("hdr.h", "")?;
    space.run_expect(&mut ninja_command(vec!["-d", "keepdepfile", "out"]))?;
    assert!(space.read("out.d").is_ok());
    Ok(())
}

/// A dyndep file that exists before the build adds implicit inputs.
#[cfg(unix)]
#[test]
fn dyndep_file_adds_inputs() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule touch
  command = touch $out
  dyndep = dd
build out: touch in | dd
",
    )?;
    space.write("in", "")?;
    space.write("extra.h", "one")?;
    space.write(
        "dd",
        "ninja_dyndep_version = 1\nbuild out: dyndep | extra.h\n",
    )?;

    space.run_expect(&mut ninja_command(vec!["out"]))?;
    let out = space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_output_contains(&out, "no work to do");

    // The dyndep-discovered input triggers rebuilds.
    space.write("extra.h", "two")?;
    let out = space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert_output_not_contains(&out, "no work to do");
    Ok(())
}

/// A dyndep file generated by another edge during the same build is loaded
/// before the edge that depends on it runs.
#[cfg(unix)]
#[test]
fn dyndep_generated_during_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "build.ninja",
        "
rule gen_dd
  command = printf 'ninja_dyndep_version = 1\\nbuild out: dyndep\\n' > $out
rule touch
  command = touch $out
build dd: gen_dd
build out: touch in | dd
  dyndep = dd
",
    )?;
    space.write("in", "")?;
    space.run_expect(&mut ninja_command(vec!["out"]))?;
    assert!(space.read("out").is_ok());
    assert!(space.read("dd").is_ok());
    Ok(())
}
