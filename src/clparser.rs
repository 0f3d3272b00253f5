//! Extraction of header dependencies from cl.exe-style `/showIncludes`
//! output, for rules declaring `deps = msvc`.

/// The prefix cl.exe emits before each included file; localized installs
/// override it through the `msvc_deps_prefix` rule binding.
pub const DEFAULT_SHOW_INCLUDES_PREFIX: &str = "Note: including file: ";

/// Result of filtering command output.
pub struct CLParse {
    /// Discovered include paths, deduplicated, in first-seen order.
    pub includes: Vec<String>,
    /// The output with /showIncludes lines removed, which is what the user
    /// should see.
    pub filtered_output: Vec<u8>,
}

/// System headers don't belong in the deps list; a path under a directory
/// spelled in ALL CAPS (as the VC install dirs are, e.g. "PROGRAM FILES")
/// is taken as a system include.  Mirrors the cl.exe convention rather than
/// anything principled.
fn is_system_include(path: &str) -> bool {
    let mut in_component = false;
    let mut component_caps = true;
    for c in path.chars() {
        match c {
            '/' | '\\' => {
                if in_component && component_caps {
                    return true;
                }
                in_component = false;
                component_caps = true;
            }
            _ => {
                in_component = true;
                if c.is_ascii_lowercase() {
                    component_caps = false;
                }
            }
        }
    }
    false
}

/// Split /showIncludes lines out of `output`.
pub fn parse(output: &[u8], prefix: &str) -> CLParse {
    let mut includes = Vec::new();
    let mut filtered_output = Vec::new();
    for line in output.split_inclusive(|&c| c == b'\n') {
        let text = std::str::from_utf8(line).ok();
        let include = text.and_then(|text| {
            text.strip_prefix(prefix)
                .map(|rest| rest.trim_end_matches(|c| c == '\r' || c == '\n').trim_start())
        });
        match include {
            Some(path) if !path.is_empty() => {
                if !is_system_include(path) && !includes.iter().any(|i| i == path) {
                    includes.push(path.to_owned());
                }
            }
            _ => filtered_output.extend_from_slice(line),
        }
    }
    CLParse {
        includes,
        filtered_output,
    }
}
