//! Lexical path canonicalization.
//!
//! Node identity is canonical-path string equality, so every path entering
//! the graph goes through here first.  This never touches the file system;
//! it only removes redundant components like "foo/./bar" => "foo/bar".

use anyhow::bail;

/// Paths may have at most this many components; deeper paths are rejected.
const MAX_PATH_COMPONENTS: usize = 60;

#[cfg(windows)]
fn is_path_separator(c: u8) -> bool {
    c == b'/' || c == b'\\'
}

#[cfg(not(windows))]
fn is_path_separator(c: u8) -> bool {
    c == b'/'
}

/// Canonicalize a path in place, returning the "slash bits": one bit per
/// path component recording whether the separator following it was
/// originally a backslash.  Callers on POSIX always get 0 and may ignore it;
/// on Windows the bits allow reconstructing the user's spelling when the
/// path is echoed back.
///
/// Notable edge cases, kept for compatibility: "/foo/.." and "/" both
/// canonicalize to the empty string, and a path that cancels out entirely
/// ("foo/..") becomes ".".
pub fn canonicalize_path(path: &mut String) -> anyhow::Result<u64> {
    if path.is_empty() {
        return Ok(0);
    }

    let mut components = [0usize; MAX_PATH_COMPONENTS];
    let mut component_count = 0;
    let mut slash_bits: u64 = 0;
    let mut too_many = false;

    {
        // Rewrite the buffer in place: dst trails src, and only whole
        // components move, so UTF-8 boundaries are preserved.
        // Safety: all bytes written are either copies of existing bytes or
        // the ASCII characters '.' and '/'.
        let buf = unsafe { path.as_mut_vec() };
        let end = buf.len();
        let mut src = 0;
        let mut dst = 0;

        if is_path_separator(buf[0]) {
            #[cfg(windows)]
            {
                buf[0] = b'/';
            }
            src += 1;
            dst += 1;
        }

        while src < end {
            if buf[src] == b'.' {
                if src + 1 == end || is_path_separator(buf[src + 1]) {
                    // "." component; eliminate.
                    src += 2;
                    continue;
                }
                if buf[src + 1] == b'.' && (src + 2 == end || is_path_separator(buf[src + 2])) {
                    // ".." component.  Back up if possible.
                    if component_count > 0 {
                        component_count -= 1;
                        dst = components[component_count];
                        slash_bits &= !(1u64 << component_count);
                    } else {
                        buf[dst] = b'.';
                        buf[dst + 1] = b'.';
                        if src + 2 < end {
                            buf[dst + 2] = b'/';
                        }
                        dst += 3;
                    }
                    src += 3;
                    continue;
                }
            }

            if is_path_separator(buf[src]) {
                src += 1;
                continue;
            }

            if component_count == MAX_PATH_COMPONENTS {
                too_many = true;
                break;
            }
            components[component_count] = dst;
            component_count += 1;

            while src < end && !is_path_separator(buf[src]) {
                buf[dst] = buf[src];
                dst += 1;
                src += 1;
            }
            // Copy the separator, normalized; or account for the path end.
            if src < end {
                if buf[src] == b'\\' {
                    slash_bits |= 1u64 << (component_count - 1);
                }
                buf[dst] = b'/';
            }
            dst += 1;
            src += 1;
        }

        if !too_many {
            if dst == 0 {
                buf.clear();
                buf.extend_from_slice(b".");
            } else {
                // dst sits one past the final separator (or the position of
                // the path terminator); trim it.
                buf.truncate(dst - 1);
            }
        }
    }

    if too_many {
        bail!("path has too many components : {}", path);
    }
    Ok(slash_bits)
}

/// Canonicalize into a fresh String; for callers that hold a borrowed path.
pub fn canon_path(path: impl Into<String>) -> anyhow::Result<String> {
    let mut path = path.into();
    canonicalize_path(&mut path)?;
    Ok(path)
}
