//! Parsing of Makefile syntax as found in `.d` files emitted by C compilers.

use crate::scanner::{ParseResult, Scanner};
use crate::smallmap::SmallMap;

/// Dependencies per target, in file order.
pub type DepfileDeps<'a> = SmallMap<&'a str, Vec<&'a str>>;

/// Skip spaces and backslashed newlines.
fn skip_spaces(scanner: &mut Scanner) -> ParseResult<()> {
    loop {
        match scanner.read() {
            ' ' => {}
            '\\' => match scanner.read() {
                '\n' => {}
                '\r' => {
                    if !scanner.skip('\n') {
                        return scanner.parse_error("invalid backslash escape");
                    }
                }
                _ => return scanner.parse_error("invalid backslash escape"),
            },
            _ => {
                scanner.back();
                break;
            }
        }
    }
    Ok(())
}

/// Read one path from the input scanner, or None at the end of a list.
/// Colons are treated as valid path characters because of Windows drive
/// letters, so the leading `output:` keeps its trailing colon here and the
/// caller strips it.
fn read_path<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Option<&'a str>> {
    skip_spaces(scanner)?;
    let start = scanner.ofs;
    loop {
        match scanner.read() {
            '\0' | ' ' | '\n' | '\r' => {
                scanner.back();
                break;
            }
            '\\' => {
                if scanner.peek_newline() {
                    scanner.back();
                    break;
                }
            }
            _ => {}
        }
    }
    let end = scanner.ofs;
    if end == start {
        return Ok(None);
    }
    Ok(Some(scanner.slice(start, end)))
}

/// Parse a `.d` file into a target -> deps mapping.
pub fn parse<'a>(scanner: &mut Scanner<'a>) -> ParseResult<DepfileDeps<'a>> {
    let mut result = DepfileDeps::default();
    loop {
        while matches!(scanner.peek(), ' ' | '\n' | '\r') {
            scanner.next();
        }
        let target = match read_path(scanner)? {
            None => break,
            Some(o) => o,
        };
        scanner.skip_spaces();
        let target = match target.strip_suffix(':') {
            None => {
                scanner.expect(':')?;
                target
            }
            Some(target) => target,
        };
        let mut deps = Vec::new();
        while let Some(p) = read_path(scanner)? {
            deps.push(p);
        }
        result.insert(target, deps);
    }
    scanner.expect('\0')?;

    Ok(result)
}
