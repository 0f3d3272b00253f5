//! Prints lines of text to the console, overprinting the previous line on
//! smart terminals so progress updates stay on a single line.

use crate::terminal;
use std::io::Write;

#[derive(Clone, Copy, PartialEq)]
pub enum LineType {
    Full,
    Elide,
}

pub struct LinePrinter {
    smart_terminal: bool,
    supports_color: bool,
    /// Whether the cursor sits on a fresh, empty line.
    have_blank_line: bool,
    /// While locked (a console-pool edge owns the terminal), printing is
    /// buffered and replayed on unlock.
    console_locked: bool,
    line_buffer: Option<(String, LineType)>,
    output_buffer: String,
}

impl LinePrinter {
    pub fn new() -> Self {
        let smart_terminal = terminal::use_smart_terminal();
        let supports_color = smart_terminal
            || std::env::var_os("CLICOLOR_FORCE").map_or(false, |v| v != "0");
        LinePrinter {
            smart_terminal,
            supports_color,
            have_blank_line: true,
            console_locked: false,
            line_buffer: None,
            output_buffer: String::new(),
        }
    }

    pub fn is_smart_terminal(&self) -> bool {
        self.smart_terminal
    }

    pub fn set_smart_terminal(&mut self, smart: bool) {
        self.smart_terminal = smart;
    }

    pub fn supports_color(&self) -> bool {
        self.supports_color
    }

    /// Overprints the current line.  For Elide, the line is shortened to fit
    /// the terminal width; Full lines always print completely.
    pub fn print(&mut self, to_print: &str, line_type: LineType) {
        if self.console_locked {
            self.line_buffer = Some((to_print.to_owned(), line_type));
            return;
        }

        let mut stdout = std::io::stdout();
        if self.smart_terminal {
            let _ = write!(stdout, "\r");
        }
        if self.smart_terminal && line_type == LineType::Elide {
            let width = terminal::get_cols().unwrap_or(80);
            // Clear to end of line after the text in case the previous line
            // was longer.
            let _ = write!(stdout, "{}\x1B[K", elide_middle(to_print, width));
            let _ = stdout.flush();
            self.have_blank_line = false;
        } else {
            let _ = writeln!(stdout, "{}", to_print);
            self.have_blank_line = true;
        }
    }

    fn print_or_buffer(&mut self, data: &str) {
        if self.console_locked {
            self.output_buffer.push_str(data);
        } else {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(data.as_bytes());
            let _ = stdout.flush();
        }
    }

    /// Prints a string on a new line, not overprinting the progress status.
    pub fn print_on_new_line(&mut self, to_print: &str) {
        if self.console_locked {
            if let Some((line, _)) = self.line_buffer.take() {
                self.output_buffer.push_str(&line);
                self.output_buffer.push('\n');
            }
        }
        if !self.have_blank_line {
            self.print_or_buffer("\n");
        }
        if !to_print.is_empty() {
            self.print_or_buffer(to_print);
        }
        self.have_blank_line = to_print.is_empty() || to_print.ends_with('\n');
    }

    /// While locked, the terminal belongs to a subprocess; our own output
    /// queues up until the lock releases.
    pub fn set_console_locked(&mut self, locked: bool) {
        if locked == self.console_locked {
            return;
        }
        if locked {
            self.print_on_new_line("");
        }
        self.console_locked = locked;
        if !locked {
            let buffered = std::mem::take(&mut self.output_buffer);
            self.print_on_new_line(&buffered);
            if let Some((line, line_type)) = self.line_buffer.take() {
                self.print(&line, line_type);
            }
        }
    }
}

/// Elide the middle of a string to fit into `width` columns.
pub fn elide_middle(text: &str, width: usize) -> String {
    const MARGIN: usize = 3; // Space for "...".
    if text.len() <= width {
        return text.to_owned();
    }
    if width <= MARGIN {
        return ".".repeat(width);
    }
    let elide_size = (width - MARGIN) / 2;
    format!(
        "{}...{}",
        &text[..elide_size],
        &text[text.len() - elide_size..]
    )
}

/// Remove ANSI escape sequences, for when output goes to a pipe or file.
pub fn strip_ansi_escape_codes(input: &str) -> String {
    let mut out = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != 0x1B {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        // Skip the escape itself, then a CSI sequence through its final
        // letter, or a single following character otherwise.
        i += 1;
        if i < bytes.len() && bytes[i] == b'[' {
            i += 1;
            while i < bytes.len() && !bytes[i].is_ascii_alphabetic() {
                i += 1;
            }
            i += 1;
        } else {
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
