//! Terminal queries: whether stdout is a smart terminal, and its width.

#[cfg(unix)]
mod imp {
    pub fn is_tty() -> bool {
        unsafe {
            libc::isatty(/* stdout */ 1) == 1
        }
    }

    pub fn get_cols() -> Option<usize> {
        unsafe {
            let mut winsize = std::mem::zeroed::<libc::winsize>();
            if libc::ioctl(1, libc::TIOCGWINSZ, &mut winsize) < 0 {
                return None;
            }
            if winsize.ws_col < 10 {
                // Ignore implausibly narrow widths.
                return None;
            }
            Some(winsize.ws_col as usize)
        }
    }
}

#[cfg(windows)]
mod imp {
    pub fn is_tty() -> bool {
        unsafe {
            let handle =
                winapi::um::processenv::GetStdHandle(winapi::um::winbase::STD_OUTPUT_HANDLE);
            let mut mode = 0;
            // GetConsoleMode fails when not attached to a console.
            winapi::um::consoleapi::GetConsoleMode(handle, &mut mode) != 0
        }
    }

    pub fn get_cols() -> Option<usize> {
        unsafe {
            let console =
                winapi::um::processenv::GetStdHandle(winapi::um::winbase::STD_OUTPUT_HANDLE);
            if console == winapi::um::handleapi::INVALID_HANDLE_VALUE {
                return None;
            }
            let mut csbi = std::mem::zeroed::<winapi::um::wincon::CONSOLE_SCREEN_BUFFER_INFO>();
            if winapi::um::wincon::GetConsoleScreenBufferInfo(console, &mut csbi) == 0 {
                return None;
            }
            if csbi.dwSize.X < 10 {
                return None;
            }
            Some(csbi.dwSize.X as usize)
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod imp {
    pub fn is_tty() -> bool {
        false
    }

    pub fn get_cols() -> Option<usize> {
        None
    }
}

pub use imp::get_cols;

/// Whether stdout is a terminal worth overprinting on.
pub fn use_smart_terminal() -> bool {
    if std::env::var_os("TERM").map_or(false, |term| term == "dumb") {
        return false;
    }
    imp::is_tty()
}
