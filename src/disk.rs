//! Abstraction over file-system access, so the scanner and builder can be
//! exercised against an in-memory disk in tests.

use std::io;
use std::path::Path;

/// MTime info gathered for a file.  This also models "file is absent";
/// not an Option<> because it makes the comparing code easier to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MTime {
    Missing,
    /// Nanoseconds since the epoch.
    Stamp(i64),
}

impl MTime {
    /// The representation used in the on-disk logs: 0 means missing.
    pub fn raw(self) -> i64 {
        match self {
            MTime::Missing => 0,
            MTime::Stamp(t) => t,
        }
    }

    pub fn from_raw(t: i64) -> MTime {
        if t == 0 {
            MTime::Missing
        } else {
            MTime::Stamp(t)
        }
    }
}

pub trait DiskInterface {
    /// stat() an on-disk path, producing its MTime.
    fn stat(&self, path: &str) -> io::Result<MTime>;
    fn read_file(&self, path: &str) -> io::Result<Vec<u8>>;
    fn write_file(&self, path: &str, contents: &str) -> io::Result<()>;
    /// Create the directory containing `path`, and any parents.
    fn make_dirs_for(&self, path: &str) -> io::Result<()>;
    /// Remove a file; Ok(false) when it was already absent.
    fn remove_file(&self, path: &str) -> io::Result<bool>;
}

pub struct RealDiskInterface {}

impl RealDiskInterface {
    pub fn new() -> Self {
        RealDiskInterface {}
    }
}

#[cfg(unix)]
fn metadata_mtime(meta: &std::fs::Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    meta.mtime() * 1_000_000_000 + meta.mtime_nsec()
}

#[cfg(not(unix))]
fn metadata_mtime(meta: &std::fs::Metadata) -> i64 {
    match meta.modified() {
        Ok(time) => match time.duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => d.as_nanos() as i64,
            Err(_) => 0,
        },
        Err(_) => 0,
    }
}

impl DiskInterface for RealDiskInterface {
    fn stat(&self, path: &str) -> io::Result<MTime> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(MTime::Stamp(metadata_mtime(&meta))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(MTime::Missing),
            Err(err) => Err(err),
        }
    }

    fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write_file(&self, path: &str, contents: &str) -> io::Result<()> {
        std::fs::write(path, contents)
    }

    fn make_dirs_for(&self, path: &str) -> io::Result<()> {
        match Path::new(path).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }

    fn remove_file(&self, path: &str) -> io::Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
pub mod test_support {
    //! An in-memory DiskInterface for scanner and planner tests.

    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeDisk {
        pub files: RefCell<HashMap<String, (i64, Vec<u8>)>>,
    }

    impl FakeDisk {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put(&self, path: &str, mtime: i64, content: &str) {
            self.files
                .borrow_mut()
                .insert(path.to_owned(), (mtime, content.as_bytes().to_vec()));
        }

        pub fn touch(&self, path: &str, mtime: i64) {
            self.put(path, mtime, "");
        }
    }

    impl DiskInterface for FakeDisk {
        fn stat(&self, path: &str) -> io::Result<MTime> {
            Ok(match self.files.borrow().get(path) {
                Some((mtime, _)) => MTime::Stamp(*mtime),
                None => MTime::Missing,
            })
        }

        fn read_file(&self, path: &str) -> io::Result<Vec<u8>> {
            self.files
                .borrow()
                .get(path)
                .map(|(_, content)| content.clone())
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        fn write_file(&self, path: &str, contents: &str) -> io::Result<()> {
            self.put(path, 1, contents);
            Ok(())
        }

        fn make_dirs_for(&self, _path: &str) -> io::Result<()> {
            Ok(())
        }

        fn remove_file(&self, path: &str) -> io::Result<bool> {
            Ok(self.files.borrow_mut().remove(path).is_some())
        }
    }
}
