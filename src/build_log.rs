//! The build log: a record of the last successful command per output,
//! used to detect when a command line changes between builds.
//!
//! Each run appends to the log file.  Loading replays all entries in
//! series, keeping the newest per output.  Once the number of redundant
//! entries exceeds a threshold, the log is rewritten ("recompacted").

use crate::disk::{DiskInterface, MTime};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};

const FILE_SIGNATURE: &str = "# ninja log v";
const CURRENT_VERSION: i32 = 5;
const OLDEST_SUPPORTED_VERSION: i32 = 4;

const MIN_COMPACTION_ENTRY_COUNT: usize = 100;
const COMPACTION_RATIO: usize = 3;

/// 64-bit MurmurHash2, used to fingerprint command lines.
pub fn hash_command(command: &str) -> u64 {
    const SEED: u64 = 0xDECAFBADDECAFBAD;
    const M: u64 = 0xc6a4a7935bd1e995;
    const R: u32 = 47;

    let data = command.as_bytes();
    let mut h = SEED ^ (data.len() as u64).wrapping_mul(M);

    let mut chunks = data.chunks_exact(8);
    for chunk in &mut chunks {
        let mut k = u64::from_le_bytes(chunk.try_into().unwrap());
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h ^= k;
        h = h.wrapping_mul(M);
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k: u64 = 0;
        for (i, &b) in tail.iter().enumerate() {
            k |= (b as u64) << (8 * i);
        }
        h ^= k;
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub output: String,
    pub command_hash: u64,
    /// Times are milliseconds since the start of the recording build.
    pub start_time: i32,
    pub end_time: i32,
    /// Output mtime observed when the command finished, log-raw encoding.
    pub mtime: i64,
}

/// Lets recompaction drop entries for outputs that no longer matter.
pub trait BuildLogUser {
    fn is_path_dead(&self, path: &str) -> bool;
}

/// Accept everything; used by tools that rewrite the log wholesale.
pub struct KeepAllEntries;
impl BuildLogUser for KeepAllEntries {
    fn is_path_dead(&self, _path: &str) -> bool {
        false
    }
}

#[derive(Default)]
pub struct BuildLog {
    entries: HashMap<String, LogEntry>,
    path: Option<String>,
    file: Option<BufWriter<File>>,
    needs_recompaction: bool,
}

impl BuildLog {
    pub fn new() -> Self {
        BuildLog::default()
    }

    /// Replay the log at `path` into memory.  A missing file is an empty
    /// log; a log too old to read is discarded (the outputs will simply
    /// rebuild).
    pub fn load(&mut self, path: &str) -> anyhow::Result<()> {
        let contents = match std::fs::read(path) {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => anyhow::bail!("read {}: {}", path, err),
        };
        let text = String::from_utf8_lossy(&contents);

        let mut log_version = 0;
        let mut unique_entry_count = 0;
        let mut total_entry_count = 0;

        for line in text.lines() {
            if log_version == 0 {
                if let Some(rest) = line.strip_prefix(FILE_SIGNATURE) {
                    log_version = rest.trim().parse::<i32>().unwrap_or(0);
                }
                if log_version < OLDEST_SUPPORTED_VERSION {
                    // Too old to read; start over.  Not a failure: an empty
                    // build log just causes rebuilds.
                    self.entries.clear();
                    let _ = std::fs::remove_file(path);
                    return Ok(());
                }
                continue;
            }

            let mut fields = line.splitn(5, '\t');
            let (start_time, end_time, mtime, output, last) = match (
                fields.next().and_then(|f| f.parse::<i32>().ok()),
                fields.next().and_then(|f| f.parse::<i32>().ok()),
                fields.next().and_then(|f| f.parse::<i64>().ok()),
                fields.next(),
                fields.next(),
            ) {
                (Some(s), Some(e), Some(m), Some(o), Some(l)) => (s, e, m, o, l),
                _ => continue, // Tolerate truncated or torn lines.
            };
            let command_hash = if log_version >= 5 {
                match u64::from_str_radix(last, 16) {
                    Ok(h) => h,
                    Err(_) => continue,
                }
            } else {
                // v4 stored the full command text.
                hash_command(last)
            };

            total_entry_count += 1;
            if !self.entries.contains_key(output) {
                unique_entry_count += 1;
            }
            self.entries.insert(
                output.to_owned(),
                LogEntry {
                    output: output.to_owned(),
                    command_hash,
                    start_time,
                    end_time,
                    mtime,
                },
            );
        }

        if log_version > 0 && log_version < CURRENT_VERSION {
            self.needs_recompaction = true;
        } else if total_entry_count > MIN_COMPACTION_ENTRY_COUNT
            && total_entry_count > unique_entry_count * COMPACTION_RATIO
        {
            self.needs_recompaction = true;
        }

        Ok(())
    }

    /// Prepare to append to the log at `path`, recompacting first if the
    /// load pass found it worthwhile.  The file itself is created lazily on
    /// the first write.
    pub fn open_for_write(&mut self, path: &str, user: &dyn BuildLogUser) -> anyhow::Result<()> {
        if self.needs_recompaction {
            self.recompact(path, user)?;
            self.needs_recompaction = false;
        }
        self.path = Some(path.to_owned());
        Ok(())
    }

    fn open_file_if_needed(&mut self) -> anyhow::Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let write_header = file.metadata()?.len() == 0;
        let mut w = BufWriter::new(file);
        if write_header {
            writeln!(w, "{}{}", FILE_SIGNATURE, CURRENT_VERSION)?;
        }
        self.file = Some(w);
        Ok(())
    }

    pub fn lookup(&self, output: &str) -> Option<&LogEntry> {
        self.entries.get(output)
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Record a finished command for one output, both in memory and on disk.
    pub fn record(
        &mut self,
        output: &str,
        command_hash: u64,
        start_time: i32,
        end_time: i32,
        mtime: MTime,
    ) -> anyhow::Result<()> {
        let entry = LogEntry {
            output: output.to_owned(),
            command_hash,
            start_time,
            end_time,
            mtime: mtime.raw(),
        };
        self.entries.insert(output.to_owned(), entry.clone());

        self.open_file_if_needed()?;
        if let Some(w) = &mut self.file {
            write_entry(w, &entry)?;
            w.flush()?;
        }
        Ok(())
    }

    pub fn close(&mut self) -> anyhow::Result<()> {
        // Create the file even if nothing was recorded.
        self.open_file_if_needed()?;
        if let Some(mut w) = self.file.take() {
            w.flush()?;
        }
        Ok(())
    }

    /// Rewrite the log keeping only the newest entry per live output.
    pub fn recompact(&mut self, path: &str, user: &dyn BuildLogUser) -> anyhow::Result<()> {
        self.file = None;
        let temp_path = format!("{}.recompact", path);
        {
            let mut w = BufWriter::new(File::create(&temp_path)?);
            writeln!(w, "{}{}", FILE_SIGNATURE, CURRENT_VERSION)?;
            self.entries.retain(|output, _| !user.is_path_dead(output));
            let mut outputs: Vec<&String> = self.entries.keys().collect();
            outputs.sort();
            for output in outputs {
                write_entry(&mut w, &self.entries[output])?;
            }
            w.flush()?;
        }
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Re-stat the outputs named in the log against disk and rewrite it.
    /// With an empty `targets` list every entry is refreshed.
    pub fn restat(
        &mut self,
        path: &str,
        disk: &dyn DiskInterface,
        targets: &[String],
    ) -> anyhow::Result<()> {
        self.file = None;
        let temp_path = format!("{}.restat", path);
        {
            let mut w = BufWriter::new(File::create(&temp_path)?);
            writeln!(w, "{}{}", FILE_SIGNATURE, CURRENT_VERSION)?;
            let mut outputs: Vec<String> = self.entries.keys().cloned().collect();
            outputs.sort();
            for output in outputs {
                let entry = self.entries.get_mut(&output).unwrap();
                if targets.is_empty() || targets.iter().any(|t| *t == entry.output) {
                    entry.mtime = disk.stat(&entry.output)?.raw();
                }
                write_entry(&mut w, entry)?;
            }
            w.flush()?;
        }
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}

fn write_entry(w: &mut impl Write, entry: &LogEntry) -> std::io::Result<()> {
    // Tab-separated with no escaping; paths containing tabs or newlines are
    // not representable.
    writeln!(
        w,
        "{}\t{}\t{}\t{}\t{:x}",
        entry.start_time, entry.end_time, entry.mtime, entry.output, entry.command_hash
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::test_support::FakeDisk;

    fn temp_log_path(dir: &tempfile::TempDir) -> String {
        dir.path().join(".ninja_log").to_str().unwrap().to_owned()
    }

    #[test]
    fn hash_is_sensitive_to_input() {
        assert_eq!(hash_command("cat in > out"), hash_command("cat in > out"));
        assert_ne!(hash_command("cat in > out"), hash_command("cat in > out2"));
        assert_ne!(hash_command(""), hash_command(" "));
        // Exercise both the 8-byte chunk loop and the tail.
        assert_ne!(
            hash_command("0123456789abcdef"),
            hash_command("0123456789abcdef0")
        );
    }

    #[test]
    fn write_then_load_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_log_path(&dir);

        let mut log = BuildLog::new();
        log.open_for_write(&path, &KeepAllEntries)?;
        log.record("out", hash_command("touch out"), 10, 20, MTime::Stamp(5))?;
        log.record("out2", hash_command("touch out2"), 20, 30, MTime::Stamp(6))?;
        log.close()?;

        let mut loaded = BuildLog::new();
        loaded.load(&path)?;
        assert_eq!(loaded.num_entries(), 2);
        let entry = loaded.lookup("out").unwrap();
        assert_eq!(entry.command_hash, hash_command("touch out"));
        assert_eq!(entry.start_time, 10);
        assert_eq!(entry.end_time, 20);
        assert_eq!(entry.mtime, 5);
        Ok(())
    }

    #[test]
    fn later_entries_win() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_log_path(&dir);

        let mut log = BuildLog::new();
        log.open_for_write(&path, &KeepAllEntries)?;
        log.record("out", 1, 0, 1, MTime::Stamp(1))?;
        log.record("out", 2, 1, 2, MTime::Stamp(2))?;
        log.close()?;

        let mut loaded = BuildLog::new();
        loaded.load(&path)?;
        assert_eq!(loaded.num_entries(), 1);
        assert_eq!(loaded.lookup("out").unwrap().command_hash, 2);
        Ok(())
    }

    #[test]
    fn recompacts_when_mostly_redundant() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_log_path(&dir);

        // 401 entries over 100 unique outputs: past both thresholds.
        let mut log = BuildLog::new();
        log.open_for_write(&path, &KeepAllEntries)?;
        for i in 0..401 {
            log.record(&format!("out{}", i % 100), i, 0, 1, MTime::Stamp(1))?;
        }
        log.close()?;

        let mut reloaded = BuildLog::new();
        reloaded.load(&path)?;
        assert!(reloaded.needs_recompaction);
        reloaded.open_for_write(&path, &KeepAllEntries)?;
        reloaded.close()?;

        let text = std::fs::read_to_string(&path)?;
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("# ninja log v5"));
        assert_eq!(lines.count(), 100);

        // And an immediate reload sees no need to recompact again.
        let mut again = BuildLog::new();
        again.load(&path)?;
        assert!(!again.needs_recompaction);
        assert_eq!(again.num_entries(), 100);
        Ok(())
    }

    #[test]
    fn recompaction_drops_dead_paths() -> anyhow::Result<()> {
        struct DeadOut2;
        impl BuildLogUser for DeadOut2 {
            fn is_path_dead(&self, path: &str) -> bool {
                path == "out2"
            }
        }

        let dir = tempfile::tempdir()?;
        let path = temp_log_path(&dir);
        let mut log = BuildLog::new();
        log.open_for_write(&path, &KeepAllEntries)?;
        log.record("out1", 1, 0, 1, MTime::Stamp(1))?;
        log.record("out2", 2, 0, 1, MTime::Stamp(1))?;
        log.close()?;

        log.recompact(&path, &DeadOut2)?;
        assert!(log.lookup("out2").is_none());
        let mut reloaded = BuildLog::new();
        reloaded.load(&path)?;
        assert_eq!(reloaded.num_entries(), 1);
        assert!(reloaded.lookup("out1").is_some());
        Ok(())
    }

    #[test]
    fn old_version_is_rehashed_and_flagged() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_log_path(&dir);
        std::fs::write(&path, "# ninja log v4\n0\t1\t5\tout\ttouch out\n")?;

        let mut log = BuildLog::new();
        log.load(&path)?;
        assert!(log.needs_recompaction);
        assert_eq!(
            log.lookup("out").unwrap().command_hash,
            hash_command("touch out")
        );
        Ok(())
    }

    #[test]
    fn unsupported_version_starts_over() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_log_path(&dir);
        std::fs::write(&path, "# ninja log v3\n0\t1\tout\ttouch out\n")?;

        let mut log = BuildLog::new();
        log.load(&path)?;
        assert_eq!(log.num_entries(), 0);
        assert!(!std::path::Path::new(&path).exists());
        Ok(())
    }

    #[test]
    fn restat_refreshes_mtimes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = temp_log_path(&dir);
        let mut log = BuildLog::new();
        log.open_for_write(&path, &KeepAllEntries)?;
        log.record("out", 1, 0, 1, MTime::Stamp(1))?;
        log.close()?;

        let disk = FakeDisk::new();
        disk.touch("out", 42);
        log.restat(&path, &disk, &[])?;

        let mut reloaded = BuildLog::new();
        reloaded.load(&path)?;
        assert_eq!(reloaded.lookup("out").unwrap().mtime, 42);
        Ok(())
    }
}
