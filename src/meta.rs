//! The meta report: an append-only `key:value` file consumed by the outer
//! evaluator (spec.md §3, §6). Grounded on box.c's `meta_open`/
//! `meta_printf`/`final_stats`.

use crate::error::{Result, SandboxError, StatusCode};
use std::fs::File;
use std::io::{self, Write};

/// Either a real file or standard output (`-M -`).
enum Sink {
    File(File),
    Stdout,
    None,
}

/// Keeper-private, append-only meta report.
pub struct MetaWriter {
    sink: Sink,
    /// Keys written, in order, for the `OK (...)` stderr summary and for
    /// tests that assert on emission order.
    keys_written: Vec<String>,
}

impl MetaWriter {
    /// No `-M` given: every write is silently dropped, matching box.c's
    /// `meta_printf` no-op when `metafile` is null.
    pub fn none() -> Self {
        MetaWriter {
            sink: Sink::None,
            keys_written: Vec::new(),
        }
    }

    pub fn open(path: &str) -> Result<Self> {
        let sink = if path == "-" {
            Sink::Stdout
        } else {
            let f = File::create(path)
                .map_err(|e| SandboxError::xx(format!("Failed to open metafile '{}': {}", path, e)))?;
            Sink::File(f)
        };
        Ok(MetaWriter {
            sink,
            keys_written: Vec::new(),
        })
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        match &mut self.sink {
            Sink::File(f) => writeln!(f, "{}", line),
            Sink::Stdout => writeln!(io::stdout(), "{}", line),
            Sink::None => Ok(()),
        }
    }

    /// Write one `key:value` entry.
    pub fn entry(&mut self, key: &str, value: impl std::fmt::Display) {
        self.keys_written.push(key.to_string());
        let _ = self.write_line(&format!("{}:{}", key, value));
    }

    pub fn status(&mut self, code: StatusCode) {
        self.entry("status", code.as_str());
    }

    pub fn message(&mut self, msg: &str) {
        self.entry("message", msg);
    }

    pub fn time(&mut self, total_ms: u64, wall_ms: u64) {
        self.entry("time", format_seconds(total_ms));
        self.entry("time-wall", format_seconds(wall_ms));
    }

    pub fn mem_bytes(&mut self, peak_kb: u64) {
        self.entry("mem", peak_kb * 1024);
    }

    pub fn killed(&mut self) {
        self.entry("killed", 1);
    }

    pub fn exitcode(&mut self, code: i32) {
        self.entry("exitcode", code);
    }

    pub fn exitsig(&mut self, sig: i32) {
        self.entry("exitsig", sig);
    }

    pub fn keys_written(&self) -> &[String] {
        &self.keys_written
    }
}

/// `S.mmm` seconds, as box.c's `%d.%03d` formatting produces.
fn format_seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// The human-readable "OK (...)" line box.c's `boxkeeper` prints to stderr
/// on a clean run.
pub fn summary_line(total_ms: u64, wall_ms: u64, peak_kb: u64, syscall_count: u64) -> String {
    format!(
        "OK ({}.{:03} sec real, {}.{:03} sec wall, {} MB, {} syscalls)",
        total_ms / 1000,
        total_ms % 1000,
        wall_ms / 1000,
        wall_ms % 1000,
        (peak_kb + 1023) / 1024,
        syscall_count,
    )
}

/// Parses an emitted meta file back into an ordered list of `(key, value)`
/// pairs, for the round-trip law in spec.md §8.
pub fn parse(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(2, ':');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn round_trip_preserves_keys_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.txt");
        let path_str = path.to_str().unwrap();

        let mut w = MetaWriter::open(path_str).unwrap();
        w.status(StatusCode::Re);
        w.message("Exited with error status 1");
        w.time(123, 456);
        w.mem_bytes(2048);
        w.exitcode(1);
        drop(w);

        let mut contents = String::new();
        File::open(path).unwrap().read_to_string(&mut contents).unwrap();
        let parsed = parse(&contents);
        let keys: Vec<&str> = parsed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["status", "message", "time", "time-wall", "mem", "exitcode"]);
        assert_eq!(parsed[0].1, "RE");
        assert_eq!(parsed[2].1, "0.123");
        assert_eq!(parsed[4].1, "2097152");
    }

    #[test]
    fn dash_path_writes_to_stdout_without_panicking() {
        let mut w = MetaWriter::open("-").unwrap();
        w.status(StatusCode::Fo);
    }

    #[test]
    fn none_sink_is_a_silent_no_op() {
        let mut w = MetaWriter::none();
        w.status(StatusCode::Xx);
        assert_eq!(w.keys_written(), &["status"]);
    }

    #[test]
    fn summary_line_matches_expected_format() {
        let line = summary_line(1500, 1600, 10000, 42);
        assert_eq!(line, "OK (1.500 sec real, 1.600 sec wall, 10 MB, 42 syscalls)");
    }
}
