//! CPU-time and peak-memory accounting read out of `/proc` (spec.md
//! §4.8). Grounded on box.c's `sample_mem_peak`/time-accounting reads
//! of `/proc/<pid>/stat` and `/proc/<pid>/status`.

use crate::error::{Result, SandboxError};
use nix::unistd::Pid;
use std::fs;

/// Clock ticks per second, used to convert `/proc/<pid>/stat`'s
/// `utime`/`stime` fields into milliseconds. `sysconf(_SC_CLK_TCK)` is
/// effectively always 100 on Linux, as box.c assumes.
fn clock_ticks_per_sec() -> i64 {
    unsafe { libc::sysconf(libc::_SC_CLK_TCK) }
}

/// CPU time consumed so far, in milliseconds: `utime + stime` from
/// `/proc/<pid>/stat`, fields 14 and 15. The `comm` field (`(...)`) can
/// itself contain spaces or parentheses, so box.c (and this) finds the
/// fields by skipping past the *last* `)` rather than splitting on
/// whitespace naively.
pub fn cpu_time_ms(pid: Pid) -> Result<u64> {
    let path = format!("/proc/{}/stat", pid);
    let contents = fs::read_to_string(&path)
        .map_err(|e| SandboxError::xx(format!("failed to read {}: {}", path, e)))?;

    let after_comm = contents
        .rfind(')')
        .map(|idx| &contents[idx + 1..])
        .ok_or_else(|| SandboxError::xx(format!("malformed {}", path)))?;

    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // Fields 3.. in the full line correspond to indices 0.. here (state
    // is field 3, so utime/stime at fields 14/15 land at indices 11/12).
    let utime: i64 = fields
        .get(11)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SandboxError::xx(format!("malformed {}: missing utime", path)))?;
    let stime: i64 = fields
        .get(12)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SandboxError::xx(format!("malformed {}: missing stime", path)))?;

    let ticks = utime + stime;
    Ok((ticks * 1000 / clock_ticks_per_sec()) as u64)
}

/// Peak resident-plus-virtual size in KiB, read from `/proc/<pid>/status`'s
/// `VmPeak` line (spec.md §4.8's memory sampling point).
pub fn vm_peak_kb(pid: Pid) -> Result<u64> {
    let path = format!("/proc/{}/status", pid);
    let contents = fs::read_to_string(&path)
        .map_err(|e| SandboxError::xx(format!("failed to read {}: {}", path, e)))?;

    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("VmPeak:") {
            let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
            return digits
                .parse()
                .map_err(|_| SandboxError::xx(format!("malformed VmPeak line in {}", path)));
        }
    }
    // A process that never touched memory past its initial image may have
    // no VmPeak line at all; that's zero usage, not an error.
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_utime_and_stime_past_a_comm_field_with_spaces() {
        let line = "1234 (my weird (proc) name) S 1 1234 1234 0 -1 4194304 100 0 0 0 7 3 0 0 20 0 1 0 12345 0 0 18446744073709551615";
        let after_comm = line.rfind(')').map(|i| &line[i + 1..]).unwrap();
        let fields: Vec<&str> = after_comm.split_whitespace().collect();
        let utime: i64 = fields[11].parse().unwrap();
        let stime: i64 = fields[12].parse().unwrap();
        assert_eq!(utime, 7);
        assert_eq!(stime, 3);
    }

    #[test]
    fn vm_peak_missing_line_defaults_to_zero() {
        let contents = "Name:\tfoo\nVmSize:\t1000 kB\n";
        let mut found = None;
        for line in contents.lines() {
            if let Some(rest) = line.strip_prefix("VmPeak:") {
                found = Some(rest.to_string());
            }
        }
        assert!(found.is_none());
    }

    #[test]
    fn vm_peak_line_digits_extracted_correctly() {
        let line = "VmPeak:\t   12345 kB";
        let rest = line.strip_prefix("VmPeak:").unwrap();
        let digits: String = rest.chars().filter(|c| c.is_ascii_digit()).collect();
        assert_eq!(digits.parse::<u64>().unwrap(), 12345);
    }
}
