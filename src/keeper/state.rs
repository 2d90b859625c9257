//! `KeeperState`: the one piece of mutable state the keeper loop carries
//! across `wait4` iterations (spec.md §3's `KeeperState`). An owned
//! value threaded explicitly through `keeper::run`, replacing the
//! teacher's `lazy_static` global `Flags` object (DESIGN.md).

use crate::error::Result;
use crate::resource_sampler;
use crate::syscall_table::SyscallAction;
use nix::unistd::Pid;
use std::time::Instant;

pub struct KeeperState {
    pub child_pid: Pid,
    pub is_traced: bool,
    pub exec_seen: bool,
    start: Instant,
    pub mem_peak_kb: u64,
    pub syscall_count: u64,
    /// Counts syscall-stops; odd is entry, even is exit (spec.md §4.8).
    sys_tick: u64,
    pub last_sys: Option<i64>,
    pub last_action: Option<SyscallAction>,
    /// Counts plain (non-`0x80`) `SIGTRAP` stops. The kernel delivers
    /// exactly one of these right after a successful `execve`, with no
    /// `PTRACE_O_TRACEEXEC` requested; the first is that benign post-exec
    /// trap, any further one is a real breakpoint trap (box.c's
    /// `stop_count`).
    plain_trap_count: u32,
}

impl KeeperState {
    pub fn new(child_pid: Pid) -> Self {
        KeeperState {
            child_pid,
            is_traced: false,
            exec_seen: false,
            start: Instant::now(),
            mem_peak_kb: 0,
            syscall_count: 0,
            sys_tick: 0,
            last_sys: None,
            last_action: None,
            plain_trap_count: 0,
        }
    }

    /// Bumps the plain-`SIGTRAP` counter and reports whether this one is
    /// the expected post-exec trap (the first) or a genuine breakpoint
    /// (any later one).
    pub fn bump_plain_trap(&mut self) -> bool {
        self.plain_trap_count += 1;
        self.plain_trap_count == 1
    }

    /// Advances tick parity and reports whether this stop is a syscall
    /// entry (odd tick) or exit (even tick).
    pub fn bump_tick(&mut self) -> bool {
        self.sys_tick += 1;
        self.sys_tick % 2 == 1
    }

    pub fn wall_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn cpu_ms(&self) -> Result<u64> {
        resource_sampler::cpu_time_ms(self.child_pid)
    }

    /// Reads `VmPeak` and folds it into the running maximum (spec.md
    /// §4.8's "Memory peak" sampling points).
    pub fn sample_mem(&mut self) -> Result<()> {
        let kb = resource_sampler::vm_peak_kb(self.child_pid)?;
        self.mem_peak_kb = self.mem_peak_kb.max(kb);
        Ok(())
    }

    pub fn record_entry(&mut self, sys: i64, action: SyscallAction) {
        self.last_sys = Some(sys);
        self.last_action = Some(action);
        self.syscall_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_parity_alternates_starting_with_entry() {
        let mut s = KeeperState::new(Pid::from_raw(1));
        assert!(s.bump_tick(), "first tick must be entry");
        assert!(!s.bump_tick(), "second tick must be exit");
        assert!(s.bump_tick(), "third tick must be entry again");
    }

    #[test]
    fn mem_peak_never_decreases() {
        let mut s = KeeperState::new(Pid::from_raw(1));
        s.mem_peak_kb = 500;
        s.mem_peak_kb = s.mem_peak_kb.max(200);
        assert_eq!(s.mem_peak_kb, 500);
        s.mem_peak_kb = s.mem_peak_kb.max(900);
        assert_eq!(s.mem_peak_kb, 900);
    }

    #[test]
    fn first_plain_trap_is_tolerated_later_ones_are_not() {
        let mut s = KeeperState::new(Pid::from_raw(1));
        assert!(s.bump_plain_trap(), "the post-exec trap must be tolerated");
        assert!(!s.bump_plain_trap(), "a second plain trap is a real breakpoint");
        assert!(!s.bump_plain_trap());
    }
}
