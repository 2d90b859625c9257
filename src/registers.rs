//! A typed wrapper over `PTRACE_GETREGS`/`PTRACE_SETREGS` registers
//! (spec.md §4.7). Grounded on `rd`'s `Registers` (get/set-pair style)
//! but narrowed to one native arch per build via `#[cfg(target_arch)]`
//! rather than `rd`'s runtime `x86`/`x64` union switch: this sandbox
//! doesn't need cross-arch record/replay fidelity, only "decode the
//! syscall the tracee actually made" (DESIGN.md).

use crate::error::Result;
use nix::sys::ptrace;
use nix::unistd::Pid;

/// Sentinel written into the syscall-number slot to turn a denied
/// syscall into a harmless, always-failing one before it runs (spec.md
/// §4.7). Box.c uses `-1`; this crate writes `!0`, which is the same
/// bit pattern reinterpreted as the register's unsigned width.
pub const DENIED_SYSCALL_SENTINEL: i64 = -1;

#[cfg(target_arch = "x86_64")]
#[derive(Copy, Clone)]
pub struct Registers(libc::user_regs_struct);

#[cfg(target_arch = "x86_64")]
impl Registers {
    pub fn from_ptrace(pid: Pid) -> Result<Self> {
        Ok(Registers(ptrace::getregs(pid)?))
    }

    pub fn apply(&self, pid: Pid) -> Result<()> {
        ptrace::setregs(pid, self.0)?;
        Ok(())
    }

    pub fn ip(&self) -> u64 {
        self.0.rip
    }

    pub fn cs(&self) -> u64 {
        self.0.cs
    }

    /// The syscall number as the kernel saw it on entry (`orig_rax`),
    /// not `rax` (which holds the return value once the call has run).
    pub fn syscallno(&self) -> i64 {
        self.0.orig_rax as i64
    }

    pub fn set_syscallno(&mut self, no: i64) {
        self.0.orig_rax = no as u64;
    }

    /// Overwrites the syscall number with [`DENIED_SYSCALL_SENTINEL`],
    /// so the kernel runs a syscall that cannot possibly exist instead of
    /// the one the tracee asked for (spec.md §4.7).
    pub fn deny(&mut self) {
        self.set_syscallno(DENIED_SYSCALL_SENTINEL);
    }

    pub fn syscall_result(&self) -> i64 {
        self.0.rax as i64
    }

    /// Syscall argument `n` (1-based), per the amd64 syscall ABI
    /// (`rdi, rsi, rdx, r10, r8, r9`).
    pub fn arg(&self, n: u8) -> u64 {
        match n {
            1 => self.0.rdi,
            2 => self.0.rsi,
            3 => self.0.rdx,
            4 => self.0.r10,
            5 => self.0.r8,
            6 => self.0.r9,
            _ => panic!("syscall argument index out of range: {}", n),
        }
    }
}

#[cfg(target_arch = "x86")]
#[derive(Copy, Clone)]
pub struct Registers(libc::user_regs_struct);

#[cfg(target_arch = "x86")]
impl Registers {
    pub fn from_ptrace(pid: Pid) -> Result<Self> {
        Ok(Registers(ptrace::getregs(pid)?))
    }

    pub fn apply(&self, pid: Pid) -> Result<()> {
        ptrace::setregs(pid, self.0)?;
        Ok(())
    }

    pub fn ip(&self) -> u64 {
        self.0.eip as u64
    }

    pub fn cs(&self) -> u64 {
        self.0.xcs as u64
    }

    pub fn syscallno(&self) -> i64 {
        self.0.orig_eax as i64
    }

    pub fn set_syscallno(&mut self, no: i64) {
        self.0.orig_eax = no as i32;
    }

    pub fn deny(&mut self) {
        self.set_syscallno(DENIED_SYSCALL_SENTINEL);
    }

    pub fn syscall_result(&self) -> i64 {
        self.0.eax as i64
    }

    /// Syscall argument `n` (1-based), per the i386 syscall ABI
    /// (`ebx, ecx, edx, esi, edi, ebp`).
    pub fn arg(&self, n: u8) -> u64 {
        match n {
            1 => self.0.ebx as u64,
            2 => self.0.ecx as u64,
            3 => self.0.edx as u64,
            4 => self.0.esi as u64,
            5 => self.0.edi as u64,
            6 => self.0.ebp as u64,
            _ => panic!("syscall argument index out of range: {}", n),
        }
    }
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;

    fn zeroed() -> Registers {
        Registers(unsafe { std::mem::zeroed() })
    }

    #[test]
    fn deny_writes_the_sentinel_into_orig_rax() {
        let mut r = zeroed();
        r.set_syscallno(libc::SYS_open);
        r.deny();
        assert_eq!(r.syscallno(), DENIED_SYSCALL_SENTINEL);
    }

    #[test]
    fn arg_reads_the_expected_register() {
        let mut r = zeroed();
        r.0.rdi = 111;
        r.0.rsi = 222;
        r.0.rdx = 333;
        assert_eq!(r.arg(1), 111);
        assert_eq!(r.arg(2), 222);
        assert_eq!(r.arg(3), 333);
    }

    #[test]
    #[should_panic]
    fn arg_out_of_range_panics() {
        let r = zeroed();
        r.arg(7);
    }
}
