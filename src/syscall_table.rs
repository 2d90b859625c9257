//! Syscall whitelist (spec.md §3, §4.1). Grounded on box.c's
//! `syscall_action[]` / `syscall-table.h` / `valid_syscall`.

use bitflags::bitflags;
use std::collections::HashMap;

/// The mutually-exclusive primary disposition of a syscall action
/// (spec.md §3's `{DEFAULT, DENY, ALLOW, ALLOW_IF_FILENAME}`).
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum Primary {
    #[default]
    Default,
    Deny,
    Allow,
    AllowIfFilename,
}

bitflags! {
    /// Orthogonal flags on a [`SyscallAction`] (spec.md §3).
    #[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
    pub struct ActionFlags: u8 {
        /// The syscall does not return a value (e.g. `rt_sigreturn`); its
        /// exit stop may legitimately be missing (spec.md §4.8).
        const NO_RETURN  = 0b0000_0001;
        /// Sample `VmPeak` on entry to this syscall (spec.md §4.8).
        const SAMPLE_MEM = 0b0000_0010;
        /// Only honoured at filter level 1 (liberal); reverts to `Default`
        /// at level 2 (spec.md §4.1).
        const LIBERAL    = 0b0000_0100;
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct SyscallAction {
    pub primary: Primary,
    pub flags: ActionFlags,
}

impl SyscallAction {
    pub fn allow() -> Self {
        SyscallAction { primary: Primary::Allow, flags: ActionFlags::empty() }
    }
    pub fn allow_if_filename() -> Self {
        SyscallAction { primary: Primary::AllowIfFilename, flags: ActionFlags::empty() }
    }
    pub fn deny() -> Self {
        SyscallAction { primary: Primary::Deny, flags: ActionFlags::empty() }
    }
    pub fn with(mut self, flags: ActionFlags) -> Self {
        self.flags |= flags;
        self
    }
}

/// Filter level: 0 = off, 1 = liberal, 2 = totalitarian (spec.md §6 `-f`).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct FilterLevel(pub u8);

/// Mapping from syscall number to [`SyscallAction`]. A `HashMap` rather
/// than box.c's fixed `syscall_action[NUM_SYSCALLS+64]` array: unknown
/// numbers map to `Primary::Default` exactly as the array's zero-init
/// does, and CLI numeric overrides (`-s #1234`) need no headroom
/// calculation (spec.md §9's "NUM_ACTIONS slop" note, satisfied
/// structurally here).
#[derive(Clone, Debug, Default)]
pub struct SyscallTable {
    actions: HashMap<i64, SyscallAction>,
}

impl SyscallTable {
    pub fn new() -> Self {
        SyscallTable { actions: HashMap::new() }
    }

    pub fn set(&mut self, sys: i64, action: SyscallAction) {
        self.actions.insert(sys, action);
    }

    pub fn get(&self, sys: i64) -> SyscallAction {
        self.actions.get(&sys).copied().unwrap_or_default()
    }

    /// Syscall-action lookup (spec.md §4.1): resolves `LIBERAL` against
    /// the current filter level before returning the effective action.
    pub fn effective(&self, sys: i64, level: FilterLevel) -> SyscallAction {
        let mut action = self.get(sys);
        if action.flags.contains(ActionFlags::LIBERAL) && level.0 != 1 {
            action.primary = Primary::Default;
        }
        action
    }
}

macro_rules! syscall_names {
    ($($name:ident),* $(,)?) => {
        &[$((stringify!($name), libc::$name)),*]
    };
}

/// Syscalls permitted for a specific file name (`arg1` is a path),
/// reproducing box.c's `A_FILENAME` entries, with `openat`/`newfstatat`
/// added as the 64-bit-native equivalents of the 32-bit-only
/// `oldstat`/`stat64`-family entries box.c guards behind
/// `#ifndef CONFIG_BOX_USER_AMD64` (see SPEC_FULL.md §9).
#[cfg(target_arch = "x86_64")]
fn allow_if_filename_names() -> &'static [(&'static str, i64)] {
    syscall_names!(
        SYS_open, SYS_creat, SYS_unlink, SYS_access, SYS_truncate,
        SYS_stat, SYS_lstat, SYS_readlink, SYS_openat, SYS_newfstatat,
    )
}

#[cfg(target_arch = "x86")]
fn allow_if_filename_names() -> &'static [(&'static str, i64)] {
    syscall_names!(
        SYS_open, SYS_creat, SYS_unlink, SYS_access, SYS_truncate,
        SYS_stat, SYS_lstat, SYS_readlink,
        SYS_oldstat, SYS_oldlstat, SYS_truncate64, SYS_stat64, SYS_lstat64,
    )
}

/// Syscalls permitted unconditionally, reproducing box.c's `A_YES`
/// (non-liberal) entries.
#[cfg(target_arch = "x86_64")]
fn always_allow_names() -> &'static [(&'static str, i64)] {
    syscall_names!(
        SYS_read, SYS_write, SYS_close, SYS_lseek, SYS_getpid, SYS_getuid,
        SYS_dup, SYS_brk, SYS_getgid, SYS_geteuid, SYS_getegid, SYS_dup2,
        SYS_ftruncate, SYS_fstat, SYS_personality, SYS_readv, SYS_writev,
        SYS_getresuid, SYS_pread64, SYS_pwrite64, SYS_fcntl, SYS_mmap,
        SYS_munmap, SYS_ioctl, SYS_uname, SYS_gettid, SYS_set_thread_area,
        SYS_get_thread_area, SYS_set_tid_address, SYS_arch_prctl,
    )
}

#[cfg(target_arch = "x86")]
fn always_allow_names() -> &'static [(&'static str, i64)] {
    syscall_names!(
        SYS_read, SYS_write, SYS_close, SYS_lseek, SYS_getpid, SYS_getuid,
        SYS_dup, SYS_brk, SYS_getgid, SYS_geteuid, SYS_getegid, SYS_dup2,
        SYS_ftruncate, SYS_fstat, SYS_personality, SYS_readv, SYS_writev,
        SYS_getresuid, SYS_pread, SYS_pwrite, SYS_fcntl, SYS_mmap,
        SYS_munmap, SYS_ioctl, SYS_uname, SYS_gettid, SYS_set_thread_area,
        SYS_get_thread_area, SYS_set_tid_address,
        SYS_oldfstat, SYS_ftruncate64, SYS__llseek, SYS_fstat64,
        SYS_fcntl64, SYS_mmap2,
    )
}

/// Syscalls permitted only in liberal mode, reproducing box.c's
/// `A_YES | A_LIBERAL` entries. `rt_sigreturn` additionally carries
/// `NO_RETURN`, matching `A_NO_RETVAL` in box.c.
#[cfg(target_arch = "x86_64")]
fn liberal_names() -> &'static [(&'static str, i64)] {
    syscall_names!(
        SYS_time, SYS_alarm, SYS_pause, SYS_fchmod, SYS_getrlimit,
        SYS_getrusage, SYS_gettimeofday, SYS_select, SYS_setitimer,
        SYS_getitimer, SYS_mprotect, SYS_getdents, SYS_getdents64,
        SYS_fdatasync, SYS_mremap, SYS_poll, SYS_getcwd, SYS_nanosleep,
        SYS_rt_sigaction, SYS_rt_sigprocmask, SYS_rt_sigpending,
        SYS_rt_sigtimedwait, SYS_rt_sigqueueinfo, SYS_rt_sigsuspend,
    )
}

#[cfg(target_arch = "x86")]
fn liberal_names() -> &'static [(&'static str, i64)] {
    syscall_names!(
        SYS_time, SYS_alarm, SYS_pause, SYS_fchmod, SYS_getrlimit,
        SYS_getrusage, SYS_gettimeofday, SYS_select, SYS_setitimer,
        SYS_getitimer, SYS_mprotect, SYS_getdents, SYS_getdents64,
        SYS_fdatasync, SYS_mremap, SYS_poll, SYS_getcwd, SYS_nanosleep,
        SYS_rt_sigaction, SYS_rt_sigprocmask, SYS_rt_sigpending,
        SYS_rt_sigtimedwait, SYS_rt_sigqueueinfo, SYS_rt_sigsuspend,
        SYS_sigaction, SYS_sgetmask, SYS_ssetmask, SYS_sigsuspend,
        SYS_sigpending, SYS_sigprocmask, SYS_ugetrlimit, SYS_readdir,
        SYS_signal, SYS__newselect,
    )
}

#[cfg(target_arch = "x86_64")]
fn liberal_no_return_names() -> &'static [(&'static str, i64)] {
    syscall_names!(SYS_rt_sigreturn)
}

#[cfg(target_arch = "x86")]
fn liberal_no_return_names() -> &'static [(&'static str, i64)] {
    syscall_names!(SYS_rt_sigreturn, SYS_sigreturn)
}

/// `exit`/`exit_group`: always allowed, and sampled for peak memory
/// (spec.md §4.8).
fn exit_names() -> &'static [(&'static str, i64)] {
    syscall_names!(SYS_exit, SYS_exit_group)
}

/// Whitelisted by `-F` (spec.md §6): fork-family calls, untraced children.
pub fn fork_family_names() -> &'static [(&'static str, i64)] {
    syscall_names!(SYS_fork, SYS_vfork, SYS_clone, SYS_wait4)
}

/// Whitelisted by `-T` (spec.md §6): calls used to measure run time.
pub fn times_names() -> &'static [(&'static str, i64)] {
    syscall_names!(SYS_times)
}

/// `execve`'s native syscall number, used to detect the `exec_seen`
/// transition (spec.md §3).
pub fn execve_number() -> i64 {
    libc::SYS_execve
}

pub fn kill_number() -> i64 {
    libc::SYS_kill
}

pub fn tgkill_number() -> i64 {
    libc::SYS_tgkill
}

/// Syscalls with no entry in the default table but common enough as
/// `-s NAME=...` CLI overrides (spec.md §6) that users need to name them
/// without falling back to `#<n>`. Deliberately not part of any default-
/// table category above: adding a name here has no effect on policy,
/// only on `name_of`/`number_of` lookups.
#[cfg(target_arch = "x86_64")]
fn extra_named_for_lookup() -> &'static [(&'static str, i64)] {
    syscall_names!(
        SYS_sysinfo, SYS_socket, SYS_connect, SYS_bind, SYS_listen, SYS_accept,
        SYS_sendto, SYS_recvfrom, SYS_chmod, SYS_chown, SYS_rename,
        SYS_mkdir, SYS_rmdir, SYS_symlink, SYS_link, SYS_statfs,
    )
}

#[cfg(target_arch = "x86")]
fn extra_named_for_lookup() -> &'static [(&'static str, i64)] {
    syscall_names!(
        SYS_sysinfo, SYS_chmod, SYS_chown, SYS_rename,
        SYS_mkdir, SYS_rmdir, SYS_symlink, SYS_link, SYS_statfs,
    )
}

/// Builds the complete reverse lookup table (name -> number and number ->
/// name) across every syscall this crate knows a name for.
fn all_named() -> Vec<(&'static str, i64)> {
    let mut v = Vec::new();
    v.extend_from_slice(allow_if_filename_names());
    v.extend_from_slice(always_allow_names());
    v.extend_from_slice(liberal_names());
    v.extend_from_slice(liberal_no_return_names());
    v.extend_from_slice(exit_names());
    v.extend_from_slice(fork_family_names());
    v.extend_from_slice(times_names());
    v.extend_from_slice(extra_named_for_lookup());
    v.push(("execve", execve_number()));
    v.push(("kill", kill_number()));
    v.push(("tgkill", tgkill_number()));
    v
}

/// Resolves a syscall number to its name, or `#<n>` if unknown (spec.md
/// §6's `syscall_name` fallback).
pub fn name_of(sys: i64) -> String {
    all_named()
        .into_iter()
        .find(|(_, n)| *n == sys)
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| format!("#{}", sys))
}

/// Resolves a name (or `#<n>` numeric literal) to a syscall number, for
/// `-s NAME` CLI parsing (spec.md §6).
pub fn number_of(name: &str) -> Option<i64> {
    if let Some(stripped) = name.strip_prefix('#') {
        return stripped.parse().ok();
    }
    if let Ok(n) = name.parse::<i64>() {
        return Some(n);
    }
    all_named()
        .into_iter()
        .find(|(n, _)| *n == name)
        .map(|(_, num)| num)
}

/// Builds the default whitelist described in spec.md §4.1 and box.c's
/// `syscall_action[]` initializer.
pub fn default_table() -> SyscallTable {
    let mut t = SyscallTable::new();
    for (_, n) in allow_if_filename_names() {
        t.set(*n, SyscallAction::allow_if_filename());
    }
    for (_, n) in always_allow_names() {
        t.set(*n, SyscallAction::allow());
    }
    for (_, n) in exit_names() {
        t.set(*n, SyscallAction::allow().with(ActionFlags::SAMPLE_MEM));
    }
    for (_, n) in liberal_names() {
        t.set(*n, SyscallAction::allow().with(ActionFlags::LIBERAL));
    }
    for (_, n) in liberal_no_return_names() {
        t.set(*n, SyscallAction::allow().with(ActionFlags::LIBERAL | ActionFlags::NO_RETURN));
    }
    t
}
