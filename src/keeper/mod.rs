//! The trace-event state machine (spec.md §4.8). Grounded on box.c's
//! `boxkeeper`, translated from its single giant `switch` into a loop
//! over `nix::sys::wait::WaitStatus`'s variants.

pub mod decide;
pub mod state;

use crate::arch;
use crate::error::{Result, SandboxError};
use crate::mem_reader::MemReader;
use crate::meta::{self, MetaWriter};
use crate::path_policy::PathRule;
use crate::registers::Registers;
use crate::syscall_table::{self, FilterLevel, SyscallTable};
use decide::{EntryDecision, FilenameDecision};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use state::KeeperState;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set by `on_alarm`; the handler itself must do nothing but flip this
/// (spec.md §5's concurrency model — the only asynchronous event inside
/// the keeper).
static TIMER_TICK: AtomicBool = AtomicBool::new(false);

/// Set by `on_interrupt`, the keeper's own `SIGINT` handler (spec.md §5,
/// §9: async-signal-safe, records the reason and nothing else; the main
/// loop notices it at the top of the next iteration).
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_alarm(_signum: libc::c_int) {
    TIMER_TICK.store(true, Ordering::SeqCst);
}

extern "C" fn on_interrupt(_signum: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

pub struct KeeperConfig {
    pub syscall_table: SyscallTable,
    pub path_rules: Vec<PathRule>,
    pub access_level: u8,
    pub filter_level: FilterLevel,
    pub fork_family: bool,
    pub times_allowed: bool,
    pub timeout_ms: Option<u64>,
    pub wall_timeout_ms: Option<u64>,
    pub extra_timeout_ms: Option<u64>,
    pub verbose: u8,
    /// The host kernel's actual bitness, for §4.6 mode detection.
    pub kernel_is_amd64: bool,
}

/// Runs the keeper loop to completion and returns the sandbox's own exit
/// code (spec.md §6: `0` OK, `1` target violation/failure, `2` sandbox
/// failure). Emits the meta report along the way and, on a clean run,
/// the human-readable `OK (...)` summary to standard error.
pub fn run(child_pid: Pid, cfg: KeeperConfig, mut meta: MetaWriter) -> i32 {
    let mut state = KeeperState::new(child_pid);
    let result = run_inner(child_pid, &cfg, &mut state);

    // Final stats are written exactly once, success or failure, matching
    // box.c's `final_stats` running unconditionally on the way out.
    meta.time(state.cpu_ms().unwrap_or(0), state.wall_ms());
    meta.mem_bytes(state.mem_peak_kb);

    match result {
        Ok(()) => {
            let summary = meta::summary_line(
                state.cpu_ms().unwrap_or(0),
                state.wall_ms(),
                state.mem_peak_kb,
                state.syscall_count,
            );
            eprintln!("{}", summary);
            0
        }
        Err(e) => {
            log::error!("{}: {}", e.code, e.message);
            meta.status(e.code);
            meta.message(&e.message);
            if let Some(sig) = e.exitsig {
                meta.exitsig(sig);
            }
            if let Some(code) = e.exitcode {
                meta.exitcode(code);
            }
            if e.killed {
                meta.killed();
            }
            eprintln!("{}", e.message);
            e.code.exit_code()
        }
    }
}

fn run_inner(child_pid: Pid, cfg: &KeeperConfig, state: &mut KeeperState) -> Result<()> {
    // SIGINT is always fatal to the sandbox, timeouts or not (spec.md §9).
    unsafe {
        nix::sys::signal::signal(Signal::SIGINT, nix::sys::signal::SigHandler::Handler(on_interrupt))
            .map_err(|e| SandboxError::xx(format!("failed to install SIGINT handler: {}", e)))?;
    }

    let any_timeout = cfg.timeout_ms.is_some() || cfg.wall_timeout_ms.is_some();
    if any_timeout {
        unsafe {
            nix::sys::signal::signal(
                Signal::SIGALRM,
                nix::sys::signal::SigHandler::Handler(on_alarm),
            )
            .map_err(|e| SandboxError::xx(format!("failed to install SIGALRM handler: {}", e)))?;
        }
        nix::unistd::alarm::set(1);
        log::info!("timer armed: cpu={:?}ms wall={:?}ms", cfg.timeout_ms, cfg.wall_timeout_ms);
    }

    // Initial wait: the child's post-raise(SIGSTOP) handshake stop.
    wait_for_initial_stop(child_pid)?;
    ptrace::setoptions(child_pid, ptrace::Options::PTRACE_O_TRACESYSGOOD)
        .map_err(|e| SandboxError::xx(format!("PTRACE_SETOPTIONS failed: {}", e)))?;
    state.is_traced = true;
    resume(child_pid, None)?;

    loop {
        if INTERRUPTED.swap(false, Ordering::SeqCst) {
            return Err(fail(
                child_pid,
                SandboxError::sg("Interrupted").with_exitsig(Signal::SIGINT as i32),
            ));
        }

        if TIMER_TICK.swap(false, Ordering::SeqCst) {
            check_timeouts(state, cfg).map_err(|e| fail(child_pid, e))?;
            if any_timeout {
                nix::unistd::alarm::set(1);
            }
        }

        let status = wait_retrying(child_pid)?;

        match status {
            WaitStatus::Exited(_, code) => {
                return handle_exit(state, cfg, code);
            }
            WaitStatus::Signaled(_, sig, _) => {
                let _ = state.sample_mem();
                let message = if state.syscall_count == 0 {
                    format!("Terminated by signal {} during startup", sig as i32)
                } else {
                    format!("Terminated by signal {}", sig as i32)
                };
                return Err(SandboxError::sg(message).with_exitsig(sig as i32));
            }
            WaitStatus::PtraceSyscall(_) => {
                handle_syscall_stop(child_pid, state, cfg)
                    .map_err(|e| fail(child_pid, e))?;
                resume(child_pid, None).map_err(|e| fail(child_pid, e))?;
            }
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                // With no PTRACE_O_TRACEEXEC requested, a successful
                // execve() in the tracee delivers one ordinary (non-0x80)
                // SIGTRAP with no further warning; only a later one is a
                // real breakpoint trap (box.c's `stop_count`).
                if state.bump_plain_trap() {
                    log::info!("post-exec SIGTRAP caught, resuming");
                    resume(child_pid, None).map_err(|e| fail(child_pid, e))?;
                } else {
                    return Err(fail(child_pid, SandboxError::sg("Breakpoint")));
                }
            }
            WaitStatus::Stopped(_, Signal::SIGSTOP) => {
                resume(child_pid, None).map_err(|e| fail(child_pid, e))?;
            }
            WaitStatus::Stopped(_, sig @ Signal::SIGXCPU) | WaitStatus::Stopped(_, sig @ Signal::SIGXFSZ) => {
                let _ = state.sample_mem();
                return Err(fail(
                    child_pid,
                    SandboxError::sg(format!("Terminated by signal {}", sig as i32)).with_exitsig(sig as i32),
                ));
            }
            WaitStatus::Stopped(_, sig) => {
                let _ = state.sample_mem();
                resume(child_pid, Some(sig)).map_err(|e| fail(child_pid, e))?;
            }
            WaitStatus::PtraceEvent(..) | WaitStatus::Continued(_) | WaitStatus::StillAlive => {
                resume(child_pid, None).map_err(|e| fail(child_pid, e))?;
            }
        }
    }
}

fn wait_for_initial_stop(pid: Pid) -> Result<()> {
    match wait_retrying(pid)? {
        WaitStatus::Stopped(_, Signal::SIGSTOP) => Ok(()),
        other => Err(SandboxError::xx(format!(
            "expected initial SIGSTOP handshake, got {:?}",
            other
        ))),
    }
}

fn wait_retrying(pid: Pid) -> Result<WaitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => return Ok(status),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(SandboxError::xx(format!("wait4 failed: {}", e))),
        }
    }
}

fn resume(pid: Pid, forward: Option<Signal>) -> Result<()> {
    ptrace::syscall(pid, forward)
        .map_err(|e| SandboxError::xx(format!("PTRACE_SYSCALL failed: {}", e)))
}

fn handle_syscall_stop(pid: Pid, state: &mut KeeperState, cfg: &KeeperConfig) -> Result<()> {
    let is_entry = state.bump_tick();
    let regs = Registers::from_ptrace(pid)?;
    let sys = regs.syscallno();

    if is_entry {
        handle_entry(pid, state, cfg, regs, sys)
    } else {
        handle_exit_stop(state, sys, regs.syscall_result())
    }
}

fn handle_entry(
    pid: Pid,
    state: &mut KeeperState,
    cfg: &KeeperConfig,
    mut regs: Registers,
    sys: i64,
) -> Result<()> {
    state.last_sys = Some(sys);

    if !state.exec_seen {
        if sys == syscall_table::execve_number() {
            state.exec_seen = true;
            log::info!("target execve observed, filtering now active");
        }
        state.last_action = None;
        return Ok(());
    }

    if let Err(e) = arch::detect_mode(pid, &regs, cfg.kernel_is_amd64) {
        return deny_and_kill(pid, &mut regs, e);
    }

    log::debug!("syscall entry: {} ({})", syscall_table::name_of(sys), sys);

    let decision = decide::classify_entry(
        sys,
        &cfg.syscall_table,
        cfg.filter_level,
        cfg.fork_family,
        cfg.times_allowed,
        pid.as_raw(),
        regs.arg(1),
        regs.arg(2),
        regs.arg(3),
    );

    match decision {
        EntryDecision::Allow(action) => {
            state.record_entry(sys, action);
            if action.flags.contains(syscall_table::ActionFlags::SAMPLE_MEM) {
                state.sample_mem()?;
            }
            Ok(())
        }
        EntryDecision::NeedsFilename(action) => {
            let (decision, raw) = match decide::quick_decision(cfg.access_level) {
                Some(d) => (d, String::new()),
                None => {
                    let raw = regs_filename(pid, &regs)?;
                    let d = decide::decide_filename(&raw, cfg.access_level, &cfg.path_rules);
                    (d, raw)
                }
            };
            match decision {
                FilenameDecision::Allow => {
                    state.record_entry(sys, action);
                    Ok(())
                }
                FilenameDecision::Deny => deny_and_kill(
                    pid,
                    &mut regs,
                    SandboxError::fa(format!("Forbidden access to file {}", raw)),
                ),
            }
        }
        EntryDecision::SelfKill(sig) => {
            regs.deny();
            let _ = regs.apply(pid);
            let _ = terminate_child(pid);
            Err(SandboxError::sg(format!("Committed suicide by signal {}", sig))
                .with_exitsig(sig)
                .with_killed())
        }
        EntryDecision::Deny(message) => deny_and_kill(pid, &mut regs, SandboxError::fo(message)),
    }
}

/// Reads the filename argument out of the tracee's memory for an
/// `ALLOW_IF_FILENAME` syscall (spec.md §4.4 step 3). File-access level
/// 0 and 9 short-circuit before this is ever called (see `handle_entry`).
fn regs_filename(pid: Pid, regs: &Registers) -> Result<String> {
    let mut mem = MemReader::open(pid)?;
    mem.read_cstring(regs.arg(1))
}

fn handle_exit_stop(state: &mut KeeperState, sys: i64, result: i64) -> Result<()> {
    let no_return = state
        .last_action
        .map(|a| a.flags.contains(syscall_table::ActionFlags::NO_RETURN))
        .unwrap_or(false);

    if !no_return && state.last_sys != Some(sys) {
        return Err(SandboxError::xx("Mismatched syscall entry/exit"));
    }
    log::debug!("syscall exit: {} -> {}", syscall_table::name_of(sys), result);
    Ok(())
}

/// Rewrites the syscall number to the denial sentinel before killing the
/// child (spec.md §4.7): even if the kill path is slow, the call that
/// could execute is already harmless.
fn deny_and_kill(pid: Pid, regs: &mut Registers, err: SandboxError) -> Result<()> {
    regs.deny();
    let _ = regs.apply(pid);
    let _ = terminate_child(pid);
    Err(err.with_killed())
}

fn fail(pid: Pid, err: SandboxError) -> SandboxError {
    let _ = terminate_child(pid);
    err.with_killed()
}

/// Cancellation path (spec.md §5): trace-kill, process-group kill,
/// direct kill, then a blocking reap retrying on `EINTR`.
fn terminate_child(pid: Pid) -> Result<()> {
    // PTRACE_KILL is deprecated by the kernel in favour of a plain
    // SIGKILL, but box.c issues it first regardless, so this does too;
    // nix doesn't wrap it, so it goes through libc directly.
    unsafe {
        libc::ptrace(libc::PTRACE_KILL, pid.as_raw(), 0, 0);
    }
    let _ = nix::sys::signal::kill(Pid::from_raw(-pid.as_raw()), Signal::SIGKILL);
    let _ = nix::sys::signal::kill(pid, Signal::SIGKILL);
    loop {
        match waitpid(pid, None) {
            Ok(_) => return Ok(()),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => return Ok(()),
        }
    }
}

fn check_timeouts(state: &KeeperState, cfg: &KeeperConfig) -> Result<()> {
    if let Some(w) = cfg.wall_timeout_ms {
        if w > 0 && state.wall_ms() > w {
            return Err(SandboxError::to("Time limit exceeded (wall clock)"));
        }
    }
    if let Some(t) = cfg.timeout_ms {
        if t > 0 {
            let cpu = state.cpu_ms()?;
            if cpu > t {
                match cfg.extra_timeout_ms {
                    Some(extra) if extra > 0 => {
                        if cpu > extra {
                            return Err(SandboxError::to("Time limit exceeded"));
                        }
                    }
                    _ => return Err(SandboxError::to("Time limit exceeded")),
                }
            }
        }
    }
    Ok(())
}

fn handle_exit(state: &mut KeeperState, cfg: &KeeperConfig, exit_code: i32) -> Result<()> {
    let _ = state.sample_mem();
    let total_ms = state.cpu_ms().unwrap_or(0);
    let wall_ms = state.wall_ms();

    let over_cpu = cfg.timeout_ms.map(|t| t > 0 && total_ms > t).unwrap_or(false);
    let over_wall = cfg.wall_timeout_ms.map(|w| w > 0 && wall_ms > w).unwrap_or(false);

    if over_cpu || over_wall {
        return Err(SandboxError::to("Time limit exceeded"));
    }

    if exit_code != 0 {
        let message = format!("Exited with error status {}", exit_code);
        return Err(SandboxError::re(message).with_exitcode(exit_code));
    }

    Ok(())
}
