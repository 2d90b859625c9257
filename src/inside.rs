//! The traced child's pre-exec bootstrap (spec.md §4.9). Runs after
//! `fork`, entirely inside the child; every failure here is fatal and
//! must still be reported through the meta mechanism by the caller.
//! Grounded on box.c's `box_inside`.

use crate::env_policy::{self, EnvRule};
use crate::error::{Result, SandboxError};
use nix::fcntl::OFlag;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::stat::Mode;
use nix::unistd;
use std::ffi::CString;

/// Requested fd 0/1/2 redirections (spec.md §6's `-i`/`-o`/`-r`).
#[derive(Clone, Debug, Default)]
pub struct Redirects {
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// Everything the child needs to bootstrap itself before `execve`.
pub struct InsideConfig {
    pub chdir: Option<String>,
    pub redirects: Redirects,
    pub memory_limit_kb: Option<u64>,
    pub stack_limit_kb: Option<u64>,
    pub pass_environ: bool,
    pub env_rules: Vec<EnvRule>,
    pub filtering_enabled: bool,
    pub argv: Vec<String>,
}

/// `NOFILE` is fixed at 64 regardless of policy, matching box.c's
/// hard-coded `setrlimit(RLIMIT_NOFILE, ...)` call.
const NOFILE_LIMIT: u64 = 64;

/// Runs the bootstrap and `execve`s into the target. Never returns on
/// success; on failure, returns so the caller can report it (the
/// process still has its pipes/fds, just not yet the trace relationship
/// or resource limits it asked for).
pub fn run(cfg: &InsideConfig) -> Result<()> {
    if let Some(dir) = &cfg.chdir {
        unistd::chdir(dir.as_str())
            .map_err(|e| SandboxError::xx(format!("chdir('{}') failed: {}", dir, e)))?;
    }

    redirect_stdio(&cfg.redirects)?;

    unistd::setpgid(unistd::Pid::from_raw(0), unistd::Pid::from_raw(0))
        .map_err(|e| SandboxError::xx(format!("setpgid failed: {}", e)))?;

    apply_resource_limits(cfg)?;

    let parent_env = env_policy::current_environment();
    let env = env_policy::build_environment(&parent_env, cfg.pass_environ, &cfg.env_rules);

    if cfg.filtering_enabled {
        nix::sys::ptrace::traceme()
            .map_err(|e| SandboxError::xx(format!("PTRACE_TRACEME failed: {}", e)))?;
        nix::sys::signal::raise(nix::sys::signal::Signal::SIGSTOP)
            .map_err(|e| SandboxError::xx(format!("raise(SIGSTOP) failed: {}", e)))?;
    }

    exec(cfg, &env)
}

fn redirect_stdio(redirects: &Redirects) -> Result<()> {
    if let Some(path) = &redirects.stdin {
        reopen_fd(0, path, OFlag::O_RDONLY, Mode::empty())?;
    }
    if let Some(path) = &redirects.stdout {
        reopen_fd(
            1,
            path,
            OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
            Mode::from_bits_truncate(0o666),
        )?;
    }
    match &redirects.stderr {
        Some(path) => reopen_fd(
            2,
            path,
            OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
            Mode::from_bits_truncate(0o666),
        )?,
        None => {
            // No explicit stderr target: duplicate whatever stdout now is.
            unistd::dup2(1, 2)
                .map_err(|e| SandboxError::xx(format!("dup2(1, 2) failed: {}", e)))?;
        }
    }
    Ok(())
}

/// Closes `fd`, opens `path` with `flags`/`mode`, and lands the new
/// descriptor back on `fd` — box.c always closes first so the open is
/// guaranteed to reuse the same number rather than relying on it
/// happening to be the lowest free one.
fn reopen_fd(fd: i32, path: &str, flags: OFlag, mode: Mode) -> Result<()> {
    let _ = unistd::close(fd);
    let opened = nix::fcntl::open(path, flags, mode)
        .map_err(|e| SandboxError::xx(format!("open('{}') failed: {}", path, e)))?;
    if opened != fd {
        unistd::dup2(opened, fd)
            .map_err(|e| SandboxError::xx(format!("dup2 onto fd {} failed: {}", fd, e)))?;
        let _ = unistd::close(opened);
    }
    Ok(())
}

fn apply_resource_limits(cfg: &InsideConfig) -> Result<()> {
    if let Some(kb) = cfg.memory_limit_kb {
        let bytes = kb * 1024;
        setrlimit(Resource::RLIMIT_AS, bytes, bytes)
            .map_err(|e| SandboxError::xx(format!("setrlimit(RLIMIT_AS) failed: {}", e)))?;
    }

    let stack_bytes = cfg.stack_limit_kb.map(|kb| kb * 1024).unwrap_or(libc::RLIM_INFINITY);
    setrlimit(Resource::RLIMIT_STACK, stack_bytes, stack_bytes)
        .map_err(|e| SandboxError::xx(format!("setrlimit(RLIMIT_STACK) failed: {}", e)))?;

    setrlimit(Resource::RLIMIT_NOFILE, NOFILE_LIMIT, NOFILE_LIMIT)
        .map_err(|e| SandboxError::xx(format!("setrlimit(RLIMIT_NOFILE) failed: {}", e)))?;

    Ok(())
}

fn exec(cfg: &InsideConfig, env: &[String]) -> Result<()> {
    let argv: Vec<CString> = cfg
        .argv
        .iter()
        .map(|a| CString::new(a.as_str()).expect("argv entry contains a NUL byte"))
        .collect();
    let envp: Vec<CString> = env
        .iter()
        .map(|e| CString::new(e.as_str()).expect("env entry contains a NUL byte"))
        .collect();

    let program = argv
        .first()
        .ok_or_else(|| SandboxError::xx("no target program given"))?;

    let err = unistd::execvpe(program, &argv, &envp).unwrap_err();
    Err(SandboxError::xx(format!(
        "execve('{}') failed: {}",
        cfg.argv[0], err
    )))
}
