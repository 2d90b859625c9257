//! Driver: parses options, forks, and dispatches to the inside
//! bootstrap or the keeper loop (spec.md §6, §2). Grounded on box.c's
//! `main`.

use boxsandbox::cli::{self, Options};
use boxsandbox::inside::{self, InsideConfig, Redirects};
use boxsandbox::keeper::{self, KeeperConfig};
use boxsandbox::meta::MetaWriter;
use boxsandbox::{arch, error::SandboxError};
use nix::unistd::{ForkResult, Pid};
use structopt::StructOpt;

fn main() {
    let opts = Options::from_args();

    let log_level = match opts.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    std::process::exit(run(opts));
}

/// Runs the whole program and returns the sandbox's own exit code
/// (spec.md §6: `0` OK, `1` target violation/failure, `2` sandbox
/// failure), matching box.c's `main` return-value convention.
fn run(opts: Options) -> i32 {
    let kernel_is_amd64 = match arch::check_kernel_matches_build() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{}", e.message);
            return e.code.exit_code();
        }
    };

    let meta = match &opts.meta_file {
        Some(path) => match MetaWriter::open(path) {
            Ok(m) => m,
            Err(e) => {
                eprintln!("{}", e.message);
                return e.code.exit_code();
            }
        },
        None => MetaWriter::none(),
    };

    // box.c does `setreuid(euid, euid)` before forking to drop any
    // leftover real-uid privilege once the setuid bit (if any) has
    // granted the effective uid this process runs under.
    let euid = nix::unistd::geteuid();
    if let Err(e) = nix::unistd::setreuid(euid, euid) {
        eprintln!("setreuid failed: {}", e);
        return SandboxError::xx("setreuid failed").code.exit_code();
    }

    let inside_cfg = build_inside_config(&opts);
    let keeper_cfg = build_keeper_config(&opts, kernel_is_amd64);

    match unsafe { nix::unistd::fork() } {
        Ok(ForkResult::Parent { child, .. }) => run_parent(child, keeper_cfg, meta),
        Ok(ForkResult::Child) => run_child(inside_cfg, meta),
        Err(e) => {
            eprintln!("fork failed: {}", e);
            2
        }
    }
}

fn run_parent(child: Pid, cfg: KeeperConfig, meta: MetaWriter) -> i32 {
    keeper::run(child, cfg, meta)
}

/// Never returns on success (the process becomes the target via
/// `execve`); on bootstrap failure, reports through the same meta
/// mechanism the keeper uses and exits with the sandbox-failure code.
fn run_child(cfg: InsideConfig, mut meta: MetaWriter) -> ! {
    let err = inside::run(&cfg).unwrap_err();
    meta.status(err.code);
    meta.message(&err.message);
    eprintln!("{}", err.message);
    std::process::exit(err.code.exit_code());
}

fn build_inside_config(opts: &Options) -> InsideConfig {
    InsideConfig {
        chdir: opts.chdir.clone(),
        redirects: Redirects {
            stdin: opts.redir_stdin.clone(),
            stdout: opts.redir_stdout.clone(),
            stderr: opts.redir_stderr.clone(),
        },
        memory_limit_kb: opts.memory_limit_kb,
        stack_limit_kb: opts.stack_limit_kb,
        pass_environ: opts.pass_environ,
        env_rules: opts.env_rules.clone(),
        filtering_enabled: opts.filtering_enabled(),
        argv: opts.command.clone(),
    }
}

fn build_keeper_config(opts: &Options, kernel_is_amd64: bool) -> KeeperConfig {
    KeeperConfig {
        syscall_table: cli::build_syscall_table(opts),
        path_rules: opts.path_rules.clone(),
        access_level: opts.file_access,
        filter_level: opts.filter_level(),
        fork_family: opts.fork_family,
        times_allowed: opts.times_allowed,
        timeout_ms: opts.timeout_ms(),
        wall_timeout_ms: opts.wall_timeout_ms(),
        extra_timeout_ms: opts.extra_timeout_ms(),
        verbose: opts.verbose,
        kernel_is_amd64,
    }
}
