//! Command-line interface (spec.md §6). Grounded on box.c's `getopt`
//! switch in `main`, translated into a `structopt`-derived struct per
//! the teacher's own CLI idiom (`rd`'s `RdOptions`), with typed rule
//! values replacing box.c's `set_path_action`/`set_syscall_action`/
//! `set_env_action` stringly-typed parsers (SPEC_FULL.md §1).

use crate::env_policy::EnvRule;
use crate::path_policy::{PathAction, PathRule};
use crate::syscall_table::{self, Primary, SyscallAction};
use structopt::StructOpt;

/// A `-s NAME` / `-s NAME=yes|no|file` rule, applied against the
/// syscall table after the default whitelist is built.
#[derive(Clone, Debug)]
pub struct SyscallRuleSpec {
    pub number: i64,
    pub action: SyscallAction,
}

fn parse_env_rule(s: &str) -> std::result::Result<EnvRule, String> {
    match s.split_once('=') {
        Some((var, val)) => {
            if var.is_empty() {
                return Err(format!("invalid -E rule `{}': empty variable name", s));
            }
            if val.is_empty() {
                Ok(EnvRule::unset(var))
            } else {
                Ok(EnvRule::set(var, val))
            }
        }
        None => Ok(EnvRule::inherit(s)),
    }
}

fn parse_path_rule(s: &str) -> std::result::Result<PathRule, String> {
    match s.split_once('=') {
        Some((path, "yes")) => Ok(PathRule::new(path, PathAction::Allow)),
        Some((path, "no")) => Ok(PathRule::new(path, PathAction::Deny)),
        Some((_, other)) => Err(format!("invalid -p action `{}': expected yes/no", other)),
        None => Ok(PathRule::new(s, PathAction::Allow)),
    }
}

fn parse_syscall_rule(s: &str) -> std::result::Result<SyscallRuleSpec, String> {
    let (name, action_str) = s.split_once('=').unwrap_or((s, "yes"));
    let action = match action_str {
        "yes" => SyscallAction::allow(),
        "no" => SyscallAction::deny(),
        "file" => SyscallAction::allow_if_filename(),
        other => return Err(format!("invalid -s action `{}': expected yes/no/file", other)),
    };
    let number = syscall_table::number_of(name)
        .ok_or_else(|| format!("unknown syscall `{}'", name))?;
    Ok(SyscallRuleSpec { number, action })
}

/// `box [options] -- <command> <args...>` (spec.md §6).
#[derive(Debug, StructOpt)]
#[structopt(
    name = "box",
    about = "Single-process syscall-filtering sandbox for grading untrusted programs"
)]
pub struct Options {
    /// File access level: 0/1/2/3/4/9 (spec.md §4.4).
    #[structopt(short = "a", default_value = "0")]
    pub file_access: u8,

    /// chdir into this directory before exec.
    #[structopt(short = "c")]
    pub chdir: Option<String>,

    /// Inherit the full parent environment as the base before rules apply.
    #[structopt(short = "e")]
    pub pass_environ: bool,

    /// Add an environment rule: `VAR` (inherit), `VAR=` (unset), `VAR=VAL` (set).
    #[structopt(short = "E", number_of_values = 1, parse(try_from_str = parse_env_rule))]
    pub env_rules: Vec<EnvRule>,

    /// Enable the syscall filter; repeat for strict (level 2) filtering.
    #[structopt(short = "f", parse(from_occurrences))]
    pub filter: u8,

    /// Whitelist `fork`/`vfork`/`clone`/`wait4` (children are not traced).
    #[structopt(short = "F")]
    pub fork_family: bool,

    /// Redirect the tracee's stdin from this file.
    #[structopt(short = "i")]
    pub redir_stdin: Option<String>,

    /// Redirect the tracee's stdout to this file.
    #[structopt(short = "o")]
    pub redir_stdout: Option<String>,

    /// Redirect the tracee's stderr to this file (default: duplicate stdout).
    #[structopt(short = "r")]
    pub redir_stderr: Option<String>,

    /// Stack size limit in KB (0 = unlimited).
    #[structopt(short = "k")]
    pub stack_limit_kb: Option<u64>,

    /// Address-space limit in KB.
    #[structopt(short = "m")]
    pub memory_limit_kb: Option<u64>,

    /// Meta report file (`-` for standard output).
    #[structopt(short = "M")]
    pub meta_file: Option<String>,

    /// Add a path rule: `PATH` (allow), `PATH=yes`, or `PATH=no`.
    #[structopt(short = "p", number_of_values = 1, parse(try_from_str = parse_path_rule))]
    pub path_rules: Vec<PathRule>,

    /// Add a syscall rule: `NAME` (allow), `NAME=yes|no|file`, or `#NUM=...`.
    #[structopt(short = "s", number_of_values = 1, parse(try_from_str = parse_syscall_rule))]
    pub syscall_rules: Vec<SyscallRuleSpec>,

    /// CPU time limit in seconds (fractions allowed).
    #[structopt(short = "t")]
    pub timeout_sec: Option<f64>,

    /// Whitelist `times` (used for measuring run time).
    #[structopt(short = "T")]
    pub times_allowed: bool,

    /// Be verbose; repeat for more verbosity.
    #[structopt(short = "v", parse(from_occurrences))]
    pub verbose: u8,

    /// Wall-clock time limit in seconds (fractions allowed).
    #[structopt(short = "w")]
    pub wall_timeout_sec: Option<f64>,

    /// Extra CPU time grace period before a timing-out program is killed.
    #[structopt(short = "x")]
    pub extra_timeout_sec: Option<f64>,

    /// The target program and its arguments, after `--`.
    #[structopt(last = true, required = true)]
    pub command: Vec<String>,
}

impl Options {
    /// Filter level: 0 = off, 1 = liberal (one `-f`), 2 = strict (two or
    /// more), matching box.c's `filter_syscalls++` semantics.
    pub fn filter_level(&self) -> syscall_table::FilterLevel {
        syscall_table::FilterLevel(self.filter.min(2))
    }

    pub fn filtering_enabled(&self) -> bool {
        self.filter > 0
    }

    fn seconds_to_ms(sec: Option<f64>) -> Option<u64> {
        sec.map(|s| (s * 1000.0).round() as u64)
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        Self::seconds_to_ms(self.timeout_sec)
    }

    pub fn wall_timeout_ms(&self) -> Option<u64> {
        Self::seconds_to_ms(self.wall_timeout_sec)
    }

    pub fn extra_timeout_ms(&self) -> Option<u64> {
        Self::seconds_to_ms(self.extra_timeout_sec)
    }
}

/// Builds the syscall table: start from the architecture default
/// whitelist, then apply CLI overrides in declaration order so later
/// `-s` flags win, matching box.c's `syscall_action[sys] = act`
/// last-write-wins assignment.
pub fn build_syscall_table(opts: &Options) -> syscall_table::SyscallTable {
    let mut table = syscall_table::default_table();
    for rule in &opts.syscall_rules {
        table.set(rule.number, rule.action);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_level_caps_at_two() {
        let opts = parse_for_test(&["box", "-f", "-f", "-f", "--", "/bin/true"]);
        assert_eq!(opts.filter_level(), syscall_table::FilterLevel(2));
    }

    #[test]
    fn single_f_is_liberal_level_one() {
        let opts = parse_for_test(&["box", "-f", "--", "/bin/true"]);
        assert_eq!(opts.filter_level(), syscall_table::FilterLevel(1));
    }

    #[test]
    fn no_f_disables_filtering() {
        let opts = parse_for_test(&["box", "--", "/bin/true"]);
        assert!(!opts.filtering_enabled());
    }

    #[test]
    fn timeout_seconds_convert_to_milliseconds() {
        let opts = parse_for_test(&["box", "-t", "1.5", "--", "/bin/true"]);
        assert_eq!(opts.timeout_ms(), Some(1500));
    }

    #[test]
    fn env_rule_without_equals_inherits() {
        let opts = parse_for_test(&["box", "-E", "HOME", "--", "/bin/true"]);
        assert_eq!(opts.env_rules[0].var, "HOME");
        assert_eq!(opts.env_rules[0].val, None);
    }

    #[test]
    fn env_rule_with_empty_value_unsets() {
        let opts = parse_for_test(&["box", "-E", "PATH=", "--", "/bin/true"]);
        assert_eq!(opts.env_rules[0].val, Some(String::new()));
    }

    #[test]
    fn path_rule_bare_path_defaults_to_allow() {
        let opts = parse_for_test(&["box", "-p", "/tmp/ok", "--", "/bin/true"]);
        assert_eq!(opts.path_rules[0].action, PathAction::Allow);
    }

    #[test]
    fn path_rule_explicit_no() {
        let opts = parse_for_test(&["box", "-p", "/tmp/bad=no", "--", "/bin/true"]);
        assert_eq!(opts.path_rules[0].action, PathAction::Deny);
    }

    #[test]
    fn syscall_rule_by_name_allow() {
        let opts = parse_for_test(&["box", "-s", "sysinfo=yes", "--", "/bin/true"]);
        assert_eq!(opts.syscall_rules[0].action.primary, Primary::Allow);
    }

    #[test]
    fn syscall_rule_numeric_override() {
        let opts = parse_for_test(&["box", "-s", "#9999=no", "--", "/bin/true"]);
        assert_eq!(opts.syscall_rules[0].number, 9999);
        assert_eq!(opts.syscall_rules[0].action.primary, Primary::Deny);
    }

    #[test]
    fn cli_overrides_win_over_the_default_table() {
        let opts = parse_for_test(&["box", "-s", "sysinfo=yes", "--", "/bin/true"]);
        let table = build_syscall_table(&opts);
        let n = syscall_table::number_of("sysinfo").unwrap();
        assert_eq!(table.get(n).primary, Primary::Allow);
    }

    fn parse_for_test(args: &[&str]) -> Options {
        Options::from_iter_safe(args).unwrap()
    }
}
