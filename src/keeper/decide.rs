//! Pure decision logic for syscall-entry classification (spec.md §4.1,
//! §4.4) and filename validation. Kept free of I/O so it can be unit
//! tested directly, matching how §4.1–§4.3 are described as pure
//! functions (SPEC_FULL.md §4).

use crate::path_policy::{self, PathAction, PathRule};
use crate::syscall_table::{self, FilterLevel, Primary, SyscallAction, SyscallTable};

#[derive(Debug)]
pub enum EntryDecision {
    Allow(SyscallAction),
    /// Allowed, but the filename at `arg1` still needs to be fetched and
    /// validated before the syscall may proceed.
    NeedsFilename(SyscallAction),
    /// `kill`/`tgkill` targeting the traced pid itself: the target
    /// deliberately ended itself with a signal (spec.md §7 `SG`,
    /// SPEC_FULL.md §9's box.c `valid_syscall` default case).
    SelfKill(i32),
    Deny(String),
}

/// Classifies a syscall-entry stop (spec.md §4.8's "Entry" branch,
/// calling into §4.1). `fork_family`/`times_allowed` are the `-F`/`-T`
/// CLI overrides (spec.md §6), consulted before the general table since
/// they whitelist syscalls the default table leaves at `DEFAULT`.
/// `child_pid`/`arg1..arg3` let a syscall otherwise bound for denial be
/// recognised as a self-kill instead (spec.md §7, §8 scenario 6).
#[allow(clippy::too_many_arguments)]
pub fn classify_entry(
    sys: i64,
    table: &SyscallTable,
    filter_level: FilterLevel,
    fork_family: bool,
    times_allowed: bool,
    child_pid: i32,
    arg1: u64,
    arg2: u64,
    arg3: u64,
) -> EntryDecision {
    if fork_family && syscall_table::fork_family_names().iter().any(|(_, n)| *n == sys) {
        return EntryDecision::Allow(SyscallAction::allow());
    }
    if times_allowed && syscall_table::times_names().iter().any(|(_, n)| *n == sys) {
        return EntryDecision::Allow(SyscallAction::allow());
    }

    let action = table.effective(sys, filter_level);
    match action.primary {
        Primary::Allow => EntryDecision::Allow(action),
        Primary::AllowIfFilename => EntryDecision::NeedsFilename(action),
        Primary::Deny | Primary::Default => {
            if sys == syscall_table::kill_number() && arg1 as i32 == child_pid {
                return EntryDecision::SelfKill(arg2 as i32);
            }
            if sys == syscall_table::tgkill_number()
                && arg1 as i32 == child_pid
                && arg2 as i32 == child_pid
            {
                return EntryDecision::SelfKill(arg3 as i32);
            }
            EntryDecision::Deny(format!("Forbidden syscall {}", syscall_table::name_of(sys)))
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FilenameDecision {
    Allow,
    Deny,
}

/// Short-circuits on file-access levels 0 and 9 before any filename has
/// even been read (spec.md §4.4 steps 1–2).
pub fn quick_decision(access_level: u8) -> Option<FilenameDecision> {
    match access_level {
        0 => Some(FilenameDecision::Deny),
        9 => Some(FilenameDecision::Allow),
        _ => None,
    }
}

/// The remaining steps of spec.md §4.4 (3 is the caller's memory read;
/// this covers 4 through 9) given the raw filename already fetched.
/// Steps 4 through 9 of spec.md §4.4, given the raw filename already
/// fetched from the tracee's memory (step 3 is the caller's concern).
pub fn decide_filename(raw: &str, access_level: u8, user_rules: &[PathRule]) -> FilenameDecision {
    if access_level >= 4 {
        return FilenameDecision::Allow;
    }
    if access_level >= 2 && !raw.contains('/') && raw != ".." {
        return FilenameDecision::Allow;
    }

    let canonical = path_policy::canonicalize(raw);
    let mut action = if path_policy::has_unresolved_dotdot(&canonical) {
        Some(PathAction::Deny)
    } else {
        None
    };

    if let Some(a) = path_policy::scan(user_rules, &canonical) {
        action = Some(a);
    } else if access_level >= 3 {
        let builtins = path_policy::builtin_rules();
        if let Some(a) = path_policy::scan(&builtins, &canonical) {
            action = Some(a);
        }
    }

    match action {
        Some(PathAction::Allow) => FilenameDecision::Allow,
        _ => FilenameDecision::Deny,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_policy::PathRule;
    use crate::syscall_table::default_table;

    #[test]
    fn fork_family_override_bypasses_the_default_deny() {
        let table = default_table();
        let sys = libc::SYS_fork;
        match classify_entry(sys, &table, FilterLevel(2), true, false, 1234, 0, 0, 0) {
            EntryDecision::Allow(_) => {}
            other => panic!("expected allow, got {:?}", other),
        }
    }

    #[test]
    fn unknown_syscall_without_overrides_is_denied() {
        let table = default_table();
        match classify_entry(999_999, &table, FilterLevel(2), false, false, 1234, 0, 0, 0) {
            EntryDecision::Deny(_) => {}
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[test]
    fn kill_targeting_own_pid_is_a_self_kill() {
        let table = default_table();
        let sys = syscall_table::kill_number();
        match classify_entry(sys, &table, FilterLevel(2), false, false, 1234, 1234, 15, 0) {
            EntryDecision::SelfKill(15) => {}
            other => panic!("expected self-kill with SIGTERM, got {:?}", other),
        }
    }

    #[test]
    fn kill_targeting_another_pid_is_denied_not_a_self_kill() {
        let table = default_table();
        let sys = syscall_table::kill_number();
        match classify_entry(sys, &table, FilterLevel(2), false, false, 1234, 999, 15, 0) {
            EntryDecision::Deny(_) => {}
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[test]
    fn tgkill_targeting_own_tid_and_own_pid_is_a_self_kill() {
        let table = default_table();
        let sys = syscall_table::tgkill_number();
        match classify_entry(sys, &table, FilterLevel(2), false, false, 1234, 1234, 1234, 9) {
            EntryDecision::SelfKill(9) => {}
            other => panic!("expected self-kill with SIGKILL, got {:?}", other),
        }
    }

    #[test]
    fn access_level_zero_denies_before_any_read() {
        assert_eq!(quick_decision(0), Some(FilenameDecision::Deny));
    }

    #[test]
    fn access_level_nine_allows_before_any_read() {
        assert_eq!(quick_decision(9), Some(FilenameDecision::Allow));
    }

    #[test]
    fn cwd_local_name_allowed_at_level_two() {
        assert_eq!(decide_filename("data.txt", 2, &[]), FilenameDecision::Allow);
    }

    #[test]
    fn dotdot_only_name_is_not_treated_as_cwd_local() {
        assert_eq!(decide_filename("..", 2, &[]), FilenameDecision::Deny);
    }

    #[test]
    fn user_rule_can_override_builtin_denial() {
        let rules = vec![PathRule::new("/secret/allowed", PathAction::Allow)];
        assert_eq!(
            decide_filename("/secret/allowed", 3, &rules),
            FilenameDecision::Allow
        );
    }

    #[test]
    fn escaping_dotdot_is_denied_even_with_matching_builtin_prefix() {
        assert_eq!(decide_filename("/etc/../../root/.ssh", 3, &[]), FilenameDecision::Deny);
    }

    #[test]
    fn builtin_rule_only_consulted_at_level_three_or_above() {
        assert_eq!(decide_filename("/etc/passwd", 2, &[]), FilenameDecision::Deny);
        assert_eq!(decide_filename("/etc/passwd", 3, &[]), FilenameDecision::Allow);
    }
}
