//! Environment policy: rule application and environment construction
//! (spec.md §4.5). Grounded on box.c's `setup_environment`/`apply_env_rule`.

/// `(var, val)`. `val = None` inherits the parent's value if present;
/// `val = Some("")` unsets the variable; otherwise sets it literally.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvRule {
    pub var: String,
    pub val: Option<String>,
}

impl EnvRule {
    pub fn set(var: impl Into<String>, val: impl Into<String>) -> Self {
        EnvRule {
            var: var.into(),
            val: Some(val.into()),
        }
    }

    pub fn unset(var: impl Into<String>) -> Self {
        EnvRule {
            var: var.into(),
            val: Some(String::new()),
        }
    }

    pub fn inherit(var: impl Into<String>) -> Self {
        EnvRule {
            var: var.into(),
            val: None,
        }
    }
}

/// The one rule box.c always applies first, ahead of any user rule
/// (spec.md §3).
pub fn builtin_rule() -> EnvRule {
    EnvRule::set("LIBC_FATAL_STDERR_", "1")
}

/// Builds the final `VAR=value` environment entries for the traced child.
///
/// `parent_env` is the full parent environment as `(var, value)` pairs.
/// `pass_environ` starts the working environment as a copy of
/// `parent_env` rather than empty. `user_rules` apply in declaration
/// order after the built-in rule, so user rules win on conflict
/// (spec.md §4.5).
pub fn build_environment(
    parent_env: &[(String, String)],
    pass_environ: bool,
    user_rules: &[EnvRule],
) -> Vec<String> {
    let mut working: Vec<(String, String)> = if pass_environ {
        parent_env.to_vec()
    } else {
        Vec::new()
    };

    let mut rules = Vec::with_capacity(user_rules.len() + 1);
    rules.push(builtin_rule());
    rules.extend(user_rules.iter().cloned());

    for rule in &rules {
        // Remove any existing entry for `var` first; order need not be
        // stable (spec.md §4.5).
        working.retain(|(k, _)| k != &rule.var);

        match &rule.val {
            Some(s) if !s.is_empty() => {
                working.push((rule.var.clone(), s.clone()));
            }
            Some(_) => {
                // Empty string: variable stays unset.
            }
            None => {
                if let Some((_, v)) = parent_env.iter().find(|(k, _)| k == &rule.var) {
                    working.push((rule.var.clone(), v.clone()));
                }
            }
        }
    }

    working
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect()
}

/// Reads the current process's environment as `(var, value)` pairs, for
/// use as `build_environment`'s `parent_env` argument.
pub fn current_environment() -> Vec<(String, String)> {
    std::env::vars().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins_for_repeated_set_rules() {
        // spec.md §8 round-trip law.
        let rules = vec![EnvRule::set("A", "1"), EnvRule::set("A", "2")];
        let env = build_environment(&[], false, &rules);
        let a_entries: Vec<&String> = env.iter().filter(|e| e.starts_with("A=")).collect();
        assert_eq!(a_entries, vec!["A=2"]);
    }

    #[test]
    fn builtin_rule_applies_first_but_user_rule_wins() {
        let rules = vec![EnvRule::set("LIBC_FATAL_STDERR_", "0")];
        let env = build_environment(&[], false, &rules);
        assert!(env.contains(&"LIBC_FATAL_STDERR_=0".to_string()));
        assert!(!env.contains(&"LIBC_FATAL_STDERR_=1".to_string()));
    }

    #[test]
    fn unset_rule_removes_variable_even_when_pass_environ() {
        let parent = vec![("PATH".to_string(), "/bin".to_string())];
        let rules = vec![EnvRule::unset("PATH")];
        let env = build_environment(&parent, true, &rules);
        assert!(env.iter().all(|e| !e.starts_with("PATH=")));
    }

    #[test]
    fn inherit_rule_copies_parent_value_when_present() {
        let parent = vec![("HOME".to_string(), "/home/user".to_string())];
        let rules = vec![EnvRule::inherit("HOME")];
        let env = build_environment(&parent, false, &rules);
        assert!(env.contains(&"HOME=/home/user".to_string()));
    }

    #[test]
    fn inherit_rule_is_silent_when_parent_lacks_the_variable() {
        let rules = vec![EnvRule::inherit("NOT_SET_ANYWHERE")];
        let env = build_environment(&[], false, &rules);
        assert!(env.iter().all(|e| !e.starts_with("NOT_SET_ANYWHERE=")));
    }

    #[test]
    fn pass_environ_starts_from_a_full_copy_of_the_parent() {
        let parent = vec![
            ("PATH".to_string(), "/bin".to_string()),
            ("HOME".to_string(), "/home/user".to_string()),
        ];
        let env = build_environment(&parent, true, &[]);
        assert!(env.contains(&"PATH=/bin".to_string()));
        assert!(env.contains(&"HOME=/home/user".to_string()));
        // builtin rule still applied
        assert!(env.contains(&"LIBC_FATAL_STDERR_=1".to_string()));
    }
}
