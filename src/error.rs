//! Sandbox and target error reporting (spec.md §7).
//!
//! `rd` propagates failures as `io::Result` or bare `unimplemented!()`;
//! this crate instead gives every status code from spec.md §7 an explicit
//! variant so the keeper loop can always answer "what do I write to the
//! meta file, and what's my exit code" from the error value alone.

use std::fmt;

/// The two-character status code written to the meta file's `status:` key.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum StatusCode {
    /// Forbidden syscall, or wrong CPU mode.
    Fo,
    /// Forbidden file access.
    Fa,
    /// Terminated by signal (including self-kill via `kill`/`tgkill`).
    Sg,
    /// Nonzero exit from the traced program.
    Re,
    /// CPU or wall-clock time limit exceeded.
    To,
    /// Internal inconsistency (unknown instruction, mismatched entry/exit, etc).
    Xx,
}

impl StatusCode {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Fo => "FO",
            StatusCode::Fa => "FA",
            StatusCode::Sg => "SG",
            StatusCode::Re => "RE",
            StatusCode::To => "TO",
            StatusCode::Xx => "XX",
        }
    }

    /// Exit code of the `box` process itself: 1 for a policy violation or
    /// target failure, 2 for a sandbox-internal error (`XX`).
    pub fn exit_code(self) -> i32 {
        match self {
            StatusCode::Xx => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal condition that ends the run: either the target misbehaved
/// (`FO`/`FA`/`SG`/`RE`/`TO`) or the sandbox itself could not continue
/// (`XX`). Both classes flow through the same meta-then-stderr-then-exit
/// path (spec.md §7).
#[derive(thiserror::Error, Debug)]
#[error("{code}: {message}")]
pub struct SandboxError {
    pub code: StatusCode,
    pub message: String,
    /// Set when this error also carries an `exitsig` to report (self-kill,
    /// signal termination).
    pub exitsig: Option<i32>,
    /// Set when this error also carries an `exitcode` to report.
    pub exitcode: Option<i32>,
    /// Set when the sandbox itself killed the traced child, rather than
    /// the child exiting or dying on its own (spec.md §6's `killed:1`).
    pub killed: bool,
}

impl SandboxError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        SandboxError {
            code,
            message: message.into(),
            exitsig: None,
            exitcode: None,
            killed: false,
        }
    }

    pub fn with_exitsig(mut self, sig: i32) -> Self {
        self.exitsig = Some(sig);
        self
    }

    pub fn with_exitcode(mut self, code: i32) -> Self {
        self.exitcode = Some(code);
        self
    }

    pub fn with_killed(mut self) -> Self {
        self.killed = true;
        self
    }

    pub fn fo(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Fo, message)
    }

    pub fn fa(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Fa, message)
    }

    pub fn sg(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Sg, message)
    }

    pub fn re(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Re, message)
    }

    pub fn to(message: impl Into<String>) -> Self {
        Self::new(StatusCode::To, message)
    }

    pub fn xx(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Xx, message)
    }
}

impl From<nix::Error> for SandboxError {
    fn from(e: nix::Error) -> Self {
        SandboxError::xx(format!("{}", e))
    }
}

impl From<std::io::Error> for SandboxError {
    fn from(e: std::io::Error) -> Self {
        SandboxError::xx(format!("{}", e))
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn killed_defaults_to_false_and_is_set_explicitly() {
        let err = SandboxError::fo("Forbidden syscall ptrace");
        assert!(!err.killed);
        assert!(err.with_killed().killed);
    }

    #[test]
    fn exit_code_is_two_only_for_xx() {
        assert_eq!(StatusCode::Xx.exit_code(), 2);
        for code in [StatusCode::Fo, StatusCode::Fa, StatusCode::Sg, StatusCode::Re, StatusCode::To] {
            assert_eq!(code.exit_code(), 1);
        }
    }
}
