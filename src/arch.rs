//! CPU-mode detection (spec.md §4.6). Grounded on box.c's
//! `get_syscall_args`/`valid_syscall`'s `cs`-register and opcode checks.

use crate::error::{Result, SandboxError};
use crate::registers::Registers;
use nix::unistd::Pid;

/// Which calling convention the traced instruction just used.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SupportedArch {
    X86,
    X8664,
}

/// 32-bit code segment selector box.c compares `cs` against on amd64
/// kernels running a 32-bit (or compat) child.
const CS_32BIT: u64 = 0x23;
/// 64-bit code segment selector.
const CS_64BIT: u64 = 0x33;

/// `SYSCALL` opcode (`0x0f 0x05`), read little-endian as box.c does.
const OPCODE_SYSCALL: u16 = 0x050f;
/// `INT 0x80` opcode (`0xcd 0x80`): forbidden on a 64-bit kernel, since it
/// always uses the 32-bit table regardless of `cs` (spec.md §4.6).
const OPCODE_INT80: u16 = 0x80cd;

/// Reads the two bytes immediately before `rip` out of the tracee's
/// memory, matching box.c's `PTRACE_PEEKTEXT` probe at `rip - 2`.
fn opcode_before_rip(pid: Pid, rip: u64) -> Result<u16> {
    let word = nix::sys::ptrace::read(pid, (rip.wrapping_sub(2)) as *mut libc::c_void)
        .map_err(|e| SandboxError::xx(format!("failed to read instruction bytes: {}", e)))?;
    Ok((word as u64 & 0xffff) as u16)
}

/// Classifies the instruction that trapped into the kernel, refusing
/// anything other than a native `SYSCALL`/`INT 0x80` pairing for the
/// running kernel's bitness (spec.md §4.6). Only ever consulted once
/// `exec_seen` is true (`keeper::handle_entry`), so the pre-exec loader
/// phase spec.md §3 exempts from checking never reaches here; the "32-bit
/// after execve" half of §4.6's mixed-build contract reduces to "every
/// entry this function ever sees must already be in the expected mode."
///
/// `kernel_is_amd64` is the host's actual bitness (`uname().machine`),
/// not the tracee's.
#[cfg(target_arch = "x86_64")]
pub fn detect_mode(pid: Pid, regs: &Registers, kernel_is_amd64: bool) -> Result<SupportedArch> {
    // check_kernel_matches_build refuses to start this build on anything
    // but a 64-bit kernel, so spec.md §4.6's "when both kernel and user
    // are 64-bit, only 64-bit mode is accepted at all times" applies
    // unconditionally here: a 32-bit-mode entry is a forbidden attempt to
    // dodge the filter through the compat ABI, not a valid alternate mode.
    debug_assert!(kernel_is_amd64);
    let cs = regs.cs();
    let rip = regs.ip();
    let opcode = opcode_before_rip(pid, rip)?;

    match (cs, opcode) {
        (CS_64BIT, OPCODE_SYSCALL) => Ok(SupportedArch::X8664),
        (CS_64BIT, OPCODE_INT80) => Err(SandboxError::fo("INT 0x80 is forbidden from 64-bit mode")),
        _ => Err(SandboxError::fo(format!(
            "32-bit syscall entry is forbidden on a 64-bit build: cs={:#x} opcode={:#x}",
            cs, opcode
        ))),
    }
}

#[cfg(target_arch = "x86")]
pub fn detect_mode(pid: Pid, regs: &Registers, kernel_is_amd64: bool) -> Result<SupportedArch> {
    let cs = regs.cs();
    let rip = regs.ip();
    let opcode = opcode_before_rip(pid, rip)?;

    match (cs, opcode) {
        (CS_32BIT, OPCODE_SYSCALL) | (CS_32BIT, OPCODE_INT80) => Ok(SupportedArch::X86),
        // The mixed 32-bit-build-on-64-bit-kernel case (spec.md §4.6,
        // §9): mode must be 32-bit after the target's execve, which is
        // the only phase this function is ever consulted in.
        (CS_64BIT, _) if kernel_is_amd64 => Err(SandboxError::fo(
            "expected 32-bit mode after the target's execve on a mixed 32-on-64 build",
        )),
        _ => Err(SandboxError::xx(format!(
            "unrecognized syscall entry: cs={:#x} opcode={:#x}",
            cs, opcode
        ))),
    }
}

/// Confirms the host kernel is 64-bit when this binary was built for
/// `x86_64`, refusing the mismatched combination box.c's build-time
/// `#ifdef` made impossible but a Rust cross-build does not (spec.md §9).
pub fn check_kernel_matches_build() -> Result<bool> {
    let uts = nix::sys::utsname::uname()
        .map_err(|e| SandboxError::xx(format!("uname failed: {}", e)))?;
    let machine = uts.machine().to_string_lossy().to_string();
    let kernel_is_amd64 = machine == "x86_64";

    #[cfg(target_arch = "x86_64")]
    {
        if !kernel_is_amd64 {
            return Err(SandboxError::xx(
                "this build requires a 64-bit kernel".to_string(),
            ));
        }
    }
    Ok(kernel_is_amd64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cs_64bit_syscall_is_x86_64_on_amd64_kernel() {
        // Exercised indirectly through detect_mode's match arms; the byte
        // decode itself is covered by registers.rs's own tests, so here we
        // just confirm the opcode constants have the expected byte order.
        assert_eq!(OPCODE_SYSCALL, 0x050f);
        assert_eq!(OPCODE_INT80, 0x80cd);
    }
}
