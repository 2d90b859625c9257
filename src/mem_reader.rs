//! Reads bytes and NUL-terminated strings out of a traced process's
//! address space via `/proc/<pid>/mem` (spec.md §4.4 step 3). Grounded
//! on box.c's `get_string`, which reads page-at-a-time through
//! `/proc/<pid>/mem` rather than `PTRACE_PEEKDATA` word-at-a-time.

use crate::error::{Result, SandboxError};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

const PAGE_SIZE: u64 = 4096;
/// box.c refuses filenames longer than this (`PATH_MAX`-ish guard).
const MAX_FILENAME_LEN: usize = 4096;

pub struct MemReader {
    file: File,
}

impl MemReader {
    pub fn open(pid: Pid) -> Result<Self> {
        let path = format!("/proc/{}/mem", pid);
        let file = File::open(&path)
            .map_err(|e| SandboxError::xx(format!("failed to open {}: {}", path, e)))?;
        Ok(MemReader { file })
    }

    /// Reads a NUL-terminated string starting at `addr`, one page at a
    /// time so a read never straddles into an unmapped page beyond the
    /// string's own page (spec.md §4.4 step 3).
    pub fn read_cstring(&mut self, addr: u64) -> Result<String> {
        let mut out = Vec::new();
        let mut pos = addr;

        loop {
            if out.len() >= MAX_FILENAME_LEN {
                return Err(SandboxError::xx("filename argument too long"));
            }

            let page_end = (pos / PAGE_SIZE + 1) * PAGE_SIZE;
            let chunk_len = (page_end - pos) as usize;
            let mut chunk = vec![0u8; chunk_len];

            self.file
                .seek(SeekFrom::Start(pos))
                .map_err(|e| SandboxError::xx(format!("seek into tracee memory failed: {}", e)))?;
            self.file
                .read_exact(&mut chunk)
                .map_err(|e| SandboxError::xx(format!("read of tracee memory failed: {}", e)))?;

            if let Some(nul) = chunk.iter().position(|&b| b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                break;
            }
            out.extend_from_slice(&chunk);
            pos = page_end;
        }

        String::from_utf8(out)
            .map_err(|_| SandboxError::xx("filename argument is not valid UTF-8"))
    }
}
