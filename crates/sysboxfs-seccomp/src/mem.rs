//! Reads argument strings out of a notifying process's address space.
//!
//! Seccomp-notify hands the engine raw pointers, not values; the pointed-to
//! bytes live in the caller's memory and must be fetched through
//! `/proc/<pid>/mem`, never trusted as already-validated input, since the
//! caller can rewrite them at any point before the cookie re-check.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use crate::error::{Result, SeccompError};

/// Longest C string this engine will read out of a notifying process; a
/// mount syscall's paths are bounded well under this by `PATH_MAX`.
const MAX_ARG_LEN: usize = 4096;
const CHUNK_LEN: usize = 256;

pub trait MemReader: Send + Sync {
    fn read_cstring(&self, pid: i32, addr: u64) -> Result<String>;
}

/// Opens `/proc/<pid>/mem` fresh for every read; the notification's pid is
/// short-lived context, not worth caching a file handle for.
pub struct ProcMemReader;

impl MemReader for ProcMemReader {
    fn read_cstring(&self, pid: i32, addr: u64) -> Result<String> {
        if addr == 0 {
            return Ok(String::new());
        }
        let path = PathBuf::from(format!("/proc/{pid}/mem"));
        let mut file = File::open(&path).map_err(|e| SeccompError::MemRead(addr, e))?;
        file.seek(SeekFrom::Start(addr))
            .map_err(|e| SeccompError::MemRead(addr, e))?;

        let mut out = Vec::new();
        let mut chunk = [0u8; CHUNK_LEN];
        loop {
            let n = file
                .read(&mut chunk)
                .map_err(|e| SeccompError::MemRead(addr, e))?;
            if n == 0 {
                break;
            }
            if let Some(nul) = chunk[..n].iter().position(|&b| b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                break;
            }
            out.extend_from_slice(&chunk[..n]);
            if out.len() > MAX_ARG_LEN {
                return Err(SeccompError::ArgumentTooLong(addr));
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

#[cfg(test)]
pub(crate) struct FakeMemReader {
    pub strings: std::collections::HashMap<u64, String>,
}

#[cfg(test)]
impl MemReader for FakeMemReader {
    fn read_cstring(&self, _pid: i32, addr: u64) -> Result<String> {
        if addr == 0 {
            return Ok(String::new());
        }
        self.strings
            .get(&addr)
            .cloned()
            .ok_or(SeccompError::ArgumentTooLong(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_reader_reads_null_terminated_string_from_file_backed_mem() {
        let dir = tempfile::tempdir().unwrap();
        let mem_path = dir.path().join("fake_mem");
        std::fs::write(&mem_path, b"hello\0garbage-after-nul").unwrap();

        struct FileBackedReader(PathBuf);
        impl MemReader for FileBackedReader {
            fn read_cstring(&self, _pid: i32, addr: u64) -> Result<String> {
                let mut file = File::open(&self.0).unwrap();
                file.seek(SeekFrom::Start(addr)).unwrap();
                let mut out = Vec::new();
                let mut chunk = [0u8; CHUNK_LEN];
                loop {
                    let n = file.read(&mut chunk).unwrap();
                    if n == 0 {
                        break;
                    }
                    if let Some(nul) = chunk[..n].iter().position(|&b| b == 0) {
                        out.extend_from_slice(&chunk[..nul]);
                        break;
                    }
                    out.extend_from_slice(&chunk[..n]);
                }
                Ok(String::from_utf8_lossy(&out).into_owned())
            }
        }

        let reader = FileBackedReader(mem_path);
        assert_eq!(reader.read_cstring(1, 0).unwrap(), "hello");
    }

    #[test]
    fn zero_address_reads_as_empty_string() {
        let reader = ProcMemReader;
        assert_eq!(reader.read_cstring(1, 0).unwrap(), "");
    }
}
