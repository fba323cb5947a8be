//! System memory backend
//!
//! Reads another process's address space through `process_vm_readv` and
//! resolves pids, module bases and region maps from procfs. Only compiled
//! on unix targets; elsewhere a stub reports the platform as unsupported
//! so upper layers degrade instead of failing.

#[cfg(not(unix))]
use super::backend::{MemoryBackend, MemoryError, MemoryRegion, ProcessHandle};

/// procfs + process_vm_readv backend.
#[derive(Debug, Default)]
pub struct SystemMemoryBackend;

impl SystemMemoryBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Strip a trailing `.exe` so Windows-titled game processes match their
/// unix (Proton) process names.
fn normalize_process_name(name: &str) -> String {
    let trimmed = name.trim();
    trimmed
        .strip_suffix(".exe")
        .unwrap_or(trimmed)
        .to_lowercase()
}

#[cfg(unix)]
mod unix_impl {
    use std::fs;
    use std::path::Path;

    use super::{normalize_process_name, SystemMemoryBackend};
    use crate::memory::backend::{MemoryBackend, MemoryError, MemoryRegion, ProcessHandle};

    /// One parsed line of `/proc/<pid>/maps`.
    struct MapsEntry {
        start: u64,
        end: u64,
        readable: bool,
        path: String,
    }

    fn parse_maps_line(line: &str) -> Option<MapsEntry> {
        let mut parts = line.split_whitespace();
        let range = parts.next()?;
        let perms = parts.next()?;
        // offset, dev, inode
        let _ = parts.next()?;
        let _ = parts.next()?;
        let _ = parts.next()?;
        let path = parts.next().unwrap_or("").to_string();

        let (start_text, end_text) = range.split_once('-')?;
        let start = u64::from_str_radix(start_text, 16).ok()?;
        let end = u64::from_str_radix(end_text, 16).ok()?;
        Some(MapsEntry {
            start,
            end,
            readable: perms.starts_with('r'),
            path,
        })
    }

    fn read_maps(pid: u32) -> Option<Vec<MapsEntry>> {
        let content = fs::read_to_string(format!("/proc/{pid}/maps")).ok()?;
        Some(content.lines().filter_map(parse_maps_line).collect())
    }

    impl MemoryBackend for SystemMemoryBackend {
        fn supports_memory_read(&self) -> bool {
            true
        }

        fn find_process_id(&self, process_name: &str) -> Option<u32> {
            let wanted = normalize_process_name(process_name);
            if wanted.is_empty() {
                return None;
            }

            let entries = fs::read_dir("/proc").ok()?;
            let mut pids: Vec<u32> = entries
                .filter_map(Result::ok)
                .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
                .collect();
            pids.sort_unstable();

            for pid in pids {
                let Ok(comm) = fs::read_to_string(format!("/proc/{pid}/comm")) else {
                    continue;
                };
                if normalize_process_name(&comm) == wanted {
                    return Some(pid);
                }
            }
            None
        }

        fn open_process(&self, pid: u32) -> Result<ProcessHandle, MemoryError> {
            let proc_dir = format!("/proc/{pid}");
            if !Path::new(&proc_dir).exists() {
                return Err(MemoryError::ProcessNotFound(format!("pid={pid}")));
            }
            // Opening maps probes for ptrace-style read permission without
            // touching the target's memory.
            match fs::File::open(format!("{proc_dir}/maps")) {
                Ok(_) => Ok(u64::from(pid)),
                Err(err) => Err(MemoryError::PermissionDenied(format!(
                    "open failed for pid={pid}, oserr={}",
                    err.raw_os_error().unwrap_or(-1)
                ))),
            }
        }

        fn close_process(&self, _handle: ProcessHandle) {
            // pid-based handles hold no OS resources.
        }

        fn read_memory(
            &self,
            handle: ProcessHandle,
            address: u64,
            size: usize,
        ) -> Result<Vec<u8>, MemoryError> {
            if handle == 0 {
                return Err(MemoryError::Backend("handle is not open".to_string()));
            }
            if address == 0 {
                return Err(MemoryError::Read(format!(
                    "invalid read address: {address:#x}"
                )));
            }

            let mut buffer = vec![0u8; size];
            let local = libc::iovec {
                iov_base: buffer.as_mut_ptr().cast::<libc::c_void>(),
                iov_len: size,
            };
            let remote = libc::iovec {
                iov_base: address as *mut libc::c_void,
                iov_len: size,
            };

            #[allow(unsafe_code)]
            let read = unsafe {
                libc::process_vm_readv(handle as libc::pid_t, &local, 1, &remote, 1, 0)
            };

            if read < 0 {
                let code = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
                return Err(MemoryError::os_read(address, size, code));
            }
            let read = read as usize;
            if read != size {
                return Err(MemoryError::partial_read(address, size, read));
            }
            Ok(buffer)
        }

        fn get_module_base(&self, pid: u32, module_name: &str) -> Option<u64> {
            let wanted = module_name.trim().to_lowercase();
            if wanted.is_empty() {
                return None;
            }
            let entries = read_maps(pid)?;
            entries
                .iter()
                .find(|entry| {
                    Path::new(&entry.path)
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.to_lowercase() == wanted)
                })
                .map(|entry| entry.start)
        }

        fn readable_regions(
            &self,
            handle: ProcessHandle,
            min_address: u64,
            max_address: u64,
        ) -> Vec<MemoryRegion> {
            let Some(entries) = read_maps(handle as u32) else {
                return Vec::new();
            };
            let mut regions = Vec::new();
            for entry in entries {
                if !entry.readable {
                    continue;
                }
                let start = entry.start.max(min_address);
                let stop = entry.end.min(max_address);
                if stop > start {
                    regions.push(MemoryRegion {
                        start,
                        length: stop - start,
                    });
                }
            }
            regions
        }

        fn is_admin_context(&self) -> bool {
            #[allow(unsafe_code)]
            let euid = unsafe { libc::geteuid() };
            euid == 0
        }
    }
}

#[cfg(not(unix))]
impl MemoryBackend for SystemMemoryBackend {
    fn supports_memory_read(&self) -> bool {
        false
    }

    fn find_process_id(&self, _process_name: &str) -> Option<u32> {
        None
    }

    fn open_process(&self, _pid: u32) -> Result<ProcessHandle, MemoryError> {
        Err(MemoryError::Backend(
            "memory reads are not supported on this platform".to_string(),
        ))
    }

    fn close_process(&self, _handle: ProcessHandle) {}

    fn read_memory(
        &self,
        _handle: ProcessHandle,
        _address: u64,
        _size: usize,
    ) -> Result<Vec<u8>, MemoryError> {
        Err(MemoryError::Backend(
            "memory reads are not supported on this platform".to_string(),
        ))
    }

    fn get_module_base(&self, _pid: u32, _module_name: &str) -> Option<u64> {
        None
    }

    fn readable_regions(
        &self,
        _handle: ProcessHandle,
        _min_address: u64,
        _max_address: u64,
    ) -> Vec<MemoryRegion> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use crate::memory::backend::MemoryBackend;

    #[test]
    fn process_name_normalization_strips_exe_suffix() {
        assert_eq!(normalize_process_name("NordHold.exe"), "nordhold");
        assert_eq!(normalize_process_name("  nordhold \n"), "nordhold");
    }

    #[cfg(unix)]
    #[test]
    fn own_process_is_discoverable_through_procfs() {
        let backend = SystemMemoryBackend::new();
        let pid = std::process::id();
        let handle = backend.open_process(pid).expect("own process opens");
        let regions = backend.readable_regions(handle, 0, backend.max_user_address());
        assert!(!regions.is_empty(), "own maps should have readable regions");
    }

    #[cfg(unix)]
    #[test]
    fn reading_own_memory_round_trips() {
        let backend = SystemMemoryBackend::new();
        let value: u64 = 0x1122_3344_5566_7788;
        let address = std::ptr::addr_of!(value) as u64;
        let handle = backend
            .open_process(std::process::id())
            .expect("own process opens");
        let bytes = backend.read_memory(handle, address, 8).expect("read ok");
        assert_eq!(u64::from_le_bytes(bytes.try_into().expect("8 bytes")), value);
    }

    #[cfg(unix)]
    #[test]
    fn zero_address_read_fails() {
        let backend = SystemMemoryBackend::new();
        let handle = backend
            .open_process(std::process::id())
            .expect("own process opens");
        assert!(backend.read_memory(handle, 0, 4).is_err());
    }
}
