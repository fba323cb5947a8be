//! Memory backend trait and error kinds
//!
//! OS-specific primitives are abstracted behind `MemoryBackend` so the
//! scanner, reader and live bridge can be exercised against fake backends
//! in tests. Exactly one implementation talks to the OS
//! (`SystemMemoryBackend`); everything above it is platform-neutral.

use thiserror::Error;

/// Opaque process handle. 0 means "not open".
pub type ProcessHandle = u64;

/// OS error code attached to partial reads on every backend.
///
/// Transient-error classification keys on this exact code plus the
/// canonical read-failure tag, so all backends must emit both verbatim.
pub const TRANSIENT_PARTIAL_READ_CODE: i32 = 299;

/// Canonical read-failure tag shared by all backends. Keeping the literal
/// identical across platforms keeps recorded telemetry and the transient
/// classifier wire-compatible.
pub const READ_FAILURE_TAG: &str = "ReadProcessMemory failed";

/// Memory subsystem errors. Variants are distinct because the live bridge
/// maps them to different degradation reasons.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Signature profile or calibration payload is malformed/unresolved.
    #[error("memory profile invalid: {0}")]
    Profile(String),
    /// Target process does not exist.
    #[error("process not found: {0}")]
    ProcessNotFound(String),
    /// Process handle could not be opened with read rights.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// A read failed. The message carries `winerr=<code>` for transient
    /// classification.
    #[error("memory read failed: {0}")]
    Read(String),
    /// Backend-level failure (unsupported platform, closed handle, ...).
    #[error("{0}")]
    Backend(String),
}

impl MemoryError {
    /// Build a read error for a short read. Always transient-classifiable.
    pub fn partial_read(address: u64, size: usize, read: usize) -> Self {
        Self::Read(format!(
            "{READ_FAILURE_TAG}: addr={address:#x} size={size} read={read} \
             winerr={TRANSIENT_PARTIAL_READ_CODE}"
        ))
    }

    /// Build a read error carrying the OS error code.
    pub fn os_read(address: u64, size: usize, code: i32) -> Self {
        Self::Read(format!(
            "{READ_FAILURE_TAG}: addr={address:#x} size={size} read=0 winerr={code}"
        ))
    }
}

/// True when a read-error message indicates a transient partial read
/// (mid-relocation) that is expected to clear on retry.
pub fn is_transient_read_error(message: &str) -> bool {
    let text = message.to_lowercase();
    text.contains("winerr=299") && text.contains("readprocessmemory failed")
}

/// A committed, readable virtual-memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub start: u64,
    pub length: u64,
}

/// Capability set required from an OS memory backend.
///
/// Every primitive returns `None`/`Err` on failure; nothing here may panic
/// or raise outside the backend boundary.
pub trait MemoryBackend {
    /// Whether this backend can actually read process memory on the
    /// current platform.
    fn supports_memory_read(&self) -> bool;

    /// Resolve a process id by executable name. `None` on any failure.
    fn find_process_id(&self, process_name: &str) -> Option<u32>;

    /// Open a read handle. Fails with `PermissionDenied` when rights are
    /// insufficient.
    fn open_process(&self, pid: u32) -> Result<ProcessHandle, MemoryError>;

    /// Close a handle. Closing an already-closed handle is a no-op.
    fn close_process(&self, handle: ProcessHandle);

    /// Read exactly `size` bytes at `address`. A short read is a failure.
    fn read_memory(
        &self,
        handle: ProcessHandle,
        address: u64,
        size: usize,
    ) -> Result<Vec<u8>, MemoryError>;

    /// Base address of a loaded module, `None` when not found.
    fn get_module_base(&self, pid: u32, module_name: &str) -> Option<u64>;

    /// Committed regions with a readable, non-guard protection class,
    /// clamped to `[min_address, max_address)`. Reserved/guard/no-access
    /// regions are skipped, never an error.
    fn readable_regions(
        &self,
        handle: ProcessHandle,
        min_address: u64,
        max_address: u64,
    ) -> Vec<MemoryRegion>;

    /// Highest scannable user-space address.
    fn max_user_address(&self) -> u64 {
        0x7FFF_FFFF_FFFF
    }

    /// Whether the calling context has the elevated rights some profiles
    /// require. Defaults to true for backends without a privilege model.
    fn is_admin_context(&self) -> bool {
        true
    }
}
