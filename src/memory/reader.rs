//! Typed field reader
//!
//! Decodes gameplay field values from live process memory using a resolved
//! signature profile. The reader exclusively owns its backend handle; the
//! live bridge owns the reader.

use serde_json::{Map, Value};

use super::backend::{MemoryBackend, MemoryError, ProcessHandle};
use super::profile::{FieldSource, MemoryFieldSpec, MemoryProfile};

/// Reads typed fields from one attached process.
pub struct MemoryReader {
    backend: Box<dyn MemoryBackend>,
    handle: ProcessHandle,
    pid: u32,
    module_base: u64,
    pointer_size: u32,
    native_pointer_size: u32,
}

impl MemoryReader {
    pub fn new(backend: Box<dyn MemoryBackend>) -> Self {
        let native_pointer_size = std::mem::size_of::<usize>() as u32;
        Self {
            backend,
            handle: 0,
            pid: 0,
            module_base: 0,
            pointer_size: native_pointer_size,
            native_pointer_size,
        }
    }

    pub fn connected(&self) -> bool {
        self.handle != 0
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn module_base(&self) -> u64 {
        self.module_base
    }

    /// Whether the named process currently exists.
    pub fn process_exists(&self, process_name: &str) -> bool {
        self.backend.find_process_id(process_name).is_some()
    }

    /// Whether the current context has the rights admin-gated profiles
    /// require.
    pub fn is_admin_context(&self) -> bool {
        self.backend.is_admin_context()
    }

    /// Attach to the profile's process: resolve pid, open a handle and
    /// record the module base (0 when the module is not found).
    pub fn open(&mut self, process_name: &str, profile: &MemoryProfile) -> Result<(), MemoryError> {
        self.close();
        self.pointer_size = self.native_pointer_size;

        if !self.backend.supports_memory_read() {
            return Err(MemoryError::Backend(
                "memory_reader_not_supported_platform".to_string(),
            ));
        }

        let target = if process_name.trim().is_empty() {
            profile.process_name.as_str()
        } else {
            process_name
        };
        let pid = self
            .backend
            .find_process_id(target)
            .ok_or_else(|| MemoryError::ProcessNotFound(target.to_string()))?;

        let handle = self.backend.open_process(pid)?;
        let module_base = if profile.module_name.is_empty() {
            0
        } else {
            self.backend
                .get_module_base(pid, &profile.module_name)
                .unwrap_or(0)
        };

        self.pid = pid;
        self.handle = handle;
        self.module_base = module_base;
        if profile.pointer_size == 4 || profile.pointer_size == 8 {
            self.pointer_size = profile.pointer_size;
        }
        Ok(())
    }

    pub fn close(&mut self) {
        if self.handle != 0 {
            self.backend.close_process(self.handle);
        }
        self.handle = 0;
        self.pid = 0;
        self.module_base = 0;
        self.pointer_size = self.native_pointer_size;
    }

    fn read_pointer(&self, address: u64) -> Result<u64, MemoryError> {
        let raw = self
            .backend
            .read_memory(self.handle, address, self.pointer_size as usize)?;
        if self.pointer_size == 8 {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&raw);
            Ok(u64::from_le_bytes(bytes))
        } else {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&raw);
            Ok(u64::from(u32::from_le_bytes(bytes)))
        }
    }

    fn resolve_address(&self, spec: &MemoryFieldSpec) -> Result<u64, MemoryError> {
        let mut address = spec.address;
        if spec.relative_to_module {
            address = address.wrapping_add(self.module_base);
        }

        match spec.source {
            FieldSource::Address => Ok(address),
            FieldSource::PointerChain => {
                if spec.offsets.is_empty() {
                    return self.read_pointer(address);
                }
                let mut current = address;
                for offset in &spec.offsets {
                    let pointer = self.read_pointer(current)?;
                    current = pointer.wrapping_add(*offset as u64);
                }
                Ok(current)
            }
        }
    }

    /// Read every field of the profile. Any failure propagates with the
    /// OS code preserved in the message.
    pub fn read_fields(&self, profile: &MemoryProfile) -> Result<Map<String, Value>, MemoryError> {
        if !self.connected() {
            return Err(MemoryError::Backend(
                "memory_reader_not_connected".to_string(),
            ));
        }

        let mut values = Map::new();
        for (name, spec) in &profile.fields {
            let address = self.resolve_address(spec)?;
            let raw = self
                .backend
                .read_memory(self.handle, address, spec.value_type.width())?;
            values.insert(name.clone(), spec.value_type.decode_le(&raw)?);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::backend::MemoryRegion;
    use crate::memory::profile::load_memory_profile;
    use serde_json::json;
    use std::collections::BTreeMap;

    struct MapBackend {
        memory: BTreeMap<u64, Vec<u8>>,
        module_base: u64,
    }

    impl MapBackend {
        fn write(&mut self, address: u64, bytes: &[u8]) {
            self.memory.insert(address, bytes.to_vec());
        }
    }

    impl MemoryBackend for MapBackend {
        fn supports_memory_read(&self) -> bool {
            true
        }

        fn find_process_id(&self, _process_name: &str) -> Option<u32> {
            Some(77)
        }

        fn open_process(&self, pid: u32) -> Result<ProcessHandle, MemoryError> {
            Ok(u64::from(pid))
        }

        fn close_process(&self, _handle: ProcessHandle) {}

        fn read_memory(
            &self,
            _handle: ProcessHandle,
            address: u64,
            size: usize,
        ) -> Result<Vec<u8>, MemoryError> {
            for (start, bytes) in &self.memory {
                let end = start + bytes.len() as u64;
                if address >= *start && address + size as u64 <= end {
                    let offset = (address - start) as usize;
                    return Ok(bytes[offset..offset + size].to_vec());
                }
            }
            Err(MemoryError::os_read(address, size, 998))
        }

        fn get_module_base(&self, _pid: u32, _module_name: &str) -> Option<u64> {
            Some(self.module_base)
        }

        fn readable_regions(
            &self,
            _handle: ProcessHandle,
            _min: u64,
            _max: u64,
        ) -> Vec<MemoryRegion> {
            Vec::new()
        }
    }

    fn profile() -> MemoryProfile {
        load_memory_profile(
            &json!({
                "schema_version": "live_memory_v2",
                "profiles": [{
                    "id": "test",
                    "process_name": "NordHold.exe",
                    "pointer_size": 8,
                    "fields": {
                        "current_wave": {"source": "address", "type": "int32",
                                         "address": "0x1000"},
                        "gold": {"source": "address", "type": "float64",
                                 "address": "0x100", "relative_to_module": true},
                        "essence": {"source": "pointer_chain", "type": "int32",
                                    "address": "0x2000", "offsets": ["0x10"]}
                    }
                }]
            }),
            "NordHold.exe",
            "test",
        )
        .expect("profile loads")
    }

    #[test]
    fn read_fields_decodes_direct_relative_and_chain_sources() {
        let mut backend = MapBackend {
            memory: BTreeMap::new(),
            module_base: 0x7FF6_0000,
        };
        backend.write(0x1000, &12i32.to_le_bytes());
        backend.write(0x7FF6_0100, &512.5f64.to_le_bytes());
        // essence chain: *(0x2000) = 0x5000; value at 0x5000 + 0x10
        backend.write(0x2000, &0x5000u64.to_le_bytes());
        backend.write(0x5010, &42i32.to_le_bytes());

        let mut reader = MemoryReader::new(Box::new(backend));
        let prof = profile();
        reader.open("NordHold.exe", &prof).expect("opens");
        assert_eq!(reader.pid(), 77);

        let values = reader.read_fields(&prof).expect("reads");
        assert_eq!(values["current_wave"], json!(12));
        assert_eq!(values["gold"], json!(512.5));
        assert_eq!(values["essence"], json!(42));
    }

    #[test]
    fn read_failure_preserves_os_code() {
        let backend = MapBackend {
            memory: BTreeMap::new(),
            module_base: 0,
        };
        let mut reader = MemoryReader::new(Box::new(backend));
        let prof = profile();
        reader.open("NordHold.exe", &prof).expect("opens");
        let err = reader.read_fields(&prof).expect_err("no memory mapped");
        assert!(err.to_string().contains("winerr=998"));
    }

    #[test]
    fn close_resets_connection_state() {
        let backend = MapBackend {
            memory: BTreeMap::new(),
            module_base: 0,
        };
        let mut reader = MemoryReader::new(Box::new(backend));
        let prof = profile();
        reader.open("NordHold.exe", &prof).expect("opens");
        assert!(reader.connected());
        reader.close();
        assert!(!reader.connected());
        assert!(reader.read_fields(&prof).is_err());
    }
}
