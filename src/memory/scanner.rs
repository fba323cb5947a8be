//! Process memory value scanner
//!
//! Walks the readable regions of an attached process looking for typed
//! values, then narrows candidate sets across time using delta predicates.
//! Reads are chunked with a `width - 1` byte carry between adjacent chunks
//! so no match is lost on a chunk boundary.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::backend::{MemoryBackend, MemoryError, ProcessHandle};
use super::profile::parse_flexible_int;

/// Value types the scanner understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanValueType {
    Int32,
    Float32,
    Uint64,
}

impl ScanValueType {
    pub fn width(self) -> usize {
        match self {
            Self::Int32 | Self::Float32 => 4,
            Self::Uint64 => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int32 => "int32",
            Self::Float32 => "float32",
            Self::Uint64 => "uint64",
        }
    }

    pub fn parse(text: &str) -> Result<Self, MemoryError> {
        match text.trim().to_lowercase().as_str() {
            "int32" => Ok(Self::Int32),
            "float32" => Ok(Self::Float32),
            "uint64" => Ok(Self::Uint64),
            other => Err(MemoryError::Profile(format!(
                "Unsupported scanner value type '{other}'. Supported: int32|float32|uint64."
            ))),
        }
    }
}

/// A decoded scan value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanValue {
    Int(i64),
    Uint(u64),
    Float(f32),
}

impl ScanValue {
    /// Parse target text: decimal or `0x...` hex for integers, decimal
    /// float otherwise.
    pub fn parse(text: &str, value_type: ScanValueType) -> Result<Self, MemoryError> {
        match value_type {
            ScanValueType::Int32 => Ok(Self::Int(parse_flexible_int(
                &serde_json::Value::from(text),
                "scan target",
            )?)),
            ScanValueType::Uint64 => {
                let trimmed = text.trim();
                let parsed = if let Some(rest) = trimmed
                    .strip_prefix("0x")
                    .or_else(|| trimmed.strip_prefix("0X"))
                {
                    u64::from_str_radix(rest, 16)
                } else {
                    trimmed.parse()
                };
                parsed.map(Self::Uint).map_err(|_| {
                    MemoryError::Profile(format!("Invalid uint64 scan target: {text}"))
                })
            }
            ScanValueType::Float32 => text
                .trim()
                .parse::<f32>()
                .map(Self::Float)
                .map_err(|_| MemoryError::Profile(format!("Invalid float scan target: {text}"))),
        }
    }

    fn decode(raw: &[u8], value_type: ScanValueType) -> Self {
        match value_type {
            ScanValueType::Int32 => {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(&raw[..4]);
                Self::Int(i64::from(i32::from_le_bytes(bytes)))
            }
            ScanValueType::Uint64 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&raw[..8]);
                Self::Uint(u64::from_le_bytes(bytes))
            }
            ScanValueType::Float32 => {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(&raw[..4]);
                Self::Float(f32::from_le_bytes(bytes))
            }
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Uint(v) => v as f64,
            Self::Float(v) => f64::from(v),
        }
    }

    /// Text form used in snapshot records.
    pub fn to_text(self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Uint(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
        }
    }
}

fn float_eq(a: f64, b: f64, epsilon: f64) -> bool {
    a.is_finite() && b.is_finite() && (a - b).abs() <= epsilon
}

/// Type-aware equality: exact for integers, epsilon for floats.
fn values_eq(a: ScanValue, b: ScanValue, value_type: ScanValueType, epsilon: f64) -> bool {
    match value_type {
        ScanValueType::Float32 => float_eq(a.as_f64(), b.as_f64(), epsilon),
        ScanValueType::Int32 | ScanValueType::Uint64 => match (a, b) {
            (ScanValue::Int(x), ScanValue::Int(y)) => x == y,
            (ScanValue::Uint(x), ScanValue::Uint(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
    }
}

/// One candidate address with its last observed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub address: u64,
    pub value: ScanValue,
}

/// Scan bounds and tuning. `stride == 0` means "use the value width".
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub stride: usize,
    pub epsilon: f64,
    pub chunk_bytes: usize,
    pub min_address: u64,
    /// 0 means "use the backend's max user address".
    pub max_address: u64,
    pub max_results: usize,
    pub progress_interval_bytes: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            stride: 0,
            epsilon: 0.001,
            chunk_bytes: 1 << 20,
            min_address: 0,
            max_address: 0,
            max_results: 250_000,
            progress_interval_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Aggregate statistics for one scan pass.
#[derive(Debug, Clone, Serialize)]
pub struct ScanStats {
    pub regions_scanned: u64,
    pub bytes_scanned: u64,
    pub read_errors: u64,
    pub elapsed_s: f64,
    pub max_results_hit: bool,
}

/// Aggregate statistics for one narrow pass.
#[derive(Debug, Clone, Serialize)]
pub struct NarrowStats {
    pub source_candidates: usize,
    pub read_errors: u64,
    pub elapsed_s: f64,
}

/// Narrow predicates over `(previous, current)` value pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrowMode {
    Equal,
    Unchanged,
    Changed,
    Increased,
    Decreased,
    Delta,
}

impl NarrowMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
            Self::Increased => "increased",
            Self::Decreased => "decreased",
            Self::Delta => "delta",
        }
    }
}

/// Criteria for one narrow pass. `expected_value` doubles as a post-filter
/// for the non-`equal` modes.
#[derive(Debug, Clone)]
pub struct NarrowCriteria {
    pub mode: NarrowMode,
    pub expected_value: Option<ScanValue>,
    pub expected_delta: Option<ScanValue>,
    pub epsilon: f64,
}

fn keep_candidate(
    criteria: &NarrowCriteria,
    value_type: ScanValueType,
    previous: ScanValue,
    current: ScanValue,
) -> Result<bool, MemoryError> {
    let epsilon = criteria.epsilon;
    let ok = match criteria.mode {
        NarrowMode::Equal => {
            let expected = criteria.expected_value.ok_or_else(|| {
                MemoryError::Profile("expected value is required for mode=equal".to_string())
            })?;
            return Ok(values_eq(current, expected, value_type, epsilon));
        }
        NarrowMode::Unchanged => values_eq(current, previous, value_type, epsilon),
        NarrowMode::Changed => !values_eq(current, previous, value_type, epsilon),
        NarrowMode::Increased => match value_type {
            ScanValueType::Float32 => current.as_f64() > previous.as_f64() + epsilon,
            _ => current.as_f64() > previous.as_f64(),
        },
        NarrowMode::Decreased => match value_type {
            ScanValueType::Float32 => current.as_f64() < previous.as_f64() - epsilon,
            _ => current.as_f64() < previous.as_f64(),
        },
        NarrowMode::Delta => {
            let expected = criteria.expected_delta.ok_or_else(|| {
                MemoryError::Profile("expected delta is required for mode=delta".to_string())
            })?;
            let diff = current.as_f64() - previous.as_f64();
            match value_type {
                ScanValueType::Float32 => float_eq(diff, expected.as_f64(), epsilon),
                _ => diff.round() as i64 == expected.as_f64() as i64,
            }
        }
    };

    if !ok {
        return Ok(false);
    }
    match criteria.expected_value {
        None => Ok(true),
        Some(expected) => Ok(values_eq(current, expected, value_type, epsilon)),
    }
}

/// A scanner attached to one process through a backend handle.
pub struct ValueScanner<'a> {
    backend: &'a dyn MemoryBackend,
    handle: ProcessHandle,
    pid: u32,
    process_name: String,
}

impl<'a> ValueScanner<'a> {
    /// Find the process and open a read handle.
    pub fn attach(
        backend: &'a dyn MemoryBackend,
        process_name: &str,
    ) -> Result<Self, MemoryError> {
        if !backend.supports_memory_read() {
            return Err(MemoryError::Backend(
                "memory scanning is not supported on this platform".to_string(),
            ));
        }
        let pid = backend
            .find_process_id(process_name)
            .ok_or_else(|| MemoryError::ProcessNotFound(process_name.to_string()))?;
        let handle = backend.open_process(pid)?;
        Ok(Self {
            backend,
            handle,
            pid,
            process_name: process_name.to_string(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    /// Read and decode one value at an address.
    pub fn read_value(
        &self,
        address: u64,
        value_type: ScanValueType,
    ) -> Result<ScanValue, MemoryError> {
        let raw = self
            .backend
            .read_memory(self.handle, address, value_type.width())?;
        Ok(ScanValue::decode(&raw, value_type))
    }

    /// Scan every readable region within the configured bounds for
    /// stride-aligned occurrences of `target`.
    pub fn scan_for_value(
        &self,
        value_type: ScanValueType,
        target: ScanValue,
        config: &ScanConfig,
    ) -> (Vec<Candidate>, ScanStats) {
        let width = value_type.width();
        let step = if config.stride == 0 { width } else { config.stride };
        let chunk_bytes = config.chunk_bytes.max(64);
        let max_address = if config.max_address == 0 {
            self.backend.max_user_address()
        } else {
            config.max_address.min(self.backend.max_user_address())
        };

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut regions_scanned: u64 = 0;
        let mut read_errors: u64 = 0;
        let mut bytes_scanned: u64 = 0;
        let mut next_report = config.progress_interval_bytes;
        let started = Instant::now();

        let regions = self
            .backend
            .readable_regions(self.handle, config.min_address, max_address);

        for region in regions {
            regions_scanned += 1;
            let region_end = region.start + region.length;
            let mut cursor = region.start;
            let mut carry: Vec<u8> = Vec::new();
            let mut carry_addr = region.start;

            while cursor < region_end {
                let size = chunk_bytes.min((region_end - cursor) as usize);
                let chunk = match self.backend.read_memory(self.handle, cursor, size) {
                    Ok(chunk) => chunk,
                    Err(_) => {
                        read_errors += 1;
                        carry.clear();
                        carry_addr = cursor + size as u64;
                        cursor += size as u64;
                        continue;
                    }
                };

                bytes_scanned += chunk.len() as u64;
                if bytes_scanned >= next_report {
                    info!(
                        scanned_mib = bytes_scanned / (1024 * 1024),
                        candidates = candidates.len(),
                        "memory scan progress"
                    );
                    next_report += config.progress_interval_bytes;
                }

                let (payload, payload_address) = if carry.is_empty() {
                    (chunk.clone(), cursor)
                } else {
                    let mut joined = carry.clone();
                    joined.extend_from_slice(&chunk);
                    (joined, carry_addr)
                };

                if payload.len() >= width {
                    let limit = payload.len() - width;
                    let start_offset = ((step as u64 - (payload_address % step as u64))
                        % step as u64) as usize;
                    let mut offset = start_offset;
                    while offset <= limit {
                        let current =
                            ScanValue::decode(&payload[offset..offset + width], value_type);
                        if values_eq(current, target, value_type, config.epsilon) {
                            candidates.push(Candidate {
                                address: payload_address + offset as u64,
                                value: current,
                            });
                            if config.max_results > 0 && candidates.len() >= config.max_results {
                                return (
                                    candidates,
                                    ScanStats {
                                        regions_scanned,
                                        bytes_scanned,
                                        read_errors,
                                        elapsed_s: started.elapsed().as_secs_f64(),
                                        max_results_hit: true,
                                    },
                                );
                            }
                        }
                        offset += step;
                    }
                }

                let carry_size = width.saturating_sub(1);
                if payload.len() >= carry_size && carry_size > 0 {
                    carry = payload[payload.len() - carry_size..].to_vec();
                    carry_addr = payload_address + (payload.len() - carry_size) as u64;
                } else {
                    carry_addr = payload_address;
                    carry = payload;
                }
                cursor += size as u64;
            }
        }

        (
            candidates,
            ScanStats {
                regions_scanned,
                bytes_scanned,
                read_errors,
                elapsed_s: started.elapsed().as_secs_f64(),
                max_results_hit: false,
            },
        )
    }

    /// Re-read each input candidate and keep those satisfying the
    /// predicate. Addresses whose reads fail are dropped and counted.
    pub fn narrow(
        &self,
        source: &[Candidate],
        value_type: ScanValueType,
        criteria: &NarrowCriteria,
    ) -> Result<(Vec<Candidate>, NarrowStats), MemoryError> {
        let started = Instant::now();
        let mut kept: Vec<Candidate> = Vec::new();
        let mut read_errors: u64 = 0;

        for item in source {
            let current = match self.read_value(item.address, value_type) {
                Ok(value) => value,
                Err(MemoryError::Read(_)) => {
                    read_errors += 1;
                    continue;
                }
                Err(other) => return Err(other),
            };
            if keep_candidate(criteria, value_type, item.value, current)? {
                kept.push(Candidate {
                    address: item.address,
                    value: current,
                });
            }
        }

        Ok((
            kept,
            NarrowStats {
                source_candidates: source.len(),
                read_errors,
                elapsed_s: started.elapsed().as_secs_f64(),
            },
        ))
    }

    pub fn detach(&mut self) {
        if self.handle != 0 {
            self.backend.close_process(self.handle);
            self.handle = 0;
        }
    }
}

impl Drop for ValueScanner<'_> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::backend::MemoryRegion;
    use std::collections::BTreeMap;

    /// Fake backend exposing fixed byte regions.
    struct BufferBackend {
        regions: BTreeMap<u64, Vec<u8>>,
    }

    impl BufferBackend {
        fn new(regions: Vec<(u64, Vec<u8>)>) -> Self {
            Self {
                regions: regions.into_iter().collect(),
            }
        }
    }

    impl MemoryBackend for BufferBackend {
        fn supports_memory_read(&self) -> bool {
            true
        }

        fn find_process_id(&self, _process_name: &str) -> Option<u32> {
            Some(4242)
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
            for (start, bytes) in &self.regions {
                let end = start + bytes.len() as u64;
                if address >= *start && address + size as u64 <= end {
                    let offset = (address - start) as usize;
                    return Ok(bytes[offset..offset + size].to_vec());
                }
            }
            Err(MemoryError::os_read(address, size, 5))
        }

        fn get_module_base(&self, _pid: u32, _module_name: &str) -> Option<u64> {
            None
        }

        fn readable_regions(
            &self,
            _handle: ProcessHandle,
            min_address: u64,
            max_address: u64,
        ) -> Vec<MemoryRegion> {
            self.regions
                .iter()
                .filter_map(|(start, bytes)| {
                    let begin = (*start).max(min_address);
                    let stop = (start + bytes.len() as u64).min(max_address);
                    (stop > begin).then_some(MemoryRegion {
                        start: begin,
                        length: stop - begin,
                    })
                })
                .collect()
        }
    }

    fn region_with_value_at(base: u64, len: usize, offset: usize, value: i32) -> (u64, Vec<u8>) {
        let mut bytes = vec![0u8; len];
        bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        (base, bytes)
    }

    #[test]
    fn scan_finds_value_across_chunk_boundary() {
        // 64-byte chunks; the value straddles bytes 62..66.
        let backend = BufferBackend::new(vec![region_with_value_at(0x1000, 256, 62, 777)]);
        let scanner = ValueScanner::attach(&backend, "NordHold.exe").expect("attach");
        let config = ScanConfig {
            chunk_bytes: 64,
            stride: 2,
            ..ScanConfig::default()
        };
        let (candidates, stats) =
            scanner.scan_for_value(ScanValueType::Int32, ScanValue::Int(777), &config);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].address, 0x1000 + 62);
        assert!(!stats.max_results_hit);
        assert_eq!(stats.regions_scanned, 1);
    }

    #[test]
    fn scan_respects_stride_alignment() {
        // Value sits at an odd offset; a 4-byte stride must not see it.
        let backend = BufferBackend::new(vec![region_with_value_at(0x2000, 64, 13, 55)]);
        let scanner = ValueScanner::attach(&backend, "NordHold.exe").expect("attach");
        let (candidates, _) = scanner.scan_for_value(
            ScanValueType::Int32,
            ScanValue::Int(55),
            &ScanConfig::default(),
        );
        assert!(candidates.is_empty());

        let config = ScanConfig {
            stride: 1,
            ..ScanConfig::default()
        };
        let (candidates, _) =
            scanner.scan_for_value(ScanValueType::Int32, ScanValue::Int(55), &config);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].address, 0x2000 + 13);
    }

    #[test]
    fn scan_stops_at_max_results() {
        let mut bytes = vec![0u8; 64];
        for offset in (0..64).step_by(4) {
            bytes[offset..offset + 4].copy_from_slice(&9i32.to_le_bytes());
        }
        let backend = BufferBackend::new(vec![(0x3000, bytes)]);
        let scanner = ValueScanner::attach(&backend, "NordHold.exe").expect("attach");
        let config = ScanConfig {
            max_results: 3,
            ..ScanConfig::default()
        };
        let (candidates, stats) =
            scanner.scan_for_value(ScanValueType::Int32, ScanValue::Int(9), &config);
        assert_eq!(candidates.len(), 3);
        assert!(stats.max_results_hit);
    }

    #[test]
    fn narrow_output_is_subset_and_drops_failed_reads() {
        let backend = BufferBackend::new(vec![region_with_value_at(0x1000, 64, 0, 100)]);
        let scanner = ValueScanner::attach(&backend, "NordHold.exe").expect("attach");
        let source = vec![
            Candidate {
                address: 0x1000,
                value: ScanValue::Int(100),
            },
            // Outside any region: read fails and the candidate is dropped.
            Candidate {
                address: 0x9000,
                value: ScanValue::Int(100),
            },
        ];
        let criteria = NarrowCriteria {
            mode: NarrowMode::Unchanged,
            expected_value: None,
            expected_delta: None,
            epsilon: 0.001,
        };
        let (kept, stats) = scanner
            .narrow(&source, ScanValueType::Int32, &criteria)
            .expect("narrow");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].address, 0x1000);
        assert_eq!(stats.read_errors, 1);
        assert!(kept.iter().all(|k| source.iter().any(|s| s.address == k.address)));
    }

    #[test]
    fn narrow_delta_predicate_is_exact_for_integers() {
        let backend = BufferBackend::new(vec![region_with_value_at(0x1000, 64, 0, 105)]);
        let scanner = ValueScanner::attach(&backend, "NordHold.exe").expect("attach");
        let source = vec![Candidate {
            address: 0x1000,
            value: ScanValue::Int(100),
        }];
        let criteria = NarrowCriteria {
            mode: NarrowMode::Delta,
            expected_value: None,
            expected_delta: Some(ScanValue::Int(5)),
            epsilon: 0.001,
        };
        let (kept, _) = scanner
            .narrow(&source, ScanValueType::Int32, &criteria)
            .expect("narrow");
        assert_eq!(kept.len(), 1);

        let criteria = NarrowCriteria {
            mode: NarrowMode::Delta,
            expected_value: None,
            expected_delta: Some(ScanValue::Int(4)),
            epsilon: 0.001,
        };
        let (kept, _) = scanner
            .narrow(&source, ScanValueType::Int32, &criteria)
            .expect("narrow");
        assert!(kept.is_empty());
    }

    #[test]
    fn scan_target_parsing_accepts_hex() {
        let parsed = ScanValue::parse("0x64", ScanValueType::Int32).expect("parses");
        assert_eq!(parsed, ScanValue::Int(100));
        let parsed = ScanValue::parse("100", ScanValueType::Int32).expect("parses");
        assert_eq!(parsed, ScanValue::Int(100));
    }
}
