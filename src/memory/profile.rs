//! Memory signature profiles
//!
//! Declarative binding of gameplay field names to addresses or pointer
//! chains, parsed from a dataset's `memory_signatures` payload. Profiles
//! are parsed once per catalog load and immutable afterwards.

use std::collections::BTreeMap;

use serde_json::Value;

use super::backend::MemoryError;

/// Signature schema versions the loader accepts.
pub const SUPPORTED_MEMORY_SIGNATURE_SCHEMAS: [&str; 2] = ["live_memory_v1", "live_memory_v2"];

/// Default required combat fields when the payload declares none.
pub const DEFAULT_REQUIRED_COMBAT_FIELDS: [&str; 3] = ["current_wave", "gold", "essence"];

/// Default optional combat fields when the payload declares none.
pub const DEFAULT_OPTIONAL_COMBAT_FIELDS: [&str; 5] = [
    "lives",
    "player_hp",
    "max_player_hp",
    "enemies_alive",
    "combat_time_s",
];

/// Known placeholder sentinels. An address equal to one of these (or zero)
/// is unresolved regardless of what the payload claims.
const PLACEHOLDER_ADDRESSES: [u64; 10] = [
    0xDEAD_BEEF,
    0x0BAD_F00D,
    0xDEAD,
    0xBEEF,
    0xBAAD_F00D,
    0xCCCC_CCCC,
    0xCDCD_CDCD,
    0xFEEE_FEEE,
    0xFFFF_FFFF,
    0xFFFF_FFFE,
];

/// True when an address is zero or a known placeholder sentinel.
pub fn is_placeholder_address(address: u64) -> bool {
    address == 0 || PLACEHOLDER_ADDRESSES.contains(&address)
}

/// Parse an integer payload field that may be a JSON number or a decimal /
/// `0x`-prefixed string. Empty strings parse to 0.
pub fn parse_flexible_int(value: &Value, label: &str) -> Result<i64, MemoryError> {
    match value {
        Value::Number(number) => number.as_i64().ok_or_else(|| {
            MemoryError::Profile(format!("Invalid integer for {label}: {number}"))
        }),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(0);
            }
            let (digits, radix, negative) = if let Some(rest) = trimmed.strip_prefix("-0x") {
                (rest, 16, true)
            } else if let Some(rest) = trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
            {
                (rest, 16, false)
            } else if let Some(rest) = trimmed.strip_prefix('-') {
                (rest, 10, true)
            } else {
                (trimmed, 10, false)
            };
            i64::from_str_radix(digits, radix)
                .map(|parsed| if negative { -parsed } else { parsed })
                .map_err(|_| MemoryError::Profile(format!("Invalid integer for {label}: {text}")))
        }
        other => Err(MemoryError::Profile(format!(
            "Invalid integer type for {label}: {other}"
        ))),
    }
}

/// How a field value is located in the target address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    /// Read directly at the (possibly module-relative) address.
    Address,
    /// Follow a pointer chain: dereference, add offset, repeat.
    PointerChain,
}

impl FieldSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::PointerChain => "pointer_chain",
        }
    }

    fn parse(text: &str, field: &str) -> Result<Self, MemoryError> {
        match text.trim().to_lowercase().as_str() {
            "address" => Ok(Self::Address),
            "pointer_chain" => Ok(Self::PointerChain),
            other => Err(MemoryError::Profile(format!(
                "Unsupported field source '{other}' in field '{field}'. \
                 Supported: address|pointer_chain."
            ))),
        }
    }
}

/// Typed width of a field value. Little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    fn parse(text: &str, field: &str) -> Result<Self, MemoryError> {
        match text.trim().to_lowercase().as_str() {
            "int32" => Ok(Self::Int32),
            "uint32" => Ok(Self::Uint32),
            "float32" => Ok(Self::Float32),
            "float64" => Ok(Self::Float64),
            other => Err(MemoryError::Profile(format!(
                "Unsupported field type '{other}' in field '{field}'. \
                 Supported: int32|uint32|float32|float64."
            ))),
        }
    }

    pub fn width(self) -> usize {
        match self {
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Decode a little-endian raw value into a JSON number.
    pub fn decode_le(self, raw: &[u8]) -> Result<Value, MemoryError> {
        let expect_len = self.width();
        if raw.len() != expect_len {
            return Err(MemoryError::Backend(format!(
                "decode expects {expect_len} bytes, got {}",
                raw.len()
            )));
        }
        let value = match self {
            Self::Int32 => {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(raw);
                Value::from(i32::from_le_bytes(bytes))
            }
            Self::Uint32 => {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(raw);
                Value::from(u32::from_le_bytes(bytes))
            }
            Self::Float32 => {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(raw);
                Value::from(f64::from(f32::from_le_bytes(bytes)))
            }
            Self::Float64 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(raw);
                Value::from(f64::from_le_bytes(bytes))
            }
        };
        Ok(value)
    }
}

/// One field binding inside a profile.
#[derive(Debug, Clone)]
pub struct MemoryFieldSpec {
    pub name: String,
    pub source: FieldSource,
    pub value_type: FieldType,
    pub address: u64,
    pub offsets: Vec<i64>,
    pub relative_to_module: bool,
}

impl MemoryFieldSpec {
    /// Parse one field spec from its payload object.
    pub fn from_value(name: &str, payload: &Value) -> Result<Self, MemoryError> {
        let object = payload.as_object().ok_or_else(|| {
            MemoryError::Profile(format!("Field '{name}' must be an object."))
        })?;

        let source = FieldSource::parse(
            object.get("source").and_then(Value::as_str).unwrap_or("address"),
            name,
        )?;
        let value_type = FieldType::parse(
            object.get("type").and_then(Value::as_str).unwrap_or("int32"),
            name,
        )?;

        let raw_address = object
            .get("address")
            .or_else(|| object.get("base_address"))
            .cloned()
            .unwrap_or(Value::from(0));
        let address = parse_flexible_int(&raw_address, &format!("{name}.address"))? as u64;

        let mut offsets = Vec::new();
        if let Some(raw_offsets) = object.get("offsets").and_then(Value::as_array) {
            for item in raw_offsets {
                offsets.push(parse_flexible_int(item, &format!("{name}.offsets[]"))?);
            }
        }

        Ok(Self {
            name: name.to_string(),
            source,
            value_type,
            address,
            offsets,
            relative_to_module: object
                .get("relative_to_module")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    /// A field is resolved when its base address is a real address, not
    /// zero or a placeholder sentinel.
    pub fn resolved(&self) -> bool {
        !is_placeholder_address(self.address)
    }

    /// Round-trip the spec back into payload form (used when merging
    /// calibration overrides on top of a base field).
    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "source": self.source.as_str(),
            "type": self.value_type.as_str(),
            "address": self.address,
            "offsets": self.offsets,
            "relative_to_module": self.relative_to_module,
        })
    }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(text) => Some(vec![text.clone()]),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect(),
        ),
        _ => None,
    }
}

/// Normalize a field-name list: trimmed, non-empty, deduplicated in order.
pub fn normalize_field_names(
    raw: Option<Vec<String>>,
    label: &str,
    fallback: &[String],
    allow_empty: bool,
) -> Result<Vec<String>, MemoryError> {
    let source = match raw {
        Some(items) => items,
        None => return Ok(fallback.to_vec()),
    };

    let mut out: Vec<String> = Vec::new();
    for (index, item) in source.iter().enumerate() {
        let name = item.trim().to_string();
        if name.is_empty() {
            return Err(MemoryError::Profile(format!(
                "{label}[{index}] must be non-empty."
            )));
        }
        if !out.contains(&name) {
            out.push(name);
        }
    }

    if !out.is_empty() {
        return Ok(out);
    }
    if allow_empty {
        return Ok(Vec::new());
    }
    if !fallback.is_empty() {
        return Ok(fallback.to_vec());
    }
    Err(MemoryError::Profile(format!(
        "{label} must include at least one field."
    )))
}

/// Resolve the `(required, optional)` combat field sets for a payload,
/// honoring legacy key aliases and keeping the sets disjoint.
pub fn resolve_combat_field_sets(
    payload: &Value,
    default_required: &[String],
    default_optional: &[String],
    label_prefix: &str,
) -> Result<(Vec<String>, Vec<String>), MemoryError> {
    let raw_required = payload
        .get("required_combat_fields")
        .or_else(|| payload.get("required_fields"))
        .and_then(string_list);
    let raw_optional = payload
        .get("optional_combat_fields")
        .or_else(|| payload.get("optional_fields"))
        .and_then(string_list);

    let required = normalize_field_names(
        raw_required,
        &format!("{label_prefix}.required_combat_fields"),
        default_required,
        false,
    )?;
    let optional = normalize_field_names(
        raw_optional,
        &format!("{label_prefix}.optional_combat_fields"),
        default_optional,
        true,
    )?;
    let optional_without_required = optional
        .into_iter()
        .filter(|name| !required.contains(name))
        .collect();
    Ok((required, optional_without_required))
}

/// Default field-name vectors as owned strings.
pub fn default_required_fields() -> Vec<String> {
    DEFAULT_REQUIRED_COMBAT_FIELDS
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

pub fn default_optional_fields() -> Vec<String> {
    DEFAULT_OPTIONAL_COMBAT_FIELDS
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

/// A parsed signature profile.
#[derive(Debug, Clone)]
pub struct MemoryProfile {
    pub id: String,
    pub process_name: String,
    pub module_name: String,
    pub poll_ms: u64,
    pub required_admin: bool,
    /// 0 means "use the native pointer width"; otherwise 4 or 8.
    pub pointer_size: u32,
    pub required_combat_fields: Vec<String>,
    pub optional_combat_fields: Vec<String>,
    pub fields: BTreeMap<String, MemoryFieldSpec>,
}

impl MemoryProfile {
    /// Parse one profile object from the signatures payload.
    pub fn from_value(
        payload: &Value,
        default_process_name: &str,
        default_required: &[String],
        default_optional: &[String],
    ) -> Result<Self, MemoryError> {
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("")
            .to_string();
        if id.is_empty() {
            return Err(MemoryError::Profile(
                "Signature profile missing non-empty 'id'.".to_string(),
            ));
        }

        let process_name = non_empty_or(
            payload.get("process_name").and_then(Value::as_str),
            default_process_name,
        );
        let module_name = non_empty_or(
            payload.get("module_name").and_then(Value::as_str),
            &process_name,
        );

        let poll_ms = payload
            .get("poll_ms")
            .map(|v| parse_flexible_int(v, &format!("profile '{id}'.poll_ms")))
            .transpose()?
            .unwrap_or(1000)
            .max(200) as u64;
        let required_admin = payload
            .get("required_admin")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let pointer_size = payload
            .get("pointer_size")
            .or_else(|| payload.get("pointer_size_bytes"))
            .map(|v| parse_flexible_int(v, &format!("profile '{id}'.pointer_size")))
            .transpose()?
            .unwrap_or(0);
        if ![0, 4, 8].contains(&pointer_size) {
            return Err(MemoryError::Profile(format!(
                "Signature profile '{id}' has invalid pointer_size={pointer_size}; \
                 expected 4 or 8."
            )));
        }

        let raw_fields = payload.get("fields").and_then(Value::as_object);
        let raw_fields = match raw_fields {
            Some(map) if !map.is_empty() => map,
            _ => {
                return Err(MemoryError::Profile(format!(
                    "Signature profile '{id}' has empty or invalid 'fields'."
                )))
            }
        };

        let mut fields = BTreeMap::new();
        for (field_name, field_payload) in raw_fields {
            fields.insert(
                field_name.clone(),
                MemoryFieldSpec::from_value(field_name, field_payload)?,
            );
        }

        let (required_combat_fields, optional_combat_fields) = resolve_combat_field_sets(
            payload,
            default_required,
            default_optional,
            &format!("profile '{id}'"),
        )?;

        Ok(Self {
            id,
            process_name,
            module_name,
            poll_ms,
            required_admin,
            pointer_size: pointer_size as u32,
            required_combat_fields,
            optional_combat_fields,
            fields,
        })
    }

    /// Fail unless every required field is present in `fields`.
    pub fn ensure_required_fields(&self, required: Option<&[String]>) -> Result<(), MemoryError> {
        let fields = required.unwrap_or(&self.required_combat_fields);
        let missing: Vec<&str> = fields
            .iter()
            .filter(|name| !self.fields.contains_key(*name))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MemoryError::Profile(format!(
                "Signature profile '{}' missing required fields: {}",
                self.id,
                missing.join(", ")
            )))
        }
    }

    /// Fail unless every required field is present and resolved.
    pub fn ensure_resolved(&self, required: Option<&[String]>) -> Result<(), MemoryError> {
        self.ensure_required_fields(required)?;
        let fields = required.unwrap_or(&self.required_combat_fields);
        let unresolved: Vec<&str> = fields
            .iter()
            .filter(|name| self.fields.get(*name).map_or(true, |spec| !spec.resolved()))
            .map(String::as_str)
            .collect();
        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(MemoryError::Profile(format!(
                "Signature profile '{}' unresolved fields: {}",
                self.id,
                unresolved.join(", ")
            )))
        }
    }
}

fn non_empty_or(value: Option<&str>, fallback: &str) -> String {
    let trimmed = value.unwrap_or("").trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Load one profile from a `memory_signatures` payload: by id when given,
/// else by process-name match, else the first valid profile.
pub fn load_memory_profile(
    signatures_payload: &Value,
    process_name: &str,
    profile_id: &str,
) -> Result<MemoryProfile, MemoryError> {
    let payload = signatures_payload.as_object().ok_or_else(|| {
        MemoryError::Profile("memory_signatures payload must be a JSON object.".to_string())
    })?;

    let schema_version = payload
        .get("schema_version")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("live_memory_v1");
    if !SUPPORTED_MEMORY_SIGNATURE_SCHEMAS.contains(&schema_version) {
        return Err(MemoryError::Profile(format!(
            "Unsupported memory_signatures schema_version '{schema_version}'. Supported: {}",
            SUPPORTED_MEMORY_SIGNATURE_SCHEMAS.join(", ")
        )));
    }

    let (default_required, default_optional) = resolve_combat_field_sets(
        signatures_payload,
        &default_required_fields(),
        &default_optional_fields(),
        &format!("memory_signatures[{schema_version}]"),
    )?;

    let raw_profiles = payload.get("profiles").and_then(Value::as_array);
    let raw_profiles = match raw_profiles {
        Some(items) if !items.is_empty() => items,
        _ => {
            return Err(MemoryError::Profile(
                "memory_signatures payload has no profiles.".to_string(),
            ))
        }
    };

    let mut parsed: Vec<MemoryProfile> = Vec::new();
    for item in raw_profiles {
        if !item.is_object() {
            continue;
        }
        parsed.push(MemoryProfile::from_value(
            item,
            process_name,
            &default_required,
            &default_optional,
        )?);
    }
    if parsed.is_empty() {
        return Err(MemoryError::Profile(
            "memory_signatures payload contains no valid profiles.".to_string(),
        ));
    }

    let requested_id = profile_id.trim();
    if !requested_id.is_empty() {
        return parsed
            .into_iter()
            .find(|profile| profile.id == requested_id)
            .ok_or_else(|| {
                MemoryError::Profile(format!(
                    "Requested signature profile not found: {requested_id}"
                ))
            });
    }

    let requested_process = process_name.trim().to_lowercase();
    if !requested_process.is_empty() {
        if let Some(index) = parsed
            .iter()
            .position(|profile| profile.process_name.trim().to_lowercase() == requested_process)
        {
            return Ok(parsed.swap_remove(index));
        }
    }

    Ok(parsed.swap_remove(0))
}
