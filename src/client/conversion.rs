// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Value codec.
//!
//! Turns user-entered text into the scalar type a node declares, and renders
//! typed values, data types and status codes for display.
//!
//! Declared type names are matched case-insensitively by substring. Several
//! names contain each other (`SByte`/`Byte`/`ByteString`, `UInt32`/`Int32`),
//! so [`ScalarType::from_declared`] checks the more specific token first.
//!
//! # Examples
//!
//! ```
//! use ua_inspector::client::{coerce, OpcUaValue};
//!
//! assert_eq!(coerce("true", "Boolean"), OpcUaValue::Boolean(true));
//! assert_eq!(coerce("123", "Int32"), OpcUaValue::Int32(123));
//! assert_eq!(coerce("abc", "Int32"), OpcUaValue::String("abc".into()));
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::ConversionError;
use crate::types::{NodeId, NodeIdentifier, StatusCode};

use super::transport::OpcUaValue;

// =============================================================================
// ScalarType
// =============================================================================

/// Scalar types the codec can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// Boolean.
    Boolean,
    /// Signed byte.
    SByte,
    /// Unsigned byte.
    Byte,
    /// 16-bit signed integer.
    Int16,
    /// 16-bit unsigned integer.
    UInt16,
    /// 32-bit signed integer.
    Int32,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit unsigned integer.
    UInt64,
    /// 32-bit float.
    Float,
    /// 64-bit double.
    Double,
    /// String.
    String,
    /// Date/time.
    DateTime,
    /// GUID.
    Guid,
}

/// Match order for declared type names. Longer tokens precede the tokens
/// they contain.
const MATCH_ORDER: &[(&str, Option<ScalarType>)] = &[
    ("boolean", Some(ScalarType::Boolean)),
    ("sbyte", Some(ScalarType::SByte)),
    ("bytestring", None),
    ("byte", Some(ScalarType::Byte)),
    ("uint64", Some(ScalarType::UInt64)),
    ("uint32", Some(ScalarType::UInt32)),
    ("uint16", Some(ScalarType::UInt16)),
    ("int64", Some(ScalarType::Int64)),
    ("int32", Some(ScalarType::Int32)),
    ("int16", Some(ScalarType::Int16)),
    ("float", Some(ScalarType::Float)),
    ("double", Some(ScalarType::Double)),
    ("datetime", Some(ScalarType::DateTime)),
    ("guid", Some(ScalarType::Guid)),
    ("string", Some(ScalarType::String)),
];

impl ScalarType {
    /// Resolves a declared type name. Returns `None` for empty or unknown names.
    pub fn from_declared(declared_type: &str) -> Option<Self> {
        let declared = declared_type.trim().to_ascii_lowercase();
        if declared.is_empty() {
            return None;
        }

        MATCH_ORDER
            .iter()
            .find(|(token, _)| declared.contains(token))
            .and_then(|(_, scalar)| *scalar)
    }

    /// Returns the canonical name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "Boolean",
            Self::SByte => "SByte",
            Self::Byte => "Byte",
            Self::Int16 => "Int16",
            Self::UInt16 => "UInt16",
            Self::Int32 => "Int32",
            Self::UInt32 => "UInt32",
            Self::Int64 => "Int64",
            Self::UInt64 => "UInt64",
            Self::Float => "Float",
            Self::Double => "Double",
            Self::String => "String",
            Self::DateTime => "DateTime",
            Self::Guid => "Guid",
        }
    }

    /// Parses text into this type.
    pub fn parse(&self, text: &str) -> Result<OpcUaValue, ConversionError> {
        let trimmed = text.trim();
        let fail = || ConversionError::parse_failed(text, self.name());

        let value = match self {
            Self::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" => OpcUaValue::Boolean(true),
                "false" => OpcUaValue::Boolean(false),
                _ => return Err(fail()),
            },
            Self::SByte => OpcUaValue::SByte(parse_number(trimmed).ok_or_else(fail)?),
            Self::Byte => OpcUaValue::Byte(parse_number(trimmed).ok_or_else(fail)?),
            Self::Int16 => OpcUaValue::Int16(parse_number(trimmed).ok_or_else(fail)?),
            Self::UInt16 => OpcUaValue::UInt16(parse_number(trimmed).ok_or_else(fail)?),
            Self::Int32 => OpcUaValue::Int32(parse_number(trimmed).ok_or_else(fail)?),
            Self::UInt32 => OpcUaValue::UInt32(parse_number(trimmed).ok_or_else(fail)?),
            Self::Int64 => OpcUaValue::Int64(parse_number(trimmed).ok_or_else(fail)?),
            Self::UInt64 => OpcUaValue::UInt64(parse_number(trimmed).ok_or_else(fail)?),
            Self::Float => OpcUaValue::Float(parse_number(trimmed).ok_or_else(fail)?),
            Self::Double => OpcUaValue::Double(parse_number(trimmed).ok_or_else(fail)?),
            Self::String => OpcUaValue::String(text.to_string()),
            Self::DateTime => OpcUaValue::DateTime(parse_date_time(trimmed).ok_or_else(fail)?),
            Self::Guid => OpcUaValue::Guid(uuid::Uuid::parse_str(trimmed).map_err(|_| fail())?),
        };
        Ok(value)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn parse_number<T: FromStr>(text: &str) -> Option<T> {
    text.parse().ok()
}

fn parse_date_time(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

// =============================================================================
// Coercion
// =============================================================================

/// Parses `text` as `declared_type`, reporting why it could not.
pub fn try_coerce(text: &str, declared_type: &str) -> Result<OpcUaValue, ConversionError> {
    match ScalarType::from_declared(declared_type) {
        Some(scalar) => scalar.parse(text),
        None => Err(ConversionError::type_mismatch(
            "a known scalar type",
            if declared_type.trim().is_empty() {
                "<empty>"
            } else {
                declared_type
            },
        )),
    }
}

/// Converts text into the declared scalar type.
///
/// Never fails: on a parse failure, or when the declared type is empty or
/// unknown, the original text is returned unchanged as a `String` and the
/// server decides whether to accept it.
pub fn coerce(text: &str, declared_type: &str) -> OpcUaValue {
    match try_coerce(text, declared_type) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(declared_type, error = %e, "Passing value through as text");
            OpcUaValue::String(text.to_string())
        }
    }
}

/// Renders a value for display. Arrays render element-wise; null renders empty.
pub fn format_value(value: &OpcUaValue) -> String {
    match value {
        OpcUaValue::Null => String::new(),
        OpcUaValue::ByteString(bytes) => hex::encode_upper(bytes),
        OpcUaValue::Array(items) => {
            let parts: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", parts.join(", "))
        }
        other => other.to_string(),
    }
}

// =============================================================================
// Data type naming
// =============================================================================

/// Names of the namespace-0 built-in data types.
const BUILTIN_DATA_TYPES: &[(u32, &str)] = &[
    (1, "Boolean"),
    (2, "SByte"),
    (3, "Byte"),
    (4, "Int16"),
    (5, "UInt16"),
    (6, "Int32"),
    (7, "UInt32"),
    (8, "Int64"),
    (9, "UInt64"),
    (10, "Float"),
    (11, "Double"),
    (12, "String"),
    (13, "DateTime"),
    (14, "Guid"),
    (15, "ByteString"),
    (16, "XmlElement"),
    (17, "NodeId"),
    (18, "ExpandedNodeId"),
    (19, "StatusCode"),
    (20, "QualifiedName"),
    (21, "LocalizedText"),
    (24, "BaseDataType"),
];

/// Renders a DataType attribute as a readable type name.
///
/// Built-in types map to their names, other namespace-0 ids to `Type_<id>`,
/// ids in other namespaces to their node id string, and a missing or null
/// id to `Unknown`.
pub fn data_type_name(data_type: Option<&NodeId>) -> String {
    let Some(node_id) = data_type.filter(|id| !id.is_null()) else {
        return "Unknown".to_string();
    };

    if node_id.namespace_index != 0 {
        return node_id.to_string();
    }

    match &node_id.identifier {
        NodeIdentifier::Numeric(id) => BUILTIN_DATA_TYPES
            .iter()
            .find(|(known, _)| known == id)
            .map(|(_, name)| (*name).to_string())
            .unwrap_or_else(|| format!("Type_{}", id)),
        other => format!("Type_{}", other),
    }
}

// =============================================================================
// Quality
// =============================================================================

/// Coarse quality of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Quality {
    /// Value is usable.
    #[default]
    Good,
    /// Value may be usable.
    Uncertain,
    /// Value should not be used.
    Bad,
}

impl Quality {
    /// Classifies a status code.
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_bad() {
            Self::Bad
        } else if status.is_uncertain() {
            Self::Uncertain
        } else {
            Self::Good
        }
    }

    /// Returns `true` if the value is usable (good or uncertain).
    #[inline]
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Bad)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => write!(f, "Good"),
            Self::Uncertain => write!(f, "Uncertain"),
            Self::Bad => write!(f, "Bad"),
        }
    }
}

/// Renders a status code as quality text: the specific name when known,
/// otherwise the severity class.
pub fn quality_text(status: StatusCode) -> String {
    status.name().to_string()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_basic() {
        assert_eq!(coerce("true", "Boolean"), OpcUaValue::Boolean(true));
        assert_eq!(coerce("FALSE", "boolean"), OpcUaValue::Boolean(false));
        assert_eq!(coerce("123", "Int32"), OpcUaValue::Int32(123));
        assert_eq!(coerce(" -7 ", "Int16"), OpcUaValue::Int16(-7));
        assert_eq!(coerce("2.5", "Double"), OpcUaValue::Double(2.5));
        assert_eq!(coerce("2.5", "Float"), OpcUaValue::Float(2.5));
        assert_eq!(coerce("hello", "String"), OpcUaValue::String("hello".into()));
    }

    #[test]
    fn test_coerce_failure_returns_text() {
        assert_eq!(coerce("abc", "Int32"), OpcUaValue::String("abc".into()));
        assert_eq!(coerce("yes", "Boolean"), OpcUaValue::String("yes".into()));
        assert_eq!(coerce("300", "Byte"), OpcUaValue::String("300".into()));
        assert_eq!(coerce("-1", "UInt32"), OpcUaValue::String("-1".into()));
        assert_eq!(coerce("42", ""), OpcUaValue::String("42".into()));
        assert_eq!(coerce("42", "Structure"), OpcUaValue::String("42".into()));
    }

    #[test]
    fn test_specific_tokens_win() {
        assert_eq!(ScalarType::from_declared("SByte"), Some(ScalarType::SByte));
        assert_eq!(ScalarType::from_declared("Byte"), Some(ScalarType::Byte));
        assert_eq!(ScalarType::from_declared("ByteString"), None);
        assert_eq!(ScalarType::from_declared("UInt16"), Some(ScalarType::UInt16));
        assert_eq!(ScalarType::from_declared("UInt32"), Some(ScalarType::UInt32));
        assert_eq!(ScalarType::from_declared("UInt64"), Some(ScalarType::UInt64));
        assert_eq!(ScalarType::from_declared("Int64"), Some(ScalarType::Int64));
        assert_eq!(ScalarType::from_declared("DateTime"), Some(ScalarType::DateTime));
        assert_eq!(ScalarType::from_declared("  "), None);

        assert_eq!(coerce("-5", "SByte"), OpcUaValue::SByte(-5));
        assert_eq!(coerce("4000000000", "UInt32"), OpcUaValue::UInt32(4_000_000_000));
        assert_eq!(coerce("0A0B", "ByteString"), OpcUaValue::String("0A0B".into()));
    }

    #[test]
    fn test_coerce_date_time_and_guid() {
        match coerce("2024-03-01T12:00:00Z", "DateTime") {
            OpcUaValue::DateTime(dt) => assert_eq!(dt.to_rfc3339(), "2024-03-01T12:00:00+00:00"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            coerce("2024-03-01 08:30:00", "DateTime"),
            OpcUaValue::DateTime(_)
        ));
        assert!(matches!(
            coerce("550e8400-e29b-41d4-a716-446655440000", "Guid"),
            OpcUaValue::Guid(_)
        ));
    }

    #[test]
    fn test_try_coerce_reports_reason() {
        assert!(matches!(
            try_coerce("abc", "Int32"),
            Err(ConversionError::ParseFailed { .. })
        ));
        assert!(matches!(
            try_coerce("abc", ""),
            Err(ConversionError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_data_type_name() {
        assert_eq!(data_type_name(Some(&NodeId::numeric(0, 6))), "Int32");
        assert_eq!(data_type_name(Some(&NodeId::numeric(0, 21))), "LocalizedText");
        assert_eq!(data_type_name(Some(&NodeId::numeric(0, 884))), "Type_884");
        assert_eq!(data_type_name(Some(&NodeId::numeric(2, 3001))), "ns=2;i=3001");
        assert_eq!(data_type_name(Some(&NodeId::null())), "Unknown");
        assert_eq!(data_type_name(None), "Unknown");
    }

    #[test]
    fn test_quality() {
        assert_eq!(Quality::from_status(StatusCode::GOOD), Quality::Good);
        assert_eq!(
            Quality::from_status(StatusCode::UNCERTAIN_LAST_USABLE_VALUE),
            Quality::Uncertain
        );
        assert_eq!(Quality::from_status(StatusCode::BAD_TIMEOUT), Quality::Bad);
        assert!(!Quality::Bad.is_usable());
        assert_eq!(quality_text(StatusCode::BAD_NODE_ID_UNKNOWN), "BadNodeIdUnknown");
        assert_eq!(quality_text(StatusCode(0x4001_0000)), "Uncertain");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&OpcUaValue::Null), "");
        assert_eq!(format_value(&OpcUaValue::ByteString(vec![0x0A, 0xFF])), "0AFF");
        assert_eq!(
            format_value(&OpcUaValue::Array(vec![
                OpcUaValue::Int32(1),
                OpcUaValue::Int32(2)
            ])),
            "[1, 2]"
        );
    }
}
