//! `Parameter` / `ParameterFile` (spec.md §3) and their priority ordering.

use serde_yaml::Value;

use crate::error::SourceLocation;

/// Priority tag, ordered low -> high exactly as spec.md §3/§4.H specify.
/// `Ord` on the derived discriminant matches that ordering, so sorting a
/// node's parameter list by `parameter_type` produces the launch-ready
/// ascending-priority order (spec.md §8 property 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterType {
    Default,
    DefaultFile,
    OverrideFile,
    Override,
    ModeFile,
    Mode,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterDataType {
    String,
    Bool,
    Int,
    Double,
    IntArray,
    DoubleArray,
    StringArray,
    BoolArray,
    /// Untyped `array`, the original's catch-all array type.
    Array,
    Directory,
}

impl ParameterDataType {
    /// Parses a `type:` field value, matching
    /// `parameter_types.py::ALLOWED_PARAMETER_TYPES` exactly (including its
    /// numeric-width and C-style aliases) and its `normalize_type_name`
    /// (`.strip().lower()`), so `type: Int32` and `type: int32` both resolve.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "string" | "str" => Some(Self::String),
            "bool" | "boolean" => Some(Self::Bool),
            "int" | "integer" | "int8" | "int16" | "int32" | "int64" | "uint8" | "uint16"
            | "uint32" | "uint64" | "short" | "long" => Some(Self::Int),
            "float" | "double" | "float32" | "float64" => Some(Self::Double),
            "int_array" => Some(Self::IntArray),
            "double_array" => Some(Self::DoubleArray),
            "string_array" => Some(Self::StringArray),
            "bool_array" => Some(Self::BoolArray),
            "array" => Some(Self::Array),
            "directory" => Some(Self::Directory),
            _ => None,
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Double)
    }

    fn is_integer(self) -> bool {
        matches!(self, Self::Int)
    }
}

/// Coerces a parameter `value` to match its declared numeric `data_type`,
/// rejecting values that are non-integral for an integer type (spec.md §9
/// "integer parameter types must refuse non-integral values"). Non-numeric
/// types and untyped parameters pass through unchanged. Mirrors
/// `parameter_types.py::coerce_numeric_value`, except a quoted or literal
/// float form (`"1.0"`, `1.0`) is rejected for an integer type outright
/// rather than accepted when numerically whole, per spec.md §9's stricter
/// textual-integrality rule.
pub fn coerce_numeric_value(value: &Value, data_type: Option<ParameterDataType>) -> std::result::Result<Value, String> {
    let Some(data_type) = data_type else { return Ok(value.clone()) };
    if !data_type.is_numeric() {
        return Ok(value.clone());
    }
    match value {
        Value::Bool(b) => Err(format!("invalid numeric value '{b}' for type '{data_type:?}'")),
        Value::Number(n) => {
            if data_type.is_integer() {
                n.as_i64()
                    .map(Value::from)
                    .or_else(|| n.as_u64().map(Value::from))
                    .ok_or_else(|| format!("non-integral value '{n:?}' for type '{data_type:?}'"))
            } else {
                n.as_f64()
                    .map(Value::from)
                    .ok_or_else(|| format!("invalid numeric value for type '{data_type:?}'"))
            }
        }
        Value::String(s) => {
            let text = s.trim();
            if text.is_empty() {
                return Err(format!("empty numeric value for type '{data_type:?}'"));
            }
            if data_type.is_integer() {
                text.parse::<i64>().map(Value::from).map_err(|_| {
                    if text.contains('.') || text.contains(['e', 'E']) {
                        format!("non-integral value '{s}' for type '{data_type:?}'")
                    } else {
                        format!("invalid numeric value '{s}' for type '{data_type:?}'")
                    }
                })
            } else {
                text.parse::<f64>()
                    .map(Value::from)
                    .map_err(|_| format!("invalid numeric value '{s}' for type '{data_type:?}'"))
            }
        }
        Value::Null => Ok(value.clone()),
        other => Err(format!("invalid numeric value '{other:?}' for type '{data_type:?}'")),
    }
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
    pub data_type: Option<ParameterDataType>,
    pub parameter_type: ParameterType,
    pub source: Option<SourceLocation>,
}

#[derive(Debug, Clone)]
pub struct ParameterFile {
    pub name: String,
    pub path: String,
    pub parameter_type: ParameterType,
    pub allow_substs: bool,
    pub is_override: bool,
    pub source: Option<SourceLocation>,
}
