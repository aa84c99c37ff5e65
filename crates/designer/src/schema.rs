//! Component B (spec.md §4.B): format-version compatibility and the
//! semantic checks a JSON Schema cannot express.
//!
//! Grounded in `original_source/.../utils/format_version.py`. The crate does
//! not pull in a JSON-Schema-validation crate (none appears anywhere in the
//! example pack, and spec.md §4.B's structural rules — required fields,
//! closed enums, exactly-one-of constraints — are small enough to hand-roll
//! directly against the parsed `serde_yaml::Value`, matching the way the
//! teacher validates ebuild/profile structure by hand rather than via a
//! generic schema engine); this simplification is recorded in DESIGN.md.

use std::fmt;

use serde_yaml::{Mapping, Value};

use crate::error::{DesignerError, Result, SourceLocation};
use crate::model::{ConfigCommon, EntityKind};

/// The format-version major/minor/patch this build of the compiler
/// supports. Bump on breaking schema changes.
pub const SUPPORTED_FORMAT_VERSION: SemanticVersion = SemanticVersion {
    major: 0,
    minor: 2,
    patch: 0,
};

pub const FORMAT_VERSION_FIELD: &str = "autoware_system_design_format";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SemanticVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl SemanticVersion {
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let trimmed = raw.trim().trim_start_matches('v');
        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() != 3 {
            return Err(format!(
                "Invalid format version string: '{raw}'. Expected 'MAJOR.MINOR.PATCH' (e.g. '0.2.0')."
            ));
        }
        let parse_part = |s: &str| -> std::result::Result<u32, String> {
            s.parse::<u32>()
                .map_err(|_| format!("Invalid format version string: '{raw}'."))
        };
        Ok(Self {
            major: parse_part(parts[0])?,
            minor: parse_part(parts[1])?,
            patch: parse_part(parts[2])?,
        })
    }
}

/// Outcome of checking one file's declared format version against
/// [`SUPPORTED_FORMAT_VERSION`].
#[derive(Debug, Clone)]
pub struct VersionCheck {
    pub compatible: bool,
    pub message: String,
    pub minor_newer: bool,
}

/// Rules (spec.md §4.B): missing -> warning; major mismatch -> hard error;
/// minor-newer-than-supported -> warning recorded on the registry.
pub fn check_format_version(raw_version: Option<&str>) -> VersionCheck {
    let supported = SUPPORTED_FORMAT_VERSION;
    let Some(raw_version) = raw_version else {
        return VersionCheck {
            compatible: true,
            message: format!(
                "missing '{FORMAT_VERSION_FIELD}' field; consider adding '{FORMAT_VERSION_FIELD}: {supported}'"
            ),
            minor_newer: false,
        };
    };

    let file_version = match SemanticVersion::parse(raw_version) {
        Ok(v) => v,
        Err(message) => {
            return VersionCheck {
                compatible: false,
                message,
                minor_newer: false,
            }
        }
    };

    if file_version.major != supported.major {
        return VersionCheck {
            compatible: false,
            message: format!(
                "incompatible format version: file declares {file_version} but this tool \
                 supports major version {} (supported: {supported})",
                supported.major
            ),
            minor_newer: false,
        };
    }

    if file_version.minor > supported.minor {
        return VersionCheck {
            compatible: true,
            message: format!(
                "format version {file_version} has a newer minor version than the supported \
                 {supported}; some features may not be fully supported"
            ),
            minor_newer: true,
        };
    }

    VersionCheck {
        compatible: true,
        message: format!("format version {file_version} is compatible (supported: {supported})"),
        minor_newer: false,
    }
}

fn mapping_field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_mapping().and_then(|m| m.get(Value::from(key)))
}

/// Semantic checks beyond what a schema can express (spec.md §4.B).
pub fn validate_semantics(kind: EntityKind, common: &ConfigCommon, raw: &Value) -> Result<()> {
    match kind {
        EntityKind::Node => validate_node_semantics(common, raw),
        EntityKind::Module | EntityKind::System => validate_variant_forbidden_fields(kind, common, raw),
        EntityKind::ParameterSet => validate_parameter_set_semantics(common, raw),
    }
}

fn is_variant(raw: &Value) -> bool {
    mapping_field(raw, "base").is_some()
}

fn validate_node_semantics(common: &ConfigCommon, raw: &Value) -> Result<()> {
    if is_variant(raw) {
        return validate_variant_forbidden_fields(EntityKind::Node, common, raw);
    }
    let Some(launch) = mapping_field(raw, "launch").and_then(Value::as_mapping) else {
        return Err(DesignerError::NodeConfig {
            message: format!("node '{}' is missing required field 'launch'", common.name),
            location: Some(common.location("/launch")),
        });
    };
    let exclusive = ["plugin", "executable", "ros2_launch_file"];
    let present: Vec<&str> = exclusive
        .iter()
        .copied()
        .filter(|k| launch.contains_key(Value::from(*k)))
        .collect();
    if present.len() != 1 {
        return Err(DesignerError::NodeConfig {
            message: format!(
                "node '{}' launch must declare exactly one of {:?}, found {:?}",
                common.name, exclusive, present
            ),
            location: Some(common.location("/launch")),
        });
    }
    let use_container = launch
        .get(Value::from("use_container"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if use_container && !launch.contains_key(Value::from("container_name")) {
        return Err(DesignerError::NodeConfig {
            message: format!(
                "node '{}' sets launch.use_container but is missing launch.container_name",
                common.name
            ),
            location: Some(common.location("/launch")),
        });
    }

    if let Some(Value::Sequence(params)) = mapping_field(raw, "parameters") {
        for (idx, param) in params.iter().enumerate() {
            let Some(m) = param.as_mapping() else { continue };
            if let Some(type_name) = m.get(Value::from("type")).and_then(Value::as_str) {
                if crate::model::ParameterDataType::parse(type_name).is_none() {
                    return Err(DesignerError::NodeConfig {
                        message: format!(
                            "node '{}' parameter #{idx} has unknown type '{type_name}'",
                            common.name
                        ),
                        location: Some(common.location(&format!("/parameters/{idx}/type"))),
                    });
                }
            }
        }
    }
    Ok(())
}

/// A `Variant` config may only touch `override`/`remove`; any other
/// top-level field is forbidden (spec.md §3 "forbidden top-level fields
/// trip schema validation").
fn validate_variant_forbidden_fields(kind: EntityKind, common: &ConfigCommon, raw: &Value) -> Result<()> {
    if !is_variant(raw) {
        return Ok(());
    }
    let Some(mapping) = raw.as_mapping() else {
        return Ok(());
    };
    let allowed = [
        "base",
        "name",
        FORMAT_VERSION_FIELD,
        "override",
        "remove",
    ];
    for key in mapping.keys() {
        let Some(key) = key.as_str() else { continue };
        if !allowed.contains(&key) {
            return Err(DesignerError::Validation {
                message: format!(
                    "variant {} '{}' declares forbidden top-level field '{key}'; variant bodies \
                     may only modify 'override'/'remove'",
                    kind.as_str(),
                    common.name
                ),
                location: Some(common.location(&format!("/{key}"))),
            });
        }
    }
    Ok(())
}

fn validate_parameter_set_semantics(common: &ConfigCommon, raw: &Value) -> Result<()> {
    if is_variant(raw) {
        return validate_variant_forbidden_fields(EntityKind::ParameterSet, common, raw);
    }
    if let Some(Value::Sequence(entries)) = mapping_field(raw, "parameters") {
        for (idx, entry) in entries.iter().enumerate() {
            let Some(m) = entry.as_mapping() else { continue };
            require_single_node_target(common, m, idx)?;
        }
    }
    Ok(())
}

fn require_single_node_target(common: &ConfigCommon, entry: &Mapping, idx: usize) -> Result<()> {
    let node = entry.get(Value::from("node")).and_then(Value::as_str);
    match node {
        Some(n) if n.starts_with('/') || n == "*" => Ok(()),
        Some(n) => Err(DesignerError::ParameterConfig {
            message: format!(
                "parameter_set '{}' entry #{idx} targets '{n}', which is not an absolute namespace",
                common.name
            ),
            location: Some(common.location(&format!("/parameters/{idx}/node"))),
        }),
        None => Err(DesignerError::ParameterConfig {
            message: format!(
                "parameter_set '{}' entry #{idx} is missing required field 'node'",
                common.name
            ),
            location: Some(common.location(&format!("/parameters/{idx}"))),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_version_is_a_warning_not_an_error() {
        let check = check_format_version(None);
        assert!(check.compatible);
    }

    #[test]
    fn major_mismatch_is_incompatible() {
        let check = check_format_version(Some("9.0.0"));
        assert!(!check.compatible);
    }

    #[test]
    fn newer_minor_is_compatible_with_warning() {
        let check = check_format_version(Some("0.99.0"));
        assert!(check.compatible);
        assert!(check.minor_newer);
    }

    #[test]
    fn same_major_same_or_older_minor_is_fully_compatible() {
        let check = check_format_version(Some("0.2.0"));
        assert!(check.compatible);
        assert!(!check.minor_newer);
    }
}
