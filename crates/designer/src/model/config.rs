//! The `Config` sum type (spec.md §3) and its four entity kinds.
//!
//! `Config` is deliberately a sum type, never a subtype hierarchy (spec.md
//! §9: "represent `Config` as a sum type; never subtype"). List-valued
//! fields that variant/mode resolution merges or removes from (`inputs`,
//! `components`, `connections`, ...) are kept as `serde_yaml::Mapping`
//! rather than fully-typed structs, mirroring the reference implementation's
//! own dict-based merge rules (keyed by a `name` field) instead of
//! reimplementing field-by-field merge logic per struct.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::SourceLocation;

/// 1-based line/column of a value in its originating YAML file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
}

/// JSON-pointer-like path (`/components/0/entity`) → source position.
pub type SourceMap = HashMap<String, SourcePosition>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubType {
    Base,
    Variant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Node,
    Module,
    ParameterSet,
    System,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::Module => "module",
            EntityKind::ParameterSet => "parameter_set",
            EntityKind::System => "system",
        }
    }

    pub fn file_suffix(self) -> &'static str {
        match self {
            EntityKind::Node => ".node.yaml",
            EntityKind::Module => ".module.yaml",
            EntityKind::ParameterSet => ".parameter_set.yaml",
            EntityKind::System => ".system.yaml",
        }
    }
}

/// Fields shared by every entity kind (spec.md §3 "Shared fields").
#[derive(Debug, Clone)]
pub struct ConfigCommon {
    pub name: String,
    pub full_name: String,
    pub file_path: PathBuf,
    pub package: Option<String>,
    pub source_map: SourceMap,
    /// The raw YAML tree, retained so resolvers can still look up
    /// overrides/removals by yaml_path after typed fields are extracted.
    pub raw: Value,
    pub sub_type: SubType,
}

impl ConfigCommon {
    pub fn location(&self, yaml_path: &str) -> SourceLocation {
        let mut loc = SourceLocation::new(self.file_path.clone()).with_yaml_path(yaml_path);
        if let Some(pos) = self.source_map.get(yaml_path) {
            loc = loc.with_position(pos.line, pos.column);
        }
        loc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageResolution {
    Source,
    Installed,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub common: ConfigCommon,
    pub launch: Mapping,
    pub inputs: Vec<Mapping>,
    pub outputs: Vec<Mapping>,
    pub parameter_files: Vec<Mapping>,
    pub parameters: Vec<Mapping>,
    pub processes: Vec<Mapping>,
    pub package_name: Option<String>,
    pub package_provider: Option<String>,
    pub package_resolution: Option<PackageResolution>,
}

#[derive(Debug, Clone, Default)]
pub struct ExternalInterfaces {
    pub input: Vec<Mapping>,
    pub output: Vec<Mapping>,
}

#[derive(Debug, Clone)]
pub struct ModuleConfig {
    pub common: ConfigCommon,
    pub instances: Vec<Mapping>,
    pub external_interfaces: ExternalInterfaces,
    pub connections: Vec<Mapping>,
}

#[derive(Debug, Clone)]
pub struct ParameterSetConfig {
    pub common: ConfigCommon,
    pub parameters: Vec<Mapping>,
    pub local_variables: Vec<Mapping>,
}

#[derive(Debug, Clone, Default)]
pub struct ModeDecl {
    pub name: String,
    pub is_default: bool,
}

#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub common: ConfigCommon,
    pub components: Vec<Mapping>,
    pub connections: Vec<Mapping>,
    pub variables: Vec<Mapping>,
    pub variable_files: Vec<String>,
    pub modes: Vec<Mapping>,
    /// mode name -> `{override?, remove?}` bundle.
    pub mode_configs: Mapping,
    pub arguments: Vec<Mapping>,
    pub parameter_sets: Vec<Mapping>,
}

#[derive(Debug, Clone)]
pub enum Config {
    Node(NodeConfig),
    Module(ModuleConfig),
    ParameterSet(ParameterSetConfig),
    System(SystemConfig),
}

impl Config {
    pub fn kind(&self) -> EntityKind {
        match self {
            Config::Node(_) => EntityKind::Node,
            Config::Module(_) => EntityKind::Module,
            Config::ParameterSet(_) => EntityKind::ParameterSet,
            Config::System(_) => EntityKind::System,
        }
    }

    pub fn common(&self) -> &ConfigCommon {
        match self {
            Config::Node(c) => &c.common,
            Config::Module(c) => &c.common,
            Config::ParameterSet(c) => &c.common,
            Config::System(c) => &c.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut ConfigCommon {
        match self {
            Config::Node(c) => &mut c.common,
            Config::Module(c) => &mut c.common,
            Config::ParameterSet(c) => &mut c.common,
            Config::System(c) => &mut c.common,
        }
    }

    pub fn name(&self) -> &str {
        &self.common().name
    }

    pub fn full_name(&self) -> &str {
        &self.common().full_name
    }

    pub fn as_node(&self) -> Option<&NodeConfig> {
        match self {
            Config::Node(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_module(&self) -> Option<&ModuleConfig> {
        match self {
            Config::Module(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_system(&self) -> Option<&SystemConfig> {
        match self {
            Config::System(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_system_mut(&mut self) -> Option<&mut SystemConfig> {
        match self {
            Config::System(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_parameter_set(&self) -> Option<&ParameterSetConfig> {
        match self {
            Config::ParameterSet(c) => Some(c),
            _ => None,
        }
    }
}

/// Reads a mapping field from `value` as a `Vec<Mapping>`, tolerating both
/// absent keys and items that are plain scalars (kept as a synthetic
/// `{"name": scalar}` wrapper so keyed merge logic stays uniform).
pub fn field_as_mapping_list(value: &Mapping, key: &str) -> Vec<Mapping> {
    let Some(Value::Sequence(items)) = value.get(Value::from(key)) else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| match item {
            Value::Mapping(m) => m.clone(),
            other => {
                let mut m = Mapping::new();
                m.insert(Value::from("name"), other.clone());
                m
            }
        })
        .collect()
}

pub fn field_as_mapping(value: &Mapping, key: &str) -> Mapping {
    match value.get(Value::from(key)) {
        Some(Value::Mapping(m)) => m.clone(),
        _ => Mapping::new(),
    }
}

pub fn field_as_string_list(value: &Mapping, key: &str) -> Vec<String> {
    let Some(Value::Sequence(items)) = value.get(Value::from(key)) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|v| v.as_str().map(str::to_owned))
        .collect()
}

pub fn mapping_get_str<'a>(mapping: &'a Mapping, key: &str) -> Option<&'a str> {
    mapping.get(Value::from(key)).and_then(Value::as_str)
}
