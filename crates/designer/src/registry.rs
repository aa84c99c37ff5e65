//! Component C (spec.md §4.C): the entity registry.
//!
//! Grounded in `original_source/.../models/parsing/data_parser.py`'s
//! `ConfigParser` (file -> typed `Config`) and
//! `.../builder/config/config_registry.py`'s `ConfigRegistry` (indexing,
//! duplicate detection, typed variant-resolving lookups, package-source
//! discovery).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::error::{DesignerError, Result, SourceLocation};
use crate::model::{
    coerce_numeric_value, field_as_mapping_list, field_as_string_list, Config, ConfigCommon,
    EntityKind, ExternalInterfaces, ModuleConfig, NodeConfig, PackageResolution,
    ParameterDataType, ParameterSetConfig, SubType, SystemConfig,
};
use crate::schema;
use crate::yaml::YamlLoader;

/// Splits `"my_node.module"` into `("my_node", EntityKind::Module)`, the
/// inverse of [`EntityKind::file_suffix`] minus the `.yaml` extension.
pub(crate) fn entity_name_decode(full_name: &str) -> Result<(String, EntityKind)> {
    let mut parts = full_name.splitn(2, '.');
    let (Some(name), Some(kind_str)) = (parts.next(), parts.next()) else {
        return Err(DesignerError::validation(format!(
            "invalid entity name format: '{full_name}'. Expected format: 'name.type'"
        )));
    };
    if name.trim().is_empty() {
        return Err(DesignerError::validation(format!(
            "config name cannot be empty in: '{full_name}'"
        )));
    }
    let kind = match kind_str {
        "node" => EntityKind::Node,
        "module" => EntityKind::Module,
        "parameter_set" => EntityKind::ParameterSet,
        "system" => EntityKind::System,
        other => {
            return Err(DesignerError::validation(format!(
                "invalid entity type: '{other}'. Valid types: node, module, parameter_set, system"
            )))
        }
    };
    Ok((name.to_string(), kind))
}

fn file_stem_entity_name(path: &Path) -> Result<String> {
    // `<name>.<kind>.yaml` -> stem is `<name>.<kind>`.
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            DesignerError::validation(format!("configuration file has no file stem: {}", path.display()))
        })
}

/// Coerces numeric `default`/`value` entries in a `parameters` list against
/// each entry's declared `type` (spec.md §9), raising
/// `DesignerError::ParameterConfig` with the entry's source location on a
/// non-integral value for an integer type. Mirrors
/// `data_parser.py::_normalize_param_list`.
fn normalize_param_list(common: &ConfigCommon, params: &mut [Mapping], base_path: &str) -> Result<()> {
    for (idx, param) in params.iter_mut().enumerate() {
        let Some(type_name) = param.get(Value::from("type")).and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let data_type = ParameterDataType::parse(&type_name);
        for key in ["default", "value"] {
            let Some(existing) = param.get(Value::from(key)).cloned() else { continue };
            match coerce_numeric_value(&existing, data_type) {
                Ok(coerced) => {
                    param.insert(Value::from(key), coerced);
                }
                Err(message) => {
                    return Err(DesignerError::ParameterConfig {
                        message,
                        location: Some(common.location(&format!("{base_path}/{idx}/{key}"))),
                    });
                }
            }
        }
    }
    Ok(())
}

fn parse_node(common: ConfigCommon, raw: &Value) -> Result<NodeConfig> {
    let mapping = raw.as_mapping().cloned().unwrap_or_default();
    let mut parameters = field_as_mapping_list(&mapping, "parameters");
    for param in parameters.iter_mut() {
        let has_default = param.contains_key(Value::from("default"));
        let has_value = param.contains_key(Value::from("value"));
        if has_default && !has_value {
            let default = param.get(Value::from("default")).cloned().unwrap();
            param.insert(Value::from("value"), default);
        }
    }
    normalize_param_list(&common, &mut parameters, "/parameters")?;

    let pkg_info = mapping.get(Value::from("package")).and_then(Value::as_mapping);
    let package_name = pkg_info
        .and_then(|m| m.get(Value::from("name")))
        .and_then(Value::as_str)
        .map(str::to_string);
    let package_provider = pkg_info
        .and_then(|m| m.get(Value::from("provider")))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(NodeConfig {
        common,
        launch: crate::model::field_as_mapping(&mapping, "launch"),
        inputs: field_as_mapping_list(&mapping, "inputs"),
        outputs: field_as_mapping_list(&mapping, "outputs"),
        parameter_files: field_as_mapping_list(&mapping, "parameter_files"),
        parameters,
        processes: field_as_mapping_list(&mapping, "processes"),
        package_name,
        package_provider,
        package_resolution: None,
    })
}

fn parse_module(common: ConfigCommon, raw: &Value) -> ModuleConfig {
    let mapping = raw.as_mapping().cloned().unwrap_or_default();
    let ext = crate::model::field_as_mapping(&mapping, "external_interfaces");
    ModuleConfig {
        common,
        instances: field_as_mapping_list(&mapping, "instances"),
        external_interfaces: ExternalInterfaces {
            input: field_as_mapping_list(&ext, "input"),
            output: field_as_mapping_list(&ext, "output"),
        },
        connections: field_as_mapping_list(&mapping, "connections"),
    }
}

fn parse_parameter_set(common: ConfigCommon, raw: &Value) -> Result<ParameterSetConfig> {
    let mapping = raw.as_mapping().cloned().unwrap_or_default();
    let mut parameters = field_as_mapping_list(&mapping, "parameters");
    for (idx, entry) in parameters.iter_mut().enumerate() {
        if !matches!(entry.get(Value::from("parameters")), Some(Value::Sequence(_))) {
            continue;
        }
        let mut nested = field_as_mapping_list(entry, "parameters");
        normalize_param_list(&common, &mut nested, &format!("/parameters/{idx}/parameters"))?;
        entry.insert(
            Value::from("parameters"),
            Value::Sequence(nested.into_iter().map(Value::Mapping).collect()),
        );
    }
    Ok(ParameterSetConfig {
        common,
        parameters,
        local_variables: field_as_mapping_list(&mapping, "local_variables"),
    })
}

fn parse_system(common: ConfigCommon, raw: &Value) -> SystemConfig {
    let mapping = raw.as_mapping().cloned().unwrap_or_default();
    let modes = field_as_mapping_list(&mapping, "modes");
    let mut mode_configs = serde_yaml::Mapping::new();
    for mode in &modes {
        if let Some(name) = crate::model::mapping_get_str(mode, "name") {
            if let Some(bundle) = mapping.get(Value::from(name)) {
                mode_configs.insert(Value::from(name), bundle.clone());
            }
        }
    }
    SystemConfig {
        common,
        components: field_as_mapping_list(&mapping, "components"),
        connections: field_as_mapping_list(&mapping, "connections"),
        variables: field_as_mapping_list(&mapping, "variables"),
        variable_files: field_as_string_list(&mapping, "variable_files"),
        modes,
        mode_configs,
        arguments: field_as_mapping_list(&mapping, "arguments"),
        parameter_sets: field_as_mapping_list(&mapping, "parameter_sets"),
    }
}

/// Parses one design file into a typed [`Config`], running the 4.B schema
/// and semantic checks along the way.
fn parse_entity_file(loader: &YamlLoader, file_path: &Path) -> Result<Config> {
    let file_entity_name = file_stem_entity_name(file_path)?;
    let (_, file_kind) = entity_name_decode(&file_entity_name)?;

    let loaded = loader
        .load(file_path)
        .map_err(|e| DesignerError::validation(format!("{e:#}")))?;

    let full_name = loaded
        .value
        .as_mapping()
        .and_then(|m| m.get(Value::from("name")))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            DesignerError::validation(format!(
                "entity file {} is missing required field 'name'",
                file_path.display()
            ))
        })?
        .to_string();

    let (entity_name, entity_kind) = entity_name_decode(&full_name)?;
    if entity_kind != file_kind {
        return Err(DesignerError::validation(format!(
            "entity '{full_name}' declares kind '{}' but file name implies '{}' ({})",
            entity_kind.as_str(),
            file_kind.as_str(),
            file_path.display()
        )));
    }

    let declared_stem_name = file_entity_name
        .rsplit_once('.')
        .map(|(n, _)| n.to_string())
        .unwrap_or(file_entity_name.clone());
    if entity_name != declared_stem_name {
        let mut loc = SourceLocation::new(file_path.to_path_buf()).with_yaml_path("/name");
        if let Some(pos) = loaded.source_map.get("/name") {
            loc = loc.with_position(pos.line, pos.column);
        }
        return Err(DesignerError::Validation {
            message: format!(
                "config name '{entity_name}' does not match file name '{declared_stem_name}'"
            ),
            location: Some(loc),
        });
    }

    let sub_type = if loaded
        .value
        .as_mapping()
        .map(|m| m.contains_key(Value::from("base")))
        .unwrap_or(false)
    {
        SubType::Variant
    } else {
        SubType::Base
    };

    let common = ConfigCommon {
        name: entity_name,
        full_name,
        file_path: file_path.to_path_buf(),
        package: None,
        source_map: loaded.source_map,
        raw: loaded.value.clone(),
        sub_type,
    };

    schema::validate_semantics(entity_kind, &common, &loaded.value)?;

    let format_version = loaded
        .value
        .as_mapping()
        .and_then(|m| m.get(Value::from(schema::FORMAT_VERSION_FIELD)))
        .and_then(Value::as_str);
    let check = schema::check_format_version(format_version);
    if !check.compatible {
        return Err(DesignerError::FormatVersion {
            message: check.message,
            location: Some(common.location(&format!("/{}", schema::FORMAT_VERSION_FIELD))),
        });
    }
    if check.minor_newer {
        tracing::warn!(file = %file_path.display(), "{}", check.message);
    }

    Ok(match entity_kind {
        EntityKind::Node => Config::Node(parse_node(common, &loaded.value)?),
        EntityKind::Module => Config::Module(parse_module(common, &loaded.value)),
        EntityKind::ParameterSet => Config::ParameterSet(parse_parameter_set(common, &loaded.value)?),
        EntityKind::System => Config::System(parse_system(common, &loaded.value)),
    })
}

/// The entity registry (spec.md §4.C): every design file parsed, validated,
/// and indexed by `full_name` and `(kind, name)`.
pub struct Registry {
    entities: HashMap<String, Config>,
    type_map: HashMap<EntityKind, HashMap<String, String>>,
    package_paths: HashMap<String, PathBuf>,
    file_package_map: HashMap<PathBuf, String>,
    provider_resolution: HashMap<String, PackageResolution>,
    package_source_paths: std::cell::RefCell<HashMap<String, Option<PathBuf>>>,
    /// Package owning the build target, used to gate build-time source
    /// fallbacks in the parameter engine (spec.md §4.C.6).
    pub deployment_package_name: Option<String>,
}

/// One entry of the workspace config (`provider -> resolution`).
pub struct WorkspaceProvider {
    pub provider: String,
    pub resolution: PackageResolution,
}

impl Registry {
    pub fn build(
        loader: &YamlLoader,
        config_yaml_file_paths: &[PathBuf],
        package_paths: HashMap<String, PathBuf>,
        file_package_map: HashMap<PathBuf, String>,
        workspace_config: &[WorkspaceProvider],
    ) -> Result<Self> {
        let mut registry = Registry {
            entities: HashMap::new(),
            type_map: HashMap::from([
                (EntityKind::Node, HashMap::new()),
                (EntityKind::Module, HashMap::new()),
                (EntityKind::ParameterSet, HashMap::new()),
                (EntityKind::System, HashMap::new()),
            ]),
            package_paths,
            file_package_map,
            provider_resolution: workspace_config
                .iter()
                .map(|e| (e.provider.clone(), e.resolution))
                .collect(),
            package_source_paths: std::cell::RefCell::new(HashMap::new()),
            deployment_package_name: None,
        };

        for file_path in config_yaml_file_paths {
            let mut entity = parse_entity_file(loader, file_path)?;

            if let Some(package) = registry.file_package_map.get(file_path) {
                entity.common_mut().package = Some(package.clone());
            }

            if let Config::Node(node) = &mut entity {
                if let Some(provider) = &node.package_provider {
                    if let Some(resolution) = registry.provider_resolution.get(provider) {
                        node.package_resolution = Some(*resolution);
                    }
                }
            }

            let full_name = entity.full_name().to_string();
            if let Some(existing) = registry.entities.get(&full_name) {
                return Err(DesignerError::DuplicateEntity {
                    full_name,
                    first: existing.common().file_path.clone(),
                    second: entity.common().file_path.clone(),
                });
            }

            registry
                .type_map
                .get_mut(&entity.kind())
                .unwrap()
                .insert(entity.name().to_string(), full_name.clone());
            registry.entities.insert(full_name, entity);
        }

        Ok(registry)
    }

    pub fn get(&self, full_name: &str) -> Option<&Config> {
        self.entities.get(full_name)
    }

    fn lookup_base(&self, name: &str, kind: EntityKind) -> Option<&Config> {
        if let Some(full_name) = self.type_map.get(&kind).and_then(|m| m.get(name)) {
            return self.entities.get(full_name);
        }
        if name.contains('.') {
            if let Ok((decoded_name, decoded_kind)) = entity_name_decode(name) {
                if decoded_kind == kind {
                    return self
                        .type_map
                        .get(&kind)
                        .and_then(|m| m.get(&decoded_name))
                        .and_then(|full_name| self.entities.get(full_name));
                }
            }
        }
        None
    }

    /// Resolves `name` to an effective [`Config`] of kind `kind`, deep-copying
    /// and recursively resolving the variant chain if `base` references are
    /// present (spec.md §4.C step 4).
    fn resolve(&self, name: &str, kind: EntityKind) -> Result<Config> {
        let entity = self.lookup_base(name, kind).ok_or_else(|| {
            let available: Vec<&str> = self
                .type_map
                .get(&kind)
                .map(|m| m.keys().map(String::as_str).collect())
                .unwrap_or_default();
            let error_kind = kind.as_str();
            let message = format!("{error_kind} '{name}' not found. Available {error_kind}s: {available:?}");
            match kind {
                EntityKind::Node => DesignerError::NodeConfig { message, location: None },
                EntityKind::Module => DesignerError::ModuleConfig { message, location: None },
                EntityKind::ParameterSet => DesignerError::ParameterConfig { message, location: None },
                EntityKind::System => DesignerError::validation(message),
            }
        })?;

        if entity.common().sub_type != SubType::Variant {
            return Ok(entity.clone());
        }

        let base_target = entity
            .common()
            .raw
            .as_mapping()
            .and_then(|m| m.get(Value::from("base")))
            .and_then(Value::as_str)
            .map(str::to_string);

        let Some(base_target) = base_target else {
            return Ok(entity.clone());
        };

        let parent = self.resolve(&base_target, kind)?;
        Ok(crate::variant::resolve_variant(parent, entity.common().clone()))
    }

    pub fn get_node(&self, name: &str) -> Result<NodeConfig> {
        match self.resolve(name, EntityKind::Node)? {
            Config::Node(n) => Ok(n),
            _ => unreachable!("resolve(kind=Node) always returns Config::Node"),
        }
    }

    pub fn get_module(&self, name: &str) -> Result<ModuleConfig> {
        match self.resolve(name, EntityKind::Module)? {
            Config::Module(m) => Ok(m),
            _ => unreachable!("resolve(kind=Module) always returns Config::Module"),
        }
    }

    pub fn get_parameter_set(&self, name: &str) -> Result<ParameterSetConfig> {
        match self.resolve(name, EntityKind::ParameterSet)? {
            Config::ParameterSet(p) => Ok(p),
            _ => unreachable!("resolve(kind=ParameterSet) always returns Config::ParameterSet"),
        }
    }

    pub fn get_system(&self, name: &str) -> Result<SystemConfig> {
        match self.resolve(name, EntityKind::System)? {
            Config::System(s) => Ok(s),
            _ => unreachable!("resolve(kind=System) always returns Config::System"),
        }
    }

    pub fn get_entity_by_kind(&self, name: &str, kind: EntityKind) -> Result<Config> {
        self.resolve(name, kind)
    }

    pub fn get_package_path(&self, package_name: &str) -> Option<&Path> {
        self.package_paths.get(package_name).map(PathBuf::as_path)
    }

    /// Best-effort lookup of a package's *source* directory: find any design
    /// file belonging to `package_name`, then walk up looking for the
    /// nearest `package.xml` (spec.md §4.C step 5). Cached both ways.
    pub fn get_package_source_path(&self, package_name: &str) -> Option<PathBuf> {
        if package_name.is_empty() {
            return None;
        }
        if let Some(cached) = self.package_source_paths.borrow().get(package_name) {
            return cached.clone();
        }

        let mut found = None;
        for (file_path, pkg) in &self.file_package_map {
            if pkg != package_name {
                continue;
            }
            let mut current = file_path.parent().map(Path::to_path_buf);
            while let Some(dir) = current {
                if dir.join("package.xml").exists() {
                    found = Some(dir);
                    break;
                }
                current = dir.parent().map(Path::to_path_buf);
            }
            if found.is_some() {
                break;
            }
        }

        self.package_source_paths
            .borrow_mut()
            .insert(package_name.to_string(), found.clone());
        found
    }

    pub fn get_provider_resolution(&self, provider: &str) -> Option<PackageResolution> {
        self.provider_resolution.get(provider).copied()
    }

    pub fn set_deployment_package_name(&mut self, package: Option<String>) {
        self.deployment_package_name = package;
    }

    pub fn entities(&self) -> impl Iterator<Item = &Config> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn loads_and_indexes_entities_by_full_name() {
        let dir = tempfile::tempdir().unwrap();
        let node_path = write(
            dir.path(),
            "A.node.yaml",
            "name: A.node\nlaunch:\n  executable: a_pkg/a_exe\ninputs: []\noutputs: []\n",
        );
        let loader = YamlLoader::new(false);
        let registry = Registry::build(
            &loader,
            &[node_path],
            HashMap::new(),
            HashMap::new(),
            &[],
        )
        .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("A.node").is_some());
        let node = registry.get_node("A.node").unwrap();
        assert_eq!(node.common.name, "A");
    }

    #[test]
    fn duplicate_full_name_is_a_fatal_error() {
        let dir = tempfile::tempdir().unwrap();
        let first = write(
            dir.path(),
            "A.node.yaml",
            "name: A.node\nlaunch:\n  executable: a_pkg/a_exe\n",
        );
        std::fs::create_dir(dir.path().join("dup")).unwrap();
        let second = write(
            dir.path().join("dup").as_path(),
            "A.node.yaml",
            "name: A.node\nlaunch:\n  executable: a_pkg/a_exe\n",
        );
        let loader = YamlLoader::new(false);
        let err = Registry::build(&loader, &[first, second], HashMap::new(), HashMap::new(), &[])
            .unwrap_err();
        assert!(matches!(err, DesignerError::DuplicateEntity { .. }));
    }

    #[test]
    fn variant_lookup_resolves_against_deep_copied_parent() {
        let dir = tempfile::tempdir().unwrap();
        let base = write(
            dir.path(),
            "A.node.yaml",
            "name: A.node\nlaunch:\n  executable: a_pkg/a_exe\ninputs:\n  - name: in\n    type: std_msgs/String\n",
        );
        let variant = write(
            dir.path(),
            "B.node.yaml",
            "name: B.node\nbase: A.node\noverride:\n  inputs:\n    - name: in2\n      type: std_msgs/String\n",
        );
        let loader = YamlLoader::new(false);
        let registry = Registry::build(&loader, &[base, variant], HashMap::new(), HashMap::new(), &[])
            .unwrap();
        let resolved = registry.get_node("B.node").unwrap();
        assert_eq!(resolved.inputs.len(), 2);
        let parent = registry.get_node("A.node").unwrap();
        assert_eq!(parent.inputs.len(), 1, "resolving a variant must not mutate its parent");
    }

    #[test]
    fn dotted_name_lookup_tolerates_kind_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let node_path = write(
            dir.path(),
            "A.node.yaml",
            "name: A.node\nlaunch:\n  executable: a_pkg/a_exe\n",
        );
        let loader = YamlLoader::new(false);
        let registry = Registry::build(&loader, &[node_path], HashMap::new(), HashMap::new(), &[])
            .unwrap();
        assert!(registry.get_node("A").is_ok());
        assert!(registry.get_node("A.node").is_ok());
    }

    #[test]
    fn textually_float_value_is_rejected_for_an_integer_parameter() {
        let dir = tempfile::tempdir().unwrap();
        let node_path = write(
            dir.path(),
            "A.node.yaml",
            "name: A.node\nlaunch:\n  executable: a_pkg/a_exe\nparameters:\n  - name: rate\n    type: int\n    value: \"1.0\"\n",
        );
        let loader = YamlLoader::new(false);
        let err = Registry::build(&loader, &[node_path], HashMap::new(), HashMap::new(), &[]).unwrap_err();
        assert!(matches!(err, DesignerError::ParameterConfig { .. }));
    }

    #[test]
    fn numeric_width_alias_is_accepted_case_insensitively_and_coerced() {
        let dir = tempfile::tempdir().unwrap();
        let node_path = write(
            dir.path(),
            "A.node.yaml",
            "name: A.node\nlaunch:\n  executable: a_pkg/a_exe\nparameters:\n  - name: count\n    type: Int32\n    value: \"7\"\n",
        );
        let loader = YamlLoader::new(false);
        let registry = Registry::build(&loader, &[node_path], HashMap::new(), HashMap::new(), &[]).unwrap();
        let node = registry.get_node("A.node").unwrap();
        let value = node.parameters[0].get(Value::from("value")).unwrap();
        assert_eq!(value.as_i64(), Some(7));
    }

    #[test]
    fn parameter_set_entry_parameters_are_coerced_too() {
        let dir = tempfile::tempdir().unwrap();
        let param_set_path = write(
            dir.path(),
            "Over.parameter_set.yaml",
            "name: Over.parameter_set\nparameters:\n  - node: /a\n    parameters:\n      - name: rate\n        type: int\n        value: 2.5\n",
        );
        let loader = YamlLoader::new(false);
        let err = Registry::build(&loader, &[param_set_path], HashMap::new(), HashMap::new(), &[]).unwrap_err();
        assert!(matches!(err, DesignerError::ParameterConfig { .. }));
    }
}
