//! Component D (spec.md §4.D): variant resolution — `(base, variant_yaml) ->
//! config`, a pure function that never mutates `base` (spec.md §9).
//!
//! Grounded directly on
//! `original_source/.../builder/resolution/variant_resolver.py`'s
//! `_merge_list` / `_remove_list` / per-kind `MergeSpec` tables.

use serde_yaml::{Mapping, Value};

use crate::model::{
    mapping_get_str, Config, ConfigCommon, ModuleConfig, NodeConfig, ParameterSetConfig, SubType,
    SystemConfig,
};

/// One mergeable/removable list field: its name and the key used to match
/// override items against base items (`None` means unkeyed — always
/// appended, never replaced).
struct MergeSpec {
    field: &'static str,
    key_field: Option<&'static str>,
}

/// Replaces/appends items of `override_list` into `base_list`. Items sharing
/// `key_field` with a base item replace it in place; unknown keys are
/// appended. Unkeyed fields simply concatenate.
fn merge_list(base_list: &[Mapping], override_list: &[Mapping], key_field: Option<&str>) -> Vec<Mapping> {
    if override_list.is_empty() {
        return base_list.to_vec();
    }
    let mut merged = base_list.to_vec();
    let Some(key_field) = key_field else {
        merged.extend(override_list.iter().cloned());
        return merged;
    };
    for item in override_list {
        let key = mapping_get_str(item, key_field);
        let existing_index = key.and_then(|k| {
            merged
                .iter()
                .position(|base_item| mapping_get_str(base_item, key_field) == Some(k))
        });
        match existing_index {
            Some(idx) => merged[idx] = item.clone(),
            None => merged.push(item.clone()),
        }
    }
    merged
}

/// Removes items from `target_list` named in `remove_specs`: by `key_field`
/// value when present, otherwise by exact-subset match against the spec's
/// own fields.
fn remove_list(target_list: &[Mapping], remove_specs: &[Mapping], key_field: Option<&str>) -> Vec<Mapping> {
    if remove_specs.is_empty() || target_list.is_empty() {
        return target_list.to_vec();
    }
    target_list
        .iter()
        .filter(|item| {
            let should_remove = remove_specs.iter().any(|spec| match key_field {
                Some(key_field) => {
                    let spec_key = mapping_get_str(spec, key_field);
                    spec_key.is_some() && spec_key == mapping_get_str(item, key_field)
                }
                None => spec
                    .iter()
                    .all(|(k, v)| item.get(k).map(|iv| iv == v).unwrap_or(false)),
            });
            !should_remove
        })
        .cloned()
        .collect()
}

fn names_of(mappings: &[Mapping], key_field: &str) -> Vec<String> {
    mappings
        .iter()
        .filter_map(|m| mapping_get_str(m, key_field).map(str::to_owned))
        .collect()
}

/// Strips any connection whose `from`/`to` endpoint's leading token (before
/// the first `.`) names a removed entity (spec.md §4.D "Remove rules").
fn filter_connections_by_removed_entities(connections: &[Mapping], removed_names: &[String]) -> Vec<Mapping> {
    connections
        .iter()
        .filter(|conn| {
            let endpoint_removed = |field: &str| -> bool {
                let Some(endpoint) = mapping_get_str(conn, field) else {
                    return false;
                };
                let leading = endpoint.split('.').next().unwrap_or(endpoint);
                removed_names.iter().any(|n| n == leading)
            };
            !endpoint_removed("from") && !endpoint_removed("to")
        })
        .cloned()
        .collect()
}

fn override_block(variant_yaml: &Value) -> Mapping {
    crate::model::field_as_mapping(variant_yaml.as_mapping().unwrap_or(&Mapping::new()), "override")
}

fn remove_block(variant_yaml: &Value) -> Mapping {
    crate::model::field_as_mapping(variant_yaml.as_mapping().unwrap_or(&Mapping::new()), "remove")
}

fn merge_field(base: &[Mapping], override_block: &Mapping, spec: &MergeSpec) -> Vec<Mapping> {
    let override_list = crate::model::field_as_mapping_list(override_block, spec.field);
    merge_list(base, &override_list, spec.key_field)
}

fn remove_field(base: &[Mapping], remove_block: &Mapping, spec: &MergeSpec) -> Vec<Mapping> {
    let remove_specs = crate::model::field_as_mapping_list(remove_block, spec.field);
    remove_list(base, &remove_specs, spec.key_field)
}

fn apply_node(mut node: NodeConfig, variant_yaml: &Value) -> NodeConfig {
    let remove = remove_block(variant_yaml);
    let over = override_block(variant_yaml);

    let specs = [
        MergeSpec { field: "inputs", key_field: Some("name") },
        MergeSpec { field: "outputs", key_field: Some("name") },
        MergeSpec { field: "parameter_files", key_field: Some("name") },
        MergeSpec { field: "parameters", key_field: Some("name") },
        MergeSpec { field: "processes", key_field: Some("name") },
    ];

    node.inputs = remove_field(&node.inputs, &remove, &specs[0]);
    node.outputs = remove_field(&node.outputs, &remove, &specs[1]);
    node.parameter_files = remove_field(&node.parameter_files, &remove, &specs[2]);
    node.parameters = remove_field(&node.parameters, &remove, &specs[3]);
    node.processes = remove_field(&node.processes, &remove, &specs[4]);

    node.inputs = merge_field(&node.inputs, &over, &specs[0]);
    node.outputs = merge_field(&node.outputs, &over, &specs[1]);
    node.parameter_files = merge_field(&node.parameter_files, &over, &specs[2]);
    node.parameters = merge_field(&node.parameters, &over, &specs[3]);
    node.processes = merge_field(&node.processes, &over, &specs[4]);

    if let Some(Value::Mapping(launch_override)) = over.get(Value::from("launch")) {
        for (k, v) in launch_override.iter() {
            node.launch.insert(k.clone(), v.clone());
        }
    }

    node
}

fn apply_module(mut module: ModuleConfig, variant_yaml: &Value) -> ModuleConfig {
    let remove = remove_block(variant_yaml);
    let over = override_block(variant_yaml);

    let instances_spec = MergeSpec { field: "instances", key_field: Some("name") };
    let connections_spec = MergeSpec { field: "connections", key_field: None };

    let instance_names = names_of(
        &crate::model::field_as_mapping_list(&remove, "instances"),
        "name",
    );
    module.instances = remove_field(&module.instances, &remove, &instances_spec);
    if !instance_names.is_empty() {
        module.connections = filter_connections_by_removed_entities(&module.connections, &instance_names);
    }
    module.connections = remove_field(&module.connections, &remove, &connections_spec);

    module.instances = merge_field(&module.instances, &over, &instances_spec);
    module.connections = merge_field(&module.connections, &over, &connections_spec);

    let ext_over = crate::model::field_as_mapping(&over, "external_interfaces");
    if !ext_over.is_empty() {
        module.external_interfaces.input = merge_list(
            &module.external_interfaces.input,
            &crate::model::field_as_mapping_list(&ext_over, "input"),
            Some("name"),
        );
        module.external_interfaces.output = merge_list(
            &module.external_interfaces.output,
            &crate::model::field_as_mapping_list(&ext_over, "output"),
            Some("name"),
        );
    }

    module
}

fn apply_parameter_set(mut ps: ParameterSetConfig, variant_yaml: &Value) -> ParameterSetConfig {
    let remove = remove_block(variant_yaml);
    let over = override_block(variant_yaml);
    let spec = MergeSpec { field: "parameters", key_field: Some("node") };

    ps.parameters = remove_field(&ps.parameters, &remove, &spec);
    ps.parameters = merge_field(&ps.parameters, &over, &spec);

    let local_vars_spec = MergeSpec { field: "local_variables", key_field: Some("name") };
    ps.local_variables = remove_field(&ps.local_variables, &remove, &local_vars_spec);
    ps.local_variables = merge_field(&ps.local_variables, &over, &local_vars_spec);
    ps
}

/// Applies a system variant's `override`/`remove` bundle; also used by
/// [`crate::mode`] to apply a mode's `{override, remove}` bundle, since both
/// operate on the same `SystemConfig` merge-spec table (spec.md §4.E).
pub fn apply_system(mut system: SystemConfig, variant_yaml: &Value) -> SystemConfig {
    let remove = remove_block(variant_yaml);
    let over = override_block(variant_yaml);

    let components_spec = MergeSpec { field: "components", key_field: Some("name") };
    let connections_spec = MergeSpec { field: "connections", key_field: None };
    let variables_spec = MergeSpec { field: "variables", key_field: Some("name") };
    let modes_spec = MergeSpec { field: "modes", key_field: Some("name") };
    let parameter_sets_spec = MergeSpec { field: "parameter_sets", key_field: None };

    let removed_component_names = names_of(
        &crate::model::field_as_mapping_list(&remove, "components"),
        "name",
    );
    if !removed_component_names.is_empty() {
        system.connections =
            filter_connections_by_removed_entities(&system.connections, &removed_component_names);
    }

    system.components = remove_field(&system.components, &remove, &components_spec);
    system.connections = remove_field(&system.connections, &remove, &connections_spec);
    system.variables = remove_field(&system.variables, &remove, &variables_spec);
    system.modes = remove_field(&system.modes, &remove, &modes_spec);
    system.parameter_sets = remove_field(&system.parameter_sets, &remove, &parameter_sets_spec);

    system.variables = merge_field(&system.variables, &over, &variables_spec);
    {
        let override_files = crate::model::field_as_string_list(&over, "variable_files");
        system.variable_files.extend(override_files);
    }
    system.modes = merge_field(&system.modes, &over, &modes_spec);
    system.parameter_sets = merge_field(&system.parameter_sets, &over, &parameter_sets_spec);
    system.components = merge_field(&system.components, &over, &components_spec);
    system.connections = merge_field(&system.connections, &over, &connections_spec);

    // Harvest mode_configs from the merged `modes` names out of the override block.
    let mode_names = names_of(&system.modes, "name");
    for mode_name in mode_names {
        if let Some(bundle) = over.get(Value::from(mode_name.as_str())) {
            system
                .mode_configs
                .insert(Value::from(mode_name), bundle.clone());
        }
    }

    system
}

/// Resolves a variant `Config` against its (already-resolved, deep-copied)
/// parent, returning a brand-new `Config` whose identity fields (`name`,
/// `full_name`, `file_path`, `package`, `sub_type`) come from the variant,
/// but whose raw `config` is the variant's own YAML (spec.md §4.D "Identity
/// fields"). `parent` is consumed by value (the caller is expected to have
/// already cloned it), so this function is the pure `(base, variant_yaml) ->
/// config` spec.md §9 calls for.
pub fn resolve_variant(parent: Config, variant_common: ConfigCommon) -> Config {
    let variant_yaml = variant_common.raw.clone();

    let mut resolved = match parent {
        Config::Node(n) => Config::Node(apply_node(n, &variant_yaml)),
        Config::Module(m) => Config::Module(apply_module(m, &variant_yaml)),
        Config::ParameterSet(p) => Config::ParameterSet(apply_parameter_set(p, &variant_yaml)),
        Config::System(s) => Config::System(apply_system(s, &variant_yaml)),
    };

    let common = resolved.common_mut();
    common.name = variant_common.name;
    common.full_name = variant_common.full_name;
    common.file_path = variant_common.file_path;
    common.package = variant_common.package;
    common.sub_type = SubType::Variant;
    common.source_map = variant_common.source_map;
    common.raw = variant_yaml;
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping_of(pairs: &[(&str, &str)]) -> Mapping {
        let mut m = Mapping::new();
        for (k, v) in pairs {
            m.insert(Value::from(*k), Value::from(*v));
        }
        m
    }

    #[test]
    fn merge_list_replaces_matching_keys_and_appends_unknown() {
        let base = vec![mapping_of(&[("name", "a"), ("value", "1")])];
        let over = vec![
            mapping_of(&[("name", "a"), ("value", "2")]),
            mapping_of(&[("name", "b"), ("value", "3")]),
        ];
        let merged = merge_list(&base, &over, Some("name"));
        assert_eq!(merged.len(), 2);
        assert_eq!(mapping_get_str(&merged[0], "value"), Some("2"));
        assert_eq!(mapping_get_str(&merged[1], "name"), Some("b"));
    }

    #[test]
    fn remove_list_drops_items_by_key() {
        let base = vec![
            mapping_of(&[("name", "a")]),
            mapping_of(&[("name", "b")]),
        ];
        let remove = vec![mapping_of(&[("name", "a")])];
        let remaining = remove_list(&base, &remove, Some("name"));
        assert_eq!(remaining.len(), 1);
        assert_eq!(mapping_get_str(&remaining[0], "name"), Some("b"));
    }

    #[test]
    fn filter_connections_drops_edges_touching_removed_entities() {
        let connections = vec![
            mapping_of(&[("from", "optional.output.x"), ("to", "core.input.y")]),
            mapping_of(&[("from", "core.output.z"), ("to", "other.input.w")]),
        ];
        let removed = vec!["optional".to_string()];
        let remaining = filter_connections_by_removed_entities(&connections, &removed);
        assert_eq!(remaining.len(), 1);
        assert_eq!(mapping_get_str(&remaining[0], "from"), Some("core.output.z"));
    }
}
