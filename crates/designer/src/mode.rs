//! Component D/E (spec.md §4.E): mode resolution for `SystemConfig`.
//!
//! Grounded in `original_source/.../deployment/modes.py`'s
//! `apply_mode_configuration` / `select_modes`.

use serde_yaml::{Mapping, Value};

use crate::model::{mapping_get_str, SystemConfig};

pub const DEFAULT_MODE: &str = "default";

/// Deep-copies `base` (the caller passes an owned clone), drops any
/// component still carrying the deprecated top-level `mode` field, and
/// applies `mode_configs[mode_name]` as a system variant bundle unless
/// `mode_name` is the `default` sentinel or no mode configs exist.
pub fn apply_mode_configuration(base: SystemConfig, mode_name: &str) -> SystemConfig {
    let mut system = base;
    system.components.retain(|comp| !comp.contains_key(Value::from("mode")));

    if mode_name == DEFAULT_MODE || system.mode_configs.is_empty() {
        return system;
    }

    let Some(bundle) = system.mode_configs.get(Value::from(mode_name)).cloned() else {
        tracing::warn!(mode = mode_name, "mode not found in mode_configs, using base configuration");
        return system;
    };

    let bundle_mapping = bundle.as_mapping().cloned().unwrap_or_default();
    let mut wrapper = Mapping::new();
    if let Some(over) = bundle_mapping.get(Value::from("override")) {
        wrapper.insert(Value::from("override"), over.clone());
    }
    if let Some(rem) = bundle_mapping.get(Value::from("remove")) {
        wrapper.insert(Value::from("remove"), rem.clone());
    }

    tracing::info!(mode = mode_name, "applying mode configuration");
    crate::variant::apply_system(system, &Value::Mapping(wrapper))
}

/// Returns `(mode_names, default_mode)` for a `SystemConfig`: the declared
/// `modes` list (first entry is default unless one carries `default: true`);
/// `(["default"], "default")` when no modes are declared.
pub fn select_modes(system: &SystemConfig) -> (Vec<String>, String) {
    if system.modes.is_empty() {
        return (vec![DEFAULT_MODE.to_string()], DEFAULT_MODE.to_string());
    }

    let mode_names: Vec<String> = system
        .modes
        .iter()
        .filter_map(|m| mapping_get_str(m, "name").map(str::to_string))
        .collect();

    let default_mode = system
        .modes
        .iter()
        .find(|m| {
            m.get(Value::from("default"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        })
        .and_then(|m| mapping_get_str(m, "name"))
        .map(str::to_string)
        .or_else(|| mode_names.first().cloned())
        .unwrap_or_else(|| DEFAULT_MODE.to_string());

    (mode_names, default_mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConfigCommon, SourceMap, SubType};
    use std::path::PathBuf;

    fn mapping_of(pairs: &[(&str, &str)]) -> Mapping {
        let mut m = Mapping::new();
        for (k, v) in pairs {
            m.insert(Value::from(*k), Value::from(*v));
        }
        m
    }

    fn base_system() -> SystemConfig {
        SystemConfig {
            common: ConfigCommon {
                name: "S".into(),
                full_name: "S.system".into(),
                file_path: PathBuf::from("S.system.yaml"),
                package: None,
                source_map: SourceMap::default(),
                raw: Value::Null,
                sub_type: SubType::Base,
            },
            components: vec![
                mapping_of(&[("name", "a"), ("entity", "A.node")]),
                {
                    let mut legacy = mapping_of(&[("name", "b"), ("entity", "B.node")]);
                    legacy.insert(Value::from("mode"), Value::from("perception"));
                    legacy
                },
            ],
            connections: vec![],
            variables: vec![],
            variable_files: vec![],
            modes: vec![
                mapping_of(&[("name", "default")]),
                mapping_of(&[("name", "sim")]),
            ],
            mode_configs: Mapping::new(),
            arguments: vec![],
            parameter_sets: vec![],
        }
    }

    #[test]
    fn drops_components_with_legacy_mode_field() {
        let resolved = apply_mode_configuration(base_system(), "default");
        assert_eq!(resolved.components.len(), 1);
        assert_eq!(mapping_get_str(&resolved.components[0], "name"), Some("a"));
    }

    #[test]
    fn select_modes_defaults_to_first_declared_mode() {
        let (names, default_mode) = select_modes(&base_system());
        assert_eq!(names, vec!["default".to_string(), "sim".to_string()]);
        assert_eq!(default_mode, "default");
    }

    #[test]
    fn select_modes_with_no_declared_modes_falls_back_to_sentinel() {
        let mut system = base_system();
        system.modes.clear();
        let (names, default_mode) = select_modes(&system);
        assert_eq!(names, vec!["default".to_string()]);
        assert_eq!(default_mode, "default");
    }

    #[test]
    fn applies_mode_override_bundle() {
        let mut system = base_system();
        let mut over = Mapping::new();
        over.insert(
            Value::from("components"),
            Value::Sequence(vec![Value::Mapping(mapping_of(&[
                ("name", "c"),
                ("entity", "C.node"),
            ]))]),
        );
        let mut bundle = Mapping::new();
        bundle.insert(Value::from("override"), Value::Mapping(over));
        system.mode_configs.insert(Value::from("sim"), Value::Mapping(bundle));

        let resolved = apply_mode_configuration(system, "sim");
        assert_eq!(resolved.components.len(), 2);
    }
}
