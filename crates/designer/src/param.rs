//! Component H (spec.md §4.H): parameter engine.
//!
//! Grounded in `original_source/.../builder/parameters/parameter_manager.py`
//! (`initialize_node_parameters`, `apply_node_parameters`,
//! `_resolve_parameter_file_path`) and `builder/instances.py`'s
//! `_apply_parameter_set`.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::error::{DesignerError, Result};
use crate::model::{
    mapping_get_str, Config, Instance, InstanceKind, InstanceRef, Parameter, ParameterDataType,
    ParameterFile, ParameterResolver, ParameterType,
};
use crate::registry::Registry;
use crate::subst;

/// Resolves a parameter file path per spec.md §4.H "Path resolution":
/// substitute, then absolute passthrough, then `is_override` passthrough,
/// then package share path, then deployment-package source/install fallback.
pub fn resolve_parameter_file_path(
    resolver: &ParameterResolver,
    path: &str,
    package_name: Option<&str>,
    is_override: bool,
    registry: &Registry,
) -> String {
    let substituted = subst::resolve_string(resolver, path);

    if substituted.starts_with('/') {
        return substituted;
    }
    if is_override || substituted.starts_with("$(find-pkg-share") {
        return substituted;
    }

    let Some(package_name) = package_name else {
        return substituted;
    };

    let Some(pkg_path) = registry.get_package_path(package_name) else {
        return format!("$(find-pkg-share {package_name})/{substituted}");
    };

    let candidate = pkg_path.join(&substituted);
    if candidate.exists() {
        return candidate.display().to_string();
    }

    if let Some(source_path) = registry.get_package_source_path(package_name) {
        if let Some(workspace_root) = find_workspace_root(&source_path) {
            let install_path = workspace_root
                .join("install")
                .join(package_name)
                .join("share")
                .join(package_name)
                .join(&substituted);
            if install_path.exists() {
                return install_path.display().to_string();
            }
        }
    }

    candidate.display().to_string()
}

fn find_workspace_root(start: &Path) -> Option<std::path::PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join("src").exists() && current.join("install").exists() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Loads a resolved parameter file's `ros__parameters` content into flattened
/// `Parameter` entries (spec.md §4.H), grounded in `_load_parameters_from_file`.
/// Best-effort: silently returns nothing if the path still carries an
/// unresolved substitution, isn't absolute, or can't be read/parsed, the same
/// guard `_resolve_existing_parameter_file_path` applies upstream.
fn load_parameters_from_file(
    resolved_path: &str,
    node_name: &str,
    package_name: Option<&str>,
    registry: &Registry,
    parameter_type: ParameterType,
) -> Vec<Parameter> {
    let Some(existing_path) = resolve_existing_parameter_file_path(resolved_path, package_name, registry) else {
        return Vec::new();
    };

    let content = match std::fs::read_to_string(&existing_path) {
        Ok(c) => c,
        Err(err) => {
            tracing::warn!(path = %existing_path.display(), %err, "failed to read parameter file");
            return Vec::new();
        }
    };
    let doc: Value = match serde_yaml::from_str(&content) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(path = %existing_path.display(), %err, "failed to parse parameter file");
            return Vec::new();
        }
    };
    let Value::Mapping(top) = doc else { return Vec::new() };

    let node_key = format!("/{node_name}");
    let mut out = Vec::new();
    for (key, section) in &top {
        let Some(key_str) = key.as_str() else { continue };
        if key_str != "/**" && key_str != node_key && key_str != node_name {
            continue;
        }
        let Value::Mapping(section) = section else { continue };
        let Some(ros_params) = section.get(Value::from("ros__parameters")) else { continue };
        let mut flattened = Vec::new();
        flatten_ros_parameters("", ros_params, &mut flattened);
        for (name, value) in flattened {
            let data_type = infer_ros_param_type(&value);
            out.push(Parameter { name, value, data_type: Some(data_type), parameter_type, source: None });
        }
    }
    out
}

/// Resolves `path` to an existing file on disk, mirroring the original's
/// `_resolve_existing_parameter_file_path`: it must already be absolute with
/// no remaining substitution forms, and if it doesn't exist yet falls back to
/// the deployment package's source tree (a build-time install/share that
/// hasn't been populated yet).
fn resolve_existing_parameter_file_path(path: &str, package_name: Option<&str>, registry: &Registry) -> Option<PathBuf> {
    if path.is_empty() || path.starts_with('$') {
        return None;
    }
    let candidate = PathBuf::from(path);
    if !candidate.is_absolute() {
        return None;
    }
    if candidate.exists() {
        return Some(candidate);
    }

    let deployment_pkg = registry.deployment_package_name.as_deref()?;
    let inferred_pkg = package_name
        .map(str::to_string)
        .or_else(|| infer_package_from_share_path(path).map(str::to_string))?;
    if inferred_pkg != deployment_pkg {
        return None;
    }

    let marker = format!("/share/{inferred_pkg}/");
    let idx = path.find(&marker)?;
    let rel = &path[idx + marker.len()..];
    let src_pkg = registry.get_package_source_path(&inferred_pkg)?;
    let candidate = src_pkg.join(rel);
    candidate.exists().then_some(candidate)
}

fn infer_package_from_share_path(path: &str) -> Option<&str> {
    let parts: Vec<&str> = path.split('/').collect();
    let share_idx = parts.iter().rposition(|p| *p == "share")?;
    parts.get(share_idx + 1).copied()
}

fn infer_ros_param_type(value: &Value) -> ParameterDataType {
    match value {
        Value::Bool(_) => ParameterDataType::Bool,
        Value::Number(n) if n.is_i64() || n.is_u64() => ParameterDataType::Int,
        Value::Number(_) => ParameterDataType::Double,
        Value::Sequence(seq) => match seq.first() {
            Some(Value::Bool(_)) => ParameterDataType::BoolArray,
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => ParameterDataType::IntArray,
            Some(Value::Number(_)) => ParameterDataType::DoubleArray,
            _ => ParameterDataType::StringArray,
        },
        _ => ParameterDataType::String,
    }
}

fn flatten_ros_parameters(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Mapping(map) => {
            for (key, nested) in map {
                let Some(key) = key.as_str() else { continue };
                let prefixed = if prefix.is_empty() { key.to_string() } else { format!("{prefix}.{key}") };
                flatten_ros_parameters(&prefixed, nested, out);
            }
        }
        other => out.push((prefix.to_string(), other.clone())),
    }
}

fn param_value(param: &Mapping) -> Option<Value> {
    param
        .get(Value::from("value"))
        .or_else(|| param.get(Value::from("default")))
        .cloned()
}

/// Initializes a node's default parameters and parameter files from its own
/// configuration (spec.md §4.H "Application to a node", `DEFAULT`/`DEFAULT_FILE`
/// priorities), grounded in `initialize_node_parameters`.
pub fn initialize_node_parameters(instance: &InstanceRef, registry: &Registry) -> Result<()> {
    let (resolver, package_name, node_name, parameter_files_cfg, parameters_cfg) = {
        let inst = instance.borrow();
        let Some(node) = inst.configuration.as_node() else { return Ok(()) };
        let package_name = mapping_get_str(&node.launch, "package").map(str::to_string);
        (
            inst.parameter_resolver.clone(),
            package_name,
            inst.name.clone(),
            node.parameter_files.clone(),
            node.parameters.clone(),
        )
    };

    for cfg in &parameter_files_cfg {
        let name = mapping_get_str(cfg, "name")
            .ok_or_else(|| DesignerError::validation("parameter file entry is missing 'name'"))?;
        let value = param_value(cfg)
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| DesignerError::validation(format!("parameter file '{name}' is missing a value")))?;

        let resolved_path = match &resolver {
            Some(r) => resolve_parameter_file_path(&r.borrow(), &value, package_name.as_deref(), false, registry),
            None => value,
        };

        let flattened = load_parameters_from_file(
            &resolved_path,
            &node_name,
            package_name.as_deref(),
            registry,
            ParameterType::DefaultFile,
        );

        let mut inst = instance.borrow_mut();
        inst.parameter_files.push(ParameterFile {
            name: name.to_string(),
            path: resolved_path,
            parameter_type: ParameterType::DefaultFile,
            allow_substs: true,
            is_override: false,
            source: None,
        });
        inst.parameters.extend(flattened);
    }

    for cfg in &parameters_cfg {
        let name = mapping_get_str(cfg, "name")
            .ok_or_else(|| DesignerError::validation("parameter entry is missing 'name'"))?;
        let Some(value) = param_value(cfg) else { continue };
        let data_type = mapping_get_str(cfg, "type").and_then(ParameterDataType::parse);
        let resolved = match &resolver {
            Some(r) => substitute_value(&r.borrow(), &value),
            None => value,
        };
        instance.borrow_mut().parameters.push(Parameter {
            name: name.to_string(),
            value: resolved,
            data_type,
            parameter_type: ParameterType::Default,
            source: None,
        });
    }

    Ok(())
}

fn substitute_value(resolver: &ParameterResolver, value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(subst::resolve_string(resolver, s)),
        other => other.clone(),
    }
}

/// Collects every node instance whose absolute namespace equals
/// `target_namespace`, searching only the subtree where the target could
/// plausibly live (spec.md §4.H "find the set of node instances").
pub fn find_matching_nodes(root: &InstanceRef, target_namespace: &str) -> Vec<InstanceRef> {
    let mut matches = Vec::new();
    search(root, target_namespace, &mut matches);
    matches
}

fn search(instance: &InstanceRef, target_namespace: &str, matches: &mut Vec<InstanceRef>) {
    let inst = instance.borrow();
    let own_namespace = inst.namespace_str();
    if inst.entity_type == InstanceKind::Node && own_namespace == target_namespace {
        matches.push(instance.clone());
    }
    let should_descend = own_namespace.is_empty()
        || own_namespace == "/"
        || target_namespace.starts_with(&format!("{own_namespace}/"))
        || own_namespace == target_namespace;
    if should_descend {
        for (_, child) in inst.children.iter() {
            search(child, target_namespace, matches);
        }
    }
}

/// Applies a `{name, parameter_files?, parameters?}` bundle directly to one
/// target node instance, files first then direct parameters (direct
/// parameters override file-loaded ones by priority ordering alone).
fn apply_to_instance(
    target: &InstanceRef,
    parameter_files: &[Mapping],
    parameters: &[Mapping],
    registry: &Registry,
    file_type: ParameterType,
    direct_type: ParameterType,
) -> Result<()> {
    let (resolver, package_name, node_name) = {
        let inst = target.borrow();
        let package_name = inst
            .configuration
            .as_node()
            .and_then(|n| mapping_get_str(&n.launch, "package"))
            .map(str::to_string);
        (inst.parameter_resolver.clone(), package_name, inst.name.clone())
    };

    for file_mapping in parameter_files {
        for (key, raw_path) in file_mapping.iter() {
            let Some(name) = key.as_str() else { continue };
            let Some(path) = raw_path.as_str() else { continue };
            let resolved = match &resolver {
                Some(r) => resolve_parameter_file_path(&r.borrow(), path, package_name.as_deref(), true, registry),
                None => path.to_string(),
            };
            let flattened = load_parameters_from_file(&resolved, &node_name, package_name.as_deref(), registry, file_type);

            let mut inst = target.borrow_mut();
            inst.parameter_files.push(ParameterFile {
                name: name.to_string(),
                path: resolved,
                parameter_type: file_type,
                allow_substs: true,
                is_override: true,
                source: None,
            });
            inst.parameters.extend(flattened);
        }
    }

    for param in parameters {
        let Some(name) = mapping_get_str(param, "name") else { continue };
        let Some(value) = param_value(param) else { continue };
        let data_type = mapping_get_str(param, "type").and_then(ParameterDataType::parse);
        let resolved = match &resolver {
            Some(r) => substitute_value(&r.borrow(), &value),
            None => value,
        };
        target.borrow_mut().parameters.push(Parameter {
            name: name.to_string(),
            value: resolved,
            data_type,
            parameter_type: direct_type,
            source: None,
        });
    }

    Ok(())
}

fn apply_to_all_nodes(
    root: &InstanceRef,
    parameter_files: &[Mapping],
    parameters: &[Mapping],
    registry: &Registry,
    file_type: ParameterType,
    direct_type: ParameterType,
) -> Result<()> {
    let is_node = root.borrow().entity_type == InstanceKind::Node;
    if is_node {
        apply_to_instance(root, parameter_files, parameters, registry, file_type, direct_type)?;
    }
    let children: Vec<InstanceRef> = root.borrow().children.iter().map(|(_, c)| c.clone()).collect();
    for child in &children {
        apply_to_all_nodes(child, parameter_files, parameters, registry, file_type, direct_type)?;
    }
    Ok(())
}

/// Applies parameters to a target namespace (spec.md §4.H "Application to a
/// node"), `"/"` meaning every node in the whole deployment.
pub fn apply_node_parameters(
    deployment_root: &InstanceRef,
    node_namespace: &str,
    parameter_files: &[Mapping],
    parameters: &[Mapping],
    registry: &Registry,
    file_type: ParameterType,
    direct_type: ParameterType,
) -> Result<()> {
    if node_namespace == "/" {
        return apply_to_all_nodes(deployment_root, parameter_files, parameters, registry, file_type, direct_type);
    }

    let targets = find_matching_nodes(deployment_root, node_namespace);
    if targets.is_empty() {
        tracing::warn!(node_namespace, "target node not found for parameter application");
        return Ok(());
    }
    for target in &targets {
        apply_to_instance(target, parameter_files, parameters, registry, file_type, direct_type)?;
    }
    Ok(())
}

/// Applies a component's `parameter_set` (string or list) to `target`
/// (spec.md §4.H "Parameter-set application"), grounded in
/// `Instance._apply_parameter_set`.
pub fn apply_parameter_set(
    deployment_root: &InstanceRef,
    target: &InstanceRef,
    cfg_component: &Mapping,
    registry: &Registry,
    check_namespace: bool,
    file_parameter_type: ParameterType,
    direct_parameter_type: ParameterType,
) -> Result<()> {
    let Some(parameter_set) = cfg_component.get(Value::from("parameter_set")) else { return Ok(()) };
    let ids: Vec<String> = match parameter_set {
        Value::String(s) => vec![s.clone()],
        Value::Sequence(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => return Ok(()),
    };

    let target_namespace = target.borrow().namespace_str();

    for param_set_id in ids {
        let (name, kind) = crate::registry::entity_name_decode(&param_set_id)?;
        if kind != crate::model::EntityKind::ParameterSet {
            return Err(DesignerError::validation(format!(
                "expected a parameter_set entity reference, found '{param_set_id}'"
            )));
        }
        let param_set = registry.get_parameter_set(&name)?;

        let base_resolver = deployment_root.borrow().parameter_resolver.clone();
        let resolver_for_set = if !param_set.local_variables.is_empty() {
            base_resolver.as_ref().map(|shared| {
                let extra: std::collections::HashMap<String, String> = param_set
                    .local_variables
                    .iter()
                    .filter_map(|v| {
                        let name = mapping_get_str(v, "name")?;
                        let value = mapping_get_str(v, "value")?;
                        Some((name.to_string(), value.to_string()))
                    })
                    .collect();
                shared.borrow().scoped(&extra)
            })
        } else {
            None
        };

        for param_config in &param_set.parameters {
            let Some(node_namespace) = mapping_get_str(param_config, "node") else { continue };
            if check_namespace
                && node_namespace != target_namespace
                && !node_namespace.starts_with(&format!("{target_namespace}/"))
            {
                continue;
            }

            let parameter_files = crate::model::field_as_mapping_list(param_config, "parameter_files");
            let parameters = crate::model::field_as_mapping_list(param_config, "parameters");

            if let Some(scoped) = &resolver_for_set {
                apply_with_scoped_resolver(
                    target,
                    node_namespace,
                    &parameter_files,
                    &parameters,
                    registry,
                    file_parameter_type,
                    direct_parameter_type,
                    scoped,
                )?;
            } else {
                apply_node_parameters(
                    target,
                    node_namespace,
                    &parameter_files,
                    &parameters,
                    registry,
                    file_parameter_type,
                    direct_parameter_type,
                )?;
            }
        }
    }
    Ok(())
}

/// Temporarily swaps in a scoped resolver (carrying `local_variables`) on the
/// matched target nodes for the duration of one parameter-set application,
/// then restores the original (spec.md §4.H: "the base resolver is unchanged").
fn apply_with_scoped_resolver(
    search_root: &InstanceRef,
    node_namespace: &str,
    parameter_files: &[Mapping],
    parameters: &[Mapping],
    registry: &Registry,
    file_type: ParameterType,
    direct_type: ParameterType,
    scoped: &ParameterResolver,
) -> Result<()> {
    let targets = if node_namespace == "/" {
        collect_all_nodes(search_root)
    } else {
        find_matching_nodes(search_root, node_namespace)
    };
    for target in &targets {
        let original = target.borrow().parameter_resolver.clone();
        target.borrow_mut().parameter_resolver = Some(scoped.clone().shared());
        let result = apply_to_instance(target, parameter_files, parameters, registry, file_type, direct_type);
        target.borrow_mut().parameter_resolver = original;
        result?;
    }
    Ok(())
}

fn collect_all_nodes(instance: &InstanceRef) -> Vec<InstanceRef> {
    let mut out = Vec::new();
    fn walk(instance: &InstanceRef, out: &mut Vec<InstanceRef>) {
        if instance.borrow().entity_type == InstanceKind::Node {
            out.push(instance.clone());
        }
        let children: Vec<InstanceRef> = instance.borrow().children.iter().map(|(_, c)| c.clone()).collect();
        for child in &children {
            walk(child, out);
        }
    }
    walk(instance, &mut out);
    out
}

/// Final substitution pass (spec.md §4.F step 6): resolves any remaining
/// `${input}`/`$(var)` forms left in node parameters after topics are known.
pub fn finalize_parameters_recursive(instance: &InstanceRef) {
    let is_node = instance.borrow().entity_type == InstanceKind::Node;
    if is_node {
        resolve_all_parameters(instance);
    }
    let children: Vec<InstanceRef> = instance.borrow().children.iter().map(|(_, c)| c.clone()).collect();
    for child in &children {
        finalize_parameters_recursive(child);
    }
}

fn resolve_all_parameters(instance: &InstanceRef) {
    let resolver = instance.borrow().parameter_resolver.clone();
    if let Some(resolver) = &resolver {
        let ctx = InstancePortContext { instance: instance.clone() };
        let mut inst = instance.borrow_mut();
        let instance_name = inst.name.clone();
        for parameter in &mut inst.parameters {
            if let Value::String(s) = &parameter.value {
                let resolved = subst::resolve_with_context(&resolver.borrow(), &ctx, &instance_name, s);
                parameter.value = Value::String(resolved);
            }
        }
        for file in &mut inst.parameter_files {
            file.path = subst::resolve_with_context(&resolver.borrow(), &ctx, &instance_name, &file.path);
        }
    }

    // Launch-ready ordering (spec.md §8 property 8): stable-sort ascending by
    // priority regardless of the order application passes ran in, so entries
    // at a higher priority always land after same-named lower-priority ones.
    instance.borrow_mut().parameters.sort_by_key(|p| p.parameter_type);
}

struct InstancePortContext {
    instance: InstanceRef,
}

impl subst::SubstitutionContext for InstancePortContext {
    fn input_topic(&self, port_name: &str) -> Option<String> {
        let inst = self.instance.borrow();
        inst.in_ports.get(port_name).map(|p| p.borrow().topic_str())
    }

    fn output_topic(&self, port_name: &str) -> Option<String> {
        let inst = self.instance.borrow();
        inst.out_ports.get(port_name).map(|p| p.borrow().topic_str())
    }

    fn parameter_value(&self, name: &str) -> Option<String> {
        let inst = self.instance.borrow();
        inst.parameters.iter().find(|p| p.name == name).and_then(|p| p.value.as_str().map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConfigCommon, NodeConfig, SourceMap, SubType};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn common(name: &str) -> ConfigCommon {
        ConfigCommon {
            name: name.to_string(),
            full_name: format!("{name}.node"),
            file_path: PathBuf::from(format!("{name}.node.yaml")),
            package: None,
            source_map: SourceMap::default(),
            raw: Value::Null,
            sub_type: SubType::Base,
        }
    }

    fn mapping_of(pairs: &[(&str, Value)]) -> Mapping {
        let mut m = Mapping::new();
        for (k, v) in pairs {
            m.insert(Value::from(*k), v.clone());
        }
        m
    }

    fn node_instance(name: &str, params: Vec<Mapping>) -> InstanceRef {
        let cfg = NodeConfig {
            common: common(name),
            launch: Mapping::new(),
            inputs: vec![],
            outputs: vec![],
            parameter_files: vec![],
            parameters: params,
            processes: vec![],
            package_name: None,
            package_provider: None,
            package_resolution: None,
        };
        Instance::new(name.to_string(), vec![name.to_string()], 1, InstanceKind::Node, Config::Node(cfg))
    }

    fn test_registry() -> Registry {
        Registry::build(
            &crate::yaml::YamlLoader::new(false),
            &[],
            HashMap::new(),
            HashMap::new(),
            &[],
        )
        .unwrap()
    }

    #[test]
    fn initializes_default_parameters() {
        let node = node_instance(
            "n",
            vec![mapping_of(&[
                ("name", Value::from("rate")),
                ("value", Value::from(10)),
                ("type", Value::from("int")),
            ])],
        );
        node.borrow_mut().parameter_resolver = Some(ParameterResolver::default().shared());
        initialize_node_parameters(&node, &test_registry()).unwrap();
        let params = &node.borrow().parameters;
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].parameter_type, ParameterType::Default);
    }

    #[test]
    fn find_matching_nodes_locates_node_by_namespace() {
        let node = node_instance("tracker", vec![]);
        assert_eq!(find_matching_nodes(&node, "/tracker").len(), 1);
        assert_eq!(find_matching_nodes(&node, "/other").len(), 0);
    }

    #[test]
    fn global_parameter_set_applies_to_every_node() {
        let node = node_instance("tracker", vec![]);
        let files: Vec<Mapping> = vec![];
        let params = vec![mapping_of(&[("name", Value::from("use_sim_time")), ("value", Value::from(true))])];
        apply_node_parameters(&node, "/", &files, &params, &test_registry(), ParameterType::Mode, ParameterType::Mode).unwrap();
        assert_eq!(node.borrow().parameters.len(), 1);
    }
}
