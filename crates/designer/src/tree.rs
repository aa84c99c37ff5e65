//! Component F (spec.md §4.F): the instance tree builder.
//!
//! Grounded in `original_source/.../builder/instances.py`'s
//! `DeploymentInstance.set_system` (the six-step pipeline) and
//! `Instance.set_instances` / `_set_system_instances` / `_set_module_instances`
//! / `_set_node_instances` / `_create_module_children` / `_apply_parameter_set`
//! (the recursive system/module/node dispatch, the cycle guard, and
//! parameter-set application).
//!
//! One structural departure from the reference: `Instance::new` there takes
//! no configuration (it is assigned after dispatch decides the entity kind);
//! here `Instance::new` requires a `Config` up front, so the entity is
//! resolved from the registry before construction instead of after.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde_yaml::{Mapping, Value};

use crate::error::{DesignerError, Result};
use crate::model::{
    mapping_get_str, Config, EntityKind, Instance, InstanceKind, InstanceRef, ParameterResolver,
    ParameterType, SharedResolver, SystemConfig,
};
use crate::registry::Registry;

const DEFAULT_LAYER_LIMIT: u32 = 50;
const LAYER_LIMIT_ENV: &str = "AUTOWARE_SYSTEM_DESIGNER_LAYER_LIMIT";

/// Module recursion depth ceiling (spec.md §3, §5), overridable for testing
/// and for deployments with deliberately deep composition.
fn layer_limit() -> u32 {
    std::env::var(LAYER_LIMIT_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_LAYER_LIMIT)
}

/// Builds the full instance tree for one mode-resolved `SystemConfig` (spec.md
/// §4.F, the whole of `DeploymentInstance.set_system`). `system_config` must
/// already have had mode resolution (4.D/4.E) applied.
pub fn build_deployment(
    system_config: SystemConfig,
    registry: &Registry,
    package_paths: HashMap<String, PathBuf>,
) -> Result<InstanceRef> {
    build_deployment_with_snapshots(system_config, registry, package_paths, None)
}

/// Same pipeline as [`build_deployment`], but invokes `on_step(step_name,
/// &root)` after every step, on both success and failure, so a caller can
/// persist a crash-diagnostic snapshot (spec.md §4.F, §4.I). On failure the
/// partially-built root is still reachable through the callback even though
/// the function itself returns `Err`.
pub fn build_deployment_with_snapshots(
    system_config: SystemConfig,
    registry: &Registry,
    package_paths: HashMap<String, PathBuf>,
    mut on_step: Option<&mut dyn FnMut(&str, &InstanceRef)>,
) -> Result<InstanceRef> {
    let name = system_config.common.name.clone();
    let variables = system_config.variables.clone();
    let variable_files = system_config.variable_files.clone();
    let root = Instance::new(name, Vec::new(), 0, InstanceKind::System, Config::System(system_config));

    let mut resolver = ParameterResolver::new(package_paths);
    for var in &variables {
        if let (Some(name), Some(value)) = (mapping_get_str(var, "name"), mapping_get_str(var, "value")) {
            resolver.set_variable(name, value);
        }
    }
    for path in &variable_files {
        load_variable_file(&mut resolver, Path::new(path));
    }
    root.borrow_mut().parameter_resolver = Some(resolver.shared());

    macro_rules! snap {
        ($step:expr) => {
            if let Some(ref mut cb) = on_step {
                cb($step, &root);
            }
        };
    }

    // step 1: parse + recursive component instantiation.
    if let Err(e) = build_system(&root, registry) {
        snap!("parse");
        return Err(e);
    }
    snap!("parse");

    // step 2: propagate resolver to the whole subtree (children created
    // before the final resolver value existed must see it too).
    let resolver = root.borrow().parameter_resolver.clone();
    propagate_resolver(&root, &resolver);
    snap!("propagate_resolver");

    // step 3: connections at the root, then a diagnostic port check.
    if let Err(e) = crate::link::set_links(&root) {
        snap!("connections");
        return Err(e);
    }
    check_ports(&root);
    snap!("connections");

    // step 4: event tree (out of scope; retained only as a pipeline step).
    build_event_tree(&root);
    snap!("events");

    // step 5: namespace uniqueness.
    if let Err(e) = crate::validate::check_duplicate_node_namespaces(&root) {
        snap!("validate");
        return Err(e);
    }
    snap!("validate");

    // step 6: finalize outstanding substitutions now that topics are known.
    crate::param::finalize_parameters_recursive(&root);
    snap!("finalize");

    Ok(root)
}

/// Best-effort loader for a `variable_files` entry: a YAML mapping of
/// `name: value` pairs merged into `resolver`'s variable map. The reference
/// implementation's loader for this file shape was not available to ground
/// against; this is a documented simplification (see DESIGN.md).
fn load_variable_file(resolver: &mut ParameterResolver, path: &Path) {
    let Ok(contents) = std::fs::read_to_string(path) else {
        tracing::warn!(path = %path.display(), "variable file not found, skipping");
        return;
    };
    let Ok(Value::Mapping(mapping)) = serde_yaml::from_str::<Value>(&contents) else {
        tracing::warn!(path = %path.display(), "variable file is not a YAML mapping, skipping");
        return;
    };
    for (key, value) in mapping.iter() {
        let (Some(key), Some(value)) = (key.as_str(), value.as_str().map(str::to_string).or_else(|| {
            value.as_i64().map(|n| n.to_string()).or_else(|| value.as_bool().map(|b| b.to_string()))
        })) else {
            continue;
        };
        resolver.set_variable(key, value);
    }
}

fn propagate_resolver(instance: &InstanceRef, resolver: &Option<SharedResolver>) {
    instance.borrow_mut().parameter_resolver = resolver.clone();
    let children: Vec<InstanceRef> = instance.borrow().children.iter().map(|(_, c)| c.clone()).collect();
    for child in &children {
        propagate_resolver(child, resolver);
    }
}

/// Resolves `entity_id` through the registry, creates the child instance with
/// its real configuration already attached, links it to `parent`, applies the
/// cycle guard for modules, and recurses into the child's own dispatch
/// (spec.md §4.F step 1).
#[allow(clippy::too_many_arguments)]
fn instantiate_entity(
    parent: &InstanceRef,
    name: String,
    entity_id: &str,
    compute_unit: Option<String>,
    namespace: Vec<String>,
    layer: u32,
    parent_module_list: Vec<String>,
    resolver: Option<SharedResolver>,
    registry: &Registry,
) -> Result<InstanceRef> {
    if layer > layer_limit() {
        return Err(DesignerError::ModuleConfig {
            message: format!(
                "module recursion depth exceeded layer_limit ({}) while instantiating '{entity_id}'",
                layer_limit()
            ),
            location: None,
        });
    }

    let (entity_name, entity_kind) = crate::registry::entity_name_decode(entity_id)?;

    if entity_kind == EntityKind::Module && parent_module_list.iter().any(|e| e == entity_id) {
        return Err(DesignerError::ModuleConfig {
            message: format!("module '{entity_id}' is already on the include stack; circular module reference"),
            location: None,
        });
    }

    let child = match entity_kind {
        EntityKind::System => {
            let cfg = registry.get_system(&entity_name)?;
            Instance::new(name.clone(), namespace, layer, InstanceKind::System, Config::System(cfg))
        }
        EntityKind::Module => {
            let cfg = registry.get_module(&entity_name)?;
            Instance::new(name.clone(), namespace, layer, InstanceKind::Module, Config::Module(cfg))
        }
        EntityKind::Node => {
            let cfg = registry.get_node(&entity_name)?;
            Instance::new(name.clone(), namespace, layer, InstanceKind::Node, Config::Node(cfg))
        }
        EntityKind::ParameterSet => {
            return Err(DesignerError::validation(format!(
                "entity '{entity_id}' is a parameter_set and cannot be instantiated as a component"
            )))
        }
    };

    child.borrow_mut().compute_unit = compute_unit;
    child.borrow_mut().parent = Some(Rc::downgrade(parent));
    child.borrow_mut().parameter_resolver = resolver;

    let mut guard = parent_module_list;
    if entity_kind == EntityKind::Module {
        guard.push(entity_id.to_string());
    }
    child.borrow_mut().parent_module_list = guard;

    parent.borrow_mut().children.push(name, child.clone());

    match entity_kind {
        EntityKind::System => build_system(&child, registry)?,
        EntityKind::Module => build_module(&child, registry)?,
        EntityKind::Node => build_node(&child, registry)?,
        EntityKind::ParameterSet => unreachable!("rejected above"),
    }

    Ok(child)
}

/// `namespace` field of a system component: an absolute path split on `/`, or
/// the empty (root) namespace when absent (spec.md §4.F step 1; note this
/// does *not* append the component's own name, unlike module children).
fn component_namespace(cfg_component: &Mapping) -> Vec<String> {
    match mapping_get_str(cfg_component, "namespace") {
        Some(ns) if !ns.is_empty() => {
            ns.trim_matches('/').split('/').filter(|s| !s.is_empty()).map(str::to_string).collect()
        }
        _ => Vec::new(),
    }
}

fn build_system(instance: &InstanceRef, registry: &Registry) -> Result<()> {
    let (components, layer, parent_module_list, resolver) = {
        let inst = instance.borrow();
        (
            inst.configuration.as_system().map(|s| s.components.clone()).unwrap_or_default(),
            inst.layer,
            inst.parent_module_list.clone(),
            inst.parameter_resolver.clone(),
        )
    };

    for cfg_component in &components {
        let name = mapping_get_str(cfg_component, "name")
            .ok_or_else(|| DesignerError::validation("system component is missing required field 'name'"))?
            .to_string();
        let entity_id = mapping_get_str(cfg_component, "entity")
            .ok_or_else(|| {
                DesignerError::validation(format!("system component '{name}' is missing required field 'entity'"))
            })?
            .to_string();
        let compute_unit = mapping_get_str(cfg_component, "compute_unit").map(str::to_string);
        let namespace = component_namespace(cfg_component);

        instantiate_entity(
            instance,
            name.clone(),
            &entity_id,
            compute_unit,
            namespace,
            layer,
            parent_module_list.clone(),
            resolver.clone(),
            registry,
        )
        .map_err(|e| DesignerError::ModuleConfig {
            message: format!("error in setting component instance '{name}': {e}"),
            location: None,
        })?;
    }

    // System-level parameter_sets apply globally (no namespace restriction)
    // at MODE_FILE/MODE priority, grounded in `_set_system_instances`'s
    // `dummy_component_config` call.
    let parameter_sets = { instance.borrow().configuration.as_system().map(|s| s.parameter_sets.clone()).unwrap_or_default() };
    let ids: Vec<Value> = parameter_sets.iter().filter_map(|m| mapping_get_str(m, "name").map(Value::from)).collect();
    if !ids.is_empty() {
        let mut dummy = Mapping::new();
        dummy.insert(Value::from("parameter_set"), Value::Sequence(ids));
        crate::param::apply_parameter_set(
            instance,
            instance,
            &dummy,
            registry,
            false,
            ParameterType::ModeFile,
            ParameterType::Mode,
        )?;
    }

    // Per-component parameter_set applies after every sibling component
    // exists, so it can target nodes anywhere in the deployment.
    for cfg_component in &components {
        let Some(name) = mapping_get_str(cfg_component, "name") else { continue };
        let Some(child) = instance.borrow().children.get(name).cloned() else { continue };
        crate::param::apply_parameter_set(
            instance,
            &child,
            cfg_component,
            registry,
            true,
            ParameterType::OverrideFile,
            ParameterType::Override,
        )?;
    }

    Ok(())
}

fn build_module(instance: &InstanceRef, registry: &Registry) -> Result<()> {
    let (instances_cfg, namespace, layer, compute_unit, parent_module_list, resolver) = {
        let inst = instance.borrow();
        let module = inst
            .configuration
            .as_module()
            .expect("build_module invoked on a non-module instance");
        (
            module.instances.clone(),
            inst.namespace.clone(),
            inst.layer,
            inst.compute_unit.clone(),
            inst.parent_module_list.clone(),
            inst.parameter_resolver.clone(),
        )
    };

    for cfg_node in &instances_cfg {
        let child_name = mapping_get_str(cfg_node, "name")
            .ok_or_else(|| DesignerError::validation("module instance entry is missing required field 'name'"))?
            .to_string();
        let child_entity_id = mapping_get_str(cfg_node, "entity")
            .ok_or_else(|| {
                DesignerError::validation(format!("module instance '{child_name}' is missing required field 'entity'"))
            })?
            .to_string();

        let mut child_namespace = namespace.clone();
        child_namespace.push(child_name.clone());

        instantiate_entity(
            instance,
            child_name.clone(),
            &child_entity_id,
            compute_unit.clone(),
            child_namespace,
            layer + 1,
            parent_module_list.clone(),
            resolver.clone(),
            registry,
        )
        .map_err(|e| DesignerError::ModuleConfig {
            message: format!("error setting instances for module child '{child_name}': {e}"),
            location: None,
        })?;
    }

    crate::link::set_links(instance)
}

fn build_node(instance: &InstanceRef, registry: &Registry) -> Result<()> {
    crate::link::initialize_node_ports(instance);
    crate::param::initialize_node_parameters(instance, registry)
}

fn build_event_tree(_instance: &InstanceRef) {
    // Process/event tree construction is an out-of-scope downstream view
    // (spec.md §4.F step 4); retained as a no-op to preserve pipeline order.
}

/// Recursive debug-only port diagnostic (spec.md §4.F step 3 "verify ports"),
/// grounded in `LinkManager.check_ports`.
fn check_ports(instance: &InstanceRef) {
    let (entity_type, in_ports, out_ports) = {
        let inst = instance.borrow();
        (inst.entity_type, inst.in_ports.clone(), inst.out_ports.clone())
    };

    if entity_type == InstanceKind::Node {
        for (_, port) in in_ports.iter() {
            let p = port.borrow();
            if p.servers.is_empty() {
                tracing::debug!(port = %p.port_path(), "input port has no server");
            }
        }
        for (_, port) in out_ports.iter() {
            let p = port.borrow();
            if p.users.is_empty() {
                tracing::debug!(port = %p.port_path(), "output port has no subscriber");
            }
        }
    }

    let children: Vec<InstanceRef> = instance.borrow().children.iter().map(|(_, c)| c.clone()).collect();
    for child in &children {
        check_ports(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yaml::YamlLoader;
    use std::path::PathBuf as StdPathBuf;

    fn write(dir: &Path, name: &str, content: &str) -> StdPathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn build_registry(dir: &Path, files: &[(&str, &str)]) -> Registry {
        let loader = YamlLoader::new(false);
        let paths: Vec<StdPathBuf> = files.iter().map(|(name, content)| write(dir, name, content)).collect();
        Registry::build(&loader, &paths, HashMap::new(), HashMap::new(), &[]).unwrap()
    }

    #[test]
    fn builds_a_two_node_system_and_wires_its_connection() {
        let dir = tempfile::tempdir().unwrap();
        let registry = build_registry(
            dir.path(),
            &[
                (
                    "Talker.node.yaml",
                    "name: Talker.node\nlaunch:\n  executable: demo/talker\noutputs:\n  - name: out\n    message_type: std_msgs/String\n",
                ),
                (
                    "Listener.node.yaml",
                    "name: Listener.node\nlaunch:\n  executable: demo/listener\ninputs:\n  - name: in\n    message_type: std_msgs/String\n",
                ),
                (
                    "Demo.system.yaml",
                    "name: Demo.system\ncomponents:\n  - name: talker\n    entity: Talker.node\n  - name: listener\n    entity: Listener.node\nconnections:\n  - from: talker.output.out\n    to: listener.input.in\n",
                ),
            ],
        );

        let system = registry.get_system("Demo.system").unwrap();
        let root = build_deployment(system, &registry, HashMap::new()).unwrap();

        assert_eq!(root.borrow().children.len(), 2);
        assert_eq!(root.borrow().links.len(), 1);
        let talker = root.borrow().children.get("talker").unwrap().clone();
        assert_eq!(talker.borrow().namespace_str(), "");
    }

    #[test]
    fn module_cycle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = build_registry(
            dir.path(),
            &[
                ("A.module.yaml", "name: A.module\ninstances:\n  - name: b\n    entity: B.module\n"),
                ("B.module.yaml", "name: B.module\ninstances:\n  - name: a\n    entity: A.module\n"),
                (
                    "Demo.system.yaml",
                    "name: Demo.system\ncomponents:\n  - name: root_module\n    entity: A.module\n",
                ),
            ],
        );

        let system = registry.get_system("Demo.system").unwrap();
        let err = build_deployment(system, &registry, HashMap::new()).unwrap_err();
        assert!(matches!(err, DesignerError::ModuleConfig { .. }));
    }

    #[test]
    fn duplicate_node_namespace_across_components_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let registry = build_registry(
            dir.path(),
            &[
                ("N.node.yaml", "name: N.node\nlaunch:\n  executable: demo/n\n"),
                (
                    "Demo.system.yaml",
                    "name: Demo.system\ncomponents:\n  - name: n\n    entity: N.node\n    namespace: shared\n  - name: n2\n    entity: N.node\n    namespace: shared\n",
                ),
            ],
        );

        let system = registry.get_system("Demo.system").unwrap();
        let err = build_deployment(system, &registry, HashMap::new()).unwrap_err();
        assert!(matches!(err, DesignerError::Validation { .. }));
    }

    #[test]
    fn layer_limit_is_enforced() {
        std::env::set_var(LAYER_LIMIT_ENV, "1");
        let dir = tempfile::tempdir().unwrap();
        let registry = build_registry(
            dir.path(),
            &[
                ("Leaf.node.yaml", "name: Leaf.node\nlaunch:\n  executable: demo/leaf\n"),
                ("Inner.module.yaml", "name: Inner.module\ninstances:\n  - name: leaf\n    entity: Leaf.node\n"),
                ("Outer.module.yaml", "name: Outer.module\ninstances:\n  - name: inner\n    entity: Inner.module\n"),
                (
                    "Demo.system.yaml",
                    "name: Demo.system\ncomponents:\n  - name: outer\n    entity: Outer.module\n",
                ),
            ],
        );

        let system = registry.get_system("Demo.system").unwrap();
        let err = build_deployment(system, &registry, HashMap::new());
        std::env::remove_var(LAYER_LIMIT_ENV);
        assert!(err.is_err());
    }
}
