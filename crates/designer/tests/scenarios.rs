//! End-to-end scenarios from spec.md §8, exercised through the public
//! pipeline (`YamlLoader` -> `Registry::build` -> `tree::build_deployment`).
//! Scenario 2 (wildcard module expansion) is covered by
//! `link::wildcard_connection_expands_to_one_link_per_child`; scenario 5
//! (circular module inclusion) by `tree::module_cycle_is_rejected`; scenario
//! 6 (duplicate node namespace) by
//! `tree::duplicate_node_namespace_across_components_is_fatal`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use autoware_system_designer::model::{InstanceKind, ParameterType};
use autoware_system_designer::registry::Registry;
use autoware_system_designer::tree;
use autoware_system_designer::yaml::YamlLoader;
use autoware_system_designer::DesignerError;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

fn build_registry(dir: &Path, files: &[(&str, &str)]) -> Registry {
    let loader = YamlLoader::new(false);
    let paths: Vec<PathBuf> = files.iter().map(|(name, content)| write(dir, name, content)).collect();
    Registry::build(&loader, &paths, HashMap::new(), HashMap::new(), &[]).unwrap()
}

/// Scenario 1: single-mode trivial system, one node with one wired input and
/// one wired output.
#[test]
fn scenario_1_single_mode_trivial_system() {
    let dir = tempfile::tempdir().unwrap();
    let registry = build_registry(
        dir.path(),
        &[
            (
                "A.node.yaml",
                "name: A.node\nlaunch:\n  executable: demo/a\ninputs:\n  - name: in\n    message_type: std_msgs/String\noutputs:\n  - name: out\n    message_type: std_msgs/Int32\n",
            ),
            (
                "S.system.yaml",
                "name: S.system\ncomponents:\n  - name: a\n    entity: A.node\n    namespace: a\nconnections: []\n",
            ),
        ],
    );

    let system = registry.get_system("S.system").unwrap();
    let root = tree::build_deployment(system, &registry, HashMap::new()).unwrap();

    assert_eq!(root.borrow().children.len(), 1);
    let a = root.borrow().children.get("a").unwrap().clone();
    assert_eq!(a.borrow().entity_type, InstanceKind::Node);
    assert_eq!(a.borrow().namespace_str(), "/a");

    let in_port = a.borrow().in_ports.get("in").unwrap().clone();
    assert_eq!(in_port.borrow().port_path(), "/a/input/in");
    assert!(in_port.borrow().servers.is_empty());

    let out_port = a.borrow().out_ports.get("out").unwrap().clone();
    assert_eq!(out_port.borrow().port_path(), "/a/output/out");
    assert_eq!(out_port.borrow().topic_str(), "/a/out");
}

/// Scenario 3: a node's file-provided default (`foo: 1`, `DEFAULT_FILE`)
/// coexists with a parameter-set override (`foo: 42`, `OVERRIDE`); the
/// finalized launch-ready list carries both, lower priority first.
#[test]
fn scenario_3_parameter_set_overrides_a_file_provided_default() {
    let dir = tempfile::tempdir().unwrap();
    let base_yaml = write(dir.path(), "params/base.yaml", "/**:\n  ros__parameters:\n    foo: 1\n");

    let registry = build_registry(
        dir.path(),
        &[
            (
                "NodeX.node.yaml",
                &format!(
                    "name: NodeX.node\nlaunch:\n  executable: demo/node_x\nparameter_files:\n  - name: base\n    value: \"{}\"\n",
                    base_yaml.display()
                ),
            ),
            (
                "Over.parameter_set.yaml",
                "name: Over.parameter_set\nparameters:\n  - node: /node_x\n    parameters:\n      - name: foo\n        type: int\n        value: 42\n",
            ),
            (
                "Demo.system.yaml",
                "name: Demo.system\ncomponents:\n  - name: node_x\n    entity: NodeX.node\n    namespace: node_x\n    parameter_set: Over.parameter_set\n",
            ),
        ],
    );

    let system = registry.get_system("Demo.system").unwrap();
    let root = tree::build_deployment(system, &registry, HashMap::new()).unwrap();

    let node_x = root.borrow().children.get("node_x").unwrap().clone();
    let foo_entries: Vec<_> = node_x.borrow().parameters.iter().filter(|p| p.name == "foo").cloned().collect();

    assert_eq!(foo_entries.len(), 2);
    assert_eq!(foo_entries[0].parameter_type, ParameterType::DefaultFile);
    assert_eq!(foo_entries[0].value.as_i64(), Some(1));
    assert_eq!(foo_entries[1].parameter_type, ParameterType::Override);
    assert_eq!(foo_entries[1].value.as_i64(), Some(42));

    let finalized = foo_entries.last().unwrap();
    assert_eq!(finalized.value.as_i64(), Some(42));
}

/// Scenario 4: a mode-specific `remove` drops a component, and the base
/// connection referencing it is silently dropped rather than erroring.
#[test]
fn scenario_4_mode_remove_drops_component_and_orphan_connection() {
    let dir = tempfile::tempdir().unwrap();
    let registry = build_registry(
        dir.path(),
        &[
            (
                "Core.node.yaml",
                "name: Core.node\nlaunch:\n  executable: demo/core\ninputs:\n  - name: y\n    message_type: std_msgs/Int32\n",
            ),
            (
                "Optional.node.yaml",
                "name: Optional.node\nlaunch:\n  executable: demo/optional\noutputs:\n  - name: x\n    message_type: std_msgs/Int32\n",
            ),
            (
                "Demo.system.yaml",
                "name: Demo.system\n\
                 components:\n  \
                 - name: core\n    entity: Core.node\n  \
                 - name: optional\n    entity: Optional.node\n\
                 connections:\n  \
                 - from: optional.output.x\n    to: core.input.y\n\
                 modes:\n  \
                 - name: default\n  \
                 - name: minimal\n\
                 minimal:\n  \
                 remove:\n    \
                 components:\n      \
                 - name: optional\n",
            ),
        ],
    );

    let base_system = registry.get_system("Demo.system").unwrap();
    let minimal = autoware_system_designer::mode::apply_mode_configuration(base_system, "minimal");
    let root = tree::build_deployment(minimal, &registry, HashMap::new()).unwrap();

    assert_eq!(root.borrow().children.len(), 1);
    assert!(root.borrow().children.get("optional").is_none());
    assert!(root.borrow().children.get("core").is_some());
    assert!(root.borrow().links.is_empty());
}

/// Registering a parameter_set id that resolves to a non-parameter_set
/// entity is a validation error, not a silent no-op.
#[test]
fn parameter_set_reference_must_name_a_parameter_set_entity() {
    let dir = tempfile::tempdir().unwrap();
    let registry = build_registry(
        dir.path(),
        &[
            ("N.node.yaml", "name: N.node\nlaunch:\n  executable: demo/n\n"),
            (
                "Demo.system.yaml",
                "name: Demo.system\ncomponents:\n  - name: n\n    entity: N.node\n    namespace: n\n    parameter_set: N.node\n",
            ),
        ],
    );

    let system = registry.get_system("Demo.system").unwrap();
    let err = tree::build_deployment(system, &registry, HashMap::new()).unwrap_err();
    assert!(matches!(err, DesignerError::Validation { .. }));
}
