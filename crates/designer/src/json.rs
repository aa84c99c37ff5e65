//! Component J (spec.md §4.J): the versioned instance-tree JSON contract.
//!
//! Grounded in `original_source/.../builder/instances.py`'s
//! `Instance.collect_instance_data` / `_serialize_port` / `_serialize_event`,
//! which walk the built tree into plain dicts for the out-of-scope
//! downstream readers (launcher, monitor, visualization, parameter-set
//! template, build-script generator) named in spec.md §6.

use serde::Serialize;
use serde_yaml::Value;

use crate::model::{Direction, InstanceKind, InstanceRef, PortRef};

pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub schema_version: &'static str,
    pub metadata: Metadata,
    pub data: InstanceData,
}

#[derive(Debug, Serialize)]
pub struct Metadata {
    pub system_name: String,
    pub mode: String,
    pub generated_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PortData {
    pub unique_id: String,
    pub name: String,
    pub msg_type: String,
    pub namespace: Vec<String>,
    pub topic: String,
    pub is_global: bool,
    pub port_path: String,
    pub connected_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LinkData {
    pub unique_id: String,
    pub from_port: String,
    pub to_port: String,
    pub msg_type: String,
    pub topic: String,
}

#[derive(Debug, Serialize)]
pub struct ParameterData {
    pub name: String,
    pub value: Value,
    pub parameter_type: String,
}

#[derive(Debug, Serialize)]
pub struct InstanceData {
    pub name: String,
    pub unique_id: String,
    pub entity_type: &'static str,
    pub namespace: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_unit: Option<String>,
    pub in_ports: Vec<PortData>,
    pub out_ports: Vec<PortData>,
    pub children: Vec<InstanceData>,
    pub links: Vec<LinkData>,
    pub parameters: Vec<ParameterData>,
}

fn entity_type_str(kind: InstanceKind) -> &'static str {
    match kind {
        InstanceKind::System => "system",
        InstanceKind::Module => "module",
        InstanceKind::Node => "node",
    }
}

fn serialize_port(port: &PortRef) -> PortData {
    let p = port.borrow();
    let connected: Vec<PortRef> = match p.direction {
        Direction::Out => p.users.clone(),
        Direction::In => p.servers.clone(),
    };
    PortData {
        unique_id: p.port_path(),
        name: p.name.clone(),
        msg_type: p.msg_type.clone(),
        namespace: p.namespace.clone(),
        topic: p.topic_str(),
        is_global: p.is_global,
        port_path: p.port_path(),
        connected_ids: connected.iter().map(|c| c.borrow().port_path()).collect(),
    }
}

/// Walks `instance` and its subtree into a serializable [`InstanceData`]
/// (spec.md §4.J), grounded in `collect_instance_data`. `unique_id` uses the
/// instance's dotted namespace path rather than the reference's object
/// identity used upstream, since Rust gives no stable identity hash across
/// runs; this is documented as an intentional divergence (see DESIGN.md).
pub fn serialize_instance(instance: &InstanceRef) -> InstanceData {
    let inst = instance.borrow();
    let unique_id = if inst.namespace_str().is_empty() {
        format!("/{}", inst.name)
    } else {
        format!("{}/{}", inst.namespace_str(), inst.name)
    };

    InstanceData {
        name: inst.name.clone(),
        unique_id,
        entity_type: entity_type_str(inst.entity_type),
        namespace: inst.namespace.clone(),
        compute_unit: inst.compute_unit.clone(),
        in_ports: inst.in_ports.values().map(serialize_port).collect(),
        out_ports: inst.out_ports.values().map(serialize_port).collect(),
        children: inst.children.iter().map(|(_, child)| serialize_instance(child)).collect(),
        links: inst
            .links
            .iter()
            .map(|link| LinkData {
                unique_id: format!("{}->{}", link.from_port.borrow().port_path(), link.to_port.borrow().port_path()),
                from_port: link.from_port.borrow().port_path(),
                to_port: link.to_port.borrow().port_path(),
                msg_type: link.msg_type.clone(),
                topic: link.to_port.borrow().topic_str(),
            })
            .collect(),
        parameters: inst
            .parameters
            .iter()
            .map(|param| ParameterData {
                name: param.name.clone(),
                value: param.value.clone(),
                parameter_type: param.parameter_type.to_string(),
            })
            .collect(),
    }
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Builds a successful snapshot payload for one completed mode build.
pub fn to_snapshot(root: &InstanceRef, system_name: &str, mode: &str) -> Snapshot {
    Snapshot {
        schema_version: SCHEMA_VERSION,
        metadata: Metadata {
            system_name: system_name.to_string(),
            mode: mode.to_string(),
            generated_at: unix_timestamp(),
            step: None,
            error: None,
        },
        data: serialize_instance(root),
    }
}

/// Builds a crash-diagnostic snapshot: the partially-built tree as it stood
/// when `step` failed, tagged with the triggering error message (spec.md
/// §4.F "each step invokes the snapshot callback ... on error").
pub fn to_step_snapshot(root: &InstanceRef, system_name: &str, mode: &str, step: &str, error: Option<&str>) -> Snapshot {
    Snapshot {
        schema_version: SCHEMA_VERSION,
        metadata: Metadata {
            system_name: system_name.to_string(),
            mode: mode.to_string(),
            generated_at: unix_timestamp(),
            step: Some(step.to_string()),
            error: error.map(str::to_string),
        },
        data: serialize_instance(root),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    use crate::registry::Registry;
    use crate::yaml::YamlLoader;

    fn write(dir: &std::path::Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn serializes_a_trivial_system_with_one_connection() {
        let dir = tempfile::tempdir().unwrap();
        let loader = YamlLoader::new(false);
        let paths = vec![
            write(
                dir.path(),
                "A.node.yaml",
                "name: A.node\nlaunch:\n  executable: demo/a\ninputs:\n  - name: in\n    message_type: std_msgs/String\noutputs:\n  - name: out\n    message_type: std_msgs/Int32\n",
            ),
            write(
                dir.path(),
                "S.system.yaml",
                "name: S.system\ncomponents:\n  - name: a\n    entity: A.node\nconnections: []\n",
            ),
        ];
        let registry = Registry::build(&loader, &paths, HashMap::new(), HashMap::new(), &[]).unwrap();
        let system = registry.get_system("S.system").unwrap();
        let root = crate::tree::build_deployment(system, &registry, HashMap::new()).unwrap();

        let snapshot = to_snapshot(&root, "S.system", "default");
        assert_eq!(snapshot.schema_version, "1.0");
        assert_eq!(snapshot.data.children.len(), 1);
        assert_eq!(snapshot.data.children[0].entity_type, "node");
        assert_eq!(snapshot.data.children[0].in_ports[0].unique_id, "/a/input/in");
        assert_eq!(snapshot.data.children[0].out_ports[0].topic, "/a/out");

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"schema_version\":\"1.0\""));
    }
}
