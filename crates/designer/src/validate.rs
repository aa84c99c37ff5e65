//! Component K (spec.md §4.K): post-build validators.
//!
//! Most of §4.K's invariants are enforced inline where they are cheapest to
//! check — the pub/sub rule and external-port type conflicts are rechecked
//! the moment a reference is merged, in [`crate::link::register_external_port`]
//! (grounded in `LinkManager._register_external_ports`). This module covers
//! the two checks that only make sense once the *entire* tree exists:
//! whole-deployment namespace uniqueness (spec.md §4.F step 5, grounded in
//! `check_duplicate_node_namespaces`) and a defensive finalization sweep of
//! the pub/sub invariant, used by the `validate`/lint CLI surface to report
//! every violation rather than stopping at the first one found during the
//! build itself.

use std::collections::HashMap;

use crate::error::{DesignerError, Result};
use crate::model::{InstanceKind, InstanceRef};

/// Whole-deployment namespace uniqueness (spec.md §3, §4.F step 5, §8
/// property 4). Root-level namespaces (`""`, `"/"`) are exempt.
pub fn check_duplicate_node_namespaces(root: &InstanceRef) -> Result<()> {
    let mut seen: HashMap<String, String> = HashMap::new();
    collect_namespaces(root, &mut seen)
}

fn collect_namespaces(instance: &InstanceRef, seen: &mut HashMap<String, String>) -> Result<()> {
    let (entity_type, namespace, name, children) = {
        let inst = instance.borrow();
        (
            inst.entity_type,
            inst.namespace_str(),
            inst.name.clone(),
            inst.children.iter().map(|(_, c)| c.clone()).collect::<Vec<_>>(),
        )
    };

    if entity_type == InstanceKind::Node && !namespace.is_empty() && namespace != "/" {
        if let Some(existing) = seen.get(&namespace) {
            return Err(DesignerError::validation(format!(
                "duplicate node namespace found: '{namespace}'. Conflict between instance '{name}' and '{existing}'"
            )));
        }
        seen.insert(namespace, name);
    }

    for child in &children {
        collect_namespaces(child, seen)?;
    }
    Ok(())
}

/// Defensive finalization sweep of the `OutPort.reference ≤ 1` invariant
/// (spec.md §8 property 5). The incremental check in
/// [`crate::link::register_external_port`] already enforces this as each
/// merge happens; this walk exists for callers (e.g. a lint subcommand) that
/// want every violation in the finished tree reported at once rather than
/// failing fast mid-build.
pub fn check_pubsub_invariant(root: &InstanceRef) -> Result<()> {
    let (out_ports, children) = {
        let inst = root.borrow();
        (inst.out_ports.values().cloned().collect::<Vec<_>>(), inst.children.iter().map(|(_, c)| c.clone()).collect::<Vec<_>>())
    };

    for port in &out_ports {
        let p = port.borrow();
        if p.reference.len() > 1 {
            let refs: Vec<String> = p.reference.iter().map(|r| r.borrow().port_path()).collect();
            return Err(DesignerError::validation(format!(
                "OutPort '{}' has {} references, violating the pub/sub rule: {:?}",
                p.port_path(),
                p.reference.len(),
                refs
            )));
        }
    }

    for child in &children {
        check_pubsub_invariant(child)?;
    }
    Ok(())
}

/// Runs every post-build validator (spec.md §4.K), in the same order the
/// tree builder's own finalization step runs them.
pub fn validate(root: &InstanceRef) -> Result<()> {
    check_duplicate_node_namespaces(root)?;
    check_pubsub_invariant(root)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::path::PathBuf;

    use crate::registry::Registry;
    use crate::yaml::YamlLoader;

    fn write(dir: &std::path::Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn accepts_a_tree_with_unique_node_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let loader = YamlLoader::new(false);
        let paths = vec![
            write(dir.path(), "N.node.yaml", "name: N.node\nlaunch:\n  executable: demo/n\n"),
            write(
                dir.path(),
                "S.system.yaml",
                "name: S.system\ncomponents:\n  - name: a\n    entity: N.node\n    namespace: a\n  - name: b\n    entity: N.node\n    namespace: b\n",
            ),
        ];
        let registry = Registry::build(&loader, &paths, StdHashMap::new(), StdHashMap::new(), &[]).unwrap();
        let system = registry.get_system("S.system").unwrap();
        let root = crate::tree::build_deployment(system, &registry, StdHashMap::new()).unwrap();

        assert!(validate(&root).is_ok());
    }
}
