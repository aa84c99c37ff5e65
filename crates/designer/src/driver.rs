//! Component I (spec.md §4.I): the deployment driver.
//!
//! Orchestrates one or more full builds of a system entity: resolves which
//! modes to build, applies mode configuration (Component D/E), runs the
//! instance tree builder (Component F) per mode, persists a best-effort JSON
//! snapshot (Component J) per pipeline step, and wraps any failure in a
//! [`DesignerError::Deployment`] that names the mode, the system, and a
//! guidance hint (spec.md §7).
//!
//! Grounded in `original_source/.../deployment.py`'s `Deployment._build`/
//! `_build_mode_instance`: deep-copy the base system per mode, apply the
//! mode, run `set_system`, save a snapshot per step, and on failure persist
//! the last snapshot and abort the whole run — modes are explicitly *not*
//! independent (spec.md §5 "Failure isolation").

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DesignerError, Result};
use crate::json;
use crate::model::InstanceRef;
use crate::registry::Registry;

/// One mode's successful build.
pub struct ModeBuild {
    pub mode: String,
    pub root: InstanceRef,
}

/// Persists snapshots under `<output>/exports/<system>/system_structure/`
/// (spec.md §6 "Persistent output"). Snapshot emission is best-effort: a
/// write failure is logged and otherwise ignored, never surfaced as a build
/// error (spec.md §9 "treat snapshot emission as best-effort").
fn snapshot_dir(output: &Path, system_name: &str) -> PathBuf {
    output.join("exports").join(system_name).join("system_structure")
}

fn write_snapshot(output: &Path, system_name: &str, file_stem: &str, snapshot: &json::Snapshot) {
    let dir = snapshot_dir(output, system_name);
    if let Err(e) = fs::create_dir_all(&dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "failed to create snapshot directory");
        return;
    }
    let path = dir.join(format!("{file_stem}.json"));
    match serde_json::to_vec_pretty(snapshot) {
        Ok(bytes) => {
            if let Err(e) = fs::write(&path, bytes) {
                tracing::warn!(path = %path.display(), error = %e, "failed to write snapshot");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to serialize snapshot"),
    }
}

/// Builds every mode declared on `system_full_name` (or just the modes in
/// `requested_modes` when non-empty), in declaration order, stopping at the
/// first failure (spec.md §5: "a first-mode failure cancels all subsequent
/// modes"). `output_dir`, when given, receives one `<mode>.json` snapshot per
/// successful mode and one `<mode>_<step>.json` snapshot for the failing
/// mode's last step.
pub fn build_all_modes(
    system_full_name: &str,
    registry: &Registry,
    package_paths: &HashMap<String, PathBuf>,
    requested_modes: &[String],
    output_dir: Option<&Path>,
) -> Result<Vec<ModeBuild>> {
    let (name, kind) = crate::registry::entity_name_decode(system_full_name)?;
    if kind != crate::model::EntityKind::System {
        return Err(DesignerError::validation(format!(
            "'{system_full_name}' is not a system entity and cannot be deployed"
        )));
    }
    let base_system = registry.get_system(&name)?;

    let (declared_modes, default_mode) = crate::mode::select_modes(&base_system);
    let modes_to_build: Vec<String> = if requested_modes.is_empty() {
        vec![default_mode]
    } else {
        for mode in requested_modes {
            if !declared_modes.contains(mode) && mode != crate::mode::DEFAULT_MODE {
                return Err(DesignerError::validation(format!(
                    "mode '{mode}' is not declared by system '{system_full_name}'. Declared modes: {declared_modes:?}"
                )));
            }
        }
        requested_modes.to_vec()
    };

    let mut builds = Vec::with_capacity(modes_to_build.len());
    for mode in modes_to_build {
        tracing::info!(system = %system_full_name, mode = %mode, "building deployment");
        let mode_system = crate::mode::apply_mode_configuration(base_system.clone(), &mode);

        let mut last_step = String::new();
        let mut record_step = |step: &str, root: &InstanceRef| {
            last_step = step.to_string();
            if let Some(dir) = output_dir {
                let snapshot = json::to_step_snapshot(root, system_full_name, &mode, step, None);
                write_snapshot(dir, system_full_name, &format!("{mode}_{step}"), &snapshot);
            }
        };

        let built = crate::tree::build_deployment_with_snapshots(
            mode_system,
            registry,
            package_paths.clone(),
            Some(&mut record_step),
        );

        match built {
            Ok(root) => {
                if let Some(dir) = output_dir {
                    let snapshot = json::to_snapshot(&root, system_full_name, &mode);
                    write_snapshot(dir, system_full_name, &mode, &snapshot);
                }
                builds.push(ModeBuild { mode, root });
            }
            Err(e) => {
                tracing::error!(system = %system_full_name, mode = %mode, step = %last_step, error = %e, "deployment failed");
                return Err(DesignerError::Deployment {
                    mode: mode.clone(),
                    system: system_full_name.to_string(),
                    hint: format!(
                        "failed at step '{last_step}'; check component entity ids, connections, and \
                         parameter_set references for this mode, and review any mode-specific override/remove bundle"
                    ),
                    source: Box::new(e),
                });
            }
        }
    }

    Ok(builds)
}

/// Builds a single named mode (or the system's default mode when `mode` is
/// `None`).
pub fn build_one_mode(
    system_full_name: &str,
    registry: &Registry,
    package_paths: &HashMap<String, PathBuf>,
    mode: Option<&str>,
    output_dir: Option<&Path>,
) -> Result<InstanceRef> {
    let requested: Vec<String> = mode.map(|m| vec![m.to_string()]).unwrap_or_default();
    let mut builds = build_all_modes(system_full_name, registry, package_paths, &requested, output_dir)?;
    let build = builds.pop().expect("build_all_modes always returns at least one build on success");
    Ok(build.root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yaml::YamlLoader;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn builds_default_mode_when_none_requested() {
        let dir = tempfile::tempdir().unwrap();
        let loader = YamlLoader::new(false);
        let paths = vec![
            write(dir.path(), "N.node.yaml", "name: N.node\nlaunch:\n  executable: demo/n\n"),
            write(
                dir.path(),
                "Demo.system.yaml",
                "name: Demo.system\ncomponents:\n  - name: n\n    entity: N.node\n",
            ),
        ];
        let registry = Registry::build(&loader, &paths, HashMap::new(), HashMap::new(), &[]).unwrap();

        let root = build_one_mode("Demo.system", &registry, &HashMap::new(), None, None).unwrap();
        assert_eq!(root.borrow().children.len(), 1);
    }

    #[test]
    fn no_modes_requested_builds_only_the_default_mode() {
        let dir = tempfile::tempdir().unwrap();
        let loader = YamlLoader::new(false);
        let paths = vec![
            write(dir.path(), "N.node.yaml", "name: N.node\nlaunch:\n  executable: demo/n\n"),
            write(
                dir.path(),
                "Demo.system.yaml",
                "name: Demo.system\ncomponents:\n  - name: n\n    entity: N.node\nmodes:\n  - name: default\n  - name: sim\n",
            ),
        ];
        let registry = Registry::build(&loader, &paths, HashMap::new(), HashMap::new(), &[]).unwrap();

        let builds = build_all_modes("Demo.system", &registry, &HashMap::new(), &[], None).unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].mode, "default");
    }

    #[test]
    fn a_failing_mode_aborts_every_subsequent_mode() {
        let dir = tempfile::tempdir().unwrap();
        let loader = YamlLoader::new(false);
        let paths = vec![
            write(dir.path(), "N.node.yaml", "name: N.node\nlaunch:\n  executable: demo/n\n"),
            write(
                dir.path(),
                "Demo.system.yaml",
                "name: Demo.system\ncomponents:\n  - name: n\n    entity: N.node\nmodes:\n  - name: broken\n  - name: default\nbroken:\n  override:\n    components:\n      - name: n\n        entity: Missing.node\n",
            ),
        ];
        let registry = Registry::build(&loader, &paths, HashMap::new(), HashMap::new(), &[]).unwrap();

        let err = build_all_modes(
            "Demo.system",
            &registry,
            &HashMap::new(),
            &["broken".to_string(), "default".to_string()],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DesignerError::Deployment { mode, .. } if mode == "broken"));
    }

    #[test]
    fn unknown_requested_mode_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let loader = YamlLoader::new(false);
        let paths = vec![
            write(dir.path(), "N.node.yaml", "name: N.node\nlaunch:\n  executable: demo/n\n"),
            write(
                dir.path(),
                "Demo.system.yaml",
                "name: Demo.system\ncomponents:\n  - name: n\n    entity: N.node\n",
            ),
        ];
        let registry = Registry::build(&loader, &paths, HashMap::new(), HashMap::new(), &[]).unwrap();

        let err = build_all_modes(
            "Demo.system",
            &registry,
            &HashMap::new(),
            &["nonexistent".to_string()],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, DesignerError::Validation { .. }));
    }

    #[test]
    fn deployment_failure_is_wrapped_with_mode_and_system() {
        let dir = tempfile::tempdir().unwrap();
        let loader = YamlLoader::new(false);
        let paths = vec![write(
            dir.path(),
            "Demo.system.yaml",
            "name: Demo.system\ncomponents:\n  - name: n\n    entity: Missing.node\n",
        )];
        let registry = Registry::build(&loader, &paths, HashMap::new(), HashMap::new(), &[]).unwrap();

        let err = build_one_mode("Demo.system", &registry, &HashMap::new(), None, None).unwrap_err();
        assert!(matches!(err, DesignerError::Deployment { .. }));
    }

    #[test]
    fn snapshots_are_written_under_the_output_directory() {
        let workspace = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let loader = YamlLoader::new(false);
        let paths = vec![
            write(workspace.path(), "N.node.yaml", "name: N.node\nlaunch:\n  executable: demo/n\n"),
            write(
                workspace.path(),
                "Demo.system.yaml",
                "name: Demo.system\ncomponents:\n  - name: n\n    entity: N.node\n",
            ),
        ];
        let registry = Registry::build(&loader, &paths, HashMap::new(), HashMap::new(), &[]).unwrap();

        build_one_mode("Demo.system", &registry, &HashMap::new(), None, Some(output.path())).unwrap();

        let expected = output.path().join("exports/Demo.system/system_structure/default.json");
        assert!(expected.exists());
    }
}
