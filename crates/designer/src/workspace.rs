//! Ambient configuration & workspace scanning (SPEC_FULL.md §D).
//!
//! Grounded in the teacher's `Repository`/`RepositoryLayout`/`RepositorySet`
//! (`repository.rs`): walk a directory tree collecting one metadata file per
//! unit, then fold them into a single index. Here the "unit" is a package
//! manifest (`<pkg>.yaml`) rather than a Portage overlay, and the index is
//! the `(config_yaml_file_paths, package_paths, file_package_map)` triple
//! [`crate::registry::Registry::build`] expects.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::model::PackageResolution;
use crate::registry::WorkspaceProvider;

#[derive(Debug, Clone, Deserialize)]
struct DeployConfigFileEntry {
    path: String,
    #[serde(rename = "type", default)]
    file_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PackageManifestFile {
    #[serde(default)]
    deploy_config_files: Vec<DeployConfigFileEntry>,
    #[serde(default)]
    package_map: HashMap<String, PathBuf>,
}

/// One `deploy_config_files` entry, resolved to an absolute path.
#[derive(Debug, Clone)]
pub struct DeployConfigFile {
    pub path: PathBuf,
    pub file_type: String,
}

/// One parsed `<pkg>.yaml` package manifest.
#[derive(Debug, Clone)]
pub struct PackageManifest {
    pub package_name: String,
    pub manifest_path: PathBuf,
    pub deploy_config_files: Vec<DeployConfigFile>,
}

/// Everything a manifest-directory scan produces, ready to feed
/// [`crate::registry::Registry::build`].
#[derive(Debug, Default)]
pub struct Workspace {
    pub manifests: Vec<PackageManifest>,
    pub config_yaml_file_paths: Vec<PathBuf>,
    pub package_paths: HashMap<String, PathBuf>,
    pub file_package_map: HashMap<PathBuf, String>,
}

/// Walks `manifest_dir` for one `<pkg>.yaml` manifest per package (spec.md
/// §6 "Manifest directory"), each listing `deploy_config_files` and an
/// optional `package_map`. `.deployments.yaml`, handled separately by
/// [`load_deployments_file`], is skipped here.
pub fn scan_manifest_dir(manifest_dir: &Path) -> Result<Workspace> {
    let mut workspace = Workspace::default();

    // Package manifests sit directly inside `manifest_dir`; depth is capped
    // at 1 so the design files a manifest's `deploy_config_files` points at
    // (which commonly live in a sibling subdirectory) are never mistaken for
    // manifests themselves.
    let mut entries: Vec<PathBuf> = WalkDir::new(manifest_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("yaml"))
        .filter(|p| p.file_name().and_then(|n| n.to_str()) != Some(".deployments.yaml"))
        .collect();
    entries.sort();

    // Reading and parsing each manifest is independent of every other, so it
    // parallelizes cleanly; folding the parsed manifests into `workspace`
    // stays sequential below, in path order, so package_paths/file_package_map
    // collisions resolve deterministically regardless of thread scheduling.
    let parsed: Vec<Result<PackageManifestFile>> = entries
        .par_iter()
        .map(|path| {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read package manifest {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse package manifest {}", path.display()))
        })
        .collect();

    for (path, manifest) in entries.into_iter().zip(parsed) {
        let manifest = manifest?;
        let package_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        let base_dir = path.parent().unwrap_or(manifest_dir).to_path_buf();

        let mut deploy_config_files = Vec::with_capacity(manifest.deploy_config_files.len());
        for entry in &manifest.deploy_config_files {
            let config_path = base_dir.join(&entry.path);
            workspace.config_yaml_file_paths.push(config_path.clone());
            workspace
                .file_package_map
                .insert(config_path.clone(), package_name.clone());
            deploy_config_files.push(DeployConfigFile {
                path: config_path,
                file_type: entry.file_type.clone(),
            });
        }

        for (pkg, share_path) in &manifest.package_map {
            workspace.package_paths.insert(pkg.clone(), share_path.clone());
        }
        workspace
            .package_paths
            .entry(package_name.clone())
            .or_insert_with(|| base_dir.clone());

        workspace.manifests.push(PackageManifest {
            package_name,
            manifest_path: path,
            deploy_config_files,
        });
    }

    Ok(workspace)
}

/// One entry of a `.deployments.yaml` `deploy_list` (spec.md §6): a named
/// variant of the base system, carried through to the launcher as a bundle
/// of argument overrides rather than interpreted here.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployVariant {
    pub name: String,
    #[serde(default)]
    pub arguments: Vec<serde_yaml::Mapping>,
}

/// `.deployments.yaml`: expands one base system into multiple named
/// deployable variants for launcher generation (spec.md §6).
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentsFile {
    pub base: String,
    #[serde(default)]
    pub deploy_list: Vec<DeployVariant>,
}

/// Parses a `.deployments.yaml` file, if `manifest_dir` has one.
pub fn load_deployments_file(manifest_dir: &Path) -> Result<Option<DeploymentsFile>> {
    let path = manifest_dir.join(".deployments.yaml");
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: DeploymentsFile = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(parsed))
}

#[derive(Debug, Clone, Deserialize)]
struct WorkspaceProviderEntry {
    provider: String,
    resolution: String,
}

/// Parses the workspace config (spec.md §6): a sequence of
/// `{provider, resolution}` entries tagging node packages as `source` or
/// `installed`.
pub fn load_workspace_config(path: &Path) -> Result<Vec<WorkspaceProvider>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read workspace config {}", path.display()))?;
    let entries: Vec<WorkspaceProviderEntry> = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse workspace config {}", path.display()))?;

    entries
        .into_iter()
        .map(|entry| {
            let resolution = match entry.resolution.as_str() {
                "source" => PackageResolution::Source,
                "installed" => PackageResolution::Installed,
                other => bail!("unknown package resolution '{other}' for provider '{}'", entry.provider),
            };
            Ok(WorkspaceProvider {
                provider: entry.provider,
                resolution,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::write_files;

    #[test]
    fn scans_a_manifest_directory_into_config_paths_and_package_map() {
        let dir = tempfile::tempdir().unwrap();
        write_files(
            dir.path(),
            [
                (
                    "demo_pkg.yaml",
                    "deploy_config_files:\n  - path: designs/A.node.yaml\n    type: node\n  - path: designs/S.system.yaml\n    type: system\npackage_map:\n  other_pkg: /opt/other_pkg/share\n",
                ),
                ("designs/A.node.yaml", "name: A.node\nlaunch:\n  executable: demo/a\n"),
                ("designs/S.system.yaml", "name: S.system\ncomponents:\n  - name: a\n    entity: A.node\n"),
            ],
        )
        .unwrap();

        let workspace = scan_manifest_dir(dir.path()).unwrap();
        assert_eq!(workspace.manifests.len(), 1);
        assert_eq!(workspace.manifests[0].package_name, "demo_pkg");
        assert_eq!(workspace.config_yaml_file_paths.len(), 2);
        assert_eq!(
            workspace.package_paths.get("other_pkg").unwrap(),
            &PathBuf::from("/opt/other_pkg/share")
        );
        assert!(workspace.package_paths.contains_key("demo_pkg"));

        let node_path = dir.path().join("designs/A.node.yaml");
        assert_eq!(workspace.file_package_map.get(&node_path).unwrap(), "demo_pkg");
    }

    #[test]
    fn ignores_deployments_file_during_manifest_scan() {
        let dir = tempfile::tempdir().unwrap();
        write_files(
            dir.path(),
            [
                ("demo_pkg.yaml", "deploy_config_files: []\n"),
                (".deployments.yaml", "base: Demo.system\ndeploy_list:\n  - name: sim\n"),
            ],
        )
        .unwrap();

        let workspace = scan_manifest_dir(dir.path()).unwrap();
        assert_eq!(workspace.manifests.len(), 1);
        assert!(workspace.config_yaml_file_paths.is_empty());
    }

    #[test]
    fn parses_deployments_file_into_named_variants() {
        let dir = tempfile::tempdir().unwrap();
        write_files(
            dir.path(),
            [(
                ".deployments.yaml",
                "base: Demo.system\ndeploy_list:\n  - name: sim\n    arguments:\n      - name: use_sim_time\n        value: \"true\"\n  - name: real\n",
            )],
        )
        .unwrap();

        let deployments = load_deployments_file(dir.path()).unwrap().unwrap();
        assert_eq!(deployments.base, "Demo.system");
        assert_eq!(deployments.deploy_list.len(), 2);
        assert_eq!(deployments.deploy_list[0].name, "sim");
        assert_eq!(deployments.deploy_list[0].arguments.len(), 1);
    }

    #[test]
    fn missing_deployments_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_deployments_file(dir.path()).unwrap().is_none());
    }

    #[test]
    fn workspace_config_maps_resolution_strings_to_the_enum() {
        let dir = tempfile::tempdir().unwrap();
        write_files(
            dir.path(),
            [("providers.yaml", "- provider: cros_internal\n  resolution: source\n- provider: vendor_binary\n  resolution: installed\n")],
        )
        .unwrap();

        let providers = load_workspace_config(&dir.path().join("providers.yaml")).unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].provider, "cros_internal");
        assert!(matches!(providers[0].resolution, PackageResolution::Source));
        assert!(matches!(providers[1].resolution, PackageResolution::Installed));
    }

    #[test]
    fn unknown_resolution_string_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), [("providers.yaml", "- provider: x\n  resolution: maybe\n")]).unwrap();
        assert!(load_workspace_config(&dir.path().join("providers.yaml")).is_err());
    }
}
