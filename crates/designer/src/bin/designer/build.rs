// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use autoware_system_designer::{driver, registry::Registry, workspace, yaml::YamlLoader};

#[derive(Parser, Debug)]
pub struct Args {
    /// Full name of the system entity to build (e.g. `AutonomyStack.system`).
    system: String,

    /// Directory of `<pkg>.yaml` package manifests.
    #[arg(long, value_name = "DIR")]
    manifest_dir: PathBuf,

    /// Directory to write `exports/<system>/system_structure/<mode>.json` snapshots to.
    #[arg(short = 'o', long, value_name = "DIR")]
    output: PathBuf,

    /// Optional workspace config file (`{provider, resolution}` sequence).
    #[arg(long, value_name = "FILE")]
    workspace_config: Option<PathBuf>,

    /// Build only these modes instead of every mode the system declares.
    #[arg(long = "mode", value_name = "NAME")]
    modes: Vec<String>,
}

pub fn build_main(args: Args) -> Result<()> {
    let ws = workspace::scan_manifest_dir(&args.manifest_dir)
        .with_context(|| format!("failed to scan manifest directory {}", args.manifest_dir.display()))?;

    let workspace_config = match &args.workspace_config {
        Some(path) => workspace::load_workspace_config(path)?,
        None => Vec::new(),
    };

    let loader = YamlLoader::new(true);
    let registry = Registry::build(
        &loader,
        &ws.config_yaml_file_paths,
        ws.package_paths.clone(),
        ws.file_package_map.clone(),
        &workspace_config,
    )?;

    let builds = driver::build_all_modes(
        &args.system,
        &registry,
        &ws.package_paths,
        &args.modes,
        Some(args.output.as_path()),
    )?;

    for build in &builds {
        println!("built mode '{}' with {} top-level components", build.mode, build.root.borrow().children.len());
    }

    Ok(())
}
