// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use autoware_system_designer::{driver, json, registry::Registry, workspace, yaml::YamlLoader};

#[derive(Parser, Debug)]
pub struct Args {
    /// Full name of the system entity to build (e.g. `AutonomyStack.system`).
    system: String,

    /// Directory of `<pkg>.yaml` package manifests.
    #[arg(long, value_name = "DIR")]
    manifest_dir: PathBuf,

    /// Mode to build. Defaults to the system's default mode.
    #[arg(long)]
    mode: Option<String>,

    /// Optional workspace config file (`{provider, resolution}` sequence).
    #[arg(long, value_name = "FILE")]
    workspace_config: Option<PathBuf>,
}

pub fn dump_instance_main(args: Args) -> Result<()> {
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

    let root = driver::build_one_mode(&args.system, &registry, &ws.package_paths, args.mode.as_deref(), None)?;

    let mode = args.mode.as_deref().unwrap_or("default");
    let snapshot = json::to_snapshot(&root, &args.system, mode);
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(())
}
