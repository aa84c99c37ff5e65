// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use itertools::Itertools;

use autoware_system_designer::{registry::Registry, workspace, yaml::YamlLoader};

#[derive(Parser, Debug)]
pub struct Args {
    /// Directory of `<pkg>.yaml` package manifests.
    #[arg(long, value_name = "DIR")]
    manifest_dir: PathBuf,

    /// Optional workspace config file (`{provider, resolution}` sequence).
    #[arg(long, value_name = "FILE")]
    workspace_config: Option<PathBuf>,
}

pub fn dump_registry_main(args: Args) -> Result<()> {
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
        ws.package_paths,
        ws.file_package_map,
        &workspace_config,
    )?;

    for entity in registry.entities().sorted_by_key(|e| e.full_name().to_string()) {
        println!("{}\t{}\t{:?}", entity.full_name(), entity.kind().as_str(), entity.common().sub_type);
    }

    Ok(())
}
