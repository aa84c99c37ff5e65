// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod build;
mod dump_instance;
mod dump_registry;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "designer")]
#[command(author = "ChromiumOS Authors")]
#[command(about = "Compiles declarative robotics design files into a validated deployment instance tree", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Builds every declared mode of a system and writes its JSON snapshots.
    Build {
        #[command(flatten)]
        args: build::Args,
    },
    /// Loads the registry only and prints a one-line summary per entity.
    DumpRegistry {
        #[command(flatten)]
        args: dump_registry::Args,
    },
    /// Builds one mode of a system and prints its JSON instance tree.
    DumpInstance {
        #[command(flatten)]
        args: dump_instance::Args,
    },
}

fn main() -> ExitCode {
    cliutil::cli_main(designer_main, cliutil::Config::default())
}

fn designer_main() -> anyhow::Result<()> {
    match Args::parse().command {
        Commands::Build { args } => build::build_main(args),
        Commands::DumpRegistry { args } => dump_registry::dump_registry_main(args),
        Commands::DumpInstance { args } => dump_instance::dump_instance_main(args),
    }
}
