// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{path::Path, process::Command};

use anyhow::{bail, ensure, Result};

/// The name of the environment variable controlling whether to regenerate
/// golden data.
const REGENERATE_VAR_NAME: &str = "AUTOWARE_SYSTEM_DESIGNER_REGENERATE_GOLDEN";

/// Compares contents of the two directories (or files) and returns an error
/// if there is any mismatch.
///
/// # Updating golden data
///
/// This function updates the golden data with the output data if the
/// environment variable `AUTOWARE_SYSTEM_DESIGNER_REGENERATE_GOLDEN` is set
/// to a non-empty value.
///
/// ```sh
/// AUTOWARE_SYSTEM_DESIGNER_REGENERATE_GOLDEN=1 cargo test
/// ```
pub fn compare_with_golden_data(output: &Path, golden: &Path) -> Result<()> {
    let regenerate = std::env::var(REGENERATE_VAR_NAME).unwrap_or_default() != "";

    if regenerate {
        if golden.is_dir() {
            std::fs::remove_dir_all(golden)?;
        } else if golden.is_file() {
            std::fs::remove_file(golden)?;
        } else {
            ensure!(!golden.try_exists()?, "Unknown file type");
        }
        if let Some(parent) = golden.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let status = Command::new("cp")
            .args(["--recursive", "--dereference", "--"])
            .arg(output)
            .arg(golden)
            .status()?;
        ensure!(
            status.success(),
            "Failed to update golden data: {:?}",
            status
        );
    } else {
        let status = Command::new("diff")
            .args(["-Naru", "--"])
            .arg(output)
            .arg(golden)
            .status()?;
        if !status.success() {
            bail!(
                "Found mismatch with golden data; consider regenerating them with: \
                {}=1 cargo test",
                REGENERATE_VAR_NAME,
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, MutexGuard};

    use once_cell::sync::OnceCell;
    use tempfile::TempDir;

    use super::*;

    /// Used by [`RegenVarLock`] to prevent multiple tests from running in
    /// parallel.
    static MUTEX: OnceCell<Mutex<()>> = OnceCell::new();

    struct RegenVarLock<'a> {
        _lock: MutexGuard<'a, ()>,
    }

    impl RegenVarLock<'_> {
        fn acquire() -> Self {
            let lock = MUTEX.get_or_init(|| Mutex::new(())).lock().unwrap();
            std::env::remove_var(REGENERATE_VAR_NAME);
            Self { _lock: lock }
        }
    }

    #[test]
    fn compares_matching_directories() -> Result<()> {
        let _lock = RegenVarLock::acquire();

        let output_dir = TempDir::new()?;
        let golden_dir = TempDir::new()?;

        std::fs::write(output_dir.path().join("a.txt"), "aaa\n")?;
        std::fs::write(golden_dir.path().join("a.txt"), "aaa\n")?;

        compare_with_golden_data(output_dir.path(), golden_dir.path())?;
        Ok(())
    }

    #[test]
    fn reports_mismatch() -> Result<()> {
        let _lock = RegenVarLock::acquire();

        let output_dir = TempDir::new()?;
        let golden_dir = TempDir::new()?;

        std::fs::write(output_dir.path().join("a.txt"), "aaa\n")?;
        std::fs::write(golden_dir.path().join("a.txt"), "bbb\n")?;

        assert!(compare_with_golden_data(output_dir.path(), golden_dir.path()).is_err());
        Ok(())
    }

    #[test]
    fn regenerates_golden_data() -> Result<()> {
        let _lock = RegenVarLock::acquire();
        std::env::set_var(REGENERATE_VAR_NAME, "1");

        let output_dir = TempDir::new()?;
        let golden_dir = TempDir::new()?;
        std::fs::remove_dir(golden_dir.path())?;

        std::fs::write(output_dir.path().join("a.txt"), "aaa\n")?;

        let result = compare_with_golden_data(output_dir.path(), golden_dir.path());
        std::env::remove_var(REGENERATE_VAR_NAME);
        result?;

        assert_eq!(
            std::fs::read_to_string(golden_dir.path().join("a.txt"))?,
            "aaa\n"
        );
        Ok(())
    }
}
