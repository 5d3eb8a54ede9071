//! Building the testsuite scenarios for the emulated target.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};

const TARGET: &str = "thumbv7m-none-eabi";

/// Workspace root (the parent of xtask/).
pub fn project_root() -> PathBuf {
    let here = std::env::var_os("CARGO_MANIFEST_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap());
    match here.file_name() {
        Some(name) if name == "xtask" => here.parent().unwrap().to_path_buf(),
        _ => here,
    }
}

/// Build one scenario and return the path to its ELF.
pub fn build_example(example: &str, release: bool) -> Result<PathBuf> {
    let root = project_root();

    let mut cmd = Command::new("cargo");
    cmd.current_dir(root.join("testsuite"))
        .env("DEFMT_LOG", "info")
        .stderr(Stdio::inherit())
        .args(["build", "--example", example, "--target", TARGET]);
    if release {
        cmd.arg("--release");
    }

    let status = cmd.status().context("Failed to run cargo build")?;
    if !status.success() {
        bail!("cargo build failed for example '{example}'");
    }

    let profile = if release { "release" } else { "debug" };
    Ok(root
        .join("target")
        .join(TARGET)
        .join(profile)
        .join("examples")
        .join(example))
}

/// All scenario names under testsuite/examples/, sorted.
pub fn discover_examples() -> Result<Vec<String>> {
    let dir = project_root().join("testsuite").join("examples");
    let mut scenarios: Vec<String> = fs::read_dir(&dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            if path.extension()? != "rs" {
                return None;
            }
            Some(path.file_stem()?.to_string_lossy().into_owned())
        })
        .collect();
    scenarios.sort();
    Ok(scenarios)
}
