//! QEMU runner for Cortex-M3 emulation.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

/// Result of one QEMU run.
pub struct QemuOutput {
    /// Raw defmt frames captured from semihosting stdout.
    pub semihosting: Vec<u8>,
    /// Whether the guest exited through `EXIT_SUCCESS`. A confirmed
    /// violation aborts via `EXIT_FAILURE`, so fault scenarios are
    /// expected to come back `false`.
    pub success: bool,
}

pub fn run_qemu(elf_path: &PathBuf) -> Result<QemuOutput> {
    let mut cmd = Command::new("qemu-system-arm");
    cmd.args(["-cpu", "cortex-m3"])
        .args(["-machine", "lm3s6965evb"])
        .arg("-nographic")
        .args(["-monitor", "none"])
        .args(["-serial", "none"])
        .args(["-semihosting-config", "enable=on,target=native"])
        .arg("-kernel")
        .arg(elf_path)
        .stdin(Stdio::null());

    let output = cmd.output().context("Failed to run QEMU")?;

    Ok(QemuOutput {
        semihosting: output.stdout,
        success: output.status.success(),
    })
}
