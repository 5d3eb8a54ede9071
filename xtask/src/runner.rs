//! Scenario dispatch and judging.

use std::fs;
use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::build::{build_example, project_root};
use crate::defmt::decode_output;
use crate::qemu::run_qemu;

/// What a scenario declares about its own outcome, in a
/// `//! @expect: clean|fault` header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expectation {
    /// Runs to completion, exits successfully, reports nothing.
    Clean,
    /// Dies with an `ASAN:` report and a failing exit code.
    Fault,
}

pub struct RunOptions {
    /// Print decoded output (for the `qemu` command).
    pub verbose: bool,
    /// Build in release mode.
    pub release: bool,
}

fn expectation(example_path: &PathBuf) -> Result<Expectation> {
    let content = fs::read_to_string(example_path)?;
    for line in content.lines().take(5) {
        if let Some(value) = line.strip_prefix("//! @expect:") {
            return match value.trim() {
                "clean" => Ok(Expectation::Clean),
                "fault" => Ok(Expectation::Fault),
                other => bail!("Unknown expectation '{other}'"),
            };
        }
    }
    bail!("Scenario has no `//! @expect:` header")
}

/// Build and run one scenario; `Ok(true)` means it behaved as declared.
pub fn run_example(example: &str, opts: &RunOptions) -> Result<bool> {
    let example_path = project_root()
        .join("testsuite")
        .join("examples")
        .join(format!("{example}.rs"));
    let expected = expectation(&example_path)?;

    println!("Building '{example}'...");
    let elf_path = build_example(example, opts.release)?;

    println!("Running in QEMU...");
    let output = run_qemu(&elf_path)?;
    let decoded = decode_output(&elf_path, &output.semihosting)?;

    if opts.verbose {
        print!("{decoded}");
        println!("--- QEMU run end (exit {}) ---", if output.success { "ok" } else { "failure" });
    }

    let reported = decoded.contains("ASAN: addr");
    let verdict = match expected {
        Expectation::Clean => {
            if !output.success {
                println!("  FAIL: expected a clean exit");
                false
            } else if reported {
                println!("  FAIL: unexpected ASAN report in a clean scenario");
                false
            } else {
                true
            }
        }
        Expectation::Fault => {
            if output.success {
                println!("  FAIL: scenario exited cleanly instead of faulting");
                false
            } else if !reported {
                println!("  FAIL: died without an ASAN report");
                false
            } else {
                true
            }
        }
    };

    if verdict {
        println!("  PASS");
    } else if !opts.verbose {
        println!("--- output ---");
        print!("{decoded}");
    }

    Ok(verdict)
}
