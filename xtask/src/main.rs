mod build;
mod defmt;
mod qemu;
mod runner;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};

use runner::{RunOptions, run_example};

#[derive(Parser)]
#[command(name = "xtask", about = "Build and test tasks for shadowsan")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scenario in QEMU and print its decoded output
    Qemu {
        /// Name of the example to run
        example: String,

        /// Build in release mode
        #[arg(long)]
        release: bool,
    },

    /// Run all scenarios and judge them against their `@expect` headers
    Test {
        /// Only run scenarios whose name contains this substring
        filter: Option<String>,

        /// Build in release mode
        #[arg(long)]
        release: bool,
    },
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Commands::Qemu { example, release } => run_example(
            &example,
            &RunOptions {
                verbose: true,
                release,
            },
        )
        .map(|_| ()),
        Commands::Test { filter, release } => run_all(filter.as_deref(), release),
    }
}

fn run_all(filter: Option<&str>, release: bool) -> Result<()> {
    let mut scenarios = build::discover_examples()?;
    if let Some(f) = filter {
        scenarios.retain(|s| s.contains(f));
    }
    if scenarios.is_empty() {
        bail!("No scenarios match");
    }

    let opts = RunOptions {
        verbose: false,
        release,
    };
    let mut failures = Vec::new();

    for scenario in &scenarios {
        println!("\n=== Scenario: {scenario} ===");
        let passed = run_example(scenario, &opts).unwrap_or_else(|e| {
            println!("  ERROR: {e}");
            false
        });
        if !passed {
            failures.push(scenario.clone());
        }
    }

    println!(
        "\n=== Summary: {}/{} passed ===",
        scenarios.len() - failures.len(),
        scenarios.len()
    );
    if !failures.is_empty() {
        bail!("failing scenarios: {}", failures.join(", "));
    }
    Ok(())
}
