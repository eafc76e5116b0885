use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build,
    /// Run the workspace tests
    Test,
    /// Run the heci CLI, forwarding the remaining arguments
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn cargo(args: &[&str], extra: &[String], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).args(extra).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            cargo(&["build", "--workspace"], &[], "Build")?;
        }
        Commands::Test => {
            println!("Testing project...");
            cargo(&["test", "--workspace"], &[], "Test")?;
        }
        Commands::Run { args } => {
            println!("Running CLI...");
            let args = if args.is_empty() {
                vec!["simulate".to_string()]
            } else {
                args.clone()
            };
            cargo(&["run", "-p", "heci-cli", "--"], &args, "Run")?;
        }
    }

    Ok(())
}
