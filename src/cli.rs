use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in to the portal and capture every purchased course.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the settings file (YAML).
    #[arg(long)]
    pub config: String,

    /// Override the downloads root from the settings file.
    #[arg(long)]
    pub downloads_root: Option<String>,
}
