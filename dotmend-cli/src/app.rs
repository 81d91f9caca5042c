use std::path::PathBuf;

use clap::Parser;

/// dotmend - repair, classify and partially evaluate obfuscated .NET modules
#[derive(Debug, Parser)]
#[command(name = "dotmend", version, about, long_about = None)]
pub struct Cli {
    /// Module format of the input (currently only "dotnet").
    #[arg(short = 't', long = "type", value_name = "TYPE", default_value = "dotnet")]
    pub format: String,

    /// Path to the module to process.
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Stages to run: comma-separated names, "full", or a preset 1-4.
    #[arg(short = 'p', long, value_name = "OPTIONS", default_value = "")]
    pub options: String,

    /// Output path (default: <stem>_obf<ext> next to the input).
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Seed for generated names, for reproducible output.
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Recompute max stack depth of every body instead of keeping the declared value.
    #[arg(long)]
    pub recompute_max_stack: bool,

    /// Pretty-print the written image.
    #[arg(long)]
    pub pretty: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    pub json: bool,

    /// List the available stages and exit.
    #[arg(long)]
    pub list_stages: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long)]
    pub verbose: bool,
}
