mod app;
mod output;
mod run;

use anyhow::Context;
use clap::Parser;

use crate::app::Cli;

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .context("failed to set Ctrl+C handler")?;

    let cli = Cli::parse();

    // Show dotmend info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.json {
        let level = if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("dotmend", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    if cli.list_stages {
        run::list_stages();
        return Ok(());
    }

    match &cli.file {
        Some(file) => run::run(&cli, file),
        None => anyhow::bail!("no input file given"),
    }
}
