use std::path::Path;

use anyhow::{bail, Context};
use dotmend::{
    deobfuscation::{output_path_for, Pipeline, PipelineConfig, PipelineReport, StageRegistry},
    file::{format_for_type, WriterOptions},
};
use serde::Serialize;

use crate::{
    app::Cli,
    output::{Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct RunReport {
    file: String,
    output: String,
    stages: Vec<String>,
    failures: Vec<FailureReport>,
    methods_checked: usize,
    methods_repaired: usize,
    repairs: RepairCounts,
    stage_time_ms: u128,
}

#[derive(Debug, Serialize)]
struct FailureReport {
    stage: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct RepairCounts {
    retargeted_branches: usize,
    retargeted_switch_targets: usize,
    degraded_branches: usize,
    repaired_boundaries: usize,
    dropped_handlers: usize,
    appended_returns: usize,
    added_locals: usize,
}

pub fn list_stages() {
    let registry = StageRegistry::default();
    let mut table = TabWriter::new(&[("STAGE", Align::Left), ("DESCRIPTION", Align::Left)]);
    for name in registry.names() {
        let description = registry
            .create(name)
            .map(|stage| stage.description())
            .unwrap_or_default();
        table.row(vec![name.to_string(), description.to_string()]);
    }
    table.print();
}

pub fn run(cli: &Cli, input: &Path) -> anyhow::Result<()> {
    if !input.is_file() {
        bail!("input file not found: {}", input.display());
    }
    let Some(format) = format_for_type(&cli.format) else {
        bail!("unsupported module type '{}'", cli.format);
    };

    let config = build_config(cli);
    let mut pipeline = Pipeline::from_config(format, &StageRegistry::default(), config)
        .context("no stage to run")?;

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| output_path_for(input));
    let report = pipeline
        .run(input, Some(&output))
        .with_context(|| format!("processing failed: {}", input.display()))?;

    let report = build_report(input, &output, report);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        display(&report);
    }
    Ok(())
}

fn build_config(cli: &Cli) -> PipelineConfig {
    let mut config = PipelineConfig {
        writer: WriterOptions {
            keep_max_stack: !cli.recompute_max_stack,
            pretty: cli.pretty,
        },
        ..PipelineConfig::default().with_stages(cli.options.as_str())
    };
    config.name_seed = cli.seed;
    config
}

fn build_report(input: &Path, output: &Path, report: &PipelineReport) -> RunReport {
    let totals = report.repair.totals;
    RunReport {
        file: input.display().to_string(),
        output: output.display().to_string(),
        stages: report.stages_run.clone(),
        failures: report
            .stage_failures
            .iter()
            .map(|failure| FailureReport {
                stage: failure.stage.clone(),
                message: failure.message.clone(),
            })
            .collect(),
        methods_checked: report.repair.methods_checked,
        methods_repaired: report.repair.methods_repaired,
        repairs: RepairCounts {
            retargeted_branches: totals.retargeted_branches,
            retargeted_switch_targets: totals.retargeted_switch_targets,
            degraded_branches: totals.degraded_branches,
            repaired_boundaries: totals.repaired_boundaries,
            dropped_handlers: totals.dropped_handlers,
            appended_returns: totals.appended_returns,
            added_locals: totals.added_locals,
        },
        stage_time_ms: report.stage_time.as_millis(),
    }
}

fn display(report: &RunReport) {
    println!("Done: {} -> {}", report.file, report.output);
    println!("  Stages:    {}", report.stages.join(", "));
    if !report.failures.is_empty() {
        println!("  Failures:  {}", report.failures.len());
        for failure in &report.failures {
            println!("    - {}: {}", failure.stage, failure.message);
        }
    }
    println!(
        "  Repaired:  {} of {} methods",
        report.methods_repaired, report.methods_checked
    );

    let repairs = &report.repairs;
    let mut table = TabWriter::new(&[("REPAIR", Align::Left), ("COUNT", Align::Right)]);
    for (label, count) in [
        ("branches retargeted", repairs.retargeted_branches),
        ("switch targets retargeted", repairs.retargeted_switch_targets),
        ("branches degraded", repairs.degraded_branches),
        ("handler boundaries", repairs.repaired_boundaries),
        ("handlers dropped", repairs.dropped_handlers),
        ("returns appended", repairs.appended_returns),
        ("locals added", repairs.added_locals),
    ] {
        if count > 0 {
            table.row(vec![label.to_string(), count.to_string()]);
        }
    }
    table.print();
}
