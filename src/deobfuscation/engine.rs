//! Stage pipeline orchestration.
//!
//! The [`Pipeline`] drives one module through its lifecycle:
//!
//! ```text
//! Unloaded -> Loaded -> StagesApplied -> Repaired -> Saved
//!     \__________\___________\______________\______-> Failed
//! ```
//!
//! Stage errors are logged and recorded in the [`PipelineReport`]; the following stages still
//! run. Repair always runs before saving. Load and save failures are fatal and leave the
//! pipeline in [`PipelineState::Failed`].
//!
//! # Example
//!
//! ```rust,no_run
//! use dotmend::deobfuscation::{Pipeline, PipelineConfig, StageRegistry};
//! use dotmend::file::ImageFormat;
//! use std::path::Path;
//!
//! let config = PipelineConfig::default().with_stages("full");
//! let mut pipeline =
//!     Pipeline::from_config(Box::new(ImageFormat::new()), &StageRegistry::default(), config)?;
//! let report = pipeline.run(Path::new("Assembly-CSharp.json"), None)?;
//! println!("{}", report.summary());
//! # Ok::<(), dotmend::Error>(())
//! ```

use std::{
    fmt,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use log::{error, info};

use crate::{
    deobfuscation::{
        config::{output_path_for, PipelineConfig, StageRegistry},
        context::StageContext,
        pass::Stage,
        repair::{repair_module, ModuleRepairReport},
    },
    file::ModuleFormat,
    metadata::module::Module,
    Error, Result,
};

/// Lifecycle state of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No module yet
    Unloaded,
    /// Module loaded, no stage applied
    Loaded,
    /// Every stage was attempted
    StagesApplied,
    /// Structural invariants restored
    Repaired,
    /// Output persisted
    Saved,
    /// A fatal error occurred; the pipeline accepts no further operation
    Failed,
}

impl PipelineState {
    /// Lower-case name used in messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Unloaded => "unloaded",
            PipelineState::Loaded => "loaded",
            PipelineState::StagesApplied => "stages-applied",
            PipelineState::Repaired => "repaired",
            PipelineState::Saved => "saved",
            PipelineState::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage that returned an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    /// Name of the failing stage
    pub stage: String,
    /// Rendered error
    pub message: String,
}

/// What a pipeline run did.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Names of the stages that completed, in order
    pub stages_run: Vec<String>,
    /// Stages that returned an error
    pub stage_failures: Vec<StageFailure>,
    /// Repair totals over the whole module
    pub repair: ModuleRepairReport,
    /// Where the module was written, once saved
    pub output: Option<PathBuf>,
    /// Time spent in stages
    pub stage_time: Duration,
}

impl PipelineReport {
    /// One-line human readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} stage(s) run, {} failed, {} of {} method(s) repaired ({})",
            self.stages_run.len(),
            self.stage_failures.len(),
            self.repair.methods_repaired,
            self.repair.methods_checked,
            self.repair.totals
        );
        if let Some(output) = &self.output {
            summary.push_str(&format!(", written to {}", output.display()));
        }
        summary
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Applies an ordered list of stages to one module, repairs it, and saves it.
pub struct Pipeline {
    config: PipelineConfig,
    format: Box<dyn ModuleFormat>,
    stages: Vec<Box<dyn Stage>>,
    state: PipelineState,
    context: Option<StageContext>,
    report: PipelineReport,
}

impl Pipeline {
    /// Creates a pipeline over explicit stages.
    #[must_use]
    pub fn new(
        format: Box<dyn ModuleFormat>,
        stages: Vec<Box<dyn Stage>>,
        config: PipelineConfig,
    ) -> Self {
        Pipeline {
            config,
            format,
            stages,
            state: PipelineState::Unloaded,
            context: None,
            report: PipelineReport::default(),
        }
    }

    /// Creates a pipeline whose stages are resolved from `config.stages` through `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoStages`] if the selection resolves to nothing.
    pub fn from_config(
        format: Box<dyn ModuleFormat>,
        registry: &StageRegistry,
        config: PipelineConfig,
    ) -> Result<Self> {
        let stages = registry.resolve(&config.stages)?;
        Ok(Self::new(format, stages, config))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// The module, once loaded.
    #[must_use]
    pub fn module(&self) -> Option<&Module> {
        self.context.as_ref().map(|ctx| &ctx.module)
    }

    /// Gives the module back, consuming the pipeline.
    #[must_use]
    pub fn into_module(self) -> Option<Module> {
        self.context.map(StageContext::into_module)
    }

    /// Report of everything done so far.
    #[must_use]
    pub fn report(&self) -> &PipelineReport {
        &self.report
    }

    /// Loads the module at `path` through the format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the pipeline is unloaded, or [`Error::Load`],
    /// which moves the pipeline to [`PipelineState::Failed`].
    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.expect_state(PipelineState::Unloaded)?;
        info!("Loading '{}' as {}", path.display(), self.format.name());

        match self.format.load(path) {
            Ok(module) => {
                self.install(module);
                Ok(())
            }
            Err(e) => Err(self.fail(e, |message| Error::Load {
                path: path.to_path_buf(),
                message,
            })),
        }
    }

    /// Installs an already loaded module.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the pipeline is unloaded.
    pub fn load_module(&mut self, module: Module) -> Result<()> {
        self.expect_state(PipelineState::Unloaded)?;
        self.install(module);
        Ok(())
    }

    /// Applies every stage in order.
    ///
    /// A failing stage is logged and recorded; the remaining stages still run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless a module is loaded.
    pub fn apply_stages(&mut self) -> Result<()> {
        self.expect_state(PipelineState::Loaded)?;
        let found = self.state.as_str();
        let ctx = self.context.as_mut().ok_or(Error::InvalidState {
            expected: PipelineState::Loaded.as_str(),
            found,
        })?;

        let start = Instant::now();
        let mut stages_run = Vec::new();
        let mut failures = Vec::new();
        for stage in &self.stages {
            info!("Running stage '{}': {}", stage.name(), stage.description());
            match stage.apply(ctx) {
                Ok(()) => stages_run.push(stage.name().to_string()),
                Err(e) => {
                    error!("Stage '{}' failed: {e}", stage.name());
                    failures.push(StageFailure {
                        stage: stage.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        self.report.stage_time = start.elapsed();
        self.report.stages_run = stages_run;
        self.report.stage_failures = failures;
        self.state = PipelineState::StagesApplied;
        info!(
            "Applied {} stage(s) in {:?}",
            self.report.stages_run.len(),
            self.report.stage_time
        );
        Ok(())
    }

    /// Restores the structural invariants of every body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the stages have been applied.
    pub fn repair(&mut self) -> Result<()> {
        self.expect_state(PipelineState::StagesApplied)?;
        let format = self.format.as_ref();
        let ctx = self
            .context
            .as_mut()
            .ok_or(Error::InvalidState {
                expected: PipelineState::StagesApplied.as_str(),
                found: PipelineState::Unloaded.as_str(),
            })?;

        self.report.repair = repair_module(&mut ctx.module, format);
        self.state = PipelineState::Repaired;
        info!(
            "Repaired {} of {} method(s)",
            self.report.repair.methods_repaired, self.report.repair.methods_checked
        );
        Ok(())
    }

    /// Writes the repaired module to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the module has been repaired, or [`Error::Save`],
    /// which moves the pipeline to [`PipelineState::Failed`].
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.expect_state(PipelineState::Repaired)?;
        let ctx = self.context.as_ref().ok_or(Error::InvalidState {
            expected: PipelineState::Repaired.as_str(),
            found: PipelineState::Unloaded.as_str(),
        })?;

        match self.format.save(&ctx.module, path, &self.config.writer) {
            Ok(()) => {
                info!("Saved '{}'", path.display());
                self.report.output = Some(path.to_path_buf());
                self.state = PipelineState::Saved;
                Ok(())
            }
            Err(e) => Err(self.fail(e, |message| Error::Save {
                path: path.to_path_buf(),
                message,
            })),
        }
    }

    /// Runs the whole lifecycle: load, stages, repair, save.
    ///
    /// `output` defaults to [`output_path_for`] of `input`.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error.
    pub fn run(&mut self, input: &Path, output: Option<&Path>) -> Result<&PipelineReport> {
        let output = output.map_or_else(|| output_path_for(input), Path::to_path_buf);

        self.load(input)?;
        self.apply_stages()?;
        self.repair()?;
        self.save(&output)?;

        info!("{}", self.report.summary());
        Ok(&self.report)
    }

    fn install(&mut self, module: Module) {
        self.context = Some(StageContext::new(module, &self.config));
        self.report = PipelineReport::default();
        self.state = PipelineState::Loaded;
    }

    /// Moves to [`PipelineState::Failed`], promoting a non-fatal format error with `promote`.
    fn fail(&mut self, error: Error, promote: impl FnOnce(String) -> Error) -> Error {
        self.state = PipelineState::Failed;
        if error.is_fatal() {
            error
        } else {
            promote(error.to_string())
        }
    }

    fn expect_state(&self, expected: PipelineState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected: expected.as_str(),
                found: self.state.as_str(),
            })
        }
    }
}
