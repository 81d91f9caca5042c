//! Pipeline configuration and stage selection.
//!
//! This module provides the [`PipelineConfig`] knobs, the [`StageRegistry`] that maps stage
//! names to constructors, and the parsing of the `--options` selection string.
//!
//! # Selection Syntax
//!
//! A selection is a comma-separated list of stage names, matched case-insensitively after
//! trimming. A selection that is exactly one of the numeric presets expands first:
//!
//! | Preset | Stages |
//! |--------|--------|
//! | `1` | `rename` |
//! | `2` | `rename,fold` |
//! | `3` | `rename,nops` |
//! | `4` | `full` |
//!
//! `full` expands to every registered stage in registration order. An empty selection falls back
//! to `rename`; unknown names are skipped. Both cases are reported through `log::warn!`.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::{
    deobfuscation::{
        classifier::ClassifierConfig,
        naming::{DEFAULT_NAME_ATTEMPTS, DEFAULT_NAME_LENGTH},
        pass::Stage,
        passes::{FoldStage, NopStage, RenameStage},
    },
    emulation::{DEFAULT_OFFSET_SHIFT, DEFAULT_STEP_BUDGET},
    file::WriterOptions,
    Error, Result,
};

/// Stage selected when the selection string is empty.
pub const DEFAULT_STAGE: &str = "rename";

/// Name that expands to every registered stage.
pub const FULL_SELECTION: &str = "full";

/// Suffix inserted before the extension of the derived output path.
pub const OUTPUT_SUFFIX: &str = "_obf";

/// Configuration for a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Stage selection string, see the module documentation (default: empty, meaning `rename`).
    pub stages: String,

    /// Options handed to the format when saving.
    pub writer: WriterOptions,

    /// Length of generated identifiers (default: 8).
    pub name_length: usize,

    /// Draws before the numeric-suffix fallback (default: 1000).
    pub name_attempts: usize,

    /// Fixed seed for the name generator; `None` seeds from system entropy.
    pub name_seed: Option<u64>,

    /// Step budget of each partial evaluation (default: 20000).
    pub eval_step_budget: usize,

    /// Value the detected base-pointer local is pre-seeded with (default: 4).
    pub offset_shift: i32,

    /// Classifier thresholds.
    pub classifier: ClassifierConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            stages: String::new(),
            writer: WriterOptions::default(),
            name_length: DEFAULT_NAME_LENGTH,
            name_attempts: DEFAULT_NAME_ATTEMPTS,
            name_seed: None,
            eval_step_budget: DEFAULT_STEP_BUDGET,
            offset_shift: DEFAULT_OFFSET_SHIFT,
            classifier: ClassifierConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Sets the stage selection string.
    #[must_use]
    pub fn with_stages(mut self, stages: impl Into<String>) -> Self {
        self.stages = stages.into();
        self
    }

    /// Fixes the name generator seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.name_seed = Some(seed);
        self
    }
}

/// Constructs a fresh stage instance.
pub type StageConstructor = fn() -> Box<dyn Stage>;

/// Maps stage names to constructors.
///
/// [`StageRegistry::default`] holds the built-in stages; external passes register under their
/// own names with [`StageRegistry::register`].
pub struct StageRegistry {
    entries: Vec<(&'static str, StageConstructor)>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(RenameStage::NAME, RenameStage::boxed);
        registry.register(FoldStage::NAME, FoldStage::boxed);
        registry.register(NopStage::NAME, NopStage::boxed);
        registry
    }
}

impl StageRegistry {
    /// A registry without any stage.
    #[must_use]
    pub fn empty() -> Self {
        StageRegistry {
            entries: Vec::new(),
        }
    }

    /// Registers `constructor` under `name`, replacing an earlier registration.
    pub fn register(&mut self, name: &'static str, constructor: StageConstructor) -> &mut Self {
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = constructor,
            None => self.entries.push((name, constructor)),
        }
        self
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }

    /// Constructs the stage registered under `name`, matched case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStage`] if no stage is registered under `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Stage>> {
        self.entries
            .iter()
            .find(|(registered, _)| registered.eq_ignore_ascii_case(name))
            .map(|(_, constructor)| constructor())
            .ok_or_else(|| Error::UnknownStage(name.to_string()))
    }

    /// Resolves a selection string to stage instances, in selection order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoStages`] if no name in the selection resolves.
    pub fn resolve(&self, selection: &str) -> Result<Vec<Box<dyn Stage>>> {
        let names = self.expand(selection);
        info!("Processing stage selection '{}'", names.join(","));

        let mut stages = Vec::new();
        for name in &names {
            match self.create(name) {
                Ok(stage) => {
                    info!("Adding stage '{}'", stage.name());
                    stages.push(stage);
                }
                Err(e) => warn!("{e} - skipping"),
            }
        }

        if stages.is_empty() {
            return Err(Error::NoStages);
        }
        info!("Total stages configured: {}", stages.len());
        Ok(stages)
    }

    /// Expands presets and `full` into normalized stage names without resolving them.
    #[must_use]
    pub fn expand(&self, selection: &str) -> Vec<String> {
        let mut selection = selection.trim();
        if selection.is_empty() {
            warn!("No stage selection provided, defaulting to '{DEFAULT_STAGE}'");
            selection = DEFAULT_STAGE;
        }

        let selection = expand_preset(selection).unwrap_or(selection);
        let mut names = Vec::new();
        for option in selection.split(',') {
            let option = option.trim().to_ascii_lowercase();
            if option.is_empty() {
                continue;
            }
            if option == FULL_SELECTION {
                names.extend(self.names().map(str::to_string));
            } else {
                names.push(option);
            }
        }
        names
    }
}

/// The selection a numeric preset stands for.
#[must_use]
pub fn expand_preset(selection: &str) -> Option<&'static str> {
    match selection.trim() {
        "1" => Some("rename"),
        "2" => Some("rename,fold"),
        "3" => Some("rename,nops"),
        "4" => Some(FULL_SELECTION),
        _ => None,
    }
}

/// `<dir>/<stem>_obf<.ext>` next to `input`.
#[must_use]
pub fn output_path_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match input.extension() {
        Some(extension) => format!("{stem}{OUTPUT_SUFFIX}.{}", extension.to_string_lossy()),
        None => format!("{stem}{OUTPUT_SUFFIX}"),
    };
    input.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(stages: &[Box<dyn Stage>]) -> Vec<&'static str> {
        stages.iter().map(|stage| stage.name()).collect()
    }

    #[test]
    fn test_presets() {
        let registry = StageRegistry::default();
        assert_eq!(names(&registry.resolve("1").unwrap()), vec!["rename"]);
        assert_eq!(names(&registry.resolve(" 2 ").unwrap()), vec!["rename", "fold"]);
        assert_eq!(names(&registry.resolve("3").unwrap()), vec!["rename", "nops"]);
        assert_eq!(
            names(&registry.resolve("4").unwrap()),
            vec!["rename", "fold", "nops"]
        );
        assert!(expand_preset("5").is_none());
    }

    #[test]
    fn test_selection_parsing() {
        let registry = StageRegistry::default();
        assert_eq!(
            names(&registry.resolve(" NOPS , Fold ").unwrap()),
            vec!["nops", "fold"]
        );
        assert_eq!(names(&registry.resolve("").unwrap()), vec!["rename"]);
        assert_eq!(
            names(&registry.resolve("bogus,fold").unwrap()),
            vec!["fold"]
        );
        assert!(matches!(registry.resolve("bogus,,other"), Err(Error::NoStages)));
        assert!(matches!(
            registry.create("bogus"),
            Err(Error::UnknownStage(name)) if name == "bogus"
        ));
    }

    #[test]
    fn test_registration() {
        let mut registry = StageRegistry::empty();
        assert!(matches!(registry.resolve("full"), Err(Error::NoStages)));

        registry.register("nops", NopStage::boxed);
        registry.register("NOPS", FoldStage::boxed);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["nops"]);
        assert_eq!(registry.create("nops").unwrap().name(), "fold");
    }

    #[test]
    fn test_output_path() {
        assert_eq!(
            output_path_for(Path::new("/tmp/game/Assembly-CSharp.dll")),
            PathBuf::from("/tmp/game/Assembly-CSharp_obf.dll")
        );
        assert_eq!(
            output_path_for(Path::new("plugin")),
            PathBuf::from("plugin_obf")
        );
        assert_eq!(
            output_path_for(Path::new("a.b.json")),
            PathBuf::from("a.b_obf.json")
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = PipelineConfig::default().with_stages("2").with_seed(11);
        assert_eq!(config.stages, "2");
        assert_eq!(config.name_seed, Some(11));
        assert_eq!(config.name_length, 8);
        assert_eq!(config.eval_step_budget, 20_000);
        assert_eq!(config.offset_shift, 4);
        assert!(config.writer.keep_max_stack);
    }
}
