//src/orchestrator.rs

use indicatif::ProgressBar;
use std::path::{Path, PathBuf};

use crate::analysis::{run_stage, AnalysisStage, ContainerTool};
use crate::config::RarefactionConfig;
use crate::correlation::correlate_stages;
use crate::dissimilarity::extract_stage;
use crate::error::{Disposition, RarefactionError, Result};
use crate::fastq::InputCorpus;
use crate::sample::{build_replicate_set, copy_replicate_set};
use crate::types::{CoefficientRecord, DepthOutcome, DepthReport, DepthState};
use crate::workdir::WorkRoot;
use crate::RarefactionResults;

/// Drives every depth level through sampling, both analysis stages,
/// extraction and correlation.
///
/// Owns the working root: each level lives in its own subdirectory, which is
/// removed before the next level starts, and the root is removed at the end.
pub struct Orchestrator {
    config: RarefactionConfig,
    work: WorkRoot,
    corpus: InputCorpus,
    stages: Vec<AnalysisStage>,
    progress: ProgressBar,
}

impl Orchestrator {
    /// Orchestrator running the two container images named in `config`.
    pub fn from_config(config: RarefactionConfig) -> Result<Self> {
        let timeout = config.tool_timeout();
        let stages = vec![
            AnalysisStage::new(
                "primary",
                Box::new(ContainerTool::new(&config.container_runtime, &config.primary_image, timeout)),
            ),
            AnalysisStage::new(
                "secondary",
                Box::new(ContainerTool::new(&config.container_runtime, &config.secondary_image, timeout)),
            ),
        ];
        Self::with_stages(config, stages)
    }

    /// Claims the working root and counts the input corpus.
    pub fn with_stages(config: RarefactionConfig, stages: Vec<AnalysisStage>) -> Result<Self> {
        if stages.len() != 2 {
            return Err(RarefactionError::config(format!(
                "exactly two analysis stages are compared, got {}",
                stages.len()
            )));
        }
        if stages[0].name == stages[1].name {
            return Err(RarefactionError::config("analysis stages need distinct names"));
        }
        let corpus = InputCorpus::scan(&config.input_dir)?;
        let work = WorkRoot::claim(&config.output_dir, config.clean)?;
        Ok(Self {
            config,
            work,
            corpus,
            stages,
            progress: ProgressBar::hidden(),
        })
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn corpus(&self) -> &InputCorpus {
        &self.corpus
    }

    fn enter(&self, depth: usize, state: DepthState) {
        log::info!("depth {}: {}", depth, state);
        self.progress.set_message(format!("depth {depth}: {state}"));
    }

    fn level_root(&self, depth: usize) -> PathBuf {
        self.work.path().join(format!("depth_{depth}"))
    }

    fn process_level(&self, depth: usize, level_root: &Path) -> Result<Vec<CoefficientRecord>> {
        let cfg = &self.config;

        self.enter(depth, DepthState::Sampling);
        let first = build_replicate_set(
            &self.work,
            &level_root.join(&self.stages[0].name),
            &self.corpus,
            depth,
            cfg.replicates,
            cfg.seed,
        )?;
        // every stage consumes its own copy of the replicates
        let mut sets = Vec::with_capacity(self.stages.len());
        for stage in &self.stages[1..] {
            sets.push(copy_replicate_set(&self.work, &first, &level_root.join(&stage.name))?);
        }
        sets.insert(0, first);

        let mut matrices = Vec::with_capacity(self.stages.len());
        for (stage, set) in self.stages.iter().zip(sets) {
            self.enter(depth, DepthState::Analyzing(stage.name.clone()));
            let reports = run_stage(&self.work, stage, set)?;

            self.enter(depth, DepthState::Extracting);
            matrices.push(extract_stage(&reports, &cfg.report_name, &cfg.matrix_pointer)?);
            for report in &reports {
                self.work.remove_dir(&report.path)?;
            }
        }

        self.enter(depth, DepthState::Correlating);
        correlate_stages(
            depth,
            &matrices[0],
            &matrices[1],
            cfg.pairing,
            cfg.permutations,
            cfg.seed,
        )
    }

    /// Run one depth level and tear its directory down.
    ///
    /// Returns `Err` only for failures that end the whole run; everything
    /// else becomes a `Skipped` outcome.
    pub fn run_depth_level(&self, depth: usize) -> Result<DepthOutcome> {
        let level_root = self.level_root(depth);
        let outcome = self.process_level(depth, &level_root);
        let teardown = self.work.remove_dir(&level_root);

        match outcome {
            Ok(coefficients) => {
                teardown?;
                self.enter(depth, DepthState::Succeeded);
                Ok(DepthOutcome::Succeeded { coefficients })
            }
            Err(e) => match e.disposition(self.config.fail_fast) {
                Disposition::Skip(reason) => {
                    teardown?;
                    self.enter(depth, DepthState::Skipped);
                    log::warn!("Skipping depth {}: {}", depth, reason);
                    Ok(DepthOutcome::Skipped { reason })
                }
                Disposition::Fatal => {
                    if let Err(t) = teardown {
                        log::warn!("Could not remove {:?}: {}", level_root, t);
                    }
                    Err(e)
                }
            },
        }
    }

    /// Process every configured depth level in ascending order.
    pub fn run(&self) -> Result<RarefactionResults> {
        log::info!("Start");
        let mut levels = Vec::with_capacity(self.config.depths.len());
        for &depth in &self.config.depths {
            log::info!("reads_number {}", depth);
            match self.run_depth_level(depth) {
                Ok(outcome) => levels.push(DepthReport { depth, outcome }),
                Err(e) => {
                    if let Err(t) = self.work.teardown() {
                        log::warn!("Could not remove working directory: {}", t);
                    }
                    return Err(e);
                }
            }
            self.progress.inc(1);
        }
        self.work.teardown()?;
        log::info!("Finished");
        Ok(RarefactionResults::from_levels(levels))
    }
}
