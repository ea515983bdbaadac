//src/analysis.rs

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::error::{RarefactionError, Result};
use crate::sample::ReplicateSet;
use crate::types::ReportDir;
use crate::workdir::WorkRoot;

pub const CONTAINER_INPUT: &str = "/docker_run/input";
pub const CONTAINER_OUTPUT: &str = "/docker_run/output";

const POLL_INTERVAL: Duration = Duration::from_millis(200);

static INVOCATION_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Why a single tool invocation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolFailure {
    Failed(String),
    TimedOut(Duration),
}

/// An external analysis tool: reads reduced FASTQ files from `input`
/// (read-only) and writes its report into `output`.
pub trait AnalysisTool: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, input: &Path, output: &Path) -> std::result::Result<(), ToolFailure>;
}

/// A named analysis stage bound to the tool that implements it.
pub struct AnalysisStage {
    pub name: String,
    pub tool: Box<dyn AnalysisTool>,
}

impl AnalysisStage {
    pub fn new(name: impl Into<String>, tool: Box<dyn AnalysisTool>) -> Self {
        Self {
            name: name.into(),
            tool,
        }
    }
}

/// A containerized tool started through a docker-compatible CLI:
///
/// ```text
/// <runtime> run --rm --name <unique> \
///     -v <input>:/docker_run/input:ro -v <output>:/docker_run/output:rw \
///     <image> -i /docker_run/input -o /docker_run/output
/// ```
#[derive(Debug, Clone)]
pub struct ContainerTool {
    pub runtime: String,
    pub image: String,
    pub timeout: Option<Duration>,
}

impl ContainerTool {
    pub fn new(runtime: impl Into<String>, image: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            runtime: runtime.into(),
            image: image.into(),
            timeout,
        }
    }

    /// Arguments passed to the runtime binary.
    pub fn run_args(&self, container_name: &str, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container_name.to_string(),
            "-v".to_string(),
            format!("{}:{}:ro", input.display(), CONTAINER_INPUT),
            "-v".to_string(),
            format!("{}:{}:rw", output.display(), CONTAINER_OUTPUT),
            self.image.clone(),
            "-i".to_string(),
            CONTAINER_INPUT.to_string(),
            "-o".to_string(),
            CONTAINER_OUTPUT.to_string(),
        ]
    }

    fn kill_container(&self, container_name: &str) {
        let status = Command::new(&self.runtime)
            .args(["kill", container_name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = status {
            log::warn!("Could not kill container {}: {}", container_name, e);
        }
    }
}

impl AnalysisTool for ContainerTool {
    fn name(&self) -> &str {
        &self.image
    }

    fn run(&self, input: &Path, output: &Path) -> std::result::Result<(), ToolFailure> {
        let input = fs::canonicalize(input).map_err(|e| ToolFailure::Failed(e.to_string()))?;
        let output = fs::canonicalize(output).map_err(|e| ToolFailure::Failed(e.to_string()))?;
        let container_name = format!(
            "rarefaction-{}-{}",
            std::process::id(),
            INVOCATION_COUNTER.fetch_add(1, Ordering::Relaxed)
        );

        log::debug!("{} {}", self.runtime, self.run_args(&container_name, &input, &output).join(" "));
        let mut child = Command::new(&self.runtime)
            .args(self.run_args(&container_name, &input, &output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolFailure::Failed(format!("cannot start {}: {}", self.runtime, e)))?;

        // Drained on a thread so a chatty tool cannot block on a full pipe.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut s = String::new();
                let _ = stderr.read_to_string(&mut s);
                s
            })
        });

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => return Err(ToolFailure::Failed(e.to_string())),
            }
            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    let _ = child.kill();
                    let _ = child.wait();
                    self.kill_container(&container_name);
                    return Err(ToolFailure::TimedOut(limit));
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        log::debug!("{} finished in {:?}", self.image, started.elapsed());

        if status.success() {
            Ok(())
        } else {
            Err(ToolFailure::Failed(format!("{}: {}", status, stderr.trim())))
        }
    }
}

/// Output directory of `stage` for replicate `rep`, a sibling of the replicate.
pub fn report_dir_path(root: &Path, rep: usize, stage: &str) -> PathBuf {
    root.join(format!("{}_{}", rep, stage))
}

/// Run one stage over every replicate of `set`, one replicate at a time.
///
/// Each replicate directory is deleted as soon as the tool has produced its
/// report, so `set` is consumed by this call.
pub fn run_stage(work: &WorkRoot, stage: &AnalysisStage, set: ReplicateSet) -> Result<Vec<ReportDir>> {
    log::info!("Start {} analysis with {}", stage.name, stage.tool.name());
    let mut reports = Vec::with_capacity(set.dirs.len());

    for (rep, input) in set.dirs.iter().enumerate() {
        let output = work.create_dir(report_dir_path(&set.root, rep, &stage.name))?;
        stage.tool.run(input, &output).map_err(|failure| match failure {
            ToolFailure::Failed(message) => RarefactionError::ToolInvocation {
                tool: stage.tool.name().to_string(),
                stage: stage.name.clone(),
                replicate: rep,
                message,
            },
            ToolFailure::TimedOut(timeout) => RarefactionError::ToolTimeout {
                tool: stage.tool.name().to_string(),
                stage: stage.name.clone(),
                replicate: rep,
                timeout,
            },
        })?;
        work.remove_dir(input)?;
        reports.push(ReportDir {
            replicate: rep,
            stage: stage.name.clone(),
            path: output,
        });
    }

    log::info!("Finish {} analysis", stage.name);
    Ok(reports)
}
