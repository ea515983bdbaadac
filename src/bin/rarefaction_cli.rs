use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::process::ExitCode;

use rarefaction_rs::config::RarefactionConfig;
use rarefaction_rs::error::Result;
use rarefaction_rs::orchestrator::Orchestrator;
use rarefaction_rs::results::{check_writable, render, write_results};

fn spinner(color: &str, msg: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&[
                "⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏",
            ])
            .template(&format!("{{spinner:.{color}}} {{msg}}"))
            .expect("Invalid spinner template"),
    );
    spinner.set_message(msg);
    spinner
}

fn init_logging(config: &RarefactionConfig) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = &config.log_file {
        let file = File::create(path)
            .map_err(|e| rarefaction_rs::error::RarefactionError::filesystem(path, e))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn run(mut config: RarefactionConfig) -> Result<()> {
    config.validate()?;
    if config.threads > 0 {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build_global()
        {
            log::warn!("Could not size the thread pool: {}", e);
        }
    }
    check_writable(&config.results, config.force)?;

    // 1. Count the input reads
    let scan = spinner("blue", "Counting reads...");
    let results_path = config.results.clone();
    let (format, force) = (config.format, config.force);
    let depth_count = config.depths.len() as u64;
    let orchestrator = Orchestrator::from_config(config)?;
    scan.finish_with_message(format!(
        "Found {} FASTQ file(s), smallest holds {} reads.",
        orchestrator.corpus().files.len(),
        orchestrator.corpus().min_records()
    ));

    // 2. Depth levels
    let bar = ProgressBar::new(depth_count);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.green} {pos}/{len} {msg}")
            .expect("Invalid progress template"),
    );
    let results = orchestrator.with_progress(bar.clone()).run()?;
    bar.finish_with_message(format!(
        "{} coefficient(s), {} depth level(s) skipped.",
        results.records.len(),
        results.skipped().count()
    ));

    // 3. Results
    let writing = spinner("yellow", "Writing results...");
    write_results(&results_path, &render(&results, format)?, force)?;
    writing.finish_with_message("All done!");
    Ok(())
}

fn main() -> ExitCode {
    let config = RarefactionConfig::parse();
    if let Err(e) = init_logging(&config) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
