use crate::cli::Args;
use crate::pipeline::annotate::Annotator;
use crate::pipeline::detection::load_shared;
use crate::pipeline::model;
use crate::pipeline::orchestrator::process;
use crate::pipeline::types::CancelToken;
use crate::run_report::{write_report, RunReport};
use crate::video::Origin;
use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

/// Runs the detection pipeline to exhaustion without a live consumer and writes
/// the run report. Progress goes to the terminal only when `show_progress` is set.
pub fn process_video(
    args: &Args,
    input: &str,
    output: &Path,
    cancel: CancelToken,
    show_progress: bool,
) -> Result<RunReport> {
    let model_path = args.model.clone();
    let detector = model::global()
        .acquire(|| load_shared(&model_path))
        .with_context(|| format!("Failed to load model at '{}'", args.model))?;

    let started_at = Utc::now();
    let mut pipeline = process(
        &Origin::parse(input),
        output,
        detector,
        Annotator::new(args.policy()),
        cancel,
    )
    .with_context(|| format!("Failed to start processing '{}'", input))?;

    let pb = progress_bar(pipeline.frame_count(), show_progress)?;

    let mut failure = None;
    for frame in pipeline.by_ref() {
        match frame {
            Ok(_) => pb.inc(1),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    pb.finish_with_message("Done");

    let stats = pipeline.stats();
    drop(pipeline);

    let report = RunReport::new(
        input,
        output,
        started_at,
        stats,
        failure.as_ref().map(|e| e.to_string()),
    );
    let report_file = write_report(&report)?;
    tracing::info!(
        "Processed {}: {} frames written, {} skipped, report at {}",
        input,
        stats.frames_written,
        stats.frames_skipped,
        report_file.display()
    );

    match failure {
        Some(e) => Err(e).context("Pipeline stopped before the end of the input"),
        None => Ok(report),
    }
}

fn progress_bar(frame_count: Option<usize>, visible: bool) -> Result<ProgressBar> {
    if !visible {
        return Ok(ProgressBar::hidden());
    }
    let pb = match frame_count {
        Some(total) => {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow} fps, {eta})")?
                    .progress_chars("#>-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };
    Ok(pb)
}
