use crate::error::PipelineError;
use crate::pipeline::annotate::Annotator;
use crate::pipeline::detection::load_shared;
use crate::pipeline::model;
use crate::pipeline::orchestrator::{process, DetectionPipeline};
use crate::pipeline::replay::{mjpeg, replay};
use crate::run_report::{
    read_report, sanitize_file_name, upload_paths, write_report, RunReport,
};
use crate::video::encoder::JpegEncoder;
use crate::video::processor::process_video;
use crate::video::Origin;
use crate::web::server::AppState;
use crate::web::stream::{multipart_response, pump};
use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use chrono::Utc;
use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

type ApiError = (StatusCode, String);

const WEBCAM_ARTIFACT: &str = "webcam_output.mp4";

fn internal<E: Display>(e: E) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn bad_request<E: Display>(e: E) -> ApiError {
    (StatusCode::BAD_REQUEST, e.to_string())
}

fn busy(path: &Path) -> ApiError {
    (
        StatusCode::CONFLICT,
        format!("A run is already writing {}", path.display()),
    )
}

/// Status for a failed pipeline start, based on the typed error in the chain.
fn status_for(err: &anyhow::Error) -> StatusCode {
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::SourceUnavailable(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(PipelineError::ArtifactNotFound(_)) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Saves the uploaded video, runs the full pipeline over it and records the artifact.
pub async fn process_video_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Redirect, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .and_then(sanitize_file_name)
            .ok_or_else(|| bad_request("No selected file"))?;
        let data = field.bytes().await.map_err(bad_request)?;

        let (input, output) = upload_paths(&state.args.upload_root, &file_name);
        let claim = state.claims.claim(&output).ok_or_else(|| busy(&output))?;
        tokio::fs::create_dir_all(&state.args.upload_root)
            .await
            .map_err(internal)?;
        tokio::fs::write(&input, &data).await.map_err(internal)?;
        tracing::info!("Saved upload {} ({} bytes)", input.display(), data.len());

        upload = Some((input, output, claim));
        break;
    }
    let (input, output, claim) = upload.ok_or_else(|| bad_request("No file part"))?;

    let args = state.args.clone();
    let cancel = state.shutdown.clone();
    let artifact = output.clone();
    tokio::task::spawn_blocking(move || {
        let _claim = claim;
        process_video(&args, &input.to_string_lossy(), &artifact, cancel, false)
    })
    .await
    .map_err(internal)?
    .map_err(|e| (status_for(&e), format!("{:#}", e)))?;

    state.set_latest_artifact(output);
    Ok(Redirect::to("/"))
}

/// Replays the latest artifact as a multipart stream.
pub async fn video_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let not_found = || (StatusCode::NOT_FOUND, "No video available".to_string());
    let artifact = state.latest_artifact().ok_or_else(not_found)?;
    let encoder = JpegEncoder::new(state.args.jpeg_quality);

    let stream = tokio::task::spawn_blocking(move || replay(&artifact, encoder))
        .await
        .map_err(internal)?
        .map_err(|e| match e {
            PipelineError::ArtifactNotFound(_) => not_found(),
            other => internal(other),
        })?;

    Ok(multipart_response(pump(stream, drop)))
}

pub async fn download_video_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let not_found = || (StatusCode::NOT_FOUND, "Processed video not found".to_string());
    let artifact = state.latest_artifact().ok_or_else(not_found)?;
    let data = tokio::fs::read(&artifact).await.map_err(|_| not_found())?;

    let file_name = artifact
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(WEBCAM_ARTIFACT)
        .to_string();
    let mime = mime_guess::from_path(&artifact).first_or_octet_stream();

    Ok((
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        data,
    )
        .into_response())
}

/// Live detection over the configured camera, persisted to `webcam_output.mp4`.
/// Only one live run at a time writes that artifact; others get 409.
pub async fn webapp_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let args = state.args.clone();
    let camera = state.camera;
    let cancel = state.shutdown.clone();
    let output = args.upload_root.join(WEBCAM_ARTIFACT);
    let claim = state.claims.claim(&output).ok_or_else(|| busy(&output))?;
    let artifact = output.clone();
    let encoder = JpegEncoder::new(args.jpeg_quality);

    let pipeline = tokio::task::spawn_blocking(move || -> anyhow::Result<DetectionPipeline> {
        let detector = model::global().acquire(|| load_shared(&args.model))?;
        Ok(process(
            &Origin::Device(camera),
            &artifact,
            detector,
            Annotator::new(args.policy()),
            cancel,
        )?)
    })
    .await
    .map_err(internal)?
    .map_err(|e| (status_for(&e), format!("{:#}", e)))?;

    let started_at = Utc::now();
    let body = pump(mjpeg(pipeline, encoder), move |stream| {
        let mut pipeline = stream.into_inner();
        let (stats, error) = match pipeline.close() {
            Ok(stats) => (stats, None),
            Err(e) => (pipeline.stats(), Some(e.to_string())),
        };
        let input = Origin::Device(camera).to_string();
        let report = RunReport::new(&input, &output, started_at, stats, error);
        if let Err(e) = write_report(&report) {
            tracing::warn!("Failed to write report for {}: {}", output.display(), e);
        }
        drop(claim);
    });

    Ok(multipart_response(body))
}

/// Run report of the latest artifact.
pub async fn latest_report_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RunReport>, ApiError> {
    let not_found = || (StatusCode::NOT_FOUND, "No video available".to_string());
    let artifact = state.latest_artifact().ok_or_else(not_found)?;
    read_report(&artifact)
        .map_err(internal)?
        .map(Json)
        .ok_or_else(not_found)
}
