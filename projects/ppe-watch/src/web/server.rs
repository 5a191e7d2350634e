use crate::cli::Args;
use crate::pipeline::detection::load_shared;
use crate::pipeline::model;
use crate::pipeline::types::CancelToken;
use crate::run_report::ArtifactClaims;
use crate::web::api;
use crate::web::assets::{index_handler, static_handler};
use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// State shared by all handlers.
pub struct AppState {
    pub args: Arc<Args>,
    pub camera: i32,
    /// Most recent processed artifact; handed explicitly to the replay path.
    pub latest_artifact: RwLock<Option<PathBuf>>,
    /// Cancelled on shutdown so unbounded camera runs end.
    pub shutdown: CancelToken,
    /// Output paths owned by in-flight runs.
    pub claims: ArtifactClaims,
}

impl AppState {
    pub fn new(args: Args, camera: i32) -> Self {
        Self {
            args: Arc::new(args),
            camera,
            latest_artifact: RwLock::new(None),
            shutdown: CancelToken::new(),
            claims: ArtifactClaims::new(),
        }
    }

    pub fn latest_artifact(&self) -> Option<PathBuf> {
        self.latest_artifact
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_latest_artifact(&self, path: PathBuf) {
        *self
            .latest_artifact
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(path);
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/process_video", post(api::process_video_handler))
        .route("/video", get(api::video_handler))
        .route("/download_video", get(api::download_video_handler))
        .route("/webapp", get(api::webapp_handler))
        .route("/api/latest", get(api::latest_report_handler))
        .route("/*path", get(static_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(args: Args, host: IpAddr, port: u16, camera: i32) -> Result<()> {
    let mut current_port = port;
    let listener = loop {
        let addr = SocketAddr::new(host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port.wrapping_add(1);
                if current_port == 0 {
                    return Err(anyhow::anyhow!("No available ports found"));
                }
            }
        }
    };

    tokio::fs::create_dir_all(&args.upload_root).await?;

    // Warm the shared model so the first request does not pay for loading it.
    let model_path = args.model.clone();
    let warmed =
        tokio::task::spawn_blocking(move || model::global().init(|| load_shared(&model_path)))
            .await?;
    if let Err(e) = warmed {
        warn!("Model not loaded at startup, will retry per request: {:#}", e);
    }

    let state = Arc::new(AppState::new(args, camera));
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "PPE Watch server started on http://{:?}",
        tokio_listener.local_addr()?
    );

    axum::serve(tokio_listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested, stopping live pipelines");
            }
            shutdown.cancel();
        })
        .await?;

    model::global().shutdown();
    Ok(())
}
