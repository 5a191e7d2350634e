mod cli;
mod error;
mod pipeline;
mod run_report;
mod video;
mod web;

use anyhow::Result;
use cli::{Args, Command};
use pipeline::types::CancelToken;
use video::processor::process_video;
use web::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    match args.command.clone() {
        Command::Serve { host, port, camera } => run_server(args, host, port, camera).await?,
        Command::Process { input, output } => {
            let cancel = CancelToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupted, finishing the artifact");
                    on_signal.cancel();
                }
            });

            let report = tokio::task::spawn_blocking(move || {
                process_video(&args, &input, &output, cancel, true)
            })
            .await??;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
