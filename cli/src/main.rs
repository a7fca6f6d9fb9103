//! The main entrypoint for ostree-delta.

use anyhow::Result;
use ostree_delta_lib::DeltaError;

async fn run() -> Result<()> {
    // Don't include timestamps and such because they're not really useful
    // and too verbose. Warnings are visible by default; RUST_LOG raises the
    // level to expose the full command audit trail.
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_target(false)
        .compact();
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::WARN.into())
        .from_env_lossy();
    // Log to stderr by default
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(format)
        .with_writer(std::io::stderr)
        .init();
    tracing::trace!("starting");
    ostree_delta_lib::cli::run_from_iter(std::env::args()).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!("{:#}", e);
        let code = e
            .downcast_ref::<DeltaError>()
            .map(DeltaError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
