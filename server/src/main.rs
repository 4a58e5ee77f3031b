use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use debugger::{Launcher, ProcessLauncher};
use eyre::WrapErr;
use server::{Session, SessionConfig};
use settings::FileSettings;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
struct Args {
    /// Listen for DAP clients on this TCP port instead of using stdio
    #[clap(long, num_args = 0..=1, default_missing_value = "4711")]
    server: Option<u16>,

    /// Settings file naming the interpreter executable
    #[clap(short, long)]
    settings: Option<PathBuf>,

    /// Write logs to stderr as json
    #[clap(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    // stdout carries the protocol, so logs go to stderr
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    tracing::debug!(?args, "parsed command line arguments");

    let settings_path =
        settings::settings_path(args.settings).unwrap_or_else(|| PathBuf::from("settings.json"));
    tracing::debug!(path = %settings_path.display(), "using settings file");
    let launcher: Arc<dyn Launcher> = Arc::new(ProcessLauncher::new(Arc::new(
        FileSettings::new(settings_path),
    )));

    match args.server {
        Some(port) => serve(port, launcher).await,
        None => {
            tracing::info!("serving on stdio");
            Session::new(launcher, SessionConfig::default())
                .run(tokio::io::stdin(), tokio::io::stdout())
                .await
                .wrap_err("running session on stdio")
        }
    }
}

async fn serve(port: u16, launcher: Arc<dyn Launcher>) -> eyre::Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .wrap_err_with(|| format!("binding to port {port}"))?;
    tracing::info!(port, "waiting for clients");

    loop {
        let (stream, peer) = listener.accept().await.wrap_err("accepting client")?;
        tracing::info!(%peer, "client connected");

        let session = Session::new(Arc::clone(&launcher), SessionConfig::default());
        tokio::spawn(async move {
            let (input, output) = stream.into_split();
            match session.run(input, output).await {
                Ok(()) => tracing::info!(%peer, "client disconnected"),
                Err(e) => tracing::warn!(%peer, error = %e, "session failed"),
            }
        });
    }
}
