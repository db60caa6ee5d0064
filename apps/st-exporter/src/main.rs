use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use st_metrics::{
    load_table_file, ExtractionTable, HttpStatusReader, MetricsHub, OAuthClient, OAuthConfig,
    PollLoop, ReaderConfig, StatusProcessor,
};

mod config;
mod server;

use config::{is_info_request, Args, ConfigError, LogFormat, Settings};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if is_info_request(&e) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            };
        }
    };
    setup_tracing(args.log_format);

    let settings = match Settings::from_args(args) {
        Ok(settings) => settings,
        Err(ConfigError::MissingCredentials) => {
            eprintln!("{}", Args::command().render_help());
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<()> {
    let table = match &settings.attributes {
        Some(path) => load_table_file(path)?,
        None => ExtractionTable::default(),
    };
    info!(
        attributes = table.attributes.len(),
        interval_secs = settings.interval.as_secs(),
        "st-exporter starting"
    );

    let hub = Arc::new(MetricsHub::new().context("creating metrics registry")?);
    let tokens = Arc::new(
        OAuthClient::new(
            settings.credentials.clone(),
            OAuthConfig {
                token_url: settings.token_url.clone(),
                ..Default::default()
            },
        )
        .context("creating OAuth client")?,
    );
    let reader = Arc::new(
        HttpStatusReader::new(
            tokens,
            ReaderConfig {
                api_url: settings.api_url.clone(),
                ..Default::default()
            },
        )
        .context("creating status reader")?,
    );
    let poll = PollLoop::new(
        reader,
        Arc::new(StatusProcessor::new(table)),
        hub.clone(),
        settings.interval,
    );

    let mut server = tokio::spawn(server::serve(
        settings.listen_addr,
        settings.tls.clone(),
        hub,
    ));
    let poller = poll.start();

    let outcome = tokio::select! {
        res = &mut server => match res {
            Ok(Ok(())) => Err(anyhow::anyhow!("metrics server exited")),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(anyhow::Error::new(e).context("metrics server task failed")),
        },
        _ = shutdown_signal() => {
            info!("st-exporter shutting down");
            Ok(())
        }
    };

    poller.abort();
    server.abort();
    outcome
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn setup_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}
