use std::{
    net::{Ipv4Addr, SocketAddr},
    process::ExitCode,
};

use log::{info, warn};
use poem::{
    listener::{Listener, TcpListener},
    Server,
};

mod api;
mod client_ip;
mod config;
mod error;
mod logging;
mod providers;
mod templates;
mod visitor;

use crate::{
    api::AppState,
    config::{Cli, Settings},
    error::StartupError,
    providers::{IpgeoProvider, MaxmindProvider},
};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Bypasses the logger so RUST_LOG can't silence it
            eprintln!("{}", error::fatal_line(&err));
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let settings = Settings::try_from(Cli::load()?)?;

    let geoip = MaxmindProvider::open(&settings.geoip_db).map_err(|source| {
        StartupError::GeoipOpen {
            path: settings.geoip_db.clone(),
            source,
        }
    })?;
    info!("event=geoip_loaded path={}", geoip.path().display());

    let templates = templates::load(&settings.template_dir)?;

    info!(
        "event=trusted_proxies cidrs={}",
        settings
            .trusted_proxies
            .cidrs()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    );

    let state = AppState::new(
        IpgeoProvider::Maxmind(geoip),
        settings.trusted_proxies,
        templates,
    );

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.port));
    let acceptor = TcpListener::bind(addr)
        .into_acceptor()
        .await
        .map_err(|source| StartupError::ListenerBind { addr, source })?;
    info!("event=server_start port={}", settings.port);

    // The GeoIP reader lives in the app and is dropped once serving stops
    Server::new_with_acceptor(acceptor)
        .run_with_graceful_shutdown(api::app(state), shutdown_signal(), None)
        .await?;

    info!("event=server_stop");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Unable to listen for SIGTERM: {}", err);
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
