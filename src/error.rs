use std::{net::SocketAddr, num::ParseIntError, path::PathBuf};

use thiserror::Error;

/// Failures that prevent the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{0}")]
    InvalidConfig(String),
    #[error("invalid port {value:?}")]
    InvalidPort {
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("invalid trusted proxy {entry:?}: {reason}")]
    TrustedProxy { entry: String, reason: String },
    #[error("unable to open GeoIP database {}", path.display())]
    GeoipOpen {
        path: PathBuf,
        #[source]
        source: maxminddb::MaxMindDbError,
    },
    #[error("unable to load templates from {}", dir.display())]
    TemplateLoad {
        dir: PathBuf,
        #[source]
        source: tera::Error,
    },
    #[error("template {name:?} not found in {}", dir.display())]
    TemplateMissing { dir: PathBuf, name: &'static str },
    #[error("unable to listen on {addr}")]
    ListenerBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl StartupError {
    /// Stable identifier written as `error=<kind>` on fatal exit.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidPort { .. } => "invalid_port",
            Self::TrustedProxy { .. } => "trusted_proxy_config_failed",
            Self::GeoipOpen { .. } => "geoip_db_open_failed",
            Self::TemplateLoad { .. } | Self::TemplateMissing { .. } => "template_load_failed",
            Self::ListenerBind { .. } => "listener_bind_failed",
        }
    }
}

/// The single `error=<kind> detail=<msg>` line written on fatal exit. Multi-line messages, such
/// as template parse errors, are folded onto one line.
pub fn fatal_line(err: &anyhow::Error) -> String {
    let kind = err
        .downcast_ref::<StartupError>()
        .map_or("server_failed", StartupError::kind);
    let detail = format!("{err:#}");
    let detail = detail
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    format!("error={kind} detail={detail}")
}
