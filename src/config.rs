use std::path::PathBuf;

use clap::{error::ErrorKind, Parser};

use crate::{
    client_ip::{TrustedProxies, DEFAULT_TRUSTED_PROXIES},
    error::StartupError,
};

pub const DEFAULT_PORT: &str = "5001";
pub const DEFAULT_GEOIP_DB: &str = "geoip/GeoLite2-City.mmdb";
pub const DEFAULT_TEMPLATE_DIR: &str = "templates";

// Values are kept as strings so that an empty environment variable falls back to the default
// instead of failing to parse.
#[derive(Debug, Default, Parser)]
#[clap(version, about = "Tells visitors their IP address, user agent and location")]
pub struct Cli {
    #[clap(long, env, help = "Port to listen on [default: 5001]")]
    pub port: Option<String>,
    #[clap(
        long,
        env,
        help = "Comma-separated CIDR blocks allowed to set X-Real-IP [default: 172.18.0.0/16]"
    )]
    pub trusted_proxies: Option<String>,
    #[clap(
        long,
        env,
        help = "Path to the MaxMind city database [default: geoip/GeoLite2-City.mmdb]"
    )]
    pub geoip_db: Option<String>,
    #[clap(long, env, help = "Directory holding the HTML templates [default: templates]")]
    pub template_dir: Option<String>,
}

#[derive(Debug)]
pub struct Settings {
    pub port: u16,
    pub trusted_proxies: TrustedProxies,
    pub geoip_db: PathBuf,
    pub template_dir: PathBuf,
}

impl Cli {
    /// Parses the process arguments. Help and version requests exit right away, as usual.
    pub fn load() -> Result<Self, StartupError> {
        match Self::try_parse() {
            Ok(cli) => Ok(cli),
            Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                err.exit()
            }
            Err(err) => {
                let rendered = err.to_string();
                let message = rendered.lines().next().unwrap_or_default();
                Err(StartupError::InvalidConfig(
                    message.trim_start_matches("error: ").to_owned(),
                ))
            }
        }
    }
}

fn or_default<'a>(value: &'a Option<String>, default: &'a str) -> &'a str {
    value
        .as_deref()
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
}

impl TryFrom<Cli> for Settings {
    type Error = StartupError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let port = or_default(&cli.port, DEFAULT_PORT);
        let port = port.parse().map_err(|source| StartupError::InvalidPort {
            value: port.to_owned(),
            source,
        })?;

        Ok(Self {
            port,
            trusted_proxies: TrustedProxies::parse(or_default(
                &cli.trusted_proxies,
                DEFAULT_TRUSTED_PROXIES,
            ))?,
            geoip_db: or_default(&cli.geoip_db, DEFAULT_GEOIP_DB).into(),
            template_dir: or_default(&cli.template_dir, DEFAULT_TEMPLATE_DIR).into(),
        })
    }
}
