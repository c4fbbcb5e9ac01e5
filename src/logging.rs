use std::{
    fmt,
    io::Write,
    sync::Arc,
    time::{Duration, Instant},
};

use env_logger::{Env, Target};
use log::info;
use poem::{
    http::{header, Method},
    Endpoint, Middleware, Request, Response, Result,
};

use crate::client_ip::{self, header_lossy, TrustedProxies};

const DEFAULT_FILTER: &str = "visitord=info,poem=info";

pub const ACCESS_TARGET: &str = "visitord::access";

/// Sends `key=value` log lines to stdout, one per event. `RUST_LOG` overrides the filter.
///
/// Access lines are written bare; everything else gets a timestamp in front.
pub fn init() {
    env_logger::Builder::from_env(Env::default().default_filter_or(DEFAULT_FILTER))
        .target(Target::Stdout)
        .format(|buf, record| {
            if record.target() == ACCESS_TARGET {
                writeln!(buf, "{}", record.args())
            } else {
                writeln!(buf, "{} {}", buf.timestamp(), record.args())
            }
        })
        .init();
}

/// One request as it appears in the access log.
pub struct AccessEntry<'a> {
    pub status: u16,
    pub method: &'a Method,
    pub path: &'a str,
    pub ip: &'a str,
    pub user_agent: &'a str,
    pub duration: Duration,
}

impl fmt::Display for AccessEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status={} method={} path={} ip={} ua={:?} duration={:?}",
            self.status, self.method, self.path, self.ip, self.user_agent, self.duration
        )
    }
}

/// Writes one access log line per request, after the response has been produced.
pub struct AccessLog {
    trusted_proxies: Arc<TrustedProxies>,
}

impl AccessLog {
    pub fn new(trusted_proxies: Arc<TrustedProxies>) -> Self {
        Self { trusted_proxies }
    }
}

impl<E: Endpoint> Middleware<E> for AccessLog {
    type Output = AccessLogEndpoint<E>;

    fn transform(&self, ep: E) -> Self::Output {
        AccessLogEndpoint {
            inner: ep,
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

pub struct AccessLogEndpoint<E> {
    inner: E,
    trusted_proxies: Arc<TrustedProxies>,
}

#[poem::async_trait]
impl<E: Endpoint> Endpoint for AccessLogEndpoint<E> {
    type Output = Response;

    async fn call(&self, req: Request) -> Result<Self::Output> {
        let start = Instant::now();
        let ip = client_ip::from_request(&req, &self.trusted_proxies);
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let user_agent = header_lossy(req.headers(), header::USER_AGENT.as_str())
            .unwrap_or_default()
            .into_owned();

        let response = self.inner.get_response(req).await;

        info!(
            target: ACCESS_TARGET,
            "{}",
            AccessEntry {
                status: response.status().as_u16(),
                method: &method,
                path: &path,
                ip: &ip,
                user_agent: &user_agent,
                duration: start.elapsed(),
            }
        );

        Ok(response)
    }
}
