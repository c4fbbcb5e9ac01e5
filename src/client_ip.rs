use std::{borrow::Cow, net::IpAddr};

use cidr::{IpCidr, IpInet};
use poem::{http::HeaderMap, Addr, Request};

use crate::error::StartupError;

pub const X_REAL_IP: &str = "X-Real-IP";

/// Docker's default bridge network.
pub const DEFAULT_TRUSTED_PROXIES: &str = "172.18.0.0/16";

/// Networks whose `X-Real-IP` header is believed.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    cidrs: Vec<IpCidr>,
}

impl TrustedProxies {
    /// Parses a comma-separated list of CIDR blocks. A bare address is taken as a single host,
    /// and host bits set past the prefix are dropped.
    pub fn parse(list: &str) -> Result<Self, StartupError> {
        let mut cidrs = vec![];

        for entry in list.split(',') {
            let entry = entry.trim();
            let invalid = |reason: String| StartupError::TrustedProxy {
                entry: entry.to_owned(),
                reason,
            };

            let cidr = if entry.contains('/') {
                entry
                    .parse::<IpInet>()
                    .map_err(|err| invalid(err.to_string()))?
                    .network()
            } else {
                IpCidr::new_host(
                    entry
                        .parse::<IpAddr>()
                        .map_err(|err| invalid(err.to_string()))?,
                )
            };

            cidrs.push(cidr);
        }

        Ok(Self { cidrs })
    }

    pub fn contains(&self, ip_address: &IpAddr) -> bool {
        self.cidrs.iter().any(|cidr| cidr.contains(ip_address))
    }

    pub fn cidrs(&self) -> &[IpCidr] {
        &self.cidrs
    }
}

/// Returns the host part of a `host:port` address, with brackets removed from IPv6 hosts.
pub fn split_host(address: &str) -> Option<&str> {
    if let Some(rest) = address.strip_prefix('[') {
        let (host, port) = rest.split_once(']')?;
        port.strip_prefix(':')?;
        return Some(host);
    }

    let (host, _) = address.rsplit_once(':')?;
    if host.contains(':') {
        // Unbracketed IPv6 literal, the port can't be told apart
        return None;
    }

    Some(host)
}

/// Picks the address that should be considered the caller.
///
/// `X-Real-IP` is only consulted when the immediate peer sits inside a trusted network, and its
/// value is returned verbatim. Anything else falls back to the peer's host part, or to the whole
/// peer address when it carries no port.
pub fn client_ip(peer: &str, real_ip: Option<&str>, trusted_proxies: &TrustedProxies) -> String {
    let host = split_host(peer).unwrap_or(peer);

    let peer_trusted = host
        .parse::<IpAddr>()
        .is_ok_and(|ip_address| trusted_proxies.contains(&ip_address));

    match real_ip {
        Some(real_ip) if peer_trusted && !real_ip.is_empty() => real_ip.to_owned(),
        _ => host.to_owned(),
    }
}

/// The connection's remote address as `host:port`.
pub fn peer_addr(req: &Request) -> String {
    let remote_addr: &Addr = req.remote_addr();
    match remote_addr.as_socket_addr() {
        Some(addr) => addr.to_string(),
        None => remote_addr.to_string(),
    }
}

/// A header value as text. Bytes outside visible ASCII are kept, invalid UTF-8 is replaced.
pub fn header_lossy<'a>(headers: &'a HeaderMap, name: &str) -> Option<Cow<'a, str>> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()))
}

pub fn from_request(req: &Request, trusted_proxies: &TrustedProxies) -> String {
    client_ip(
        &peer_addr(req),
        header_lossy(req.headers(), X_REAL_IP).as_deref(),
        trusted_proxies,
    )
}
