use std::net::IpAddr;

mod maxmind;
pub use maxmind::MaxmindProvider;

/// English country and city names; empty when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoLocation {
    pub country: String,
    pub city: String,
}

#[derive(Debug)]
pub enum IpgeoProvider {
    Maxmind(MaxmindProvider),
    /// No database handle. Every lookup comes back empty.
    Unavailable,
}

impl IpgeoProvider {
    /// Resolves an IP literal. Malformed input, missing records and database errors all come
    /// back as an empty location.
    pub fn resolve(&self, ip_address: &str) -> GeoLocation {
        let Ok(ip_address) = ip_address.parse::<IpAddr>() else {
            return GeoLocation::default();
        };

        match self {
            Self::Maxmind(provider) => provider.lookup(ip_address).unwrap_or_default(),
            Self::Unavailable => GeoLocation::default(),
        }
    }
}
