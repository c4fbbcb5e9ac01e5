use std::{
    fmt,
    net::IpAddr,
    path::{Path, PathBuf},
};

use log::trace;
use maxminddb::{geoip2::City, MaxMindDbError, Reader};

use super::GeoLocation;

/// City-level lookups against a MaxMind `.mmdb` file held in memory.
pub struct MaxmindProvider {
    reader: Reader<Vec<u8>>,
    path: PathBuf,
}

impl MaxmindProvider {
    pub fn open(path: &Path) -> Result<Self, MaxMindDbError> {
        Ok(Self {
            reader: Reader::open_readfile(path)?,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup(&self, ip_address: IpAddr) -> Option<GeoLocation> {
        let result = self.reader.lookup(ip_address).ok()?;
        let city: City = result.decode().ok()??;

        let location = GeoLocation {
            country: city.country.names.english.unwrap_or_default().to_owned(),
            // Country-level records carry no city names
            city: city.city.names.english.unwrap_or_default().to_owned(),
        };

        trace!(
            "MaxMind lookup for {}: country={:?}, city={:?}",
            ip_address,
            location.country,
            location.city
        );

        Some(location)
    }
}

impl fmt::Debug for MaxmindProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaxmindProvider")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
