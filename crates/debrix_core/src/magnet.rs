use std::str::FromStr;

use crate::{Error, InfoHash};

/// A parsed magnet link. Only the v1 (`btih`) form is relevant here; debrid
/// providers do not accept v2 hashes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Magnet {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

impl Magnet {
    pub fn new(info_hash: InfoHash, display_name: Option<String>, trackers: Vec<String>) -> Self {
        Self {
            info_hash,
            display_name,
            trackers,
        }
    }

    /// Parse a magnet link.
    pub fn parse(input: &str) -> crate::Result<Magnet> {
        let url = url::Url::parse(input).map_err(Error::MagnetUrl)?;
        if url.scheme() != "magnet" {
            return Err(Error::MagnetScheme);
        }
        let mut info_hash: Option<InfoHash> = None;
        let mut display_name: Option<String> = None;
        let mut trackers = Vec::<String>::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    if let Some(ih) = value.as_ref().strip_prefix("urn:btih:") {
                        info_hash.replace(InfoHash::from_str(ih)?);
                    }
                }
                "dn" => {
                    display_name.replace(value.into_owned());
                }
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }
        match info_hash {
            Some(info_hash) => Ok(Magnet {
                info_hash,
                display_name,
                trackers,
            }),
            None => Err(Error::MagnetNoInfoHash),
        }
    }
}

impl std::fmt::Display for Magnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "magnet:?xt=urn:btih:{}", self.info_hash)?;
        if let Some(dn) = &self.display_name {
            write!(f, "&dn={}", urlencoding::encode(dn))?;
        }
        for tracker in self.trackers.iter() {
            write!(f, "&tr={tracker}")?;
        }
        Ok(())
    }
}
