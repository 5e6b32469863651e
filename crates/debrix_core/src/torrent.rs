use serde::{Deserialize, Serialize};

use crate::{Magnet, quality};

/// A normalized search result from any torrent source. Immutable once
/// constructed; a refresh replaces records wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentRecord {
    title: String,
    quality: String,
    info_hash: crate::InfoHash,
    magnet: String,
}

impl TorrentRecord {
    /// Build a record from its parts. The magnet URI is always rebuilt from
    /// the parsed hash so it is canonical (`magnet:?xt=urn:btih:<HASH>…`)
    /// regardless of how the source formatted it.
    pub fn new(
        title: String,
        quality: String,
        info_hash: crate::InfoHash,
        trackers: Vec<String>,
    ) -> TorrentRecord {
        let magnet = Magnet::new(info_hash, Some(title.clone()), trackers).to_string();
        TorrentRecord {
            title,
            quality,
            info_hash,
            magnet,
        }
    }

    /// Build a record from a source-provided magnet URI, deriving the quality
    /// tag from the release name when the caller has none. Trackers embedded
    /// in the magnet are preserved.
    pub fn from_magnet(title: String, magnet_uri: &str) -> crate::Result<TorrentRecord> {
        let parsed = Magnet::parse(magnet_uri)?;
        let quality =
            quality::parse_quality(&title).ok_or_else(|| crate::Error::NoQuality(title.clone()))?;
        Ok(TorrentRecord::new(
            title,
            quality,
            parsed.info_hash,
            parsed.trackers,
        ))
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn quality(&self) -> &str {
        &self.quality
    }

    pub fn info_hash(&self) -> crate::InfoHash {
        self.info_hash
    }

    pub fn magnet(&self) -> &str {
        &self.magnet
    }

    /// Append a quality annotation, e.g. the guessed-match marker. Consumes
    /// and returns the record; existing records are never mutated in place.
    pub fn with_quality_suffix(self, suffix: &str) -> TorrentRecord {
        TorrentRecord {
            quality: format!("{} {}", self.quality, suffix),
            ..self
        }
    }
}
