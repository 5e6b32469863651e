use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// A media-center stream identifier: `tt0000000` for a movie,
/// `tt0000000:1:2` for season 1 episode 2 of a series.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId {
    pub imdb_id: String,
    pub episode: Option<Episode>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Episode {
    pub season: u32,
    pub episode: u32,
}

impl StreamId {
    pub fn is_episode(&self) -> bool {
        self.episode.is_some()
    }

    /// Cache key for per-component result caches, e.g. `tt1254207-apibay`.
    pub fn cache_key(&self, scope: &str) -> String {
        format!("{self}-{scope}")
    }
}

fn parse_imdb_id(s: &str) -> crate::Result<&str> {
    let digits = s
        .strip_prefix("tt")
        .ok_or_else(|| Error::BadStreamId(s.to_string()))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::BadStreamId(s.to_string()));
    }
    Ok(s)
}

impl FromStr for StreamId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let imdb_id = parse_imdb_id(parts.next().unwrap_or_default())?.to_string();
        let episode = match (parts.next(), parts.next(), parts.next()) {
            (None, _, _) => None,
            (Some(season), Some(episode), None) => {
                let season = season
                    .parse()
                    .map_err(|_| Error::BadStreamId(s.to_string()))?;
                let episode = episode
                    .parse()
                    .map_err(|_| Error::BadStreamId(s.to_string()))?;
                Some(Episode { season, episode })
            }
            _ => return Err(Error::BadStreamId(s.to_string())),
        };
        Ok(StreamId { imdb_id, episode })
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.episode {
            Some(Episode { season, episode }) => {
                write!(f, "{}:{}:{}", self.imdb_id, season, episode)
            }
            None => write!(f, "{}", self.imdb_id),
        }
    }
}
