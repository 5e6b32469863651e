#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("expected a hex string of length 40, got length {0}")]
    InfoHashLength(usize),
    #[error("invalid hex in info hash")]
    InfoHashHex(#[from] hex::FromHexError),
    #[error("magnet link must be a valid URL")]
    MagnetUrl(#[source] url::ParseError),
    #[error("expected scheme magnet")]
    MagnetScheme,
    #[error("magnet link has no btih info hash")]
    MagnetNoInfoHash,
    #[error("stream id must look like tt0000000 or tt0000000:1:2, got {0:?}")]
    BadStreamId(String),
    #[error("release name has no recognizable quality: {0:?}")]
    NoQuality(String),
}
