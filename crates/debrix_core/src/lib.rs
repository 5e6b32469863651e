mod error;
pub mod info_hash;
pub mod magnet;
pub mod quality;
pub mod stream_id;
pub mod torrent;

pub use error::Error;
pub use info_hash::InfoHash;
pub use magnet::Magnet;
pub use quality::QualityBucket;
pub use stream_id::StreamId;
pub use torrent::TorrentRecord;

pub type Result<T> = std::result::Result<T, Error>;
