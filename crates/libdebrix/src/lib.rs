pub mod auth;
pub mod cache;
pub mod debrid;
mod error;
pub mod http_api;
pub mod indexers;
pub mod meta;
pub mod session;
mod streams;
mod user_agent;
pub mod userdata;

pub use error::{ApiError, Error};
pub use session::{OAuth2Config, Session, SessionOptions};
pub use streams::{HandoffEntry, StreamEntry};

pub type Result<T> = std::result::Result<T, Error>;
