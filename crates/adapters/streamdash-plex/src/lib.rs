pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod library;

pub use client::{PlexServerRecord, ServerClient};
pub use config::PlexClientConfig;
pub use error::FetchError;
pub use history::HistoryCollector;
