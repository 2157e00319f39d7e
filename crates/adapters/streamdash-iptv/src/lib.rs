pub mod client;
pub mod config;
pub mod error;

pub use client::{PanelClient, PanelRecord};
pub use config::PanelClientConfig;
pub use error::PanelError;
