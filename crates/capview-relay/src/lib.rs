pub mod config;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod server;

pub use crate::config::RelayConfig;
pub use error::RelayError;
pub use server::{RelayServer, build_app};
