pub mod backends;
pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod handlers;
pub mod protocol;
pub mod repo;
pub mod token;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use repo::Repository;
