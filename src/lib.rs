//! Issue, hash, encrypt, persist and validate API access tokens
//! on compute that may lose its memory and disk between any two calls.
//!
//! Callers go through [`TokenService`]. Everything below it is public so
//! hosts can assemble their own backend chain and so `tests/` can reach it.

pub mod cache;
pub mod config;
pub mod crypto;
pub mod environment;
pub mod errors;
pub mod extract;
pub mod jobs;
pub mod models;
pub mod service;
pub mod store;

pub use config::StoreConfig;
pub use errors::StoreError;
pub use service::{StorageInfo, TokenService};
