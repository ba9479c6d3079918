//! mediasvc - client for a cloud media service
//!
//! Uploads media files as assets, runs encode jobs against a named processor
//! and preset, publishes streaming URLs and removes remote jobs and assets.
//! The remote surface sits behind [`service::MediaServiceApi`]; the
//! [`client::MediaServiceClient`] facade builds the operations on top of it.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod progress;
pub mod service;
pub mod workflow;

pub use client::{ClientSettings, MediaServiceClient};
pub use config::Config;
pub use error::{MediaError, Result};
