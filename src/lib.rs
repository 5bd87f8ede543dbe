//! Fetches Stable Diffusion models, VAEs, LoRAs, embeddings and extensions
//! from civitai, Hugging Face, GitHub, Google Drive and plain HTTP hosts into a
//! WebUI directory layout.

pub mod archive;
pub mod catalog;
pub mod cli;
pub mod cloner;
pub mod commands;
pub mod config;
pub mod downloader;
pub mod error;
pub mod hashing;
pub mod monitor;
pub mod providers;
pub mod request;
pub mod resolver;
pub mod tokens;
pub mod urls;
pub mod utils;

pub use commands::run_batch;
pub use config::Config;
pub use error::FetchError;
pub use request::{BatchReport, TransferResult};
