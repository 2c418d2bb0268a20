//! Library crate for ad-scan-rs: sequential, resumable advertiser scanning
//! over ad-library page snapshots.
pub mod cache;
pub mod content;
pub mod counter;
pub mod error;
pub mod extract;
pub mod matcher;
pub mod progress;
pub mod scanner;
pub mod server;
pub mod service;
pub mod types;
