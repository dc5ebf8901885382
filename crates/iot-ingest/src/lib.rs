//! Ingestion of IoT telemetry into hourly-aligned SQLite tables
//!
//! Readings are fetched from ZENTRA Cloud or ThingSpeak one segment at a time,
//! aligned onto a canonical hour grid, pivoted into wide rows and upserted so
//! that repeated or overlapping runs never duplicate data.

pub mod cli;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod sources;
pub mod storage;
pub mod sync;
pub mod transform;

pub use error::{IngestError, Result};
