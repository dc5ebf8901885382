//! Data models shared by the pipeline stages and the readings database
//!
//! Readings flow through the pipeline as `RawReading` -> `AlignedReading` ->
//! `WideRow`; `IngestRun` is the ledger entry persisted per window.

pub mod models;

pub use models::*;
