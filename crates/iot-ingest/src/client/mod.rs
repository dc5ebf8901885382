pub mod api;

pub use api::TelemetryClient;
