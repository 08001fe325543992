//! Packwatch - line monitoring and seal-leakage prediction for a packaging
//! machine.
//!
//! The service polls the machine's datalog table, derives engineered features
//! from the raw counter and temperature readings, overlays predictions from a
//! pre-trained seal-leakage classifier, and serves everything a dashboard
//! front-end needs as JSON.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Packwatch                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │   Datalog   │──▶│  Features   │──▶│ Classifier  │        │
//! │  │  (MySQL)    │   │ (derive)    │   │ (softmax)   │        │
//! │  └──────┬──────┘   └─────────────┘   └──────┬──────┘        │
//! │         │    TTL data caches               │ TTL prediction │
//! │         ▼                                  ▼ cache          │
//! │  ┌─────────────┐                    ┌─────────────┐         │
//! │  │   Poller    │                    │  Dashboard  │         │
//! │  │ (tracing)   │                    │  API (axum) │         │
//! │  └─────────────┘                    └─────────────┘         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Predictions are cached by content digest of the input rows; an unchanged
//! window never reaches the classifier twice within the TTL.

pub mod cache;
pub mod config;
pub mod core;
pub mod db;
pub mod model;
pub mod poller;
pub mod server;

// Re-export key types at crate root for convenience
pub use cache::TtlCache;
pub use config::{Config, DbConfig, Thresholds};
pub use core::{machine_status, preprocess, FeatureRow, MachineState, StatusReport};
pub use db::{DataLoader, MachineReading, TimeRange};
pub use model::{
    batch_infer, infer, summarize_predictions, Classifier, LeakageClass, Prediction,
    PredictionCache, Predictor,
};
pub use poller::PollStats;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
