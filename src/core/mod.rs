//! Core domain logic: feature derivation, machine status, series stats.
//!
//! These modules are pure functions over datalog rows; everything IO-bound
//! lives in `db`, `model` and `server`.

pub mod features;
pub mod stats;
pub mod status;

pub use features::{parse_hms, preprocess, FeatureRow, FEATURE_NAMES};
pub use stats::{downsample, latest_delta, percent_change, summarize, SeriesSummary};
pub use status::{machine_status, MachineState, StatusReport};
