//! Core domain: sampling policy, gap detection, filling, retention and splits

pub mod config;
pub mod error;
pub mod fill;
pub mod interval;
pub mod log;
pub mod missing;
pub mod model;
pub mod quote;
pub mod repository;
pub mod retention;
pub mod split;

// Re-export main types for cleaner imports
pub use error::HistoryError;
pub use interval::{IntervalPolicy, SampleInterval, TimeRange};
pub use model::{Owner, Sample, Stored, TrackingInfo, TrackingStatus, Transaction};
pub use quote::{ProviderSplit, Quote, QuoteSource, RateQuote};
pub use repository::{ChangeSet, HistoryStore};
pub use split::{Split, SplitRatio, SplitStatus};
