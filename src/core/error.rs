use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::core::split::{SplitAction, SplitStatus};

/// Domain errors raised when a record or transition would break an invariant.
///
/// I/O and provider failures are reported through `anyhow` instead; these
/// variants are only produced by constructors and the split state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("sample value must be positive, got {value}")]
    InvalidValue { value: Decimal },

    #[error("transaction price must be positive, got {price}")]
    InvalidPrice { price: Decimal },

    #[error("transaction amount must not be zero")]
    ZeroAmount,

    #[error("time {time} is before the supported data epoch {epoch}")]
    BeforeEpoch {
        time: DateTime<Utc>,
        epoch: DateTime<Utc>,
    },

    #[error("invalid split ratio {numerator}:{denominator}")]
    InvalidRatio { numerator: u32, denominator: u32 },

    #[error("split {id}: cannot {action} while {from}")]
    InvalidTransition {
        id: u64,
        from: SplitStatus,
        action: SplitAction,
    },

    #[error("unknown split: {0}")]
    UnknownSplit(u64),
}
