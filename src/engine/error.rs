use ulid::Ulid;

use crate::model::{Booking, Minutes, format_hhmm};

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input. Rejected before any state is touched.
    Validation(&'static str),
    /// Overlapping non-cancelled bookings on the requested slot. Carries
    /// the full set so callers can offer alternatives.
    SlotConflict(Vec<Booking>),
    /// No pricing rule covers the requested start time — the club needs
    /// administrator attention.
    PricingUnconfigured { day_of_week: u8, start: Minutes },
    /// A rule resolved but its price is zero. Configuration defect, never
    /// a free booking.
    PricingInvalidZero,
    PastDate,
    TooFarInFuture { max_days: i64 },
    ClosingTimeExceeded { end: Minutes, closes: Minutes },
    /// Status-machine violation (check-in on a cancelled booking, paying a
    /// cancelled share, ...).
    InvalidTransition(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    /// Store failure — fatal, aborts the whole operation.
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::SlotConflict(conflicts) => {
                write!(f, "slot already booked ({} conflict", conflicts.len())?;
                if conflicts.len() != 1 {
                    write!(f, "s")?;
                }
                write!(f, ")")
            }
            EngineError::PricingUnconfigured { day_of_week, start } => write!(
                f,
                "no pricing configured for day {} at {}; club needs administrator attention",
                day_of_week,
                format_hhmm(*start)
            ),
            EngineError::PricingInvalidZero => write!(
                f,
                "configured price is zero; club needs administrator attention"
            ),
            EngineError::PastDate => write!(f, "booking date is in the past"),
            EngineError::TooFarInFuture { max_days } => {
                write!(f, "booking date is more than {max_days} days ahead")
            }
            EngineError::ClosingTimeExceeded { end, closes } => write!(
                f,
                "booking would end at {} but the club closes at {}",
                format_hhmm(*end),
                format_hhmm(*closes)
            ),
            EngineError::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Non-fatal failure from a post-persist side effect (stats update,
/// notification scheduling). Attached to an otherwise successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideEffectWarning {
    pub context: &'static str,
    pub detail: String,
}

impl std::fmt::Display for SideEffectWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.context, self.detail)
    }
}
