//! Prelude for trace-timer
//!
//! This module re-exports the most commonly used types.
//!
//! # Example
//!
//! ```rust
//! use trace_timer::prelude::*;
//!
//! # fn main() -> Result<(), TimerError> {
//! let mut tree = TimerTree::new();
//! let root = tree.timer("request")?;
//! tree.finish(root)?;
//! # Ok(())
//! # }
//! ```

pub use crate::{
    Clock, ManualClock, MeasureError, MeasureOutcome, Meta, MonotonicClock, PendingMeasure,
    TableRow, TimerError, TimerId, TimerTree, TraceDocument,
};
