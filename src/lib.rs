//! Hierarchical execution-time tracing for a single logical execution context
//!
//! This crate measures named intervals arranged as a tree: a root timer for
//! the overall operation, child timers for its sub-operations. After the
//! measured work finishes, the tree renders as either:
//! - a flat, pre-order **table** of rows with colon-joined path names, for
//!   row-oriented log sinks
//! - a nested **JSON document** mirroring the tree shape, for structured
//!   telemetry fields
//!
//! Both renderings support a minimum-duration filter that prunes fast
//! subtrees while keeping ancestor rows of any surviving descendant.
//!
//! Nodes live in a [`TimerTree`] arena and are addressed by [`TimerId`]
//! handles, so child-to-parent links (used for meta propagation to the root)
//! are plain indices rather than shared ownership.
//!
//! # Example
//!
//! ```rust
//! use trace_timer::TimerTree;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut tree = TimerTree::new();
//! let root = tree.timer("request")?;
//!
//! let parse = tree.timer("parse")?;
//! tree.attach_child(root, parse, false);
//! tree.measure_sync(parse, || Ok::<_, std::convert::Infallible>(42))?;
//!
//! tree.finish(root)?;
//! let rows = tree.to_table(root, 0);
//! assert_eq!(rows[1].name, "request:parse");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod clock;
pub mod error;
pub mod prelude;
pub mod render;
pub mod timer;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{MeasureError, TimerError};
pub use render::{TableRow, TraceDocument};
pub use timer::{MeasureOutcome, Meta, PendingMeasure, TimerId, TimerTree};
