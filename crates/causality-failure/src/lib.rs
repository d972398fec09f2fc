// Causality Failure Adapter
// Flattens fiber failure causes into values usable as native errors

//! A fiber can fail in several places at once: typed failures, defects and
//! interruptions, combined sequentially or in parallel into a [`Cause`] tree.
//! Code outside the runtime expects a single error with one message, one
//! source, one stack trace and a list of suppressed errors.
//! [`FailureAdapter`] bridges the two.
//!
//! ```
//! use causality_failure::{Cause, FailureAdapter, Throwable, Trace};
//!
//! let cause: Cause<&'static str> = Cause::both(
//!     Cause::fail("a", Trace::empty()),
//!     Cause::fail("b", Trace::empty()),
//! );
//! let failure = FailureAdapter::new(cause);
//!
//! assert_eq!(failure.primary_message(), "a");
//! assert_eq!(failure.suppressed_failures()[0].message(), "b");
//! ```

// Re-export common error handling tools for convenience
pub use anyhow;

mod adapter;
mod cause;
mod config;
mod report;
mod throwable;
mod trace;

pub use adapter::{FailureAdapter, FailureAdapterBuilder, UNKNOWN_MESSAGE};
pub use cause::{AnyFailure, Cause, FailureValue, FiberId, LeafKind, Unified};
pub use config::{AdapterConfig, ConfigError, ConfigResult};
pub use report::FailureReport;
pub use throwable::{render, LeafFailure, NativeError, Throwable, FRAME_SEPARATOR, SUPPRESSED_PREFIX};
pub use trace::{RuntimeBoundary, StackFrame, Trace};
