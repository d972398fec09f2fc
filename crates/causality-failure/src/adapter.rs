// Failure adapter
// Presents a fiber failure cause as a single native error

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::cause::{AnyFailure, Cause, FailureValue};
use crate::config::AdapterConfig;
use crate::report::FailureReport;
use crate::throwable::{NativeError, Throwable};
use crate::trace::{self as frames, RuntimeBoundary, StackFrame};

/// Message used when a cause holds no leaf failures
pub const UNKNOWN_MESSAGE: &str = "<unknown>";

/// Frames of the point where the adapter was raised
enum ThrowPoint {
    Captured(Backtrace),
    Supplied(Vec<StackFrame>),
    Absent,
}

impl ThrowPoint {
    fn user_frames(&self, boundary: &RuntimeBoundary) -> Vec<StackFrame> {
        match self {
            ThrowPoint::Captured(backtrace) => boundary.user_frames(frames::backtrace_frames(backtrace)),
            ThrowPoint::Supplied(supplied) => boundary.user_frames(supplied.iter().cloned()),
            ThrowPoint::Absent => Vec::new(),
        }
    }
}

/// The host's suppressed list, filled from the cause at most once
#[derive(Default)]
struct SuppressedSlot {
    entries: Vec<Arc<dyn Throwable>>,
    populated: bool,
}

/// A fiber failure cause presented as a native error
///
/// Derived fields are computed on first access and cached. The primary
/// message and stack trace come from the first leaf of the cause, the
/// remaining leaves become suppressed entries, and the error source is the
/// first defect found anywhere in the tree.
///
/// `Display` writes only the primary message; use `{:#}` (or
/// [`Throwable::render_string`]) for the message followed by the stack trace.
pub struct FailureAdapter<E: FailureValue = AnyFailure> {
    cause: Cause<E>,
    boundary: RuntimeBoundary,
    throw_point: ThrowPoint,
    message: OnceCell<String>,
    native_cause: OnceCell<Option<NativeError>>,
    stack_trace: OnceCell<Vec<StackFrame>>,
    suppressed: Mutex<SuppressedSlot>,
}

impl<E: FailureValue> FailureAdapter<E> {
    /// Create an adapter with the default configuration
    pub fn new(cause: Cause<E>) -> Self {
        Self::builder(cause).build()
    }

    /// Create an adapter with a custom configuration
    pub fn with_config(cause: Cause<E>, config: &AdapterConfig) -> Self {
        Self::builder(cause).config(config.clone()).build()
    }

    pub fn builder(cause: Cause<E>) -> FailureAdapterBuilder<E> {
        FailureAdapterBuilder::new(cause)
    }

    /// The wrapped cause
    pub fn failure_cause(&self) -> &Cause<E> {
        &self.cause
    }

    /// Message of the first leaf failure, or [`UNKNOWN_MESSAGE`]
    pub fn primary_message(&self) -> &str {
        self.message.get_or_init(|| {
            self.cause
                .first_unified()
                .map(|leaf| leaf.message)
                .unwrap_or_else(|| UNKNOWN_MESSAGE.to_string())
        })
    }

    /// The first defect in the tree, else the first typed failure that is already a native error
    pub fn primary_native_cause(&self) -> Option<&NativeError> {
        self.native_cause
            .get_or_init(|| {
                self.cause
                    .find(|node| match node {
                        Cause::Die(error, _) => Some(error.clone()),
                        _ => None,
                    })
                    .or_else(|| {
                        self.cause.find(|node| match node {
                            Cause::Fail(value, _) => value.as_native(),
                            _ => None,
                        })
                    })
            })
            .as_ref()
    }

    /// Throw-point frames above the runtime boundary, followed by the primary leaf's frames
    pub fn combined_stack_trace(&self) -> &[StackFrame] {
        self.stack_trace.get_or_init(|| {
            let mut combined = self.throw_point.user_frames(&self.boundary);
            let native = combined.len();
            if let Some(primary) = self.cause.first_unified() {
                combined.extend(primary.trace);
            }
            trace!(native, total = combined.len(), "Combined failure stack trace");
            combined
        })
    }

    /// Secondary leaf failures, in traversal order
    ///
    /// The first call appends them to the suppressed slot after anything added
    /// through [`FailureAdapter::add_suppressed`]; later calls only read the slot.
    pub fn suppressed_failures(&self) -> Vec<Arc<dyn Throwable>> {
        let mut slot = self.suppressed.lock();
        if !slot.populated {
            slot.populated = true;
            let secondary: Vec<Arc<dyn Throwable>> = self
                .cause
                .unified()
                .iter()
                .skip(1)
                .map(|leaf| Arc::new(leaf.to_throwable()) as Arc<dyn Throwable>)
                .collect();
            debug!(count = secondary.len(), "Populated suppressed failures");
            slot.entries.extend(secondary);
        }
        slot.entries.clone()
    }

    /// Attach another suppressed error
    ///
    /// Returns `false` and leaves the slot untouched when `error` is this adapter.
    pub fn add_suppressed(&self, error: Arc<dyn Throwable>) -> bool {
        if Arc::as_ptr(&error) as *const () == self as *const Self as *const () {
            debug!("Refusing to suppress a failure with itself");
            return false;
        }
        self.suppressed.lock().entries.push(error);
        true
    }

    /// Serializable snapshot of this failure
    pub fn report(&self) -> FailureReport {
        FailureReport::from_throwable(self)
    }
}

impl<E: FailureValue> From<Cause<E>> for FailureAdapter<E> {
    fn from(cause: Cause<E>) -> Self {
        Self::new(cause)
    }
}

impl<E: FailureValue> Throwable for FailureAdapter<E> {
    fn message(&self) -> String {
        self.primary_message().to_string()
    }

    fn native_cause(&self) -> Option<NativeError> {
        self.primary_native_cause().cloned()
    }

    fn stack_trace(&self) -> Vec<StackFrame> {
        self.combined_stack_trace().to_vec()
    }

    fn suppressed(&self) -> Vec<Arc<dyn Throwable>> {
        self.suppressed_failures()
    }
}

impl<E: FailureValue> fmt::Display for FailureAdapter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            f.write_str(&self.render_string())
        } else {
            f.write_str(self.primary_message())
        }
    }
}

impl<E: FailureValue> fmt::Debug for FailureAdapter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureAdapter")
            .field("cause", &self.cause)
            .field("message", &self.message.get())
            .field("suppressed_populated", &self.suppressed.lock().populated)
            .finish_non_exhaustive()
    }
}

impl<E: FailureValue> StdError for FailureAdapter<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.primary_native_cause()
            .map(|error| error.as_error() as &(dyn StdError + 'static))
    }
}

/// Builder for [`FailureAdapter`]
#[must_use]
pub struct FailureAdapterBuilder<E: FailureValue> {
    cause: Cause<E>,
    config: AdapterConfig,
    native_frames: Option<Vec<StackFrame>>,
    boundary: Option<RuntimeBoundary>,
}

impl<E: FailureValue> FailureAdapterBuilder<E> {
    fn new(cause: Cause<E>) -> Self {
        Self {
            cause,
            config: AdapterConfig::default(),
            native_frames: None,
            boundary: None,
        }
    }

    pub fn config(mut self, config: AdapterConfig) -> Self {
        self.config = config;
        self
    }

    /// Use frames supplied by the host instead of capturing the native stack
    pub fn native_frames(mut self, frames: Vec<StackFrame>) -> Self {
        self.native_frames = Some(frames);
        self
    }

    /// Replace the prefix-based boundary with a custom predicate
    pub fn internal_frames<F>(mut self, is_internal: F) -> Self
    where
        F: Fn(&StackFrame) -> bool + Send + Sync + 'static,
    {
        self.boundary = Some(RuntimeBoundary::from_fn(is_internal));
        self
    }

    pub fn build(self) -> FailureAdapter<E> {
        let boundary = match self.boundary {
            Some(boundary) => boundary,
            None => RuntimeBoundary::from_prefixes(self.config.internal_prefixes.clone()),
        };
        let throw_point = match self.native_frames {
            Some(frames) => ThrowPoint::Supplied(frames),
            None if self.config.capture_native_frames => ThrowPoint::Captured(Backtrace::force_capture()),
            None => ThrowPoint::Absent,
        };

        FailureAdapter {
            cause: self.cause,
            boundary,
            throw_point,
            message: OnceCell::new(),
            native_cause: OnceCell::new(),
            stack_trace: OnceCell::new(),
            suppressed: Mutex::new(SuppressedSlot::default()),
        }
    }
}
