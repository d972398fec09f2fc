// Host error contract
// The accessor surface any error crossing out of the runtime must offer

use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt::{self, Write as _};
use std::io;
use std::sync::Arc;

use crate::cause::{FiberId, LeafKind};
use crate::trace::StackFrame;

/// Separator placed before every rendered frame
pub const FRAME_SEPARATOR: &str = "\n\tat ";

/// Prefix written before each suppressed entry by [`Throwable::print_trace`]
pub const SUPPRESSED_PREFIX: &str = "\tSuppressed: ";

/// Message placed instead of an entry that was already printed
pub(crate) fn circular_reference(message: &str) -> String {
    format!("[CIRCULAR REFERENCE: {}]", message)
}

/// Identity of a throwable, for detecting repeated entries
pub(crate) fn identity<T: Throwable + ?Sized>(throwable: &T) -> *const () {
    throwable as *const T as *const ()
}

/// A shared handle to a native Rust error
///
/// Clones share the same underlying error, and [`NativeError::ptr_eq`] compares by identity.
#[derive(Clone)]
pub struct NativeError(Arc<dyn StdError + Send + Sync + 'static>);

impl NativeError {
    /// Wrap an error
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// Wrap an already shared error
    pub fn from_arc(error: Arc<dyn StdError + Send + Sync + 'static>) -> Self {
        Self(error)
    }

    /// The wrapped error
    pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }

    /// Attempt to downcast the wrapped error
    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Whether both handles point at the same error
    pub fn ptr_eq(&self, other: &NativeError) -> bool {
        Arc::as_ptr(&self.0) as *const () == Arc::as_ptr(&other.0) as *const ()
    }
}

impl<E> From<E> for NativeError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

/// The capabilities a host expects from an error value
pub trait Throwable: StdError + Send + Sync {
    /// Human readable message
    fn message(&self) -> String;

    /// The underlying error this one wraps, if any
    fn native_cause(&self) -> Option<NativeError>;

    /// Frames describing where the failure happened, innermost first
    fn stack_trace(&self) -> Vec<StackFrame>;

    /// Secondary failures attached to this one
    fn suppressed(&self) -> Vec<Arc<dyn Throwable>>;

    /// Message followed by one indented `at` line per frame
    fn render_string(&self) -> String {
        render(&self.message(), &self.stack_trace())
    }

    /// Write the rendered trace, then every suppressed entry's own trace
    ///
    /// An entry reachable more than once is printed once; later occurrences
    /// become a `[CIRCULAR REFERENCE: ...]` line.
    fn print_trace(&self, sink: &mut dyn io::Write) -> io::Result<()> {
        let mut seen = HashSet::new();
        seen.insert(identity(self));
        sink.write_all(self.render_string().as_bytes())?;
        print_suppressed(self.suppressed(), sink, &mut seen)
    }
}

fn print_suppressed(
    entries: Vec<Arc<dyn Throwable>>,
    sink: &mut dyn io::Write,
    seen: &mut HashSet<*const ()>,
) -> io::Result<()> {
    for entry in entries {
        sink.write_all(SUPPRESSED_PREFIX.as_bytes())?;
        if !seen.insert(identity(entry.as_ref())) {
            writeln!(sink, "{}", circular_reference(&entry.message()))?;
            continue;
        }
        sink.write_all(entry.render_string().as_bytes())?;
        print_suppressed(entry.suppressed(), sink, seen)?;
    }
    Ok(())
}

/// Render a message and frames the way [`Throwable::render_string`] does
pub fn render(message: &str, frames: &[StackFrame]) -> String {
    let mut out = String::from(message);
    for frame in frames {
        out.push_str(FRAME_SEPARATOR);
        // Writing into a String cannot fail
        let _ = write!(out, "{}", frame);
    }
    out.push('\n');
    out
}

/// Native rendering of a single leaf failure
#[derive(Debug, Clone)]
pub struct LeafFailure {
    kind: LeafKind,
    fiber_id: FiberId,
    message: String,
    stack_trace: Vec<StackFrame>,
    cause: Option<NativeError>,
}

impl LeafFailure {
    pub(crate) fn new(
        kind: LeafKind,
        fiber_id: FiberId,
        message: String,
        stack_trace: Vec<StackFrame>,
        cause: Option<NativeError>,
    ) -> Self {
        Self {
            kind,
            fiber_id,
            message,
            stack_trace,
            cause,
        }
    }

    pub fn kind(&self) -> LeafKind {
        self.kind
    }

    pub fn fiber_id(&self) -> FiberId {
        self.fiber_id
    }
}

impl fmt::Display for LeafFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for LeafFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|cause| cause.as_error() as &(dyn StdError + 'static))
    }
}

impl Throwable for LeafFailure {
    fn message(&self) -> String {
        self.message.clone()
    }

    fn native_cause(&self) -> Option<NativeError> {
        self.cause.clone()
    }

    fn stack_trace(&self) -> Vec<StackFrame> {
        self.stack_trace.clone()
    }

    fn suppressed(&self) -> Vec<Arc<dyn Throwable>> {
        Vec::new()
    }
}
