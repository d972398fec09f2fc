// Fiber failure causes
// The immutable failure tree produced by fiber execution, and its unification into leaves

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adapter::FailureAdapter;
use crate::throwable::{LeafFailure, NativeError};
use crate::trace::{StackFrame, Trace};

/// Identifier of a fiber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FiberId(pub u64);

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Payload of a typed failure
pub trait FailureValue: fmt::Debug + Send + Sync + 'static {
    /// Message describing the failure
    fn message(&self) -> String;

    /// The payload as a native error, when it already is one
    fn as_native(&self) -> Option<NativeError> {
        None
    }
}

/// Type-erased failure payload
pub type AnyFailure = Arc<dyn FailureValue>;

impl FailureValue for String {
    fn message(&self) -> String {
        self.clone()
    }
}

impl FailureValue for &'static str {
    fn message(&self) -> String {
        (*self).to_string()
    }
}

impl FailureValue for NativeError {
    fn message(&self) -> String {
        self.to_string()
    }

    fn as_native(&self) -> Option<NativeError> {
        Some(self.clone())
    }
}

impl FailureValue for anyhow::Error {
    fn message(&self) -> String {
        format!("{:#}", self)
    }
}

impl FailureValue for Arc<dyn FailureValue> {
    fn message(&self) -> String {
        (**self).message()
    }

    fn as_native(&self) -> Option<NativeError> {
        (**self).as_native()
    }
}

/// Kind of a leaf failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeafKind {
    /// Typed, recoverable failure
    Fail,

    /// Defect wrapping a native error
    Die,

    /// Fiber interruption
    Interrupt,
}

impl fmt::Display for LeafKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeafKind::Fail => write!(f, "fail"),
            LeafKind::Die => write!(f, "die"),
            LeafKind::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// Tree describing why a fiber failed
///
/// Traversal is depth-first and left-to-right for both `Then` and `Both`.
#[derive(Debug, Clone)]
pub enum Cause<E> {
    /// No failure
    Empty,

    /// Typed failure
    Fail(E, Trace),

    /// Defect
    Die(NativeError, Trace),

    /// Interruption by the given fiber
    Interrupt(FiberId, Trace),

    /// `right` happened after `left`
    Then(Box<Cause<E>>, Box<Cause<E>>),

    /// `left` and `right` happened concurrently
    Both(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Default for Cause<E> {
    fn default() -> Self {
        Cause::Empty
    }
}

impl<E> Cause<E> {
    pub fn fail(value: E, trace: Trace) -> Self {
        Cause::Fail(value, trace)
    }

    pub fn die(error: impl Into<NativeError>, trace: Trace) -> Self {
        Cause::Die(error.into(), trace)
    }

    pub fn interrupt(fiber_id: FiberId, trace: Trace) -> Self {
        Cause::Interrupt(fiber_id, trace)
    }

    pub fn then(left: Cause<E>, right: Cause<E>) -> Self {
        Cause::Then(Box::new(left), Box::new(right))
    }

    pub fn both(left: Cause<E>, right: Cause<E>) -> Self {
        Cause::Both(Box::new(left), Box::new(right))
    }

    /// Whether the tree contains no leaf failures
    pub fn is_empty(&self) -> bool {
        self.find(|node| match node {
            Cause::Fail(..) | Cause::Die(..) | Cause::Interrupt(..) => Some(()),
            _ => None,
        })
        .is_none()
    }

    /// First `Some` produced by `f`, visiting nodes depth-first, parents before children
    pub fn find<T, F>(&self, mut f: F) -> Option<T>
    where
        F: FnMut(&Cause<E>) -> Option<T>,
    {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if let Some(found) = f(node) {
                return Some(found);
            }
            if let Cause::Then(left, right) | Cause::Both(left, right) = node {
                stack.push(right.as_ref());
                stack.push(left.as_ref());
            }
        }
        None
    }
}

impl<E: FailureValue> Cause<E> {
    /// Flatten the tree into its leaf failures, in traversal order
    pub fn unified(&self) -> Vec<Unified> {
        let mut leaves = Vec::new();
        self.find(|node| {
            if let Some(leaf) = node.unify_leaf() {
                leaves.push(leaf);
            }
            None::<()>
        });
        leaves
    }

    /// The first element of [`Cause::unified`], without flattening the rest
    pub fn first_unified(&self) -> Option<Unified> {
        self.find(Self::unify_leaf)
    }

    /// Convert into a value usable wherever a native error is expected
    pub fn into_failure(self) -> FailureAdapter<E> {
        FailureAdapter::new(self)
    }

    fn unify_leaf(&self) -> Option<Unified> {
        match self {
            Cause::Fail(value, trace) => {
                let native = value.as_native();
                let message = match &native {
                    Some(error) => error.to_string(),
                    None => value.message(),
                };
                Some(Unified::new(LeafKind::Fail, message, trace, native))
            }
            Cause::Die(error, trace) => Some(Unified::new(
                LeafKind::Die,
                error.to_string(),
                trace,
                Some(error.clone()),
            )),
            Cause::Interrupt(fiber_id, trace) => Some(Unified::new(
                LeafKind::Interrupt,
                format!("Interrupted by fiber {}", fiber_id),
                trace,
                None,
            )),
            Cause::Empty | Cause::Then(..) | Cause::Both(..) => None,
        }
    }
}

/// A leaf failure flattened out of a cause
#[derive(Debug, Clone)]
pub struct Unified {
    /// Fiber the leaf was recorded on
    pub fiber_id: FiberId,

    pub kind: LeafKind,

    pub message: String,

    /// Frames recorded with the leaf
    pub trace: Vec<StackFrame>,

    /// The native error the leaf already wraps, if any
    pub native: Option<NativeError>,
}

impl Unified {
    fn new(kind: LeafKind, message: String, trace: &Trace, native: Option<NativeError>) -> Self {
        Self {
            fiber_id: trace.fiber_id,
            kind,
            message,
            trace: trace.frames.clone(),
            native,
        }
    }

    /// Render this leaf as a native error
    pub fn to_throwable(&self) -> LeafFailure {
        LeafFailure::new(
            self.kind,
            self.fiber_id,
            self.message.clone(),
            self.trace.clone(),
            self.native.clone(),
        )
    }
}
