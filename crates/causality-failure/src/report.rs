// Failure reports
// Serializable snapshots of errors for structured logging

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::throwable::{circular_reference, identity, Throwable};
use crate::trace::StackFrame;

/// A snapshot of a [`Throwable`] and its suppressed entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub message: String,

    pub stack_trace: Vec<StackFrame>,

    /// Display form of the underlying native error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressed: Vec<FailureReport>,
}

impl FailureReport {
    /// Snapshot `throwable`; an entry reachable more than once is reported in full only the first time
    pub fn from_throwable<T: Throwable + ?Sized>(throwable: &T) -> Self {
        let mut seen = HashSet::new();
        seen.insert(identity(throwable));
        Self::snapshot(throwable, &mut seen)
    }

    fn snapshot<T: Throwable + ?Sized>(throwable: &T, seen: &mut HashSet<*const ()>) -> Self {
        let suppressed = throwable
            .suppressed()
            .iter()
            .map(|entry| {
                if seen.insert(identity(entry.as_ref())) {
                    Self::snapshot(entry.as_ref(), seen)
                } else {
                    Self::circular(entry.as_ref())
                }
            })
            .collect();

        Self {
            message: throwable.message(),
            stack_trace: throwable.stack_trace(),
            cause: throwable.native_cause().map(|cause| cause.to_string()),
            suppressed,
        }
    }

    fn circular<T: Throwable + ?Sized>(throwable: &T) -> Self {
        Self {
            message: circular_reference(&throwable.message()),
            stack_trace: Vec::new(),
            cause: None,
            suppressed: Vec::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
