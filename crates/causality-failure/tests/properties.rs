//! Property tests for cause flattening

use causality_failure::{AdapterConfig, Cause, FailureAdapter, FiberId, StackFrame, Throwable, Trace};
use proptest::prelude::*;

fn leaf(index: usize) -> Cause<String> {
    let trace = Trace::new(FiberId(index as u64), vec![StackFrame::new(format!("app::step_{}", index))]);
    match index % 3 {
        0 => Cause::fail(format!("failure {}", index), trace),
        1 => Cause::interrupt(FiberId(index as u64), trace),
        _ => Cause::then(Cause::Empty, Cause::fail(format!("failure {}", index), trace)),
    }
}

/// Combine leaves `0..count` into a tree, choosing `Then` or `Both` per split
fn build(range: std::ops::Range<usize>, shape: &[bool]) -> Cause<String> {
    match range.len() {
        0 => Cause::Empty,
        1 => leaf(range.start),
        len => {
            let mid = range.start + len / 2;
            let left = build(range.start..mid, shape);
            let right = build(mid..range.end, shape);
            if shape.get(mid % shape.len().max(1)).copied().unwrap_or(false) {
                Cause::both(left, right)
            } else {
                Cause::then(left, right)
            }
        }
    }
}

proptest! {
    #[test]
    fn suppressed_matches_secondary_leaves(count in 1usize..24, shape in proptest::collection::vec(any::<bool>(), 1..8)) {
        let cause = build(0..count, &shape);
        let expected: Vec<String> = cause.unified().iter().skip(1).map(|leaf| leaf.message.clone()).collect();
        let failure = FailureAdapter::with_config(cause, &AdapterConfig::default().with_native_capture(false));

        let first: Vec<String> = failure.suppressed_failures().iter().map(|entry| entry.message()).collect();
        let second: Vec<String> = failure.suppressed_failures().iter().map(|entry| entry.message()).collect();

        prop_assert_eq!(first.len(), count - 1);
        prop_assert_eq!(&first, &expected);
        prop_assert_eq!(&second, &expected);
    }

    #[test]
    fn primary_leaf_drives_message_and_trace(count in 1usize..24, shape in proptest::collection::vec(any::<bool>(), 1..8)) {
        let cause = build(0..count, &shape);
        let failure = FailureAdapter::with_config(cause, &AdapterConfig::default().with_native_capture(false));

        prop_assert_eq!(failure.primary_message(), "failure 0");
        prop_assert_eq!(failure.combined_stack_trace(), &[StackFrame::new("app::step_0")][..]);
        prop_assert_eq!(failure.combined_stack_trace(), failure.combined_stack_trace());
    }

    #[test]
    fn print_trace_is_render_plus_suppressed_blocks(count in 1usize..12, shape in proptest::collection::vec(any::<bool>(), 1..8)) {
        let failure = FailureAdapter::with_config(build(0..count, &shape), &AdapterConfig::default().with_native_capture(false));

        let mut expected = failure.render_string();
        for entry in failure.suppressed_failures() {
            expected.push_str("\tSuppressed: ");
            expected.push_str(&entry.render_string());
        }

        let mut out = Vec::new();
        failure.print_trace(&mut out).unwrap();
        prop_assert_eq!(String::from_utf8(out).unwrap(), expected);
    }
}
