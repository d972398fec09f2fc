// Stack frames and runtime boundary detection
// Frames recorded inside a cause and frames captured at the host throw point

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cause::FiberId;

/// A single frame of a stack trace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
    /// Fully qualified symbol, e.g. `my_app::handlers::transfer`
    pub symbol: String,

    /// Source file, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Line within `file`, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl StackFrame {
    /// Create a frame with no source location
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            file: None,
            line: None,
        }
    }

    /// Attach a source location to the frame
    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// The module path the frame's symbol lives in
    pub fn module(&self) -> &str {
        let symbol = self.symbol.trim_start_matches('<');
        match symbol.rsplit_once("::") {
            Some((module, _)) => module,
            None => "",
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}({}:{})", self.symbol, file, line),
            (Some(file), None) => write!(f, "{}({})", self.symbol, file),
            _ => write!(f, "{}", self.symbol),
        }
    }
}

/// The trace recorded alongside a leaf of a cause
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    /// Fiber the leaf was recorded on
    pub fiber_id: FiberId,

    /// Frames, innermost first
    pub frames: Vec<StackFrame>,
}

impl Trace {
    /// A trace with no frames on fiber `#0`
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a trace for a fiber
    pub fn new(fiber_id: FiberId, frames: Vec<StackFrame>) -> Self {
        Self { fiber_id, frames }
    }
}

/// Decides whether a native frame belongs to the runtime's internals
///
/// Frames captured where a failure crosses into host code are kept only up to
/// the first internal frame; everything from there outward is runtime plumbing.
#[derive(Clone)]
pub struct RuntimeBoundary {
    is_internal: Arc<dyn Fn(&StackFrame) -> bool + Send + Sync>,
}

impl RuntimeBoundary {
    /// Treat frames whose symbol starts with any of `prefixes` as internal
    ///
    /// A trait-impl frame `<T as Trait>::method` matches on either `T` or `Trait`.
    pub fn from_prefixes(prefixes: Vec<String>) -> Self {
        Self::from_fn(move |frame| {
            let symbol = frame.symbol.as_str();
            let qualified = symbol.strip_prefix('<');
            let implemented = qualified.and_then(|inner| inner.split_once(" as ")).map(|(_, tr)| tr);
            prefixes.iter().any(|prefix| {
                let prefix = prefix.as_str();
                symbol.starts_with(prefix)
                    || qualified.map_or(false, |inner| inner.starts_with(prefix))
                    || implemented.map_or(false, |tr| tr.starts_with(prefix))
            })
        })
    }

    /// Use an arbitrary predicate
    pub fn from_fn<F>(predicate: F) -> Self
    where
        F: Fn(&StackFrame) -> bool + Send + Sync + 'static,
    {
        Self {
            is_internal: Arc::new(predicate),
        }
    }

    pub fn is_internal(&self, frame: &StackFrame) -> bool {
        (self.is_internal)(frame)
    }

    /// Leading span of `frames` that precedes the first internal frame
    pub fn user_frames<I>(&self, frames: I) -> Vec<StackFrame>
    where
        I: IntoIterator<Item = StackFrame>,
    {
        frames
            .into_iter()
            .take_while(|frame| !self.is_internal(frame))
            .collect()
    }
}

impl fmt::Debug for RuntimeBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBoundary").finish_non_exhaustive()
    }
}

/// Resolve a captured backtrace into frames, dropping the capture machinery on top
pub(crate) fn backtrace_frames(backtrace: &Backtrace) -> Vec<StackFrame> {
    if backtrace.status() != BacktraceStatus::Captured {
        debug!(status = ?backtrace.status(), "native backtrace unavailable");
        return Vec::new();
    }

    parse_backtrace(&backtrace.to_string())
        .into_iter()
        .skip_while(is_capture_frame)
        .collect()
}

fn is_capture_frame(frame: &StackFrame) -> bool {
    const OWN_CRATE: &str = concat!(env!("CARGO_CRATE_NAME"), "::");

    let symbol = frame.symbol.trim_start_matches('<');
    symbol.starts_with("std::backtrace") || symbol.starts_with(OWN_CRATE)
}

/// Parse the rendered form of `std::backtrace::Backtrace`
///
/// A frame starts at an indexed symbol line. Symbols inlined into the same
/// frame follow on unindexed lines, and any symbol may be followed by an
/// `at file:line:col` line.
pub(crate) fn parse_backtrace(rendered: &str) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = Vec::new();

    for line in rendered.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                if frame.file.is_none() {
                    let (file, line) = split_location(location);
                    frame.file = Some(file);
                    frame.line = line;
                }
            }
            continue;
        }

        let symbol = match line.split_once(": ") {
            Some((index, symbol)) if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) => symbol,
            _ => line,
        };
        frames.push(StackFrame::new(normalize_symbol(symbol.trim())));
    }

    frames
}

fn split_location(location: &str) -> (String, Option<u32>) {
    let mut parts = location.rsplitn(3, ':');
    let column = parts.next();
    let line = parts.next();
    let file = parts.next();

    match (file, line, column) {
        (Some(file), Some(line), Some(_)) => match line.parse() {
            Ok(line) => (file.to_string(), Some(line)),
            Err(_) => (location.to_string(), None),
        },
        _ => (location.to_string(), None),
    }
}

/// Reduce a rendered symbol to its plain path
///
/// Drops the `0x<ip> - ` prefix of full-format frames, `[<hash>]` crate
/// disambiguators of v0 mangling and the `::h<hash>` suffix of legacy mangling.
fn normalize_symbol(symbol: &str) -> String {
    let symbol = match symbol.split_once(" - ") {
        Some((address, rest)) if is_address(address) => rest,
        _ => symbol,
    };
    strip_legacy_hash(&strip_disambiguators(symbol)).to_string()
}

fn is_address(text: &str) -> bool {
    text.strip_prefix("0x")
        .map_or(false, |hex| !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}

fn strip_disambiguators(symbol: &str) -> String {
    let mut out = String::with_capacity(symbol.len());
    let mut rest = symbol;

    while let Some(open) = rest.find('[') {
        let (before, bracketed) = rest.split_at(open);
        out.push_str(before);
        match bracketed[1..].find(']') {
            Some(close) if is_disambiguator(&bracketed[1..1 + close]) => {
                rest = &bracketed[close + 2..];
            }
            _ => {
                out.push('[');
                rest = &bracketed[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_disambiguator(text: &str) -> bool {
    text.len() >= 8 && text.bytes().all(|b| b.is_ascii_hexdigit())
}

// Legacy mangling appends `::h` followed by 16 hex digits
fn strip_legacy_hash(symbol: &str) -> &str {
    match symbol.rsplit_once("::h") {
        Some((path, hash)) if hash.len() == 16 && hash.bytes().all(|b| b.is_ascii_hexdigit()) => path,
        _ => symbol,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Short form, as printed by `{}`: inlined symbols share a frame index
    const RENDERED: &str = "\
   0: std::backtrace_rs::backtrace::libunwind::trace
             at /rustc/90b35a6239c3d8bdabc530a6a0816f7ff89a0aaf/library/std/src/../../backtrace/src/backtrace/libunwind.rs:116:5
      std::backtrace_rs::backtrace::trace_unsynchronized
             at /rustc/90b35a6239c3d8bdabc530a6a0816f7ff89a0aaf/library/std/src/../../backtrace/src/backtrace/mod.rs:66:5
   1: std::backtrace::Backtrace::create
             at /rustc/90b35a6239c3d8bdabc530a6a0816f7ff89a0aaf/library/std/src/backtrace.rs:331:13
   2: std::backtrace::Backtrace::force_capture
             at /rustc/90b35a6239c3d8bdabc530a6a0816f7ff89a0aaf/library/std/src/backtrace.rs:312:9
   3: causality_failure::adapter::FailureAdapterBuilder<E>::build
             at ./crates/causality-failure/src/adapter.rs:265:54
   4: my_app::handlers::transfer
             at ./src/handlers.rs:42:9
   5: causality_runtime::fiber::run
   6: core::ops::function::FnOnce::call_once
             at /rustc/90b35a6239c3d8bdabc530a6a0816f7ff89a0aaf/library/core/src/ops/function.rs:250:5
";

    // Full form, as printed by `{:#}`
    const RENDERED_FULL: &str = "\
   0:     0x55814860bddb - std[e28293b1aa0f68bd]::backtrace_rs::backtrace::libunwind::trace
                               at /rustc/90b35a6239c3d8bdabc530a6a0816f7ff89a0aaf/library/std/src/../../backtrace/src/backtrace/libunwind.rs:116:5
   1:     0x55814860bc41 - std[e28293b1aa0f68bd]::backtrace::Backtrace::create
   2:     0x558148601a3e - <causality_failure[3f1c9a0b77d2e410]::adapter::FailureAdapterBuilder<&str>>::build
   3:     0x5581486019f2 - my_app::handlers::transfer::h0123456789abcdef
                               at ./src/handlers.rs:42:9
   4:     0x558148601f10 - <fn() as core[9b2e4d1c0a7f3e21]::ops::function::FnOnce<()>>::call_once
";

    #[test]
    fn test_parse_short_backtrace() {
        let frames = parse_backtrace(RENDERED);
        assert_eq!(frames.len(), 8);
        assert_eq!(frames[1].symbol, "std::backtrace_rs::backtrace::trace_unsynchronized");
        assert_eq!(frames[5].symbol, "my_app::handlers::transfer");
        assert_eq!(frames[5].file.as_deref(), Some("./src/handlers.rs"));
        assert_eq!(frames[5].line, Some(42));
        assert_eq!(frames[6].file, None);
    }

    #[test]
    fn test_parse_full_backtrace() {
        let frames = parse_backtrace(RENDERED_FULL);
        let symbols: Vec<&str> = frames.iter().map(|frame| frame.symbol.as_str()).collect();
        assert_eq!(
            symbols,
            vec![
                "std::backtrace_rs::backtrace::libunwind::trace",
                "std::backtrace::Backtrace::create",
                "<causality_failure::adapter::FailureAdapterBuilder<&str>>::build",
                "my_app::handlers::transfer",
                "<fn() as core::ops::function::FnOnce<()>>::call_once",
            ]
        );
        assert_eq!(frames[3].line, Some(42));
    }

    #[test]
    fn test_capture_frames_are_skipped() {
        for rendered in [RENDERED, RENDERED_FULL] {
            let frames: Vec<_> = parse_backtrace(rendered)
                .into_iter()
                .skip_while(is_capture_frame)
                .collect();
            assert_eq!(frames[0].symbol, "my_app::handlers::transfer");
        }
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("0x1f - std[e28293b1aa0f68bd]::rt::lang_start"), "std::rt::lang_start");
        assert_eq!(normalize_symbol("alloc::vec::Vec<[u8; 4]>::push"), "alloc::vec::Vec<[u8; 4]>::push");
        assert_eq!(normalize_symbol("app::run::h0123456789abcdef"), "app::run");
        assert_eq!(normalize_symbol("a - b"), "a - b");
    }

    #[test]
    fn test_boundary_keeps_leading_user_frames() {
        let boundary = RuntimeBoundary::from_prefixes(vec!["causality_runtime::".to_string()]);
        let frames = vec![
            StackFrame::new("my_app::a"),
            StackFrame::new("my_app::b"),
            StackFrame::new("causality_runtime::fiber::run"),
            StackFrame::new("my_app::main"),
        ];

        let kept = boundary.user_frames(frames);
        assert_eq!(kept, vec![StackFrame::new("my_app::a"), StackFrame::new("my_app::b")]);
    }

    #[test]
    fn test_boundary_matches_trait_impl_frames() {
        let boundary = RuntimeBoundary::from_prefixes(vec!["causality_runtime::".to_string()]);
        let frame = StackFrame::new("<causality_runtime::Fiber as core::future::Future>::poll");
        assert!(boundary.is_internal(&frame));
        assert!(!boundary.is_internal(&StackFrame::new("my_app::poll")));

        let boundary = RuntimeBoundary::from_prefixes(vec!["core::ops::function::".to_string()]);
        let frame = StackFrame::new("<fn() as core::ops::function::FnOnce<()>>::call_once");
        assert!(boundary.is_internal(&frame));
        assert!(!boundary.is_internal(&StackFrame::new("<my_app::Job as my_app::Run>::run")));
    }

    #[test]
    fn test_frame_display() {
        assert_eq!(StackFrame::new("a::b").to_string(), "a::b");
        assert_eq!(StackFrame::new("a::b").at("src/a.rs", 7).to_string(), "a::b(src/a.rs:7)");
        assert_eq!(StackFrame::new("a::b::c").module(), "a::b");
    }

    #[test]
    fn test_location_without_column_is_kept_whole() {
        assert_eq!(split_location("src/lib.rs"), ("src/lib.rs".to_string(), None));
        assert_eq!(split_location("src/lib.rs:10:2"), ("src/lib.rs".to_string(), Some(10)));
    }
}
