//! Error types and the process-wide diagnostic sink.
//!
//! Public mutators in this crate report failure twice: they return a failure
//! indicator (`false`, `None`, or an empty result) *and* post a diagnostic to
//! the sink defined here. Readers never panic on bad input; they return empty
//! values and leave the explanation in the sink.

use std::{cell::RefCell, fmt};

use crate::file_version::FileVersion;

/// Error raised by engine operations.
///
/// The kinds mirror how a failure should be interpreted rather than where it
/// was raised: `Coding` means programmer misuse (the operation no-ops),
/// `Parse` means malformed textual input, `Runtime` means I/O or environment
/// failure, and `VersionMismatch` means a file newer than this build can read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed path, version string, list-op, or file body.
    #[error("parse error: {0}")]
    Parse(String),
    /// Programmer misuse of the API; the offending operation did nothing.
    #[error("coding error: {0}")]
    Coding(String),
    /// I/O failure, missing asset, or unsupported archive entry.
    #[error("runtime error: {0}")]
    Runtime(String),
    /// The input file's version exceeds the maximum this build can read.
    #[error("version mismatch: file version {found} exceeds maximum readable version {max_readable}")]
    VersionMismatch {
        found: FileVersion,
        max_readable: FileVersion,
    },
}

impl Error {
    /// Builds a [`Error::Parse`].
    #[must_use]
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Builds a [`Error::Coding`].
    #[must_use]
    pub fn coding(msg: impl Into<String>) -> Self {
        Self::Coding(msg.into())
    }

    /// Builds a [`Error::Runtime`].
    #[must_use]
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Returns true for the `Coding` kind.
    #[must_use]
    pub fn is_coding_error(&self) -> bool {
        matches!(self, Self::Coding(_))
    }
}

/// Convenience alias for fallible operations that post their failure reason
/// to the diagnostic sink as well.
pub type Result<T> = std::result::Result<T, Error>;

thread_local! {
    /// Stack of active capture frames. Each frame collects diagnostics posted
    /// on this thread while it is the innermost frame.
    static CAPTURE_STACK: RefCell<Vec<Vec<Error>>> = const { RefCell::new(Vec::new()) };
}

/// Posts a diagnostic to the sink.
///
/// The diagnostic is logged via `tracing` and, if a [`DiagnosticCollector`]
/// is active on this thread, appended to its capture buffer. Posting never
/// fails and never panics.
pub fn post(error: Error) {
    match &error {
        Error::Coding(msg) => tracing::error!(target: "strata::diagnostics", kind = "coding", "{msg}"),
        Error::Parse(msg) => tracing::warn!(target: "strata::diagnostics", kind = "parse", "{msg}"),
        Error::Runtime(msg) => tracing::warn!(target: "strata::diagnostics", kind = "runtime", "{msg}"),
        Error::VersionMismatch { .. } => {
            tracing::warn!(target: "strata::diagnostics", kind = "version", "{error}");
        }
    }
    CAPTURE_STACK.with(|stack| {
        if let Some(frame) = stack.borrow_mut().last_mut() {
            frame.push(error);
        }
    });
}

/// Posts a [`Error::Coding`] diagnostic built from the given message.
pub fn post_coding_error(msg: impl Into<String>) {
    post(Error::Coding(msg.into()));
}

/// Posts a [`Error::Parse`] diagnostic built from the given message.
pub fn post_parse_error(msg: impl Into<String>) {
    post(Error::Parse(msg.into()));
}

/// Posts a [`Error::Runtime`] diagnostic built from the given message.
pub fn post_runtime_error(msg: impl Into<String>) {
    post(Error::Runtime(msg.into()));
}

/// Scoped capture of diagnostics posted on the current thread.
///
/// Tests (and callers that want to turn sink traffic into hard errors) open a
/// collector, run the operation, then inspect [`DiagnosticCollector::take`].
/// Collectors nest; each diagnostic lands in the innermost open collector
/// only.
#[derive(Debug)]
pub struct DiagnosticCollector {
    taken: bool,
}

impl DiagnosticCollector {
    /// Opens a capture frame on the current thread.
    #[must_use]
    pub fn new() -> Self {
        CAPTURE_STACK.with(|stack| stack.borrow_mut().push(Vec::new()));
        Self { taken: false }
    }

    /// Closes the frame and returns everything captured so far.
    #[must_use]
    pub fn take(mut self) -> Vec<Error> {
        self.taken = true;
        CAPTURE_STACK.with(|stack| stack.borrow_mut().pop().unwrap_or_default())
    }

    /// Returns true if nothing has been captured yet.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        CAPTURE_STACK.with(|stack| stack.borrow().last().is_none_or(Vec::is_empty))
    }
}

impl Default for DiagnosticCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DiagnosticCollector {
    fn drop(&mut self) {
        if !self.taken {
            CAPTURE_STACK.with(|stack| {
                stack.borrow_mut().pop();
            });
        }
    }
}

impl fmt::Display for DiagnosticCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiagnosticCollector(clean: {})", self.is_clean())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_captures_posted_errors() {
        let collector = DiagnosticCollector::new();
        post_coding_error("misuse");
        post_parse_error("bad input");
        let captured = collector.take();
        assert_eq!(captured.len(), 2, "expected both diagnostics captured");
        assert!(captured[0].is_coding_error());
    }

    #[test]
    fn collectors_nest_innermost_wins() {
        let outer = DiagnosticCollector::new();
        {
            let inner = DiagnosticCollector::new();
            post_runtime_error("io");
            assert_eq!(inner.take().len(), 1);
        }
        post_coding_error("after inner closed");
        let outer_errors = outer.take();
        assert_eq!(outer_errors.len(), 1, "outer should only see the later post");
        assert!(outer_errors[0].is_coding_error());
    }
}
