use std::cell::RefCell;
use std::fmt;

/// A half-open byte range into the original source text.
///
/// The frontend owns the source map; the IR core only threads spans through
/// so that structural errors can point back at the offending statement.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    pub start: u32,
    pub end: u32,
}

impl SourceSpan {
    pub const UNKNOWN: SourceSpan = SourceSpan { start: 0, end: 0 };

    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    #[inline(always)]
    pub fn is_unknown(&self) -> bool {
        self.start == 0 && self.end == 0
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

/// Structural problems the middle end can detect on its own.
///
/// Everything else (name resolution, type errors, ...) was already handled
/// by the frontend before the IR builder ever runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DiagnosticCode {
    UnreachableCode,
    InterpreterTrap,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub span: SourceSpan,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(code: DiagnosticCode, span: SourceSpan, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            span,
            message: message.into(),
        }
    }

    pub fn error(code: DiagnosticCode, span: SourceSpan, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            span,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let severity = match self.severity {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {} ({})", severity, self.message, self.span)
    }
}

/// Caller-supplied diagnostics sink.
///
/// The core never formats or aborts on its own; it hands every report to
/// the sink and keeps going where the error is recoverable.
pub trait DiagnosticsSink {
    fn emit(&self, diagnostic: Diagnostic);
}

/// A sink that drops everything. Useful for callers that only care about
/// the final artifact.
#[derive(Default)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn emit(&self, _diagnostic: Diagnostic) {}
}

/// A sink that buffers every report, in emission order.
#[derive(Default)]
pub struct CapturedDiagnostics {
    buffer: RefCell<Vec<Diagnostic>>,
}

impl CapturedDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.borrow().len()
    }

    pub fn take(&self) -> Vec<Diagnostic> {
        self.buffer.borrow_mut().drain(..).collect()
    }

    pub fn contains(&self, code: DiagnosticCode) -> bool {
        self.buffer.borrow().iter().any(|d| d.code == code)
    }
}

impl DiagnosticsSink for CapturedDiagnostics {
    fn emit(&self, diagnostic: Diagnostic) {
        self.buffer.borrow_mut().push(diagnostic);
    }
}
