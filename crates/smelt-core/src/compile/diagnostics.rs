//! Best-effort parsing of compiler diagnostics.
//!
//! Two line shapes are understood:
//!
//! ```text
//! admin.sma:12:5: error: undefined symbol "foo"          (colon style)
//! admin.sma(12) : error 017: undefined symbol "foo"      (Pawn style)
//! admin.sma(12 -- 14) : warning 217: loose indentation   (Pawn range)
//! ```
//!
//! Lines matching neither are kept verbatim in [`ParsedOutput::unparsed`].

use serde::Serialize;

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    Error,
    Warning,
    Note,
}

impl Severity {
    /// Checked in this order so "fatal error" wins over "error".
    const ALL: [Severity; 4] = [
        Severity::Fatal,
        Severity::Error,
        Severity::Warning,
        Severity::Note,
    ];

    fn keyword(self) -> &'static str {
        match self {
            Severity::Fatal => "fatal error",
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        }
    }

    fn from_keyword(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|sev| sev.keyword() == s)
    }

    /// Whether this severity fails the compilation.
    pub fn is_error(self) -> bool {
        matches!(self, Severity::Fatal | Severity::Error)
    }
}

/// One compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,

    /// Line number (1-indexed), when the compiler reported one.
    pub line: Option<u32>,

    /// Column number (1-indexed), when the compiler reported one.
    pub column: Option<u32>,

    /// Compiler-specific diagnostic code (e.g. "017").
    pub code: Option<String>,

    pub message: String,
}

impl Diagnostic {
    /// An error without a source location.
    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            line: None,
            column: None,
            code: None,
            message: message.into(),
        }
    }

    /// Synthetic diagnostic for a killed compiler.
    pub fn timeout(secs: u64) -> Self {
        Self::simple(format!("Compilation timed out after {secs} seconds"))
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(line) = self.line {
            write!(f, "line {line}")?;
            if let Some(column) = self.column {
                write!(f, ":{column}")?;
            }
            write!(f, ": ")?;
        }
        write!(f, "{}", self.severity.keyword())?;
        if let Some(code) = &self.code {
            write!(f, " {code}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Result of parsing a compiler log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub diagnostics: Vec<Diagnostic>,

    /// Non-empty lines that matched no known shape.
    pub unparsed: Vec<String>,
}

impl ParsedOutput {
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity.is_error())
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }
}

/// Parse a compiler log line by line.
pub fn parse_output(output: &str) -> ParsedOutput {
    let mut parsed = ParsedOutput::default();

    for line in output.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        match parse_pawn_line(line).or_else(|| parse_colon_line(line)) {
            Some(diagnostic) => parsed.diagnostics.push(diagnostic),
            None => parsed.unparsed.push(line.to_string()),
        }
    }

    parsed
}

/// `file(line) : severity code: message`, with `line` possibly `a -- b`.
fn parse_pawn_line(line: &str) -> Option<Diagnostic> {
    let (head, rest) = line.split_once(") : ")?;
    let open = head.rfind('(')?;
    let line_no = head[open + 1..].split("--").next()?.trim().parse().ok()?;

    let (kind, message) = rest.split_once(':')?;
    let kind = kind.trim();
    let (keyword, code) = match kind.rsplit_once(' ') {
        Some((keyword, code)) if code.chars().all(|c| c.is_ascii_digit()) => {
            (keyword, Some(code.to_string()))
        }
        _ => (kind, None),
    };

    Some(Diagnostic {
        severity: Severity::from_keyword(keyword)?,
        line: Some(line_no),
        column: None,
        code,
        message: message.trim().to_string(),
    })
}

/// `file:line[:col]: severity: message`.
fn parse_colon_line(line: &str) -> Option<Diagnostic> {
    for severity in Severity::ALL {
        let needle = format!(": {}: ", severity.keyword());
        let Some(pos) = line.find(&needle) else {
            continue;
        };

        let (line_no, column) = parse_location(&line[..pos])?;
        return Some(Diagnostic {
            severity,
            line: Some(line_no),
            column,
            code: None,
            message: line[pos + needle.len()..].trim().to_string(),
        });
    }
    None
}

/// Split `file:line[:col]` from the right, so drive letters survive.
fn parse_location(location: &str) -> Option<(u32, Option<u32>)> {
    let mut parts = location.rsplitn(3, ':');
    let last = parts.next()?;
    let middle = parts.next();

    match middle.and_then(|m| m.parse().ok()) {
        Some(line_no) => Some((line_no, Some(last.parse().ok()?))),
        None => Some((last.parse().ok()?, None)),
    }
}
