//! Best-effort repair of near-valid JSON.
//!
//! Some FHIR servers (and some relays sitting in front of them) return
//! CapabilityStatements that are almost JSON: stray control characters from
//! encoding mismatches, CRLF noise, unescaped quotes, trailing commas. This
//! module runs an ordered pipeline of textual transforms and re-parses after
//! each one, returning the first value that parses.
//!
//! The repair is lossy and heuristic. It may alter string content (control
//! characters inside strings are dropped, runs of whitespace are collapsed)
//! and it is not a standards-correct repair; the transforms only target the
//! malformations listed on [`RepairStage`].
//!
//! Nothing here panics on arbitrary input: every path returns either a parsed
//! value or a [`RepairFailure`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Characters of context kept on either side of a reported parse error.
const CONTEXT_RADIUS: usize = 50;

/// Pipeline stage that produced a parsable document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStage {
    /// Input parsed as-is.
    Original,
    /// C0/C1 control characters removed.
    ControlChars,
    /// CRLF and lone CR normalized to LF.
    LineEndings,
    /// Split quotes, missing closing quotes and trailing commas fixed.
    PatternFixes,
    /// Whitespace runs collapsed to a single space.
    Whitespace,
}

impl fmt::Display for RepairStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => write!(f, "original"),
            Self::ControlChars => write!(f, "control_chars"),
            Self::LineEndings => write!(f, "line_endings"),
            Self::PatternFixes => write!(f, "pattern_fixes"),
            Self::Whitespace => write!(f, "whitespace"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Repaired {
    pub value: Value,
    pub stage: RepairStage,
}

impl Repaired {
    /// True when at least one transform had to run.
    pub fn was_repaired(&self) -> bool {
        self.stage != RepairStage::Original
    }
}

/// A parse error with its reported position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseErrorInfo {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseErrorInfo {
    fn from_serde(err: &serde_json::Error) -> Self {
        Self {
            message: err.to_string(),
            line: err.line(),
            column: err.column(),
        }
    }

    /// Character offset of the reported position inside `text`, if the
    /// parser reported one.
    pub fn offset_in(&self, text: &str) -> Option<usize> {
        if self.line == 0 {
            return None;
        }
        let mut offset = 0;
        for (idx, line) in text.split('\n').enumerate() {
            if idx + 1 == self.line {
                let col = self.column.saturating_sub(1).min(line.chars().count());
                return Some(offset + col);
            }
            offset += line.chars().count() + 1;
        }
        None
    }
}

impl fmt::Display for ParseErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JSON Parse Error at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

/// Every repair stage failed.
#[derive(Debug, Clone)]
pub struct RepairFailure {
    /// Error from parsing the untouched input.
    pub first_error: ParseErrorInfo,
    /// Error from parsing the output of the last stage.
    pub last_error: ParseErrorInfo,
    /// Text around the first error's position in the untouched input.
    pub context: Option<String>,
}

impl fmt::Display for RepairFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first_error)?;
        if self.last_error != self.first_error {
            write!(f, " (after repair: {})", self.last_error.message)?;
        }
        if let Some(context) = &self.context {
            write!(f, " near `{context}`")?;
        }
        Ok(())
    }
}

impl std::error::Error for RepairFailure {}

static SPLIT_QUOTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(:\s*")((?:[^"\\\n]|\\.)*)"((?:[^"\\\n]|\\.)*)"((?:[^"\\\n]|\\.)*)("\s*[,}\]\n])"#,
    )
    .expect("Invalid split quote regex")
});

static MISSING_QUOTE_BEFORE_COMMA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)(:\s*"[^"\n]*),[ \t]*$"#).expect("Invalid missing quote regex")
});

static MISSING_QUOTE_AND_COMMA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(:\s*"[^"\n]*[^"\s,])[ \t]*\n(\s*")"#)
        .expect("Invalid missing quote and comma regex")
});

// Start of a line that opens an object member: `  "key":`.
static MEMBER_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[ \t\r]*"[^"\n]*"\s*:"#).expect("Invalid member start regex")
});

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("Invalid trailing comma regex"));

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

/// Parse `text`, running the repair pipeline only when plain parsing fails.
pub fn parse_or_repair(text: &str) -> Result<Repaired, RepairFailure> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => Ok(Repaired {
            value,
            stage: RepairStage::Original,
        }),
        Err(err) => repair_after(text, ParseErrorInfo::from_serde(&err)),
    }
}

fn repair_after(text: &str, first_error: ParseErrorInfo) -> Result<Repaired, RepairFailure> {
    let stages: [(RepairStage, fn(&str) -> String); 4] = [
        (RepairStage::ControlChars, strip_control_chars),
        (RepairStage::LineEndings, normalize_line_endings),
        (RepairStage::PatternFixes, apply_pattern_fixes),
        (RepairStage::Whitespace, collapse_whitespace),
    ];

    let mut current = text.to_string();
    let mut last_error = first_error.clone();
    for (stage, transform) in stages {
        current = transform(&current);
        match serde_json::from_str::<Value>(&current) {
            Ok(value) => {
                tracing::debug!(%stage, "JSON repair succeeded");
                return Ok(Repaired { value, stage });
            }
            Err(err) => {
                tracing::debug!(%stage, error = %err, "JSON repair stage did not help");
                last_error = ParseErrorInfo::from_serde(&err);
            }
        }
    }

    let context = first_error
        .offset_in(text)
        .map(|offset| context_window(text, offset, CONTEXT_RADIUS));
    Err(RepairFailure {
        first_error,
        last_error,
        context,
    })
}

/// Chars `[offset - radius, offset + radius)` of `text`, clamped.
pub fn context_window(text: &str, offset: usize, radius: usize) -> String {
    let start = offset.saturating_sub(radius);
    text.chars().skip(start).take(offset - start + radius).collect()
}

fn is_stray_control(c: char) -> bool {
    let code = c as u32;
    (code <= 0x1F && !matches!(c, '\t' | '\n' | '\r')) || (0x7F..=0x9F).contains(&code)
}

fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '.' | '-' | '+' | '_')
}

/// Remove C0 and C1 control characters.
///
/// Inside string literals every control character is dropped, TAB/LF/CR
/// included, since none of them is legal there unescaped. The one exception
/// is an LF whose next line opens a new `"key":` member: the string was
/// never closed, and the line break is kept for the missing-quote fixes.
///
/// Outside string literals TAB/LF/CR are whitespace and stay. Any other
/// removed character between two token characters becomes a single space so
/// that `true\u{0}false` does not turn into one token.
pub fn strip_control_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if in_string && matches!(c, '\t' | '\r' | '\n') {
            if c == '\n' && MEMBER_START.is_match(&text[i + 1..]) {
                in_string = false;
                escaped = false;
                out.push(c);
            }
            continue;
        }

        if is_stray_control(c) {
            if !in_string {
                let prev = out.chars().next_back();
                let next = chars.peek().map(|&(_, n)| n);
                if let (Some(p), Some(n)) = (prev, next)
                    && is_token_char(p)
                    && is_token_char(n)
                {
                    out.push(' ');
                }
            }
            continue;
        }

        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        }
        out.push(c);
    }
    out
}

pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Targeted fixes for known malformations:
/// - a pair of unescaped quotes splitting a string value into fragments
/// - a string value that ends a line without its closing quote
/// - trailing commas before `}` or `]`
pub fn apply_pattern_fixes(text: &str) -> String {
    let fixed = SPLIT_QUOTE.replace_all(text, r#"${1}${2}\"${3}\"${4}${5}"#);
    let fixed = MISSING_QUOTE_BEFORE_COMMA.replace_all(&fixed, r#"${1}","#);
    let fixed = MISSING_QUOTE_AND_COMMA.replace_all(&fixed, "${1}\",\n${2}");
    TRAILING_COMMA.replace_all(&fixed, "${1}").into_owned()
}

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text, " ").into_owned()
}

/// Heuristic: does this body look like an HTML page rather than JSON?
pub fn looks_like_html(text: &str) -> bool {
    let trimmed = text.trim_start();
    let head: String = trimmed.chars().take(512).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with('<') || head.contains("<html")
}
