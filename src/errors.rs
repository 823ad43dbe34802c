// File: src/errors.rs
//
// Error handling and reporting for Ardan. Structured error types with
// source location information and a pretty-printed, colored diagnostic
// rendering — same shape the teacher crate uses for its own errors.

use colored::Colorize;
use std::fmt;

use crate::interpreter::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
    pub file: Option<String>,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        SourceLocation { line, column, file: None }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file, self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}

/// Error kinds, matching the static/runtime/thrown split the diagnostic
/// design calls for.
#[derive(Debug, Clone)]
pub enum ErrorKind {
    // --- static (compile-time) ---
    ParseError,
    DuplicateDeclaration,
    AssignToConst,
    BreakOutsideLoop,
    ContinueOutsideLoop,
    UnsupportedAssignmentTarget,
    UnknownOperator,

    // --- runtime ---
    CallNonFunction,
    PropertyAccessOnNonObject,
    PrivacyViolation,
    UndefinedVariable,
    StackOverflow,
    ExceededMaxRegisters,
    MalformedBytecode,
    /// `await`ed a promise with no pending microtask left that could ever
    /// settle it.
    DeadlockedAwait,

    /// A value surfaced via `Throw` that was never caught.
    Thrown(Value),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            ErrorKind::ParseError => "ParseError",
            ErrorKind::DuplicateDeclaration => "DuplicateDeclaration",
            ErrorKind::AssignToConst => "AssignToConst",
            ErrorKind::BreakOutsideLoop => "BreakOutsideLoop",
            ErrorKind::ContinueOutsideLoop => "ContinueOutsideLoop",
            ErrorKind::UnsupportedAssignmentTarget => "UnsupportedAssignmentTarget",
            ErrorKind::UnknownOperator => "UnknownOperator",
            ErrorKind::CallNonFunction => "CallNonFunction",
            ErrorKind::PropertyAccessOnNonObject => "PropertyAccessOnNonObject",
            ErrorKind::PrivacyViolation => "PrivacyViolation",
            ErrorKind::UndefinedVariable => "UndefinedVariable",
            ErrorKind::StackOverflow => "StackOverflow",
            ErrorKind::ExceededMaxRegisters => "ExceededMaxRegisters",
            ErrorKind::MalformedBytecode => "MalformedBytecode",
            ErrorKind::DeadlockedAwait => "DeadlockedAwait",
            ErrorKind::Thrown(_) => "UncaughtException",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone)]
pub struct ArdanError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<SourceLocation>,
    pub source_line: Option<String>,
    pub suggestion: Option<String>,
    pub help: Option<String>,
    pub note: Option<String>,
}

impl ArdanError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ArdanError {
            kind,
            message: message.into(),
            location: None,
            source_line: None,
            suggestion: None,
            help: None,
            note: None,
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_source(mut self, source_line: impl Into<String>) -> Self {
        self.source_line = Some(source_line.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn thrown(value: Value) -> Self {
        ArdanError::new(ErrorKind::Thrown(value), "uncaught exception")
    }
}

impl fmt::Display for ArdanError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}: {}", format!("{}", self.kind).red().bold(), self.message)?;

        if let Some(loc) = &self.location {
            writeln!(f, "  {} {}", "-->".blue().bold(), loc)?;
        }

        if let Some(line) = &self.source_line {
            if let Some(loc) = &self.location {
                let gutter = format!("{:>4} | ", loc.line);
                writeln!(f, "{}{}", gutter.blue().bold(), line)?;
                let caret_pad = " ".repeat(gutter.len() + loc.column.saturating_sub(1));
                writeln!(f, "{}{}", caret_pad, "^".red().bold())?;
            } else {
                writeln!(f, "    | {line}")?;
            }
        }

        if let Some(suggestion) = &self.suggestion {
            writeln!(f, "  {} {}", "suggestion:".yellow().bold(), suggestion)?;
        }
        if let Some(help) = &self.help {
            writeln!(f, "  {} {}", "help:".green().bold(), help)?;
        }
        if let Some(note) = &self.note {
            writeln!(f, "  {} {}", "note:".cyan().bold(), note)?;
        }
        Ok(())
    }
}

impl std::error::Error for ArdanError {}

/// Levenshtein edit distance, used to suggest a near-miss identifier on an
/// `UndefinedVariable` error.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for i in 1..=a.len() {
        let mut prev = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let temp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j - 1])
            };
            prev = temp;
        }
    }
    row[b.len()]
}

/// Finds the closest candidate name to `target`, if any is within a
/// reasonable edit distance.
pub fn find_closest_match<'a>(target: &str, candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let max_distance = (target.len() / 3).max(1);
    candidates
        .map(|c| (c, levenshtein_distance(target, c)))
        .filter(|(_, d)| *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_distance_identical_strings_is_zero() {
        assert_eq!(levenshtein_distance("console", "console"), 0);
    }

    #[test]
    fn finds_closest_match_within_distance() {
        let candidates = ["console", "print", "length"];
        assert_eq!(find_closest_match("consol", candidates.into_iter()), Some("console"));
    }

    #[test]
    fn display_includes_location_and_message() {
        let err = ArdanError::new(ErrorKind::UndefinedVariable, "`foo` is not defined")
            .with_location(SourceLocation::new(3, 5));
        let rendered = format!("{err}");
        assert!(rendered.contains("UndefinedVariable"));
        assert!(rendered.contains("foo"));
    }
}
