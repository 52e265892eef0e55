//! Classifiers for backend output conventions.

use super::OutputClassifier;
use crate::core::{DiagnosticEvent, RawOutputLine, Severity, SourceLocation};
use regex::Regex;
use std::sync::LazyLock;

/// `path:line[:col]: message`, as printed by compilers, linters and
/// setuptools' own warnings.
static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<file>[^\s:][^:]*?):(?P<line>\d+):(?:(?P<col>\d+):)?\s*(?P<msg>.*)$")
        .expect("location pattern is valid")
});

/// `File "path", line N` in Python tracebacks.
static TRACEBACK_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*File "(?P<file>[^"]+)", line (?P<line>\d+)"#).expect("frame pattern is valid")
});

/// `SomeError: message` as the last line of a Python traceback.
static PYTHON_EXCEPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z_][\w.]*\.)?[A-Z]\w*(?:Error|Exception|Exit):").expect("exception pattern is valid")
});

const ERROR_MARKERS: &[&str] = &["ERROR", "error:", "Error:", "FATAL", "fatal:", "Traceback (most recent call last)"];
const WARNING_MARKERS: &[&str] = &["WARNING", "warning:", "Warning:", "DeprecationWarning", "SetuptoolsDeprecationWarning"];

fn starts_with_any(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| text.starts_with(m))
}

fn severity_of(message: &str) -> Option<Severity> {
    let trimmed = message.trim_start();
    if starts_with_any(trimmed, ERROR_MARKERS) || PYTHON_EXCEPTION.is_match(trimmed) {
        Some(Severity::Error)
    } else if starts_with_any(trimmed, WARNING_MARKERS) || trimmed.contains("Warning:") {
        Some(Severity::Warning)
    } else {
        None
    }
}

fn location_of(text: &str) -> Option<(SourceLocation, String)> {
    if let Some(caps) = TRACEBACK_FRAME.captures(text) {
        let line = caps["line"].parse().ok()?;
        return Some((SourceLocation::new(&caps["file"], line), text.trim().to_string()));
    }

    let caps = LOCATION.captures(text)?;
    let line = caps["line"].parse().ok()?;
    let mut location = SourceLocation::new(&caps["file"], line);
    if let Some(col) = caps.name("col").and_then(|c| c.as_str().parse().ok()) {
        location = location.with_column(col);
    }
    Some((location, caps["msg"].to_string()))
}

/// Classifier for the pypa `build` frontend and the setuptools/pip output it
/// relays.
///
/// - `ERROR`, `error:` and traceback lines become errors
/// - `WARNING`, `warning:` and `*Warning:` lines become warnings
/// - `* ` lines are pypa build progress markers
/// - `path:line[:col]: message` lines carry a location hint and are at
///   least warnings
/// - everything else is logged as info
#[derive(Debug, Clone, Copy, Default)]
pub struct Pep517Classifier;

impl Pep517Classifier {
    /// Identifier this classifier is registered under.
    pub const ID: &'static str = "pep517";

    /// Creates a new classifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl OutputClassifier for Pep517Classifier {
    fn id(&self) -> &str {
        Self::ID
    }

    fn classify(&self, line: &RawOutputLine) -> DiagnosticEvent {
        let text = line.text.as_str();

        let event = if let Some((location, message)) = location_of(text) {
            let severity = severity_of(&message).unwrap_or(Severity::Warning);
            let event = match severity {
                Severity::Error => DiagnosticEvent::error(message),
                Severity::Warning | Severity::Info => DiagnosticEvent::warning(message),
            };
            event.with_location(location)
        } else if text.starts_with("* ") {
            DiagnosticEvent::progress(text)
        } else {
            match severity_of(text) {
                Some(Severity::Error) => DiagnosticEvent::error(text),
                Some(Severity::Warning) => DiagnosticEvent::warning(text),
                Some(Severity::Info) | None => DiagnosticEvent::info(text),
            }
        };

        event.with_stream(line.stream)
    }
}

/// Fallback classifier for backends without known conventions.
///
/// Recognises `path:line: message` locations as warnings and logs everything
/// else as info.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainClassifier;

impl PlainClassifier {
    /// Identifier this classifier is registered under.
    pub const ID: &'static str = "plain";
}

impl OutputClassifier for PlainClassifier {
    fn id(&self) -> &str {
        Self::ID
    }

    fn classify(&self, line: &RawOutputLine) -> DiagnosticEvent {
        let event = match LOCATION.captures(&line.text) {
            Some(caps) => match caps["line"].parse() {
                Ok(n) => DiagnosticEvent::warning(&caps["msg"]).with_location(SourceLocation::new(&caps["file"], n)),
                Err(_) => DiagnosticEvent::info(&line.text),
            },
            None => DiagnosticEvent::info(&line.text),
        };
        event.with_stream(line.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EventKind, OutputStream};
    use std::path::PathBuf;

    fn classify(text: &str) -> DiagnosticEvent {
        Pep517Classifier.classify(&RawOutputLine::stdout(text))
    }

    #[test]
    fn test_error_marker() {
        let event = classify("ERROR Backend subprocess exited when trying to invoke build_sdist");
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(event.kind, EventKind::Problem);
        assert!(event.location.is_none());
    }

    #[test]
    fn test_traceback_header_and_exception() {
        assert!(classify("Traceback (most recent call last):").is_error());
        assert!(classify("ModuleNotFoundError: No module named 'setuptools'").is_error());
        assert!(classify("setuptools.errors.SetupError: bad config").is_error());
    }

    #[test]
    fn test_traceback_frame_location() {
        let event = classify(r#"  File "/proj/setup.py", line 7, in <module>"#);
        let location = event.location.unwrap();
        assert_eq!(location.file, PathBuf::from("/proj/setup.py"));
        assert_eq!(location.line, 7);
    }

    #[test]
    fn test_warning_markers() {
        assert_eq!(classify("WARNING: package dir not found").severity, Severity::Warning);
        assert_eq!(
            classify("SetuptoolsDeprecationWarning: License classifiers are deprecated.").severity,
            Severity::Warning
        );
    }

    #[test]
    fn test_progress_marker() {
        let event = classify("* Building sdist...");
        assert_eq!(event.kind, EventKind::Progress);
        assert_eq!(event.severity, Severity::Info);
        assert_eq!(event.message, "* Building sdist...");
    }

    #[test]
    fn test_location_extraction() {
        let event = classify("src/pkg/core.py:42: error: unterminated string");
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(event.message, "error: unterminated string");
        assert_eq!(event.location, Some(SourceLocation::new("src/pkg/core.py", 42)));

        let event = classify("src/pkg/core.py:3:9: unused import");
        assert_eq!(event.severity, Severity::Warning);
        assert_eq!(event.location.unwrap().column, Some(9));
    }

    #[test]
    fn test_fallback_is_info_and_keeps_text() {
        let line = RawOutputLine::stderr("running egg_info");
        let event = Pep517Classifier.classify(&line);
        assert_eq!(event.severity, Severity::Info);
        assert_eq!(event.kind, EventKind::Log);
        assert_eq!(event.message, "running egg_info");
        assert_eq!(event.stream, Some(OutputStream::Stderr));
    }

    #[test]
    fn test_empty_line_is_info() {
        assert_eq!(classify("").severity, Severity::Info);
    }

    #[test]
    fn test_plain_classifier() {
        let event = PlainClassifier.classify(&RawOutputLine::stdout("ERROR but unknown backend"));
        assert_eq!(event.severity, Severity::Info);

        let event = PlainClassifier.classify(&RawOutputLine::stdout("a.py:1: oops"));
        assert_eq!(event.severity, Severity::Warning);
        assert_eq!(event.location.unwrap().line, 1);
    }
}
