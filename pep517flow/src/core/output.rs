//! Raw backend output lines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which pipe a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One line of backend output, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOutputLine {
    /// The pipe the line came from.
    pub stream: OutputStream,
    /// The line text.
    pub text: String,
}

impl RawOutputLine {
    /// Creates a new output line, stripping any trailing `\r` or `\n`.
    #[must_use]
    pub fn new(stream: OutputStream, text: impl Into<String>) -> Self {
        let mut text = text.into();
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        Self { stream, text }
    }

    /// Creates a stdout line.
    #[must_use]
    pub fn stdout(text: impl Into<String>) -> Self {
        Self::new(OutputStream::Stdout, text)
    }

    /// Creates a stderr line.
    #[must_use]
    pub fn stderr(text: impl Into<String>) -> Self {
        Self::new(OutputStream::Stderr, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_terminators_stripped() {
        let line = RawOutputLine::stdout("* Building wheel...\r\n");
        assert_eq!(line.text, "* Building wheel...");
        assert_eq!(line.stream, OutputStream::Stdout);
    }

    #[test]
    fn test_stream_display() {
        assert_eq!(OutputStream::Stderr.to_string(), "stderr");
    }
}
