//! Request validation
//!
//! Cheap checks run before anything touches the filesystem or spawns a process.

use thiserror::Error;

/// Marker that must close every accepted document
const END_DOCUMENT: &str = "\\end{document}";

/// Why a submitted source was rejected
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InputError {
    #[error("Empty LaTeX code")]
    Empty,
    #[error("LaTeX input too large")]
    TooLarge,
    #[error("LaTeX input is not valid UTF-8")]
    NotUtf8,
    #[error("invalid or trailing content after \\end{{document}}")]
    MissingEndDocument,
    #[error("Unreadable request body: {0}")]
    Body(String),
}

/// Validate LaTeX source before staging
///
/// Rejects whitespace-only input, input over `max_bytes`, and input whose last
/// non-whitespace content is not `\end{document}`.
pub fn validate_source(code: &str, max_bytes: usize) -> Result<(), InputError> {
    if code.trim().is_empty() {
        return Err(InputError::Empty);
    }

    if code.len() > max_bytes {
        return Err(InputError::TooLarge);
    }

    if !code.trim_end().ends_with(END_DOCUMENT) {
        return Err(InputError::MissingEndDocument);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "\\documentclass{article}\\begin{document}Hi\\end{document}";

    #[test]
    fn test_accepts_minimal_document() {
        assert_eq!(validate_source(HELLO, 1024), Ok(()));
        assert_eq!(validate_source(&format!("{}\n\n  \t", HELLO), 1024), Ok(()));
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(validate_source("", 1024), Err(InputError::Empty));
        assert_eq!(validate_source(" \n\t ", 1024), Err(InputError::Empty));
    }

    #[test]
    fn test_rejects_oversized() {
        assert_eq!(validate_source(HELLO, 10), Err(InputError::TooLarge));
        assert_eq!(validate_source(HELLO, HELLO.len()), Ok(()));
    }

    #[test]
    fn test_rejects_missing_end_document() {
        assert_eq!(
            validate_source("\\documentclass{article}\\begin{document}Hi there", 1024),
            Err(InputError::MissingEndDocument)
        );
        assert_eq!(
            validate_source(&format!("{}\\input{{/etc/passwd}}", HELLO), 1024),
            Err(InputError::MissingEndDocument)
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            InputError::MissingEndDocument.to_string(),
            "invalid or trailing content after \\end{document}"
        );
        assert_eq!(InputError::Empty.to_string(), "Empty LaTeX code");
    }
}
