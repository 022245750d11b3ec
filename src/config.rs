//! Configuration module for educ
//!
//! This module reads the configuration file and installs its settings into a
//! [`Settings`] store. The file is line oriented:
//!
//! ```text
//! # comment
//! username = "alice";
//! hostname = "a.example.com|b.example.com";   # trailing comment
//! ```

use std::path::Path;

use anyhow::{anyhow, Context as _, Result};
use thiserror::Error;
use tracing::debug;

use crate::constants::{MAX_ARGUMENT_LENGTH, MAX_IDENTIFIER_LENGTH};
use crate::settings::{Settings, SettingsError};

//==============================================================================
// Errors
//==============================================================================

/// Reason a single config line was rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineError {
    #[error("unexpected leading character")]
    UnexpectedLeadingCharacter,

    #[error("identifier too long (max 63 characters)")]
    IdentifierTooLong,

    #[error("expected assignment operator")]
    ExpectedAssignment,

    #[error("expected string")]
    ExpectedString,

    #[error("unterminated argument")]
    UnterminatedArgument,

    #[error("argument too long (max 511 characters)")]
    ArgumentTooLong,

    #[error("no line terminator")]
    MissingTerminator,

    #[error("implicit data after line terminator")]
    TrailingData,

    #[error(transparent)]
    Setting(#[from] SettingsError),
}

/// A rejected config line, with its location
#[derive(Debug, Error)]
#[error("{path}:{line}: error: {kind}")]
pub struct ParseError {
    pub path: String,
    pub line: usize,
    pub kind: LineError,
}

//==============================================================================
// Interpreter
//==============================================================================

/// Parses one non-blank, non-comment line into `(identifier, value)`
///
/// # Examples
///
/// ```
/// use educ::config::parse_line;
///
/// assert_eq!(parse_line(r#"port = "443";"#).unwrap(), ("port", "443"));
/// assert!(parse_line(r#"port = 443;"#).is_err());
/// ```
pub fn parse_line(line: &str) -> std::result::Result<(&str, &str), LineError> {
    let line = line.trim();

    let id_end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(line.len());
    if id_end == 0 {
        return Err(LineError::UnexpectedLeadingCharacter);
    }
    if id_end > MAX_IDENTIFIER_LENGTH {
        return Err(LineError::IdentifierTooLong);
    }
    let (identifier, rest) = line.split_at(id_end);

    let rest = rest
        .trim_start()
        .strip_prefix('=')
        .ok_or(LineError::ExpectedAssignment)?;
    let rest = rest
        .trim_start()
        .strip_prefix('"')
        .ok_or(LineError::ExpectedString)?;

    let close = rest.find('"').ok_or_else(|| {
        if rest.len() > MAX_ARGUMENT_LENGTH {
            LineError::ArgumentTooLong
        } else {
            LineError::UnterminatedArgument
        }
    })?;
    let (argument, rest) = (&rest[..close], &rest[close + 1..]);
    if argument.len() > MAX_ARGUMENT_LENGTH {
        return Err(LineError::ArgumentTooLong);
    }

    let rest = rest
        .trim_start()
        .strip_prefix(';')
        .ok_or(LineError::MissingTerminator)?
        .trim_start();
    if !rest.is_empty() && !rest.starts_with('#') {
        return Err(LineError::TrailingData);
    }

    Ok((identifier, argument))
}

/// Interprets the whole config text, installing every setting it names
///
/// `path` is only used to label errors. The first bad line aborts.
pub fn parse_str(content: &str, path: &str) -> std::result::Result<Settings, ParseError> {
    let mut settings = Settings::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let located = |kind: LineError| ParseError {
            path: path.to_string(),
            line: index + 1,
            kind,
        };

        let (identifier, value) = parse_line(line).map_err(located)?;
        settings
            .install(identifier, value)
            .map_err(|e| located(e.into()))?;
        debug!("{}:{}: installed {}", path, index + 1, identifier);
    }

    Ok(settings)
}

/// Loads settings from the config file at `path`
///
/// # Errors
///
/// - The file does not exist or is not a regular file
/// - The file cannot be read
/// - A line fails to parse or names a bad setting
pub fn load(path: &Path) -> Result<Settings> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat config: {}", path.display()))?;
    if !metadata.is_file() {
        return Err(anyhow!(
            "{} is not a regular file",
            path.display()
        ));
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let settings = parse_str(&content, &path.display().to_string())?;
    Ok(settings)
}

//==============================================================================
// Tests
//==============================================================================
