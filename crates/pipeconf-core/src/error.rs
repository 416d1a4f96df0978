//! Error types for pipeconf
//!
//! Errors are structured: a kind identifying the stage that failed, optional
//! path information, an actionable help message, and the wrapped cause. Every
//! stage of the resolution pipeline wraps the error of the stage below it, so
//! the outermost kind always names where `get` stopped.

use std::fmt;

use crate::component::IdError;

/// Result type alias for pipeconf operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pipeconf operations
#[derive(Debug, Clone)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Path in the config where the error occurred (e.g., "receivers.otlp")
    pub path: Option<String>,
    /// Source location (file, line) if available
    pub source_location: Option<SourceLocation>,
    /// Actionable help message
    pub help: Option<String>,
    /// Underlying cause when it is not itself a pipeconf error
    pub cause: Option<String>,
    /// Wrapped pipeconf error from a lower stage
    pub source: Option<Box<Error>>,
}

/// Location in a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

/// Categories of errors that can occur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Error parsing YAML/JSON
    Parse,
    /// Raw sources could not be retrieved or merged
    Resolution,
    /// A configuration processor's own options failed to decode
    ProcessorOptions { key: String },
    /// A configuration processor's transformation failed
    ProcessorTransform { key: String },
    /// The tree could not be converted to or from a partial configuration
    PartialConfig,
    /// The processed tree could not be bound to typed component configs
    Binding,
    /// Change monitoring failed
    Watch,
    /// Releasing resolver resources failed
    Shutdown,
    /// A configuration processor or factory could not be registered
    Registration { key: String },
    /// A component identifier is malformed
    InvalidComponentId,
    /// Error accessing a path that doesn't exist
    PathNotFound,
    /// Error during schema validation
    Validation,
    /// I/O error (file not found, etc.)
    Io,
    /// Internal error (bug in pipeconf)
    Internal,
}

impl Error {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            path: None,
            source_location: None,
            help: None,
            cause: None,
            source: None,
        }
    }

    /// Create a new parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Parse)
        }
    }

    /// Create a path not found error
    pub fn path_not_found(path: impl Into<String>) -> Self {
        let path_str = path.into();
        Self {
            help: Some(format!(
                "Check that '{}' exists in the configuration",
                path_str
            )),
            path: Some(path_str),
            ..Self::new(ErrorKind::PathNotFound)
        }
    }

    /// Wrap a failure of the raw resolver
    pub fn resolution(source: Error) -> Self {
        Self {
            source: Some(Box::new(source)),
            ..Self::new(ErrorKind::Resolution)
        }
    }

    /// Create a processor options decode error
    pub fn processor_options(key: impl Into<String>, message: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            path: Some(key.clone()),
            help: Some(format!(
                "Check the '{}' section against the options of the '{}' config processor",
                key, key
            )),
            cause: Some(message.into()),
            ..Self::new(ErrorKind::ProcessorOptions { key })
        }
    }

    /// Wrap a failure returned by a processor's transformation
    pub fn processor_transform(key: impl Into<String>, source: Error) -> Self {
        Self {
            source: Some(Box::new(source)),
            ..Self::new(ErrorKind::ProcessorTransform { key: key.into() })
        }
    }

    /// Create a partial configuration conversion error
    pub fn partial_config(path: Option<String>, message: impl Into<String>) -> Self {
        Self {
            path,
            cause: Some(message.into()),
            ..Self::new(ErrorKind::PartialConfig)
        }
    }

    /// Create a binding error
    pub fn binding(path: impl Into<String>, message: impl Into<String>) -> Self {
        let p = path.into();
        Self {
            path: if p.is_empty() { None } else { Some(p) },
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Binding)
        }
    }

    /// Create a watch failure
    pub fn watch(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Watch)
        }
    }

    /// Create a shutdown failure
    pub fn shutdown(message: impl Into<String>) -> Self {
        Self {
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Shutdown)
        }
    }

    /// Create an error for a processor key that shadows a configuration section
    pub fn reserved_key(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            help: Some(format!(
                "'{}' is a configuration section; choose another config key",
                key
            )),
            ..Self::new(ErrorKind::Registration { key })
        }
    }

    /// Create an error for a key registered twice
    pub fn duplicate_key(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            help: Some(format!("Register '{}' only once", key)),
            cause: Some("already registered".into()),
            ..Self::new(ErrorKind::Registration { key })
        }
    }

    /// Create an error for a processor key that cannot name a top-level key
    pub fn invalid_key(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            help: Some("Config keys are plain top-level names without '.', '[' or ']'".into()),
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Registration { key: key.into() })
        }
    }

    /// Create an I/O error
    pub fn io(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Io)
        }
    }

    /// Create a file not found error
    pub fn file_not_found(file_path: impl Into<String>) -> Self {
        let fp = file_path.into();
        Self {
            help: Some(format!(
                "Check that '{}' exists, or load it as an optional file",
                fp
            )),
            cause: Some(format!("File not found: {}", fp)),
            path: Some(fp),
            ..Self::new(ErrorKind::Io)
        }
    }

    /// Create a validation error
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        let p = path.into();
        Self {
            path: if p.is_empty() || p == "<root>" {
                None
            } else {
                Some(p)
            },
            help: Some("Fix the value to match the schema requirements".into()),
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Validation)
        }
    }

    /// Create an internal error (bug in pipeconf)
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            help: Some("This is likely a bug in pipeconf. Please report it.".into()),
            cause: Some(message.into()),
            ..Self::new(ErrorKind::Internal)
        }
    }

    /// Add source location to the error
    pub fn with_source_location(mut self, loc: SourceLocation) -> Self {
        self.source_location = Some(loc);
        self
    }

    /// Add help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// The innermost wrapped error
    pub fn root(&self) -> &Error {
        let mut current = self;
        while let Some(inner) = &current.source {
            current = inner;
        }
        current
    }
}

impl From<IdError> for Error {
    fn from(err: IdError) -> Self {
        Self {
            cause: Some(err.to_string()),
            help: Some(
                "Component ids are `type` or `type/name`; types start with a letter and \
                 contain only letters, digits and underscores"
                    .into(),
            ),
            ..Self::new(ErrorKind::InvalidComponentId)
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Main error message
        match &self.kind {
            ErrorKind::Parse => write!(f, "Parse error")?,
            ErrorKind::Resolution => write!(f, "Cannot resolve the configuration")?,
            ErrorKind::ProcessorOptions { key } => {
                write!(f, "Cannot decode config processor options '{}'", key)?
            }
            ErrorKind::ProcessorTransform { key } => {
                write!(f, "Cannot process configuration with processor '{}'", key)?
            }
            ErrorKind::PartialConfig => write!(f, "Cannot convert partial configuration")?,
            ErrorKind::Binding => write!(f, "Cannot unmarshal the configuration")?,
            ErrorKind::Watch => write!(f, "Configuration watch failed")?,
            ErrorKind::Shutdown => write!(f, "Configuration provider shutdown failed")?,
            ErrorKind::Registration { key } => write!(f, "Cannot register '{}'", key)?,
            ErrorKind::InvalidComponentId => write!(f, "Invalid component id")?,
            ErrorKind::PathNotFound => write!(f, "Path not found")?,
            ErrorKind::Validation => write!(f, "Validation error")?,
            ErrorKind::Io => write!(f, "I/O error")?,
            ErrorKind::Internal => write!(f, "Internal error")?,
        }

        // Path context
        if let Some(path) = &self.path {
            write!(f, "\n  Path: {}", path)?;
        }

        // Source location
        if let Some(loc) = &self.source_location {
            write!(f, "\n  File: {}", loc.file)?;
            if let Some(line) = loc.line {
                write!(f, ":{}", line)?;
            }
        }

        // Cause
        if let Some(cause) = &self.cause {
            write!(f, "\n  {}", cause)?;
        }

        // Help
        if let Some(help) = &self.help {
            write!(f, "\n  Help: {}", help)?;
        }

        // Wrapped error, indented one level
        if let Some(source) = &self.source {
            let nested = source.to_string().replace('\n', "\n  ");
            write!(f, "\n  Caused by: {}", nested)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_not_found_error() {
        let err = Error::path_not_found("receivers.otlp");

        assert_eq!(err.kind, ErrorKind::PathNotFound);
        assert_eq!(err.path, Some("receivers.otlp".into()));
    }

    #[test]
    fn test_processor_options_error_display() {
        let err = Error::processor_options("group", "unknown field `colour`");
        let display = format!("{}", err);

        assert!(display.contains("Cannot decode config processor options 'group'"));
        assert!(display.contains("Path: group"));
        assert!(display.contains("unknown field `colour`"));
        assert!(display.contains("Help:"));
    }

    #[test]
    fn test_processor_transform_wraps_source() {
        let inner = Error::path_not_found("receivers.b");
        let err = Error::processor_transform("rename", inner);
        let display = format!("{}", err);

        assert_eq!(
            err.kind,
            ErrorKind::ProcessorTransform {
                key: "rename".into()
            }
        );
        assert!(display.contains("processor 'rename'"));
        assert!(display.contains("Caused by: Path not found"));
        assert!(display.contains("receivers.b"));
        assert_eq!(err.root().kind, ErrorKind::PathNotFound);
    }

    #[test]
    fn test_resolution_error_source_chain() {
        let err = Error::resolution(Error::file_not_found("base.yaml"));
        let source = std::error::Error::source(&err).unwrap();

        assert!(source.to_string().contains("File not found: base.yaml"));
        assert_eq!(err.root().kind, ErrorKind::Io);
    }

    #[test]
    fn test_reserved_key_error() {
        let err = Error::reserved_key("receivers");
        let display = format!("{}", err);

        assert!(display.contains("Cannot register 'receivers'"));
        assert!(display.contains("is a configuration section"));
    }

    #[test]
    fn test_duplicate_key_error() {
        let err = Error::duplicate_key("group");

        assert_eq!(
            err.kind,
            ErrorKind::Registration {
                key: "group".into()
            }
        );
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_binding_error_empty_path() {
        let err = Error::binding("", "expected a mapping");
        assert!(err.path.is_none());

        let err = Error::binding("receivers.otlp", "unknown type");
        assert_eq!(err.path.as_deref(), Some("receivers.otlp"));
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("Unexpected state");
        let display = format!("{}", err);

        assert!(display.contains("Internal error"));
        // The message goes into the cause field
        assert!(display.contains("Unexpected state"));
    }

    #[test]
    fn test_with_source_location() {
        let err = Error::parse("syntax error").with_source_location(SourceLocation {
            file: "config.yaml".into(),
            line: Some(42),
            column: None,
        });
        let display = format!("{}", err);

        assert!(display.contains("config.yaml:42"));
    }

    #[test]
    fn test_with_help() {
        let err = Error::parse("bad input").with_help("Try fixing the syntax");
        let display = format!("{}", err);

        assert!(display.contains("Help: Try fixing the syntax"));
    }

    #[test]
    fn test_validation_error_root_path() {
        // Root path should not show path field
        let err = Error::validation("<root>", "missing required field");
        assert!(err.path.is_none());

        let err2 = Error::validation("", "missing required field");
        assert!(err2.path.is_none());
    }

    #[test]
    fn test_invalid_component_id_from_id_error() {
        let err: Error = IdError::EmptyName("otlp/".into()).into();

        assert_eq!(err.kind, ErrorKind::InvalidComponentId);
        assert!(err.to_string().contains("otlp/"));
    }
}
