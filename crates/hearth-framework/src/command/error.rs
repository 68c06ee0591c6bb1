//! Command matching and tree construction errors.

use thiserror::Error;

/// Marks the end of the consumed prefix in a position hint.
pub const HINT_MARKER: &str = "<--";

/// Builds a position hint: the consumed prefix followed by `<--`.
pub(crate) fn hint(consumed: &str) -> String {
    format!("{consumed}{HINT_MARKER}")
}

// =============================================================================
// Matching errors
// =============================================================================

/// Why a command did not reach an executor.
///
/// Every variant carries a position hint: the part of the command that was
/// consumed, followed by `<--`. The `Display` text is user-facing and is
/// what the source receives as a reply.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    /// Nothing matched the next token.
    #[error("Unknown command: {hint}")]
    NotFound { hint: String },

    /// The text ended at a node without an executor.
    #[error("Incomplete command: {hint}")]
    Incomplete { hint: String },

    /// The source does not meet a node's requirement.
    #[error("Permission denied: {hint}")]
    PermissionDenied { hint: String },

    /// An argument failed to parse.
    #[error("Invalid argument: {reason}: {hint}")]
    InvalidArgument { hint: String, reason: String },

    /// A numeric argument parsed but lies outside its bounds.
    #[error("Number out of range: {reason}: {hint}")]
    NumberOutOfRange { hint: String, reason: String },
}

impl CommandError {
    /// The position hint.
    pub fn hint(&self) -> &str {
        match self {
            Self::NotFound { hint }
            | Self::Incomplete { hint }
            | Self::PermissionDenied { hint }
            | Self::InvalidArgument { hint, .. }
            | Self::NumberOutOfRange { hint, .. } => hint,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Syntax errors: the input itself is malformed.
    pub fn is_syntax_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. } | Self::NumberOutOfRange { .. }
        )
    }
}

// =============================================================================
// Argument parse failures
// =============================================================================

/// Failure reported by an [`ArgumentParser`](super::ArgumentParser).
///
/// `read` is how many bytes of the remaining text the parser consumed before
/// failing; the tree uses it to place the position hint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("{message}")]
    Invalid { message: String, read: usize },

    #[error("{message}")]
    OutOfRange { message: String, read: usize },
}

impl ParseFailure {
    pub fn invalid(message: impl Into<String>, read: usize) -> Self {
        Self::Invalid {
            message: message.into(),
            read,
        }
    }

    pub fn out_of_range(message: impl Into<String>, read: usize) -> Self {
        Self::OutOfRange {
            message: message.into(),
            read,
        }
    }

    pub fn read(&self) -> usize {
        match self {
            Self::Invalid { read, .. } | Self::OutOfRange { read, .. } => *read,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Invalid { message, .. } | Self::OutOfRange { message, .. } => message,
        }
    }

    pub(crate) fn into_command_error(self, hint: String) -> CommandError {
        match self {
            Self::Invalid { message, .. } => CommandError::InvalidArgument {
                hint,
                reason: message,
            },
            Self::OutOfRange { message, .. } => CommandError::NumberOutOfRange {
                hint,
                reason: message,
            },
        }
    }
}

// =============================================================================
// Tree construction errors
// =============================================================================

/// Raised while building or registering command nodes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// A literal spelling is empty or contains the divider.
    #[error("invalid literal '{0}'")]
    InvalidLiteral(String),

    /// Two literal children share a spelling.
    #[error("duplicate literal '{literal}' under '{parent}'")]
    DuplicateLiteral { parent: String, literal: String },

    /// Two argument children share a name.
    #[error("duplicate argument <{name}> under '{parent}'")]
    DuplicateArgument { parent: String, name: String },

    /// `redirects` was called on a node that already has children.
    #[error("node '{0}' has children and cannot redirect")]
    RedirectWithChildren(String),

    /// `then` was called on a redirecting node.
    #[error("node '{0}' redirects and cannot take children")]
    ChildOnRedirected(String),

    /// A builder option that does not apply to the node's kind.
    #[error("option '{option}' does not apply to node '{node}'")]
    InvalidOption { node: String, option: &'static str },

    /// Only literal nodes can be registered as command roots.
    #[error("command root '{0}' is not a literal node")]
    NotALiteralRoot(String),
}

/// Result type for node construction.
pub type NodeResult<T> = Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_text() {
        let err = CommandError::NotFound {
            hint: hint("foo qux"),
        };
        assert_eq!(err.to_string(), "Unknown command: foo qux<--");
        assert_eq!(err.hint(), "foo qux<--");
        assert!(err.is_not_found());

        let err = ParseFailure::out_of_range("Value out of range [1, 10]", 2)
            .into_command_error(hint("give 11"));
        assert_eq!(
            err.to_string(),
            "Number out of range: Value out of range [1, 10]: give 11<--"
        );
        assert!(err.is_syntax_error());
    }
}
