//! Binding Error Types
//!
//! This module provides the error type shared by every layer of the binding.
//!
//! ## Error Categories
//!
//! - Conversion failures (a script value has the wrong shape for a native type)
//! - Missing members on bound objects
//! - Use of an object after it was destroyed
//! - Argument count/type mismatches at a call boundary
//! - Host-level loading failures (missing or unreadable script files)
//!
//! Binding errors raised inside Lua callbacks travel through Lua as external
//! errors, so scripts can catch them with `pcall`. When they reach the host
//! again, [`BindError::from`] digs the original error back out of the
//! callback chain.

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Result type for binding operations
pub type BindResult<T> = Result<T, BindError>;

/// Which side of a member access failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberAccess {
    /// Property read or method lookup
    Read,
    /// Property write
    Write,
}

impl fmt::Display for MemberAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberAccess::Read => write!(f, "read"),
            MemberAccess::Write => write!(f, "write"),
        }
    }
}

/// Binding error types
#[derive(Error, Debug, Clone)]
pub enum BindError {
    /// A script value could not be converted to the requested native type
    #[error("conversion failed: expected {expected}, got {actual}{}", format_reason(.reason))]
    Conversion {
        /// Native-side description of the expected value
        expected: String,
        /// Script type name that was received
        actual: String,
        /// Extra detail, such as the missing table field
        reason: Option<String>,
    },

    /// No push or store handler is registered for a native type
    #[error("no conversion registered for type {type_name}")]
    Unregistered {
        /// Rust type name
        type_name: &'static str,
    },

    /// Property or method name not found on a bound object
    #[error("missing property: cannot {access} '{member}' on {class}")]
    MissingMember {
        /// Bound class name
        class: String,
        /// Requested member name
        member: String,
        /// Whether the failed access was a read or a write
        access: MemberAccess,
    },

    /// Access on an object whose teardown already ran
    #[error("object destroyed: {class} can no longer be accessed")]
    Destroyed {
        /// Bound class name
        class: String,
    },

    /// Argument count or type mismatch at a call boundary
    #[error("bad argument #{position} to '{function}': {reason}")]
    Dispatch {
        /// Function or method name
        function: String,
        /// 1-based argument position, `self` excluded (0 stands for `self`)
        position: usize,
        /// What went wrong
        reason: String,
    },

    /// A script file or directory could not be loaded
    #[error("cannot load {path}: {reason}")]
    HostLoad {
        /// Offending path
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// A chunk that was expected to produce a value returned nothing
    #[error("{chunk}: the invoked callable did not return a value")]
    NoReturnValue {
        /// Chunk name
        chunk: String,
    },

    /// Invalid binding declaration
    #[error("binding setup failed: {reason}")]
    Setup {
        /// Description of the problem
        reason: String,
    },

    /// Any other error raised by the Lua runtime
    #[error("script error: {0}")]
    Script(mlua::Error),
}

fn format_reason(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(" ({})", reason),
        None => String::new(),
    }
}

impl BindError {
    /// Create a conversion error
    pub fn conversion(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        BindError::Conversion {
            expected: expected.into(),
            actual: actual.into(),
            reason: None,
        }
    }

    /// Create a conversion error with extra detail
    pub fn conversion_with(
        expected: impl Into<String>,
        actual: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        BindError::Conversion {
            expected: expected.into(),
            actual: actual.into(),
            reason: Some(reason.into()),
        }
    }

    /// Create a missing member error
    pub fn missing_member(
        class: impl Into<String>,
        member: impl Into<String>,
        access: MemberAccess,
    ) -> Self {
        BindError::MissingMember {
            class: class.into(),
            member: member.into(),
            access,
        }
    }

    /// Create a use-after-destroy error
    pub fn destroyed(class: impl Into<String>) -> Self {
        BindError::Destroyed {
            class: class.into(),
        }
    }

    /// Create a dispatch error
    pub fn dispatch(function: impl Into<String>, position: usize, reason: impl Into<String>) -> Self {
        BindError::Dispatch {
            function: function.into(),
            position,
            reason: reason.into(),
        }
    }

    /// Create a host loading error
    pub fn host_load(path: &Path, reason: impl fmt::Display) -> Self {
        BindError::HostLoad {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a setup error
    pub fn setup(reason: impl Into<String>) -> Self {
        BindError::Setup {
            reason: reason.into(),
        }
    }

    /// Returns true for errors scripts can observe and recover from with `pcall`.
    ///
    /// Host-level failures (loading) and setup failures never reach scripts.
    pub fn is_script_level(&self) -> bool {
        !matches!(self, BindError::HostLoad { .. } | BindError::Setup { .. })
    }

    /// Re-attribute a conversion failure to an argument position.
    pub(crate) fn at_argument(self, function: &str, position: usize) -> Self {
        match self {
            BindError::Conversion { .. } | BindError::Unregistered { .. } => {
                BindError::dispatch(function, position, self.to_string())
            }
            other => other,
        }
    }
}

/// Find a binding error wrapped somewhere inside a Lua error chain.
fn find_bind_error(err: &mlua::Error) -> Option<&BindError> {
    match err {
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<BindError>(),
        mlua::Error::CallbackError { cause, .. } => find_bind_error(cause),
        mlua::Error::WithContext { cause, .. } => find_bind_error(cause),
        _ => None,
    }
}

impl From<mlua::Error> for BindError {
    fn from(err: mlua::Error) -> Self {
        match find_bind_error(&err) {
            Some(inner) => inner.clone(),
            None => BindError::Script(err),
        }
    }
}

impl From<BindError> for mlua::Error {
    fn from(err: BindError) -> Self {
        match err {
            BindError::Script(inner) => inner,
            other => mlua::Error::external(other),
        }
    }
}
