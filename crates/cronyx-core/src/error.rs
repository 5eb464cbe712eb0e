//! Error types for the binder core.
//!
//! Every registry, binder and control operation reports failures through
//! [`BinderError`]. The variants form a closed taxonomy so that thin front ends
//! (the CLI, an ioctl shim) can map them without string matching:
//!
//! - **`NotFound`**: unknown id, name, alias or minor; ambiguous dotted suffix.
//! - **`AlreadyExists`**: duplicate handle, name, alias, protocol or minor.
//! - **`Busy`**: live references, refused detach, open device file, an item
//!   mid-transition, or a parameter locked by the bound protocol.
//! - **`InvalidArgument`**: malformed parameter, out-of-range value, name or
//!   depth overflow.
//! - **`Unsupported`**: the item kind, protocol or hardware does not implement
//!   the operation.
//! - **`ResourceExhausted`**: no free minor numbers, deferred queue full.
//! - **`PermissionDenied`**: a mutating call from a read-only session.
//!
//! Errors are returned synchronously and never retried by the core.

use thiserror::Error;

/// Convenience alias for results using the binder error type.
pub type BinderResult<T> = std::result::Result<T, BinderError>;

/// Discriminant of a [`BinderError`], cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`BinderError::NotFound`].
    NotFound,
    /// See [`BinderError::AlreadyExists`].
    AlreadyExists,
    /// See [`BinderError::Busy`].
    Busy,
    /// See [`BinderError::InvalidArgument`].
    InvalidArgument,
    /// See [`BinderError::Unsupported`].
    Unsupported,
    /// See [`BinderError::ResourceExhausted`].
    ResourceExhausted,
    /// See [`BinderError::PermissionDenied`].
    PermissionDenied,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Busy => "busy",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::PermissionDenied => "permission_denied",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type of the binder core.
///
/// Each variant carries a short context string naming the object involved,
/// e.g. `BinderError::NotFound("item 7".into())`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BinderError {
    /// Unknown id/name/alias/minor, or an ambiguous suffix lookup.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate id, name, alias, protocol or handle.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The target has live references or is in transition.
    ///
    /// Returned when a protocol refuses to detach, when a device file is still
    /// open, or when a parameter is locked by the bound protocol. Callers may
    /// retry once the competing holder has gone away.
    #[error("Resource busy: {0}")]
    Busy(String),

    /// Malformed or out-of-range argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not implemented by this item kind, protocol or hardware.
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// A bounded table or queue is full.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Privileged operation attempted without authorization.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl BinderError {
    /// Returns the taxonomy discriminant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BinderError::NotFound(_) => ErrorKind::NotFound,
            BinderError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            BinderError::Busy(_) => ErrorKind::Busy,
            BinderError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            BinderError::Unsupported(_) => ErrorKind::Unsupported,
            BinderError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            BinderError::PermissionDenied(_) => ErrorKind::PermissionDenied,
        }
    }

    /// Conventional negative errno value for ioctl-style front ends.
    pub fn errno(&self) -> i32 {
        match self.kind() {
            ErrorKind::NotFound => -2,           // ENOENT
            ErrorKind::AlreadyExists => -17,     // EEXIST
            ErrorKind::Busy => -16,              // EBUSY
            ErrorKind::InvalidArgument => -22,   // EINVAL
            ErrorKind::Unsupported => -95,       // EOPNOTSUPP
            ErrorKind::ResourceExhausted => -28, // ENOSPC
            ErrorKind::PermissionDenied => -1,   // EPERM
        }
    }

    /// Whether the caller may reasonably retry after the competing holder
    /// has released the resource.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Busy | ErrorKind::ResourceExhausted
        )
    }
}

/// Errors raised while loading [`crate::config::CoreConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Parse or type error from the layered provider stack.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Semantic validation failed after parsing.
    #[error("Configuration validation failed: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}
