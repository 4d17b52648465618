//! The closed return-code enum handed back across the public API, and the
//! internal error type that maps onto it.
//!
//! Mirrors the hand-rolled error style of the teacher's discovery server
//! (`ServerError`/`ConnectionError`/`ConfigError`: a plain enum with a manual
//! `Display` impl and a blanket `std::error::Error` impl) rather than a
//! derive-macro error crate.

use std::fmt;

/// Closed enumeration of everything a Node Facade operation can return.
///
/// This enum is intentionally closed: adding a variant is a breaking change,
/// the same way the original API's return-code enumeration is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GravityReturnCode {
    Success,
    Failure,
    Interrupted,
    LinkError,
    NoServiceDirectory,
    NoServiceProvider,
    NoSuchDataProduct,
    RegistrationConflict,
    Duplicate,
    AlreadyInitialized,
    AlreadyStarted,
}

impl GravityReturnCode {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for GravityReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Interrupted => "INTERRUPTED",
            Self::LinkError => "LINK_ERROR",
            Self::NoServiceDirectory => "NO_SERVICE_DIRECTORY",
            Self::NoServiceProvider => "NO_SERVICE_PROVIDER",
            Self::NoSuchDataProduct => "NO_SUCH_DATA_PRODUCT",
            Self::RegistrationConflict => "REGISTRATION_CONFLICT",
            Self::Duplicate => "DUPLICATE",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::AlreadyStarted => "ALREADY_STARTED",
        };
        f.write_str(s)
    }
}

/// Internal error type. Plumbing code uses `Result<T, GravityError>` with
/// `?`; the facade maps the final error to a `GravityReturnCode` via
/// [`GravityError::code`].
#[derive(Debug)]
pub enum GravityError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    /// The directory (or a service provider) did not answer within the
    /// retry budget.
    Timeout,
    /// The poll loop was interrupted by a trapped signal.
    Interrupted,
    /// A local bind failed — another node already owns that URL.
    BindConflict(String),
    /// The peer's reply could not be parsed into the expected message.
    BadReply(String),
    /// The directory reported a specific wire-level failure.
    Directory(crate::protocol::DirectoryReturnCode),
    NoSuchDataProduct(String),
    RegistrationConflict(String),
    AlreadyInitialized,
    AlreadyStarted,
}

impl GravityError {
    /// Map this error onto the closed facade-level return code.
    pub fn code(&self) -> GravityReturnCode {
        use crate::protocol::DirectoryReturnCode as D;
        match self {
            Self::Io(_) => GravityReturnCode::Failure,
            Self::Serialization(_) => GravityReturnCode::LinkError,
            Self::Timeout => GravityReturnCode::NoServiceDirectory,
            Self::Interrupted => GravityReturnCode::Interrupted,
            Self::BindConflict(_) => GravityReturnCode::RegistrationConflict,
            Self::BadReply(_) => GravityReturnCode::LinkError,
            Self::Directory(D::Success) => GravityReturnCode::Success,
            Self::Directory(D::RegistrationConflict) => GravityReturnCode::RegistrationConflict,
            Self::Directory(D::DuplicateRegistration) => GravityReturnCode::Duplicate,
            Self::Directory(D::NotRegistered) => GravityReturnCode::RegistrationConflict,
            Self::NoSuchDataProduct(_) => GravityReturnCode::NoSuchDataProduct,
            Self::RegistrationConflict(_) => GravityReturnCode::RegistrationConflict,
            Self::AlreadyInitialized => GravityReturnCode::AlreadyInitialized,
            Self::AlreadyStarted => GravityReturnCode::AlreadyStarted,
        }
    }
}

impl fmt::Display for GravityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Serialization(e) => write!(f, "serialization error: {e}"),
            Self::Timeout => write!(f, "timed out waiting for a reply"),
            Self::Interrupted => write!(f, "interrupted by signal"),
            Self::BindConflict(url) => write!(f, "bind conflict on {url}"),
            Self::BadReply(what) => write!(f, "malformed reply: {what}"),
            Self::Directory(code) => write!(f, "directory returned {code:?}"),
            Self::NoSuchDataProduct(id) => write!(f, "no such data product: {id}"),
            Self::RegistrationConflict(id) => write!(f, "registration conflict: {id}"),
            Self::AlreadyInitialized => write!(f, "node already initialized"),
            Self::AlreadyStarted => write!(f, "heartbeat already started"),
        }
    }
}

impl std::error::Error for GravityError {}

impl From<std::io::Error> for GravityError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for GravityError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

pub type GravityResult<T> = Result<T, GravityError>;
