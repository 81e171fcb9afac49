use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Password is required for encrypted backup")]
    PasswordRequired,
    #[error("Invalid keybag: {0}")]
    KeybagFormat(String),
    #[error("Missing key material: {0}")]
    MissingKeyMaterial(String),
    #[error("Unknown protection class: {0}")]
    UnknownProtectionClass(u32),
    #[error("Missing entry: {0}")]
    MissingEntry(String),
    #[error("Corrupted entry: {0}")]
    CorruptedEntry(String),
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Invalid product version: {0}")]
    InvalidVersion(String),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    PlistError(#[from] plist::Error),
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),
}

/// Payload-free discriminant of [`Error`], for callers that only need to
/// branch on what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PasswordRequired,
    KeybagFormat,
    MissingKeyMaterial,
    UnknownProtectionClass,
    MissingEntry,
    CorruptedEntry,
    NotADirectory,
    InvalidFormat,
    InvalidVersion,
    Io,
    Plist,
    Sqlite,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match *self {
            Error::PasswordRequired => ErrorKind::PasswordRequired,
            Error::KeybagFormat(_) => ErrorKind::KeybagFormat,
            Error::MissingKeyMaterial(_) => ErrorKind::MissingKeyMaterial,
            Error::UnknownProtectionClass(_) => ErrorKind::UnknownProtectionClass,
            Error::MissingEntry(_) => ErrorKind::MissingEntry,
            Error::CorruptedEntry(_) => ErrorKind::CorruptedEntry,
            Error::NotADirectory(_) => ErrorKind::NotADirectory,
            Error::InvalidFormat(_) => ErrorKind::InvalidFormat,
            Error::InvalidVersion(_) => ErrorKind::InvalidVersion,
            Error::IoError(_) => ErrorKind::Io,
            Error::PlistError(_) => ErrorKind::Plist,
            Error::SqliteError(_) => ErrorKind::Sqlite,
        }
    }

    /// Errors scoped to a single entry; bulk extraction may skip past these
    /// in lenient mode.
    pub fn is_entry_local(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MissingEntry | ErrorKind::CorruptedEntry | ErrorKind::UnknownProtectionClass
        )
    }
}

impl std::convert::From<aes::cipher::block_padding::UnpadError> for Error {
    fn from(_: aes::cipher::block_padding::UnpadError) -> Self {
        Error::CorruptedEntry("invalid PKCS7 padding".to_string())
    }
}

impl std::convert::From<std::string::FromUtf8Error> for Error {
    fn from(error: std::string::FromUtf8Error) -> Error {
        Error::CorruptedEntry(format!("invalid UTF-8: {error}"))
    }
}
