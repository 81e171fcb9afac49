use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    BackupError(ibackup::Error),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
    CliInputError(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackupError(err) => write!(f, "Backup error: {}", err),
            Error::IoError(err) => write!(f, "IO error: {}", err),
            Error::JsonError(err) => write!(f, "JSON error: {}", err),
            Error::CliInputError(msg) => write!(f, "CLI input error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BackupError(err) => Some(err),
            Error::IoError(err) => Some(err),
            Error::JsonError(err) => Some(err),
            Error::CliInputError(_) => None,
        }
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::IoError(error)
    }
}

impl std::convert::From<ibackup::Error> for Error {
    fn from(error: ibackup::Error) -> Error {
        Error::BackupError(error)
    }
}

impl std::convert::From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Error {
        Error::JsonError(error)
    }
}
