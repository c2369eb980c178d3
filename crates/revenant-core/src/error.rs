use std::fmt;
use std::io;

/// Errors surfaced by the recovery pipeline.
///
/// `AccessDenied`, `NotFound`, `UnsupportedFilesystem` and `Parse` are fatal
/// and terminate the run. The remaining variants are local: the driver logs
/// them and continues with the next sector or candidate.
#[derive(Debug)]
pub enum RecoveryError {
    /// Opening the volume requires elevated privileges.
    AccessDenied(String),
    /// The drive path does not resolve to a volume or image file.
    NotFound(String),
    /// The volume carries a label other than FAT32, exFAT or NTFS.
    UnsupportedFilesystem(String),
    /// Boot sector or MFT record failed structural validation.
    Parse(String),
    /// Transient sector-level read failure.
    Io(io::Error),
    /// A discovered candidate failed validation and was skipped.
    InvalidCandidate(String),
    /// Output file creation or write failure.
    Write(String),
    /// A size did not fit the narrower representation a code path requires.
    Overflow(String),
}

impl fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryError::AccessDenied(msg) => write!(f, "access denied: {}", msg),
            RecoveryError::NotFound(msg) => write!(f, "not found: {}", msg),
            RecoveryError::UnsupportedFilesystem(label) => {
                write!(f, "unsupported filesystem: {}", label)
            }
            RecoveryError::Parse(msg) => write!(f, "parse error: {}", msg),
            RecoveryError::Io(e) => write!(f, "I/O error: {}", e),
            RecoveryError::InvalidCandidate(msg) => write!(f, "invalid candidate: {}", msg),
            RecoveryError::Write(msg) => write!(f, "write error: {}", msg),
            RecoveryError::Overflow(msg) => write!(f, "overflow: {}", msg),
        }
    }
}

impl std::error::Error for RecoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecoveryError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RecoveryError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => {
                RecoveryError::AccessDenied("volume must be opened with elevated privileges".into())
            }
            io::ErrorKind::NotFound => RecoveryError::NotFound("no such volume or image".into()),
            _ => RecoveryError::Io(error),
        }
    }
}
