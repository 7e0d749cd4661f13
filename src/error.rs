//! The kernel-wide error taxonomy (§7).
//!
//! Positive codes are VFS-origin, negative codes are process/stream-origin,
//! zero is success. The mapping from a numeric code back to a human string
//! lives in exactly one place — [`describe`] — so native errors never leak
//! past the boundary where they're translated into this closed set.

use thiserror::Error;

/// VFS-origin errors. Positive codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VfsError {
    #[error("file exists")]
    Exists,
    #[error("no such file or directory")]
    NoSuchFile,
    #[error("operation not permitted")]
    PermissionDenied,
    #[error("bad file descriptor")]
    BadDescriptor,
    #[error("protected system file")]
    SystemFileReadonly,
    #[error("is a directory")]
    IsADirectory,
    #[error("not a directory")]
    NotADirectory,
    #[error("I/O error")]
    IoError,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("resource temporarily unavailable")]
    ResourceUnavailable,
    #[error("directory not empty")]
    DirectoryNotEmpty,
}

impl VfsError {
    /// The wire code for this error (always positive, matching §7/§8).
    pub const fn code(self) -> i32 {
        match self {
            VfsError::Exists => 1,
            VfsError::NoSuchFile => 2,
            VfsError::PermissionDenied => 3,
            VfsError::BadDescriptor => 4,
            VfsError::SystemFileReadonly => 5,
            VfsError::IsADirectory => 6,
            VfsError::NotADirectory => 7,
            VfsError::IoError => 8,
            VfsError::InvalidArgument => 9,
            VfsError::ResourceUnavailable => 10,
            VfsError::DirectoryNotEmpty => 11,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => VfsError::Exists,
            2 => VfsError::NoSuchFile,
            3 => VfsError::PermissionDenied,
            4 => VfsError::BadDescriptor,
            5 => VfsError::SystemFileReadonly,
            6 => VfsError::IsADirectory,
            7 => VfsError::NotADirectory,
            8 => VfsError::IoError,
            9 => VfsError::InvalidArgument,
            10 => VfsError::ResourceUnavailable,
            11 => VfsError::DirectoryNotEmpty,
            _ => return None,
        })
    }
}

/// Process/stream-origin errors. Negative codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProcError {
    #[error("no registered worker")]
    NoRegisteredWorker,
    #[error("no such process")]
    NoSuchProcess,
    #[error("waitee is gone")]
    WaiteeGone,
    #[error("no such state")]
    NoSuchState,
    #[error("needs a tty")]
    NeedsPty,
    #[error("no worker for register")]
    NoWorkerForRegister,
    #[error("no free pid")]
    NoFreePid,
    #[error("external error")]
    ExternalError,
    #[error("unknown error")]
    Unknown,
    #[error("stdout is not piped")]
    StdoutNotPiped,
    #[error("stdin is not piped")]
    StdinNotPiped,
    #[error("stdin is empty")]
    StdinEmpty,
    #[error("failed to write to stdout")]
    StdoutWriteFailed,
    #[error("failed to read stdin")]
    StdinReadFailed,
    #[error("process already started")]
    AlreadyStarted,
    #[error("no such program")]
    NoSuchProgram,
    #[error("bad argv")]
    BadArgv,
    #[error("out of memory")]
    OutOfMemory,
    #[error("end of stream")]
    EndOfStream,
    #[error("internal error")]
    InternalError,
}

impl ProcError {
    /// The wire code for this error (always negative, matching §7/§8).
    pub const fn code(self) -> i32 {
        match self {
            ProcError::NoRegisteredWorker => -1,
            ProcError::NoSuchProcess => -2,
            ProcError::WaiteeGone => -3,
            ProcError::NoSuchState => -4,
            ProcError::NeedsPty => -5,
            ProcError::NoWorkerForRegister => -6,
            ProcError::NoFreePid => -7,
            ProcError::ExternalError => -8,
            ProcError::Unknown => -9,
            ProcError::StdoutNotPiped => -10,
            ProcError::StdinNotPiped => -11,
            ProcError::StdinEmpty => -12,
            ProcError::StdoutWriteFailed => -13,
            ProcError::StdinReadFailed => -14,
            ProcError::AlreadyStarted => -15,
            ProcError::NoSuchProgram => -16,
            ProcError::BadArgv => -17,
            ProcError::OutOfMemory => -18,
            ProcError::EndOfStream => -19,
            ProcError::InternalError => -20,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => ProcError::NoRegisteredWorker,
            -2 => ProcError::NoSuchProcess,
            -3 => ProcError::WaiteeGone,
            -4 => ProcError::NoSuchState,
            -5 => ProcError::NeedsPty,
            -6 => ProcError::NoWorkerForRegister,
            -7 => ProcError::NoFreePid,
            -8 => ProcError::ExternalError,
            -9 => ProcError::Unknown,
            -10 => ProcError::StdoutNotPiped,
            -11 => ProcError::StdinNotPiped,
            -12 => ProcError::StdinEmpty,
            -13 => ProcError::StdoutWriteFailed,
            -14 => ProcError::StdinReadFailed,
            -15 => ProcError::AlreadyStarted,
            -16 => ProcError::NoSuchProgram,
            -17 => ProcError::BadArgv,
            -18 => ProcError::OutOfMemory,
            -19 => ProcError::EndOfStream,
            -20 => ProcError::InternalError,
            _ => return None,
        })
    }
}

/// Render any wire code (VFS-origin, process-origin, or unrecognised) into
/// the human string a guest's `errors.as_string` would see. The table is
/// closed: an unknown code renders as `"Unknown error: <n>"`, never a panic.
pub fn describe(code: i32) -> String {
    if code == 0 {
        return "success".to_string();
    }
    if code > 0 {
        if let Some(e) = VfsError::from_code(code) {
            return e.to_string();
        }
    } else if let Some(e) = ProcError::from_code(code) {
        return e.to_string();
    }
    format!("Unknown error: {code}")
}
