use nix::errno::Errno;

/// Errors reported by the encoder.
///
/// Syscall failures are passed through as [`EncodeError::Sys`] carrying the
/// OS errno; everything else names the protocol or usage violation.
#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("base file descriptor already set")]
    Busy,
    #[error("encoder has no base node")]
    NoBaseNode,
    #[error("unsupported file type (mode 0o{0:o})")]
    UnsupportedFileType(libc::mode_t),
    #[error("unsupported feature flags (0x{0:x})")]
    UnsupportedFlags(u64),
    #[error("feature disabled by archive flags: {0}")]
    FeatureNotEnabled(&'static str),
    #[error("uid/gid {0} does not fit into 16 bits")]
    UidGidTooLarge(u64),
    #[error("uid/gid {0} is reserved")]
    ReservedUidGid(u64),
    #[error("directory tree too deep")]
    TooDeep,
    #[error("too many directory entries")]
    TooManyEntries,
    #[error("no record staged in the current state")]
    NoDataStaged,
    #[error("not a directory")]
    NotADirectory,
    #[error("current node has no payload")]
    NoPayload,
    #[error("got strange mtime ({0}) from fstat")]
    BadMtime(i64),
    #[error("short read on regular file")]
    ShortRead,
    #[error("encoder state does not allow this operation")]
    InvalidState,
    #[error("{0}")]
    Sys(#[from] Errno),
}
