//! *cdar* archive encoder
//!
//! This crate implements the encoder of the *cdar* (content-defined
//! archive) format, a file archive format designed for efficient
//! deduplication. The encoder turns a filesystem subtree, a single regular
//! file or a block device into a deterministic stream of framed records,
//! pulled by the caller one record (or one payload chunk) at a time.
//!
//! A directory archive contains items in the following order:
//!  * HELLO              -- format uuid and the encoder's feature flags
//!  * ENTRY              -- stat() data and the entry name of the first
//!    directory entry (strictly ordered by name!)
//!   * PAYLOAD           -- header followed by raw file contents, if the
//!     entry is a regular file
//!   * SYMLINK           -- link target, if it is one
//!   * DEVICE            -- device major/minor, if it is a block/char device
//!   * <archive>         -- a nested directory serialization, following the
//!     exact same format, if the entry is a directory
//!  * ENTRY              -- the second directory entry
//!  * ...
//!  * GOODBYE            -- terminator at the end of a directory
//!
//! Single-file and block-device archives consist of the raw payload bytes
//! only. All integers are little endian; names and symlink targets are
//! NUL-terminated.

pub mod encoder;
pub mod error;
pub mod flags;
pub mod format_definition;

pub use encoder::{write_archive, Encoder, Status};
pub use error::EncodeError;
