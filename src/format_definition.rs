//! *cdar* binary format definition
//!
//! Please note that all values are stored in little endian ordering.
//!
//! The archive contains a list of items. Each item starts with a
//! `CdarFormatHeader`, followed by the item data.

use endian_trait::Endian;

pub const CDAR_FORMAT_HELLO: u64 = 0x3bf356d31f84b0e5;
pub const CDAR_FORMAT_ENTRY: u64 = 0x1396fabcea5bbb51;
pub const CDAR_FORMAT_SYMLINK: u64 = 0x664a6fb6830e0d6c;
pub const CDAR_FORMAT_DEVICE: u64 = 0xac3dace369dfe643;
pub const CDAR_FORMAT_PAYLOAD: u64 = 0x8b9e1d93d6dcffc9;
pub const CDAR_FORMAT_GOODBYE: u64 = 0xdfd35c5e8327c403;

/// Second half of the format UUID, repeated in every HELLO item.
pub const CDAR_FORMAT_HELLO_UUID_PART2: u64 = 0xb84d0e7299fb4aa2;

#[derive(Debug, Endian)]
#[repr(C)]
pub struct CdarFormatHeader {
    /// The item type (see `CDAR_FORMAT_` constants).
    pub htype: u64,
    /// The size of the item, including the size of `CdarFormatHeader`.
    pub size: u64,
}

#[derive(Debug, Endian)]
#[repr(C)]
pub struct CdarFormatHello {
    pub header: CdarFormatHeader,
    pub uuid_part2: u64,
    pub feature_flags: u64,
}

/// General stat() data of one directory entry. The header size also
/// covers the NUL-terminated file name directly following this struct.
#[derive(Debug, Endian)]
#[repr(C)]
pub struct CdarFormatEntry {
    pub mode: u64,
    pub flags: u64,
    pub uid: u64,
    pub gid: u64,
    pub mtime: u64,
}

#[derive(Debug, Endian)]
#[repr(C)]
pub struct CdarFormatDevice {
    pub header: CdarFormatHeader,
    pub major: u64,
    pub minor: u64,
}
