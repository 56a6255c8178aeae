//! *cdar* format encoder.
//!
//! The encoder walks a filesystem subtree depth first and produces the
//! archive byte stream through a pull interface: [`Encoder::step`] advances
//! the state machine by exactly one record (or one payload chunk), and
//! [`Encoder::get_data`] hands out the staged bytes. The staged bytes are
//! re-yielded unchanged until the next `step` acknowledges them, so the
//! caller fully controls progress.

use std::ffi::{CStr, CString, OsStr};
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

use anyhow::Error;
use endian_trait::Endian;
use nix::dir;
use nix::dir::Dir;
use nix::errno::Errno;
use nix::fcntl;
use nix::fcntl::{AtFlags, OFlag};
use nix::sys::stat;
use nix::sys::stat::{FileStat, Mode};
use nix::unistd;

use crate::error::EncodeError;
use crate::flags;
use crate::format_definition::*;

/// Maximum depth of the traversal stack.
pub const NODES_MAX: usize = 128;

/// The dirent list of a directory is kept in memory while the directory is
/// being serialized, so we restrict the number of allowed entries to limit
/// maximum memory usage.
pub const MAX_DIRECTORY_ENTRIES: usize = 256 * 1024;

/// Size of one staged payload chunk.
const PAYLOAD_CHUNK_SIZE: usize = 64 * 1024;

// /usr/include/linux/fs.h: #define BLKGETSIZE _IO(0x12,96)
// read the 512-byte sector count of a block device
nix::ioctl_read_bad!(read_device_sectors, 0x1260, libc::c_ulong);

#[inline(always)]
fn is_directory(stat: &FileStat) -> bool {
    (stat.st_mode & libc::S_IFMT) == libc::S_IFDIR
}

#[inline(always)]
fn is_symlink(stat: &FileStat) -> bool {
    (stat.st_mode & libc::S_IFMT) == libc::S_IFLNK
}

#[inline(always)]
fn is_reg_file(stat: &FileStat) -> bool {
    (stat.st_mode & libc::S_IFMT) == libc::S_IFREG
}

#[inline(always)]
fn is_block_dev(stat: &FileStat) -> bool {
    (stat.st_mode & libc::S_IFMT) == libc::S_IFBLK
}

#[inline(always)]
fn is_char_dev(stat: &FileStat) -> bool {
    (stat.st_mode & libc::S_IFMT) == libc::S_IFCHR
}

#[inline(always)]
fn is_fifo(stat: &FileStat) -> bool {
    (stat.st_mode & libc::S_IFMT) == libc::S_IFIFO
}

#[inline(always)]
fn is_socket(stat: &FileStat) -> bool {
    (stat.st_mode & libc::S_IFMT) == libc::S_IFSOCK
}

/// Result of a successful [`Encoder::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The archive is complete. Further steps keep returning this.
    Finished,
    /// A record or payload chunk is available via [`Encoder::get_data`].
    Data,
    /// The traversal advanced to a new child; `current_path` and
    /// `current_mode` now reflect it. Its ENTRY record is available via
    /// [`Encoder::get_data`].
    NextFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncoderState {
    Init,
    Hello,
    Entry,
    PostChild,
    Goodbye,
    Eof,
}

#[derive(Clone)]
struct Dirent {
    name: CString,
    ftype: Option<dir::Type>,
}

/// One frame of the traversal stack.
#[derive(Default)]
struct EncoderNode {
    fd: Option<RawFd>,
    stat: Option<FileStat>,

    // for directories
    dirents: Option<Vec<Dirent>>,
    dirent_idx: usize,

    // for symlinks
    symlink_target: Option<CString>,

    // for block devices
    device_size: Option<u64>,
}

impl EncoderNode {
    fn current_dirent(&self) -> Option<&Dirent> {
        self.dirents.as_ref()?.get(self.dirent_idx)
    }

    /// Read and sort the directory contents. Idempotent.
    fn read_dirents(&mut self) -> Result<(), EncodeError> {
        if self.dirents.is_some() {
            return Ok(());
        }
        let stat = self.stat.ok_or(EncodeError::InvalidState)?;
        if !is_directory(&stat) {
            return Err(EncodeError::NotADirectory);
        }
        let fd = self.fd.ok_or(EncodeError::InvalidState)?;

        let mut dir = Dir::openat(fd, ".", OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty())?;

        let mut dirents = Vec::new();
        for entry in dir.iter() {
            let entry = entry?;
            let name = entry.file_name();

            let bytes = name.to_bytes_with_nul();
            let len = bytes.len();
            if len == 2 && bytes[0] == b'.' && bytes[1] == 0u8 {
                continue;
            }
            if len == 3 && bytes[0] == b'.' && bytes[1] == b'.' && bytes[2] == 0u8 {
                continue;
            }

            dirents.push(Dirent {
                name: name.to_owned(),
                ftype: entry.file_type(),
            });
            if dirents.len() > MAX_DIRECTORY_ENTRIES {
                return Err(EncodeError::TooManyEntries);
            }
        }

        // byte-wise name order, explicitly not locale collation
        dirents.sort_unstable_by(|a, b| a.name.cmp(&b.name));

        self.dirents = Some(dirents);
        self.dirent_idx = 0;

        Ok(())
    }

    /// Query the block device size. Idempotent.
    fn read_device_size(&mut self) -> Result<(), EncodeError> {
        if self.device_size.is_some() {
            return Ok(());
        }
        let stat = self.stat.ok_or(EncodeError::InvalidState)?;
        if !is_block_dev(&stat) {
            return Err(EncodeError::NoPayload);
        }
        let fd = self.fd.ok_or(EncodeError::InvalidState)?;

        let mut sectors: libc::c_ulong = 0;
        unsafe { read_device_sectors(fd, &mut sectors) }?;

        self.device_size = Some((sectors as u64) * 512);
        Ok(())
    }
}

impl Drop for EncoderNode {
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            // the reserved stdio descriptors are never closed
            if fd >= 3 {
                let _ = unistd::close(fd);
            }
        }
    }
}

/// Resolve a symlink relative to its parent directory descriptor.
///
/// The buffer is doubled until the returned length is strictly below its
/// capacity, so the target can never be silently truncated.
fn read_symlink_target(parent_fd: RawFd, name: &CStr) -> Result<CString, EncodeError> {
    let mut capacity = 16usize;
    loop {
        let mut buffer = vec![0u8; capacity];
        let res = unsafe {
            libc::readlinkat(
                parent_fd,
                name.as_ptr(),
                buffer.as_mut_ptr() as *mut libc::c_char,
                capacity,
            )
        };
        let len = Errno::result(res)? as usize;
        if len < capacity {
            buffer.truncate(len);
            return CString::new(buffer).map_err(|_| EncodeError::Sys(Errno::EINVAL));
        }
        capacity *= 2;
    }
}

fn encode_mtime(granularity: u64, secs: i64, nsecs: i64) -> Result<u64, EncodeError> {
    let mtime = secs * 1_000_000_000 + nsecs;
    if mtime < 0 {
        return Err(EncodeError::BadMtime(mtime));
    }
    if granularity == 0 {
        // no time feature bit, times are not preserved
        return Ok(0);
    }
    Ok(((mtime as u64) / granularity) * granularity)
}

fn encode_entry_mode(feature_flags: u64, st_mode: libc::mode_t) -> u64 {
    if (st_mode & libc::S_IFMT) == libc::S_IFLNK {
        // links carry no useful permission bits
        return (libc::S_IFLNK | 0o777) as u64;
    }
    if (feature_flags & flags::WITH_PERMISSIONS) != 0 {
        (st_mode & (libc::S_IFMT | 0o7777)) as u64
    } else if (feature_flags & flags::WITH_READONLY) != 0 {
        let writable = (st_mode & 0o222) != 0;
        let perm = if (st_mode & libc::S_IFMT) == libc::S_IFDIR {
            if writable { 0o777 } else { 0o555 }
        } else {
            if writable { 0o666 } else { 0o444 }
        };
        ((st_mode & libc::S_IFMT) | perm) as u64
    } else {
        (st_mode & libc::S_IFMT) as u64
    }
}

/// Streaming archive encoder.
///
/// Drive it with [`step`](Encoder::step) and pull the produced bytes with
/// [`get_data`](Encoder::get_data). After a syscall failure the encoder is
/// in an undefined but safe state; drop it and start over.
pub struct Encoder {
    state: EncoderState,

    feature_flags: u64,
    time_granularity: u64,

    nodes: Vec<EncoderNode>,
    node_idx: usize,

    buffer: Vec<u8>,

    archive_offset: u64,
    payload_offset: u64,
    step_size: u64,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            state: EncoderState::Init,
            feature_flags: flags::DEFAULT,
            time_granularity: 1,
            nodes: Vec::new(),
            node_idx: 0,
            buffer: Vec::new(),
            archive_offset: 0,
            payload_offset: 0,
            step_size: 0,
        }
    }

    /// Set the feature flags. The word is normalized before storage and
    /// undefined bits are rejected.
    pub fn set_feature_flags(&mut self, feature_flags: u64) -> Result<(), EncodeError> {
        let (feature_flags, granularity) = flags::normalize(feature_flags)?;
        self.feature_flags = feature_flags;
        self.time_granularity = granularity;
        Ok(())
    }

    /// The canonical feature flag word.
    pub fn feature_flags(&self) -> u64 {
        self.feature_flags
    }

    /// Install the base node from a descriptor. May be called at most once;
    /// the descriptor must refer to a regular file, directory or block
    /// device and is owned by the encoder from here on.
    pub fn set_base_fd(&mut self, fd: RawFd) -> Result<(), EncodeError> {
        if !self.nodes.is_empty() {
            return Err(EncodeError::Busy);
        }

        let stat = stat::fstat(fd)?;
        if !is_reg_file(&stat) && !is_directory(&stat) && !is_block_dev(&stat) {
            return Err(EncodeError::UnsupportedFileType(stat.st_mode));
        }

        let mut node = EncoderNode::default();
        node.fd = Some(fd);
        node.stat = Some(stat);
        self.nodes.push(node);

        Ok(())
    }

    fn current_node(&self) -> Option<&EncoderNode> {
        self.nodes.get(self.node_idx)
    }

    fn current_child(&self) -> Option<&EncoderNode> {
        self.nodes.get(self.node_idx + 1)
    }

    fn current_stat(&self) -> Result<FileStat, EncodeError> {
        let node = self.current_node().ok_or(EncodeError::NoBaseNode)?;
        node.stat.ok_or(EncodeError::InvalidState)
    }

    fn forget_children(&mut self) {
        while self.nodes.len() > self.node_idx + 1 {
            self.nodes.pop();
        }
    }

    fn init_child(&mut self) -> Result<(), EncodeError> {
        self.forget_children();
        if self.nodes.len() >= NODES_MAX {
            return Err(EncodeError::TooDeep);
        }
        self.nodes.push(EncoderNode::default());
        Ok(())
    }

    fn open_child(&mut self, de: &Dirent) -> Result<(), EncodeError> {
        let parent = self.current_node().ok_or(EncodeError::NoBaseNode)?;
        let parent_stat = parent.stat.ok_or(EncodeError::InvalidState)?;
        if !is_directory(&parent_stat) {
            return Err(EncodeError::NotADirectory);
        }
        let parent_fd = parent.fd.ok_or(EncodeError::InvalidState)?;

        // the depth check happens before any I/O on the new level
        self.init_child()?;

        let mut open_flags =
            OFlag::O_RDONLY | OFlag::O_CLOEXEC | OFlag::O_NOCTTY | OFlag::O_NOFOLLOW;

        let mut prior_stat = None;
        let shall_open = match de.ftype {
            Some(dir::Type::Directory) => {
                open_flags |= OFlag::O_DIRECTORY;
                true
            }
            Some(dir::Type::File) => true,
            _ => {
                let st =
                    stat::fstatat(parent_fd, de.name.as_c_str(), AtFlags::AT_SYMLINK_NOFOLLOW)?;
                if is_directory(&st) {
                    open_flags |= OFlag::O_DIRECTORY;
                }
                let open = is_reg_file(&st) || is_directory(&st);
                prior_stat = Some(st);
                open
            }
        };

        let (child_stat, child_fd) = if shall_open {
            // O_NOFOLLOW guards against the entry having been replaced by a
            // symlink between readdir and open
            let fd = fcntl::openat(parent_fd, de.name.as_c_str(), open_flags, Mode::empty())?;
            let st = match prior_stat {
                Some(st) => st,
                None => match stat::fstat(fd) {
                    Ok(st) => st,
                    Err(err) => {
                        let _ = unistd::close(fd);
                        return Err(err.into());
                    }
                },
            };
            (st, Some(fd))
        } else {
            (prior_stat.ok_or(EncodeError::InvalidState)?, None)
        };

        let symlink_target = if is_symlink(&child_stat) {
            Some(read_symlink_target(parent_fd, de.name.as_c_str())?)
        } else {
            None
        };

        if let Some(child) = self.nodes.last_mut() {
            child.fd = child_fd;
            child.stat = Some(child_stat);
            child.symlink_target = symlink_target;
        }

        Ok(())
    }

    fn enter_child(&mut self) -> Result<(), EncodeError> {
        let child = self.current_child().ok_or(EncodeError::InvalidState)?;
        let stat = child.stat.ok_or(EncodeError::InvalidState)?;
        if !is_reg_file(&stat) && !is_directory(&stat) {
            return Err(EncodeError::UnsupportedFileType(stat.st_mode));
        }
        if child.fd.is_none() {
            return Err(EncodeError::InvalidState);
        }
        self.node_idx += 1;
        Ok(())
    }

    fn leave_child(&mut self) -> bool {
        if self.node_idx == 0 {
            return false;
        }
        self.node_idx -= 1;
        true
    }

    fn enter_state(&mut self, state: EncoderState) {
        self.state = state;
        self.buffer.clear();
        self.payload_offset = 0;
        self.step_size = 0;
    }

    fn payload_size(&mut self) -> Result<u64, EncodeError> {
        let node = self.nodes.get_mut(self.node_idx).ok_or(EncodeError::NoBaseNode)?;
        let stat = node.stat.ok_or(EncodeError::InvalidState)?;
        if is_reg_file(&stat) {
            Ok(stat.st_size as u64)
        } else if is_block_dev(&stat) {
            node.read_device_size()?;
            node.device_size.ok_or(EncodeError::InvalidState)
        } else {
            Err(EncodeError::NoPayload)
        }
    }

    /// Advance the state machine by one transition.
    ///
    /// Bytes fetched through [`get_data`](Encoder::get_data) since the last
    /// step are acknowledged first. Errors are not retried; after an error
    /// the encoder must be discarded.
    pub fn step(&mut self) -> Result<Status, EncodeError> {
        if self.state == EncoderState::Eof {
            return Ok(Status::Finished);
        }

        self.payload_offset += self.step_size;
        self.archive_offset += self.step_size;
        self.step_size = 0;

        loop {
            let stat = self.current_stat()?;

            let status = if is_reg_file(&stat) || is_block_dev(&stat) {
                self.step_leaf()?
            } else if is_directory(&stat) {
                match self.step_directory()? {
                    Some(status) => status,
                    // descended into a child, restart at the new node
                    None => continue,
                }
            } else {
                return Err(EncodeError::UnsupportedFileType(stat.st_mode));
            };

            if status != Status::Finished {
                return Ok(status);
            }

            if !self.leave_child() {
                break;
            }
            self.enter_state(EncoderState::PostChild);
        }

        self.forget_children();
        Ok(Status::Finished)
    }

    fn step_leaf(&mut self) -> Result<Status, EncodeError> {
        self.buffer.clear();

        let size = self.payload_size()?;
        if self.payload_offset >= size {
            self.enter_state(EncoderState::Eof);
            return Ok(Status::Finished);
        }

        Ok(Status::Data)
    }

    fn step_directory(&mut self) -> Result<Option<Status>, EncodeError> {
        self.nodes
            .get_mut(self.node_idx)
            .ok_or(EncodeError::NoBaseNode)?
            .read_dirents()?;

        match self.state {
            EncoderState::Init => {
                self.enter_state(EncoderState::Hello);
                Ok(Some(Status::Data))
            }
            EncoderState::Entry => {
                let child = self.current_child().ok_or(EncodeError::InvalidState)?;
                let stat = child.stat.ok_or(EncodeError::InvalidState)?;
                if is_directory(&stat) || is_reg_file(&stat) {
                    self.enter_child()?;
                    self.enter_state(EncoderState::Init);
                    return Ok(None);
                }
                // other node kinds are fully described by their ENTRY record
                self.next_sibling(true)
            }
            EncoderState::PostChild => self.next_sibling(true),
            EncoderState::Hello => self.next_sibling(false),
            EncoderState::Goodbye => {
                self.enter_state(EncoderState::Eof);
                Ok(Some(Status::Finished))
            }
            EncoderState::Eof => Ok(Some(Status::Finished)),
        }
    }

    fn next_sibling(&mut self, advance: bool) -> Result<Option<Status>, EncodeError> {
        let node = self.nodes.get_mut(self.node_idx).ok_or(EncodeError::NoBaseNode)?;
        if advance {
            node.dirent_idx += 1;
        }

        match node.current_dirent().cloned() {
            None => {
                self.enter_state(EncoderState::Goodbye);
                Ok(Some(Status::Data))
            }
            Some(de) => {
                self.open_child(&de)?;
                self.enter_state(EncoderState::Entry);
                Ok(Some(Status::NextFile))
            }
        }
    }

    fn put_item<T: Endian>(&mut self, item: T) {
        let data = item.to_le();
        let bytes = unsafe {
            std::slice::from_raw_parts(&data as *const T as *const u8, std::mem::size_of::<T>())
        };
        self.buffer.extend_from_slice(bytes);
    }

    fn stage_hello(&mut self) {
        if !self.buffer.is_empty() {
            return;
        }

        let hello = CdarFormatHello {
            header: CdarFormatHeader {
                htype: CDAR_FORMAT_HELLO,
                size: std::mem::size_of::<CdarFormatHello>() as u64,
            },
            uuid_part2: CDAR_FORMAT_HELLO_UUID_PART2,
            feature_flags: self.feature_flags,
        };
        self.put_item(hello);
    }

    fn stage_entry(&mut self) -> Result<(), EncodeError> {
        if !self.buffer.is_empty() {
            return Ok(());
        }

        let de = self
            .current_node()
            .and_then(|n| n.current_dirent())
            .ok_or(EncodeError::InvalidState)?
            .clone();
        let child = self.current_child().ok_or(EncodeError::InvalidState)?;
        let stat = child.stat.ok_or(EncodeError::InvalidState)?;
        let symlink_target = child.symlink_target.clone();

        for id in [stat.st_uid, stat.st_gid] {
            if id == u16::MAX as u32 || id == u32::MAX {
                return Err(EncodeError::ReservedUidGid(id as u64));
            }
        }

        if (self.feature_flags & flags::WITH_UID_GID_16BIT) != 0 {
            if stat.st_uid > u16::MAX as u32 {
                return Err(EncodeError::UidGidTooLarge(stat.st_uid as u64));
            }
            if stat.st_gid > u16::MAX as u32 {
                return Err(EncodeError::UidGidTooLarge(stat.st_gid as u64));
            }
        }
        let (uid, gid) = if (self.feature_flags
            & (flags::WITH_UID_GID_16BIT | flags::WITH_UID_GID_32BIT))
            != 0
        {
            (stat.st_uid as u64, stat.st_gid as u64)
        } else {
            (0, 0)
        };

        if (self.feature_flags & flags::WITH_SYMLINKS) == 0 && is_symlink(&stat) {
            return Err(EncodeError::FeatureNotEnabled("symlinks"));
        }
        if (self.feature_flags & flags::WITH_DEVICE_NODES) == 0
            && (is_block_dev(&stat) || is_char_dev(&stat))
        {
            return Err(EncodeError::FeatureNotEnabled("device nodes"));
        }
        if (self.feature_flags & flags::WITH_FIFOS) == 0 && is_fifo(&stat) {
            return Err(EncodeError::FeatureNotEnabled("fifos"));
        }
        if (self.feature_flags & flags::WITH_SOCKETS) == 0 && is_socket(&stat) {
            return Err(EncodeError::FeatureNotEnabled("sockets"));
        }

        let mtime = encode_mtime(self.time_granularity, stat.st_mtime, stat.st_mtime_nsec)?;
        let mode = encode_entry_mode(self.feature_flags, stat.st_mode);

        let name = de.name.as_bytes_with_nul();
        let entry_size = (std::mem::size_of::<CdarFormatHeader>()
            + std::mem::size_of::<CdarFormatEntry>()
            + name.len()) as u64;

        self.put_item(CdarFormatHeader { htype: CDAR_FORMAT_ENTRY, size: entry_size });
        self.put_item(CdarFormatEntry { mode, flags: 0, uid, gid, mtime });
        self.buffer.extend_from_slice(name);

        // any follow-up item from here on is unaligned in the buffer

        if is_reg_file(&stat) {
            let size = (std::mem::size_of::<CdarFormatHeader>() as u64) + (stat.st_size as u64);
            self.put_item(CdarFormatHeader { htype: CDAR_FORMAT_PAYLOAD, size });
        } else if is_symlink(&stat) {
            let target = symlink_target.ok_or(EncodeError::InvalidState)?;
            let target = target.as_bytes_with_nul();
            let size = (std::mem::size_of::<CdarFormatHeader>() + target.len()) as u64;
            self.put_item(CdarFormatHeader { htype: CDAR_FORMAT_SYMLINK, size });
            self.buffer.extend_from_slice(target);
        } else if is_block_dev(&stat) || is_char_dev(&stat) {
            self.put_item(CdarFormatDevice {
                header: CdarFormatHeader {
                    htype: CDAR_FORMAT_DEVICE,
                    size: std::mem::size_of::<CdarFormatDevice>() as u64,
                },
                major: libc::major(stat.st_rdev) as u64,
                minor: libc::minor(stat.st_rdev) as u64,
            });
        }

        Ok(())
    }

    fn stage_goodbye(&mut self) {
        if !self.buffer.is_empty() {
            return;
        }

        let size =
            (std::mem::size_of::<CdarFormatHeader>() + std::mem::size_of::<u64>()) as u64;
        self.put_item(CdarFormatHeader { htype: CDAR_FORMAT_GOODBYE, size });
        // placeholder table with a single entry repeating the item size;
        // the per-directory child index is not populated yet
        self.put_item(size);
    }

    fn stage_payload(&mut self) -> Result<bool, EncodeError> {
        let size = self.payload_size()?;
        if self.payload_offset >= size {
            // at EOF
            return Ok(false);
        }
        if !self.buffer.is_empty() {
            // already staged
            return Ok(true);
        }

        let want = std::cmp::min(PAYLOAD_CHUNK_SIZE as u64, size - self.payload_offset) as usize;
        let fd = self
            .current_node()
            .and_then(|n| n.fd)
            .ok_or(EncodeError::InvalidState)?;

        self.buffer.resize(want, 0u8);
        match unistd::read(fd, &mut self.buffer) {
            Ok(count) if count == want => Ok(true),
            Ok(_) => {
                // the stat size is a contract, a short read breaks it
                self.buffer.clear();
                Err(EncodeError::ShortRead)
            }
            Err(err) => {
                self.buffer.clear();
                Err(err.into())
            }
        }
    }

    /// Fetch the staged bytes for the last [`Status::Data`] or
    /// [`Status::NextFile`]. Idempotent until the next `step`. Returns
    /// `None` at payload EOF of a leaf node.
    pub fn get_data(&mut self) -> Result<Option<&[u8]>, EncodeError> {
        let stat = self.current_stat()?;

        if is_reg_file(&stat) || is_block_dev(&stat) {
            if self.state != EncoderState::Init {
                return Err(EncodeError::NoDataStaged);
            }
            if !self.stage_payload()? {
                self.step_size = 0;
                return Ok(None);
            }
        } else if is_directory(&stat) {
            match self.state {
                EncoderState::Hello => self.stage_hello(),
                EncoderState::Entry => self.stage_entry()?,
                EncoderState::Goodbye => self.stage_goodbye(),
                _ => return Err(EncodeError::NoDataStaged),
            }
        } else {
            return Err(EncodeError::UnsupportedFileType(stat.st_mode));
        }

        self.step_size = self.buffer.len() as u64;
        Ok(Some(&self.buffer))
    }

    /// The path of the entry currently being emitted, relative to the base
    /// directory. Fails with "not a directory" at the true root.
    pub fn current_path(&self) -> Result<PathBuf, EncodeError> {
        if self.nodes.is_empty() {
            return Err(EncodeError::NoBaseNode);
        }

        let mut path = PathBuf::new();
        for node in &self.nodes {
            match node.current_dirent() {
                Some(de) => path.push(OsStr::from_bytes(de.name.to_bytes())),
                None => break,
            }
        }

        if path.as_os_str().is_empty() {
            return Err(EncodeError::NotADirectory);
        }
        Ok(path)
    }

    /// The mode of the child currently being emitted, or of the current
    /// node when no child is prepared.
    pub fn current_mode(&self) -> Result<libc::mode_t, EncodeError> {
        let node = match self.current_child() {
            Some(child) => child,
            None => self.current_node().ok_or(EncodeError::NoBaseNode)?,
        };
        Ok(node.stat.ok_or(EncodeError::InvalidState)?.st_mode)
    }

    /// Position inside the payload of the current leaf node.
    pub fn current_payload_offset(&self) -> Result<u64, EncodeError> {
        let stat = self.current_stat()?;
        if !is_reg_file(&stat) && !is_block_dev(&stat) {
            return Err(EncodeError::NoPayload);
        }
        Ok(self.payload_offset)
    }

    /// Cumulative acknowledged archive bytes.
    pub fn current_archive_offset(&self) -> u64 {
        self.archive_offset
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        // tear down children before their parents
        while self.nodes.pop().is_some() {}
    }
}

/// Encode the filesystem object behind `fd` into `writer`, driving the
/// pull interface until the encoder signals completion. Returns the number
/// of archive bytes written.
pub fn write_archive<W: Write>(
    fd: RawFd,
    feature_flags: u64,
    writer: &mut W,
) -> Result<u64, Error> {
    let mut encoder = Encoder::new();
    encoder.set_feature_flags(feature_flags)?;
    encoder.set_base_fd(fd)?;

    loop {
        let status = encoder.step()?;
        if status == Status::Finished {
            break;
        }
        if status == Status::NextFile {
            if let Ok(path) = encoder.current_path() {
                log::debug!("adding {:?}", path);
            }
        }
        if let Some(data) = encoder.get_data()? {
            writer.write_all(data)?;
        }
    }

    Ok(encoder.current_archive_offset())
}
