//! # Initramfs
//!
//! A `cpio` archive in the "new ASCII" (`newc`) format, read in place. Each
//! member is a 110-byte header of hexadecimal fields, the NUL-terminated
//! name, then the data; name and data are both padded to four bytes. The
//! member called `TRAILER!!!` ends the archive.
//!
//! ```text
//! offset  field       offset  field
//!      0  magic "070701"  54  filesize
//!     14  mode            94  namesize (including the NUL)
//! ```

use core::str;

const MAGIC: &[u8] = b"070701";
const HEADER_LEN: usize = 110;
const MODE: usize = 14;
const FILESIZE: usize = 54;
const NAMESIZE: usize = 94;
const TRAILER: &str = "TRAILER!!!";

const S_IFMT: u32 = 0o170_000;
const S_IFREG: u32 = 0o100_000;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum CpioError {
    #[error("bad magic at offset {0:#x}")]
    BadMagic(usize),
    #[error("member at offset {0:#x} runs past the end of the archive")]
    Truncated(usize),
    #[error("malformed header field at offset {0:#x}")]
    BadField(usize),
    #[error("malformed member name at offset {0:#x}")]
    BadName(usize),
}

/// One archive member.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Entry<'a> {
    /// Path inside the archive, without a leading `./`.
    pub name: &'a str,
    pub mode: u32,
    pub data: &'a [u8],
}

impl Entry<'_> {
    #[must_use]
    pub const fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }
}

/// A validated archive.
#[derive(Debug, Copy, Clone)]
pub struct Archive<'a> {
    data: &'a [u8],
}

impl<'a> Archive<'a> {
    /// No members at all.
    #[must_use]
    pub const fn empty() -> Self {
        Self { data: &[] }
    }

    /// Check every member up to and including the trailer. Whatever follows
    /// the trailer is ignored.
    ///
    /// # Errors
    /// The first malformed member, or [`CpioError::Truncated`] if the
    /// trailer is missing.
    pub fn parse(data: &'a [u8]) -> Result<Self, CpioError> {
        let mut offset = 0;
        loop {
            let (entry, next) = member(data, offset)?;
            offset = next;
            if entry.name == TRAILER {
                return Ok(Self { data: &data[..offset] });
            }
        }
    }

    /// Bytes from the first header to the end of the trailer.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// All members before the trailer, directories included.
    pub fn entries(&self) -> impl Iterator<Item = Entry<'a>> + 'a {
        let data = self.data;
        let mut offset = 0;
        core::iter::from_fn(move || {
            let (entry, next) = member(data, offset).ok()?;
            offset = next;
            (entry.name != TRAILER).then_some(entry)
        })
    }

    /// Contents of the regular file `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&'a [u8]> {
        let name = name.trim_start_matches('/');
        self.entries()
            .find(|e| e.is_file() && e.name == name)
            .map(|e| e.data)
    }
}

/// The member at `offset` and the offset of the one after it.
fn member(data: &[u8], offset: usize) -> Result<(Entry<'_>, usize), CpioError> {
    let header = data
        .get(offset..offset + HEADER_LEN)
        .ok_or(CpioError::Truncated(offset))?;
    if !header.starts_with(MAGIC) {
        return Err(CpioError::BadMagic(offset));
    }
    let field = |at: usize| hex(&header[at..at + 8]).ok_or(CpioError::BadField(offset + at));
    let mode = field(MODE)?;
    let filesize = field(FILESIZE)? as usize;
    let namesize = field(NAMESIZE)? as usize;

    let name_start = offset + HEADER_LEN;
    let raw_name = data
        .get(name_start..name_start + namesize)
        .ok_or(CpioError::Truncated(offset))?;
    let name = raw_name
        .split_last()
        .filter(|(nul, _)| **nul == 0)
        .and_then(|(_, name)| str::from_utf8(name).ok())
        .ok_or(CpioError::BadName(offset))?;
    let name = name.strip_prefix("./").unwrap_or(name);

    let data_start = (name_start + namesize).next_multiple_of(4);
    let file = data
        .get(data_start..data_start + filesize)
        .ok_or(CpioError::Truncated(offset))?;
    let next = (data_start + filesize).next_multiple_of(4);
    Ok((Entry { name, mode, data: file }, next.min(data.len())))
}

fn hex(field: &[u8]) -> Option<u32> {
    u32::from_str_radix(str::from_utf8(field).ok()?, 16).ok()
}
