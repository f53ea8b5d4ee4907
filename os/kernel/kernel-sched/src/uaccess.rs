//! # User Memory Access
//!
//! Syscall arguments are user virtual addresses. The kernel never
//! dereferences them directly: every copy walks the thread's own tables
//! page by page, so a bad pointer turns into [`SchedError::BadAddress`]
//! instead of a kernel abort, and the same code runs on the host.

use crate::error::SchedError;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_vmem::{AddressSpace, PhysMapper};

/// Longest path accepted from user space, terminator included.
pub const MAX_PATH: usize = 256;

/// Physical address behind a user-accessible `va`.
fn translate<M: PhysMapper>(
    space: &AddressSpace<'_, M>,
    va: VirtualAddress,
    write: bool,
) -> Result<PhysicalAddress, SchedError> {
    let leaf = space.leaf(va).ok_or(SchedError::BadAddress(va))?;
    if !leaf.user() || (write && leaf.read_only()) {
        return Err(SchedError::BadAddress(va));
    }
    Ok(leaf.address() + va.page_offset())
}

/// Walk `[va, va + len)` one page piece at a time.
#[allow(clippy::cast_possible_truncation)]
fn for_each_piece<M: PhysMapper>(
    space: &AddressSpace<'_, M>,
    va: VirtualAddress,
    len: usize,
    write: bool,
    mut f: impl FnMut(PhysicalAddress, usize, usize),
) -> Result<(), SchedError> {
    let mut done = 0;
    while done < len {
        let at = va
            .as_u64()
            .checked_add(done as u64)
            .map(VirtualAddress::new)
            .ok_or(SchedError::BadAddress(va))?;
        let pa = translate(space, at, write)?;
        let piece = ((PAGE_SIZE - at.page_offset()) as usize).min(len - done);
        f(pa, done, piece);
        done += piece;
    }
    Ok(())
}

/// Check that `[va, va + len)` is mapped for EL0, and writable if `write`.
///
/// # Errors
/// [`SchedError::BadAddress`] at the first byte that is not.
pub fn check_user<M: PhysMapper>(
    space: &AddressSpace<'_, M>,
    va: VirtualAddress,
    len: usize,
    write: bool,
) -> Result<(), SchedError> {
    for_each_piece(space, va, len, write, |_, _, _| {})
}

/// Copy `dst.len()` bytes from user `va`.
///
/// # Errors
/// [`SchedError::BadAddress`] if any byte is not mapped for EL0.
pub fn copy_from_user<M: PhysMapper>(
    space: &AddressSpace<'_, M>,
    mapper: &M,
    va: VirtualAddress,
    dst: &mut [u8],
) -> Result<(), SchedError> {
    let len = dst.len();
    for_each_piece(space, va, len, false, |pa, at, piece| {
        let src = unsafe { mapper.phys_bytes_mut(pa, piece) };
        dst[at..at + piece].copy_from_slice(src);
    })
}

/// Copy `src` to user `va`.
///
/// # Errors
/// [`SchedError::BadAddress`] if any byte is not mapped writable for EL0.
/// Bytes before the bad one have been written.
pub fn copy_to_user<M: PhysMapper>(
    space: &AddressSpace<'_, M>,
    mapper: &M,
    va: VirtualAddress,
    src: &[u8],
) -> Result<(), SchedError> {
    for_each_piece(space, va, src.len(), true, |pa, at, piece| {
        let dst = unsafe { mapper.phys_bytes_mut(pa, piece) };
        dst.copy_from_slice(&src[at..at + piece]);
    })
}

/// Read a NUL-terminated UTF-8 string from user `va` into `buf`.
///
/// # Errors
/// [`SchedError::BadAddress`] for unmapped bytes, a missing terminator
/// within `buf.len()` bytes, or invalid UTF-8.
pub fn read_user_str<'b, M: PhysMapper>(
    space: &AddressSpace<'_, M>,
    mapper: &M,
    va: VirtualAddress,
    buf: &'b mut [u8],
) -> Result<&'b str, SchedError> {
    let mut at = va;
    let mut len = None;
    for (i, slot) in buf.iter_mut().enumerate() {
        let pa = translate(space, at, false)?;
        let byte = unsafe { *mapper.phys_to_mut::<u8>(pa) };
        if byte == 0 {
            len = Some(i);
            break;
        }
        *slot = byte;
        at += 1;
    }
    let len = len.ok_or(SchedError::BadAddress(va))?;
    core::str::from_utf8(&buf[..len]).map_err(|_| SchedError::BadAddress(va))
}
