//! # VideoCore Mailbox
//!
//! Property-channel requests to the GPU firmware. A message is the
//! physical address of a 16-byte aligned buffer with the channel in its low
//! four bits; the firmware answers in place and echoes the message back.

use core::arch::asm;
use core::ptr::{read_volatile, with_exposed_provenance_mut, write_volatile};
use kernel_info::memory::{KERNEL_VIRTUAL_BASE, PERIPHERAL_BASE};
use kernel_memory_addresses::VirtualAddress;
use kernel_syscall::{Firmware, MailboxBuffer};
use kernel_vmem::LinearMapper;
use log::{info, warn};

const MAILBOX_BASE: u64 = PERIPHERAL_BASE + 0xB880;
const READ: u64 = 0x00;
const STATUS: u64 = 0x18;
const WRITE: u64 = 0x20;

const FULL: u32 = 0x8000_0000;
const EMPTY: u32 = 0x4000_0000;

const REQUEST: u32 = 0;
const RESPONSE_OK: u32 = 0x8000_0000;
const END_TAG: u32 = 0;

/// Property channel, ARM to VideoCore.
const CHANNEL_PROPERTY: u8 = 8;
const TAG_BOARD_REVISION: u32 = 0x0001_0002;

#[derive(Debug, Copy, Clone, Default)]
pub struct VideoCoreMailbox;

#[allow(clippy::cast_possible_truncation)]
fn register(offset: u64) -> *mut u32 {
    with_exposed_provenance_mut((KERNEL_VIRTUAL_BASE + MAILBOX_BASE + offset) as usize)
}

impl Firmware for VideoCoreMailbox {
    #[allow(clippy::cast_possible_truncation)]
    fn mailbox_call(&mut self, channel: u8, buffer: &mut MailboxBuffer) -> bool {
        let pa = LinearMapper::kernel().virt_to_phys(VirtualAddress::from_ptr(&raw const *buffer));
        let message = (pa.as_u64() as u32 & !0xF) | u32::from(channel & 0xF);

        unsafe {
            asm!("dsb sy", options(nostack, preserves_flags));
            while read_volatile(register(STATUS)) & FULL != 0 {
                core::hint::spin_loop();
            }
            write_volatile(register(WRITE), message);
            loop {
                while read_volatile(register(STATUS)) & EMPTY != 0 {
                    core::hint::spin_loop();
                }
                if read_volatile(register(READ)) == message {
                    break;
                }
            }
            asm!("dsb sy", options(nostack, preserves_flags));
        }
        let response = unsafe { read_volatile(&raw const buffer.0[1]) };
        response == RESPONSE_OK
    }
}

/// Ask the firmware which board this is and log it.
pub fn log_board_revision() {
    let mut buffer = MailboxBuffer([0; 64]);
    buffer.0[..7].copy_from_slice(&[7 * 4, REQUEST, TAG_BOARD_REVISION, 4, 0, 0, END_TAG]);
    if VideoCoreMailbox.mailbox_call(CHANNEL_PROPERTY, &mut buffer) {
        info!("board revision {:#x}", buffer.0[5]);
    } else {
        warn!("firmware did not answer the board revision request");
    }
}
