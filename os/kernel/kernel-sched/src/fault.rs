//! # Synchronous Exception Classification
//!
//! `ESR_EL1` tells the handler why it was entered. Only two answers matter
//! here: a syscall, or an abort from EL0. Aborts are split once more by the
//! fault status code:
//!
//! | DFSC/IFSC `[5:2]` | Meaning            | Outcome                        |
//! |-------------------|--------------------|--------------------------------|
//! | `0b0001`          | translation fault  | populate one page if in region |
//! | `0b0010`          | access flag fault  | segmentation fault             |
//! | `0b0011`          | permission fault   | segmentation fault             |
//! | anything else     | alignment, parity  | segmentation fault             |

use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// `ESR_EL1`.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Esr {
    /// Instruction specific syndrome.
    #[bits(25)]
    pub iss: u32,
    /// 32-bit instruction length.
    pub il: bool,
    /// Exception class.
    #[bits(6)]
    pub ec: u8,
    #[bits(32)]
    __res0: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExceptionClass {
    /// `svc` from AArch64.
    Svc64,
    InstructionAbortLower,
    InstructionAbortSame,
    DataAbortLower,
    DataAbortSame,
    Other(u8),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FaultStatus {
    /// No translation at the given table level.
    Translation(u8),
    AccessFlag(u8),
    Permission(u8),
    Other(u8),
}

impl Esr {
    pub const EC_SVC64: u8 = 0b01_0101;
    pub const EC_IABT_LOWER: u8 = 0b10_0000;
    pub const EC_IABT_SAME: u8 = 0b10_0001;
    pub const EC_DABT_LOWER: u8 = 0b10_0100;
    pub const EC_DABT_SAME: u8 = 0b10_0101;

    /// Data abort ISS: the access was a write.
    const ISS_WNR: u32 = 1 << 6;

    #[must_use]
    pub const fn class(self) -> ExceptionClass {
        match self.ec() {
            Self::EC_SVC64 => ExceptionClass::Svc64,
            Self::EC_IABT_LOWER => ExceptionClass::InstructionAbortLower,
            Self::EC_IABT_SAME => ExceptionClass::InstructionAbortSame,
            Self::EC_DABT_LOWER => ExceptionClass::DataAbortLower,
            Self::EC_DABT_SAME => ExceptionClass::DataAbortSame,
            other => ExceptionClass::Other(other),
        }
    }

    /// Fault status code of an abort.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn fault_status(self) -> FaultStatus {
        let fsc = (self.iss() & 0x3F) as u8;
        let level = fsc & 0b11;
        match fsc >> 2 {
            0b0001 => FaultStatus::Translation(level),
            0b0010 => FaultStatus::AccessFlag(level),
            0b0011 => FaultStatus::Permission(level),
            _ => FaultStatus::Other(fsc),
        }
    }

    /// Whether a data abort was caused by a write.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self.class(), ExceptionClass::DataAbortLower | ExceptionClass::DataAbortSame)
            && self.iss() & Self::ISS_WNR != 0
    }

    /// Whether this is an abort taken from EL0.
    #[must_use]
    pub const fn is_user_abort(self) -> bool {
        matches!(
            self.class(),
            ExceptionClass::DataAbortLower | ExceptionClass::InstructionAbortLower
        )
    }
}

/// What a page fault resolved to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FaultOutcome {
    /// A fresh zeroed page now backs `va`.
    Populated {
        va: VirtualAddress,
        pa: PhysicalAddress,
    },
    /// Someone mapped `va` in the meantime; nothing to do.
    AlreadyMapped(VirtualAddress),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn esr(ec: u8, iss: u32) -> Esr {
        Esr::new().with_ec(ec).with_il(true).with_iss(iss)
    }

    #[test]
    fn classes() {
        assert_eq!(Esr::from_bits(0x5600_0000).class(), ExceptionClass::Svc64);
        assert_eq!(esr(0b10_0100, 0).class(), ExceptionClass::DataAbortLower);
        assert_eq!(esr(0b10_0000, 0).class(), ExceptionClass::InstructionAbortLower);
        assert_eq!(esr(0b00_0111, 0).class(), ExceptionClass::Other(0b111));
    }

    #[test]
    fn status_codes() {
        assert_eq!(esr(Esr::EC_DABT_LOWER, 0b00_0111).fault_status(), FaultStatus::Translation(3));
        assert_eq!(esr(Esr::EC_DABT_LOWER, 0b00_1011).fault_status(), FaultStatus::AccessFlag(3));
        assert_eq!(esr(Esr::EC_DABT_LOWER, 0b00_1111).fault_status(), FaultStatus::Permission(3));
        assert_eq!(esr(Esr::EC_DABT_LOWER, 0b10_0001).fault_status(), FaultStatus::Other(0b10_0001));
    }

    #[test]
    fn write_bit_only_for_data_aborts() {
        assert!(esr(Esr::EC_DABT_LOWER, 0b100_0111).is_write());
        assert!(!esr(Esr::EC_DABT_LOWER, 0b000_0111).is_write());
        assert!(!esr(Esr::EC_IABT_LOWER, 0b100_0111).is_write());
    }
}
