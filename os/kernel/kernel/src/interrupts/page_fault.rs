//! # User Aborts
//!
//! Translation faults inside one of the thread's regions are demand paging:
//! one zeroed page is mapped and the faulting instruction runs again. Every
//! other abort is a segmentation fault and kills the thread.

use crate::task;
use kernel_info::thread::SIGKILL;
use kernel_memory_addresses::VirtualAddress;
use kernel_sched::{Esr, ExceptionClass, FaultOutcome};
use log::{trace, warn};

#[allow(clippy::cast_possible_wrap)]
pub fn handle(far: VirtualAddress, esr: Esr) {
    match task::handle_fault(far, esr) {
        Ok(FaultOutcome::Populated { va, pa }) => {
            trace!("populated {va} -> {pa}");
            if esr.class() == ExceptionClass::InstructionAbortLower {
                task::flush_user_mappings();
            }
        }
        Ok(FaultOutcome::AlreadyMapped(_)) => {}
        Err(e) => {
            warn!("{e} ({:?}), killing thread", esr.fault_status());
            task::exit_current(SIGKILL as i64);
        }
    }
}
