//! # Mini UART Console
//!
//! Console output for the kernel: the BCM2837 auxiliary mini UART, a
//! `log::Log` backend on top of it and a [`uart_trace!`] macro for output
//! before the logger is installed.
//!
//! ```text
//! log::info!(..) ──► UartLogger ─┐
//!                                ├─► uart_fmt::uart_write ─► CrLf ─► MiniUart (AUX_MU_IO)
//! uart_trace!(..) ───────────────┘
//! ```
//!
//! Registers are reached through the kernel's linear map of the peripheral
//! window ([`CONSOLE`]), so nothing here works before the MMU is on.
//!
//! ## Features
//!
//! `enabled` (default) compiles the output path in. Without it
//! [`uart_trace!`] and the logger discard everything.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

mod logger;
mod mini_uart;

pub use logger::UartLogger;
pub use mini_uart::{CrLf, MiniUart};

use kernel_info::memory::{KERNEL_VIRTUAL_BASE, PERIPHERAL_BASE};

/// The console UART, through the kernel's linear map.
#[allow(clippy::cast_possible_truncation)]
pub static CONSOLE: MiniUart = unsafe { MiniUart::new((KERNEL_VIRTUAL_BASE + PERIPHERAL_BASE) as usize) };

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod uart_fmt {
    use crate::{CONSOLE, CrLf};
    use core::fmt;

    #[doc(hidden)]
    #[inline]
    pub fn uart_write(args: fmt::Arguments) {
        // Best effort; there is nowhere to report a console error to.
        let _ = fmt::write(&mut CrLf(&CONSOLE), args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod uart_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline]
    pub fn uart_write(_: fmt::Arguments) {}
}

/// `print!` to the console UART, bypassing the logger.
#[macro_export]
macro_rules! uart_trace {
    ($($arg:tt)*) => {{
        $crate::uart_fmt::uart_write(core::format_args!($($arg)*));
    }};
}
