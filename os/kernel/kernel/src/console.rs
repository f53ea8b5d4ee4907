//! # Syscall Console
//!
//! `uart_read`/`uart_write` and the `/dev/uart` nodes talk to the mini UART
//! one byte at a time, each inside its own interrupt window so the timer can
//! preempt a thread that waits for input.

use kernel_sync::InterruptWindow;
use kernel_syscall::Console;
use kernel_uart::CONSOLE;

#[derive(Debug, Copy, Clone, Default)]
pub struct UartConsole;

impl Console for UartConsole {
    fn read_byte(&mut self) -> u8 {
        loop {
            if let Some(byte) = CONSOLE.try_recv() {
                return byte;
            }
            // Safety: callers hold no kernel lock while reading.
            let _window = unsafe { InterruptWindow::open() };
            core::hint::spin_loop();
        }
    }

    fn write_byte(&mut self, byte: u8) {
        // Safety: as above.
        let _window = unsafe { InterruptWindow::open() };
        if byte == b'\n' {
            CONSOLE.send(b'\r');
        }
        CONSOLE.send(byte);
    }
}
