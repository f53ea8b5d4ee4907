use core::fmt;
use core::ptr::{read_volatile, with_exposed_provenance_mut, write_volatile};

/// The auxiliary mini UART on GPIO 14/15 (ALT5).
///
/// All offsets are relative to the start of the peripheral window.
#[derive(Debug)]
pub struct MiniUart {
    base: usize,
}

impl MiniUart {
    const GPFSEL1: usize = 0x20_0004;
    const GPPUD: usize = 0x20_0094;
    const GPPUDCLK0: usize = 0x20_0098;

    const AUX_ENABLES: usize = 0x21_5004;
    const AUX_MU_IO: usize = 0x21_5040;
    const AUX_MU_IER: usize = 0x21_5044;
    const AUX_MU_LCR: usize = 0x21_504C;
    const AUX_MU_MCR: usize = 0x21_5050;
    const AUX_MU_LSR: usize = 0x21_5054;
    const AUX_MU_CNTL: usize = 0x21_5060;
    const AUX_MU_BAUD: usize = 0x21_5068;

    const LSR_DATA_READY: u32 = 1 << 0;
    const LSR_TX_IDLE: u32 = 1 << 5;

    /// 250 MHz core clock / (8 * (270 + 1)) = 115200 baud.
    const BAUD_115200: u32 = 270;

    /// # Safety
    /// `peripheral_base` must map the BCM2837 peripheral window for as long
    /// as the value is used.
    #[must_use]
    pub const unsafe fn new(peripheral_base: usize) -> Self {
        Self {
            base: peripheral_base,
        }
    }

    /// Route GPIO 14/15 to the mini UART and set it up for 8N1 at 115200
    /// baud, interrupts off.
    pub fn init(&self) {
        let mut sel = self.read(Self::GPFSEL1);
        sel &= !((7 << 12) | (7 << 15));
        sel |= (2 << 12) | (2 << 15);
        self.write(Self::GPFSEL1, sel);

        self.write(Self::GPPUD, 0);
        delay(150);
        self.write(Self::GPPUDCLK0, (1 << 14) | (1 << 15));
        delay(150);
        self.write(Self::GPPUDCLK0, 0);

        self.write(Self::AUX_ENABLES, 1);
        self.write(Self::AUX_MU_CNTL, 0);
        self.write(Self::AUX_MU_IER, 0);
        self.write(Self::AUX_MU_LCR, 3);
        self.write(Self::AUX_MU_MCR, 0);
        self.write(Self::AUX_MU_BAUD, Self::BAUD_115200);
        self.write(Self::AUX_MU_CNTL, 3);
    }

    pub fn send(&self, byte: u8) {
        while self.read(Self::AUX_MU_LSR) & Self::LSR_TX_IDLE == 0 {
            core::hint::spin_loop();
        }
        self.write(Self::AUX_MU_IO, u32::from(byte));
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn try_recv(&self) -> Option<u8> {
        (self.read(Self::AUX_MU_LSR) & Self::LSR_DATA_READY != 0)
            .then(|| (self.read(Self::AUX_MU_IO) & 0xFF) as u8)
    }

    fn read(&self, offset: usize) -> u32 {
        unsafe { read_volatile(with_exposed_provenance_mut::<u32>(self.base + offset)) }
    }

    fn write(&self, offset: usize, value: u32) {
        unsafe { write_volatile(with_exposed_provenance_mut::<u32>(self.base + offset), value) }
    }
}

impl fmt::Write for &MiniUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            self.send(b);
        }
        Ok(())
    }
}

fn delay(cycles: u32) {
    for _ in 0..cycles {
        core::hint::spin_loop();
    }
}

/// Terminal line discipline: every `\n` goes out as `\r\n`.
pub struct CrLf<W>(pub W);

impl<W: fmt::Write> fmt::Write for CrLf<W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut lines = s.split('\n');
        if let Some(first) = lines.next() {
            self.0.write_str(first)?;
        }
        for line in lines {
            self.0.write_str("\r\n")?;
            self.0.write_str(line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    #[test]
    fn newlines_become_crlf() {
        let mut out = CrLf(String::new());
        write!(out, "a\nb\n\n{}", 7).unwrap();
        assert_eq!(out.0, "a\r\nb\r\n\r\n7");
    }

    #[test]
    fn carriage_returns_pass_through() {
        let mut out = CrLf(String::new());
        out.write_str("x\r").unwrap();
        assert_eq!(out.0, "x\r");
    }
}
