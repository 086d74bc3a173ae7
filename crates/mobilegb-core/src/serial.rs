use log::trace;

/// Serial transfer data register.
pub const SB: u16 = 0xFF01;
/// Serial transfer control register.
pub const SC: u16 = 0xFF02;
/// Interrupt flag bit raised when a serial transfer completes.
pub const SERIAL_IRQ: u8 = 0x08;

pub trait LinkPort: Send {
    /// Transfer a byte over the link. Returns the byte received from the
    /// partner. Implementations may perform the transfer immediately.
    fn transfer(&mut self, byte: u8) -> u8;

    /// Host-initiated reset of the partner device.
    ///
    /// May arrive at any point of an exchange, including mid-byte.
    fn reset(&mut self) {}
}

/// A stub link port used when nothing is plugged in.
/// By default it emulates a "line dead" scenario where incoming bits are all 1,
/// so any transfer receives 0xFF. When `loopback` is true the sent byte is
/// echoed back instead.
#[derive(Default)]
pub struct NullLinkPort {
    loopback: bool,
}

impl NullLinkPort {
    pub fn new(loopback: bool) -> Self {
        Self { loopback }
    }
}

impl LinkPort for NullLinkPort {
    fn transfer(&mut self, byte: u8) -> u8 {
        if self.loopback { byte } else { 0xFF }
    }
}

/// Game Boy SB/SC registers driving a [`LinkPort`].
///
/// The partner byte is exchanged as soon as a transfer starts and lands in SB
/// after eight serial clocks, when the serial interrupt is raised.
pub struct Serial {
    sb: u8,
    sc: u8,
    port: Box<dyn LinkPort>,
    pending: Option<Pending>,
    cgb_mode: bool,
}

struct Pending {
    bits_left: u8,
    incoming: u8,
    internal_clock: bool,
    fast_clock: bool,
}

impl Pending {
    /// Consumes up to `clocks` bits; true once the byte is complete.
    fn clock(&mut self, clocks: u32) -> bool {
        let taken = clocks.min(self.bits_left as u32) as u8;
        self.bits_left -= taken;
        self.bits_left == 0
    }
}

impl Serial {
    pub fn new(cgb: bool) -> Self {
        Self {
            sb: 0,
            sc: if cgb { 0x7F } else { 0x7E },
            port: Box::new(NullLinkPort::default()),
            pending: None,
            cgb_mode: cgb,
        }
    }

    pub fn connect(&mut self, port: Box<dyn LinkPort>) {
        self.port = port;
        self.pending = None;
    }

    /// Unplugs the current partner, leaving the line dead.
    pub fn disconnect(&mut self) -> Box<dyn LinkPort> {
        self.pending = None;
        std::mem::replace(&mut self.port, Box::new(NullLinkPort::default()))
    }

    /// Cancels any transfer in flight and resets the attached device.
    pub fn reset(&mut self) {
        self.pending = None;
        self.sc &= 0x7F;
        self.port.reset();
    }

    pub fn is_transferring(&self) -> bool {
        self.pending.is_some()
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            SB => self.sb,
            SC if self.cgb_mode => self.sc,
            SC => self.sc | 0x7E,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            SB => self.sb = val,
            SC => {
                self.sc = val;
                if val & 0x80 == 0 {
                    self.pending = None;
                    return;
                }
                let internal_clock = val & 0x01 != 0;
                let fast_clock = val & 0x02 != 0;
                if let Some(pending) = self.pending.as_mut() {
                    pending.internal_clock = internal_clock;
                    pending.fast_clock = fast_clock;
                    return;
                }
                let incoming = self.port.transfer(self.sb);
                trace!(target: "serial", "link {:02X} -> {incoming:02X}", self.sb);
                self.pending = Some(Pending {
                    bits_left: 8,
                    incoming,
                    internal_clock,
                    fast_clock,
                });
            }
            _ => {}
        }
    }

    /// Deliver external clock pulses to the serial unit.
    ///
    /// Each pulse clocks one bit. Only meaningful when the transfer uses the
    /// external clock (SC bit0 = 0).
    pub fn external_clock_pulse(&mut self, count: u8, if_reg: &mut u8) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        if !pending.internal_clock && pending.clock(count as u32) {
            self.finish(if_reg);
        }
    }

    /// Advance the internal serial clock across a DIV counter interval.
    ///
    /// One bit is clocked per period of the selected DIV-derived clock.
    pub fn step(&mut self, prev_div: u16, curr_div: u16, double_speed: bool, if_reg: &mut u8) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        if !pending.internal_clock {
            return;
        }

        let period = serial_clock_period(self.cgb_mode, double_speed, pending.fast_clock);
        let span = curr_div.wrapping_sub(prev_div) as u32;
        let clocks = (prev_div as u32 % period + span) / period;
        if pending.clock(clocks) {
            self.finish(if_reg);
        }
    }

    fn finish(&mut self, if_reg: &mut u8) {
        if let Some(pending) = self.pending.take() {
            self.sb = pending.incoming;
            self.sc &= 0x7F;
            *if_reg |= SERIAL_IRQ;
        }
    }
}

/// DIV increments per serial bit.
fn serial_clock_period(cgb_mode: bool, double_speed: bool, fast_clock: bool) -> u32 {
    match (cgb_mode && fast_clock, double_speed) {
        (false, false) => 512,
        (false, true) => 256,
        (true, false) => 16,
        (true, true) => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::{LinkPort, SB, SC, SERIAL_IRQ, Serial};

    struct FixedInLinkPort {
        ret: u8,
    }

    impl LinkPort for FixedInLinkPort {
        fn transfer(&mut self, _byte: u8) -> u8 {
            self.ret
        }
    }

    #[test]
    fn clearing_start_bit_cancels_transfer() {
        let mut serial = Serial::new(false);
        serial.connect(Box::new(FixedInLinkPort { ret: 0x34 }));

        serial.write(SB, 0x12);
        serial.write(SC, 0x80 | 0x01);
        serial.write(SC, 0x00);
        assert_eq!(serial.read(SC) & 0x80, 0);

        let mut if_reg = 0u8;
        serial.step(0, 4096, false, &mut if_reg);
        assert_eq!(if_reg & SERIAL_IRQ, 0);
        assert_eq!(serial.read(SB), 0x12);
    }

    #[test]
    fn internal_clock_irq_only_on_final_bit_dmg() {
        let mut serial = Serial::new(false);
        serial.connect(Box::new(FixedInLinkPort { ret: 0x34 }));

        serial.write(SB, 0x12);
        serial.write(SC, 0x80 | 0x01);

        let mut if_reg = 0u8;
        // 7 bits worth of falling edges: 7 * 512 DIV increments.
        serial.step(0, 3584, false, &mut if_reg);
        assert_ne!(serial.read(SC) & 0x80, 0);
        assert_eq!(if_reg & SERIAL_IRQ, 0);

        serial.step(3584, 4096, false, &mut if_reg);
        assert_eq!(serial.read(SC) & 0x80, 0);
        assert_ne!(if_reg & SERIAL_IRQ, 0);
        assert_eq!(serial.read(SB), 0x34);
    }

    #[test]
    fn cgb_fast_clock_completes_in_128_div_ticks() {
        let mut serial = Serial::new(true);
        serial.connect(Box::new(FixedInLinkPort { ret: 0x34 }));

        serial.write(SB, 0x12);
        serial.write(SC, 0x80 | 0x01 | 0x02);

        let mut if_reg = 0u8;
        serial.step(0, 127, false, &mut if_reg);
        assert_eq!(if_reg & SERIAL_IRQ, 0);
        serial.step(127, 128, false, &mut if_reg);
        assert_ne!(if_reg & SERIAL_IRQ, 0);
        assert_eq!(serial.read(SB), 0x34);
    }

    #[test]
    fn clocks_are_counted_across_div_wrap() {
        let mut serial = Serial::new(false);
        serial.connect(Box::new(FixedInLinkPort { ret: 0x5A }));

        serial.write(SB, 0x12);
        serial.write(SC, 0x81);

        let mut if_reg = 0u8;
        // Edges at 0xF200, 0xF400 ... 0x10000: eight bits.
        serial.step(0xF000, 0x0000, false, &mut if_reg);
        assert_ne!(if_reg & SERIAL_IRQ, 0);
        assert_eq!(serial.read(SB), 0x5A);
    }

    #[test]
    fn reset_drops_transfer_and_clears_start_bit() {
        let mut serial = Serial::new(false);
        serial.connect(Box::new(FixedInLinkPort { ret: 0x34 }));
        serial.write(SC, 0x81);
        assert!(serial.is_transferring());

        serial.reset();
        assert!(!serial.is_transferring());
        assert_eq!(serial.read(SC) & 0x80, 0);
    }
}
