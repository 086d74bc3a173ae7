//! Game Boy Advance SIO in normal 8-bit mode.
//!
//! The GBA side of the link is register driven: the game writes SIODATA8,
//! sets the start bit in SIOCNT and waits for the transfer to finish. The
//! partner byte is exchanged when the start bit is set and becomes visible
//! once the fixed transfer period has elapsed.

use log::trace;

use crate::serial::{LinkPort, NullLinkPort};

/// SIO control register (offset in the I/O region).
pub const REG_SIOCNT: u32 = 0x128;
/// SIO 8-bit data register (offset in the I/O region).
pub const REG_SIODATA8: u32 = 0x12A;

/// ARM7TDMI clock.
pub const GBA_FREQUENCY: u32 = 16_777_216;
/// Cycles between the start bit and completion of one byte.
pub const GBA_TRANSFER_CYCLES: u32 = GBA_FREQUENCY / 0x40000;

const SIOCNT_START: u16 = 0x0080;
const SIOCNT_IRQ: u16 = 0x4000;
// Bits 2-3 report the partner's SI/SD lines; the adapter keeps SD high.
const SIOCNT_LINE_MASK: u16 = 0x000C;
const SIOCNT_SD_HIGH: u16 = 0x0008;

pub struct GbaSerial {
    siocnt: u16,
    siodata8: u16,
    port: Box<dyn LinkPort>,
    pending: Option<Pending>,
}

struct Pending {
    cycles_left: u32,
    incoming: u8,
}

impl Default for GbaSerial {
    fn default() -> Self {
        Self::new()
    }
}

impl GbaSerial {
    pub fn new() -> Self {
        Self {
            siocnt: SIOCNT_SD_HIGH,
            siodata8: 0,
            port: Box::new(NullLinkPort::default()),
            pending: None,
        }
    }

    pub fn connect(&mut self, port: Box<dyn LinkPort>) {
        self.port = port;
        self.pending = None;
    }

    pub fn reset(&mut self) {
        self.pending = None;
        self.siocnt &= !SIOCNT_START;
        self.port.reset();
    }

    pub fn is_transferring(&self) -> bool {
        self.pending.is_some()
    }

    pub fn read(&self, addr: u32) -> u16 {
        match addr {
            REG_SIOCNT => self.siocnt,
            REG_SIODATA8 => self.siodata8,
            _ => 0,
        }
    }

    pub fn write(&mut self, addr: u32, value: u16) {
        match addr {
            REG_SIOCNT => {
                let value = (value & !SIOCNT_LINE_MASK) | SIOCNT_SD_HIGH;
                self.siocnt = value;
                if value & SIOCNT_START == 0 {
                    self.pending = None;
                    return;
                }
                if self.pending.is_none() {
                    let outgoing = self.siodata8 as u8;
                    let incoming = self.port.transfer(outgoing);
                    trace!(target: "serial", "sio8 {outgoing:02X} -> {incoming:02X}");
                    self.pending = Some(Pending {
                        cycles_left: GBA_TRANSFER_CYCLES,
                        incoming,
                    });
                }
            }
            REG_SIODATA8 => self.siodata8 = value & 0x00FF,
            _ => {}
        }
    }

    /// Advance by `cycles` CPU cycles.
    ///
    /// Returns `true` when a transfer completed with the IRQ enable bit set,
    /// in which case the host must raise the SIO interrupt.
    pub fn step(&mut self, cycles: u32) -> bool {
        let Some(pending) = self.pending.as_mut() else {
            return false;
        };
        if pending.cycles_left > cycles {
            pending.cycles_left -= cycles;
            return false;
        }

        let incoming = pending.incoming;
        self.pending = None;
        self.siodata8 = incoming as u16;
        self.siocnt &= !SIOCNT_START;
        self.siocnt & SIOCNT_IRQ != 0
    }
}
