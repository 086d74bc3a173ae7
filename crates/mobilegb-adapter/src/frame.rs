//! Byte-level framing of the adapter's serial protocol.
//!
//! A frame on the wire is:
//!
//! ```text
//! 99 66 | cmd 00 00 len | body[len] | sum_hi sum_lo | device | status
//! ```
//!
//! The checksum is the 16-bit sum of `cmd`, `len` and every body byte. The
//! console sends a request frame, the adapter answers the last two positions
//! with its device ID and `0x80 ^ cmd`, then the direction flips and the
//! adapter replays the response frame while the console clocks idle bytes.

use log::{debug, trace};

use crate::MobileDevice;

/// First preamble byte.
pub const PREAMBLE_1: u8 = 0x99;
/// Second preamble byte.
pub const PREAMBLE_2: u8 = 0x66;
/// Byte echoed for every request body byte.
pub const BODY_ACK: u8 = 0x4B;
/// Byte emitted when a checksum does not match.
pub const CHECKSUM_ERROR: u8 = 0xF1;
/// Largest body a frame can carry.
pub const MAX_BODY_LEN: usize = 0xFF;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum FramerState {
    #[default]
    Idle,
    Preamble,
    CommandByte,
    Reserved1,
    Reserved2,
    Length,
    Body,
    Checksum1,
    Checksum2,
    DeviceId,
    StatusByte,
}

/// One command and its body.
///
/// The body buffer is reused for every frame: requests are received into it
/// and the handler leaves the response in it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    pub command: u8,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(command: u8, body: &[u8]) -> Self {
        Self {
            command,
            body: body.to_vec(),
        }
    }

    pub fn checksum(&self) -> u16 {
        checksum(self.command, &self.body)
    }
}

/// Receives every request frame that passed its checksum.
pub trait PacketHandler {
    /// Replaces `packet` with the response to send back.
    fn handle_packet(&mut self, packet: &mut Packet);
}

/// `(command + len + Σ body) mod 65536`.
pub fn checksum(command: u8, body: &[u8]) -> u16 {
    body.iter().fold(
        (command as u16).wrapping_add(body.len() as u16),
        |sum, &b| sum.wrapping_add(b as u16),
    )
}

/// Wire bytes of a request frame, from preamble to checksum.
///
/// The trailing device ID and status positions are clocked separately by the
/// sender, so they are not included. Bodies longer than 255 bytes are
/// truncated.
pub fn encode_packet(command: u8, body: &[u8]) -> Vec<u8> {
    let body = &body[..body.len().min(MAX_BODY_LEN)];
    let sum = checksum(command, body);

    let mut buf = Vec::with_capacity(8 + body.len());
    buf.extend_from_slice(&[PREAMBLE_1, PREAMBLE_2, command, 0x00, 0x00, body.len() as u8]);
    buf.extend_from_slice(body);
    buf.extend_from_slice(&sum.to_be_bytes());
    buf
}

/// Half-duplex frame state machine.
#[derive(Debug)]
pub struct Framer {
    state: FramerState,
    is_sending: bool,
    packet: Packet,
    cursor: usize,
    checksum: u16,
    device: MobileDevice,
}

impl Framer {
    pub fn new(device: MobileDevice) -> Self {
        Self {
            state: FramerState::Idle,
            is_sending: false,
            packet: Packet {
                command: 0,
                body: Vec::with_capacity(MAX_BODY_LEN),
            },
            cursor: 0,
            checksum: 0,
            device,
        }
    }

    pub fn state(&self) -> FramerState {
        self.state
    }

    pub fn is_sending(&self) -> bool {
        self.is_sending
    }

    /// True while a request is being received or a response awaits replay.
    pub fn in_exchange(&self) -> bool {
        self.state != FramerState::Idle || self.is_sending
    }

    pub fn device(&self) -> MobileDevice {
        self.device
    }

    pub fn set_device(&mut self, device: MobileDevice) {
        self.device = device;
    }

    /// The frame currently being received or replayed.
    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    /// Drops any partial frame and returns to receiving.
    pub fn reset(&mut self) {
        self.state = FramerState::Idle;
        self.is_sending = false;
        self.cursor = 0;
        self.checksum = 0;
        self.packet.command = 0;
        self.packet.body.clear();
    }

    /// Consumes one byte clocked in by the console and returns the byte to
    /// clock out on the same transfer.
    pub fn handle_byte<H: PacketHandler + ?Sized>(&mut self, value: u8, handler: &mut H) -> u8 {
        let out = match self.state {
            FramerState::Idle => {
                if self.is_sending {
                    self.state = FramerState::Preamble;
                    PREAMBLE_1
                } else {
                    if value == PREAMBLE_1 {
                        self.state = FramerState::Preamble;
                    }
                    0x00
                }
            }
            FramerState::Preamble => {
                if self.is_sending {
                    self.state = FramerState::CommandByte;
                    PREAMBLE_2
                } else {
                    if value == PREAMBLE_2 {
                        self.state = FramerState::CommandByte;
                    } else {
                        debug!(target: "mobile", "bad preamble byte {value:02X}, resyncing");
                        self.state = FramerState::Idle;
                    }
                    0x00
                }
            }
            FramerState::CommandByte => {
                self.state = FramerState::Reserved1;
                if self.is_sending {
                    self.packet.command
                } else {
                    self.packet.command = value;
                    0x00
                }
            }
            FramerState::Reserved1 => {
                self.state = FramerState::Reserved2;
                0x00
            }
            FramerState::Reserved2 => {
                self.state = FramerState::Length;
                0x00
            }
            FramerState::Length => {
                let out = if self.is_sending {
                    self.packet.body.len() as u8
                } else {
                    self.packet.body.clear();
                    self.packet.body.resize(value as usize, 0);
                    0x00
                };
                let len = self.packet.body.len();
                self.checksum = (self.packet.command as u16).wrapping_add(len as u16);
                self.cursor = 0;
                self.state = if len == 0 {
                    FramerState::Checksum1
                } else {
                    FramerState::Body
                };
                out
            }
            FramerState::Body => {
                let out = if self.is_sending {
                    self.packet.body[self.cursor]
                } else {
                    self.packet.body[self.cursor] = value;
                    BODY_ACK
                };
                self.checksum = self
                    .checksum
                    .wrapping_add(self.packet.body[self.cursor] as u16);
                self.cursor += 1;
                if self.cursor >= self.packet.body.len() {
                    self.state = FramerState::Checksum1;
                }
                out
            }
            FramerState::Checksum1 => {
                let [hi, _] = self.checksum.to_be_bytes();
                if self.is_sending {
                    self.state = FramerState::Checksum2;
                    hi
                } else if value != hi {
                    self.checksum_failed(value, hi)
                } else {
                    self.state = FramerState::Checksum2;
                    0x00
                }
            }
            FramerState::Checksum2 => {
                let [_, lo] = self.checksum.to_be_bytes();
                if self.is_sending {
                    self.state = FramerState::DeviceId;
                    lo
                } else if value != lo {
                    self.checksum_failed(value, lo)
                } else {
                    self.state = FramerState::DeviceId;
                    0x00
                }
            }
            FramerState::DeviceId => {
                self.state = FramerState::StatusByte;
                self.device as u8
            }
            FramerState::StatusByte => {
                self.state = FramerState::Idle;
                let out = if self.is_sending {
                    0x00
                } else {
                    let status = 0x80 ^ self.packet.command;
                    handler.handle_packet(&mut self.packet);
                    self.packet.body.truncate(MAX_BODY_LEN);
                    status
                };
                self.is_sending = !self.is_sending;
                out
            }
        };

        trace!(
            target: "mobile",
            "{:?} in={value:02X} out={out:02X} sending={}",
            self.state,
            self.is_sending
        );
        out
    }

    fn checksum_failed(&mut self, got: u8, expected: u8) -> u8 {
        debug!(
            target: "mobile",
            "checksum mismatch on {:02X}: got {got:02X}, expected {expected:02X}; resetting",
            self.packet.command
        );
        self.state = FramerState::Idle;
        self.is_sending = false;
        CHECKSUM_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<Packet>,
        reply: Option<Packet>,
    }

    impl PacketHandler for Recorder {
        fn handle_packet(&mut self, packet: &mut Packet) {
            self.seen.push(packet.clone());
            if let Some(reply) = &self.reply {
                *packet = reply.clone();
            }
        }
    }

    fn clock(framer: &mut Framer, handler: &mut Recorder, bytes: &[u8]) -> Vec<u8> {
        bytes
            .iter()
            .map(|&b| framer.handle_byte(b, handler))
            .collect()
    }

    #[test]
    fn empty_request_completes_after_device_and_status() {
        let mut framer = Framer::new(MobileDevice::Pdc);
        let mut handler = Recorder::default();

        let request = encode_packet(0x17, &[]);
        assert_eq!(request.len(), 8);
        clock(&mut framer, &mut handler, &request);
        assert!(handler.seen.is_empty());
        assert_eq!(framer.state(), FramerState::DeviceId);

        let tail = clock(&mut framer, &mut handler, &[0x80, 0x00]);
        assert_eq!(tail, vec![MobileDevice::Pdc as u8, 0x80 ^ 0x17]);
        assert_eq!(handler.seen, vec![Packet::new(0x17, &[])]);
        assert!(framer.is_sending());
        assert_eq!(framer.state(), FramerState::Idle);
    }

    #[test]
    fn body_bytes_are_acknowledged() {
        let mut framer = Framer::new(MobileDevice::Cdma);
        let mut handler = Recorder::default();

        let out = clock(&mut framer, &mut handler, &encode_packet(0x10, b"NINTENDO"));
        assert_eq!(&out[6..14], &[BODY_ACK; 8]);
        assert_eq!(&out[14..], &[0x00, 0x00]);
    }

    #[test]
    fn bad_preamble_resyncs() {
        let mut framer = Framer::new(MobileDevice::Pdc);
        let mut handler = Recorder::default();

        clock(&mut framer, &mut handler, &[0x99, 0x12]);
        assert_eq!(framer.state(), FramerState::Idle);
        clock(&mut framer, &mut handler, &[0x99, 0x66]);
        assert_eq!(framer.state(), FramerState::CommandByte);
    }

    #[test]
    fn corrupt_high_checksum_byte_resets() {
        let mut framer = Framer::new(MobileDevice::Pdc);
        let mut handler = Recorder::default();

        let mut request = encode_packet(0x28, b"example.com");
        let hi = request.len() - 2;
        request[hi] ^= 0x01;
        let out = clock(&mut framer, &mut handler, &request[..=hi]);

        assert_eq!(out.last(), Some(&CHECKSUM_ERROR));
        assert_eq!(framer.state(), FramerState::Idle);
        assert!(!framer.is_sending());
        assert!(handler.seen.is_empty());
    }

    #[test]
    fn corrupt_low_checksum_byte_resets() {
        let mut framer = Framer::new(MobileDevice::Pdc);
        let mut handler = Recorder::default();

        let mut request = encode_packet(0x12, b"#9677");
        let lo = request.len() - 1;
        request[lo] = request[lo].wrapping_add(1);
        let out = clock(&mut framer, &mut handler, &request);

        assert_eq!(out.last(), Some(&CHECKSUM_ERROR));
        assert_eq!(framer.state(), FramerState::Idle);
        assert!(!framer.is_sending());
    }

    #[test]
    fn response_is_replayed_with_checksum() {
        let mut framer = Framer::new(MobileDevice::Phs);
        let mut handler = Recorder {
            reply: Some(Packet::new(0xA3, &[0xFF])),
            ..Recorder::default()
        };

        let mut request = encode_packet(0x23, &[127, 0, 0, 1, 0, 110]);
        request.extend_from_slice(&[0x80, 0x00]);
        clock(&mut framer, &mut handler, &request);

        let out = clock(&mut framer, &mut handler, &[BODY_ACK; 11]);
        let sum = checksum(0xA3, &[0xFF]).to_be_bytes();
        assert_eq!(
            out,
            vec![
                0x99,
                0x66,
                0xA3,
                0x00,
                0x00,
                0x01,
                0xFF,
                sum[0],
                sum[1],
                MobileDevice::Phs as u8,
                0x00
            ]
        );
        assert!(!framer.is_sending());
        assert_eq!(framer.state(), FramerState::Idle);
        assert_eq!(handler.seen.len(), 1);
    }

    #[test]
    fn reset_mid_frame_returns_to_idle() {
        let mut framer = Framer::new(MobileDevice::Pdc);
        let mut handler = Recorder::default();

        clock(&mut framer, &mut handler, &[0x99, 0x66, 0x10, 0x00, 0x00, 0x08, b'N']);
        assert_eq!(framer.state(), FramerState::Body);
        framer.reset();

        assert_eq!(framer.state(), FramerState::Idle);
        assert!(!framer.in_exchange());
        assert!(framer.packet().body.is_empty());
    }

    #[test]
    fn checksum_wraps_at_16_bits() {
        let body = [0xFF; 255];
        assert_eq!(checksum(0xFF, &body), (0xFF + 0xFF + 0xFF * 255) as u16);
        let big = vec![0xFFu8; 300];
        let wrapped = big
            .iter()
            .fold(0x10u16 + 300, |s, &b| s.wrapping_add(b as u16));
        assert_eq!(checksum(0x10, &big), wrapped);
    }
}
