//! The adapter attached to the console serial shims.

use std::sync::{Arc, Mutex};

use mobilegb_adapter::frame::{FramerState, encode_packet};
use mobilegb_adapter::{MobileAdapter, MobileLinkPort, NullMobileHost};
use mobilegb_core::gba::{GBA_TRANSFER_CYCLES, GbaSerial, REG_SIOCNT, REG_SIODATA8};
use mobilegb_core::serial::{SB, SC, SERIAL_IRQ, Serial};

const SIOCNT_START_IRQ: u16 = 0x4080;

fn shared_adapter() -> Arc<Mutex<MobileAdapter>> {
    Arc::new(Mutex::new(MobileAdapter::new(Box::new(NullMobileHost))))
}

fn gb_transfer(serial: &mut Serial, byte: u8) -> u8 {
    let mut if_reg = 0;
    serial.write(SB, byte);
    serial.write(SC, 0x81);
    serial.step(0, 0x1000, false, &mut if_reg);
    assert_eq!(if_reg & SERIAL_IRQ, SERIAL_IRQ);
    serial.read(SB)
}

fn gba_transfer(sio: &mut GbaSerial, byte: u8) -> u8 {
    sio.write(REG_SIODATA8, byte as u16);
    sio.write(REG_SIOCNT, SIOCNT_START_IRQ);
    assert!(sio.step(GBA_TRANSFER_CYCLES));
    sio.read(REG_SIODATA8) as u8
}

fn request_bytes(command: u8, body: &[u8]) -> Vec<u8> {
    let mut bytes = encode_packet(command, body);
    bytes.extend_from_slice(&[0x80, 0x00]);
    bytes
}

#[test]
fn game_boy_session_over_sb_sc() {
    let adapter = shared_adapter();
    let mut serial = Serial::new(false);
    serial.connect(Box::new(MobileLinkPort::new(Arc::clone(&adapter))));

    let out: Vec<u8> = request_bytes(0x10, b"NINTENDO")
        .into_iter()
        .map(|b| gb_transfer(&mut serial, b))
        .collect();
    assert_eq!(&out[out.len() - 2..], &[0x88, 0x90]);

    let reply: Vec<u8> = (0..18).map(|_| gb_transfer(&mut serial, 0x4B)).collect();
    assert_eq!(&reply[..6], &[0x99, 0x66, 0x10, 0x00, 0x00, 0x08]);
    assert_eq!(&reply[6..14], b"NINTENDO");
    assert_eq!(&reply[16..], &[0x88, 0x00]);
    assert!(!adapter.lock().unwrap().is_sending());
}

#[test]
fn game_boy_reset_reaches_adapter() {
    let adapter = shared_adapter();
    let mut serial = Serial::new(true);
    serial.connect(Box::new(MobileLinkPort::new(Arc::clone(&adapter))));

    for b in &encode_packet(0x10, b"NINTENDO")[..5] {
        gb_transfer(&mut serial, *b);
    }
    assert_ne!(adapter.lock().unwrap().state(), FramerState::Idle);

    serial.reset();
    assert_eq!(adapter.lock().unwrap().state(), FramerState::Idle);
}

#[test]
fn game_boy_advance_session_over_sio() {
    let adapter = shared_adapter();
    let mut sio = GbaSerial::new();
    sio.connect(Box::new(MobileLinkPort::new(Arc::clone(&adapter))));

    let out: Vec<u8> = request_bytes(0x28, b"a.b")
        .into_iter()
        .map(|b| gba_transfer(&mut sio, b))
        .collect();
    assert_eq!(&out[out.len() - 2..], &[0x88, 0xA8]);

    let reply: Vec<u8> = (0..8 + 15 + 2)
        .map(|_| gba_transfer(&mut sio, 0x4B))
        .collect();
    assert_eq!(reply[2], 0x28);
    assert_eq!(reply[5], 15);
    assert_eq!(&reply[6..21], b"200.200.200.200");
}

#[test]
fn poisoned_adapter_still_transfers() {
    let adapter = shared_adapter();
    let poisoner = Arc::clone(&adapter);
    let _ = std::thread::spawn(move || {
        let _guard = poisoner.lock().unwrap();
        panic!("poison the adapter lock");
    })
    .join();
    assert!(adapter.is_poisoned());

    let mut serial = Serial::new(false);
    serial.connect(Box::new(MobileLinkPort::new(adapter)));
    assert_eq!(gb_transfer(&mut serial, 0x99), 0x00);
}
