use std::path::PathBuf;

use clap::Parser;
use log::{LevelFilter, info};

use mobilegb_adapter::frame::encode_packet;
use mobilegb_adapter::settings::{default_settings_path, load_from_file, try_load_from_file};
use mobilegb_adapter::{MobileAdapter, MobileDevice, MobileError};

/// Drives an emulated Mobile Adapter GB with request frames from the
/// command line and prints each response.
#[derive(Parser)]
struct Args {
    /// Requests as `CMD[:HEXBODY]`, e.g. `10:4E494E54454E444F`
    #[arg(required = true)]
    requests: Vec<String>,

    /// Path to the settings file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Use only the built-in fallbacks (no sockets, no config file)
    #[arg(long)]
    offline: bool,

    /// Override the adapter model (pdc, cdma, phs, ddi)
    #[arg(long)]
    device: Option<MobileDevice>,

    /// Enable debug logging of frames and commands
    #[arg(long)]
    debug: bool,
}

fn parse_hex(text: &str) -> Result<Vec<u8>, MobileError> {
    if text.len() % 2 != 0 {
        return Err(MobileError::InvalidFrame(format!("odd-length hex {text:?}")));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            text.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| MobileError::InvalidFrame(format!("bad hex in {text:?}")))
        })
        .collect()
}

fn parse_request(text: &str) -> Result<(u8, Vec<u8>), MobileError> {
    let (command, body) = text.split_once(':').unwrap_or((text, ""));
    let command = u8::from_str_radix(command, 16)
        .map_err(|_| MobileError::InvalidFrame(format!("bad command in {text:?}")))?;
    let body = parse_hex(body)?;
    if body.len() > 0xFF {
        return Err(MobileError::InvalidFrame(format!(
            "body of {} bytes is too long",
            body.len()
        )));
    }
    Ok((command, body))
}

/// Clocks one request through the adapter and reads the response back.
fn exchange(adapter: &mut MobileAdapter, command: u8, body: &[u8]) -> Result<(u8, Vec<u8>), MobileError> {
    let mut last = 0;
    for b in encode_packet(command, body).into_iter().chain([0x80, 0x00]) {
        last = adapter.transfer_byte(b);
    }
    if !adapter.is_sending() {
        return Err(MobileError::InvalidFrame(format!(
            "adapter rejected command {command:02X} ({last:02X})"
        )));
    }

    let mut header = [0u8; 6];
    for b in header.iter_mut() {
        *b = adapter.transfer_byte(0x4B);
    }
    let body: Vec<u8> = (0..header[5]).map(|_| adapter.transfer_byte(0x4B)).collect();
    // Checksum, device ID and status.
    for _ in 0..4 {
        adapter.transfer_byte(0x4B);
    }
    Ok((header[2], body))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn main() -> Result<(), MobileError> {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if args.debug {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();

    let mut settings = match &args.settings {
        Some(path) => try_load_from_file(path)?,
        None => load_from_file(&default_settings_path()),
    };
    if let Some(device) = args.device {
        settings.device = device;
    }

    let mut adapter = if args.offline {
        MobileAdapter::with_settings(Box::new(mobilegb_adapter::NullMobileHost), &settings)?
    } else {
        MobileAdapter::new_std(&settings)?
    };
    info!("adapter ready as {:?}", adapter.device());

    for request in &args.requests {
        let (command, body) = parse_request(request)?;
        let (reply, payload) = exchange(&mut adapter, command, &body)?;
        println!("{reply:02X}:{}", hex(&payload));
    }

    Ok(())
}
