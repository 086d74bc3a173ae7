//! Game Boy Mobile Adapter emulation.
//!
//! This crate provides a host-driven [`MobileAdapter`] that speaks the
//! adapter's serial protocol byte by byte and can be wired into a console's
//! serial unit via [`MobileLinkPort`]. Network and storage side effects go
//! through a [`MobileHost`]; every host capability is optional, and a missing
//! one selects a built-in fallback so the adapter stays usable offline.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mobilegb_core::serial::LinkPort;
use mobilegb_core::timing::Timebase;

/// Command dispatch for completed request frames.
pub mod command;

/// The 192-byte configuration memory and ISP domain rewriting.
pub mod config;

/// Canned POP3 replies used without a network backend.
pub mod fake_server;

/// Serial framing state machine and wire helpers.
pub mod frame;

/// Logical server connection and line flags.
pub mod session;

/// TOML settings for frontends.
pub mod settings;

mod std_host;

pub use std_host::StdMobileHost;

use command::CommandProcessor;
use config::{CONFIG_SIZE, ConfigStore, DOMAIN_LEN};
use frame::{Framer, FramerState};
use session::{LineState, ServerSession};
use settings::MobileSettings;

/// Maximum number of sockets a host implementation tracks at once.
pub const MOBILE_MAX_CONNECTIONS: usize = 2;
/// A frame exchange idle for this long is abandoned.
pub const SERIAL_TIMEOUT_MS: u32 = 500;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
/// Device ID reported after every frame; selects the modem generation.
pub enum MobileDevice {
    #[default]
    Pdc = 0x88,
    Cdma = 0x89,
    Phs = 0x8A,
    Ddi = 0x8B,
}

impl MobileDevice {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x88 => Some(Self::Pdc),
            0x89 => Some(Self::Cdma),
            0x8A => Some(Self::Phs),
            0x8B => Some(Self::Ddi),
            _ => None,
        }
    }
}

impl std::str::FromStr for MobileDevice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdc" | "blue" => Ok(Self::Pdc),
            "cdma" | "yellow" => Ok(Self::Cdma),
            "phs" | "green" => Ok(Self::Phs),
            "ddi" | "red" => Ok(Self::Ddi),
            other => Err(format!("unknown device {other:?}")),
        }
    }
}

/// Result of a host capability call.
///
/// `Missing` means the host does not implement the operation at all, which
/// selects the adapter's fallback behavior. It is not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Capability<T> {
    Missing,
    Present(T),
}

impl<T> Default for Capability<T> {
    fn default() -> Self {
        Capability::Missing
    }
}

impl<T> Capability<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Capability::Present(_))
    }

    pub fn present(self) -> Option<T> {
        match self {
            Capability::Present(value) => Some(value),
            Capability::Missing => None,
        }
    }
}

/// Host callbacks used by [`MobileAdapter`].
///
/// Every method defaults to [`Capability::Missing`]; implement only what the
/// host can actually do.
pub trait MobileHost: Send {
    /// Places a call. `true` means the line is up.
    fn dial(&mut self, _number: &str) -> Capability<bool> {
        Capability::Missing
    }

    fn hang_up(&mut self) -> Capability<()> {
        Capability::Missing
    }

    /// Opens the connection described by `server`.
    fn connect(&mut self, _server: &ServerSession) -> Capability<bool> {
        Capability::Missing
    }

    fn disconnect(&mut self) -> Capability<()> {
        Capability::Missing
    }

    /// Resolves `host` to a textual IPv4 address.
    fn resolve_dns(&mut self, _host: &str) -> Capability<Option<String>> {
        Capability::Missing
    }

    fn send_data_to_server(&mut self, _server: &ServerSession, _data: &[u8]) -> Capability<bool> {
        Capability::Missing
    }

    /// Returns whatever arrived since the last call; `None` on failure.
    fn receive_data_from_server(&mut self) -> Capability<Option<Vec<u8>>> {
        Capability::Missing
    }

    fn login(&mut self, _user: &[u8], _password: &[u8]) -> Capability<bool> {
        Capability::Missing
    }

    fn logout(&mut self) -> Capability<()> {
        Capability::Missing
    }

    /// Reads `len` bytes of persisted configuration at `offset`.
    fn read_configuration(&mut self, _offset: u8, _len: u8) -> Capability<Option<Vec<u8>>> {
        Capability::Missing
    }

    /// Persists configuration bytes written by the game.
    fn save_configuration(&mut self, _offset: u8, _data: &[u8]) -> Capability<()> {
        Capability::Missing
    }
}

/// A host with no capabilities: the adapter runs entirely on its fallbacks.
#[derive(Debug, Default)]
pub struct NullMobileHost;

impl MobileHost for NullMobileHost {}

#[derive(Error, Debug)]
pub enum MobileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings: {0}")]
    Settings(#[from] toml::de::Error),

    #[error("replacement domain must be exactly 10 ASCII bytes, got {0:?}")]
    InvalidDomain(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Parses a replacement for the ISP domain.
pub fn parse_domain(domain: &str) -> Result<[u8; DOMAIN_LEN], MobileError> {
    if !domain.is_ascii() {
        return Err(MobileError::InvalidDomain(domain.to_owned()));
    }
    domain
        .as_bytes()
        .try_into()
        .map_err(|_| MobileError::InvalidDomain(domain.to_owned()))
}

/// One emulated adapter: framer, command processor and host.
///
/// Design notes:
/// - `transfer_byte()` is intended to be called via the console serial unit.
/// - `tick()` advances the optional timebase used to abandon stalled frames.
pub struct MobileAdapter {
    framer: Framer,
    processor: CommandProcessor,
    timebase: Timebase,
}

impl fmt::Debug for MobileAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MobileAdapter")
            .field("state", &self.framer.state())
            .field("is_sending", &self.framer.is_sending())
            .field("session", &self.processor.session)
            .finish_non_exhaustive()
    }
}

impl MobileAdapter {
    /// Create a new adapter instance.
    ///
    /// If the host can read configuration, the region is seeded from it.
    pub fn new(host: Box<dyn MobileHost>) -> Self {
        Self::with_config(host, ConfigStore::default())
    }

    fn with_config(mut host: Box<dyn MobileHost>, mut config: ConfigStore) -> Self {
        if let Capability::Present(Some(bytes)) =
            host.read_configuration(0, CONFIG_SIZE as u8)
        {
            config.load(&bytes);
        }

        Self {
            framer: Framer::new(MobileDevice::default()),
            processor: CommandProcessor::new(host, config),
            timebase: Timebase::default(),
        }
    }

    /// Create an adapter configured from frontend settings.
    pub fn with_settings(
        host: Box<dyn MobileHost>,
        settings: &MobileSettings,
    ) -> Result<Self, MobileError> {
        let replacement = settings.replacement_domain()?;
        let mut adapter = Self::with_config(host, ConfigStore::new(replacement));
        adapter.set_device(settings.device);
        adapter.timebase.set_frequency(settings.frequency_hz);
        Ok(adapter)
    }

    /// Convenience constructor for the built-in socket host.
    pub fn new_std(settings: &MobileSettings) -> Result<Self, MobileError> {
        let host = Box::new(StdMobileHost::new(settings.config_path.clone()));
        Self::with_settings(host, settings)
    }

    /// Convenience constructor for a fully offline adapter.
    pub fn offline() -> Self {
        Self::new(Box::new(NullMobileHost))
    }

    /// Transfers a single serial byte.
    ///
    /// Returns the byte the adapter drives onto the line for this transfer.
    pub fn transfer_byte(&mut self, byte: u8) -> u8 {
        self.timebase.latch();
        self.framer.handle_byte(byte, &mut self.processor)
    }

    /// Advance emulated time by `cycles` of the configured frequency.
    ///
    /// An exchange that saw no byte for [`SERIAL_TIMEOUT_MS`] is dropped.
    pub fn tick(&mut self, cycles: u32) {
        self.timebase.advance(cycles);
        if self.framer.in_exchange() && self.timebase.check_ms(SERIAL_TIMEOUT_MS) {
            debug!(target: "mobile", "serial exchange timed out in {:?}", self.framer.state());
            self.framer.reset();
        }
    }

    /// Host-initiated reset: drops the frame in flight, the server session
    /// and the line/login flags. Configuration memory is untouched.
    pub fn reset(&mut self) {
        self.framer.reset();
        self.processor.reset();
    }

    pub fn device(&self) -> MobileDevice {
        self.framer.device()
    }

    pub fn set_device(&mut self, device: MobileDevice) {
        self.framer.set_device(device);
    }

    pub fn set_replacement_domain(&mut self, domain: Option<&str>) -> Result<(), MobileError> {
        let replacement = domain.map(parse_domain).transpose()?;
        self.processor.config.set_replacement_domain(replacement);
        Ok(())
    }

    pub fn set_frequency(&mut self, frequency_hz: u32) {
        self.timebase.set_frequency(frequency_hz);
    }

    pub fn state(&self) -> FramerState {
        self.framer.state()
    }

    pub fn is_sending(&self) -> bool {
        self.framer.is_sending()
    }

    pub fn session(&self) -> &ServerSession {
        &self.processor.session
    }

    pub fn line_state(&self) -> LineState {
        self.processor.line
    }

    pub fn config(&self) -> &ConfigStore {
        &self.processor.config
    }

    pub fn host_mut(&mut self) -> &mut dyn MobileHost {
        self.processor.host_mut()
    }
}

/// A `LinkPort` adapter that forwards each byte to a shared [`MobileAdapter`].
pub struct MobileLinkPort {
    adapter: Arc<Mutex<MobileAdapter>>,
}

impl MobileLinkPort {
    /// Wraps a [`MobileAdapter`] behind a mutex and exposes it as a `LinkPort`.
    pub fn new(adapter: Arc<Mutex<MobileAdapter>>) -> Self {
        Self { adapter }
    }
}

impl LinkPort for MobileLinkPort {
    fn transfer(&mut self, byte: u8) -> u8 {
        let mut adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
        adapter.transfer_byte(byte)
    }

    fn reset(&mut self) {
        let mut adapter = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
        adapter.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_domain_requires_ten_ascii_bytes() {
        assert_eq!(parse_domain("example.jp").unwrap(), *b"example.jp");
        assert!(matches!(
            parse_domain("short.jp"),
            Err(MobileError::InvalidDomain(_))
        ));
        assert!(parse_domain("ドメイン.jp").is_err());
    }

    #[test]
    fn device_ids_match_wire_values() {
        for device in [
            MobileDevice::Pdc,
            MobileDevice::Cdma,
            MobileDevice::Phs,
            MobileDevice::Ddi,
        ] {
            assert_eq!(MobileDevice::from_id(device as u8), Some(device));
        }
        assert_eq!(MobileDevice::from_id(0x87), None);
        assert_eq!("CDMA".parse::<MobileDevice>(), Ok(MobileDevice::Cdma));
        assert_eq!("red".parse::<MobileDevice>(), Ok(MobileDevice::Ddi));
        assert!("gsm".parse::<MobileDevice>().is_err());
    }

    #[test]
    fn capability_defaults_to_missing() {
        let cap: Capability<bool> = Capability::default();
        assert!(!cap.is_present());
        assert_eq!(Capability::Present(3).present(), Some(3));
    }
}
