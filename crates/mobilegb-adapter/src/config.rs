//! The adapter's 192-byte configuration memory.
//!
//! Games store the ISP settings here, including the `dion.ne.jp` mail domain.
//! When a replacement domain is configured, every write is scanned for that
//! marker and rewritten in place. The region ends with a little-endian
//! checksum that the game verifies, so the difference is folded into it once
//! the write reaching the final bytes arrives.

use log::{debug, warn};
use thiserror::Error;

/// Size of the configuration region.
pub const CONFIG_SIZE: usize = 192;
/// Length of the ISP domain and of any replacement.
pub const DOMAIN_LEN: usize = 10;
/// ISP domain hardcoded by the games.
pub const DOMAIN_MARKER: &[u8; DOMAIN_LEN] = b"dion.ne.jp";

const CHECKSUM_OFFSET: usize = CONFIG_SIZE - 2;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config access out of bounds: offset {offset} + {len} bytes exceeds the 192-byte region")]
    OutOfBounds { offset: usize, len: usize },
}

/// Checksum correction owed for substitutions not yet folded in.
///
/// `checksum_written` is set once the trailing checksum of the current block
/// has arrived; substitutions found after that are folded in immediately.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DomainPatch {
    pub pending: bool,
    pub addend: u16,
    pub subtrahend: u16,
    pub checksum_written: bool,
}

#[derive(Clone, Debug)]
pub struct ConfigStore {
    data: [u8; CONFIG_SIZE],
    replacement: Option<[u8; DOMAIN_LEN]>,
    patch: DomainPatch,
    // Bytes written since the current block started.
    written: [bool; CONFIG_SIZE],
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ConfigStore {
    pub fn new(replacement: Option<[u8; DOMAIN_LEN]>) -> Self {
        Self {
            data: [0; CONFIG_SIZE],
            replacement,
            patch: DomainPatch::default(),
            written: [false; CONFIG_SIZE],
        }
    }

    pub fn replacement_domain(&self) -> Option<&[u8; DOMAIN_LEN]> {
        self.replacement.as_ref()
    }

    pub fn set_replacement_domain(&mut self, replacement: Option<[u8; DOMAIN_LEN]>) {
        self.replacement = replacement;
    }

    pub fn pending_patch(&self) -> DomainPatch {
        self.patch
    }

    pub fn as_bytes(&self) -> &[u8; CONFIG_SIZE] {
        &self.data
    }

    /// Seeds the region from persisted bytes without rewriting anything.
    pub fn load(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(CONFIG_SIZE);
        self.data[..len].copy_from_slice(&bytes[..len]);
        self.patch = DomainPatch::default();
        self.written = [false; CONFIG_SIZE];
    }

    pub fn read(&self, offset: usize, len: usize) -> Result<&[u8], ConfigError> {
        let end = Self::bounds(offset, len)?;
        Ok(&self.data[offset..end])
    }

    pub fn write(&mut self, offset: usize, src: &[u8]) -> Result<(), ConfigError> {
        let end = Self::bounds(offset, src.len())?;
        self.data[offset..end].copy_from_slice(src);

        if let Some(replacement) = self.replacement {
            self.substitute_domains(offset, end, &replacement);
        }

        self.written[offset..end].fill(true);
        if end > CHECKSUM_OFFSET {
            self.patch.checksum_written = true;
        }
        if self.patch.pending && self.patch.checksum_written {
            self.repair_checksum();
        }
        if self.written.iter().all(|&w| w) {
            self.written = [false; CONFIG_SIZE];
            self.patch = DomainPatch::default();
        }
        Ok(())
    }

    fn bounds(offset: usize, len: usize) -> Result<usize, ConfigError> {
        match offset.checked_add(len) {
            Some(end) if end <= CONFIG_SIZE => Ok(end),
            _ => {
                warn!(target: "mobile", "rejected config access at {offset} ({len} bytes)");
                Err(ConfigError::OutOfBounds { offset, len })
            }
        }
    }

    fn substitute_domains(&mut self, start: usize, end: usize, replacement: &[u8; DOMAIN_LEN]) {
        let mut i = start;
        while i + DOMAIN_LEN <= end {
            if &self.data[i..i + DOMAIN_LEN] != DOMAIN_MARKER {
                i += 1;
                continue;
            }

            self.data[i..i + DOMAIN_LEN].copy_from_slice(replacement);
            self.patch.subtrahend = self.patch.subtrahend.wrapping_add(byte_sum(DOMAIN_MARKER));
            self.patch.addend = self.patch.addend.wrapping_add(byte_sum(replacement));
            self.patch.pending = true;
            debug!(target: "mobile", "replaced ISP domain at config offset {i}");
            i += DOMAIN_LEN;
        }
    }

    fn repair_checksum(&mut self) {
        let stored = u16::from_le_bytes([self.data[CHECKSUM_OFFSET], self.data[CHECKSUM_OFFSET + 1]]);
        let repaired = stored
            .wrapping_sub(self.patch.subtrahend)
            .wrapping_add(self.patch.addend);
        self.data[CHECKSUM_OFFSET..].copy_from_slice(&repaired.to_le_bytes());
        debug!(target: "mobile", "config checksum {stored:04X} -> {repaired:04X}");
        self.patch.pending = false;
        self.patch.addend = 0;
        self.patch.subtrahend = 0;
    }
}

fn byte_sum(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |sum, &b| sum.wrapping_add(b as u16))
}
