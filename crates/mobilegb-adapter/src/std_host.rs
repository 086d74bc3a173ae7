use std::fs;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::CONFIG_SIZE;
use crate::session::ServerSession;
use crate::{Capability, MOBILE_MAX_CONNECTIONS, MobileHost};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest a send may wait for the peer to drain its receive window.
const SEND_TIMEOUT: Duration = Duration::from_millis(250);
const RECV_CHUNK: usize = 254;

/// A std host implementation using `socket2`.
///
/// Connections are opened with a bounded blocking connect, then switched to
/// non-blocking so a receive never stalls emulation. Configuration memory is
/// mirrored to `config_path` when one is given.
#[derive(Debug)]
pub struct StdMobileHost {
    config_path: Option<PathBuf>,
    config: [u8; CONFIG_SIZE],
    conns: [Option<Socket>; MOBILE_MAX_CONNECTIONS],
    active: Option<usize>,
}

impl StdMobileHost {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        let mut config = [0u8; CONFIG_SIZE];
        if let Some(bytes) = config_path.as_ref().and_then(|path| fs::read(path).ok()) {
            let len = bytes.len().min(config.len());
            config[..len].copy_from_slice(&bytes[..len]);
        }

        Self {
            config_path,
            config,
            conns: std::array::from_fn(|_| None),
            active: None,
        }
    }

    fn save_config(&self) {
        let Some(path) = &self.config_path else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(e) = fs::write(path, self.config) {
            warn!(target: "mobile", "Failed to save config {}: {e}", path.display());
        }
    }

    fn open(addr: SocketAddr) -> io::Result<Socket> {
        let domain = match addr.ip() {
            IpAddr::V4(_) => Domain::IPV4,
            IpAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.connect_timeout(&addr.into(), CONNECT_TIMEOUT)?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }

    fn free_slot(&mut self) -> usize {
        let idx = self
            .conns
            .iter()
            .position(Option::is_none)
            .unwrap_or_default();
        self.conns[idx] = None;
        idx
    }

    fn active_socket(&mut self) -> Option<&mut Socket> {
        self.conns[self.active?].as_mut()
    }

    fn close_active(&mut self) {
        if let Some(idx) = self.active.take() {
            self.conns[idx] = None;
        }
    }

    pub fn open_connections(&self) -> usize {
        self.conns.iter().filter(|c| c.is_some()).count()
    }
}

impl MobileHost for StdMobileHost {
    fn dial(&mut self, number: &str) -> Capability<bool> {
        debug!(target: "mobile", "line up for {number}");
        Capability::Present(true)
    }

    fn hang_up(&mut self) -> Capability<()> {
        self.conns = std::array::from_fn(|_| None);
        self.active = None;
        Capability::Present(())
    }

    fn connect(&mut self, server: &ServerSession) -> Capability<bool> {
        self.close_active();
        match Self::open(server.socket_addr()) {
            Ok(socket) => {
                let idx = self.free_slot();
                self.conns[idx] = Some(socket);
                self.active = Some(idx);
                Capability::Present(true)
            }
            Err(e) => {
                info!(target: "mobile", "connect to {server} failed: {e}");
                Capability::Present(false)
            }
        }
    }

    fn disconnect(&mut self) -> Capability<()> {
        self.close_active();
        Capability::Present(())
    }

    fn resolve_dns(&mut self, host: &str) -> Capability<Option<String>> {
        let resolved = match (host, 0).to_socket_addrs() {
            Ok(mut addrs) => addrs.find(SocketAddr::is_ipv4).map(|a| a.ip().to_string()),
            Err(e) => {
                info!(target: "mobile", "lookup of {host} failed: {e}");
                None
            }
        };
        Capability::Present(resolved)
    }

    fn send_data_to_server(&mut self, _server: &ServerSession, data: &[u8]) -> Capability<bool> {
        let Some(socket) = self.active_socket() else {
            return Capability::Present(false);
        };
        let deadline = Instant::now() + SEND_TIMEOUT;
        let mut rest = data;
        while !rest.is_empty() {
            match socket.write(rest) {
                Ok(0) => {
                    info!(target: "mobile", "send failed: connection closed");
                    return Capability::Present(false);
                }
                Ok(n) => rest = &rest[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        info!(target: "mobile", "send stalled; peer is not reading");
                        return Capability::Present(false);
                    }
                    std::thread::yield_now();
                }
                Err(e) => {
                    info!(target: "mobile", "send failed: {e}");
                    return Capability::Present(false);
                }
            }
        }
        Capability::Present(true)
    }

    fn receive_data_from_server(&mut self) -> Capability<Option<Vec<u8>>> {
        let Some(socket) = self.active_socket() else {
            return Capability::Present(None);
        };
        let mut buf = [0u8; RECV_CHUNK];
        let received = match socket.read(&mut buf) {
            Ok(0) => {
                debug!(target: "mobile", "server closed the connection");
                None
            }
            Ok(n) => Some(buf[..n].to_vec()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Some(Vec::new()),
            Err(e) => {
                info!(target: "mobile", "receive failed: {e}");
                None
            }
        };
        if received.is_none() {
            self.close_active();
        }
        Capability::Present(received)
    }

    fn read_configuration(&mut self, offset: u8, len: u8) -> Capability<Option<Vec<u8>>> {
        let (offset, len) = (offset as usize, len as usize);
        let bytes = self.config.get(offset..offset + len).map(<[u8]>::to_vec);
        Capability::Present(bytes)
    }

    fn save_configuration(&mut self, offset: u8, data: &[u8]) -> Capability<()> {
        let offset = offset as usize;
        match self.config.get_mut(offset..offset + data.len()) {
            Some(dst) => {
                dst.copy_from_slice(data);
                self.save_config();
            }
            None => warn!(target: "mobile", "config save at {offset} out of range"),
        }
        Capability::Present(())
    }
}
