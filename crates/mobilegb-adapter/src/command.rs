//! Command dispatch for completed request frames.

use log::{debug, info, warn};

use crate::config::ConfigStore;
use crate::fake_server::FakeServer;
use crate::frame::{CHECKSUM_ERROR, MAX_BODY_LEN, Packet, PacketHandler};
use crate::session::{LineState, ServerSession};
use crate::{Capability, MobileHost};

/// Access numbers of the DION ISP (PDC and CDMA). Dialing them never
/// reaches the host.
pub const DION_NUMBERS: [&str; 2] = ["#9677", "0077487751"];

/// Address returned for DNS queries when the host cannot resolve.
pub const FALLBACK_DNS_ADDRESS: &str = "200.200.200.200";

/// Telephone status reported while a call is up.
pub const LINE_BUSY: u8 = 0x05;

/// Response command of a successful open-connection request.
pub const OPEN_TCP_REPLY: u8 = 0xA3;
/// Response command of a data transfer.
pub const TRANSFER_REPLY: u8 = 0x95;
/// Response command of a data transfer without an open connection.
pub const NOT_CONNECTED_REPLY: u8 = 0x9F;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    BeginSession = 0x10,
    EndSession = 0x11,
    Dial = 0x12,
    HangUp = 0x13,
    TransferData = 0x15,
    TelephoneStatus = 0x17,
    ReadConfig = 0x19,
    WriteConfig = 0x1A,
    IspLogin = 0x21,
    IspLogout = 0x22,
    OpenTcp = 0x23,
    CloseTcp = 0x24,
    DnsQuery = 0x28,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x10 => Self::BeginSession,
            0x11 => Self::EndSession,
            0x12 => Self::Dial,
            0x13 => Self::HangUp,
            0x15 => Self::TransferData,
            0x17 => Self::TelephoneStatus,
            0x19 => Self::ReadConfig,
            0x1A => Self::WriteConfig,
            0x21 => Self::IspLogin,
            0x22 => Self::IspLogout,
            0x23 => Self::OpenTcp,
            0x24 => Self::CloseTcp,
            0x28 => Self::DnsQuery,
            other => return Err(other),
        })
    }
}

/// Drives the host and the session state for each request.
pub(crate) struct CommandProcessor {
    host: Box<dyn MobileHost>,
    pub(crate) session: ServerSession,
    pub(crate) line: LineState,
    pub(crate) config: ConfigStore,
    fake: FakeServer,
    response: Vec<u8>,
}

impl CommandProcessor {
    pub(crate) fn new(host: Box<dyn MobileHost>, config: ConfigStore) -> Self {
        Self {
            host,
            session: ServerSession::default(),
            line: LineState::default(),
            config,
            fake: FakeServer::default(),
            response: Vec::with_capacity(MAX_BODY_LEN),
        }
    }

    pub(crate) fn host_mut(&mut self) -> &mut dyn MobileHost {
        self.host.as_mut()
    }

    /// Forgets the session and line flags. Configuration is kept.
    pub(crate) fn reset(&mut self) {
        self.session.reset();
        self.line = LineState::default();
        self.fake = FakeServer::default();
    }

    /// Runs `command` and leaves its payload in `self.response`.
    ///
    /// Returns the command byte the response frame carries.
    fn dispatch(&mut self, command: u8, body: &[u8]) -> u8 {
        let Ok(cmd) = Command::try_from(command) else {
            warn!(target: "mobile", "unhandled command {command:02X}");
            return command;
        };

        match cmd {
            Command::BeginSession => {
                debug!(target: "mobile", "session begun");
                self.response.extend_from_slice(body);
            }
            Command::EndSession => {
                let _ = self.host.disconnect();
                info!(target: "mobile", "disconnected from {}", self.session);
                self.session.reset();
                self.line.phone_line_busy = false;
            }
            Command::Dial => self.dial(body),
            Command::HangUp => {
                let _ = self.host.hang_up();
                info!(target: "mobile", "phone line freed");
                self.line.phone_line_busy = false;
            }
            Command::TransferData => return self.transfer(body),
            Command::TelephoneStatus => {
                let status = if self.line.phone_line_busy { LINE_BUSY } else { 0x00 };
                debug!(target: "mobile", "line status {status:02X}");
                self.response.push(status);
            }
            Command::ReadConfig => self.read_config(body),
            Command::WriteConfig => self.write_config(body),
            Command::IspLogin => self.login(body),
            Command::IspLogout => {
                let _ = self.host.logout();
                info!(target: "mobile", "logged out of ISP");
                self.line.logged_in = false;
            }
            Command::OpenTcp => {
                self.open_tcp(body);
                return OPEN_TCP_REPLY;
            }
            Command::CloseTcp => {
                let _ = self.host.disconnect();
                info!(target: "mobile", "closed connection to {}", self.session);
                self.session.reset();
            }
            Command::DnsQuery => self.dns_query(body),
        }

        command
    }

    fn dial(&mut self, body: &[u8]) {
        let number = String::from_utf8_lossy(body);
        info!(target: "mobile", "calling {number}");

        if DION_NUMBERS.iter().any(|&dion| dion == number) {
            debug!(target: "mobile", "faked call to ISP access number");
            self.line.phone_line_busy = true;
            return;
        }

        match self.host.dial(&number) {
            Capability::Present(true) => self.line.phone_line_busy = true,
            Capability::Present(false) => info!(target: "mobile", "unable to call {number}"),
            Capability::Missing => debug!(target: "mobile", "no dialer; {number} not called"),
        }
    }

    fn transfer(&mut self, body: &[u8]) -> u8 {
        if !self.session.is_open {
            self.response.push(0x00);
            return NOT_CONNECTED_REPLY;
        }
        if body.is_empty() {
            return Command::TransferData as u8;
        }

        match self.host.send_data_to_server(&self.session, body) {
            Capability::Present(true) => {}
            Capability::Present(false) => {
                info!(target: "mobile", "unable to send data to {}", self.session);
                self.response.push(0x00);
                return Command::TransferData as u8;
            }
            Capability::Missing => self.fake.store(body),
        }

        match self.host.receive_data_from_server() {
            Capability::Present(Some(data)) => {
                self.response.push(0x00);
                let room = MAX_BODY_LEN - 1;
                self.response.extend_from_slice(&data[..data.len().min(room)]);
            }
            Capability::Present(None) => self.response.push(0x00),
            Capability::Missing => self.fake.respond(self.session.port, &mut self.response),
        }

        TRANSFER_REPLY
    }

    fn read_config(&mut self, body: &[u8]) {
        let [offset, len, ..] = *body else {
            warn!(target: "mobile", "config read request too short");
            return;
        };

        match self.host.read_configuration(offset, len) {
            Capability::Present(Some(data)) => {
                self.response.push(offset);
                let len = data.len().min(len as usize).min(MAX_BODY_LEN - 1);
                self.response.extend_from_slice(&data[..len]);
            }
            Capability::Present(None) => {
                info!(target: "mobile", "host could not read config at {offset}");
            }
            Capability::Missing => {
                if let Ok(data) = self.config.read(offset as usize, len as usize) {
                    self.response.push(offset);
                    self.response.extend_from_slice(data);
                }
            }
        }
    }

    fn write_config(&mut self, body: &[u8]) {
        let Some((&offset, data)) = body.split_first() else {
            warn!(target: "mobile", "config write request too short");
            return;
        };

        if self.config.write(offset as usize, data).is_err() {
            return;
        }
        if let Ok(written) = self.config.read(offset as usize, data.len()) {
            let _ = self.host.save_configuration(offset, written);
        }
    }

    fn login(&mut self, body: &[u8]) {
        let user_len = body.first().copied().unwrap_or(0) as usize;
        let pass_len = body.get(1).copied().unwrap_or(0) as usize;
        let fields = body.get(2..).unwrap_or_default();
        let (user, rest) = fields.split_at(user_len.min(fields.len()));
        let password = &rest[..pass_len.min(rest.len())];

        let ok = match self.host.login(user, password) {
            Capability::Present(ok) => ok,
            Capability::Missing => {
                debug!(target: "mobile", "faked ISP login");
                true
            }
        };

        if ok {
            info!(target: "mobile", "logged in to ISP");
            self.line.logged_in = true;
            self.response.push(0x00);
        } else {
            info!(target: "mobile", "ISP login failed");
            self.response.push(CHECKSUM_ERROR);
        }
    }

    fn open_tcp(&mut self, body: &[u8]) {
        self.session.reset();
        let [a, b, c, d, port_hi, port_lo, ..] = *body else {
            warn!(target: "mobile", "open connection request too short");
            self.response.push(0x00);
            return;
        };
        self.session.host = [a, b, c, d];
        self.session.port = u16::from_be_bytes([port_hi, port_lo]);

        let connected = match self.host.connect(&self.session) {
            Capability::Present(ok) => ok,
            Capability::Missing => {
                debug!(target: "mobile", "faked connection to {}", self.session);
                true
            }
        };

        if connected {
            info!(target: "mobile", "connected to {}", self.session);
            self.session.is_open = true;
            self.response.push(0xFF);
        } else {
            info!(target: "mobile", "failed to connect to {}", self.session);
            self.response.push(0x00);
        }
    }

    fn dns_query(&mut self, body: &[u8]) {
        let name = String::from_utf8_lossy(body);
        match self.host.resolve_dns(&name) {
            Capability::Present(Some(ip)) => {
                debug!(target: "mobile", "resolved {name} to {ip}");
                let ip = ip.as_bytes();
                self.response
                    .extend_from_slice(&ip[..ip.len().min(MAX_BODY_LEN)]);
            }
            Capability::Present(None) => {
                info!(target: "mobile", "unable to resolve {name}");
                self.response.push(CHECKSUM_ERROR);
            }
            Capability::Missing => {
                debug!(target: "mobile", "faked DNS query for {name}");
                self.response
                    .extend_from_slice(FALLBACK_DNS_ADDRESS.as_bytes());
            }
        }
    }
}

impl PacketHandler for CommandProcessor {
    fn handle_packet(&mut self, packet: &mut Packet) {
        self.response.clear();
        packet.command = self.dispatch(packet.command, &packet.body);
        self.response.truncate(MAX_BODY_LEN);
        std::mem::swap(&mut packet.body, &mut self.response);
    }
}
