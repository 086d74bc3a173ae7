use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// The logical connection to an external server.
///
/// This tracks what the game asked for; whether a real socket backs it is up
/// to the host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerSession {
    pub host: [u8; 4],
    pub port: u16,
    pub is_open: bool,
}

impl ServerSession {
    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.host)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip(), self.port))
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for ServerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port)
    }
}

/// Phone line and ISP login flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineState {
    pub phone_line_busy: bool,
    pub logged_in: bool,
}

#[cfg(test)]
mod tests {
    use super::ServerSession;

    #[test]
    fn formats_as_dotted_quad() {
        let session = ServerSession {
            host: [192, 168, 0, 7],
            port: 110,
            is_open: true,
        };
        assert_eq!(session.to_string(), "192.168.0.7:110");
        assert_eq!(session.ip().to_string(), "192.168.0.7");
    }

    #[test]
    fn reset_closes_and_zeroes() {
        let mut session = ServerSession {
            host: [1, 2, 3, 4],
            port: 80,
            is_open: true,
        };
        session.reset();
        assert_eq!(session, ServerSession::default());
    }
}
