//! Canned replies used when the host has no send/receive backend.
//!
//! Only a sliver of POP3 is answered, enough for mail clients to see an empty
//! mailbox. Other ports just get the status byte.

use log::debug;

pub const POP3_PORT: u16 = 110;

const BUFFER_SIZE: usize = 254;

pub(crate) struct FakeServer {
    request: [u8; BUFFER_SIZE],
    len: usize,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self {
            request: [0; BUFFER_SIZE],
            len: 0,
        }
    }
}

impl FakeServer {
    /// Buffers the last request sent to the server.
    pub(crate) fn store(&mut self, data: &[u8]) {
        self.request = [0; BUFFER_SIZE];
        self.len = data.len().min(BUFFER_SIZE);
        self.request[..self.len].copy_from_slice(&data[..self.len]);
    }

    /// Appends the reply to the buffered request: a status byte, then text.
    pub(crate) fn respond(&self, port: u16, out: &mut Vec<u8>) {
        out.push(0x00);
        if port != POP3_PORT {
            return;
        }

        // The first byte of a transfer body is the connection ID.
        let text = self.request.get(1..self.len).unwrap_or_default();
        let reply: &[u8] = if text.starts_with(b"STAT") || text.starts_with(b"LIST 1") {
            b"+OK 0 0"
        } else if text.starts_with(b"LIST ") {
            b"-ERR\r\n"
        } else if text.starts_with(b"LIST") {
            b"+OK Mailbox scan listing follows\r\n.\r\n"
        } else {
            b"+OK\r\n"
        };
        debug!(
            target: "mobile",
            "fake POP3 reply {:?}",
            String::from_utf8_lossy(reply)
        );
        out.extend_from_slice(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(port: u16, request: &[u8]) -> Vec<u8> {
        let mut server = FakeServer::default();
        server.store(request);
        let mut out = Vec::new();
        server.respond(port, &mut out);
        out
    }

    #[test]
    fn pop3_stat_reports_empty_mailbox() {
        assert_eq!(reply(110, b"\x00STAT\r\n"), b"\x00+OK 0 0");
        assert_eq!(reply(110, b"\x00LIST 1\r\n"), b"\x00+OK 0 0");
    }

    #[test]
    fn pop3_list_variants() {
        assert_eq!(reply(110, b"\x00LIST 2\r\n"), b"\x00-ERR\r\n");
        assert_eq!(
            reply(110, b"\x00LIST\r\n"),
            b"\x00+OK Mailbox scan listing follows\r\n.\r\n"
        );
    }

    #[test]
    fn pop3_other_commands_get_ok() {
        assert_eq!(reply(110, b"\x00USER someone\r\n"), b"\x00+OK\r\n");
        assert_eq!(reply(110, b""), b"\x00+OK\r\n");
    }

    #[test]
    fn other_ports_get_status_only() {
        assert_eq!(reply(80, b"\x00GET / HTTP/1.0\r\n"), vec![0x00]);
    }

    #[test]
    fn oversized_request_is_truncated() {
        let mut server = FakeServer::default();
        server.store(&[b'A'; 400]);
        assert_eq!(server.len, BUFFER_SIZE);
    }
}
