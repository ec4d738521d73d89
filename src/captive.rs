//! Captive portal DNS resolver.
//!
//! While the hub runs as an access point it answers every DNS query with
//! its own address, so a phone joining the network lands on the hub's web
//! page whatever name it asks for.
//!
//! Only standard queries with uncompressed names are understood. The first
//! question is answered with a single A record; anything else gets no reply.

use log::{debug, info, warn};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Time-to-live of synthesized answers, in seconds.
pub const ANSWER_TTL: u32 = 60;

/// Pause after a socket error before trying again.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(3);

const HEADER_LEN: usize = 12;
const MAX_LABEL_LEN: usize = 63;
const MAX_DATAGRAM: usize = 512;

const FLAG_QR: u8 = 0x80;
const FLAG_AA: u8 = 0x04;
const FLAG_RD: u8 = 0x01;
const FLAG_RA: u8 = 0x80;

/// A parsed standard query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery<'a> {
    pub id: u16,
    pub recursion_desired: bool,
    /// Queried name, dot-terminated (e.g. `example.com.`).
    pub name: String,
    /// Raw bytes of the first question (name, type and class).
    pub question: &'a [u8],
}

impl<'a> DnsQuery<'a> {
    /// Parse a query datagram. Returns `None` for anything unsupported.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        let flags = data[2];
        let opcode = (flags >> 3) & 0x0f;
        if flags & FLAG_QR != 0 || opcode != 0 {
            return None;
        }
        let qdcount = u16::from_be_bytes([data[4], data[5]]);
        if qdcount == 0 {
            return None;
        }

        let mut labels = Vec::new();
        let mut pos = HEADER_LEN;
        loop {
            let len = usize::from(*data.get(pos)?);
            if len == 0 {
                pos += 1;
                break;
            }
            // Compression pointers and reserved label types.
            if len > MAX_LABEL_LEN {
                return None;
            }
            let label = data.get(pos + 1..pos + 1 + len)?;
            labels.push(std::str::from_utf8(label).ok()?);
            pos += len + 1;
        }
        if labels.is_empty() {
            return None;
        }

        // QTYPE and QCLASS.
        let end = pos + 4;
        if data.len() < end {
            return None;
        }

        let mut name = labels.join(".");
        name.push('.');
        Some(Self {
            id: u16::from_be_bytes([data[0], data[1]]),
            recursion_desired: flags & FLAG_RD != 0,
            name,
            question: &data[HEADER_LEN..end],
        })
    }

    /// Authoritative answer pointing the queried name at `address`.
    pub fn answer(&self, address: Ipv4Addr) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.question.len() + 16);
        out.extend_from_slice(&self.id.to_be_bytes());
        let rd = if self.recursion_desired { FLAG_RD } else { 0 };
        out.push(FLAG_QR | FLAG_AA | rd);
        out.push(FLAG_RA);
        out.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
        out.extend_from_slice(&1u16.to_be_bytes()); // ANCOUNT
        out.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
        out.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
        out.extend_from_slice(self.question);

        out.extend_from_slice(&[0xc0, 0x0c]); // pointer to the question name
        out.extend_from_slice(&1u16.to_be_bytes()); // TYPE A
        out.extend_from_slice(&1u16.to_be_bytes()); // CLASS IN
        out.extend_from_slice(&ANSWER_TTL.to_be_bytes());
        out.extend_from_slice(&4u16.to_be_bytes());
        out.extend_from_slice(&address.octets());
        out
    }
}

/// Response datagram for `query`, or `None` if no reply must be sent.
pub fn respond_to(query: &[u8], address: Ipv4Addr) -> Option<Vec<u8>> {
    DnsQuery::parse(query).map(|q| q.answer(address))
}

/// DNS responder bound to the access point.
#[derive(Debug, Clone)]
pub struct CaptivePortal {
    address: Ipv4Addr,
    port: u16,
}

impl CaptivePortal {
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }

    /// Answer queries until cancelled. Errors are logged and retried.
    pub async fn run(self, cancel: CancellationToken) {
        let bind = SocketAddr::from(([0, 0, 0, 0], self.port));
        loop {
            let socket = tokio::select! {
                _ = cancel.cancelled() => return,
                bound = UdpSocket::bind(bind) => bound,
            };
            match socket {
                Ok(socket) => {
                    info!("Captive DNS on {} answering {}", bind, self.address);
                    if self.serve(&socket, &cancel).await {
                        return;
                    }
                }
                Err(e) => warn!("Captive DNS bind {} failed: {}", bind, e),
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(ERROR_BACKOFF) => {}
            }
        }
    }

    /// Returns `true` when cancelled, `false` when the socket should be
    /// rebound.
    async fn serve(&self, socket: &UdpSocket, cancel: &CancellationToken) -> bool {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => return true,
                received = socket.recv_from(&mut buf) => received,
            };

            let (len, peer) = match received {
                Ok(r) => r,
                Err(e) => {
                    warn!("Captive DNS receive failed: {}", e);
                    return false;
                }
            };

            let Some(query) = DnsQuery::parse(&buf[..len]) else {
                debug!("Ignoring {} byte datagram from {}", len, peer);
                continue;
            };
            debug!("DNS {} from {} -> {}", query.name, peer, self.address);
            if let Err(e) = socket.send_to(&query.answer(self.address), peer).await {
                warn!("Captive DNS reply to {} failed: {}", peer, e);
                tokio::select! {
                    _ = cancel.cancelled() => return true,
                    _ = sleep(ERROR_BACKOFF) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HUB: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

    /// Standard query for `name`, type A, with RD set.
    fn query(id: u16, name: &str) -> Vec<u8> {
        let mut q = Vec::new();
        q.extend_from_slice(&id.to_be_bytes());
        q.extend_from_slice(&[0x01, 0x00]); // RD
        q.extend_from_slice(&[0, 1, 0, 0, 0, 0, 0, 0]);
        for label in name.split('.') {
            q.push(label.len() as u8);
            q.extend_from_slice(label.as_bytes());
        }
        q.push(0);
        q.extend_from_slice(&[0, 1, 0, 1]);
        q
    }

    #[test]
    fn test_parse_query() {
        let data = query(0x1234, "connectivitycheck.gstatic.com");
        let parsed = DnsQuery::parse(&data).unwrap();
        assert_eq!(parsed.id, 0x1234);
        assert!(parsed.recursion_desired);
        assert_eq!(parsed.name, "connectivitycheck.gstatic.com.");
        assert_eq!(parsed.question, &data[12..]);
    }

    #[test]
    fn test_answer_layout() {
        let data = query(0xbeef, "example.com");
        let reply = respond_to(&data, HUB).unwrap();

        assert_eq!(&reply[0..2], &[0xbe, 0xef]);
        assert_eq!(reply[2], 0x85); // QR | AA | RD
        assert_eq!(reply[3], 0x80); // RA, NOERROR
        assert_eq!(&reply[4..12], &[0, 1, 0, 1, 0, 0, 0, 0]);
        assert_eq!(&reply[12..data.len()], &data[12..]);

        let answer = &reply[data.len()..];
        assert_eq!(
            answer,
            &[0xc0, 0x0c, 0, 1, 0, 1, 0, 0, 0, 60, 0, 4, 192, 168, 4, 1]
        );
    }

    #[test]
    fn test_additional_records_dropped() {
        let mut data = query(1, "hub.local");
        data[11] = 1; // ARCOUNT = 1
        data.extend_from_slice(&[0, 0, 41, 0x10, 0, 0, 0, 0, 0, 0, 0]); // EDNS OPT
        let reply = respond_to(&data, HUB).unwrap();
        assert_eq!(&reply[10..12], &[0, 0]);
        // Header + question + 16 byte answer; the OPT record is not echoed.
        assert_eq!(reply.len(), data.len() - 11 + 16);
    }

    #[test]
    fn test_unsupported_opcode_gets_no_reply() {
        let mut data = query(1, "example.com");
        data[2] |= 2 << 3; // STATUS
        assert!(respond_to(&data, HUB).is_none());
    }

    #[test]
    fn test_responses_get_no_reply() {
        let mut data = query(1, "example.com");
        data[2] |= 0x80;
        assert!(respond_to(&data, HUB).is_none());
    }

    #[test]
    fn test_malformed_input_gets_no_reply() {
        assert!(respond_to(&[], HUB).is_none());
        assert!(respond_to(&[0; 11], HUB).is_none());

        let data = query(1, "example.com");
        assert!(respond_to(&data[..data.len() - 2], HUB).is_none());
        assert!(respond_to(&data[..15], HUB).is_none());

        // Compressed name.
        let mut compressed = data[..12].to_vec();
        compressed.extend_from_slice(&[0xc0, 0x0c, 0, 1, 0, 1]);
        assert!(respond_to(&compressed, HUB).is_none());

        // Root name only.
        let mut root = data[..12].to_vec();
        root.extend_from_slice(&[0, 0, 1, 0, 1]);
        assert!(respond_to(&root, HUB).is_none());
    }

    #[tokio::test]
    async fn test_portal_answers_over_udp() {
        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let cancel = CancellationToken::new();
        let portal = CaptivePortal::new(HUB, port);
        let task = tokio::spawn(portal.run(cancel.clone()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], port));
        let mut buf = [0u8; 512];
        let mut reply = None;
        for _ in 0..50 {
            client.send_to(&query(7, "anything.test"), target).await.unwrap();
            if let Ok(Ok((len, _))) =
                tokio::time::timeout(Duration::from_millis(100), client.recv_from(&mut buf)).await
            {
                reply = Some(buf[..len].to_vec());
                break;
            }
        }

        let reply = reply.expect("portal never answered");
        assert_eq!(&reply[reply.len() - 4..], &[192, 168, 4, 1]);

        cancel.cancel();
        task.await.unwrap();
    }
}
