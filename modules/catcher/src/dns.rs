//! UDP DNS listener. Every query is answered NXDOMAIN; its question name is what we
//! are after.

use crate::{Backoff, Emitter};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const HEADER_LEN: usize = 12;
const RCODE_NXDOMAIN: u16 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub id: u16,
    pub flags: u16,
    /// Dotted question name, labels as received.
    pub name: String,
    /// Offset just past QTYPE/QCLASS of the first question.
    question_end: usize,
}

/// Parse the first question of a DNS query. Responses, truncated packets and
/// compressed question names are rejected.
pub fn parse_query(pkt: &[u8]) -> Option<Query> {
    if pkt.len() < HEADER_LEN { return None; }
    let id = u16::from_be_bytes([pkt[0], pkt[1]]);
    let flags = u16::from_be_bytes([pkt[2], pkt[3]]);
    let qdcount = u16::from_be_bytes([pkt[4], pkt[5]]);
    if flags & 0x8000 != 0 || qdcount == 0 { return None; }
    let mut labels = Vec::new();
    let mut i = HEADER_LEN;
    loop {
        let len = *pkt.get(i)? as usize;
        i += 1;
        if len == 0 { break; }
        if len & 0xc0 != 0 { return None; }
        labels.push(String::from_utf8_lossy(pkt.get(i..i + len)?).into_owned());
        i += len;
    }
    let question_end = i + 4;
    if pkt.len() < question_end { return None; }
    Some(Query { id, flags, name: labels.join("."), question_end })
}

/// Empty NXDOMAIN answer echoing the question.
pub fn nxdomain(pkt: &[u8], q: &Query) -> Vec<u8> {
    let mut r = Vec::with_capacity(q.question_end);
    r.extend_from_slice(&q.id.to_be_bytes());
    // QR, opcode and RD copied, RA, rcode
    let flags = 0x8000 | (q.flags & 0x7900) | 0x0080 | RCODE_NXDOMAIN;
    r.extend_from_slice(&flags.to_be_bytes());
    r.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    r.extend_from_slice(&0u16.to_be_bytes()); // ANCOUNT
    r.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    r.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT
    r.extend_from_slice(&pkt[HEADER_LEN..q.question_end]);
    r
}

pub(crate) async fn serve(sock: UdpSocket, emitter: Emitter, cancel: CancellationToken) {
    let mut buf = [0u8; 1500];
    let mut backoff = Backoff::default();
    loop {
        let (n, peer): (usize, SocketAddr) = tokio::select! {
            _ = cancel.cancelled() => break,
            r = sock.recv_from(&mut buf) => match r {
                Ok(v) => {
                    backoff.reset();
                    v
                }
                Err(e) => {
                    debug!(error = %e, "dns recv failed");
                    backoff.wait(&cancel).await;
                    continue;
                }
            },
        };
        let Some(query) = parse_query(&buf[..n]) else {
            debug!(%peer, bytes = n, "ignoring malformed dns packet");
            continue;
        };
        debug!(%peer, name = %query.name, "dns query");
        emitter.scan(&query.name, Some(peer));
        if let Err(e) = sock.send_to(&nxdomain(&buf[..n], &query), peer).await {
            debug!(%peer, error = %e, "dns reply failed");
        }
    }
}
