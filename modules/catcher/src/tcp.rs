//! Raw TCP listener. Answers the first message with an LDAP bind success so a JNDI
//! client goes on to send its search, then scans everything it receives.

use crate::ber::{self, Frame};
use crate::ldap::{bind_response, parse_message, IDLE_TIMEOUT, MAX_MESSAGE};
use crate::Emitter;
use anyhow::Result;
use jndiscan_core::Marker;
use std::collections::HashSet;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) async fn serve(listener: TcpListener, emitter: Emitter, cancel: CancellationToken) {
    crate::accept_loop(listener, emitter, cancel, session).await
}

async fn session(mut stream: TcpStream, peer: SocketAddr, emitter: Emitter, cancel: CancellationToken) -> Result<()> {
    let mut seen: HashSet<Marker> = HashSet::new();
    let mut received: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut greeted = false;
    while received.len() < MAX_MESSAGE {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            r = timeout(IDLE_TIMEOUT, stream.read(&mut chunk)) => r??,
        };
        if n == 0 { break; }
        received.extend_from_slice(&chunk[..n]);
        if !greeted {
            stream.write_all(&bind_response(first_message_id(&received))).await?;
            greeted = true;
        }
        let text = printable(&received);
        for m in emitter.find(&text) {
            if seen.insert(m.clone()) { emitter.emit(m, Some(peer), &text); }
        }
    }
    debug!(%peer, bytes = received.len(), markers = seen.len(), "tcp session closed");
    Ok(())
}

/// Echo the client's messageID when the first bytes are LDAP; 1 otherwise.
fn first_message_id(buf: &[u8]) -> i64 {
    match ber::read_tlv(buf) {
        Ok(Frame::Complete(env, _)) => parse_message(env).map(|m| m.id).unwrap_or(1),
        _ => 1,
    }
}

/// Received bytes with non-printable runs collapsed to spaces, so markers inside
/// binary framing still sit on word boundaries.
fn printable(buf: &[u8]) -> String {
    let mut out = String::with_capacity(buf.len());
    for &b in buf {
        if b.is_ascii_graphic() {
            out.push(b as char);
        } else if !out.ends_with(' ') {
            out.push(' ');
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::tests::{bind_request, search_request};
    use crate::start;
    use jndiscan_core::CatcherKind;
    use std::time::Duration;

    #[test]
    fn printable_keeps_markers_separable() {
        assert_eq!(printable(b"\x30\x0c\x04\x07abc.l4s\x00\x01"), "abc.l4s");
        assert_eq!(printable(b"a\x00\x00b"), "a b");
    }

    #[test]
    fn greeting_echoes_ldap_message_id() {
        assert_eq!(first_message_id(&bind_request(9)), 9);
        assert_eq!(first_message_id(b"GET / HTTP/1.1\r\n"), 1);
    }

    #[tokio::test]
    async fn raw_stream_markers_are_callbacks() {
        let mut h = start(CatcherKind::Tcp, "127.0.0.1:0".parse().unwrap(), "l4s").await.unwrap();
        let mut conn = TcpStream::connect(h.local_addr().unwrap()).await.unwrap();
        conn.write_all(&bind_request(1)).await.unwrap();
        let mut reply = [0u8; 14];
        conn.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply.to_vec(), bind_response(1));

        let marker = Marker::new();
        let search = search_request(2, &format!("{}.l4s", marker));
        conn.write_all(&search).await.unwrap();
        conn.write_all(&search).await.unwrap();
        drop(conn);

        let events = h.events().unwrap();
        let ev = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
        assert_eq!(ev.marker, marker);
        assert_eq!(ev.kind, CatcherKind::Tcp);
        h.stop().await;
    }
}
