//! Minimal LDAPv3 responder: enough for a JNDI client to bind and send the search
//! whose base DN carries the marker.

use crate::ber::{self, decode_integer, expect_tlv, integer, tlv, Frame, ENUMERATED, INTEGER, OCTET_STRING, SEQUENCE};
use crate::Emitter;
use anyhow::{bail, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) const BIND_REQUEST: u8 = 0x60;
pub(crate) const BIND_RESPONSE: u8 = 0x61;
pub(crate) const UNBIND_REQUEST: u8 = 0x42;
pub(crate) const SEARCH_REQUEST: u8 = 0x63;
pub(crate) const SEARCH_RESULT_DONE: u8 = 0x65;

pub(crate) const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const MAX_MESSAGE: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Message<'a> {
    pub id: i64,
    pub op: u8,
    pub body: &'a [u8],
}

pub(crate) fn parse_message(envelope: ber::Tlv<'_>) -> Result<Message<'_>> {
    if envelope.tag != SEQUENCE { bail!("not an LDAPMessage (tag 0x{:02x})", envelope.tag); }
    let (id, rest) = expect_tlv(envelope.value)?;
    if id.tag != INTEGER { bail!("LDAPMessage without messageID"); }
    let (op, _) = expect_tlv(rest)?;
    Ok(Message { id: decode_integer(id.value)?, op: op.tag, body: op.value })
}

/// LDAPResult with resultCode success and empty matchedDN and diagnosticMessage.
pub(crate) fn success(id: i64, op: u8) -> Vec<u8> {
    let mut result = tlv(ENUMERATED, &[0x00]);
    result.extend(tlv(OCTET_STRING, b""));
    result.extend(tlv(OCTET_STRING, b""));
    let mut msg = integer(id);
    msg.extend(tlv(op, &result));
    tlv(SEQUENCE, &msg)
}

pub fn bind_response(id: i64) -> Vec<u8> { success(id, BIND_RESPONSE) }

fn base_object(search: &[u8]) -> Result<String> {
    let (base, _) = expect_tlv(search)?;
    if base.tag != OCTET_STRING { bail!("SearchRequest without baseObject"); }
    Ok(String::from_utf8_lossy(base.value).into_owned())
}

pub(crate) async fn serve(listener: TcpListener, emitter: Emitter, cancel: CancellationToken) {
    crate::accept_loop(listener, emitter, cancel, session).await
}

async fn session(mut stream: TcpStream, peer: SocketAddr, emitter: Emitter, cancel: CancellationToken) -> Result<()> {
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];
    loop {
        loop {
            let (used, reply, done) = match ber::read_tlv(&buf)? {
                Frame::Incomplete => break,
                Frame::Complete(envelope, used) => {
                    let (reply, done) = respond(parse_message(envelope)?, peer, &emitter)?;
                    (used, reply, done)
                }
            };
            buf.drain(..used);
            if let Some(reply) = reply { stream.write_all(&reply).await?; }
            if done { return Ok(()); }
        }
        if buf.len() > MAX_MESSAGE { bail!("ldap message from {} exceeds {} bytes", peer, MAX_MESSAGE); }
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            r = timeout(IDLE_TIMEOUT, stream.read(&mut chunk)) => r??,
        };
        if n == 0 { return Ok(()); }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Reply to one message; the flag says whether the client is done.
fn respond(msg: Message<'_>, peer: SocketAddr, emitter: &Emitter) -> Result<(Option<Vec<u8>>, bool)> {
    match msg.op {
        BIND_REQUEST => {
            debug!(%peer, id = msg.id, "ldap bind");
            Ok((Some(success(msg.id, BIND_RESPONSE)), false))
        }
        SEARCH_REQUEST => {
            let dn = base_object(msg.body)?;
            debug!(%peer, id = msg.id, base = %dn, "ldap search");
            emitter.scan(&dn, Some(peer));
            Ok((Some(success(msg.id, SEARCH_RESULT_DONE)), false))
        }
        UNBIND_REQUEST => Ok((None, true)),
        op => {
            debug!(%peer, op = format_args!("0x{:02x}", op), "unsupported ldap operation");
            Ok((None, false))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{start, test_emitter};
    use jndiscan_core::CatcherKind;

    pub(crate) fn bind_request(id: i64) -> Vec<u8> {
        let mut op = integer(3);
        op.extend(tlv(OCTET_STRING, b""));
        op.extend(tlv(0x80, b""));
        let mut msg = integer(id);
        msg.extend(tlv(BIND_REQUEST, &op));
        tlv(SEQUENCE, &msg)
    }

    pub(crate) fn search_request(id: i64, base: &str) -> Vec<u8> {
        let mut op = tlv(OCTET_STRING, base.as_bytes());
        op.extend(tlv(ENUMERATED, &[0x00]));
        op.extend(tlv(ENUMERATED, &[0x03]));
        let mut msg = integer(id);
        msg.extend(tlv(SEARCH_REQUEST, &op));
        tlv(SEQUENCE, &msg)
    }

    #[test]
    fn canned_bind_success() {
        assert_eq!(bind_response(1), vec![0x30, 0x0c, 0x02, 0x01, 0x01, 0x61, 0x07, 0x0a, 0x01, 0x00, 0x04, 0x00, 0x04, 0x00]);
    }

    #[test]
    fn parses_search_base() {
        let raw = search_request(7, "abc.l4s");
        let Frame::Complete(env, _) = ber::read_tlv(&raw).unwrap() else { panic!("incomplete") };
        let msg = parse_message(env).unwrap();
        assert_eq!((msg.id, msg.op), (7, SEARCH_REQUEST));
        assert_eq!(base_object(msg.body).unwrap(), "abc.l4s");
    }

    #[test]
    fn search_emits_marker() {
        let (e, mut rx) = test_emitter(CatcherKind::Ldap);
        let raw = search_request(2, "0123456789abcdef0123456789abcdef.l4s");
        let Frame::Complete(env, _) = ber::read_tlv(&raw).unwrap() else { panic!("incomplete") };
        let (reply, done) = respond(parse_message(env).unwrap(), "127.0.0.1:9".parse().unwrap(), &e).unwrap();
        assert!(!done);
        assert_eq!(reply.unwrap()[5], SEARCH_RESULT_DONE);
        assert_eq!(rx.try_recv().unwrap().detail, "0123456789abcdef0123456789abcdef.l4s");
    }

    #[tokio::test]
    async fn jndi_style_exchange() {
        let mut h = start(CatcherKind::Ldap, "127.0.0.1:0".parse().unwrap(), "l4s").await.unwrap();
        let mut conn = TcpStream::connect(h.local_addr().unwrap()).await.unwrap();

        conn.write_all(&bind_request(1)).await.unwrap();
        let mut reply = [0u8; 14];
        conn.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply.to_vec(), bind_response(1));

        let marker = jndiscan_core::Marker::new();
        conn.write_all(&search_request(2, &format!("{}.l4s", marker))).await.unwrap();
        conn.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply.to_vec(), success(2, SEARCH_RESULT_DONE));

        let ev = timeout(Duration::from_secs(2), h.events().unwrap().recv()).await.unwrap().unwrap();
        assert_eq!(ev.marker, marker);
        assert_eq!(ev.kind, CatcherKind::Ldap);

        conn.write_all(&[0x30, 0x05, 0x02, 0x01, 0x03, UNBIND_REQUEST, 0x00]).await.unwrap();
        let mut rest = Vec::new();
        assert_eq!(conn.read_to_end(&mut rest).await.unwrap(), 0);
        h.stop().await;
    }
}
