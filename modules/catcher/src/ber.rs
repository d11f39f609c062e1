//! Just enough BER to frame LDAP messages and build result PDUs.

use anyhow::{bail, Result};

pub(crate) const INTEGER: u8 = 0x02;
pub(crate) const OCTET_STRING: u8 = 0x04;
pub(crate) const ENUMERATED: u8 = 0x0a;
pub(crate) const SEQUENCE: u8 = 0x30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tlv<'a> {
    pub tag: u8,
    pub value: &'a [u8],
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame<'a> {
    /// More bytes needed.
    Incomplete,
    /// A full element and the number of bytes it spans.
    Complete(Tlv<'a>, usize),
}

/// Read the element at the start of `buf`. Only definite lengths up to 4 bytes long.
pub(crate) fn read_tlv(buf: &[u8]) -> Result<Frame<'_>> {
    if buf.len() < 2 { return Ok(Frame::Incomplete); }
    let tag = buf[0];
    let first = buf[1];
    let (len, header) = if first < 0x80 {
        (first as usize, 2)
    } else {
        let n = (first & 0x7f) as usize;
        if n == 0 || n > 4 { bail!("unsupported BER length form 0x{:02x}", first); }
        if buf.len() < 2 + n { return Ok(Frame::Incomplete); }
        (buf[2..2 + n].iter().fold(0usize, |acc, b| (acc << 8) | *b as usize), 2 + n)
    };
    let total = header + len;
    if buf.len() < total { return Ok(Frame::Incomplete); }
    Ok(Frame::Complete(Tlv { tag, value: &buf[header..total] }, total))
}

/// Read a complete element or fail; used inside an already framed message.
pub(crate) fn expect_tlv(buf: &[u8]) -> Result<(Tlv<'_>, &[u8])> {
    match read_tlv(buf)? {
        Frame::Complete(t, used) => Ok((t, &buf[used..])),
        Frame::Incomplete => bail!("truncated BER element"),
    }
}

pub(crate) fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = (len as u32).to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (4 - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

/// Minimal two's complement encoding.
pub(crate) fn integer(v: i64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let (b, next) = (bytes[start], bytes[start + 1]);
        if (b == 0x00 && next & 0x80 == 0) || (b == 0xff && next & 0x80 != 0) { start += 1; } else { break; }
    }
    tlv(INTEGER, &bytes[start..])
}

pub(crate) fn decode_integer(value: &[u8]) -> Result<i64> {
    if value.is_empty() || value.len() > 8 { bail!("bad INTEGER length {}", value.len()); }
    let init: i64 = if value[0] & 0x80 != 0 { -1 } else { 0 };
    Ok(value.iter().fold(init, |acc, b| (acc << 8) | *b as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_waits_for_whole_elements() {
        assert_eq!(read_tlv(&[0x30]).unwrap(), Frame::Incomplete);
        assert_eq!(read_tlv(&[0x30, 0x03, 0x02, 0x01]).unwrap(), Frame::Incomplete);
        let buf = [0x30, 0x03, 0x02, 0x01, 0x07, 0xff];
        assert_eq!(read_tlv(&buf).unwrap(), Frame::Complete(Tlv { tag: 0x30, value: &buf[2..5] }, 5));
        assert!(read_tlv(&[0x30, 0x80]).is_err());
    }

    #[test]
    fn long_lengths() {
        let content = vec![0x41; 300];
        let enc = tlv(OCTET_STRING, &content);
        assert_eq!(&enc[..4], &[0x04, 0x82, 0x01, 0x2c]);
        match read_tlv(&enc).unwrap() {
            Frame::Complete(t, used) => {
                assert_eq!(t.value.len(), 300);
                assert_eq!(used, enc.len());
            }
            Frame::Incomplete => panic!("incomplete"),
        }
    }

    #[test]
    fn integers() {
        assert_eq!(integer(1), vec![0x02, 0x01, 0x01]);
        assert_eq!(integer(128), vec![0x02, 0x02, 0x00, 0x80]);
        assert_eq!(integer(-1), vec![0x02, 0x01, 0xff]);
        for v in [0i64, 5, 127, 128, 65_535, 2_147_483_647, -129] {
            let enc = integer(v);
            assert_eq!(decode_integer(&enc[2..]).unwrap(), v);
        }
    }
}
