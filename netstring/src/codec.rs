// Copyright 2017 Amagicom AB.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The netstring wire framing: `<length>:<payload>,`, where `<length>` is
//! the payload's byte length in decimal.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Caps a single frame's payload length, guarding against a peer that sends
/// an unbounded length prefix before any payload bytes arrive.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A fault while decoding a netstring frame. Every variant is fatal to the
/// connection — a framing adapter has no way to resynchronize mid-stream.
#[derive(Debug, Clone)]
pub enum NetstringError {
    /// The length prefix wasn't a decimal integer.
    MalformedLength,
    /// The length prefix exceeded [`MAX_FRAME_LEN`].
    FrameTooLarge(usize),
    /// The payload wasn't terminated by the trailing comma.
    MissingTerminator,
    /// The underlying byte stream faulted.
    Io(String),
}

impl std::fmt::Display for NetstringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetstringError::MalformedLength => write!(f, "malformed netstring length prefix"),
            NetstringError::FrameTooLarge(len) => {
                write!(f, "netstring frame length {} exceeds the maximum of {}", len, MAX_FRAME_LEN)
            }
            NetstringError::MissingTerminator => write!(f, "netstring frame missing its trailing comma"),
            NetstringError::Io(msg) => write!(f, "I/O error while framing a netstring: {}", msg),
        }
    }
}

impl std::error::Error for NetstringError {}

impl From<std::io::Error> for NetstringError {
    fn from(err: std::io::Error) -> Self {
        NetstringError::Io(err.to_string())
    }
}

/// A `tokio_util::codec::{Decoder, Encoder}` pair for netstring framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetstringCodec {
    // The length of the frame currently being assembled, once its prefix
    // has been fully read, so a re-poll after `Pending` doesn't re-parse it.
    parsed_len: Option<usize>,
}

impl Decoder for NetstringCodec {
    type Item = Bytes;
    type Error = NetstringError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match self.parsed_len {
            Some(len) => len,
            None => {
                let colon = match src.iter().position(|&b| b == b':') {
                    Some(pos) => pos,
                    None => {
                        if src.len() > 20 {
                            // A decimal `usize` never needs more than 20 digits.
                            return Err(NetstringError::MalformedLength);
                        }
                        return Ok(None);
                    }
                };
                let digits = &src[..colon];
                if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
                    return Err(NetstringError::MalformedLength);
                }
                let len: usize = std::str::from_utf8(digits)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(NetstringError::MalformedLength)?;
                if len > MAX_FRAME_LEN {
                    return Err(NetstringError::FrameTooLarge(len));
                }
                src.advance(colon + 1);
                self.parsed_len = Some(len);
                len
            }
        };

        // length prefix already consumed; need `len` payload bytes plus the comma.
        if src.len() < len + 1 {
            src.reserve(len + 1 - src.len());
            return Ok(None);
        }

        if src[len] != b',' {
            return Err(NetstringError::MissingTerminator);
        }

        let payload = src.split_to(len).freeze();
        src.advance(1); // the comma
        self.parsed_len = None;
        Ok(Some(payload))
    }
}

impl Encoder<Bytes> for NetstringCodec {
    type Error = NetstringError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let prefix = item.len().to_string();
        dst.reserve(prefix.len() + 1 + item.len() + 1);
        dst.put_slice(prefix.as_bytes());
        dst.put_u8(b':');
        dst.put_slice(&item);
        dst.put_u8(b',');
        Ok(())
    }
}

impl Encoder<Vec<u8>> for NetstringCodec {
    type Error = NetstringError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Encoder::<Bytes>::encode(self, Bytes::from(item), dst)
    }
}
