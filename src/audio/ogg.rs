//! Minimal Ogg demuxer.
//!
//! Only finds packet boundaries: page checksums, granule positions and
//! logical stream multiplexing are ignored because the transcoder always
//! emits a single Opus stream.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const PAGE_HEADER_LEN: usize = 27;
const FLAG_CONTINUED: u8 = 0x01;
const LACING_CONTINUES: u8 = 255;

#[derive(Debug, Error)]
pub enum OggError {
    #[error("lost page sync (bad capture pattern)")]
    BadCapture,
    #[error("stream ended in the middle of a page")]
    Truncated,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct OggPacketReader<R> {
    inner: R,
    lacing: Vec<u8>,
    lace_index: usize,
    body: Bytes,
    body_pos: usize,
    partial: BytesMut,
    /// Set when the first page we see continues a packet whose start we
    /// never read; those segments are dropped.
    discarding: bool,
}

impl<R: AsyncRead + Unpin> OggPacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            lacing: Vec::new(),
            lace_index: 0,
            body: Bytes::new(),
            body_pos: 0,
            partial: BytesMut::new(),
            discarding: false,
        }
    }

    /// Next complete packet, `Ok(None)` on a clean end of stream.
    pub async fn next_packet(&mut self) -> Result<Option<Bytes>, OggError> {
        loop {
            if self.lace_index >= self.lacing.len() {
                if !self.read_page().await? {
                    return if self.partial.is_empty() {
                        Ok(None)
                    } else {
                        Err(OggError::Truncated)
                    };
                }
                continue;
            }

            let lace = self.lacing[self.lace_index] as usize;
            self.lace_index += 1;

            let end = self.body_pos + lace;
            if !self.discarding {
                self.partial.extend_from_slice(&self.body[self.body_pos..end]);
            }
            self.body_pos = end;

            if lace < LACING_CONTINUES as usize {
                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                return Ok(Some(self.partial.split().freeze()));
            }
        }
    }

    /// Loads the next page. `Ok(false)` when the stream ended exactly on a
    /// page boundary.
    async fn read_page(&mut self) -> Result<bool, OggError> {
        let mut header = [0u8; PAGE_HEADER_LEN];
        match read_full(&mut self.inner, &mut header).await? {
            0 => return Ok(false),
            n if n < PAGE_HEADER_LEN => return Err(OggError::Truncated),
            _ => {}
        }

        if &header[..4] != CAPTURE_PATTERN {
            return Err(OggError::BadCapture);
        }

        let continued = header[5] & FLAG_CONTINUED != 0;
        if continued && self.partial.is_empty() {
            self.discarding = true;
        } else if !continued && !self.partial.is_empty() {
            // The previous page promised a continuation that never came.
            self.partial.clear();
        }

        let segment_count = header[26] as usize;
        let mut lacing = vec![0u8; segment_count];
        if read_full(&mut self.inner, &mut lacing).await? < segment_count {
            return Err(OggError::Truncated);
        }

        let body_len: usize = lacing.iter().map(|&l| l as usize).sum();
        let mut body = vec![0u8; body_len];
        if read_full(&mut self.inner, &mut body).await? < body_len {
            return Err(OggError::Truncated);
        }

        self.lacing = lacing;
        self.lace_index = 0;
        self.body = Bytes::from(body);
        self.body_pos = 0;
        Ok(true)
    }
}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Opus identification and comment headers, which carry no audio.
pub fn is_opus_header(packet: &[u8]) -> bool {
    packet.starts_with(b"OpusHead") || packet.starts_with(b"OpusTags")
}

#[cfg(test)]
pub mod fixtures {
    use super::*;

    /// Lacing values for a packet that terminates on this page.
    pub fn lacing_for(len: usize) -> Vec<u8> {
        let mut lacing = vec![LACING_CONTINUES; len / 255];
        lacing.push((len % 255) as u8);
        lacing
    }

    pub fn page(flags: u8, lacing: &[u8], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(PAGE_HEADER_LEN + lacing.len() + body.len());
        out.extend_from_slice(CAPTURE_PATTERN);
        out.push(0); // version
        out.push(flags);
        out.extend_from_slice(&[0u8; 8]); // granule
        out.extend_from_slice(&[0u8; 4]); // serial
        out.extend_from_slice(&[0u8; 4]); // sequence
        out.extend_from_slice(&[0u8; 4]); // crc
        out.push(lacing.len() as u8);
        out.extend_from_slice(lacing);
        out.extend_from_slice(body);
        out
    }

    /// One page per packet, prefixed with Opus header pages.
    pub fn opus_stream(packets: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        for header in [b"OpusHead\x01\x02".to_vec(), b"OpusTags\x00".to_vec()] {
            out.extend(page(0x02, &lacing_for(header.len()), &header));
        }
        for packet in packets {
            out.extend(page(0, &lacing_for(packet.len()), packet));
        }
        out
    }
}
