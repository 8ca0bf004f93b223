//! IEEE 488.2 definite-length binary blocks.
//!
//! A block is `#`, one ASCII digit `N`, `N` ASCII digits giving the payload
//! length, then the payload itself. Waveform data, screen images and the
//! instrument setup all travel this way.

use std::thread;
use std::time::Duration;

use crate::transport::{InstrumentTransport, TransportError};

pub const BLOCK_MARKER: u8 = b'#';

/// Width of the length field used when sending a setup blob back.
pub const SETUP_LENGTH_DIGITS: usize = 9;

/// Shortest pause before re-reading after a transport error.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Block header not found")]
    HeaderNotFound,

    #[error("Invalid block length field {field:?}")]
    InvalidLength { field: String },

    #[error("Block length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Width of the length field
    pub digits: usize,
    /// Declared payload length
    pub length: usize,
}

impl BlockHeader {
    /// Bytes taken up by the header on the wire.
    pub fn encoded_len(&self) -> usize {
        2 + self.digits
    }

    /// Check the `#N` prefix and return `N`.
    fn digit_count(bytes: &[u8]) -> Result<usize, ProtocolError> {
        match bytes {
            [BLOCK_MARKER, digit, ..] if digit.is_ascii_digit() => Ok(usize::from(digit - b'0')),
            _ => Err(ProtocolError::HeaderNotFound),
        }
    }

    /// Parse a complete header. `None` when more bytes are needed.
    pub fn parse(bytes: &[u8]) -> Result<Option<Self>, ProtocolError> {
        let digits = Self::digit_count(bytes)?;
        let Some(field) = bytes.get(2..2 + digits) else {
            return Ok(None);
        };
        let invalid = || ProtocolError::InvalidLength {
            field: String::from_utf8_lossy(field).into_owned(),
        };
        // "#0" announces an indefinite-length block, which instruments only
        // use for streams we never request
        if digits == 0 || !field.iter().all(u8::is_ascii_digit) {
            return Err(invalid());
        }
        let length = std::str::from_utf8(field)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(invalid)?;
        Ok(Some(Self { digits, length }))
    }
}

/// Read one block off the transport and return exactly its payload.
///
/// The first read must start with `#<digit>`. Further reads are issued until
/// the declared length is reached; one transport error at a given point is
/// absorbed by pausing and reading again, a second one in a row propagates.
/// Bytes beyond the declared length (Rigol scopes append a newline) are
/// dropped.
#[tracing::instrument(level = "debug", skip(transport))]
pub fn read_block<T: InstrumentTransport + ?Sized>(transport: &mut T) -> Result<Vec<u8>, BlockError> {
    crate::profile_scope!("read_block");

    let mut data = transport.read_raw()?;
    // A terminator trailing the previous block can still be pending when
    // that block ended exactly on a read boundary
    if skip_terminators(&mut data) && data.is_empty() {
        data = transport.read_raw()?;
        skip_terminators(&mut data);
    }
    if data.len() < 2 {
        return Err(ProtocolError::HeaderNotFound.into());
    }
    let header = loop {
        match BlockHeader::parse(&data)? {
            Some(header) => break header,
            None => data.extend(read_with_retry(transport)?),
        }
    };
    data.drain(..header.encoded_len());
    log::debug!("Block of {} bytes announced", header.length);

    while data.len() < header.length {
        data.extend(read_with_retry(transport)?);
    }
    if data.len() > header.length {
        log::trace!("Dropping {} trailing bytes", data.len() - header.length);
        data.truncate(header.length);
    }
    Ok(data)
}

/// Drop leading `\r` / `\n` bytes. Returns whether any were dropped.
fn skip_terminators(data: &mut Vec<u8>) -> bool {
    let count = data
        .iter()
        .take_while(|b| matches!(b, b'\n' | b'\r'))
        .count();
    if count > 0 {
        log::trace!("Skipping {} stale terminator bytes", count);
        data.drain(..count);
    }
    count > 0
}

fn read_with_retry<T: InstrumentTransport + ?Sized>(transport: &mut T) -> Result<Vec<u8>, TransportError> {
    match transport.read_raw() {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.is_transient() => {
            let pause = transport.query_delay().max(MIN_RETRY_DELAY);
            log::warn!("Block read interrupted ({}), retrying in {:?}", e, pause);
            thread::sleep(pause);
            transport.read_raw()
        }
        Err(e) => Err(e),
    }
}

/// Frame `payload` as a block with a length field of `digits` digits.
pub fn encode_block(payload: &[u8], digits: usize) -> Result<Vec<u8>, ProtocolError> {
    let length = payload.len().to_string();
    if digits == 0 || digits > 9 || length.len() > digits {
        return Err(ProtocolError::InvalidLength { field: length });
    }
    let mut block = Vec::with_capacity(2 + digits + payload.len());
    block.push(BLOCK_MARKER);
    block.push(b'0' + digits as u8);
    block.extend_from_slice(format!("{:0width$}", payload.len(), width = digits).as_bytes());
    block.extend_from_slice(payload);
    Ok(block)
}
