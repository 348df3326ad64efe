//! Length encoding and word/sentence/block framing over a byte stream.
//!
//! This module is the one place in the crate that knows the wire format; it
//! has no notion of login or reply semantics, only bytes. It operates over
//! any `AsyncRead + AsyncWrite` stream so the same code drives plain TCP and
//! TLS sockets alike.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{Error, Result};

/// Maximum encodable word length: 2^28 - 1 bytes.
pub const MAX_WORD_LEN: usize = (1 << 28) - 1;

/// Encode a word/sentence length per RouterOS's four-tier varint-like
/// scheme.
pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len < 0x4000 {
        let len = len as u32;
        vec![(((len >> 8) & 0xFF) | 0x80) as u8, (len & 0xFF) as u8]
    } else if len < 0x20_0000 {
        let len = len as u32;
        vec![
            (((len >> 16) & 0xFF) | 0xC0) as u8,
            ((len >> 8) & 0xFF) as u8,
            (len & 0xFF) as u8,
        ]
    } else if len < 0x1000_0000 {
        let len = len as u32;
        vec![
            (((len >> 24) & 0xFF) | 0xE0) as u8,
            ((len >> 16) & 0xFF) as u8,
            ((len >> 8) & 0xFF) as u8,
            (len & 0xFF) as u8,
        ]
    } else {
        // Callers never ask us to encode an out-of-range length; write_word
        // validates before calling encode_length. Kept infallible/total:
        // pure encoding never fails on its own.
        panic!("length {len} exceeds the 2^28-1 protocol maximum");
    }
}

/// Decode a length given its already-consumed first byte, reading any
/// remaining bytes from `stream`.
async fn decode_length<S: AsyncRead + Unpin>(stream: &mut S, first: u8) -> Result<usize> {
    if first & 0x80 == 0 {
        return Ok(first as usize);
    }
    if first & 0xC0 == 0x80 {
        let mut rest = [0u8; 1];
        read_exact(stream, &mut rest).await?;
        let high = (first & 0x3F) as usize;
        return Ok((high << 8) | rest[0] as usize);
    }
    if first & 0xE0 == 0xC0 {
        let mut rest = [0u8; 2];
        read_exact(stream, &mut rest).await?;
        let high = (first & 0x1F) as usize;
        return Ok((high << 16) | (rest[0] as usize) << 8 | rest[1] as usize);
    }
    if first & 0xF0 == 0xE0 {
        let mut rest = [0u8; 3];
        read_exact(stream, &mut rest).await?;
        let high = (first & 0x0F) as usize;
        return Ok((high << 24) | (rest[0] as usize) << 16 | (rest[1] as usize) << 8 | rest[2] as usize);
    }
    Err(Error::protocol(format!(
        "illegal length prefix first byte 0x{first:02x}"
    )))
}

async fn read_exact<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut [u8]) -> Result<()> {
    stream.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::closed("connection closed mid-frame")
        } else {
            Error::connection_failed(format!("read error: {e}"))
        }
    })?;
    Ok(())
}

/// Write a single word: its encoded length, then its bytes.
pub async fn write_word<S: AsyncWrite + Unpin>(stream: &mut S, word: &[u8]) -> Result<()> {
    if word.len() > MAX_WORD_LEN {
        return Err(Error::protocol(format!(
            "word of {} bytes exceeds the 2^28-1 protocol maximum",
            word.len()
        )));
    }
    let prefix = encode_length(word.len());
    let mut buf = BytesMut::with_capacity(prefix.len() + word.len());
    buf.put_slice(&prefix);
    buf.put_slice(word);
    stream
        .write_all(&buf)
        .await
        .map_err(|e| Error::connection_failed(format!("write error: {e}")))?;
    Ok(())
}

/// Read one word. Returns `None` for the zero-length end-of-sentence marker.
pub async fn read_word<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Option<Vec<u8>>> {
    let mut first = [0u8; 1];
    match stream.read_exact(&mut first).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::closed("connection closed before a new word"));
        }
        Err(e) => return Err(Error::connection_failed(format!("read error: {e}"))),
    }
    let len = decode_length(stream, first[0]).await?;
    if len == 0 {
        return Ok(None);
    }
    let mut buf = vec![0u8; len];
    read_exact(stream, &mut buf).await?;
    Ok(Some(buf))
}

/// Write a full sentence: each word in order, then the zero-length
/// terminator.
pub async fn write_sentence<S: AsyncWrite + Unpin>(stream: &mut S, words: &[&[u8]]) -> Result<()> {
    for word in words {
        write_word(stream, word).await?;
    }
    stream
        .write_all(&[0u8])
        .await
        .map_err(|e| Error::connection_failed(format!("write error: {e}")))?;
    stream
        .flush()
        .await
        .map_err(|e| Error::connection_failed(format!("flush error: {e}")))?;
    Ok(())
}

/// Read words until the end-of-sentence sentinel; return them in order.
///
/// A stream that closes cleanly between sentences (not mid-word) still
/// surfaces as `closed` here — a sentence must always terminate with its
/// zero-length word, so a clean EOF at sentence start is still unexpected
/// from the codec's point of view; the caller (the connection worker)
/// distinguishes "closed before anything was sent back" from "closed mid
/// reply" using its own state.
pub async fn read_sentence<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<Vec<u8>>> {
    let mut words = Vec::new();
    loop {
        match read_word(stream).await? {
            Some(word) => words.push(word),
            None => return Ok(words),
        }
    }
}

/// A sentence's terminal status tag, wherever it appears among its words.
/// `!done` dominates over `!trap` over `!fatal` when more than one shows up
/// in the same sentence (the wire is ambiguous about this; `!done` ending
/// the block regardless of position is the resolved behavior, matching
/// `reply::sentence_status`). `None` means the sentence carries no status
/// word, i.e. it is ordinary `!re` data.
fn terminal_status(sentence: &[Vec<u8>]) -> Option<&'static [u8]> {
    let has = |tag: &[u8]| sentence.iter().any(|w| w.as_slice() == tag);
    if has(b"!done") {
        Some(b"!done")
    } else if has(b"!trap") {
        Some(b"!trap")
    } else if has(b"!fatal") {
        Some(b"!fatal")
    } else {
        None
    }
}

/// Read sentences until one carries `!done`, `!trap`, or `!fatal` anywhere
/// among its words (inclusive of that sentence). `!re` sentences are data
/// and never terminate the block.
pub async fn read_block<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<Vec<Vec<u8>>>> {
    let mut sentences = Vec::new();
    loop {
        let sentence = read_sentence(stream).await?;
        let is_terminal = terminal_status(&sentence).is_some();
        sentences.push(sentence);
        if is_terminal {
            return Ok(sentences);
        }
    }
}
