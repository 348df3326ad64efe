//! Sentence -> attribute map, status detection, and error extraction.

use std::collections::HashMap;

use crate::errors::{Error, Result};

/// A coerced attribute value: either a recognized boolean or the raw bytes
/// from the wire. The wire format does not guarantee UTF-8 (spec.md §6: the
/// client "MUST be byte-exact with the RouterOS binary API"), so `Text`
/// holds the attribute value's bytes verbatim; `as_str`/`to_string_lossy`
/// are convenience accessors layered on top, not the storage itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Text(Vec<u8>),
}

impl Value {
    /// The raw bytes, if this is a `Text` value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Text(b) => Some(b),
            Value::Bool(_) => None,
        }
    }

    /// The value as `&str`, if it is both `Text` and valid UTF-8. Returns
    /// `None` rather than replacing invalid bytes, so a caller can fall back
    /// to `as_bytes`/`to_string_lossy` deliberately instead of silently
    /// losing data.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(b) => std::str::from_utf8(b).ok(),
            Value::Bool(_) => None,
        }
    }

    /// Lossy UTF-8 conversion for display/logging, where losing non-UTF-8
    /// bytes to U+FFFD is an acceptable, explicit tradeoff.
    pub fn to_string_lossy(&self) -> Option<String> {
        match self {
            Value::Text(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Text(_) => None,
        }
    }
}

/// One reply row: attribute key -> coerced value.
pub type Attributes = HashMap<String, Value>;

/// The status tag carried by a sentence or a whole block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Re,
    Done,
    Trap,
    Fatal,
}

/// Apply the boolean coercion table: exactly `{"true","yes"} -> true`,
/// `{"false","no"} -> false`, everything else is kept verbatim as raw
/// bytes.
pub fn coerce(raw: &[u8]) -> Value {
    match raw {
        b"true" | b"yes" => Value::Bool(true),
        b"false" | b"no" => Value::Bool(false),
        other => Value::Text(other.to_vec()),
    }
}

/// Parse a single `=K=V` word into `(K, V)`. `K` is everything up to the
/// second `=`; `V` is everything after it and may itself contain `=`.
/// Returns `None` if `word` does not start with `=`. Both halves are raw
/// bytes: only the key is ever assumed to be ASCII (attribute names are
/// fixed protocol identifiers), the value is never interpreted as text
/// here.
pub fn parse_attribute(word: &[u8]) -> Option<(&[u8], &[u8])> {
    let rest = word.strip_prefix(b"=")?;
    match rest.iter().position(|&b| b == b'=') {
        Some(idx) => Some((&rest[..idx], &rest[idx + 1..])),
        None => Some((rest, b"")),
    }
}

/// The status of a sentence: `!done`, `!trap`, `!fatal`, or `!re`, whichever
/// is present. `!done` and `!re` can appear in the same sentence in the
/// wild; `!done` dominates and ends the block in that case, so it is
/// checked first regardless of word order. `None` if the sentence carries
/// no status word at all (which should not happen for a well-formed block,
/// but the codec does not enforce it).
fn sentence_status(sentence: &[Vec<u8>]) -> Option<Status> {
    let has = |tag: &[u8]| sentence.iter().any(|w| w.as_slice() == tag);
    if has(b"!done") {
        Some(Status::Done)
    } else if has(b"!trap") {
        Some(Status::Trap)
    } else if has(b"!fatal") {
        Some(Status::Fatal)
    } else if has(b"!re") {
        Some(Status::Re)
    } else {
        None
    }
}

/// Build the attribute map for one sentence: skip `!`-prefixed status
/// words, parse remaining `=`-prefixed words, coerce their values, ignore
/// anything else.
fn sentence_attributes(sentence: &[Vec<u8>]) -> Attributes {
    let mut attrs = Attributes::new();
    for word in sentence {
        if word.first() == Some(&b'!') {
            continue;
        }
        if let Some((k, v)) = parse_attribute(word) {
            attrs.insert(String::from_utf8_lossy(k).into_owned(), coerce(v));
        }
    }
    attrs
}

/// Find the first `=message=` value anywhere in the block, defaulting to
/// "Unknown error". The message is surfaced through `Error`'s `String`
/// fields, so it is decoded lossily here — human-facing diagnostic text,
/// not reply data subject to the byte-exactness guarantee `Value` carries.
fn first_message(block: &[Vec<Vec<u8>>]) -> String {
    for sentence in block {
        for word in sentence {
            if let Some((key, value)) = parse_attribute(word) {
                if key == b"message" {
                    return String::from_utf8_lossy(value).into_owned();
                }
            }
        }
    }
    "Unknown error".to_string()
}

/// Collect every non-status attribute anywhere in the block into a details
/// map, for attaching to `trap`/`fatal` errors.
fn block_details(block: &[Vec<Vec<u8>>]) -> HashMap<String, String> {
    let mut details = HashMap::new();
    for sentence in block {
        for word in sentence {
            if let Some((k, v)) = parse_attribute(word) {
                details.insert(
                    String::from_utf8_lossy(k).into_owned(),
                    String::from_utf8_lossy(v).into_owned(),
                );
            }
        }
    }
    details
}

/// Parse a complete block (as produced by `codec::read_block`) into either
/// an ordered list of attribute maps (one per `!re` sentence that carries
/// attributes) or a structured error. Operates directly on the raw word
/// bytes the codec handed back; attribute values stay byte-exact all the
/// way into `Value::Text`.
pub fn parse_block(block: &[Vec<Vec<u8>>]) -> Result<Vec<Attributes>> {
    let terminal = block
        .last()
        .and_then(|s| sentence_status(s))
        .ok_or_else(|| Error::protocol("block has no terminal status sentence"))?;

    match terminal {
        Status::Done => {
            let mut results = Vec::new();
            for sentence in block {
                // A sentence that carries only status words (no `=`
                // attributes) contributes no element to the result.
                let attrs = sentence_attributes(sentence);
                if !attrs.is_empty() {
                    results.push(attrs);
                }
            }
            Ok(results)
        }
        Status::Trap => Err(Error::trap(first_message(block), block_details(block))),
        Status::Fatal => Err(Error::fatal(first_message(block), block_details(block))),
        Status::Re => unreachable!("codec::read_block never terminates a block on !re"),
    }
}
