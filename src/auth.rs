//! Post-6.43 plain-text login with automatic fallback to the pre-6.43 MD5
//! challenge/response.
//!
//! Modeled as a small state machine: `try_plain` either succeeds, fails hard
//! (`!fatal`), or hands off to `try_md5` on `!trap`. The two flows never
//! share mutable state beyond the stream itself.

use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{read_block, write_sentence};
use crate::errors::{Error, Result};
use crate::reply::parse_attribute;

/// Run the full login state machine against `stream`: plain text first,
/// MD5 challenge/response on `!trap`.
pub async fn login<S>(stream: &mut S, username: &str, password: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match try_plain(stream, username, password).await? {
        PlainOutcome::Authenticated => Ok(()),
        PlainOutcome::NeedsChallenge => try_md5(stream, username, password).await,
    }
}

enum PlainOutcome {
    Authenticated,
    NeedsChallenge,
}

/// Send `/login` with name + password. `!done` (with or without `=ret=`)
/// means success; `!trap` means "try MD5 instead"; `!fatal` surfaces as
/// `connection_failed`.
async fn try_plain<S>(stream: &mut S, username: &str, password: &str) -> Result<PlainOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name_word = format!("=name={username}");
    let password_word = format!("=password={password}");
    write_sentence(
        stream,
        &[b"/login", name_word.as_bytes(), password_word.as_bytes()],
    )
    .await?;

    let block = read_block(stream).await?;
    match terminal_tag(&block) {
        Some(b"!done") => Ok(PlainOutcome::Authenticated),
        Some(b"!trap") => Ok(PlainOutcome::NeedsChallenge),
        Some(b"!fatal") => Err(Error::connection_failed(
            first_message(&block).unwrap_or_else(|| "login rejected (fatal)".to_string()),
        )),
        _ => Err(Error::protocol("login reply had no terminal status")),
    }
}

/// Pre-6.43 MD5 challenge/response: request a salt, hash, respond.
async fn try_md5<S>(stream: &mut S, username: &str, password: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_sentence(stream, &[b"/login"]).await?;
    let block = read_block(stream).await?;

    let salt_hex = extract_salt(&block)?;
    if salt_hex.is_empty() {
        // Server considers the session already authenticated: an empty or
        // absent salt has no further use here.
        return match terminal_tag(&block) {
            Some(b"!done") => Ok(()),
            _ => Err(Error::protocol("expected !done with empty salt")),
        };
    }

    let response_hex = hash_password(password, &salt_hex)?;
    let response_word = format!("=response=00{response_hex}");
    let name_word = format!("=name={username}");
    write_sentence(stream, &[b"/login", name_word.as_bytes(), response_word.as_bytes()]).await?;

    let block = read_block(stream).await?;
    match terminal_tag(&block) {
        Some(b"!done") => Ok(()),
        Some(b"!trap") => Err(Error::auth_failed(
            first_message(&block).unwrap_or_else(|| "invalid user name or password".to_string()),
        )),
        Some(b"!fatal") => Err(Error::connection_failed(
            first_message(&block).unwrap_or_else(|| "login rejected (fatal)".to_string()),
        )),
        _ => Err(Error::protocol("challenge reply had no terminal status")),
    }
}

fn terminal_tag(block: &[Vec<Vec<u8>>]) -> Option<&'static [u8]> {
    let last = block.last()?;
    for word in last {
        match word.as_slice() {
            b"!done" => return Some(b"!done"),
            b"!trap" => return Some(b"!trap"),
            b"!fatal" => return Some(b"!fatal"),
            _ => {}
        }
    }
    None
}

fn first_message(block: &[Vec<Vec<u8>>]) -> Option<String> {
    for sentence in block {
        for word in sentence {
            if let Some((key, value)) = parse_attribute(word) {
                if key == b"message" {
                    return Some(String::from_utf8_lossy(value).into_owned());
                }
            }
        }
    }
    None
}

/// Scan the block for the sentence containing `!done`, then find the first
/// `=ret=` word in it and return its suffix. Empty string means "absent or
/// empty" (success without challenge). A block with no `!done` sentence at
/// all is a protocol error.
fn extract_salt(block: &[Vec<Vec<u8>>]) -> Result<String> {
    let done_sentence = block
        .iter()
        .find(|sentence| sentence.iter().any(|w| w.as_slice() == b"!done"))
        .ok_or_else(|| Error::protocol("no_done_response"))?;

    for word in done_sentence {
        if let Some((key, value)) = parse_attribute(word) {
            if key == b"ret" {
                return Ok(String::from_utf8_lossy(value).into_owned());
            }
        }
    }
    Ok(String::new())
}

/// `hash(password, hex_salt)`: decode the hex salt, compute
/// `MD5(0x00 || utf8(password) || salt)`, return its lowercase hex
/// (32 characters). Deterministic and sensitive to both inputs.
pub fn hash_password(password: &str, hex_salt: &str) -> Result<String> {
    let salt = hex_decode(hex_salt)?;
    let mut hasher = Md5::new();
    hasher.update([0u8]);
    hasher.update(password.as_bytes());
    hasher.update(&salt);
    Ok(format!("{:x}", hasher.finalize()))
}

fn hex_decode(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(Error::protocol(format!("malformed salt (odd length): {s}")));
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    for chunk in bytes.chunks(2) {
        let hi = hex_nibble(chunk[0])?;
        let lo = hex_nibble(chunk[1])?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::protocol(format!("malformed salt byte: {}", c as char))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn hash_is_32_lowercase_hex_chars() {
        let h = hash_password("p", "00").unwrap();
        assert_eq!(h.len(), 32);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_matches_known_vector() {
        // MD5(0x00 || "p" || 0x00) computed independently.
        let digest = {
            let mut hasher = Md5::new();
            hasher.update([0u8]);
            hasher.update(b"p");
            hasher.update([0u8]);
            format!("{:x}", hasher.finalize())
        };
        assert_eq!(hash_password("p", "00").unwrap(), digest);
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(
            hash_password("secret", "deadbeef").unwrap(),
            hash_password("secret", "deadbeef").unwrap()
        );
    }

    #[test]
    fn hash_is_sensitive_to_password() {
        assert_ne!(
            hash_password("secret1", "deadbeef").unwrap(),
            hash_password("secret2", "deadbeef").unwrap()
        );
    }

    #[test]
    fn hash_is_sensitive_to_salt() {
        assert_ne!(
            hash_password("secret", "deadbeef").unwrap(),
            hash_password("secret", "00000000").unwrap()
        );
    }

    #[test]
    fn hash_rejects_malformed_salt() {
        assert!(hash_password("p", "zz").is_err());
        assert!(hash_password("p", "abc").is_err());
    }

    #[test]
    fn extract_salt_empty_is_success_path() {
        let block: Vec<Vec<Vec<u8>>> = vec![vec![b"!done".to_vec()]];
        assert_eq!(extract_salt(&block).unwrap(), "");
    }

    #[test]
    fn extract_salt_reads_ret_attribute() {
        let block: Vec<Vec<Vec<u8>>> = vec![vec![b"!done".to_vec(), b"=ret=deadbeef".to_vec()]];
        assert_eq!(extract_salt(&block).unwrap(), "deadbeef");
    }

    #[test]
    fn extract_salt_missing_done_is_protocol_error() {
        let block: Vec<Vec<Vec<u8>>> = vec![vec![b"!trap".to_vec()]];
        let err = extract_salt(&block).unwrap_err();
        assert_eq!(err.kind(), crate::errors::Kind::Protocol);
    }

    #[tokio::test]
    async fn plain_login_success() {
        let (mut client, mut server) = duplex(512);
        let server_task = tokio::spawn(async move {
            let _request = read_block(&mut server).await.unwrap();
            write_sentence(&mut server, &[b"!done"]).await.unwrap();
        });
        login(&mut client, "admin", "p").await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn falls_back_to_md5_on_trap() {
        let (mut client, mut server) = duplex(1024);
        let server_task = tokio::spawn(async move {
            // First attempt: plain login, server traps.
            let _plain = read_block(&mut server).await.unwrap();
            write_sentence(
                &mut server,
                &[b"!trap", b"=message=invalid user name or password"],
            )
            .await
            .unwrap();

            // Second attempt: bare /login, server returns a salt.
            let _bare = read_block(&mut server).await.unwrap();
            write_sentence(
                &mut server,
                &[b"!done", b"=ret=00000000000000000000000000000000"],
            )
            .await
            .unwrap();

            // Third: challenge response, server accepts.
            let challenge = read_block(&mut server).await.unwrap();
            let response_word = String::from_utf8_lossy(&challenge[0][2]).into_owned();
            let expected = format!(
                "=response=00{}",
                hash_password("p", "00000000000000000000000000000000").unwrap()
            );
            assert_eq!(response_word, expected);
            write_sentence(&mut server, &[b"!done"]).await.unwrap();
        });
        login(&mut client, "admin", "p").await.unwrap();
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn md5_trap_on_challenge_is_auth_failed() {
        let (mut client, mut server) = duplex(1024);
        let server_task = tokio::spawn(async move {
            let _plain = read_block(&mut server).await.unwrap();
            write_sentence(&mut server, &[b"!trap", b"=message=bad creds"])
                .await
                .unwrap();
            let _bare = read_block(&mut server).await.unwrap();
            write_sentence(&mut server, &[b"!done", b"=ret=00"]).await.unwrap();
            let _challenge = read_block(&mut server).await.unwrap();
            write_sentence(&mut server, &[b"!trap", b"=message=invalid user name or password"])
                .await
                .unwrap();
        });
        let err = login(&mut client, "admin", "wrong").await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::Kind::AuthFailed);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn fatal_on_plain_login_is_connection_failed() {
        let (mut client, mut server) = duplex(512);
        let server_task = tokio::spawn(async move {
            let _req = read_block(&mut server).await.unwrap();
            write_sentence(&mut server, &[b"!fatal", b"=message=session limit reached"])
                .await
                .unwrap();
        });
        let err = login(&mut client, "admin", "p").await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::Kind::ConnectionFailed);
        server_task.await.unwrap();
    }
}
