//! In-band conventions layered on the raw byte stream.
//!
//! The relay does not frame messages: whatever one read returns is relayed as
//! one chunk. The only structure the server looks at is the name handshake
//! carried by a client's first chunk and the exact quit keyword.

use bytes::Bytes;

/// Upper bound on the size of one relayed chunk.
pub const READ_BUFFER_SIZE: usize = 1024;

pub const DEFAULT_PORT: u16 = 1060;

/// Compared byte-for-byte, so `quit` or `QUIT` are ordinary chat text.
pub const QUIT_KEYWORD: &str = "Quit";

const LINE_ENDINGS: &[char] = &['\n', '\r'];

pub fn join_notice(name: &str) -> Bytes {
    Bytes::from(format!("Server: {name} has joined the chat."))
}

pub fn leave_notice(name: &str) -> Bytes {
    Bytes::from(format!("Server: {name} has left the chat."))
}

/// Returns true when the chunk is exactly the quit keyword, ignoring a
/// trailing line ending.
pub fn is_quit(chunk: &[u8]) -> bool {
    std::str::from_utf8(chunk)
        .map(|text| text.trim_end_matches(LINE_ENDINGS) == QUIT_KEYWORD)
        .unwrap_or(false)
}

/// Splits a client's first chunk into its name and whatever followed it.
///
/// The name runs up to the first `\n`; bytes after that newline were already
/// chat traffic that arrived in the same read and must still be relayed. A
/// blank name yields `None`.
pub fn split_handshake(chunk: &Bytes) -> (Option<String>, Bytes) {
    let (name, rest) = match chunk.iter().position(|&byte| byte == b'\n') {
        Some(newline) => (chunk.slice(..newline), chunk.slice(newline + 1..)),
        None => (chunk.clone(), Bytes::new()),
    };

    let name = String::from_utf8_lossy(&name).trim().to_string();
    ((!name.is_empty()).then_some(name), rest)
}
