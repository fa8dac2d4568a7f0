// Newline-delimited message framing over TCP.
//
// Every message on the wire is one line: a JSON-serialized record followed by
// a single `\n`. `write_line` and `read_line` operate on text; `read_frame`
// hands back the raw bytes of a line so callers can decide what invalid
// UTF-8 means. The caller handles JSON serialization separately, keeping
// this module format-agnostic.
//
// `MAX_LINE_SIZE` (64 KiB) bounds how much a peer can make us buffer before a
// newline shows up. Chat lines are tiny; the largest expected line is a
// handshake response carrying a long MOTD.

use std::io::{self, BufRead, Read, Write};

/// Maximum allowed line length in bytes, excluding the terminating newline.
pub const MAX_LINE_SIZE: usize = 64 * 1024;

/// Write one line: payload, then `\n`, then flush.
///
/// The payload must not itself contain a newline, since that would split it
/// into two frames on the receiving side.
pub fn write_line<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    if line.len() > MAX_LINE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("line too long: {} bytes (max {MAX_LINE_SIZE})", line.len()),
        ));
    }
    if line.contains('\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "line payload contains an embedded newline",
        ));
    }
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read one newline-terminated frame as raw bytes, without the terminator
/// (a trailing `\r` is stripped too).
///
/// Returns `Ok(None)` on a clean EOF before any byte of a new frame.
/// Returns `UnexpectedEof` if the stream ends in the middle of a line and
/// `InvalidData` if the line exceeds `MAX_LINE_SIZE`. The bytes are not
/// checked for UTF-8, so a bad line can be skipped without losing the
/// stream.
pub fn read_frame<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let limit = MAX_LINE_SIZE as u64 + 1;
    let read = reader.by_ref().take(limit).read_until(b'\n', &mut line)?;
    if read == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        if read as u64 >= limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line too long (max {MAX_LINE_SIZE} bytes)"),
            ));
        }
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stream closed in the middle of a line",
        ));
    }
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(line))
}

/// `read_frame`, then UTF-8 decoding. A line that is not UTF-8 is
/// `InvalidData`; it has already been consumed, so the next call reads the
/// following line.
pub fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    match read_frame(reader)? {
        None => Ok(None),
        Some(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
    }
}
