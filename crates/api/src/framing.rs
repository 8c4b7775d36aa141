//! Length-prefixed message framing over a byte stream.
//!
//! Each message is a four-byte little-endian length followed by that many
//! bytes of `rmp-serde`-encoded payload. TCP already guarantees byte-level
//! integrity, so unlike the durability segment format this carries no
//! checksum, only the length prefix a stream codec needs to find message
//! boundaries.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Largest single message this side will read, guarding against a
/// corrupt or malicious length prefix driving an unbounded allocation.
pub const MAX_MESSAGE_BYTES: u32 = 64 * 1024 * 1024;

/// Write one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(payload.len() as u32)?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Read one length-prefixed frame. Returns `Ok(None)` on a clean EOF
/// between frames (the peer closed the connection); any other I/O error,
/// including an EOF mid-frame, is propagated.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let len = match reader.read_u32::<LittleEndian>() {
        Ok(len) => len,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_MESSAGE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the {MAX_MESSAGE_BYTES} byte limit"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}
