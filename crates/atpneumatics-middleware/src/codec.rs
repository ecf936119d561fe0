//! Line-delimited JSON framing shared by the client and the simulator.
//!
//! One JSON object per message, each followed by [`TERMINATOR`].  Readers
//! accept a bare `\n` as well and skip blank lines.

use atpneumatics_types::{PneumaticsError, TERMINATOR};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum byte length of a single framed message.
///
/// Longer frames are rejected instead of being buffered without bound.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Serialise `msg` and write it followed by the terminator.
pub async fn write_json<W, T>(writer: &mut W, msg: &T) -> Result<(), PneumaticsError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut bytes =
        serde_json::to_vec(msg).map_err(|e| PneumaticsError::Serialization(e.to_string()))?;
    bytes.extend_from_slice(TERMINATOR);
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next frame and deserialise it as `T`.
///
/// Returns `Ok(None)` on a clean end of stream.
pub async fn read_json<R, T>(reader: &mut R) -> Result<Option<T>, PneumaticsError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let mut limited = (&mut *reader).take(MAX_MESSAGE_BYTES as u64);
        let n = limited.read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        if n == MAX_MESSAGE_BYTES && line.last() != Some(&b'\n') {
            return Err(PneumaticsError::Serialization(format!(
                "frame exceeds the limit of {MAX_MESSAGE_BYTES} bytes"
            )));
        }
        let frame = line.trim_ascii();
        if frame.is_empty() {
            continue;
        }
        return serde_json::from_slice(frame)
            .map(Some)
            .map_err(|e| PneumaticsError::Serialization(e.to_string()));
    }
}
