//! Async line reading for socket endpoints.

use crate::framing::MAX_LINE_LEN;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Reads one line into `line`, refusing lines longer than [`MAX_LINE_LEN`].
///
/// Returns 0 at end of stream. An oversized line fails with
/// [`io::ErrorKind::InvalidData`]; the stream is then mid-line and should be
/// dropped.
pub async fn read_frame<R>(reader: &mut R, line: &mut String) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    // Room for "\r\n".
    let limit = MAX_LINE_LEN as u64 + 2;
    let read = (&mut *reader).take(limit).read_line(line).await?;
    if read as u64 == limit && !line.ends_with('\n') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
    }
    Ok(read)
}
