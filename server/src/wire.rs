//! Line-oriented ASCII framing shared by the control, screen-control, and
//! file-transfer planes (spec §6). Every message on these planes is a
//! single line terminated by `\n`; the file-transfer plane switches to raw
//! binary mode only after its one command line has been consumed.

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Reads one line, stripping the trailing `\n` and any `\r`. `Ok(None)`
/// means the peer closed the connection cleanly before sending a line.
pub async fn read_line<R>(reader: &mut BufReader<R>) -> std::io::Result<Option<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = String::new();
    let n = reader.read_line(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    while buf.ends_with('\n') || buf.ends_with('\r') {
        buf.pop();
    }
    Ok(Some(buf))
}

/// Writes a line, appending `\n` if the caller didn't already include one.
pub async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    if !line.ends_with('\n') {
        writer.write_all(b"\n").await?;
    }
    writer.flush().await
}

/// Encodes a roster snapshot the way spec §6.2's `ROSTER:` line expects:
/// `id:username` pairs joined by `|`.
pub fn encode_roster(entries: &[control::RosterEntry]) -> String {
    entries.iter().map(|e| format!("{}:{}", e.id, e.username)).collect::<Vec<_>>().join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn reads_lines_and_reports_eof() {
        let mut reader = BufReader::new(Cursor::new(b"REGISTER:alice\nCHAT_MESSAGE:hi\n".to_vec()));
        assert_eq!(read_line(&mut reader).await.unwrap(), Some("REGISTER:alice".to_string()));
        assert_eq!(read_line(&mut reader).await.unwrap(), Some("CHAT_MESSAGE:hi".to_string()));
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }

    #[test]
    fn encodes_roster_as_pipe_joined_pairs() {
        let entries = vec![
            control::RosterEntry { id: 0, username: "alice".into() },
            control::RosterEntry { id: 1, username: "bob".into() },
        ];
        assert_eq!(encode_roster(&entries), "0:alice|1:bob");
    }
}
