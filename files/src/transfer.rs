//! Wire-level parsing and rendering for the file-transfer plane (spec
//! §4.7, §6.5). The actual byte transfer (reading `declared_size` bytes
//! off the socket, streaming a download back) is the connection worker's
//! job; this module only turns command lines into structured requests and
//! structured outcomes back into response lines.

use control::{ClientId, FileId, ServerError};

use crate::catalog::FileEntry;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// `UPLOAD:<client_id>:<username>:<filename>:<size>`
    Upload { client_id: ClientId, username: String, filename: String, declared_size: u64 },
    /// `DOWNLOAD:<file_id>`
    Download { file_id: FileId },
    /// `DELETE:<file_id>:<client_id>`
    Delete { file_id: FileId, client_id: ClientId },
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseError(pub &'static str);

/// Parses one command header line (without its trailing `\n`).
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let mut parts = line.splitn(2, ':');
    let verb = parts.next().ok_or(ParseError("empty command"))?;
    let rest = parts.next().unwrap_or("");
    match verb {
        "UPLOAD" => {
            let mut fields = rest.splitn(4, ':');
            let client_id: u32 =
                fields.next().ok_or(ParseError("missing client id"))?.parse().map_err(|_| ParseError("bad client id"))?;
            let username = fields.next().ok_or(ParseError("missing username"))?.to_string();
            let filename = fields.next().ok_or(ParseError("missing filename"))?.to_string();
            let size: u64 =
                fields.next().ok_or(ParseError("missing size"))?.parse().map_err(|_| ParseError("bad size"))?;
            Ok(Command::Upload { client_id: ClientId(client_id), username, filename, declared_size: size })
        }
        "DOWNLOAD" => {
            let id: u32 = rest.parse().map_err(|_| ParseError("bad file id"))?;
            Ok(Command::Download { file_id: FileId(id) })
        }
        "DELETE" => {
            let mut fields = rest.splitn(2, ':');
            let id: u32 =
                fields.next().ok_or(ParseError("missing file id"))?.parse().map_err(|_| ParseError("bad file id"))?;
            let client_id: u32 =
                fields.next().ok_or(ParseError("missing client id"))?.parse().map_err(|_| ParseError("bad client id"))?;
            Ok(Command::Delete { file_id: FileId(id), client_id: ClientId(client_id) })
        }
        _ => Err(ParseError("unknown command")),
    }
}

pub fn render_ready() -> &'static str {
    "READY\n"
}

pub fn render_success(file_id: FileId) -> String {
    format!("SUCCESS:{file_id}\n")
}

pub fn render_file_header(entry: &FileEntry) -> String {
    format!("FILE:{}:{}\n", entry.filename, entry.size)
}

pub fn render_delete_success(file_id: FileId) -> String {
    format!("DELETE_SUCCESS:{file_id}\n")
}

pub fn render_error(err: &ServerError) -> String {
    format!("ERROR:{}\n", err.wire_reason().unwrap_or_else(|| "internal error".to_string()))
}

pub fn render_file_offer(entry: &FileEntry) -> String {
    format!(
        "FILE_OFFER:{}:{}:{}:{}:{}\n",
        entry.file_id, entry.filename, entry.size, entry.uploader_name, entry.uploader_id
    )
}

pub fn render_file_deleted(file_id: FileId) -> String {
    format!("FILE_DELETED:{file_id}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upload_header() {
        let cmd = parse_command("UPLOAD:3:alice:notes.txt:1024").unwrap();
        assert_eq!(
            cmd,
            Command::Upload { client_id: ClientId(3), username: "alice".into(), filename: "notes.txt".into(), declared_size: 1024 }
        );
    }

    #[test]
    fn parses_download_and_delete() {
        assert_eq!(parse_command("DOWNLOAD:7").unwrap(), Command::Download { file_id: FileId(7) });
        assert_eq!(
            parse_command("DELETE:9:3").unwrap(),
            Command::Delete { file_id: FileId(9), client_id: ClientId(3) }
        );
    }

    #[test]
    fn rejects_unknown_verbs_and_malformed_sizes() {
        assert!(parse_command("FOO:bar").is_err());
        assert!(parse_command("UPLOAD:3:alice:name:not-a-number").is_err());
    }
}
