//! The fake HTTP exchange that opens every gated session.

use crate::error::TransportError;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_HEADER_LINES: usize = 100;
const MAX_HEADER_LINE: u64 = 8 * 1024;
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
const CONTENT_TYPE: &str = "application/octet-stream";
pub const GATE_PATH: &str = "/gate";

/// Read header lines up to the first blank line. Returns the lines, start line first.
pub async fn read_header_block<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<String>, TransportError> {
    let mut lines = Vec::new();

    loop {
        if lines.len() >= MAX_HEADER_LINES {
            return Err(TransportError::HeaderTooLong(MAX_HEADER_LINES));
        }

        let mut line = String::new();
        let read = (&mut *reader)
            .take(MAX_HEADER_LINE)
            .read_line(&mut line)
            .await?;
        if read == 0 {
            return Err(TransportError::Closed);
        }
        if !line.ends_with('\n') {
            return Err(TransportError::HeaderTooLong(MAX_HEADER_LINE as usize));
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Ok(lines);
        }
        lines.push(line.to_string());
    }
}

/// Accept whatever request the client sent. Returns its request line for logging.
pub async fn read_request_header<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<String, TransportError> {
    let lines = read_header_block(reader).await?;
    Ok(lines.into_iter().next().unwrap_or_default())
}

/// Status line, date, server and anti-caching headers. No `Content-Length`: the body never ends.
pub fn response_header(server_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Date: {date}\r\n\
         Server: {server}\r\n\
         Content-Type: {content_type}\r\n\
         Expires: Thu, 01 Jan 1970 00:00:00 GMT\r\n\
         Cache-Control: no-cache\r\n\
         Connection: keep-alive\r\n\
         \r\n",
        date = now.format(HTTP_DATE),
        server = server_name,
        content_type = CONTENT_TYPE,
    )
}

pub async fn write_response_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    server_name: &str,
) -> Result<(), TransportError> {
    writer
        .write_all(response_header(server_name, Utc::now()).as_bytes())
        .await?;
    writer.flush().await?;
    Ok(())
}

pub fn request_header(host: &str) -> String {
    format!(
        "POST {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Content-Type: {content_type}\r\n\
         Transfer-Encoding: chunked\r\n\
         Connection: keep-alive\r\n\
         \r\n",
        path = GATE_PATH,
        host = host,
        content_type = CONTENT_TYPE,
    )
}

/// Client side: read the server's header block and insist on a 200.
pub async fn read_response_header<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<(), TransportError> {
    let lines = read_header_block(reader).await?;
    let status = lines.first().map(String::as_str).unwrap_or_default();
    let mut parts = status.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some("200")) if version.starts_with("HTTP/") => Ok(()),
        _ => Err(TransportError::Malformed(format!(
            "unexpected status line '{}'",
            status
        ))),
    }
}
