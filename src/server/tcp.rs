//! Newline-delimited JSON transport over TCP.
//!
//! Each line is one [`Envelope`]. The first inbound line must be an `AUTH`
//! envelope carrying the user id issued by the upstream gateway and the
//! character name; after that only `COMMAND` envelopes are accepted.

use anyhow::Result;
use log::{debug, info, warn};
use serde::Deserialize;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::game::types::EntityRef;
use crate::logutil::escaped;
use crate::server::game::GameServer;
use crate::server::messages;
use crate::server::router::{ChannelTransport, Envelope, Transport};

/// Longest inbound line accepted.
pub const MAX_LINE: usize = 4096;

#[derive(Debug, Deserialize, PartialEq)]
pub struct AuthPayload {
    pub user_id: String,
    #[serde(default)]
    pub name: String,
}

pub fn parse_auth(envelope: &Envelope) -> Option<AuthPayload> {
    if envelope.kind != messages::AUTH {
        return None;
    }
    let auth: AuthPayload = serde_json::from_value(envelope.payload.clone()).ok()?;
    if auth.user_id.trim().is_empty() {
        return None;
    }
    Some(auth)
}

/// Raw command text. The payload is either the text itself or `{text}`.
pub fn parse_command(envelope: &Envelope) -> Option<String> {
    if envelope.kind != messages::COMMAND {
        return None;
    }
    match &envelope.payload {
        serde_json::Value::String(text) => Some(text.clone()),
        other => other.get("text")?.as_str().map(str::to_string),
    }
}

fn decode(line: &str) -> Option<Envelope> {
    serde_json::from_str(line).ok()
}

/// Splits a byte stream into lines without ever holding more than
/// `max_line_len` bytes of an unfinished line.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    max_line_len: usize,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(inner: R, max_line_len: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            max_line_len: max_line_len.max(1),
        }
    }

    /// Next line with the trailing `\n` (and `\r`) stripped. Invalid UTF-8
    /// is replaced rather than rejected. `Ok(None)` is a clean EOF.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "eof while reading line",
                ));
            }
            let newline = available.iter().position(|&b| b == b'\n');
            let end = newline.unwrap_or(available.len());
            if self.buf.len() + end > self.max_line_len {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
            }
            self.buf.extend_from_slice(&available[..end]);
            let used = newline.map_or(end, |i| i + 1);
            self.inner.consume(used);
            if newline.is_some() {
                let mut line = std::mem::take(&mut self.buf);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
        }
    }
}

pub async fn serve(
    listener: TcpListener,
    server: Arc<GameServer>,
    transport: Arc<ChannelTransport>,
) -> Result<()> {
    info!("listening on {}", listener.local_addr()?);
    loop {
        let (stream, addr) = listener.accept().await?;
        let server = server.clone();
        let transport = transport.clone();
        tokio::spawn(handle_connection(stream, addr, server, transport));
    }
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = outbound.recv().await {
        let Ok(mut line) = serde_json::to_string(&envelope) else {
            continue;
        };
        line.push('\n');
        if write_half.write_all(line.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Every exit path, read errors included, unregisters the connection and
/// hands an attached character to its grace period.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    server: Arc<GameServer>,
    transport: Arc<ChannelTransport>,
) {
    let connection = uuid::Uuid::new_v4().to_string();
    let (read_half, write_half) = stream.into_split();
    let writer = tokio::spawn(write_loop(write_half, transport.register(&connection)));
    let mut reader = LineReader::new(BufReader::new(read_half), MAX_LINE);

    if let Some(me) = attach(&mut reader, &connection, addr, &server, &transport).await {
        info!("{} connected from {} as {}", me.id, addr, me.name);
        loop {
            let line = match reader.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("dropping {} ({}): {}", me.name, addr, e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match decode(&line).as_ref().and_then(parse_command) {
                Some(text) => server.command(&me.id, &connection, &text).await,
                None => {
                    warn!("bad frame from {}: {}", me.name, escaped(&line));
                    transport.send_to(&connection, &messages::command_error("Malformed message.", None));
                }
            }
        }
        info!("{} disconnected", me.name);
        server.disconnect(&me.id, &connection).await;
    }

    transport.unregister(&connection);
    let _ = writer.await;
}

/// Reads the `AUTH` line and logs the user in. Failures are reported to the
/// client and leave nothing attached.
async fn attach<R: AsyncBufRead + Unpin>(
    reader: &mut LineReader<R>,
    connection: &str,
    addr: SocketAddr,
    server: &GameServer,
    transport: &ChannelTransport,
) -> Option<EntityRef> {
    let auth = match reader.read_line().await {
        Ok(Some(line)) => decode(&line).as_ref().and_then(parse_auth),
        Ok(None) => None,
        Err(e) => {
            debug!("{} failed before auth: {}", addr, e);
            None
        }
    };
    let Some(auth) = auth else {
        transport.send_to(connection, &messages::command_error("Authenticate first.", None));
        return None;
    };
    match server.connect(connection, &auth.user_id, &auth.name).await {
        Ok(me) => Some(me),
        Err(e) => {
            transport.send_to(connection, &messages::command_error(&e.to_string(), None));
            server.world.router.detach(connection);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::io::Builder;
    use tokio_test::{assert_ok, block_on};

    #[test]
    fn auth_needs_a_user_id() {
        let env = Envelope::new(messages::AUTH, json!({ "user_id": "u1", "name": "Ash" }));
        assert_eq!(
            parse_auth(&env),
            Some(AuthPayload {
                user_id: "u1".into(),
                name: "Ash".into()
            })
        );
        let env = Envelope::new(messages::AUTH, json!({ "user_id": " " }));
        assert_eq!(parse_auth(&env), None);
        let env = Envelope::new(messages::COMMAND, json!({ "user_id": "u1" }));
        assert_eq!(parse_auth(&env), None);
    }

    #[test]
    fn command_payload_forms() {
        let env = decode(r#"{"type":"COMMAND","payload":"/say hi"}"#).unwrap();
        assert_eq!(parse_command(&env).as_deref(), Some("/say hi"));
        let env = decode(r#"{"type":"COMMAND","payload":{"text":"/look"}}"#).unwrap();
        assert_eq!(parse_command(&env).as_deref(), Some("/look"));
        let env = decode(r#"{"type":"AUTH","payload":"/look"}"#).unwrap();
        assert_eq!(parse_command(&env), None);
    }

    #[test]
    fn garbled_lines_do_not_decode() {
        assert!(decode("not json").is_none());
        assert!(decode("\u{fffd}\u{fffd}").is_none());
    }

    #[test]
    fn lines_split_across_reads_are_joined() {
        let mock = Builder::new()
            .read(b"{\"type\":")
            .read(b"\"AUTH\"}\r\nnext")
            .read(b"\n")
            .build();
        let mut reader = LineReader::new(BufReader::new(mock), MAX_LINE);
        block_on(async {
            let first = assert_ok!(reader.read_line().await);
            assert_eq!(first.as_deref(), Some(r#"{"type":"AUTH"}"#));
            let second = assert_ok!(reader.read_line().await);
            assert_eq!(second.as_deref(), Some("next"));
            assert_eq!(assert_ok!(reader.read_line().await), None);
        });
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let bytes: &[u8] = &[0xff, 0xfe, b'\n', b'o', b'k', b'\n'];
        let mut reader = LineReader::new(bytes, MAX_LINE);
        block_on(async {
            let line = assert_ok!(reader.read_line().await).unwrap();
            assert_eq!(line, "\u{fffd}\u{fffd}");
            assert_eq!(assert_ok!(reader.read_line().await).as_deref(), Some("ok"));
        });
    }

    #[test]
    fn long_lines_fail_before_the_newline_arrives() {
        let mut endless = vec![b'x'; 64];
        endless.extend_from_slice(b"\nshort\n");
        let mut reader = LineReader::new(&endless[..], 16);
        block_on(async {
            let err = reader.read_line().await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        });

        let exact = b"0123456789abcdef\n";
        let mut reader = LineReader::new(&exact[..], 16);
        block_on(async {
            assert_eq!(assert_ok!(reader.read_line().await).unwrap().len(), 16);
        });
    }

    #[test]
    fn truncated_final_line_is_an_error() {
        let mut reader = LineReader::new(&b"half"[..], MAX_LINE);
        block_on(async {
            let err = reader.read_line().await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        });
    }
}
