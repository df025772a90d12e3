//! Minimal Tor control-port client
//!
//! Speaks just enough of the line-oriented control protocol to authenticate
//! with a password and issue `GETINFO` queries:
//!
//! ```text
//! C: AUTHENTICATE "password"        S: 250 OK
//! C: GETINFO traffic/read           S: 250-traffic/read=1234
//!                                   S: 250 OK
//! C: GETINFO circuit-status         S: 250+circuit-status=
//!                                   S: 1 BUILT ...
//!                                   S: .
//!                                   S: 250 OK
//! C: QUIT                           S: 250 closing connection
//! ```

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::trace;

use super::{ControlClient, ControlConnection, ControlError};

const STATUS_OK: u16 = 250;
const STATUS_UNRECOGNIZED_KEY: u16 = 552;

#[derive(Debug, Clone, Copy, Default)]
pub struct TorControlClient;

impl TorControlClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ControlClient for TorControlClient {
    type Connection = TorConnection;

    async fn connect(&self, address: &str, port: u16) -> Result<TorConnection, ControlError> {
        let stream = TcpStream::connect((address, port)).await.map_err(|e| {
            ControlError::Unreachable(format!("could not connect to {address}:{port}: {e}"))
        })?;
        trace!("connected to control port {address}:{port}");

        Ok(TorConnection {
            stream: BufReader::new(stream),
            closed: false,
        })
    }
}

/// One reply line; `data` holds the body of a `+` (multi-line) entry.
#[derive(Debug)]
struct ReplyLine {
    text: String,
    data: Option<Vec<String>>,
}

#[derive(Debug)]
struct Reply {
    status: u16,
    lines: Vec<ReplyLine>,
}

impl Reply {
    fn message(&self) -> String {
        self.lines
            .last()
            .map(|line| format!("{} {}", self.status, line.text))
            .unwrap_or_else(|| self.status.to_string())
    }
}

#[derive(Debug)]
pub struct TorConnection {
    stream: BufReader<TcpStream>,
    closed: bool,
}

impl TorConnection {
    async fn send(&mut self, command: &str) -> Result<(), ControlError> {
        let stream = self.stream.get_mut();
        stream.write_all(command.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, ControlError> {
        let mut line = String::new();
        if self.stream.read_line(&mut line).await? == 0 {
            return Err(ControlError::Unreachable(
                "connection closed by daemon".to_string(),
            ));
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(line)
    }

    async fn read_data(&mut self) -> Result<Vec<String>, ControlError> {
        let mut data = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == "." {
                return Ok(data);
            }
            match line.strip_prefix('.') {
                // dot-stuffed line
                Some(rest) if rest.starts_with('.') => data.push(rest.to_string()),
                _ => data.push(line),
            }
        }
    }

    async fn read_reply(&mut self) -> Result<Reply, ControlError> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            let (Some(code), Some(separator), Some(text)) =
                (line.get(..3), line.get(3..4), line.get(4..))
            else {
                return Err(ControlError::Protocol(format!("malformed reply line {line:?}")));
            };
            let status = code
                .parse::<u16>()
                .map_err(|_| ControlError::Protocol(format!("malformed status in {line:?}")))?;
            let text = text.to_string();

            match separator {
                " " => {
                    lines.push(ReplyLine { text, data: None });
                    return Ok(Reply { status, lines });
                }
                "-" => lines.push(ReplyLine { text, data: None }),
                "+" => {
                    let data = self.read_data().await?;
                    lines.push(ReplyLine {
                        text,
                        data: Some(data),
                    });
                }
                _ => {
                    return Err(ControlError::Protocol(format!(
                        "unknown separator in {line:?}"
                    )));
                }
            }
        }
    }
}

/// Quote a credential as a control-protocol `QuotedString`.
fn quote(credential: &str) -> Result<String, ControlError> {
    if credential.contains(['\r', '\n']) {
        return Err(ControlError::AuthFailed(
            "credential contains a line break".to_string(),
        ));
    }
    let escaped = credential.replace('\\', "\\\\").replace('"', "\\\"");
    Ok(format!("\"{escaped}\""))
}

#[async_trait]
impl ControlConnection for TorConnection {
    async fn authenticate(&mut self, credential: &str) -> Result<(), ControlError> {
        let command = if credential.is_empty() {
            "AUTHENTICATE".to_string()
        } else {
            format!("AUTHENTICATE {}", quote(credential)?)
        };
        self.send(&command).await?;

        let reply = self.read_reply().await?;
        if reply.status == STATUS_OK {
            Ok(())
        } else {
            Err(ControlError::AuthFailed(reply.message()))
        }
    }

    async fn query(&mut self, key: &str) -> Result<String, ControlError> {
        self.send(&format!("GETINFO {key}")).await?;

        let reply = self.read_reply().await?;
        match reply.status {
            STATUS_OK => {}
            STATUS_UNRECOGNIZED_KEY => return Err(ControlError::NotFound(key.to_string())),
            _ => return Err(ControlError::Protocol(reply.message())),
        }

        let prefix = format!("{key}=");
        let line = reply
            .lines
            .into_iter()
            .find(|line| line.text.starts_with(&prefix))
            .ok_or_else(|| ControlError::NotFound(key.to_string()))?;

        Ok(match line.data {
            Some(data) => data.join("\n"),
            None => line.text[prefix.len()..].to_string(),
        })
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.send("QUIT").await {
            trace!("failed to send QUIT: {e}");
        } else if let Err(e) = self.read_reply().await {
            trace!("no reply to QUIT: {e}");
        }
        if let Err(e) = self.stream.get_mut().shutdown().await {
            trace!("failed to shut down control connection: {e}");
        }
    }
}
