//! Async SMTP connection and line protocol (spec.md §4.4).
//!
//! Ported from the teacher's blocking `SmtpStream`/`SmtpSession`
//! (`std::net::TcpStream` + `native_tls::TlsStream`) to
//! `tokio::net::TcpStream` + `tokio_native_tls::TlsStream`. The buffering
//! scheme — a single byte buffer that survives the STARTTLS upgrade by
//! swapping the enum variant in place — is unchanged, since the upgrade
//! itself, not the I/O model, is what makes naive double-buffering wrong
//! (bytes already read off the plaintext socket must be fed to the new TLS
//! reader, not discarded).

use std::io;
use std::net::SocketAddr;

use native_tls::TlsConnector as NativeTlsConnector;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_native_tls::{TlsConnector, TlsStream};

use super::error::SmtpError;
use super::types::SmtpReply;

enum StreamState {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
    Invalid,
}

pub struct SmtpStream {
    state: StreamState,
    buffer: Vec<u8>,
}

impl SmtpStream {
    pub async fn connect(addr: SocketAddr) -> Result<Self, SmtpError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| SmtpError::Connect {
                host: addr.to_string(),
                source,
            })?;
        Ok(Self {
            state: StreamState::Plain(stream),
            buffer: Vec::new(),
        })
    }

    pub async fn upgrade_tls(
        &mut self,
        domain: &str,
        connector: &NativeTlsConnector,
    ) -> Result<(), SmtpError> {
        let mut state = StreamState::Invalid;
        std::mem::swap(&mut self.state, &mut state);
        let plain = match state {
            StreamState::Plain(stream) => stream,
            StreamState::Tls(stream) => {
                self.state = StreamState::Tls(stream);
                return Ok(());
            }
            StreamState::Invalid => unreachable!(),
        };

        let tokio_connector = TlsConnector::from(connector.clone());
        let tls = tokio_connector
            .connect(domain, plain)
            .await
            .map_err(|source| SmtpError::Tls { source })?;
        self.state = StreamState::Tls(tls);
        Ok(())
    }

    pub async fn send_command(&mut self, command: &str) -> Result<(), SmtpError> {
        let mut data = command.as_bytes().to_vec();
        data.extend_from_slice(b"\r\n");
        self.write_all(&data).await
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), SmtpError> {
        match &mut self.state {
            StreamState::Plain(stream) => {
                stream.write_all(data).await.map_err(io_err)?;
                stream.flush().await.map_err(io_err)
            }
            StreamState::Tls(stream) => {
                stream.write_all(data).await.map_err(io_err)?;
                stream.flush().await.map_err(io_err)
            }
            StreamState::Invalid => Err(SmtpError::Protocol("invalid stream state".into())),
        }
    }

    pub async fn read_reply(&mut self) -> Result<SmtpReply, SmtpError> {
        let mut lines = Vec::new();
        let mut code: Option<u16> = None;
        loop {
            let line = self.read_line().await?;
            if line.len() < 3 {
                return Err(SmtpError::Protocol(format!("invalid reply: {line}")));
            }
            let parsed_code = line[..3]
                .parse::<u16>()
                .map_err(|_| SmtpError::Protocol(format!("invalid code in line: {line}")))?;
            if let Some(existing) = code {
                if existing != parsed_code {
                    return Err(SmtpError::Protocol(format!(
                        "inconsistent reply codes: {existing} vs {parsed_code}"
                    )));
                }
            } else {
                code = Some(parsed_code);
            }
            let is_last = !line.as_bytes().get(3).map(|b| *b == b'-').unwrap_or(false);
            let text = if line.len() > 4 { line[4..].to_string() } else { String::new() };
            lines.push(text);
            if is_last {
                break;
            }
        }
        Ok(SmtpReply { code: code.unwrap_or(0), lines })
    }

    async fn read_line(&mut self) -> Result<String, SmtpError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                if line.ends_with(b"\r\n") {
                    line.truncate(line.len() - 2);
                } else if line.ends_with(b"\n") {
                    line.truncate(line.len() - 1);
                }
                return String::from_utf8(line)
                    .map_err(|err| SmtpError::Protocol(format!("utf8 error: {err}")));
            }

            let mut buf = [0u8; 512];
            let read = match &mut self.state {
                StreamState::Plain(stream) => stream.read(&mut buf).await,
                StreamState::Tls(stream) => stream.read(&mut buf).await,
                StreamState::Invalid => {
                    return Err(SmtpError::Protocol("invalid stream state".into()));
                }
            }
            .map_err(io_err)?;
            if read == 0 {
                return Err(SmtpError::Io {
                    source: io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"),
                });
            }
            self.buffer.extend_from_slice(&buf[..read]);
        }
    }
}

fn io_err(source: io::Error) -> SmtpError {
    SmtpError::Io { source }
}

/// One SMTP dialogue against a single host: the stream plus a transcript
/// for diagnostics (never includes the target address's local-part in
/// plaintext form beyond what the wire protocol itself required).
pub struct SmtpSession {
    host: String,
    stream: SmtpStream,
    pub transcript: Vec<String>,
}

impl SmtpSession {
    pub async fn connect(host: &str, addresses: &[SocketAddr]) -> Result<Self, SmtpError> {
        let mut last_err = None;
        for addr in addresses {
            match SmtpStream::connect(*addr).await {
                Ok(stream) => {
                    return Ok(Self {
                        host: host.to_string(),
                        stream,
                        transcript: Vec::new(),
                    });
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or(SmtpError::NoAddresses { host: host.to_string() }))
    }

    fn record(&mut self, direction: &str, message: &str) {
        self.transcript.push(format!("[{}] {direction}: {message}", self.host));
    }

    fn record_reply(&mut self, reply: &SmtpReply) {
        if reply.lines.is_empty() {
            self.record("S", &format!("{}", reply.code));
        } else {
            for line in &reply.lines {
                self.record("S", &format!("{} {}", reply.code, line));
            }
        }
    }

    pub async fn read_banner(&mut self) -> Result<SmtpReply, SmtpError> {
        let reply = self.stream.read_reply().await?;
        self.record_reply(&reply);
        Ok(reply)
    }

    pub async fn send_command(&mut self, command: &str) -> Result<SmtpReply, SmtpError> {
        self.record("C", command);
        self.stream.send_command(command).await?;
        let reply = self.stream.read_reply().await?;
        self.record_reply(&reply);
        Ok(reply)
    }

    pub async fn starttls(
        &mut self,
        domain: &str,
        connector: &NativeTlsConnector,
    ) -> Result<SmtpReply, SmtpError> {
        let reply = self.send_command("STARTTLS").await?;
        if !reply.is_positive_completion() {
            return Ok(reply);
        }
        self.stream.upgrade_tls(domain, connector).await?;
        Ok(reply)
    }

    /// Best-effort RSET: clears the envelope state after a completed RCPT
    /// so a server that pipelines transactions across connections is not
    /// left mid-transaction. Never surfaces as the attempt's outcome.
    pub async fn rset(&mut self) {
        self.record("C", "RSET");
        if self.stream.send_command("RSET").await.is_ok() {
            if let Ok(reply) = self.stream.read_reply().await {
                self.record_reply(&reply);
            }
        }
    }

    /// Best-effort QUIT: spec.md §4.4 requires it to be sent on every
    /// terminal transition regardless of what came before, and its reply
    /// (or lack of one) must never surface as the attempt's outcome.
    pub async fn quit(&mut self) {
        self.record("C", "QUIT");
        if self.stream.send_command("QUIT").await.is_ok() {
            if let Ok(reply) = self.stream.read_reply().await {
                self.record_reply(&reply);
            }
        }
    }
}
