//! TCP links between ring neighbours.
//!
//! Tokens travel as newline-delimited JSON. [`InboundListener`] accepts the
//! predecessor and turns every decoded line into a [`NodeEvent::TokenArrived`];
//! [`SuccessorLink`] owns the connection to the successor and writes tokens
//! from a background task so that forwarding never blocks the event loop.
//! Neither side retries a token: recovering lost tokens is the protocol's job.

use crate::{
    config::ConnectPolicy,
    error::TransportError,
    log,
    message::{NodeEvent, Token},
    MAX_LINE_LENGTH,
};
use color_print::cformat;
use futures::{SinkExt, StreamExt};
use std::{io, net::SocketAddr, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{self, Sender, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::sleep,
};
use tokio_util::{
    bytes::BytesMut,
    codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError},
};

/// Listening side of the link from the predecessor.
pub struct InboundListener {
    listener: TcpListener,
}

/// `LinesCodec` that hands overlong and non-UTF-8 lines to the caller as
/// items, so a bad line does not end the stream.
struct TokenLines {
    lines: LinesCodec,
}

/// Sending side of the link to the successor.
pub struct SuccessorLink {
    address: String,
    outbound: UnboundedSender<Token>,
}

impl InboundListener {
    pub async fn bind(address: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts predecessor connections forever, delivering tokens into `events`.
    pub fn spawn(self, events: Sender<NodeEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let (stream, address) = match self.listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log::error(&format!("Failed to accept a connection: {e}"));
                        continue;
                    }
                };

                log::debug(&cformat!(
                    "Accepted a <bold>connection</bold> from <bold>{}</bold>",
                    address
                ));

                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(e) = receive_tokens(stream, events).await {
                        log::error(&format!("Connection from {address} failed: {e}"));
                    }
                });
            }
        })
    }
}

impl TokenLines {
    fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }
}

impl Decoder for TokenLines {
    type Item = Result<String, LinesCodecError>;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        keep_bad_lines(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        keep_bad_lines(self.lines.decode_eof(buf))
    }
}

/// `LinesCodec` has already consumed (or started discarding) the offending
/// line when it reports these, so decoding can resume on the same buffer.
fn keep_bad_lines(
    decoded: Result<Option<String>, LinesCodecError>,
) -> Result<Option<Result<String, LinesCodecError>>, LinesCodecError> {
    match decoded {
        Ok(line) => Ok(line.map(Ok)),
        Err(LinesCodecError::MaxLineLengthExceeded) => {
            Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded)))
        }
        Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
            Ok(Some(Err(LinesCodecError::Io(e))))
        }
        Err(e) => Err(e),
    }
}

/// Reads tokens until the connection closes. Malformed lines are logged and skipped.
async fn receive_tokens(
    stream: TcpStream,
    events: Sender<NodeEvent>,
) -> Result<(), TransportError> {
    let mut lines = FramedRead::new(stream, TokenLines::new());

    while let Some(line) = lines.next().await {
        let line = match line? {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                log::error("Failed to decode message: line too long");
                continue;
            }
            Err(e) => {
                log::error(&format!("Failed to decode message: {e}"));
                continue;
            }
        };

        match Token::from_json_string(&line) {
            Ok(token) => {
                if events.send(NodeEvent::TokenArrived(token)).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => log::error(&format!("Failed to decode message: {e}")),
        }
    }

    Ok(())
}

impl SuccessorLink {
    /// Dials the successor, retrying per `policy`. Exhausting the attempts is fatal.
    pub async fn connect(
        address: &str,
        policy: ConnectPolicy,
        forward_delay: Duration,
    ) -> Result<Self, TransportError> {
        let stream = dial(address, policy).await?;
        log::info(&cformat!("Connected to successor <bold>{}</bold>", address));

        let (outbound, queue) = mpsc::unbounded_channel();
        tokio::spawn(write_tokens(address.to_string(), stream, queue, forward_delay));

        Ok(Self {
            address: address.to_string(),
            outbound,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Queues `token` for the successor without waiting for the write.
    pub fn send(&self, token: Token) -> Result<(), TransportError> {
        self.outbound.send(token).map_err(|_| TransportError::Closed)
    }
}

async fn dial(address: &str, policy: ConnectPolicy) -> Result<TcpStream, TransportError> {
    let mut attempt = 1;

    loop {
        match TcpStream::connect(address).await {
            Ok(stream) => return Ok(stream),
            Err(source) if attempt >= policy.attempts => {
                return Err(TransportError::Connect {
                    address: address.to_string(),
                    attempts: attempt,
                    source,
                })
            }
            Err(e) => {
                log::warn(&cformat!(
                    "Successor <bold>{}</bold> not reachable yet (attempt {}/{}): {}",
                    address,
                    attempt,
                    policy.attempts,
                    e
                ));
                attempt += 1;
                sleep(policy.backoff).await;
            }
        }
    }
}

/// Writes queued tokens in order. A failed write drops the token and the
/// connection; the next token dials again once.
async fn write_tokens(
    address: String,
    stream: TcpStream,
    mut queue: UnboundedReceiver<Token>,
    forward_delay: Duration,
) {
    let mut writer = Some(FramedWrite::new(stream, LinesCodec::new()));

    while let Some(token) = queue.recv().await {
        sleep(forward_delay).await;

        let line = match token.to_json_string() {
            Ok(line) => line,
            Err(e) => {
                log::error(&format!("Failed to send {token}: {e}"));
                continue;
            }
        };

        if writer.is_none() {
            match TcpStream::connect(&address).await {
                Ok(stream) => writer = Some(FramedWrite::new(stream, LinesCodec::new())),
                Err(e) => {
                    log::error(&cformat!("Failed to send {}: {}", token.describe(), e));
                    continue;
                }
            }
        }

        if let Some(sink) = writer.as_mut() {
            if let Err(e) = sink.send(line).await {
                log::error(&cformat!("Failed to send {}: {}", token.describe(), e));
                writer = None;
            }
        }
    }
}
