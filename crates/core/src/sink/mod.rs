//! Network boundary of the engine.
//!
//! Everything the scheduler sends goes through [`MessageSink`]: one address and
//! one value per call. The production implementation encodes an OSC message and
//! pushes it over UDP; the engine never looks at the wire bytes itself.

use std::{
    fmt,
    net::UdpSocket,
    sync::{Mutex, MutexGuard},
};

use rosc::{encoder, OscMessage, OscPacket, OscType};

use crate::{Result, Scalar, ShowlineError};

/// Destination for `(address, value)` messages.
pub trait MessageSink: Send + Sync + fmt::Debug {
    fn send(&self, address: &str, value: &Scalar) -> Result<()>;
}

/// Sends every message as a single OSC packet over UDP.
///
/// The local socket is bound on first use so that building a sink for an
/// unreachable or malformed target never fails; such problems surface as
/// [`ShowlineError::Transport`] when a message is actually sent.
#[derive(Debug)]
pub struct OscUdpSink {
    ip: String,
    port: u16,
    socket: Mutex<Option<UdpSocket>>,
}

impl OscUdpSink {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            socket: Mutex::new(None),
        }
    }

    fn lock_socket(&self) -> Result<MutexGuard<'_, Option<UdpSocket>>> {
        self.socket
            .lock()
            .map_err(|_| ShowlineError::msg("udp socket has been poisoned"))
    }
}

impl MessageSink for OscUdpSink {
    fn send(&self, address: &str, value: &Scalar) -> Result<()> {
        let packet = encode(address, value)?;

        let mut slot = self.lock_socket()?;
        if slot.is_none() {
            let socket = UdpSocket::bind("0.0.0.0:0").map_err(transport)?;
            *slot = Some(socket);
        }
        let Some(socket) = slot.as_ref() else {
            return Err(ShowlineError::Transport("udp socket unavailable".into()));
        };

        socket
            .send_to(&packet, (self.ip.as_str(), self.port))
            .map_err(transport)?;
        tracing::debug!(address, %value, ip = %self.ip, port = self.port, "osc message sent");
        Ok(())
    }
}

/// Writes messages to the log instead of the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MessageSink for LogSink {
    fn send(&self, address: &str, value: &Scalar) -> Result<()> {
        tracing::info!(address, %value, "osc message (dry run)");
        Ok(())
    }
}

/// Encodes one OSC message carrying a single argument.
pub fn encode(address: &str, value: &Scalar) -> Result<Vec<u8>> {
    let message = OscMessage {
        addr: address.to_string(),
        args: vec![osc_argument(value)],
    };
    encoder::encode(&OscPacket::Message(message))
        .map_err(|err| ShowlineError::Transport(format!("cannot encode `{address}`: {err:?}")))
}

fn osc_argument(value: &Scalar) -> OscType {
    match value {
        Scalar::Int(int) => match i32::try_from(*int) {
            Ok(int) => OscType::Int(int),
            Err(_) => OscType::Long(*int),
        },
        Scalar::Float(float) => OscType::Float(*float as f32),
        Scalar::Text(text) => OscType::String(text.clone()),
    }
}

fn transport(err: std::io::Error) -> ShowlineError {
    ShowlineError::Transport(err.to_string())
}
