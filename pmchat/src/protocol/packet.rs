//! Engine.IO v4 / Socket.IO v5 text frame codec.
//!
//! Every WebSocket text frame carries one Engine.IO packet. Socket.IO
//! packets ride inside Engine.IO `message` packets:
//!
//! ```text
//! 0{"sid":"..","pingInterval":25000,"pingTimeout":20000}   open
//! 2 / 3                                                     ping / pong
//! 40                                                        socket connect
//! 42["receivedMessage",{...}]                               socket event
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Engine.IO open handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    /// Engine.IO session id.
    pub sid: String,
    /// Transports the server would upgrade to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Server ping interval in milliseconds.
    #[serde(rename = "pingInterval")]
    pub ping_interval: u64,
    /// Time the server waits for a pong, in milliseconds.
    #[serde(rename = "pingTimeout")]
    pub ping_timeout: u64,
    /// Largest payload the server accepts.
    #[serde(rename = "maxPayload", default)]
    pub max_payload: Option<u64>,
}

/// An Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// A Socket.IO packet on the default namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Connect request (client) or confirmation (server).
    Connect(Option<Value>),
    Disconnect,
    /// Named event with its first argument.
    Event { name: String, payload: Value },
    Ack { id: u64, data: Value },
    ConnectError(Value),
}

impl Packet {
    /// Decode one text frame.
    pub fn decode(frame: &str) -> Result<Packet> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::protocol("empty frame"))?;
        let body = chars.as_str();

        match kind {
            '0' => Ok(Packet::Open(serde_json::from_str(body)?)),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping(body.to_owned())),
            '3' => Ok(Packet::Pong(body.to_owned())),
            '4' => Ok(Packet::Message(SocketPacket::decode(body)?)),
            '5' => Ok(Packet::Upgrade),
            '6' => Ok(Packet::Noop),
            other => Err(Error::protocol(format!("unknown packet type '{other}'"))),
        }
    }

    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            Packet::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            Packet::Close => "1".to_owned(),
            Packet::Ping(data) => format!("2{data}"),
            Packet::Pong(data) => format!("3{data}"),
            Packet::Message(packet) => format!("4{}", packet.encode()?),
            Packet::Upgrade => "5".to_owned(),
            Packet::Noop => "6".to_owned(),
        })
    }
}

impl SocketPacket {
    /// Build an event packet.
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        SocketPacket::Event {
            name: name.into(),
            payload,
        }
    }

    fn decode(body: &str) -> Result<SocketPacket> {
        let mut chars = body.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::protocol("empty socket packet"))?;
        let mut rest = chars.as_str();

        if rest.starts_with('/') {
            rest = match rest.find(',') {
                Some(comma) => &rest[comma + 1..],
                None => "",
            };
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack_id = if digits > 0 {
            rest[..digits].parse::<u64>().ok()
        } else {
            None
        };
        let rest = &rest[digits..];

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest)?)
        };

        match kind {
            '0' => Ok(SocketPacket::Connect(data)),
            '1' => Ok(SocketPacket::Disconnect),
            '2' => {
                let mut args = match data {
                    Some(Value::Array(args)) => args.into_iter(),
                    _ => return Err(Error::protocol("event without argument array")),
                };
                let name = match args.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err(Error::protocol("event without name")),
                };
                Ok(SocketPacket::Event {
                    name,
                    payload: args.next().unwrap_or(Value::Null),
                })
            }
            '3' => Ok(SocketPacket::Ack {
                id: ack_id.ok_or_else(|| Error::protocol("ack without id"))?,
                data: data.unwrap_or(Value::Null),
            }),
            '4' => Ok(SocketPacket::ConnectError(data.unwrap_or(Value::Null))),
            '5' | '6' => Err(Error::protocol("binary packets are not supported")),
            other => Err(Error::protocol(format!("unknown socket packet type '{other}'"))),
        }
    }

    fn encode(&self) -> Result<String> {
        Ok(match self {
            SocketPacket::Connect(None) => "0".to_owned(),
            SocketPacket::Connect(Some(auth)) => format!("0{}", serde_json::to_string(auth)?),
            SocketPacket::Disconnect => "1".to_owned(),
            SocketPacket::Event { name, payload } => {
                format!("2{}", serde_json::to_string(&(name, payload))?)
            }
            SocketPacket::Ack { id, data } => format!("3{id}{}", serde_json::to_string(data)?),
            SocketPacket::ConnectError(data) => format!("4{}", serde_json::to_string(data)?),
        })
    }
}
