//! Realtime wire protocol.

mod events;
mod packet;

pub use events::{
    names, ClientEvent, HistoryRequest, SendMessage, ServerEvent, TypingNotice, TypingSignal,
};
pub use packet::{Handshake, Packet, SocketPacket};
