//! Realtime transports.

mod memory;
mod socketio;
mod traits;

pub use memory::MemoryTransport;
pub use socketio::{SocketIoTransport, TransportConfig};
pub use traits::{ConnectionEvent, EventSink, Link, RoutedEvent, Transport};
