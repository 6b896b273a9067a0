//! Conversation synchronization.
//!
//! Pure components that each own one concern, plus the [`ChatEngine`]
//! event loop that wires them to links, timers and the session directory.

mod config;
mod connection;
mod contacts;
mod dispatch;
mod engine;
mod grouping;
mod reconciler;
mod session;
mod typing;

pub use config::EngineConfig;
pub use connection::ConnectionManager;
pub use contacts::ContactListCoordinator;
pub use dispatch::{Dispatcher, HandlerSet, Subscriber};
pub use engine::{ChatEngine, ChatHandle, DisplayGroup, DisplayMessage, Snapshot};
pub use grouping::{display_timestamp, group_by_day, DayGroup, DayLabel};
pub use reconciler::{Applied, MessageReconciler};
pub use session::{ActiveSessionController, Deferred, SessionState, Sent, Timer};
pub use typing::{StopTypingDebounce, TypingIndicator};
