//! API modules.

mod directory;
mod session;

pub use directory::{SessionDirectory, SessionPage, SessionQuery};
pub use session::{SessionApi, SessionListBuilder};
