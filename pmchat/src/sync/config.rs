//! Engine timing and paging configuration.

use std::time::Duration;

/// Timings and list parameters for [`ChatEngine`](super::ChatEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Wait after a connection comes up before requesting history.
    pub history_settle_delay: Duration,
    /// Wait after a successful send before re-requesting history.
    pub resync_delay: Duration,
    /// How long a counterpart typing notice stays visible.
    pub typing_timeout: Duration,
    /// Quiet period after the last keystroke before `userStoppedTyping` is sent.
    pub stop_typing_delay: Duration,
    /// Messages younger than this display as "Now".
    pub now_threshold: Duration,
    /// Conversations fetched per list refresh.
    pub page_size: u32,
    /// Sort field of the conversation list.
    pub sort_key: String,
    /// Sort direction of the conversation list.
    pub sort_value: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_settle_delay: Duration::from_millis(500),
            resync_delay: Duration::from_millis(500),
            typing_timeout: Duration::from_millis(3000),
            stop_typing_delay: Duration::from_millis(2000),
            now_threshold: Duration::from_secs(120),
            page_size: 100,
            sort_key: "updatedAt".to_owned(),
            sort_value: "desc".to_owned(),
        }
    }
}
