/// Lifecycle state of the live update channel.
///
/// `Idle → Connecting → Open → (Reconnecting → Connecting)*`, ending in
/// `GaveUp` when the retry ceiling is reached or `Closed` on explicit
/// disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// no connection requested yet
    #[default]
    Idle,
    /// opening the transport
    Connecting,
    /// transport established, frames are flowing
    Open,
    /// waiting for a scheduled reconnect attempt
    Reconnecting,
    /// retry ceiling reached, only a manual reconnect recovers
    GaveUp,
    /// deliberately torn down
    Closed,
}

impl Status {
    /// true while the transport is open
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Open)
    }

    /// true while an automatic reconnect is pending
    pub fn is_reconnecting(self) -> bool {
        matches!(self, Self::Reconnecting)
    }

    /// true when the channel will take no further action by itself
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::GaveUp | Self::Closed)
    }
}
