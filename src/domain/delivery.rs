use crate::domain::message::Message;

/// Progress of a single send attempt.
///
/// `Created` means the row is durable. The notify step can only move the
/// attempt forward; nothing here reverts the stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Created,
    NotifyAttempted,
    Notified,
    NotifySkipped,
}

impl DeliveryState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Notified | Self::NotifySkipped)
    }

    /// `Created -> NotifyAttempted`. Any other state is returned unchanged.
    #[must_use]
    pub const fn begin_notify(self) -> Self {
        match self {
            Self::Created => Self::NotifyAttempted,
            other => other,
        }
    }

    /// `NotifyAttempted -> Notified | NotifySkipped`.
    ///
    /// `receivers` is the subscriber count reported by the channel, or `None`
    /// when the channel failed.
    #[must_use]
    pub const fn finish_notify(self, receivers: Option<usize>) -> Self {
        match (self, receivers) {
            (Self::NotifyAttempted, Some(n)) if n > 0 => Self::Notified,
            (Self::NotifyAttempted, _) => Self::NotifySkipped,
            (other, _) => other,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::NotifyAttempted => "notify_attempted",
            Self::Notified => "notified",
            Self::NotifySkipped => "notify_skipped",
        }
    }
}

/// What the sender gets back once the message is durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub message: Message,
    pub state: DeliveryState,
    /// True when an earlier send with the same client message id already stored the row.
    pub replayed: bool,
}
