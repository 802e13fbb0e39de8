//! Transient toast notifications. Only the newest one is shown; it hides
//! itself once its time-to-live has elapsed.

use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_TOAST_TTL: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    pub message: String,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl Notification {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

#[derive(Debug)]
pub struct Notifier {
    ttl: Duration,
    next_id: u64,
    current: Option<Notification>,
}

impl Notifier {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            next_id: 1,
            current: None,
        }
    }

    /// Replaces whatever toast is showing.
    pub fn push(&mut self, message: impl Into<String>) -> Notification {
        let notification = Notification {
            id: self.next_id,
            message: message.into(),
            created_at: Instant::now(),
            ttl: self.ttl,
        };
        self.next_id += 1;
        self.current = Some(notification.clone());
        notification
    }

    pub fn visible(&mut self) -> Option<&Notification> {
        if self
            .current
            .as_ref()
            .is_some_and(|toast| toast.is_expired_at(Instant::now()))
        {
            self.current = None;
        }
        self.current.as_ref()
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        if self.current.as_ref().is_some_and(|toast| toast.id == id) {
            self.current = None;
            return true;
        }
        false
    }

    /// Number of notifications ever raised.
    pub fn raised(&self) -> u64 {
        self.next_id - 1
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_TOAST_TTL)
    }
}
