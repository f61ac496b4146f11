//! Session events for the application layer
//!
//! The client publishes on an `EventBus` it was handed at construction; the
//! app subscribes and reacts (show sign-in, prompt to reconnect a calendar).
//! Backed by a tokio broadcast channel, so every subscriber sees every event
//! published after it subscribed.

use tokio::sync::broadcast;
use tracing::debug;

use crate::outcome::CalendarProvider;

/// Default channel capacity. Slow subscribers lag rather than block.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Why the session was ended by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// A refresh was needed but no refresh token is stored.
    NoRefreshToken,
    /// The refresh endpoint rejected the refresh token.
    RefreshRejected,
    /// The refresh call failed for a non-transport reason.
    RefreshFailed,
    /// The request was rejected again right after a successful refresh.
    RejectedAfterRefresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ForceSignOut { reason: SignOutReason },
    SessionRefreshed,
    ConnectionExpired { provider: CalendarProvider },
}

impl SessionEvent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ForceSignOut { .. } => "force_sign_out",
            Self::SessionRefreshed => "session_refreshed",
            Self::ConnectionExpired { .. } => "connection_expired",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to current subscribers. Returns how many received it;
    /// having none is not an error.
    pub fn publish(&self, event: SessionEvent) -> usize {
        let label = event.label();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(event = label, receivers, "published session event");
                receivers
            }
            Err(_) => {
                debug!(event = label, "no subscribers for session event");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(SessionEvent::SessionRefreshed), 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives_event() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let event = SessionEvent::ConnectionExpired {
            provider: CalendarProvider::Google,
        };
        assert_eq!(bus.publish(event.clone()), 2);
        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn clones_share_the_channel() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.clone().publish(SessionEvent::ForceSignOut {
            reason: SignOutReason::RefreshRejected,
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::ForceSignOut {
                reason: SignOutReason::RefreshRejected
            }
        );
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let bus = EventBus::new(0);
        let mut rx = bus.subscribe();
        bus.publish(SessionEvent::SessionRefreshed);
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::SessionRefreshed);
    }
}
