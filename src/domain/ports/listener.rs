//! Listener handles and the events delivered to them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::domain::entities::CachedImage;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a listener, used as its cancellation token.
///
/// Clones of a [`FetchListener`] share one id, so a single `cancel` call
/// covers every outstanding request made through any clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal notification for one accepted request.
///
/// Exactly one event is delivered per accepted request, or none if the
/// request is cancelled before delivery.
#[derive(Debug, Clone)]
pub enum FetchEvent {
    /// The image is ready.
    Loaded {
        /// URL the request was made for.
        identifier: String,
        /// The cached image.
        image: Arc<CachedImage>,
    },
    /// The fetch or decode failed.
    Failed {
        /// URL the request was made for.
        identifier: String,
    },
}

/// A listener: a unique id paired with the channel its events arrive on.
#[derive(Debug, Clone)]
pub struct FetchListener {
    id: ListenerId,
    events: mpsc::UnboundedSender<FetchEvent>,
}

impl FetchListener {
    /// Creates a listener and the receiving end of its event stream.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FetchEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let listener = Self {
            id: ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)),
            events,
        };
        (listener, rx)
    }

    /// This listener's cancellation token.
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// Delivers an event. A closed receiver makes this a silent no-op.
    pub(crate) fn notify(&self, event: FetchEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_id() {
        let (listener, _rx) = FetchListener::channel();
        assert_eq!(listener.id(), listener.clone().id());
    }

    #[test]
    fn test_distinct_listeners_distinct_ids() {
        let (a, _rx_a) = FetchListener::channel();
        let (b, _rx_b) = FetchListener::channel();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_notify_delivers_on_channel() {
        let (listener, mut rx) = FetchListener::channel();
        listener.notify(FetchEvent::Failed {
            identifier: "https://example.com/a.png".into(),
        });
        match rx.recv().await {
            Some(FetchEvent::Failed { identifier }) => {
                assert_eq!(identifier, "https://example.com/a.png");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_notify_after_receiver_drop_is_noop() {
        let (listener, rx) = FetchListener::channel();
        drop(rx);
        listener.notify(FetchEvent::Failed {
            identifier: "gone".into(),
        });
    }
}
