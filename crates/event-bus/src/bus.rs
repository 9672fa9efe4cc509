use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use domain::{Event, EventKind};
use tokio::sync::mpsc::{UnboundedSender, WeakUnboundedSender};

type Registry = HashMap<EventKind, Vec<WeakUnboundedSender<Event>>>;

/// Process-wide publish/subscribe router keyed by [`EventKind`].
///
/// Subscriptions hold only a weak handle on the subscriber's channel: a
/// subscription stays live while the subscriber keeps at least one sender
/// to its own inbox, and is pruned on the next publish once it does not.
///
/// Each subscriber sees the events of a single publisher in publish order.
/// Delivery is at least once when publishers re-publish from their outbox,
/// so subscribers must tolerate duplicates.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subscriber` for events of `kind`.
    ///
    /// Subscribing the same channel twice to one kind is a no-op.
    pub fn subscribe(&self, subscriber: &UnboundedSender<Event>, kind: EventKind) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let entries = registry.entry(kind).or_default();

        let already = entries
            .iter()
            .filter_map(WeakUnboundedSender::upgrade)
            .any(|live| live.same_channel(subscriber));
        if !already {
            entries.push(subscriber.downgrade());
            tracing::debug!(%kind, "subscriber registered");
        }
    }

    /// Registers `subscriber` for each of `kinds`.
    pub fn subscribe_all(&self, subscriber: &UnboundedSender<Event>, kinds: &[EventKind]) {
        for kind in kinds {
            self.subscribe(subscriber, *kind);
        }
    }

    /// Removes `subscriber`'s registration for `kind`.
    ///
    /// Returns true if a registration was removed.
    pub fn unsubscribe(&self, subscriber: &UnboundedSender<Event>, kind: EventKind) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = registry.get_mut(&kind) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|weak| {
            weak.upgrade()
                .is_some_and(|live| !live.same_channel(subscriber))
        });
        let removed = entries.len() < before;
        if removed {
            tracing::debug!(%kind, "subscriber removed");
        }
        removed
    }

    /// Delivers `event` to every live subscriber of its variant.
    ///
    /// Returns the number of subscribers the event was handed to. Dead
    /// registrations are pruned.
    pub fn publish(&self, event: &Event) -> usize {
        let kind = event.kind();
        let mut delivered = 0;
        let mut saw_dead = false;

        {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            for weak in registry.get(&kind).into_iter().flatten() {
                match weak.upgrade() {
                    Some(sender) if sender.send(event.clone()).is_ok() => delivered += 1,
                    _ => saw_dead = true,
                }
            }
        }

        if saw_dead {
            self.prune(kind);
        }

        metrics::counter!("event_bus_published_total", "kind" => kind.as_str()).increment(1);
        tracing::trace!(
            %kind,
            correlation_id = %event.correlation_id(),
            delivered,
            "event published"
        );

        delivered
    }

    /// Returns the number of live subscribers for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry
            .get(&kind)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(WeakUnboundedSender::upgrade)
                    .filter(|sender| !sender.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }

    fn prune(&self, kind: EventKind) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = registry.get_mut(&kind) {
            entries.retain(|weak| weak.upgrade().is_some_and(|sender| !sender.is_closed()));
            tracing::debug!(%kind, remaining = entries.len(), "pruned dead subscribers");
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventBus")
            .field("kinds", &registry.len())
            .finish()
    }
}
