//! Task hosting one event-sourced aggregate.
//!
//! The actor owns the aggregate's state and is the only writer of its log.
//! It rebuilds state from the log before taking any command, then handles
//! commands one at a time: decide, append, apply, publish, acknowledge.
//!
//! Public API: [`AggregateRef`] (cloneable handle) and
//! [`AggregateRef::spawn`] (replays the log and starts the task).

use common::AggregateId;
use domain::{Aggregate, Command, Event};
use event_bus::EventBus;
use event_store::{AppendOptions, EventEnvelope, EventId, EventStore};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::config::SagaConfig;
use crate::directory::{CommandReply, CommandSink};
use crate::error::{Result, SagaError};

/// Messages sent from [`AggregateRef`] to the actor loop.
enum AggregateMessage<A> {
    /// Handle a command; the outcome goes back on `reply`.
    Execute {
        command: Command,
        reply: Option<oneshot::Sender<Result<Event>>>,
    },

    /// Return a copy of the current state.
    Inspect { reply: oneshot::Sender<Result<A>> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Recovering,
    Ready,
    Poisoned { reason: String },
}

struct AggregateActor<A, S> {
    aggregate_id: AggregateId,
    /// Empty state every replay starts from.
    initial: A,
    state: A,
    mode: Mode,
    /// Set when an append failed without saying whether it committed.
    stale: bool,
    store: S,
    bus: EventBus,
}

impl<A, S> AggregateActor<A, S>
where
    A: Aggregate,
    S: EventStore,
{
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<AggregateMessage<A>>, config: SagaConfig) {
        self.recover().await;
        if self.mode == Mode::Ready {
            self.flush_outbox().await;
        }

        let mut sweep = tokio::time::interval(config.outbox_sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        sweep.tick().await;

        loop {
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
                _ = sweep.tick() => {
                    if self.mode == Mode::Ready {
                        self.flush_outbox().await;
                    }
                }
            }
        }

        tracing::debug!(aggregate_id = %self.aggregate_id, "aggregate actor stopped");
    }

    /// Rebuilds state from the log. No command is decided and nothing is
    /// published until this returns.
    #[tracing::instrument(skip(self), fields(aggregate_id = %self.aggregate_id, aggregate_type = A::aggregate_type()))]
    async fn recover(&mut self) {
        let result = match self.store.load(&self.aggregate_id).await {
            Ok(envelopes) => self.rebuild(&envelopes),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(state) => {
                self.state = state;
                self.mode = Mode::Ready;
                tracing::info!(version = %self.state.version(), "aggregate recovered");
            }
            Err(reason) => self.poison(reason),
        }
    }

    /// Reloads the log after an append with an unknown outcome. If that
    /// append did commit, its event is still in the outbox and is published
    /// here.
    async fn resync(&mut self) -> Result<()> {
        let envelopes = self
            .store
            .load(&self.aggregate_id)
            .await
            .map_err(SagaError::PersistenceFailure)?;
        let state = match self.rebuild(&envelopes) {
            Ok(state) => state,
            Err(reason) => {
                self.poison(reason);
                return Err(self.unavailable());
            }
        };

        tracing::info!(
            aggregate_id = %self.aggregate_id,
            from = %self.state.version(),
            to = %state.version(),
            "aggregate resynchronized with its log"
        );
        self.state = state;
        self.stale = false;
        self.flush_outbox().await;
        Ok(())
    }

    fn rebuild(&self, envelopes: &[EventEnvelope]) -> std::result::Result<A, String> {
        let mut state = self.initial.clone();
        state.replay(envelopes).map_err(|e| e.to_string())?;
        Ok(state)
    }

    fn poison(&mut self, reason: String) {
        tracing::error!(aggregate_id = %self.aggregate_id, %reason, "aggregate replay failed, refusing commands");
        metrics::counter!("aggregate_replay_failures_total", "aggregate" => A::aggregate_type())
            .increment(1);
        self.mode = Mode::Poisoned { reason };
    }

    /// Succeeds once state matches the log.
    async fn ready(&mut self) -> Result<()> {
        match self.mode {
            Mode::Ready if self.stale => self.resync().await,
            Mode::Ready => Ok(()),
            Mode::Recovering | Mode::Poisoned { .. } => Err(self.unavailable()),
        }
    }

    async fn handle(&mut self, message: AggregateMessage<A>) {
        match message {
            AggregateMessage::Execute { command, reply } => {
                let result = match self.ready().await {
                    Ok(()) => self.execute(&command).await,
                    Err(e) => Err(e),
                };
                if let Err(error) = &result {
                    tracing::warn!(
                        aggregate_id = %self.aggregate_id,
                        command = command.command_type(),
                        %error,
                        "command failed"
                    );
                }
                if let Some(reply) = reply {
                    // The issuer may have stopped waiting
                    let _ = reply.send(result);
                }
            }
            AggregateMessage::Inspect { reply } => {
                let result = self.ready().await.map(|()| self.state.clone());
                let _ = reply.send(result);
            }
        }
    }

    #[tracing::instrument(
        skip(self, command),
        fields(
            aggregate_id = %self.aggregate_id,
            command = command.command_type(),
            correlation_id = ?command.correlation_id(),
        )
    )]
    async fn execute(&mut self, command: &Command) -> Result<Event> {
        metrics::counter!("aggregate_commands_total", "aggregate" => A::aggregate_type())
            .increment(1);

        let event = self.state.decide(command)?;
        let current = self.state.version();
        let next = current.next();
        let envelope = A::envelope_for(&self.aggregate_id, next, &event)?;
        let event_id = envelope.event_id;

        if let Err(e) = self
            .store
            .append(vec![envelope], AppendOptions::expect_version(current))
            .await
        {
            metrics::counter!("aggregate_persistence_failures_total", "aggregate" => A::aggregate_type())
                .increment(1);
            // The append may still have committed
            self.stale = true;
            return Err(SagaError::PersistenceFailure(e));
        }

        self.state.apply(&event);
        self.state.set_version(next);

        self.bus.publish(&event);
        self.acknowledge(&[event_id]).await;

        tracing::debug!(event_type = event.kind().as_str(), version = %next, "event persisted");
        Ok(event)
    }

    /// Publishes every appended event not yet acknowledged, oldest first.
    async fn flush_outbox(&mut self) {
        let pending = match self.store.pending_outbox(&self.aggregate_id).await {
            Ok(pending) => pending,
            Err(error) => {
                tracing::warn!(aggregate_id = %self.aggregate_id, %error, "outbox read failed");
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        let mut published: u64 = 0;
        for envelope in &pending {
            match envelope.decode::<Event>() {
                Ok(event) => {
                    self.bus.publish(&event);
                    published += 1;
                }
                // Acknowledged below so the sweep does not retry it forever
                Err(error) => {
                    tracing::error!(
                        aggregate_id = %self.aggregate_id,
                        event_id = %envelope.event_id,
                        %error,
                        "outbox entry undecodable, dropping"
                    );
                    metrics::counter!("outbox_undecodable_total", "aggregate" => A::aggregate_type())
                        .increment(1);
                }
            }
        }

        metrics::counter!("outbox_republished_total", "aggregate" => A::aggregate_type())
            .increment(published);
        tracing::info!(
            aggregate_id = %self.aggregate_id,
            count = published,
            "re-published pending outbox entries"
        );

        let handled: Vec<EventId> = pending.iter().map(|e| e.event_id).collect();
        self.acknowledge(&handled).await;
    }

    async fn acknowledge(&self, event_ids: &[EventId]) {
        // Unacknowledged entries are picked up by the next sweep
        if let Err(error) = self.store.acknowledge(event_ids).await {
            tracing::warn!(aggregate_id = %self.aggregate_id, %error, "outbox acknowledgement failed");
        }
    }

    fn unavailable(&self) -> SagaError {
        match &self.mode {
            Mode::Poisoned { reason } => SagaError::ReplayFailure {
                aggregate_id: self.aggregate_id.clone(),
                reason: reason.clone(),
            },
            Mode::Recovering | Mode::Ready => {
                SagaError::ComponentStopped(self.aggregate_id.to_string())
            }
        }
    }
}

/// Cloneable handle to a running aggregate actor.
pub struct AggregateRef<A> {
    aggregate_id: AggregateId,
    sender: mpsc::UnboundedSender<AggregateMessage<A>>,
}

impl<A> Clone for AggregateRef<A> {
    fn clone(&self) -> Self {
        Self {
            aggregate_id: self.aggregate_id.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<A: Aggregate> AggregateRef<A> {
    /// Starts an actor for the log `aggregate_id`.
    ///
    /// `initial` supplies the empty state and its configuration; the log is
    /// replayed on top of it before the first command is handled. Commands
    /// sent in the meantime wait in the mailbox.
    pub fn spawn<S>(
        aggregate_id: AggregateId,
        initial: A,
        store: S,
        bus: EventBus,
        config: &SagaConfig,
    ) -> Self
    where
        S: EventStore + 'static,
    {
        let (sender, inbox) = mpsc::unbounded_channel();
        let actor = AggregateActor {
            aggregate_id: aggregate_id.clone(),
            state: initial.clone(),
            initial,
            mode: Mode::Recovering,
            stale: false,
            store,
            bus,
        };
        tokio::spawn(actor.run(inbox, config.clone()));

        Self {
            aggregate_id,
            sender,
        }
    }

    /// Returns the log this actor owns.
    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    /// Handles a command and waits for the persisted event.
    pub async fn execute(&self, command: Command) -> Result<Event> {
        let reply = self.submit(command)?;
        reply.await.map_err(|_| self.stopped())?
    }

    /// Enqueues a command without waiting for its outcome.
    pub fn tell(&self, command: Command) -> Result<()> {
        self.sender
            .send(AggregateMessage::Execute {
                command,
                reply: None,
            })
            .map_err(|_| self.stopped())
    }

    /// Returns a copy of the current state once recovery has finished.
    pub async fn inspect(&self) -> Result<A> {
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(AggregateMessage::Inspect { reply })
            .map_err(|_| self.stopped())?;
        receiver.await.map_err(|_| self.stopped())?
    }

    fn stopped(&self) -> SagaError {
        SagaError::ComponentStopped(self.aggregate_id.to_string())
    }
}

impl<A: Aggregate> CommandSink for AggregateRef<A> {
    fn submit(&self, command: Command) -> Result<CommandReply> {
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(AggregateMessage::Execute {
                command,
                reply: Some(reply),
            })
            .map_err(|_| self.stopped())?;
        Ok(receiver)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use common::{CorrelationId, ProductId, TxId, UserId};
    use domain::{
        EventKind, Inventory, Payment, ProductShipped, ReserveProduct, ShipProduct,
        SubmitPayment,
    };
    use event_store::{InMemoryEventStore, Version};

    use super::*;

    /// Log replays fine but every outbox entry has lost its payload.
    struct GarbledOutbox(InMemoryEventStore);

    #[async_trait]
    impl EventStore for GarbledOutbox {
        async fn append(
            &self,
            events: Vec<EventEnvelope>,
            options: AppendOptions,
        ) -> event_store::Result<Version> {
            self.0.append(events, options).await
        }

        async fn load(&self, aggregate_id: &AggregateId) -> event_store::Result<Vec<EventEnvelope>> {
            self.0.load(aggregate_id).await
        }

        async fn aggregate_version(
            &self,
            aggregate_id: &AggregateId,
        ) -> event_store::Result<Option<Version>> {
            self.0.aggregate_version(aggregate_id).await
        }

        async fn pending_outbox(
            &self,
            aggregate_id: &AggregateId,
        ) -> event_store::Result<Vec<EventEnvelope>> {
            let mut pending = self.0.pending_outbox(aggregate_id).await?;
            for envelope in &mut pending {
                envelope.payload = serde_json::json!({"type": "Unknown"});
            }
            Ok(pending)
        }

        async fn acknowledge(&self, event_ids: &[EventId]) -> event_store::Result<()> {
            self.0.acknowledge(event_ids).await
        }
    }

    fn submit_payment() -> Command {
        SubmitPayment {
            correlation_id: CorrelationId::new(),
            user_id: UserId::new(9),
            product_id: ProductId::new(1337),
        }
        .into()
    }

    fn spawn_payment(store: &InMemoryEventStore, bus: &EventBus) -> AggregateRef<Payment> {
        AggregateRef::spawn(
            AggregateId::new("payment"),
            Payment::default(),
            store.clone(),
            bus.clone(),
            &SagaConfig::default(),
        )
    }

    #[tokio::test]
    async fn execute_persists_applies_and_publishes() {
        let store = InMemoryEventStore::new();
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(&tx, EventKind::PaymentAuthorized);

        let payment = spawn_payment(&store, &bus);
        let event = payment.execute(submit_payment()).await.unwrap();

        assert_eq!(event.kind(), EventKind::PaymentAuthorized);
        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(store.event_count().await, 1);
        assert_eq!(store.outbox_len().await, 0);

        let state = payment.inspect().await.unwrap();
        assert_eq!(state.tx_seq(), 1);
        assert_eq!(state.version(), Version::first());
    }

    #[tokio::test]
    async fn rejected_command_changes_nothing() {
        let store = InMemoryEventStore::new();
        let payment = spawn_payment(&store, &EventBus::new());

        let command = Command::from(ReserveProduct {
            correlation_id: CorrelationId::new(),
            user_id: UserId::new(9),
            product_id: ProductId::new(1337),
        });
        assert!(matches!(
            payment.execute(command).await,
            Err(SagaError::Domain(_))
        ));
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn invalid_command_is_a_validation_error() {
        let inventory = AggregateRef::spawn(
            AggregateId::new("inventory"),
            Inventory::default(),
            InMemoryEventStore::new(),
            EventBus::new(),
            &SagaConfig::default(),
        );

        let command = Command::from(ShipProduct {
            correlation_id: CorrelationId::new(),
            user_id: UserId::new(9),
            tx_id: TxId::default(),
        });
        assert!(matches!(
            inventory.execute(command).await,
            Err(SagaError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn tell_does_not_wait() {
        let store = InMemoryEventStore::new();
        let payment = spawn_payment(&store, &EventBus::new());

        payment.tell(submit_payment()).unwrap();
        // Inspect is queued behind the command
        assert_eq!(payment.inspect().await.unwrap().tx_seq(), 1);
    }

    #[tokio::test]
    async fn recovers_state_before_handling_commands() {
        let store = InMemoryEventStore::new();
        let bus = EventBus::new();
        {
            let payment = spawn_payment(&store, &bus);
            payment.execute(submit_payment()).await.unwrap();
            payment.execute(submit_payment()).await.unwrap();
        }

        let restarted = spawn_payment(&store, &bus);
        let event = restarted.execute(submit_payment()).await.unwrap();
        let Event::PaymentAuthorized(data) = event else {
            panic!("expected PaymentAuthorized");
        };
        assert_eq!(data.tx_id, TxId::new(3));
    }

    #[tokio::test]
    async fn foreign_log_poisons_the_aggregate() {
        let store = InMemoryEventStore::new();
        let bus = EventBus::new();

        // Inventory events in the payment log
        let event = Event::from(ProductShipped {
            correlation_id: CorrelationId::new(),
            user_id: UserId::new(9),
            tx_id: TxId::new(1),
        });
        let envelope =
            Inventory::envelope_for(&AggregateId::new("payment"), Version::first(), &event)
                .unwrap();
        store
            .append(vec![envelope], AppendOptions::expect_new())
            .await
            .unwrap();

        let payment = spawn_payment(&store, &bus);
        assert!(matches!(
            payment.execute(submit_payment()).await,
            Err(SagaError::ReplayFailure { .. })
        ));
        assert!(matches!(
            payment.inspect().await,
            Err(SagaError::ReplayFailure { .. })
        ));
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn append_with_unknown_outcome_resyncs_from_log() {
        let store = InMemoryEventStore::new();
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(&tx, EventKind::PaymentAuthorized);

        let payment = spawn_payment(&store, &bus);
        store.unreport_next_appends(1).await;
        assert!(matches!(
            payment.execute(submit_payment()).await,
            Err(SagaError::PersistenceFailure(_))
        ));

        // The first event did commit, so the next one follows it
        let Event::PaymentAuthorized(second) = payment.execute(submit_payment()).await.unwrap()
        else {
            panic!("expected PaymentAuthorized");
        };
        assert_eq!(second.tx_id, TxId::new(2));

        let Event::PaymentAuthorized(first) = rx.recv().await.unwrap() else {
            panic!("expected PaymentAuthorized");
        };
        assert_eq!(first.tx_id, TxId::new(1));
        assert_eq!(rx.recv().await.unwrap(), Event::PaymentAuthorized(second));

        assert_eq!(store.event_count().await, 2);
        assert_eq!(store.outbox_len().await, 0);
        let state = payment.inspect().await.unwrap();
        assert_eq!(state.tx_seq(), 2);
        assert_eq!(state.version(), Version::new(2));
    }

    #[tokio::test]
    async fn undecodable_outbox_entry_is_dropped() {
        let store = InMemoryEventStore::new();
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(&tx, EventKind::ProductShipped);

        let event = Event::from(ProductShipped {
            correlation_id: CorrelationId::new(),
            user_id: UserId::new(9),
            tx_id: TxId::new(1),
        });
        let envelope =
            Inventory::envelope_for(&AggregateId::new("inventory"), Version::first(), &event)
                .unwrap();
        store
            .append(vec![envelope], AppendOptions::expect_new())
            .await
            .unwrap();

        let inventory = AggregateRef::spawn(
            AggregateId::new("inventory"),
            Inventory::default(),
            GarbledOutbox(store.clone()),
            bus.clone(),
            &SagaConfig::default(),
        );

        // Recovery succeeds from the intact log
        assert_eq!(inventory.inspect().await.unwrap().shipped_count(), 1);
        assert_eq!(store.outbox_len().await, 0);
        assert!(rx.try_recv().is_err());
    }
}
