//! Process manager driving order sagas.
//!
//! The process manager never calls the aggregates' logic directly: it sends
//! commands through the [`Directory`] and advances each saga only when the
//! resulting events come back over the bus.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use common::{CorrelationId, ProductId, TxId, UserId};
use domain::{
    Command, CreateOrder, Event, FailureReason, OrderCompleted, OrderFailed, ReserveProduct,
    ShipProduct, SubmitPayment,
};
use event_bus::EventBus;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::client::OrderOutcome;
use crate::config::SagaConfig;
use crate::directory::{ComponentId, Directory};
use crate::error::{Result, SagaError};
use crate::order_fulfillment::SAGA_INPUTS;
use crate::state::SagaPhase;

/// What the process manager must do after a saga consumed an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Send a command to a component.
    Dispatch(ComponentId, Command),

    /// The order shipped.
    Complete(OrderCompleted),

    /// The order cannot be fulfilled.
    Fail(FailureReason),

    /// The event does not apply to the saga's current phase.
    Ignore,
}

/// State of one order saga, keyed by its correlation ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaInstance {
    pub correlation_id: CorrelationId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub phase: SagaPhase,

    /// Transaction number from the latest reservation or authorization.
    pub tx_id: Option<TxId>,

    /// Times the current step's command has been sent.
    pub attempts: u32,
}

impl SagaInstance {
    /// Starts a saga for `command`, returning it with its first command.
    pub fn start(correlation_id: CorrelationId, command: &CreateOrder) -> (Self, Reaction) {
        let saga = Self {
            correlation_id,
            user_id: command.user_id,
            product_id: command.product_id,
            phase: SagaPhase::AwaitingReservation,
            tx_id: None,
            attempts: 1,
        };
        let reaction = saga
            .pending_command()
            .map(|(component, command)| Reaction::Dispatch(component, command))
            .unwrap_or(Reaction::Ignore);
        (saga, reaction)
    }

    /// Advances the saga with an event.
    ///
    /// Events for other sagas, or that do not match the current phase, are
    /// ignored; this absorbs duplicates from at-least-once delivery.
    pub fn react(&mut self, event: &Event) -> Reaction {
        if event.correlation_id() != self.correlation_id {
            return Reaction::Ignore;
        }

        let reaction = match (self.phase, event) {
            (SagaPhase::AwaitingReservation, Event::ProductReserved(data)) => {
                self.tx_id = Some(data.tx_id);
                self.advance(SagaPhase::AwaitingPayment)
            }
            (SagaPhase::AwaitingReservation, Event::ProductOutOfStock(data)) => {
                Reaction::Fail(FailureReason::OutOfStock {
                    product_id: data.product_id,
                })
            }
            (SagaPhase::AwaitingPayment, Event::PaymentAuthorized(data)) => {
                self.tx_id = Some(data.tx_id);
                self.advance(SagaPhase::AwaitingShipment)
            }
            (SagaPhase::AwaitingPayment, Event::PaymentDeclined(data)) => {
                Reaction::Fail(FailureReason::PaymentDeclined { tx_id: data.tx_id })
            }
            (SagaPhase::AwaitingShipment, Event::ProductShipped(data)) => {
                self.phase = SagaPhase::Completed;
                return Reaction::Complete(OrderCompleted {
                    correlation_id: self.correlation_id,
                    user_id: self.user_id,
                    tx_id: data.tx_id,
                });
            }
            _ => return Reaction::Ignore,
        };

        if let Reaction::Fail(_) = reaction {
            self.phase = SagaPhase::Failed;
        }
        reaction
    }

    /// Returns the command the saga is waiting on, if any.
    pub fn pending_command(&self) -> Option<(ComponentId, Command)> {
        let correlation_id = self.correlation_id;
        let user_id = self.user_id;

        match self.phase {
            SagaPhase::AwaitingReservation => Some((
                ComponentId::Inventory,
                ReserveProduct {
                    correlation_id,
                    user_id,
                    product_id: self.product_id,
                }
                .into(),
            )),
            SagaPhase::AwaitingPayment => Some((
                ComponentId::Payment,
                SubmitPayment {
                    correlation_id,
                    user_id,
                    product_id: self.product_id,
                }
                .into(),
            )),
            SagaPhase::AwaitingShipment => self.tx_id.map(|tx_id| {
                (
                    ComponentId::Inventory,
                    ShipProduct {
                        correlation_id,
                        user_id,
                        tx_id,
                    }
                    .into(),
                )
            }),
            SagaPhase::Completed | SagaPhase::Failed => None,
        }
    }

    /// Marks the saga failed.
    pub fn fail(&mut self, reason: FailureReason) -> Reaction {
        self.phase = SagaPhase::Failed;
        Reaction::Fail(reason)
    }

    fn advance(&mut self, phase: SagaPhase) -> Reaction {
        self.phase = phase;
        self.attempts = 1;
        self.pending_command()
            .map(|(component, command)| Reaction::Dispatch(component, command))
            .unwrap_or(Reaction::Ignore)
    }
}

/// Where a saga stands, as seen by the process manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaStatus {
    /// The saga is in flight.
    Active(SagaInstance),

    /// The saga reached a terminal phase and is still remembered.
    Finished,

    /// No saga with this correlation ID is known.
    Unknown,
}

/// An order accepted by the process manager.
#[derive(Debug)]
pub struct PendingOrder {
    /// Correlation ID minted for the saga.
    pub correlation_id: CorrelationId,

    /// Resolves with the terminal outcome.
    pub outcome: oneshot::Receiver<OrderOutcome>,
}

enum ProcessManagerMessage {
    CreateOrder {
        correlation_id: CorrelationId,
        command: CreateOrder,
        reply: Option<oneshot::Sender<OrderOutcome>>,
    },
    CommandFailed {
        correlation_id: CorrelationId,
        component: ComponentId,
        command: Command,
        error: SagaError,
    },
    Status {
        correlation_id: CorrelationId,
        reply: oneshot::Sender<SagaStatus>,
    },
}

/// Bounded FIFO of finished correlation IDs.
struct RetiredSagas {
    order: VecDeque<CorrelationId>,
    members: HashSet<CorrelationId>,
    capacity: usize,
}

impl RetiredSagas {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn insert(&mut self, correlation_id: CorrelationId) {
        if self.capacity == 0 || !self.members.insert(correlation_id) {
            return;
        }
        self.order.push_back(correlation_id);
        if self.order.len() > self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.members.remove(&oldest);
        }
    }

    fn contains(&self, correlation_id: &CorrelationId) -> bool {
        self.members.contains(correlation_id)
    }
}

struct ActiveSaga {
    instance: SagaInstance,
    reply: Option<oneshot::Sender<OrderOutcome>>,
    started_at: Instant,
}

struct ProcessManager {
    directory: Directory,
    bus: EventBus,
    max_command_attempts: u32,
    sagas: HashMap<CorrelationId, ActiveSaga>,
    retired: RetiredSagas,
    inbox: mpsc::WeakUnboundedSender<ProcessManagerMessage>,
}

impl ProcessManager {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<ProcessManagerMessage>,
        mut events: mpsc::UnboundedReceiver<Event>,
        // Keeps the bus subscription alive for the lifetime of the task
        _subscription: mpsc::UnboundedSender<Event>,
    ) {
        loop {
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
                Some(event) = events.recv() => self.on_event(event),
            }
        }

        tracing::debug!(active = self.sagas.len(), "process manager stopped");
    }

    fn handle(&mut self, message: ProcessManagerMessage) {
        match message {
            ProcessManagerMessage::CreateOrder {
                correlation_id,
                command,
                reply,
            } => self.on_create_order(correlation_id, command, reply),
            ProcessManagerMessage::CommandFailed {
                correlation_id,
                component,
                command,
                error,
            } => self.on_command_failed(correlation_id, component, command, error),
            ProcessManagerMessage::Status {
                correlation_id,
                reply,
            } => {
                let status = match self.sagas.get(&correlation_id) {
                    Some(active) => SagaStatus::Active(active.instance.clone()),
                    None if self.retired.contains(&correlation_id) => SagaStatus::Finished,
                    None => SagaStatus::Unknown,
                };
                let _ = reply.send(status);
            }
        }
    }

    #[tracing::instrument(skip_all, fields(%correlation_id))]
    fn on_create_order(
        &mut self,
        correlation_id: CorrelationId,
        command: CreateOrder,
        reply: Option<oneshot::Sender<OrderOutcome>>,
    ) {
        metrics::counter!("saga_started_total").increment(1);
        tracing::info!(user_id = %command.user_id, product_id = %command.product_id, "order saga started");

        let (instance, reaction) = SagaInstance::start(correlation_id, &command);
        self.sagas.insert(
            correlation_id,
            ActiveSaga {
                instance,
                reply,
                started_at: Instant::now(),
            },
        );
        self.perform(correlation_id, reaction);
    }

    fn on_event(&mut self, event: Event) {
        let correlation_id = event.correlation_id();
        let reaction = match self.sagas.get_mut(&correlation_id) {
            Some(active) => active.instance.react(&event),
            None => {
                if self.retired.contains(&correlation_id) {
                    tracing::debug!(%correlation_id, kind = %event.kind(), "duplicate event for finished saga ignored");
                } else {
                    tracing::debug!(%correlation_id, kind = %event.kind(), "event for unknown saga ignored");
                }
                return;
            }
        };

        if reaction == Reaction::Ignore {
            tracing::debug!(%correlation_id, kind = %event.kind(), "event does not match saga phase");
        }
        self.perform(correlation_id, reaction);
    }

    fn on_command_failed(
        &mut self,
        correlation_id: CorrelationId,
        component: ComponentId,
        command: Command,
        error: SagaError,
    ) {
        let max_attempts = self.max_command_attempts;
        let Some(active) = self.sagas.get_mut(&correlation_id) else {
            return;
        };

        // A failure for a step the saga already moved past is stale
        if active.instance.pending_command() != Some((component, command.clone())) {
            return;
        }

        let reaction = if error.is_retryable() && active.instance.attempts < max_attempts {
            active.instance.attempts += 1;
            tracing::warn!(
                %correlation_id,
                %component,
                attempt = active.instance.attempts,
                %error,
                "resubmitting command"
            );
            Reaction::Dispatch(component, command)
        } else {
            tracing::warn!(%correlation_id, %component, %error, "saga step failed");
            active.instance.fail(FailureReason::CommandFailed {
                component: component.to_string(),
                message: error.to_string(),
            })
        };

        self.perform(correlation_id, reaction);
    }

    fn perform(&mut self, correlation_id: CorrelationId, reaction: Reaction) {
        match reaction {
            Reaction::Dispatch(component, command) => {
                self.dispatch(correlation_id, component, command)
            }
            Reaction::Complete(completed) => {
                self.finish(correlation_id, OrderOutcome::Completed(completed))
            }
            Reaction::Fail(reason) => {
                let Some(active) = self.sagas.get(&correlation_id) else {
                    return;
                };
                let failed = OrderFailed {
                    correlation_id,
                    user_id: active.instance.user_id,
                    reason,
                };
                self.finish(correlation_id, OrderOutcome::Failed(failed));
            }
            Reaction::Ignore => {}
        }
    }

    /// Enqueues `command` at the component and reports failures back to
    /// this process manager's inbox.
    fn dispatch(&self, correlation_id: CorrelationId, component: ComponentId, command: Command) {
        tracing::debug!(%correlation_id, %component, command = command.command_type(), "dispatching command");

        let inbox = self.inbox.clone();
        let report = move |command: Command, error: SagaError| {
            if let Some(inbox) = inbox.upgrade() {
                let _ = inbox.send(ProcessManagerMessage::CommandFailed {
                    correlation_id,
                    component,
                    command,
                    error,
                });
            }
        };

        let reply = match self
            .directory
            .route(component)
            .and_then(|sink| sink.submit(command.clone()))
        {
            Ok(reply) => reply,
            Err(error) => {
                report(command, error);
                return;
            }
        };

        tokio::spawn(async move {
            let error = match reply.await {
                Ok(Ok(_)) => return,
                Ok(Err(error)) => error,
                Err(_) => SagaError::ComponentStopped(component.to_string()),
            };
            report(command, error);
        });
    }

    fn finish(&mut self, correlation_id: CorrelationId, outcome: OrderOutcome) {
        let Some(active) = self.sagas.remove(&correlation_id) else {
            return;
        };
        let elapsed = active.started_at.elapsed().as_secs_f64();

        match &outcome {
            OrderOutcome::Completed(completed) => {
                metrics::counter!("saga_completed_total").increment(1);
                tracing::info!(%correlation_id, tx_id = %completed.tx_id, "order completed");
            }
            OrderOutcome::Failed(failed) => {
                metrics::counter!("saga_failed_total").increment(1);
                tracing::warn!(%correlation_id, reason = %failed.reason, "order failed");
            }
        }
        metrics::histogram!("saga_duration_seconds").record(elapsed);

        self.bus.publish(&outcome.clone().into_event());
        if let Some(reply) = active.reply {
            // The client may have timed out already
            let _ = reply.send(outcome);
        }
        self.retired.insert(correlation_id);
    }
}

/// Cloneable handle to the running process manager.
#[derive(Clone)]
pub struct ProcessManagerRef {
    sender: mpsc::UnboundedSender<ProcessManagerMessage>,
}

impl ProcessManagerRef {
    /// Starts the process manager and subscribes it to the saga's events.
    pub fn spawn(directory: Directory, bus: EventBus, config: &SagaConfig) -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        bus.subscribe_all(&events_tx, &SAGA_INPUTS);

        let manager = ProcessManager {
            directory,
            bus,
            max_command_attempts: config.max_command_attempts,
            sagas: HashMap::new(),
            retired: RetiredSagas::new(config.terminal_retention),
            inbox: sender.downgrade(),
        };
        tokio::spawn(manager.run(inbox, events, events_tx));

        Self { sender }
    }

    /// Starts an order saga and returns its correlation ID with a receiver
    /// for the outcome.
    pub fn create_order(&self, command: CreateOrder) -> Result<PendingOrder> {
        let (reply, outcome) = oneshot::channel();
        let correlation_id = self.start(command, Some(reply))?;
        Ok(PendingOrder {
            correlation_id,
            outcome,
        })
    }

    /// Starts an order saga without waiting for its outcome. The outcome
    /// is still published on the bus.
    pub fn submit(&self, command: CreateOrder) -> Result<CorrelationId> {
        self.start(command, None)
    }

    /// Returns where the saga with `correlation_id` stands.
    pub async fn status(&self, correlation_id: CorrelationId) -> Result<SagaStatus> {
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(ProcessManagerMessage::Status {
                correlation_id,
                reply,
            })
            .map_err(|_| Self::stopped())?;
        receiver.await.map_err(|_| Self::stopped())
    }

    fn start(
        &self,
        command: CreateOrder,
        reply: Option<oneshot::Sender<OrderOutcome>>,
    ) -> Result<CorrelationId> {
        Command::CreateOrder(command).validate()?;

        let correlation_id = CorrelationId::new();
        self.sender
            .send(ProcessManagerMessage::CreateOrder {
                correlation_id,
                command,
                reply,
            })
            .map_err(|_| Self::stopped())?;
        Ok(correlation_id)
    }

    fn stopped() -> SagaError {
        SagaError::ComponentStopped("process manager".to_string())
    }
}

#[cfg(test)]
mod tests {
    use domain::{
        PaymentAuthorized, PaymentDeclined, ProductOutOfStock, ProductReserved, ProductShipped,
    };

    use super::*;

    fn started() -> SagaInstance {
        SagaInstance::start(CorrelationId::new(), &CreateOrder::new(9, 1337)).0
    }

    fn reserved(saga: &SagaInstance) -> Event {
        ProductReserved {
            correlation_id: saga.correlation_id,
            user_id: saga.user_id,
            tx_id: TxId::new(1337),
        }
        .into()
    }

    fn authorized(saga: &SagaInstance, tx_id: u64) -> Event {
        PaymentAuthorized {
            correlation_id: saga.correlation_id,
            user_id: saga.user_id,
            tx_id: TxId::new(tx_id),
        }
        .into()
    }

    fn shipped(saga: &SagaInstance, tx_id: u64) -> Event {
        ProductShipped {
            correlation_id: saga.correlation_id,
            user_id: saga.user_id,
            tx_id: TxId::new(tx_id),
        }
        .into()
    }

    #[test]
    fn start_reserves_product() {
        let correlation_id = CorrelationId::new();
        let (saga, reaction) = SagaInstance::start(correlation_id, &CreateOrder::new(9, 1337));

        assert_eq!(saga.phase, SagaPhase::AwaitingReservation);
        assert_eq!(
            reaction,
            Reaction::Dispatch(
                ComponentId::Inventory,
                ReserveProduct {
                    correlation_id,
                    user_id: UserId::new(9),
                    product_id: ProductId::new(1337),
                }
                .into()
            )
        );
    }

    #[test]
    fn happy_path_transitions() {
        let mut saga = started();

        let reaction = saga.react(&reserved(&saga));
        assert_eq!(saga.phase, SagaPhase::AwaitingPayment);
        assert!(matches!(
            reaction,
            Reaction::Dispatch(ComponentId::Payment, Command::SubmitPayment(_))
        ));

        let reaction = saga.react(&authorized(&saga, 1));
        assert_eq!(saga.phase, SagaPhase::AwaitingShipment);
        assert!(matches!(
            reaction,
            Reaction::Dispatch(ComponentId::Inventory, Command::ShipProduct(ref c)) if c.tx_id == TxId::new(1)
        ));

        let reaction = saga.react(&shipped(&saga, 1));
        assert_eq!(saga.phase, SagaPhase::Completed);
        assert_eq!(
            reaction,
            Reaction::Complete(OrderCompleted {
                correlation_id: saga.correlation_id,
                user_id: UserId::new(9),
                tx_id: TxId::new(1),
            })
        );
        assert!(saga.pending_command().is_none());
    }

    #[test]
    fn out_of_stock_fails_saga() {
        let mut saga = started();
        let event = Event::from(ProductOutOfStock {
            correlation_id: saga.correlation_id,
            user_id: saga.user_id,
            product_id: saga.product_id,
        });

        assert_eq!(
            saga.react(&event),
            Reaction::Fail(FailureReason::OutOfStock {
                product_id: ProductId::new(1337)
            })
        );
        assert_eq!(saga.phase, SagaPhase::Failed);
    }

    #[test]
    fn declined_payment_fails_saga() {
        let mut saga = started();
        saga.react(&reserved(&saga));

        let event = Event::from(PaymentDeclined {
            correlation_id: saga.correlation_id,
            user_id: saga.user_id,
            tx_id: TxId::new(1337),
        });
        assert!(matches!(
            saga.react(&event),
            Reaction::Fail(FailureReason::PaymentDeclined { .. })
        ));
        assert!(saga.phase.is_terminal());
    }

    #[test]
    fn out_of_phase_and_duplicate_events_are_ignored() {
        let mut saga = started();

        // Shipment before reservation
        assert_eq!(saga.react(&shipped(&saga, 1)), Reaction::Ignore);
        assert_eq!(saga.phase, SagaPhase::AwaitingReservation);

        saga.react(&reserved(&saga));
        // Redelivered reservation
        assert_eq!(saga.react(&reserved(&saga)), Reaction::Ignore);
        assert_eq!(saga.phase, SagaPhase::AwaitingPayment);

        saga.react(&authorized(&saga, 1));
        saga.react(&shipped(&saga, 1));
        assert_eq!(saga.react(&shipped(&saga, 1)), Reaction::Ignore);
        assert_eq!(saga.phase, SagaPhase::Completed);
    }

    #[test]
    fn events_of_other_sagas_are_ignored() {
        let mut saga = started();
        let other = started();

        assert_eq!(saga.react(&reserved(&other)), Reaction::Ignore);
        assert_eq!(saga.phase, SagaPhase::AwaitingReservation);
    }

    #[test]
    fn pending_command_follows_phase() {
        let mut saga = started();
        assert!(matches!(
            saga.pending_command(),
            Some((ComponentId::Inventory, Command::ReserveProduct(_)))
        ));

        saga.react(&reserved(&saga));
        assert!(matches!(
            saga.pending_command(),
            Some((ComponentId::Payment, Command::SubmitPayment(_)))
        ));
        assert_eq!(saga.attempts, 1);
    }

    #[test]
    fn retired_set_is_bounded() {
        let mut retired = RetiredSagas::new(2);
        let ids: Vec<_> = (0..3).map(|_| CorrelationId::new()).collect();
        for id in &ids {
            retired.insert(*id);
        }

        assert!(!retired.contains(&ids[0]));
        assert!(retired.contains(&ids[1]));
        assert!(retired.contains(&ids[2]));
    }

    #[test]
    fn retired_set_with_zero_capacity_remembers_nothing() {
        let mut retired = RetiredSagas::new(0);
        let id = CorrelationId::new();
        retired.insert(id);
        assert!(!retired.contains(&id));
    }
}
