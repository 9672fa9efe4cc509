//! Client side of the order saga.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use common::{CorrelationId, ProductId, UserId};
use domain::{CreateOrder, Event, EventKind, OrderCompleted, OrderFailed};
use event_bus::EventBus;
use tokio::sync::mpsc;

use crate::error::{Result, SagaError};
use crate::process_manager::ProcessManagerRef;

/// Terminal result of an order saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    Completed(OrderCompleted),
    Failed(OrderFailed),
}

impl OrderOutcome {
    /// Returns the saga the outcome belongs to.
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            OrderOutcome::Completed(e) => e.correlation_id,
            OrderOutcome::Failed(e) => e.correlation_id,
        }
    }

    /// Returns true if the order shipped.
    pub fn is_completed(&self) -> bool {
        matches!(self, OrderOutcome::Completed(_))
    }

    /// Converts a terminal event into an outcome.
    pub fn from_event(event: Event) -> Option<Self> {
        match event {
            Event::OrderCompleted(e) => Some(OrderOutcome::Completed(e)),
            Event::OrderFailed(e) => Some(OrderOutcome::Failed(e)),
            _ => None,
        }
    }

    /// Returns the terminal event for this outcome.
    pub fn into_event(self) -> Event {
        match self {
            OrderOutcome::Completed(e) => Event::OrderCompleted(e),
            OrderOutcome::Failed(e) => Event::OrderFailed(e),
        }
    }
}

/// Places orders and waits, bounded by a deadline, for their outcome.
#[derive(Clone)]
pub struct OrderClient {
    process_manager: ProcessManagerRef,
    timeout: Duration,
}

impl OrderClient {
    /// Creates a client that waits at most `timeout` per order.
    pub fn new(process_manager: ProcessManagerRef, timeout: Duration) -> Self {
        Self {
            process_manager,
            timeout,
        }
    }

    /// Returns the per-order deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Places an order and waits for it to complete or fail.
    ///
    /// On expiry returns [`SagaError::Timeout`]; the saga is not cancelled
    /// and its outcome is still published on the bus.
    #[tracing::instrument(skip(self))]
    pub async fn create_order(&self, user_id: UserId, product_id: ProductId) -> Result<OrderOutcome> {
        let pending = self
            .process_manager
            .create_order(CreateOrder::new(user_id, product_id))?;

        match tokio::time::timeout(self.timeout, pending.outcome).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(SagaError::ComponentStopped("process manager".to_string())),
            Err(_) => {
                tracing::warn!(
                    correlation_id = %pending.correlation_id,
                    timeout = ?self.timeout,
                    "no order outcome before deadline"
                );
                metrics::counter!("order_client_timeouts_total").increment(1);
                Err(SagaError::Timeout(self.timeout))
            }
        }
    }

    /// Places an order without waiting. Observe the outcome with an
    /// [`OutcomeWatcher`].
    pub fn submit(&self, user_id: UserId, product_id: ProductId) -> Result<CorrelationId> {
        self.process_manager
            .submit(CreateOrder::new(user_id, product_id))
    }
}

/// Outcomes kept for sagas nobody has waited on yet.
const DEFAULT_RETENTION: usize = 1024;

/// Bus subscription collecting order outcomes.
///
/// Subscribe before submitting orders so no outcome is missed. Outcomes
/// that arrive while waiting on another saga are kept, up to a retention
/// limit; past it the oldest unclaimed one is dropped.
pub struct OutcomeWatcher {
    // Keeps the subscription alive
    _sender: mpsc::UnboundedSender<Event>,
    receiver: mpsc::UnboundedReceiver<Event>,
    seen: HashMap<CorrelationId, OrderOutcome>,
    arrivals: VecDeque<CorrelationId>,
    retention: usize,
}

impl OutcomeWatcher {
    /// Subscribes to `OrderCompleted` and `OrderFailed`.
    pub fn subscribe(bus: &EventBus) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        bus.subscribe_all(&sender, &EventKind::TERMINAL);
        Self {
            _sender: sender,
            receiver,
            seen: HashMap::new(),
            arrivals: VecDeque::new(),
            retention: DEFAULT_RETENTION,
        }
    }

    /// Sets how many unclaimed outcomes are kept. At least one is.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    /// Waits for the outcome of `correlation_id`.
    ///
    /// Outcomes of other sagas received meanwhile are kept for later calls.
    pub async fn wait_for(
        &mut self,
        correlation_id: CorrelationId,
        timeout: Duration,
    ) -> Result<OrderOutcome> {
        if let Some(outcome) = self.seen.remove(&correlation_id) {
            self.arrivals.retain(|id| *id != correlation_id);
            return Ok(outcome);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Err(SagaError::ComponentStopped("event bus".to_string())),
                Err(_) => return Err(SagaError::Timeout(timeout)),
            };

            let Some(outcome) = OrderOutcome::from_event(event) else {
                continue;
            };
            if outcome.correlation_id() == correlation_id {
                return Ok(outcome);
            }
            self.keep(outcome);
        }
    }

    fn keep(&mut self, outcome: OrderOutcome) {
        let correlation_id = outcome.correlation_id();
        if self.seen.contains_key(&correlation_id) {
            return;
        }
        if self.seen.len() == self.retention
            && let Some(oldest) = self.arrivals.pop_front()
        {
            self.seen.remove(&oldest);
            tracing::debug!(correlation_id = %oldest, "dropped unclaimed order outcome");
        }
        self.seen.insert(correlation_id, outcome);
        self.arrivals.push_back(correlation_id);
    }
}
