//! Supervisor wiring the saga's components together.

use std::sync::Arc;

use common::AggregateId;
use domain::{Inventory, Payment};
use event_bus::EventBus;
use event_store::EventStore;

use crate::actor::AggregateRef;
use crate::client::OrderClient;
use crate::config::SagaConfig;
use crate::directory::{CommandSink, ComponentId, Directory};
use crate::order_fulfillment::{INVENTORY_ID, PAYMENT_ID};
use crate::process_manager::ProcessManagerRef;

/// Builder for [`SagaSystem`].
pub struct SagaSystemBuilder<S> {
    store: S,
    config: SagaConfig,
    inventory: Inventory,
    payment: Payment,
    routes: Vec<(ComponentId, Arc<dyn CommandSink>)>,
}

impl<S> SagaSystemBuilder<S>
where
    S: EventStore + Clone + 'static,
{
    /// Sets the saga configuration.
    pub fn config(mut self, config: SagaConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the empty inventory the log is replayed onto.
    pub fn inventory(mut self, inventory: Inventory) -> Self {
        self.inventory = inventory;
        self
    }

    /// Sets the empty payment processor the log is replayed onto.
    pub fn payment(mut self, payment: Payment) -> Self {
        self.payment = payment;
        self
    }

    /// Routes a component's commands to `sink` instead of its aggregate.
    pub fn route(mut self, component: ComponentId, sink: Arc<dyn CommandSink>) -> Self {
        self.routes.push((component, sink));
        self
    }

    /// Spawns both aggregates and the process manager.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> SagaSystem<S> {
        let bus = EventBus::new();

        let inventory = AggregateRef::spawn(
            AggregateId::new(INVENTORY_ID),
            self.inventory,
            self.store.clone(),
            bus.clone(),
            &self.config,
        );
        let payment = AggregateRef::spawn(
            AggregateId::new(PAYMENT_ID),
            self.payment,
            self.store.clone(),
            bus.clone(),
            &self.config,
        );

        let mut directory = Directory::new();
        directory.register(ComponentId::Inventory, Arc::new(inventory.clone()));
        directory.register(ComponentId::Payment, Arc::new(payment.clone()));
        for (component, sink) in self.routes {
            tracing::info!(%component, "routing component to custom sink");
            directory.register(component, sink);
        }

        let process_manager = ProcessManagerRef::spawn(directory, bus.clone(), &self.config);
        let client = OrderClient::new(process_manager.clone(), self.config.client_timeout);

        tracing::info!("saga system started");

        SagaSystem {
            store: self.store,
            bus,
            config: self.config,
            inventory,
            payment,
            process_manager,
            client,
        }
    }
}

/// Running order-fulfillment saga: bus, aggregates, process manager and a
/// client.
///
/// Components stop once every handle to them is dropped.
pub struct SagaSystem<S> {
    store: S,
    bus: EventBus,
    config: SagaConfig,
    inventory: AggregateRef<Inventory>,
    payment: AggregateRef<Payment>,
    process_manager: ProcessManagerRef,
    client: OrderClient,
}

impl<S> SagaSystem<S>
where
    S: EventStore + Clone + 'static,
{
    /// Starts building a system over `store`.
    pub fn builder(store: S) -> SagaSystemBuilder<S> {
        SagaSystemBuilder {
            store,
            config: SagaConfig::default(),
            inventory: Inventory::default(),
            payment: Payment::default(),
            routes: Vec::new(),
        }
    }

    pub fn client(&self) -> &OrderClient {
        &self.client
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    pub fn inventory(&self) -> &AggregateRef<Inventory> {
        &self.inventory
    }

    pub fn payment(&self) -> &AggregateRef<Payment> {
        &self.payment
    }

    pub fn process_manager(&self) -> &ProcessManagerRef {
        &self.process_manager
    }
}
