/// Transport Assembly - "The Wiring"
///
/// Builds the shared context (window, rings, notifier, stats), collects unit
/// registrations, then starts the dispatcher and every unit as named
/// threads. Routes are frozen once `start` is called.

use crate::config::TransportConfig;
use crate::dispatcher::{Dispatcher, RouteTable};
use crate::error::TransportError;
use crate::hal::QueueRegisters;
use crate::inbox::{unit_inbox, InboxReceiver};
use crate::notify::{Notifier, StartupGate};
use crate::queue::{CommandQueue, QueueDescriptor};
use crate::response::ResponseQueue;
use crate::stats::{StatsSnapshot, TransportStats};
use crate::types::{DispatchEnvelope, UnitId};
use crate::unit::{UnitHandler, UnitTask};
use crate::window::SharedWindow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type TaskHandle = JoinHandle<Result<(), TransportError>>;

pub struct Transport {
    config: TransportConfig,
    window: Arc<SharedWindow>,
    notifier: Arc<Notifier>,
    gate: Arc<StartupGate>,
    stats: Arc<TransportStats>,
    queue: Arc<CommandQueue>,
    responses: Arc<ResponseQueue>,
    routes: RouteTable,
    units: Vec<(UnitId, TaskHandle)>,
}

impl Transport {
    pub fn new(
        config: TransportConfig,
        window: Arc<SharedWindow>,
        command_regs: Arc<dyn QueueRegisters>,
        response_regs: Arc<dyn QueueRegisters>,
    ) -> Result<Self, TransportError> {
        config.validate()?;

        let stats = Arc::new(TransportStats::new());
        let queue = Arc::new(CommandQueue::new(
            QueueDescriptor::new(&config.command_queue, command_regs),
            window.clone(),
            stats.clone(),
        ));
        let responses = Arc::new(
            ResponseQueue::new(
                QueueDescriptor::new(&config.response_queue, response_regs),
                window.clone(),
                stats.clone(),
            )
            .with_post_timeout(config.response_post_timeout()),
        );

        Ok(Self {
            config,
            window,
            notifier: Arc::new(Notifier::new()),
            gate: Arc::new(StartupGate::new()),
            stats,
            queue,
            responses,
            routes: RouteTable::new(),
            units: Vec::new(),
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn window(&self) -> &Arc<SharedWindow> {
        &self.window
    }

    /// Wake source for the command ring's interrupt.
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn gate(&self) -> &Arc<StartupGate> {
        &self.gate
    }

    pub fn stats(&self) -> &Arc<TransportStats> {
        &self.stats
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    pub fn responses(&self) -> &Arc<ResponseQueue> {
        &self.responses
    }

    /// Add a route and hand back the receiving end of its inbox.
    ///
    /// `capacity` falls back to `inbox_capacity` from the config.
    pub fn register_unit(
        &mut self,
        unit: UnitId,
        name: &str,
        capacity: Option<usize>,
    ) -> Result<InboxReceiver, TransportError> {
        let capacity = capacity.unwrap_or(self.config.inbox_capacity);
        if capacity == 0 {
            return Err(TransportError::Registration {
                unit,
                reason: "zero inbox capacity",
            });
        }
        let (inbox, rx) = unit_inbox(unit, name, capacity);
        self.routes.register(inbox)?;
        Ok(rx)
    }

    /// Register `unit` and run `handler` on its own thread.
    pub fn spawn_unit<H>(&mut self, unit: UnitId, name: &str, handler: H) -> Result<(), TransportError>
    where
        H: UnitHandler + 'static,
    {
        let rx = self.register_unit(unit, name, None)?;
        let task = UnitTask::new(rx, self.queue.clone(), self.responses.clone(), handler);
        let handle = thread::Builder::new()
            .name(format!("unit-{}", name))
            .spawn(move || task.run().map(|_| ()))
            .map_err(|_| TransportError::Task(name.to_string()))?;
        self.units.push((unit, handle));
        log::info!("Spawned {} task '{}'", unit, name);
        Ok(())
    }

    /// A dispatcher over the current routes, for callers that drive it
    /// themselves.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.queue.clone(),
            self.responses.clone(),
            self.routes.clone(),
            self.notifier.clone(),
            self.stats.clone(),
        )
        .with_send_timeout(self.config.inbox_send_timeout())
    }

    /// Spawn the dispatcher and release the startup gate.
    pub fn start(self) -> Result<RunningTransport, TransportError> {
        let dispatcher = self.dispatcher();
        let gate = self.gate.clone();
        let setup_timeout = self.config.setup_timeout();
        let handle = thread::Builder::new()
            .name("cmdq-dispatch".to_string())
            .spawn(move || dispatcher.run(&gate, setup_timeout))
            .map_err(|_| TransportError::Task("cmdq-dispatch".to_string()))?;

        self.gate.open();
        log::info!("Transport started with {} unit(s)", self.units.len());

        Ok(RunningTransport {
            notifier: self.notifier,
            stats: self.stats,
            queue: self.queue,
            responses: self.responses,
            routes: self.routes,
            dispatcher: handle,
            units: self.units,
        })
    }
}

/// Handle to a started transport
pub struct RunningTransport {
    notifier: Arc<Notifier>,
    stats: Arc<TransportStats>,
    queue: Arc<CommandQueue>,
    responses: Arc<ResponseQueue>,
    routes: RouteTable,
    dispatcher: TaskHandle,
    units: Vec<(UnitId, TaskHandle)>,
}

impl RunningTransport {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// True once the dispatcher thread has returned (shutdown or halt).
    pub fn dispatcher_finished(&self) -> bool {
        self.dispatcher.is_finished()
    }

    /// Stop the dispatcher, let every unit finish what is already queued,
    /// then join everything. Reports the first task error.
    ///
    /// Responses still waiting for ring space are dropped rather than
    /// waited on, since nothing guarantees the host is still consuming.
    pub fn shutdown(self) -> Result<StatsSnapshot, TransportError> {
        self.notifier.shutdown();
        self.responses.close();
        let mut first_err = join("cmdq-dispatch", self.dispatcher).err();

        let queue_id = self.queue.descriptor().queue_id();
        for inbox in self.routes.inboxes() {
            // A halted unit has already dropped its receiver.
            let _ = inbox.send(DispatchEnvelope::shutdown(queue_id), None);
        }
        drop(self.routes);

        for (unit, handle) in self.units {
            if let Err(e) = join(&unit.to_string(), handle) {
                first_err.get_or_insert(e);
            }
        }

        let snapshot = self.stats.snapshot();
        log::info!(
            "Transport stopped: {} dispatched, {} short-circuited, {} swept",
            snapshot.dispatched,
            snapshot.short_circuited,
            snapshot.swept
        );
        match first_err {
            Some(e) => Err(e),
            None => Ok(snapshot),
        }
    }
}

fn join(name: &str, handle: TaskHandle) -> Result<(), TransportError> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => {
            log::error!("Task '{}' panicked", name);
            Err(TransportError::Task(name.to_string()))
        }
    }
}
