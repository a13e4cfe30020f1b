/// Command Dispatcher - "The Router"
///
/// One dispatcher serves one inbound ring. It sleeps on the notifier, decodes
/// everything between the last-handled cursor and `head`, and for each
/// command either answers it on the spot (administrative) or forwards an
/// envelope to the owning unit's inbox with a blocking send.
///
/// The notifier is disarmed while draining and re-armed afterwards, followed
/// by one more look at `head`: a command published between the final check
/// and the re-arm would otherwise never raise a wake.

use crate::error::TransportError;
use crate::hal::io_barrier;
use crate::inbox::UnitInbox;
use crate::notify::{Notifier, StartupGate, Wake};
use crate::queue::{CommandQueue, Decoded};
use crate::response::ResponseQueue;
use crate::stats::TransportStats;
use crate::types::{CommandHeader, DispatchEnvelope, UnitId};
use crate::window::LocalAddr;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Why a command is answered by the dispatcher itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminReason {
    Null,
    Unload,
    /// No inbox registered for the unit
    Unrouted,
}

#[derive(Debug, Clone, Copy)]
pub enum Route<'a> {
    Administrative(AdminReason),
    Forward(&'a UnitInbox),
}

/// Unit id -> inbox, fixed once the dispatcher starts
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    inboxes: BTreeMap<UnitId, UnitInbox>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, inbox: UnitInbox) -> Result<(), TransportError> {
        let unit = inbox.unit();
        if unit.is_reserved() {
            return Err(TransportError::Registration {
                unit,
                reason: "reserved unit id",
            });
        }
        if self.inboxes.contains_key(&unit) {
            return Err(TransportError::Registration {
                unit,
                reason: "already registered",
            });
        }
        log::debug!("Route {} -> inbox '{}' (capacity {})", unit, inbox.name(), inbox.capacity());
        self.inboxes.insert(unit, inbox);
        Ok(())
    }

    pub fn classify(&self, unit: UnitId) -> Route<'_> {
        match unit {
            UnitId::NULL => Route::Administrative(AdminReason::Null),
            UnitId::UNLOAD => Route::Administrative(AdminReason::Unload),
            _ => match self.inboxes.get(&unit) {
                Some(inbox) => Route::Forward(inbox),
                None => Route::Administrative(AdminReason::Unrouted),
            },
        }
    }

    pub fn get(&self, unit: UnitId) -> Option<&UnitInbox> {
        self.inboxes.get(&unit)
    }

    pub fn units(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.inboxes.keys().copied()
    }

    pub fn inboxes(&self) -> impl Iterator<Item = &UnitInbox> {
        self.inboxes.values()
    }

    pub fn len(&self) -> usize {
        self.inboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }
}

/// Result of one wake-handler invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// Nothing new in the ring
    Spurious,
    /// Records decoded (commands and wrap markers)
    Drained(usize),
}

pub struct Dispatcher {
    queue: Arc<CommandQueue>,
    responses: Arc<ResponseQueue>,
    routes: RouteTable,
    notifier: Arc<Notifier>,
    send_timeout: Option<Duration>,
    stats: Arc<TransportStats>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<CommandQueue>,
        responses: Arc<ResponseQueue>,
        routes: RouteTable,
        notifier: Arc<Notifier>,
        stats: Arc<TransportStats>,
    ) -> Self {
        Self {
            queue,
            responses,
            routes,
            notifier,
            send_timeout: None,
            stats,
        }
    }

    /// Bound the inbox send; a timed-out send becomes a routing error.
    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Task body: wait for the startup gate, then serve the ring until
    /// shutdown or a fatal error.
    pub fn run(&self, gate: &StartupGate, setup_timeout: Duration) -> Result<(), TransportError> {
        let queue_id = self.queue.descriptor().queue_id();

        if let Err(e) = gate.acquire(setup_timeout) {
            log::error!("CRITICAL: dispatcher for queue {:?} halted: {}", queue_id, e);
            return Err(e);
        }
        log::info!(
            "Dispatcher online for queue {:?} ({} unit route(s))",
            queue_id,
            self.routes.len()
        );

        // Anything published before the first arm raised nothing.
        self.serve_wake()?;

        loop {
            match self.notifier.wait(queue_id) {
                Wake::Shutdown => {
                    log::info!("Dispatcher for queue {:?} shutting down", queue_id);
                    self.queue.descriptor().regs().enable_notifier(false);
                    return Ok(());
                }
                Wake::Signaled => self.serve_wake()?,
            }
        }
    }

    fn serve_wake(&self) -> Result<(), TransportError> {
        match self.on_wake() {
            Ok(outcome) => {
                log::trace!("Wake handled: {:?}", outcome);
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                self.queue.descriptor().regs().enable_notifier(false);
                log::error!("Dispatcher halted: {}", e);
                Err(e)
            }
            Err(e) => {
                log::warn!("Wake handling error: {}", e);
                Ok(())
            }
        }
    }

    /// Wake handler: drain, re-arm, re-check.
    ///
    /// A wake with nothing new only re-arms.
    pub fn on_wake(&self) -> Result<WakeOutcome, TransportError> {
        let regs = self.queue.descriptor().regs();
        if !self.queue.has_undecoded() {
            regs.enable_notifier(true);
            io_barrier();
            if !self.queue.has_undecoded() {
                return Ok(WakeOutcome::Spurious);
            }
        }
        regs.enable_notifier(false);

        let mut decoded = 0usize;
        loop {
            decoded += self.drain()?;

            regs.enable_notifier(true);
            io_barrier();
            if !self.queue.has_undecoded() {
                break;
            }
            log::trace!("Head moved while re-arming; draining again");
            regs.enable_notifier(false);
        }

        Ok(if decoded == 0 {
            WakeOutcome::Spurious
        } else {
            WakeOutcome::Drained(decoded)
        })
    }

    /// Decode and act on everything up to the current `head`.
    pub fn drain(&self) -> Result<usize, TransportError> {
        let mut decoded = 0usize;
        while let Some(next) = self.queue.next_command()? {
            decoded += 1;
            match next {
                Decoded::Rewind { addr } => {
                    log::warn!(
                        "REWIND decoded at {}; last-handled reset to ring base",
                        addr
                    );
                    self.stats.record_rewind();
                    self.queue.sweep(addr)?;
                }
                Decoded::Command { addr, header } => self.route(addr, &header)?,
            }
        }
        Ok(decoded)
    }

    fn route(&self, addr: LocalAddr, header: &CommandHeader) -> Result<(), TransportError> {
        match self.routes.classify(header.unit_id) {
            Route::Administrative(reason) => {
                log::debug!(
                    "{} seq={} answered by dispatcher ({:?})",
                    header.unit_id,
                    header.seq_num_id,
                    reason
                );
                self.stats.record_short_circuit();
                self.short_circuit(addr, header)
            }
            Route::Forward(inbox) => {
                let queue_id = self.queue.descriptor().queue_id();
                match inbox.send(DispatchEnvelope::command(queue_id, addr), self.send_timeout) {
                    Ok(()) => {
                        self.stats.record_dispatched();
                        Ok(())
                    }
                    Err(e) => {
                        log::error!(
                            "Routing {} seq={} failed: {}",
                            header.unit_id,
                            header.seq_num_id,
                            e
                        );
                        self.stats.record_routing_error();
                        self.short_circuit(addr, header)
                    }
                }
            }
        }
    }

    /// Answer with an empty response and reclaim the command directly.
    fn short_circuit(&self, addr: LocalAddr, header: &CommandHeader) -> Result<(), TransportError> {
        // Blocks while the response ring is full. Only a timeout or shutdown
        // gets here with an error, and the command is still reclaimed.
        if let Err(e) = self.responses.post(header.unit_id, header.seq_num_id, &[]) {
            log::error!(
                "{} seq={}: synthesized response not delivered: {}",
                header.unit_id,
                header.seq_num_id,
                e
            );
        }
        self.queue.sweep(addr)?;
        Ok(())
    }
}
