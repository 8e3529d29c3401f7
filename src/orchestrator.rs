//! Top-level server loop.
//!
//! The orchestrator owns the simulation, the storage handle, the observer
//! transport and the clock. It bootstraps the roster from storage, then
//! runs one tick per frame period, bridges simulation events to storage
//! writes and drains the roster once shutdown has been requested.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{debug, error, info, log_enabled, trace, warn, Level};

use crate::config::ServerConfig;
use crate::entity::{Frame, Lifecycle, SimEntity};
use crate::error::ArenaResult;
use crate::reconcile::{create_entity, ReconciliationJob};
use crate::schedule::{Clock, FramePacer, PeriodicJob};
use crate::simulation::{SimEvent, Simulation};
use crate::storage::{KillReport, Storage, NO_KILLER};
use crate::telemetry::TelemetrySampler;
use crate::transport::{ConnectionHandler, Flow, Peer, Transport};

/// Most bytes echoed back per read from an observer.
const ECHO_CHUNK: usize = 1024;

/// Cloneable, thread-safe request to stop the server.
///
/// Once requested, the loop stops admitting entities, retires the roster
/// and exits when nothing is left.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    /// Creates a handle with no shutdown requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a graceful shutdown.
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once a shutdown has been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Whether the main loop should keep going after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    /// Run another frame.
    Continue,
    /// Shutdown finished.
    Exit,
}

/// Killer id to report for a death.
///
/// Deaths without a killer and self-eliminations report [`NO_KILLER`].
pub fn killer_id<E: Lifecycle + ?Sized>(victim: &E, killer: Option<&E>) -> i64 {
    match killer {
        Some(k) if k.external_id() != victim.external_id() => k.external_id().get(),
        _ => NO_KILLER,
    }
}

struct StageTimer {
    last: Instant,
    stages: Vec<(&'static str, std::time::Duration)>,
}

impl StageTimer {
    fn new() -> Self {
        Self {
            last: Instant::now(),
            stages: Vec::with_capacity(12),
        }
    }

    fn mark(&mut self, stage: &'static str) {
        let now = Instant::now();
        self.stages.push((stage, now - self.last));
        self.last = now;
    }

    fn log(&self, frame: Frame) {
        if log_enabled!(Level::Trace) {
            let parts: Vec<String> = self
                .stages
                .iter()
                .map(|(stage, d)| format!("{stage}={}us", d.as_micros()))
                .collect();
            trace!("frame {frame}: {}", parts.join(" "));
        }
    }
}

/// Sends new observers a snapshot and echoes what they send.
struct Observers<'a, S: Simulation> {
    sim: &'a S,
}

impl<S: Simulation> ConnectionHandler for Observers<'_, S> {
    fn on_connected(&mut self, peer: &mut dyn Peer) -> Flow {
        info!("observer {} connected", peer.peer());
        if let Err(e) = peer.write(&self.sim.snapshot()) {
            warn!("failed to send snapshot to {}: {e}", peer.peer());
        }
        Flow::Continue
    }

    fn on_closed(&mut self, peer: &mut dyn Peer) -> Flow {
        info!("observer {} disconnected", peer.peer());
        Flow::Continue
    }

    fn on_data(&mut self, peer: &mut dyn Peer) -> Flow {
        let mut buf = [0u8; ECHO_CHUNK];
        match peer.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                debug!("observer {} sent {n} bytes", peer.peer());
                if let Err(e) = peer.write(&buf[..n]) {
                    warn!("failed to echo to {}: {e}", peer.peer());
                }
            }
            Err(e) => warn!("failed to read from {}: {e}", peer.peer()),
        }
        Flow::Continue
    }
}

/// Owns every collaborator and runs the frame loop.
pub struct Orchestrator<S, St, T, C>
where
    S: Simulation,
    St: Storage,
    T: Transport,
    C: Clock,
{
    config: ServerConfig,
    sim: S,
    storage: St,
    transport: T,
    clock: C,
    shutdown: ShutdownHandle,
    pacer: FramePacer,
    stream_stats: PeriodicJob,
    storage_stats: PeriodicJob,
    reconcile: ReconciliationJob,
    sampler: TelemetrySampler,
    started: bool,
    last_remaining: Option<usize>,
}

impl<S, St, T, C> Orchestrator<S, St, T, C>
where
    S: Simulation,
    St: Storage,
    T: Transport,
    C: Clock,
{
    /// Assembles an orchestrator. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(config: ServerConfig, sim: S, storage: St, transport: T, clock: C) -> Self {
        let now = clock.now();
        Self {
            pacer: FramePacer::new(config.frame_period(), now),
            stream_stats: PeriodicJob::new("stream-stats", config.stream_stats_interval, now),
            storage_stats: PeriodicJob::new("storage-stats", config.storage_stats_interval, now),
            reconcile: ReconciliationJob::new(config.reconcile_interval, now),
            config,
            sim,
            storage,
            transport,
            clock,
            shutdown: ShutdownHandle::new(),
            sampler: TelemetrySampler::new(),
            started: false,
            last_remaining: None,
        }
    }

    /// Handle that requests a graceful shutdown from any thread.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// The simulation.
    #[must_use]
    pub const fn simulation(&self) -> &S {
        &self.sim
    }

    /// The storage handle.
    #[must_use]
    pub const fn storage(&self) -> &St {
        &self.storage
    }

    /// The observer transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the observer transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The frame pacer.
    #[must_use]
    pub const fn pacer(&self) -> &FramePacer {
        &self.pacer
    }

    /// Listens, connects to storage and bootstraps the roster.
    ///
    /// Each externally active id goes through the same creation path as
    /// reconciliation. The frame grid and every periodic job are anchored
    /// at the clock's current time.
    ///
    /// # Errors
    ///
    /// Invalid configuration, a listen failure, or a storage failure while
    /// connecting or fetching the active ids.
    pub fn start(&mut self) -> ArenaResult<()> {
        self.config.validate()?;
        self.transport.listen(self.config.port)?;
        info!("listening for observers on port {}", self.config.port);

        self.storage.connect()?;
        let ids = self.storage.active_external_ids()?;
        let mut created = 0usize;
        for id in ids {
            match create_entity(&mut self.sim, &self.storage, id) {
                Ok(outcome) if outcome.is_created() => created += 1,
                Ok(outcome) => debug!("entity {id} not bootstrapped: {outcome:?}"),
                Err(e) => error!("failed to fetch build record of entity {id}: {e}"),
            }
        }
        info!("bootstrapped {created} entities");
        self.handle_events();

        let now = self.clock.now();
        self.pacer.reset(now);
        self.stream_stats = PeriodicJob::new("stream-stats", self.config.stream_stats_interval, now);
        self.storage_stats = PeriodicJob::new("storage-stats", self.config.storage_stats_interval, now);
        self.reconcile = ReconciliationJob::new(self.config.reconcile_interval, now);
        self.started = true;
        Ok(())
    }

    /// Runs one simulation tick without polling or waiting.
    pub fn run_frame(&mut self) {
        let now = self.clock.now();
        let mut timer = StageTimer::new();

        self.sim.decay_resources();
        timer.mark("decay");
        self.sim.consume_resources();
        timer.mark("consume");
        self.sim.remove_expired();
        timer.mark("expire");
        self.sim.advance_entities();
        timer.mark("advance");

        if self.stream_stats.poll(now) {
            self.sim.publish_stream_stats();
            timer.mark("stream-stats");
        }
        if self.storage_stats.poll(now) {
            self.push_live_stats(now);
            timer.mark("storage-stats");
        }

        self.sim.process_log();
        timer.mark("log");
        self.sim.tick();
        self.sim.update_transitional();
        timer.mark("transitional");
        // Crash reports must land before reconciliation looks at build statuses.
        self.handle_events();

        let update = self.sim.take_update();
        self.transport.broadcast(&update);
        timer.mark("broadcast");

        let shutting_down = self.shutdown.is_requested();
        if let Some(report) = self.reconcile.poll(now, &mut self.sim, &self.storage, shutting_down) {
            if report.created + report.retired > 0 {
                info!("reconciled: {} created, {} retired", report.created, report.retired);
            }
            timer.mark("reconcile");
        }

        self.handle_events();
        timer.mark("events");
        timer.log(self.sim.current_frame());
    }

    /// Runs one full loop iteration: tick, transport poll, frame wait and
    /// shutdown check.
    pub fn step(&mut self) -> LoopControl {
        self.run_frame();

        let mut observers = Observers { sim: &self.sim };
        if let Err(e) = self.transport.poll(self.config.poll_timeout, &mut observers) {
            warn!("transport poll failed: {e}");
        }

        self.pacer.wait(&self.clock);
        self.check_shutdown()
    }

    /// Starts the server and loops until a requested shutdown completes.
    ///
    /// # Errors
    ///
    /// Any error from [`start`](Self::start).
    pub fn run(&mut self) -> ArenaResult<()> {
        if !self.started {
            self.start()?;
        }
        while self.step() == LoopControl::Continue {}
        info!("stopped at frame {}", self.sim.current_frame());
        Ok(())
    }

    fn check_shutdown(&mut self) -> LoopControl {
        if !self.shutdown.is_requested() {
            return LoopControl::Continue;
        }

        let remaining = self.sim.active_count() + self.sim.transitional_count();
        if remaining == 0 {
            info!("shutdown complete, roster empty");
            return LoopControl::Exit;
        }
        if self.last_remaining != Some(remaining) {
            info!("shutting down, {remaining} entities remaining");
            self.last_remaining = Some(remaining);
        }
        LoopControl::Continue
    }

    fn push_live_stats(&mut self, now: Instant) {
        let stats = self.sampler.sample(now, Utc::now(), &self.sim);
        if let Err(e) = self.storage.push_live_stats(&stats) {
            error!("failed to push live stats: {e}");
        }
    }

    fn handle_events(&mut self) {
        for event in self.sim.drain_events() {
            match event {
                SimEvent::Killed { victim, killer, frame } => {
                    let stats = victim.stats();
                    let report = KillReport {
                        victim: victim.external_id(),
                        version_id: victim.version_id(),
                        start_frame: victim.start_frame(),
                        end_frame: frame,
                        killer_id: killer_id(victim.as_ref(), killer.as_deref()),
                        peak_mass: stats.peak_mass,
                        final_mass: stats.mass,
                        food: stats.food,
                    };
                    if let Err(e) = self.storage.report_kill(&report) {
                        error!("failed to report kill of entity {}: {e}", report.victim);
                    }
                    if let Err(e) = self.storage.persist_entity_state(report.victim, &victim.persistent_state()) {
                        error!("failed to persist state of entity {}: {e}", report.victim);
                    }
                }
                SimEvent::Errored { entity, message } => {
                    if let Err(e) = self.storage.mark_crashed(entity.version_id(), &message) {
                        error!("failed to mark version {} crashed: {e}", entity.version_id());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use crate::error::TaskError;

    struct Named(i64);

    impl Lifecycle for Named {
        fn external_id(&self) -> EntityId {
            EntityId::new(self.0)
        }
        fn startup(&self) -> Result<(), TaskError> {
            Ok(())
        }
        fn shutdown(&self) -> Result<(), TaskError> {
            Ok(())
        }
    }

    #[test]
    fn killer_id_uses_sentinel_for_self_and_none() {
        let victim = Named(1);
        assert_eq!(killer_id(&victim, None), NO_KILLER);
        assert_eq!(killer_id(&victim, Some(&Named(1))), NO_KILLER);
        assert_eq!(killer_id(&victim, Some(&Named(2))), 2);
    }

    #[test]
    fn shutdown_handle_is_shared_between_clones() {
        let handle = ShutdownHandle::new();
        let other = handle.clone();
        assert!(!handle.is_requested());
        other.request();
        assert!(handle.is_requested());
    }
}
