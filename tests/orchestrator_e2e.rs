use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arena_core::arena::{Arena, ArenaConfig, BuiltinLoader, Program, ProgramLoader, StepOutcome, StepView};
use arena_core::storage::NO_KILLER;
use arena_core::{
    BuildRecord, BuildStatus, CommandKind, EntityId, InMemoryStorage, LoopControl, ManualClock, MemoryTransport,
    Orchestrator, Roster, ServerConfig, Simulation, TaskError, VersionId,
};

/// Program that fails on demand.
struct Faulty {
    fail_start: bool,
    fail_at_step: u32,
    steps: u32,
}

impl Program for Faulty {
    fn start(&mut self) -> Result<(), TaskError> {
        if self.fail_start {
            return Err(TaskError::new("cannot boot"));
        }
        Ok(())
    }

    fn step(&mut self, _view: &StepView) -> Result<StepOutcome, String> {
        self.steps += 1;
        if self.steps >= self.fail_at_step {
            return Err("segfault".to_string());
        }
        Ok(StepOutcome::default())
    }

    fn stop(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    fn persistent_state(&self) -> Vec<u8> {
        vec![0xAB]
    }
}

struct TestLoader;

impl ProgramLoader for TestLoader {
    fn load(&self, record: &BuildRecord) -> Result<Box<dyn Program>, String> {
        match record.program.as_str() {
            "crash" => Ok(Box::new(Faulty {
                fail_start: false,
                fail_at_step: 3,
                steps: 0,
            })),
            "noboot" => Ok(Box::new(Faulty {
                fail_start: true,
                fail_at_step: u32::MAX,
                steps: 0,
            })),
            _ => BuiltinLoader.load(record),
        }
    }
}

type Server = Orchestrator<Arena<TestLoader>, Arc<InMemoryStorage>, MemoryTransport, ManualClock>;

fn record(id: i64, program: &str) -> BuildRecord {
    BuildRecord {
        id: EntityId::new(id),
        version_id: VersionId::new(id * 10),
        build_status: BuildStatus::Successful,
        program: program.to_string(),
        persistent_state: Vec::new(),
    }
}

fn storage(entities: &[(i64, &str)]) -> Arc<InMemoryStorage> {
    let storage = Arc::new(InMemoryStorage::new());
    for (id, program) in entities {
        storage.upsert_record(record(*id, program)).unwrap();
        storage.activate(EntityId::new(*id)).unwrap();
    }
    storage
}

fn config() -> ServerConfig {
    ServerConfig {
        port: 9999,
        startup_workers: 2,
        stream_stats_interval: Duration::from_millis(50),
        storage_stats_interval: Duration::from_millis(100),
        reconcile_interval: Duration::from_millis(50),
        ..ServerConfig::default()
    }
}

fn unstarted(storage: &Arc<InMemoryStorage>) -> Server {
    let config = config();
    let arena = Arena::new(ArenaConfig::default(), &config.pipeline(), TestLoader).unwrap();
    Orchestrator::new(config, arena, Arc::clone(storage), MemoryTransport::new(), ManualClock::new())
}

fn server(storage: &Arc<InMemoryStorage>) -> Server {
    let mut server = unstarted(storage);
    server.start().unwrap();
    server
}

/// Steps the loop until `done` holds, giving workers real time in between.
fn step_until(server: &mut Server, what: &str, done: impl Fn(&Server) -> bool) -> LoopControl {
    for _ in 0..2000 {
        let control = server.step();
        if done(server) || control == LoopControl::Exit {
            return control;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn bootstrap_admits_entities_and_feeds_observers() {
    let storage = storage(&[(1, "grazer"), (2, "idle")]);
    let mut server = server(&storage);
    assert_eq!(server.transport().port(), Some(9999));

    step_until(&mut server, "admission", |s| s.simulation().active_count() == 2);
    assert!(!server.transport().broadcasts().is_empty());

    server.transport_mut().connect("viewer");
    server.transport_mut().send_from("viewer", b"ping");
    server.step();

    let received = server.transport().received_by("viewer").unwrap().to_vec();
    let text = String::from_utf8(received).unwrap();
    let first_line = text.lines().next().unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(first_line).unwrap();
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["entities"].as_array().unwrap().len(), 2);
    assert!(text.contains("ping"));
}

#[test]
fn unreachable_storage_aborts_start() {
    let storage = storage(&[(1, "grazer")]);
    storage.set_offline(true);
    let mut server = unstarted(&storage);

    let err = server.start().unwrap_err();
    assert!(err.is_storage());
    assert!(err.is_retryable());
    assert_eq!(server.simulation().transitional_count(), 0);

    storage.set_offline(false);
    server.start().unwrap();
    step_until(&mut server, "admission", |s| s.simulation().active_count() == 1);
}

#[test]
fn shutdown_drains_remaining_entities_then_exits() {
    let storage = storage(&[(1, "grazer"), (2, "grazer")]);
    let mut server = server(&storage);
    step_until(&mut server, "admission", |s| s.simulation().active_count() == 2);

    server.shutdown_handle().request();
    storage.upsert_record(record(3, "grazer")).unwrap();
    storage.activate(EntityId::new(3)).unwrap();

    let control = step_until(&mut server, "shutdown", |_| false);
    assert_eq!(control, LoopControl::Exit);
    assert_eq!(server.simulation().active_count(), 0);
    assert_eq!(server.simulation().transitional_count(), 0);
    assert!(!server.simulation().is_external_id_active(EntityId::new(3)));

    let kills = storage.kills().unwrap();
    let mut victims: Vec<i64> = kills.iter().map(|k| k.victim.get()).collect();
    victims.sort_unstable();
    assert_eq!(victims, vec![1, 2]);
    assert!(kills.iter().all(|k| k.killer_id == NO_KILLER));

    // Grazers persist their life count.
    let blob = storage.persisted_state(EntityId::new(1)).unwrap().unwrap();
    assert_eq!(blob, 1u32.to_le_bytes().to_vec());
}

#[test]
fn kill_command_is_reported_with_stats() {
    let storage = storage(&[(1, "grazer")]);
    let mut server = server(&storage);
    step_until(&mut server, "admission", |s| s.simulation().active_count() == 1);
    for _ in 0..5 {
        server.step();
    }

    let cmd = storage.push_command(CommandKind::Kill, EntityId::new(1)).unwrap();
    step_until(&mut server, "kill report", |_| !storage.kills().unwrap().is_empty());

    assert!(storage.command_completion(cmd).unwrap().unwrap().success);
    let report = &storage.kills().unwrap()[0];
    assert_eq!(report.victim, EntityId::new(1));
    assert_eq!(report.version_id, VersionId::new(10));
    assert_eq!(report.killer_id, NO_KILLER);
    assert!(report.end_frame > report.start_frame);
    assert!(report.peak_mass >= report.final_mass);
    assert!(report.food.natural > 0.0);
}

#[test]
fn program_failures_are_reported_as_crashes() {
    let storage = storage(&[(1, "crash"), (2, "noboot"), (3, "rocket")]);
    let mut server = server(&storage);

    // Unknown programs fail during creation, at bootstrap.
    assert!(storage.crashes().unwrap().iter().any(|c| c.version_id == VersionId::new(30)));

    step_until(&mut server, "crash reports", |_| storage.crashes().unwrap().len() == 3);
    let crashes = storage.crashes().unwrap();
    let message_of = |v: i64| {
        crashes
            .iter()
            .find(|c| c.version_id == VersionId::new(v))
            .map(|c| c.message.clone())
            .unwrap()
    };
    assert_eq!(message_of(10), "segfault");
    assert_eq!(message_of(20), "cannot boot");

    // A runtime crash also kills the entity, without a killer.
    let kills = storage.kills().unwrap();
    assert_eq!(kills.len(), 1);
    assert_eq!(kills[0].victim, EntityId::new(1));
    assert_eq!(kills[0].killer_id, NO_KILLER);
    assert_eq!(storage.persisted_state(EntityId::new(1)).unwrap(), Some(vec![0xAB]));

    // Crashed versions are not recreated.
    for _ in 0..10 {
        server.step();
    }
    assert_eq!(server.simulation().active_count(), 0);
    assert_eq!(storage.crashes().unwrap().len(), 3);
}

#[test]
fn live_stats_first_push_has_no_rate() {
    let storage = storage(&[(1, "grazer")]);
    let mut server = server(&storage);

    step_until(&mut server, "two live stats", |_| storage.live_stats().unwrap().len() >= 2);
    let stats = storage.live_stats().unwrap();

    assert_eq!(stats[0].tick_rate, None);
    assert_eq!(stats[0].frame, 0);
    let rate = stats[1].tick_rate.unwrap();
    assert!(rate > 0.0);
    assert!(stats[1].frame > stats[0].frame);
    assert!(stats[1].recorded_at >= stats[0].recorded_at);
}
