//! Periodic alignment of the simulated roster with storage.
//!
//! One pass diffs the external active-id list `E` against the locally
//! active ids `L`: ids in `E \ L` are created, ids in `L \ E` eliminate
//! themselves, ids in both are left alone. The pending commands are then
//! resolved, each to a terminal state within the same pass.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::command::{CommandKind, ExternalCommand, REASON_COMMAND_UNKNOWN, REASON_KILLED, REASON_TARGET_UNKNOWN};
use crate::entity::{BuildStatus, EntityId, Lifecycle, VersionId};
use crate::error::{SpawnError, StorageError};
use crate::schedule::PeriodicJob;
use crate::simulation::Roster;
use crate::storage::Storage;

/// Result of trying to create one externally active entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Creation was requested; startup is pending.
    Created(EntityId),
    /// The record's build status does not allow creation.
    NotBuilt(BuildStatus),
    /// Storage has no record for the id.
    NoRecord,
    /// The entity failed to initialize and was reported as crashed.
    InitFailed { version_id: VersionId, message: String },
    /// Startup could not be scheduled.
    Rejected(String),
}

impl CreateOutcome {
    /// True if creation was requested.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Creates the entity `id` from its stored build record.
///
/// Records whose build status is not successful are skipped without error.
/// An initialization failure is reported to storage as a crash of the
/// record's version.
///
/// # Errors
///
/// Returns the storage error if the build record could not be fetched.
pub fn create_entity<R, S>(roster: &mut R, storage: &S, id: EntityId) -> Result<CreateOutcome, StorageError>
where
    R: Roster + ?Sized,
    S: Storage + ?Sized,
{
    let Some(record) = storage.entity_build_record(id)? else {
        debug!("entity {id} has no build record");
        return Ok(CreateOutcome::NoRecord);
    };

    if !record.build_status.is_successful() {
        return Ok(CreateOutcome::NotBuilt(record.build_status));
    }

    match roster.new_entity(record) {
        Ok(_) => Ok(CreateOutcome::Created(id)),
        Err(SpawnError::Init(e)) => {
            warn!("{e}");
            if let Err(se) = storage.mark_crashed(e.version_id, &e.message) {
                error!("failed to mark version {} crashed: {se}", e.version_id);
            }
            Ok(CreateOutcome::InitFailed {
                version_id: e.version_id,
                message: e.message,
            })
        }
        Err(SpawnError::Lifecycle(e)) => {
            warn!("could not create entity {id}: {e}");
            Ok(CreateOutcome::Rejected(e.to_string()))
        }
    }
}

/// Counters of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Creation requests issued.
    pub created: usize,
    /// Externally active ids that were not created (not built, no record,
    /// init failure or rejected).
    pub skipped: usize,
    /// Self-eliminations for ids no longer externally active.
    pub retired: usize,
    /// Commands resolved successfully.
    pub commands_succeeded: usize,
    /// Commands resolved as failed.
    pub commands_failed: usize,
    /// Storage calls that failed during the pass.
    pub storage_errors: usize,
}

/// The periodic reconciliation job.
#[derive(Debug, Clone)]
pub struct ReconciliationJob {
    schedule: PeriodicJob,
    passes: u64,
}

impl ReconciliationJob {
    /// Creates a job first due at `start`.
    #[must_use]
    pub const fn new(interval: Duration, start: Instant) -> Self {
        Self {
            schedule: PeriodicJob::new("reconcile", interval, start),
            passes: 0,
        }
    }

    /// Number of passes run so far.
    #[must_use]
    pub const fn passes(&self) -> u64 {
        self.passes
    }

    /// Next due time.
    #[must_use]
    pub const fn next_due(&self) -> Instant {
        self.schedule.next_due()
    }

    /// Runs a pass if one is due at `now`.
    pub fn poll<R, S>(&mut self, now: Instant, roster: &mut R, storage: &S, shutting_down: bool) -> Option<ReconcileReport>
    where
        R: Roster + ?Sized,
        S: Storage + ?Sized,
    {
        if !self.schedule.poll(now) {
            return None;
        }
        Some(self.run(roster, storage, shutting_down))
    }

    /// Runs one pass unconditionally.
    ///
    /// While `shutting_down` the external list is treated as empty: storage
    /// is not asked for active ids, nothing is created, and every local
    /// entity eliminates itself. Commands are still resolved.
    ///
    /// Storage failures are logged and the pass continues. If the active-id
    /// list cannot be fetched the roster diff is skipped for this pass.
    pub fn run<R, S>(&mut self, roster: &mut R, storage: &S, shutting_down: bool) -> ReconcileReport
    where
        R: Roster + ?Sized,
        S: Storage + ?Sized,
    {
        self.passes += 1;
        let mut report = ReconcileReport::default();

        let external = if shutting_down {
            Some(Vec::new())
        } else {
            match storage.active_external_ids() {
                Ok(ids) => Some(ids),
                Err(e) => {
                    error!("failed to fetch active ids: {e}");
                    report.storage_errors += 1;
                    None
                }
            }
        };

        if let Some(external) = external {
            sync_roster(roster, storage, &external, &mut report);
        }

        match storage.pending_commands() {
            Ok(commands) => {
                for command in &commands {
                    resolve_command(roster, storage, command, &mut report);
                }
            }
            Err(e) => {
                error!("failed to fetch pending commands: {e}");
                report.storage_errors += 1;
            }
        }

        debug!("reconciliation pass {}: {report:?}", self.passes);
        report
    }
}

fn sync_roster<R, S>(roster: &mut R, storage: &S, external: &[EntityId], report: &mut ReconcileReport)
where
    R: Roster + ?Sized,
    S: Storage + ?Sized,
{
    for &id in external {
        if roster.is_external_id_active(id) {
            continue;
        }
        match create_entity(roster, storage, id) {
            Ok(outcome) if outcome.is_created() => report.created += 1,
            Ok(_) => report.skipped += 1,
            Err(e) => {
                error!("failed to fetch build record of entity {id}: {e}");
                report.storage_errors += 1;
            }
        }
    }

    let wanted: HashSet<EntityId> = external.iter().copied().collect();
    for entity in roster.active_entities() {
        if !wanted.contains(&entity.external_id()) {
            roster.kill_entity(&entity, Some(&entity));
            report.retired += 1;
        }
    }
}

fn resolve_command<R, S>(roster: &mut R, storage: &S, command: &ExternalCommand, report: &mut ReconcileReport)
where
    R: Roster + ?Sized,
    S: Storage + ?Sized,
{
    let (success, reason) = match &command.kind {
        CommandKind::Kill => match roster.entity_by_external_id(command.target) {
            Some(target) => {
                roster.kill_entity(&target, Some(&target));
                info!("command {}: killed entity {}", command.id, command.target);
                (true, REASON_KILLED)
            }
            None => (false, REASON_TARGET_UNKNOWN),
        },
        CommandKind::Unknown(kind) => {
            warn!("command {} has unknown kind '{kind}'", command.id);
            (false, REASON_COMMAND_UNKNOWN)
        }
    };

    if success {
        report.commands_succeeded += 1;
    } else {
        report.commands_failed += 1;
    }

    if let Err(e) = storage.complete_command(command.id, success, reason) {
        error!("failed to complete command {}: {e}", command.id);
        report.storage_errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::command::CommandId;
    use crate::entity::{BuildRecord, EntityStats, Frame, SimEntity};
    use crate::error::{InitError, TaskError};
    use crate::storage::{InMemoryStorage, KillReport, LiveStats};

    struct Dummy(EntityId);

    impl Lifecycle for Dummy {
        fn external_id(&self) -> EntityId {
            self.0
        }
        fn startup(&self) -> Result<(), TaskError> {
            Ok(())
        }
        fn shutdown(&self) -> Result<(), TaskError> {
            Ok(())
        }
    }

    impl SimEntity for Dummy {
        fn version_id(&self) -> VersionId {
            VersionId::new(self.0.get() * 10)
        }
        fn start_frame(&self) -> Frame {
            0
        }
        fn stats(&self) -> EntityStats {
            EntityStats::default()
        }
        fn persistent_state(&self) -> Vec<u8> {
            Vec::new()
        }
    }

    /// Roster that admits instantly and records every call.
    #[derive(Default)]
    struct FakeRoster {
        active: BTreeMap<EntityId, Arc<Dummy>>,
        created: Vec<EntityId>,
        kills: Vec<(EntityId, Option<EntityId>)>,
        failing: HashSet<EntityId>,
    }

    impl FakeRoster {
        fn with_active(ids: &[i64]) -> Self {
            let mut roster = Self::default();
            for &id in ids {
                let id = EntityId::new(id);
                roster.active.insert(id, Arc::new(Dummy(id)));
            }
            roster
        }
    }

    impl Roster for FakeRoster {
        type Entity = Dummy;

        fn new_entity(&mut self, record: BuildRecord) -> Result<Arc<Dummy>, SpawnError> {
            if self.failing.contains(&record.id) {
                return Err(InitError {
                    id: record.id,
                    version_id: record.version_id,
                    message: "bad init".to_string(),
                }
                .into());
            }
            self.created.push(record.id);
            let entity = Arc::new(Dummy(record.id));
            self.active.insert(record.id, Arc::clone(&entity));
            Ok(entity)
        }

        fn kill_entity(&mut self, victim: &Arc<Dummy>, killer: Option<&Arc<Dummy>>) {
            self.active.remove(&victim.external_id());
            self.kills.push((victim.external_id(), killer.map(|k| k.external_id())));
        }

        fn active_entities(&self) -> Vec<Arc<Dummy>> {
            self.active.values().cloned().collect()
        }

        fn is_external_id_active(&self, id: EntityId) -> bool {
            self.active.contains_key(&id)
        }

        fn entity_by_external_id(&self, id: EntityId) -> Option<Arc<Dummy>> {
            self.active.get(&id).cloned()
        }
    }

    fn record(id: i64, status: BuildStatus) -> BuildRecord {
        BuildRecord {
            id: EntityId::new(id),
            version_id: VersionId::new(id * 10),
            build_status: status,
            program: String::new(),
            persistent_state: Vec::new(),
        }
    }

    fn storage_with(records: &[(i64, BuildStatus)], active: &[i64]) -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        for (id, status) in records {
            storage.upsert_record(record(*id, status.clone())).unwrap();
        }
        for &id in active {
            storage.activate(EntityId::new(id)).unwrap();
        }
        storage
    }

    fn job() -> ReconciliationJob {
        ReconciliationJob::new(Duration::from_secs(1), Instant::now())
    }

    #[test]
    fn diff_creates_missing_and_retires_extra() {
        // E = {1, 2, 3}, L = {2, 3, 4}
        let storage = storage_with(
            &[(1, BuildStatus::Successful), (2, BuildStatus::Successful), (3, BuildStatus::Successful)],
            &[1, 2, 3],
        );
        let mut roster = FakeRoster::with_active(&[2, 3, 4]);

        let report = job().run(&mut roster, &storage, false);

        assert_eq!(roster.created, vec![EntityId::new(1)]);
        assert_eq!(roster.kills, vec![(EntityId::new(4), Some(EntityId::new(4)))]);
        assert_eq!(report.created, 1);
        assert_eq!(report.retired, 1);
        assert_eq!(report.storage_errors, 0);
    }

    #[test]
    fn unbuilt_records_are_skipped_silently() {
        let storage = storage_with(&[(1, BuildStatus::NotCompiled), (2, BuildStatus::Failed)], &[1, 2]);
        let mut roster = FakeRoster::default();

        let report = job().run(&mut roster, &storage, false);

        assert!(roster.created.is_empty());
        assert_eq!(report.skipped, 2);
        assert!(storage.crashes().unwrap().is_empty());
    }

    #[test]
    fn init_failure_marks_version_crashed_and_continues() {
        let storage = storage_with(&[(1, BuildStatus::Successful), (2, BuildStatus::Successful)], &[1, 2]);
        let mut roster = FakeRoster::default();
        roster.failing.insert(EntityId::new(1));

        let report = job().run(&mut roster, &storage, false);

        assert_eq!(roster.created, vec![EntityId::new(2)]);
        assert_eq!(report.skipped, 1);
        let crashes = storage.crashes().unwrap();
        assert_eq!(crashes.len(), 1);
        assert_eq!(crashes[0].version_id, VersionId::new(10));
        assert_eq!(crashes[0].message, "bad init");
    }

    #[test]
    fn missing_record_is_not_created() {
        let storage = storage_with(&[], &[9]);
        let mut roster = FakeRoster::default();
        let outcome = create_entity(&mut roster, &storage, EntityId::new(9)).unwrap();
        assert_eq!(outcome, CreateOutcome::NoRecord);
    }

    #[test]
    fn shutting_down_retires_everything_and_creates_nothing() {
        let storage = storage_with(&[(1, BuildStatus::Successful)], &[1, 2]);
        let mut roster = FakeRoster::with_active(&[2, 3]);

        let report = job().run(&mut roster, &storage, true);

        assert!(roster.created.is_empty());
        assert_eq!(report.retired, 2);
        assert!(roster.active.is_empty());
    }

    #[test]
    fn kill_command_on_active_target_succeeds() {
        let storage = storage_with(&[(7, BuildStatus::Successful)], &[7]);
        let cmd = storage.push_command(CommandKind::Kill, EntityId::new(7)).unwrap();
        let mut roster = FakeRoster::with_active(&[7]);

        let report = job().run(&mut roster, &storage, false);

        assert_eq!(roster.kills, vec![(EntityId::new(7), Some(EntityId::new(7)))]);
        assert_eq!(report.commands_succeeded, 1);
        let done = storage.command_completion(cmd).unwrap().unwrap();
        assert!(done.success);
        assert_eq!(done.reason, REASON_KILLED);
    }

    #[test]
    fn kill_command_on_unknown_target_fails() {
        let storage = InMemoryStorage::new();
        let cmd = storage.push_command(CommandKind::Kill, EntityId::new(42)).unwrap();
        let mut roster = FakeRoster::default();

        let report = job().run(&mut roster, &storage, false);

        assert_eq!(report.commands_failed, 1);
        let done = storage.command_completion(cmd).unwrap().unwrap();
        assert!(!done.success);
        assert_eq!(done.reason, "target not known / not active");
        assert!(storage.pending_commands().unwrap().is_empty());
    }

    #[test]
    fn unknown_command_kind_fails() {
        let storage = storage_with(&[(1, BuildStatus::Successful)], &[1]);
        let cmd = storage.push_command(CommandKind::from("respawn"), EntityId::new(1)).unwrap();
        let mut roster = FakeRoster::with_active(&[1]);

        job().run(&mut roster, &storage, false);

        let done = storage.command_completion(cmd).unwrap().unwrap();
        assert!(!done.success);
        assert_eq!(done.reason, REASON_COMMAND_UNKNOWN);
        assert!(roster.kills.is_empty());
    }

    /// Storage whose active-id query always fails.
    struct NoActiveIds(InMemoryStorage);

    impl Storage for NoActiveIds {
        fn active_external_ids(&self) -> Result<Vec<EntityId>, StorageError> {
            Err(StorageError::ConnectionError("active ids unavailable".to_string()))
        }
        fn entity_build_record(&self, id: EntityId) -> Result<Option<BuildRecord>, StorageError> {
            self.0.entity_build_record(id)
        }
        fn pending_commands(&self) -> Result<Vec<ExternalCommand>, StorageError> {
            self.0.pending_commands()
        }
        fn complete_command(&self, id: CommandId, success: bool, reason: &str) -> Result<(), StorageError> {
            self.0.complete_command(id, success, reason)
        }
        fn report_kill(&self, report: &KillReport) -> Result<(), StorageError> {
            self.0.report_kill(report)
        }
        fn persist_entity_state(&self, id: EntityId, blob: &[u8]) -> Result<(), StorageError> {
            self.0.persist_entity_state(id, blob)
        }
        fn mark_crashed(&self, version_id: VersionId, message: &str) -> Result<(), StorageError> {
            self.0.mark_crashed(version_id, message)
        }
        fn push_live_stats(&self, stats: &LiveStats) -> Result<(), StorageError> {
            self.0.push_live_stats(stats)
        }
    }

    #[test]
    fn failed_active_id_fetch_skips_diff_but_resolves_commands() {
        let inner = InMemoryStorage::new();
        let odd = inner.push_command(CommandKind::from("respawn"), EntityId::new(2)).unwrap();
        let storage = NoActiveIds(inner);
        let mut roster = FakeRoster::with_active(&[2, 3]);

        let report = job().run(&mut roster, &storage, false);

        assert_eq!(report.retired, 0);
        assert_eq!(report.created, 0);
        assert_eq!(report.storage_errors, 1);
        assert!(roster.kills.is_empty());
        assert_eq!(roster.active.len(), 2);
        let done = storage.0.command_completion(odd).unwrap().unwrap();
        assert!(!done.success);
        assert_eq!(done.reason, REASON_COMMAND_UNKNOWN);
    }

    #[test]
    fn poll_runs_only_when_due() {
        let start = Instant::now();
        let storage = InMemoryStorage::new();
        let mut roster = FakeRoster::default();
        let mut job = ReconciliationJob::new(Duration::from_secs(1), start);

        assert!(job.poll(start, &mut roster, &storage, false).is_some());
        assert!(job.poll(start + Duration::from_millis(500), &mut roster, &storage, false).is_none());
        assert!(job.poll(start + Duration::from_secs(1), &mut roster, &storage, false).is_some());
        assert_eq!(job.passes(), 2);
    }
}
