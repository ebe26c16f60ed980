use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::clock::Clock;
use crate::worker::WorkerHandle;

#[derive(Debug, Clone)]
pub struct AdmissionRecord {
    nick: String,
    event_id: u64,
    entered_at: i64,
    worker: Option<WorkerHandle>,
    warning_sent: bool,
    attempts_since_entered: u32,
}

impl AdmissionRecord {
    pub(crate) fn new(
        nick: impl Into<String>,
        event_id: u64,
        entered_at: i64,
        worker: Option<WorkerHandle>,
    ) -> Self {
        Self {
            nick: nick.into(),
            event_id,
            entered_at,
            worker,
            warning_sent: false,
            attempts_since_entered: 0,
        }
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn event_id(&self) -> u64 {
        self.event_id
    }

    /// Milliseconds since the epoch at which the episode was admitted.
    pub fn entered_at(&self) -> i64 {
        self.entered_at
    }

    /// The worker processing the episode. `None` while it is still queued.
    pub fn worker(&self) -> Option<&WorkerHandle> {
        self.worker.as_ref()
    }

    pub fn warning_sent(&self) -> bool {
        self.warning_sent
    }

    pub fn attempts_since_entered(&self) -> u32 {
        self.attempts_since_entered
    }

    /// `warning_sent` never goes back to false within an episode.
    pub fn with_warning_sent(&self) -> Self {
        Self {
            warning_sent: true,
            ..self.clone()
        }
    }

    pub fn with_worker(&self, worker: WorkerHandle) -> Self {
        Self {
            worker: Some(worker),
            ..self.clone()
        }
    }

    pub fn with_attempt(&self) -> Self {
        Self {
            attempts_since_entered: self.attempts_since_entered.saturating_add(1),
            ..self.clone()
        }
    }
}

/// At most one in-flight episode per nick.
#[derive(Clone)]
pub struct AdmissionGate {
    records: Arc<DashMap<String, AdmissionRecord>>,
    clock: Arc<dyn Clock>,
}

impl AdmissionGate {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Admits `event_id` as the episode for `nick` unless one is already running.
    ///
    /// A rejected attempt is counted on the running episode's record.
    pub fn try_enter(&self, nick: &str, event_id: u64) -> bool {
        match self.records.entry(nick.to_string()) {
            Entry::Vacant(vacant) => {
                let record = AdmissionRecord::new(
                    nick,
                    event_id,
                    self.clock.now_millis(),
                    WorkerHandle::current(),
                );
                vacant.insert(record);
                log::info!("Admitted event {} for {}", event_id, nick);
                true
            }
            Entry::Occupied(mut occupied) => {
                let next = occupied.get().with_attempt();
                log::debug!(
                    "{} is already being processed (episode {}, attempt {})",
                    nick,
                    next.event_id,
                    next.attempts_since_entered
                );
                occupied.insert(next);
                false
            }
        }
    }

    /// RAII form of [`Self::try_enter`].
    pub fn enter(&self, nick: &str, event_id: u64) -> Option<AdmissionPermit> {
        self.try_enter(nick, event_id)
            .then(|| AdmissionPermit::adopt(self, nick, event_id))
    }

    pub fn get(&self, nick: &str) -> Option<AdmissionRecord> {
        self.records.get(nick).map(|record| record.clone())
    }

    /// Replaces the record for `nick` with `transform(record)`, but only while
    /// the record still belongs to episode `event_id`.
    pub fn update_if_present<F>(&self, nick: &str, event_id: u64, transform: F) -> bool
    where
        F: FnOnce(&AdmissionRecord) -> AdmissionRecord,
    {
        self.try_update(nick, event_id, |record| Some(transform(record)))
    }

    /// Like [`Self::update_if_present`], but `transform` may decline by
    /// returning `None`. The decision and the write happen under the same
    /// shard lock, so `transform` must not call back into the gate.
    pub fn try_update<F>(&self, nick: &str, event_id: u64, transform: F) -> bool
    where
        F: FnOnce(&AdmissionRecord) -> Option<AdmissionRecord>,
    {
        let Some(mut current) = self.records.get_mut(nick) else {
            return false;
        };
        if current.event_id != event_id {
            return false;
        }
        let Some(next) = transform(current.value()) else {
            return false;
        };
        if next.event_id != event_id || next.nick != current.nick {
            log::error!(
                "Refusing to rewrite episode {} of {} into episode {} of {}",
                event_id,
                nick,
                next.event_id,
                next.nick
            );
            return false;
        }
        *current = next;
        true
    }

    /// Flips `warning_sent` for episode `event_id`. Only the caller that
    /// actually flips it gets `true`.
    pub fn mark_warning_sent(&self, nick: &str, event_id: u64) -> bool {
        self.try_update(nick, event_id, |record| {
            (!record.warning_sent).then(|| record.with_warning_sent())
        })
    }

    /// Records the worker that picked up episode `event_id`.
    pub fn attach_worker(&self, nick: &str, event_id: u64, worker: WorkerHandle) -> bool {
        self.update_if_present(nick, event_id, |record| record.with_worker(worker))
    }

    /// Ends episode `event_id` for `nick`. A newer episode is left alone.
    pub fn release(&self, nick: &str, event_id: u64) -> bool {
        let released = self
            .records
            .remove_if(nick, |_, record| record.event_id == event_id)
            .is_some();
        if released {
            log::info!("Released {} after event {}", nick, event_id);
        } else {
            log::debug!("Event {} no longer owns {}; nothing to release", event_id, nick);
        }
        released
    }

    /// Number of episodes in flight.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Releases its episode when dropped, whichever way processing ends.
pub struct AdmissionPermit {
    gate: AdmissionGate,
    nick: String,
    event_id: u64,
    armed: bool,
}

impl AdmissionPermit {
    /// Takes over responsibility for releasing an episode admitted elsewhere.
    pub fn adopt(gate: &AdmissionGate, nick: &str, event_id: u64) -> Self {
        Self {
            gate: gate.clone(),
            nick: nick.to_string(),
            event_id,
            armed: true,
        }
    }

    /// Gives up the permit without releasing. Whoever processes the episode
    /// from here on adopts it.
    pub fn hand_off(mut self) {
        self.armed = false;
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn event_id(&self) -> u64 {
        self.event_id
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if self.armed {
            self.gate.release(&self.nick, self.event_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ManualClock;
    use std::sync::Barrier;

    fn gate_at(secs: i64) -> (AdmissionGate, ManualClock) {
        let clock = ManualClock::at(secs * 1000);
        (AdmissionGate::new(Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_only_first_enter_succeeds_and_others_count_attempts() {
        let (gate, _) = gate_at(0);
        assert!(gate.try_enter("alice", 1));
        for attempt in 1..=5u32 {
            assert!(!gate.try_enter("alice", 1 + attempt as u64));
            let record = gate.get("alice").unwrap();
            assert_eq!(record.event_id(), 1);
            assert_eq!(record.attempts_since_entered(), attempt);
        }
    }

    #[test]
    fn test_new_record_starts_fresh() {
        let (gate, _) = gate_at(12);
        assert!(gate.try_enter("alice", 3));
        let record = gate.get("alice").unwrap();
        assert_eq!(record.nick(), "alice");
        assert_eq!(record.entered_at(), 12_000);
        assert!(record.worker().is_none());
        assert!(!record.warning_sent());
        assert_eq!(record.attempts_since_entered(), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let (gate, _) = gate_at(0);
        assert!(gate.try_enter("alice", 1));
        assert!(gate.try_enter("bob", 2));
        assert_eq!(gate.len(), 2);
        assert_eq!(gate.get("bob").unwrap().attempts_since_entered(), 0);
    }

    #[test]
    fn test_get_on_unknown_key_is_none() {
        let (gate, _) = gate_at(0);
        assert!(gate.get("nobody").is_none());
        assert!(gate.is_empty());
    }

    #[test]
    fn test_release_allows_next_episode() {
        let (gate, _) = gate_at(0);
        assert!(gate.try_enter("bob", 1));
        assert!(gate.release("bob", 1));
        assert!(gate.get("bob").is_none());
        assert!(gate.try_enter("bob", 2));
        assert_eq!(gate.get("bob").unwrap().attempts_since_entered(), 0);
    }

    #[test]
    fn test_stale_release_does_not_remove_newer_episode() {
        let (gate, _) = gate_at(0);
        assert!(gate.try_enter("bob", 1));
        assert!(gate.release("bob", 1));
        assert!(gate.try_enter("bob", 2));
        assert!(!gate.release("bob", 1));
        assert_eq!(gate.get("bob").unwrap().event_id(), 2);
    }

    #[test]
    fn test_update_is_guarded_by_event_id() {
        let (gate, _) = gate_at(0);
        assert!(gate.try_enter("alice", 1));
        assert!(gate.release("alice", 1));
        assert!(gate.try_enter("alice", 2));

        assert!(!gate.update_if_present("alice", 1, |r| r.with_warning_sent()));
        assert!(!gate.get("alice").unwrap().warning_sent());

        assert!(gate.update_if_present("alice", 2, |r| r.with_warning_sent()));
        assert!(gate.get("alice").unwrap().warning_sent());
    }

    #[test]
    fn test_update_on_missing_key_is_noop() {
        let (gate, _) = gate_at(0);
        assert!(!gate.update_if_present("ghost", 1, |r| r.with_warning_sent()));
        assert!(gate.get("ghost").is_none());
    }

    #[test]
    fn test_update_cannot_change_episode_identity() {
        let (gate, _) = gate_at(0);
        assert!(gate.try_enter("alice", 1));
        let foreign = AdmissionRecord::new("alice", 99, 0, None);
        assert!(!gate.update_if_present("alice", 1, |_| foreign.clone()));
        assert_eq!(gate.get("alice").unwrap().event_id(), 1);
    }

    #[test]
    fn test_warning_sent_survives_later_attempts() {
        let (gate, _) = gate_at(0);
        assert!(gate.try_enter("alice", 1));
        assert!(gate.update_if_present("alice", 1, |r| r.with_warning_sent()));
        assert!(!gate.try_enter("alice", 2));
        let record = gate.get("alice").unwrap();
        assert!(record.warning_sent());
        assert_eq!(record.attempts_since_entered(), 1);
    }

    #[test]
    fn test_attach_worker_sets_handle_for_matching_episode() {
        let (gate, _) = gate_at(0);
        assert!(gate.try_enter("alice", 1));
        let worker = WorkerHandle::new("w");
        assert!(!gate.attach_worker("alice", 7, worker.clone()));
        assert!(gate.get("alice").unwrap().worker().is_none());
        assert!(gate.attach_worker("alice", 1, worker.clone()));
        assert!(gate.get("alice").unwrap().worker().unwrap().is_same(&worker));
    }

    #[tokio::test]
    async fn test_try_enter_captures_worker_scope() {
        let (gate, _) = gate_at(0);
        let worker = WorkerHandle::new("ingress");
        let admitted = worker.scope(async { gate.try_enter("carol", 1) }).await;
        assert!(admitted);
        assert!(gate.get("carol").unwrap().worker().unwrap().is_same(&worker));
    }

    #[test]
    fn test_concurrent_enter_admits_exactly_one() {
        let (gate, _) = gate_at(0);
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let gate = gate.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    gate.try_enter("alice", i as u64 + 1)
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(
            gate.get("alice").unwrap().attempts_since_entered(),
            threads as u32 - 1
        );
    }

    #[test]
    fn test_mark_warning_sent_only_flips_once() {
        let (gate, _) = gate_at(0);
        assert!(gate.try_enter("alice", 1));
        assert!(!gate.mark_warning_sent("alice", 2));
        assert!(gate.mark_warning_sent("alice", 1));
        assert!(!gate.mark_warning_sent("alice", 1));
        assert!(gate.get("alice").unwrap().warning_sent());
    }

    #[test]
    fn test_declined_update_leaves_record_alone() {
        let (gate, _) = gate_at(0);
        assert!(gate.try_enter("alice", 1));
        assert!(!gate.try_update("alice", 1, |_| None));
        assert_eq!(gate.get("alice").unwrap().attempts_since_entered(), 0);
        assert!(gate.try_update("alice", 1, |r| Some(r.with_attempt())));
        assert_eq!(gate.get("alice").unwrap().attempts_since_entered(), 1);
    }

    #[test]
    fn test_concurrent_warning_updates_only_one_wins() {
        let (gate, _) = gate_at(0);
        assert!(gate.try_enter("alice", 1));
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let gate = gate.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    gate.mark_warning_sent("alice", 1)
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(gate.get("alice").unwrap().warning_sent());
    }

    #[test]
    fn test_permit_releases_on_drop() {
        let (gate, _) = gate_at(0);
        {
            let permit = gate.enter("dave", 5).unwrap();
            assert_eq!(permit.nick(), "dave");
            assert_eq!(permit.event_id(), 5);
            assert!(gate.enter("dave", 6).is_none());
        }
        assert!(gate.get("dave").is_none());
        assert!(gate.enter("dave", 7).is_some());
    }

    #[test]
    fn test_handed_off_permit_keeps_episode() {
        let (gate, _) = gate_at(0);
        gate.enter("dave", 5).unwrap().hand_off();
        assert_eq!(gate.get("dave").unwrap().event_id(), 5);
        drop(AdmissionPermit::adopt(&gate, "dave", 5));
        assert!(gate.get("dave").is_none());
    }

    #[tokio::test]
    async fn test_permit_releases_when_processing_panics() {
        let (gate, _) = gate_at(0);
        let permit = gate.enter("erin", 1).unwrap();
        let result = tokio::spawn(async move {
            let _permit = permit;
            panic!("command blew up");
        })
        .await;
        assert!(result.is_err());
        assert!(gate.get("erin").is_none());
    }
}
