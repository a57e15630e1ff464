//! Per-group scheduling of broadcasts.
//!
//! Each group gets its own lane: a [`RequestQueue`] keyed by event id, so at
//! most one broadcast per group is in flight. The newest request pre-empts:
//! scheduling a broadcast aborts every request the lane issued before it.

use std::convert::Infallible;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::JingleResult;
use crate::events::{EventEmitter, PlaybackEvent};
use crate::protocol::{EventId, GroupId};
use crate::queue::{DuplicateTaskId, RequestQueue, TaskHandle};
use crate::runtime::TokioSpawner;
use crate::services::coordinator::{
    BroadcastCoordinator, BroadcastOutcome, BroadcastRequest, StopOutcome,
};
use crate::utils::now_millis;

/// Resolves with the outcome of a scheduled broadcast.
pub type BroadcastHandle = TaskHandle<BroadcastOutcome, Infallible>;

#[derive(Clone)]
struct Lane {
    queue: RequestQueue<BroadcastOutcome, Infallible>,
    /// Requests pushed to `queue` that have not finished yet.
    issued: Arc<Mutex<Vec<EventId>>>,
}

impl Lane {
    /// Aborts every issued request. Returns how many were signalled.
    fn abort_all(&self) -> usize {
        let issued: Vec<EventId> = self.issued.lock().drain(..).collect();
        issued
            .iter()
            .filter(|id| self.queue.abort(&id.to_string()))
            .count()
    }
}

/// Runs broadcasts one group at a time, newest first.
pub struct PlaybackScheduler {
    coordinator: Arc<BroadcastCoordinator>,
    emitter: Arc<dyn EventEmitter>,
    lanes: DashMap<GroupId, Lane>,
    spawner: TokioSpawner,
}

impl PlaybackScheduler {
    pub fn new(
        coordinator: Arc<BroadcastCoordinator>,
        emitter: Arc<dyn EventEmitter>,
        spawner: TokioSpawner,
    ) -> Self {
        Self {
            coordinator,
            emitter,
            lanes: DashMap::new(),
            spawner,
        }
    }

    fn lane(&self, group: &GroupId) -> Lane {
        self.lanes
            .entry(group.clone())
            .or_insert_with(|| Lane {
                queue: RequestQueue::with_spawner(self.spawner.clone()),
                issued: Arc::new(Mutex::new(Vec::new())),
            })
            .clone()
    }

    /// Queues a broadcast in its group's lane, superseding earlier ones.
    ///
    /// # Errors
    ///
    /// Returns [`JingleError::DuplicateRequest`](crate::JingleError) if a
    /// request with the same event id is already waiting.
    pub fn schedule(&self, request: BroadcastRequest) -> JingleResult<BroadcastHandle> {
        let event_id = request.event_id;
        let group = request.group.clone();
        let lane = self.lane(&group);
        let key = event_id.to_string();
        if lane.queue.has(&key) {
            return Err(DuplicateTaskId(key).into());
        }

        let superseded = lane.abort_all();
        if superseded > 0 {
            log::info!(
                "[Scheduler] {} supersedes {} request(s) in {}",
                event_id,
                superseded,
                group
            );
        }

        // Recorded before the push so a task finishing at once still clears it
        lane.issued.lock().push(event_id);
        let coordinator = Arc::clone(&self.coordinator);
        let issued = Arc::clone(&lane.issued);
        let pushed = lane.queue.push(key, move |cancel| async move {
            let outcome = coordinator.broadcast(request, &cancel).await;
            issued.lock().retain(|id| *id != event_id);
            Ok(outcome)
        });
        let handle = match pushed {
            Ok(handle) => handle,
            Err(e) => {
                lane.issued.lock().retain(|id| *id != event_id);
                return Err(e.into());
            }
        };

        self.emitter.emit_playback(PlaybackEvent::Queued {
            event_id,
            group,
            timestamp: now_millis(),
        });
        Ok(handle)
    }

    /// Cancels one request of `group`, queued or running.
    ///
    /// Returns `false` if the group has no such request.
    pub fn cancel(&self, group: &GroupId, event_id: &EventId) -> bool {
        let Some(lane) = self.lanes.get(group).map(|lane| lane.clone()) else {
            return false;
        };
        let cancelled = lane.queue.abort(&event_id.to_string());
        if cancelled {
            lane.issued.lock().retain(|id| id != event_id);
            log::info!("[Scheduler] Cancelled {} in {}", event_id, group);
        }
        cancelled
    }

    /// Aborts every request of `group` and stops its endpoints.
    pub async fn stop(&self, group: &GroupId) -> StopOutcome {
        if let Some(lane) = self.lanes.get(group).map(|lane| lane.clone()) {
            let aborted = lane.abort_all();
            if aborted > 0 {
                log::info!("[Scheduler] Stop aborted {} request(s) in {}", aborted, group);
            }
        }
        self.coordinator.stop(group).await
    }

    /// Drops all waiting requests and signals the running ones.
    pub fn shutdown(&self) {
        let mut dropped = 0;
        for lane in self.lanes.iter() {
            dropped += lane.queue.clear();
            lane.abort_all();
        }
        log::info!(
            "[Scheduler] Shut down {} lane(s), dropped {} waiting request(s)",
            self.lanes.len(),
            dropped
        );
    }

    /// Returns `true` if `group` has a broadcast in flight.
    #[must_use]
    pub fn is_busy(&self, group: &GroupId) -> bool {
        self.lanes
            .get(group)
            .is_some_and(|lane| lane.queue.is_running())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JingleError;
    use crate::events::emitter::tests::RecordingEventEmitter;
    use crate::queue::QueueError;
    use crate::services::coordinator::tests::{Script, ScriptedTransport};
    use crate::services::coordinator::BroadcastReport;
    use crate::state::BroadcastTimeouts;
    use bytes::Bytes;
    use std::time::Duration;

    fn group() -> GroupId {
        GroupId::parse("QUEUE").unwrap()
    }

    fn request() -> BroadcastRequest {
        BroadcastRequest {
            event_id: EventId::new(),
            group: group(),
            pcm: Bytes::from(vec![0u8; 96_000]),
        }
    }

    fn scheduler(script: Script) -> (PlaybackScheduler, Arc<RecordingEventEmitter>) {
        scheduler_for(ScriptedTransport::with(&[("a", script)]))
    }

    fn scheduler_for(
        transport: ScriptedTransport,
    ) -> (PlaybackScheduler, Arc<RecordingEventEmitter>) {
        let transport = Arc::new(transport);
        let emitter = Arc::new(RecordingEventEmitter::default());
        let coordinator = Arc::new(BroadcastCoordinator::new(
            transport,
            emitter.clone(),
            BroadcastTimeouts::default(),
        ));
        let scheduler =
            PlaybackScheduler::new(coordinator, emitter.clone(), TokioSpawner::current());
        (scheduler, emitter)
    }

    /// Endpoint that never answers PREPARE, keeping a broadcast busy.
    fn stalling() -> Script {
        Script {
            prepare: None,
            ..Script::cooperative()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_broadcast_completes() {
        let (scheduler, emitter) = scheduler(Script::cooperative());
        let request = request();
        let event_id = request.event_id;

        let outcome = scheduler.schedule(request).unwrap().await.unwrap();

        assert!(matches!(
            outcome,
            BroadcastOutcome::Completed(BroadcastReport { played: 1, .. })
        ));
        let events = emitter.playback.lock();
        assert!(matches!(
            events.first(),
            Some(PlaybackEvent::Queued { event_id: id, .. }) if *id == event_id
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn instantly_finished_requests_leave_nothing_issued() {
        // No endpoints, so each broadcast resolves on its first poll
        let (scheduler, _) = scheduler_for(ScriptedTransport::with(&[]));

        for _ in 0..50 {
            let outcome = scheduler.schedule(request()).unwrap().await.unwrap();
            assert!(matches!(outcome, BroadcastOutcome::NoEndpoints));
            assert!(scheduler.lane(&group()).issued.lock().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn newer_request_preempts_running_and_waiting_ones() {
        let (scheduler, _) = scheduler(stalling());

        let first = scheduler.schedule(request()).unwrap();
        tokio::task::yield_now().await;
        let second = scheduler.schedule(request()).unwrap();
        let third = scheduler.schedule(request()).unwrap();

        let first = first.await.unwrap();
        assert!(matches!(
            first,
            BroadcastOutcome::Completed(BroadcastReport {
                interrupted: true,
                ..
            })
        ));
        assert!(matches!(second.await, Err(QueueError::Cancelled)));
        assert!(matches!(
            third.await.unwrap(),
            BroadcastOutcome::Completed(BroadcastReport {
                interrupted: false,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_event_id_is_rejected_without_preempting() {
        let (scheduler, _) = scheduler(stalling());
        let running = request();
        let running_id = running.event_id;
        let _running = scheduler.schedule(running).unwrap();
        tokio::task::yield_now().await;

        let lane = scheduler.lane(&group());
        let waiting = EventId::new();
        let _queued = lane
            .queue
            .push(waiting.to_string(), |_| async { Ok(BroadcastOutcome::NoEndpoints) })
            .unwrap();

        let duplicate = BroadcastRequest {
            event_id: waiting,
            ..request()
        };
        assert!(matches!(
            scheduler.schedule(duplicate),
            Err(JingleError::DuplicateRequest(_))
        ));
        assert!(lane.queue.has(&waiting.to_string()));
        assert_eq!(*lane.issued.lock(), vec![running_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_targets_one_request() {
        let (scheduler, _) = scheduler(stalling());
        let request = request();
        let event_id = request.event_id;

        let handle = scheduler.schedule(request).unwrap();
        tokio::task::yield_now().await;

        assert!(!scheduler.cancel(&group(), &EventId::new()));
        assert!(scheduler.cancel(&group(), &event_id));
        assert!(matches!(
            handle.await.unwrap(),
            BroadcastOutcome::Completed(BroadcastReport {
                interrupted: true,
                ..
            })
        ));
        assert!(!scheduler.cancel(&GroupId::parse("OTHER").unwrap(), &event_id));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_broadcast_and_stops_endpoints() {
        let (scheduler, emitter) = scheduler(stalling());

        let handle = scheduler.schedule(request()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scheduler.is_busy(&group()));

        let stopped = scheduler.stop(&group()).await;

        assert!(matches!(stopped, StopOutcome::Completed(report) if report.confirmed == 1));
        assert!(matches!(
            handle.await.unwrap(),
            BroadcastOutcome::Completed(BroadcastReport {
                interrupted: true,
                ..
            })
        ));
        assert!(emitter
            .playback
            .lock()
            .iter()
            .any(|event| matches!(event, PlaybackEvent::Stopped { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_waiting_requests() {
        let (scheduler, _) = scheduler(stalling());
        let running = scheduler.schedule(request()).unwrap();
        tokio::task::yield_now().await;
        let lane = scheduler.lane(&group());
        let waiting = lane
            .queue
            .push("late", |_| async { Ok(BroadcastOutcome::NoEndpoints) })
            .unwrap();

        scheduler.shutdown();

        assert!(matches!(waiting.await, Err(QueueError::Dropped)));
        assert!(matches!(
            running.await.unwrap(),
            BroadcastOutcome::Completed(BroadcastReport {
                interrupted: true,
                ..
            })
        ));
    }
}
