//! Timer Broadcast Service
//!
//! One countdown task per active poll. Each tick reloads the poll, broadcasts
//! the remaining seconds to the poll's channel and, once time is up, ends the
//! poll and broadcasts the final results. A poll that a read already expired
//! is announced by the next tick instead. A task never outlives its poll's
//! active state: it stops on a non-active poll, on expiry, on `stop`, and on
//! the first error.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::metrics::PollMetrics;
use crate::polls::{PollError, PollLifecycle, PollResult, PollResults, PollStatus, VoteAggregator};
use crate::server::ws::gateway::{Channel, Gateway};
use crate::server::ws::protocol::ServerEvent;

/// Default countdown period
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest accepted period; `interval_at` rejects zero
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Countdown broadcast with this many seconds left
    Counting(i64),
    /// Time ran out; the poll was ended with these results
    Expired(PollResults),
    /// Poll is gone or no longer active
    Stopped,
}

#[derive(Debug)]
struct TimerTask {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug)]
pub struct TimerService {
    lifecycle: PollLifecycle,
    votes: VoteAggregator,
    gateway: Arc<Gateway>,
    metrics: Arc<PollMetrics>,
    period: Duration,
    tasks: Mutex<HashMap<String, TimerTask>>,
    next_generation: AtomicU64,
}

impl TimerService {
    pub fn new(
        lifecycle: PollLifecycle,
        votes: VoteAggregator,
        gateway: Arc<Gateway>,
        metrics: Arc<PollMetrics>,
        period: Duration,
    ) -> Self {
        Self {
            lifecycle,
            votes,
            gateway,
            metrics,
            period: period.max(MIN_TICK_INTERVAL),
            tasks: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Start the countdown for a poll.
    ///
    /// Returns false if one is already running.
    pub fn start(self: &Arc<Self>, poll_id: &str) -> bool {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(poll_id) {
            debug!(poll_id, "Countdown already running");
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        tasks.insert(
            poll_id.to_string(),
            TimerTask {
                generation,
                token: token.clone(),
            },
        );
        self.metrics.timer_tasks_active.set(tasks.len() as f64);

        let service = Arc::clone(self);
        let poll_id = poll_id.to_string();
        tokio::spawn(async move { service.run(poll_id, generation, token).await });
        true
    }

    async fn run(self: Arc<Self>, poll_id: String, generation: u64, token: CancellationToken) {
        info!(poll_id = %poll_id, "Countdown started");
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!(poll_id = %poll_id, "Countdown cancelled");
                    break;
                }

                _ = ticker.tick() => {
                    match self.tick(&poll_id).await {
                        Ok(TickOutcome::Counting(_)) => {}
                        Ok(TickOutcome::Expired(results)) => {
                            info!(
                                poll_id = %poll_id,
                                total_votes = results.total_votes,
                                "Countdown finished"
                            );
                            break;
                        }
                        Ok(TickOutcome::Stopped) => break,
                        Err(err) => {
                            error!(poll_id = %poll_id, error = %err, source = ?err, "Countdown failed, stopping");
                            break;
                        }
                    }
                }
            }
        }

        self.deregister(&poll_id, generation);
    }

    /// Run one countdown step for a poll.
    pub async fn tick(&self, poll_id: &str) -> PollResult<TickOutcome> {
        let poll = match self.lifecycle.store().get_poll(poll_id).await? {
            Some(poll) if poll.status == PollStatus::Active => poll,
            Some(_) => return self.announce_if_owed(poll_id).await,
            None => return Ok(TickOutcome::Stopped),
        };

        let remaining = self.lifecycle.remaining_seconds(&poll).unwrap_or(0);
        if remaining > 0 {
            self.gateway.broadcast(
                &Channel::Poll(poll.id.clone()),
                &ServerEvent::timer_update(&poll.id, remaining),
            );
            return Ok(TickOutcome::Counting(remaining));
        }

        match self.lifecycle.expire_poll(&poll.id).await {
            Ok(_) => {}
            // A read may have expired it between our load and here
            Err(PollError::NotActive) => return self.announce_if_owed(poll_id).await,
            Err(err) => return Err(err),
        }
        let results = self.announce_ended(&poll.id).await?;
        Ok(TickOutcome::Expired(results))
    }

    /// Announce a poll a read expired, if nobody has yet.
    ///
    /// An explicit end announces itself, so anything else just stops.
    async fn announce_if_owed(&self, poll_id: &str) -> PollResult<TickOutcome> {
        if !self.lifecycle.take_unannounced(poll_id) {
            return Ok(TickOutcome::Stopped);
        }
        let results = self.announce_ended(poll_id).await?;
        Ok(TickOutcome::Expired(results))
    }

    /// Broadcast `poll_ended` with the final results, then close the poll's channel.
    pub async fn announce_ended(&self, poll_id: &str) -> PollResult<PollResults> {
        let results = self.votes.get_poll_results(poll_id).await?;
        let channel = Channel::Poll(poll_id.to_string());
        self.gateway
            .broadcast(&channel, &ServerEvent::poll_ended(results.clone()));
        self.gateway.close_channel(&channel);
        Ok(results)
    }

    /// Cancel and deregister a poll's countdown. Returns false if none ran.
    pub fn stop(&self, poll_id: &str) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.remove(poll_id) else {
            return false;
        };
        task.token.cancel();
        self.metrics.timer_tasks_active.set(tasks.len() as f64);
        debug!(poll_id, "Countdown stopped");
        true
    }

    /// Remove the registry entry only if it still belongs to this task.
    fn deregister(&self, poll_id: &str, generation: u64) {
        let mut tasks = self.tasks.lock();
        if tasks.get(poll_id).map(|t| t.generation) == Some(generation) {
            tasks.remove(poll_id);
        }
        self.metrics.timer_tasks_active.set(tasks.len() as f64);
    }

    pub fn is_running(&self, poll_id: &str) -> bool {
        self.tasks.lock().contains_key(poll_id)
    }

    pub fn active_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Cancel every countdown.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock();
        let count = tasks.len();
        for (_, task) in tasks.drain() {
            task.token.cancel();
        }
        self.metrics.timer_tasks_active.set(0.0);
        if count > 0 {
            info!(count, "Countdowns cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polls::{
        ManualClock, MemoryPollStore, NewOption, NewPoll, Poll, PollStore, StoreError,
        StoreResult, SubmitVote, Vote,
    };
    use crate::server::ws::gateway::Outbox;
    use crate::sessions::MemorySessionRegistry;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    struct Fixture {
        clock: Arc<ManualClock>,
        gateway: Arc<Gateway>,
        lifecycle: PollLifecycle,
        votes: VoteAggregator,
        timer: Arc<TimerService>,
        metrics: Arc<PollMetrics>,
    }

    fn fixture_with(store: Arc<dyn PollStore>, period: Duration) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let metrics = Arc::new(PollMetrics::new());
        let gateway = Arc::new(Gateway::new());
        let lifecycle = PollLifecycle::new(
            store.clone(),
            Arc::new(MemorySessionRegistry::new()),
            clock.clone(),
            metrics.clone(),
        );
        let votes = VoteAggregator::new(store, clock.clone(), metrics.clone());
        let timer = Arc::new(TimerService::new(
            lifecycle.clone(),
            votes.clone(),
            gateway.clone(),
            metrics.clone(),
            period,
        ));
        Fixture {
            clock,
            gateway,
            lifecycle,
            votes,
            timer,
            metrics,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryPollStore::new()), Duration::from_millis(10))
    }

    async fn started_poll(f: &Fixture, duration: i64) -> Poll {
        let poll = f
            .lifecycle
            .create_poll(
                &NewPoll::new("Q1", duration, "t")
                    .with_options(vec![NewOption::new("A"), NewOption::new("B")]),
            )
            .await
            .unwrap();
        f.lifecycle.start_poll(&poll.id, "t").await.unwrap()
    }

    fn listen(f: &Fixture, poll: &Poll) -> Outbox {
        let (conn, rx) = f.gateway.register();
        f.gateway.join(&conn.id, Channel::Poll(poll.id.clone()));
        rx
    }

    fn events(rx: &mut Outbox) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    async fn wait_stopped(timer: &TimerService, poll_id: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while timer.is_running(poll_id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("countdown did not stop");
    }

    #[tokio::test]
    async fn test_tick_counts_down() {
        let f = fixture();
        let poll = started_poll(&f, 30).await;
        let mut rx = listen(&f, &poll);

        f.clock.advance(chrono::Duration::seconds(3));
        assert_eq!(f.timer.tick(&poll.id).await.unwrap(), TickOutcome::Counting(27));

        let frames = events(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "timer_update");
        assert_eq!(frames[0]["data"]["remainingTime"], 27);
    }

    #[tokio::test]
    async fn test_tick_expires_with_final_results() {
        let f = fixture();
        let poll = started_poll(&f, 30).await;
        let mut rx = listen(&f, &poll);
        f.votes
            .submit_vote(&SubmitVote::new(&poll.id, &poll.options[0].id, "a", "s1"))
            .await
            .unwrap();
        f.votes
            .submit_vote(&SubmitVote::new(&poll.id, &poll.options[1].id, "b", "s2"))
            .await
            .unwrap();

        f.clock.advance(chrono::Duration::seconds(31));
        let TickOutcome::Expired(results) = f.timer.tick(&poll.id).await.unwrap() else {
            panic!("expected expiry");
        };
        assert_eq!(results.total_votes, 2);
        assert_eq!(results.options[0].percentage, 50);

        let frames = events(&mut rx);
        assert_eq!(frames.last().unwrap()["event"], "poll_ended");
        assert_eq!(frames.last().unwrap()["data"]["finalResults"]["totalVotes"], 2);

        let stored = f.lifecycle.get_poll(&poll.id).await.unwrap();
        assert_eq!(stored.status, PollStatus::Ended);
        assert_eq!(f.metrics.polls_expired_total.get(), 1);

        // Ended poll: the next tick just stops, without another broadcast
        assert_eq!(f.timer.tick(&poll.id).await.unwrap(), TickOutcome::Stopped);
        assert!(events(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_tick_unknown_poll_stops() {
        let f = fixture();
        assert_eq!(f.timer.tick("missing").await.unwrap(), TickOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let f = fixture();
        let poll = started_poll(&f, 30).await;
        assert!(f.timer.start(&poll.id));
        assert!(!f.timer.start(&poll.id));
        assert_eq!(f.timer.active_count(), 1);
        assert!((f.metrics.timer_tasks_active.get() - 1.0).abs() < f64::EPSILON);

        assert!(f.timer.stop(&poll.id));
        assert!(!f.timer.stop(&poll.id));
        assert_eq!(f.timer.active_count(), 0);
    }

    #[tokio::test]
    async fn test_running_task_ends_expired_poll() {
        let f = fixture();
        let poll = started_poll(&f, 30).await;
        let mut rx = listen(&f, &poll);
        f.timer.start(&poll.id);

        f.clock.advance(chrono::Duration::seconds(31));
        wait_stopped(&f.timer, &poll.id).await;

        let stored = f.lifecycle.get_poll(&poll.id).await.unwrap();
        assert_eq!(stored.status, PollStatus::Ended);
        let ended: Vec<_> = events(&mut rx)
            .into_iter()
            .filter(|e| e["event"] == "poll_ended")
            .collect();
        assert_eq!(ended.len(), 1);
    }

    #[tokio::test]
    async fn test_running_task_stops_when_poll_ended_elsewhere() {
        let f = fixture();
        let poll = started_poll(&f, 30).await;
        f.timer.start(&poll.id);
        f.lifecycle.end_poll(&poll.id).await.unwrap();
        wait_stopped(&f.timer, &poll.id).await;
        assert_eq!(f.metrics.polls_expired_total.get(), 0);
    }

    #[tokio::test]
    async fn test_restart_after_stop_keeps_new_task() {
        let f = fixture_with(Arc::new(MemoryPollStore::new()), Duration::from_secs(60));
        let poll = started_poll(&f, 30).await;
        assert!(f.timer.start(&poll.id));
        assert!(f.timer.stop(&poll.id));
        assert!(f.timer.start(&poll.id));
        // Give the cancelled task a chance to run its cleanup
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(f.timer.is_running(&poll.id));
        f.timer.shutdown();
        assert_eq!(f.timer.active_count(), 0);
    }

    #[tokio::test]
    async fn test_tick_announces_poll_expired_by_read() {
        let f = fixture();
        let poll = started_poll(&f, 30).await;
        let mut rx = listen(&f, &poll);

        f.clock.advance(chrono::Duration::seconds(31));
        assert!(f.lifecycle.get_active_poll().await.unwrap().is_none());
        assert!(events(&mut rx).is_empty());

        let TickOutcome::Expired(results) = f.timer.tick(&poll.id).await.unwrap() else {
            panic!("expected the read expiry to be announced");
        };
        assert_eq!(results.poll_id, poll.id);
        let frames = events(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "poll_ended");
        assert_eq!(f.gateway.member_count(&Channel::Poll(poll.id.clone())), 0);

        // Announced once only
        assert_eq!(f.timer.tick(&poll.id).await.unwrap(), TickOutcome::Stopped);
        assert!(events(&mut rx).is_empty());
        assert_eq!(f.metrics.polls_expired_total.get(), 1);
    }

    #[tokio::test]
    async fn test_expiry_closes_poll_channel() {
        let f = fixture();
        let poll = started_poll(&f, 30).await;
        let _rx = listen(&f, &poll);
        f.clock.advance(chrono::Duration::seconds(31));
        f.timer.tick(&poll.id).await.unwrap();
        assert_eq!(f.gateway.member_count(&Channel::Poll(poll.id.clone())), 0);
    }

    #[tokio::test]
    async fn test_zero_period_is_clamped() {
        let f = fixture_with(Arc::new(MemoryPollStore::new()), Duration::ZERO);
        let poll = started_poll(&f, 30).await;
        let mut rx = listen(&f, &poll);
        assert!(f.timer.start(&poll.id));

        f.clock.advance(chrono::Duration::seconds(31));
        wait_stopped(&f.timer, &poll.id).await;
        let stored = f.lifecycle.get_poll(&poll.id).await.unwrap();
        assert_eq!(stored.status, PollStatus::Ended);
        assert!(events(&mut rx).iter().any(|e| e["event"] == "poll_ended"));
    }

    /// Store that fails every read once told to.
    #[derive(Debug, Default)]
    struct FlakyStore {
        inner: MemoryPollStore,
        down: parking_lot::Mutex<bool>,
    }

    impl FlakyStore {
        fn check(&self) -> StoreResult<()> {
            if *self.down.lock() {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PollStore for FlakyStore {
        async fn insert_poll(&self, poll: Poll) -> StoreResult<Poll> {
            self.inner.insert_poll(poll).await
        }
        async fn get_poll(&self, poll_id: &str) -> StoreResult<Option<Poll>> {
            self.check()?;
            self.inner.get_poll(poll_id).await
        }
        async fn find_active(&self) -> StoreResult<Option<Poll>> {
            self.inner.find_active().await
        }
        async fn latest_draft(&self) -> StoreResult<Option<Poll>> {
            self.inner.latest_draft().await
        }
        async fn activate(
            &self,
            poll_id: &str,
            start_time: DateTime<Utc>,
            end_time: DateTime<Utc>,
        ) -> StoreResult<Poll> {
            self.inner.activate(poll_id, start_time, end_time).await
        }
        async fn finish(&self, poll_id: &str, at: DateTime<Utc>) -> StoreResult<Poll> {
            self.inner.finish(poll_id, at).await
        }
        async fn record_vote(&self, vote: Vote) -> StoreResult<Poll> {
            self.inner.record_vote(vote).await
        }
        async fn find_vote(&self, poll_id: &str, session: &str) -> StoreResult<Option<Vote>> {
            self.inner.find_vote(poll_id, session).await
        }
        async fn count_votes(&self, poll_id: &str) -> StoreResult<u64> {
            self.inner.count_votes(poll_id).await
        }
        async fn ended_polls(&self, offset: usize, limit: usize) -> StoreResult<Vec<Poll>> {
            self.inner.ended_polls(offset, limit).await
        }
    }

    #[tokio::test]
    async fn test_store_failure_stops_task() {
        let store = Arc::new(FlakyStore::default());
        let f = fixture_with(store.clone(), Duration::from_millis(10));
        let poll = started_poll(&f, 30).await;
        f.timer.start(&poll.id);

        *store.down.lock() = true;
        let err = f.timer.tick(&poll.id).await.unwrap_err();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
        wait_stopped(&f.timer, &poll.id).await;

        // The poll itself is untouched
        *store.down.lock() = false;
        let stored = f.lifecycle.get_poll(&poll.id).await.unwrap();
        assert_eq!(stored.status, PollStatus::Active);
    }
}
