//! Spotify playback state polling.

use crate::api::SpotifyApi;
use crate::error::TokenError;
use crate::token::TokenManager;
use nowplaying_core::{
    BroadcastHub, DurationExt, HistoryLog, PlaybackSnapshot, PlaybackTracker, PollOutcome,
    PollSchedule, PollScheduler, ServerMessage, TickOutcome, Transition,
};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Polls the currently-playing endpoint and fans changes out to subscribers.
pub struct PlaybackPoller {
    api: Arc<dyn SpotifyApi>,
    tokens: TokenManager,
    tracker: Arc<PlaybackTracker>,
    history: Arc<dyn HistoryLog>,
    hub: Arc<BroadcastHub>,
    schedule: PollSchedule,
    cancel_token: CancellationToken,
}

impl PlaybackPoller {
    #[must_use]
    pub fn new(
        api: Arc<dyn SpotifyApi>,
        tokens: TokenManager,
        tracker: Arc<PlaybackTracker>,
        history: Arc<dyn HistoryLog>,
        hub: Arc<BroadcastHub>,
        schedule: PollSchedule,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            api,
            tokens,
            tracker,
            history,
            hub,
            schedule,
            cancel_token,
        }
    }

    /// Start polling in a background task
    #[must_use]
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Poll until cancelled. The first tick runs immediately.
    pub async fn run(&self) {
        info!(
            "Starting Spotify poller with {}ms interval",
            self.schedule.interval.as_millis_u64()
        );
        let mut scheduler = PollScheduler::new(self.schedule);
        let mut delay = std::time::Duration::ZERO;

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!("Spotify poller shutting down gracefully");
                    break;
                }
                () = tokio::time::sleep(delay) => {
                    let outcome = self.tick().await;
                    delay = scheduler.next_delay(outcome);
                }
            }
        }
    }

    /// One poll: obtain a token, fetch playback, apply the result.
    pub async fn tick(&self) -> TickOutcome {
        let credential = match self.tokens.ensure_valid().await {
            Ok(credential) => credential,
            Err(TokenError::Unauthorized) => {
                debug!("Waiting for Spotify authorization");
                return TickOutcome::Unauthorized;
            }
            Err(e) => {
                warn!("No usable access token: {}", e);
                self.apply(PollOutcome::TransientError(e.to_string())).await;
                return TickOutcome::Transient;
            }
        };

        let request_start = Instant::now();
        let (outcome, tick) = match self.api.currently_playing(&credential.access_token).await {
            Ok(snapshot) => {
                let snapshot = snapshot.map(|s| compensate_latency(s, request_start));
                (PollOutcome::classify(snapshot), TickOutcome::Completed)
            }
            Err(e) => {
                if e.is_unauthorized() {
                    warn!("Spotify rejected the access token, forcing a refresh");
                    if let Err(refresh_error) = self.tokens.refresh().await {
                        error!("Forced token refresh failed: {}", refresh_error);
                    }
                } else {
                    debug!("Playback poll failed: {}", e);
                }
                let tick = e
                    .retry_after()
                    .map_or(TickOutcome::Transient, |retry_after| {
                        TickOutcome::RateLimited { retry_after }
                    });
                (PollOutcome::TransientError(e.to_string()), tick)
            }
        };

        self.apply(outcome).await;
        tick
    }

    /// Run change detection and fan out whatever changed.
    async fn apply(&self, outcome: PollOutcome) {
        let transition = self.tracker.observe(outcome).await;

        match &transition {
            Transition::TrackChanged(snapshot) => {
                let appended = match &snapshot.item {
                    Some(item) => self.history.append(item, snapshot.timestamp).await,
                    None => Ok(None),
                };
                match appended {
                    Ok(entry) => {
                        self.tracker.commit(&transition).await;
                        if let Some(item) = &snapshot.item {
                            info!("Now playing: {} - {}", item.artist_names(), item.name);
                        }
                        self.publish(Some(snapshot.clone())).await;
                        if let Some(entry) = entry {
                            self.hub
                                .broadcast(&ServerMessage::HistoryUpdate(entry))
                                .await;
                        }
                    }
                    Err(e) => {
                        // Left uncommitted so the next tick retries the append
                        error!("Failed to record play history: {}", e);
                        self.publish(Some(snapshot.clone())).await;
                    }
                }
            }
            Transition::Progress(snapshot) => {
                self.tracker.commit(&transition).await;
                self.publish(Some(snapshot.clone())).await;
            }
            Transition::Stopped(view) => {
                self.tracker.commit(&transition).await;
                debug!("Playback stopped");
                self.publish(view.clone()).await;
            }
            Transition::Unchanged(_) => {
                self.tracker.commit(&transition).await;
            }
        }
    }

    async fn publish(&self, snapshot: Option<PlaybackSnapshot>) {
        let delivery = self
            .hub
            .broadcast(&ServerMessage::CurrentlyPlaying(snapshot))
            .await;
        if delivery.dropped > 0 {
            debug!("Dropped {} unresponsive subscribers", delivery.dropped);
        }
    }
}

/// Assume the reported position was sampled halfway through the request.
fn compensate_latency(mut snapshot: PlaybackSnapshot, request_start: Instant) -> PlaybackSnapshot {
    if snapshot.is_playing {
        let half_latency = (request_start.elapsed() / 2).as_millis_u64();
        let duration = snapshot.item.as_ref().map_or(u64::MAX, |item| item.duration_ms);
        snapshot.progress_ms = snapshot
            .progress_ms
            .saturating_add(half_latency)
            .min(duration);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        credential_expiring_in, FakePlayer, FakeSpotify, MemoryCredentials, MemoryHistory,
    };
    use nowplaying_core::{Credential, HubSettings, Outbound, Subscription};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct Harness {
        api: Arc<FakeSpotify>,
        history: Arc<MemoryHistory>,
        hub: Arc<BroadcastHub>,
        poller: Arc<PlaybackPoller>,
        cancel: CancellationToken,
    }

    fn harness(api: FakeSpotify, authorized: bool) -> Harness {
        let credential = authorized
            .then(|| credential_expiring_in("access", Duration::from_secs(3600)));
        harness_with(api, credential)
    }

    fn harness_with(api: FakeSpotify, credential: Option<Credential>) -> Harness {
        let api = Arc::new(api);
        let store = Arc::new(
            credential.map_or_else(MemoryCredentials::default, MemoryCredentials::with),
        );
        let tokens = TokenManager::new(api.clone(), store, Duration::from_secs(300));
        let tracker = Arc::new(PlaybackTracker::new());
        let history = Arc::new(MemoryHistory::default());
        let hub = Arc::new(BroadcastHub::new(
            tracker.clone(),
            history.clone(),
            HubSettings::default(),
        ));
        let cancel = CancellationToken::new();
        let poller = Arc::new(PlaybackPoller::new(
            api.clone(),
            tokens,
            tracker,
            history.clone(),
            hub.clone(),
            PollSchedule::default(),
            cancel.clone(),
        ));
        Harness {
            api,
            history,
            hub,
            poller,
            cancel,
        }
    }

    /// Message types queued for a subscriber so far
    fn drain(subscription: &mut Subscription) -> Vec<String> {
        let mut kinds = Vec::new();
        while let Ok(outbound) = subscription.receiver.try_recv() {
            if let Outbound::Frame(frame) = outbound {
                let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
                kinds.push(value["type"].as_str().unwrap().to_string());
            }
        }
        kinds
    }

    fn player_calls(h: &Harness) -> usize {
        h.api.player_calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_same_track_twice_appends_once() {
        let h = harness(
            FakeSpotify::with_player([FakePlayer::Playing("a"), FakePlayer::Playing("a")]),
            true,
        );
        let mut sub = h.hub.register().await;
        assert_eq!(drain(&mut sub), vec!["currently-playing", "history"]);

        assert_eq!(h.poller.tick().await, TickOutcome::Completed);
        assert_eq!(drain(&mut sub), vec!["currently-playing", "history-update"]);

        assert_eq!(h.poller.tick().await, TickOutcome::Completed);
        assert_eq!(drain(&mut sub), vec!["currently-playing"]);
        assert_eq!(h.history.uris(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_track_change_appends_and_broadcasts() {
        let h = harness(
            FakeSpotify::with_player([FakePlayer::Playing("a"), FakePlayer::Playing("b")]),
            true,
        );
        let mut sub = h.hub.register().await;
        drain(&mut sub);

        h.poller.tick().await;
        h.poller.tick().await;

        assert_eq!(h.history.uris(), vec!["b", "a"]);
        assert_eq!(
            drain(&mut sub),
            vec![
                "currently-playing",
                "history-update",
                "currently-playing",
                "history-update"
            ]
        );
    }

    #[tokio::test]
    async fn test_pause_and_resume_does_not_duplicate_history() {
        let h = harness(
            FakeSpotify::with_player([
                FakePlayer::Playing("a"),
                FakePlayer::Paused("a"),
                FakePlayer::Playing("a"),
            ]),
            true,
        );
        for _ in 0..3 {
            h.poller.tick().await;
        }
        assert_eq!(h.history.uris(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_stop_is_broadcast_once() {
        let h = harness(
            FakeSpotify::with_player([FakePlayer::Playing("a"), FakePlayer::Idle]),
            true,
        );
        let mut sub = h.hub.register().await;
        drain(&mut sub);

        h.poller.tick().await;
        drain(&mut sub);

        h.poller.tick().await;
        assert_eq!(drain(&mut sub), vec!["currently-playing"]);
        h.poller.tick().await;
        assert!(drain(&mut sub).is_empty());
    }

    #[tokio::test]
    async fn test_history_failure_retries_next_tick() {
        let h = harness(FakeSpotify::with_player([FakePlayer::Playing("a")]), true);
        let mut sub = h.hub.register().await;
        drain(&mut sub);

        h.history.set_failing(true);
        h.poller.tick().await;
        assert_eq!(drain(&mut sub), vec!["currently-playing"]);
        assert!(h.history.uris().is_empty());

        h.history.set_failing(false);
        h.poller.tick().await;
        assert_eq!(drain(&mut sub), vec!["currently-playing", "history-update"]);
        assert_eq!(h.history.uris(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_unauthorized_makes_no_upstream_calls() {
        let h = harness(FakeSpotify::with_player([FakePlayer::Playing("a")]), false);
        assert_eq!(h.poller.tick().await, TickOutcome::Unauthorized);
        assert_eq!(player_calls(&h), 0);
        assert_eq!(h.api.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejected_token_forces_refresh() {
        let h = harness(
            FakeSpotify::with_player([FakePlayer::Unauthorized, FakePlayer::Playing("a")]),
            true,
        );
        assert_eq!(h.poller.tick().await, TickOutcome::Transient);
        assert_eq!(h.api.refresh_calls.load(Ordering::SeqCst), 1);

        assert_eq!(h.poller.tick().await, TickOutcome::Completed);
        assert_eq!(h.history.uris(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let h = harness(FakeSpotify::with_player([FakePlayer::RateLimited(30)]), true);
        assert_eq!(
            h.poller.tick().await,
            TickOutcome::RateLimited {
                retry_after: Duration::from_secs(30)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_backs_off_before_next_poll() {
        let h = harness(
            FakeSpotify::with_player([FakePlayer::Fail(500), FakePlayer::Playing("a")]),
            true,
        );
        let handle = h.poller.clone().start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(player_calls(&h), 1);

        tokio::time::sleep(Duration::from_millis(14_800)).await;
        assert_eq!(player_calls(&h), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(player_calls(&h), 2);

        // Back on the nominal interval after a success
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(player_calls(&h), 3);

        h.cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_token_endpoint_is_not_called_every_tick() {
        let api = FakeSpotify::with_player([FakePlayer::Playing("a")]);
        api.set_refresh_fails(true);
        let h = harness_with(
            api,
            Some(credential_expiring_in("access", Duration::from_secs(200))),
        );
        let handle = h.poller.clone().start();

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        // Polling keeps its cadence on the still-valid token
        assert_eq!(player_calls(&h), 11);
        assert_eq!(h.api.refresh_calls.load(Ordering::SeqCst), 1);

        h.cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_retries_after_delay() {
        let h = harness(FakeSpotify::default(), false);
        let handle = h.poller.clone().start();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(player_calls(&h), 0);

        h.cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let h = harness(FakeSpotify::with_player([FakePlayer::Playing("a")]), true);
        let handle = h.poller.clone().start();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        let calls = player_calls(&h);
        assert_eq!(calls, 3);

        h.cancel.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(player_calls(&h), calls);
    }
}
