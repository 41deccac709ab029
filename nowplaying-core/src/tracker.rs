use crate::playback::{PlaybackSnapshot, PollOutcome};
use tokio::sync::RwLock;

/// State transition detected by comparing a poll outcome with the last-known state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A different track started playing
    TrackChanged(PlaybackSnapshot),
    /// The same track is still playing
    Progress(PlaybackSnapshot),
    /// Playback stopped or the upstream became unreachable while playing
    Stopped(Option<PlaybackSnapshot>),
    /// Nothing subscribers need to hear about
    Unchanged(Option<PlaybackSnapshot>),
}

impl Transition {
    /// The view of playback after this transition
    #[must_use]
    pub fn snapshot(&self) -> Option<&PlaybackSnapshot> {
        match self {
            Self::TrackChanged(s) | Self::Progress(s) => Some(s),
            Self::Stopped(s) | Self::Unchanged(s) => s.as_ref(),
        }
    }
}

#[derive(Default)]
struct TrackerInner {
    /// What subscribers currently see
    view: Option<PlaybackSnapshot>,
    /// URI of the last track observed playing; only playing ticks move it
    playing_uri: Option<String>,
}

/// Last-known playback state and change detection.
///
/// [`observe`](Self::observe) never mutates; callers [`commit`](Self::commit)
/// a transition once its side effects succeeded, so a failed history write
/// is retried on the next tick.
#[derive(Default)]
pub struct PlaybackTracker {
    inner: RwLock<TrackerInner>,
}

impl PlaybackTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current view of playback, served to newly connected subscribers
    pub async fn current(&self) -> Option<PlaybackSnapshot> {
        self.inner.read().await.view.clone()
    }

    /// Classify `outcome` against the last committed state.
    pub async fn observe(&self, outcome: PollOutcome) -> Transition {
        let inner = self.inner.read().await;

        match outcome {
            PollOutcome::Playing(snapshot) => {
                if inner.playing_uri.as_deref() == snapshot.track_uri() {
                    Transition::Progress(snapshot)
                } else {
                    Transition::TrackChanged(snapshot)
                }
            }
            PollOutcome::NotPlaying(paused) => {
                let view = paused.or_else(|| inner.view.clone().map(PlaybackSnapshot::paused));
                Self::stop_transition(inner.view.as_ref(), view)
            }
            PollOutcome::TransientError(_) => {
                let view = inner.view.clone().map(PlaybackSnapshot::paused);
                Self::stop_transition(inner.view.as_ref(), view)
            }
        }
    }

    fn stop_transition(
        previous: Option<&PlaybackSnapshot>,
        view: Option<PlaybackSnapshot>,
    ) -> Transition {
        let was_playing = previous.is_some_and(|p| p.is_playing);
        let item_changed = previous.and_then(PlaybackSnapshot::track_uri)
            != view.as_ref().and_then(PlaybackSnapshot::track_uri);

        if was_playing || item_changed {
            Transition::Stopped(view)
        } else {
            Transition::Unchanged(view)
        }
    }

    /// Adopt the state produced by `transition`.
    pub async fn commit(&self, transition: &Transition) {
        let mut inner = self.inner.write().await;
        match transition {
            Transition::TrackChanged(s) | Transition::Progress(s) => {
                inner.playing_uri = s.track_uri().map(ToString::to_string);
                inner.view = Some(s.clone());
            }
            Transition::Stopped(view) | Transition::Unchanged(view) => {
                inner.view.clone_from(view);
            }
        }
    }
}
