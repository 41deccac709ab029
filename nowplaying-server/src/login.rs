//! One-time `state` tokens guarding the OAuth callback.

use cached::stores::TimedCache;
use cached::Cached;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// How long a login attempt stays valid
pub const LOGIN_STATE_TTL: Duration = Duration::from_secs(600);

pub struct LoginStates {
    states: Mutex<TimedCache<String, ()>>,
}

impl LoginStates {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            states: Mutex::new(TimedCache::with_lifespan(ttl.as_secs())),
        }
    }

    /// Issue a fresh state token for one login attempt.
    pub async fn issue(&self) -> String {
        let state = Uuid::new_v4().simple().to_string();
        self.states.lock().await.cache_set(state.clone(), ());
        state
    }

    /// Accept `state` once; unknown, expired or reused tokens are rejected.
    pub async fn consume(&self, state: String) -> bool {
        self.states.lock().await.cache_remove(&state).is_some()
    }
}

impl Default for LoginStates {
    fn default() -> Self {
        Self::new(LOGIN_STATE_TTL)
    }
}
