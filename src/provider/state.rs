//! Per-provider quota state machine
//!
//! `ACTIVE -> EXHAUSTED` on a rate-limit signal or a spent quota,
//! `EXHAUSTED -> ACTIVE` once the quota window has elapsed. Time is passed in
//! explicitly so transitions are deterministic under test.

use std::time::{Duration, Instant};

use crate::config::ProviderSpec;

/// Whether a provider may currently be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Active,
    Exhausted { until: Instant },
}

/// Mutable state of one provider, owned by the router.
#[derive(Debug, Clone)]
pub struct ProviderState {
    spec: ProviderSpec,
    credential: Option<String>,
    availability: Availability,
    window_started: Instant,
    used_in_window: u32,
    total_requests: u64,
}

impl ProviderState {
    pub fn new(spec: ProviderSpec, credential: Option<String>, now: Instant) -> Self {
        Self {
            spec,
            credential,
            availability: Availability::Active,
            window_started: now,
            used_in_window: 0,
            total_requests: 0,
        }
    }

    pub fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// Forget the credential after an auth rejection.
    pub fn clear_credential(&mut self) {
        self.credential = None;
    }

    pub fn availability(&self) -> Availability {
        self.availability
    }

    pub fn used_in_window(&self) -> u32 {
        self.used_in_window
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    fn window(&self) -> Duration {
        self.spec.quota_window()
    }

    /// Apply time-based transitions and report whether the provider is usable.
    pub fn is_active(&mut self, now: Instant) -> bool {
        match self.availability {
            Availability::Exhausted { until } if now >= until => {
                tracing::info!(
                    provider = %self.spec.name,
                    "quota window reset, provider active again"
                );
                self.availability = Availability::Active;
                self.window_started = now;
                self.used_in_window = 0;
            }
            Availability::Active if now.duration_since(self.window_started) >= self.window() => {
                self.window_started = now;
                self.used_in_window = 0;
            }
            _ => {}
        }
        matches!(self.availability, Availability::Active)
    }

    /// Count one outbound request; spends the quota when the limit is reached.
    pub fn record_request(&mut self, now: Instant) {
        self.used_in_window = self.used_in_window.saturating_add(1);
        self.total_requests += 1;
        if let Some(quota) = self.spec.quota {
            if self.used_in_window >= quota {
                self.exhaust(now, "request quota spent");
            }
        }
    }

    /// Transition to `EXHAUSTED` until one quota window from `now`.
    pub fn exhaust(&mut self, now: Instant, reason: &str) {
        if matches!(self.availability, Availability::Active) {
            tracing::warn!(
                provider = %self.spec.name,
                reason,
                window_secs = self.spec.quota_window_secs,
                "provider exhausted"
            );
        }
        self.availability = Availability::Exhausted {
            until: now + self.window(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Dialect;

    fn spec(quota: Option<u32>) -> ProviderSpec {
        let mut spec = ProviderSpec::new("p", "https://p.example", Dialect::Esplora);
        spec.quota = quota;
        spec.quota_window_secs = 60;
        spec
    }

    #[test]
    fn test_exhausted_until_window_elapses() {
        let start = Instant::now();
        let mut state = ProviderState::new(spec(None), None, start);
        assert!(state.is_active(start));
        state.exhaust(start, "429");
        assert!(!state.is_active(start + Duration::from_secs(59)));
        assert!(state.is_active(start + Duration::from_secs(60)));
        assert_eq!(state.used_in_window(), 0);
    }

    #[test]
    fn test_quota_spent_exhausts() {
        let start = Instant::now();
        let mut state = ProviderState::new(spec(Some(2)), None, start);
        state.record_request(start);
        assert!(state.is_active(start));
        state.record_request(start);
        assert!(!state.is_active(start));
        assert_eq!(state.total_requests(), 2);
    }

    #[test]
    fn test_window_rollover_resets_usage() {
        let start = Instant::now();
        let mut state = ProviderState::new(spec(Some(5)), None, start);
        state.record_request(start);
        state.record_request(start);
        assert!(state.is_active(start + Duration::from_secs(61)));
        assert_eq!(state.used_in_window(), 0);
        assert_eq!(state.total_requests(), 2);
    }

    #[test]
    fn test_clear_credential() {
        let mut state = ProviderState::new(spec(None), Some("token".into()), Instant::now());
        assert_eq!(state.credential(), Some("token"));
        state.clear_credential();
        assert_eq!(state.credential(), None);
    }
}
