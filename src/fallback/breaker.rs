//! Per-provider circuit breakers.
//!
//! Three states. `closed -> open` at the threshold-th consecutive failure;
//! `open -> half_open` after the cooldown; in half-open a single probe
//! decides: success closes the breaker and resets counters, failure
//! reopens it with a fresh cooldown.

use crate::clock::SharedClock;
use crate::types::Provider;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Breaker state machine positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Snapshot of one provider's breaker, for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub provider: Provider,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub last_failure_ms: u64,
    pub open_until_ms: u64,
}

#[derive(Debug)]
struct BreakerCell {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure_ms: u64,
    open_until_ms: u64,
    /// Whether the half-open probe slot is taken.
    probe_in_flight: bool,
}

impl BreakerCell {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_failure_ms: 0,
            open_until_ms: 0,
            probe_in_flight: false,
        }
    }
}

/// Registry of one breaker per real provider.
pub struct CircuitBreakerRegistry {
    threshold: u32,
    cooldown_ms: u64,
    clock: SharedClock,
    cells: DashMap<Provider, Mutex<BreakerCell>>,
}

impl CircuitBreakerRegistry {
    pub fn new(threshold: u32, cooldown_ms: u64, clock: SharedClock) -> Self {
        let cells = DashMap::new();
        for provider in Provider::ALL {
            cells.insert(provider, Mutex::new(BreakerCell::new()));
        }
        Self {
            threshold: threshold.max(1),
            cooldown_ms,
            clock,
            cells,
        }
    }

    fn with_cell<T>(&self, provider: Provider, f: impl FnOnce(&mut BreakerCell) -> T) -> T {
        let entry = self
            .cells
            .entry(provider)
            .or_insert_with(|| Mutex::new(BreakerCell::new()));
        let mut guard = match entry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Lazily transition open -> half-open once the cooldown elapsed.
    fn settle(&self, cell: &mut BreakerCell, now_ms: u64) {
        if cell.state == BreakerState::Open && now_ms >= cell.open_until_ms {
            cell.state = BreakerState::HalfOpen;
            cell.probe_in_flight = false;
        }
    }

    /// Current state, settling the cooldown transition first.
    pub fn state(&self, provider: Provider) -> BreakerState {
        let now_ms = self.clock.now_ms();
        self.with_cell(provider, |cell| {
            self.settle(cell, now_ms);
            cell.state
        })
    }

    /// Whether a call to the provider may proceed right now. In half-open
    /// this hands out the single probe slot.
    pub fn allow(&self, provider: Provider) -> bool {
        let now_ms = self.clock.now_ms();
        self.with_cell(provider, |cell| {
            self.settle(cell, now_ms);
            match cell.state {
                BreakerState::Closed => true,
                BreakerState::Open => false,
                BreakerState::HalfOpen => {
                    if cell.probe_in_flight {
                        false
                    } else {
                        cell.probe_in_flight = true;
                        true
                    }
                }
            }
        })
    }

    /// Whether the breaker is open (no call may proceed).
    pub fn is_open(&self, provider: Provider) -> bool {
        self.state(provider) == BreakerState::Open
    }

    /// Record a successful call.
    pub fn record_success(&self, provider: Provider) {
        let now_ms = self.clock.now_ms();
        self.with_cell(provider, |cell| {
            self.settle(cell, now_ms);
            match cell.state {
                BreakerState::HalfOpen => {
                    tracing::info!(provider = %provider, "breaker closed after successful probe");
                    *cell = BreakerCell::new();
                }
                _ => {
                    cell.consecutive_failures = 0;
                }
            }
        });
    }

    /// Record a failed call.
    pub fn record_failure(&self, provider: Provider) {
        let now_ms = self.clock.now_ms();
        let opened = self.with_cell(provider, |cell| {
            self.settle(cell, now_ms);
            cell.last_failure_ms = now_ms;
            match cell.state {
                BreakerState::HalfOpen => {
                    cell.state = BreakerState::Open;
                    cell.open_until_ms = now_ms + self.cooldown_ms;
                    cell.probe_in_flight = false;
                    true
                }
                BreakerState::Closed => {
                    cell.consecutive_failures += 1;
                    if cell.consecutive_failures >= self.threshold {
                        cell.state = BreakerState::Open;
                        cell.open_until_ms = now_ms + self.cooldown_ms;
                        true
                    } else {
                        false
                    }
                }
                BreakerState::Open => false,
            }
        });
        if opened {
            metrics::counter!(
                "conductor_breaker_opened_total",
                "provider" => provider.as_str(),
            )
            .increment(1);
            tracing::warn!(provider = %provider, cooldown_ms = self.cooldown_ms, "circuit breaker opened");
        }
    }

    /// Force every breaker open, as the emergency rollback does.
    pub fn force_open_all(&self) {
        let now_ms = self.clock.now_ms();
        for provider in Provider::ALL {
            self.with_cell(provider, |cell| {
                cell.state = BreakerState::Open;
                cell.open_until_ms = now_ms + self.cooldown_ms;
                cell.probe_in_flight = false;
            });
        }
        tracing::warn!("all circuit breakers forced open");
    }

    /// Reset one provider's breaker to closed.
    pub fn reset(&self, provider: Provider) {
        self.with_cell(provider, |cell| *cell = BreakerCell::new());
    }

    /// Snapshot of all breakers for health reporting.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let now_ms = self.clock.now_ms();
        Provider::ALL
            .iter()
            .map(|&provider| {
                self.with_cell(provider, |cell| {
                    self.settle(cell, now_ms);
                    BreakerSnapshot {
                        provider,
                        state: cell.state,
                        consecutive_failures: cell.consecutive_failures,
                        last_failure_ms: cell.last_failure_ms,
                        open_until_ms: cell.open_until_ms,
                    }
                })
            })
            .collect()
    }

    /// True when every real provider's breaker refuses calls.
    pub fn all_open(&self) -> bool {
        Provider::ALL
            .iter()
            .all(|&provider| self.state(provider) == BreakerState::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn registry() -> (CircuitBreakerRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (CircuitBreakerRegistry::new(5, 300_000, clock.clone()), clock)
    }

    #[test]
    fn opens_at_threshold_not_after() {
        let (registry, _clock) = registry();
        for _ in 0..4 {
            registry.record_failure(Provider::Bedrock);
        }
        assert_eq!(registry.state(Provider::Bedrock), BreakerState::Closed);

        registry.record_failure(Provider::Bedrock);
        assert_eq!(registry.state(Provider::Bedrock), BreakerState::Open);
        assert!(!registry.allow(Provider::Bedrock));
    }

    #[test]
    fn success_resets_the_failure_counter() {
        let (registry, _clock) = registry();
        for _ in 0..4 {
            registry.record_failure(Provider::Gemini);
        }
        registry.record_success(Provider::Gemini);
        for _ in 0..4 {
            registry.record_failure(Provider::Gemini);
        }
        assert_eq!(registry.state(Provider::Gemini), BreakerState::Closed);
    }

    #[test]
    fn cooldown_transitions_to_half_open() {
        let (registry, clock) = registry();
        for _ in 0..5 {
            registry.record_failure(Provider::Llama);
        }
        assert!(registry.is_open(Provider::Llama));

        clock.advance(299_999);
        assert!(registry.is_open(Provider::Llama));

        clock.advance(1);
        assert_eq!(registry.state(Provider::Llama), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_hands_out_one_probe() {
        let (registry, clock) = registry();
        for _ in 0..5 {
            registry.record_failure(Provider::Llama);
        }
        clock.advance(300_000);

        assert!(registry.allow(Provider::Llama));
        // Second caller is held back while the probe is in flight.
        assert!(!registry.allow(Provider::Llama));
    }

    #[test]
    fn probe_success_closes_and_resets() {
        let (registry, clock) = registry();
        for _ in 0..5 {
            registry.record_failure(Provider::Bedrock);
        }
        clock.advance(300_000);
        assert!(registry.allow(Provider::Bedrock));
        registry.record_success(Provider::Bedrock);

        assert_eq!(registry.state(Provider::Bedrock), BreakerState::Closed);
        let snapshot = registry.snapshot();
        let bedrock = snapshot
            .iter()
            .find(|s| s.provider == Provider::Bedrock)
            .unwrap();
        assert_eq!(bedrock.consecutive_failures, 0);
    }

    #[test]
    fn probe_failure_reopens_with_fresh_cooldown() {
        let (registry, clock) = registry();
        for _ in 0..5 {
            registry.record_failure(Provider::Bedrock);
        }
        clock.advance(300_000);
        assert!(registry.allow(Provider::Bedrock));
        registry.record_failure(Provider::Bedrock);

        assert!(registry.is_open(Provider::Bedrock));
        clock.advance(299_999);
        assert!(registry.is_open(Provider::Bedrock));
        clock.advance(1);
        assert_eq!(registry.state(Provider::Bedrock), BreakerState::HalfOpen);
    }

    #[test]
    fn force_open_all_blocks_everything() {
        let (registry, _clock) = registry();
        registry.force_open_all();
        assert!(registry.all_open());
        for provider in Provider::ALL {
            assert!(!registry.allow(provider));
        }
    }
}
