//! # Sampling
//!
//! Per-event-type probabilistic admission control.

use crate::event::EventType;
use rand::Rng;
use std::collections::HashMap;

/// Admission gate driven by per-type rates in `[0, 1]`.
///
/// Every call is an independent uniform draw, so the admitted fraction only
/// converges to the rate over many calls. Types without a configured rate are
/// always admitted.
#[derive(Debug, Clone, Default)]
pub struct SamplingGate {
    rates: HashMap<EventType, f64>,
}

impl SamplingGate {
    /// Create a gate from already-validated rates
    pub fn new(rates: HashMap<EventType, f64>) -> Self {
        Self { rates }
    }

    /// Configured rate, 1.0 when the type is not configured
    pub fn rate(&self, event_type: EventType) -> f64 {
        self.rates.get(&event_type).copied().unwrap_or(1.0)
    }

    /// Draw against the thread-local RNG
    pub fn should_admit(&self, event_type: EventType) -> bool {
        self.should_admit_with(event_type, &mut rand::thread_rng())
    }

    /// Draw against a caller-supplied RNG
    pub fn should_admit_with<R: Rng + ?Sized>(&self, event_type: EventType, rng: &mut R) -> bool {
        let rate = self.rate(event_type);
        if rate >= 1.0 {
            return true;
        }
        if rate <= 0.0 {
            return false;
        }
        rng.gen::<f64>() < rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn gate(pairs: &[(EventType, f64)]) -> SamplingGate {
        SamplingGate::new(pairs.iter().copied().collect())
    }

    fn admitted_fraction(gate: &SamplingGate, event_type: EventType, draws: usize) -> f64 {
        let admitted = (0..draws).filter(|_| gate.should_admit(event_type)).count();
        admitted as f64 / draws as f64
    }

    #[test]
    fn test_unconfigured_type_fails_open() {
        let gate = gate(&[(EventType::PerformanceSample, 0.0)]);
        assert_eq!(gate.rate(EventType::GameStart), 1.0);
        assert!((0..10_000).all(|_| gate.should_admit(EventType::GameStart)));
    }

    #[test]
    fn test_zero_and_one_are_absolute() {
        let gate = gate(&[(EventType::PageView, 1.0), (EventType::ApiLatency, 0.0)]);
        assert!((0..10_000).all(|_| gate.should_admit(EventType::PageView)));
        assert!((0..10_000).all(|_| !gate.should_admit(EventType::ApiLatency)));
    }

    #[test]
    fn test_convergence_to_configured_rate() {
        let gate = gate(&[
            (EventType::PerformanceSample, 0.1),
            (EventType::ApiLatency, 0.5),
            (EventType::ErrorOccurred, 0.9),
        ]);

        for (event_type, rate) in
            [(EventType::PerformanceSample, 0.1), (EventType::ApiLatency, 0.5), (EventType::ErrorOccurred, 0.9)]
        {
            let fraction = admitted_fraction(&gate, event_type, 100_000);
            assert!(
                (fraction - rate).abs() <= 0.02,
                "{event_type}: admitted {fraction}, expected {rate} +/- 0.02"
            );
        }
    }

    #[test]
    fn test_seeded_draws() {
        let gate = gate(&[(EventType::PerformanceSample, 0.25)]);
        let mut rng = StdRng::seed_from_u64(7);
        let admitted = (0..20_000)
            .filter(|_| gate.should_admit_with(EventType::PerformanceSample, &mut rng))
            .count();
        let fraction = admitted as f64 / 20_000.0;
        assert!((fraction - 0.25).abs() <= 0.02, "admitted {fraction}");
    }

    #[test]
    fn test_draws_are_not_decimation() {
        // A counter-based gate at 0.5 would alternate; independent draws produce runs.
        let gate = gate(&[(EventType::ApiLatency, 0.5)]);
        let mut rng = StdRng::seed_from_u64(42);
        let draws: Vec<bool> =
            (0..1_000).map(|_| gate.should_admit_with(EventType::ApiLatency, &mut rng)).collect();
        assert!(draws.windows(2).any(|pair| pair[0] == pair[1]));
    }
}
