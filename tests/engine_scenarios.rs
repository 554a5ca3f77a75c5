//! Behavioural guarantees of the trust store, the min-gate and the phase
//! classifier, exercised through the public API.

use ccf_relational::accumulator::{AccumulatorConfig, AccumulatorStore, CoherenceAccumulator};
use ccf_relational::engine::{CoherenceEngine, InteractionOutcome, TickInput};
use ccf_relational::fingerprint::*;
use ccf_relational::groups::{GroupId, GroupTable, PublishedGroups};
use ccf_relational::phase::{PhaseClassifier, PhaseSpace, SocialPhase};
use ccf_relational::scheduler::ScheduleConfig;
use ccf_relational::EngineConfig;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn key(brightness: BrightnessBand, noise: NoiseBand) -> ContextKey {
    ContextKey {
        brightness,
        noise,
        presence: PresenceSignature::Close,
        motion: MotionContext::Static,
        orientation: Orientation::Upright,
        time_period: TimePeriod::Day,
    }
}

fn features(k: ContextKey) -> FeatureSnapshot {
    FeatureSnapshot::complete(k.brightness, k.noise, k.presence, k.motion, k.orientation, k.time_period)
}

fn inline_engine() -> CoherenceEngine {
    let cfg = EngineConfig {
        schedule: ScheduleConfig { background: false, ..ScheduleConfig::default() },
        ..EngineConfig::default()
    };
    CoherenceEngine::in_memory(cfg).expect("engine")
}

/// Deterministic pseudo-random stream in [0, 1).
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> f32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 40) as f32) / (1u64 << 24) as f32
    }
}

// ── Accumulator dynamics ─────────────────────────────────────────────────────

#[test]
fn test_value_stays_in_unit_interval() {
    let mut rng = Lcg(7);
    let mut store = AccumulatorStore::new(AccumulatorConfig::default());
    let k = key(BrightnessBand::Bright, NoiseBand::Quiet);
    let mut now = 0u64;
    for _ in 0..5_000 {
        now += 1 + (rng.next() * 300.0) as u64;
        let delta = rng.next() * 1.5 - 0.25; // includes out-of-range deltas
        let v = if rng.next() < 0.6 {
            store.record_positive(&k, delta, now)
        } else {
            store.record_negative(&k, delta, now)
        };
        assert!((0.0..=1.0).contains(&v), "value={} at tick {}", v, now);
    }
}

#[test]
fn test_fifty_positives_cross_high_threshold_monotonically() {
    let mut acc = CoherenceAccumulator::new(0);
    let mut prev = acc.value;
    for t in 1..=50 {
        acc.record_positive(0.05, t);
        assert!(acc.value > prev, "not increasing at {}: {} <= {}", t, acc.value, prev);
        assert!(acc.value < 1.0, "reached 1.0 at {}", t);
        prev = acc.value;
    }
    assert!(acc.value > 0.65, "value={}", acc.value);
}

#[test]
fn test_decay_never_breaks_earned_floor() {
    let cfg = AccumulatorConfig { decay_idle_ticks: 10, decay_rate: 0.05 };
    for n in [0u32, 1, 5, 10, 29, 30, 80] {
        let mut acc = CoherenceAccumulator::new(0);
        for t in 0..n as u64 {
            acc.record_positive(0.2, t);
        }
        let floor = (0.01 * n as f32).min(0.3);
        for now in (n as u64..200_000).step_by(997) {
            acc.decay(now, &cfg);
            assert!(acc.value >= floor - 1e-6, "n={} now={} value={} floor={}", n, now, acc.value, floor);
        }
    }
}

// ── Min-gate and phase ───────────────────────────────────────────────────────

#[test]
fn test_new_context_calm_is_shy_observer() {
    let mut engine = inline_engine();
    let k = key(BrightnessBand::Dim, NoiseBand::Quiet);
    let report = engine.tick(
        0,
        &TickInput {
            features: features(k),
            tension: 0.10,
            instant_coherence: 0.95,
            energy: 0.4,
            outcome: None,
        },
    );
    assert_eq!(report.context_coherence, 0.0);
    assert_eq!(report.effective_coherence, 0.0);
    assert_eq!(report.phase.quadrant, SocialPhase::ShyObserver);
}

#[test]
fn test_effective_coherence_is_exact_minimum() {
    let mut rng = Lcg(42);
    let mut engine = inline_engine();
    let keys = [
        key(BrightnessBand::Bright, NoiseBand::Quiet),
        key(BrightnessBand::Dark, NoiseBand::Loud),
    ];
    for t in 0..2_000u64 {
        let k = keys[(t / 37) as usize % 2];
        let instant = rng.next();
        let outcome = match rng.next() {
            x if x < 0.5 => Some(InteractionOutcome::Positive),
            x if x < 0.6 => Some(InteractionOutcome::Negative),
            _ => None,
        };
        let r = engine.tick(
            t,
            &TickInput {
                features: features(k),
                tension: rng.next(),
                instant_coherence: instant,
                energy: rng.next(),
                outcome,
            },
        );
        assert_eq!(r.effective_coherence, instant.min(r.context_coherence), "tick {}", t);
        assert_eq!(engine.effective_coherence(t), r.effective_coherence, "tick {}", t);
    }
}

#[test]
fn test_no_flicker_between_060_and_062() {
    let mut classifier = PhaseClassifier::new(PhaseSpace::default(), 0);
    // Settle into the high-coherence side first.
    classifier.update(0.9, 0.1, 0);
    assert_eq!(classifier.current().quadrant, SocialPhase::QuietlyBeloved);
    for t in 1..200 {
        let coh = if t % 2 == 0 { 0.60 } else { 0.62 };
        let c = classifier.update(coh, 0.1, t);
        assert_eq!(c.quadrant, SocialPhase::QuietlyBeloved, "flicker at tick {}", t);
        assert_eq!(c.entered_at, 0);
    }

    let mut low = PhaseClassifier::new(PhaseSpace::default(), 0);
    for t in 0..200 {
        let coh = if t % 2 == 0 { 0.60 } else { 0.62 };
        assert_eq!(low.update(coh, 0.1, t).quadrant, SocialPhase::ShyObserver, "flicker at tick {}", t);
    }
}

#[test]
fn test_trust_earned_in_one_context_does_not_leak() {
    let mut engine = inline_engine();
    let home = key(BrightnessBand::Bright, NoiseBand::Quiet);
    let away = key(BrightnessBand::Dark, NoiseBand::Loud);
    for t in 0..60 {
        engine.tick(
            t,
            &TickInput {
                features: features(home),
                tension: 0.1,
                instant_coherence: 0.95,
                energy: 0.5,
                outcome: Some(InteractionOutcome::Positive),
            },
        );
    }
    assert_eq!(engine.current_phase().quadrant, SocialPhase::QuietlyBeloved);

    let r = engine.tick(
        60,
        &TickInput {
            features: features(away),
            tension: 0.1,
            instant_coherence: 0.95,
            energy: 0.5,
            outcome: None,
        },
    );
    assert_eq!(r.context_coherence, 0.0);
    assert_eq!(r.phase.quadrant, SocialPhase::ShyObserver);
}

// ── Regrouping ───────────────────────────────────────────────────────────────

#[test]
fn test_update_racing_a_swap_lands_in_new_group() {
    let published = PublishedGroups::new();
    let mut store = AccumulatorStore::with_published(AccumulatorConfig::default(), published.clone());
    let a = key(BrightnessBand::Bright, NoiseBand::Quiet);
    let b = key(BrightnessBand::Bright, NoiseBand::Moderate);
    for t in 0..10 {
        store.record_positive(&a, 0.1, t);
    }
    store.record_positive(&b, 0.1, 10);

    // Published between two updates.
    assert!(published.publish(GroupTable::from_partition(1, vec![vec![a, b]])));
    let v = store.record_positive(&b, 0.1, 11);

    let gid = store.group_of(&b);
    assert_eq!(gid, store.group_of(&a));
    assert_eq!(store.len(), 1);
    let merged = store.peek(&gid).expect("merged accumulator");
    assert_eq!(merged.value, v);
    assert_eq!(merged.interaction_count, 12);
    assert!(store.peek(&GroupId(b)).is_none());
}

#[test]
fn test_stale_publication_is_rejected() {
    let published = PublishedGroups::new();
    let a = key(BrightnessBand::Bright, NoiseBand::Quiet);
    let b = key(BrightnessBand::Dim, NoiseBand::Quiet);
    assert!(published.publish(GroupTable::from_partition(3, vec![vec![a, b]])));
    assert!(!published.publish(GroupTable::from_partition(2, vec![vec![a], vec![b]])));
    assert_eq!(published.generation(), 3);
    let readers_view = published.load();
    assert!(published.publish(GroupTable::from_partition(4, vec![vec![a], vec![b]])));
    // An in-flight reader keeps its table.
    assert_eq!(readers_view.group_of(&a), readers_view.group_of(&b));
    assert_ne!(published.load().group_of(&a), published.load().group_of(&b));
}
