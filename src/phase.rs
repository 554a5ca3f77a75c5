/*
 * Notice of Provisional Patent Filing:
 * The methods and algorithms implemented in this file (specifically relating to
 * Contextual Coherence Fields and relational coherence accumulation) are the
 * subject of a United States Provisional Patent Application (63/988,438)
 * filed on February 23, 2026.
 *
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE and PATENTS.md in the root directory for full details.
 */

//! Social phase classification and personality modulators.
//!
//! - [`Personality`]: curiosity, startle sensitivity and recovery speed. Only
//!   their modulating effect lives here; bounds are the caller's concern.
//! - [`SocialPhase`]: four-quadrant phase with Schmitt-trigger hysteresis.
//! - [`PhaseSpace`]: configurable enter/exit thresholds.
//! - [`PhaseClassifier`]: holds the current quadrant and when it was entered.
//!
//! # Invariants
//!
//! - Personality modulates deltas and thresholds, not structure.
//! - An axis flips only when the current state's threshold is strictly crossed.
//!   Coherence oscillating inside the deadband never toggles the quadrant.

// ─── Personality ────────────────────────────────────────────────────────────

/// Dynamic personality modulators, each nominally in [0.0, 1.0].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Personality {
    /// Drive to explore. Raises the min-cut tolerance, so a curious robot
    /// separates situations more finely.
    ///
    /// Range [0.0, 1.0]. Default 0.5.
    pub curiosity_drive: f32,
    /// Sensitivity to startling or aversive events. Scales the magnitude of
    /// negative-interaction drops.
    ///
    /// Range [0.0, 1.0]. Default 0.5.
    pub startle_sensitivity: f32,
    /// Speed of coherence recovery. Scales the delta applied by positive
    /// interactions.
    ///
    /// Range [0.0, 1.0]. Default 0.5.
    pub recovery_speed: f32,
}

impl Personality {
    /// Construct the default mid-range personality (all parameters at 0.5).
    pub fn new() -> Self {
        Self {
            curiosity_drive: 0.5,
            startle_sensitivity: 0.5,
            recovery_speed: 0.5,
        }
    }

    /// Scale a base coherence gain by `recovery_speed`: `base × (0.5 + recovery_speed)`.
    pub fn modulate_coherence_gain(&self, base: f32) -> f32 {
        base * (0.5 + self.recovery_speed)
    }

    /// Scale a base startle drop by `startle_sensitivity`: `base × (0.5 + startle_sensitivity)`.
    pub fn modulate_startle_drop(&self, base: f32) -> f32 {
        base * (0.5 + self.startle_sensitivity)
    }

    /// Scale the base min-cut threshold by `curiosity_drive`: `base × (0.5 + curiosity_drive)`.
    ///
    /// Higher tolerance means more cuts qualify, hence finer groups.
    pub fn modulate_cut_threshold(&self, base: f32) -> f32 {
        base * (0.5 + self.curiosity_drive)
    }

    /// Scale the acceptable cross-group leakage by `curiosity_drive`.
    pub fn modulate_leakage_target(&self, base: f32) -> f32 {
        base * (0.5 + self.curiosity_drive)
    }
}

impl Default for Personality {
    fn default() -> Self {
        Self::new()
    }
}

// ─── PhaseSpace (configurable Schmitt trigger thresholds) ────────────────────

/// Configurable thresholds for [`SocialPhase`] transitions.
///
/// The *enter* threshold sits above the *exit* threshold so the robot does not
/// oscillate at phase boundaries. Both comparisons are strict.
///
/// Default thresholds:
/// - Coherence high: enter > 0.65, exit < 0.55.
/// - Tension high: enter > 0.35, exit < 0.25.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseSpace {
    /// Coherence above which the high-coherence quadrants are entered.
    pub coherence_high_enter: f32,
    /// Coherence below which the high-coherence quadrants are left.
    pub coherence_high_exit: f32,
    /// Tension above which the high-tension quadrants are entered.
    pub tension_high_enter: f32,
    /// Tension below which the high-tension quadrants are left.
    pub tension_high_exit: f32,
}

impl PhaseSpace {
    /// Construct the standard PhaseSpace with default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when each exit threshold sits at or below its enter threshold and
    /// all four lie in [0.0, 1.0].
    pub fn is_consistent(&self) -> bool {
        let in_range = |v: f32| (0.0..=1.0).contains(&v);
        in_range(self.coherence_high_enter)
            && in_range(self.coherence_high_exit)
            && in_range(self.tension_high_enter)
            && in_range(self.tension_high_exit)
            && self.coherence_high_exit <= self.coherence_high_enter
            && self.tension_high_exit <= self.tension_high_enter
    }
}

impl Default for PhaseSpace {
    fn default() -> Self {
        Self {
            coherence_high_enter: 0.65,
            coherence_high_exit: 0.55,
            tension_high_enter: 0.35,
            tension_high_exit: 0.25,
        }
    }
}

// ─── SocialPhase ─────────────────────────────────────────────────────────────

/// Behavioral phase from the 2D (coherence × tension) space.
///
/// ```text
///               │ Low tension        │ High tension
/// ──────────────┼────────────────────┼──────────────────────
/// Low coherence │ ShyObserver        │ StartledRetreat
/// High coherence│ QuietlyBeloved     │ ProtectiveGuardian
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SocialPhase {
    /// Low coherence, low tension: minimal expression, cautious observation.
    ShyObserver,
    /// Low coherence, high tension: protective reflex with additional withdrawal.
    StartledRetreat,
    /// High coherence, low tension: full expressive range.
    QuietlyBeloved,
    /// High coherence, high tension: protective but with relational context.
    ProtectiveGuardian,
}

impl SocialPhase {
    /// True for the two high-coherence quadrants.
    pub fn is_high_coherence(&self) -> bool {
        matches!(self, SocialPhase::QuietlyBeloved | SocialPhase::ProtectiveGuardian)
    }

    /// True for the two high-tension quadrants.
    pub fn is_high_tension(&self) -> bool {
        matches!(self, SocialPhase::StartledRetreat | SocialPhase::ProtectiveGuardian)
    }

    fn from_axes(high_coherence: bool, high_tension: bool) -> Self {
        match (high_coherence, high_tension) {
            (false, false) => SocialPhase::ShyObserver,
            (false, true) => SocialPhase::StartledRetreat,
            (true, false) => SocialPhase::QuietlyBeloved,
            (true, true) => SocialPhase::ProtectiveGuardian,
        }
    }

    /// Next phase given the previous one.
    ///
    /// - `effective_coherence`: gated coherence in [0.0, 1.0].
    /// - `tension`: current tension in [0.0, 1.0].
    /// - `prev`: the phase from the previous tick.
    /// - `ps`: thresholds.
    pub fn classify(
        effective_coherence: f32,
        tension: f32,
        prev: SocialPhase,
        ps: &PhaseSpace,
    ) -> SocialPhase {
        let high_coherence = if prev.is_high_coherence() {
            effective_coherence >= ps.coherence_high_exit
        } else {
            effective_coherence > ps.coherence_high_enter
        };

        let high_tension = if prev.is_high_tension() {
            tension >= ps.tension_high_exit
        } else {
            tension > ps.tension_high_enter
        };

        SocialPhase::from_axes(high_coherence, high_tension)
    }
}

// ─── Classifier ─────────────────────────────────────────────────────────────

/// Current quadrant and the tick it was entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseClassification {
    /// Current quadrant.
    pub quadrant: SocialPhase,
    /// Tick at which `quadrant` was entered.
    pub entered_at: u64,
}

/// Stateful phase classifier. Starts in `ShyObserver`.
#[derive(Clone, Debug)]
pub struct PhaseClassifier {
    space: PhaseSpace,
    current: PhaseClassification,
}

impl PhaseClassifier {
    /// Classifier starting in `ShyObserver` at `now`.
    pub fn new(space: PhaseSpace, now: u64) -> Self {
        Self {
            space,
            current: PhaseClassification {
                quadrant: SocialPhase::ShyObserver,
                entered_at: now,
            },
        }
    }

    /// Thresholds in use.
    pub fn space(&self) -> &PhaseSpace {
        &self.space
    }

    /// Latest classification.
    pub fn current(&self) -> PhaseClassification {
        self.current
    }

    /// Feed one tick. At most one transition happens per call; `entered_at`
    /// only moves when the quadrant changes.
    pub fn update(&mut self, effective_coherence: f32, tension: f32, now: u64) -> PhaseClassification {
        let next = SocialPhase::classify(
            effective_coherence,
            tension,
            self.current.quadrant,
            &self.space,
        );
        if next != self.current.quadrant {
            self.current = PhaseClassification {
                quadrant: next,
                entered_at: now,
            };
        }
        self.current
    }

    /// Return to `ShyObserver` at `now`.
    pub fn reset(&mut self, now: u64) {
        self.current = PhaseClassification {
            quadrant: SocialPhase::ShyObserver,
            entered_at: now,
        };
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Personality tests ─────────────────────────────────────────────────

    #[test]
    fn test_personality_new_mid_range() {
        let p = Personality::new();
        assert!((p.curiosity_drive - 0.5).abs() < f32::EPSILON);
        assert!((p.startle_sensitivity - 0.5).abs() < f32::EPSILON);
        assert!((p.recovery_speed - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_personality_modulate_coherence_gain() {
        let p = Personality { curiosity_drive: 0.5, startle_sensitivity: 0.5, recovery_speed: 0.9 };
        // base * (0.5 + 0.9) = base * 1.4
        let result = p.modulate_coherence_gain(0.05);
        assert!((result - 0.05 * 1.4).abs() < f32::EPSILON, "got {}", result);
    }

    #[test]
    fn test_personality_modulate_startle_drop() {
        let p = Personality { curiosity_drive: 0.5, startle_sensitivity: 0.1, recovery_speed: 0.5 };
        // base * (0.5 + 0.1) = base * 0.6
        let result = p.modulate_startle_drop(0.2);
        assert!((result - 0.2 * 0.6).abs() < f32::EPSILON, "got {}", result);
    }

    #[test]
    fn test_curiosity_raises_cut_threshold() {
        let curious = Personality { curiosity_drive: 1.0, ..Personality::new() };
        let cautious = Personality { curiosity_drive: 0.0, ..Personality::new() };
        assert!((curious.modulate_cut_threshold(0.3) - 0.45).abs() < 1e-6);
        assert!((cautious.modulate_cut_threshold(0.3) - 0.15).abs() < 1e-6);
    }

    // ── PhaseSpace tests ──────────────────────────────────────────────────

    #[test]
    fn test_phase_space_default_values() {
        let ps = PhaseSpace::default();
        assert!((ps.coherence_high_enter - 0.65).abs() < f32::EPSILON);
        assert!((ps.coherence_high_exit - 0.55).abs() < f32::EPSILON);
        assert!((ps.tension_high_enter - 0.35).abs() < f32::EPSILON);
        assert!((ps.tension_high_exit - 0.25).abs() < f32::EPSILON);
        assert!(ps.is_consistent());
    }

    #[test]
    fn test_inverted_thresholds_are_inconsistent() {
        let ps = PhaseSpace { coherence_high_exit: 0.7, ..PhaseSpace::default() };
        assert!(!ps.is_consistent());
    }

    // ── SocialPhase classification tests ──────────────────────────────────

    #[test]
    fn test_full_quadrant_sweep_with_default_thresholds() {
        let ps = PhaseSpace::default();

        let cases: &[(f32, f32, SocialPhase, SocialPhase)] = &[
            (0.1, 0.1, SocialPhase::ShyObserver, SocialPhase::ShyObserver),
            (0.8, 0.1, SocialPhase::ShyObserver, SocialPhase::QuietlyBeloved),
            (0.1, 0.7, SocialPhase::ShyObserver, SocialPhase::StartledRetreat),
            (0.8, 0.7, SocialPhase::ShyObserver, SocialPhase::ProtectiveGuardian),
            // Hysteresis: stay in QB above exit
            (0.56, 0.1, SocialPhase::QuietlyBeloved, SocialPhase::QuietlyBeloved),
            // Hysteresis: exit QB below exit
            (0.54, 0.1, SocialPhase::QuietlyBeloved, SocialPhase::ShyObserver),
            // Hysteresis: stay in SR above tension exit
            (0.1, 0.26, SocialPhase::StartledRetreat, SocialPhase::StartledRetreat),
            // Hysteresis: exit SR below tension exit
            (0.1, 0.24, SocialPhase::StartledRetreat, SocialPhase::ShyObserver),
            // QB left when tension crosses its enter threshold
            (0.9, 0.36, SocialPhase::QuietlyBeloved, SocialPhase::ProtectiveGuardian),
            // From the high-tension side QB needs tension below 0.25
            (0.9, 0.30, SocialPhase::ProtectiveGuardian, SocialPhase::ProtectiveGuardian),
            (0.9, 0.20, SocialPhase::ProtectiveGuardian, SocialPhase::QuietlyBeloved),
        ];

        for &(coh, ten, prev, expected) in cases {
            let result = SocialPhase::classify(coh, ten, prev, &ps);
            assert_eq!(
                result, expected,
                "coh={} ten={} prev={:?}: got {:?}, expected {:?}",
                coh, ten, prev, result, expected
            );
        }
    }

    #[test]
    fn test_thresholds_are_strict() {
        let ps = PhaseSpace::default();
        // Exactly at enter: not entered
        assert_eq!(
            SocialPhase::classify(0.65, 0.1, SocialPhase::ShyObserver, &ps),
            SocialPhase::ShyObserver
        );
        // Exactly at exit: not left
        assert_eq!(
            SocialPhase::classify(0.55, 0.1, SocialPhase::QuietlyBeloved, &ps),
            SocialPhase::QuietlyBeloved
        );
    }

    #[test]
    fn test_custom_thresholds_stricter() {
        let strict = PhaseSpace {
            coherence_high_enter: 0.80,
            coherence_high_exit: 0.70,
            ..PhaseSpace::default()
        };

        let phase = SocialPhase::classify(0.70, 0.1, SocialPhase::ShyObserver, &strict);
        assert_eq!(
            phase,
            SocialPhase::ShyObserver,
            "coherence 0.70 should NOT enter QB with strict threshold 0.80"
        );

        let phase = SocialPhase::classify(0.85, 0.1, SocialPhase::ShyObserver, &strict);
        assert_eq!(phase, SocialPhase::QuietlyBeloved);

        let phase = SocialPhase::classify(0.75, 0.1, SocialPhase::QuietlyBeloved, &strict);
        assert_eq!(phase, SocialPhase::QuietlyBeloved);

        let phase = SocialPhase::classify(0.65, 0.1, SocialPhase::QuietlyBeloved, &strict);
        assert_eq!(phase, SocialPhase::ShyObserver);
    }

    // ── PhaseClassifier tests ─────────────────────────────────────────────

    #[test]
    fn test_classifier_starts_shy() {
        let c = PhaseClassifier::new(PhaseSpace::default(), 7);
        assert_eq!(c.current().quadrant, SocialPhase::ShyObserver);
        assert_eq!(c.current().entered_at, 7);
    }

    #[test]
    fn test_no_flicker_in_deadband() {
        let mut c = PhaseClassifier::new(PhaseSpace::default(), 0);
        for tick in 0..200u64 {
            let coh = if tick % 2 == 0 { 0.60 } else { 0.62 };
            let phase = c.update(coh, 0.1, tick);
            assert_eq!(phase.quadrant, SocialPhase::ShyObserver, "tick={}", tick);
        }

        // Same oscillation from inside QB holds QB.
        c.update(0.9, 0.1, 200);
        let entered = c.current().entered_at;
        for tick in 201..400u64 {
            let coh = if tick % 2 == 0 { 0.60 } else { 0.62 };
            let phase = c.update(coh, 0.1, tick);
            assert_eq!(phase.quadrant, SocialPhase::QuietlyBeloved, "tick={}", tick);
            assert_eq!(phase.entered_at, entered);
        }
    }

    #[test]
    fn test_entered_at_tracks_transitions() {
        let mut c = PhaseClassifier::new(PhaseSpace::default(), 0);
        c.update(0.1, 0.1, 1);
        assert_eq!(c.current().entered_at, 0);
        c.update(0.1, 0.8, 5);
        assert_eq!(c.current().quadrant, SocialPhase::StartledRetreat);
        assert_eq!(c.current().entered_at, 5);
        c.reset(9);
        assert_eq!(c.current().quadrant, SocialPhase::ShyObserver);
        assert_eq!(c.current().entered_at, 9);
    }
}
