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

//! Situational fingerprints: the context key every trust history is filed under.
//!
//! The sensing collaborator hands over a [`FeatureSnapshot`] whose six dimensions
//! are already discretised into bands. [`FingerprintBuilder`] turns it into a
//! [`ContextKey`]: an immutable, hashable, totally ordered band tuple.
//!
//! A key describes a *situation*, never an individual. Bright-and-quiet with
//! someone close by is one key no matter who is standing there.
//!
//! ```rust
//! use ccf_relational::fingerprint::{
//!     BrightnessBand, FeatureSnapshot, FingerprintBuilder, NoiseBand, PresenceSignature,
//!     MotionContext, Orientation, TimePeriod,
//! };
//!
//! let snapshot = FeatureSnapshot {
//!     brightness: Some(BrightnessBand::Bright),
//!     noise: Some(NoiseBand::Quiet),
//!     presence: Some(PresenceSignature::Close),
//!     motion: Some(MotionContext::Static),
//!     orientation: Some(Orientation::Upright),
//!     time_period: None, // RTC not set yet
//! };
//! let key = FingerprintBuilder::new().build_or_unknown(&snapshot);
//! assert_eq!(key.time_period, TimePeriod::Unknown);
//! ```
//!
//! # Invariants
//! - A fingerprint is always produced on the control loop: missing bands become `Unknown`.
//! - `context_hash_u32()` is deterministic across restarts.

use core::fmt;

use tracing::debug;

use crate::error::{CcfError, CcfResult};

/// Ambient light level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BrightnessBand {
    /// Very low ambient light (night, dark room).
    Dark,
    /// Moderate ambient light (indoor daytime, lamp).
    Dim,
    /// High ambient light (bright room, direct sunlight).
    Bright,
    /// Reserved band for a missing or invalid reading.
    Unknown,
}

/// Ambient sound level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NoiseBand {
    /// Very low ambient noise (silent room).
    Quiet,
    /// Moderate ambient noise (background conversation, music).
    Moderate,
    /// High ambient noise (crowd, machinery, shouting).
    Loud,
    /// Reserved band for a missing or invalid reading.
    Unknown,
}

/// Presence / motion pattern of whatever is nearby.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PresenceSignature {
    /// Nothing detected in sensor range.
    Absent,
    /// Presence detected in the outer detection zone.
    Far,
    /// Presence detected in close proximity.
    Close,
    /// Reserved band for a missing or invalid reading.
    Unknown,
}

/// The robot's own motion state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MotionContext {
    /// Stationary.
    Static,
    /// Moving below the speed threshold.
    Slow,
    /// Moving above the speed threshold.
    Fast,
    /// Reserved band for a missing or invalid reading.
    Unknown,
}

/// Orientation of the robot body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Orientation {
    /// Tilt within the upright range.
    Upright,
    /// Tilted beyond the upright threshold (picked up, on a slope).
    Tilted,
    /// Reserved band for a missing or invalid reading.
    Unknown,
}

/// Time-of-day bucket, set by the host application or RTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TimePeriod {
    /// Daytime hours.
    Day,
    /// Evening hours.
    Evening,
    /// Night-time hours.
    Night,
    /// Reserved band for a missing or invalid reading.
    Unknown,
}

/// One of the six fingerprint dimensions. Used to name a missing band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// Illumination band.
    Brightness,
    /// Ambient-noise band.
    Noise,
    /// Presence pattern band.
    Presence,
    /// Self-motion band.
    Motion,
    /// Orientation band.
    Orientation,
    /// Time-of-day bucket.
    TimePeriod,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Brightness => "brightness",
            Dimension::Noise => "noise",
            Dimension::Presence => "presence",
            Dimension::Motion => "motion",
            Dimension::Orientation => "orientation",
            Dimension::TimePeriod => "time-period",
        };
        f.write_str(name)
    }
}

/// Per-tick feature snapshot from the sensing collaborator.
///
/// Every dimension is optional: a sensor may drop out for a tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureSnapshot {
    /// Illumination band.
    pub brightness: Option<BrightnessBand>,
    /// Ambient-noise band.
    pub noise: Option<NoiseBand>,
    /// Presence pattern band.
    pub presence: Option<PresenceSignature>,
    /// Self-motion band.
    pub motion: Option<MotionContext>,
    /// Orientation band.
    pub orientation: Option<Orientation>,
    /// Time-of-day bucket.
    pub time_period: Option<TimePeriod>,
}

impl FeatureSnapshot {
    /// Snapshot with every band present.
    pub fn complete(
        brightness: BrightnessBand,
        noise: NoiseBand,
        presence: PresenceSignature,
        motion: MotionContext,
        orientation: Orientation,
        time_period: TimePeriod,
    ) -> Self {
        Self {
            brightness: Some(brightness),
            noise: Some(noise),
            presence: Some(presence),
            motion: Some(motion),
            orientation: Some(orientation),
            time_period: Some(time_period),
        }
    }

    /// Dimensions with no reading, in fingerprint order.
    pub fn missing(&self) -> impl Iterator<Item = Dimension> + '_ {
        [
            (self.brightness.is_none(), Dimension::Brightness),
            (self.noise.is_none(), Dimension::Noise),
            (self.presence.is_none(), Dimension::Presence),
            (self.motion.is_none(), Dimension::Motion),
            (self.orientation.is_none(), Dimension::Orientation),
            (self.time_period.is_none(), Dimension::TimePeriod),
        ]
        .into_iter()
        .filter_map(|(missing, dim)| missing.then_some(dim))
    }
}

/// Composite situational fingerprint.
///
/// Equality, hashing and ordering are on the exact band tuple. The ordering is
/// what makes group representatives and graph node order deterministic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContextKey {
    /// Illumination band.
    pub brightness: BrightnessBand,
    /// Ambient-noise band.
    pub noise: NoiseBand,
    /// Presence pattern band.
    pub presence: PresenceSignature,
    /// Self-motion band.
    pub motion: MotionContext,
    /// Orientation band.
    pub orientation: Orientation,
    /// Time-of-day bucket.
    pub time_period: TimePeriod,
}

impl ContextKey {
    /// Key with every band set to `Unknown`.
    pub const UNKNOWN: ContextKey = ContextKey {
        brightness: BrightnessBand::Unknown,
        noise: NoiseBand::Unknown,
        presence: PresenceSignature::Unknown,
        motion: MotionContext::Unknown,
        orientation: Orientation::Unknown,
        time_period: TimePeriod::Unknown,
    };

    /// Band ordinals in fingerprint order.
    fn ordinals(&self) -> [u8; 6] {
        [
            self.brightness as u8,
            self.noise as u8,
            self.presence as u8,
            self.motion as u8,
            self.orientation as u8,
            self.time_period as u8,
        ]
    }

    /// Deterministic FNV-1a hash of the band tuple.
    ///
    /// Stable across restarts; used for storage keys and snapshots.
    pub fn context_hash_u32(&self) -> u32 {
        let mut h: u32 = 2_166_136_261;
        for b in self.ordinals() {
            h ^= b as u32;
            h = h.wrapping_mul(16_777_619);
        }
        h
    }

    /// True if any band is the reserved `Unknown` value.
    pub fn has_unknown(&self) -> bool {
        self.brightness == BrightnessBand::Unknown
            || self.noise == NoiseBand::Unknown
            || self.presence == PresenceSignature::Unknown
            || self.motion == MotionContext::Unknown
            || self.orientation == Orientation::Unknown
            || self.time_period == TimePeriod::Unknown
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?}/{:?}/{:?}/{:?}/{:?}",
            self.brightness,
            self.noise,
            self.presence,
            self.motion,
            self.orientation,
            self.time_period
        )
    }
}

/// Builds [`ContextKey`]s from feature snapshots. Stateless.
#[derive(Clone, Copy, Debug, Default)]
pub struct FingerprintBuilder;

impl FingerprintBuilder {
    /// Create a builder.
    pub fn new() -> Self {
        Self
    }

    /// Strict build: fails with [`CcfError::InvalidContext`] on the first missing band.
    pub fn build(&self, snapshot: &FeatureSnapshot) -> CcfResult<ContextKey> {
        Ok(ContextKey {
            brightness: snapshot
                .brightness
                .ok_or(CcfError::InvalidContext(Dimension::Brightness))?,
            noise: snapshot
                .noise
                .ok_or(CcfError::InvalidContext(Dimension::Noise))?,
            presence: snapshot
                .presence
                .ok_or(CcfError::InvalidContext(Dimension::Presence))?,
            motion: snapshot
                .motion
                .ok_or(CcfError::InvalidContext(Dimension::Motion))?,
            orientation: snapshot
                .orientation
                .ok_or(CcfError::InvalidContext(Dimension::Orientation))?,
            time_period: snapshot
                .time_period
                .ok_or(CcfError::InvalidContext(Dimension::TimePeriod))?,
        })
    }

    /// Control-loop build: always yields a key, substituting `Unknown` for
    /// every missing band.
    pub fn build_or_unknown(&self, snapshot: &FeatureSnapshot) -> ContextKey {
        match self.build(snapshot) {
            Ok(key) => key,
            Err(err) => {
                debug!(
                    error = %err,
                    missing = snapshot.missing().count(),
                    "substituting unknown bands"
                );
                ContextKey {
                    brightness: snapshot.brightness.unwrap_or(BrightnessBand::Unknown),
                    noise: snapshot.noise.unwrap_or(NoiseBand::Unknown),
                    presence: snapshot.presence.unwrap_or(PresenceSignature::Unknown),
                    motion: snapshot.motion.unwrap_or(MotionContext::Unknown),
                    orientation: snapshot.orientation.unwrap_or(Orientation::Unknown),
                    time_period: snapshot.time_period.unwrap_or(TimePeriod::Unknown),
                }
            }
        }
    }
}
