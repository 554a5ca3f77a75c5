//! CCF_SEG round-trip integration tests.
//!
//! Verifies that a live AccumulatorStore can be captured as a CcfSegSnapshot,
//! serialised to JSON, deserialised back, and restored into a fresh store with
//! all group values and memberships preserved exactly.

#[cfg(feature = "serde")]
mod tests {
    use std::sync::Arc;

    use ccf_relational::accumulator::{AccumulatorConfig, AccumulatorStore};
    use ccf_relational::fingerprint::{
        BrightnessBand, ContextKey, MotionContext, NoiseBand, Orientation, PresenceSignature,
        TimePeriod,
    };
    use ccf_relational::groups::{GroupId, GroupTable};
    use ccf_relational::phase::Personality;
    use ccf_relational::seg::{CcfSegSnapshot, CCF_SEG_VERSION};

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn make_key(brightness: BrightnessBand, noise: NoiseBand) -> ContextKey {
        ContextKey {
            brightness,
            noise,
            presence: PresenceSignature::Absent,
            motion: MotionContext::Static,
            orientation: Orientation::Upright,
            time_period: TimePeriod::Day,
        }
    }

    fn bright_quiet() -> ContextKey {
        make_key(BrightnessBand::Bright, NoiseBand::Quiet)
    }

    fn dark_loud() -> ContextKey {
        make_key(BrightnessBand::Dark, NoiseBand::Loud)
    }

    fn dim_moderate() -> ContextKey {
        make_key(BrightnessBand::Dim, NoiseBand::Moderate)
    }

    fn personality() -> Personality {
        Personality {
            curiosity_drive: 0.8,
            startle_sensitivity: 0.3,
            recovery_speed: 0.7,
        }
    }

    /// A store with three singleton groups of known history.
    fn make_store() -> AccumulatorStore {
        let mut store = AccumulatorStore::new(AccumulatorConfig::default());
        for tick in 0..10u64 {
            store.record_positive(&bright_quiet(), 0.06, tick);
        }
        for tick in 0..5u64 {
            store.record_positive(&dark_loud(), 0.06, tick);
        }
        store.record_negative(&dark_loud(), 0.2, 5);
        for tick in 0..20u64 {
            store.record_positive(&dim_moderate(), 0.1, tick);
        }
        store
    }

    // ── Tests ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_snapshot_captures_every_group() {
        let store = make_store();
        let snapshot = CcfSegSnapshot::from_store(&store, &personality(), 1_000_000, 1_001_000);
        assert_eq!(snapshot.group_count(), 3, "got {}", snapshot.group_count());
        assert_eq!(snapshot.version, CCF_SEG_VERSION);
        assert_eq!(snapshot.total_interactions, 35);
    }

    #[test]
    fn test_snapshot_values_match_live_store() {
        let store = make_store();
        let snapshot = CcfSegSnapshot::from_store(&store, &personality(), 0, 0);
        for key in [bright_quiet(), dark_loud(), dim_moderate()] {
            let live = store.peek(&GroupId(key)).expect("live accumulator");
            let rec = snapshot.find_group(&key).expect("group in snapshot");
            assert!(
                (rec.coherence_value - live.value).abs() < 1e-6,
                "{}: snapshot={} live={}",
                key,
                rec.coherence_value,
                live.value
            );
            assert_eq!(rec.interaction_count, live.interaction_count);
            assert_eq!(rec.members, vec![key]);
        }
    }

    #[test]
    fn test_ccf_seg_round_trip_json() {
        let store = make_store();
        let original = CcfSegSnapshot::from_store(&store, &personality(), 1_740_000_000, 1_740_001_000);

        let json = serde_json::to_string(&original).expect("serialise to JSON");
        let restored: CcfSegSnapshot = serde_json::from_str(&json).expect("deserialise from JSON");

        assert_eq!(original, restored, "snapshot changed across JSON round-trip");
        let p = Personality::from(&restored.personality);
        assert!((p.curiosity_drive - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_restore_into_fresh_store() {
        let store = make_store();
        let snapshot = CcfSegSnapshot::from_store(&store, &personality(), 0, 0);

        let mut fresh = AccumulatorStore::new(AccumulatorConfig::default());
        assert_eq!(snapshot.restore_into(&mut fresh), Ok(3));
        for key in [bright_quiet(), dark_loud(), dim_moderate()] {
            assert_eq!(fresh.peek(&GroupId(key)), store.peek(&GroupId(key)));
        }
        // Second restore leaves live state alone.
        assert_eq!(snapshot.restore_into(&mut fresh), Ok(0));
    }

    #[test]
    fn test_merged_group_membership_survives() {
        let mut store = make_store();
        let table = GroupTable::from_partition(1, vec![vec![bright_quiet(), dim_moderate()], vec![dark_loud()]]);
        store.apply_table(Arc::new(table));

        let snapshot = CcfSegSnapshot::from_store(&store, &personality(), 0, 0);
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.group_count(), 2);
        let merged = snapshot.find_group(&dim_moderate()).expect("merged group");
        assert_eq!(merged.members.len(), 2);

        let mut fresh = AccumulatorStore::new(AccumulatorConfig::default());
        snapshot.restore_into(&mut fresh).unwrap();
        assert_eq!(fresh.group_of(&bright_quiet()), fresh.group_of(&dim_moderate()));
        assert_eq!(fresh.table().generation(), 1);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut snapshot = CcfSegSnapshot::from_store(&make_store(), &personality(), 0, 0);
        snapshot.version = 1;
        let mut fresh = AccumulatorStore::new(AccumulatorConfig::default());
        assert!(snapshot.restore_into(&mut fresh).is_err());
    }

    #[test]
    fn test_empty_store_snapshot() {
        let store = AccumulatorStore::new(AccumulatorConfig::default());
        let snapshot = CcfSegSnapshot::from_store(&store, &Personality::new(), 0, 0);
        assert_eq!(snapshot.group_count(), 0);
        let json = serde_json::to_string(&snapshot).expect("serialise empty snapshot");
        let restored: CcfSegSnapshot = serde_json::from_str(&json).expect("deserialise empty snapshot");
        assert_eq!(restored.group_count(), 0);
        assert!(restored.find_group(&bright_quiet()).is_none());
    }
}
