use retention_core::{
    arm::{default_catalog, Arm, OfferCategory},
    bandit::{OfferBandit, UpdateOutcome},
    config::BanditParams,
    error::BanditError,
    reward::UserResponse,
    rng::TenantRng,
};
use std::collections::BTreeSet;

// ── Test helpers ────────────────────────────────────────────────────────────

fn catalog_bandit(epsilon: f64, seed: u64) -> OfferBandit {
    let params = BanditParams { epsilon, ..Default::default() };
    OfferBandit::from_arms(default_catalog(), params, seed).unwrap()
}

fn arm_ids(bandit: &OfferBandit) -> BTreeSet<String> {
    bandit.arms().ids().map(str::to_string).collect()
}

fn two_arms() -> Vec<Arm> {
    vec![
        Arm::new("A", OfferCategory::Discount, 10.0, 0.1, "10% off"),
        Arm::new("B", OfferCategory::Discount, 50.0, 0.5, "50% off"),
    ]
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// Estimates and counts always cover exactly the configured arms, whatever
/// sequence of updates (including bad ids) the bandit sees.
#[test]
fn value_and_count_keys_match_arm_set() {
    let mut bandit = catalog_bandit(0.1, 3);
    let mut rng = TenantRng::from_seed(99);
    let expected = arm_ids(&bandit);
    let ids: Vec<String> = expected.iter().cloned().chain(["ghost".to_string()]).collect();

    for _ in 0..2_000 {
        let id = &ids[rng.next_u64_below(ids.len() as u64) as usize];
        let reward = rng.next_f64() * 2.0 - 1.0;
        let _ = bandit.update(id, reward);

        let state = bandit.get_state();
        let value_keys: BTreeSet<String> = state.values.keys().cloned().collect();
        let count_keys: BTreeSet<String> = state.counts.keys().cloned().collect();
        assert_eq!(value_keys, expected);
        assert_eq!(count_keys, expected);
    }
}

/// Each applied update raises the arm's count by exactly one.
#[test]
fn counts_increase_by_one_per_update() {
    let mut bandit = catalog_bandit(0.1, 3);
    for expected in 1..=25u64 {
        match bandit.update("pause_30", -0.2) {
            UpdateOutcome::Applied { count, .. } => assert_eq!(count, expected),
            other => panic!("expected Applied, got {other:?}"),
        }
        assert_eq!(bandit.count("pause_30"), Some(expected));
    }
    assert_eq!(bandit.update("not_an_arm", 1.0), UpdateOutcome::UnknownArm);
    assert_eq!(bandit.count("pause_30"), Some(25));
}

/// A constant reward of 1.0 drives the estimate to 1.0; untouched arms stay at 0.
#[test]
fn estimate_converges_under_constant_reward() {
    let mut bandit = catalog_bandit(0.1, 3);
    for _ in 0..1_000 {
        let _ = bandit.update("discount_25", 1.0);
    }
    let estimate = bandit.value_estimate("discount_25").unwrap();
    assert!((estimate - 1.0).abs() < 1e-6, "estimate {estimate} did not converge");

    for arm in bandit.arms().iter().filter(|a| a.id != "discount_25") {
        assert_eq!(bandit.value_estimate(&arm.id), Some(0.0), "{} moved", arm.id);
    }
}

/// With all estimates equal, roughly epsilon of the selections are exploratory.
/// 10,000 draws at p = 0.1 have sd = 30; the band is ±4.5 sd.
#[test]
fn exploration_rate_matches_epsilon() {
    let mut bandit = catalog_bandit(0.1, 0x5EED);
    let mut explored = 0u32;
    for _ in 0..10_000 {
        let choice = bandit.choose();
        if choice.explored {
            explored += 1;
        } else {
            assert_eq!(choice.index, 0, "greedy ties must resolve to the first arm");
        }
    }
    assert!(
        (865..=1_135).contains(&explored),
        "explored {explored} of 10000, expected about 1000"
    );
}

/// Exploratory picks cover the whole catalog.
#[test]
fn exploration_reaches_every_arm() {
    let mut bandit = catalog_bandit(1.0, 11);
    let mut seen = BTreeSet::new();
    for _ in 0..1_000 {
        seen.insert(bandit.select_action().id.clone());
    }
    assert_eq!(seen, arm_ids(&bandit));
}

/// Round-tripping state through a snapshot leaves every metric unchanged.
#[test]
fn snapshot_round_trip_preserves_metrics() {
    let mut bandit = catalog_bandit(0.1, 3);
    let _ = bandit.update("discount_10", 0.8);
    let _ = bandit.update("discount_10", -0.1);
    let _ = bandit.update("trial_ext_14", 0.3);
    bandit.decay_epsilon(0.9);
    let before = bandit.get_metrics();

    let snapshot = bandit.get_state();
    let report = bandit.load_state(&snapshot);

    assert!(report.is_exact());
    assert_eq!(bandit.get_metrics(), before);
}

/// Snapshots survive JSON and restore into a fresh bandit.
#[test]
fn snapshot_restores_into_fresh_instance() {
    let mut bandit = catalog_bandit(0.1, 3);
    let _ = bandit.update("pause_60", 0.5);
    let json = bandit.get_state().to_json().unwrap();

    let mut fresh = catalog_bandit(0.1, 4);
    let report = fresh.load_state(&retention_core::BanditSnapshot::from_json(&json).unwrap());

    assert!(report.is_exact());
    assert_eq!(fresh.count("pause_60"), Some(1));
    let restored = fresh.value_estimate("pause_60").unwrap();
    assert!((restored - 0.05).abs() < 1e-12, "restored {restored}");
    assert_eq!(fresh.last_updated(), bandit.last_updated());
}

/// Repeated halving from 0.1 stops at the 0.01 floor.
#[test]
fn epsilon_never_decays_below_floor() {
    let mut bandit = catalog_bandit(0.1, 3);
    for _ in 0..64 {
        let eps = bandit.decay_epsilon(0.5);
        assert!(eps >= 0.01, "epsilon fell to {eps}");
    }
    assert_eq!(bandit.epsilon(), 0.01);
}

/// The two-arm reference scenario from the reward policy.
#[test]
fn two_arm_reward_scenario() {
    let bandit = OfferBandit::from_arms(two_arms(), BanditParams::default(), 1).unwrap();

    // 100 × (1 − 0.1) − 0.1 × 0.1 = 89.99, clamped
    let accepted = bandit.calculate_reward("A", UserResponse::Accepted, 100.0, 0.1);
    assert_eq!(accepted, 1.0);

    // −0.1 − 0.5 × 0.1
    let declined = bandit.calculate_reward("B", UserResponse::Declined, 100.0, 0.5);
    assert!((declined - (-0.15)).abs() < 1e-12, "got {declined}");
    assert!((-1.0..=1.0).contains(&declined));
}

/// A snapshot from another catalog is reconciled: unknown arms dropped,
/// new arms start at zero, and the key-set invariant holds.
#[test]
fn mismatched_snapshot_is_reconciled() {
    let mut old = OfferBandit::from_arms(two_arms(), BanditParams::default(), 1).unwrap();
    let _ = old.update("A", 1.0);
    let _ = old.update("B", 0.5);
    let snapshot = old.get_state();

    let arms = vec![
        Arm::new("A", OfferCategory::Discount, 10.0, 0.1, "10% off"),
        Arm::new("C", OfferCategory::Pause, 30.0, 0.2, "pause"),
    ];
    let mut new = OfferBandit::from_arms(arms, BanditParams::default(), 1).unwrap();
    let report = new.load_state(&snapshot);

    assert_eq!(report.dropped, vec!["B".to_string()]);
    assert_eq!(report.missing, vec!["C".to_string()]);
    assert_eq!(new.value_estimate("A"), old.value_estimate("A"));
    assert_eq!(new.count("C"), Some(0));
    assert_eq!(new.value_estimate("C"), Some(0.0));
    let keys: BTreeSet<String> = new.get_state().values.keys().cloned().collect();
    assert_eq!(keys, arm_ids(&new));
}

/// The strict loader refuses a mismatched snapshot and leaves state alone.
#[test]
fn strict_load_rejects_mismatch() {
    let mut old = OfferBandit::from_arms(two_arms(), BanditParams::default(), 1).unwrap();
    let _ = old.update("B", 0.5);
    let snapshot = old.get_state();

    let mut other = catalog_bandit(0.1, 3);
    let before = other.get_state();
    let err = other.load_state_strict(&snapshot).unwrap_err();

    assert!(matches!(err, BanditError::SnapshotMismatch { .. }));
    assert_eq!(other.get_state(), before);
}
