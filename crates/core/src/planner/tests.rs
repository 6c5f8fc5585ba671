use super::*;
use crate::exit_code::{ExitCode, HasExitCode};
use proptest::prelude::*;
use zfs_io::Location;

fn inventory(dataset: &str, snapshots: &[(&str, &str, i64)]) -> Inventory {
    Inventory::from_snapshots(
        snapshots
            .iter()
            .map(|(suffix, guid, creation)| {
                Snapshot::new(
                    format!("{dataset}@{suffix}"),
                    *guid,
                    *creation,
                    u64::try_from(*creation).unwrap(),
                )
            })
            .collect(),
    )
}

fn allow() -> Policy {
    Policy {
        allow_overwrite: true,
        ..Policy::default()
    }
}

fn unused_written() -> Result<u64, ReplicationError> {
    panic!("written must not be queried")
}

fn source() -> Inventory {
    inventory("tank/data", &[("a", "G0", 100), ("b", "G1", 200), ("c", "G2", 300)])
}

#[test]
fn missing_destination_is_plain_full_send() {
    let decision = plan(&source(), &Inventory::Missing, &allow(), "backup/data", unused_written)
        .expect("plan");
    assert_eq!(decision, TransferPlan::default());
    assert!(!decision.force_overwrite());
    assert_eq!(decision.to_string(), "full send");
}

#[test]
fn empty_destination_decisions() {
    let reuse_and_allow = Policy {
        allow_overwrite: true,
        use_existing_dest: true,
        ..Policy::default()
    };
    let decision = plan(&source(), &Inventory::Empty, &reuse_and_allow, "backup/data", unused_written)
        .expect("plan");
    assert_eq!(decision.force, Some(ForceReason::EmptyExistingDestination));
    assert_eq!(decision.incremental_base, None);

    let reuse_only = Policy {
        use_existing_dest: true,
        ..Policy::default()
    };
    let err = plan(&source(), &Inventory::Empty, &reuse_only, "backup/data", unused_written)
        .unwrap_err();
    assert_eq!(err.policy_reason(), Some(PolicyReason::EmptyExistingDestination));
    assert_eq!(err.exit_code(), ExitCode::PolicyRefusal);

    let decision = plan(&source(), &Inventory::Empty, &Policy::default(), "backup/data", unused_written)
        .expect("plan");
    assert_eq!(decision, TransferPlan::default());
}

#[test]
fn unrelated_destination_is_refused_without_overwrite() {
    let destination = inventory("backup/data", &[("x", "G7", 150), ("y", "G8", 250)]);
    let err = plan(&source(), &destination, &Policy::default(), "backup/data", unused_written)
        .unwrap_err();
    assert_eq!(err.policy_reason(), Some(PolicyReason::NoCommonSnapshot));
    assert_eq!(err.exit_code().as_i32(), 2);
    assert!(err.to_string().contains("allowOverwrite"));
}

#[test]
fn unrelated_destination_is_replaced_with_overwrite() {
    let destination = inventory("backup/data", &[("x", "G7", 150)]);
    let decision = plan(&source(), &destination, &allow(), "backup/data", unused_written).expect("plan");
    assert_eq!(decision.incremental_base, None);
    assert_eq!(decision.force, Some(ForceReason::NoCommonSnapshot));
}

#[test]
fn base_is_newest_common_snapshot_named_on_the_source() {
    // Same lineage, different names on the destination.
    let destination = inventory("backup/data", &[("old", "G0", 100), ("renamed", "G1", 200)]);
    let decision = plan(
        &source(),
        &destination,
        &Policy::default(),
        "backup/data",
        unused_written,
    )
    .expect("plan");
    assert_eq!(decision.incremental_base.as_deref(), Some("tank/data@b"));
    assert_eq!(decision.force, None);
    assert_eq!(decision.to_string(), "incremental from tank/data@b");
}

#[test]
fn destination_ahead_is_forced_when_allowed() {
    let destination = inventory("backup/data", &[("b", "G1", 200), ("local", "G9", 400)]);
    let decision = plan(&source(), &destination, &allow(), "backup/data", unused_written).expect("plan");
    assert_eq!(decision.incremental_base.as_deref(), Some("tank/data@b"));
    assert_eq!(decision.force, Some(ForceReason::DestinationAhead));
    assert!(decision.to_string().ends_with("forced (destination has snapshots the source does not)"));
}

#[test]
fn destination_ahead_is_refused_otherwise() {
    let destination = inventory("backup/data", &[("b", "G1", 200), ("local", "G9", 400)]);
    let err = plan(&source(), &destination, &Policy::default(), "backup/data", unused_written)
        .unwrap_err();
    assert_eq!(err.policy_reason(), Some(PolicyReason::DestinationAhead));
}

#[test]
fn destination_only_snapshots_before_the_base_are_not_ahead() {
    let destination = inventory("backup/data", &[("manual", "G9", 50), ("b", "G1", 200)]);
    let decision = plan(
        &source(),
        &destination,
        &Policy::default(),
        "backup/data",
        unused_written,
    )
    .expect("plan");
    assert_eq!(decision.force, None);
}

#[test]
fn out_of_band_writes_force_when_allowed() {
    let destination = inventory("backup/data", &[("b", "G1", 200)]);
    let decision = plan(&source(), &destination, &allow(), "backup/data", || Ok(4096)).expect("plan");
    assert_eq!(decision.force, Some(ForceReason::WrittenSinceSnapshot));

    let decision = plan(&source(), &destination, &allow(), "backup/data", || Ok(0)).expect("plan");
    assert_eq!(decision.force, None);
}

#[test]
fn failed_written_query_is_ignored() {
    let destination = inventory("backup/data", &[("b", "G1", 200)]);
    let decision = plan(&source(), &destination, &allow(), "backup/data", || {
        Err(ReplicationError::Parse {
            operation: "get",
            target: "backup/data".into(),
            detail: "garbage".into(),
        })
    })
    .expect("plan");
    assert_eq!(decision.force, None);
    assert_eq!(decision.incremental_base.as_deref(), Some("tank/data@b"));
}

#[test]
fn dataset_name_appears_in_refusal() {
    let destination = inventory("backup/data", &[("x", "G7", 150)]);
    let name = crate::dataset::Dataset::new("backup", "data", Location::Local);
    let err = plan(&source(), &destination, &Policy::default(), name.name(), unused_written)
        .unwrap_err();
    assert!(err.to_string().starts_with("refusing to replicate backup/data"));
}

/// Snapshots drawn from one lineage: GUID `n` was created at `n * 10`, so a
/// GUID present on both sides has the same creation time on both.
fn lineage(dataset: &'static str) -> impl Strategy<Value = Vec<Snapshot>> {
    prop::collection::btree_set(0u8..12, 0..6).prop_map(move |guids| {
        guids
            .into_iter()
            .map(|guid| {
                let creation = i64::from(guid) * 10;
                Snapshot::new(
                    format!("{dataset}@s{guid}"),
                    format!("G{guid}"),
                    creation,
                    u64::from(guid),
                )
            })
            .collect()
    })
}

fn destination_strategy() -> impl Strategy<Value = Inventory> {
    prop_oneof![
        Just(Inventory::Missing),
        lineage("backup/data").prop_map(Inventory::from_snapshots),
    ]
}

fn policy_strategy() -> impl Strategy<Value = Policy> {
    (any::<bool>(), any::<bool>()).prop_map(|(allow_overwrite, use_existing_dest)| Policy {
        allow_overwrite,
        use_existing_dest,
        resume_fail_allow_overwrite: false,
    })
}

proptest! {
    /// Property: the incremental base exists on both sides by GUID.
    #[test]
    fn base_guid_is_shared(
        source in lineage("tank/data").prop_map(Inventory::from_snapshots),
        destination in destination_strategy(),
        policy in policy_strategy(),
        written in 0u64..3,
    ) {
        if let Ok(plan) = plan(&source, &destination, &policy, "backup/data", || Ok(written)) {
            if let Some(base) = plan.incremental_base {
                let guid = source
                    .snapshots()
                    .iter()
                    .find(|snapshot| snapshot.name() == base)
                    .map(Snapshot::guid);
                prop_assert!(guid.is_some());
                prop_assert!(destination.by_guid(guid.unwrap_or_default()).is_some());
            }
        }
    }

    /// Property: a forced plan always has permission and a justifying condition.
    #[test]
    fn force_is_always_justified(
        source in lineage("tank/data").prop_map(Inventory::from_snapshots),
        destination in destination_strategy(),
        policy in policy_strategy(),
        written in 0u64..3,
    ) {
        let result = plan(&source, &destination, &policy, "backup/data", || Ok(written));
        let Ok(plan) = result else {
            return Ok(());
        };
        let Some(reason) = plan.force else {
            return Ok(());
        };
        prop_assert!(policy.allow_overwrite);

        let source_guids = source.guids();
        let shared = destination
            .snapshots()
            .iter()
            .filter(|snapshot| source_guids.contains(snapshot.guid()))
            .max_by_key(|snapshot| snapshot.sort_key());
        match reason {
            ForceReason::EmptyExistingDestination => {
                prop_assert_eq!(&destination, &Inventory::Empty);
                prop_assert!(policy.use_existing_dest);
            }
            ForceReason::NoCommonSnapshot => {
                prop_assert!(!destination.snapshots().is_empty());
                prop_assert!(shared.is_none());
            }
            ForceReason::DestinationAhead => {
                let base = shared.map(Snapshot::sort_key);
                prop_assert!(base.is_some());
                let ahead = destination.snapshots().iter().any(|snapshot| {
                    Some(snapshot.sort_key()) > base && !source_guids.contains(snapshot.guid())
                });
                prop_assert!(ahead);
            }
            ForceReason::WrittenSinceSnapshot => {
                prop_assert!(written > 0);
                prop_assert!(plan.incremental_base.is_some());
            }
        }
    }
}
