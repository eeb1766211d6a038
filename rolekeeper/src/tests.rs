// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use rolekeeper_core::{
    ChannelId, CommunityId, CommunityPolicy, DangerousMode, Disposition, LogFlags, Permissions,
    RoleAction, RoleId, UserId,
};
use rolekeeper_store::{MemoryStore, PolicyStore, Transaction};

use crate::events::{EventDispatcher, PlatformEvent, SharedHandler, subscribe_all};
use crate::log::LogEntry;
use crate::test_utils::{
    DEFAULT_AGENT_RANK, Grant, TestPlatform, failing_warden, setup_logging, test_warden,
};
use crate::{ClearedCommunity, RoleOutcome, SnapshotOutcome, Warden, WardenError};

const COMMUNITY: CommunityId = CommunityId::new(1);
const OTHER_COMMUNITY: CommunityId = CommunityId::new(2);
const USER: UserId = UserId::new(10);
const CHANNEL: ChannelId = ChannelId::new(500);

const ROLE_A: RoleId = RoleId::new(7);
const ROLE_B: RoleId = RoleId::new(8);
const ROLE_C: RoleId = RoleId::new(9);

fn roles(role_ids: &[RoleId]) -> BTreeSet<RoleId> {
    role_ids.iter().copied().collect()
}

/// Member held the given roles, left and is about to rejoin without any.
async fn member_left_with(
    warden: &Warden<MemoryStore, TestPlatform>,
    platform: &TestPlatform,
    role_ids: &[RoleId],
) {
    platform.add_member(COMMUNITY, USER, role_ids);
    let outcome = warden
        .on_roles_changed(COMMUNITY, USER, None, &roles(role_ids))
        .await
        .unwrap();
    assert!(outcome.is_written());
    platform.add_member(COMMUNITY, USER, &[]);
}

#[tokio::test]
async fn restore_saved_roles() {
    setup_logging();

    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_role(COMMUNITY, ROLE_B, 2);

    let warden = test_warden(platform.clone());
    member_left_with(&warden, &platform, &[ROLE_A, ROLE_B]).await;

    let report = warden
        .on_member_join(COMMUNITY, USER)
        .await
        .unwrap()
        .expect("restoration ran");

    assert_eq!(report.applied(), 2);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.applied_roles(), vec![ROLE_A, ROLE_B]);
    assert!(!report.logged);

    assert_eq!(
        platform.grants(),
        vec![
            Grant {
                community_id: COMMUNITY,
                user_id: USER,
                role_id: ROLE_A,
                reason: Some("Restoring roles of rejoining member".into()),
            },
            Grant {
                community_id: COMMUNITY,
                user_id: USER,
                role_id: ROLE_B,
                reason: Some("Restoring roles of rejoining member".into()),
            },
        ]
    );

    // Live role set after the restoration was saved again.
    let saved = warden.saved_roles(COMMUNITY, USER).await.unwrap().unwrap();
    assert_eq!(saved.role_ids, roles(&[ROLE_A, ROLE_B]));
    assert!(warden.guard().is_empty().unwrap());
}

#[tokio::test]
async fn join_without_saved_roles() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_member(COMMUNITY, USER, &[ROLE_A]);

    let warden = test_warden(platform.clone());
    let report = warden.on_member_join(COMMUNITY, USER).await.unwrap().unwrap();

    assert!(report.outcomes.is_empty());
    assert!(platform.grants().is_empty());

    // First observation of the member is remembered.
    let saved = warden.saved_roles(COMMUNITY, USER).await.unwrap().unwrap();
    assert_eq!(saved.role_ids, roles(&[ROLE_A]));
}

#[tokio::test]
async fn dangerous_roles_are_never_restored_when_always_ignored() {
    let platform = TestPlatform::new();
    platform.add_role_with(COMMUNITY, ROLE_A, 1, Permissions::ADMINISTRATOR, false);
    platform.add_role(COMMUNITY, ROLE_B, 2);

    let warden = test_warden(platform.clone());
    warden
        .set_dangerous_mode(COMMUNITY, DangerousMode::AlwaysIgnore)
        .await
        .unwrap();
    warden
        .set_role_policy(COMMUNITY, ROLE_A, RoleAction::Persist)
        .await
        .unwrap();

    member_left_with(&warden, &platform, &[ROLE_A, ROLE_B]).await;
    let report = warden.on_member_join(COMMUNITY, USER).await.unwrap().unwrap();

    assert_eq!(report.outcome(ROLE_A), Some(&RoleOutcome::SkippedPolicy));
    assert_eq!(report.outcome(ROLE_B), Some(&RoleOutcome::Applied));
    assert!(platform.grants().iter().all(|grant| grant.role_id != ROLE_A));
}

#[tokio::test]
async fn dangerous_roles_need_explicit_policy() {
    let platform = TestPlatform::new();
    platform.add_role_with(COMMUNITY, ROLE_A, 1, Permissions::KICK_MEMBERS, false);
    platform.add_role_with(COMMUNITY, ROLE_B, 2, Permissions::BAN_MEMBERS, false);

    let warden = test_warden(platform.clone());
    warden
        .set_role_policy(COMMUNITY, ROLE_B, RoleAction::Persist)
        .await
        .unwrap();

    member_left_with(&warden, &platform, &[ROLE_A, ROLE_B]).await;
    let report = warden.on_member_join(COMMUNITY, USER).await.unwrap().unwrap();

    assert_eq!(report.outcome(ROLE_A), Some(&RoleOutcome::SkippedPolicy));
    assert_eq!(report.outcome(ROLE_B), Some(&RoleOutcome::Applied));
}

#[tokio::test]
async fn permissions_are_classified_at_restoration_time() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);

    let warden = test_warden(platform.clone());
    member_left_with(&warden, &platform, &[ROLE_A]).await;

    // Role became dangerous while the member was away.
    platform.set_permissions(COMMUNITY, ROLE_A, Permissions::MANAGE_ROLES);

    let report = warden.on_member_join(COMMUNITY, USER).await.unwrap().unwrap();
    assert_eq!(report.outcome(ROLE_A), Some(&RoleOutcome::SkippedPolicy));
}

#[tokio::test]
async fn ignored_by_community_default() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_role(COMMUNITY, ROLE_B, 2);

    let warden = test_warden(platform.clone());
    warden
        .set_default_action(COMMUNITY, RoleAction::Ignore)
        .await
        .unwrap();
    warden
        .set_role_policy(COMMUNITY, ROLE_B, RoleAction::Persist)
        .await
        .unwrap();

    member_left_with(&warden, &platform, &[ROLE_A, ROLE_B]).await;
    let report = warden.on_member_join(COMMUNITY, USER).await.unwrap().unwrap();

    assert_eq!(report.outcome(ROLE_A), Some(&RoleOutcome::SkippedPolicy));
    assert_eq!(report.outcome(ROLE_B), Some(&RoleOutcome::Applied));
}

#[tokio::test]
async fn deleted_roles_are_skipped() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_role(COMMUNITY, ROLE_B, 2);

    let warden = test_warden(platform.clone());
    member_left_with(&warden, &platform, &[ROLE_A, ROLE_B]).await;
    platform.remove_role(COMMUNITY, ROLE_A);

    let report = warden.on_member_join(COMMUNITY, USER).await.unwrap().unwrap();
    assert_eq!(report.outcome(ROLE_A), Some(&RoleOutcome::SkippedMissing));
    assert_eq!(report.outcome(ROLE_B), Some(&RoleOutcome::Applied));

    // Looking at a missing role doesn't create a policy for it.
    let policies = warden
        .store()
        .community_role_policies(COMMUNITY)
        .await
        .unwrap();
    assert!(policies.is_empty());
}

#[tokio::test]
async fn capability_checks_per_role() {
    let platform = TestPlatform::new();
    platform.add_role_with(COMMUNITY, ROLE_A, 1, Permissions::SEND_MESSAGES, true);
    platform.add_role(COMMUNITY, ROLE_B, DEFAULT_AGENT_RANK);
    platform.add_role(COMMUNITY, ROLE_C, DEFAULT_AGENT_RANK - 1);

    let warden = test_warden(platform.clone());
    member_left_with(&warden, &platform, &[ROLE_A, ROLE_B, ROLE_C]).await;

    let report = warden.on_member_join(COMMUNITY, USER).await.unwrap().unwrap();
    assert_eq!(report.outcome(ROLE_A), Some(&RoleOutcome::SkippedManaged));
    assert_eq!(report.outcome(ROLE_B), Some(&RoleOutcome::SkippedRank));
    assert_eq!(report.outcome(ROLE_C), Some(&RoleOutcome::Applied));
    assert_eq!(platform.grants().len(), 1);
}

#[tokio::test]
async fn agent_without_role_management() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_role(COMMUNITY, ROLE_B, 2);
    platform.set_can_manage_roles(COMMUNITY, false);

    let warden = test_warden(platform.clone());
    member_left_with(&warden, &platform, &[ROLE_A, ROLE_B]).await;

    let report = warden.on_member_join(COMMUNITY, USER).await.unwrap().unwrap();
    assert_eq!(report.outcome(ROLE_A), Some(&RoleOutcome::SkippedPermission));
    assert_eq!(report.outcome(ROLE_B), Some(&RoleOutcome::SkippedPermission));
    assert!(platform.grants().is_empty());
}

#[tokio::test]
async fn failed_agent_lookup_fails_every_role() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_role_with(COMMUNITY, ROLE_B, 2, Permissions::SEND_MESSAGES, true);
    platform.add_role(COMMUNITY, ROLE_C, 3);

    let warden = test_warden(platform.clone());
    member_left_with(&warden, &platform, &[ROLE_A, ROLE_B, ROLE_C]).await;
    platform.fail_agent_lookup(true);

    let report = warden.on_member_join(COMMUNITY, USER).await.unwrap().unwrap();
    assert_matches!(report.outcome(ROLE_A), Some(RoleOutcome::Failed(_)));
    // Managed roles are skipped before the agent is looked at.
    assert_eq!(report.outcome(ROLE_B), Some(&RoleOutcome::SkippedManaged));
    assert_matches!(report.outcome(ROLE_C), Some(RoleOutcome::Failed(_)));
    assert_eq!(report.failed(), 2);
}

#[tokio::test]
async fn failures_do_not_affect_other_roles() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_role(COMMUNITY, ROLE_B, 2);
    platform.add_role(COMMUNITY, ROLE_C, 3);
    platform.fail_grant(ROLE_A);
    platform.fail_lookup(ROLE_B);

    let warden = test_warden(platform.clone());
    member_left_with(&warden, &platform, &[ROLE_A, ROLE_B, ROLE_C]).await;

    let report = warden.on_member_join(COMMUNITY, USER).await.unwrap().unwrap();
    assert_matches!(
        report.outcome(ROLE_A),
        Some(RoleOutcome::Failed(reason)) if reason.contains("granting role 7 failed")
    );
    assert_matches!(report.outcome(ROLE_B), Some(RoleOutcome::Failed(_)));
    assert_eq!(report.outcome(ROLE_C), Some(&RoleOutcome::Applied));
    assert_eq!(platform.roles_of(COMMUNITY, USER), Some(roles(&[ROLE_C])));
}

#[tokio::test]
async fn snapshots() {
    let platform = TestPlatform::new();
    let warden = test_warden(platform.clone());

    // "everyone" pseudo-role is never saved.
    let outcome = warden
        .on_roles_changed(
            COMMUNITY,
            USER,
            None,
            &roles(&[RoleId::everyone(COMMUNITY), ROLE_A]),
        )
        .await
        .unwrap();
    let first = assert_matches!(outcome, SnapshotOutcome::Written(saved) => saved);
    assert_eq!(first.role_ids, roles(&[ROLE_A]));

    // Unchanged role sets are not written again.
    let outcome = warden
        .on_roles_changed(
            COMMUNITY,
            USER,
            Some(&roles(&[ROLE_A])),
            &roles(&[ROLE_A]),
        )
        .await
        .unwrap();
    assert_eq!(outcome, SnapshotOutcome::Unchanged);
    assert_eq!(
        warden.saved_roles(COMMUNITY, USER).await.unwrap(),
        Some(first.clone())
    );

    let outcome = warden
        .on_roles_changed(
            COMMUNITY,
            USER,
            Some(&roles(&[ROLE_A])),
            &roles(&[ROLE_B]),
        )
        .await
        .unwrap();
    let second = assert_matches!(outcome, SnapshotOutcome::Written(saved) => saved);
    assert_eq!(second.role_ids, roles(&[ROLE_B]));
    assert!(second.timestamp > first.timestamp);

    // Losing every role is stored as an empty set, not as "never observed".
    let outcome = warden
        .on_roles_changed(COMMUNITY, USER, Some(&roles(&[ROLE_B])), &roles(&[]))
        .await
        .unwrap();
    let third = assert_matches!(outcome, SnapshotOutcome::Written(saved) => saved);
    assert!(third.is_empty());

    // Capturing needs the member to be present.
    assert_eq!(
        warden.capture_snapshot(COMMUNITY, UserId::new(99)).await.unwrap(),
        SnapshotOutcome::MemberMissing
    );
}

#[tokio::test]
async fn role_changes_during_restoration_are_ignored() {
    setup_logging();

    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_role(COMMUNITY, ROLE_B, 2);
    platform.add_role(COMMUNITY, ROLE_C, 3);

    let warden = test_warden(platform.clone());
    member_left_with(&warden, &platform, &[ROLE_A, ROLE_B]).await;
    let before = warden.saved_roles(COMMUNITY, USER).await.unwrap().unwrap();

    platform.close_gate();
    let handle = {
        let warden = warden.clone();
        tokio::spawn(async move { warden.on_member_join(COMMUNITY, USER).await })
    };
    platform.grant_started().await;

    assert!(warden.guard().is_held(COMMUNITY, USER).unwrap());

    // Another integration hands out a role while the restoration is in flight.
    platform.add_member(COMMUNITY, USER, &[ROLE_C]);
    let outcome = warden
        .on_roles_changed(COMMUNITY, USER, Some(&roles(&[])), &roles(&[ROLE_C]))
        .await
        .unwrap();
    assert_eq!(outcome, SnapshotOutcome::Restoring);
    assert_eq!(
        warden.capture_snapshot(COMMUNITY, USER).await.unwrap(),
        SnapshotOutcome::Restoring
    );
    assert_eq!(
        warden.saved_roles(COMMUNITY, USER).await.unwrap(),
        Some(before.clone())
    );

    // A second join of the same member is dropped.
    assert_eq!(warden.on_member_join(COMMUNITY, USER).await.unwrap(), None);

    platform.open_gate();
    let report = handle.await.unwrap().unwrap().expect("restoration ran");
    assert_eq!(report.applied(), 2);
    assert!(!warden.guard().is_held(COMMUNITY, USER).unwrap());

    // Final snapshot reflects the live role set, including the role granted in between.
    let after = warden.saved_roles(COMMUNITY, USER).await.unwrap().unwrap();
    assert_eq!(after.role_ids, roles(&[ROLE_A, ROLE_B, ROLE_C]));
    assert!(after.timestamp > before.timestamp);
}

#[tokio::test]
async fn role_change_waiting_for_store_during_restoration_is_dropped() {
    setup_logging();

    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_role(COMMUNITY, ROLE_B, 2);

    let warden = test_warden(platform.clone());
    member_left_with(&warden, &platform, &[ROLE_A]).await;
    let before = warden.saved_roles(COMMUNITY, USER).await.unwrap().unwrap();

    // Some other process holds the store's transaction.
    let permit = warden.store().begin().await.unwrap();

    // Role change passes the guard and queues up for the transaction.
    let change = {
        let warden = warden.clone();
        tokio::spawn(async move {
            let new_roles = roles(&[ROLE_B]);
            warden
                .on_roles_changed(COMMUNITY, USER, None, &new_roles)
                .await
        })
    };
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    assert!(!change.is_finished());

    // Restoration starts in the meantime.
    platform.close_gate();
    let join = {
        let warden = warden.clone();
        tokio::spawn(async move { warden.on_member_join(COMMUNITY, USER).await })
    };
    platform.grant_started().await;
    assert!(warden.guard().is_held(COMMUNITY, USER).unwrap());

    warden.store().commit(permit).await.unwrap();

    assert_eq!(change.await.unwrap().unwrap(), SnapshotOutcome::Restoring);
    assert_eq!(
        warden.saved_roles(COMMUNITY, USER).await.unwrap(),
        Some(before.clone())
    );

    platform.open_gate();
    let report = join.await.unwrap().unwrap().expect("restoration ran");
    assert_eq!(report.applied_roles(), vec![ROLE_A]);

    let after = warden.saved_roles(COMMUNITY, USER).await.unwrap().unwrap();
    assert_eq!(after.role_ids, roles(&[ROLE_A]));
    assert!(after.timestamp > before.timestamp);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_joins_restore_once() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);

    let warden = test_warden(platform.clone());
    member_left_with(&warden, &platform, &[ROLE_A]).await;

    platform.close_gate();
    let first = {
        let warden = warden.clone();
        tokio::spawn(async move { warden.on_member_join(COMMUNITY, USER).await })
    };
    platform.grant_started().await;

    // Every join arriving while the first restoration waits on its grant is dropped.
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let warden = warden.clone();
            tokio::spawn(async move { warden.on_member_join(COMMUNITY, USER).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), None);
    }

    platform.open_gate();
    let report = first.await.unwrap().unwrap().expect("restoration ran");

    // One report, one grant.
    assert_eq!(report.applied_roles(), vec![ROLE_A]);
    let grants = platform.grants();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].role_id, ROLE_A);
    assert!(warden.guard().is_empty().unwrap());
}

#[tokio::test]
async fn failed_store_read_aborts_restoration() {
    setup_logging();

    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_member(COMMUNITY, USER, &[ROLE_A]);

    let (warden, store) = failing_warden(platform.clone());
    warden
        .on_roles_changed(COMMUNITY, USER, None, &roles(&[ROLE_A]))
        .await
        .unwrap();
    let before = warden.saved_roles(COMMUNITY, USER).await.unwrap().unwrap();

    platform.add_member(COMMUNITY, USER, &[]);
    store.fail_reads(true);

    assert_matches!(
        warden.on_member_join(COMMUNITY, USER).await,
        Err(WardenError::Store(_))
    );
    assert!(warden.guard().is_empty().unwrap());
    assert!(platform.grants().is_empty());
    assert!(platform.sent_logs().is_empty());

    // Final snapshot still ran after the guard was released.
    store.fail_reads(false);
    let after = warden.saved_roles(COMMUNITY, USER).await.unwrap().unwrap();
    assert!(after.role_ids.is_empty());
    assert!(after.timestamp > before.timestamp);

    // Next join is handled normally again.
    assert!(warden.on_member_join(COMMUNITY, USER).await.unwrap().is_some());
}

#[tokio::test]
async fn failed_store_write_keeps_previous_role_set() {
    let platform = TestPlatform::new();
    platform.add_member(COMMUNITY, USER, &[ROLE_A]);

    let (warden, store) = failing_warden(platform.clone());
    warden
        .on_roles_changed(COMMUNITY, USER, None, &roles(&[ROLE_A]))
        .await
        .unwrap();
    let before = warden.saved_roles(COMMUNITY, USER).await.unwrap().unwrap();

    store.fail_writes(true);
    assert_matches!(
        warden
            .on_roles_changed(COMMUNITY, USER, Some(&roles(&[ROLE_A])), &roles(&[ROLE_B]))
            .await,
        Err(WardenError::Store(_))
    );
    assert_matches!(
        warden.capture_snapshot(COMMUNITY, USER).await,
        Err(WardenError::Store(_))
    );
    assert_eq!(
        warden.saved_roles(COMMUNITY, USER).await.unwrap(),
        Some(before.clone())
    );

    // Transaction was released, later writes go through.
    store.fail_writes(false);
    let outcome = warden
        .on_roles_changed(COMMUNITY, USER, Some(&roles(&[ROLE_A])), &roles(&[ROLE_B]))
        .await
        .unwrap();
    assert_matches!(outcome, SnapshotOutcome::Written(saved) if saved.role_ids == roles(&[ROLE_B]));
}

#[tokio::test]
async fn same_user_in_different_communities() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_role(OTHER_COMMUNITY, ROLE_B, 1);
    platform.add_member(OTHER_COMMUNITY, USER, &[]);

    let warden = test_warden(platform.clone());
    member_left_with(&warden, &platform, &[ROLE_A]).await;
    warden
        .on_roles_changed(OTHER_COMMUNITY, USER, None, &roles(&[ROLE_B]))
        .await
        .unwrap();

    let permit = warden
        .guard()
        .try_acquire(OTHER_COMMUNITY, USER)
        .unwrap()
        .unwrap();

    let report = warden.on_member_join(COMMUNITY, USER).await.unwrap().unwrap();
    assert_eq!(report.applied_roles(), vec![ROLE_A]);
    assert_eq!(
        warden.on_member_join(OTHER_COMMUNITY, USER).await.unwrap(),
        None
    );

    drop(permit);
    let report = warden
        .on_member_join(OTHER_COMMUNITY, USER)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.applied_roles(), vec![ROLE_B]);
}

#[tokio::test]
async fn leaving_community_clears_state() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_role(COMMUNITY, ROLE_B, 2);
    platform.add_role(OTHER_COMMUNITY, ROLE_C, 3);

    let warden = test_warden(platform.clone());
    warden
        .set_default_action(COMMUNITY, RoleAction::Ignore)
        .await
        .unwrap();
    warden
        .set_role_policy(COMMUNITY, ROLE_A, RoleAction::Persist)
        .await
        .unwrap();
    warden
        .set_role_policy(COMMUNITY, ROLE_B, RoleAction::Ignore)
        .await
        .unwrap();
    warden
        .set_role_policy(OTHER_COMMUNITY, ROLE_C, RoleAction::Persist)
        .await
        .unwrap();
    warden
        .on_roles_changed(COMMUNITY, USER, None, &roles(&[ROLE_A]))
        .await
        .unwrap();
    warden
        .on_roles_changed(OTHER_COMMUNITY, USER, None, &roles(&[ROLE_C]))
        .await
        .unwrap();

    let cleared = warden.on_community_left(COMMUNITY).await.unwrap();
    assert_eq!(
        cleared,
        ClearedCommunity {
            community_policy: true,
            role_policies: 2,
            saved_roles: 1,
        }
    );

    assert_eq!(
        warden.community_policy(COMMUNITY).await.unwrap(),
        CommunityPolicy::new(COMMUNITY)
    );
    assert_eq!(
        warden.role_policy(COMMUNITY, ROLE_A).await.unwrap().action,
        RoleAction::Unset
    );
    assert_eq!(warden.saved_roles(COMMUNITY, USER).await.unwrap(), None);

    // Other communities are untouched.
    assert_eq!(
        warden
            .role_policy(OTHER_COMMUNITY, ROLE_C)
            .await
            .unwrap()
            .action,
        RoleAction::Persist
    );
    assert!(
        warden
            .saved_roles(OTHER_COMMUNITY, USER)
            .await
            .unwrap()
            .is_some()
    );

    // Clearing twice is a no-op.
    assert_eq!(
        warden.on_community_left(COMMUNITY).await.unwrap(),
        ClearedCommunity::default()
    );
}

#[tokio::test]
async fn joining_community_resets_stale_state() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);

    let warden = test_warden(platform.clone());
    warden
        .set_dangerous_mode(COMMUNITY, DangerousMode::NeverIgnore)
        .await
        .unwrap();
    warden
        .on_roles_changed(COMMUNITY, USER, None, &roles(&[ROLE_A]))
        .await
        .unwrap();

    let cleared = warden.on_community_joined(COMMUNITY).await.unwrap();
    assert!(cleared.community_policy);
    assert_eq!(cleared.saved_roles, 1);
    assert_eq!(
        warden.community_policy(COMMUNITY).await.unwrap(),
        CommunityPolicy::new(COMMUNITY)
    );
}

#[tokio::test]
async fn deleted_role_policy_is_removed() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);

    let warden = test_warden(platform.clone());
    warden
        .set_role_policy(COMMUNITY, ROLE_A, RoleAction::Ignore)
        .await
        .unwrap();

    platform.remove_role(COMMUNITY, ROLE_A);
    assert!(warden.on_role_deleted(COMMUNITY, ROLE_A).await.unwrap());
    assert!(!warden.on_role_deleted(COMMUNITY, ROLE_A).await.unwrap());
    assert_eq!(
        warden.role_policy(COMMUNITY, ROLE_A).await.unwrap().action,
        RoleAction::Unset
    );
}

#[tokio::test]
async fn role_policies_need_existing_roles() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_role(OTHER_COMMUNITY, ROLE_B, 1);

    let warden = test_warden(platform.clone());

    let result = warden
        .set_role_policy(COMMUNITY, ROLE_B, RoleAction::Persist)
        .await;
    assert_matches!(
        result,
        Err(WardenError::RoleNotInCommunity { role_id, community_id })
            if role_id == ROLE_B && community_id == COMMUNITY
    );

    let result = warden
        .set_role_policy(COMMUNITY, ROLE_C, RoleAction::Ignore)
        .await;
    assert_matches!(result, Err(WardenError::RoleNotInCommunity { .. }));
    assert!(
        warden
            .store()
            .community_role_policies(COMMUNITY)
            .await
            .unwrap()
            .is_empty()
    );

    // Resetting works for any role.
    let policy = warden
        .set_role_policy(COMMUNITY, ROLE_C, RoleAction::Unset)
        .await
        .unwrap();
    assert!(policy.action.is_unset());

    warden
        .set_role_policy(COMMUNITY, ROLE_A, RoleAction::Persist)
        .await
        .unwrap();
    assert_eq!(warden.clear_role_policies(COMMUNITY).await.unwrap(), 1);
}

#[tokio::test]
async fn configuration_overview() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_role_with(COMMUNITY, ROLE_B, 2, Permissions::ADMINISTRATOR, false);
    platform.add_role(COMMUNITY, ROLE_C, 3);

    let warden = test_warden(platform.clone());

    let configuration = warden.configuration(COMMUNITY).await.unwrap();
    assert_eq!(configuration.policy, CommunityPolicy::new(COMMUNITY));
    assert_eq!(configuration.effective_default_action, RoleAction::Persist);
    assert_eq!(configuration.log_channel_ready, None);
    assert!(configuration.roles.is_empty());

    warden
        .set_default_action(COMMUNITY, RoleAction::Ignore)
        .await
        .unwrap();
    warden
        .set_role_policy(COMMUNITY, ROLE_C, RoleAction::Persist)
        .await
        .unwrap();
    warden
        .set_role_policy(COMMUNITY, ROLE_B, RoleAction::Persist)
        .await
        .unwrap();
    warden
        .set_role_policy(COMMUNITY, ROLE_A, RoleAction::Ignore)
        .await
        .unwrap();
    platform.remove_role(COMMUNITY, ROLE_A);

    let configuration = warden.configuration(COMMUNITY).await.unwrap();
    assert_eq!(configuration.effective_default_action, RoleAction::Ignore);

    // Roles which are gone are not shown, the rest is ordered by id.
    let shown: Vec<_> = configuration
        .roles
        .iter()
        .map(|role| (role.role_id, role.is_dangerous, role.disposition))
        .collect();
    assert_eq!(
        shown,
        vec![
            (ROLE_B, true, Disposition::Persist),
            (ROLE_C, false, Disposition::Persist),
        ]
    );

    warden
        .set_dangerous_mode(COMMUNITY, DangerousMode::AlwaysIgnore)
        .await
        .unwrap();
    assert_eq!(
        warden.resolve_action(COMMUNITY, ROLE_B).await.unwrap(),
        Disposition::Ignore
    );
    assert_eq!(
        warden.resolve_action(COMMUNITY, ROLE_C).await.unwrap(),
        Disposition::Persist
    );
    // Unconfigured roles follow the community default.
    assert_eq!(
        warden
            .resolve_action(COMMUNITY, RoleId::new(42))
            .await
            .unwrap(),
        Disposition::Ignore
    );
}

#[tokio::test]
async fn log_channel_and_flags() {
    let platform = TestPlatform::new();
    let warden = test_warden(platform.clone());

    let (policy, ready) = warden.set_log_channel(COMMUNITY, CHANNEL).await.unwrap();
    assert_eq!(policy.log_channel, Some(CHANNEL));
    assert!(!ready);

    let configuration = warden.configuration(COMMUNITY).await.unwrap();
    assert_eq!(configuration.log_channel_ready, Some(false));

    platform.set_channel_ready(CHANNEL, true);
    let (_, ready) = warden.set_log_channel(COMMUNITY, CHANNEL).await.unwrap();
    assert!(ready);

    let policy = warden
        .set_log_flag(COMMUNITY, LogFlags::RESTORED, true)
        .await
        .unwrap();
    assert!(policy.log_flags.contains(LogFlags::RESTORED));
    assert!(!policy.log_flags.contains(LogFlags::SAVED));

    let policy = warden
        .set_log_flag(COMMUNITY, LogFlags::SAVED, true)
        .await
        .unwrap();
    assert!(policy.log_flags.contains(LogFlags::RESTORED));

    let policy = warden
        .set_log_flag(COMMUNITY, LogFlags::RESTORED, false)
        .await
        .unwrap();
    assert_eq!(policy.log_flags, LogFlags::SAVED);
    assert_eq!(policy.log_channel, Some(CHANNEL));

    let policy = warden.remove_log_channel(COMMUNITY).await.unwrap();
    assert_eq!(policy.log_channel, None);
    assert_eq!(policy.log_flags, LogFlags::SAVED);
}

#[tokio::test]
async fn restored_and_saved_entries_are_logged_independently() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_role(COMMUNITY, ROLE_B, 2);
    platform.fail_grant(ROLE_B);
    platform.set_channel_ready(CHANNEL, true);

    let warden = test_warden(platform.clone());
    warden.set_log_channel(COMMUNITY, CHANNEL).await.unwrap();
    warden
        .set_log_flag(COMMUNITY, LogFlags::RESTORED, true)
        .await
        .unwrap();

    member_left_with(&warden, &platform, &[ROLE_A, ROLE_B]).await;
    assert!(!warden.on_member_left(COMMUNITY, USER).await.unwrap());

    let report = warden.on_member_join(COMMUNITY, USER).await.unwrap().unwrap();
    assert!(report.logged);

    let sent = platform.sent_logs();
    assert_eq!(sent.len(), 1);
    let (channel_id, entry) = &sent[0];
    assert_eq!(*channel_id, CHANNEL);
    assert_matches!(
        entry,
        LogEntry::Restored { restored, failed, .. }
            if restored == &vec![ROLE_A] && failed.len() == 1 && failed[0].0 == ROLE_B
    );

    warden
        .set_log_flag(COMMUNITY, LogFlags::RESTORED, false)
        .await
        .unwrap();
    warden
        .set_log_flag(COMMUNITY, LogFlags::SAVED, true)
        .await
        .unwrap();

    platform.remove_member(COMMUNITY, USER);
    assert!(warden.on_member_left(COMMUNITY, USER).await.unwrap());

    let sent = platform.sent_logs();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[1].1,
        LogEntry::Saved {
            community_id: COMMUNITY,
            user_id: USER,
            role_ids: vec![ROLE_A],
        }
    );

    // Nothing is sent into channels the agent can't reach.
    platform.set_channel_ready(CHANNEL, false);
    assert!(!warden.on_member_left(COMMUNITY, USER).await.unwrap());
    assert_eq!(platform.sent_logs().len(), 2);
}

async fn dispatch(dispatcher: &EventDispatcher, event: PlatformEvent) {
    for handle in dispatcher.dispatch(event) {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn warden_handles_dispatched_events() {
    let platform = TestPlatform::new();
    platform.add_role(COMMUNITY, ROLE_A, 1);
    platform.add_member(COMMUNITY, USER, &[ROLE_A]);

    let warden = test_warden(platform.clone());
    let dispatcher = EventDispatcher::new();
    let handler: SharedHandler = Arc::new(warden.clone());
    subscribe_all(&dispatcher, handler);

    dispatch(&dispatcher, PlatformEvent::RolesChanged {
        community_id: COMMUNITY,
        user_id: USER,
        old_roles: None,
        new_roles: roles(&[ROLE_A]),
    })
    .await;
    assert_eq!(
        warden
            .saved_roles(COMMUNITY, USER)
            .await
            .unwrap()
            .map(|saved| saved.role_ids),
        Some(roles(&[ROLE_A]))
    );

    platform.add_member(COMMUNITY, USER, &[]);
    dispatch(&dispatcher, PlatformEvent::MemberJoined {
        community_id: COMMUNITY,
        user_id: USER,
    })
    .await;
    assert_eq!(platform.roles_of(COMMUNITY, USER), Some(roles(&[ROLE_A])));

    warden
        .set_role_policy(COMMUNITY, ROLE_A, RoleAction::Ignore)
        .await
        .unwrap();
    dispatch(&dispatcher, PlatformEvent::RoleDeleted {
        community_id: COMMUNITY,
        role_id: ROLE_A,
    })
    .await;
    assert!(
        warden
            .store()
            .community_role_policies(COMMUNITY)
            .await
            .unwrap()
            .is_empty()
    );

    dispatch(&dispatcher, PlatformEvent::CommunityLeft {
        community_id: COMMUNITY,
    })
    .await;
    assert_eq!(warden.saved_roles(COMMUNITY, USER).await.unwrap(), None);
}
