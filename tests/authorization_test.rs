//! End-to-end authorization properties over the SQLite-backed service graph.

mod common;

use uuid::Uuid;

use common::*;
use hivegrid_authz::domain::{Permission, ResourceKind, Sid};
use hivegrid_authz::infra::AuthzError;

#[tokio::test]
async fn grant_then_check_round_trip() {
    let env = TestEnv::new().await;
    let (_, bob_p, _, _) = env.seed_standard_users().await;

    let device = Uuid::new_v4();
    assert_ok!(env.devices.add(device, &Sid(bob()), Permission::Read).await);

    assert!(env.devices.is_granted(device, &Sid(bob()), Permission::Read).await);
    assert!(!env.devices.is_granted(device, &Sid(bob()), Permission::Write).await);
    assert!(
        env.devices
            .check(Some(device), Some(&bob_p), Some(Permission::Read))
            .await
    );
}

#[tokio::test]
async fn remove_is_idempotent() {
    let env = TestEnv::new().await;
    env.seed_standard_users().await;

    let device = Uuid::new_v4();
    let sid = Sid(bob());
    assert_ok!(env.devices.add(device, &sid, Permission::Read).await);
    assert_ok!(env.devices.remove(device, &sid, Permission::Read).await);
    assert_ok!(env.devices.remove(device, &sid, Permission::Read).await);

    assert!(assert_ok!(env.devices.list(device, &sid).await).is_empty());
}

#[tokio::test]
async fn set_replaces_previous_grants() {
    let env = TestEnv::new().await;
    env.seed_standard_users().await;

    let device = Uuid::new_v4();
    let sid = Sid(bob());
    assert_ok!(env.devices.add(device, &sid, Permission::Read).await);
    assert_ok!(env.devices.add(device, &sid, Permission::Write).await);

    assert_ok!(env.devices.set(device, &sid, &[Permission::Push]).await);
    assert_eq!(
        assert_ok!(env.devices.list(device, &sid).await),
        vec![Permission::Push]
    );
}

#[tokio::test]
async fn register_grants_defaults_and_owner_administration() {
    let env = TestEnv::new().await;
    let (alice_p, _, _, _) = env.seed_standard_users().await;

    let shadow = device_shadow(Uuid::new_v4(), alice(), 1);
    assert_ok!(env.devices.register(&shadow, &alice_p).await);

    let granted = assert_ok!(env.devices.list(shadow.uuid, &Sid(alice())).await);
    assert_eq!(
        granted,
        vec![Permission::Read, Permission::Write, Permission::Administration]
    );

    // ADMINISTRATION implies permissions never granted explicitly.
    assert!(
        env.devices
            .check(Some(shadow.uuid), Some(&alice_p), Some(Permission::Execute))
            .await
    );
}

#[tokio::test]
async fn register_by_stranger_withholds_administration() {
    let env = TestEnv::new().await;
    let (_, bob_p, _, _) = env.seed_standard_users().await;

    let shadow = device_shadow(Uuid::new_v4(), alice(), 1);
    assert_ok!(env.devices.register(&shadow, &bob_p).await);

    let granted = assert_ok!(env.devices.list(shadow.uuid, &Sid(alice())).await);
    assert_eq!(granted, vec![Permission::Read, Permission::Write]);
}

#[tokio::test]
async fn register_by_super_admin_grants_administration_to_owner() {
    let env = TestEnv::new().await;
    let (_, _, root_p, _) = env.seed_standard_users().await;

    let shadow = device_shadow(Uuid::new_v4(), alice(), 1);
    assert_ok!(env.devices.register(&shadow, &root_p).await);

    let granted = assert_ok!(env.devices.list(shadow.uuid, &Sid(alice())).await);
    assert!(granted.contains(&Permission::Administration));
}

#[tokio::test]
async fn register_is_idempotent() {
    let env = TestEnv::new().await;
    let (alice_p, _, _, _) = env.seed_standard_users().await;

    let shadow = device_shadow(Uuid::new_v4(), alice(), 1);
    assert_ok!(env.devices.register(&shadow, &alice_p).await);
    let first = assert_ok!(env.devices.list(shadow.uuid, &Sid(alice())).await);

    assert_ok!(env.devices.register(&shadow, &alice_p).await);
    let second = assert_ok!(env.devices.list(shadow.uuid, &Sid(alice())).await);
    assert_eq!(first, second);
}

#[tokio::test]
async fn register_never_resets_trimmed_grants() {
    let env = TestEnv::new().await;
    let (alice_p, _, _, _) = env.seed_standard_users().await;

    let shadow = device_shadow(Uuid::new_v4(), alice(), 1);
    assert_ok!(env.devices.register(&shadow, &alice_p).await);
    assert_ok!(
        env.devices
            .set(shadow.uuid, &Sid(alice()), &[Permission::Read])
            .await
    );

    // A later sync re-runs the bootstrap; the owner still has an entry, so
    // the trimmed grant set stands.
    assert_ok!(env.devices.register(&shadow, &alice_p).await);
    assert_eq!(
        assert_ok!(env.devices.list(shadow.uuid, &Sid(alice())).await),
        vec![Permission::Read]
    );
}

#[tokio::test]
async fn super_admin_bypasses_acl_contents() {
    let env = TestEnv::new().await;
    let (_, _, root_p, _) = env.seed_standard_users().await;

    // Resource with no ACL at all.
    assert!(
        env.devices
            .check(Some(Uuid::new_v4()), Some(&root_p), Some(Permission::Delete))
            .await
    );
}

#[tokio::test]
async fn disabled_user_is_denied_despite_explicit_grant() {
    let env = TestEnv::new().await;
    let (_, _, _, mallory_p) = env.seed_standard_users().await;

    let device = Uuid::new_v4();
    assert_ok!(env.devices.add(device, &Sid(mallory()), Permission::Read).await);

    assert!(
        !env.devices
            .check(Some(device), Some(&mallory_p), Some(Permission::Read))
            .await
    );
}

#[tokio::test]
async fn null_user_or_permission_is_denied() {
    let env = TestEnv::new().await;
    let (alice_p, _, _, _) = env.seed_standard_users().await;
    let device = Uuid::new_v4();

    assert!(!env.devices.check(Some(device), None, Some(Permission::Read)).await);
    assert!(!env.devices.check(Some(device), Some(&alice_p), None).await);
    // Missing resource denies everything but LIST.
    assert!(!env.devices.check(None, Some(&alice_p), Some(Permission::Read)).await);
    assert!(env.devices.check(None, Some(&alice_p), Some(Permission::List)).await);
}

#[tokio::test]
async fn parent_grant_reaches_child_devices() {
    let env = TestEnv::new().await;
    let (alice_p, bob_p, _, _) = env.seed_standard_users().await;

    let parent = device_shadow(Uuid::new_v4(), alice(), 1);
    let mut child = device_shadow(Uuid::new_v4(), alice(), 1);
    child.parent = Some(parent.uuid);

    assert_ok!(env.devices.register(&parent, &alice_p).await);
    assert_ok!(env.devices.register(&child, &alice_p).await);
    assert_ok!(env.devices.add(parent.uuid, &Sid(bob()), Permission::Read).await);

    assert!(
        env.devices
            .check(Some(child.uuid), Some(&bob_p), Some(Permission::Read))
            .await
    );
    // Inherited grants do not widen: bob still cannot write.
    assert!(
        !env.devices
            .check(Some(child.uuid), Some(&bob_p), Some(Permission::Write))
            .await
    );
}

#[tokio::test]
async fn unlinking_the_parent_stops_inheritance() {
    let env = TestEnv::new().await;
    let (alice_p, bob_p, _, _) = env.seed_standard_users().await;

    let parent = device_shadow(Uuid::new_v4(), alice(), 1);
    let mut child = device_shadow(Uuid::new_v4(), alice(), 1);
    child.parent = Some(parent.uuid);

    assert_ok!(env.devices.register(&parent, &alice_p).await);
    assert_ok!(env.devices.register(&child, &alice_p).await);
    assert_ok!(env.devices.add(parent.uuid, &Sid(bob()), Permission::Read).await);

    // Re-registering without a parent clears the link.
    let mut detached = child.clone();
    detached.parent = None;
    assert_ok!(env.devices.register(&detached, &alice_p).await);

    assert!(
        !env.devices
            .check(Some(child.uuid), Some(&bob_p), Some(Permission::Read))
            .await
    );
}

#[tokio::test]
async fn app_checks_never_walk_parents() {
    let env = TestEnv::new().await;
    let (_, bob_p, _, _) = env.seed_standard_users().await;

    let parent = Uuid::new_v4();
    let child = Uuid::new_v4();
    assert_ok!(env.apps.add(parent, &Sid(bob()), Permission::Read).await);
    assert_ok!(
        env.manager
            .set_parent(
                &hivegrid_authz::ObjectIdentity::app(child),
                Some(hivegrid_authz::ObjectIdentity::app(parent)),
            )
            .await
    );

    assert!(
        !env.apps
            .check(Some(child), Some(&bob_p), Some(Permission::Read))
            .await
    );
}

#[tokio::test]
async fn facade_create_without_object_follows_enabled_flag() {
    let env = TestEnv::new().await;
    let (alice_p, _, _, mallory_p) = env.seed_standard_users().await;

    let req = request("create", "device", None);
    assert!(assert_ok!(env.facade.check_permission(&alice_p, &req).await).result);
    assert!(!assert_ok!(env.facade.check_permission(&mallory_p, &req).await).result);
}

#[tokio::test]
async fn facade_rejects_unknown_labels() {
    let env = TestEnv::new().await;
    let (alice_p, _, _, _) = env.seed_standard_users().await;

    assert_err!(
        env.facade
            .check_permission(&alice_p, &request("flush", "device", None))
            .await,
        AuthzError::UnknownPermission(_)
    );
    assert_err!(
        env.facade
            .check_permission(&alice_p, &request("read", "stream", None))
            .await,
        AuthzError::UnknownResourceKind(_)
    );
}

#[tokio::test]
async fn facade_subject_switch_requires_super_admin() {
    let env = TestEnv::new().await;
    let (alice_p, _, root_p, _) = env.seed_standard_users().await;

    let device = Uuid::new_v4();
    assert_ok!(env.devices.add(device, &Sid(bob()), Permission::Read).await);

    let mut req = request("read", "device", Some(device));
    req.user_id = Some(bob());

    // Non-admin asking about someone else: deny, no error.
    let denied = assert_ok!(env.facade.check_permission(&alice_p, &req).await);
    assert!(!denied.result);

    // Super-admin evaluates the subject's own grants.
    let decided = assert_ok!(env.facade.check_permission(&root_p, &req).await);
    assert!(decided.result);
    assert_eq!(decided.roles, Some(vec!["user".to_string()]));
}

#[tokio::test]
async fn facade_reports_admin_role() {
    let env = TestEnv::new().await;
    let (_, _, root_p, _) = env.seed_standard_users().await;

    let decided = assert_ok!(
        env.facade
            .check_permission(&root_p, &request("read", "device", Some(Uuid::new_v4())))
            .await
    );
    assert!(decided.result);
    assert_eq!(decided.roles, Some(vec!["admin".to_string()]));
}

#[tokio::test]
async fn facade_end_to_end_owner_versus_stranger() {
    let env = TestEnv::new().await;
    let (alice_p, bob_p, _, _) = env.seed_standard_users().await;

    let shadow = device_shadow(Uuid::new_v4(), alice(), 1);
    assert_ok!(env.devices.register(&shadow, &alice_p).await);

    let read = request("read", "device", Some(shadow.uuid));
    assert!(assert_ok!(env.facade.check_permission(&alice_p, &read).await).result);
    assert!(!assert_ok!(env.facade.check_permission(&bob_p, &read).await).result);

    // Granting bob READ flips exactly that check; WRITE stays denied.
    assert_ok!(
        env.facade
            .set_permission_labels(
                ResourceKind::Device,
                shadow.uuid,
                bob(),
                &["read".to_string()],
            )
            .await
    );
    assert!(assert_ok!(env.facade.check_permission(&bob_p, &read).await).result);
    let write = request("write", "device", Some(shadow.uuid));
    assert!(!assert_ok!(env.facade.check_permission(&bob_p, &write).await).result);
}

#[tokio::test]
async fn facade_permission_label_management() {
    let env = TestEnv::new().await;
    env.seed_standard_users().await;

    let device = Uuid::new_v4();
    assert_ok!(
        env.facade
            .set_permission_labels(
                ResourceKind::Device,
                device,
                bob(),
                &["read".to_string(), "push".to_string()],
            )
            .await
    );
    assert_eq!(
        assert_ok!(
            env.facade
                .permission_labels(ResourceKind::Device, device, bob())
                .await
        ),
        vec!["read".to_string(), "push".to_string()]
    );

    // One bad label rejects the whole set before any mutation.
    assert_err!(
        env.facade
            .set_permission_labels(
                ResourceKind::Device,
                device,
                bob(),
                &["write".to_string(), "flush".to_string()],
            )
            .await,
        AuthzError::UnknownPermission(_)
    );
    assert_eq!(
        assert_ok!(
            env.facade
                .permission_labels(ResourceKind::Device, device, bob())
                .await
        ),
        vec!["read".to_string(), "push".to_string()]
    );
}
