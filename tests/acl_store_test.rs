//! SQLite store behavior: ACL persistence, FK mapping, token rows.

mod common;

use uuid::Uuid;

use common::*;
use hivegrid_authz::domain::{
    AccessControlEntry, AclRecord, ObjectIdentity, Permission, Sid, Token, TokenKind,
};
use hivegrid_authz::infra::{AuthzError, TokenStore};
use hivegrid_authz::token::TokenService;

#[tokio::test]
async fn load_missing_acl_returns_none() {
    let env = TestEnv::new().await;
    let object = ObjectIdentity::device(Uuid::new_v4());
    let acl = assert_ok!(env.manager.get_permission_list(&object, &Sid(alice())).await);
    assert!(acl.is_empty());
}

#[tokio::test]
async fn save_load_preserves_entry_order() {
    let env = TestEnv::new().await;
    env.seed_standard_users().await;

    let object = ObjectIdentity::device(Uuid::new_v4());
    let sid = Sid(alice());
    assert_ok!(
        env.manager
            .add_permissions(
                &object,
                &sid,
                &[Permission::Write, Permission::Read, Permission::Push],
            )
            .await
    );

    let granted = assert_ok!(env.manager.get_permission_list(&object, &sid).await);
    assert_eq!(
        granted,
        vec![Permission::Write, Permission::Read, Permission::Push]
    );
}

#[tokio::test]
async fn grants_are_insert_if_missing() {
    let env = TestEnv::new().await;
    env.seed_standard_users().await;

    let object = ObjectIdentity::app(Uuid::new_v4());
    let sid = Sid(bob());
    assert_ok!(env.manager.add_permission(&object, &sid, Permission::Read).await);
    assert_ok!(env.manager.add_permission(&object, &sid, Permission::Read).await);

    let granted = assert_ok!(env.manager.get_permission_list(&object, &sid).await);
    assert_eq!(granted, vec![Permission::Read]);
}

#[tokio::test]
async fn grant_to_unmirrored_sid_reports_sid_not_loaded() {
    let env = TestEnv::new().await;

    let object = ObjectIdentity::device(Uuid::new_v4());
    let stranger = Sid(Uuid::new_v4());
    let result = env
        .manager
        .add_permission(&object, &stranger, Permission::Read)
        .await;
    assert_err!(result, AuthzError::SidNotLoaded(_));
}

#[tokio::test]
async fn delete_acl_is_idempotent() {
    let env = TestEnv::new().await;
    env.seed_standard_users().await;

    let object = ObjectIdentity::device(Uuid::new_v4());
    let sid = Sid(alice());
    assert_ok!(env.manager.add_permission(&object, &sid, Permission::Read).await);

    assert_ok!(env.manager.delete_acl(&object).await);
    let granted = assert_ok!(env.manager.get_permission_list(&object, &sid).await);
    assert!(granted.is_empty());

    // Second delete hits no row and still succeeds.
    assert_ok!(env.manager.delete_acl(&object).await);
}

#[tokio::test]
async fn parent_is_exposed_only_when_inheriting() {
    let env = TestEnv::new().await;
    env.seed_standard_users().await;

    let parent = ObjectIdentity::device(Uuid::new_v4());
    let child = ObjectIdentity::device(Uuid::new_v4());
    assert_ok!(env.manager.get_or_create_acl(&parent).await);

    assert_ok!(env.manager.set_parent(&child, Some(parent)).await);
    assert_eq!(
        assert_ok!(env.manager.parent_of(&child).await),
        Some(parent)
    );

    assert_ok!(env.manager.set_parent(&child, None).await);
    assert_eq!(assert_ok!(env.manager.parent_of(&child).await), None);
}

#[tokio::test]
async fn deleting_parent_acl_keeps_child_loadable() {
    let env = TestEnv::new().await;
    env.seed_standard_users().await;

    let parent = ObjectIdentity::tree(Uuid::new_v4());
    let child = ObjectIdentity::tree(Uuid::new_v4());
    assert_ok!(env.manager.get_or_create_acl(&parent).await);
    assert_ok!(env.manager.set_parent(&child, Some(parent)).await);

    assert_ok!(env.manager.delete_acl(&parent).await);

    // The child row survives with its (now dangling) parent link; checks
    // simply stop at the missing ancestor.
    let acl = assert_ok!(env.manager.get_or_create_acl(&child).await);
    assert_eq!(acl.parent, Some(parent));
    assert!(!env
        .trees
        .is_granted(child.id, &Sid(alice()), Permission::Read)
        .await);
}

#[tokio::test]
async fn set_permissions_only_touches_the_given_sid() {
    let env = TestEnv::new().await;
    env.seed_standard_users().await;

    let object = ObjectIdentity::device(Uuid::new_v4());
    assert_ok!(
        env.manager
            .add_permissions(&object, &Sid(alice()), &[Permission::Read, Permission::Write])
            .await
    );
    assert_ok!(env.manager.add_permission(&object, &Sid(bob()), Permission::Read).await);

    assert_ok!(
        env.manager
            .set_permissions(&object, &Sid(alice()), &[Permission::Push])
            .await
    );

    assert_eq!(
        assert_ok!(env.manager.get_permission_list(&object, &Sid(alice())).await),
        vec![Permission::Push]
    );
    assert_eq!(
        assert_ok!(env.manager.get_permission_list(&object, &Sid(bob())).await),
        vec![Permission::Read]
    );
}

#[test]
fn permission_vocabulary_is_exported() {
    use hivegrid_authz::domain::ALL_PERMISSIONS;

    assert_eq!(ALL_PERMISSIONS.len(), 10);
    assert!(ALL_PERMISSIONS.contains(&Permission::Administration));
}

#[test]
fn acl_record_entry_lookup() {
    let mut record = AclRecord::new(ObjectIdentity::device(Uuid::new_v4()));
    record
        .entries
        .push(AccessControlEntry::grant(Sid(alice()), Permission::Read));
    assert!(record.entry_for(&Sid(alice()), Permission::Read).is_some());
    assert!(record.entry_for(&Sid(bob()), Permission::Read).is_none());
    assert_eq!(record.granted_to(&Sid(alice())), vec![Permission::Read]);
}

#[tokio::test]
async fn token_store_round_trip() {
    let env = TestEnv::new().await;
    env.seed_standard_users().await;

    let token = Token {
        id: Uuid::new_v4(),
        owner: alice(),
        kind: TokenKind::Default,
        secret_hash: TokenService::hash_secret("hg_test-secret"),
        expires_at: None,
        enabled: true,
    };
    assert_ok!(env.token_store.insert(&token).await);

    let loaded = assert_ok!(env.token_store.get(&token.id).await);
    assert_eq!(loaded, Some(token.clone()));

    let by_hash = assert_ok!(env.token_store.find_by_hash(&token.secret_hash).await);
    assert_eq!(by_hash, Some(token.clone()));

    let owned = assert_ok!(env.token_store.list_for_owner(&alice()).await);
    assert_eq!(owned.len(), 1);

    assert!(assert_ok!(env.token_store.set_enabled(&token.id, false).await));
    let disabled = assert_ok!(env.token_store.get(&token.id).await);
    assert!(!disabled.expect("token row").enabled);

    assert!(assert_ok!(env.token_store.delete(&token.id).await));
    assert!(!assert_ok!(env.token_store.delete(&token.id).await));
    assert_eq!(assert_ok!(env.token_store.get(&token.id).await), None);
}

#[tokio::test]
async fn token_insert_requires_mirrored_owner() {
    let env = TestEnv::new().await;

    let token = Token {
        id: Uuid::new_v4(),
        owner: Uuid::new_v4(),
        kind: TokenKind::Default,
        secret_hash: TokenService::hash_secret("hg_orphan"),
        expires_at: None,
        enabled: true,
    };
    assert_err!(
        env.token_store.insert(&token).await,
        AuthzError::UserNotFound(_)
    );
}
