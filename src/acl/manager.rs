//! ACL manager: CRUD and check primitives over the ACL store.
//!
//! Every operation executes as one request-scoped transaction against the
//! store and reads fresh state; there is no in-process cache. Operations
//! expected to race under concurrent resource creation (ACL-row creation,
//! grant bootstrap, parent linking) run through the retry combinator; the
//! predicate admits only the designated retryable error kinds.

use std::sync::Arc;

use tracing::warn;

use crate::domain::{AccessControlEntry, AclRecord, ObjectIdentity, Permission, Sid};
use crate::infra::{AclStore, AuthzError, Result, Retry, RetryConfig};

/// CRUD + check primitives over an [`AclStore`].
pub struct AclManager {
    store: Arc<dyn AclStore>,
    retry_config: RetryConfig,
}

impl AclManager {
    pub fn new(store: Arc<dyn AclStore>) -> Self {
        Self {
            store,
            retry_config: RetryConfig::acl_bootstrap(),
        }
    }

    /// Override the retry schedule (tests use a fast one).
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    fn retry(&self) -> Retry {
        Retry::new(self.retry_config.clone())
    }

    /// Idempotent get-or-create for the ACL row. Creation races are retried;
    /// the losing writer's next attempt loads the winner's row.
    pub async fn get_or_create_acl(&self, object: &ObjectIdentity) -> Result<AclRecord> {
        self.retry()
            .run_with_predicate(
                "acl.get_or_create",
                || self.get_or_create_once(object),
                AuthzError::is_retryable,
            )
            .await
            .into_result()
    }

    async fn get_or_create_once(&self, object: &ObjectIdentity) -> Result<AclRecord> {
        match self.store.load(object).await? {
            Some(acl) => Ok(acl),
            None => self.store.create(object).await,
        }
    }

    /// Grant `permission` to `sid` on `object`. Insert-if-missing: an
    /// existing resolvable ACE for (sid, permission) makes this a no-op.
    pub async fn add_permission(
        &self,
        object: &ObjectIdentity,
        sid: &Sid,
        permission: Permission,
    ) -> Result<()> {
        self.retry()
            .run_with_predicate(
                "acl.add_permission",
                || self.add_permission_once(object, sid, permission),
                AuthzError::is_retryable,
            )
            .await
            .into_result()
    }

    async fn add_permission_once(
        &self,
        object: &ObjectIdentity,
        sid: &Sid,
        permission: Permission,
    ) -> Result<()> {
        let mut acl = self.get_or_create_once(object).await?;
        if acl.entry_for(sid, permission).is_none() {
            acl.entries
                .push(AccessControlEntry::grant(*sid, permission));
            self.store.save(&acl).await?;
        }
        Ok(())
    }

    /// Apply [`add_permission`](Self::add_permission) for each entry in
    /// order. Not atomic as a batch: a mid-list failure leaves the earlier
    /// grants in place.
    pub async fn add_permissions(
        &self,
        object: &ObjectIdentity,
        sid: &Sid,
        permissions: &[Permission],
    ) -> Result<()> {
        for permission in permissions {
            self.add_permission(object, sid, *permission).await?;
        }
        Ok(())
    }

    /// Remove every ACE matching (sid, permission). Removing a grant that
    /// does not exist is a no-op.
    pub async fn remove_permission(
        &self,
        object: &ObjectIdentity,
        sid: &Sid,
        permission: Permission,
    ) -> Result<()> {
        let mut acl = match self.store.load(object).await? {
            Some(acl) => acl,
            None => return Ok(()),
        };

        let before = acl.entries.len();
        acl.entries
            .retain(|e| !(e.sid == *sid && e.permission == permission));
        if acl.entries.len() != before {
            self.store.save(&acl).await?;
        }
        Ok(())
    }

    /// Replace `sid`'s grants with `permissions`: current entries for the
    /// sid are removed and the new list appended, leaving other sids
    /// untouched. Not atomic; a concurrent reader mid-operation may observe
    /// neither the old nor the new complete set.
    pub async fn set_permissions(
        &self,
        object: &ObjectIdentity,
        sid: &Sid,
        permissions: &[Permission],
    ) -> Result<()> {
        self.retry()
            .run_with_predicate(
                "acl.set_permissions",
                || self.set_permissions_once(object, sid, permissions),
                AuthzError::is_retryable,
            )
            .await
            .into_result()
    }

    async fn set_permissions_once(
        &self,
        object: &ObjectIdentity,
        sid: &Sid,
        permissions: &[Permission],
    ) -> Result<()> {
        let mut acl = self.get_or_create_once(object).await?;
        acl.entries.retain(|e| e.sid != *sid);
        for permission in permissions {
            if acl.entry_for(sid, *permission).is_none() {
                acl.entries
                    .push(AccessControlEntry::grant(*sid, *permission));
            }
        }
        self.store.save(&acl).await
    }

    /// Set (or clear) the ACL's parent link. A present parent enables
    /// inheritance for hierarchical checks.
    pub async fn set_parent(
        &self,
        object: &ObjectIdentity,
        parent: Option<ObjectIdentity>,
    ) -> Result<()> {
        self.retry()
            .run_with_predicate(
                "acl.set_parent",
                || self.set_parent_once(object, parent),
                AuthzError::is_retryable,
            )
            .await
            .into_result()
    }

    async fn set_parent_once(
        &self,
        object: &ObjectIdentity,
        parent: Option<ObjectIdentity>,
    ) -> Result<()> {
        let mut acl = self.get_or_create_once(object).await?;
        if acl.parent == parent && acl.inheriting == parent.is_some() {
            return Ok(());
        }
        acl.parent = parent;
        acl.inheriting = parent.is_some();
        self.store.save(&acl).await
    }

    /// Direct grant check. Fails closed: a missing ACL means "no grant", and
    /// any other store error is logged and reported as "not granted".
    pub async fn is_permission_granted(
        &self,
        object: &ObjectIdentity,
        sid: &Sid,
        permission: Permission,
    ) -> bool {
        match self.store.load(object).await {
            Ok(Some(acl)) => acl
                .entry_for(sid, permission)
                .map(|e| e.granting)
                .unwrap_or(false),
            Ok(None) => false,
            Err(e) => {
                warn!(object = %object, sid = %sid, permission = %permission, error = %e,
                    "permission check failed, denying");
                false
            }
        }
    }

    /// Granting permissions held by `sid` on `object`. Missing ACL ⇒ empty.
    pub async fn get_permission_list(
        &self,
        object: &ObjectIdentity,
        sid: &Sid,
    ) -> Result<Vec<Permission>> {
        match self.store.load(object).await? {
            Some(acl) => Ok(acl.granted_to(sid)),
            None => Ok(Vec::new()),
        }
    }

    /// Inherited-parent lookup used by hierarchical checks. Only an ACL with
    /// inheritance enabled exposes its parent.
    pub async fn parent_of(&self, object: &ObjectIdentity) -> Result<Option<ObjectIdentity>> {
        match self.store.load(object).await? {
            Some(acl) if acl.inheriting => Ok(acl.parent),
            _ => Ok(None),
        }
    }

    /// Cascade removal of the ACL, used when a synced resource is deleted.
    /// Deleting an ACL that never existed is a no-op.
    pub async fn delete_acl(&self, object: &ObjectIdentity) -> Result<()> {
        match self.store.delete(object).await {
            Ok(()) => Ok(()),
            Err(AuthzError::AclNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
