//! PostgreSQL store implementations.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{
    AccessControlEntry, AclRecord, ObjectIdentity, Permission, Principal, ResourceKind,
    ShadowResource, Sid, Token, TokenKind,
};
use crate::infra::{map_acl_write_error, AclStore, AuthzError, Result, ShadowStore, TokenStore};

/// Open a Postgres pool.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    Ok(pool)
}

fn parse_kind(raw: &str) -> Result<ResourceKind> {
    ResourceKind::from_str(raw).ok_or_else(|| AuthzError::UnknownResourceKind(raw.to_string()))
}

// ============================================================================
// ACL store
// ============================================================================

/// Postgres-backed [`AclStore`].
pub struct PgAclStore {
    pool: PgPool,
}

impl PgAclStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn identity_id(&self, object: &ObjectIdentity) -> Result<Option<i64>> {
        let id: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM object_identity WHERE kind = $1 AND object_id = $2")
                .bind(object.kind.as_str())
                .bind(object.id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id.map(|(id,)| id))
    }

    async fn get_or_create_identity(&self, object: &ObjectIdentity) -> Result<i64> {
        if let Some(id) = self.identity_id(object).await? {
            return Ok(id);
        }
        let insert: std::result::Result<(i64,), sqlx::Error> = sqlx::query_as(
            "INSERT INTO object_identity (kind, object_id) VALUES ($1, $2) RETURNING id",
        )
        .bind(object.kind.as_str())
        .bind(object.id)
        .fetch_one(&self.pool)
        .await;
        match insert {
            Ok((id,)) => Ok(id),
            Err(e) => match map_acl_write_error(e, None) {
                // Lost the race; the winner's row is there now.
                AuthzError::AclRace(_) => self
                    .identity_id(object)
                    .await?
                    .ok_or_else(|| AuthzError::AclRace("identity vanished after race".into())),
                other => Err(other),
            },
        }
    }

    async fn load_parent(&self, parent_id: i64) -> Result<Option<ObjectIdentity>> {
        let row: Option<(String, Uuid)> =
            sqlx::query_as("SELECT kind, object_id FROM object_identity WHERE id = $1")
                .bind(parent_id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((kind, object_id)) => {
                Ok(Some(ObjectIdentity::new(parse_kind(&kind)?, object_id)))
            }
            None => Ok(None),
        }
    }
}

#[derive(FromRow)]
struct PgAceRow {
    sid: Uuid,
    permission_bit: i32,
    granting: bool,
}

impl PgAceRow {
    fn into_entry(self) -> Result<AccessControlEntry> {
        let permission = Permission::from_mask(self.permission_bit as u32).ok_or_else(|| {
            AuthzError::Internal(format!("corrupt permission bit {}", self.permission_bit))
        })?;
        Ok(AccessControlEntry {
            sid: Sid(self.sid),
            permission,
            granting: self.granting,
        })
    }
}

#[async_trait]
impl AclStore for PgAclStore {
    async fn load(&self, object: &ObjectIdentity) -> Result<Option<AclRecord>> {
        let Some(identity_id) = self.identity_id(object).await? else {
            return Ok(None);
        };

        let acl_row: Option<(Option<i64>, bool)> = sqlx::query_as(
            "SELECT parent_id, inheriting FROM acl WHERE object_identity_id = $1",
        )
        .bind(identity_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some((parent_id, inheriting)) = acl_row else {
            return Ok(None);
        };

        let parent = match parent_id {
            Some(pid) => self.load_parent(pid).await?,
            None => None,
        };

        let ace_rows: Vec<PgAceRow> = sqlx::query_as(
            "SELECT sid, permission_bit, granting FROM ace \
             WHERE acl_id = $1 ORDER BY ace_order",
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await?;

        let entries = ace_rows
            .into_iter()
            .map(PgAceRow::into_entry)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(AclRecord {
            object: *object,
            parent,
            inheriting,
            entries,
        }))
    }

    async fn create(&self, object: &ObjectIdentity) -> Result<AclRecord> {
        let identity_id = self.get_or_create_identity(object).await?;
        sqlx::query(
            "INSERT INTO acl (object_identity_id, parent_id, inheriting) \
             VALUES ($1, NULL, FALSE)",
        )
        .bind(identity_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_acl_write_error(e, None))?;
        Ok(AclRecord::new(*object))
    }

    async fn save(&self, acl: &AclRecord) -> Result<()> {
        let identity_id = self
            .identity_id(&acl.object)
            .await?
            .ok_or(AuthzError::AclNotFound(acl.object))?;
        let parent_id = match &acl.parent {
            Some(parent) => Some(self.get_or_create_identity(parent).await?),
            None => None,
        };

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE acl SET parent_id = $1, inheriting = $2 WHERE object_identity_id = $3",
        )
        .bind(parent_id)
        .bind(acl.inheriting)
        .bind(identity_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AuthzError::AclNotFound(acl.object));
        }

        sqlx::query("DELETE FROM ace WHERE acl_id = $1")
            .bind(identity_id)
            .execute(&mut *tx)
            .await?;

        for (order, entry) in acl.entries.iter().enumerate() {
            sqlx::query(
                "INSERT INTO ace (acl_id, sid, permission_bit, granting, ace_order) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(identity_id)
            .bind(entry.sid.0)
            .bind(entry.permission.mask() as i32)
            .bind(entry.granting)
            .bind(order as i32)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_acl_write_error(e, Some(entry.sid.0)))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, object: &ObjectIdentity) -> Result<()> {
        let identity_id = self
            .identity_id(object)
            .await?
            .ok_or(AuthzError::AclNotFound(*object))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM ace WHERE acl_id = $1")
            .bind(identity_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM acl WHERE object_identity_id = $1")
            .bind(identity_id)
            .execute(&mut *tx)
            .await?;
        // Drop the identity row only when nothing links to it as a parent.
        sqlx::query(
            "DELETE FROM object_identity WHERE id = $1 \
             AND NOT EXISTS (SELECT 1 FROM acl WHERE parent_id = $1)",
        )
        .bind(identity_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Shadow store
// ============================================================================

/// Postgres-backed [`ShadowStore`].
pub struct PgShadowStore {
    pool: PgPool,
}

impl PgShadowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn stored_revision(&self, kind: ResourceKind, id: &Uuid) -> Result<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT revision FROM shadow_resource WHERE kind = $1 AND uuid = $2")
                .bind(kind.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(rev,)| rev))
    }
}

#[derive(FromRow)]
struct PgShadowRow {
    kind: String,
    uuid: Uuid,
    owner_uuid: Uuid,
    parent_uuid: Option<Uuid>,
    revision: i64,
    deleted: bool,
}

impl PgShadowRow {
    fn into_shadow(self) -> Result<ShadowResource> {
        Ok(ShadowResource {
            kind: parse_kind(&self.kind)?,
            uuid: self.uuid,
            owner: self.owner_uuid,
            parent: self.parent_uuid,
            revision: self.revision,
            deleted: self.deleted,
        })
    }
}

#[async_trait]
impl ShadowStore for PgShadowStore {
    async fn upsert(&self, shadow: &ShadowResource) -> Result<ShadowResource> {
        // A live row accepts any revision >= its own (idempotent replays);
        // a tombstone requires strictly newer to resurrect.
        let result = sqlx::query(
            "INSERT INTO shadow_resource (kind, uuid, owner_uuid, parent_uuid, revision, deleted) \
             VALUES ($1, $2, $3, $4, $5, FALSE) \
             ON CONFLICT (kind, uuid) DO UPDATE SET \
                 owner_uuid = EXCLUDED.owner_uuid, \
                 parent_uuid = EXCLUDED.parent_uuid, \
                 revision = EXCLUDED.revision, \
                 deleted = FALSE \
             WHERE EXCLUDED.revision >= shadow_resource.revision \
               AND (NOT shadow_resource.deleted OR EXCLUDED.revision > shadow_resource.revision)",
        )
        .bind(shadow.kind.as_str())
        .bind(shadow.uuid)
        .bind(shadow.owner)
        .bind(shadow.parent)
        .bind(shadow.revision)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let stored = self
                .stored_revision(shadow.kind, &shadow.uuid)
                .await?
                .unwrap_or(shadow.revision);
            return Err(AuthzError::StaleSync {
                kind: shadow.kind.as_str().to_string(),
                id: shadow.uuid,
                incoming: shadow.revision,
                stored,
            });
        }

        self.get(shadow.kind, &shadow.uuid).await?.ok_or_else(|| {
            AuthzError::Internal("shadow row missing immediately after upsert".into())
        })
    }

    async fn get(&self, kind: ResourceKind, id: &Uuid) -> Result<Option<ShadowResource>> {
        let row: Option<PgShadowRow> = sqlx::query_as(
            "SELECT kind, uuid, owner_uuid, parent_uuid, revision, deleted \
             FROM shadow_resource WHERE kind = $1 AND uuid = $2 AND NOT deleted",
        )
        .bind(kind.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PgShadowRow::into_shadow).transpose()
    }

    async fn mark_deleted(&self, kind: ResourceKind, id: &Uuid, revision: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE shadow_resource SET deleted = TRUE, revision = $1 \
             WHERE kind = $2 AND uuid = $3 AND NOT deleted AND revision <= $1",
        )
        .bind(revision)
        .bind(kind.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // No live row matched: distinguish "already gone" from a stale delete.
        if self.get(kind, id).await?.is_some() {
            let stored = self.stored_revision(kind, id).await?.unwrap_or(revision);
            return Err(AuthzError::StaleSync {
                kind: kind.as_str().to_string(),
                id: *id,
                incoming: revision,
                stored,
            });
        }
        Ok(false)
    }

    async fn principal(&self, user_id: &Uuid) -> Result<Option<Principal>> {
        let row: Option<(bool, bool)> =
            sqlx::query_as("SELECT enabled, super_admin FROM principal WHERE uuid = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(enabled, super_admin)| Principal {
            user_id: *user_id,
            enabled,
            super_admin,
        }))
    }

    async fn upsert_principal(&self, principal: &Principal) -> Result<()> {
        sqlx::query(
            "INSERT INTO principal (uuid, enabled, super_admin) VALUES ($1, $2, $3) \
             ON CONFLICT (uuid) DO UPDATE SET \
                 enabled = EXCLUDED.enabled, \
                 super_admin = EXCLUDED.super_admin, \
                 updated_at = NOW()",
        )
        .bind(principal.user_id)
        .bind(principal.enabled)
        .bind(principal.super_admin)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ============================================================================
// Token store
// ============================================================================

/// Postgres-backed [`TokenStore`].
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct PgTokenRow {
    id: Uuid,
    owner_uuid: Uuid,
    kind: String,
    secret_hash: String,
    expires_at: Option<i64>,
    enabled: bool,
}

impl PgTokenRow {
    fn into_token(self) -> Result<Token> {
        let kind = TokenKind::from_str(&self.kind)
            .ok_or_else(|| AuthzError::Internal(format!("corrupt token kind {:?}", self.kind)))?;
        Ok(Token {
            id: self.id,
            owner: self.owner_uuid,
            kind,
            secret_hash: self.secret_hash,
            expires_at: self.expires_at,
            enabled: self.enabled,
        })
    }
}

const TOKEN_COLUMNS: &str = "id, owner_uuid, kind, secret_hash, expires_at, enabled";

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, token: &Token) -> Result<()> {
        sqlx::query(
            "INSERT INTO token (id, owner_uuid, kind, secret_hash, expires_at, enabled) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(token.id)
        .bind(token.owner)
        .bind(token.kind.as_str())
        .bind(&token.secret_hash)
        .bind(token.expires_at)
        .bind(token.enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err)
                if db_err.kind() == sqlx::error::ErrorKind::ForeignKeyViolation =>
            {
                AuthzError::UserNotFound(token.owner)
            }
            _ => AuthzError::Database(e),
        })?;
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Token>> {
        let row: Option<PgTokenRow> =
            sqlx::query_as(&format!("SELECT {TOKEN_COLUMNS} FROM token WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(PgTokenRow::into_token).transpose()
    }

    async fn find_by_hash(&self, secret_hash: &str) -> Result<Option<Token>> {
        let row: Option<PgTokenRow> = sqlx::query_as(&format!(
            "SELECT {TOKEN_COLUMNS} FROM token WHERE secret_hash = $1"
        ))
        .bind(secret_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PgTokenRow::into_token).transpose()
    }

    async fn list_for_owner(&self, owner: &Uuid) -> Result<Vec<Token>> {
        let rows: Vec<PgTokenRow> = sqlx::query_as(&format!(
            "SELECT {TOKEN_COLUMNS} FROM token WHERE owner_uuid = $1 ORDER BY created_at"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(PgTokenRow::into_token).collect()
    }

    async fn set_enabled(&self, id: &Uuid, enabled: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE token SET enabled = $1 WHERE id = $2")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM token WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Service keys
// ============================================================================

/// One row of the `service_key` table, loaded into the in-memory validator
/// at startup.
#[derive(Debug, Clone, FromRow)]
pub struct ServiceKeyRow {
    pub key_hash: String,
    pub service: String,
    pub can_check: bool,
    pub can_sync: bool,
    pub can_manage: bool,
    pub active: bool,
}

/// Load every active service key.
pub async fn load_service_keys(pool: &PgPool) -> Result<Vec<ServiceKeyRow>> {
    let rows: Vec<ServiceKeyRow> = sqlx::query_as(
        "SELECT key_hash, service, can_check, can_sync, can_manage, active \
         FROM service_key WHERE active",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Insert or reactivate a service key.
pub async fn upsert_service_key(pool: &PgPool, row: &ServiceKeyRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO service_key (key_hash, service, can_check, can_sync, can_manage, active) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (key_hash) DO UPDATE SET \
             service = EXCLUDED.service, \
             can_check = EXCLUDED.can_check, \
             can_sync = EXCLUDED.can_sync, \
             can_manage = EXCLUDED.can_manage, \
             active = EXCLUDED.active",
    )
    .bind(&row.key_hash)
    .bind(&row.service)
    .bind(row.can_check)
    .bind(row.can_sync)
    .bind(row.can_manage)
    .bind(row.active)
    .execute(pool)
    .await?;
    Ok(())
}

/// Deactivate a service key. Returns whether a row changed.
pub async fn deactivate_service_key(pool: &PgPool, key_hash: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE service_key SET active = FALSE WHERE key_hash = $1")
        .bind(key_hash)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
