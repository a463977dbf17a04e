//! SQLite store implementations, used for local development and tests.
//!
//! UUIDs are stored as hyphenated text. Deletes are explicit rather than
//! relying on cascades so behavior does not depend on the foreign-key pragma.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{
    AccessControlEntry, AclRecord, ObjectIdentity, Permission, Principal, ResourceKind,
    ShadowResource, Sid, Token, TokenKind,
};
use crate::infra::{map_acl_write_error, AclStore, AuthzError, Result, ShadowStore, TokenStore};

/// Open a SQLite pool with foreign keys enforced.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(sqlx::Error::from)?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// In-memory database for tests. A single connection keeps all callers on
/// the same database.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(sqlx::Error::from)?
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| AuthzError::Internal(format!("corrupt uuid {raw:?}: {e}")))
}

fn parse_kind(raw: &str) -> Result<ResourceKind> {
    ResourceKind::from_str(raw).ok_or_else(|| AuthzError::UnknownResourceKind(raw.to_string()))
}

// ============================================================================
// ACL store
// ============================================================================

/// SQLite-backed [`AclStore`].
pub struct SqliteAclStore {
    pool: SqlitePool,
}

impl SqliteAclStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn identity_id(&self, object: &ObjectIdentity) -> Result<Option<i64>> {
        let id: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM object_identity WHERE kind = ? AND object_id = ?")
                .bind(object.kind.as_str())
                .bind(object.id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(id.map(|(id,)| id))
    }

    /// Identity rows are shared by ACLs and parent links; create on demand.
    async fn get_or_create_identity(&self, object: &ObjectIdentity) -> Result<i64> {
        if let Some(id) = self.identity_id(object).await? {
            return Ok(id);
        }
        let insert = sqlx::query("INSERT INTO object_identity (kind, object_id) VALUES (?, ?)")
            .bind(object.kind.as_str())
            .bind(object.id.to_string())
            .execute(&self.pool)
            .await;
        match insert {
            Ok(result) => Ok(result.last_insert_rowid()),
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
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT kind, object_id FROM object_identity WHERE id = ?")
                .bind(parent_id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((kind, object_id)) => Ok(Some(ObjectIdentity::new(
                parse_kind(&kind)?,
                parse_uuid(&object_id)?,
            ))),
            None => Ok(None),
        }
    }
}

#[derive(FromRow)]
struct SqliteAceRow {
    sid: String,
    permission_bit: i64,
    granting: bool,
}

impl SqliteAceRow {
    fn into_entry(self) -> Result<AccessControlEntry> {
        let permission = Permission::from_mask(self.permission_bit as u32).ok_or_else(|| {
            AuthzError::Internal(format!("corrupt permission bit {}", self.permission_bit))
        })?;
        Ok(AccessControlEntry {
            sid: Sid(parse_uuid(&self.sid)?),
            permission,
            granting: self.granting,
        })
    }
}

#[async_trait]
impl AclStore for SqliteAclStore {
    async fn load(&self, object: &ObjectIdentity) -> Result<Option<AclRecord>> {
        let Some(identity_id) = self.identity_id(object).await? else {
            return Ok(None);
        };

        let acl_row: Option<(Option<i64>, bool)> = sqlx::query_as(
            "SELECT parent_id, inheriting FROM acl WHERE object_identity_id = ?",
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

        let ace_rows: Vec<SqliteAceRow> = sqlx::query_as(
            "SELECT sid, permission_bit, granting FROM ace \
             WHERE acl_id = ? ORDER BY ace_order",
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await?;

        let entries = ace_rows
            .into_iter()
            .map(SqliteAceRow::into_entry)
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
        sqlx::query("INSERT INTO acl (object_identity_id, parent_id, inheriting) VALUES (?, NULL, 0)")
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
            "UPDATE acl SET parent_id = ?, inheriting = ? WHERE object_identity_id = ?",
        )
        .bind(parent_id)
        .bind(acl.inheriting)
        .bind(identity_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(AuthzError::AclNotFound(acl.object));
        }

        sqlx::query("DELETE FROM ace WHERE acl_id = ?")
            .bind(identity_id)
            .execute(&mut *tx)
            .await?;

        for (order, entry) in acl.entries.iter().enumerate() {
            sqlx::query(
                "INSERT INTO ace (acl_id, sid, permission_bit, granting, ace_order) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(identity_id)
            .bind(entry.sid.0.to_string())
            .bind(entry.permission.mask() as i64)
            .bind(entry.granting)
            .bind(order as i64)
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
        sqlx::query("DELETE FROM ace WHERE acl_id = ?")
            .bind(identity_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM acl WHERE object_identity_id = ?")
            .bind(identity_id)
            .execute(&mut *tx)
            .await?;
        // Drop the identity row only when nothing links to it as a parent.
        sqlx::query(
            "DELETE FROM object_identity WHERE id = ? \
             AND NOT EXISTS (SELECT 1 FROM acl WHERE parent_id = ?)",
        )
        .bind(identity_id)
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

/// SQLite-backed [`ShadowStore`].
pub struct SqliteShadowStore {
    pool: SqlitePool,
}

impl SqliteShadowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn stored_revision(&self, kind: ResourceKind, id: &Uuid) -> Result<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT revision FROM shadow_resource WHERE kind = ? AND uuid = ?")
                .bind(kind.as_str())
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(rev,)| rev))
    }
}

#[derive(FromRow)]
struct SqliteShadowRow {
    kind: String,
    uuid: String,
    owner_uuid: String,
    parent_uuid: Option<String>,
    revision: i64,
    deleted: bool,
}

impl SqliteShadowRow {
    fn into_shadow(self) -> Result<ShadowResource> {
        Ok(ShadowResource {
            kind: parse_kind(&self.kind)?,
            uuid: parse_uuid(&self.uuid)?,
            owner: parse_uuid(&self.owner_uuid)?,
            parent: self.parent_uuid.as_deref().map(parse_uuid).transpose()?,
            revision: self.revision,
            deleted: self.deleted,
        })
    }
}

#[async_trait]
impl ShadowStore for SqliteShadowStore {
    async fn upsert(&self, shadow: &ShadowResource) -> Result<ShadowResource> {
        // A live row accepts any revision >= its own (idempotent replays);
        // a tombstone requires strictly newer to resurrect.
        let result = sqlx::query(
            "INSERT INTO shadow_resource (kind, uuid, owner_uuid, parent_uuid, revision, deleted) \
             VALUES (?, ?, ?, ?, ?, 0) \
             ON CONFLICT (kind, uuid) DO UPDATE SET \
                 owner_uuid = excluded.owner_uuid, \
                 parent_uuid = excluded.parent_uuid, \
                 revision = excluded.revision, \
                 deleted = 0 \
             WHERE excluded.revision >= shadow_resource.revision \
               AND (shadow_resource.deleted = 0 OR excluded.revision > shadow_resource.revision)",
        )
        .bind(shadow.kind.as_str())
        .bind(shadow.uuid.to_string())
        .bind(shadow.owner.to_string())
        .bind(shadow.parent.map(|p| p.to_string()))
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
        let row: Option<SqliteShadowRow> = sqlx::query_as(
            "SELECT kind, uuid, owner_uuid, parent_uuid, revision, deleted \
             FROM shadow_resource WHERE kind = ? AND uuid = ? AND deleted = 0",
        )
        .bind(kind.as_str())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(SqliteShadowRow::into_shadow).transpose()
    }

    async fn mark_deleted(&self, kind: ResourceKind, id: &Uuid, revision: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE shadow_resource SET deleted = 1, revision = ? \
             WHERE kind = ? AND uuid = ? AND deleted = 0 AND revision <= ?",
        )
        .bind(revision)
        .bind(kind.as_str())
        .bind(id.to_string())
        .bind(revision)
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
            sqlx::query_as("SELECT enabled, super_admin FROM principal WHERE uuid = ?")
                .bind(user_id.to_string())
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
            "INSERT INTO principal (uuid, enabled, super_admin) VALUES (?, ?, ?) \
             ON CONFLICT (uuid) DO UPDATE SET \
                 enabled = excluded.enabled, \
                 super_admin = excluded.super_admin, \
                 updated_at = datetime('now')",
        )
        .bind(principal.user_id.to_string())
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

/// SQLite-backed [`TokenStore`].
pub struct SqliteTokenStore {
    pool: SqlitePool,
}

impl SqliteTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct SqliteTokenRow {
    id: String,
    owner_uuid: String,
    kind: String,
    secret_hash: String,
    expires_at: Option<i64>,
    enabled: bool,
}

impl SqliteTokenRow {
    fn into_token(self) -> Result<Token> {
        let kind = TokenKind::from_str(&self.kind)
            .ok_or_else(|| AuthzError::Internal(format!("corrupt token kind {:?}", self.kind)))?;
        Ok(Token {
            id: parse_uuid(&self.id)?,
            owner: parse_uuid(&self.owner_uuid)?,
            kind,
            secret_hash: self.secret_hash,
            expires_at: self.expires_at,
            enabled: self.enabled,
        })
    }
}

const TOKEN_COLUMNS: &str = "id, owner_uuid, kind, secret_hash, expires_at, enabled";

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn insert(&self, token: &Token) -> Result<()> {
        sqlx::query(
            "INSERT INTO token (id, owner_uuid, kind, secret_hash, expires_at, enabled) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(token.id.to_string())
        .bind(token.owner.to_string())
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
        let row: Option<SqliteTokenRow> =
            sqlx::query_as(&format!("SELECT {TOKEN_COLUMNS} FROM token WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(SqliteTokenRow::into_token).transpose()
    }

    async fn find_by_hash(&self, secret_hash: &str) -> Result<Option<Token>> {
        let row: Option<SqliteTokenRow> = sqlx::query_as(&format!(
            "SELECT {TOKEN_COLUMNS} FROM token WHERE secret_hash = ?"
        ))
        .bind(secret_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SqliteTokenRow::into_token).transpose()
    }

    async fn list_for_owner(&self, owner: &Uuid) -> Result<Vec<Token>> {
        let rows: Vec<SqliteTokenRow> = sqlx::query_as(&format!(
            "SELECT {TOKEN_COLUMNS} FROM token WHERE owner_uuid = ? ORDER BY created_at"
        ))
        .bind(owner.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(SqliteTokenRow::into_token).collect()
    }

    async fn set_enabled(&self, id: &Uuid, enabled: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE token SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM token WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
