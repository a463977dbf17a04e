use std::collections::VecDeque;

use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use hivegrid_authz::auth::ServiceKeyValidator;
use hivegrid_authz::infra::postgres::{
    deactivate_service_key, upsert_service_key, PgAclStore, PgShadowStore, ServiceKeyRow,
};
use hivegrid_authz::infra::{AclStore, ShadowStore};
use hivegrid_authz::{ObjectIdentity, Principal, ResourceKind};

fn print_help() {
    eprintln!(
        "\
hivegrid-authz-admin

USAGE:
  hivegrid-authz-admin <command> [options]

COMMANDS:
  migrate               Run database migrations
  upsert-principal      Mirror or update a user principal
  create-service-key    Mint a service key and store its hash
  revoke-service-key    Deactivate a service key by hash
  show-acl              Print the ACL for an object identity

COMMON OPTIONS:
  --database-url <postgres_url>    (defaults to env DATABASE_URL)

upsert-principal OPTIONS:
  --user-id <uuid>                (required)
  --disabled                      (optional) mirror the user as disabled
  --super-admin                   (optional) grant the super-admin flag

create-service-key OPTIONS:
  --service <name>                (required) logical caller name
  --check                         (optional) allow authorization checks
  --sync                          (optional) allow shadow sync
  --manage                        (optional) allow token/principal management

revoke-service-key OPTIONS:
  --key-hash <hex>                (required) SHA-256 hash of the key

show-acl OPTIONS:
  --kind <device|app|token|tree>  (required)
  --object-id <uuid>              (required)
"
    );
}

fn require_database_url(database_url: Option<String>) -> anyhow::Result<String> {
    database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required (or pass --database-url)"))
}

async fn connect(database_url: &str) -> anyhow::Result<sqlx::PgPool> {
    Ok(PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    match command.as_str() {
        "migrate" => {
            let mut database_url: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url =
                            Some(args.pop_front().ok_or_else(|| {
                                anyhow::anyhow!("missing value for --database-url")
                            })?);
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let database_url = require_database_url(database_url)?;
            let pool = connect(&database_url).await?;
            hivegrid_authz::migrations::run_postgres(&pool).await?;
            println!("ok: migrations applied");
            Ok(())
        }
        "upsert-principal" => {
            let mut database_url: Option<String> = None;
            let mut user_id: Option<Uuid> = None;
            let mut enabled = true;
            let mut super_admin = false;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url =
                            Some(args.pop_front().ok_or_else(|| {
                                anyhow::anyhow!("missing value for --database-url")
                            })?);
                    }
                    "--user-id" => {
                        let raw = args
                            .pop_front()
                            .ok_or_else(|| anyhow::anyhow!("missing value for --user-id"))?;
                        user_id = Some(Uuid::parse_str(&raw)?);
                    }
                    "--disabled" => enabled = false,
                    "--super-admin" => super_admin = true,
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let user_id = user_id.ok_or_else(|| anyhow::anyhow!("--user-id is required"))?;
            let database_url = require_database_url(database_url)?;
            let pool = connect(&database_url).await?;
            hivegrid_authz::migrations::run_postgres(&pool).await?;

            let shadows = PgShadowStore::new(pool);
            shadows
                .upsert_principal(&Principal {
                    user_id,
                    enabled,
                    super_admin,
                })
                .await?;
            println!("ok: principal {user_id} enabled={enabled} super_admin={super_admin}");
            Ok(())
        }
        "create-service-key" => {
            let mut database_url: Option<String> = None;
            let mut service: Option<String> = None;
            let mut can_check = false;
            let mut can_sync = false;
            let mut can_manage = false;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url =
                            Some(args.pop_front().ok_or_else(|| {
                                anyhow::anyhow!("missing value for --database-url")
                            })?);
                    }
                    "--service" => {
                        service = Some(
                            args.pop_front()
                                .ok_or_else(|| anyhow::anyhow!("missing value for --service"))?,
                        );
                    }
                    "--check" => can_check = true,
                    "--sync" => can_sync = true,
                    "--manage" => can_manage = true,
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let service = service.ok_or_else(|| anyhow::anyhow!("--service is required"))?;
            if !(can_check || can_sync || can_manage) {
                anyhow::bail!("at least one of --check, --sync, --manage is required");
            }

            let database_url = require_database_url(database_url)?;
            let pool = connect(&database_url).await?;
            hivegrid_authz::migrations::run_postgres(&pool).await?;

            let (plaintext, key_hash) = ServiceKeyValidator::generate_key(&service);
            upsert_service_key(
                &pool,
                &ServiceKeyRow {
                    key_hash: key_hash.clone(),
                    service: service.clone(),
                    can_check,
                    can_sync,
                    can_manage,
                    active: true,
                },
            )
            .await?;

            println!("ok: service key created for {service}");
            println!("  key:      {plaintext}");
            println!("  key_hash: {key_hash}");
            println!("  (the plaintext key is shown once; store it now)");
            Ok(())
        }
        "revoke-service-key" => {
            let mut database_url: Option<String> = None;
            let mut key_hash: Option<String> = None;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url =
                            Some(args.pop_front().ok_or_else(|| {
                                anyhow::anyhow!("missing value for --database-url")
                            })?);
                    }
                    "--key-hash" => {
                        key_hash = Some(
                            args.pop_front()
                                .ok_or_else(|| anyhow::anyhow!("missing value for --key-hash"))?,
                        );
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let key_hash = key_hash.ok_or_else(|| anyhow::anyhow!("--key-hash is required"))?;
            let database_url = require_database_url(database_url)?;
            let pool = connect(&database_url).await?;

            if deactivate_service_key(&pool, &key_hash).await? {
                println!("ok: service key revoked");
            } else {
                println!("ok: no active key with that hash");
            }
            Ok(())
        }
        "show-acl" => {
            let mut database_url: Option<String> = None;
            let mut kind: Option<String> = None;
            let mut object_id: Option<Uuid> = None;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--database-url" => {
                        database_url =
                            Some(args.pop_front().ok_or_else(|| {
                                anyhow::anyhow!("missing value for --database-url")
                            })?);
                    }
                    "--kind" => {
                        kind = Some(
                            args.pop_front()
                                .ok_or_else(|| anyhow::anyhow!("missing value for --kind"))?,
                        );
                    }
                    "--object-id" => {
                        let raw = args
                            .pop_front()
                            .ok_or_else(|| anyhow::anyhow!("missing value for --object-id"))?;
                        object_id = Some(Uuid::parse_str(&raw)?);
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let kind = kind.ok_or_else(|| anyhow::anyhow!("--kind is required"))?;
            let kind = ResourceKind::from_str(&kind)
                .ok_or_else(|| anyhow::anyhow!("unknown resource kind: {kind}"))?;
            let object_id =
                object_id.ok_or_else(|| anyhow::anyhow!("--object-id is required"))?;

            let database_url = require_database_url(database_url)?;
            let pool = connect(&database_url).await?;

            let store = PgAclStore::new(pool);
            let object = ObjectIdentity::new(kind, object_id);
            match store.load(&object).await? {
                None => println!("no ACL for {object}"),
                Some(acl) => {
                    println!("ACL for {object}:");
                    println!("  inheriting: {}", acl.inheriting);
                    match &acl.parent {
                        Some(parent) => println!("  parent:     {parent}"),
                        None => println!("  parent:     -"),
                    }
                    println!("  entries ({}):", acl.entries.len());
                    for entry in &acl.entries {
                        println!(
                            "    {} {} {}",
                            entry.sid,
                            entry.permission.label(),
                            if entry.granting { "grant" } else { "deny" },
                        );
                    }
                }
            }
            Ok(())
        }
        other => {
            eprintln!("unknown command: {other}\n");
            print_help();
            anyhow::bail!("unknown command: {other}");
        }
    }
}
