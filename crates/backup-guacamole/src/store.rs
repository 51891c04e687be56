//! Connection export/import against the Guacamole schema
//!
//! Works directly with Guacamole's tables (`guacamole_connection`,
//! `guacamole_connection_parameter`, `guacamole_connection_permission`,
//! `guacamole_entity`). Everything is scoped to the dashboard's name
//! prefix, so definitions created by other Guacamole users are never
//! touched.

use std::collections::BTreeMap;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info, warn};

use backup_core::{
    BackupError, BackupResult, ConnectionDefinition, ImportOutcome, PermissionGrant,
};

use crate::config::GuacamoleConfig;

/// Adapter for the external Guacamole connection store
pub struct GuacamoleStore {
    pool: PgPool,
    prefix: String,
}

impl GuacamoleStore {
    /// Create a store with a lazily established pool. No connection is
    /// attempted here; reachability is probed via [`Self::is_available`].
    pub fn connect(config: &GuacamoleConfig) -> BackupResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_lazy(&config.url())
            .map_err(BackupError::external)?;
        Ok(Self {
            pool,
            prefix: config.prefix.clone(),
        })
    }

    /// Wrap an existing pool (tests, shared pools).
    pub fn with_pool(pool: PgPool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    /// Lightweight reachability probe.
    pub async fn is_available(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "guacamole database not available");
                false
            }
        }
    }

    fn like_pattern(&self) -> String {
        format!("{}%", self.prefix)
    }

    /// Export all connection definitions owned by the dashboard, with
    /// their parameters and permission grants resolved.
    pub async fn export_connections(&self) -> BackupResult<Vec<ConnectionDefinition>> {
        let rows = sqlx::query(
            "SELECT connection_id, connection_name, protocol, parent_id, \
                    max_connections, max_connections_per_user, weight, failover_only \
             FROM guacamole_connection \
             WHERE connection_name LIKE $1 \
             ORDER BY connection_id",
        )
        .bind(self.like_pattern())
        .fetch_all(&self.pool)
        .await
        .map_err(BackupError::external)?;

        let mut connections = Vec::with_capacity(rows.len());
        for row in rows {
            let connection_id: i32 = row.try_get("connection_id").map_err(BackupError::external)?;

            let mut definition = ConnectionDefinition {
                name: row
                    .try_get("connection_name")
                    .map_err(BackupError::external)?,
                protocol: row.try_get("protocol").map_err(BackupError::external)?,
                parameters: BTreeMap::new(),
                permissions: Vec::new(),
                parent_id: row.try_get("parent_id").map_err(BackupError::external)?,
                max_connections: row
                    .try_get("max_connections")
                    .map_err(BackupError::external)?,
                max_connections_per_user: row
                    .try_get("max_connections_per_user")
                    .map_err(BackupError::external)?,
                weight: row
                    .try_get::<Option<i32>, _>("weight")
                    .map_err(BackupError::external)?
                    .unwrap_or(1),
                failover_only: row.try_get("failover_only").map_err(BackupError::external)?,
            };

            let parameters = sqlx::query(
                "SELECT parameter_name, parameter_value \
                 FROM guacamole_connection_parameter \
                 WHERE connection_id = $1 \
                 ORDER BY parameter_name",
            )
            .bind(connection_id)
            .fetch_all(&self.pool)
            .await
            .map_err(BackupError::external)?;
            for parameter in parameters {
                definition.parameters.insert(
                    parameter
                        .try_get("parameter_name")
                        .map_err(BackupError::external)?,
                    parameter
                        .try_get("parameter_value")
                        .map_err(BackupError::external)?,
                );
            }

            let grants = sqlx::query(
                "SELECT e.name AS principal_name, e.type::text AS principal_type, \
                        p.permission::text AS permission \
                 FROM guacamole_connection_permission p \
                 JOIN guacamole_entity e ON p.entity_id = e.entity_id \
                 WHERE p.connection_id = $1 \
                 ORDER BY e.type, e.name",
            )
            .bind(connection_id)
            .fetch_all(&self.pool)
            .await
            .map_err(BackupError::external)?;
            for grant in grants {
                definition.permissions.push(PermissionGrant {
                    principal_name: grant
                        .try_get("principal_name")
                        .map_err(BackupError::external)?,
                    principal_type: grant
                        .try_get("principal_type")
                        .map_err(BackupError::external)?,
                    permission: grant.try_get("permission").map_err(BackupError::external)?,
                });
            }

            connections.push(definition);
        }

        info!(count = connections.len(), "exported guacamole connections");
        Ok(connections)
    }

    /// Delete all dashboard-owned connections and reinsert the given
    /// definitions, in one transaction on the Guacamole pool.
    ///
    /// Per-connection failures are counted and do not abort the import;
    /// permission grants whose principal does not exist in the target
    /// store are silently dropped (their ids are not portable).
    pub async fn import_connections(
        &self,
        connections: &[ConnectionDefinition],
    ) -> BackupResult<ImportOutcome> {
        if connections.is_empty() {
            debug!("no guacamole connections to import");
            return Ok(ImportOutcome::default());
        }

        let mut tx = self.pool.begin().await.map_err(BackupError::external)?;

        sqlx::query("DELETE FROM guacamole_connection WHERE connection_name LIKE $1")
            .bind(self.like_pattern())
            .execute(&mut *tx)
            .await
            .map_err(BackupError::external)?;

        let mut outcome = ImportOutcome::default();
        for definition in connections {
            match insert_connection(&mut tx, definition).await {
                Ok(()) => {
                    outcome.imported += 1;
                    debug!(name = %definition.name, "imported guacamole connection");
                }
                Err(err) => {
                    outcome.errors += 1;
                    warn!(name = %definition.name, error = %err, "failed to import connection");
                }
            }
        }

        tx.commit().await.map_err(BackupError::external)?;
        info!(
            imported = outcome.imported,
            errors = outcome.errors,
            "guacamole connection import finished"
        );
        Ok(outcome)
    }
}

async fn insert_connection(
    tx: &mut Transaction<'_, Postgres>,
    definition: &ConnectionDefinition,
) -> BackupResult<()> {
    let row = sqlx::query(
        "INSERT INTO guacamole_connection \
            (connection_name, protocol, parent_id, max_connections, \
             max_connections_per_user, weight, failover_only) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING connection_id",
    )
    .bind(&definition.name)
    .bind(&definition.protocol)
    .bind(definition.parent_id)
    .bind(definition.max_connections)
    .bind(definition.max_connections_per_user)
    .bind(definition.weight)
    .bind(definition.failover_only)
    .fetch_one(&mut **tx)
    .await
    .map_err(BackupError::external)?;
    let connection_id: i32 = row.try_get("connection_id").map_err(BackupError::external)?;

    for (name, value) in &definition.parameters {
        sqlx::query(
            "INSERT INTO guacamole_connection_parameter \
                (connection_id, parameter_name, parameter_value) \
             VALUES ($1, $2, $3)",
        )
        .bind(connection_id)
        .bind(name)
        .bind(value)
        .execute(&mut **tx)
        .await
        .map_err(BackupError::external)?;
    }

    for grant in &definition.permissions {
        // Principal ids differ between stores; resolve by name and type
        // in the target store.
        let principal = sqlx::query(
            "SELECT entity_id FROM guacamole_entity \
             WHERE name = $1 AND type = $2::guacamole_entity_type \
             LIMIT 1",
        )
        .bind(&grant.principal_name)
        .bind(&grant.principal_type)
        .fetch_optional(&mut **tx)
        .await
        .map_err(BackupError::external)?;

        let Some(principal) = principal else {
            debug!(
                principal = %grant.principal_name,
                connection = %definition.name,
                "principal not present in target store, grant dropped"
            );
            continue;
        };
        let entity_id: i32 = principal.try_get("entity_id").map_err(BackupError::external)?;

        sqlx::query(
            "INSERT INTO guacamole_connection_permission \
                (entity_id, connection_id, permission) \
             VALUES ($1, $2, $3::guacamole_object_permission_type) \
             ON CONFLICT DO NOTHING",
        )
        .bind(entity_id)
        .bind(connection_id)
        .bind(&grant.permission)
        .execute(&mut **tx)
        .await
        .map_err(BackupError::external)?;
    }

    Ok(())
}
