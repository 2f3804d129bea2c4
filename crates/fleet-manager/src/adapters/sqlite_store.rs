//! # SQLite Fleet Store
//!
//! Durable [`FleetStore`] on a single `SQLite` connection. Every call runs on
//! tokio's blocking pool so rusqlite never stalls an async worker.
//!
//! # Schema
//!
//! Five tables: `hosts`, `nodes`, `l1s`, `l1_validators`, `events`. Host
//! labels and event details are JSON text; timestamps are RFC 3339 text.
//! The per-host staking port rule is a partial unique index over nodes that
//! are neither stopped nor failed, so a stopped node gives its port up.
//!
//! Constraint failures come back from `SQLite` as text naming the columns.
//! They are mapped onto the constraint names the in-memory store reports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, ErrorCode, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{
    distinct_subnets, Event, FleetCounts, Host, HostId, HostLabels, HostStatus, L1Id, L1Status,
    L1Summary, L1Validator, L1WithCount, NewEvent, NewHost, NewL1, NewNode, Node, NodeId,
    NodeStatus, ParseStatusError, StoreError, ValidatorAssignment, L1, LOCAL_HOST_NAME,
};
use crate::ports::FleetStore;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS hosts (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    name           TEXT NOT NULL UNIQUE,
    remote_address TEXT,
    labels         TEXT NOT NULL DEFAULT '{}',
    status         TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS nodes (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    name         TEXT NOT NULL UNIQUE,
    host_id      INTEGER NOT NULL REFERENCES hosts(id),
    image        TEXT NOT NULL,
    identity     TEXT,
    container_id TEXT,
    http_port    INTEGER NOT NULL,
    staking_port INTEGER NOT NULL,
    expose_http  INTEGER NOT NULL DEFAULT 0,
    status       TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS nodes_host_staking_port_active_key
    ON nodes (host_id, staking_port)
    WHERE status NOT IN ('stopped', 'failed');

CREATE TABLE IF NOT EXISTS l1s (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL UNIQUE,
    subnet_id     TEXT,
    blockchain_id TEXT,
    vm            TEXT NOT NULL,
    status        TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS l1_validators (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    l1_id      INTEGER NOT NULL REFERENCES l1s(id),
    node_id    INTEGER NOT NULL REFERENCES nodes(id),
    weight     INTEGER NOT NULL,
    tx_id      TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (l1_id, node_id)
);

CREATE TABLE IF NOT EXISTS events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    type       TEXT NOT NULL,
    target     TEXT NOT NULL,
    message    TEXT NOT NULL,
    details    TEXT,
    created_at TEXT NOT NULL
);
";

/// Column lists `SQLite` reports for each unique constraint.
const UNIQUE_CONSTRAINTS: &[(&str, &str)] = &[
    ("nodes.host_id, nodes.staking_port", "nodes_host_staking_port_active_key"),
    ("l1_validators.l1_id, l1_validators.node_id", "l1_validators_l1_id_node_id_key"),
    ("hosts.name", "hosts_name_key"),
    ("nodes.name", "nodes_name_key"),
    ("l1s.name", "l1s_name_key"),
];

const NODE_COLUMNS: &str = "id, name, host_id, image, identity, container_id, http_port, \
                            staking_port, expose_http, status, created_at, updated_at";
const HOST_COLUMNS: &str = "id, name, remote_address, labels, status, created_at, updated_at";
const L1_COLUMNS: &str = "id, name, subnet_id, blockchain_id, vm, status, created_at, updated_at";

/// Map a rusqlite error, naming `foreign_key` if a foreign key rejected it.
fn store_error(err: rusqlite::Error, foreign_key: &'static str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    return StoreError::ForeignKeyViolation {
                        constraint: foreign_key,
                    }
                }
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    let message = message.as_deref().unwrap_or_default();
                    let constraint = UNIQUE_CONSTRAINTS
                        .iter()
                        .find(|(columns, _)| message.contains(columns))
                        .map_or("unique", |(_, name)| *name);
                    return StoreError::UniqueViolation { constraint };
                }
                _ => {}
            }
        }
    }
    match err {
        rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..) => {
            StoreError::Corrupt(err.to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

fn backend(err: rusqlite::Error) -> StoreError {
    store_error(err, "unknown_fkey")
}

fn conversion(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn status_col<T: FromStr<Err = ParseStatusError>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion(idx, e))
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn json_col<T: DeserializeOwned + Default>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) if !raw.is_empty() => serde_json::from_str(&raw).map_err(|e| conversion(idx, e)),
        _ => Ok(T::default()),
    }
}

fn host_from_row(row: &Row<'_>) -> rusqlite::Result<Host> {
    Ok(Host {
        id: row.get(0)?,
        name: row.get(1)?,
        remote_address: row.get(2)?,
        labels: json_col(row, 3)?,
        status: status_col(row, 4)?,
        created_at: time_col(row, 5)?,
        updated_at: time_col(row, 6)?,
    })
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        id: row.get(0)?,
        name: row.get(1)?,
        host_id: row.get(2)?,
        image: row.get(3)?,
        identity: row.get(4)?,
        container_id: row.get(5)?,
        http_port: row.get(6)?,
        staking_port: row.get(7)?,
        expose_http: row.get(8)?,
        status: status_col(row, 9)?,
        created_at: time_col(row, 10)?,
        updated_at: time_col(row, 11)?,
    })
}

fn l1_from_row(row: &Row<'_>) -> rusqlite::Result<L1> {
    Ok(L1 {
        id: row.get(0)?,
        name: row.get(1)?,
        subnet_id: row.get(2)?,
        blockchain_id: row.get(3)?,
        vm: row.get(4)?,
        status: status_col(row, 5)?,
        created_at: time_col(row, 6)?,
        updated_at: time_col(row, 7)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        kind: status_col(row, 1)?,
        target: row.get(2)?,
        message: row.get(3)?,
        details: json_col(row, 4)?,
        created_at: time_col(row, 5)?,
    })
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn count(n: i64) -> usize {
    usize::try_from(n).unwrap_or_default()
}

/// [`FleetStore`] backed by `SQLite`.
#[derive(Clone)]
pub struct SqliteFleetStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteFleetStore {
    /// Open or create a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(backend)?;
        Self::from_connection(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory().map_err(backend)?)
    }

    /// Apply pragmas and the schema to an open connection.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        debug!("SQLite fleet schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || op(&*conn.lock()))
            .await
            .map_err(|e| StoreError::Backend(format!("join error: {e}")))?
    }

    fn node_by_id(conn: &Connection, id: NodeId) -> Result<Option<Node>, StoreError> {
        conn.query_row(
            &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
            params![id],
            node_from_row,
        )
        .optional()
        .map_err(backend)
    }

    fn host_by_id(conn: &Connection, id: HostId) -> Result<Option<Host>, StoreError> {
        conn.query_row(
            &format!("SELECT {HOST_COLUMNS} FROM hosts WHERE id = ?1"),
            params![id],
            host_from_row,
        )
        .optional()
        .map_err(backend)
    }

    fn l1_by_id(conn: &Connection, id: L1Id) -> Result<Option<L1>, StoreError> {
        conn.query_row(
            &format!("SELECT {L1_COLUMNS} FROM l1s WHERE id = ?1"),
            params![id],
            l1_from_row,
        )
        .optional()
        .map_err(backend)
    }

    fn exists(conn: &Connection, sql: &str, value: &str) -> Result<bool, StoreError> {
        conn.query_row(sql, params![value], |row| row.get::<_, i64>(0))
            .map(|n| n > 0)
            .map_err(backend)
    }

    fn count_where(conn: &Connection, sql: &str, id: i64) -> Result<usize, StoreError> {
        conn.query_row(sql, params![id], |row| row.get::<_, i64>(0))
            .map(count)
            .map_err(backend)
    }

    /// Run an UPDATE and report `NotFound` if it touched nothing.
    fn update_one(
        conn: &Connection,
        entity: &'static str,
        id: i64,
        sql: &str,
        args: impl rusqlite::Params,
        foreign_key: &'static str,
    ) -> Result<(), StoreError> {
        let changed = conn
            .execute(sql, args)
            .map_err(|e| store_error(e, foreign_key))?;
        if changed == 0 {
            return Err(StoreError::NotFound { entity, id });
        }
        Ok(())
    }
}

#[async_trait]
impl FleetStore for SqliteFleetStore {
    async fn upsert_local_host(&self, labels: &HostLabels) -> Result<Host, StoreError> {
        let labels = serde_json::to_string(labels).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO hosts (name, remote_address, labels, status, created_at, updated_at)
                 VALUES (?1, NULL, ?2, 'online', ?3, ?3)
                 ON CONFLICT(name) DO UPDATE
                   SET labels = excluded.labels, status = 'online', updated_at = excluded.updated_at",
                params![LOCAL_HOST_NAME, labels, now()],
            )
            .map_err(backend)?;
            conn.query_row(
                &format!("SELECT {HOST_COLUMNS} FROM hosts WHERE name = ?1"),
                params![LOCAL_HOST_NAME],
                host_from_row,
            )
            .map_err(backend)
        })
        .await
    }

    async fn insert_host(&self, host: NewHost) -> Result<Host, StoreError> {
        let labels =
            serde_json::to_string(&host.labels).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.blocking(move |conn| {
            let address = Some(host.remote_address).filter(|a| !a.is_empty());
            conn.execute(
                "INSERT INTO hosts (name, remote_address, labels, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![host.name, address, labels, host.status.as_str(), now()],
            )
            .map_err(backend)?;
            let id = conn.last_insert_rowid();
            Self::host_by_id(conn, id)?.ok_or(StoreError::NotFound { entity: "host", id })
        })
        .await
    }

    async fn get_host(&self, id: HostId) -> Result<Option<Host>, StoreError> {
        self.blocking(move |conn| Self::host_by_id(conn, id)).await
    }

    async fn host_name_exists(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.to_string();
        self.blocking(move |conn| {
            Self::exists(conn, "SELECT COUNT(*) FROM hosts WHERE name = ?1", &name)
        })
        .await
    }

    async fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {HOST_COLUMNS} FROM hosts ORDER BY id"))
                .map_err(backend)?;
            let rows = stmt.query_map([], host_from_row).map_err(backend)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
        })
        .await
    }

    async fn set_host_status(&self, id: HostId, status: HostStatus) -> Result<(), StoreError> {
        self.blocking(move |conn| {
            Self::update_one(
                conn,
                "host",
                id,
                "UPDATE hosts SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now(), id],
                "unknown_fkey",
            )
        })
        .await
    }

    async fn delete_host(&self, id: HostId) -> Result<(), StoreError> {
        self.blocking(move |conn| {
            let changed = conn
                .execute("DELETE FROM hosts WHERE id = ?1", params![id])
                .map_err(|e| store_error(e, "nodes_host_id_fkey"))?;
            if changed == 0 {
                return Err(StoreError::NotFound { entity: "host", id });
            }
            Ok(())
        })
        .await
    }

    async fn insert_node(&self, node: NewNode) -> Result<Node, StoreError> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO nodes (name, host_id, image, http_port, staking_port, expose_http,
                                    status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    node.name,
                    node.host_id,
                    node.image,
                    node.http_port,
                    node.staking_port,
                    node.expose_http,
                    NodeStatus::Creating.as_str(),
                    now(),
                ],
            )
            .map_err(|e| store_error(e, "nodes_host_id_fkey"))?;
            let id = conn.last_insert_rowid();
            Self::node_by_id(conn, id)?.ok_or(StoreError::NotFound { entity: "node", id })
        })
        .await
    }

    async fn get_node(&self, id: NodeId) -> Result<Option<Node>, StoreError> {
        self.blocking(move |conn| Self::node_by_id(conn, id)).await
    }

    async fn node_name_exists(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.to_string();
        self.blocking(move |conn| {
            Self::exists(conn, "SELECT COUNT(*) FROM nodes WHERE name = ?1", &name)
        })
        .await
    }

    async fn staking_port_in_use(&self, host: HostId, port: u16) -> Result<bool, StoreError> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM nodes
                 WHERE host_id = ?1 AND staking_port = ?2 AND status NOT IN ('stopped', 'failed')",
                params![host, port],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)
            .map_err(backend)
        })
        .await
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY id"))
                .map_err(backend)?;
            let rows = stmt.query_map([], node_from_row).map_err(backend)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
        })
        .await
    }

    async fn count_nodes_on_host(&self, host: HostId) -> Result<usize, StoreError> {
        self.blocking(move |conn| {
            Self::count_where(conn, "SELECT COUNT(*) FROM nodes WHERE host_id = ?1", host)
        })
        .await
    }

    async fn set_node_status(&self, id: NodeId, status: NodeStatus) -> Result<(), StoreError> {
        self.blocking(move |conn| {
            Self::update_one(
                conn,
                "node",
                id,
                "UPDATE nodes SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now(), id],
                "unknown_fkey",
            )
        })
        .await
    }

    async fn transition_node_status(
        &self,
        id: NodeId,
        from: NodeStatus,
        to: NodeStatus,
    ) -> Result<bool, StoreError> {
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE nodes SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), now(), id, from.as_str()],
            )
            .map(|changed| changed > 0)
            .map_err(backend)
        })
        .await
    }

    async fn set_node_container(
        &self,
        id: NodeId,
        container_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let container_id = container_id.filter(|c| !c.is_empty()).map(str::to_string);
        self.blocking(move |conn| {
            Self::update_one(
                conn,
                "node",
                id,
                "UPDATE nodes SET container_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![container_id, now(), id],
                "unknown_fkey",
            )
        })
        .await
    }

    async fn set_node_identity(&self, id: NodeId, identity: &str) -> Result<(), StoreError> {
        let identity = Some(identity).filter(|i| !i.is_empty()).map(str::to_string);
        self.blocking(move |conn| {
            Self::update_one(
                conn,
                "node",
                id,
                "UPDATE nodes SET identity = ?1, updated_at = ?2 WHERE id = ?3",
                params![identity, now(), id],
                "unknown_fkey",
            )
        })
        .await
    }

    async fn delete_node(&self, id: NodeId) -> Result<(), StoreError> {
        self.blocking(move |conn| {
            let changed = conn
                .execute("DELETE FROM nodes WHERE id = ?1", params![id])
                .map_err(|e| store_error(e, "l1_validators_node_id_fkey"))?;
            if changed == 0 {
                return Err(StoreError::NotFound { entity: "node", id });
            }
            Ok(())
        })
        .await
    }

    async fn insert_l1(&self, l1: NewL1) -> Result<L1, StoreError> {
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO l1s (name, subnet_id, blockchain_id, vm, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    l1.name,
                    l1.subnet_id.filter(|s| !s.is_empty()),
                    l1.blockchain_id.filter(|s| !s.is_empty()),
                    l1.vm,
                    l1.status.as_str(),
                    now(),
                ],
            )
            .map_err(backend)?;
            let id = conn.last_insert_rowid();
            Self::l1_by_id(conn, id)?.ok_or(StoreError::NotFound { entity: "l1", id })
        })
        .await
    }

    async fn get_l1(&self, id: L1Id) -> Result<Option<L1>, StoreError> {
        self.blocking(move |conn| Self::l1_by_id(conn, id)).await
    }

    async fn l1_name_exists(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.to_string();
        self.blocking(move |conn| {
            Self::exists(conn, "SELECT COUNT(*) FROM l1s WHERE name = ?1", &name)
        })
        .await
    }

    async fn list_l1s(&self) -> Result<Vec<L1WithCount>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {L1_COLUMNS},
                            (SELECT COUNT(*) FROM l1_validators v WHERE v.l1_id = l1s.id)
                     FROM l1s ORDER BY id"
                ))
                .map_err(backend)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(L1WithCount {
                        l1: l1_from_row(row)?,
                        validator_count: count(row.get(8)?),
                    })
                })
                .map_err(backend)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
        })
        .await
    }

    async fn assign_l1_subnet(
        &self,
        id: L1Id,
        subnet_id: &str,
        blockchain_id: Option<&str>,
    ) -> Result<L1, StoreError> {
        let subnet_id = subnet_id.to_string();
        let blockchain_id = blockchain_id.filter(|c| !c.is_empty()).map(str::to_string);
        self.blocking(move |conn| {
            Self::update_one(
                conn,
                "l1",
                id,
                "UPDATE l1s
                 SET subnet_id = ?1,
                     blockchain_id = COALESCE(?2, blockchain_id),
                     status = ?3,
                     updated_at = ?4
                 WHERE id = ?5",
                params![
                    subnet_id,
                    blockchain_id,
                    L1Status::Configured.as_str(),
                    now(),
                    id,
                ],
                "unknown_fkey",
            )?;
            Self::l1_by_id(conn, id)?.ok_or(StoreError::NotFound { entity: "l1", id })
        })
        .await
    }

    async fn delete_l1(&self, id: L1Id) -> Result<(), StoreError> {
        self.blocking(move |conn| {
            let changed = conn
                .execute("DELETE FROM l1s WHERE id = ?1", params![id])
                .map_err(|e| store_error(e, "l1_validators_l1_id_fkey"))?;
            if changed == 0 {
                return Err(StoreError::NotFound { entity: "l1", id });
            }
            Ok(())
        })
        .await
    }

    async fn insert_assignment(
        &self,
        l1: L1Id,
        node: NodeId,
        weight: u64,
    ) -> Result<ValidatorAssignment, StoreError> {
        let weight_sql = i64::try_from(weight).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.blocking(move |conn| {
            // Name the missing side; SQLite's own message does not.
            if Self::l1_by_id(conn, l1)?.is_none() {
                return Err(StoreError::ForeignKeyViolation {
                    constraint: "l1_validators_l1_id_fkey",
                });
            }
            if Self::node_by_id(conn, node)?.is_none() {
                return Err(StoreError::ForeignKeyViolation {
                    constraint: "l1_validators_node_id_fkey",
                });
            }
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO l1_validators (l1_id, node_id, weight, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![l1, node, weight_sql, created_at.to_rfc3339()],
            )
            .map_err(|e| store_error(e, "l1_validators_node_id_fkey"))?;
            Ok(ValidatorAssignment {
                id: conn.last_insert_rowid(),
                l1_id: l1,
                node_id: node,
                weight,
                tx_id: None,
                created_at,
            })
        })
        .await
    }

    async fn assignment_exists(&self, l1: L1Id, node: NodeId) -> Result<bool, StoreError> {
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM l1_validators WHERE l1_id = ?1 AND node_id = ?2",
                params![l1, node],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)
            .map_err(backend)
        })
        .await
    }

    async fn delete_assignment(&self, l1: L1Id, node: NodeId) -> Result<bool, StoreError> {
        self.blocking(move |conn| {
            conn.execute(
                "DELETE FROM l1_validators WHERE l1_id = ?1 AND node_id = ?2",
                params![l1, node],
            )
            .map(|changed| changed > 0)
            .map_err(backend)
        })
        .await
    }

    async fn list_validators(&self, l1: L1Id) -> Result<Vec<L1Validator>, StoreError> {
        self.blocking(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT v.id, n.id, n.name, n.identity, n.status, v.weight, v.tx_id, v.created_at
                     FROM l1_validators v JOIN nodes n ON n.id = v.node_id
                     WHERE v.l1_id = ?1
                     ORDER BY v.id",
                )
                .map_err(backend)?;
            let rows = stmt
                .query_map(params![l1], |row| {
                    Ok(L1Validator {
                        assignment_id: row.get(0)?,
                        node_id: row.get(1)?,
                        node_name: row.get(2)?,
                        node_identity: row.get(3)?,
                        node_status: status_col(row, 4)?,
                        weight: row.get::<_, i64>(5)?.unsigned_abs(),
                        tx_id: row.get(6)?,
                        created_at: time_col(row, 7)?,
                    })
                })
                .map_err(backend)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
        })
        .await
    }

    async fn count_assignments_for_l1(&self, l1: L1Id) -> Result<usize, StoreError> {
        self.blocking(move |conn| {
            Self::count_where(conn, "SELECT COUNT(*) FROM l1_validators WHERE l1_id = ?1", l1)
        })
        .await
    }

    async fn count_assignments_for_node(&self, node: NodeId) -> Result<usize, StoreError> {
        self.blocking(move |conn| {
            Self::count_where(
                conn,
                "SELECT COUNT(*) FROM l1_validators WHERE node_id = ?1",
                node,
            )
        })
        .await
    }

    async fn l1s_for_node(&self, node: NodeId) -> Result<Vec<L1Summary>, StoreError> {
        self.blocking(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT l.id, l.name, l.status, v.weight
                     FROM l1_validators v JOIN l1s l ON l.id = v.l1_id
                     WHERE v.node_id = ?1
                     ORDER BY l.name",
                )
                .map_err(backend)?;
            let rows = stmt
                .query_map(params![node], |row| {
                    Ok(L1Summary {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        status: status_col(row, 2)?,
                        weight: row.get::<_, i64>(3)?.unsigned_abs(),
                    })
                })
                .map_err(backend)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
        })
        .await
    }

    async fn subnets_for_node(&self, node: NodeId) -> Result<Vec<String>, StoreError> {
        let subnets = self
            .blocking(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT l.subnet_id
                         FROM l1_validators v JOIN l1s l ON l.id = v.l1_id
                         WHERE v.node_id = ?1 AND l.subnet_id IS NOT NULL
                         ORDER BY v.id",
                    )
                    .map_err(backend)?;
                let rows = stmt
                    .query_map(params![node], |row| row.get::<_, String>(0))
                    .map_err(backend)?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
            })
            .await?;
        Ok(distinct_subnets(subnets))
    }

    async fn append_event(&self, event: NewEvent) -> Result<Event, StoreError> {
        let details = if event.details.is_null() {
            None
        } else {
            Some(event.details.to_string())
        };
        self.blocking(move |conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO events (type, target, message, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.kind.as_str(),
                    event.target,
                    event.message,
                    details,
                    created_at.to_rfc3339(),
                ],
            )
            .map_err(backend)?;
            Ok(Event {
                id: conn.last_insert_rowid(),
                kind: event.kind,
                target: event.target,
                message: event.message,
                details: event.details,
                created_at,
            })
        })
        .await
    }

    async fn list_events(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.blocking(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, type, target, message, details, created_at
                     FROM events ORDER BY id DESC LIMIT ?1",
                )
                .map_err(backend)?;
            let rows = stmt
                .query_map(params![limit], event_from_row)
                .map_err(backend)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
        })
        .await
    }

    async fn counts(&self) -> Result<FleetCounts, StoreError> {
        self.blocking(|conn| {
            conn.query_row(
                "SELECT (SELECT COUNT(*) FROM hosts),
                        (SELECT COUNT(*) FROM nodes),
                        (SELECT COUNT(*) FROM l1s),
                        (SELECT COUNT(*) FROM events)",
                [],
                |row| {
                    Ok(FleetCounts {
                        hosts: count(row.get(0)?),
                        nodes: count(row.get(1)?),
                        l1s: count(row.get(2)?),
                        events: count(row.get(3)?),
                    })
                },
            )
            .map_err(backend)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventKind;

    fn new_node(name: &str, host_id: HostId, port: u16) -> NewNode {
        NewNode {
            name: name.to_string(),
            host_id,
            image: "avaplatform/avalanchego:latest".to_string(),
            http_port: 9650,
            staking_port: port,
            expose_http: false,
        }
    }

    async fn store_with_local() -> (SqliteFleetStore, Host) {
        let store = SqliteFleetStore::open_in_memory().unwrap();
        let host = store
            .upsert_local_host(&HostLabels {
                hostname: Some("rack-1".into()),
                ..HostLabels::default()
            })
            .await
            .unwrap();
        (store, host)
    }

    #[tokio::test]
    async fn test_schema_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.db");
        {
            let store = SqliteFleetStore::open(&path).unwrap();
            store.upsert_local_host(&HostLabels::default()).await.unwrap();
        }
        let store = SqliteFleetStore::open(&path).unwrap();
        let again = store.upsert_local_host(&HostLabels::default()).await.unwrap();
        assert!(again.is_local());
        assert_eq!(store.list_hosts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_labels_round_trip_as_json() {
        let (store, host) = store_with_local().await;
        let fetched = store.get_host(host.id).await.unwrap().unwrap();
        assert_eq!(fetched.labels.hostname(), Some("rack-1"));
        assert_eq!(fetched.status, HostStatus::Online);
    }

    #[tokio::test]
    async fn test_partial_port_index() {
        let (store, host) = store_with_local().await;
        let n1 = store.insert_node(new_node("n1", host.id, 9651)).await.unwrap();

        let clash = store.insert_node(new_node("n2", host.id, 9651)).await;
        assert!(matches!(
            clash,
            Err(StoreError::UniqueViolation {
                constraint: "nodes_host_staking_port_active_key"
            })
        ));

        store.set_node_status(n1.id, NodeStatus::Stopped).await.unwrap();
        let n2 = store.insert_node(new_node("n2", host.id, 9651)).await.unwrap();
        assert!(store.staking_port_in_use(host.id, 9651).await.unwrap());

        // n1 cannot take the port back while n2 holds it.
        let revive = store.set_node_status(n1.id, NodeStatus::Running).await;
        assert!(matches!(revive, Err(StoreError::UniqueViolation { .. })));
        assert_eq!(
            store.get_node(n2.id).await.unwrap().unwrap().status,
            NodeStatus::Creating
        );
    }

    #[tokio::test]
    async fn test_transition_requires_expected_status() {
        let (store, host) = store_with_local().await;
        let node = store.insert_node(new_node("n1", host.id, 9651)).await.unwrap();
        store.set_node_status(node.id, NodeStatus::Running).await.unwrap();

        assert!(!store
            .transition_node_status(node.id, NodeStatus::Creating, NodeStatus::Failed)
            .await
            .unwrap());
        assert!(store
            .transition_node_status(node.id, NodeStatus::Running, NodeStatus::Unhealthy)
            .await
            .unwrap());
        assert_eq!(
            store.get_node(node.id).await.unwrap().unwrap().status,
            NodeStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_duplicate_names_map_to_constraints() {
        let (store, host) = store_with_local().await;
        store.insert_node(new_node("n1", host.id, 9651)).await.unwrap();
        let dup = store.insert_node(new_node("n1", host.id, 9751)).await;
        assert!(matches!(
            dup,
            Err(StoreError::UniqueViolation {
                constraint: "nodes_name_key"
            })
        ));

        let l1 = NewL1 {
            name: "sub1".into(),
            subnet_id: None,
            blockchain_id: None,
            vm: "subnet-evm".into(),
            status: L1Status::Pending,
        };
        store.insert_l1(l1.clone()).await.unwrap();
        assert!(matches!(
            store.insert_l1(l1).await,
            Err(StoreError::UniqueViolation {
                constraint: "l1s_name_key"
            })
        ));
    }

    #[tokio::test]
    async fn test_foreign_keys_block_deletes() {
        let (store, host) = store_with_local().await;
        let node = store.insert_node(new_node("n1", host.id, 9651)).await.unwrap();
        let l1 = store
            .insert_l1(NewL1 {
                name: "sub2".into(),
                subnet_id: Some("abc".into()),
                blockchain_id: None,
                vm: "subnet-evm".into(),
                status: L1Status::Configured,
            })
            .await
            .unwrap();
        store.insert_assignment(l1.id, node.id, 100).await.unwrap();

        assert!(matches!(
            store.delete_host(host.id).await,
            Err(StoreError::ForeignKeyViolation {
                constraint: "nodes_host_id_fkey"
            })
        ));
        assert!(matches!(
            store.delete_l1(l1.id).await,
            Err(StoreError::ForeignKeyViolation {
                constraint: "l1_validators_l1_id_fkey"
            })
        ));
        assert!(matches!(
            store.insert_assignment(l1.id, node.id, 100).await,
            Err(StoreError::UniqueViolation {
                constraint: "l1_validators_l1_id_node_id_key"
            })
        ));
        assert_eq!(store.subnets_for_node(node.id).await.unwrap(), vec!["abc"]);

        let summaries = store.l1s_for_node(node.id).await.unwrap();
        assert_eq!(summaries[0].weight, 100);
        assert!(store.delete_assignment(l1.id, node.id).await.unwrap());
        store.delete_l1(l1.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_events_newest_first_with_details() {
        let store = SqliteFleetStore::open_in_memory().unwrap();
        for i in 0..3 {
            store
                .append_event(NewEvent {
                    kind: EventKind::NodeHealth,
                    target: format!("n{i}"),
                    message: "Status changed: running → unhealthy".into(),
                    details: serde_json::json!({ "seq": i }),
                })
                .await
                .unwrap();
        }
        let events = store.list_events(2).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].target, "n2");
        assert_eq!(events[0].details["seq"], 2);
        assert_eq!(events[0].kind, EventKind::NodeHealth);
        assert_eq!(store.counts().await.unwrap().events, 3);
    }
}
