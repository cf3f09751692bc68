//! Persistent container, service, and event records
//!
//! Backed by SQLite. The orchestrator is the only writer for a given
//! container; all writes are keyed by container id. Lifecycle transitions
//! are validated here, and `step|complete|error` events are persisted
//! synchronously before the corresponding publish.

use crate::{CoreError, EventKind, ProgressEvent, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Container lifecycle. Monotonic except to `error`, which is terminal
/// until manual reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Pending,
    Creating,
    Starting,
    Deploying,
    Syncing,
    Finalizing,
    Ready,
    Error,
}

impl Lifecycle {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Creating => 1,
            Self::Starting => 2,
            Self::Deploying => 3,
            Self::Syncing => 4,
            Self::Finalizing => 5,
            Self::Ready => 6,
            Self::Error => 7,
        }
    }

    /// Allowed transitions: the next pipeline stage, or `error` from any
    /// non-error state
    pub fn can_transition(self, to: Lifecycle) -> bool {
        if to == Self::Error {
            return self != Self::Error;
        }
        if self == Self::Error {
            return false;
        }
        to.rank() == self.rank() + 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Creating => "creating",
            Self::Starting => "starting",
            Self::Deploying => "deploying",
            Self::Syncing => "syncing",
            Self::Finalizing => "finalizing",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Lifecycle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "creating" => Ok(Self::Creating),
            "starting" => Ok(Self::Starting),
            "deploying" => Ok(Self::Deploying),
            "syncing" => Ok(Self::Syncing),
            "finalizing" => Ok(Self::Finalizing),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown lifecycle {:?}", other)),
        }
    }
}

/// A managed container record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub id: String,
    pub vmid: u32,
    pub node_name: String,
    pub template_id: Option<String>,
    pub lifecycle: Lifecycle,
    pub created_at: DateTime<Utc>,
    pub root_password_encrypted: Option<String>,
}

impl ContainerRecord {
    pub fn new(id: impl Into<String>, vmid: u32, node_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vmid,
            node_name: node_name.into(),
            template_id: None,
            lifecycle: Lifecycle::Pending,
            created_at: Utc::now(),
            root_password_encrypted: None,
        }
    }
}

/// A service discovered on a container after provisioning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub container_id: String,
    pub name: String,
    pub service_type: String,
    pub port: Option<u16>,
    pub web_url: Option<String>,
    pub status: String,
    pub credentials_encrypted: Option<String>,
}

/// SQLite-backed store for containers, services, and the persisted event log
#[derive(Clone)]
pub struct ContainerStore {
    conn: Arc<Mutex<Connection>>,
}

impl ContainerStore {
    /// Open (and migrate) the store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests and embedded use
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS containers (
                id TEXT PRIMARY KEY,
                vmid INTEGER NOT NULL,
                node_name TEXT NOT NULL,
                template_id TEXT,
                lifecycle TEXT NOT NULL,
                created_at TEXT NOT NULL,
                root_password_encrypted TEXT
            );
            CREATE TABLE IF NOT EXISTS services (
                container_id TEXT NOT NULL,
                name TEXT NOT NULL,
                service_type TEXT NOT NULL,
                port INTEGER,
                web_url TEXT,
                status TEXT NOT NULL,
                credentials_encrypted TEXT,
                UNIQUE(container_id, name)
            );
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                container_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                step TEXT,
                percent INTEGER,
                message TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a new container record; the id must be unused
    pub fn insert_container(&self, record: &ContainerRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO containers (id, vmid, node_name, template_id, lifecycle, created_at, root_password_encrypted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.vmid,
                record.node_name,
                record.template_id,
                record.lifecycle.as_str(),
                record.created_at.to_rfc3339(),
                record.root_password_encrypted,
            ],
        )?;
        Ok(())
    }

    pub fn get_container(&self, id: &str) -> Result<Option<ContainerRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, vmid, node_name, template_id, lifecycle, created_at, root_password_encrypted
             FROM containers WHERE id = ?1",
            params![id],
            row_to_container,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_containers(&self) -> Result<Vec<ContainerRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, vmid, node_name, template_id, lifecycle, created_at, root_password_encrypted
             FROM containers ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], row_to_container)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Validated lifecycle transition, persisted synchronously
    pub fn transition(&self, id: &str, to: Lifecycle) -> Result<()> {
        let current = self
            .get_container(id)?
            .ok_or_else(|| CoreError::ContainerNotFound(id.to_string()))?
            .lifecycle;

        if !current.can_transition(to) {
            return Err(CoreError::InvalidTransition {
                from: current.to_string(),
                to: to.to_string(),
            });
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE containers SET lifecycle = ?1 WHERE id = ?2",
            params![to.as_str(), id],
        )?;
        Ok(())
    }

    /// Manual reset: `error` back to `pending` so the job can be retried
    pub fn reset(&self, id: &str) -> Result<()> {
        let current = self
            .get_container(id)?
            .ok_or_else(|| CoreError::ContainerNotFound(id.to_string()))?
            .lifecycle;
        if current != Lifecycle::Error {
            return Err(CoreError::InvalidTransition {
                from: current.to_string(),
                to: Lifecycle::Pending.to_string(),
            });
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE containers SET lifecycle = 'pending' WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Create or update a service record, keyed by `(container_id, name)`
    pub fn upsert_service(&self, service: &ServiceRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO services (container_id, name, service_type, port, web_url, status, credentials_encrypted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(container_id, name) DO UPDATE SET
                service_type = excluded.service_type,
                port = excluded.port,
                web_url = excluded.web_url,
                status = excluded.status,
                credentials_encrypted = COALESCE(excluded.credentials_encrypted, services.credentials_encrypted)",
            params![
                service.container_id,
                service.name,
                service.service_type,
                service.port,
                service.web_url,
                service.status,
                service.credentials_encrypted,
            ],
        )?;
        Ok(())
    }

    pub fn services_for(&self, container_id: &str) -> Result<Vec<ServiceRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT container_id, name, service_type, port, web_url, status, credentials_encrypted
             FROM services WHERE container_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![container_id], |row| {
            Ok(ServiceRecord {
                container_id: row.get(0)?,
                name: row.get(1)?,
                service_type: row.get(2)?,
                port: row.get::<_, Option<u16>>(3)?,
                web_url: row.get(4)?,
                status: row.get(5)?,
                credentials_encrypted: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Persist an event. Only `step`, `complete`, and `error` events belong
    /// in the durable log; `log` events are transient.
    pub fn record_event(&self, event: &ProgressEvent) -> Result<()> {
        if event.kind == EventKind::Log {
            return Ok(());
        }
        let kind = serde_json::to_value(event.kind)?
            .as_str()
            .unwrap_or("step")
            .to_string();
        let step = event.step.map(|s| s.to_string());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO events (container_id, kind, step, percent, message, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.container_id,
                kind,
                step,
                event.percent,
                event.message,
                event.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Persisted events for a container, oldest first: (kind, percent, message)
    pub fn events_for(&self, container_id: &str) -> Result<Vec<(String, Option<u8>, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT kind, percent, message FROM events WHERE container_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![container_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<u8>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

fn row_to_container(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContainerRecord> {
    let lifecycle: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    Ok(ContainerRecord {
        id: row.get(0)?,
        vmid: row.get(1)?,
        node_name: row.get(2)?,
        template_id: row.get(3)?,
        lifecycle: lifecycle.parse().unwrap_or(Lifecycle::Error),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        root_password_encrypted: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineStep;

    fn store_with(id: &str) -> ContainerStore {
        let store = ContainerStore::open_in_memory().unwrap();
        store
            .insert_container(&ContainerRecord::new(id, 120, "pve1"))
            .unwrap();
        store
    }

    #[test]
    fn test_insert_and_get() {
        let store = store_with("c-1");
        let record = store.get_container("c-1").unwrap().unwrap();
        assert_eq!(record.vmid, 120);
        assert_eq!(record.lifecycle, Lifecycle::Pending);
    }

    #[test]
    fn test_lifecycle_walks_the_pipeline() {
        let store = store_with("c-1");
        for to in [
            Lifecycle::Creating,
            Lifecycle::Starting,
            Lifecycle::Deploying,
            Lifecycle::Syncing,
            Lifecycle::Finalizing,
            Lifecycle::Ready,
        ] {
            store.transition("c-1", to).unwrap();
        }
        assert_eq!(
            store.get_container("c-1").unwrap().unwrap().lifecycle,
            Lifecycle::Ready
        );
    }

    #[test]
    fn test_skipping_stages_is_rejected() {
        let store = store_with("c-1");
        let err = store.transition("c-1", Lifecycle::Syncing).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_error_reachable_from_any_stage() {
        let store = store_with("c-1");
        store.transition("c-1", Lifecycle::Creating).unwrap();
        store.transition("c-1", Lifecycle::Error).unwrap();
        // Terminal until manual reset
        let err = store.transition("c-1", Lifecycle::Creating).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_reset_only_from_error() {
        let store = store_with("c-1");
        assert!(store.reset("c-1").is_err());
        store.transition("c-1", Lifecycle::Error).unwrap();
        store.reset("c-1").unwrap();
        assert_eq!(
            store.get_container("c-1").unwrap().unwrap().lifecycle,
            Lifecycle::Pending
        );
    }

    #[test]
    fn test_service_upsert_is_unique_per_name() {
        let store = store_with("c-1");
        let mut service = ServiceRecord {
            container_id: "c-1".to_string(),
            name: "nginx".to_string(),
            service_type: "systemd".to_string(),
            port: None,
            web_url: None,
            status: "running".to_string(),
            credentials_encrypted: None,
        };
        store.upsert_service(&service).unwrap();
        service.port = Some(80);
        service.web_url = Some("http://10.0.0.5:80".to_string());
        store.upsert_service(&service).unwrap();

        let services = store.services_for("c-1").unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].port, Some(80));
    }

    #[test]
    fn test_service_upsert_keeps_existing_credentials() {
        let store = store_with("c-1");
        let service = ServiceRecord {
            container_id: "c-1".to_string(),
            name: "grafana".to_string(),
            service_type: "systemd".to_string(),
            port: None,
            web_url: None,
            status: "running".to_string(),
            credentials_encrypted: Some("sealed".to_string()),
        };
        store.upsert_service(&service).unwrap();

        let update = ServiceRecord {
            credentials_encrypted: None,
            port: Some(3000),
            ..service
        };
        store.upsert_service(&update).unwrap();

        let services = store.services_for("c-1").unwrap();
        assert_eq!(services[0].credentials_encrypted.as_deref(), Some("sealed"));
        assert_eq!(services[0].port, Some(3000));
    }

    #[test]
    fn test_log_events_are_not_persisted() {
        let store = store_with("c-1");
        store
            .record_event(&ProgressEvent::log("c-1", "a line"))
            .unwrap();
        store
            .record_event(&ProgressEvent::step(
                "c-1",
                PipelineStep::Creating,
                5,
                "creating",
            ))
            .unwrap();

        let events = store.events_for("c-1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "step");
    }

    #[test]
    fn test_transition_unknown_container() {
        let store = ContainerStore::open_in_memory().unwrap();
        let err = store.transition("ghost", Lifecycle::Creating).unwrap_err();
        assert!(matches!(err, CoreError::ContainerNotFound(_)));
    }
}
