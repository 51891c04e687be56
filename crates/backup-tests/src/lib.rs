//! Shared fixtures for the backup integration tests
//!
//! Provides an in-memory primary store with the dashboard schema, seed
//! data mirroring a small real deployment, and recording implementations
//! of the collaborator traits.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use backup_core::{AuditSink, EventBroadcast};

/// Primary-store schema, trimmed to the columns the tests exercise.
pub const SCHEMA: &str = r#"
CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT,
    role TEXT DEFAULT 'user',
    is_active BOOLEAN DEFAULT 1,
    created_at TEXT,
    updated_at TEXT
);
CREATE TABLE categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    color TEXT,
    created_at TEXT
);
CREATE TABLE appliances (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    description TEXT,
    category INTEGER REFERENCES categories(id),
    is_favorite BOOLEAN DEFAULT 0,
    start_command TEXT,
    stop_command TEXT,
    status_command TEXT,
    ssh_connection TEXT,
    remote_desktop_enabled BOOLEAN DEFAULT 0,
    remote_protocol TEXT,
    remote_host TEXT,
    remote_port INTEGER,
    remote_username TEXT,
    remote_password_encrypted TEXT,
    created_at TEXT,
    updated_at TEXT
);
CREATE TABLE ssh_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key_name TEXT NOT NULL UNIQUE,
    private_key TEXT,
    public_key TEXT,
    key_type TEXT,
    key_size INTEGER,
    comment TEXT,
    passphrase_hash TEXT,
    is_default BOOLEAN DEFAULT 0,
    created_at TEXT,
    updated_at TEXT
);
CREATE TABLE hosts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname TEXT NOT NULL,
    host TEXT NOT NULL,
    username TEXT NOT NULL,
    port INTEGER DEFAULT 22,
    key_name TEXT,
    is_active BOOLEAN DEFAULT 1,
    last_tested TEXT,
    test_status TEXT,
    created_at TEXT,
    updated_at TEXT
);
CREATE TABLE commands (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    appliance_id INTEGER REFERENCES appliances(id),
    description TEXT,
    command TEXT,
    host_id INTEGER REFERENCES hosts(id),
    created_at TEXT,
    updated_at TEXT
);
CREATE TABLE settings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER,
    key TEXT,
    value TEXT
);
CREATE TABLE attachments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    original_name TEXT,
    mime_type TEXT,
    file_size INTEGER,
    width INTEGER,
    height INTEGER,
    is_active BOOLEAN DEFAULT 0,
    created_at TEXT
);
CREATE TABLE permissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER REFERENCES users(id),
    appliance_id INTEGER REFERENCES appliances(id),
    permission TEXT
);
CREATE TABLE audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER,
    action TEXT,
    details TEXT,
    created_at TEXT
);
CREATE TABLE sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER,
    token_hash TEXT,
    expires_at TEXT,
    created_at TEXT
);
"#;

/// Initialize test logging once; safe to call from every test.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One-connection in-memory pool with the schema applied.
///
/// A single connection keeps every query on the same in-memory database.
pub async fn test_pool() -> SqlitePool {
    init_tracing();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");

    for statement in SCHEMA.split(';') {
        let statement = statement.trim();
        if !statement.is_empty() {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .expect("schema statement");
        }
    }
    pool
}

/// Seed a small deployment: one user, one category, one appliance in it,
/// one ssh key, one host using that key, and one command bound to the
/// appliance and host.
pub async fn seed_minimal(pool: &SqlitePool) {
    let statements = [
        "INSERT INTO users (username, email, password_hash, role, is_active) \
         VALUES ('admin', 'admin@example.com', 'hash', 'admin', 1)",
        "INSERT INTO categories (name, color) VALUES ('media', '#3366ff')",
        "INSERT INTO appliances (name, url, category, ssh_connection, start_command) \
         VALUES ('jellyfin', 'http://10.0.0.5:8096', 1, 'root@10.0.0.5', 'systemctl start jellyfin')",
        "INSERT INTO ssh_keys (key_name, key_type, key_size, is_default) \
         VALUES ('dashboard', 'rsa', 2048, 1)",
        "INSERT INTO hosts (hostname, host, username, port, key_name) \
         VALUES ('mediabox', '10.0.0.5', 'root', 22, 'dashboard')",
        "INSERT INTO commands (appliance_id, description, command, host_id) \
         VALUES (1, 'restart service', 'systemctl restart jellyfin', 1)",
        "INSERT INTO attachments (filename, original_name, mime_type, file_size, is_active) \
         VALUES ('bg.png', 'background.png', 'image/png', 4, 1)",
    ];
    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .expect("seed statement");
    }
}

/// Count rows of a table.
pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("count query")
}

/// Audit sink that records every entry for assertions.
#[derive(Debug, Default)]
pub struct RecordingAudit {
    pub entries: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record(&self, action: &str, metadata: Value) {
        self.entries
            .lock()
            .expect("audit lock")
            .push((action.to_string(), metadata));
    }
}

/// Event broadcast that records every published event.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl EventBroadcast for RecordingEvents {
    async fn publish(&self, topic: &str, payload: Value) {
        self.events
            .lock()
            .expect("events lock")
            .push((topic.to_string(), payload));
    }
}
