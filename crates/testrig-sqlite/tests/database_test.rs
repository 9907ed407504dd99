//! End-to-end tests for the SQLite database component.
//!
//! These tests provision real database files in a temporary directory and
//! verify:
//! 1. Both reset strategies return the database to its seeded state
//! 2. Transaction overriding keeps the savepoint stack balanced
//! 3. A lost ambient transaction is rebuilt on reset
//! 4. Pipeline publication, global data and lifecycle hooks
//! 5. Disposal removes every generated file
//! 6. The component inside registries and pools

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rusqlite::types::Value;
use testrig_common::config::SqliteConfig;
use testrig_common::types::ResetStrategy;
use testrig_core::pool::{EnvironmentPool, ParallelEnvironmentPool, SingletonEnvironmentPool};
use testrig_core::{Component, ComponentRegistry, PipelineData};
use testrig_sqlite::{
    DatabaseComponent, DatabaseError, DatabaseSchema, DbSession, GlobalData, SessionFactory,
    SqliteDatabaseComponent, TransactionOverride, keys,
};

const SEEDED_ORDERS: i64 = 2;

#[derive(Default)]
struct Orders {
    resets: Arc<AtomicUsize>,
}

#[async_trait]
impl DatabaseSchema for Orders {
    const NAME: &'static str = "Orders";
    const MIGRATIONS: &'static [&'static str] = &[
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, item TEXT NOT NULL);",
        "ALTER TABLE orders ADD COLUMN quantity INTEGER NOT NULL DEFAULT 1;",
    ];

    async fn seed(
        &self,
        session: &DbSession,
        globals: &mut GlobalData,
    ) -> testrig_common::error::Result<()> {
        session
            .execute_batch(
                "INSERT INTO orders (item, quantity) VALUES ('keyboard', 1);
                 INSERT INTO orders (item, quantity) VALUES ('monitor', 2);",
            )
            .await?;
        let first: i64 = session
            .query_scalar("SELECT MIN(id) FROM orders", Vec::new())
            .await?;
        globals.insert("first_order_id", first);
        Ok(())
    }

    async fn on_reset(&self, _session: &DbSession) -> testrig_common::error::Result<()> {
        let _ = self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn config(dir: &Path, strategy: ResetStrategy) -> SqliteConfig {
    SqliteConfig {
        directory: Some(dir.to_path_buf()),
        reset_strategy: strategy,
        ..SqliteConfig::default()
    }
}

async fn provisioned(
    dir: &Path,
    strategy: ResetStrategy,
) -> (SqliteDatabaseComponent<Orders>, PipelineData) {
    let component = SqliteDatabaseComponent::new(Orders::default(), config(dir, strategy));
    let mut data = PipelineData::new();
    component.initialize(&mut data).await.expect("initialize");
    (component, data)
}

async fn order_count(session: &DbSession) -> i64 {
    session
        .query_scalar("SELECT COUNT(*) FROM orders", Vec::new())
        .await
        .expect("count")
}

async fn insert_order(session: &DbSession, item: &str) {
    let _ = session
        .execute(
            "INSERT INTO orders (item) VALUES (?1)",
            vec![Value::Text(item.to_string())],
        )
        .await
        .expect("insert");
}

fn database_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect()
}

// ── Snapshot rollback ────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_reset_restores_seed_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (component, _data) = provisioned(dir.path(), ResetStrategy::SnapshotRollback).await;

    let session = component.session().await.expect("session");
    insert_order(&session, "mouse").await;
    assert_eq!(order_count(&session).await, SEEDED_ORDERS + 1);

    component.reset().await.expect("reset");

    let session = component.session().await.expect("session after reset");
    assert_eq!(order_count(&session).await, SEEDED_ORDERS);
    component.dispose().await.expect("dispose");
}

#[tokio::test]
async fn snapshot_reset_terminates_open_sessions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (component, _data) = provisioned(dir.path(), ResetStrategy::SnapshotRollback).await;

    let stale = component.session().await.expect("session");
    component.reset().await.expect("reset");

    let err = stale.execute_batch("SELECT 1").await.unwrap_err();
    assert!(err.is_connection_closed(), "got: {err:?}");
    component.dispose().await.expect("dispose");
}

#[tokio::test]
async fn snapshot_dispose_removes_database_and_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (component, _data) = provisioned(dir.path(), ResetStrategy::SnapshotRollback).await;

    let name = component.database_name().await.expect("name");
    let files = database_files(dir.path());
    assert!(files.contains(&format!("{name}.db")), "files: {files:?}");
    assert!(files.contains(&format!("{name}_init.db")), "files: {files:?}");

    component.dispose().await.expect("dispose");
    assert!(database_files(dir.path()).is_empty());
}

#[tokio::test]
async fn real_transactions_are_allowed_under_snapshot_rollback() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (component, _data) = provisioned(dir.path(), ResetStrategy::SnapshotRollback).await;

    let session = component.session().await.expect("session");
    let tx = session.begin_transaction().await.expect("begin");
    assert!(!tx.is_overridden());
    insert_order(&session, "cable").await;
    tx.commit().await.expect("commit");
    assert_eq!(order_count(&session).await, SEEDED_ORDERS + 1);

    component.reset().await.expect("reset");
    let session = component.session().await.expect("session");
    assert_eq!(order_count(&session).await, SEEDED_ORDERS);
    component.dispose().await.expect("dispose");
}

// ── Transaction savepoint ────────────────────────────────────────────

#[tokio::test]
async fn savepoint_reset_restores_seed_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (component, _data) = provisioned(dir.path(), ResetStrategy::TransactionSavepoint).await;

    let session = component.session().await.expect("session");
    insert_order(&session, "mouse").await;
    insert_order(&session, "desk").await;
    assert_eq!(order_count(&session).await, SEEDED_ORDERS + 2);

    component.reset().await.expect("reset");
    assert_eq!(order_count(&session).await, SEEDED_ORDERS);
    component.dispose().await.expect("dispose");
}

#[tokio::test]
async fn plain_session_cannot_begin_inside_ambient_transaction() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (component, _data) = provisioned(dir.path(), ResetStrategy::TransactionSavepoint).await;

    let session = component.session().await.expect("session");
    let err = session.begin_transaction().await.unwrap_err();
    assert!(matches!(err, DatabaseError::AlreadyInTransaction), "got: {err:?}");
    component.dispose().await.expect("dispose");
}

#[tokio::test]
async fn overriding_session_keeps_savepoint_stack_balanced() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (component, _data) = provisioned(dir.path(), ResetStrategy::TransactionSavepoint).await;
    let stack = component.transaction_override().await.expect("override");
    let session = component.overriding_session().await.expect("session");
    assert!(session.is_overriding());

    let committed = session.begin_transaction().await.expect("begin");
    assert!(committed.is_overridden());
    insert_order(&session, "lamp").await;
    assert_eq!(stack.depth().await, 2);
    committed.commit().await.expect("commit");
    assert_eq!(stack.depth().await, 1);

    let rolled_back = session.begin_transaction().await.expect("begin");
    insert_order(&session, "chair").await;
    rolled_back.rollback().await.expect("rollback");
    assert_eq!(stack.depth().await, 1);
    assert_eq!(order_count(&session).await, SEEDED_ORDERS + 1);

    component.reset().await.expect("reset");
    assert_eq!(order_count(&session).await, SEEDED_ORDERS);
    assert_eq!(stack.depth().await, 1);
    component.dispose().await.expect("dispose");
}

#[tokio::test]
async fn reset_drops_savepoints_left_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (component, _data) = provisioned(dir.path(), ResetStrategy::TransactionSavepoint).await;
    let stack = component.transaction_override().await.expect("override");
    let session = component.overriding_session().await.expect("session");

    let tx = session.begin_transaction().await.expect("begin");
    insert_order(&session, "stapler").await;
    drop(tx);
    assert_eq!(stack.depth().await, 2);

    component.reset().await.expect("reset");
    assert_eq!(stack.depth().await, 1);
    assert_eq!(order_count(&session).await, SEEDED_ORDERS);
    component.dispose().await.expect("dispose");
}

#[tokio::test]
async fn lost_ambient_transaction_is_rebuilt_on_reset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (component, _data) = provisioned(dir.path(), ResetStrategy::TransactionSavepoint).await;

    let session = component.session().await.expect("session");
    insert_order(&session, "mug").await;
    session.execute_batch("ROLLBACK").await.expect("raw rollback");

    component.reset().await.expect("reset rebuilds");
    assert_eq!(order_count(&session).await, SEEDED_ORDERS);

    insert_order(&session, "pen").await;
    component.reset().await.expect("second reset");
    assert_eq!(order_count(&session).await, SEEDED_ORDERS);
    component.dispose().await.expect("dispose");
}

#[tokio::test]
async fn savepoint_dispose_removes_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (component, _data) = provisioned(dir.path(), ResetStrategy::TransactionSavepoint).await;
    assert!(!database_files(dir.path()).is_empty());

    component.dispose().await.expect("dispose");
    assert!(database_files(dir.path()).is_empty());
    component.dispose().await.expect("second dispose is a no-op");
}

// ── Pipeline data, globals and hooks ─────────────────────────────────

#[tokio::test]
async fn artifacts_are_published_under_schema_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (component, data) = provisioned(dir.path(), ResetStrategy::TransactionSavepoint).await;

    let name = data
        .get_cloned::<String>(&keys::database_name("Orders"))
        .expect("database name");
    assert_eq!(Some(name.clone()), component.database_name().await);
    assert!(name.starts_with("testrig_orders_"), "got: {name}");

    let connection = data
        .get_cloned::<String>(&keys::connection_string("Orders"))
        .expect("connection string");
    assert!(connection.ends_with(&format!("{name}.db")), "got: {connection}");

    let factory = data
        .get_cloned::<Arc<SessionFactory>>(&keys::session_factory("Orders"))
        .expect("session factory");
    let session = factory.create().await.expect("session");
    assert_eq!(order_count(&session).await, SEEDED_ORDERS);

    assert!(
        data.get::<Arc<TransactionOverride>>(&keys::transaction_override("Orders"))
            .is_ok()
    );
    component.dispose().await.expect("dispose");
}

#[tokio::test]
async fn snapshot_strategy_publishes_no_transaction_override() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (component, data) = provisioned(dir.path(), ResetStrategy::SnapshotRollback).await;
    assert!(!data.contains_key(&keys::transaction_override("Orders")));
    assert!(component.transaction_override().await.is_none());
    component.dispose().await.expect("dispose");
}

#[tokio::test]
async fn sessions_carry_seed_globals() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (component, _data) = provisioned(dir.path(), ResetStrategy::SnapshotRollback).await;

    let session = component.session().await.expect("session");
    let globals = session.globals().expect("globals attached");
    assert_eq!(globals.get::<i64>("first_order_id"), Some(&1));
    component.dispose().await.expect("dispose");
}

#[tokio::test]
async fn reset_hook_runs_after_every_reset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let schema = Orders::default();
    let resets = Arc::clone(&schema.resets);
    let component = SqliteDatabaseComponent::new(
        schema,
        config(dir.path(), ResetStrategy::TransactionSavepoint),
    );
    let mut data = PipelineData::new();
    component.initialize(&mut data).await.expect("initialize");

    component.reset().await.expect("first reset");
    component.reset().await.expect("second reset");
    assert_eq!(resets.load(Ordering::SeqCst), 2);
    component.dispose().await.expect("dispose");
}

struct SwitchesStrategy;

#[async_trait]
impl DatabaseSchema for SwitchesStrategy {
    const NAME: &'static str = "Switches";
    const MIGRATIONS: &'static [&'static str] = &["CREATE TABLE t (v INTEGER);"];

    fn on_initializing(
        &self,
        _data: &PipelineData,
        config: &mut SqliteConfig,
    ) -> testrig_common::error::Result<()> {
        config.reset_strategy = ResetStrategy::TransactionSavepoint;
        Ok(())
    }
}

#[tokio::test]
async fn initializing_hook_can_change_configuration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let component =
        SqliteDatabaseComponent::new(SwitchesStrategy, config(dir.path(), ResetStrategy::SnapshotRollback));
    let mut data = PipelineData::new();
    component.initialize(&mut data).await.expect("initialize");
    assert_eq!(
        component.reset_strategy().await,
        Some(ResetStrategy::TransactionSavepoint)
    );
    component.dispose().await.expect("dispose");
}

struct BrokenMigration;

#[async_trait]
impl DatabaseSchema for BrokenMigration {
    const NAME: &'static str = "Broken";
    const MIGRATIONS: &'static [&'static str] = &["CREATE TABLE"];
}

#[tokio::test]
async fn failed_initialization_leaves_no_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let component =
        SqliteDatabaseComponent::new(BrokenMigration, config(dir.path(), ResetStrategy::SnapshotRollback));
    let mut data = PipelineData::new();
    assert!(component.initialize(&mut data).await.is_err());
    assert!(database_files(dir.path()).is_empty());
    assert!(component.database_name().await.is_none());
}

#[tokio::test]
async fn unpublishable_database_is_dropped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let component = SqliteDatabaseComponent::new(
        Orders::default(),
        config(dir.path(), ResetStrategy::SnapshotRollback),
    );
    let mut data = PipelineData::new();
    data.insert(keys::database_name("Orders"), "taken".to_string())
        .expect("occupy key");

    assert!(component.initialize(&mut data).await.is_err());
    assert!(database_files(dir.path()).is_empty());
    assert!(component.database_name().await.is_none());
    component.dispose().await.expect("dispose");
}

#[tokio::test]
async fn lifecycle_misuse_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let component = SqliteDatabaseComponent::new(
        Orders::default(),
        config(dir.path(), ResetStrategy::SnapshotRollback),
    );
    assert!(matches!(
        component.session_factory().await,
        Err(DatabaseError::NotInitialized { schema: "Orders" })
    ));
    assert!(component.reset().await.is_err());

    component.dispose().await.expect("dispose before initialize");
    let mut data = PipelineData::new();
    assert!(component.initialize(&mut data).await.is_err());
    assert!(matches!(
        component.session_factory().await,
        Err(DatabaseError::Disposed { .. })
    ));
}

// ── Registries and pools ─────────────────────────────────────────────

#[tokio::test]
async fn singleton_database_republishes_for_every_environment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut registry = ComponentRegistry::new();
    let _ = registry
        .add_singleton(SqliteDatabaseComponent::new(
            Orders::default(),
            config(dir.path(), ResetStrategy::SnapshotRollback),
        ))
        .expect("register")
        .provides::<dyn DatabaseComponent>(|c| c);

    let first = registry.create_environment();
    let second = registry.create_environment();
    first.initialize().await.expect("first");
    second.initialize().await.expect("second");

    let key = keys::database_name("Orders");
    let a = first.pipeline_data().expect("data").get_cloned::<String>(&key).expect("name");
    let b = second.pipeline_data().expect("data").get_cloned::<String>(&key).expect("name");
    assert_eq!(a, b);

    let database = second
        .component_by_interface::<dyn DatabaseComponent>()
        .expect("by interface");
    assert_eq!(database.schema_name(), "Orders");

    first.dispose().await.expect("dispose first");
    second.dispose().await.expect("dispose second");
    for singleton in registry.singletons() {
        singleton.dispose().await.expect("dispose singleton");
    }
    assert!(database_files(dir.path()).is_empty());
}

#[tokio::test]
async fn parallel_pool_hands_out_clean_databases() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = config(dir.path(), ResetStrategy::TransactionSavepoint);
    let mut registry = ComponentRegistry::new();
    let _ = registry
        .add_transient(move || SqliteDatabaseComponent::new(Orders::default(), settings.clone()))
        .expect("register");

    let pool = ParallelEnvironmentPool::new(&registry, 2);
    pool.initialize().await.expect("initialize pool");

    for round in 0..4 {
        let environment = pool.rent().await.expect("rent");
        let database = environment
            .component::<SqliteDatabaseComponent<Orders>>()
            .expect("database");
        let session = database.session().await.expect("session");
        assert_eq!(order_count(&session).await, SEEDED_ORDERS, "round {round}");
        insert_order(&session, "dirty").await;
        pool.release(environment).await.expect("release");
    }

    pool.dispose().await.expect("dispose pool");
    assert!(database_files(dir.path()).is_empty());
}

#[tokio::test]
async fn singleton_pool_resets_between_rents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = config(dir.path(), ResetStrategy::SnapshotRollback);
    let mut registry = ComponentRegistry::new();
    let _ = registry
        .add_transient(move || SqliteDatabaseComponent::new(Orders::default(), settings.clone()))
        .expect("register");

    let pool = SingletonEnvironmentPool::new(&registry);
    pool.initialize().await.expect("initialize pool");

    for _ in 0..3 {
        let environment = pool.rent().await.expect("rent");
        let database = environment
            .component::<SqliteDatabaseComponent<Orders>>()
            .expect("database");
        let session = database.session().await.expect("session");
        assert_eq!(order_count(&session).await, SEEDED_ORDERS);
        insert_order(&session, "dirty").await;
        session.close().await.expect("close");
        pool.release(environment).await.expect("release");
    }

    pool.dispose().await.expect("dispose pool");
}
