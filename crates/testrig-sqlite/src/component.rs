//! The SQLite database component.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use testrig_common::config::SqliteConfig;
use testrig_common::types::ResetStrategy;
use testrig_core::{Component, PipelineData};
use tokio::sync::Mutex;

use crate::error::{DatabaseError, Result};
use crate::global::GlobalData;
use crate::keys;
use crate::naming;
use crate::overrides::TransactionOverride;
use crate::savepoint::TransactionSavepoint;
use crate::schema::DatabaseSchema;
use crate::session::{DbSession, SessionFactory};
use crate::snapshot::SnapshotRollback;
use crate::strategy::{DatabaseResetStrategy, remove_all};

/// Capability shared by every relational database component, for lookups
/// by interface.
#[async_trait]
pub trait DatabaseComponent: Send + Sync {
    /// Returns the schema name.
    fn schema_name(&self) -> &'static str;

    /// Returns the generated database name once provisioned.
    async fn database_name(&self) -> Option<String>;

    /// Returns the reset strategy in use once provisioned.
    async fn reset_strategy(&self) -> Option<ResetStrategy>;

    /// Returns the session factory.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotInitialized`] before initialization and
    /// [`DatabaseError::Disposed`] after disposal.
    async fn session_factory(&self) -> Result<Arc<SessionFactory>>;

    /// Returns the savepoint stack of the ambient transaction, if the
    /// transaction savepoint strategy is in use.
    async fn transaction_override(&self) -> Option<Arc<TransactionOverride>>;

    /// Opens a session.
    ///
    /// # Errors
    ///
    /// Same as [`DatabaseComponent::session_factory`], plus connection
    /// failures.
    async fn session(&self) -> Result<DbSession> {
        self.session_factory().await?.create().await
    }

    /// Opens a session whose transactions are redirected onto savepoints.
    ///
    /// # Errors
    ///
    /// Same as [`DatabaseComponent::session`].
    async fn overriding_session(&self) -> Result<DbSession> {
        self.session_factory().await?.create_overriding().await
    }
}

struct Provisioned {
    name: String,
    strategy: Box<dyn DatabaseResetStrategy>,
    globals: Arc<GlobalData>,
}

enum State {
    Uninitialized,
    Ready(Provisioned),
    Disposed { name: Option<String> },
}

/// Relational database component backed by a temporary SQLite file.
///
/// The reset strategy comes from [`SqliteConfig::reset_strategy`]. When
/// registered as a singleton, initializing it again only republishes its
/// pipeline data.
pub struct SqliteDatabaseComponent<S: DatabaseSchema> {
    schema: S,
    config: SqliteConfig,
    state: Mutex<State>,
}

impl<S: DatabaseSchema> SqliteDatabaseComponent<S> {
    /// Creates an unprovisioned component.
    #[must_use]
    pub fn new(schema: S, config: SqliteConfig) -> Self {
        Self {
            schema,
            config,
            state: Mutex::new(State::Uninitialized),
        }
    }

    /// Returns the schema definition.
    pub const fn schema(&self) -> &S {
        &self.schema
    }

    /// Returns the configuration the component was created with.
    pub const fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Returns the seed-time global data once provisioned.
    pub async fn global_data(&self) -> Option<Arc<GlobalData>> {
        match &*self.state.lock().await {
            State::Ready(provisioned) => Some(Arc::clone(&provisioned.globals)),
            _ => None,
        }
    }

    async fn provision(
        &self,
        name: &str,
        directory: &Path,
        config: &SqliteConfig,
    ) -> testrig_common::error::Result<(Box<dyn DatabaseResetStrategy>, GlobalData)> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        Ok(match config.reset_strategy {
            ResetStrategy::SnapshotRollback => {
                let (strategy, globals) =
                    SnapshotRollback::initialize(&self.schema, name, directory, busy_timeout).await?;
                (Box::new(strategy) as Box<dyn DatabaseResetStrategy>, globals)
            }
            ResetStrategy::TransactionSavepoint => {
                let (strategy, globals) =
                    TransactionSavepoint::initialize(&self.schema, name, directory, busy_timeout)
                        .await?;
                (Box::new(strategy), globals)
            }
        })
    }

    fn disposed_error(name: Option<&String>) -> DatabaseError {
        DatabaseError::Disposed {
            name: name.map_or_else(|| S::NAME.to_string(), Clone::clone),
        }
    }
}

/// Publishes the database's artifacts under schema-keyed names.
fn publish(
    schema: &str,
    provisioned: &Provisioned,
    data: &mut PipelineData,
) -> testrig_common::error::Result<()> {
    let factory = provisioned.strategy.session_factory();
    data.insert(keys::database_name(schema), provisioned.name.clone())?;
    data.insert(
        keys::connection_string(schema),
        factory.connection_string().to_string(),
    )?;
    data.insert(keys::session_factory(schema), factory)?;
    if let Some(transaction_override) = provisioned.strategy.transaction_override() {
        data.insert(keys::transaction_override(schema), transaction_override)?;
    }
    Ok(())
}

/// Removes whatever a failed provisioning left behind.
async fn discard_files(directory: &Path, name: &str) {
    let database_file = naming::database_file(directory, name);
    let snapshot_file = naming::database_file(directory, &naming::snapshot_name(name));
    let sidecars = naming::sidecar_files(&database_file);
    let mut files = vec![database_file.as_path(), snapshot_file.as_path()];
    files.extend(sidecars.iter().map(std::path::PathBuf::as_path));
    if let Err(e) = remove_all(&files).await {
        tracing::warn!(database = %name, error = %e, "failed to discard partially provisioned database");
    }
}

#[async_trait]
impl<S: DatabaseSchema> Component for SqliteDatabaseComponent<S> {
    async fn initialize(&self, data: &mut PipelineData) -> testrig_common::error::Result<()> {
        let mut state = self.state.lock().await;
        match &*state {
            State::Ready(provisioned) => {
                tracing::debug!(
                    schema = S::NAME,
                    database = %provisioned.name,
                    "database already provisioned, republishing"
                );
                return publish(S::NAME, provisioned, data);
            }
            State::Disposed { name } => return Err(Self::disposed_error(name.as_ref()).into()),
            State::Uninitialized => {}
        }

        let started = Instant::now();
        let mut config = self.config.clone();
        self.schema.on_initializing(data, &mut config)?;
        let name = naming::database_name(S::NAME);
        let directory = config.resolved_directory();

        let (strategy, globals) = match self.provision(&name, &directory, &config).await {
            Ok(provisioned) => provisioned,
            Err(e) => {
                tracing::error!(schema = S::NAME, database = %name, error = %e, "database initialization failed");
                discard_files(&directory, &name).await;
                return Err(e);
            }
        };

        let globals = Arc::new(globals);
        if self.schema.auto_attach_global_data() {
            let attached = Arc::clone(&globals);
            strategy
                .session_factory()
                .on_created(move |session| session.attach_globals(Arc::clone(&attached)));
        }

        let provisioned = Provisioned {
            name,
            strategy,
            globals,
        };
        if let Err(e) = publish(S::NAME, &provisioned, data) {
            tracing::error!(schema = S::NAME, database = %provisioned.name, error = %e, "database could not be published");
            if let Err(dispose) = provisioned.strategy.dispose().await {
                tracing::warn!(database = %provisioned.name, error = %dispose, "failed to drop unpublished database");
            }
            discard_files(&directory, &provisioned.name).await;
            return Err(e);
        }
        tracing::info!(
            schema = S::NAME,
            database = %provisioned.name,
            strategy = %provisioned.strategy.kind(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "database initialized"
        );
        *state = State::Ready(provisioned);
        Ok(())
    }

    async fn reset(&self) -> testrig_common::error::Result<()> {
        let state = self.state.lock().await;
        let provisioned = match &*state {
            State::Ready(provisioned) => provisioned,
            State::Uninitialized => {
                return Err(DatabaseError::NotInitialized { schema: S::NAME }.into());
            }
            State::Disposed { name } => return Err(Self::disposed_error(name.as_ref()).into()),
        };

        provisioned.strategy.reset().await?;
        let session = provisioned.strategy.session_factory().create().await?;
        let hook = self.schema.on_reset(&session).await;
        session.close().await?;
        hook
    }

    async fn dispose(&self) -> testrig_common::error::Result<()> {
        let mut state = self.state.lock().await;
        let name = match &*state {
            State::Ready(provisioned) => Some(provisioned.name.clone()),
            State::Uninitialized => None,
            State::Disposed { .. } => return Ok(()),
        };
        let previous = std::mem::replace(&mut *state, State::Disposed { name });
        if let State::Ready(provisioned) = previous {
            provisioned.strategy.dispose().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: DatabaseSchema> DatabaseComponent for SqliteDatabaseComponent<S> {
    fn schema_name(&self) -> &'static str {
        S::NAME
    }

    async fn database_name(&self) -> Option<String> {
        match &*self.state.lock().await {
            State::Ready(provisioned) => Some(provisioned.name.clone()),
            State::Uninitialized | State::Disposed { .. } => None,
        }
    }

    async fn reset_strategy(&self) -> Option<ResetStrategy> {
        match &*self.state.lock().await {
            State::Ready(provisioned) => Some(provisioned.strategy.kind()),
            State::Uninitialized | State::Disposed { .. } => None,
        }
    }

    async fn session_factory(&self) -> Result<Arc<SessionFactory>> {
        match &*self.state.lock().await {
            State::Ready(provisioned) => Ok(provisioned.strategy.session_factory()),
            State::Uninitialized => Err(DatabaseError::NotInitialized { schema: S::NAME }),
            State::Disposed { name } => Err(Self::disposed_error(name.as_ref())),
        }
    }

    async fn transaction_override(&self) -> Option<Arc<TransactionOverride>> {
        match &*self.state.lock().await {
            State::Ready(provisioned) => provisioned.strategy.transaction_override(),
            State::Uninitialized | State::Disposed { .. } => None,
        }
    }
}
