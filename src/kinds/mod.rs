//! Built-in fixture kinds, in application order.

pub mod callbacks;
pub mod date_time;
pub mod key_value;
pub mod no_hook_sql;
pub mod storage_setup;
pub mod tables;

#[cfg(test)]
pub(crate) mod test_env {
    use crate::core::config::Config;
    use crate::fixture::context::FixtureContext;
    use crate::fixture::tree::{NodeInfo, NodeKind};
    use crate::kinds::date_time::TestClock;
    use crate::logger::journal::JournalHandle;
    use crate::storage::{CallbackRegistry, DataStorages};

    /// Owned collaborators for building a [`FixtureContext`] in unit tests.
    #[derive(Default)]
    pub struct Env {
        pub config: Config,
        pub storages: DataStorages,
        pub callbacks: CallbackRegistry,
        pub clock: TestClock,
        pub journal: JournalHandle,
    }

    impl Env {
        pub fn ctx(&mut self) -> FixtureContext<'_> {
            FixtureContext {
                config: &self.config,
                storages: &mut self.storages,
                callbacks: &self.callbacks,
                clock: &self.clock,
                journal: &self.journal,
            }
        }
    }

    pub fn leaf(path: &str) -> NodeInfo {
        NodeInfo::new(1, NodeKind::Case, path)
    }

    #[cfg(feature = "sqlite")]
    pub fn sqlite_store(name: &str, schema: &str) -> crate::storage::SqlStore {
        use crate::core::config::SqlConfig;
        use crate::storage::sql::SqlBackend;
        use crate::storage::{SqlStore, SqliteBackend};

        let mut backend = SqliteBackend::open_in_memory(&SqlConfig::default()).unwrap();
        backend.execute(schema).unwrap();
        SqlStore::open(name, backend).unwrap()
    }
}
