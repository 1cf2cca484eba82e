//! Builders and harnesses shared by the other crates' test suites.
//!
//! Three things live here: [`JobBuilder`]/[`ConfigBuilder`] for constructing
//! fixtures without repeating struct literals, [`FakeExecutor`] for driving
//! the worker pool deterministically without spawning real subprocesses,
//! and [`TestDb`] for giving a Postgres-backed integration test its own
//! throwaway schema. Pure unit tests that only need [`jobq_core::QueueManager`]
//! logic should keep using [`MemoryStorage`] directly instead of paying for
//! a real connection.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
pub use jobq_core::testing::MemoryStorage;
use jobq_core::NewJob;
use jobq_executor::{CommandRunner, ExecutionOutcome};
use sqlx::PgPool;

/// A shell command that exits 0 immediately.
pub const ALWAYS_SUCCEEDS: &str = "exit 0";

/// A shell command that exits 1 immediately, writing `message` to stderr.
pub fn always_fails(message: &str) -> String {
    format!("echo '{message}' 1>&2; exit 1")
}

/// A shell command that sleeps past any sane test timeout, for exercising
/// executor timeout handling from a caller that doesn't want to depend on
/// `jobq-executor` directly.
pub const NEVER_RETURNS: &str = "sleep 60";

/// Builds a [`NewJob`] with sensible test defaults: a fresh id, an
/// always-succeeding command, and no priority/retry/schedule overrides.
/// Chain the setters to deviate from a default only where the test cares.
#[derive(Debug, Clone)]
pub struct JobBuilder {
    inner: NewJob,
}

impl JobBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        JobBuilder {
            inner: NewJob {
                id: id.into(),
                command: ALWAYS_SUCCEEDS.to_string(),
                priority: None,
                max_retries: None,
                run_at: None,
            },
        }
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.inner.command = command.into();
        self
    }

    pub fn priority(mut self, priority: i16) -> Self {
        self.inner.priority = Some(priority);
        self
    }

    pub fn max_retries(mut self, max_retries: i32) -> Self {
        self.inner.max_retries = Some(max_retries);
        self
    }

    pub fn run_at(mut self, run_at: chrono::DateTime<chrono::Utc>) -> Self {
        self.inner.run_at = Some(run_at);
        self
    }

    pub fn build(self) -> NewJob {
        self.inner
    }
}

/// Builds a [`jobq_config::Config`] with test-friendly overrides, so a test
/// doesn't need to know every field just to change one.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    inner: jobq_config::Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder::default()
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.inner.max_retries = max_retries;
        self
    }

    pub fn backoff_base(mut self, backoff_base: f64) -> Self {
        self.inner.backoff_base = backoff_base;
        self
    }

    pub fn database_url(mut self, database_url: impl Into<String>) -> Self {
        self.inner.database_url = Some(database_url.into());
        self
    }

    pub fn build(self) -> jobq_config::Config {
        self.inner
    }
}

/// A [`CommandRunner`] double that returns pre-scripted outcomes instead of
/// spawning a shell. Outcomes are queued per exact command string and
/// consumed in FIFO order; a command with nothing left queued succeeds
/// immediately, so tests only need to script the attempts they care about.
#[derive(Default)]
pub struct FakeExecutor {
    scripts: Mutex<HashMap<String, VecDeque<ExecutionOutcome>>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        FakeExecutor::default()
    }

    /// Queue `outcome` to be returned the next time `command` runs.
    pub fn script(&self, command: impl Into<String>, outcome: ExecutionOutcome) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(command.into())
            .or_default()
            .push_back(outcome);
        self
    }

    pub fn script_success(&self, command: impl Into<String>) -> &Self {
        self.script(
            command,
            ExecutionOutcome {
                success: true,
                error: String::new(),
                duration_ms: 1,
            },
        )
    }

    pub fn script_failure(&self, command: impl Into<String>, error: impl Into<String>) -> &Self {
        self.script(
            command,
            ExecutionOutcome {
                success: false,
                error: error.into(),
                duration_ms: 1,
            },
        )
    }
}

#[async_trait]
impl CommandRunner for FakeExecutor {
    async fn execute(&self, command: &str, _timeout: Duration) -> ExecutionOutcome {
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .get_mut(command)
            .and_then(|queued| queued.pop_front())
            .unwrap_or(ExecutionOutcome {
                success: true,
                error: String::new(),
                duration_ms: 1,
            })
    }
}

static SCHEMA_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A throwaway Postgres schema for one integration test, migrated and
/// ready to hand a [`jobq_storage::PgStorage`] over.
///
/// Rust has no async `Drop`, so cleanup is an explicit call
/// ([`TestDb::teardown`]) rather than scope-based — leaving a handful of
/// empty `jobq_test_*` schemas behind on a panicking test run is an
/// accepted cost, the same tradeoff `witt3rd-workq`'s `db_test.rs` helper
/// makes by requiring a live database and leaving migration state in place
/// between runs.
pub struct TestDb {
    pool: PgPool,
    schema: String,
}

impl TestDb {
    /// Connect to `JOBQ_TEST_DATABASE_URL`, create a uniquely-named schema,
    /// and run migrations into it. Panics if the env var is unset or the
    /// database is unreachable — callers are expected to `#[ignore]` the
    /// tests that use this.
    pub async fn connect() -> Self {
        let base_url = std::env::var("JOBQ_TEST_DATABASE_URL")
            .expect("JOBQ_TEST_DATABASE_URL must be set to run Postgres-backed tests");

        let admin_pool = PgPool::connect(&base_url)
            .await
            .expect("connect to test database");

        let schema = format!(
            "jobq_test_{}_{}",
            std::process::id(),
            SCHEMA_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        sqlx::query(&format!(r#"CREATE SCHEMA "{schema}""#))
            .execute(&admin_pool)
            .await
            .expect("create test schema");

        let scoped_url = format!(
            "{base_url}{sep}options=-c%20search_path%3D{schema}",
            sep = if base_url.contains('?') { "&" } else { "?" },
        );
        let pool = PgPool::connect(&scoped_url)
            .await
            .expect("connect scoped to test schema");

        sqlx::migrate!("../jobq-storage/migrations")
            .run(&pool)
            .await
            .expect("run migrations in test schema");

        TestDb { pool, schema }
    }

    pub fn storage(&self) -> jobq_storage::PgStorage {
        jobq_storage::PgStorage::from_pool(self.pool.clone())
    }

    /// Drop the schema this test created. Best-effort: a failure here
    /// doesn't fail the test, it just leaves the schema behind for manual
    /// cleanup.
    pub async fn teardown(self) {
        if let Err(e) = sqlx::query(&format!(r#"DROP SCHEMA "{}" CASCADE"#, self.schema))
            .execute(&self.pool)
            .await
        {
            eprintln!("warning: failed to drop test schema {}: {e}", self.schema);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_to_an_always_succeeding_job() {
        let job = JobBuilder::new("t1").build();
        assert_eq!(job.id, "t1");
        assert_eq!(job.command, ALWAYS_SUCCEEDS);
        assert!(job.priority.is_none());
    }

    #[test]
    fn builder_applies_overrides() {
        let job = JobBuilder::new("t2")
            .command(always_fails("boom"))
            .priority(9)
            .max_retries(2)
            .build();
        assert_eq!(job.priority, Some(9));
        assert_eq!(job.max_retries, Some(2));
        assert!(job.command.contains("boom"));
    }

    #[test]
    fn config_builder_applies_overrides() {
        let config = ConfigBuilder::new().max_retries(9).database_url("postgres://x").build();
        assert_eq!(config.max_retries, 9);
        assert_eq!(config.database_url.as_deref(), Some("postgres://x"));
    }

    #[tokio::test]
    async fn fake_executor_returns_scripted_outcomes_in_order() {
        let executor = FakeExecutor::new();
        executor.script_failure("flaky", "boom once");
        executor.script_success("flaky");

        let first = executor.execute("flaky", Duration::from_secs(1)).await;
        assert!(!first.success);
        let second = executor.execute("flaky", Duration::from_secs(1)).await;
        assert!(second.success);
    }

    #[tokio::test]
    async fn fake_executor_defaults_to_success_when_nothing_scripted() {
        let executor = FakeExecutor::new();
        let outcome = executor.execute("anything", Duration::from_secs(1)).await;
        assert!(outcome.success);
    }
}
