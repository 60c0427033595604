//! The per-connection resilience envelope (spec.md §4.2).
//!
//! A `ConnectionManager` owns one [`Endpoint`]: it opens connections on
//! demand, wraps every command in the configured retry policy and circuit
//! breaker, and guarantees the connection is released on every exit path,
//! including cancellation.

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::batch::Batch;
use crate::config::Endpoint;
use crate::driver::{Driver, FromOutputParams, FromRow};
use crate::error::{Error, Verdict};
use crate::handler::ResultHandler;
use crate::mock::MockResultTable;
use crate::params::ParameterSet;
use crate::query::Query;
use crate::resilience::{Admission, BreakerState, ResiliencePolicy};

/// Race `fut` against `cancel`, per spec.md §5: a cancelled context must
/// unblock a caller promptly even if the driver's own I/O doesn't respect
/// the token it was handed.
async fn race<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, Error> {
    tokio::select! {
        value = fut => Ok(value),
        _ = cancel.cancelled() => Err(Error::Cancelled),
    }
}

/// What one attempt inside the retry loop produced, beyond a plain
/// success.
enum AttemptOutcome<E> {
    /// A driver-native error, not yet classified. Goes through
    /// `Driver::classify_error` and may be retried.
    Native(E),
    /// An already-final engine error (a mapping failure, or one a
    /// `RowStream` already classified). Surfaced immediately, never
    /// retried, never counted against the breaker.
    Mapped(Error),
}

/// Owns one endpoint's connection lifecycle, retry policy, and breaker
/// state.
pub struct ConnectionManager<D: Driver> {
    driver: Arc<D>,
    endpoint: Arc<Endpoint>,
    policy: ResiliencePolicy,
    breaker: BreakerState,
}

impl<D: Driver> ConnectionManager<D> {
    pub fn new(driver: Arc<D>, endpoint: Arc<Endpoint>, policy: ResiliencePolicy) -> Self {
        Self {
            driver,
            endpoint,
            policy,
            breaker: BreakerState::new(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn breaker(&self) -> &BreakerState {
        &self.breaker
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    fn check_declared_params(query: &Query, params: &ParameterSet) -> Result<(), Error> {
        for name in query.declared_params() {
            if !params.contains(name) {
                return Err(Error::ParameterNotFound(name.clone()));
            }
        }
        Ok(())
    }

    /// Execute without result-set materialization; return the driver's
    /// integer status.
    pub async fn execute(
        &self,
        query: &Query,
        params: &ParameterSet,
        mocks: &MockResultTable,
        cancel: &CancellationToken,
    ) -> Result<i64, Error> {
        if let Some(mocked) = mocks.get::<i64>(query.name())? {
            return Ok(mocked);
        }
        Self::check_declared_params(query, params)?;

        let driver = &self.driver;
        self.with_retry(cancel, |conn| async move {
            let mut command = driver.build_command(conn, query.text(), query.kind());
            for (name, param) in params.iter() {
                driver.bind_parameter(&mut command, name, param);
            }
            driver
                .execute_non_query(&mut command, cancel)
                .await
                .map_err(AttemptOutcome::Native)
        })
        .await
    }

    /// Execute and hand the row stream and output parameters to a result
    /// handler. Returns `None` if the handler reports no result worth
    /// keeping.
    pub async fn query<Arg, Model, H>(
        &self,
        query: &Query,
        params: &ParameterSet,
        handler: &H,
        arg: &Arg,
        mocks: &MockResultTable,
        cancel: &CancellationToken,
    ) -> Result<Option<Model>, Error>
    where
        H: ResultHandler<D::RowStream, Arg, Model> + Sync,
        Arg: Send + Sync,
        Model: Clone + Send + 'static,
    {
        if let Some(mocked) = mocks.get::<Option<Model>>(query.name())? {
            return Ok(mocked);
        }
        Self::check_declared_params(query, params)?;

        let driver = &self.driver;
        let shard = self.endpoint.description.as_str();

        self.with_retry(cancel, |conn| async move {
            let mut command = driver.build_command(conn, query.text(), query.kind());
            for (name, param) in params.iter() {
                driver.bind_parameter(&mut command, name, param);
            }
            let (mut rows, outputs) = driver
                .execute_reader(&mut command, cancel)
                .await
                .map_err(AttemptOutcome::Native)?;

            handler
                .handle(shard, &mut rows, &outputs, arg)
                .await
                .map_err(AttemptOutcome::Mapped)
        })
        .await
    }

    /// Execute and bind a single value, preferring output parameters and
    /// falling back to row 0 of the primary result set.
    pub async fn execute_scalar<T>(
        &self,
        query: &Query,
        params: &ParameterSet,
        mocks: &MockResultTable,
        cancel: &CancellationToken,
    ) -> Result<T, Error>
    where
        T: FromOutputParams + FromRow + Clone + Send + 'static,
    {
        if let Some(mocked) = mocks.get::<T>(query.name())? {
            return Ok(mocked);
        }
        Self::check_declared_params(query, params)?;

        let driver = &self.driver;

        self.with_retry(cancel, |conn| async move {
            let mut command = driver.build_command(conn, query.text(), query.kind());
            for (name, param) in params.iter() {
                driver.bind_parameter(&mut command, name, param);
            }
            let (mut rows, outputs) = driver
                .execute_reader(&mut command, cancel)
                .await
                .map_err(AttemptOutcome::Native)?;

            if !outputs.is_empty() {
                return T::from_output_params(&outputs).map_err(AttemptOutcome::Mapped);
            }
            match rows.next_row().await.map_err(AttemptOutcome::Mapped)? {
                Some(row) => T::from_row(&row).map_err(AttemptOutcome::Mapped),
                None => Err(AttemptOutcome::Mapped(Error::NoMappingAttributesFound(
                    std::any::type_name::<T>(),
                ))),
            }
        })
        .await
    }

    /// Execute and bind every row of the primary result set into a list.
    pub async fn list<T>(
        &self,
        query: &Query,
        params: &ParameterSet,
        mocks: &MockResultTable,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, Error>
    where
        T: FromRow + Clone + Send + 'static,
    {
        if let Some(mocked) = mocks.get::<Vec<T>>(query.name())? {
            return Ok(mocked);
        }
        Self::check_declared_params(query, params)?;

        let driver = &self.driver;

        self.with_retry(cancel, |conn| async move {
            let mut command = driver.build_command(conn, query.text(), query.kind());
            for (name, param) in params.iter() {
                driver.bind_parameter(&mut command, name, param);
            }
            let (mut rows, _outputs) = driver
                .execute_reader(&mut command, cancel)
                .await
                .map_err(AttemptOutcome::Native)?;

            let mut items = Vec::new();
            while let Some(row) = rows.next_row().await.map_err(AttemptOutcome::Mapped)? {
                items.push(T::from_row(&row).map_err(AttemptOutcome::Mapped)?);
            }
            Ok(items)
        })
        .await
    }

    /// Execute for side effects only; discards the status code.
    pub async fn run(
        &self,
        query: &Query,
        params: &ParameterSet,
        mocks: &MockResultTable,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.execute(query, params, mocks, cancel).await?;
        Ok(())
    }

    /// Run a transactional batch of steps on one connection opened from
    /// this manager (spec.md §4.5). Connection-open is subject to the
    /// resilience policy; once a step fails, the whole batch rolls back
    /// and surfaces immediately rather than being retried as a unit.
    pub async fn run_batch<R>(
        &self,
        batch: &Batch<D, R>,
        mocks: &MockResultTable,
        cancel: &CancellationToken,
    ) -> Result<R, Error>
    where
        R: Default + Clone + Send + 'static,
    {
        if let Some(mocked) = mocks.get::<R>("")? {
            return Ok(mocked);
        }

        let connection_string = self.endpoint.connection_string();
        let mut conn = self
            .open_connection_with_retry(&connection_string, cancel)
            .await?;

        race(cancel, self.driver.begin_transaction(&mut conn, cancel))
            .await?
            .map_err(|e| Error::ConnectionFailed(Box::new(e)))?;

        let shard = self.endpoint.description.as_str();
        let mut retained: Option<R> = None;

        for (index, step) in batch.steps().iter().enumerate() {
            if cancel.is_cancelled() {
                let _ = self.driver.rollback(&mut conn, cancel).await;
                return Err(Error::Cancelled);
            }

            match Self::run_batch_step(&self.driver, &mut conn, shard, step, cancel).await {
                Ok(value) => {
                    if step.is_result_step() {
                        retained = value;
                    }
                }
                Err(err) => {
                    let _ = self.driver.rollback(&mut conn, cancel).await;
                    warn!(step = index, error = %err, "batch step failed, rolled back");
                    return Err(Error::BatchStep {
                        step: index,
                        source: Box::new(err),
                    });
                }
            }
        }

        race(cancel, self.driver.commit(&mut conn, cancel))
            .await?
            .map_err(|e| Error::ConnectionFailed(Box::new(e)))?;

        Ok(retained.unwrap_or_default())
    }

    async fn run_batch_step<R>(
        driver: &Arc<D>,
        conn: &mut D::Connection,
        shard: &str,
        step: &crate::batch::BatchStep<D, R>,
        cancel: &CancellationToken,
    ) -> Result<Option<R>, Error>
    where
        R: Send,
    {
        Self::check_declared_params(step.query(), step.params())?;

        let mut command = driver.build_command(conn, step.query().text(), step.query().kind());
        for (name, param) in step.params().iter() {
            driver.bind_parameter(&mut command, name, param);
        }

        let (mut rows, outputs) = race(cancel, driver.execute_reader(&mut command, cancel))
            .await?
            .map_err(|e| Error::FatalForCommand(Box::new(e)))?;

        match step.projector() {
            Some(projector) => projector.handle(shard, &mut rows, &outputs, &()).await,
            None => {
                while rows.next_row().await?.is_some() {}
                Ok(None)
            }
        }
    }

    /// Open a connection under the manager's retry policy and breaker,
    /// without running any command. Used by `run_batch`, which manages
    /// its own single connection across all steps.
    async fn open_connection_with_retry(
        &self,
        connection_string: &str,
        cancel: &CancellationToken,
    ) -> Result<D::Connection, Error> {
        let now = Instant::now();
        let admission = self.breaker.admit(&self.policy, now);
        if admission == Admission::Rejected {
            return Err(Error::CircuitOpen(self.endpoint.description.clone()));
        }
        let is_probe = admission == Admission::Probe;
        let attempts = if is_probe { 1 } else { self.policy.attempts() };

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match race(cancel, self.driver.open_connection(connection_string, cancel)).await? {
                Ok(conn) => {
                    self.breaker.record_success();
                    return Ok(conn);
                }
                Err(native) => {
                    let verdict = self.driver.classify_error(&native);
                    if verdict == Verdict::Retryable && attempt < attempts {
                        debug!(attempt, "batch connection open failed, retrying");
                        self.sleep_or_cancel(attempt, cancel).await?;
                        continue;
                    }
                    self.note_failure(verdict, is_probe, Instant::now());
                    return Err(self.finish_error(verdict, Box::new(native)));
                }
            }
        }
        unreachable!("attempt loop always returns before exhausting its range")
    }

    /// Sleep for the computed back-off, or return `Cancelled` if the
    /// caller's context cancels first.
    async fn sleep_or_cancel(&self, attempt: u32, cancel: &CancellationToken) -> Result<(), Error> {
        let delay = self.policy.delay(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Shared retry + breaker envelope for single-command operations.
    /// `op` is called once per attempt with a live connection; it returns
    /// either a value or an [`AttemptOutcome`] the manager classifies
    /// through the driver.
    async fn with_retry<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, Error>
    where
        F: FnMut(&mut D::Connection) -> Fut,
        Fut: Future<Output = Result<T, AttemptOutcome<D::NativeError>>>,
    {
        let now = Instant::now();
        let admission = self.breaker.admit(&self.policy, now);
        if admission == Admission::Rejected {
            return Err(Error::CircuitOpen(self.endpoint.description.clone()));
        }
        let is_probe = admission == Admission::Probe;
        let attempts = if is_probe { 1 } else { self.policy.attempts() };

        let mut connection: Option<D::Connection> = None;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if connection.is_none() {
                let connection_string = self.endpoint.connection_string();
                match race(cancel, self.driver.open_connection(&connection_string, cancel)).await? {
                    Ok(conn) => connection = Some(conn),
                    Err(native) => {
                        let verdict = self.driver.classify_error(&native);
                        if verdict == Verdict::Retryable && attempt < attempts {
                            debug!(attempt, "connection open failed, retrying");
                            self.sleep_or_cancel(attempt, cancel).await?;
                            continue;
                        }
                        self.note_failure(verdict, is_probe, Instant::now());
                        return Err(self.finish_error(verdict, Box::new(native)));
                    }
                }
            }

            let conn = connection.as_mut().expect("connection established above");
            match race(cancel, op(conn)).await? {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(AttemptOutcome::Mapped(err)) => {
                    return Err(err);
                }
                Err(AttemptOutcome::Native(native)) => {
                    let verdict = self.driver.classify_error(&native);
                    if verdict == Verdict::Retryable {
                        connection = None;
                        if attempt < attempts {
                            debug!(attempt, "command failed, retrying");
                            self.sleep_or_cancel(attempt, cancel).await?;
                            continue;
                        }
                        self.note_failure(verdict, is_probe, Instant::now());
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(Error::FatalForCommand(Box::new(native))),
                        });
                    }
                    self.note_failure(verdict, is_probe, Instant::now());
                    return Err(self.finish_error(verdict, Box::new(native)));
                }
            }
        }

        unreachable!("attempt loop always returns before exhausting its range")
    }

    /// Update the breaker for a terminal (non-retried, or retry-exhausted)
    /// failure. A failed `HalfOpen` probe reopens the breaker regardless
    /// of verdict; otherwise only `FatalAndFailure` counts (spec.md §4.2).
    fn note_failure(&self, verdict: Verdict, is_probe: bool, now: Instant) {
        if is_probe || verdict == Verdict::FatalAndFailure {
            self.breaker.record_failure(&self.policy, now);
        }
    }

    fn finish_error(&self, verdict: Verdict, source: Box<dyn std::error::Error + Send + Sync>) -> Error {
        match verdict {
            Verdict::FatalForCommand => Error::FatalForCommand(source),
            Verdict::FatalAndFailure => Error::FatalAndFailure(source),
            Verdict::Cancelled => Error::Cancelled,
            Verdict::Retryable => Error::ConnectionFailed(source),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::config::Credentials;
    use crate::driver::{OutputParameters, Row};
    use crate::query::CommandKind;

    #[derive(Debug, Clone, PartialEq)]
    struct User {
        id: i64,
    }

    impl FromRow for User {
        fn from_row(row: &Row) -> Result<Self, Error> {
            match row.get("id") {
                Some(crate::params::Value::I64(id)) => Ok(User { id: *id }),
                _ => Err(Error::NoMappingAttributesFound("User")),
            }
        }
    }

    struct EmptyRows;

    #[async_trait]
    impl crate::driver::RowStream for EmptyRows {
        async fn next_row(&mut self) -> Result<Option<Row>, Error> {
            Ok(None)
        }
        async fn next_result_set(&mut self) -> Result<bool, Error> {
            Ok(false)
        }
    }

    #[derive(Debug, thiserror::Error)]
    enum FakeNativeError {
        #[error("connection refused")]
        Refused,
        #[error("command failed")]
        CommandFailed,
    }

    /// A driver whose `open_connection` fails a fixed number of times
    /// before succeeding, and whose commands fail on request, to exercise
    /// the retry loop and breaker deterministically.
    struct FlakyDriver {
        open_failures_remaining: Mutex<u32>,
        verdict: Verdict,
        opens_attempted: Mutex<u32>,
        fail_commands: bool,
    }

    #[async_trait]
    impl Driver for FlakyDriver {
        type Connection = ();
        type Command = ();
        type RowStream = EmptyRows;
        type NativeError = FakeNativeError;

        async fn open_connection(
            &self,
            _: &str,
            _: &CancellationToken,
        ) -> Result<Self::Connection, Self::NativeError> {
            *self.opens_attempted.lock() += 1;
            let mut remaining = self.open_failures_remaining.lock();
            if *remaining > 0 {
                *remaining -= 1;
                Err(FakeNativeError::Refused)
            } else {
                Ok(())
            }
        }
        fn build_command(&self, _: &mut Self::Connection, _: &str, _: CommandKind) -> Self::Command {}
        fn bind_parameter(&self, _: &mut Self::Command, _: &str, _: &crate::params::Parameter) {}
        async fn execute_non_query(
            &self,
            _: &mut Self::Command,
            _: &CancellationToken,
        ) -> Result<i64, Self::NativeError> {
            if self.fail_commands {
                Err(FakeNativeError::CommandFailed)
            } else {
                Ok(1)
            }
        }
        async fn execute_reader(
            &self,
            _: &mut Self::Command,
            _: &CancellationToken,
        ) -> Result<(Self::RowStream, OutputParameters), Self::NativeError> {
            Ok((EmptyRows, OutputParameters::default()))
        }
        async fn begin_transaction(
            &self,
            _: &mut Self::Connection,
            _: &CancellationToken,
        ) -> Result<(), Self::NativeError> {
            Ok(())
        }
        async fn commit(
            &self,
            _: &mut Self::Connection,
            _: &CancellationToken,
        ) -> Result<(), Self::NativeError> {
            Ok(())
        }
        async fn rollback(
            &self,
            _: &mut Self::Connection,
            _: &CancellationToken,
        ) -> Result<(), Self::NativeError> {
            Ok(())
        }
        fn classify_error(&self, _: &Self::NativeError) -> Verdict {
            self.verdict
        }
    }

    fn endpoint() -> Arc<Endpoint> {
        Arc::new(Endpoint::new(
            "host=test",
            Credentials::Integrated,
            "default",
            "test shard",
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_connection_open_until_success() {
        let driver = Arc::new(FlakyDriver {
            open_failures_remaining: Mutex::new(2),
            verdict: Verdict::Retryable,
            opens_attempted: Mutex::new(0),
            fail_commands: false,
        });
        let policy = ResiliencePolicy {
            retry_count: 3,
            retry_interval: std::time::Duration::from_millis(1),
            ..Default::default()
        };
        let manager = ConnectionManager::new(driver.clone(), endpoint(), policy);

        let query = Query::statement("noop", "SELECT 1");
        let params = ParameterSet::new();
        let mocks = MockResultTable::new();
        let cancel = CancellationToken::new();

        let result = manager.execute(&query, &params, &mocks, &cancel).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(*driver.opens_attempted.lock(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parameter_not_found_never_opens_a_connection() {
        let driver = Arc::new(FlakyDriver {
            open_failures_remaining: Mutex::new(0),
            verdict: Verdict::Retryable,
            opens_attempted: Mutex::new(0),
            fail_commands: false,
        });
        let manager = ConnectionManager::new(driver.clone(), endpoint(), ResiliencePolicy::default());

        let query = Query::new("q", "sp", CommandKind::Procedure, ["tenant_id"]);
        let params = ParameterSet::new();
        let mocks = MockResultTable::new();
        let cancel = CancellationToken::new();

        let result = manager.execute(&query, &params, &mocks, &cancel).await;
        assert!(matches!(result, Err(Error::ParameterNotFound(name)) if name == "tenant_id"));
        assert_eq!(*driver.opens_attempted.lock(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_and_failure_opens_breaker() {
        let driver = Arc::new(FlakyDriver {
            open_failures_remaining: Mutex::new(0),
            verdict: Verdict::FatalAndFailure,
            opens_attempted: Mutex::new(0),
            fail_commands: true,
        });
        let policy = ResiliencePolicy {
            breaker_failure_count: 1,
            ..Default::default()
        };
        let manager = ConnectionManager::new(driver, endpoint(), policy);
        let query = Query::statement("get_user", "SELECT id FROM users");
        let params = ParameterSet::new();
        let mocks = MockResultTable::new();
        let cancel = CancellationToken::new();

        let result = manager.execute(&query, &params, &mocks, &cancel).await;
        assert!(matches!(result, Err(Error::FatalAndFailure(_))));
        assert_eq!(manager.breaker().phase(), crate::resilience::BreakerPhase::Open);
    }

    /// A driver that fails its Nth `execute_reader` call (1-based) and
    /// tracks how many steps actually ran and whether `rollback` fired, to
    /// exercise batch rollback-on-first-error end to end.
    struct StepFailingDriver {
        fail_on_call: u32,
        calls: Mutex<u32>,
        committed: Mutex<bool>,
        rolled_back: Mutex<bool>,
    }

    #[async_trait]
    impl Driver for StepFailingDriver {
        type Connection = ();
        type Command = ();
        type RowStream = EmptyRows;
        type NativeError = FakeNativeError;

        async fn open_connection(
            &self,
            _: &str,
            _: &CancellationToken,
        ) -> Result<Self::Connection, Self::NativeError> {
            Ok(())
        }
        fn build_command(&self, _: &mut Self::Connection, _: &str, _: CommandKind) -> Self::Command {}
        fn bind_parameter(&self, _: &mut Self::Command, _: &str, _: &crate::params::Parameter) {}
        async fn execute_non_query(
            &self,
            _: &mut Self::Command,
            _: &CancellationToken,
        ) -> Result<i64, Self::NativeError> {
            Ok(0)
        }
        async fn execute_reader(
            &self,
            _: &mut Self::Command,
            _: &CancellationToken,
        ) -> Result<(Self::RowStream, OutputParameters), Self::NativeError> {
            let mut calls = self.calls.lock();
            *calls += 1;
            if *calls == self.fail_on_call {
                Err(FakeNativeError::CommandFailed)
            } else {
                Ok((EmptyRows, OutputParameters::default()))
            }
        }
        async fn begin_transaction(
            &self,
            _: &mut Self::Connection,
            _: &CancellationToken,
        ) -> Result<(), Self::NativeError> {
            Ok(())
        }
        async fn commit(
            &self,
            _: &mut Self::Connection,
            _: &CancellationToken,
        ) -> Result<(), Self::NativeError> {
            *self.committed.lock() = true;
            Ok(())
        }
        async fn rollback(
            &self,
            _: &mut Self::Connection,
            _: &CancellationToken,
        ) -> Result<(), Self::NativeError> {
            *self.rolled_back.lock() = true;
            Ok(())
        }
        fn classify_error(&self, _: &Self::NativeError) -> Verdict {
            Verdict::FatalForCommand
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_rolls_back_on_first_failing_step_s6() {
        use crate::batch::BatchStep;

        // S6: three steps on one shard; step index 1 (the second step)
        // fails. Step 0 runs, step 2 must never run, and the whole
        // transaction rolls back with the error naming index 1.
        let driver = Arc::new(StepFailingDriver {
            fail_on_call: 2,
            calls: Mutex::new(0),
            committed: Mutex::new(false),
            rolled_back: Mutex::new(false),
        });
        let manager = ConnectionManager::new(driver.clone(), endpoint(), ResiliencePolicy::default());

        let batch: Batch<StepFailingDriver, ()> = Batch::new()
            .step(BatchStep::new(
                Query::statement("insert_order", "INSERT INTO orders ..."),
                ParameterSet::new(),
            ))
            .step(BatchStep::new(
                Query::statement("update_inventory", "UPDATE inventory ..."),
                ParameterSet::new(),
            ))
            .step(BatchStep::new(
                Query::statement("insert_audit", "INSERT INTO audit ..."),
                ParameterSet::new(),
            ));

        let mocks = MockResultTable::new();
        let cancel = CancellationToken::new();

        let result = manager.run_batch(&batch, &mocks, &cancel).await;

        assert!(matches!(result, Err(Error::BatchStep { step: 1, .. })));
        // Steps 0 and 1 ran (2 execute_reader calls); step 2 never did.
        assert_eq!(*driver.calls.lock(), 2);
        assert!(*driver.rolled_back.lock());
        assert!(!*driver.committed.lock());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_bypasses_connection_entirely() {
        let driver = Arc::new(FlakyDriver {
            open_failures_remaining: Mutex::new(99),
            verdict: Verdict::Retryable,
            opens_attempted: Mutex::new(0),
            fail_commands: false,
        });
        let manager = ConnectionManager::new(driver.clone(), endpoint(), ResiliencePolicy::default());
        let query = Query::statement("get_count", "SELECT COUNT(*) FROM users");
        let params = ParameterSet::new();
        let mocks = MockResultTable::new().with("get_count", 7i64);
        let cancel = CancellationToken::new();

        let result = manager.execute(&query, &params, &mocks, &cancel).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(*driver.opens_attempted.lock(), 0);
    }
}
