//! Compile, execute and read in one call

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::ExecutionBackend;
use crate::compiler::{CompiledQuery, SqlCompiler};
use crate::error::{Error, Result};
use crate::results::{QueryOutput, ResultReader, Table};

const DEFAULT_RETRY_DELAY_MS: u64 = 200;

/// SQL client over an execution backend
pub struct SqlClient<B: ExecutionBackend> {
    compiler: SqlCompiler,
    backend: B,
    retries: usize,
    retry_delay: Duration,
}

impl<B: ExecutionBackend> SqlClient<B> {
    pub fn new(backend: B) -> Self {
        Self {
            compiler: SqlCompiler::default(),
            backend,
            retries: 0,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }

    pub fn with_compiler(mut self, compiler: SqlCompiler) -> Self {
        self.compiler = compiler;
        self
    }

    /// Extra attempts for retryable backend errors
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn compiler(&self) -> &SqlCompiler {
        &self.compiler
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Compile without executing
    pub fn explain(&self, sql: &str) -> Result<CompiledQuery> {
        self.compiler.explain(sql)
    }

    pub async fn query(&self, sql: &str) -> Result<QueryOutput> {
        let compiled = self.compiler.explain(sql)?;
        self.execute(&compiled).await
    }

    /// Run a query and flatten the result
    pub async fn query_table(&self, sql: &str) -> Result<Table> {
        let compiled = self.compiler.explain(sql)?;
        let output = self.execute(&compiled).await?;
        Ok(output.to_table(&compiled.columns))
    }

    pub async fn execute(&self, compiled: &CompiledQuery) -> Result<QueryOutput> {
        let request = &compiled.request;
        let mut attempt = 0;
        let response = loop {
            if attempt > 0 {
                debug!(attempt, path = %request.path(), "Retrying request");
                tokio::time::sleep(self.retry_delay).await;
            }
            match self.backend.execute(request).await {
                Ok(response) => break response,
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    warn!(attempt, error = %e, "Backend request failed, will retry");
                    attempt += 1;
                }
                Err(e) => return Err(Error::Backend(e)),
            }
        };

        let output = ResultReader::read(request, &response)?;
        info!(path = %request.path(), attempts = attempt + 1, "Query executed");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, MemoryBackend};
    use crate::request::SearchRequest;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with the given error a fixed number of times, then answers
    struct Flaky {
        failures: usize,
        error: BackendError,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExecutionBackend for Flaky {
        async fn execute(&self, _request: &SearchRequest) -> std::result::Result<Value, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(self.error.clone());
            }
            Ok(json!({"aggregations": {"COUNT(*)": {"value": 5}}}))
        }
    }

    fn flaky(failures: usize, error: BackendError) -> Flaky {
        Flaky {
            failures,
            error,
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_query_table_over_memory() {
        let backend = MemoryBackend::new().with_documents(
            "bank",
            vec![json!({"gender": "M"}), json!({"gender": "F"}), json!({"gender": "M"})],
        );
        let client = SqlClient::new(backend);
        let table = client
            .query_table("SELECT gender, COUNT(*) FROM bank GROUP BY gender")
            .await
            .unwrap();
        assert_eq!(table.rows, vec![vec![json!("M"), json!(2)], vec![json!("F"), json!(1)]]);
    }

    #[tokio::test]
    async fn test_retries_retryable_errors() {
        let client = SqlClient::new(flaky(2, BackendError::Timeout("slow".into())))
            .with_retries(2)
            .with_retry_delay(Duration::from_millis(1));
        let output = client.query("SELECT COUNT(*) FROM bank").await.unwrap();
        let QueryOutput::Aggregations(row) = output else {
            panic!("expected aggregations");
        };
        assert_eq!(row.number("COUNT(*)"), Some(5.0));
        assert_eq!(client.backend().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let client = SqlClient::new(flaky(5, BackendError::Http("reset".into())))
            .with_retries(1)
            .with_retry_delay(Duration::from_millis(1));
        let err = client.query("SELECT COUNT(*) FROM bank").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.backend().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let error = BackendError::Status {
            status: 400,
            body: "bad".into(),
        };
        let client = SqlClient::new(flaky(1, error)).with_retries(3);
        let err = client.query("SELECT COUNT(*) FROM bank").await.unwrap_err();
        assert!(matches!(err, Error::Backend(BackendError::Status { status: 400, .. })));
        assert_eq!(client.backend().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compile_errors_skip_the_backend() {
        let client = SqlClient::new(flaky(0, BackendError::Http("unused".into())));
        let err = client.query("SELECT FROM").await.unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
        assert_eq!(client.backend().calls.load(Ordering::SeqCst), 0);
    }
}
