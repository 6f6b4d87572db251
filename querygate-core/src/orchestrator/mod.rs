//! The query operation.
//!
//! [`QueryOrchestrator::execute_query`] drives one request through:
//! 1. question checks
//! 2. database resolution and schema lookup
//! 3. the generate / validate loop ([`generation`])
//! 4. execution under rate limiting, circuit breaking and retry ([`execution`])
//! 5. optional result scoring
//!
//! Every failure becomes an [`ErrorDescriptor`](crate::error::ErrorDescriptor)
//! in the response; nothing raw crosses this boundary. The whole request is
//! bounded by the configured request timeout.

mod execution;
mod generation;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

use crate::Result;
use crate::adapters::{ResultValidator, SqlExecutor, SqlGenerator};
use crate::config::{AppConfig, LowConfidenceMode, ValidationConfig};
use crate::error::{ErrorKind, QueryGateError};
use crate::logging::truncate_for_log;
use crate::metrics::QueryMetrics;
use crate::policy::SqlValidator;
use crate::query::{QueryRequest, QueryResponse, QueryResult, ResponseMetadata, ReturnMode};
use crate::resilience::Resilience;
use crate::schema::{SchemaCache, render_context};

/// Where a request currently is; decides which timeout kind is reported
/// when the request deadline expires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Preparing,
    Generating,
    Executing,
    Scoring,
}

/// Mutable bookkeeping for one request, readable after a timeout.
#[derive(Debug, Default)]
struct RequestState {
    phase: Phase,
    generation_attempts: u32,
    tokens_used: Option<u32>,
    sql: Option<String>,
    execution_time_ms: Option<u64>,
    warnings: Vec<String>,
}

impl RequestState {
    fn add_tokens(&mut self, tokens: Option<u32>) {
        if let Some(tokens) = tokens {
            self.tokens_used = Some(self.tokens_used.unwrap_or(0).saturating_add(tokens));
        }
    }
}

/// Successful outcome before response assembly.
struct Answer {
    data: Option<QueryResult>,
    confidence: Option<u8>,
}

/// Wires the validator, schema cache, resilience kit and collaborators into
/// the query operation. Safe to share across concurrent requests.
pub struct QueryOrchestrator {
    databases: Vec<String>,
    validator: SqlValidator,
    statement_timeout: Duration,
    max_rows: usize,
    validation: ValidationConfig,
    context_max_tables: usize,
    max_generation_attempts: u32,
    request_timeout: Duration,
    schema_cache: Arc<SchemaCache>,
    resilience: Arc<Resilience>,
    metrics: Arc<QueryMetrics>,
    generator: Arc<dyn SqlGenerator>,
    executor: Arc<dyn SqlExecutor>,
    result_validator: Option<Arc<dyn ResultValidator>>,
}

impl std::fmt::Debug for QueryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOrchestrator")
            .field("databases", &self.databases)
            .field("max_generation_attempts", &self.max_generation_attempts)
            .field("request_timeout", &self.request_timeout)
            .field("result_validation", &self.result_validator.is_some())
            .finish()
    }
}

impl QueryOrchestrator {
    /// Builds an orchestrator from loaded configuration and shared
    /// components.
    pub fn new(
        config: &AppConfig,
        schema_cache: Arc<SchemaCache>,
        resilience: Arc<Resilience>,
        generator: Arc<dyn SqlGenerator>,
        executor: Arc<dyn SqlExecutor>,
    ) -> Self {
        Self {
            databases: config.database_names(),
            validator: SqlValidator::for_config(config),
            statement_timeout: config.security.statement_timeout(),
            max_rows: config.security.max_rows,
            validation: config.validation.clone(),
            context_max_tables: config.cache.context_max_tables,
            max_generation_attempts: config.resilience.max_attempts(),
            request_timeout: config.resilience.request_timeout(),
            schema_cache,
            resilience,
            metrics: Arc::new(QueryMetrics::new()),
            generator,
            executor,
            result_validator: None,
        }
    }

    /// Records into shared `metrics` instead of private counters.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<QueryMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Counters for the requests handled so far.
    pub fn metrics(&self) -> &Arc<QueryMetrics> {
        &self.metrics
    }

    /// Enables result scoring with `validator`.
    #[must_use]
    pub fn with_result_validator(mut self, validator: Arc<dyn ResultValidator>) -> Self {
        self.result_validator = Some(validator);
        self
    }

    /// Answers one question. Never fails; errors are reported in the
    /// response.
    pub async fn execute_query(&self, request: QueryRequest) -> QueryResponse {
        let started = Instant::now();
        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let span = tracing::info_span!(
            "query",
            request_id = %request_id,
            database = tracing::field::Empty
        );

        async {
            // Request timeouts are capped at one day by config validation
            let deadline = started
                .checked_add(self.request_timeout)
                .unwrap_or(started);
            let mut state = RequestState::default();

            let timed =
                tokio::time::timeout_at(deadline, self.process(&request, &mut state, deadline))
                    .await;
            let outcome = match timed {
                Ok(outcome) => outcome,
                Err(_) => Err(self.deadline_error(state.phase)),
            };

            self.metrics.record_query(
                outcome.as_ref().err().map(QueryGateError::kind),
                started.elapsed(),
            );
            let total_time_ms = elapsed_ms(started);
            let metadata = ResponseMetadata {
                generation_attempts: state.generation_attempts,
                tokens_used: state.tokens_used,
                execution_time_ms: state.execution_time_ms,
                total_time_ms,
                warnings: std::mem::take(&mut state.warnings),
            };

            match outcome {
                Ok(answer) => {
                    tracing::info!(
                        "Query completed in {}ms after {} generation attempts",
                        total_time_ms,
                        metadata.generation_attempts
                    );
                    QueryResponse {
                        success: true,
                        request_id: request_id.clone(),
                        sql: state.sql,
                        data: answer.data,
                        confidence: answer.confidence,
                        error: None,
                        metadata,
                    }
                }
                Err(error) => {
                    tracing::warn!("Query failed after {}ms: {}", total_time_ms, error);
                    QueryResponse {
                        success: false,
                        request_id: request_id.clone(),
                        sql: state.sql,
                        data: None,
                        confidence: None,
                        error: Some(error.to_descriptor()),
                        metadata,
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process(
        &self,
        request: &QueryRequest,
        state: &mut RequestState,
        deadline: Instant,
    ) -> Result<Answer> {
        self.check_question(&request.question)?;
        tracing::info!("Processing question: {}", truncate_for_log(&request.question));

        let database = self.resolve_database(request.database.as_deref())?;
        tracing::Span::current().record("database", database.as_str());

        let schema = self.schema_cache.get(&database).ok_or_else(|| {
            QueryGateError::new(
                ErrorKind::SchemaNotFound,
                format!("No schema is available for database '{}'", database),
            )
        })?;
        let context = render_context(&schema, self.context_max_tables);

        state.phase = Phase::Generating;
        let sql = self
            .generate_validated_sql(&request.question, &context, state, deadline)
            .await?;
        state.sql = Some(sql.clone());

        if request.return_mode == ReturnMode::Sql {
            return Ok(Answer {
                data: None,
                confidence: None,
            });
        }

        state.phase = Phase::Executing;
        let result = self.execute_sql(&database, &sql, state, deadline).await?;

        state.phase = Phase::Scoring;
        let confidence = self
            .score_result(&request.question, &sql, &result, deadline)
            .await;

        if let Some(score) = confidence
            && score < self.validation.min_confidence_score
        {
            match self.validation.low_confidence_mode {
                LowConfidenceMode::Fail => {
                    return Err(QueryGateError::new(
                        ErrorKind::LowConfidence,
                        format!(
                            "Result confidence {} is below the threshold of {}",
                            score, self.validation.min_confidence_score
                        ),
                    )
                    .with_detail("confidence", score)
                    .with_detail("threshold", self.validation.min_confidence_score));
                }
                LowConfidenceMode::Warn => {
                    self.metrics.record_low_confidence_warning();
                    tracing::warn!(
                        "Result confidence {} below threshold {}",
                        score,
                        self.validation.min_confidence_score
                    );
                    state.warnings.push(format!(
                        "Low confidence: result scored {} (threshold {})",
                        score, self.validation.min_confidence_score
                    ));
                }
            }
        }

        Ok(Answer {
            data: Some(result),
            confidence,
        })
    }

    fn check_question(&self, question: &str) -> Result<()> {
        if question.trim().is_empty() {
            return Err(QueryGateError::bad_request("Question must not be empty"));
        }
        let length = question.chars().count();
        if length > self.validation.max_question_length {
            return Err(QueryGateError::validation(format!(
                "Question is too long ({} characters, maximum is {})",
                length, self.validation.max_question_length
            ))
            .with_detail("length", length)
            .with_detail("max_length", self.validation.max_question_length));
        }
        Ok(())
    }

    fn resolve_database(&self, requested: Option<&str>) -> Result<String> {
        match requested.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) if self.databases.iter().any(|d| d == name) => Ok(name.to_string()),
            Some(name) => Err(QueryGateError::new(
                ErrorKind::SchemaNotFound,
                format!("Database '{}' is not configured", name),
            )),
            None => match self.databases.as_slice() {
                [only] => Ok(only.clone()),
                [] => Err(QueryGateError::new(
                    ErrorKind::SchemaNotFound,
                    "No databases are configured",
                )),
                many => Err(QueryGateError::new(
                    ErrorKind::AmbiguousDatabase,
                    "Several databases are configured; name one in the request",
                )
                .with_detail("databases", many.to_vec())),
            },
        }
    }

    /// Confidence for an executed result, or `None` when scoring is off,
    /// the result is empty, or the validator fails.
    async fn score_result(
        &self,
        question: &str,
        sql: &str,
        result: &QueryResult,
        deadline: Instant,
    ) -> Option<u8> {
        if !self.validation.result_validation_enabled || result.rows.is_empty() {
            return None;
        }
        let validator = self.result_validator.as_ref()?;
        let sample = &result.rows[..result.rows.len().min(self.validation.sample_rows)];

        let scored = tokio::time::timeout_at(
            deadline,
            validator.validate(question, sql, sample, result.total_row_count),
        )
        .await;

        match scored {
            Ok(Ok(assessment)) => {
                tracing::debug!(
                    "Result scored {}: {}",
                    assessment.confidence,
                    assessment.explanation.as_deref().unwrap_or("no explanation")
                );
                Some(assessment.confidence.min(100))
            }
            Ok(Err(e)) => {
                tracing::warn!("Result validation failed, continuing without confidence: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!("Result validation ran out of time, continuing without confidence");
                None
            }
        }
    }

    fn deadline_error(&self, phase: Phase) -> QueryGateError {
        let (kind, stage) = match phase {
            Phase::Preparing | Phase::Generating => (ErrorKind::LlmTimeout, "SQL generation"),
            Phase::Executing | Phase::Scoring => (ErrorKind::ExecutionTimeout, "execution"),
        };
        QueryGateError::new(
            kind,
            format!(
                "Request exceeded its {}s deadline during {}",
                self.request_timeout.as_secs(),
                stage
            ),
        )
        .permanent()
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
