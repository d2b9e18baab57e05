use gcp_bigquery_client::client_builder::ClientBuilder;
use gcp_bigquery_client::yup_oauth2::parse_service_account_key;
use gcp_bigquery_client::{
    Client,
    error::BQError,
    model::{
        error_proto::ErrorProto, get_query_results_parameters::GetQueryResultsParameters,
        get_query_results_response::GetQueryResultsResponse, job_reference::JobReference,
        query_request::QueryRequest, query_response::QueryResponse, table_row::TableRow,
    },
};
use motwot_etl::error::{ErrorKind, EtlError, EtlResult};
use motwot_etl::etl_error;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::bigquery::executor::StatementExecutor;

/// How long BigQuery may hold a single request open while waiting for a job.
const JOB_WAIT_TIMEOUT_MS: i32 = 30_000;

/// Jobs still running after this long are reported as failed.
const MAX_JOB_DURATION: Duration = Duration::from_secs(6 * 60 * 60);

/// BigQuery project identifier.
pub type BigQueryProjectId = String;
/// BigQuery dataset identifier.
pub type BigQueryDatasetId = String;
/// BigQuery table identifier.
pub type BigQueryTableId = String;

/// Converts BigQuery errors to ETL errors with appropriate classification.
pub(crate) fn bq_error_to_etl_error(err: BQError) -> EtlError {
    let (kind, description) = match &err {
        BQError::InvalidServiceAccountKey(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account key",
        ),
        BQError::InvalidServiceAccountAuthenticator(_) => (
            ErrorKind::AuthenticationError,
            "Invalid BigQuery service account authenticator",
        ),
        BQError::AuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication error",
        ),
        BQError::YupAuthError(_) => (
            ErrorKind::AuthenticationError,
            "BigQuery OAuth authentication error",
        ),
        BQError::NoToken => (
            ErrorKind::AuthenticationError,
            "BigQuery authentication token missing",
        ),
        BQError::RequestError(_) => (ErrorKind::DestinationError, "BigQuery request failed"),
        BQError::ResponseError { .. } => {
            (ErrorKind::DestinationQueryFailed, "BigQuery response error")
        }
        BQError::SerializationError(_) => (
            ErrorKind::SerializationError,
            "BigQuery JSON serialization error",
        ),
        _ => (ErrorKind::DestinationError, "BigQuery error"),
    };

    etl_error!(kind, description, err.to_string())
}

/// Client for the tables of one BigQuery project.
///
/// Only the query API is used: statements are plain GoogleSQL and every change to a table goes
/// through a single statement, which BigQuery applies atomically. Each statement is awaited until
/// its job completes, so a statement that fails is reported by the call that issued it.
#[derive(Clone)]
pub struct BigQueryClient {
    project_id: BigQueryProjectId,
    client: Client,
}

impl BigQueryClient {
    /// Creates a new [`BigQueryClient`] from a service account key JSON string.
    pub async fn new_with_key(
        project_id: BigQueryProjectId,
        sa_key: &str,
    ) -> EtlResult<BigQueryClient> {
        let sa_key = parse_service_account_key(sa_key)
            .map_err(BQError::from)
            .map_err(bq_error_to_etl_error)?;
        let client = ClientBuilder::new()
            .build_from_service_account_key(sa_key, false)
            .await
            .map_err(bq_error_to_etl_error)?;

        Ok(BigQueryClient { project_id, client })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Returns the fully qualified table name as `project_id.dataset_id.table_id` with proper
    /// quoting.
    pub fn full_table_name(
        &self,
        dataset_id: &BigQueryDatasetId,
        table_id: &BigQueryTableId,
    ) -> EtlResult<String> {
        full_table_name(&self.project_id, dataset_id, table_id)
    }

    /// Runs `statement` until its job completes and returns every result row.
    pub async fn run(&self, statement: String) -> EtlResult<Vec<TableRow>> {
        debug!(bytes = statement.len(), "running bigquery statement");
        let started = Instant::now();

        let mut request = QueryRequest::new(statement);
        request.timeout_ms = Some(JOB_WAIT_TIMEOUT_MS);
        let response = self
            .client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(bq_error_to_etl_error)?;

        let mut page = ResultPage::from(response);
        while !page.status.is_complete()? {
            if started.elapsed() > MAX_JOB_DURATION {
                return Err(etl_error!(
                    ErrorKind::DestinationQueryFailed,
                    "BigQuery job did not complete",
                    format!(
                        "job {} still running after {}s",
                        page.status.job_id.as_deref().unwrap_or("unknown"),
                        started.elapsed().as_secs()
                    )
                ));
            }

            debug!(job_id = ?page.status.job_id, "bigquery job still running");
            page = self.results_page(&page.status, None).await?;
        }

        let mut rows = page.rows;
        let mut page_token = page.page_token;
        while let Some(token) = page_token {
            let next = self.results_page(&page.status, Some(token)).await?;
            next.status.is_complete()?;
            rows.extend(next.rows);
            page_token = next.page_token;
        }

        Ok(rows)
    }

    async fn results_page(
        &self,
        status: &JobStatus,
        page_token: Option<String>,
    ) -> EtlResult<ResultPage> {
        let Some(job_id) = status.job_id.as_deref() else {
            return Err(etl_error!(
                ErrorKind::DestinationQueryFailed,
                "BigQuery job reference missing"
            ));
        };

        let parameters = GetQueryResultsParameters {
            location: status.location.clone(),
            page_token,
            timeout_ms: Some(JOB_WAIT_TIMEOUT_MS),
            ..Default::default()
        };
        let response = self
            .client
            .job()
            .get_query_results(&self.project_id, job_id, parameters)
            .await
            .map_err(bq_error_to_etl_error)?;

        Ok(ResultPage::from(response))
    }
}

impl StatementExecutor for BigQueryClient {
    async fn execute(&self, statement: String) -> EtlResult<()> {
        self.run(statement).await?;

        Ok(())
    }

    async fn query_column(&self, query: String) -> EtlResult<Vec<Option<String>>> {
        let rows = self.run(query).await?;

        Ok(rows.into_iter().map(first_value).collect())
    }
}

/// Completion state of a query job as reported by one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct JobStatus {
    complete: bool,
    job_id: Option<String>,
    location: Option<String>,
    errors: Vec<String>,
}

impl JobStatus {
    fn new(
        job_complete: Option<bool>,
        job_reference: Option<JobReference>,
        errors: Option<Vec<ErrorProto>>,
    ) -> Self {
        let (job_id, location) = match job_reference {
            Some(reference) => (reference.job_id, reference.location),
            None => (None, None),
        };

        Self {
            complete: job_complete == Some(true),
            job_id,
            location,
            errors: errors
                .unwrap_or_default()
                .into_iter()
                .map(|error| error.message.unwrap_or_else(|| "unknown error".to_owned()))
                .collect(),
        }
    }

    /// Returns whether the job completed, failing when it reported errors or cannot be
    /// followed up on.
    fn is_complete(&self) -> EtlResult<bool> {
        if !self.errors.is_empty() {
            return Err(etl_error!(
                ErrorKind::DestinationQueryFailed,
                "BigQuery job failed",
                self.errors.join("; ")
            ));
        }

        if !self.complete && self.job_id.is_none() {
            return Err(etl_error!(
                ErrorKind::DestinationQueryFailed,
                "BigQuery job reference missing",
                "incomplete job without a job id"
            ));
        }

        Ok(self.complete)
    }
}

/// One page of a query job's results.
#[derive(Debug)]
struct ResultPage {
    status: JobStatus,
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

impl From<QueryResponse> for ResultPage {
    fn from(response: QueryResponse) -> Self {
        Self {
            status: JobStatus::new(
                response.job_complete,
                response.job_reference,
                response.errors,
            ),
            rows: response.rows.unwrap_or_default(),
            page_token: response.page_token,
        }
    }
}

impl From<GetQueryResultsResponse> for ResultPage {
    fn from(response: GetQueryResultsResponse) -> Self {
        Self {
            status: JobStatus::new(
                response.job_complete,
                response.job_reference,
                response.errors,
            ),
            rows: response.rows.unwrap_or_default(),
            page_token: response.page_token,
        }
    }
}

/// Returns the first cell of `row` as a string, [`None`] for nulls.
fn first_value(row: TableRow) -> Option<String> {
    let cell = row.columns?.into_iter().next()?;

    match cell.value? {
        serde_json::Value::Null => None,
        serde_json::Value::String(value) => Some(value),
        other => Some(other.to_string()),
    }
}

impl fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("project_id", &self.project_id)
            .finish()
    }
}

/// Returns `project_id.dataset_id.table_id` sanitized and wrapped in backticks.
pub fn full_table_name(project_id: &str, dataset_id: &str, table_id: &str) -> EtlResult<String> {
    let project_id = sanitize_identifier(project_id, "BigQuery project id")?;
    let dataset_id = sanitize_identifier(dataset_id, "BigQuery dataset id")?;
    let table_id = sanitize_identifier(table_id, "BigQuery table id")?;

    Ok(format!("`{project_id}.{dataset_id}.{table_id}`"))
}

/// Sanitizes a BigQuery identifier for safe backtick quoting.
///
/// Rejects empty identifiers and identifiers containing control characters. Backticks and
/// backslashes are escaped with a backslash per GoogleSQL lexical rules.
fn sanitize_identifier(identifier: &str, context: &str) -> EtlResult<String> {
    if identifier.is_empty() {
        return Err(etl_error!(
            ErrorKind::ConfigError,
            "Invalid BigQuery identifier",
            format!("{context} cannot be empty")
        ));
    }

    if identifier.chars().any(char::is_control) {
        return Err(etl_error!(
            ErrorKind::ConfigError,
            "Invalid BigQuery identifier",
            format!("{context} contains control characters")
        ));
    }

    let mut escaped = String::with_capacity(identifier.len());
    for ch in identifier.chars() {
        match ch {
            '`' => escaped.push_str("\\`"),
            '\\' => escaped.push_str("\\\\"),
            _ => escaped.push(ch),
        }
    }

    Ok(escaped)
}
