//! HTTP implementation of [`ReviewApi`].

use pathreview_core::{BackendId, MigrationPhase, PageRequest, ReviewConfig, SearchQuery};
use reqwest::{Method, RequestBuilder, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::client::{BoxFuture, ReviewApi};
use crate::error::{ApiError, ApiResult};
use crate::types::{
    BackgroundTask, BulkAccepted, BulkRequest, DiffPage, LogBatch, LogsRequest, MigrationStatus,
    PhaseChange, QueueMetricsReport, RetryScope,
};

/// Talks to the migration backend over JSON/HTTP.
///
/// Routes live under `{api_base}/api/migrations/{migration}/`.
#[derive(Debug, Clone)]
pub struct HttpReviewApi {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

/// Query string of the search endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchParams<'a> {
    offset: u64,
    limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sort_field: Option<String>,
    sort_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a str>,
    search_field: String,
    type_filter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    depth_filter: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    depth_operator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_filter: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_operator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    traversal_status_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    copy_status_filter: Option<String>,
}

impl<'a> SearchParams<'a> {
    fn new(query: &'a SearchQuery, phase: MigrationPhase, page: PageRequest) -> Self {
        let status = query.status.map(|s| s.to_string());
        let (traversal_status_filter, copy_status_filter) = if phase.is_copy_scoped() {
            (None, status)
        } else {
            (status, None)
        };
        let size = query.effective_size();

        Self {
            offset: page.offset,
            limit: page.limit,
            sort_field: query.sort.map(|f| f.to_string()),
            sort_dir: query.sort_dir.to_string(),
            query: query.text.as_deref(),
            search_field: query.field.to_string(),
            type_filter: query.type_filter.to_string(),
            depth_filter: query.depth.map(|d| d.value),
            depth_operator: query.depth.map(|d| d.op.to_string()),
            size_filter: size.map(|s| s.value),
            size_operator: size.map(|s| s.op.to_string()),
            traversal_status_filter,
            copy_status_filter,
        }
    }
}

#[derive(Debug, Serialize)]
struct DiffParams<'a> {
    path: &'a str,
    offset: u64,
    limit: u64,
}

impl HttpReviewApi {
    pub fn new(config: &ReviewConfig) -> ApiResult<Self> {
        let base = Url::parse(&config.api_base)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {e}", config.api_base)))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(config.api_base.clone()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base,
            token: config.token.clone(),
        })
    }

    fn endpoint(&self, migration: &str, tail: &[&str]) -> ApiResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(["api", "migrations", migration])
            .extend(tail);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(target: "api", %method, %url, "request");
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ApiResult<T> {
        let value = self.send_value(builder).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send and discard the body once it is known not to be a rejection.
    async fn send_ack(&self, builder: RequestBuilder) -> ApiResult<()> {
        self.send_value(builder).await.map(|_| ())
    }

    async fn send_value(&self, builder: RequestBuilder) -> ApiResult<Value> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        trace!(target: "api", %status, bytes = body.len(), "response");

        let value: Option<Value> = if body.trim().is_empty() {
            None
        } else {
            serde_json::from_str(&body).ok()
        };

        if let Some(err) = value.as_ref().and_then(rejection) {
            return Err(err);
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        match value {
            Some(value) => Ok(value),
            None if body.trim().is_empty() => Ok(Value::Null),
            None => Err(ApiError::Decode(format!(
                "expected JSON, got {} bytes of text",
                body.len()
            ))),
        }
    }

    async fn node_action(&self, migration: &str, node: &BackendId, action: &str) -> ApiResult<()> {
        let url = self.endpoint(migration, &["nodes", node.as_str(), action])?;
        self.send_ack(self.request(Method::POST, url)).await
    }

    async fn bulk(&self, migration: &str, nodes: &[BackendId], action: &str) -> ApiResult<BulkAccepted> {
        let url = self.endpoint(migration, &["nodes", action])?;
        let body = BulkRequest {
            node_ids: nodes.to_vec(),
        };
        self.send(self.request(Method::POST, url).json(&body)).await
    }
}

/// Detect `{success: false, errorCode?, error?}`.
fn rejection(value: &Value) -> Option<ApiError> {
    if value.get("success").and_then(Value::as_bool) != Some(false) {
        return None;
    }
    let code = value
        .get("errorCode")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN");
    let message = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("request rejected");
    Some(ApiError::rejected(code, message))
}

fn retry_action(scope: RetryScope, marked: bool) -> &'static str {
    match (scope, marked) {
        (RetryScope::Discovery, true) => "mark-retry-discovery",
        (RetryScope::Discovery, false) => "unmark-retry-discovery",
        (RetryScope::Copy, true) => "mark-retry-copy",
        (RetryScope::Copy, false) => "unmark-retry-copy",
    }
}

impl ReviewApi for HttpReviewApi {
    fn diffs<'a>(
        &'a self,
        migration: &'a str,
        path: &'a str,
        page: PageRequest,
    ) -> BoxFuture<'a, ApiResult<DiffPage>> {
        Box::pin(async move {
            let url = self.endpoint(migration, &["diffs"])?;
            let params = DiffParams {
                path,
                offset: page.offset,
                limit: page.limit,
            };
            self.send(self.request(Method::GET, url).query(&params)).await
        })
    }

    fn search<'a>(
        &'a self,
        migration: &'a str,
        query: &'a SearchQuery,
        phase: MigrationPhase,
        page: PageRequest,
    ) -> BoxFuture<'a, ApiResult<DiffPage>> {
        Box::pin(async move {
            let url = self.endpoint(migration, &["diffs", "search"])?;
            let params = SearchParams::new(query, phase, page);
            self.send(self.request(Method::GET, url).query(&params)).await
        })
    }

    fn exclude_node<'a>(
        &'a self,
        migration: &'a str,
        node: &'a BackendId,
    ) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(self.node_action(migration, node, "exclude"))
    }

    fn unexclude_node<'a>(
        &'a self,
        migration: &'a str,
        node: &'a BackendId,
    ) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(self.node_action(migration, node, "unexclude"))
    }

    fn mark_for_retry<'a>(
        &'a self,
        migration: &'a str,
        node: &'a BackendId,
        scope: RetryScope,
    ) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(self.node_action(migration, node, retry_action(scope, true)))
    }

    fn unmark_for_retry<'a>(
        &'a self,
        migration: &'a str,
        node: &'a BackendId,
        scope: RetryScope,
    ) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(self.node_action(migration, node, retry_action(scope, false)))
    }

    fn bulk_exclude<'a>(
        &'a self,
        migration: &'a str,
        nodes: &'a [BackendId],
    ) -> BoxFuture<'a, ApiResult<BulkAccepted>> {
        Box::pin(self.bulk(migration, nodes, "bulk-exclude"))
    }

    fn bulk_unexclude<'a>(
        &'a self,
        migration: &'a str,
        nodes: &'a [BackendId],
    ) -> BoxFuture<'a, ApiResult<BulkAccepted>> {
        Box::pin(self.bulk(migration, nodes, "bulk-unexclude"))
    }

    fn background_tasks<'a>(
        &'a self,
        migration: &'a str,
    ) -> BoxFuture<'a, ApiResult<Vec<BackgroundTask>>> {
        Box::pin(async move {
            let url = self.endpoint(migration, &["tasks"])?;
            self.send(self.request(Method::GET, url)).await
        })
    }

    fn status<'a>(&'a self, migration: &'a str) -> BoxFuture<'a, ApiResult<MigrationStatus>> {
        Box::pin(async move {
            let url = self.endpoint(migration, &["status"])?;
            self.send(self.request(Method::GET, url)).await
        })
    }

    fn queue_metrics<'a>(
        &'a self,
        migration: &'a str,
    ) -> BoxFuture<'a, ApiResult<QueueMetricsReport>> {
        Box::pin(async move {
            let url = self.endpoint(migration, &["queue-metrics"])?;
            self.send(self.request(Method::GET, url)).await
        })
    }

    fn logs<'a>(
        &'a self,
        migration: &'a str,
        request: &'a LogsRequest,
    ) -> BoxFuture<'a, ApiResult<LogBatch>> {
        Box::pin(async move {
            let url = self.endpoint(migration, &["logs"])?;
            self.send(self.request(Method::POST, url).json(request)).await
        })
    }

    fn change_phase<'a>(
        &'a self,
        migration: &'a str,
        target: MigrationPhase,
    ) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async move {
            let Some(checkpoint) = target.checkpoint() else {
                return Err(ApiError::rejected(
                    "INVALID_PHASE",
                    format!("{target} cannot be requested"),
                ));
            };
            let url = self.endpoint(migration, &["phase"])?;
            let body = PhaseChange {
                target_phase: checkpoint.to_string(),
            };
            self.send_ack(self.request(Method::POST, url).json(&body)).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathreview_core::{Comparison, SizeUnit, StatusFilter, TypeFilter};

    fn api(base: &str) -> HttpReviewApi {
        let config = ReviewConfig::builder().api_base(base).build().unwrap();
        HttpReviewApi::new(&config).unwrap()
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let api = api("http://localhost:8080/backend/");
        let url = api.endpoint("m 1", &["nodes", "a/b", "exclude"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/backend/api/migrations/m%201/nodes/a%2Fb/exclude"
        );
    }

    #[test]
    fn test_rejection_detection() {
        let err = rejection(&serde_json::json!({
            "success": false,
            "errorCode": "DATABASE_NOT_AVAILABLE",
        }))
        .unwrap();
        assert!(err.is_database_unavailable());
        assert!(rejection(&serde_json::json!({"success": true})).is_none());
        assert!(rejection(&serde_json::json!({"items": []})).is_none());
    }

    #[test]
    fn test_search_params_scope_status_by_phase() {
        let query = SearchQuery::new()
            .with_text(" report ")
            .with_type(TypeFilter::File)
            .with_size(Comparison::Gte, 2.0, SizeUnit::Kb)
            .unwrap()
            .with_status(StatusFilter::Failed);

        let traversal = SearchParams::new(&query, MigrationPhase::TraversalReview, PageRequest::first(100));
        assert_eq!(traversal.traversal_status_filter.as_deref(), Some("failed"));
        assert!(traversal.copy_status_filter.is_none());
        assert_eq!(traversal.size_filter, Some(2048));
        assert_eq!(traversal.size_operator.as_deref(), Some("gte"));
        assert_eq!(traversal.query, Some("report"));

        let copy = SearchParams::new(&query, MigrationPhase::CopyReview, PageRequest::first(100));
        assert_eq!(copy.copy_status_filter.as_deref(), Some("failed"));
    }
}
