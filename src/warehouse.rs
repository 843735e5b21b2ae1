//! BigQuery warehouse access
//!
//! Runs SQL through the `jobs.query` REST endpoint. The assistant's answer
//! flow never calls this; hosts use it to execute a generated query.

use crate::error::{AssistantError, Result};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::info;

const BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Tabular query result with every cell rendered as text
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

pub struct BigQueryManager {
    http: reqwest::Client,
    project_id: Option<String>,
    dataset_id: Option<String>,
    access_token: Option<String>,
    base_url: String,
}

impl BigQueryManager {
    pub fn new(project_id: Option<String>, dataset_id: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            project_id,
            dataset_id,
            access_token: None,
            base_url: BIGQUERY_BASE_URL.to_string(),
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn dataset_id(&self) -> Option<&str> {
        self.dataset_id.as_deref()
    }

    /// Execute a standard-SQL query and wait for its results.
    pub async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let project_id = self
            .project_id
            .as_deref()
            .ok_or_else(|| AssistantError::Config("PROJECT_ID is not set".to_string()))?;
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| AssistantError::Config("BIGQUERY_ACCESS_TOKEN is not set".to_string()))?;

        let mut body = serde_json::json!({
            "query": sql,
            "useLegacySql": false,
        });
        if let Some(dataset_id) = &self.dataset_id {
            body["defaultDataset"] = serde_json::json!({
                "projectId": project_id,
                "datasetId": dataset_id,
            });
        }

        info!(project = %project_id, "Executing warehouse query");
        let response = self
            .http
            .post(format!("{}/projects/{}/queries", self.base_url, project_id))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Warehouse(format!("BigQuery request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AssistantError::Warehouse(format!("BigQuery error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Warehouse(format!("Failed to parse BigQuery response: {}", e)))?;

        parse_query_response(&response_json)
    }
}

fn parse_query_response(response_json: &serde_json::Value) -> Result<QueryResult> {
    if response_json.get("jobComplete").and_then(|c| c.as_bool()) == Some(false) {
        return Err(AssistantError::Warehouse(
            "Query did not complete within the request timeout".to_string(),
        ));
    }

    let columns: Vec<String> = response_json
        .pointer("/schema/fields")
        .and_then(|f| f.as_array())
        .map(|fields| {
            fields
                .iter()
                .filter_map(|f| f.get("name").and_then(|n| n.as_str()).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let rows: Vec<Vec<Option<String>>> = response_json
        .get("rows")
        .and_then(|r| r.as_array())
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.get("f")
                        .and_then(|f| f.as_array())
                        .map(|cells| cells.iter().map(|cell| cell_to_string(&cell["v"])).collect::<Vec<_>>())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(QueryResult { columns, rows })
}

fn cell_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Pull the SQL out of a model answer, dropping Markdown code fences.
pub fn extract_sql(response: &str) -> String {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:sql|SQL|googlesql)?\s*(.*?)```").expect("valid fence pattern")
    });

    match fence.captures(response).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim().to_string(),
        None => response.trim().to_string(),
    }
}

/// Whether a model answer looks like a query that can be executed.
pub fn looks_like_sql(response: &str) -> bool {
    let sql = extract_sql(response);
    let upper = sql.trim_start().to_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_sql_fenced() {
        let response = "```sql\nSELECT * FROM customers\n```";
        assert_eq!(extract_sql(response), "SELECT * FROM customers");
        assert_eq!(extract_sql("  SELECT 1  "), "SELECT 1");
    }

    #[test]
    fn test_looks_like_sql() {
        assert!(looks_like_sql("SELECT * FROM customers"));
        assert!(looks_like_sql("```sql\nwith t as (select 1) select * from t\n```"));
        assert!(!looks_like_sql("1. **Why the Query Failed:**"));
    }

    #[test]
    fn test_parse_query_response() {
        let response = json!({
            "jobComplete": true,
            "schema": { "fields": [{ "name": "id", "type": "INTEGER" }, { "name": "name", "type": "STRING" }] },
            "rows": [
                { "f": [{ "v": "1" }, { "v": "Ada" }] },
                { "f": [{ "v": "2" }, { "v": null }] }
            ]
        });
        let result = parse_query_response(&response).unwrap();
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0], vec![Some("1".to_string()), Some("Ada".to_string())]);
        assert_eq!(result.rows[1][1], None);
    }

    #[test]
    fn test_incomplete_job() {
        assert!(parse_query_response(&json!({ "jobComplete": false })).is_err());
    }

    #[tokio::test]
    async fn test_execute_requires_project() {
        let manager = BigQueryManager::new(None, Some("sales".to_string()));
        let err = manager.execute_query("SELECT 1").await.unwrap_err();
        assert!(matches!(err, AssistantError::Config(_)));
    }
}
