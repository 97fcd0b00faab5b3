//! Remote tool client: calls a tool hosted on an HTTP tool server.
//!
//! Protocol: `POST {endpoint}/execute` with `{tool, version, arguments}`,
//! answered by `{success, result, error}`. The requested version is checked
//! against the tool definition before any request is sent.

use agentloop_config::RemoteToolConfig;
use agentloop_core::error::ToolError;
use agentloop_core::tool::{RiskLevel, Tool, ToolOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    tool: &'a str,
    version: &'a str,
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    success: bool,
    #[serde(default)]
    result: String,
    #[serde(default)]
    error: Option<String>,
}

/// Whether `requested` may be served by a definition at `version`.
pub fn check_version_compatibility(version: &str, compatible_with: &[String], requested: &str) -> bool {
    requested == version || compatible_with.iter().any(|v| v == requested)
}

/// A tool whose implementation lives behind a tool server.
pub struct RemoteTool {
    config: RemoteToolConfig,
    client: reqwest::Client,
}

impl RemoteTool {
    pub fn new(config: RemoteToolConfig, timeout_secs: u64) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: config.name.clone(),
                reason: format!("HTTP client: {e}"),
            })?;
        Ok(Self { config, client })
    }

    fn requested_version(&self) -> &str {
        self.config
            .request_version
            .as_deref()
            .unwrap_or(&self.config.version)
    }

    fn failed(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.config.name.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.config.parameters.clone()
    }

    fn risk_level(&self) -> RiskLevel {
        self.config.risk_level
    }

    fn requires_confirmation(&self) -> bool {
        self.config.requires_confirmation
    }

    fn version(&self) -> &str {
        &self.config.version
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let requested = self.requested_version();
        if !check_version_compatibility(&self.config.version, &self.config.compatible_with, requested)
        {
            return Err(self.failed(format!(
                "version {requested} is not compatible with {} v{}",
                self.config.name, self.config.version
            )));
        }

        let url = format!("{}/execute", self.config.endpoint.trim_end_matches('/'));
        debug!(tool = %self.config.name, %url, version = requested, "Calling remote tool");

        let response = self
            .client
            .post(&url)
            .json(&ExecuteRequest {
                tool: &self.config.name,
                version: requested,
                arguments,
            })
            .send()
            .await
            .map_err(|e| self.failed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.failed(format!("tool server returned {status}: {body}")));
        }

        let reply: ExecuteResponse = response
            .json()
            .await
            .map_err(|e| self.failed(format!("malformed tool server reply: {e}")))?;

        if reply.success {
            Ok(reply.result.into())
        } else {
            Err(self.failed(reply.error.unwrap_or_else(|| "tool server reported failure".into())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            l.to_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if buf.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    fn config(endpoint: &str) -> RemoteToolConfig {
        RemoteToolConfig {
            name: "restart_service".into(),
            description: "Restart a service".into(),
            endpoint: endpoint.into(),
            version: "2.0".into(),
            compatible_with: vec!["1.5".into()],
            request_version: None,
            parameters: serde_json::json!({"type": "object"}),
            risk_level: RiskLevel::High,
            requires_confirmation: false,
        }
    }

    #[test]
    fn version_compatibility() {
        let compat = vec!["1.5".to_string()];
        assert!(check_version_compatibility("2.0", &compat, "2.0"));
        assert!(check_version_compatibility("2.0", &compat, "1.5"));
        assert!(!check_version_compatibility("2.0", &compat, "1.0"));
    }

    #[tokio::test]
    async fn successful_call_returns_result() {
        let (base, server) =
            serve_once("HTTP/1.1 200 OK", r#"{"success":true,"result":"Service restarted successfully"}"#).await;
        let tool = RemoteTool::new(config(&base), 5).unwrap();
        let out = tool
            .execute(serde_json::json!({"service": "nginx"}))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::Text("Service restarted successfully".into()));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /execute"));
        assert!(request.contains(r#""tool":"restart_service""#));
        assert!(request.contains(r#""version":"2.0""#));
    }

    #[tokio::test]
    async fn server_reported_failure_is_tool_error() {
        let (base, _server) =
            serve_once("HTTP/1.1 200 OK", r#"{"success":false,"error":"unknown service"}"#).await;
        let tool = RemoteTool::new(config(&base), 5).unwrap();
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "restart_service failed: unknown service");
    }

    #[tokio::test]
    async fn http_error_status_is_tool_error() {
        let (base, _server) = serve_once("HTTP/1.1 500 Internal Server Error", r#"{}"#).await;
        let tool = RemoteTool::new(config(&base), 5).unwrap();
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn incompatible_version_never_calls_server() {
        let mut cfg = config("http://127.0.0.1:9");
        cfg.request_version = Some("1.0".into());
        let tool = RemoteTool::new(cfg, 5).unwrap();
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("not compatible"));
    }

    #[test]
    fn definition_carries_config_metadata() {
        let tool = RemoteTool::new(config("http://localhost:8080"), 5).unwrap();
        let def = tool.to_definition();
        assert_eq!(def.version, "2.0");
        assert_eq!(def.risk_level, RiskLevel::High);
    }
}
