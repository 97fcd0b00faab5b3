//! Server status tool: reports whether a host is up.
//!
//! Backed by a fixed inventory so runs are reproducible without network
//! access.

use agentloop_core::error::ToolError;
use agentloop_core::tool::{Tool, ToolOutput};
use async_trait::async_trait;

/// Hosts the inventory knows to be up.
const ONLINE_HOSTS: &[&str] = &["192.168.1.10"];

pub struct GetServerStatusTool;

#[async_trait]
impl Tool for GetServerStatusTool {
    fn name(&self) -> &str {
        "get_server_status"
    }

    fn description(&self) -> &str {
        "Get the current status of a server by its IP address. Returns ONLINE or OFFLINE."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "ip": {
                    "type": "string",
                    "description": "IPv4 address of the server, e.g. 192.168.1.10"
                }
            },
            "required": ["ip"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let ip = arguments["ip"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'ip' argument".into()))?;

        if ip.parse::<std::net::Ipv4Addr>().is_err() {
            return Err(ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("'{ip}' is not an IPv4 address"),
            });
        }

        let status = if ONLINE_HOSTS.contains(&ip) { "ONLINE" } else { "OFFLINE" };
        Ok(status.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_host_is_online() {
        let out = GetServerStatusTool
            .execute(serde_json::json!({"ip": "192.168.1.10"}))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::Text("ONLINE".into()));
    }

    #[tokio::test]
    async fn unknown_host_is_offline() {
        let out = GetServerStatusTool
            .execute(serde_json::json!({"ip": "10.0.0.99"}))
            .await
            .unwrap();
        assert_eq!(out, ToolOutput::Text("OFFLINE".into()));
    }

    #[tokio::test]
    async fn rejects_non_ip() {
        let err = GetServerStatusTool
            .execute(serde_json::json!({"ip": "db-primary"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not an IPv4 address"));
    }
}
