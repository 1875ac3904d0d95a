use crate::resolve::resolve_value;
use async_trait::async_trait;
use pilotcore::services::{HttpClient, HttpRequest};
use pilotcore::{
    HandlerMetadata, NodeContext, NodeError, NodeHandler, NodeKind, NodeOutput, NodeSpec,
    PortDefinition, Value,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// HTTP request node
pub struct HttpRequestHandler {
    client: Arc<dyn HttpClient>,
}

impl HttpRequestHandler {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    fn build_url(ctx: &NodeContext) -> Result<String, NodeError> {
        let url = ctx.render(ctx.require_str("url")?);
        let params = match ctx.node.config.get("params").map(|p| resolve_value(ctx, p)) {
            Some(Value::Object(params)) if !params.is_empty() => params,
            _ => return Ok(url),
        };
        let parsed = reqwest::Url::parse_with_params(
            &url,
            params.iter().map(|(k, v)| (k.as_str(), v.render())),
        )
        .map_err(|e| NodeError::invalid_config("url", e.to_string()))?;
        Ok(parsed.to_string())
    }
}

#[async_trait]
impl NodeHandler for HttpRequestHandler {
    fn kind(&self) -> NodeKind {
        NodeKind::HttpRequest
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let url = Self::build_url(&ctx)?;
        let method = ctx.node.config_str("method").unwrap_or("GET").to_uppercase();

        let mut headers = BTreeMap::new();
        if let Some(Value::Object(raw)) = ctx.node.config.get("headers") {
            for (name, value) in raw {
                headers.insert(name.clone(), resolve_value(&ctx, value).render());
            }
        }

        let body = match ctx.node.config.get("body").map(|b| resolve_value(&ctx, b)) {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text),
            Some(structured) => {
                if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                    headers.insert("Content-Type".to_string(), "application/json".to_string());
                }
                Some(structured.to_string())
            }
        };

        ctx.log.info(format!("HTTP {} request to {}", method, url));
        let response = self
            .client
            .request(HttpRequest {
                method: method.clone(),
                url,
                headers,
                body,
            })
            .await
            .map_err(|e| e.into_node_error("http"))?;
        ctx.log.info(format!(
            "Response status: {} ({} bytes)",
            response.status,
            response.body.len()
        ));

        let ok = response.is_success();
        let fail_on_status = ctx
            .node
            .config
            .get("fail_on_status")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if fail_on_status && !ok {
            return Err(NodeError::Collaborator {
                service: "http".to_string(),
                message: format!("{} request returned status {}", method, response.status),
                retryable: response.status == 429 || response.status >= 500,
            });
        }

        let body = match serde_json::from_str::<serde_json::Value>(&response.body) {
            Ok(json) => Value::from(json),
            Err(_) => Value::String(response.body),
        };

        Ok(NodeOutput::new()
            .with_output("status_code", response.status)
            .with_output("body", body)
            .with_output("ok", ok))
    }

    fn validate_config(&self, node: &NodeSpec) -> Result<(), NodeError> {
        if node.config_str("url").is_none() {
            return Err(NodeError::MissingConfig("url".to_string()));
        }
        if let Some(method) = node.config.get("method") {
            let valid = method
                .as_str()
                .is_some_and(|m| METHODS.contains(&m.to_uppercase().as_str()));
            if !valid {
                return Err(NodeError::invalid_config(
                    "method",
                    format!("expected one of {}", METHODS.join(", ")),
                ));
            }
        }
        Ok(())
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            outputs: vec![
                PortDefinition::new("status_code", "Response status"),
                PortDefinition::new("body", "Response body, parsed as JSON when possible"),
                PortDefinition::new("ok", "True for 2xx responses"),
            ],
        }
    }
}
