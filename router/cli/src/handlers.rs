//! Config-Driven Handlers
//!
//! Handlers declared in `[[handlers]]` entries of the router config. Each
//! one answers with its declared result kind and recommendations, which is
//! enough to exercise routing, caching and metrics from the command line.

use async_trait::async_trait;
use serde_json::json;

use mcp_router_core::{DomainHandler, HandlerEntry, HandlerResult, RequestContext};

/// Handler answering from its config entry
#[derive(Debug, Clone)]
pub struct StaticHandler {
    entry: HandlerEntry,
}

impl StaticHandler {
    /// Wrap a config entry
    #[must_use]
    pub fn new(entry: HandlerEntry) -> Self {
        Self { entry }
    }
}

#[async_trait]
impl DomainHandler for StaticHandler {
    async fn process_request(
        &self,
        text: &str,
        context: &RequestContext,
        confidence: f64,
    ) -> anyhow::Result<HandlerResult> {
        let descriptor = &self.entry.descriptor;
        let content = json!({
            "handler": descriptor.name,
            "request": text,
            "summary": descriptor.description,
        });

        let mut result = HandlerResult::new(
            descriptor.id.as_str(),
            self.entry.result_kind,
            content,
            confidence,
        )
        .with_recommendations(self.entry.recommendations.iter().cloned());

        if !context.is_empty() {
            let echoed: serde_json::Map<String, serde_json::Value> = context
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            result = result.with_metadata("context", serde_json::Value::Object(echoed));
        }
        Ok(result)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_router_core::{HandlerDescriptor, ResultKind};
    use pretty_assertions::assert_eq;

    fn entry() -> HandlerEntry {
        HandlerEntry {
            descriptor: HandlerDescriptor::new("api", "API Design")
                .with_description("Designs REST APIs"),
            result_kind: ResultKind::Recommendation,
            recommendations: vec!["Version the API".to_string()],
        }
    }

    #[tokio::test]
    async fn test_answers_from_entry() {
        let handler = StaticHandler::new(entry());
        let result = handler
            .process_request("design an api", &RequestContext::new(), 0.8)
            .await
            .unwrap();

        assert_eq!(result.handler_id, "api");
        assert_eq!(result.kind, ResultKind::Recommendation);
        assert_eq!(result.content["request"], "design an api");
        assert_eq!(result.recommendations, vec!["Version the API"]);
        assert!((result.confidence - 0.8).abs() < f64::EPSILON);
        assert!(result.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_echoes_context() {
        let handler = StaticHandler::new(entry());
        let mut context = RequestContext::new();
        context.insert("team".to_string(), json!("platform"));

        let result = handler
            .process_request("design an api", &context, 0.8)
            .await
            .unwrap();
        assert_eq!(result.metadata["context"], json!({ "team": "platform" }));
        assert!(handler.health_check().await);
    }
}
