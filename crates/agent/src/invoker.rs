//! Model invocation.
//!
//! A [`ModelInvoker`] binds one backend, one model and one tool set. Building
//! one means resolving credentials, so they are cached process-wide in an
//! [`InvokerCache`] and each key is built at most once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use infrapilot_core::error::ProviderError;
use infrapilot_core::message::{Message, MessageHistory};
use infrapilot_core::provider::{Provider, ProviderRequest, Usage};
use infrapilot_core::tool::{ToolCall, ToolDescriptor};
use infrapilot_providers::CredentialSource;
use infrapilot_tools::ToolProfile;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, warn};

/// What one model call produced.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// The raw assistant message, appended to history as-is
    pub message: Message,

    /// Tool calls with parsed arguments, in the order the model issued them
    pub tool_calls: Vec<ToolCall>,

    pub usage: Option<Usage>,
}

impl ModelResponse {
    pub fn from_message(message: Message, usage: Option<Usage>) -> Self {
        Self::with_taken_ids(message, usage, HashSet::new())
    }

    /// Build a response for the next turn of `history`, renaming call ids
    /// that an earlier turn already used.
    pub fn in_history(history: &MessageHistory, message: Message, usage: Option<Usage>) -> Self {
        let taken = history
            .messages()
            .iter()
            .flat_map(|m| m.tool_calls.iter().map(|c| c.id.clone()).chain(m.tool_call_id.clone()))
            .collect();
        Self::with_taken_ids(message, usage, taken)
    }

    fn with_taken_ids(mut message: Message, usage: Option<Usage>, mut taken: HashSet<String>) -> Self {
        // Every call needs its own id before anything runs or is recorded
        for call in &mut message.tool_calls {
            if call.id.trim().is_empty() || !taken.insert(call.id.clone()) {
                let fresh = format!("call_{}", uuid::Uuid::new_v4().simple());
                warn!(tool = %call.name, old_id = %call.id, new_id = %fresh, "Replacing empty or duplicate tool call id");
                taken.insert(fresh.clone());
                call.id = fresh;
            }
        }

        let tool_calls = message
            .tool_calls
            .iter()
            .map(|tc| ToolCall {
                id: tc.id.clone(),
                name: tc.name.clone(),
                arguments: parse_arguments(&tc.name, &tc.arguments),
            })
            .collect();
        Self {
            message,
            tool_calls,
            usage,
        }
    }

    pub fn text(&self) -> &str {
        &self.message.content
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Unparseable or empty argument strings become an empty object.
fn parse_arguments(tool: &str, raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => value,
        Ok(other) => {
            warn!(tool, arguments = %other, "Tool arguments are not an object, using {{}}");
            serde_json::json!({})
        }
        Err(e) => {
            warn!(tool, error = %e, "Could not parse tool arguments, using {{}}");
            serde_json::json!({})
        }
    }
}

/// Anything that turns a history into the next model response.
#[async_trait]
pub trait Invoke: Send + Sync {
    async fn invoke(&self, history: &MessageHistory) -> Result<ModelResponse, ProviderError>;
}

/// A backend bound to a model and a tool set.
pub struct ModelInvoker {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Vec<ToolDescriptor>,
    timeout: Option<Duration>,
}

impl ModelInvoker {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            max_tokens: None,
            tools,
            timeout: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }
}

#[async_trait]
impl Invoke for ModelInvoker {
    async fn invoke(&self, history: &MessageHistory) -> Result<ModelResponse, ProviderError> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: history.messages().to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: self.tools.clone(),
        };

        debug!(
            provider = self.provider.name(),
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Invoking model"
        );

        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.provider.complete(request))
                .await
                .map_err(|_| {
                    ProviderError::Timeout(format!("model call exceeded {}s", limit.as_secs()))
                })??,
            None => self.provider.complete(request).await?,
        };

        Ok(ModelResponse::in_history(history, response.message, response.usage))
    }
}

/// Identity of a cached invoker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvokerKey {
    pub provider: String,
    pub model: String,
    pub credential_source: CredentialSource,
    pub tool_profile: ToolProfile,
}

/// Process-wide invoker cache; each key is built at most once.
#[derive(Default)]
pub struct InvokerCache {
    cells: RwLock<HashMap<InvokerKey, Arc<OnceCell<Arc<ModelInvoker>>>>>,
}

impl InvokerCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn cell(&self, key: &InvokerKey) -> Arc<OnceCell<Arc<ModelInvoker>>> {
        if let Some(cell) = self.cells.read().await.get(key) {
            return cell.clone();
        }
        self.cells
            .write()
            .await
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// The invoker for `key`, building it with `build` on first use.
    ///
    /// Concurrent callers for the same key wait for a single build. A failed
    /// build leaves the key empty so the next caller tries again.
    pub async fn get_or_build<F>(&self, key: &InvokerKey, build: F) -> Result<Arc<ModelInvoker>, ProviderError>
    where
        F: FnOnce() -> Result<ModelInvoker, ProviderError>,
    {
        let cell = self.cell(key).await;
        let invoker = cell
            .get_or_try_init(|| async {
                debug!(provider = %key.provider, model = %key.model, "Building model invoker");
                build().map(Arc::new)
            })
            .await?;
        Ok(invoker.clone())
    }

    /// Number of keys with a built invoker.
    pub async fn len(&self) -> usize {
        self.cells
            .read()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.cells.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, make_text_response, make_tool_call, make_tool_call_response};
    use infrapilot_core::message::{MessageToolCall, ThreadId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(model: &str) -> InvokerKey {
        InvokerKey {
            provider: "mock".into(),
            model: model.into(),
            credential_source: CredentialSource::Auto,
            tool_profile: ToolProfile::Infra,
        }
    }

    #[test]
    fn arguments_are_parsed() {
        let response = ModelResponse::from_message(
            Message::assistant_with_tools(
                "",
                vec![
                    make_tool_call("create_s3_bucket", serde_json::json!({"bucket_name": "x"})),
                    MessageToolCall {
                        id: "call_bad".into(),
                        name: "terraform_plan".into(),
                        arguments: "{not json".into(),
                    },
                    MessageToolCall {
                        id: "call_empty".into(),
                        name: "get_user_permissions".into(),
                        arguments: String::new(),
                    },
                ],
            ),
            None,
        );
        assert_eq!(response.tool_calls.len(), 3);
        assert_eq!(response.tool_calls[0].arguments["bucket_name"], "x");
        assert_eq!(response.tool_calls[1].arguments, serde_json::json!({}));
        assert_eq!(response.tool_calls[2].arguments, serde_json::json!({}));
    }

    #[test]
    fn empty_and_repeated_call_ids_are_replaced() {
        let call = |id: &str| MessageToolCall {
            id: id.into(),
            name: "create_s3_bucket".into(),
            arguments: "{}".into(),
        };
        let response = ModelResponse::from_message(
            Message::assistant_with_tools("", vec![call(""), call(""), call("call_1"), call("call_1")]),
            None,
        );

        let ids: Vec<&str> = response.tool_calls.iter().map(|c| c.id.as_str()).collect();
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 4);
        assert!(ids.iter().all(|id| !id.is_empty()));
        assert_eq!(ids[2], "call_1");

        // The recorded message carries the same ids the tools run under
        let recorded: Vec<&str> = response.message.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(recorded, ids);
    }

    #[test]
    fn ids_used_by_earlier_turns_are_replaced() {
        let call = MessageToolCall {
            id: "call_0".into(),
            name: "create_vpc".into(),
            arguments: "{}".into(),
        };
        let mut history = MessageHistory::new(ThreadId::from("t"));
        history.append(Message::user("vpc")).unwrap();
        history
            .append(Message::assistant_with_tools("", vec![call.clone()]))
            .unwrap();
        history.append(Message::tool_result("call_0", "{}")).unwrap();

        let response = ModelResponse::in_history(&history, Message::assistant_with_tools("", vec![call]), None);
        assert_ne!(response.tool_calls[0].id, "call_0");
        history.append(response.message.clone()).unwrap();
        history
            .append(Message::tool_result(&response.tool_calls[0].id, "{}"))
            .unwrap();
        assert!(history.unanswered_tool_calls().is_empty());
    }

    #[tokio::test]
    async fn invoke_forwards_history_and_tools() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_tool_call_response(
            vec![make_tool_call("create_vpc", serde_json::json!({}))],
            "",
        )]));
        let tools = vec![ToolDescriptor::new("create_vpc", "Create a VPC", serde_json::json!({}))];
        let invoker = ModelInvoker::new(provider.clone(), "mock-model", tools);

        let mut history = MessageHistory::new(ThreadId::from("t"));
        history.append(Message::user("make a vpc")).unwrap();
        let response = invoker.invoke(&history).await.unwrap();

        assert!(response.has_tool_calls());
        let request = provider.last_request().unwrap();
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.model, "mock-model");
    }

    #[tokio::test]
    async fn model_timeout_is_provider_timeout() {
        let provider = Arc::new(
            SequentialMockProvider::new(vec![make_text_response("late")]).with_delay(Duration::from_secs(60)),
        );
        let invoker = ModelInvoker::new(provider, "mock-model", vec![])
            .with_timeout(Some(Duration::from_millis(20)));
        let history = MessageHistory::new(ThreadId::from("t"));
        let err = invoker.invoke(&history).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn cache_builds_each_key_once() {
        let cache = InvokerCache::new();
        let builds = AtomicUsize::new(0);
        let build = || {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(ModelInvoker::new(
                Arc::new(SequentialMockProvider::new(vec![])),
                "m",
                vec![],
            ))
        };

        let a = cache.get_or_build(&key("m"), build).await.unwrap();
        let b = cache.get_or_build(&key("m"), build).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        cache.get_or_build(&key("other"), build).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn failed_build_is_not_cached() {
        let cache = InvokerCache::new();
        let err = cache
            .get_or_build(&key("m"), || Err(ProviderError::NotConfigured("no key".into())))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
        assert!(cache.is_empty().await);

        let ok = cache
            .get_or_build(&key("m"), || {
                Ok(ModelInvoker::new(Arc::new(SequentialMockProvider::new(vec![])), "m", vec![]))
            })
            .await;
        assert!(ok.is_ok());
        assert_eq!(cache.len().await, 1);
    }
}
