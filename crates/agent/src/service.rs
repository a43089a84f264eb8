//! Process-wide agent service.
//!
//! Owns everything that outlives a single run: the thread store, the invoker
//! cache and the tool profiles. Requests are validated and admitted
//! synchronously; everything after admission (credentials included) happens
//! inside the run and is reported through its event stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use infrapilot_config::AppConfig;
use infrapilot_core::error::{Error, ProviderError, Result};
use infrapilot_core::message::{MessageHistory, ThreadId};
use infrapilot_core::provider::Provider;
use infrapilot_core::tool::{ToolCall, ToolDescriptor, ToolResult};
use infrapilot_providers::{CredentialSource, catalog};
use infrapilot_tools::{ToolContext, ToolProfile, ToolProfiles};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::emitter::{ChannelSink, EventSink, RunEmitter};
use crate::events::RunEvent;
use crate::invoker::{Invoke, InvokerCache, InvokerKey, ModelInvoker, ModelResponse};
use crate::loop_runner::{AgentLoop, RunOutcome, close_interrupted_calls};
use crate::threads::{ThreadGuard, ThreadStore};

const EVENT_BUFFER: usize = 64;

/// Turns a backend key into a live [`Provider`].
pub trait ProviderResolver: Send + Sync {
    /// Whether `provider` names a supported backend.
    fn supports(&self, provider: &str) -> bool;

    /// The model a run should use when `requested` may be absent.
    fn resolve_model(&self, provider: &str, requested: Option<&str>) -> String;

    /// Build the backend; this is where credentials are resolved.
    fn build(&self, provider: &str, source: CredentialSource) -> std::result::Result<Arc<dyn Provider>, ProviderError>;
}

/// Resolver backed by the built-in catalog and the app configuration.
pub struct CatalogResolver {
    config: Arc<AppConfig>,
}

impl CatalogResolver {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self { config }
    }
}

impl ProviderResolver for CatalogResolver {
    fn supports(&self, provider: &str) -> bool {
        catalog::lookup(provider).is_some()
    }

    fn resolve_model(&self, provider: &str, requested: Option<&str>) -> String {
        match catalog::lookup(provider) {
            Some(spec) => infrapilot_providers::resolve_model(&self.config, spec, requested),
            None => requested.unwrap_or_default().to_string(),
        }
    }

    fn build(&self, provider: &str, source: CredentialSource) -> std::result::Result<Arc<dyn Provider>, ProviderError> {
        infrapilot_providers::build_provider(&self.config, provider, source)
    }
}

/// A run request as it arrives from a client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Backend key; blank means the configured default
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub credential_source: Option<String>,
    #[serde(default)]
    pub tool_profile: Option<String>,
}

impl RunRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_tool_profile(mut self, profile: impl Into<String>) -> Self {
        self.tool_profile = Some(profile.into());
        self
    }
}

/// A request that passed validation.
#[derive(Debug, Clone)]
struct ValidatedRun {
    run_id: String,
    thread_id: ThreadId,
    message: String,
    provider: String,
    model: String,
    credential_source: CredentialSource,
    tool_profile: ToolProfile,
}

/// A started run.
pub struct RunHandle {
    pub run_id: String,
    pub thread_id: ThreadId,
    pub events: mpsc::Receiver<RunEvent>,
    pub task: JoinHandle<Result<RunOutcome>>,
}

/// Invoker that is looked up (and built on first use) in the shared cache.
///
/// Deferring the build to the first model call is what makes credential
/// failures part of the run rather than of request validation.
struct CachedInvoker {
    cache: Arc<InvokerCache>,
    key: InvokerKey,
    resolver: Arc<dyn ProviderResolver>,
    tools: Vec<ToolDescriptor>,
    config: Arc<AppConfig>,
}

impl CachedInvoker {
    fn build(&self) -> std::result::Result<ModelInvoker, ProviderError> {
        let provider = self.resolver.build(&self.key.provider, self.key.credential_source)?;
        let agent = &self.config.agent;
        Ok(ModelInvoker::new(provider, self.key.model.clone(), self.tools.clone())
            .with_temperature(self.config.default_temperature)
            .with_max_tokens(self.config.default_max_tokens)
            .with_timeout(agent.model_timeout_secs.map(Duration::from_secs)))
    }
}

#[async_trait]
impl Invoke for CachedInvoker {
    async fn invoke(&self, history: &MessageHistory) -> std::result::Result<ModelResponse, ProviderError> {
        let invoker = self.cache.get_or_build(&self.key, || self.build()).await?;
        invoker.invoke(history).await
    }
}

pub struct AgentService {
    config: Arc<AppConfig>,
    threads: ThreadStore,
    invokers: Arc<InvokerCache>,
    profiles: ToolProfiles,
    resolver: Arc<dyn ProviderResolver>,
}

impl AgentService {
    pub fn new(config: AppConfig, profiles: ToolProfiles, resolver: Arc<dyn ProviderResolver>) -> Self {
        let threads = ThreadStore::new(config.agent.busy_policy);
        Self {
            config: Arc::new(config),
            threads,
            invokers: Arc::new(InvokerCache::new()),
            profiles,
            resolver,
        }
    }

    /// Service wired to the catalog backends and the Terraform workspace.
    pub fn from_config(config: AppConfig) -> Self {
        let config = Arc::new(config);
        let ctx = Arc::new(ToolContext::from_config(&config.terraform));
        let resolver = Arc::new(CatalogResolver::new(config.clone()));
        Self {
            threads: ThreadStore::new(config.agent.busy_policy),
            invokers: Arc::new(InvokerCache::new()),
            profiles: ToolProfiles::new(ctx),
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn profiles(&self) -> &ToolProfiles {
        &self.profiles
    }

    pub fn threads(&self) -> &ThreadStore {
        &self.threads
    }

    pub fn invokers(&self) -> &InvokerCache {
        &self.invokers
    }

    fn validate(&self, request: &RunRequest) -> Result<ValidatedRun> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(Error::Validation("Message cannot be empty".into()));
        }

        let provider = match request.provider.trim() {
            "" => self.config.default_provider.clone(),
            p => p.to_ascii_lowercase(),
        };
        if !self.resolver.supports(&provider) {
            return Err(Error::Validation(format!("Unsupported provider: {provider}")));
        }

        let credential_source: CredentialSource = request
            .credential_source
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(Error::Validation)?;
        let tool_profile: ToolProfile = request
            .tool_profile
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(Error::Validation)?;

        let thread_id = match request.thread_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => ThreadId::from(id),
            _ => ThreadId::new(),
        };

        Ok(ValidatedRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            thread_id,
            message: request.message.clone(),
            model: self.resolver.resolve_model(&provider, request.model.as_deref()),
            provider,
            credential_source,
            tool_profile,
        })
    }

    /// Validate and admit a request, then run it on its own task.
    ///
    /// Validation failures and a busy thread are returned here, before any
    /// event is produced. Everything else arrives on the returned receiver.
    pub async fn start_run(self: &Arc<Self>, request: RunRequest) -> Result<RunHandle> {
        let run = self.validate(&request)?;
        let guard = self.threads.acquire(&run.thread_id).await?;
        let (sink, events) = ChannelSink::channel(EVENT_BUFFER);

        let run_id = run.run_id.clone();
        let thread_id = run.thread_id.clone();
        let service = self.clone();
        let task = tokio::spawn(async move { service.execute(guard, run, Arc::new(sink)).await });

        Ok(RunHandle {
            run_id,
            thread_id,
            events,
            task,
        })
    }

    /// Validate, admit and run a request to completion on the current task.
    pub async fn run(&self, request: RunRequest, sink: Arc<dyn EventSink>) -> Result<RunOutcome> {
        let run = self.validate(&request)?;
        let guard = self.threads.acquire(&run.thread_id).await?;
        self.execute(guard, run, sink).await
    }

    async fn execute(&self, mut guard: ThreadGuard, run: ValidatedRun, sink: Arc<dyn EventSink>) -> Result<RunOutcome> {
        info!(
            run_id = %run.run_id,
            thread_id = %run.thread_id,
            provider = %run.provider,
            model = %run.model,
            profile = %run.tool_profile,
            "Starting run"
        );

        let agent_config = &self.config.agent;
        let mut emitter = RunEmitter::new(sink, &run.run_id, run.thread_id.as_str(), agent_config.chunk_size);
        let tools = self.profiles.get(run.tool_profile);
        let invoker = Arc::new(CachedInvoker {
            cache: self.invokers.clone(),
            key: InvokerKey {
                provider: run.provider.clone(),
                model: run.model.clone(),
                credential_source: run.credential_source,
                tool_profile: run.tool_profile,
            },
            resolver: self.resolver.clone(),
            tools: tools.describe(),
            config: self.config.clone(),
        });
        let agent = AgentLoop::new(invoker, tools, agent_config.system_prompt())
            .with_max_iterations(agent_config.max_iterations);

        let history: &mut MessageHistory = &mut guard;
        let run_future = agent.execute(history, &run.message, &mut emitter);
        match agent_config.run_timeout_secs {
            None => run_future.await,
            Some(secs) => {
                let timed = tokio::time::timeout(Duration::from_secs(secs), run_future).await;
                let Ok(result) = timed else {
                    let err = Error::Timeout { timeout_secs: secs };
                    warn!(run_id = %run.run_id, timeout_secs = secs, "Run timed out");
                    close_interrupted_calls(history);
                    if !emitter.is_finished() {
                        let _ = emitter.run_error(err.to_string()).await;
                    }
                    return Err(err);
                };
                result
            }
        }
    }

    /// Result of the `get_user_permissions` tool, for the identity endpoint.
    pub async fn identity(&self) -> ToolResult {
        let call = ToolCall {
            id: "identity".into(),
            name: "get_user_permissions".into(),
            arguments: serde_json::json!({}),
        };
        self.profiles.get(ToolProfile::Infra).execute(&call).await
    }

    /// Drop all threads and cached invokers.
    pub async fn shutdown(&self) {
        info!(threads = self.threads.len().await, "Shutting down agent service");
        self.threads.clear().await;
        self.invokers.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::CollectingSink;
    use crate::test_helpers::*;
    use infrapilot_config::BusyPolicy;
    use infrapilot_core::message::Role;
    use infrapilot_core::tool::ToolRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolver handing out one scripted provider under the key "mock".
    struct StaticResolver {
        provider: Option<Arc<SequentialMockProvider>>,
        builds: AtomicUsize,
    }

    impl StaticResolver {
        fn new(provider: SequentialMockProvider) -> Self {
            Self {
                provider: Some(Arc::new(provider)),
                builds: AtomicUsize::new(0),
            }
        }

        fn without_credentials() -> Self {
            Self {
                provider: None,
                builds: AtomicUsize::new(0),
            }
        }
    }

    impl ProviderResolver for StaticResolver {
        fn supports(&self, provider: &str) -> bool {
            provider == "mock"
        }

        fn resolve_model(&self, _provider: &str, requested: Option<&str>) -> String {
            requested.unwrap_or("mock-model").to_string()
        }

        fn build(&self, _provider: &str, _source: CredentialSource) -> std::result::Result<Arc<dyn Provider>, ProviderError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            match &self.provider {
                Some(p) => Ok(p.clone()),
                None => Err(ProviderError::NotConfigured("No API key found for Mock".into())),
            }
        }
    }

    fn profiles() -> ToolProfiles {
        let mut infra = ToolRegistry::new();
        infra.register(Box::new(EchoTool("create_s3_bucket")));
        infra.register(Box::new(EchoTool("get_user_permissions")));
        ToolProfiles::from_registries(vec![(ToolProfile::Infra, infra)])
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.default_provider = "mock".into();
        config
    }

    fn service_with(config: AppConfig, resolver: StaticResolver) -> (Arc<AgentService>, Arc<StaticResolver>) {
        let resolver = Arc::new(resolver);
        let service = Arc::new(AgentService::new(config, profiles(), resolver.clone()));
        (service, resolver)
    }

    async fn drain(mut handle: RunHandle) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.events.recv().await {
            events.push(event);
        }
        // The sender goes away just before the thread lock does
        let _ = handle.task.await.unwrap();
        events
    }

    #[tokio::test]
    async fn validation_happens_before_the_run() {
        let (service, _) = service_with(config(), StaticResolver::new(SequentialMockProvider::new(vec![])));

        let cases = [
            (RunRequest::new("   "), "Message cannot be empty"),
            (RunRequest::new("hi").with_provider("groq"), "Unsupported provider: groq"),
            (RunRequest::new("hi").with_tool_profile("everything"), "Unsupported tool profile"),
            (
                RunRequest {
                    credential_source: Some("keychain".into()),
                    ..RunRequest::new("hi")
                },
                "Unsupported credential source",
            ),
        ];
        for (request, expected) in cases {
            let err = service.start_run(request.with_thread("t1")).await.err().unwrap();
            assert!(matches!(err, Error::Validation(_)));
            assert!(err.to_string().contains(expected), "{err}");
        }
        assert!(service.threads().is_empty().await);
    }

    #[tokio::test]
    async fn start_run_streams_to_completion() {
        let provider = SequentialMockProvider::new(vec![make_text_response("Hello from the agent.")]);
        let (service, _) = service_with(config(), StaticResolver::new(provider));

        let handle = service.start_run(RunRequest::new("hi")).await.unwrap();
        let thread_id = handle.thread_id.clone();
        assert!(!thread_id.as_str().is_empty());

        let events = drain(handle).await;
        assert_eq!(events.first().unwrap().event_type(), "RUN_STARTED");
        assert_eq!(events.last().unwrap().event_type(), "RUN_FINISHED");
        match &events[0] {
            RunEvent::RunStarted { thread_id: t, .. } => assert_eq!(t, thread_id.as_str()),
            other => panic!("unexpected {other:?}"),
        }

        let history = service.threads().snapshot(&thread_id).await.unwrap().unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn busy_thread_is_rejected() {
        let (service, _) = service_with(config(), StaticResolver::new(SequentialMockProvider::new(vec![])));
        let _held = service.threads().acquire(&ThreadId::from("t1")).await.unwrap();

        let err = service
            .start_run(RunRequest::new("hi").with_thread("t1"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::ThreadBusy { .. }));
    }

    #[tokio::test]
    async fn missing_credentials_surface_as_run_error() {
        let (service, _) = service_with(config(), StaticResolver::without_credentials());

        let handle = service.start_run(RunRequest::new("hi").with_thread("t1")).await.unwrap();
        let events = drain(handle).await;

        let types: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["RUN_STARTED", "TEXT_MESSAGE_START", "RUN_ERROR"]);
        match events.last().unwrap() {
            RunEvent::RunError { message, .. } => assert!(message.contains("No API key found")),
            other => panic!("unexpected {other:?}"),
        }

        // The user message is kept so a retry overwrites it
        let history = service.threads().snapshot(&ThreadId::from("t1")).await.unwrap().unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.pending_user());
        assert!(service.invokers().is_empty().await);
    }

    #[tokio::test]
    async fn invokers_are_reused_across_runs() {
        let provider = SequentialMockProvider::new(vec![make_text_response("one"), make_text_response("two")]);
        let (service, resolver) = service_with(config(), StaticResolver::new(provider));

        for message in ["first", "second"] {
            let sink = Arc::new(CollectingSink::new());
            service
                .run(RunRequest::new(message).with_thread("t1"), sink)
                .await
                .unwrap();
        }
        assert_eq!(resolver.builds.load(Ordering::SeqCst), 1);
        assert_eq!(service.invokers().len().await, 1);
    }

    #[tokio::test]
    async fn tool_profile_none_offers_no_tools() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response("plain")]));
        let resolver = Arc::new(StaticResolver {
            provider: Some(provider.clone()),
            builds: AtomicUsize::new(0),
        });
        let service = AgentService::new(config(), profiles(), resolver);

        service
            .run(
                RunRequest::new("hi").with_tool_profile("none"),
                Arc::new(CollectingSink::new()),
            )
            .await
            .unwrap();
        assert!(provider.last_request().unwrap().tools.is_empty());
    }

    #[tokio::test]
    async fn run_timeout_emits_run_error() {
        let mut config = config();
        config.agent.run_timeout_secs = Some(1);
        let provider = SequentialMockProvider::new(vec![make_text_response("late")])
            .with_delay(Duration::from_secs(30));
        let (service, _) = service_with(config, StaticResolver::new(provider));

        let sink = Arc::new(CollectingSink::new());
        let err = service
            .run(RunRequest::new("hi").with_thread("slow"), sink.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { timeout_secs: 1 }));
        assert_eq!(sink.events().last().unwrap().event_type(), "RUN_ERROR");

        // The lock is released once the run gives up
        assert!(service.threads().acquire(&ThreadId::from("slow")).await.is_ok());
    }

    #[tokio::test]
    async fn run_timeout_mid_batch_closes_open_calls() {
        let mut config = config();
        config.agent.run_timeout_secs = Some(1);
        let mut infra = ToolRegistry::new();
        infra.register(Box::new(EchoTool("create_s3_bucket")));
        infra.register(Box::new(SlowTool("terraform_apply", Duration::from_secs(30))));
        let profiles = ToolProfiles::from_registries(vec![(ToolProfile::Infra, infra)]);
        let provider = SequentialMockProvider::new(vec![make_tool_call_response(
            vec![
                make_tool_call_with_id("call_a", "create_s3_bucket", serde_json::json!({"bucket_name": "a"})),
                make_tool_call_with_id("call_b", "terraform_apply", serde_json::json!({"project_name": "s3_a"})),
            ],
            "",
        )]);
        let service = AgentService::new(config, profiles, Arc::new(StaticResolver::new(provider)));

        let err = service
            .run(RunRequest::new("apply it").with_thread("slow"), Arc::new(CollectingSink::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));

        let history = service.threads().snapshot(&ThreadId::from("slow")).await.unwrap().unwrap();
        assert!(history.unanswered_tool_calls().is_empty());
        let answered: Vec<&str> = history
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(answered, vec!["call_a", "call_b"]);
    }

    #[tokio::test]
    async fn queued_runs_share_history() {
        let mut config = config();
        config.agent.busy_policy = BusyPolicy::Queue;
        let provider = SequentialMockProvider::new(vec![make_text_response("a"), make_text_response("b")]);
        let (service, _) = service_with(config, StaticResolver::new(provider));

        let first = service.start_run(RunRequest::new("one").with_thread("q")).await.unwrap();
        let first_events = drain(first).await;
        let second = service.start_run(RunRequest::new("two").with_thread("q")).await.unwrap();
        let second_events = drain(second).await;

        assert_eq!(first_events.last().unwrap().event_type(), "RUN_FINISHED");
        assert_eq!(second_events.last().unwrap().event_type(), "RUN_FINISHED");
        let history = service.threads().snapshot(&ThreadId::from("q")).await.unwrap().unwrap();
        let roles: Vec<Role> = history.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn identity_runs_permissions_tool() {
        let (service, _) = service_with(config(), StaticResolver::new(SequentialMockProvider::new(vec![])));
        let result = service.identity().await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn shutdown_clears_state() {
        let provider = SequentialMockProvider::new(vec![make_text_response("ok")]);
        let (service, _) = service_with(config(), StaticResolver::new(provider));
        service
            .run(RunRequest::new("hi").with_thread("t1"), Arc::new(CollectingSink::new()))
            .await
            .unwrap();
        assert_eq!(service.threads().len().await, 1);

        service.shutdown().await;
        assert!(service.threads().is_empty().await);
        assert!(service.invokers().is_empty().await);
    }
}
