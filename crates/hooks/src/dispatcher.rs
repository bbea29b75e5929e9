use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::settings::{HookAction, HookEvent, HookSettings, RepositoryHookSettings};

const QUEUE_CAPACITY: usize = 256;
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        command: &str,
        parameters: &[(String, String)],
        event: &HookEvent,
        payload: &str,
    ) -> anyhow::Result<i32>;
}

#[async_trait]
pub trait HttpRunner: Send + Sync {
    async fn run(
        &self,
        endpoint: &str,
        method: &str,
        headers: &[(String, String)],
        event: &HookEvent,
        payload: &str,
    ) -> anyhow::Result<u16>;
}

/// Runs hook commands through the shell. Environment variables are set on the
/// child only, so the parent environment is untouched.
struct ProcessCommandRunner;

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn run(
        &self,
        command: &str,
        parameters: &[(String, String)],
        event: &HookEvent,
        payload: &str,
    ) -> anyhow::Result<i32> {
        let mut child = tokio::process::Command::new("sh");
        child
            .arg("-c")
            .arg(command)
            .env("AGPM_HOOK_EVENT", &event.name)
            .env("AGPM_HOOK_PAYLOAD", payload)
            .env("AGPM_HOOK_COMMAND", command);
        for (name, value) in parameters {
            child.env(parameter_env_name(name), value);
        }
        let status = child.status().await?;
        Ok(status.code().unwrap_or(-1))
    }
}

struct ReqwestHookRunner {
    client: reqwest::Client,
}

impl ReqwestHookRunner {
    fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("hook http client"),
        }
    }
}

#[async_trait]
impl HttpRunner for ReqwestHookRunner {
    async fn run(
        &self,
        endpoint: &str,
        method: &str,
        headers: &[(String, String)],
        _event: &HookEvent,
        payload: &str,
    ) -> anyhow::Result<u16> {
        let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .unwrap_or(reqwest::Method::POST);
        let mut request = self.client.request(method, endpoint);
        let mut has_content_type = false;
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("content-type") {
                has_content_type = true;
            }
            request = request.header(name, value);
        }
        if !has_content_type {
            request = request.header("Content-Type", "application/json");
        }
        let response = request.body(payload.to_string()).send().await?;
        Ok(response.status().as_u16())
    }
}

/// `AGPM_HOOK_PARAM_<NAME>`: non-alphanumeric characters become `_`, an empty
/// name becomes `PARAM`.
fn parameter_env_name(name: &str) -> String {
    let mut upper = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            upper.push(ch.to_ascii_uppercase());
        } else {
            upper.push('_');
        }
    }
    if upper.is_empty() {
        upper.push_str("PARAM");
    }
    format!("AGPM_HOOK_PARAM_{upper}")
}

/// Asynchronous dispatcher executing hook actions on one dedicated worker
/// task. Events queue on a bounded FIFO; overflow drops the event with a
/// warning.
pub struct HookDispatcher {
    settings: Arc<HookSettings>,
    tx: StdMutex<Option<mpsc::Sender<HookEvent>>>,
    worker: StdMutex<Option<JoinHandle<()>>>,
}

impl HookDispatcher {
    pub fn new(settings: HookSettings) -> Self {
        Self::with_runners(
            settings,
            Arc::new(ProcessCommandRunner),
            Arc::new(ReqwestHookRunner::new()),
        )
    }

    pub fn with_runners(
        settings: HookSettings,
        command_runner: Arc<dyn CommandRunner>,
        http_runner: Arc<dyn HttpRunner>,
    ) -> Self {
        let settings = Arc::new(settings);
        if !settings.enabled || !settings.has_actions() {
            if settings.enabled && !settings.has_actions() {
                warn!("hook dispatcher enabled without any configured actions");
            }
            return Self {
                settings,
                tx: StdMutex::new(None),
                worker: StdMutex::new(None),
            };
        }

        let (tx, mut rx) = mpsc::channel::<HookEvent>(QUEUE_CAPACITY);
        let worker_settings = settings.clone();
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                dispatch(&worker_settings, &*command_runner, &*http_runner, &event).await;
            }
        });

        Self {
            settings,
            tx: StdMutex::new(Some(tx)),
            worker: StdMutex::new(Some(worker)),
        }
    }

    pub fn settings(&self) -> &HookSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.tx.lock().unwrap().is_some()
    }

    pub fn enqueue(&self, name: impl Into<String>, data: serde_json::Value) {
        self.enqueue_event(HookEvent::new(name, data));
    }

    pub fn enqueue_event(&self, event: HookEvent) {
        let guard = self.tx.lock().unwrap();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        if let Err(err) = tx.try_send(event) {
            warn!(error = %err, "hook queue full; dropping event");
        }
    }

    /// Stops accepting events; the worker drains the queue and exits.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().unwrap().take());
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

fn extract_repository(event: &HookEvent) -> Option<String> {
    let owner = event.data.get("owner")?.as_str()?;
    let repo = event.data.get("repo")?.as_str()?;
    Some(format!("{owner}/{repo}"))
}

fn match_repository_override<'a>(
    settings: &'a HookSettings,
    event: &HookEvent,
) -> Option<&'a RepositoryHookSettings> {
    let slug = extract_repository(event)?;
    settings
        .repository_overrides
        .iter()
        .find(|entry| entry.matches(&slug))
}

async fn dispatch(
    settings: &HookSettings,
    command_runner: &dyn CommandRunner,
    http_runner: &dyn HttpRunner,
    event: &HookEvent,
) {
    let payload = json!({
        "event": event.name,
        "timestamp": event.timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        "data": event.data,
    });

    let matched = match_repository_override(settings, event);
    let mut enabled = settings.enabled;
    let mut defaults = &settings.default_actions;
    if let Some(entry) = matched {
        if let Some(flag) = entry.enabled {
            enabled = flag;
        }
        if let Some(actions) = &entry.default_actions {
            defaults = actions;
        }
    }
    if !enabled {
        debug!(event = %event.name, "hooks disabled for event");
        return;
    }

    let actions = matched
        .and_then(|entry| entry.event_actions.as_ref())
        .and_then(|map| map.get(&event.name))
        .or_else(|| settings.event_actions.get(&event.name))
        .unwrap_or(defaults);
    if actions.is_empty() {
        debug!(event = %event.name, "no hook actions configured for event");
        return;
    }

    for action in actions {
        let mut action_payload = payload.clone();
        if !action.parameters().is_empty() {
            let params: serde_json::Map<String, serde_json::Value> = action
                .parameters()
                .iter()
                .map(|(key, value)| (key.clone(), json!(value)))
                .collect();
            action_payload["parameters"] = serde_json::Value::Object(params);
        }
        let payload_str = action_payload.to_string();

        match action {
            HookAction::Command {
                command,
                parameters,
            } => match command_runner.run(command, parameters, event, &payload_str).await {
                Ok(0) => debug!(%command, "hook command executed"),
                Ok(code) => warn!(%command, code, "hook command exited nonzero"),
                Err(err) => error!(%command, error = %err, "hook command failed"),
            },
            HookAction::Http {
                endpoint,
                method,
                headers,
                ..
            } => match http_runner
                .run(endpoint, method, headers, event, &payload_str)
                .await
            {
                Ok(status) if (200..300).contains(&status) => {
                    debug!(%method, %endpoint, status, "hook http delivered")
                }
                Ok(status) => warn!(%method, %endpoint, status, "hook http returned error status"),
                Err(err) => error!(%method, %endpoint, error = %err, "hook http failed"),
            },
        }
    }
}
