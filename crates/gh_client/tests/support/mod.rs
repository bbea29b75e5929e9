#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gh_client::{
    GhError, GitHubClient, GitHubClientOptions, GovernorConfig, HttpCache, HttpTransport,
    RateGovernor, TransportReply,
};

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    #[allow(dead_code)]
    pub body: String,
}

enum Script {
    Reply(TransportReply),
    Error(String),
}

/// Transport double: either pops queued replies in order or answers from a
/// URL-keyed table; records every call it sees.
#[derive(Default)]
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Script>>,
    by_url: Mutex<HashMap<String, TransportReply>>,
    calls: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, reply: TransportReply) {
        self.queue.lock().unwrap().push_back(Script::Reply(reply));
    }

    pub fn push_error(&self, message: &str) {
        self.queue
            .lock()
            .unwrap()
            .push_back(Script::Error(message.to_string()));
    }

    pub fn set(&self, url: &str, reply: TransportReply) {
        self.by_url.lock().unwrap().insert(url.to_string(), reply);
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_with_method(&self, method: &str) -> Vec<Recorded> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }

    fn answer(&self, method: &str, url: &str, headers: &[(String, String)], body: &str) -> Result<TransportReply, GhError> {
        self.calls.lock().unwrap().push(Recorded {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.to_vec(),
            body: body.to_string(),
        });
        if let Some(script) = self.queue.lock().unwrap().pop_front() {
            return match script {
                Script::Reply(reply) => Ok(reply),
                Script::Error(message) => Err(GhError::Transport(message)),
            };
        }
        if let Some(reply) = self.by_url.lock().unwrap().get(url) {
            return Ok(reply.clone());
        }
        Ok(reply(200, "{}"))
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<TransportReply, GhError> {
        self.answer("GET", url, headers, "")
    }

    async fn put(
        &self,
        url: &str,
        body: &str,
        headers: &[(String, String)],
    ) -> Result<TransportReply, GhError> {
        self.answer("PUT", url, headers, body)
    }

    async fn post(
        &self,
        url: &str,
        body: &str,
        headers: &[(String, String)],
    ) -> Result<TransportReply, GhError> {
        self.answer("POST", url, headers, body)
    }

    async fn patch(
        &self,
        url: &str,
        body: &str,
        headers: &[(String, String)],
    ) -> Result<TransportReply, GhError> {
        self.answer("PATCH", url, headers, body)
    }

    async fn delete(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<TransportReply, GhError> {
        self.answer("DELETE", url, headers, "")
    }
}

pub fn reply(status: u16, body: &str) -> TransportReply {
    TransportReply {
        status,
        headers: Vec::new(),
        body: body.to_string(),
    }
}

pub fn reply_with_headers(status: u16, body: &str, headers: &[(&str, &str)]) -> TransportReply {
    TransportReply {
        status,
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: body.to_string(),
    }
}

pub fn make_client(transport: Arc<ScriptedTransport>) -> GitHubClient {
    make_client_with(transport, GitHubClientOptions::default(), HttpCache::in_memory())
}

pub fn make_client_with(
    transport: Arc<ScriptedTransport>,
    options: GitHubClientOptions,
    cache: HttpCache,
) -> GitHubClient {
    let governor = Arc::new(RateGovernor::new(GovernorConfig::default()));
    GitHubClient::new(transport, governor, cache, "tok", options)
}
