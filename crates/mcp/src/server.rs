use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::backend::McpBackend;

pub type EventCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Line-delimited JSON-RPC 2.0 server. Requests without an `id` are
/// notifications and never produce a response line.
pub struct McpServer {
    backend: Arc<dyn McpBackend>,
    running: AtomicBool,
    event_callback: StdMutex<Option<EventCallback>>,
}

impl McpServer {
    pub fn new(backend: Arc<dyn McpBackend>) -> Self {
        Self {
            backend,
            running: AtomicBool::new(true),
            event_callback: StdMutex::new(None),
        }
    }

    /// Returns the server to an accepting state (used when restarting the
    /// listener).
    pub fn reset(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.event_callback.lock().unwrap() = Some(Box::new(callback));
    }

    fn emit(&self, message: &str) {
        let guard = self.event_callback.lock().unwrap();
        if let Some(callback) = guard.as_ref() {
            callback(message);
        }
    }

    pub fn make_error(id: Value, code: i64, message: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message},
        })
    }

    fn make_result(id: Value, result: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "result": result})
    }

    /// Processes one JSON-RPC request object; `None` means no response line
    /// is emitted (notification).
    pub async fn handle_request(&self, request: &Value) -> Option<Value> {
        if !request.is_object() {
            self.emit("reject: request not an object");
            return Some(Self::make_error(Value::Null, -32600, "Invalid request object"));
        }
        let has_id = request.get("id").is_some();
        let id = request.get("id").cloned().unwrap_or(Value::Null);

        let method = match request.get("method").and_then(|m| m.as_str()) {
            Some(method) => method.to_string(),
            None => {
                self.emit("reject: missing method");
                if !has_id {
                    warn!("missing method name in notification");
                    return None;
                }
                return Some(Self::make_error(id, -32600, "Missing method name"));
            }
        };

        let respond_error = |server: &Self, id: Value, code: i64, message: &str| -> Option<Value> {
            server.emit(&format!("method={method} error({code}): {message}"));
            if !has_id {
                warn!(method = %method, code, message, "notification error suppressed");
                return None;
            }
            Some(Self::make_error(id, code, message))
        };

        let params = match request.get("params") {
            Some(params) if !params.is_object() => {
                return respond_error(self, id, -32602, "Parameters must be an object");
            }
            Some(params) => params.clone(),
            None => json!({}),
        };

        match method.as_str() {
            "initialize" => {
                if !has_id {
                    self.emit("method=initialize notification ignored");
                    return None;
                }
                self.emit("method=initialize ok");
                Some(Self::make_result(
                    id,
                    json!({
                        "protocolVersion": "0.1",
                        "capabilities": {
                            "repositories": true,
                            "pullRequests": true,
                            "branches": true,
                        },
                    }),
                ))
            }
            "ping" => {
                if !has_id {
                    self.emit("method=ping notification");
                    return None;
                }
                self.emit("method=ping ok");
                Some(Self::make_result(id, json!({"message": "pong"})))
            }
            "shutdown" => {
                self.running.store(false, Ordering::SeqCst);
                if !has_id {
                    self.emit("method=shutdown acknowledged (notification)");
                    return None;
                }
                self.emit("method=shutdown acknowledged");
                Some(Self::make_result(id, json!({"acknowledged": true})))
            }
            "listRepositories" => {
                let repos = self.backend.list_repositories().await;
                let result: Vec<Value> = repos
                    .iter()
                    .map(|repo| {
                        json!({
                            "owner": repo.owner,
                            "name": repo.name,
                            "slug": repo.slug(),
                        })
                    })
                    .collect();
                self.emit(&format!("method=listRepositories count={}", result.len()));
                if !has_id {
                    return None;
                }
                Some(Self::make_result(id, json!({"repositories": result})))
            }
            "listBranches" => {
                let (Some(owner), Some(repo)) = (
                    params.get("owner").and_then(|o| o.as_str()),
                    params.get("repo").and_then(|r| r.as_str()),
                ) else {
                    return respond_error(self, id.clone(), -32602, "owner and repo must be strings");
                };
                let branches = self.backend.list_branches(owner, repo).await;
                self.emit(&format!("method=listBranches count={}", branches.len()));
                if !has_id {
                    return None;
                }
                Some(Self::make_result(id, json!({"branches": branches})))
            }
            "listPullRequests" => {
                let (Some(owner), Some(repo)) = (
                    params.get("owner").and_then(|o| o.as_str()),
                    params.get("repo").and_then(|r| r.as_str()),
                ) else {
                    return respond_error(self, id.clone(), -32602, "owner and repo must be strings");
                };
                let include_merged = match params.get("includeMerged") {
                    None => false,
                    Some(Value::Bool(flag)) => *flag,
                    Some(_) => {
                        return respond_error(self, id.clone(), -32602, "includeMerged must be a boolean");
                    }
                };
                let prs = self
                    .backend
                    .list_pull_requests(owner, repo, include_merged)
                    .await;
                let result: Vec<Value> = prs
                    .iter()
                    .map(|pr| {
                        json!({
                            "number": pr.number,
                            "title": pr.title,
                            "merged": pr.merged,
                            "owner": pr.owner,
                            "repo": pr.repo,
                        })
                    })
                    .collect();
                self.emit(&format!("method=listPullRequests count={}", result.len()));
                if !has_id {
                    return None;
                }
                Some(Self::make_result(id, json!({"pullRequests": result})))
            }
            "mergePullRequest" | "closePullRequest" => {
                let (Some(owner), Some(repo)) = (
                    params.get("owner").and_then(|o| o.as_str()),
                    params.get("repo").and_then(|r| r.as_str()),
                ) else {
                    return respond_error(self, id.clone(), -32602, "owner and repo must be strings");
                };
                let Some(number) = params.get("number").and_then(|n| n.as_u64()) else {
                    return respond_error(self, id.clone(), -32602, "number must be an integer");
                };
                let merged = method == "mergePullRequest";
                let ok = if merged {
                    self.backend.merge_pull_request(owner, repo, number).await
                } else {
                    self.backend.close_pull_request(owner, repo, number).await
                };
                if !ok {
                    return respond_error(
                        self,
                        id,
                        -32001,
                        if merged {
                            "Merge rejected by backend"
                        } else {
                            "Close rejected by backend"
                        },
                    );
                }
                self.emit(&format!(
                    "method={method} success owner={owner} repo={repo} number={number}"
                ));
                if !has_id {
                    return None;
                }
                if merged {
                    Some(Self::make_result(id, json!({"merged": true})))
                } else {
                    Some(Self::make_result(id, json!({"closed": true})))
                }
            }
            "deleteBranch" => {
                let (Some(owner), Some(repo)) = (
                    params.get("owner").and_then(|o| o.as_str()),
                    params.get("repo").and_then(|r| r.as_str()),
                ) else {
                    return respond_error(self, id.clone(), -32602, "owner and repo must be strings");
                };
                let Some(branch) = params.get("branch").and_then(|b| b.as_str()) else {
                    return respond_error(self, id.clone(), -32602, "branch must be a string");
                };
                if !self.backend.delete_branch(owner, repo, branch).await {
                    return respond_error(self, id.clone(), -32002, "Branch deletion rejected by backend");
                }
                self.emit(&format!(
                    "method=deleteBranch success owner={owner} repo={repo} branch={branch}"
                ));
                if !has_id {
                    return None;
                }
                Some(Self::make_result(id, json!({"deleted": true})))
            }
            _ => respond_error(self, id, -32601, "Method not found"),
        }
    }

    /// Reads one JSON object per line from `reader` and writes responses to
    /// `writer` until shutdown or EOF. Trailing carriage returns are
    /// tolerated; notifications emit nothing.
    pub async fn run_lines<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: tokio::io::AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.reset();
        let mut lines = BufReader::new(reader).lines();
        while self.running() {
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            self.emit(&format!("request: {line}"));
            let response = match serde_json::from_str::<Value>(line) {
                Ok(request) => self.handle_request(&request).await,
                Err(err) => {
                    self.emit(&format!("parse error: {err}"));
                    Some(Self::make_error(Value::Null, -32700, &err.to_string()))
                }
            };
            if let Some(response) = response {
                let mut serialized = response.to_string();
                self.emit(&format!("response: {serialized}"));
                serialized.push('\n');
                writer.write_all(serialized.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }
}
