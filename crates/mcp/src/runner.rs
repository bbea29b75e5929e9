use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::net::{TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::server::McpServer;

#[derive(Debug, Clone)]
pub struct McpServerOptions {
    pub bind_address: String,
    pub port: u16,
    pub backlog: u32,
    /// Connections handled before the listener stops; 0 keeps it open.
    pub max_clients: u32,
}

impl Default for McpServerOptions {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 7332,
            backlog: 16,
            max_clients: 4,
        }
    }
}

type EventSink = Box<dyn Fn(&str) + Send + Sync>;

/// Owns the TCP listener for an [`McpServer`]: sequential connections, line
/// framing, a `max_clients` budget, and an event sink mirroring listener
/// activity as human-readable strings.
pub struct McpServerRunner {
    server: Arc<McpServer>,
    options: McpServerOptions,
    cancel: CancellationToken,
    handle: StdMutex<Option<JoinHandle<()>>>,
    sink: Arc<StdMutex<Option<EventSink>>>,
    local_addr: Arc<StdMutex<Option<SocketAddr>>>,
}

impl McpServerRunner {
    pub fn new(server: Arc<McpServer>, options: McpServerOptions) -> Self {
        Self {
            server,
            options,
            cancel: CancellationToken::new(),
            handle: StdMutex::new(None),
            sink: Arc::new(StdMutex::new(None)),
            local_addr: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn set_event_sink<F>(&self, sink: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.sink.lock().unwrap() = Some(Box::new(sink));
    }

    /// The bound address once started; useful when the configured port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Binds the listener and spawns the accept loop.
    pub async fn start(&self) -> std::io::Result<()> {
        if self.handle.lock().unwrap().is_some() {
            return Ok(());
        }
        self.server.reset();

        let bind_ip = if self.options.bind_address.is_empty() || self.options.bind_address == "*" {
            "0.0.0.0".to_string()
        } else {
            self.options.bind_address.clone()
        };
        let addr: SocketAddr = match format!("{}:{}", bind_ip, self.options.port).parse() {
            Ok(addr) => addr,
            Err(_) => {
                emit_to(
                    &self.sink,
                    &format!(
                        "Invalid MCP bind address '{}'; falling back to 0.0.0.0",
                        self.options.bind_address
                    ),
                );
                format!("0.0.0.0:{}", self.options.port).parse().unwrap()
            }
        };

        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(self.options.backlog.max(1))?;
        let local = listener.local_addr()?;
        *self.local_addr.lock().unwrap() = Some(local);
        emit_to(&self.sink, &format!("Listening on {}:{}", local.ip(), local.port()));

        let server = self.server.clone();
        let sink = self.sink.clone();
        let cancel = self.cancel.clone();
        let max_clients = self.options.max_clients;
        let handle = tokio::spawn(async move {
            let mut handled: u32 = 0;
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        emit_to(&sink, &format!("accept failed: {err}"));
                        continue;
                    }
                };
                emit_to(&sink, &format!("client connected: {peer}"));
                if let Err(err) = serve_connection(&server, stream, &cancel).await {
                    emit_to(&sink, &format!("connection error: {err}"));
                }
                emit_to(&sink, "client disconnected");
                handled += 1;
                if !server.running() {
                    break;
                }
                if max_clients > 0 && handled >= max_clients {
                    emit_to(&sink, "Maximum client budget reached; stopping MCP listener");
                    break;
                }
            }
            emit_to(&sink, "MCP server listener stopped");
        });
        *self.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn running(&self) -> bool {
        self.handle.lock().unwrap().is_some()
    }

    /// Closes the listener (unblocking accept) and joins the loop.
    /// Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn serve_connection(
    server: &McpServer,
    stream: TcpStream,
    cancel: &CancellationToken,
) -> std::io::Result<()> {
    let (reader, writer) = stream.into_split();
    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("connection aborted by shutdown");
            Ok(())
        }
        result = server.run_lines(reader, writer) => result,
    }
}

fn emit_to(sink: &Arc<StdMutex<Option<EventSink>>>, message: &str) {
    debug!("{message}");
    let guard = sink.lock().unwrap();
    if let Some(sink) = guard.as_ref() {
        sink(message);
    }
}
