mod backend;
mod runner;
mod server;

pub use backend::{GithubMcpBackend, McpBackend};
pub use runner::{McpServerOptions, McpServerRunner};
pub use server::McpServer;
