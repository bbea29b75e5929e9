mod support;

use std::time::Duration;

use support::{make_client, reply, reply_with_headers, ScriptedTransport};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn exhausted_budget_defers_the_next_call_until_reset() {
    let reset = chrono::Utc::now().timestamp() + 2;
    let transport = ScriptedTransport::new();
    transport.push(reply_with_headers(
        403,
        "",
        &[
            ("X-RateLimit-Remaining", "0"),
            ("X-RateLimit-Reset", &reset.to_string()),
        ],
    ));
    transport.push(reply(200, "[]"));
    let client = make_client(transport.clone());

    let start = Instant::now();
    client.list_pull_requests("o", "r", false, 0, None).await;
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(transport.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn retry_after_header_is_honored() {
    let transport = ScriptedTransport::new();
    transport.push(reply_with_headers(429, "", &[("Retry-After", "1")]));
    transport.push(reply(200, "[]"));
    let client = make_client(transport.clone());

    let start = Instant::now();
    client.list_pull_requests("o", "r", false, 0, None).await;
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(transport.calls().len(), 2);
}

#[tokio::test]
async fn forbidden_without_rate_headers_is_not_retried() {
    let transport = ScriptedTransport::new();
    transport.push(reply(403, ""));
    let client = make_client(transport.clone());
    let prs = client.list_pull_requests("o", "r", false, 0, None).await;
    assert!(prs.is_empty());
    assert_eq!(transport.calls().len(), 1);
}
