mod support;

use support::{make_client, reply, ScriptedTransport};

#[tokio::test(start_paused = true)]
async fn server_errors_are_retried_until_success() {
    let transport = ScriptedTransport::new();
    transport.push(reply(500, ""));
    transport.push(reply(500, ""));
    transport.push(reply(200, r#"[{"number":1,"title":"PR"}]"#));
    let client = make_client(transport.clone());

    let prs = client.list_pull_requests("o", "r", false, 0, None).await;
    assert_eq!(prs.len(), 1);
    assert_eq!(transport.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_budget_is_finite() {
    let transport = ScriptedTransport::new();
    for _ in 0..10 {
        transport.push(reply(502, ""));
    }
    let client = make_client(transport.clone());
    let prs = client.list_pull_requests("o", "r", false, 0, None).await;
    assert!(prs.is_empty());
    // initial attempt + default 3 retries
    assert_eq!(transport.calls().len(), 4);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let transport = ScriptedTransport::new();
    transport.push(reply(400, ""));
    let client = make_client(transport.clone());
    let prs = client.list_pull_requests("o", "r", false, 0, None).await;
    assert!(prs.is_empty());
    assert_eq!(transport.calls().len(), 1);

    let transport = ScriptedTransport::new();
    transport.push(reply(404, ""));
    let client = make_client(transport.clone());
    let prs = client.list_pull_requests("o", "r", false, 0, None).await;
    assert!(prs.is_empty());
    assert_eq!(transport.calls().len(), 1);
}
