mod support;

use gh_client::{GitHubClientOptions, HttpCache};
use support::{make_client_with, reply, reply_with_headers, ScriptedTransport};

fn temp_cache(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("agpm-etag-{}-{}.json", name, std::process::id()))
}

#[tokio::test]
async fn second_get_sends_if_none_match_and_reuses_body() {
    let transport = ScriptedTransport::new();
    transport.push(reply_with_headers(
        200,
        r#"[{"number":1,"title":"t","created_at":"2021-01-01T00:00:00Z"}]"#,
        &[("ETag", "abc")],
    ));
    transport.push(reply(304, ""));
    let client = make_client_with(
        transport.clone(),
        GitHubClientOptions::default(),
        HttpCache::in_memory(),
    );

    let first = client.list_pull_requests("o", "r", false, 0, None).await;
    assert_eq!(first.len(), 1);
    let second = client.list_pull_requests("o", "r", false, 0, None).await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].number, first[0].number);

    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    let validator = calls[1]
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("If-None-Match"))
        .map(|(_, v)| v.clone());
    assert_eq!(validator.as_deref(), Some("abc"));
}

#[tokio::test]
async fn cache_survives_restart_and_serves_304_bodies() {
    let path = temp_cache("restart");
    let _ = std::fs::remove_file(&path);

    {
        let transport = ScriptedTransport::new();
        transport.push(reply_with_headers(
            200,
            r#"[{"number":1,"title":"t"}]"#,
            &[("ETag", "abc")],
        ));
        let client = make_client_with(
            transport,
            GitHubClientOptions::default(),
            HttpCache::load(&path),
        );
        let prs = client.list_pull_requests("o", "r", false, 0, None).await;
        assert_eq!(prs.len(), 1);
        client.flush_cache();
    }

    // New process: same GET against a server answering 304 returns the
    // original body and presents the persisted validator.
    let transport = ScriptedTransport::new();
    transport.push(reply(304, ""));
    let client = make_client_with(
        transport.clone(),
        GitHubClientOptions::default(),
        HttpCache::load(&path),
    );
    let prs = client.list_pull_requests("o", "r", false, 0, None).await;
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0].number, 1);
    let validator = transport.calls()[0]
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("If-None-Match"))
        .map(|(_, v)| v.clone());
    assert_eq!(validator.as_deref(), Some("abc"));

    std::fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn responses_without_etag_are_not_cached() {
    let transport = ScriptedTransport::new();
    transport.push(reply(200, "[]"));
    transport.push(reply(200, "[]"));
    let client = make_client_with(
        transport.clone(),
        GitHubClientOptions::default(),
        HttpCache::in_memory(),
    );
    client.list_pull_requests("o", "r", false, 0, None).await;
    client.list_pull_requests("o", "r", false, 0, None).await;
    let calls = transport.calls();
    assert!(calls[1]
        .headers
        .iter()
        .all(|(k, _)| !k.eq_ignore_ascii_case("If-None-Match")));
}

#[tokio::test]
async fn flusher_persists_entries_in_background() {
    let path = temp_cache("flusher");
    let _ = std::fs::remove_file(&path);
    let transport = ScriptedTransport::new();
    transport.push(reply_with_headers(200, "[]", &[("ETag", "xyz")]));
    let client = make_client_with(
        transport,
        GitHubClientOptions::default(),
        HttpCache::load(&path),
    );
    client.set_cache_flush_interval(std::time::Duration::from_millis(10));
    client.list_pull_requests("o", "r", false, 0, None).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    client.shutdown().await;

    let reloaded = HttpCache::load(&path);
    assert!(!reloaded.is_empty());
    std::fs::remove_file(&path).unwrap();
}
