mod support;

use support::{make_client, reply, reply_with_headers, ScriptedTransport};

const BASE: &str = "https://api.github.com/repos/me/repo";

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn purges_closed_pr_heads_matching_prefix() {
    let transport = ScriptedTransport::new();
    transport.push(reply(
        200,
        r#"[{"head":{"ref":"tmp/feature"}},{"head":{"ref":"keep"}}]"#,
    ));
    let client = make_client(transport.clone());
    client.cleanup_branches("me", "repo", "tmp/", &[], &[]).await;

    let calls = transport.calls();
    assert!(calls[0].url.contains("state=closed"));
    let deletes = transport.calls_with_method("DELETE");
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].url, format!("{BASE}/git/refs/heads/tmp%2Ffeature"));
}

#[tokio::test]
async fn protected_branches_survive_purge() {
    let transport = ScriptedTransport::new();
    transport.push(reply(200, r#"[{"head":{"ref":"tmp/protected"}}]"#));
    let client = make_client(transport.clone());
    client
        .cleanup_branches("me", "repo", "tmp/", &strings(&["tmp/*"]), &[])
        .await;
    assert!(transport.calls_with_method("DELETE").is_empty());
}

#[tokio::test]
async fn protection_excludes_release_individual_branches() {
    let transport = ScriptedTransport::new();
    transport.push(reply(
        200,
        r#"[{"head":{"ref":"tmp/safe"}},{"head":{"ref":"tmp/remove"}}]"#,
    ));
    let client = make_client(transport.clone());
    client
        .cleanup_branches(
            "me",
            "repo",
            "tmp/",
            &strings(&["tmp/*"]),
            &strings(&["tmp/remove"]),
        )
        .await;
    let deletes = transport.calls_with_method("DELETE");
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].url, format!("{BASE}/git/refs/heads/tmp%2Fremove"));
}

#[tokio::test]
async fn purge_follows_paginated_closed_pulls() {
    let transport = ScriptedTransport::new();
    transport.push(reply_with_headers(
        200,
        r#"[{"head":{"ref":"keep"}}]"#,
        &[(
            "Link",
            "<https://api.github.com/repos/me/repo/pulls?state=closed&page=2>; rel=\"next\"",
        )],
    ));
    transport.push(reply(200, r#"[{"head":{"ref":"tmp/paged"}}]"#));
    let client = make_client(transport.clone());
    client.cleanup_branches("me", "repo", "tmp/", &[], &[]).await;
    let deletes = transport.calls_with_method("DELETE");
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].url, format!("{BASE}/git/refs/heads/tmp%2Fpaged"));
}

#[tokio::test]
async fn identical_branches_are_left_alone() {
    let transport = ScriptedTransport::new();
    transport.set(BASE, reply(200, r#"{"default_branch":"main"}"#));
    transport.set(
        &format!("{BASE}/branches"),
        reply(200, r#"[{"name":"main"},{"name":"feature"}]"#),
    );
    transport.set(
        &format!("{BASE}/compare/main...feature"),
        reply(200, r#"{"status":"identical"}"#),
    );
    let client = make_client(transport.clone());
    client.close_dirty_branches("me", "repo", &[], &[]).await;
    assert!(transport.calls_with_method("DELETE").is_empty());
}

#[tokio::test]
async fn dirty_branches_are_deleted() {
    let transport = ScriptedTransport::new();
    transport.set(BASE, reply(200, r#"{"default_branch":"main"}"#));
    transport.set(
        &format!("{BASE}/branches"),
        reply(200, r#"[{"name":"main"},{"name":"feature"}]"#),
    );
    transport.set(
        &format!("{BASE}/compare/main...feature"),
        reply(200, r#"{"status":"ahead","ahead_by":1}"#),
    );
    let client = make_client(transport.clone());
    client.close_dirty_branches("me", "repo", &[], &[]).await;
    let deletes = transport.calls_with_method("DELETE");
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].url, format!("{BASE}/git/refs/heads/feature"));
}

#[tokio::test]
async fn dirty_branch_protection_variants() {
    // Literal glob protects the branch.
    for (patterns, excludes, expect_delete) in [
        (strings(&["feat*"]), vec![], false),
        (strings(&["regex:^feat.*"]), vec![], false),
        (strings(&["feature"]), strings(&["feature"]), true),
    ] {
        let transport = ScriptedTransport::new();
        transport.set(BASE, reply(200, r#"{"default_branch":"main"}"#));
        transport.set(
            &format!("{BASE}/branches"),
            reply(200, r#"[{"name":"main"},{"name":"feature"}]"#),
        );
        transport.set(
            &format!("{BASE}/compare/main...feature"),
            reply(200, r#"{"status":"ahead","ahead_by":1}"#),
        );
        let client = make_client(transport.clone());
        client
            .close_dirty_branches("me", "repo", &patterns, &excludes)
            .await;
        let deletes = transport.calls_with_method("DELETE");
        assert_eq!(
            deletes.len(),
            usize::from(expect_delete),
            "patterns {patterns:?} excludes {excludes:?}"
        );
    }
}

#[tokio::test]
async fn dirty_branch_on_later_page_is_found() {
    let transport = ScriptedTransport::new();
    transport.set(BASE, reply(200, r#"{"default_branch":"main"}"#));
    transport.set(
        &format!("{BASE}/branches"),
        reply_with_headers(
            200,
            r#"[{"name":"main"},{"name":"feature1"}]"#,
            &[(
                "Link",
                "<https://api.github.com/repos/me/repo/branches?page=2>; rel=\"next\"",
            )],
        ),
    );
    transport.set(
        &format!("{BASE}/branches?page=2"),
        reply(200, r#"[{"name":"feature2"}]"#),
    );
    transport.set(
        &format!("{BASE}/compare/main...feature1"),
        reply(200, r#"{"status":"identical"}"#),
    );
    transport.set(
        &format!("{BASE}/compare/main...feature2"),
        reply(200, r#"{"status":"ahead","ahead_by":1}"#),
    );
    let client = make_client(transport.clone());
    client.close_dirty_branches("me", "repo", &[], &[]).await;
    let deletes = transport.calls_with_method("DELETE");
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].url, format!("{BASE}/git/refs/heads/feature2"));
}

#[tokio::test]
async fn literal_patterns_require_exact_match_for_delete_branch() {
    let transport = ScriptedTransport::new();
    let client = make_client(transport.clone());

    let pattern = strings(&["release/1.2.3"]);
    assert!(
        !client
            .delete_branch("me", "repo", "release/1.2.3", &pattern, &[])
            .await
    );
    assert!(transport.calls_with_method("DELETE").is_empty());

    assert!(
        client
            .delete_branch("me", "repo", "release/1.2.30", &pattern, &[])
            .await
    );
    let deletes = transport.calls_with_method("DELETE");
    assert_eq!(
        deletes[0].url,
        format!("{BASE}/git/refs/heads/release%2F1.2.30")
    );
}

#[tokio::test]
async fn regex_patterns_keep_full_match_semantics() {
    let transport = ScriptedTransport::new();
    let client = make_client(transport.clone());

    let pattern = strings(&[r"regex:^release/[0-9]+\.[0-9]+\.[0-9]+$"]);
    assert!(
        !client
            .delete_branch("me", "repo", "release/1.2.3", &pattern, &[])
            .await
    );
    assert!(
        client
            .delete_branch("me", "repo", "release/v1.2.3", &pattern, &[])
            .await
    );
    let deletes = transport.calls_with_method("DELETE");
    assert_eq!(deletes.len(), 1);
    assert_eq!(
        deletes[0].url,
        format!("{BASE}/git/refs/heads/release%2Fv1.2.3")
    );
}
