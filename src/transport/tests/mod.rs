use super::*;
use crate::config::DEFAULT_USER_AGENT;
use crate::utils::gzip;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LOGIN_BODY: &str = "SID=sid\nLSID=lsid\nAuth=TOKEN123\n";

fn test_config(server: &str) -> Config {
    let mut config = Config::default();
    config.request.servers = vec![server.to_string()];
    config.request.timeout = Duration::from_secs(5);
    config.general.wait_time = Duration::from_millis(1);
    config.retry.rate_limit_cooldown = Duration::from_millis(10);
    config.retry.login_attempts = 2;
    config
}

fn credentials() -> Credentials {
    Credentials::new("me@example.com", "hunter2")
}

async fn mount_login(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/accounts/ClientLogin"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_BODY))
        .expect(expected_calls)
        .named("login")
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_posts_form_and_stores_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/accounts/ClientLogin"))
        .and(body_string_contains("Email=me%40example.com"))
        .and(body_string_contains("Passwd=hunter2"))
        .and(body_string_contains("service=reader"))
        .and(body_string_contains("accountType=HOSTED_OR_GOOGLE"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LOGIN_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = ReaderClient::new(&test_config(&server.uri()), CancellationToken::new());
    client.login(credentials()).await.unwrap();

    assert!(client.is_authenticated());
    assert!(client.has_credentials());

    let requests = server.received_requests().await.unwrap();
    assert!(
        requests[0].headers.get("authorization").is_none(),
        "login itself must not carry a session token"
    );
}

#[tokio::test]
async fn test_authenticated_request_carries_token_and_agent() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/reader/api/0/subscription/list"))
        .and(query_param("output", "json"))
        .and(header("authorization", "GoogleLogin auth=TOKEN123"))
        .and(header("user-agent", DEFAULT_USER_AGENT))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"subscriptions":[]}"#))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server.uri());
    let mut client = ReaderClient::new(&config, CancellationToken::new());
    client.login(credentials()).await.unwrap();

    let response = client
        .request(&ApiRequest::get(config.endpoints.subscription_list_path.clone()))
        .await
        .unwrap();

    assert!(response.is_success());
    assert_eq!(response.text(), r#"{"subscriptions":[]}"#);
}

#[tokio::test]
async fn test_unauthenticated_request_omits_token() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;

    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut client = ReaderClient::new(&test_config(&server.uri()), CancellationToken::new());
    client.login(credentials()).await.unwrap();
    client
        .request(&ApiRequest::get("/public").unauthenticated())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let public = requests
        .iter()
        .find(|r| r.url.path() == "/public")
        .unwrap();
    assert!(public.headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_login_rejected_clears_credentials() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/accounts/ClientLogin"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Error=BadAuthentication\n"))
        .mount(&server)
        .await;

    let mut client = ReaderClient::new(&test_config(&server.uri()), CancellationToken::new());
    let err = client.login(credentials()).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Auth(AuthError::Rejected { status: 403 })
    ));
    assert!(!client.is_authenticated());
    assert!(!client.has_credentials());
}

#[tokio::test]
async fn test_login_without_auth_line_is_token_missing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/accounts/ClientLogin"))
        .respond_with(ResponseTemplate::new(200).set_body_string("SID=sid\nLSID=lsid\n"))
        .mount(&server)
        .await;

    let mut client = ReaderClient::new(&test_config(&server.uri()), CancellationToken::new());
    let err = client.login(credentials()).await.unwrap_err();

    assert!(matches!(err, Error::Auth(AuthError::TokenMissing)));
    assert!(!client.has_credentials());
}

#[tokio::test]
async fn test_rate_limit_reauthenticates_once_and_keeps_budget() {
    let server = MockServer::start().await;
    // Initial login plus exactly one renewal
    mount_login(&server, 2).await;

    Mock::given(method("GET"))
        .and(path("/reader/atom/feed/x"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reader/atom/feed/x"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<feed/>"))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = ReaderClient::new(&test_config(&server.uri()), CancellationToken::new());
    client.login(credentials()).await.unwrap();

    // A single attempt would be spent by the first 503 if it counted
    let response = client
        .request(&ApiRequest::get("/reader/atom/feed/x").attempts(1))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"<feed/>");
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn test_rate_limited_login_retries_without_recursion() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/accounts/ClientLogin"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_login(&server, 1).await;

    let mut client = ReaderClient::new(&test_config(&server.uri()), CancellationToken::new());
    client.login(credentials()).await.unwrap();

    assert!(client.is_authenticated());
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_relogin_without_credentials_is_noop() {
    let server = MockServer::start().await;

    let mut client = ReaderClient::new(&test_config(&server.uri()), CancellationToken::new());
    client.relogin().await.unwrap();

    assert!(!client.is_authenticated());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_network_exhaustion_returns_status_zero() {
    // Nothing listens on port 1, so every attempt is refused
    let mut client = ReaderClient::new(
        &test_config("http://127.0.0.1:1"),
        CancellationToken::new(),
    );

    let response = client
        .request(&ApiRequest::get("/reader/atom/feed/x").attempts(3))
        .await
        .unwrap();

    assert_eq!(response, Response::failed());
    assert!(!response.is_success());
    assert!(response.body.is_empty());
}

/// Serve plain HTTP on a local port, dropping the first `drop_first` connections unanswered
///
/// Returns the base URL and a counter of accepted connections.
async fn flaky_server(drop_first: usize) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let seen = counter.fetch_add(1, Ordering::SeqCst);
            if seen < drop_first {
                drop(stream);
                continue;
            }
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Length: 9\r\nConnection: close\r\n\r\nrecovered",
                    )
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (format!("http://{addr}"), accepted)
}

#[tokio::test]
async fn test_dropped_connections_are_rebuilt_until_success() {
    let (uri, accepted) = flaky_server(2).await;
    let mut client = ReaderClient::new(&test_config(&uri), CancellationToken::new());

    let response = client
        .request(&ApiRequest::get("/reader/atom/feed/x").attempts(3))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "recovered");
    assert_eq!(accepted.load(Ordering::SeqCst), 3, "one fresh connection per attempt");
}

#[tokio::test]
async fn test_attempt_budget_bounds_connections() {
    let (uri, accepted) = flaky_server(usize::MAX).await;
    let mut client = ReaderClient::new(&test_config(&uri), CancellationToken::new());

    let response = client
        .request(&ApiRequest::get("/reader/atom/feed/x").attempts(4))
        .await
        .unwrap();

    assert_eq!(response, Response::failed());
    assert_eq!(accepted.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_no_wait_after_last_failed_attempt() {
    let mut config = test_config("http://127.0.0.1:1");
    config.general.wait_time = Duration::from_secs(30);
    let mut client = ReaderClient::new(&config, CancellationToken::new());

    let response = tokio::time::timeout(
        Duration::from_secs(10),
        client.request(&ApiRequest::get("/reader/atom/feed/x").attempts(1)),
    )
    .await
    .expect("a single failed attempt should return without pacing")
    .unwrap();

    assert_eq!(response, Response::failed());
}

#[tokio::test]
async fn test_gzip_responses_are_decompressed() {
    let server = MockServer::start().await;
    let page = "<feed><entry>hello</entry></feed>";

    Mock::given(method("GET"))
        .and(path("/reader/atom/feed/gz"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Encoding", "gzip")
                .set_body_bytes(gzip(page.as_bytes()).unwrap()),
        )
        .mount(&server)
        .await;

    let mut client = ReaderClient::new(&test_config(&server.uri()), CancellationToken::new());
    let response = client
        .request(&ApiRequest::get("/reader/atom/feed/gz"))
        .await
        .unwrap();

    assert_eq!(response.text(), page);

    let requests = server.received_requests().await.unwrap();
    let accept = requests[0]
        .headers
        .get("accept-encoding")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(accept.contains("gzip"), "gzip should be requested, got {accept:?}");
}

#[tokio::test]
async fn test_non_200_is_returned_not_raised() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reader/atom/feed/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let mut client = ReaderClient::new(&test_config(&server.uri()), CancellationToken::new());
    let response = client
        .request(&ApiRequest::get("/reader/atom/feed/missing"))
        .await
        .unwrap();

    assert_eq!(response.status, 404);
    assert_eq!(response.text(), "not found");
}

#[tokio::test]
async fn test_cancelled_client_refuses_requests() {
    let server = MockServer::start().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut client = ReaderClient::new(&test_config(&server.uri()), cancel);
    let result = client.request(&ApiRequest::get("/anything")).await;

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_interrupts_rate_limit_cooldown() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.retry.rate_limit_cooldown = Duration::from_secs(3600);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let mut client = ReaderClient::new(&config, cancel);
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        client.request(&ApiRequest::get("/busy")),
    )
    .await
    .expect("cooldown should end on cancel");

    assert!(matches!(result, Err(Error::Cancelled)));
}

#[test]
fn test_form_request_builder() {
    let request = ApiRequest::post_form("/login", [("a", "1"), ("b", "2")])
        .attempts(0)
        .unauthenticated();

    assert_eq!(request.path(), "/login");
    assert_eq!(request.max_attempts, Some(1));
    assert!(!request.require_auth);
    assert_eq!(
        request.form.as_deref(),
        Some(&[("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())][..])
    );
}
