//! End-to-end: start the bot on a free port, post activities to /api/messages,
//! and check what reaches a mock Bot Connector.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use mockito::Matcher;
use serde_json::json;
use teams_echo_bot::auth::BOT_FRAMEWORK_ISSUER;
use teams_echo_bot::config::Config;
use teams_echo_bot::server;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn config(pairs: &[(&str, String)]) -> Config {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    Config::from_lookup(|key| vars.get(key).cloned()).expect("valid config")
}

/// Spawns the server and waits until /api/health answers. Returns the base URL.
async fn start(config: Config) -> String {
    let base = format!("http://127.0.0.1:{}", config.port);
    tokio::spawn(async move {
        let _ = server::run(config).await;
    });

    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(format!("{}/api/health", base)).send().await {
            if resp.status().is_success() {
                return base;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server at {} did not become healthy within 5s", base);
}

fn message(service_url: &str, text: &str) -> serde_json::Value {
    json!({
        "type": "message",
        "id": "act-1",
        "serviceUrl": service_url,
        "channelId": "msteams",
        "from": { "id": "29:user", "name": "Ada" },
        "conversation": { "id": "conv-1" },
        "recipient": { "id": "28:bot", "name": "Echo" },
        "text": text
    })
}

async fn assert_echo(text: &str) {
    let mut connector = mockito::Server::new_async().await;
    let reply = connector
        .mock("POST", "/v3/conversations/conv-1/activities/act-1")
        .match_body(Matcher::PartialJson(json!({
            "type": "message",
            "text": text,
            "replyToId": "act-1",
            "from": { "id": "28:bot" },
            "recipient": { "id": "29:user" }
        })))
        .with_status(200)
        .with_body(r#"{"id":"reply-1"}"#)
        .expect(1)
        .create_async()
        .await;

    let base = start(config(&[("PORT", free_port().to_string())])).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/messages", base))
        .json(&message(&connector.url(), text))
        .send()
        .await
        .expect("post activity");

    assert!(resp.status().is_success(), "status {}", resp.status());
    reply.assert_async().await;
}

#[tokio::test]
async fn hello_is_echoed() {
    assert_echo("hello").await;
}

#[tokio::test]
async fn empty_text_is_echoed() {
    assert_echo("").await;
}

#[tokio::test]
async fn conversation_update_sends_nothing() {
    let mut connector = mockito::Server::new_async().await;
    let any = connector
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let base = start(config(&[("PORT", free_port().to_string())])).await;
    let mut activity = message(&connector.url(), "ignored");
    activity["type"] = json!("conversationUpdate");

    let resp = reqwest::Client::new()
        .post(format!("{}/api/messages", base))
        .json(&activity)
        .send()
        .await
        .expect("post activity");

    assert_eq!(resp.status().as_u16(), 200);
    any.assert_async().await;
}

const SIGNING_KEY: &str = include_str!("fixtures/signing_key.pem");
const JWKS: &str = include_str!("fixtures/jwks.json");

/// A Bot Framework style inbound token signed with the fixture key.
fn inbound_token(audience: &str, service_url: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs();
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("test-key".to_string());
    encode(
        &header,
        &json!({
            "iss": BOT_FRAMEWORK_ISSUER,
            "aud": audience,
            "exp": now + 3600,
            "serviceurl": service_url,
        }),
        &EncodingKey::from_rsa_pem(SIGNING_KEY.as_bytes()).expect("fixture key"),
    )
    .expect("sign token")
}

/// Mocks the OpenID metadata and JWKS endpoints on `server`.
async fn serve_keys(server: &mut mockito::ServerGuard) -> (mockito::Mock, mockito::Mock) {
    let jwks_uri = format!("{}/keys", server.url());
    let metadata = server
        .mock("GET", "/openid")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "jwks_uri": jwks_uri }).to_string())
        .create_async()
        .await;
    let jwks = server
        .mock("GET", "/keys")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(JWKS)
        .create_async()
        .await;
    (metadata, jwks)
}

fn secured_config(mock_url: &str) -> Config {
    config(&[
        ("PORT", free_port().to_string()),
        ("CLIENT_ID", "app-id".to_string()),
        ("CLIENT_SECRET", "secret".to_string()),
        ("TENANT_ID", "tenant-1".to_string()),
        ("LOGIN_URL", mock_url.to_string()),
        ("OPENID_METADATA_URL", format!("{}/openid", mock_url)),
        ("TRUSTED_SERVICE_HOSTS", "127.0.0.1".to_string()),
    ])
}

#[tokio::test]
async fn authenticated_reply_uses_client_credentials() {
    let mut mock = mockito::Server::new_async().await;
    let _keys = serve_keys(&mut mock).await;
    let token = mock
        .mock("POST", "/tenant-1/oauth2/v2.0/token")
        .match_body(Matcher::UrlEncoded("client_id".into(), "app-id".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"token_type":"Bearer","expires_in":3600,"access_token":"tok-1"}"#)
        .expect(1)
        .create_async()
        .await;
    let reply = mock
        .mock("POST", "/v3/conversations/conv-1/activities/act-1")
        .match_header("authorization", "Bearer tok-1")
        .with_status(200)
        .expect(2)
        .create_async()
        .await;

    let base = start(secured_config(&mock.url())).await;
    let inbound = inbound_token("app-id", &mock.url());

    let client = reqwest::Client::new();
    for text in ["one", "two"] {
        let resp = client
            .post(format!("{}/api/messages", base))
            .bearer_auth(&inbound)
            .json(&message(&mock.url(), text))
            .send()
            .await
            .expect("post activity");
        assert!(resp.status().is_success(), "status {}", resp.status());
    }

    token.assert_async().await;
    reply.assert_async().await;
}

#[tokio::test]
async fn unauthenticated_caller_cannot_redirect_the_bot() {
    let mut mock = mockito::Server::new_async().await;
    let _keys = serve_keys(&mut mock).await;
    let token = mock
        .mock("POST", "/tenant-1/oauth2/v2.0/token")
        .expect(0)
        .create_async()
        .await;
    let mut attacker = mockito::Server::new_async().await;
    let stolen = attacker
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let base = start(secured_config(&mock.url())).await;
    let client = reqwest::Client::new();

    let anonymous = client
        .post(format!("{}/api/messages", base))
        .json(&message(&attacker.url(), "hello"))
        .send()
        .await
        .expect("post activity");
    assert_eq!(anonymous.status().as_u16(), 401);

    let wrong_audience = client
        .post(format!("{}/api/messages", base))
        .bearer_auth(inbound_token("other-app", &attacker.url()))
        .json(&message(&attacker.url(), "hello"))
        .send()
        .await
        .expect("post activity");
    assert_eq!(wrong_audience.status().as_u16(), 401);

    let other_service_url = client
        .post(format!("{}/api/messages", base))
        .bearer_auth(inbound_token("app-id", &mock.url()))
        .json(&message(&attacker.url(), "hello"))
        .send()
        .await
        .expect("post activity");
    assert_eq!(other_service_url.status().as_u16(), 401);

    token.assert_async().await;
    stolen.assert_async().await;
}

#[tokio::test]
async fn connector_failure_returns_500() {
    let mut connector = mockito::Server::new_async().await;
    let _reply = connector
        .mock("POST", "/v3/conversations/conv-1/activities/act-1")
        .with_status(502)
        .create_async()
        .await;

    let base = start(config(&[("PORT", free_port().to_string())])).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/messages", base))
        .json(&message(&connector.url(), "hello"))
        .send()
        .await
        .expect("post activity");

    assert_eq!(resp.status().as_u16(), 500);
    let body: serde_json::Value = resp.json().await.expect("error JSON");
    assert!(body["error"].as_str().unwrap_or_default().contains("502"));
}

#[tokio::test]
async fn assistant_mode_answers_with_model_output() {
    let mut mock = mockito::Server::new_async().await;
    let completion = mock
        .mock("POST", "/openai/deployments/gpt-4o/chat/completions")
        .match_query(Matcher::UrlEncoded("api-version".into(), "2024-06-01".into()))
        .match_header("api-key", "key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Hi Ada"}}]}"#)
        .create_async()
        .await;
    let typing = mock
        .mock("POST", "/v3/conversations/conv-1/activities/act-1")
        .match_body(Matcher::PartialJson(json!({ "type": "typing" })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let reply = mock
        .mock("POST", "/v3/conversations/conv-1/activities/act-1")
        .match_body(Matcher::PartialJson(json!({ "type": "message", "text": "Hi Ada" })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let base = start(config(&[
        ("PORT", free_port().to_string()),
        ("BOT_MODE", "assistant".to_string()),
        ("AZURE_OPENAI_ENDPOINT", format!("{}/", mock.url())),
        ("AZURE_OPENAI_API_KEY", "key".to_string()),
        ("AZURE_OPENAI_DEPLOYMENT", "gpt-4o".to_string()),
        ("AZURE_OPENAI_API_VERSION", "2024-06-01".to_string()),
    ]))
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/messages", base))
        .json(&message(&mock.url(), "hello"))
        .send()
        .await
        .expect("post activity");

    assert!(resp.status().is_success());
    completion.assert_async().await;
    typing.assert_async().await;
    reply.assert_async().await;
}
