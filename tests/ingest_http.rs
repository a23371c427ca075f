//! Integration tests for the HTTP surface.
//!
//! Each test spins up the Axum app on a random port next to local webhook
//! receivers and drives the real HTTP contract with reqwest.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::timeout;

use tempmail::api::{self, AppState};
use tempmail::config::AppConfig;
use tempmail::store::{Database, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fan-out timeout used by the app under test.
const FANOUT_TIMEOUT: Duration = Duration::from_millis(300);

type Received = Arc<Mutex<Vec<Value>>>;

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://{addr}")
}

/// Start the app with one mailbox, return (base url, db).
async fn start_app(config: AppConfig) -> (String, Arc<dyn Database>) {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    db.create_mailbox("inbox@temp.test", "session-1", false)
        .await
        .unwrap();
    let app = api::routes(AppState::new(Arc::clone(&db), config));
    (serve(app).await, db)
}

fn test_config() -> AppConfig {
    AppConfig {
        fallback_domains: vec!["temp.test".into()],
        fanout_timeout: FANOUT_TIMEOUT,
        ..AppConfig::default()
    }
}

/// Receiver that records every payload.
async fn counting_receiver() -> (String, Received) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route(
            "/hook",
            post(|State(store): State<Received>, Json(body): Json<Value>| async move {
                store.lock().await.push(body);
                StatusCode::OK
            }),
        )
        .with_state(Arc::clone(&received));
    (format!("{}/hook", serve(app).await), received)
}

/// Receiver that always answers 500.
async fn failing_receiver() -> String {
    let app = Router::new().route("/hook", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    format!("{}/hook", serve(app).await)
}

/// Receiver that answers well after the fan-out timeout.
async fn sleeping_receiver() -> String {
    let app = Router::new().route(
        "/hook",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            StatusCode::OK
        }),
    );
    format!("{}/hook", serve(app).await)
}

async fn wait_for(received: &Received, count: usize) -> Vec<Value> {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let seen = received.lock().await.clone();
        if seen.len() >= count || Instant::now() > deadline {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn post_json(url: &str, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(url)
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_fan_out_isolated_from_failing_and_slow_hooks() {
    timeout(TEST_TIMEOUT, async {
        let (base, db) = start_app(test_config()).await;
        let (good, received) = counting_receiver().await;
        db.create_webhook(&good, "good", None).await.unwrap();
        db.create_webhook(&failing_receiver().await, "failing", None)
            .await
            .unwrap();
        db.create_webhook(&sleeping_receiver().await, "slow", None)
            .await
            .unwrap();
        db.create_webhook(&good, "other-recipient", Some("someone@else.test"))
            .await
            .unwrap();

        let started = Instant::now();
        let (status, json) = post_json(
            &format!("{base}/functions/v1/email-webhook"),
            json!({
                "to": [{"address": "Inbox@Temp.test", "name": "Inbox"}],
                "from": {"address": "alice@example.com", "name": "Alice"},
                "subject": "Hello",
                "text": "x".repeat(800),
                "messageId": "<m1@example.com>",
            }),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(json["success"], true);
        assert!(json["email_id"].is_string());
        // The sleeping hook must not hold up the response.
        assert!(started.elapsed() < Duration::from_secs(2));

        let seen = wait_for(&received, 1).await;
        assert_eq!(seen.len(), 1, "filtered hook must not fire");
        let event = &seen[0];
        assert_eq!(event["event"], "new_email");
        assert_eq!(event["to"], "inbox@temp.test");
        assert_eq!(event["from_name"], "Alice");
        assert_eq!(event["body_text"].as_str().unwrap().chars().count(), 500);

        assert_eq!(db.count_messages().await.unwrap(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_duplicate_delivery_stored_once() {
    timeout(TEST_TIMEOUT, async {
        let (base, db) = start_app(test_config()).await;
        let (hook, received) = counting_receiver().await;
        db.create_webhook(&hook, "good", None).await.unwrap();

        let body = json!({
            "to": "inbox@temp.test",
            "from": "a@example.com",
            "message_id": "<dup@example.com>",
            "html": "<p>hi</p>",
        });
        let url = format!("{base}/webhook/email");
        let (status, first) = post_json(&url, body.clone()).await;
        assert_eq!(status, 200);
        assert!(first.get("duplicate").is_none());

        let (status, second) = post_json(&url, body).await;
        assert_eq!(status, 200);
        assert_eq!(second["duplicate"], true);
        assert_eq!(second["message_id"], "<dup@example.com>");

        assert_eq!(db.count_messages().await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(wait_for(&received, 1).await.len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_rejections() {
    timeout(TEST_TIMEOUT, async {
        let (base, db) = start_app(test_config()).await;
        let url = format!("{base}/functions/v1/email-webhook");

        let (status, json) = post_json(&url, json!({"to": "ghost@temp.test", "from": "a@x.test"})).await;
        assert_eq!(status, 404);
        assert_eq!(json["error"], "Recipient email not found");

        let (status, json) = post_json(&url, json!({"to": "inbox@temp.test", "body": "x"})).await;
        assert_eq!(status, 400);
        assert_eq!(json["received"], json!(["body", "to"]));

        assert_eq!(db.count_messages().await.unwrap(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_webhook_secret() {
    timeout(TEST_TIMEOUT, async {
        let config = AppConfig {
            webhook_secret: Some("edge-secret".to_string().into()),
            ..test_config()
        };
        let (base, _db) = start_app(config).await;
        let url = format!("{base}/functions/v1/email-webhook");
        let body = json!({"to": "inbox@temp.test", "from": "a@x.test"});

        let (status, _) = post_json(&url, body.clone()).await;
        assert_eq!(status, 401);

        let response = reqwest::Client::new()
            .post(&url)
            .header("x-webhook-secret", "edge-secret")
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_client_reads_delivered_mail() {
    timeout(TEST_TIMEOUT, async {
        let (base, _db) = start_app(test_config()).await;
        let api_url = format!("{base}/functions/v1/tempmail");

        let (_, created) = post_json(&api_url, json!({"action": "create"})).await;
        let token = created["session_token"].as_str().unwrap().to_string();
        let address = created["email"].as_str().unwrap().to_string();

        let (status, _) = post_json(
            &format!("{base}/functions/v1/email-webhook"),
            json!({
                "to": address,
                "from": "news@example.com",
                "from_name": "News",
                "subject": "Weekly",
                "html": "<style>p{}</style><p>Top&nbsp;story</p>",
            }),
        )
        .await;
        assert_eq!(status, 200);

        let (status, inbox) =
            post_json(&api_url, json!({"action": "inbox", "session_token": token})).await;
        assert_eq!(status, 200);
        let messages = inbox["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert_eq!(msg["recipient_email"], address.as_str());
        assert_eq!(msg["preview"], "Top story");
        assert_eq!(msg["is_read"], false);

        let id = msg["id"].as_str().unwrap();
        let (status, _) = post_json(
            &api_url,
            json!({"action": "mark_read", "session_token": token, "email_id": id}),
        )
        .await;
        assert_eq!(status, 200);

        // Another session cannot touch the message.
        let (status, _) = post_json(
            &api_url,
            json!({"action": "delete_message", "session_token": "intruder", "email_id": id}),
        )
        .await;
        assert_eq!(status, 404);

        let (status, _) = post_json(
            &api_url,
            json!({"action": "delete_message", "session_token": token, "email_id": id}),
        )
        .await;
        assert_eq!(status, 200);

        let index: Value = reqwest::get(&api_url).await.unwrap().json().await.unwrap();
        assert_eq!(index["stats"]["total_messages"], 0);
        assert_eq!(index["stats"]["active_emails"], 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_health_and_cleanup() {
    timeout(TEST_TIMEOUT, async {
        let (base, _db) = start_app(test_config()).await;

        let health: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");

        let (status, json) = post_json(&format!("{base}/functions/v1/cleanup-emails"), json!({})).await;
        assert_eq!(status, 200);
        assert_eq!(json["deleted_messages"], 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn test_admin_provisioning() {
    timeout(TEST_TIMEOUT, async {
        let config = AppConfig {
            admin_token: Some("adm1n".to_string().into()),
            ..test_config()
        };
        let (base, db) = start_app(config).await;
        let api_url = format!("{base}/functions/v1/tempmail");

        let (status, json) = post_json(&api_url, json!({"action": "admin_domains_list"})).await;
        assert_eq!(status, 401);
        assert_eq!(json["error"], "Unauthorized");
        let (status, _) = post_json(
            &api_url,
            json!({"action": "admin_domains_list", "admin_token": "wrong"}),
        )
        .await;
        assert_eq!(status, 401);

        let (status, json) = post_json(
            &api_url,
            json!({"action": "admin_domains_add", "admin_token": "adm1n", "domain_name": "Mail.Test"}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(json["domain"], "mail.test");
        let (status, _) = post_json(
            &api_url,
            json!({"action": "admin_domains_add", "admin_token": "adm1n", "domain_name": "mail.test"}),
        )
        .await;
        assert_eq!(status, 400);
        let (_, domains) = post_json(&api_url, json!({"action": "domains"})).await;
        assert_eq!(domains["domains"], json!(["mail.test"]));

        let (hook, received) = counting_receiver().await;
        let (status, json) = post_json(
            &api_url,
            json!({"action": "admin_webhooks_add", "admin_token": "adm1n", "webhook_url": hook, "webhook_label": "ops"}),
        )
        .await;
        assert_eq!(status, 200);
        let webhook_id = json["webhook"]["id"].as_str().unwrap().to_string();
        let (status, _) = post_json(
            &api_url,
            json!({"action": "admin_webhooks_add", "admin_token": "adm1n", "webhook_url": "ftp://x.test"}),
        )
        .await;
        assert_eq!(status, 400);

        let (status, created) = post_json(
            &api_url,
            json!({"action": "admin_create", "admin_token": "adm1n", "email_username": "support"}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(created["email"], "support@mail.test");
        assert_eq!(created["is_protected"], true);
        let token = created["session_token"].as_str().unwrap().to_string();

        let (status, _) = post_json(
            &format!("{base}/functions/v1/email-webhook"),
            json!({"to": "support@mail.test", "from": "a@example.com", "subject": "Help"}),
        )
        .await;
        assert_eq!(status, 200);
        let seen = wait_for(&received, 1).await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["to"], "support@mail.test");

        let (status, _) =
            post_json(&api_url, json!({"action": "delete", "session_token": token})).await;
        assert_eq!(status, 403);

        let (status, json) = post_json(
            &api_url,
            json!({"action": "admin_webhooks_toggle", "admin_token": "adm1n", "webhook_id": webhook_id}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(json["is_active"], false);
        assert!(db.list_active_webhooks().await.unwrap().is_empty());
        let (_, listed) = post_json(
            &api_url,
            json!({"action": "admin_webhooks_list", "admin_token": "adm1n"}),
        )
        .await;
        assert_eq!(listed["webhooks"].as_array().unwrap().len(), 1);
    })
    .await
    .expect("test timed out");
}
