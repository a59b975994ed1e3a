use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use actix_web::{http::StatusCode, test, web, App};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use law_journal_domain::config::WorkflowConfig;
use law_journal_domain::model::{ArticleId, ArticleStatus, OutboundEmail, ProfileRecord, UserId};
use law_journal_domain::notification::{NotificationError, Notifier};
use law_journal_domain::services::{
    clock::ManualClock,
    telemetry::{init_telemetry, TelemetryConfig},
    workflow::Workflow,
};
use law_journal_domain::storage::{ArticleStore, ProfileStore};
use law_journal_mailer::UpiQrCodes;
use law_journal_storage::SeaOrmStorage;
use serde_json::{json, Value};

use crate::application::configure_routes;
use crate::auth::IDENTITY_HEADER;
use crate::handlers::{metrics_handler, Envelope};
use crate::state::AppState;

const ADMIN: &str = "editor-1";
const AUTHOR: &str = "author-1";
const STRANGER: &str = "reader-1";

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<OutboundEmail>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }

    fn last_token(&self) -> String {
        let email = self.sent().last().cloned().expect("an email was sent");
        let start = email.text_body.find("token=").expect("payment link") + "token=".len();
        email.text_body[start..start + 64].to_string()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotificationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotificationError::Transport("connection refused".into()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

struct TestContext {
    storage: SeaOrmStorage,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<ManualClock>,
    state: AppState,
}

fn profile(id: &str, is_admin: bool) -> ProfileRecord {
    ProfileRecord {
        user_id: UserId::parse(id).unwrap(),
        is_admin,
        email: format!("{id}@example.com"),
        display_name: id.replace('-', " "),
        editor_role: is_admin.then(|| "Managing Editor".to_string()),
        institution: None,
        display_order: None,
    }
}

async fn context() -> TestContext {
    let storage = SeaOrmStorage::builder()
        .database_url("sqlite::memory:")
        .max_connections(1)
        .build()
        .await
        .expect("storage inits");
    for record in [
        profile(ADMIN, true),
        profile(AUTHOR, false),
        profile(STRANGER, false),
    ] {
        storage.upsert_profile(record).await.unwrap();
    }

    let telemetry = init_telemetry(&TelemetryConfig::from_env("API_TEST")).expect("telemetry");
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap(),
    ));
    let config = WorkflowConfig::new(
        "https://journal.example",
        "Law Review",
        "journal@upi",
        "Law Review Trust",
        1500,
    );
    let workflow = Workflow::new(
        storage.clone(),
        notifier.clone(),
        Arc::new(UpiQrCodes::from_config(&config)),
        config,
    )
    .with_clock(clock.clone());
    let state = AppState::new(
        Arc::new(workflow),
        telemetry.clone(),
        telemetry.abuse_tracker(),
    );
    TestContext {
        storage,
        notifier,
        clock,
        state,
    }
}

macro_rules! service {
    ($ctx:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($ctx.state.clone()))
                .configure(configure_routes)
                .route("/metrics", web::get().to(metrics_handler)),
        )
        .await
    };
}

macro_rules! call {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status();
        let body: Envelope<Value> = test::read_body_json(resp).await;
        (status, body)
    }};
}

macro_rules! call_json {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status();
        let body: Value = test::read_body_json(resp).await;
        (status, body)
    }};
}

fn as_user(req: test::TestRequest, user: &str) -> test::TestRequest {
    req.insert_header((IDENTITY_HEADER, user))
}

fn submission() -> Value {
    json!({
        "title": "Judicial Review in Emergencies",
        "abstract": "An examination of how courts scrutinise executive action during declared emergencies.",
        "tags": ["Constitutional", "emergency", "constitutional"],
        "file_reference": "uploads/judicial-review.pdf"
    })
}

fn article_id(body: &Envelope<Value>) -> i64 {
    body.data.as_ref().unwrap()["id"].as_i64().unwrap()
}

#[actix_web::test]
async fn article_travels_from_submission_to_publication() {
    let ctx = context().await;
    let app = service!(ctx);

    let (status, body) = call!(
        app,
        as_user(test::TestRequest::post().uri("/articles"), AUTHOR).set_json(submission())
    );
    assert_eq!(status, StatusCode::CREATED);
    assert!(body.success);
    let data = body.data.clone().unwrap();
    assert_eq!(data["status"], "pending");
    assert_eq!(data["approved"], false);
    assert_eq!(data["tags"], json!(["constitutional", "emergency"]));
    let id = article_id(&body);
    let slug = data["slug"].as_str().unwrap().to_string();

    let (status, body) = call!(
        app,
        as_user(
            test::TestRequest::post().uri(&format!("/admin/articles/{id}/approve")),
            ADMIN
        )
    );
    assert_eq!(status, StatusCode::OK);
    let data = body.data.unwrap();
    assert_eq!(data["article"]["status"], "awaiting_payment");
    assert_eq!(data["article"]["approved"], true);
    assert!(data["expires_at"].as_str().unwrap().starts_with("2024-06-05T10:00:00"));
    let token = ctx.notifier.last_token();

    let (status, body) = call!(
        app,
        test::TestRequest::get().uri(&format!("/payment/validate-token?token={token}"))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.data.unwrap()["slug"], slug.as_str());

    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri("/payment/submit-utr")
            .set_json(json!({"token": token, "utr_number": "UTR123456"}))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.data.unwrap()["status"], "payment_submitted");

    let (status, body) = call!(
        app,
        as_user(
            test::TestRequest::post().uri(&format!("/admin/articles/{id}/verify-and-publish")),
            ADMIN
        )
    );
    assert_eq!(status, StatusCode::OK);
    let data = body.data.unwrap();
    assert_eq!(data["published"], true);
    assert_eq!(data["payment_done"], true);
    assert_eq!(data["utr_number"], "UTR123456");

    let (status, body) = call!(
        app,
        as_user(
            test::TestRequest::put().uri(&format!("/articles/{id}/feature")),
            ADMIN
        )
        .set_json(json!({"is_featured": true}))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.data.unwrap()["is_featured"], true);

    let (status, body) = call!(
        app,
        test::TestRequest::get().uri(&format!("/articles/{slug}"))
    );
    assert_eq!(status, StatusCode::OK);
    let data = body.data.unwrap();
    assert_eq!(data["status"], "published");
    assert!(data.get("utr_number").is_none());

    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri("/payment/submit-utr")
            .set_json(json!({"token": token, "utr_number": "UTR999999"}))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!body.success);
    assert_eq!(body.error.as_deref(), Some("payment token has already been used"));

    let emails_before = ctx.notifier.sent().len();
    let (status, body) = call!(
        app,
        as_user(
            test::TestRequest::post().uri(&format!("/admin/articles/{id}/reject")),
            ADMIN
        )
        .set_json(json!({"rejection_reason": "Withdrawn after publication."}))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!body.success);
    let stored = ctx
        .storage
        .find_article(ArticleId::new(id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ArticleStatus::Published);
    assert_eq!(stored.rejection_reason, None);
    assert_eq!(ctx.notifier.sent().len(), emails_before);

    let (status, body) = call!(
        app,
        as_user(
            test::TestRequest::get().uri(&format!("/admin/articles/{id}/history")),
            ADMIN
        )
    );
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<Value> = body
        .data
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["action"].clone())
        .collect();
    assert_eq!(
        actions,
        vec![
            json!("approve"),
            json!("submit_utr"),
            json!("verify_and_publish"),
            json!("feature")
        ]
    );
}

#[actix_web::test]
async fn admin_routes_require_identity_and_admin_profile() {
    let ctx = context().await;
    let app = service!(ctx);

    let (status, body) = call!(app, test::TestRequest::post().uri("/admin/articles/1/approve"));
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!body.success);

    let (status, _) = call!(
        app,
        as_user(test::TestRequest::post().uri("/admin/articles/1/approve"), AUTHOR)
    );
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call!(
        app,
        as_user(test::TestRequest::post().uri("/admin/articles/1/approve"), "nobody")
    );
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call!(
        app,
        as_user(test::TestRequest::post().uri("/admin/articles/999/approve"), ADMIN)
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn short_rejection_reason_leaves_article_untouched() {
    let ctx = context().await;
    let app = service!(ctx);
    let (_, body) = call!(
        app,
        as_user(test::TestRequest::post().uri("/articles"), AUTHOR).set_json(submission())
    );
    let id = article_id(&body);

    let (status, body) = call!(
        app,
        as_user(
            test::TestRequest::post().uri(&format!("/admin/articles/{id}/reject")),
            ADMIN
        )
        .set_json(json!({"rejection_reason": "too short"}))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.error.unwrap().contains("rejection_reason"));
    let stored = ctx
        .storage
        .find_article(ArticleId::new(id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ArticleStatus::Pending);
    assert!(ctx.notifier.sent().is_empty());

    let (status, body) = call!(
        app,
        as_user(
            test::TestRequest::post().uri(&format!("/admin/articles/{id}/reject")),
            ADMIN
        )
        .set_json(json!({"rejection_reason": "Out of scope for this issue."}))
    );
    assert_eq!(status, StatusCode::OK);
    let data = body.data.unwrap();
    assert_eq!(data["status"], "rejected");
    assert_eq!(data["rejection_reason"], "Out of scope for this issue.");
    assert_eq!(ctx.notifier.sent().len(), 1);
}

#[actix_web::test]
async fn malformed_input_is_a_json_bad_request() {
    let ctx = context().await;
    let app = service!(ctx);

    let (status, body) = call!(
        app,
        as_user(test::TestRequest::post().uri("/articles"), AUTHOR)
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!body.success);

    let (status, _) = call!(
        app,
        as_user(test::TestRequest::post().uri("/admin/articles/abc/approve"), ADMIN)
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call!(
        app,
        test::TestRequest::get().uri("/payment/validate-token?token=abc")
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.error.unwrap().contains("token"));

    let unknown = "ab".repeat(32);
    let (status, _) = call!(
        app,
        test::TestRequest::get().uri(&format!("/payment/validate-token?token={unknown}"))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn expired_token_is_refused_and_article_stays_awaiting_payment() {
    let ctx = context().await;
    let app = service!(ctx);
    let (_, body) = call!(
        app,
        as_user(test::TestRequest::post().uri("/articles"), AUTHOR).set_json(submission())
    );
    let id = article_id(&body);
    call!(
        app,
        as_user(
            test::TestRequest::post().uri(&format!("/admin/articles/{id}/approve")),
            ADMIN
        )
    );
    let token = ctx.notifier.last_token();

    ctx.clock.advance(Duration::hours(48));
    let (status, body) = call!(
        app,
        test::TestRequest::post()
            .uri("/payment/submit-utr")
            .set_json(json!({"token": token, "utr_number": "UTR123456"}))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.error.as_deref(), Some("payment token has expired"));
    let stored = ctx
        .storage
        .find_article(ArticleId::new(id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ArticleStatus::AwaitingPayment);
    assert_eq!(stored.utr_number, None);

    let (status, body) = call_json!(
        app,
        as_user(
            test::TestRequest::post().uri(&format!("/admin/articles/{id}/resend-approval")),
            ADMIN
        )
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["expires_at"]
        .as_str()
        .unwrap()
        .starts_with("2024-06-07T10:00:00"));
    assert_eq!(body["expires_at"], body["data"]["expires_at"]);
    let fresh = ctx.notifier.last_token();
    assert_ne!(fresh, token);
    let (status, _) = call!(
        app,
        test::TestRequest::get().uri(&format!("/payment/validate-token?token={fresh}"))
    );
    assert_eq!(status, StatusCode::OK);
}

#[actix_web::test]
async fn publishing_before_payment_is_refused() {
    let ctx = context().await;
    let app = service!(ctx);
    let (_, body) = call!(
        app,
        as_user(test::TestRequest::post().uri("/articles"), AUTHOR).set_json(submission())
    );
    let id = article_id(&body);
    let slug = body.data.unwrap()["slug"].as_str().unwrap().to_string();

    let (status, _) = call!(
        app,
        as_user(
            test::TestRequest::post().uri(&format!("/admin/articles/{id}/verify-and-publish")),
            ADMIN
        )
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call!(
        app,
        test::TestRequest::get().uri(&format!("/articles/{slug}"))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn failed_email_returns_saved_data_with_warning() {
    let ctx = context().await;
    let app = service!(ctx);
    let (_, body) = call!(
        app,
        as_user(test::TestRequest::post().uri("/articles"), AUTHOR).set_json(submission())
    );
    let id = article_id(&body);

    ctx.notifier.fail.store(true, Ordering::SeqCst);
    let (status, body) = call!(
        app,
        as_user(
            test::TestRequest::post().uri(&format!("/admin/articles/{id}/approve")),
            ADMIN
        )
    );
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body.success);
    assert!(body.warning.is_some());
    assert_eq!(body.data.unwrap()["article"]["status"], "awaiting_payment");
    let stored = ctx
        .storage
        .find_article(ArticleId::new(id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ArticleStatus::AwaitingPayment);
}

#[actix_web::test]
async fn co_author_invites_are_limited_to_the_author() {
    let ctx = context().await;
    let app = service!(ctx);
    let (_, body) = call!(
        app,
        as_user(test::TestRequest::post().uri("/articles"), AUTHOR).set_json(submission())
    );
    let id = article_id(&body);
    let invite = json!({"email": "co.author@example.org", "name": "Asha Rao"});

    let (status, _) = call!(
        app,
        as_user(
            test::TestRequest::post().uri(&format!("/articles/{id}/co-authors")),
            STRANGER
        )
        .set_json(invite.clone())
    );
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(ctx.notifier.sent().is_empty());

    for email in ["a@@b.com", "not-an-address", "first last@example.org"] {
        let (status, body) = call!(
            app,
            as_user(
                test::TestRequest::post().uri(&format!("/articles/{id}/co-authors")),
                AUTHOR
            )
            .set_json(json!({"email": email, "name": "Asha Rao"}))
        );
        assert_eq!(status, StatusCode::BAD_REQUEST, "{email}");
        assert!(body.error.unwrap().contains("email"));
    }
    assert!(ctx.notifier.sent().is_empty());

    let (status, body) = call!(
        app,
        as_user(
            test::TestRequest::post().uri(&format!("/articles/{id}/co-authors")),
            AUTHOR
        )
        .set_json(invite)
    );
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body.data.unwrap()["recipient"], "co.author@example.org");
    let sent = ctx.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "co.author@example.org");
}

#[actix_web::test]
async fn metrics_endpoint_renders_prometheus_text() {
    let ctx = context().await;
    let app = service!(ctx);
    call!(
        app,
        as_user(test::TestRequest::post().uri("/articles"), AUTHOR).set_json(submission())
    );

    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("workflow_transitions_total"));
}

#[actix_web::test]
async fn approval_response_repeats_expiry_at_top_level() {
    let ctx = context().await;
    let app = service!(ctx);
    let (_, body) = call!(
        app,
        as_user(test::TestRequest::post().uri("/articles"), AUTHOR).set_json(submission())
    );
    let id = article_id(&body);

    let (status, body) = call_json!(
        app,
        as_user(
            test::TestRequest::post().uri(&format!("/admin/articles/{id}/approve")),
            ADMIN
        )
    );
    assert_eq!(status, StatusCode::OK);
    assert!(body["expires_at"]
        .as_str()
        .unwrap()
        .starts_with("2024-06-05T10:00:00"));
    assert_eq!(body["expires_at"], body["data"]["expires_at"]);
    assert_eq!(body["data"]["article"]["status"], "awaiting_payment");
}

#[actix_web::test]
async fn token_of_rejected_article_no_longer_validates() {
    let ctx = context().await;
    let app = service!(ctx);
    let (_, body) = call!(
        app,
        as_user(test::TestRequest::post().uri("/articles"), AUTHOR).set_json(submission())
    );
    let id = article_id(&body);
    call!(
        app,
        as_user(
            test::TestRequest::post().uri(&format!("/admin/articles/{id}/approve")),
            ADMIN
        )
    );
    let token = ctx.notifier.last_token();

    let (status, _) = call!(
        app,
        as_user(
            test::TestRequest::post().uri(&format!("/admin/articles/{id}/reject")),
            ADMIN
        )
        .set_json(json!({"rejection_reason": "Payment window withdrawn by the board."}))
    );
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call!(
        app,
        test::TestRequest::get().uri(&format!("/payment/validate-token?token={token}"))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!body.success);
    assert!(body.data.is_none());
}

#[actix_web::test]
async fn short_submission_fields_are_named_in_the_error() {
    let ctx = context().await;
    let app = service!(ctx);
    let mut draft = submission();
    draft["abstract"] = json!("Too brief.");

    let (status, body) = call!(
        app,
        as_user(test::TestRequest::post().uri("/articles"), AUTHOR).set_json(draft)
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body.error.as_deref(),
        Some("invalid abstract: must be at least 50 characters")
    );
}
