//! REST client against an in-process fake of the service API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};

use artemis_bot::artemis::ArtemisClient;
use artemis_bot::config::Credentials;
use artemis_bot::AppError;

/// JWT-shaped token expiring `lifetime_secs` from now.
fn token_expiring_in(lifetime_secs: i64, serial: usize) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS512"}"#);
    let exp = chrono::Utc::now().timestamp() + lifetime_secs;
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": "ab12cde", "exp": exp }).to_string());
    format!("{header}.{payload}.sig{serial}")
}

struct FakeArtemis {
    login_status: StdMutex<StatusCode>,
    send_cookie: StdMutex<bool>,
    token_lifetime_secs: StdMutex<i64>,
    logins: AtomicUsize,
    login_bodies: StdMutex<Vec<Value>>,
    issued: StdMutex<Vec<String>>,
    detail_cookies: StdMutex<Vec<String>>,
}

impl FakeArtemis {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            login_status: StdMutex::new(StatusCode::OK),
            send_cookie: StdMutex::new(true),
            token_lifetime_secs: StdMutex::new(3600),
            logins: AtomicUsize::new(0),
            login_bodies: StdMutex::new(Vec::new()),
            issued: StdMutex::new(Vec::new()),
            detail_cookies: StdMutex::new(Vec::new()),
        })
    }

    fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

async fn authenticate(State(fake): State<Arc<FakeArtemis>>, Json(body): Json<Value>) -> Response {
    let serial = fake.logins.fetch_add(1, Ordering::SeqCst) + 1;
    fake.login_bodies.lock().unwrap().push(body);

    let status = *fake.login_status.lock().unwrap();
    if status != StatusCode::OK {
        return status.into_response();
    }
    if !*fake.send_cookie.lock().unwrap() {
        return StatusCode::OK.into_response();
    }

    let token = token_expiring_in(*fake.token_lifetime_secs.lock().unwrap(), serial);
    fake.issued.lock().unwrap().push(token.clone());
    (
        StatusCode::OK,
        [(
            header::SET_COOKIE,
            format!("jwt={token}; Path=/; HttpOnly; SameSite=Lax"),
        )],
    )
        .into_response()
}

async fn details(
    State(fake): State<Arc<FakeArtemis>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(cookie) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        fake.detail_cookies.lock().unwrap().push(cookie.to_owned());
    }

    match id.as_str() {
        "401" => StatusCode::UNAUTHORIZED.into_response(),
        "403" => StatusCode::FORBIDDEN.into_response(),
        "404" => StatusCode::NOT_FOUND.into_response(),
        "500" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        "502" => StatusCode::BAD_GATEWAY.into_response(),
        _ => Json(json!({
            "id": 345,
            "title": "Sorting",
            "studentParticipations": [{
                "repositoryUri": "https://git.example.org/scm/sort/sort-ab12cde.git",
                "branch": "main",
                "participantName": "Jane Student",
                "participantIdentifier": "ab12cde",
                "results": [
                    { "id": 7, "score": 61.9 },
                    { "id": 3, "score": 90.0 }
                ]
            }]
        }))
        .into_response(),
    }
}

/// Serve the fake on an ephemeral port and return the REST base.
async fn start(fake: &Arc<FakeArtemis>) -> String {
    let router = Router::new()
        .route("/api/public/authenticate", post(authenticate))
        .route("/api/exercises/{id}/details", get(details))
        .with_state(Arc::clone(fake));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}/api")
}

fn client(api_base: &str) -> ArtemisClient {
    ArtemisClient::new(
        api_base,
        Credentials {
            username: "ab12cde".into(),
            password: "hunter2".into(),
        },
    )
    .expect("client builds")
}

#[tokio::test]
async fn login_reads_the_token_cookie() {
    let fake = FakeArtemis::new();
    let client = client(&start(&fake).await);

    let token = client.authenticate().await.expect("login succeeds");

    assert_eq!(token.raw(), fake.issued.lock().unwrap()[0]);
    assert!(token.expires_at().is_some());
    assert!(token.is_fresh());
    assert_eq!(
        fake.login_bodies.lock().unwrap()[0],
        json!({ "username": "ab12cde", "password": "hunter2", "rememberMe": true })
    );
}

#[tokio::test]
async fn rejected_login_is_unauthorized() {
    for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
        let fake = FakeArtemis::new();
        *fake.login_status.lock().unwrap() = status;
        let client = client(&start(&fake).await);

        let err = client.authenticate().await.expect_err("login rejected");
        assert!(matches!(err, AppError::Unauthorized(_)), "{status}: {err}");
        assert!(err.is_fatal());
    }
}

#[tokio::test]
async fn failing_login_service_is_recoverable() {
    let fake = FakeArtemis::new();
    *fake.login_status.lock().unwrap() = StatusCode::SERVICE_UNAVAILABLE;
    let client = client(&start(&fake).await);

    let err = client.authenticate().await.expect_err("login fails");
    assert!(matches!(err, AppError::Http(_)));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn login_without_cookie_is_an_http_error() {
    let fake = FakeArtemis::new();
    *fake.send_cookie.lock().unwrap() = false;
    let client = client(&start(&fake).await);

    assert!(matches!(client.authenticate().await, Err(AppError::Http(_))));
}

#[tokio::test]
async fn details_carry_the_token_cookie() {
    let fake = FakeArtemis::new();
    let client = client(&start(&fake).await);

    let details = client.exercise_details("345").await.expect("details");
    let resolved = details.resolve().expect("participation");

    assert_eq!(details.title, "Sorting");
    assert_eq!(resolved.most_recent_score, 61);
    assert_eq!(resolved.participant_identifier, "ab12cde");
    let issued = fake.issued.lock().unwrap()[0].clone();
    assert_eq!(*fake.detail_cookies.lock().unwrap(), vec![format!("jwt={issued}")]);
}

#[tokio::test]
async fn detail_statuses_map_to_error_classes() {
    let fake = FakeArtemis::new();
    let client = client(&start(&fake).await);

    assert!(matches!(client.exercise_details("404").await, Err(AppError::NotFound(_))));
    assert!(matches!(client.exercise_details("401").await, Err(AppError::Unauthorized(_))));
    assert!(matches!(client.exercise_details("403").await, Err(AppError::Unauthorized(_))));

    for id in ["500", "502"] {
        let err = client.exercise_details(id).await.expect_err("server error");
        assert!(matches!(err, AppError::Http(_)), "{id}: {err}");
        assert!(!err.is_fatal());
    }
}

#[tokio::test]
async fn fresh_token_is_reused() {
    let fake = FakeArtemis::new();
    let client = client(&start(&fake).await);

    client.exercise_details("345").await.expect("first lookup");
    client.exercise_details("345").await.expect("second lookup");

    assert_eq!(fake.logins(), 1);
    let cookies = fake.detail_cookies.lock().unwrap().clone();
    assert_eq!(cookies[0], cookies[1]);
}

#[tokio::test]
async fn token_inside_the_refresh_margin_triggers_a_new_login() {
    let fake = FakeArtemis::new();
    *fake.token_lifetime_secs.lock().unwrap() = 10;
    let client = client(&start(&fake).await);

    let first = client.token().await.expect("first token");
    assert!(!first.is_fresh());
    let second = client.token().await.expect("second token");

    assert_eq!(fake.logins(), 2);
    assert_ne!(first.raw(), second.raw());
}

#[tokio::test]
async fn concurrent_refreshes_share_one_login() {
    let fake = FakeArtemis::new();
    let client = client(&start(&fake).await);

    let (a, b, c) = tokio::join!(client.token(), client.token(), client.token());

    assert_eq!(fake.logins(), 1);
    assert_eq!(a.expect("token").raw(), b.expect("token").raw());
    assert!(c.is_ok());
}
