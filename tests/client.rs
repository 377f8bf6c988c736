use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::Query,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chemnitz_explorer::{
    api::{Backend, ParkingNearQuery, SiteQuery},
    auth::AuthService,
    config::Config,
    errors::ApiError,
    http::ApiClient,
    models::{AuthToken, Category, ParkingType, User},
    session::{AuthState, Session},
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

fn user_json() -> Value {
    json!({
        "id": "u1",
        "email": "anna@example.org",
        "first_name": "Anna",
        "last_name": "Berger",
        "is_active": true,
        "is_admin": false,
        "created_at": "2025-05-01T10:00:00"
    })
}

fn detail(status: StatusCode, detail: &str) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["email"] == "anna@example.org" && body["password"] == "secret1" {
        Json(json!({
            "access_token": "good",
            "token_type": "bearer",
            "user": user_json(),
        }))
        .into_response()
    } else {
        detail(StatusCode::UNAUTHORIZED, "Incorrect email or password")
    }
}

async fn me(headers: HeaderMap) -> Response {
    match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some("Bearer good") => Json(user_json()).into_response(),
        Some("Bearer slow") => {
            tokio::time::sleep(Duration::from_millis(300)).await;
            detail(StatusCode::UNAUTHORIZED, "Could not validate credentials")
        }
        _ => detail(StatusCode::UNAUTHORIZED, "Could not validate credentials"),
    }
}

async fn cultural_sites(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let category = params.get("category").cloned().unwrap_or_default();
    Json(json!({
        "sites": [{
            "_id": "s1",
            "name": "Opernhaus",
            "category": category,
            "location": { "type": "Point", "coordinates": [12.9264, 50.8357] },
            "source": params.get("source"),
        }],
        "total": 1,
    }))
}

async fn parking_lots() -> Response {
    detail(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch parking lots")
}

async fn parking_near(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    Json(json!({
        "parking_lots": [{
            "id": "p1",
            "name": format!(
                "within {} / {}",
                params.get("radius").cloned().unwrap_or_default(),
                params.get("max_distance").cloned().unwrap_or_default(),
            ),
            "parking_type": "caravan",
            "location": { "type": "Point", "coordinates": [12.93, 50.84] },
        }],
        "total": 1,
    }))
}

async fn districts() -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "detail": [
                { "loc": ["query", "limit"], "msg": "value is not a valid integer", "type": "type_error" },
                { "loc": ["query", "skip"], "msg": "ensure this value is greater than or equal to 0", "type": "value_error" },
            ]
        })),
    )
        .into_response()
}

async fn slow_stats() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Json(json!({ "total_sites": 1 }))
}

async fn spawn_backend() -> String {
    let app = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/me", get(me))
        .route("/api/cultural-sites", get(cultural_sites))
        .route("/api/parking-lots", get(parking_lots))
        .route("/api/parking-lots/near", get(parking_near))
        .route("/api/districts", get(districts))
        .route("/api/stats/quick", get(slow_stats));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

async fn client() -> (ApiClient, Arc<Session>) {
    let session = Arc::new(Session::in_memory());
    let client = ApiClient::new(&Config::new(spawn_backend().await), session.clone()).unwrap();
    (client, session)
}

fn stale_token() -> AuthToken {
    token("stale")
}

fn token(access_token: &str) -> AuthToken {
    AuthToken {
        access_token: access_token.to_string(),
        token_type: "bearer".to_string(),
        user: serde_json::from_value::<User>(user_json()).unwrap(),
    }
}

#[tokio::test]
async fn test_login_sends_bearer_on_later_requests() {
    let (client, session) = client().await;
    let auth = AuthService::new(Arc::new(client.clone()), session.clone());
    let cancel = CancellationToken::new();

    let user = auth.login("anna@example.org", "secret1", &cancel).await.unwrap();
    assert_eq!(user.email, "anna@example.org");
    assert_eq!(session.token().as_deref(), Some("good"));

    let me = client.current_user(&cancel).await.unwrap();
    assert_eq!(me, user);
    assert_eq!(session.state(), AuthState::Authenticated(user));
}

#[tokio::test]
async fn test_failed_login_stays_anonymous() {
    let (client, session) = client().await;
    let auth = AuthService::new(Arc::new(client), session.clone());

    let err = auth
        .login("anna@example.org", "nope", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Unauthorized { ref detail } if detail == "Incorrect email or password"));
    assert_eq!(auth.status().error.as_deref(), Some("Incorrect email or password"));
    assert_eq!(session.state(), AuthState::Anonymous);
}

#[tokio::test]
async fn test_rejected_token_ends_session() {
    let (client, session) = client().await;
    session.store(&stale_token()).unwrap();
    let mut states = session.subscribe();

    let err = client
        .current_user(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(err.to_string(), "Could not validate credentials");
    assert_eq!(session.token(), None);
    assert_eq!(session.user(), None);
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), AuthState::Expired);
}

#[tokio::test]
async fn test_late_rejection_keeps_newer_login() {
    let (client, session) = client().await;
    session.store(&token("slow")).unwrap();

    let request = {
        let client = client.clone();
        tokio::spawn(async move { client.current_user(&CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    session.store(&token("fresh")).unwrap();

    let err = request.await.unwrap().unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(session.token().as_deref(), Some("fresh"));
    assert!(matches!(session.state(), AuthState::Authenticated(_)));
}

#[tokio::test]
async fn test_error_detail_becomes_message() {
    let (client, _) = client().await;
    let cancel = CancellationToken::new();

    let err = client
        .parking_lots(&Default::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Http { status: 500, .. }));
    assert_eq!(err.to_string(), "Failed to fetch parking lots");

    let err = client.districts(&cancel).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "value is not a valid integer; ensure this value is greater than or equal to 0"
    );
}

#[tokio::test]
async fn test_query_parameters_and_envelopes() {
    let (client, _) = client().await;
    let cancel = CancellationToken::new();

    let query = SiteQuery {
        category: Some(Category::Theatre),
        source: Some("chemnitz_geojson".to_string()),
        ..Default::default()
    };
    let page = client.cultural_sites(&query, &cancel).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.sites[0].id, "s1");
    assert_eq!(page.sites[0].category, Category::Theatre);
    assert_eq!(page.sites[0].source.as_deref(), Some("chemnitz_geojson"));
    assert_eq!(page.sites[0].lng_lat().unwrap().lat, 50.8357);

    let near = ParkingNearQuery::new(50.8357, 12.9264, 1000, 20);
    let lots = client.parking_near(&near, &cancel).await.unwrap();
    assert_eq!(lots.len(), 1);
    assert_eq!(lots[0].name, "within 1000 / 1000");
    assert_eq!(lots[0].parking_type, ParkingType::Caravan);
}

#[tokio::test]
async fn test_cancelled_request() {
    let (client, _) = client().await;
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let err = client.quick_stats(&cancel).await.unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_unreachable_backend() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ApiClient::new(
        &Config::new(format!("http://{addr}")),
        Arc::new(Session::in_memory()),
    )
    .unwrap();

    let err = client
        .categories(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Network(_)));
}
