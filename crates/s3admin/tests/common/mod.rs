//! Test utilities and common setup.
#![allow(clippy::field_reassign_with_default, dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    Form, Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use s3admin::api::{self, AppState};
use s3admin::auth::{AuthConfig, AuthMode, AuthService, Clock, ManualClock};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const CLIENT_ID: &str = "console";
pub const CLIENT_SECRET: &str = "console-secret";
pub const GOOD_CODE: &str = "good-code";
pub const ACCESS_TOKEN: &str = "mock-access-token";
pub const ROOT_URL: &str = "https://console.example.com";
pub const ADMIN_USER: &str = "admin";
pub const ADMIN_PASSWORD: &str = "correct horse battery staple";

/// Application under test.
pub struct TestApp {
    pub router: Router,
    pub auth: Arc<AuthService>,
    pub shutdown: CancellationToken,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    fn assemble(auth: AuthService, clock: Arc<ManualClock>) -> Self {
        let auth = Arc::new(auth);
        let shutdown = CancellationToken::new();
        let router = api::create_router(AppState::new(auth.clone(), shutdown.clone()));
        Self {
            router,
            auth,
            shutdown,
            clock,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn get_with(&self, uri: &str, name: header::HeaderName, value: &str) -> Response {
        self.send(
            Request::get(uri)
                .header(name, value)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

/// App with authentication disabled.
pub fn none_app() -> TestApp {
    let clock = Arc::new(ManualClock::default());
    let auth = AuthService::new(AuthConfig::default(), clock.clone()).unwrap();
    TestApp::assemble(auth, clock)
}

pub fn basic_config() -> AuthConfig {
    let mut config = AuthConfig::default();
    config.mode = AuthMode::Basic;
    config.admin.username = ADMIN_USER.to_string();
    config.admin.password = ADMIN_PASSWORD.to_string();
    config
}

/// App guarded by the static admin account.
pub fn basic_app() -> TestApp {
    let clock = Arc::new(ManualClock::default());
    let auth = AuthService::new(basic_config(), clock.clone()).unwrap();
    TestApp::assemble(auth, clock)
}

pub fn oidc_config(issuer: &str) -> AuthConfig {
    let mut config = AuthConfig::default();
    config.mode = AuthMode::Oidc;
    config.oidc.issuer_url = issuer.to_string();
    config.oidc.client_id = CLIENT_ID.to_string();
    config.oidc.client_secret = CLIENT_SECRET.to_string();
    config.oidc.provider_name = Some("Mock IdP".to_string());
    config.oidc.roles_claim = Some("resource_access.console.roles".to_string());
    config.oidc.admin_role = Some("admin".to_string());
    config.oidc.request_timeout_secs = 5;
    config
}

/// App wired to a running mock provider.
pub async fn oidc_app(provider: &MockProvider) -> TestApp {
    oidc_app_with(oidc_config(&provider.issuer)).await
}

pub async fn oidc_app_with(config: AuthConfig) -> TestApp {
    let clock = Arc::new(ManualClock::default());
    let auth = AuthService::from_config(
        config,
        ROOT_URL,
        clock.clone() as Arc<dyn Clock>,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    TestApp::assemble(auth, clock)
}

pub async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn set_cookie(response: &Response) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// `name=value` part of a `Set-Cookie` header, usable as a `Cookie` header.
pub fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap_or_default().to_string()
}

/// Query parameter from a URL.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

// ============================================================================
// Mock OpenID provider
// ============================================================================

const MOCK_KID: &str = "mock-key";
const MOCK_SEED: [u8; 32] = [7u8; 32];

/// Key the provider signs ID tokens with.
#[derive(Clone)]
struct MockSigner {
    kid: String,
    key: EncodingKey,
}

fn mock_signer(kid: &str, seed: [u8; 32]) -> (MockSigner, Value) {
    let signing_key = SigningKey::from_bytes(&seed);
    let der = signing_key.to_pkcs8_der().unwrap();
    let jwk = json!({
        "kty": "OKP",
        "crv": "Ed25519",
        "alg": "EdDSA",
        "use": "sig",
        "kid": kid,
        "x": URL_SAFE_NO_PAD.encode(signing_key.verifying_key().as_bytes())
    });
    let signer = MockSigner {
        kid: kid.to_string(),
        key: EncodingKey::from_ed_der(der.as_bytes()),
    };
    (signer, jwk)
}

struct MockState {
    issuer: String,
    signer: Mutex<MockSigner>,
    jwks: Mutex<Value>,
    jwks_fetches: AtomicUsize,
    claims: Mutex<Value>,
    userinfo: Mutex<Value>,
    omit_id_token: Mutex<bool>,
}

/// In-process OpenID provider bound to `127.0.0.1:0`.
pub struct MockProvider {
    pub issuer: String,
    state: Arc<MockState>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockProvider {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let issuer = format!("http://{}", listener.local_addr().unwrap());
        let (signer, jwk) = mock_signer(MOCK_KID, MOCK_SEED);

        let state = Arc::new(MockState {
            claims: Mutex::new(default_claims(&issuer)),
            userinfo: Mutex::new(json!({
                "sub": "user-123",
                "preferred_username": "alice",
                "email": "alice@userinfo.example.com"
            })),
            omit_id_token: Mutex::new(false),
            issuer: issuer.clone(),
            signer: Mutex::new(signer),
            jwks: Mutex::new(json!({ "keys": [jwk] })),
            jwks_fetches: AtomicUsize::new(0),
        });

        let router = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/jwks", get(jwks))
            .route("/token", post(token))
            .route("/userinfo", get(userinfo))
            .with_state(state.clone());

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            issuer,
            state,
            handle,
        }
    }

    /// Replace the claims put into the next ID tokens.
    pub fn set_claims(&self, claims: Value) {
        *self.state.claims.lock().unwrap() = claims;
    }

    /// Patch individual ID token claims.
    pub fn patch_claims(&self, patch: Value) {
        let mut claims = self.state.claims.lock().unwrap();
        if let (Some(target), Some(source)) = (claims.as_object_mut(), patch.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn set_userinfo(&self, claims: Value) {
        *self.state.userinfo.lock().unwrap() = claims;
    }

    pub fn omit_id_token(&self, omit: bool) {
        *self.state.omit_id_token.lock().unwrap() = omit;
    }

    /// Sign with a key that is not published, under the published `kid`.
    pub fn sign_with_foreign_key(&self) {
        let (signer, _) = mock_signer(MOCK_KID, [9u8; 32]);
        *self.state.signer.lock().unwrap() = signer;
    }

    /// Sign with the published key, under a `kid` the key set does not list.
    pub fn sign_with_unlisted_kid(&self) {
        let (signer, _) = mock_signer("unlisted-key", MOCK_SEED);
        *self.state.signer.lock().unwrap() = signer;
    }

    /// Publish a fresh key under a new `kid` and sign with it.
    pub fn rotate_key(&self) {
        let (signer, jwk) = mock_signer("mock-key-2", [11u8; 32]);
        *self.state.signer.lock().unwrap() = signer;
        *self.state.jwks.lock().unwrap() = json!({ "keys": [jwk] });
    }

    /// Number of key set downloads served so far.
    pub fn jwks_fetches(&self) -> usize {
        self.state.jwks_fetches.load(Ordering::SeqCst)
    }
}

impl Drop for MockProvider {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn default_claims(issuer: &str) -> Value {
    let now = Utc::now().timestamp();
    json!({
        "iss": issuer,
        "aud": CLIENT_ID,
        "sub": "user-123",
        "iat": now,
        "exp": now + 300,
        "preferred_username": "alice",
        "email": "alice@example.com",
        "name": "Alice Example",
        "resource_access": {
            "console": {"roles": ["admin", "viewer"]}
        }
    })
}

async fn discovery(State(state): State<Arc<MockState>>) -> Json<Value> {
    let issuer = &state.issuer;
    Json(json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "jwks_uri": format!("{issuer}/jwks"),
        "userinfo_endpoint": format!("{issuer}/userinfo"),
    }))
}

async fn jwks(State(state): State<Arc<MockState>>) -> Json<Value> {
    state.jwks_fetches.fetch_add(1, Ordering::SeqCst);
    Json(state.jwks.lock().unwrap().clone())
}

#[derive(Debug, Deserialize)]
struct TokenForm {
    grant_type: String,
    code: String,
    redirect_uri: String,
    client_id: String,
    client_secret: Option<String>,
}

async fn token(State(state): State<Arc<MockState>>, Form(form): Form<TokenForm>) -> Response {
    let expected_redirect = format!("{ROOT_URL}/auth/oidc/callback");
    if form.grant_type != "authorization_code"
        || form.code != GOOD_CODE
        || form.client_id != CLIENT_ID
        || form.client_secret.as_deref() != Some(CLIENT_SECRET)
        || form.redirect_uri != expected_redirect
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant"})),
        )
            .into_response();
    }

    let claims = state.claims.lock().unwrap().clone();
    let signer = state.signer.lock().unwrap().clone();
    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some(signer.kid);
    let id_token = jsonwebtoken::encode(&header, &claims, &signer.key).unwrap();

    let mut body = json!({
        "access_token": ACCESS_TOKEN,
        "token_type": "Bearer",
        "expires_in": 300,
        "refresh_token": "mock-refresh-token"
    });
    if !*state.omit_id_token.lock().unwrap() {
        body["id_token"] = Value::String(id_token);
    }
    Json(body).into_response()
}

async fn userinfo(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    let expected = format!("Bearer {ACCESS_TOKEN}");
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(state.userinfo.lock().unwrap().clone()).into_response()
}
