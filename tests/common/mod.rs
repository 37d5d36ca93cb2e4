use std::collections::{HashMap, HashSet};
use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use archy_backend::auth::provider::{
    AuthSession, Identity, IdentityProvider, IdentityUpdate, NewIdentity, ProviderError,
    ProviderResult, Session,
};
use archy_backend::config::AppConfig;
use archy_backend::db::{self, PgPool, MIGRATIONS};
use archy_backend::models::{NewProfile, NewProject, NewProjectAssignment};
use archy_backend::routes;
use archy_backend::schema::{profiles, project_assignments, projects};
use archy_backend::state::AppState;
use archy_backend::storage::ObjectStorage;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const PUBLIC_BASE: &str = "https://fake-storage/public";

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        let mut guard = self.objects.lock().await;
        for key in keys {
            guard.remove(key);
        }
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{PUBLIC_BASE}/{key}")
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }

    #[allow(dead_code)]
    pub async fn keys(&self) -> Vec<String> {
        let guard = self.objects.lock().await;
        let mut keys: Vec<String> = guard.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Which profile a simulated concurrent request inserts while a sign-up is in
/// flight.
#[allow(dead_code)]
#[derive(Clone, Copy)]
pub enum ConcurrentProfile {
    /// Same identity id, as when the provider hands a repeated unconfirmed
    /// sign-up the existing user.
    SameIdentity,
    /// A different id holding the same email.
    OtherIdentity,
}

struct FakeUser {
    identity: Identity,
    password: String,
}

/// In-memory identity provider. Tokens are opaque random strings; a refresh
/// rotates both halves of the pair.
#[derive(Default)]
pub struct FakeIdentityProvider {
    users: Mutex<HashMap<Uuid, FakeUser>>,
    access_tokens: Mutex<HashMap<String, Uuid>>,
    refresh_tokens: Mutex<HashMap<String, Uuid>>,
    failing_lookups: Mutex<HashSet<Uuid>>,
    fail_deletes: AtomicBool,
    sign_outs: AtomicUsize,
    concurrent_profile: Mutex<Option<(PgPool, ConcurrentProfile)>>,
}

fn rejected(status: u16, message: &str) -> ProviderError {
    ProviderError::rejected(status, message)
}

impl FakeIdentityProvider {
    async fn find_by_email(&self, email: &str) -> Option<Uuid> {
        let users = self.users.lock().await;
        users
            .values()
            .find(|user| user.identity.email.as_deref() == Some(email))
            .map(|user| user.identity.id)
    }

    async fn insert(&self, email: &str, password: &str, confirmed: bool) -> Identity {
        let identity = Identity {
            id: Uuid::new_v4(),
            email: Some(email.to_string()),
            email_confirmed_at: confirmed.then(Utc::now),
            created_at: Some(Utc::now()),
            last_sign_in_at: None,
            identities: Some(vec![json!({ "provider": "email" })]),
        };
        let mut users = self.users.lock().await;
        users.insert(
            identity.id,
            FakeUser {
                identity: identity.clone(),
                password: password.to_string(),
            },
        );
        identity
    }

    async fn issue(&self, user_id: Uuid) -> ProviderResult<AuthSession> {
        let identity = {
            let users = self.users.lock().await;
            users
                .get(&user_id)
                .map(|user| user.identity.clone())
                .ok_or_else(|| rejected(404, "User not found"))?
        };
        let access = format!("access-{}", Uuid::new_v4());
        let refresh = format!("refresh-{}", Uuid::new_v4());
        self.access_tokens.lock().await.insert(access.clone(), user_id);
        self.refresh_tokens.lock().await.insert(refresh.clone(), user_id);
        Ok(AuthSession {
            identity,
            session: Session {
                access_token: access,
                refresh_token: refresh,
                expires_at: Utc::now().timestamp() + 3600,
                user_id,
            },
        })
    }

    /// Inserts a profile row of `kind` right after the next identity is
    /// created.
    #[allow(dead_code)]
    pub async fn insert_profile_concurrently(&self, pool: PgPool, kind: ConcurrentProfile) {
        *self.concurrent_profile.lock().await = Some((pool, kind));
    }

    async fn run_concurrent_insert(&self, identity: &Identity) -> ProviderResult<()> {
        let Some((pool, kind)) = self.concurrent_profile.lock().await.take() else {
            return Ok(());
        };
        let profile = NewProfile {
            id: match kind {
                ConcurrentProfile::SameIdentity => identity.id,
                ConcurrentProfile::OtherIdentity => Uuid::new_v4(),
            },
            email: identity.email.clone().unwrap_or_default(),
            role: "User".to_string(),
        };
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            diesel::insert_into(profiles::table)
                .values(&profile)
                .execute(&mut conn)?;
            Ok(())
        })
        .await
        .map_err(|err| ProviderError::Transport(err.to_string()))?
        .map_err(|err| ProviderError::Transport(err.to_string()))
    }

    #[allow(dead_code)]
    pub async fn confirm(&self, email: &str) {
        let mut users = self.users.lock().await;
        if let Some(user) = users
            .values_mut()
            .find(|user| user.identity.email.as_deref() == Some(email))
        {
            user.identity.email_confirmed_at = Some(Utc::now());
        }
    }

    #[allow(dead_code)]
    pub async fn add_confirmed(&self, email: &str, password: &str) -> Uuid {
        self.insert(email, password, true).await.id
    }

    #[allow(dead_code)]
    pub async fn fail_lookup_for(&self, user_id: Uuid) {
        self.failing_lookups.lock().await.insert(user_id);
    }

    #[allow(dead_code)]
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn sign_out_count(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub async fn identity_count(&self, email: &str) -> usize {
        let users = self.users.lock().await;
        users
            .values()
            .filter(|user| user.identity.email.as_deref() == Some(email))
            .count()
    }

    #[allow(dead_code)]
    pub async fn contains(&self, user_id: Uuid) -> bool {
        self.users.lock().await.contains_key(&user_id)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _redirect_to: Option<&str>,
    ) -> ProviderResult<Identity> {
        if let Some(existing) = self.find_by_email(email).await {
            let users = self.users.lock().await;
            let mut identity = users[&existing].identity.clone();
            identity.identities = Some(Vec::new());
            return Ok(identity);
        }
        let identity = self.insert(email, password, false).await;
        self.run_concurrent_insert(&identity).await?;
        Ok(identity)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> ProviderResult<AuthSession> {
        let user_id = {
            let users = self.users.lock().await;
            users
                .values()
                .find(|user| {
                    user.identity.email.as_deref() == Some(email) && user.password == password
                })
                .map(|user| user.identity.id)
                .ok_or_else(|| rejected(400, "Invalid login credentials"))?
        };
        self.issue(user_id).await
    }

    async fn verify_token(&self, access_token: &str) -> ProviderResult<Identity> {
        let user_id = self
            .access_tokens
            .lock()
            .await
            .get(access_token)
            .copied()
            .ok_or_else(|| rejected(401, "invalid JWT: unable to parse or verify signature"))?;
        let users = self.users.lock().await;
        users
            .get(&user_id)
            .map(|user| user.identity.clone())
            .ok_or_else(|| rejected(401, "invalid JWT: user not found"))
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> ProviderResult<AuthSession> {
        if let Ok(identity) = self.verify_token(access_token).await {
            let owns_refresh = self.refresh_tokens.lock().await.get(refresh_token) == Some(&identity.id);
            if owns_refresh {
                return Ok(AuthSession {
                    session: Session {
                        access_token: access_token.to_string(),
                        refresh_token: refresh_token.to_string(),
                        expires_at: Utc::now().timestamp() + 3600,
                        user_id: identity.id,
                    },
                    identity,
                });
            }
        }
        self.refresh_session(refresh_token).await
    }

    async fn refresh_session(&self, refresh_token: &str) -> ProviderResult<AuthSession> {
        let user_id = self
            .refresh_tokens
            .lock()
            .await
            .remove(refresh_token)
            .ok_or_else(|| rejected(400, "Invalid Refresh Token: Refresh Token Not Found"))?;
        self.issue(user_id).await
    }

    async fn sign_out(&self, access_token: &str) -> ProviderResult<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        let user_id = self.access_tokens.lock().await.remove(access_token);
        if let Some(user_id) = user_id {
            self.access_tokens.lock().await.retain(|_, owner| *owner != user_id);
            self.refresh_tokens.lock().await.retain(|_, owner| *owner != user_id);
        }
        Ok(())
    }

    async fn verify_email(&self, token_hash: &str, _kind: &str) -> ProviderResult<AuthSession> {
        let user_id = token_hash
            .strip_prefix("confirm-")
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| rejected(403, "Email link is invalid or has expired"))?;
        {
            let mut users = self.users.lock().await;
            let user = users
                .get_mut(&user_id)
                .ok_or_else(|| rejected(403, "Email link is invalid or has expired"))?;
            user.identity.email_confirmed_at = Some(Utc::now());
        }
        self.issue(user_id).await
    }

    async fn resend_confirmation(
        &self,
        _email: &str,
        _redirect_to: Option<&str>,
    ) -> ProviderResult<()> {
        Ok(())
    }

    async fn create_user(&self, user: NewIdentity) -> ProviderResult<Identity> {
        if self.find_by_email(&user.email).await.is_some() {
            return Err(rejected(
                422,
                "A user with this email address has already been registered",
            ));
        }
        let identity = self
            .insert(&user.email, &user.password, user.email_confirm)
            .await;
        self.run_concurrent_insert(&identity).await?;
        Ok(identity)
    }

    async fn delete_user(&self, user_id: Uuid) -> ProviderResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("connection reset".into()));
        }
        let removed = self.users.lock().await.remove(&user_id);
        removed
            .map(|_| ())
            .ok_or_else(|| rejected(404, "User not found"))
    }

    async fn update_user_by_id(
        &self,
        user_id: Uuid,
        update: IdentityUpdate,
    ) -> ProviderResult<Identity> {
        let mut users = self.users.lock().await;
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| rejected(404, "User not found"))?;
        if let Some(password) = update.password {
            user.password = password;
        }
        if let Some(email) = update.email {
            user.identity.email = Some(email);
        }
        Ok(user.identity.clone())
    }

    async fn list_users(&self, page: u32, per_page: u32) -> ProviderResult<Vec<Identity>> {
        let users = self.users.lock().await;
        let mut all: Vec<Identity> = users.values().map(|user| user.identity.clone()).collect();
        all.sort_by_key(|identity| identity.id);
        let skip = (page.saturating_sub(1) * per_page) as usize;
        Ok(all.into_iter().skip(skip).take(per_page as usize).collect())
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> ProviderResult<Identity> {
        if self.failing_lookups.lock().await.contains(&user_id) {
            return Err(ProviderError::Transport("timed out".into()));
        }
        let users = self.users.lock().await;
        users
            .get(&user_id)
            .map(|user| user.identity.clone())
            .ok_or_else(|| rejected(404, "User not found"))
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    identity: Arc<FakeIdentityProvider>,
}

pub fn test_config(database_url: String) -> AppConfig {
    AppConfig {
        database_url,
        database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        app_env: "test".to_string(),
        supabase_url: "http://supabase.test".to_string(),
        supabase_anon_key: "anon-key".to_string(),
        supabase_service_role_key: "service-role-key".to_string(),
        site_url: "http://site.test".to_string(),
        cookie_secure: false,
        cookie_domain: None,
        access_cookie_max_age_days: 7,
        refresh_cookie_max_age_days: 30,
        cors_allowed_origin: None,
        storage_endpoint_url: "http://supabase.test/storage/v1/s3".to_string(),
        storage_access_key_id: None,
        storage_secret_access_key: None,
        storage_region: "us-east-1".to_string(),
        storage_bucket: "project-files".to_string(),
        signed_url_ttl_seconds: 3600,
    }
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;
        let config = test_config(database_url);

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let identity = Arc::new(FakeIdentityProvider::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let identity_for_state: Arc<dyn IdentityProvider> = identity.clone();
        let state = AppState::new(pool.clone(), config, storage_for_state, identity_for_state);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
            identity,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub fn identity(&self) -> Arc<FakeIdentityProvider> {
        self.identity.clone()
    }

    /// A confirmed identity with a profile of `role`.
    pub async fn create_account(&self, email: &str, password: &str, role: &str) -> Result<Uuid> {
        let id = self.identity.add_confirmed(email, password).await;
        self.insert_profile(id, email, role).await?;
        Ok(id)
    }

    pub async fn insert_profile(&self, id: Uuid, email: &str, role: &str) -> Result<()> {
        let profile = NewProfile {
            id,
            email: email.to_string(),
            role: role.to_string(),
        };
        self.with_conn(move |conn| {
            diesel::insert_into(profiles::table)
                .values(&profile)
                .execute(conn)
                .context("failed to insert profile")?;
            Ok(())
        })
        .await
    }

    /// Creates an account and signs it in, returning the bearer token.
    #[allow(dead_code)]
    pub async fn account_token(&self, email: &str, role: &str) -> Result<(Uuid, String)> {
        let password = "correct-horse";
        let id = self.create_account(email, password, role).await?;
        let token = self.login_token(email, password).await?;
        Ok((id, token))
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        let response = self
            .post_json(
                "/api/auth/login",
                &json!({ "email": email, "password": password }),
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_json(response).await?;
        body["session"]["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("login response carried no access token"))
    }

    #[allow(dead_code)]
    pub async fn insert_project(&self, name: &str, created_by: Uuid) -> Result<Uuid> {
        let project = NewProject {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            location: None,
            created_by,
        };
        self.with_conn(move |conn| {
            diesel::insert_into(projects::table)
                .values(&project)
                .execute(conn)
                .context("failed to insert project")?;
            Ok(project.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn assign(&self, project_id: Uuid, user_id: Uuid) -> Result<()> {
        let assignment = NewProjectAssignment {
            id: Uuid::new_v4(),
            project_id,
            assigned_user_id: user_id,
            assigned_by: None,
            role: "member".to_string(),
        };
        self.with_conn(move |conn| {
            diesel::insert_into(project_assignments::table)
                .values(&assignment)
                .execute(conn)
                .context("failed to insert assignment")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn unassign(&self, project_id: Uuid, user_id: Uuid) -> Result<()> {
        self.with_conn(move |conn| {
            diesel::delete(
                project_assignments::table
                    .filter(project_assignments::project_id.eq(project_id))
                    .filter(project_assignments::assigned_user_id.eq(user_id)),
            )
            .execute(conn)
            .context("failed to delete assignment")?;
            Ok(())
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn assignment_count(&self, project_id: Uuid, user_id: Uuid) -> Result<i64> {
        self.with_conn(move |conn| {
            project_assignments::table
                .filter(project_assignments::project_id.eq(project_id))
                .filter(project_assignments::assigned_user_id.eq(user_id))
                .select(count_star())
                .first(conn)
                .context("failed to count assignments")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn profile_count(&self, email: &str) -> Result<i64> {
        let email = email.to_string();
        self.with_conn(move |conn| {
            profiles::table
                .filter(profiles::email.eq(email))
                .select(count_star())
                .first(conn)
                .context("failed to count profiles")
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn file_count(&self, project_id: Uuid) -> Result<i64> {
        self.with_conn(move |conn| {
            archy_backend::schema::files::table
                .filter(archy_backend::schema::files::project_id.eq(project_id))
                .select(count_star())
                .first(conn)
                .context("failed to count files")
        })
        .await
    }

    pub async fn send(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn json_request<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body))?).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.json_request(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.json_request(Method::PUT, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty())?).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        self.send(builder.body(Body::empty())?).await
    }

    /// Multipart upload with a `file` part and optional form fields.
    #[allow(dead_code)]
    pub async fn upload(
        &self,
        path: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
        fields: &[(&str, String)],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");

        for (name, value) in fields {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend(value.as_bytes());
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"));

        self.send(builder.body(Body::from(body))?).await
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn body_json(response: hyper::Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

/// `name=value` pairs from every `Set-Cookie` header of a response.
#[allow(dead_code)]
pub fn set_cookies(response: &hyper::Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(str::to_string)
        .collect()
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE files, project_assignments, projects, profiles RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
