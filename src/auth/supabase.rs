//! [`IdentityProvider`] backed by the Supabase auth (GoTrue) REST API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::jwt;
use super::provider::{
    AuthSession, Identity, IdentityProvider, IdentityUpdate, NewIdentity, ProviderError,
    ProviderResult, Session,
};
use crate::config::AppConfig;

pub struct SupabaseAuth {
    http: Client,
    base_url: String,
    anon_key: String,
    service_role_key: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: Identity,
}

impl TokenResponse {
    fn into_auth_session(self) -> AuthSession {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs))
            .or_else(|| {
                jwt::peek_claims(&self.access_token)
                    .ok()
                    .map(|claims| claims.exp)
            })
            .unwrap_or_default();

        AuthSession {
            session: Session {
                access_token: self.access_token,
                refresh_token: self.refresh_token,
                expires_at,
                user_id: self.user.id,
            },
            identity: self.user,
        }
    }
}

#[derive(Deserialize)]
struct UserList {
    users: Vec<Identity>,
}

impl SupabaseAuth {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("failed to build identity provider HTTP client")?;

        Ok(Self {
            http,
            base_url: format!("{}/auth/v1", config.supabase_url),
            anon_key: config.supabase_anon_key.clone(),
            service_role_key: config.supabase_service_role_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn public(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("apikey", &self.anon_key)
    }

    fn privileged(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("apikey", &self.service_role_key)
    }

    fn admin(&self, method: Method, path: &str) -> RequestBuilder {
        self.privileged(method, path)
            .bearer_auth(&self.service_role_key)
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> ProviderResult<T> {
        let response = Self::dispatch(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| ProviderError::Decode(err.to_string()))
    }

    async fn send_empty(request: RequestBuilder) -> ProviderResult<()> {
        Self::dispatch(request).await.map(|_| ())
    }

    async fn dispatch(request: RequestBuilder) -> ProviderResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = extract_error_message(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        tracing::debug!(status = status.as_u16(), %message, "identity provider rejected request");
        Err(ProviderError::rejected(status.as_u16(), message))
    }
}

/// Pulls the human-readable message out of the provider's error payloads,
/// which come in several shapes depending on the endpoint.
fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: Option<&str>,
    ) -> ProviderResult<Identity> {
        let mut request = self
            .public(Method::POST, "/signup")
            .json(&json!({ "email": email, "password": password }));
        if let Some(redirect) = redirect_to {
            request = request.query(&[("redirect_to", redirect)]);
        }

        // With auto-confirm enabled the provider answers with a full session.
        let value: Value = Self::send(request).await?;
        let user = match value.get("access_token") {
            Some(_) => value.get("user").cloned().unwrap_or(Value::Null),
            None => value,
        };
        serde_json::from_value(user).map_err(|err| ProviderError::Decode(err.to_string()))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> ProviderResult<AuthSession> {
        let request = self
            .public(Method::POST, "/token")
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));
        let tokens: TokenResponse = Self::send(request).await?;
        Ok(tokens.into_auth_session())
    }

    async fn verify_token(&self, access_token: &str) -> ProviderResult<Identity> {
        let request = self
            .privileged(Method::GET, "/user")
            .bearer_auth(access_token);
        Self::send(request).await
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> ProviderResult<AuthSession> {
        let claims = match jwt::peek_claims(access_token) {
            Ok(claims) if !claims.is_expired() => claims,
            _ => return self.refresh_session(refresh_token).await,
        };

        match self.verify_token(access_token).await {
            Ok(identity) => Ok(AuthSession {
                session: Session {
                    access_token: access_token.to_string(),
                    refresh_token: refresh_token.to_string(),
                    expires_at: claims.exp,
                    user_id: identity.id,
                },
                identity,
            }),
            Err(err) if err.is_credential_rejection() => {
                tracing::debug!(error = %err, "access token rejected, refreshing session");
                self.refresh_session(refresh_token).await
            }
            Err(err) => Err(err),
        }
    }

    async fn refresh_session(&self, refresh_token: &str) -> ProviderResult<AuthSession> {
        let request = self
            .public(Method::POST, "/token")
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }));
        let tokens: TokenResponse = Self::send(request).await?;
        Ok(tokens.into_auth_session())
    }

    async fn sign_out(&self, access_token: &str) -> ProviderResult<()> {
        let request = self
            .public(Method::POST, "/logout")
            .bearer_auth(access_token);
        Self::send_empty(request).await
    }

    async fn verify_email(&self, token_hash: &str, kind: &str) -> ProviderResult<AuthSession> {
        let request = self
            .public(Method::POST, "/verify")
            .json(&json!({ "type": kind, "token_hash": token_hash }));
        let tokens: TokenResponse = Self::send(request).await?;
        Ok(tokens.into_auth_session())
    }

    async fn resend_confirmation(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> ProviderResult<()> {
        let mut request = self
            .public(Method::POST, "/resend")
            .json(&json!({ "type": "signup", "email": email }));
        if let Some(redirect) = redirect_to {
            request = request.query(&[("redirect_to", redirect)]);
        }
        Self::send_empty(request).await
    }

    async fn create_user(&self, user: NewIdentity) -> ProviderResult<Identity> {
        let request = self.admin(Method::POST, "/admin/users").json(&user);
        Self::send(request).await
    }

    async fn delete_user(&self, user_id: Uuid) -> ProviderResult<()> {
        let request = self.admin(Method::DELETE, &format!("/admin/users/{user_id}"));
        Self::send_empty(request).await
    }

    async fn update_user_by_id(
        &self,
        user_id: Uuid,
        update: IdentityUpdate,
    ) -> ProviderResult<Identity> {
        let request = self
            .admin(Method::PUT, &format!("/admin/users/{user_id}"))
            .json(&update);
        Self::send(request).await
    }

    async fn list_users(&self, page: u32, per_page: u32) -> ProviderResult<Vec<Identity>> {
        let request = self
            .admin(Method::GET, "/admin/users")
            .query(&[("page", page), ("per_page", per_page)]);
        let list: UserList = Self::send(request).await?;
        Ok(list.users)
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> ProviderResult<Identity> {
        let request = self.admin(Method::GET, &format!("/admin/users/{user_id}"));
        Self::send(request).await
    }
}
