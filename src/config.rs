use std::env;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_SIGNED_URL_TTL_SECONDS: u64 = 3600;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub app_env: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_service_role_key: String,
    pub site_url: String,
    pub cookie_secure: bool,
    pub cookie_domain: Option<String>,
    pub access_cookie_max_age_days: i64,
    pub refresh_cookie_max_age_days: i64,
    pub cors_allowed_origin: Option<String>,
    pub storage_endpoint_url: String,
    pub storage_access_key_id: Option<String>,
    pub storage_secret_access_key: Option<String>,
    pub storage_region: String,
    pub storage_bucket: String,
    pub signed_url_ttl_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let supabase_url = env::var("SUPABASE_URL").context("SUPABASE_URL must be set")?;
        let supabase_url = supabase_url.trim_end_matches('/').to_string();
        Url::parse(&supabase_url).context("SUPABASE_URL must be a valid URL")?;
        let supabase_anon_key =
            env::var("SUPABASE_ANON_KEY").context("SUPABASE_ANON_KEY must be set")?;
        let supabase_service_role_key = env::var("SUPABASE_SERVICE_ROLE_KEY")
            .context("SUPABASE_SERVICE_ROLE_KEY must be set")?;
        let site_url = env::var("SITE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        let cookie_secure = env::var("COOKIE_SECURE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or_else(|_| is_production_env(&app_env));
        let cookie_domain = env::var("COOKIE_DOMAIN").ok();
        let access_cookie_max_age_days = env::var("ACCESS_COOKIE_MAX_AGE_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .context("ACCESS_COOKIE_MAX_AGE_DAYS must be an integer")?;
        let refresh_cookie_max_age_days = env::var("REFRESH_COOKIE_MAX_AGE_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("REFRESH_COOKIE_MAX_AGE_DAYS must be an integer")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();

        let storage_endpoint_url = env::var("STORAGE_ENDPOINT_URL")
            .unwrap_or_else(|_| format!("{supabase_url}/storage/v1/s3"));
        let storage_access_key_id = env::var("STORAGE_ACCESS_KEY_ID").ok();
        let storage_secret_access_key = env::var("STORAGE_SECRET_ACCESS_KEY").ok();
        let storage_region = env::var("STORAGE_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let storage_bucket =
            env::var("STORAGE_BUCKET").unwrap_or_else(|_| "project-files".to_string());
        let signed_url_ttl_seconds = env::var("SIGNED_URL_TTL_SECONDS")
            .ok()
            .map(|value| value.parse())
            .transpose()
            .context("SIGNED_URL_TTL_SECONDS must be an integer")?
            .unwrap_or(DEFAULT_SIGNED_URL_TTL_SECONDS);

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            app_env,
            supabase_url,
            supabase_anon_key,
            supabase_service_role_key,
            site_url,
            cookie_secure,
            cookie_domain,
            access_cookie_max_age_days,
            refresh_cookie_max_age_days,
            cors_allowed_origin,
            storage_endpoint_url,
            storage_access_key_id,
            storage_secret_access_key,
            storage_region,
            storage_bucket,
            signed_url_ttl_seconds,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }

    /// Landing page for links sent in confirmation emails.
    pub fn email_redirect_url(&self) -> String {
        format!("{}/auth/confirm", self.site_url)
    }

    /// Base used by storage for publicly readable objects such as thumbnails.
    pub fn storage_public_base_url(&self) -> String {
        format!(
            "{}/storage/v1/object/public/{}",
            self.supabase_url, self.storage_bucket
        )
    }
}

fn is_production_env(app_env: &str) -> bool {
    app_env.eq_ignore_ascii_case("production")
}

fn redact_database_url(raw: &str) -> String {
    let Ok(mut parsed) = Url::parse(raw) else {
        return "***".to_string();
    };
    if parsed.password().is_none() {
        return parsed.to_string();
    }
    match parsed.set_password(Some("*****")) {
        Ok(()) => parsed.to_string(),
        Err(()) => "***".to_string(),
    }
}
