//! HTTP implementation of the backend traits.
//!
//! Table access follows PostgREST conventions under `/rest/v1/<table>`,
//! auth follows GoTrue under `/auth/v1/*`. Every request carries the
//! project key as `apikey`; table requests also carry the signed-in user's
//! access token as a bearer token when one is available.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;

use super::{AuthEvent, AuthEvents, AuthService, DataStore, Table, ROLES_TABLE, TASKS_TABLE, TASK_LOGS_TABLE};
use crate::activity::{NewLogRecord, RawLogRecord};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::model::{NewTask, Task, TaskId, TaskStatus};
use crate::session::{Session, User};

pub const BACKEND_URL_ENV: &str = "JOBLINK_BACKEND_URL";
pub const BACKEND_KEY_ENV: &str = "JOBLINK_BACKEND_KEY";

const TASK_COLUMNS: &str = "id,title,link,created_at,status,priority,finished_at";
const LOG_COLUMNS: &str = "id,action,created_at,task_id,user_email";

/// Endpoint and credentials for the hosted backend.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub url: String,
    pub key: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl BackendSettings {
    /// Resolve settings from CLI/env values; both endpoint and key are required.
    pub fn resolve(url: Option<String>, key: Option<String>, config: &BackendConfig) -> Result<Self> {
        let url = url
            .filter(|value| !value.trim().is_empty())
            .ok_or(Error::MissingEnv(BACKEND_URL_ENV))?;
        let key = key
            .filter(|value| !value.trim().is_empty())
            .ok_or(Error::MissingEnv(BACKEND_KEY_ENV))?;
        Ok(Self {
            url: url.trim().trim_end_matches('/').to_string(),
            key: key.trim().to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RestBackend {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    access_token: Arc<RwLock<Option<String>>>,
    events: AuthEvents,
}

impl RestBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        let base_url = Url::parse(&format!("{}/", settings.url))
            .map_err(|err| Error::InvalidConfig(format!("backend url is not valid: {err}")))?;

        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(&settings.key)
            .map_err(|_| Error::InvalidConfig("backend key contains invalid characters".into()))?;
        headers.insert("apikey", api_key);

        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.connect_timeout)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key: settings.key.clone(),
            access_token: Arc::default(),
            events: AuthEvents::default(),
        })
    }

    /// Act as the given user for table requests.
    pub fn with_session(self, session: Option<&Session>) -> Self {
        self.set_access_token(session.map(|session| session.access_token.clone()));
        self
    }

    fn set_access_token(&self, token: Option<String>) {
        *self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|err| Error::InvalidConfig(format!("bad backend path {path}: {err}")))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in params {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn table_url(&self, table: &str, params: &[(&str, &str)]) -> Result<Url> {
        self.url(&format!("rest/v1/{table}"), params)
    }

    fn request(&self, method: Method, url: Url, bearer: Option<&str>) -> RequestBuilder {
        let token = bearer.unwrap_or(&self.api_key);
        self.http
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
    }

    fn table_request(&self, method: Method, url: Url) -> RequestBuilder {
        let token = self
            .access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.request(method, url, token.as_deref())
    }

    async fn send(&self, label: &'static str, builder: RequestBuilder) -> Result<Response> {
        let start = Instant::now();
        let response = builder.send().await?;
        let status = response.status();
        tracing::debug!(
            request = label,
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "backend response"
        );
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let (code, message) = parse_error_body(&body);
        tracing::warn!(request = label, status = status.as_u16(), code = ?code, %message, "backend request failed");
        Err(Error::from_backend(status.as_u16(), code, message))
    }

    async fn send_json<T: DeserializeOwned>(&self, label: &'static str, builder: RequestBuilder) -> Result<T> {
        let response = self.send(label, builder).await?;
        Ok(response.json::<T>().await?)
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> Result<Session> {
        let url = self.url("auth/v1/token", &[("grant_type", grant_type)])?;
        let token: TokenResponse = self
            .send_json("auth.token", self.request(Method::POST, url, None).json(&body))
            .await?;
        Ok(token.into_session(Utc::now()))
    }
}

#[async_trait]
impl DataStore for RestBackend {
    async fn fetch_tasks(&self) -> Result<Vec<Task>> {
        let url = self.table_url(
            TASKS_TABLE,
            &[("select", TASK_COLUMNS), ("order", "created_at.desc")],
        )?;
        self.send_json("tasks.select", self.table_request(Method::GET, url))
            .await
    }

    async fn fetch_logs(&self, limit: usize) -> Result<Vec<RawLogRecord>> {
        let limit = limit.to_string();
        let url = self.table_url(
            TASK_LOGS_TABLE,
            &[
                ("select", LOG_COLUMNS),
                ("order", "created_at.desc"),
                ("limit", limit.as_str()),
            ],
        )?;
        self.send_json("task_logs.select", self.table_request(Method::GET, url))
            .await
    }

    async fn insert_task(&self, task: &NewTask) -> Result<()> {
        let url = self.table_url(TASKS_TABLE, &[])?;
        let builder = self
            .table_request(Method::POST, url)
            .header("Prefer", "return=minimal")
            .json(task);
        self.send("tasks.insert", builder).await?;
        Ok(())
    }

    async fn update_task_status(
        &self,
        id: &TaskId,
        from: TaskStatus,
        to: TaskStatus,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let id_filter = format!("eq.{id}");
        let status_filter = format!("eq.{}", from.as_str());
        let url = self.table_url(
            TASKS_TABLE,
            &[
                ("id", id_filter.as_str()),
                ("status", status_filter.as_str()),
                ("select", "id"),
            ],
        )?;
        let builder = self
            .table_request(Method::PATCH, url)
            .header("Prefer", "return=representation")
            .json(&json!({ "status": to, "finished_at": finished_at }));
        let rows: Vec<serde_json::Value> = self.send_json("tasks.update", builder).await?;
        Ok(!rows.is_empty())
    }

    async fn delete_task(&self, id: &TaskId) -> Result<()> {
        let filter = format!("eq.{id}");
        let url = self.table_url(TASKS_TABLE, &[("id", filter.as_str())])?;
        self.send("tasks.delete", self.table_request(Method::DELETE, url))
            .await?;
        Ok(())
    }

    async fn insert_log(&self, record: &NewLogRecord) -> Result<()> {
        let url = self.table_url(TASK_LOGS_TABLE, &[])?;
        let builder = self
            .table_request(Method::POST, url)
            .header("Prefer", "return=minimal")
            .json(record);
        self.send("task_logs.insert", builder).await?;
        Ok(())
    }

    async fn lookup_role(&self, user_id: &str) -> Result<Option<String>> {
        #[derive(Deserialize)]
        struct RoleRow {
            role: Option<String>,
        }

        let filter = format!("eq.{user_id}");
        let url = self.table_url(
            ROLES_TABLE,
            &[("select", "role"), ("user_id", filter.as_str()), ("limit", "1")],
        )?;
        let rows: Vec<RoleRow> = self
            .send_json("users_roles.select", self.table_request(Method::GET, url))
            .await?;
        Ok(rows.into_iter().next().and_then(|row| row.role))
    }

    async fn fingerprint(&self, table: Table) -> Result<String> {
        let url = match table {
            Table::Tasks => self.table_url(
                TASKS_TABLE,
                &[("select", "id,status,priority,finished_at"), ("order", "id.asc")],
            )?,
            Table::TaskLogs => self.table_url(
                TASK_LOGS_TABLE,
                &[("select", "id"), ("order", "created_at.desc"), ("limit", "1")],
            )?,
        };
        let builder = self
            .table_request(Method::GET, url)
            .header("Prefer", "count=exact");
        let response = self.send("fingerprint", builder).await?;
        let range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await?;
        Ok(format!("{range}|{body}"))
    }

    fn use_session(&self, session: &Session) {
        self.set_access_token(Some(session.access_token.clone()));
    }
}

#[async_trait]
impl AuthService for RestBackend {
    async fn sign_in_password(&self, email: &str, password: &str) -> Result<Session> {
        let session = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await?;
        tracing::info!(user_id = %session.user.id, "signed in");
        self.events.emit(AuthEvent::SignedIn {
            user: session.user.clone(),
        });
        Ok(session)
    }

    async fn send_magic_link(&self, email: &str, redirect_to: Option<&str>) -> Result<()> {
        let params: Vec<(&str, &str)> = redirect_to.map(|to| ("redirect_to", to)).into_iter().collect();
        let url = self.url("auth/v1/otp", &params)?;
        let builder = self
            .request(Method::POST, url, None)
            .json(&json!({ "email": email, "create_user": true }));
        self.send("auth.otp", builder).await?;
        Ok(())
    }

    fn oauth_authorize_url(&self, provider: &str, redirect_to: Option<&str>) -> Result<String> {
        let mut params = vec![("provider", provider)];
        if let Some(to) = redirect_to {
            params.push(("redirect_to", to));
        }
        Ok(self.url("auth/v1/authorize", &params)?.to_string())
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: Option<&str>,
    ) -> Result<Option<Session>> {
        let params: Vec<(&str, &str)> = redirect_to.map(|to| ("redirect_to", to)).into_iter().collect();
        let url = self.url("auth/v1/signup", &params)?;
        let builder = self
            .request(Method::POST, url, None)
            .json(&json!({ "email": email, "password": password }));
        let body: serde_json::Value = self.send_json("auth.signup", builder).await?;

        // Projects that require email confirmation answer with a bare user.
        if body.get("access_token").is_none() {
            return Ok(None);
        }
        let token: TokenResponse = serde_json::from_value(body)?;
        let session = token.into_session(Utc::now());
        self.events.emit(AuthEvent::SignedIn {
            user: session.user.clone(),
        });
        Ok(Some(session))
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        let url = self.url("auth/v1/logout", &[])?;
        self.send(
            "auth.logout",
            self.request(Method::POST, url, Some(&session.access_token)),
        )
        .await?;
        self.events.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn request_password_reset(&self, email: &str, redirect_to: Option<&str>) -> Result<()> {
        let params: Vec<(&str, &str)> = redirect_to.map(|to| ("redirect_to", to)).into_iter().collect();
        let url = self.url("auth/v1/recover", &params)?;
        let builder = self
            .request(Method::POST, url, None)
            .json(&json!({ "email": email }));
        self.send("auth.recover", builder).await?;
        self.events.emit(AuthEvent::PasswordRecovery);
        Ok(())
    }

    async fn update_password(&self, session: &Session, password: &str) -> Result<User> {
        let url = self.url("auth/v1/user", &[])?;
        let builder = self
            .request(Method::PUT, url, Some(&session.access_token))
            .json(&json!({ "password": password }));
        let user: User = self.send_json("auth.update_user", builder).await?;
        self.events.emit(AuthEvent::UserUpdated);
        Ok(user)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session> {
        let session = self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await?;
        self.events.emit(AuthEvent::TokenRefreshed);
        Ok(session)
    }

    async fn current_user(&self, session: &Session) -> Result<User> {
        let url = self.url("auth/v1/user", &[])?;
        self.send_json(
            "auth.user",
            self.request(Method::GET, url, Some(&session.access_token)),
        )
        .await
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or_else(|| {
                self.expires_in
                    .map(|secs| now + chrono::Duration::seconds(secs))
            });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Error bodies differ between the table API and the auth API.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn parse_error_body(body: &str) -> (Option<String>, String) {
    let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
        return (None, body.trim().to_string());
    };
    let code = match parsed.code {
        Some(serde_json::Value::String(code)) => Some(code),
        Some(serde_json::Value::Number(code)) => Some(code.to_string()),
        _ => parsed.error_code,
    };
    let message = parsed
        .message
        .or(parsed.msg)
        .or(parsed.error_description)
        .or(parsed.error)
        .unwrap_or_else(|| body.trim().to_string());
    (code, message)
}
