//! 실시간 연결 자격 증명
//!
//! [`CredentialProvider`]는 현재 토큰과 갱신 수단을 제공합니다. 연결 태스크는
//! 만료 `refresh_margin` 전에 `refresh`를 호출하고, 성공하면 연결을 유지한 채
//! `access_token` 메시지로 토큰을 교체합니다.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::config::RealtimeSinkConfig;
use crate::error::SinkError;

/// 접근 토큰 + 만료 시각
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    /// 만료 시각 (알 수 없으면 `None`)
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
        }
    }

    /// 지금부터 갱신 시점까지 남은 시간 (`expires_at - margin`)
    pub fn refresh_in(&self, margin: Duration, now: DateTime<Utc>) -> Option<Duration> {
        let expires_at = self.expires_at?;
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        let remaining = (expires_at - margin) - now;
        Some(remaining.to_std().unwrap_or(Duration::ZERO))
    }
}

/// 자격 증명 공급자
pub trait CredentialProvider: Send + Sync + 'static {
    /// 현재 자격 증명
    fn current(&self) -> impl Future<Output = Result<Credential, SinkError>> + Send;

    /// 새 자격 증명을 발급받습니다. 갱신을 지원하지 않으면 현재 값을 돌려줍니다.
    fn refresh(&self) -> impl Future<Output = Result<Credential, SinkError>> + Send;

    /// 갱신 가능 여부
    fn can_refresh(&self) -> bool {
        false
    }
}

/// 고정 토큰 (설정된 access_token, 없으면 anon API 키)
#[derive(Clone)]
pub struct StaticCredentials {
    credential: Credential,
}

impl StaticCredentials {
    pub fn new(access_token: Option<String>, api_key: &str) -> Self {
        let token = access_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| api_key.to_owned());
        Self {
            credential: Credential::new(token),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    async fn current(&self) -> Result<Credential, SinkError> {
        Ok(self.credential.clone())
    }

    async fn refresh(&self) -> Result<Credential, SinkError> {
        Ok(self.credential.clone())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct RefreshState {
    credential: Credential,
    refresh_token: String,
}

/// refresh token 기반 자격 증명 (`POST {auth_url}/auth/v1/token?grant_type=refresh_token`)
///
/// 서버가 새 refresh token을 돌려주면 교체합니다.
pub struct RefreshTokenCredentials {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
    state: Mutex<RefreshState>,
}

impl RefreshTokenCredentials {
    pub fn new(
        auth_url: &str,
        api_key: impl Into<String>,
        initial: Credential,
        refresh_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        Ok(Self {
            client: crate::http::build_client(timeout)?,
            endpoint: format!(
                "{}/auth/v1/token?grant_type=refresh_token",
                auth_url.trim_end_matches('/')
            ),
            api_key: api_key.into(),
            timeout,
            state: Mutex::new(RefreshState {
                credential: initial,
                refresh_token: refresh_token.into(),
            }),
        })
    }

    fn refresh_token(&self) -> String {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh_token
            .clone()
    }
}

impl CredentialProvider for RefreshTokenCredentials {
    async fn current(&self) -> Result<Credential, SinkError> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .credential
            .clone())
    }

    async fn refresh(&self) -> Result<Credential, SinkError> {
        let body = serde_json::json!({ "refresh_token": self.refresh_token() });
        let request = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.api_key)
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| SinkError::Timeout(self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SinkError::Auth(format!("token refresh rejected ({status}): {text}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SinkError::Auth(format!("invalid token response: {e}")))?;
        let credential = Credential {
            access_token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        };

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.credential = credential.clone();
        if let Some(rotated) = token.refresh_token.filter(|t| !t.is_empty()) {
            state.refresh_token = rotated;
        }
        info!(expires_at = ?credential.expires_at, "realtime credential refreshed");
        Ok(credential)
    }

    fn can_refresh(&self) -> bool {
        true
    }
}

/// 설정으로 결정되는 공급자
///
/// `refresh_token`과 `auth_url`이 모두 있으면 갱신형, 아니면 고정 토큰입니다.
/// 갱신형에서 `access_token`이 비어 있으면 첫 접속 전에 바로 갱신합니다.
pub enum ConfiguredCredentials {
    Static(StaticCredentials),
    Refresh(RefreshTokenCredentials),
}

impl ConfiguredCredentials {
    pub fn from_config(config: &RealtimeSinkConfig) -> Result<Self, SinkError> {
        match (&config.refresh_token, &config.auth_url) {
            (Some(refresh_token), Some(auth_url)) => {
                let initial = match &config.access_token {
                    Some(token) => Credential::new(token.clone()),
                    None => Credential {
                        access_token: config.api_key.clone(),
                        expires_at: Some(Utc::now()),
                    },
                };
                Ok(Self::Refresh(RefreshTokenCredentials::new(
                    auth_url,
                    config.api_key.clone(),
                    initial,
                    refresh_token.clone(),
                    config.request_timeout,
                )?))
            }
            _ => Ok(Self::Static(StaticCredentials::new(
                config.access_token.clone(),
                &config.api_key,
            ))),
        }
    }
}

impl CredentialProvider for ConfiguredCredentials {
    async fn current(&self) -> Result<Credential, SinkError> {
        match self {
            Self::Static(c) => c.current().await,
            Self::Refresh(c) => c.current().await,
        }
    }

    async fn refresh(&self) -> Result<Credential, SinkError> {
        match self {
            Self::Static(c) => c.refresh().await,
            Self::Refresh(c) => c.refresh().await,
        }
    }

    fn can_refresh(&self) -> bool {
        match self {
            Self::Static(c) => c.can_refresh(),
            Self::Refresh(c) => c.can_refresh(),
        }
    }
}
