//! Request authentication. Each scheme decorates an outgoing request once;
//! OAuth2 additionally supports a refresh-token grant through
//! [`TokenRefresher`].

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use actionkit_core::{ActionError, ActionResult, ErrorCode};

use crate::transport::{HttpRequest, Transport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum AuthConfig {
    None,
    ApiKey {
        header: String,
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    Basic {
        username: String,
        #[serde(default)]
        password: String,
    },
    Bearer {
        token: String,
    },
    QueryParam {
        name: String,
        value: String,
    },
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Credentials),
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Credentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Overrides the refresher's default token endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
}

/// New tokens from a refresh. Returned to the host on the dispatch result
/// so it can persist them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshedToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl AuthConfig {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn scheme_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ApiKey { .. } => "api_key",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::QueryParam { .. } => "query_param",
            Self::OAuth2(_) => "oauth2",
        }
    }

    pub fn oauth(&self) -> Option<&OAuth2Credentials> {
        match self {
            Self::OAuth2(creds) => Some(creds),
            _ => None,
        }
    }

    pub fn decorate(&self, request: &mut HttpRequest) {
        match self {
            Self::None => {}
            Self::ApiKey {
                header,
                key,
                prefix,
            } => {
                let value = match prefix {
                    Some(p) => format!("{p} {key}"),
                    None => key.clone(),
                };
                request.set_header(header.as_str(), value);
            }
            Self::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                request.set_header("Authorization", format!("Basic {encoded}"));
            }
            Self::Bearer { token } => {
                request.set_header("Authorization", format!("Bearer {token}"));
            }
            Self::QueryParam { name, value } => {
                request.query.retain(|(n, _)| n != name);
                request.query.push((name.clone(), value.clone()));
            }
            Self::OAuth2(creds) => {
                request.set_header("Authorization", format!("Bearer {}", creds.access_token));
            }
        }
    }

    /// Copy of this config with the refreshed tokens applied.
    pub fn with_refreshed(&self, token: &RefreshedToken) -> Self {
        match self {
            Self::OAuth2(creds) => Self::OAuth2(OAuth2Credentials {
                access_token: token.access_token.clone(),
                refresh_token: token
                    .refresh_token
                    .clone()
                    .or_else(|| creds.refresh_token.clone()),
                ..creds.clone()
            }),
            other => other.clone(),
        }
    }
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, credentials: &OAuth2Credentials) -> ActionResult<RefreshedToken>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Standard `grant_type=refresh_token` form POST.
pub struct OAuth2TokenRefresher {
    transport: Arc<dyn Transport>,
    token_url: String,
}

impl OAuth2TokenRefresher {
    pub fn new(transport: Arc<dyn Transport>, token_url: impl Into<String>) -> Self {
        Self {
            transport,
            token_url: token_url.into(),
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuth2TokenRefresher {
    async fn refresh(&self, credentials: &OAuth2Credentials) -> ActionResult<RefreshedToken> {
        let refresh_token = credentials.refresh_token.clone().ok_or_else(|| {
            ActionError::Authentication {
                message: "No refresh token available".to_string(),
                code: ErrorCode::RefreshTokenExpired,
            }
        })?;
        let url = credentials
            .token_url
            .clone()
            .unwrap_or_else(|| self.token_url.clone());

        debug!(token_url = %url, "refreshing OAuth access token");

        let request = HttpRequest::post(url).form(vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token),
            ("client_id".to_string(), credentials.client_id.clone()),
            ("client_secret".to_string(), credentials.client_secret.clone()),
        ]);

        let response = self.transport.send(request).await.map_err(|e| {
            ActionError::Authentication {
                message: format!("Failed to refresh access token: {e}"),
                code: ErrorCode::OauthRefreshFailed,
            }
        })?;

        if !response.is_success() {
            warn!(status = response.status, "token refresh rejected");
            let code = if response.body.contains("invalid_grant") {
                ErrorCode::RefreshTokenExpired
            } else {
                ErrorCode::OauthRefreshFailed
            };
            return Err(ActionError::Authentication {
                message: "Failed to refresh access token".to_string(),
                code,
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&response.body).map_err(|e| ActionError::Authentication {
                message: format!("Failed to parse token response: {e}"),
                code: ErrorCode::OauthRefreshFailed,
            })?;

        Ok(RefreshedToken {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decorate_schemes() {
        let mut req = HttpRequest::get("https://api.example.com");
        AuthConfig::basic("AC123", "secret").decorate(&mut req);
        assert_eq!(req.header_value("authorization"), Some("Basic QUMxMjM6c2VjcmV0"));

        let mut req = HttpRequest::get("https://api.example.com");
        AuthConfig::ApiKey {
            header: "Authorization".into(),
            key: "k-1".into(),
            prefix: Some("ApiKey".into()),
        }
        .decorate(&mut req);
        assert_eq!(req.header_value("Authorization"), Some("ApiKey k-1"));

        let mut req = HttpRequest::get("https://api.example.com").query_param("api_key", "old");
        AuthConfig::QueryParam {
            name: "api_key".into(),
            value: "new".into(),
        }
        .decorate(&mut req);
        assert_eq!(req.query, vec![("api_key".to_string(), "new".to_string())]);
    }

    #[test]
    fn test_with_refreshed_keeps_old_refresh_token() {
        let auth = AuthConfig::OAuth2(OAuth2Credentials {
            access_token: "old".into(),
            refresh_token: Some("r-1".into()),
            client_id: "cid".into(),
            ..Default::default()
        });
        let refreshed = auth.with_refreshed(&RefreshedToken {
            access_token: "new".into(),
            refresh_token: None,
        });
        let creds = refreshed.oauth().unwrap();
        assert_eq!(creds.access_token, "new");
        assert_eq!(creds.refresh_token.as_deref(), Some("r-1"));
        assert_eq!(creds.client_id, "cid");
    }

    #[test]
    fn test_auth_config_deserializes_tagged() {
        let auth: AuthConfig = serde_json::from_value(json!({
            "scheme": "oauth2",
            "access_token": "a",
            "refresh_token": "r"
        }))
        .unwrap();
        assert_eq!(auth.scheme_name(), "oauth2");

        let auth: AuthConfig =
            serde_json::from_value(json!({ "scheme": "bearer", "token": "t" })).unwrap();
        assert_eq!(auth, AuthConfig::bearer("t"));
    }
}
