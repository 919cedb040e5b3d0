//! Reddit OAuth client covering the handful of endpoints the migration needs.

use crate::config::RedditConfig;
use crate::templates::FlairTemplate;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use reqwest::{header, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::RwLock;

/// `/api/info` accepts at most this many fullnames per request.
pub const INFO_BATCH_SIZE: usize = 100;

const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Error, Debug)]
pub enum RedditError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: StatusCode,
        body: String,
    },
    #[error("{endpoint} rejected the request: {message}")]
    Api { endpoint: String, message: String },
    #[error("invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },
}

/// Flair state of one submission as reported by `/api/info`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubmissionFlair {
    /// Fullname, `t3_<id>`.
    pub name: String,
    #[serde(default)]
    pub link_flair_text: Option<String>,
    #[serde(default)]
    pub link_flair_template_id: Option<String>,
}

/// Platform operations the migration depends on.
#[async_trait]
pub trait FlairApi: Send + Sync {
    async fn link_flair_templates(&self, subreddit: &str) -> Result<Vec<FlairTemplate>, RedditError>;

    /// Subreddit creation time in seconds since the epoch.
    async fn subreddit_created_utc(&self, subreddit: &str) -> Result<i64, RedditError>;

    /// Current flair of up to [`INFO_BATCH_SIZE`] submissions. Fullnames that
    /// no longer exist are absent from the result.
    async fn submission_info(&self, fullnames: &[String]) -> Result<Vec<SubmissionFlair>, RedditError>;

    async fn select_flair(
        &self,
        subreddit: &str,
        fullname: &str,
        template: &FlairTemplate,
    ) -> Result<(), RedditError>;
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Utc::now() + Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct Thing<T> {
    data: T,
}

#[derive(Deserialize)]
struct Listing<T> {
    children: Vec<Thing<T>>,
}

#[derive(Deserialize)]
struct SubredditAbout {
    created_utc: f64,
}

#[derive(Deserialize)]
struct ApiJsonResponse {
    json: ApiJsonBody,
}

#[derive(Deserialize)]
struct ApiJsonBody {
    #[serde(default)]
    errors: Vec<JsonValue>,
}

pub struct RedditClient {
    http: reqwest::Client,
    config: RedditConfig,
    token: RwLock<AccessToken>,
}

impl RedditClient {
    /// Authenticates with the script-app password grant.
    pub async fn login(config: RedditConfig) -> Result<Self, RedditError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        let token = request_token(&http, &config).await?;
        info!("Authenticated against Reddit as u/{}", config.username);
        Ok(Self {
            http,
            config,
            token: RwLock::new(token),
        })
    }

    async fn bearer(&self) -> Result<String, RedditError> {
        {
            let token = self.token.read().await;
            if token.is_fresh() {
                return Ok(token.value.clone());
            }
        }
        let mut token = self.token.write().await;
        // Another task may have refreshed while we waited for the lock.
        if !token.is_fresh() {
            debug!("Access token expiring at {}, refreshing", token.expires_at);
            *token = request_token(&self.http, &self.config).await?;
        }
        Ok(token.value.clone())
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, RedditError> {
        let resp = self
            .http
            .get(self.api_url(path))
            .header(header::AUTHORIZATION, format!("bearer {}", self.bearer().await?))
            .query(query)
            .send()
            .await?;
        let body = checked_body(path, resp).await?;
        serde_json::from_str(&body).map_err(|e| RedditError::InvalidResponse {
            endpoint: path.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl FlairApi for RedditClient {
    async fn link_flair_templates(&self, subreddit: &str) -> Result<Vec<FlairTemplate>, RedditError> {
        let path = format!("/r/{subreddit}/api/link_flair_v2");
        self.get_json(&path, &[("raw_json", "1")]).await
    }

    async fn subreddit_created_utc(&self, subreddit: &str) -> Result<i64, RedditError> {
        let path = format!("/r/{subreddit}/about");
        let about: Thing<SubredditAbout> = self.get_json(&path, &[("raw_json", "1")]).await?;
        Ok(about.data.created_utc as i64)
    }

    async fn submission_info(&self, fullnames: &[String]) -> Result<Vec<SubmissionFlair>, RedditError> {
        if fullnames.is_empty() {
            return Ok(Vec::new());
        }
        let ids = fullnames.join(",");
        let listing: Thing<Listing<SubmissionFlair>> = self
            .get_json("/api/info", &[("id", ids.as_str()), ("raw_json", "1")])
            .await?;
        Ok(listing.data.children.into_iter().map(|c| c.data).collect())
    }

    async fn select_flair(
        &self,
        subreddit: &str,
        fullname: &str,
        template: &FlairTemplate,
    ) -> Result<(), RedditError> {
        let path = format!("/r/{subreddit}/api/selectflair");
        let form = [
            ("api_type", "json"),
            ("link", fullname),
            ("flair_template_id", template.id.as_str()),
            ("text", template.text.as_str()),
            ("css_class", template.css_class.as_deref().unwrap_or("")),
        ];
        let resp = self
            .http
            .post(self.api_url(&path))
            .header(header::AUTHORIZATION, format!("bearer {}", self.bearer().await?))
            .form(&form)
            .send()
            .await?;
        let body = checked_body(&path, resp).await?;
        let parsed: ApiJsonResponse = serde_json::from_str(&body).map_err(|e| RedditError::InvalidResponse {
            endpoint: path.clone(),
            message: e.to_string(),
        })?;
        if !parsed.json.errors.is_empty() {
            return Err(RedditError::Api {
                endpoint: path,
                message: JsonValue::Array(parsed.json.errors).to_string(),
            });
        }
        Ok(())
    }
}

async fn request_token(http: &reqwest::Client, config: &RedditConfig) -> Result<AccessToken, RedditError> {
    let url = format!("{}/api/v1/access_token", config.auth_url.trim_end_matches('/'));
    let resp = http
        .post(&url)
        .basic_auth(&config.client_id, Some(&config.client_secret))
        .form(&[
            ("grant_type", "password"),
            ("username", config.username.as_str()),
            ("password", config.password.as_str()),
        ])
        .send()
        .await?;

    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RedditError::Auth(format!("token endpoint returned {status}")));
    }
    let body = checked_body("/api/v1/access_token", resp).await?;
    let token: TokenResponse = serde_json::from_str(&body).map_err(|e| RedditError::InvalidResponse {
        endpoint: "/api/v1/access_token".to_string(),
        message: e.to_string(),
    })?;

    // Bad credentials come back as 200 with an `error` field.
    if let Some(error) = token.error {
        return Err(RedditError::Auth(error));
    }
    let value = token
        .access_token
        .ok_or_else(|| RedditError::Auth("no access_token in response".to_string()))?;
    Ok(AccessToken {
        value,
        expires_at: Utc::now() + Duration::seconds(token.expires_in.unwrap_or(3600)),
    })
}

async fn checked_body(endpoint: &str, resp: reqwest::Response) -> Result<String, RedditError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(RedditError::Status {
            endpoint: endpoint.to_string(),
            status,
            body: body.chars().take(500).collect(),
        });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> RedditConfig {
        RedditConfig {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            username: "modbot".to_string(),
            password: "hunter2".to_string(),
            user_agent: "flair-migrator-test".to_string(),
            auth_url: server.uri(),
            api_url: server.uri(),
        }
    }

    async fn mount_token(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-123",
                "token_type": "bearer",
                "expires_in": 3600,
                "scope": "*"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_login_success() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        let client = RedditClient::login(config(&server)).await.unwrap();
        assert_eq!(client.bearer().await.unwrap(), "tok-123");
    }

    #[tokio::test]
    async fn test_login_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "invalid_grant"
            })))
            .mount(&server)
            .await;
        let err = RedditClient::login(config(&server)).await.err().unwrap();
        assert!(matches!(err, RedditError::Auth(ref m) if m == "invalid_grant"));
    }

    #[tokio::test]
    async fn test_link_flair_templates() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/r/rust/api/link_flair_v2"))
            .and(header_eq("authorization", "bearer tok-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"text": "How-To", "id": "t1", "css_class": "guide", "type": "text"},
                {"text": "Meta Discussion", "id": "t2", "css_class": ""}
            ])))
            .mount(&server)
            .await;

        let client = RedditClient::login(config(&server)).await.unwrap();
        let templates = client.link_flair_templates("rust").await.unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].id, "t1");
        assert_eq!(templates[1].text, "Meta Discussion");
    }

    #[tokio::test]
    async fn test_subreddit_created_utc() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/r/rust/about"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "t5",
                "data": {"display_name": "rust", "created_utc": 1_261_528_496.0}
            })))
            .mount(&server)
            .await;

        let client = RedditClient::login(config(&server)).await.unwrap();
        assert_eq!(client.subreddit_created_utc("rust").await.unwrap(), 1_261_528_496);
    }

    #[tokio::test]
    async fn test_submission_info() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/info"))
            .and(query_param("id", "t3_p1,t3_p4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "Listing",
                "data": {"children": [
                    {"kind": "t3", "data": {"name": "t3_p1", "id": "p1", "link_flair_text": "how-to", "link_flair_template_id": null}},
                    {"kind": "t3", "data": {"name": "t3_p4", "id": "p4", "link_flair_text": null}}
                ]}
            })))
            .mount(&server)
            .await;

        let client = RedditClient::login(config(&server)).await.unwrap();
        let posts = client
            .submission_info(&["t3_p1".to_string(), "t3_p4".to_string()])
            .await
            .unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].link_flair_text.as_deref(), Some("how-to"));
        assert_eq!(posts[1].link_flair_text, None);
    }

    #[tokio::test]
    async fn test_select_flair() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/r/rust/api/selectflair"))
            .and(body_string_contains("link=t3_p1"))
            .and(body_string_contains("flair_template_id=t1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "json": {"errors": []}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RedditClient::login(config(&server)).await.unwrap();
        let template = FlairTemplate {
            text: "How-To".to_string(),
            id: "t1".to_string(),
            css_class: Some("guide".to_string()),
        };
        client.select_flair("rust", "t3_p1", &template).await.unwrap();
    }

    #[tokio::test]
    async fn test_select_flair_api_errors() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/r/rust/api/selectflair"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "json": {"errors": [["BAD_FLAIR_TEMPLATE_ID", "that flair template is invalid", "flair_template_id"]]}
            })))
            .mount(&server)
            .await;

        let client = RedditClient::login(config(&server)).await.unwrap();
        let template = FlairTemplate {
            text: "How-To".to_string(),
            id: "bogus".to_string(),
            css_class: None,
        };
        let err = client.select_flair("rust", "t3_p1", &template).await.unwrap_err();
        assert!(matches!(err, RedditError::Api { .. }));
        assert!(err.to_string().contains("BAD_FLAIR_TEMPLATE_ID"));
    }

    #[tokio::test]
    async fn test_select_flair_forbidden() {
        let server = MockServer::start().await;
        mount_token(&server).await;
        Mock::given(method("POST"))
            .and(path("/r/rust/api/selectflair"))
            .respond_with(ResponseTemplate::new(403).set_body_string(r#"{"message": "Forbidden", "error": 403}"#))
            .mount(&server)
            .await;

        let client = RedditClient::login(config(&server)).await.unwrap();
        let template = FlairTemplate {
            text: "How-To".to_string(),
            id: "t1".to_string(),
            css_class: None,
        };
        let err = client.select_flair("rust", "t3_p1", &template).await.unwrap_err();
        assert!(matches!(err, RedditError::Status { status: StatusCode::FORBIDDEN, .. }));
    }
}
