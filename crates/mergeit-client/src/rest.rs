//! HTTP plumbing shared by every endpoint of the repository server API.

use reqwest::{Client as HttpClient, Method, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

use crate::error::{ClientError, ClientResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client of the repository server REST API (`/api/v1/...`).
#[derive(Debug, Clone)]
pub struct RestApi {
    http: HttpClient,
    base_url: Url,
    api_key: String,
}

impl RestApi {
    pub fn new(base_url: Url, api_key: impl Into<String>) -> ClientResult<Self> {
        let http = HttpClient::builder()
            .user_agent(concat!("mergeit/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.into(),
        })
    }

    pub fn from_url(base_url: &str, api_key: impl Into<String>) -> ClientResult<Self> {
        Self::new(Url::parse(base_url)?, api_key)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str, action: &str) -> ClientResult<T> {
        let response = self.send(Method::GET, path, None::<&()>, action).await?;
        Self::json(response).await
    }

    pub(crate) async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        action: &str,
    ) -> ClientResult<T> {
        let response = self.send(method, path, Some(body), action).await?;
        Self::json(response).await
    }

    /// Send a request whose response body is ignored.
    pub(crate) async fn execute<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        action: &str,
    ) -> ClientResult<()> {
        self.send(method, path, body, action).await?;
        Ok(())
    }

    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        action: &str,
    ) -> ClientResult<Response> {
        let url = self.base_url.join(path)?;
        debug!(method = %method, url = %url, "Calling server API");

        let mut request = self
            .http
            .request(method, url)
            .header("Authorization", format!("ApiKey {}", self.api_key));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = ClientError::Status {
            action: action.to_string(),
            status,
            body,
        };
        if status != reqwest::StatusCode::NOT_FOUND {
            error!(error = %err, "Server API call failed");
        }
        Err(err)
    }

    async fn json<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Fill the `{}` placeholders of an endpoint template with escaped arguments.
pub(crate) fn endpoint(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut rest = template;
    while let Some(idx) = rest.find("{}") {
        out.push_str(&rest[..idx]);
        if let Some(arg) = args.next() {
            out.push_str(&urlencoding::encode(arg));
        }
        rest = &rest[idx + 2..];
    }
    out.push_str(rest);
    out
}

/// Branch names go into paths without their leading slash.
pub(crate) fn target_name(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

/// Lenient boolean parsing of `SingleResponse` values.
pub(crate) fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_escapes_arguments() {
        assert_eq!(
            endpoint("/api/v1/repos/{}/branches/{}", &["my repo", "main/task 1"]),
            "/api/v1/repos/my%20repo/branches/main%2Ftask%201"
        );
        assert_eq!(
            endpoint("/api/v1/repos/{}/mergeto/allowed/{}?to={}", &["codice", "main/t1", "main"]),
            "/api/v1/repos/codice/mergeto/allowed/main%2Ft1?to=main"
        );
    }

    #[test]
    fn test_target_name() {
        assert_eq!(target_name("/main/task1"), "main/task1");
        assert_eq!(target_name("main"), "main");
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("True"));
        assert!(parse_bool(" true "));
        assert!(!parse_bool("yes"));
        assert!(!parse_bool(""));
    }
}
