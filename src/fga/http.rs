//! OpenFGA HTTP API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::dsl;
use super::schema::{
    CreateStoreRequest, CreateStoreResponse, ErrorBody, ReadAuthorizationModelResponse,
    WriteAuthorizationModelResponse,
};
use super::FgaClient;
use crate::config::OperatorConfig;
use crate::Error;

/// [`FgaClient`] over the OpenFGA HTTP API
#[derive(Clone)]
pub struct HttpFgaClient {
    http: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpFgaClient {
    /// Create a client for the given API base URL
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    /// Create a client from operator configuration
    pub fn from_config(config: &OperatorConfig) -> Result<Self, Error> {
        Self::new(
            config.openfga_url.clone(),
            config.openfga_api_token.clone(),
            config.request_timeout(),
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{path}", self.base_url));
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, Error> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::backend(operation, None, e.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(operation, response).await)
    }

    async fn json<T: DeserializeOwned>(
        operation: &'static str,
        response: Response,
    ) -> Result<T, Error> {
        response.json().await.map_err(|e| {
            Error::serialization(format!("{operation}: unexpected response body: {e}"))
        })
    }
}

/// Turn a non-success response into a classified backend error
///
/// OpenFGA reports some missing resources as 400 with a `*_not_found` code;
/// those are normalized to 404 so callers see one not-found shape.
async fn error_from_response(operation: &'static str, response: Response) -> Error {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();

    let message = if body.message.is_empty() {
        match text.trim() {
            "" => status.to_string(),
            raw => raw.to_string(),
        }
    } else {
        body.message
    };
    let code = if body.code.ends_with("not_found") {
        StatusCode::NOT_FOUND.as_u16()
    } else {
        status.as_u16()
    };
    Error::backend(operation, Some(code), message)
}

#[async_trait]
impl FgaClient for HttpFgaClient {
    #[instrument(skip(self))]
    async fn create_store(&self, name: &str) -> Result<String, Error> {
        let request = self
            .request(Method::POST, "/stores")
            .json(&CreateStoreRequest { name });
        let response = self.send("create_store", request).await?;
        let created: CreateStoreResponse = Self::json("create_store", response).await?;
        debug!(store_id = %created.id, "store created");
        Ok(created.id)
    }

    #[instrument(skip(self))]
    async fn delete_store(&self, store_id: &str) -> Result<(), Error> {
        let request = self.request(Method::DELETE, &format!("/stores/{store_id}"));
        match self.send("delete_store", request).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("store already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, model))]
    async fn write_model(&self, store_id: &str, model: &str) -> Result<String, Error> {
        let schema = dsl::parse(model)?;
        let request = self
            .request(Method::POST, &format!("/stores/{store_id}/authorization-models"))
            .json(&schema);
        let response = self.send("write_model", request).await?;
        let written: WriteAuthorizationModelResponse = Self::json("write_model", response).await?;
        debug!(model_id = %written.authorization_model_id, "model written");
        Ok(written.authorization_model_id)
    }

    #[instrument(skip(self))]
    async fn read_model(&self, store_id: &str, model_id: &str) -> Result<String, Error> {
        let request = self.request(
            Method::GET,
            &format!("/stores/{store_id}/authorization-models/{model_id}"),
        );
        let response = self.send("read_model", request).await?;
        let read: ReadAuthorizationModelResponse = Self::json("read_model", response).await?;
        Ok(dsl::print(&read.authorization_model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    const MODEL: &str = "model\n  schema 1.1\ntype user\ntype doc\n  relations\n    define viewer: [user]\n";

    fn client(server: &MockServer, token: Option<&str>) -> HttpFgaClient {
        HttpFgaClient::new(
            server.base_url(),
            token.map(String::from),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_store_posts_name_and_returns_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/stores")
                    .header("authorization", "Bearer secret")
                    .json_body(json!({"name": "docs"}));
                then.status(201).json_body(json!({
                    "id": "01HSTORE",
                    "name": "docs",
                    "created_at": "2024-01-01T00:00:00Z"
                }));
            })
            .await;

        let id = client(&server, Some("secret")).create_store("docs").await.unwrap();

        assert_eq!(id, "01HSTORE");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn write_model_sends_translated_schema() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/stores/abc/authorization-models")
                    .json_body(json!({
                        "schema_version": "1.1",
                        "type_definitions": [
                            {"type": "user"},
                            {
                                "type": "doc",
                                "relations": {"viewer": {"this": {}}},
                                "metadata": {"relations": {
                                    "viewer": {"directly_related_user_types": [{"type": "user"}]}
                                }}
                            }
                        ]
                    }));
                then.status(201)
                    .json_body(json!({"authorization_model_id": "v1"}));
            })
            .await;

        let id = client(&server, None).write_model("abc", MODEL).await.unwrap();

        assert_eq!(id, "v1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn invalid_dsl_never_reaches_the_server() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.any_request();
                then.status(500);
            })
            .await;

        let err = client(&server, None)
            .write_model(
                "abc",
                "model\n  schema 1.1\ntype doc\n  relations\n    define viewer: [usr]\n",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Translation { line: 5, .. }));
        assert!(!err.is_retryable());
        mock.assert_calls_async(0).await;
    }

    #[tokio::test]
    async fn rejected_model_is_a_permanent_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/stores/abc/authorization-models");
                then.status(400).json_body(json!({
                    "code": "validation_error",
                    "message": "cycle detected"
                }));
            })
            .await;

        let err = client(&server, None).write_model("abc", MODEL).await.unwrap_err();

        match &err {
            Error::Backend {
                status, message, ..
            } => {
                assert_eq!(*status, Some(400));
                assert_eq!(message, "cycle detected");
            }
            other => panic!("expected backend error, got {other:?}"),
        }
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/stores");
                then.status(503).body("unavailable");
            })
            .await;

        let err = client(&server, None).create_store("docs").await.unwrap_err();

        assert!(err.is_retryable());
        assert!(err.to_string().contains("unavailable"));
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        let client =
            HttpFgaClient::new("http://127.0.0.1:1", None, Duration::from_millis(500)).unwrap();
        let err = client.create_store("docs").await.unwrap_err();
        assert!(matches!(err, Error::Backend { status: None, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn deleting_a_missing_store_succeeds() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/stores/gone");
                then.status(404).json_body(json!({
                    "code": "store_id_not_found",
                    "message": "store not found"
                }));
            })
            .await;

        client(&server, None).delete_store("gone").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn read_model_returns_dsl() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/stores/abc/authorization-models/v1");
                then.status(200).json_body(json!({
                    "authorization_model": {
                        "id": "v1",
                        "schema_version": "1.1",
                        "type_definitions": [
                            {"type": "user", "relations": {}, "metadata": null},
                            {
                                "type": "doc",
                                "relations": {"viewer": {"this": {}}},
                                "metadata": {"relations": {
                                    "viewer": {"directly_related_user_types": [{"type": "user"}]}
                                }}
                            }
                        ],
                        "conditions": {}
                    }
                }));
            })
            .await;

        let dsl = client(&server, None).read_model("abc", "v1").await.unwrap();

        assert!(dsl::equivalent(&dsl, MODEL).unwrap());
    }

    #[tokio::test]
    async fn unknown_model_version_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/stores/abc/authorization-models/old");
                then.status(400).json_body(json!({
                    "code": "authorization_model_not_found",
                    "message": "the requested authorization model was not found"
                }));
            })
            .await;

        let err = client(&server, None).read_model("abc", "old").await.unwrap_err();

        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }
}
