//! REST/WebSocket implementation of the collaborator traits.
//!
//! Routes, relative to the backend base url:
//! - `POST /documents/{collection}`, `GET|PUT|PATCH|DELETE /documents/{path}`
//! - `GET /listen/{collection}` (WebSocket, one JSON snapshot per text frame)
//! - `PUT|GET|DELETE /objects/{path}`, `GET /objects/{path}?locator=true`,
//!   `GET /objects?prefix=...`
//! - `POST /jobs/{rotate|blur}` using the callable envelope

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header::CONTENT_TYPE, Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;
use shared::{
    domain::TransformKind,
    error::{ApiException, ErrorCode},
    protocol::{
        CallableRequest, CallableResponse, CollectionSnapshot, CreatedDocument, LocatorResponse,
        ObjectMetadata, TransformJobRequest, TransformJobResponse,
    },
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};
use tracing::{debug, warn};
use url::Url;

use crate::remote::{BlobFetcher, DocumentStore, JobBackend, ObjectStore, SnapshotStream};

#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn documents_url(&self, path: &str) -> String {
        format!("{}/documents/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn objects_url(&self, path: &str) -> String {
        format!("{}/objects/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn listen_url(&self, collection: &str) -> Result<String> {
        let ws_base = if self.base_url.starts_with("https://") {
            self.base_url.replacen("https://", "wss://", 1)
        } else if self.base_url.starts_with("http://") {
            self.base_url.replacen("http://", "ws://", 1)
        } else {
            return Err(anyhow!("backend url must start with http:// or https://"));
        };
        Ok(format!(
            "{ws_base}/listen/{}",
            collection.trim_start_matches('/')
        ))
    }
}

#[async_trait]
impl DocumentStore for HttpBackend {
    async fn create(&self, collection: &str, data: Value) -> Result<String> {
        let created: CreatedDocument = self
            .request(Method::POST, self.documents_url(collection))
            .json(&data)
            .send()
            .await
            .with_context(|| format!("failed to create document in {collection}"))?
            .error_for_status()?
            .json()
            .await?;
        Ok(created.id)
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let response = self
            .request(Method::GET, self.documents_url(path))
            .send()
            .await
            .with_context(|| format!("failed to read document {path}"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.error_for_status()?.json().await?;
        Ok(Some(body))
    }

    async fn set(&self, path: &str, data: Value) -> Result<()> {
        self.request(Method::PUT, self.documents_url(path))
            .json(&data)
            .send()
            .await
            .with_context(|| format!("failed to write document {path}"))?
            .error_for_status()?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: Value) -> Result<()> {
        self.request(Method::PATCH, self.documents_url(path))
            .json(&fields)
            .send()
            .await
            .with_context(|| format!("failed to update document {path}"))?
            .error_for_status()?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.request(Method::DELETE, self.documents_url(path))
            .send()
            .await
            .with_context(|| format!("failed to delete document {path}"))?
            .error_for_status()?;
        Ok(())
    }

    async fn subscribe(&self, collection: &str) -> Result<SnapshotStream> {
        let ws_url = self.listen_url(collection)?;
        let mut request = ws_url
            .as_str()
            .into_client_request()
            .with_context(|| format!("invalid listen url: {ws_url}"))?;
        if let Some(token) = &self.bearer_token {
            request.headers_mut().insert(
                "authorization",
                HeaderValue::from_str(&format!("Bearer {token}"))?,
            );
        }
        let (ws_stream, _) = connect_async(request)
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (_, mut ws_reader) = ws_stream.split();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = tx.closed() => {
                        debug!(url = %ws_url, "listen: subscriber dropped");
                        break;
                    }
                    msg = ws_reader.next() => msg,
                };
                let Some(msg) = msg else { break };
                let item = match msg {
                    Ok(Message::Text(text)) => serde_json::from_str::<CollectionSnapshot>(&text)
                        .map_err(|err| anyhow!("invalid collection snapshot: {err}")),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        let _ = tx.send(Err(anyhow!("websocket receive failed: {err}")));
                        break;
                    }
                };
                if tx.send(item).is_err() {
                    debug!(url = %ws_url, "listen: subscriber dropped");
                    break;
                }
            }
        });

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[async_trait]
impl ObjectStore for HttpBackend {
    async fn write(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.request(Method::PUT, self.objects_url(path))
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("failed to write object {path}"))?
            .error_for_status()?;
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let bytes = self
            .request(Method::GET, self.objects_url(path))
            .send()
            .await
            .with_context(|| format!("failed to read object {path}"))?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.request(Method::DELETE, self.objects_url(path))
            .send()
            .await
            .with_context(|| format!("failed to delete object {path}"))?
            .error_for_status()?;
        Ok(())
    }

    async fn locator(&self, path: &str) -> Result<Url> {
        let response: LocatorResponse = self
            .request(Method::GET, self.objects_url(path))
            .query(&[("locator", "true")])
            .send()
            .await
            .with_context(|| format!("failed to resolve locator for {path}"))?
            .error_for_status()?
            .json()
            .await?;
        Url::parse(&response.url)
            .with_context(|| format!("backend returned an invalid locator for {path}"))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMetadata>> {
        let objects = self
            .request(Method::GET, format!("{}/objects", self.base_url))
            .query(&[("prefix", prefix)])
            .send()
            .await
            .with_context(|| format!("failed to list objects under {prefix}"))?
            .error_for_status()?
            .json()
            .await?;
        Ok(objects)
    }
}

#[async_trait]
impl JobBackend for HttpBackend {
    async fn call(
        &self,
        kind: TransformKind,
        request: &TransformJobRequest,
    ) -> Result<TransformJobResponse> {
        let response = self
            .request(
                Method::POST,
                format!("{}/jobs/{}", self.base_url, kind.job_name()),
            )
            .json(&CallableRequest { data: request })
            .send()
            .await
            .with_context(|| format!("failed to call {kind} job"))?;
        let status = response.status();
        let body: CallableResponse<TransformJobResponse> = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                return Err(ApiException::new(
                    ErrorCode::from_status(status.as_u16()),
                    format!("{kind} job returned {status}: {err}"),
                )
                .into())
            }
        };
        if let Some(error) = body.error {
            warn!(kind = %kind, code = ?error.code, "jobs: backend reported an error");
            return Err(ApiException::from(error).into());
        }
        body.result
            .ok_or_else(|| anyhow!("{kind} job returned {status} without a result"))
    }
}

#[async_trait]
impl BlobFetcher for HttpBackend {
    async fn fetch(&self, locator: &Url) -> Result<Vec<u8>> {
        // Locators are pre-signed; the session token is not attached.
        let bytes = self
            .http
            .get(locator.clone())
            .send()
            .await
            .with_context(|| format!("failed to fetch {locator}"))?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
