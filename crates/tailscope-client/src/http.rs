use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;

use tailscope_types::{LogDescriptor, TailUpdate};

use crate::wire;
use crate::{Capabilities, ClientError, PushStream, TailApi, TailRequest};

/// Where the log API lives
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// HTTP root; `logs`, `logs/{name}` and friends are resolved below it
    pub base_url: String,
    /// Push channel endpoint; derived from `base_url` when absent
    pub push_url: Option<String>,
    /// Relative to `base_url`
    pub capabilities_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8088/api/devtools".to_string(),
            push_url: None,
            capabilities_path: "capabilities".to_string(),
        }
    }
}

/// HTTP + WebSocket client for the tail API
#[derive(Clone)]
pub struct TailClient {
    http: Client,
    base: Url,
    push: Url,
    capabilities_path: String,
}

impl TailClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let base = Url::parse(&config.base_url)?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidBaseUrl(config.base_url.clone()));
        }
        let push = match &config.push_url {
            Some(url) => Url::parse(url)?,
            None => derive_push_url(&base)?,
        };
        Ok(Self {
            http: Client::new(),
            base,
            push,
            capabilities_path: config.capabilities_path.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidBaseUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Push channel URL for a subscription
    pub fn push_url(&self, request: &TailRequest) -> Url {
        let mut url = self.push.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("name", &request.name);
            query.append_pair("lines", &request.window.to_string());
            if let Some(cursor) = &request.cursor {
                query.append_pair("cursor", cursor.as_str());
            }
        }
        url
    }

    async fn get_text(&self, url: Url) -> Result<String, ClientError> {
        let res = self.http.get(url).send().await?;
        read_body(res).await
    }
}

async fn read_body(res: reqwest::Response) -> Result<String, ClientError> {
    let status = res.status();
    let body = res.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(ClientError::UnexpectedStatus {
            status,
            message: wire::error_message(&body),
        })
    }
}

/// `http://host/api` -> `ws://host/ws/devtools-logs`
fn derive_push_url(base: &Url) -> Result<Url, ClientError> {
    let scheme = match base.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(ClientError::PushUnavailable(format!(
                "no push transport for scheme {}",
                other
            )));
        }
    };
    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|_| ClientError::PushUnavailable(base.to_string()))?;
    url.set_path("/ws/devtools-logs");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

#[async_trait]
impl TailApi for TailClient {
    async fn list_logs(&self) -> Result<Vec<LogDescriptor>, ClientError> {
        let body = self.get_text(self.endpoint(&["logs"])?).await?;
        wire::decode_log_list(&body)
    }

    async fn fetch_tail(&self, request: &TailRequest) -> Result<TailUpdate, ClientError> {
        let mut url = self.endpoint(&["logs", request.name.as_str()])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("lines", &request.window.to_string());
            if let Some(cursor) = &request.cursor {
                query.append_pair("cursor", cursor.as_str());
            }
        }
        debug!(name = %request.name, cursor = ?request.cursor, "fetching tail");
        let body = self.get_text(url).await?;
        wire::decode_tail(&body, &request.name)
    }

    async fn truncate(&self, name: &str) -> Result<(), ClientError> {
        let url = self.endpoint(&["logs", name, "truncate"])?;
        let res = self
            .http
            .post(url)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        read_body(res).await.map(|_| ())
    }

    async fn capabilities(&self) -> Result<Capabilities, ClientError> {
        let url = self.endpoint(&[self.capabilities_path.as_str()])?;
        let body = self.get_text(url).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn open_push(&self, request: &TailRequest) -> Result<PushStream, ClientError> {
        let url = self.push_url(request);
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::PushUnavailable(url.to_string()));
        }

        let (ws, _) = connect_async(url.as_str()).await?;
        let name = request.name.clone();

        let stream = ws.filter_map(move |frame| {
            let name = name.clone();
            async move {
                match frame {
                    Ok(Message::Text(text)) => match wire::decode_push(&text, &name) {
                        Ok(message) => Some(Ok(message)),
                        Err(e) => {
                            debug!(error = %e, "dropping undecodable push frame");
                            None
                        }
                    },
                    Ok(_) => None,
                    Err(e) => Some(Err(ClientError::from(e))),
                }
            }
        });
        Ok(stream.boxed())
    }
}
