use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use url::Url;

use crate::config::StoreConfig;
use crate::store::{QuadStore, StoreConnector, StoreError};
use crate::types::{PendingTransaction, WorkerId};

const NQUADS_CONTENT_TYPE: &str = "application/n-quads";
const WRITE_PATH: &str = "api/v2/write";

/// Connector for a quad-store exposing a Cayley-style HTTP write endpoint.
///
/// Each `open` builds a dedicated client so workers never share a connection
/// pool.
pub struct HttpConnector {
    base: Url,
    write_url: Url,
    username: Option<String>,
    password: Option<String>,
    request_timeout: Duration,
}

impl HttpConnector {
    pub fn new(cfg: &StoreConfig) -> Result<Self, StoreError> {
        let mut base = Url::parse(&cfg.endpoint).map_err(|e| StoreError::Connection {
            endpoint: cfg.endpoint.clone(),
            reason: format!("invalid endpoint: {e}"),
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let write_url = base.join(WRITE_PATH).map_err(|e| StoreError::Connection {
            endpoint: cfg.endpoint.clone(),
            reason: format!("invalid write path: {e}"),
        })?;
        Ok(Self {
            base,
            write_url,
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
        })
    }

    pub fn write_url(&self) -> &Url {
        &self.write_url
    }

    fn connection_error(&self, reason: impl Into<String>) -> StoreError {
        StoreError::Connection {
            endpoint: self.base.to_string(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl StoreConnector for HttpConnector {
    async fn open(&self, worker: WorkerId) -> Result<Box<dyn QuadStore>, StoreError> {
        let client = Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| self.connection_error(e.to_string()))?;

        let mut probe = client.get(self.base.clone());
        if let Some(user) = &self.username {
            probe = probe.basic_auth(user, self.password.as_deref());
        }
        let resp = probe
            .send()
            .await
            .map_err(|e| self.connection_error(e.to_string()))?;
        if matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(self.connection_error(format!("authentication rejected ({})", resp.status())));
        }

        tracing::debug!(%worker, endpoint = %self.base, "store handle opened");
        Ok(Box::new(HttpQuadStore {
            client: Some(client),
            write_url: self.write_url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }))
    }

    fn describe(&self) -> String {
        self.base.to_string()
    }
}

pub struct HttpQuadStore {
    client: Option<Client>,
    write_url: Url,
    username: Option<String>,
    password: Option<String>,
}

#[async_trait]
impl QuadStore for HttpQuadStore {
    async fn apply_transaction(&mut self, tx: &PendingTransaction) -> Result<(), StoreError> {
        let client = self.client.as_ref().ok_or(StoreError::Closed)?;
        if tx.is_empty() {
            return Ok(());
        }

        let mut req = client
            .post(self.write_url.clone())
            .header(header::CONTENT_TYPE, NQUADS_CONTENT_TYPE)
            .body(tx.to_nquads());
        if let Some(user) = &self.username {
            req = req.basic_auth(user, self.password.as_deref());
        }

        let resp = req.send().await.map_err(|e| StoreError::Write {
            statements: tx.len(),
            reason: e.to_string(),
        })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let mut body = resp.text().await.unwrap_or_default();
        body.truncate(256);
        Err(StoreError::Write {
            statements: tx.len(),
            reason: format!("{status}: {body}"),
        })
    }

    async fn close(mut self: Box<Self>) -> Result<(), StoreError> {
        self.client.take().map(drop).ok_or(StoreError::Closed)
    }
}
