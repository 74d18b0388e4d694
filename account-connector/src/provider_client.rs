//! HTTP client for the remote automation API

use std::time::Duration;

use account_connector_core::{
    AccountList, ConnectRequest, ConnectResponse, Error as ProviderError, ProviderClient,
    RemoteAccount, Result as ProviderResult, SolveCheckpointRequest, SolveCheckpointResponse,
    SolveOutcome,
};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::ProviderConfig;

const API_KEY_HEADER: &str = "X-API-KEY";

/// [`ProviderClient`] backed by the provider's REST API
#[derive(Clone)]
pub struct HttpProviderClient {
    base_url: String,
    api_key: String,
    http: Client,
}

impl HttpProviderClient {
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(transport)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            http,
        })
    }

    /// Probe the API with an authenticated request
    pub async fn check_connection(&self) -> ProviderResult<()> {
        self.list_accounts().await.map(|_| ())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header(API_KEY_HEADER, &self.api_key)
            .header(ACCEPT, "application/json")
    }
}

fn transport(err: reqwest::Error) -> ProviderError {
    ProviderError::Transport(err.to_string())
}

/// Send a request and read the whole body
async fn send(request: RequestBuilder) -> ProviderResult<(StatusCode, String)> {
    let response = request.send().await.map_err(transport)?;
    let status = response.status();
    let body = response.text().await.map_err(transport)?;
    Ok((status, body))
}

fn api_error(status: StatusCode, body: String) -> ProviderError {
    ProviderError::Api {
        status: status.as_u16(),
        body,
    }
}

fn parse<T: DeserializeOwned>(body: &str) -> ProviderResult<T> {
    Ok(serde_json::from_str(body)?)
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn connect(&self, request: &ConnectRequest) -> ProviderResult<ConnectResponse> {
        let builder = self.request(Method::POST, "/api/v1/accounts").json(request);
        let (status, body) = send(builder).await?;

        match status {
            StatusCode::OK | StatusCode::CREATED => {
                let mut response: ConnectResponse = parse(&body)?;
                response.status = status.as_u16();
                response.raw_body = body;
                Ok(response)
            }
            _ => Err(api_error(status, body)),
        }
    }

    async fn solve_checkpoint(
        &self,
        request: &SolveCheckpointRequest,
    ) -> ProviderResult<SolveOutcome> {
        let builder = self
            .request(Method::POST, "/api/v1/accounts/checkpoint")
            .json(request);
        let (status, body) = send(builder).await?;

        match status {
            StatusCode::OK | StatusCode::CREATED => {
                let response: SolveCheckpointResponse = parse(&body)?;
                Ok(match response.checkpoint {
                    Some(checkpoint) => SolveOutcome::NextCheckpoint(checkpoint),
                    None => SolveOutcome::Solved {
                        account_id: response
                            .account_id
                            .unwrap_or_else(|| request.account_id.clone()),
                    },
                })
            }
            StatusCode::UNAUTHORIZED => Err(ProviderError::InvalidOrExpiredCheckpoint),
            _ => {
                let intent_error = serde_json::from_str::<SolveCheckpointResponse>(&body)
                    .map(|r| r.is_authentication_intent_error())
                    .unwrap_or(false);
                if intent_error {
                    Err(ProviderError::InvalidOrExpiredCheckpoint)
                } else {
                    Err(api_error(status, body))
                }
            }
        }
    }

    async fn get_status(
        &self,
        account_id: &str,
        timeout: Option<Duration>,
    ) -> ProviderResult<RemoteAccount> {
        let path = format!("/api/v1/accounts/{}", account_id);
        let mut request = self.request(Method::GET, &path);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let (status, body) = send(request).await?;

        match status {
            StatusCode::OK => parse(&body),
            StatusCode::NOT_FOUND => Err(ProviderError::AccountNotFound),
            _ => Err(api_error(status, body)),
        }
    }

    async fn delete_account(&self, account_id: &str) -> ProviderResult<()> {
        let path = format!("/api/v1/accounts/{}", account_id);
        let (status, body) = send(self.request(Method::DELETE, &path)).await?;

        match status {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(ProviderError::AccountNotFound),
            _ => Err(api_error(status, body)),
        }
    }

    async fn list_accounts(&self) -> ProviderResult<AccountList> {
        let (status, body) = send(self.request(Method::GET, "/api/v1/accounts")).await?;

        match status {
            StatusCode::OK => parse(&body),
            _ => Err(api_error(status, body)),
        }
    }
}
