//! `reqwest` implementations of the downstream service contracts.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clients::retry::RetryPolicy;
use crate::clients::{
    AlertClient, DownstreamError, PathClient, Route, ScheduleClient, ScheduleId, Service,
};
use crate::config::DownstreamConfig;
use crate::error::AppError;

const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Talks to all three downstream services over one shared connection pool.
#[derive(Clone)]
pub struct DownstreamHttpClient {
    client: reqwest::Client,
    config: DownstreamConfig,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct ScheduleRequest<'a> {
    stops: &'a [String],
}

#[derive(Deserialize)]
struct ScheduleResponse {
    schedule_id: RawScheduleId,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScheduleId {
    Text(String),
    Number(i64),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRoute {
    Detailed { path: Value },
    Bare(Value),
}

#[derive(Serialize)]
struct AlertRequest<'a> {
    description: &'a str,
}

impl DownstreamHttpClient {
    pub fn new(config: DownstreamConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| AppError::Internal(format!("failed to build http client: {err}")))?;
        let retry = RetryPolicy::new(config.max_attempts, config.retry_backoff);

        Ok(Self {
            client,
            config,
            retry,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn path_url(&self, schedule_id: &ScheduleId) -> String {
        format!("{}/{}", self.config.path_url.trim_end_matches('/'), schedule_id)
    }
}

fn send_error(service: Service, err: reqwest::Error) -> DownstreamError {
    if err.is_timeout() {
        DownstreamError::Timeout { service }
    } else {
        DownstreamError::Transport {
            service,
            message: err.to_string(),
        }
    }
}

async fn expect_success(service: Service, response: Response) -> Result<Response, DownstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unreadable body".to_string());

    Err(DownstreamError::Status {
        service,
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(service: Service, response: Response) -> Result<T, DownstreamError> {
    response.json::<T>().await.map_err(|err| {
        if err.is_timeout() {
            DownstreamError::Timeout { service }
        } else {
            DownstreamError::InvalidResponse {
                service,
                message: err.to_string(),
            }
        }
    })
}

#[async_trait]
impl ScheduleClient for DownstreamHttpClient {
    async fn create_schedule(&self, stops: &[String]) -> Result<ScheduleId, DownstreamError> {
        let service = Service::Schedule;
        // Shared by every retry of this call so the service can deduplicate.
        let idempotency_key = Uuid::new_v4().to_string();
        let idempotency_key = idempotency_key.as_str();

        let body: ScheduleResponse = self
            .retry
            .run(service, move || async move {
                let response = self
                    .authorized(self.client.post(&self.config.schedule_url))
                    .header(IDEMPOTENCY_KEY_HEADER, idempotency_key)
                    .json(&ScheduleRequest { stops })
                    .send()
                    .await
                    .map_err(|err| send_error(service, err))?;
                let response = expect_success(service, response).await?;
                decode(service, response).await
            })
            .await?;

        let schedule_id = match body.schedule_id {
            RawScheduleId::Text(id) => id,
            RawScheduleId::Number(id) => id.to_string(),
        };

        if schedule_id.trim().is_empty() {
            return Err(DownstreamError::InvalidResponse {
                service,
                message: "empty schedule_id".to_string(),
            });
        }

        Ok(ScheduleId(schedule_id))
    }
}

#[async_trait]
impl PathClient for DownstreamHttpClient {
    async fn routes(&self, schedule_id: &ScheduleId) -> Result<Vec<Route>, DownstreamError> {
        let service = Service::Path;
        let url = self.path_url(schedule_id);
        let url = url.as_str();

        let raw: Vec<RawRoute> = self
            .retry
            .run(service, move || async move {
                let response = self
                    .authorized(self.client.get(url))
                    .send()
                    .await
                    .map_err(|err| send_error(service, err))?;
                let response = expect_success(service, response).await?;
                decode(service, response).await
            })
            .await?;

        Ok(raw
            .into_iter()
            .map(|route| match route {
                RawRoute::Detailed { path } => Route { path },
                RawRoute::Bare(path) => Route { path },
            })
            .collect())
    }
}

#[async_trait]
impl AlertClient for DownstreamHttpClient {
    async fn send(&self, description: &str) -> Result<(), DownstreamError> {
        let service = Service::Alert;
        let response = self
            .authorized(self.client.post(&self.config.alert_url))
            .json(&AlertRequest { description })
            .send()
            .await
            .map_err(|err| send_error(service, err))?;

        expect_success(service, response).await?;
        Ok(())
    }
}
