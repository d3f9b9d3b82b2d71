use std::{collections::VecDeque, sync::Arc, time::Duration};

use bytes::Bytes;
use clap::ValueEnum;
use reqwest::{header::HeaderValue, Body, Client, Method, Request, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::{error::DatasetError, model::Model, tokenize::Snippet};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";

const RATE_LIMIT: usize = 1_000_000;
const CHUNK_SIZE: usize = 2048;
const MAX_FAILURE_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum OpenAIModelType {
    Ada2,
    Small3,
    Large3,
}

impl OpenAIModelType {
    fn name(self) -> &'static str {
        match self {
            Self::Ada2 => "text-embedding-ada-002",
            Self::Small3 => "text-embedding-3-small",
            Self::Large3 => "text-embedding-3-large",
        }
    }

    fn native_dimension(self) -> usize {
        match self {
            Self::Ada2 | Self::Small3 => 1536,
            Self::Large3 => 3072,
        }
    }

    /// The v3 models can shorten their output, ada2 cannot.
    fn supports_dimension(self, dimension: usize) -> bool {
        match self {
            Self::Ada2 => dimension == 1536,
            Self::Small3 | Self::Large3 => {
                dimension > 0 && dimension <= self.native_dimension()
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("error while doing openai request: {0:?}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("response had bad status code: {}", .0)]
    BadStatus(StatusCode, String),
    #[error("error while parsing json: {0:?}")]
    BadJson(serde_json::Error, String),
    #[error("could not build request: {0}")]
    BadRequest(String),
    #[error("expected {expected} embeddings of dimension {dimension}, got {received} of dimension {received_dimension}")]
    WrongShape {
        expected: usize,
        dimension: usize,
        received: usize,
        received_dimension: usize,
    },
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [Snippet],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Deserialize, Debug)]
#[allow(unused)]
struct EmbeddingResponse {
    object: String,
    data: Vec<EmbeddingData>,
    model: String,
    usage: EmbeddingUsage,
}

#[derive(Deserialize, Debug)]
#[allow(unused)]
struct EmbeddingData {
    object: String,
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize, Debug)]
#[allow(unused)]
struct EmbeddingUsage {
    prompt_tokens: usize,
    total_tokens: usize,
}

/// Token budget per minute, shared by all requests of one embedder.
struct RateLimiter {
    capacity: usize,
    budget: Arc<Mutex<usize>>,
    waiters: Arc<Mutex<VecDeque<(usize, Arc<Notify>)>>>,
}

impl RateLimiter {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            budget: Arc::new(Mutex::new(capacity)),
            waiters: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    fn wakeup_existing(mut budget: usize, waiters: &mut VecDeque<(usize, Arc<Notify>)>) {
        while let Some((requested_budget, _)) = waiters.front() {
            if *requested_budget > budget {
                break;
            }
            budget -= *requested_budget;
            if let Some((_, wakeup)) = waiters.pop_front() {
                wakeup.notify_one();
            }
        }
    }

    async fn budget_tokens(&self, requested_budget: usize) {
        let requested_budget = requested_budget.min(self.capacity);
        loop {
            let mut budget = self.budget.lock().await;
            if requested_budget <= *budget {
                *budget -= requested_budget;
                debug!("requested {requested_budget} tokens. budget now {}", *budget);
                let inner_budget = self.budget.clone();
                let inner_waiters = self.waiters.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    let mut budget = inner_budget.lock().await;
                    *budget += requested_budget;
                    let budget_copy = *budget;
                    std::mem::drop(budget);
                    debug!("minute passed. budget now {budget_copy}");
                    Self::wakeup_existing(budget_copy, &mut *inner_waiters.lock().await);
                });
                return;
            } else {
                warn!("token budget exhausted, waiting for the rate limit window");
                std::mem::drop(budget);
                let notify = Arc::new(Notify::new());
                {
                    let mut waiters = self.waiters.lock().await;
                    waiters.push_back((requested_budget, notify.clone()));
                }
                notify.notified().await;
            }
        }
    }
}

pub struct OpenAIEmbedder {
    model: OpenAIModelType,
    api_key: String,
    endpoint: Url,
    dimension: usize,
    client: Client,
    limiter: RateLimiter,
}

impl OpenAIEmbedder {
    pub fn new(
        model: OpenAIModelType,
        api_key: String,
        endpoint: &str,
        dimension: usize,
    ) -> Result<Self, DatasetError> {
        if !model.supports_dimension(dimension) {
            return Err(DatasetError::ModelLoadFailure(format!(
                "{} cannot produce embeddings of dimension {dimension}",
                model.name()
            )));
        }
        let endpoint = Url::parse(endpoint).map_err(|e| {
            DatasetError::ModelLoadFailure(format!("invalid endpoint {endpoint}: {e}"))
        })?;
        HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| DatasetError::ModelLoadFailure(format!("unusable api key: {e}")))?;

        Ok(Self {
            model,
            api_key,
            endpoint,
            dimension,
            client: Client::new(),
            limiter: RateLimiter::new(RATE_LIMIT),
        })
    }

    fn request_dimensions(&self) -> Option<usize> {
        (self.dimension != self.model.native_dimension()).then_some(self.dimension)
    }

    fn build_request(&self, snippets: &[Snippet]) -> Result<Request, EmbeddingError> {
        let body = EmbeddingRequest {
            model: self.model.name(),
            input: snippets,
            dimensions: self.request_dimensions(),
            user: None,
        };
        let body_vec =
            serde_json::to_vec(&body).map_err(|e| EmbeddingError::BadRequest(e.to_string()))?;

        let mut req = Request::new(Method::POST, self.endpoint.clone());
        let headers = req.headers_mut();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| EmbeddingError::BadRequest(e.to_string()))?,
        );
        *req.body_mut() = Some(Body::from(body_vec));

        Ok(req)
    }

    async fn request_chunk(&self, snippets: &[Snippet]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.limiter
            .budget_tokens(snippets.iter().map(|s| s.len()).sum())
            .await;

        let mut failure_count = 0;
        let response: EmbeddingResponse = loop {
            let req = self.build_request(snippets)?;
            let result = execute_request_and_get_bytes(&self.client, req).await;
            let failure = match result {
                Err(e) => {
                    if failure_count == MAX_FAILURE_COUNT {
                        return Err(e.into());
                    }
                    format!("incomplete response: {e}")
                }
                Ok((status, response_bytes)) if status != StatusCode::OK => {
                    let body = String::from_utf8_lossy(&response_bytes).to_string();
                    if failure_count == MAX_FAILURE_COUNT {
                        return Err(EmbeddingError::BadStatus(status, body));
                    }
                    format!("status {status}: {body}")
                }
                Ok((_, response_bytes)) => match serde_json::from_slice(&response_bytes) {
                    Ok(r) => break r,
                    Err(e) => {
                        let body = String::from_utf8_lossy(&response_bytes).to_string();
                        return Err(EmbeddingError::BadJson(e, body));
                    }
                },
            };

            failure_count += 1;
            warn!("encountered failure {failure_count} while calling the embedding endpoint. retrying.. ({failure})");
            let backoff = 2_u64.pow(failure_count as u32);
            tokio::time::sleep(Duration::from_secs(backoff)).await;
        };

        order_embeddings(response, snippets.len(), self.dimension)
    }
}

// The endpoint reports each embedding's input position, use it instead of trusting the order.
fn order_embeddings(
    response: EmbeddingResponse,
    expected: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let wrong_shape = |received: usize, received_dimension: usize| EmbeddingError::WrongShape {
        expected,
        dimension,
        received,
        received_dimension,
    };
    let received = response.data.len();
    if received != expected {
        return Err(wrong_shape(received, dimension));
    }

    let mut ordered: Vec<Option<Vec<f32>>> = vec![None; expected];
    for data in response.data {
        if data.embedding.len() != dimension {
            return Err(wrong_shape(received, data.embedding.len()));
        }
        match ordered.get_mut(data.index) {
            Some(slot) if slot.is_none() => *slot = Some(data.embedding),
            _ => return Err(wrong_shape(received, dimension)),
        }
    }

    ordered
        .into_iter()
        .map(|e| e.ok_or_else(|| wrong_shape(received, dimension)))
        .collect()
}

async fn execute_request_and_get_bytes(
    client: &Client,
    req: Request,
) -> Result<(StatusCode, Bytes), reqwest::Error> {
    let client_response = client.execute(req).await?;
    let status = client_response.status();
    let bytes = client_response.bytes().await?;
    Ok((status, bytes))
}

impl Model for OpenAIEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embeddings_for(
        &self,
        snippets: &[Snippet],
        output: &mut [f32],
    ) -> Result<(), DatasetError> {
        if output.len() != snippets.len() * self.dimension {
            return Err(DatasetError::InvalidConfig(format!(
                "output buffer holds {} floats, expected {}",
                output.len(),
                snippets.len() * self.dimension
            )));
        }
        let mut offset = 0;
        for chunk in snippets.chunks(CHUNK_SIZE) {
            for embedding in self.request_chunk(chunk).await? {
                output[offset..offset + self.dimension].copy_from_slice(&embedding);
                offset += self.dimension;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(indexes: &[usize], dimension: usize) -> EmbeddingResponse {
        let data = indexes
            .iter()
            .map(|&index| EmbeddingData {
                object: "embedding".to_string(),
                index,
                embedding: vec![index as f32; dimension],
            })
            .collect();
        EmbeddingResponse {
            object: "list".to_string(),
            data,
            model: "text-embedding-3-small".to_string(),
            usage: EmbeddingUsage {
                prompt_tokens: 0,
                total_tokens: 0,
            },
        }
    }

    #[test]
    fn request_serializes_token_arrays_and_dimensions() {
        let embedder = OpenAIEmbedder::new(
            OpenAIModelType::Small3,
            "sk-test".to_string(),
            DEFAULT_ENDPOINT,
            768,
        )
        .unwrap();
        let snippets = vec![vec![1, 2], vec![3]];
        let body = EmbeddingRequest {
            model: embedder.model.name(),
            input: &snippets,
            dimensions: embedder.request_dimensions(),
            user: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "text-embedding-3-small",
                "input": [[1, 2], [3]],
                "dimensions": 768,
            })
        );
    }

    #[test]
    fn response_parses() {
        let body = r#"{
            "object": "list",
            "data": [{"object": "embedding", "index": 0, "embedding": [0.5, -0.5]}],
            "model": "text-embedding-3-small",
            "usage": {"prompt_tokens": 3, "total_tokens": 3}
        }"#;
        let response: EmbeddingResponse = serde_json::from_str(body).unwrap();
        let ordered = order_embeddings(response, 1, 2).unwrap();
        assert_eq!(ordered, vec![vec![0.5, -0.5]]);
    }

    #[test]
    fn embeddings_are_reordered_by_index() {
        let ordered = order_embeddings(response(&[2, 0, 1], 3), 3, 3).unwrap();
        assert_eq!(ordered[0], vec![0.0; 3]);
        assert_eq!(ordered[1], vec![1.0; 3]);
        assert_eq!(ordered[2], vec![2.0; 3]);
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        assert!(order_embeddings(response(&[0, 1], 3), 3, 3).is_err());
        assert!(order_embeddings(response(&[0, 1], 4), 2, 3).is_err());
        assert!(order_embeddings(response(&[0, 0], 3), 2, 3).is_err());
    }

    #[test]
    fn ada2_only_produces_its_native_dimension() {
        let load = |dimension| {
            OpenAIEmbedder::new(
                OpenAIModelType::Ada2,
                "sk-test".to_string(),
                DEFAULT_ENDPOINT,
                dimension,
            )
        };
        assert!(matches!(load(768), Err(DatasetError::ModelLoadFailure(_))));
        assert!(load(1536).is_ok());
    }
}
