pub mod cache;
pub mod executor;
pub mod oplab;
pub mod queue;

use std::future::Future;

use reqwest::Method;
use serde_json::Value;

use crate::error::ApiError;
use crate::types::Endpoint;

pub use cache::{CacheKey, ResponseCache};
pub use executor::{ClientState, Executor};
pub use oplab::{InstrumentQuery, OpLabClient};
pub use queue::RequestQueue;

/// A single logical call to the data API, relative to the base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub endpoint: Endpoint,
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(endpoint: Endpoint, path: impl Into<String>) -> Self {
        Self {
            endpoint,
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(endpoint: Endpoint, path: impl Into<String>, body: Value) -> Self {
        Self {
            endpoint,
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.method.as_str(), &self.path, self.body.as_ref())
    }
}

/// Something that can carry out an [`ApiRequest`]. The queue is generic over
/// this so its ordering can be exercised without a network.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, request: ApiRequest) -> impl Future<Output = Result<Value, ApiError>> + Send;
}
