//! In-process upstream fake for unit tests.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::ProxyResult;
use crate::upstream::{Upstream, UpstreamRequest, UpstreamResponse};

type Handler = dyn Fn(&UpstreamRequest, Option<&str>) -> ProxyResult<UpstreamResponse> + Send + Sync;

pub struct ScriptedUpstream {
    handler: Box<Handler>,
    calls: Mutex<Vec<(UpstreamRequest, Option<String>)>>,
}

impl ScriptedUpstream {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&UpstreamRequest, Option<&str>) -> ProxyResult<UpstreamResponse> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(request, _)| request.path == path)
            .count()
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(request, _)| request.clone())
            .collect()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn call(
        &self,
        request: &UpstreamRequest,
        token: Option<&str>,
    ) -> ProxyResult<UpstreamResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((request.clone(), token.map(str::to_string)));
        (self.handler)(request, token)
    }
}

pub fn reply(status: u16, body: &str) -> UpstreamResponse {
    UpstreamResponse {
        status,
        content_type: Some("application/json".to_string()),
        body: body.to_string(),
    }
}
