//! Ticket counts per status, gathered with one filtered list call per status.

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::model::{StatsSnapshot, TicketStatus};
use crate::normalize::{self, aliases};
use crate::refresh::RefreshRetry;
use crate::session::RequestSession;
use crate::upstream::UpstreamRequest;

const FALLBACK_MESSAGE: &str = "Upstream stats failed";

/// Query parameters the aggregator owns; inbound values for these are dropped.
const OWNED_PARAMS: [&str; 3] = ["page", "pageSize", "status"];

pub struct TicketStats<'a> {
    engine: &'a RefreshRetry,
    tickets_path: &'a str,
}

impl<'a> TicketStats<'a> {
    pub fn new(engine: &'a RefreshRetry, tickets_path: &'a str) -> Self {
        Self {
            engine,
            tickets_path,
        }
    }

    /// Count tickets per status.
    ///
    /// All three legs run to completion before any failure is reported, and a
    /// token rotated by any leg ends up on `session`.
    pub async fn collect(
        &self,
        session: &mut RequestSession,
        params: &[(String, String)],
    ) -> ProxyResult<StatsSnapshot> {
        let legs = TicketStatus::ALL.map(|status| {
            let mut leg_session = session.clone();
            let request = UpstreamRequest::get(self.tickets_path)
                .with_query(leg_query(params, status));
            async move {
                let result = self.engine.execute(&mut leg_session, &request).await;
                (status, leg_session, result)
            }
        });

        let mut snapshot = StatsSnapshot::default();
        let mut failure = None;
        for (status, leg_session, result) in join_all(legs).await {
            session.adopt(&leg_session);
            match result {
                Ok(response) if response.is_success() => {
                    let count = response.json().as_ref().map(read_total).unwrap_or(0);
                    debug!(status = status.upstream_code(), count, "stats leg finished");
                    match status {
                        TicketStatus::Open => snapshot.open = count,
                        TicketStatus::InProgress => snapshot.in_progress = count,
                        TicketStatus::Closed => snapshot.done = count,
                    }
                }
                Ok(response) => {
                    warn!(
                        status = status.upstream_code(),
                        upstream_status = response.status,
                        "stats leg failed"
                    );
                    failure.get_or_insert_with(|| {
                        let text = response.body.trim();
                        let message = if text.is_empty() { FALLBACK_MESSAGE } else { text };
                        ProxyError::Aggregation(message.to_string())
                    });
                }
                Err(err) => {
                    if failure.is_none() || is_auth_failure(&err) {
                        failure = Some(err);
                    }
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(snapshot),
        }
    }
}

fn is_auth_failure(err: &ProxyError) -> bool {
    matches!(err, ProxyError::Unauthenticated | ProxyError::Unauthorized)
}

fn leg_query(params: &[(String, String)], status: TicketStatus) -> Vec<(String, String)> {
    let mut query: Vec<(String, String)> = params
        .iter()
        .filter(|(key, _)| !OWNED_PARAMS.contains(&key.as_str()))
        .cloned()
        .collect();
    query.push(("page".to_string(), "1".to_string()));
    query.push(("pageSize".to_string(), "1".to_string()));
    query.push(("status".to_string(), status.upstream_code().to_string()));
    query
}

/// Declared total from the root, then from one unwrapped envelope level.
fn read_total(payload: &Value) -> u64 {
    let read = |value: &Value| {
        normalize::pick_value(value, aliases::STATS_TOTAL).and_then(normalize::as_number)
    };

    read(payload)
        .or_else(|| read(normalize::unwrap_envelope(payload)))
        .map(|n| n.max(0.0).round() as u64)
        .unwrap_or(0)
}
