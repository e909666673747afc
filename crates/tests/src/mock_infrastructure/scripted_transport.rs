//! In-memory transport with scripted per-host behaviour.

use async_trait::async_trait;
use bytes::Bytes;
use ember_core::upstream::{RpcTransport, UpstreamError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{collections::HashMap, time::Duration};

/// What a host answers.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Every call or batch entry succeeds with this result.
    Result(Value),
    /// Every call or batch entry succeeds with `{"echo": <method>, "params": <params>}`.
    Echo,
    /// Every call or batch entry carries this JSON-RPC error.
    RpcError(i64, String),
    /// The wire call itself fails.
    Fail(UpstreamError),
}

/// One recorded `post` call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub host: String,
    pub body: Value,
}

impl RecordedCall {
    /// Number of requests in the call: the array length for a batch, otherwise 1.
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.as_array().map_or(1, Vec::len)
    }

    #[must_use]
    pub fn is_batch(&self) -> bool {
        self.body.is_array()
    }
}

#[derive(Debug, Clone)]
struct Route {
    reply: Reply,
    latency: Duration,
    /// Calls failing with `Fail` before `reply` applies.
    failures_before: u32,
    failure: Option<UpstreamError>,
}

impl Default for Route {
    fn default() -> Self {
        Self { reply: Reply::Echo, latency: Duration::ZERO, failures_before: 0, failure: None }
    }
}

/// [`RpcTransport`] whose behaviour is scripted per URL host.
///
/// Hosts without a script echo every request.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<RecordedCall>>,
}

pub(crate) fn host_of(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split(&['/', '?', ':'][..]).next().unwrap_or_default().to_string()
}

fn answer(request: &Value, reply: &Reply) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    match reply {
        Reply::Result(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Reply::Echo => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"echo": request["method"], "params": request.get("params").cloned().unwrap_or(Value::Null)}
        }),
        Reply::RpcError(code, message) => {
            json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
        }
        Reply::Fail(_) => Value::Null,
    }
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reply(&self, host: &str, reply: Reply) {
        self.routes.lock().entry(host.to_string()).or_default().reply = reply;
    }

    pub fn set_latency(&self, host: &str, latency: Duration) {
        self.routes.lock().entry(host.to_string()).or_default().latency = latency;
    }

    /// Fails the next `count` calls to `host` with `error`, then resumes its reply.
    pub fn fail_next(&self, host: &str, count: u32, error: UpstreamError) {
        let mut routes = self.routes.lock();
        let route = routes.entry(host.to_string()).or_default();
        route.failures_before = count;
        route.failure = Some(error);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn calls_to(&self, host: &str) -> usize {
        self.calls.lock().iter().filter(|call| call.host == host).count()
    }

    /// Sizes of the batch calls in arrival order.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls.lock().iter().filter(|call| call.is_batch()).map(RecordedCall::size).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn post(&self, url: &str, body: Bytes, _timeout: Duration) -> Result<Bytes, UpstreamError> {
        let host = host_of(url);
        let request: Value = serde_json::from_slice(&body)
            .map_err(|e| UpstreamError::InvalidRequest(format!("unparseable request: {e}")))?;
        self.calls.lock().push(RecordedCall { host: host.clone(), body: request.clone() });

        let (route, scripted_failure) = {
            let mut routes = self.routes.lock();
            let route = routes.entry(host).or_default();
            let failure = if route.failures_before > 0 {
                route.failures_before -= 1;
                route.failure.clone()
            } else {
                None
            };
            (route.clone(), failure)
        };

        if !route.latency.is_zero() {
            tokio::time::sleep(route.latency).await;
        }
        if let Some(error) = scripted_failure {
            return Err(error);
        }
        if let Reply::Fail(error) = &route.reply {
            return Err(error.clone());
        }

        let response = match &request {
            Value::Array(items) => Value::Array(items.iter().map(|r| answer(r, &route.reply)).collect()),
            single => answer(single, &route.reply),
        };
        Ok(Bytes::from(response.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("http://a.test/"), "a.test");
        assert_eq!(host_of("https://b.test:8899/rpc?api-key=k"), "b.test");
        assert_eq!(host_of("http://c.test?api-key=k"), "c.test");
    }

    #[tokio::test]
    async fn test_scripted_failures_then_reply() {
        let transport = ScriptedTransport::new();
        transport.set_reply("a.test", Reply::Result(json!(7)));
        transport.fail_next("a.test", 1, UpstreamError::RateLimited);

        let body = Bytes::from(json!({"jsonrpc": "2.0", "id": 1, "method": "getSlot"}).to_string());
        let first = transport.post("http://a.test/", body.clone(), Duration::from_secs(1)).await;
        assert_eq!(first.unwrap_err(), UpstreamError::RateLimited);

        let second = transport.post("http://a.test/", body, Duration::from_secs(1)).await.unwrap();
        let value: Value = serde_json::from_slice(&second).unwrap();
        assert_eq!(value["result"], json!(7));
        assert_eq!(transport.calls_to("a.test"), 2);
    }
}
