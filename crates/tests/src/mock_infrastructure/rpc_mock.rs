//! RPC Mock Builder for Solana JSON-RPC Testing
//!
//! Wraps mockito with helpers for the response shapes the client cares about.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};

/// Builder for mock Solana RPC responses on a fresh mockito server.
pub struct RpcMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl RpcMockBuilder {
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    fn method_matcher(method: &str) -> Matcher {
        Matcher::Regex(format!(r#""method"\s*:\s*"{method}""#))
    }

    /// Answers every call of `method` with `result`.
    pub fn mock_method(&mut self, method: &str, result: &Value) -> &mut Self {
        let mock = self
            .server
            .mock("POST", Matcher::Any)
            .match_body(Self::method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string())
            .create();

        self.mocks.push(mock);
        self
    }

    /// Answers `method` with `result` and expects exactly `hits` calls.
    pub fn mock_method_expect(&mut self, method: &str, result: &Value, hits: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", Matcher::Any)
            .match_body(Self::method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string())
            .expect(hits)
            .create();

        self.mocks.push(mock);
        self
    }

    /// Answers every batch containing `method` with a fixed array of `(id, result)`
    /// entries, expecting exactly `hits` batch calls.
    pub fn mock_batch(&mut self, method: &str, entries: &[(u64, Value)], hits: usize) -> &mut Self {
        let body: Vec<Value> = entries
            .iter()
            .map(|(id, result)| json!({"jsonrpc": "2.0", "id": id, "result": result}))
            .collect();
        let mock = self
            .server
            .mock("POST", Matcher::Any)
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r"^\s*\[".to_string()),
                Self::method_matcher(method),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(Value::Array(body).to_string())
            .expect(hits)
            .create();

        self.mocks.push(mock);
        self
    }

    /// Answers `method` with a JSON-RPC error object.
    pub fn mock_rpc_error(&mut self, method: &str, code: i64, message: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", Matcher::Any)
            .match_body(Self::method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": {"code": code, "message": message}
                })
                .to_string(),
            )
            .create();

        self.mocks.push(mock);
        self
    }

    /// Answers every request with an HTTP status and a plain body.
    pub fn mock_http_status(&mut self, status: usize, body: &str) -> &mut Self {
        let mock = self.server.mock("POST", Matcher::Any).with_status(status).with_body(body).create();

        self.mocks.push(mock);
        self
    }

    /// Requires the `api-key` query parameter on every matched call of `method`.
    pub fn mock_method_with_api_key(&mut self, method: &str, api_key: &str, result: &Value) -> &mut Self {
        let mock = self
            .server
            .mock("POST", Matcher::Any)
            .match_query(Matcher::UrlEncoded("api-key".to_string(), api_key.to_string()))
            .match_body(Self::method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": result}).to_string())
            .create();

        self.mocks.push(mock);
        self
    }

    /// Asserts every mock created with an expectation was hit as expected.
    pub fn assert_all(&self) {
        for mock in &self.mocks {
            mock.assert();
        }
    }
}
