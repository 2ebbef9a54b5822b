//! Forwarding queries to peer executors.
//!
//! The executor talks to peers through the [`QueryTransport`] trait so that
//! tests can substitute in-process transports; the production implementation
//! posts protobuf bodies to `/index/{index}/query` on the peer.

use async_trait::async_trait;

use shrike_common::{ShrikeError, ShrikeResult, TransportError};
use shrike_core::QueryResult;
use shrike_pql::Query;

use crate::node::Node;
use crate::proto;

/// Sends a query to one peer node and returns its typed per-call results.
///
/// Implementations mark every request as remote, regardless of how the local
/// invocation was marked: the receiver must not fan out further.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    async fn execute(
        &self,
        node: &Node,
        index: &str,
        query: &Query,
        slices: &[u64],
    ) -> ShrikeResult<Vec<QueryResult>>;
}

/// The production transport: HTTP POST with `application/x-protobuf` bodies.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        HttpTransport {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryTransport for HttpTransport {
    async fn execute(
        &self,
        node: &Node,
        index: &str,
        query: &Query,
        slices: &[u64],
    ) -> ShrikeResult<Vec<QueryResult>> {
        let request = proto::QueryRequest {
            query: query.to_string(),
            slices: slices.to_vec(),
            remote: true,
        };

        tracing::debug!(
            node = %node.host,
            index,
            slices = slices.len(),
            "forwarding query to peer"
        );

        let url = format!("http://{}/index/{}/query", node.host, index);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-protobuf")
            .header(reqwest::header::ACCEPT, "application/x-protobuf")
            .body(proto::encode_body(&request))
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        if status.as_u16() != 200 {
            return Err(TransportError::Status {
                code: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }
            .into());
        }

        let decoded = proto::decode_response(&body)?;
        if !decoded.err.is_empty() {
            return Err(ShrikeError::Remote(decoded.err));
        }
        proto::decode_results(query, &decoded)
    }
}
