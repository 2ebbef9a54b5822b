//! Wire messages for the peer query protocol.
//!
//! Hand-written `prost` messages, no protoc or build script — the Rust types
//! are the source of truth for the wire contract. Each `Result` carries a
//! union-typed value; which field is meaningful is keyed by the operator
//! name of the corresponding call in the originating query, so the codec
//! functions here take the query alongside the payload.

use prost::Message;

use shrike_common::{ShrikeResult, TransportError};
use shrike_core::{Bitmap, Pair, QueryResult};
use shrike_pql::Query;

#[derive(Clone, PartialEq, Message)]
pub struct QueryRequest {
    /// Textual PQL of the forwarded calls.
    #[prost(string, tag = "1")]
    pub query: String,
    /// Slices the receiving node should evaluate.
    #[prost(uint64, repeated, tag = "2")]
    pub slices: Vec<u64>,
    /// Always true on forwarded sub-queries; the receiver restricts its
    /// candidate node set to itself.
    #[prost(bool, tag = "3")]
    pub remote: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryResponse {
    /// Non-empty when the peer failed; surfaces as an error even on HTTP 200.
    #[prost(string, tag = "1")]
    pub err: String,
    /// One result per call, in call order.
    #[prost(message, repeated, tag = "2")]
    pub results: Vec<WireResult>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WireResult {
    #[prost(message, optional, tag = "1")]
    pub bitmap: Option<WireBitmap>,
    #[prost(uint64, tag = "2")]
    pub n: u64,
    #[prost(bool, tag = "3")]
    pub changed: bool,
    #[prost(message, repeated, tag = "4")]
    pub pairs: Vec<WirePair>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WireBitmap {
    #[prost(uint64, repeated, tag = "1")]
    pub bits: Vec<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WirePair {
    #[prost(uint64, tag = "1")]
    pub key: u64,
    #[prost(uint64, tag = "2")]
    pub count: u64,
}

/// Encode per-call results into a response body. The value slot each result
/// occupies follows from the operator name of the matching call.
pub fn encode_results(results: &[QueryResult]) -> QueryResponse {
    QueryResponse {
        err: String::new(),
        results: results
            .iter()
            .map(|result| match result {
                QueryResult::Bitmap(bm) => WireResult {
                    bitmap: Some(WireBitmap { bits: bm.bits() }),
                    ..Default::default()
                },
                QueryResult::Count(n) => WireResult {
                    n: *n,
                    ..Default::default()
                },
                QueryResult::Changed(changed) => WireResult {
                    changed: *changed,
                    ..Default::default()
                },
                QueryResult::Pairs(pairs) => WireResult {
                    pairs: pairs
                        .iter()
                        .map(|p| WirePair {
                            key: p.id,
                            count: p.count,
                        })
                        .collect(),
                    ..Default::default()
                },
                QueryResult::None => WireResult::default(),
            })
            .collect(),
    }
}

/// Decode a response into typed per-call results, keyed by the operator
/// names of `query`.
pub fn decode_results(query: &Query, response: &QueryResponse) -> ShrikeResult<Vec<QueryResult>> {
    query
        .calls
        .iter()
        .enumerate()
        .map(|(i, call)| {
            let wire = response.results.get(i).ok_or_else(|| {
                TransportError::Decode(format!(
                    "response carries {} results for {} calls",
                    response.results.len(),
                    query.calls.len()
                ))
            })?;
            Ok(match call.name.as_str() {
                "TopN" => QueryResult::Pairs(
                    wire.pairs
                        .iter()
                        .map(|p| Pair {
                            id: p.key,
                            count: p.count,
                        })
                        .collect(),
                ),
                "Count" => QueryResult::Count(wire.n),
                "SetBit" | "ClearBit" => QueryResult::Changed(wire.changed),
                "SetRowAttrs" | "SetColumnAttrs" => QueryResult::None,
                _ => QueryResult::Bitmap(Bitmap::from_bits(
                    wire.bitmap.as_ref().map(|b| b.bits.clone()).unwrap_or_default(),
                )),
            })
        })
        .collect()
}

/// Serialize a message to its body bytes.
pub fn encode_body(msg: &impl Message) -> Vec<u8> {
    msg.encode_to_vec()
}

/// Deserialize a response body.
pub fn decode_response(body: &[u8]) -> ShrikeResult<QueryResponse> {
    QueryResponse::decode(body).map_err(|e| TransportError::Decode(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shrike_pql::Call;

    #[test]
    fn test_request_roundtrip() {
        let req = QueryRequest {
            query: "Count(Bitmap(id=1))".to_string(),
            slices: vec![0, 1, 2],
            remote: true,
        };
        let body = encode_body(&req);
        let decoded = QueryRequest::decode(body.as_slice()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_results_roundtrip_keyed_by_operator() {
        let query = Query::new(vec![
            Call::new("Count"),
            Call::new("SetBit"),
            Call::new("TopN"),
            Call::new("SetRowAttrs"),
            Call::new("Union"),
        ]);
        let results = vec![
            QueryResult::Count(42),
            QueryResult::Changed(true),
            QueryResult::Pairs(vec![Pair { id: 3, count: 9 }]),
            QueryResult::None,
            QueryResult::Bitmap(Bitmap::from_bits([1, 5, 1 << 21])),
        ];

        let response = encode_results(&results);
        let body = encode_body(&response);
        let decoded = decode_response(&body).unwrap();
        assert_eq!(decode_results(&query, &decoded).unwrap(), results);
    }

    #[test]
    fn test_short_response_is_a_decode_error() {
        let query = Query::new(vec![Call::new("Count"), Call::new("Count")]);
        let response = encode_results(&[QueryResult::Count(1)]);
        assert!(decode_results(&query, &response).is_err());
    }
}
