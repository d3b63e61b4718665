//! JSON messages exchanged with the authority.

use crate::cursor::Cursor;
use crate::error::ProtocolResult;
use crate::model::Table;
use crate::operation::{Delta, Operation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Encoding shared by every message type.
pub trait JsonCodec: Serialize + DeserializeOwned {
    /// Encodes to JSON bytes.
    fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Body of `POST /sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Pushing replica.
    pub client_id: String,
    /// Last cursor the replica has applied.
    pub base_cursor: Cursor,
    /// Operations in enqueue order.
    pub ops: Vec<Operation>,
}

impl PushRequest {
    /// Creates a push request.
    pub fn new(client_id: impl Into<String>, base_cursor: Cursor, ops: Vec<Operation>) -> Self {
        Self {
            client_id: client_id.into(),
            base_cursor,
            ops,
        }
    }
}

impl JsonCodec for PushRequest {}

/// Response to `POST /sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Whether the batch was accepted.
    pub success: bool,
    /// New stream position after the batch.
    pub cursor: Cursor,
    /// Other replicas' edits since the request's base cursor.
    #[serde(default)]
    pub deltas: Vec<Delta>,
    /// Table snapshot, when the authority sends one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<Table>,
    /// Rejection reason when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PushResponse {
    /// Creates an accepting response.
    pub fn accepted(cursor: Cursor, deltas: Vec<Delta>) -> Self {
        Self {
            success: true,
            cursor,
            deltas,
            tables: Vec::new(),
            error: None,
        }
    }

    /// Creates a rejecting response.
    pub fn rejected(cursor: Cursor, error: impl Into<String>) -> Self {
        Self {
            success: false,
            cursor,
            deltas: Vec::new(),
            tables: Vec::new(),
            error: Some(error.into()),
        }
    }
}

impl JsonCodec for PushResponse {}

/// Response to `GET /sync?since=<cursor>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Edits after `since`, in stream order.
    pub deltas: Vec<Delta>,
    /// Position the replica may persist once the deltas are applied.
    pub cursor: Cursor,
    /// Full table snapshot, sent for pulls from the origin.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<Table>,
}

impl PullResponse {
    /// Creates a pull response without a snapshot.
    pub fn new(deltas: Vec<Delta>, cursor: Cursor) -> Self {
        Self {
            deltas,
            cursor,
            tables: Vec::new(),
        }
    }
}

impl JsonCodec for PullResponse {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Change;

    #[test]
    fn push_request_field_names() {
        let req = PushRequest::new(
            "c1",
            Cursor::origin(),
            vec![Operation::new("T", Change::DeleteTable).stamped(1, "c1")],
        );
        let value: serde_json::Value = serde_json::from_slice(&req.encode().unwrap()).unwrap();
        assert_eq!(value["clientId"], "c1");
        assert_eq!(value["baseCursor"], "0");
        assert_eq!(value["ops"][0]["op"], "deleteTable");

        assert_eq!(PushRequest::decode(&req.encode().unwrap()).unwrap(), req);
    }

    #[test]
    fn push_response_optional_fields_default() {
        let resp = PushResponse::decode(br#"{"success":true,"cursor":"3"}"#).unwrap();
        assert!(resp.deltas.is_empty());
        assert!(resp.tables.is_empty());
        assert!(resp.error.is_none());
        assert_eq!(resp.cursor, Cursor::new("3"));
    }

    #[test]
    fn rejected_push_carries_error() {
        let resp = PushResponse::rejected(Cursor::origin(), "bad batch");
        let json = String::from_utf8(resp.encode().unwrap()).unwrap();
        assert!(json.contains(r#""success":false"#));
        assert!(json.contains(r#""error":"bad batch""#));
        assert!(!json.contains("tables"));
    }

    #[test]
    fn pull_response_parses_deltas() {
        let body = br#"{
            "deltas":[{"op":"setCell","tableId":"T","rowId":"r","col":0,"value":"v","ts":5,"by":"b","cursor":"7"}],
            "cursor":"7"
        }"#;
        let resp = PullResponse::decode(body).unwrap();
        assert_eq!(resp.deltas.len(), 1);
        assert_eq!(resp.deltas[0].by, "b");
        assert_eq!(resp.deltas[0].cursor, Some(Cursor::new("7")));
    }

    #[test]
    fn malformed_body_is_codec_error() {
        assert!(matches!(
            PullResponse::decode(b"{not json"),
            Err(crate::ProtocolError::Codec(_))
        ));
    }
}
