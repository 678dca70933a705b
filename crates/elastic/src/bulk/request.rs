//! `_bulk` request bodies and responses.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use esrollup_core::{SinkError, TransferUnit};

#[derive(Serialize)]
struct IndexAction<'a> {
    index: ActionMeta<'a>,
}

#[derive(Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_type", skip_serializing_if = "str::is_empty")]
    doc_type: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
}

/// Encode `units` as an NDJSON `_bulk` body of index actions.
///
/// Payloads are written verbatim except that line breaks, which can only be
/// insignificant whitespace in valid JSON, are replaced by spaces.
pub fn encode_bulk(units: &[TransferUnit]) -> Result<Bytes, SinkError> {
    let mut body = BytesMut::with_capacity(units.iter().map(|u| u.payload.len() + 96).sum());
    for unit in units {
        let action = IndexAction {
            index: ActionMeta {
                index: &unit.destination_name,
                doc_type: &unit.document_type,
                id: &unit.document_id,
            },
        };
        serde_json::to_writer((&mut body).writer(), &action)
            .map_err(|e| SinkError::Malformed(e.to_string()))?;
        body.put_u8(b'\n');

        if unit.payload.iter().any(|b| matches!(b, b'\n' | b'\r')) {
            body.extend(unit.payload.iter().map(|&b| match b {
                b'\n' | b'\r' => b' ',
                other => other,
            }));
        } else {
            body.put_slice(&unit.payload);
        }
        body.put_u8(b'\n');
    }
    Ok(body.freeze())
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Deserialize)]
struct BulkItem {
    status: u16,
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Per-item result of a committed bulk request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub succeeded: u64,
    pub failed: u64,
    /// Id and reason of the first rejected item, for logging.
    pub first_error: Option<(String, String)>,
}

impl BulkOutcome {
    /// Count item statuses of a `_bulk` response. Items missing from the
    /// response, out of `expected`, are counted as failed.
    pub fn parse(body: &[u8], expected: usize) -> Result<Self, SinkError> {
        let response: BulkResponse =
            serde_json::from_slice(body).map_err(|e| SinkError::Malformed(e.to_string()))?;

        let mut outcome = BulkOutcome::default();
        for item in response.items.into_iter().flat_map(|entry| entry.into_values()) {
            if (200..300).contains(&item.status) {
                outcome.succeeded += 1;
                continue;
            }
            outcome.failed += 1;
            if outcome.first_error.is_none() {
                let reason = item
                    .error
                    .map(|e| match e.get("reason").and_then(|r| r.as_str()) {
                        Some(reason) => reason.to_string(),
                        None => e.to_string(),
                    })
                    .unwrap_or_else(|| format!("status {}", item.status));
                outcome.first_error = Some((item.id.unwrap_or_default(), reason));
            }
        }

        let seen = (outcome.succeeded + outcome.failed) as usize;
        if seen < expected {
            outcome.failed += (expected - seen) as u64;
        }
        if response.errors && outcome.failed == 0 {
            tracing::warn!("bulk response flagged errors but every item succeeded");
        }
        Ok(outcome)
    }
}
