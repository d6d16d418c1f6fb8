//! JSON cassette file format
//!
//! ```json
//! {
//!   "name": "items",
//!   "interactions": [
//!     {
//!       "recorded_at": 1700000000,
//!       "request": {
//!         "method": "GET",
//!         "url": "https://api.example.com/items",
//!         "headers": [["Accept", "application/json"]]
//!       },
//!       "response": {
//!         "status": 200,
//!         "headers": [["Set-Cookie", "a=1"], ["Set-Cookie", "b=2"]],
//!         "body": "{\"items\":[]}"
//!       }
//!     }
//!   ]
//! }
//! ```
//!
//! Headers are `[name, value]` pairs in their original order, so repeated
//! names survive. An object with one value per name is accepted on read.
//! Bodies that are valid UTF-8 are stored as strings, anything else as
//! `{"hex": "..."}`.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{Cassette, Interaction, Request, Response};
use crate::{DvrError, Result};

/// Top-level cassette file
#[derive(Debug, Serialize, Deserialize)]
pub struct CassetteFile {
    /// Cassette name
    pub name: String,
    /// Interactions in recording order
    #[serde(default)]
    pub interactions: Vec<StoredInteraction>,
}

/// One stored interaction
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredInteraction {
    /// Unix timestamp (seconds)
    #[serde(default)]
    pub recorded_at: u64,
    /// Stored request
    pub request: StoredRequest,
    /// Stored response
    pub response: StoredResponse,
}

/// Stored request
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredRequest {
    /// HTTP method
    pub method: String,
    /// URL
    pub url: String,
    /// Headers
    #[serde(default)]
    pub headers: StoredHeaders,
    /// Body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<StoredBody>,
}

/// Stored response
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredResponse {
    /// Final URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Status code
    pub status: u16,
    /// Headers
    #[serde(default)]
    pub headers: StoredHeaders,
    /// Body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<StoredBody>,
}

/// Header list as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredHeaders {
    /// `[name, value]` pairs in order
    Pairs(Vec<(String, String)>),
    /// One value per name, sorted by name
    Map(BTreeMap<String, String>),
}

impl Default for StoredHeaders {
    fn default() -> Self {
        Self::Pairs(Vec::new())
    }
}

impl StoredHeaders {
    /// Store headers in order
    #[must_use]
    pub fn from_headers(headers: &[(String, String)]) -> Self {
        Self::Pairs(headers.to_vec())
    }

    /// Headers in stored order
    #[must_use]
    pub fn into_headers(self) -> Vec<(String, String)> {
        match self {
            Self::Pairs(pairs) => pairs,
            Self::Map(map) => map.into_iter().collect(),
        }
    }
}

/// Body encoded as text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredBody {
    /// UTF-8 body
    Text(String),
    /// Arbitrary bytes, hex encoded
    Binary {
        /// Lowercase hex digits
        hex: String,
    },
}

impl StoredBody {
    /// Encode raw bytes
    #[must_use]
    pub fn encode(data: &[u8]) -> Self {
        match std::str::from_utf8(data) {
            Ok(text) => Self::Text(text.to_string()),
            Err(_) => Self::Binary {
                hex: hex::encode(data),
            },
        }
    }

    /// Decode back into bytes
    ///
    /// # Errors
    ///
    /// Returns error if a binary body is not valid hex
    pub fn decode(&self) -> Result<Bytes> {
        match self {
            Self::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Self::Binary { hex } => hex::decode(hex)
                .map(Bytes::from)
                .map_err(|e| DvrError::InvalidFormat(format!("Invalid hex body: {e}"))),
        }
    }
}

fn decode_body(body: Option<&StoredBody>) -> Result<Option<Bytes>> {
    body.map(StoredBody::decode)
        .transpose()
        .map(|data| data.filter(|data| !data.is_empty()))
}

impl From<&Interaction> for StoredInteraction {
    fn from(interaction: &Interaction) -> Self {
        let request = &interaction.request;
        let response = &interaction.response;

        Self {
            recorded_at: interaction.recorded_at,
            request: StoredRequest {
                method: request.method.clone(),
                url: request.url.clone(),
                headers: StoredHeaders::from_headers(&request.headers),
                body: request.body.as_deref().map(StoredBody::encode),
            },
            response: StoredResponse {
                url: response.url.clone(),
                status: response.status,
                headers: StoredHeaders::from_headers(&response.headers),
                body: interaction.response_data.as_deref().map(StoredBody::encode),
            },
        }
    }
}

impl TryFrom<StoredInteraction> for Interaction {
    type Error = DvrError;

    fn try_from(stored: StoredInteraction) -> Result<Self> {
        let mut request = Request::new(stored.request.method, &stored.request.url);
        request.headers = stored.request.headers.into_headers();
        request.body = decode_body(stored.request.body.as_ref())?;

        let response = Response {
            url: stored.response.url,
            status: stored.response.status,
            headers: stored.response.headers.into_headers(),
        };

        Ok(Self {
            request,
            response,
            response_data: decode_body(stored.response.body.as_ref())?,
            recorded_at: stored.recorded_at,
        })
    }
}

impl From<&Cassette> for CassetteFile {
    fn from(cassette: &Cassette) -> Self {
        Self {
            name: cassette.name().to_string(),
            interactions: cassette.interactions().iter().map(Into::into).collect(),
        }
    }
}

impl TryFrom<CassetteFile> for Cassette {
    type Error = DvrError;

    fn try_from(file: CassetteFile) -> Result<Self> {
        let interactions = file
            .interactions
            .into_iter()
            .map(Interaction::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Cassette::new(file.name, interactions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_text_body_is_plain_string() {
        let body = StoredBody::encode(b"{\"items\":[]}");
        assert_eq!(body, StoredBody::Text("{\"items\":[]}".to_string()));

        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, "\"{\\\"items\\\":[]}\"");
    }

    #[test]
    fn test_binary_body_is_hex() {
        let body = StoredBody::encode(&[0xff, 0x00, 0x10]);
        assert_eq!(
            body,
            StoredBody::Binary {
                hex: "ff0010".to_string()
            }
        );

        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, "{\"hex\":\"ff0010\"}");
    }

    #[test]
    fn test_invalid_hex_rejected() {
        let body: StoredBody = serde_json::from_str("{\"hex\":\"zz\"}").unwrap();
        assert!(matches!(body.decode(), Err(DvrError::InvalidFormat(_))));
    }

    #[test]
    fn test_parse_minimal_file() {
        let json = r#"{
            "name": "items",
            "interactions": [
                {
                    "request": { "method": "GET", "url": "https://api.example.com/items" },
                    "response": { "status": 200, "body": "{\"items\":[]}" }
                }
            ]
        }"#;

        let file: CassetteFile = serde_json::from_str(json).unwrap();
        let cassette = Cassette::try_from(file).unwrap();

        assert_eq!(cassette.name(), "items");
        assert_eq!(cassette.len(), 1);

        let interaction = &cassette.interactions()[0];
        assert_eq!(interaction.request.method, "GET");
        assert!(interaction.request.body.is_none());
        assert_eq!(interaction.response.status, 200);
        assert_eq!(interaction.response_data.as_deref(), Some(&b"{\"items\":[]}"[..]));
        assert_eq!(interaction.recorded_at, 0);
    }

    #[test]
    fn test_headers_keep_order_and_repeats() {
        let interaction = Interaction::new(
            Request::get("https://api.example.com/items")
                .with_header("authorization", "Bearer first")
                .with_header("Authorization", "Bearer second"),
            Response::new(200)
                .with_header("Set-Cookie", "a=1")
                .with_header("Set-Cookie", "b=2"),
            None,
        );
        let cassette = Cassette::new("items", vec![interaction.clone()]);

        let json = cassette.to_json().unwrap();
        let reloaded = Cassette::from_json(&json).unwrap();
        let stored = &reloaded.interactions()[0];

        assert_eq!(stored.request.headers, interaction.request.headers);
        assert_eq!(stored.response.headers, interaction.response.headers);

        let live = Request::get("https://api.example.com/items")
            .with_header("Authorization", "Bearer first");
        let checked = ["Authorization".to_string()];
        assert!(cassette.interaction_for_request(&live, &checked).is_some());
        assert!(reloaded.interaction_for_request(&live, &checked).is_some());
    }

    #[test]
    fn test_headers_object_form_accepted() {
        let json = r#"{
            "name": "items",
            "interactions": [
                {
                    "request": {
                        "method": "GET",
                        "url": "https://api.example.com/items",
                        "headers": { "X-B": "2", "Accept": "application/json" }
                    },
                    "response": { "status": 200, "headers": {} }
                }
            ]
        }"#;

        let cassette = Cassette::from_json(json.as_bytes()).unwrap();
        let request = &cassette.interactions()[0].request;
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(request.headers[0].0, "Accept");
        assert!(cassette.interactions()[0].response.headers.is_empty());
    }

    #[test]
    fn test_missing_status_rejected() {
        let json = r#"{
            "name": "broken",
            "interactions": [
                { "request": { "method": "GET", "url": "https://a.example" }, "response": {} }
            ]
        }"#;

        assert!(serde_json::from_str::<CassetteFile>(json).is_err());
    }

    proptest! {
        #[test]
        fn proptest_body_encoding_is_lossless(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let decoded = StoredBody::encode(&data).decode().unwrap();
            prop_assert_eq!(decoded.as_ref(), data.as_slice());
        }
    }
}
