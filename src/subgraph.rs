//! Envelope of subgraph query responses.
//!
//! The query client itself lives outside this crate; responses arrive as
//! JSON (`{"data": {...}, "errors": [...]}`) and are decoded here.

use std::io::Read;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::NormalizeError;

#[derive(Debug, Deserialize)]
pub struct SubgraphResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

/// `{data: {transactions: [...]}}`. Transactions stay raw; their shape is
/// the normalizer's business.
#[derive(Debug, Default, Deserialize)]
pub struct TransactionsData {
    #[serde(default)]
    pub transactions: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokensData {
    #[serde(default)]
    pub tokens: Vec<Value>,
}

impl<T: DeserializeOwned> SubgraphResponse<T> {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, NormalizeError> {
        serde_json::from_reader(reader)
            .map_err(|e| NormalizeError::MalformedResponse(e.to_string()))
    }

    pub fn from_value(value: Value) -> Result<Self, NormalizeError> {
        serde_json::from_value(value).map_err(|e| NormalizeError::MalformedResponse(e.to_string()))
    }

    /// The `data` member. GraphQL errors win over partial data: a response
    /// carrying both is rejected.
    pub fn into_data(self) -> Result<T, NormalizeError> {
        if !self.errors.is_empty() {
            return Err(NormalizeError::SubgraphErrors(
                self.errors.into_iter().map(|e| e.message).collect(),
            ));
        }
        self.data
            .ok_or_else(|| NormalizeError::MalformedResponse("response has no data".to_string()))
    }
}
