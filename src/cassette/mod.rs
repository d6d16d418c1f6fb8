//! Cassettes: named, ordered collections of recorded interactions

mod format;
mod interaction;

pub use format::{
    CassetteFile, StoredBody, StoredHeaders, StoredInteraction, StoredRequest, StoredResponse,
};
pub use interaction::{Interaction, Request, Response};

use crate::matching::requests_match;
use crate::{DvrError, Result};

/// File extension of cassette files
pub const CASSETTE_EXTENSION: &str = "json";

/// A named collection of interactions in recording order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cassette {
    name: String,
    interactions: Vec<Interaction>,
}

impl Cassette {
    /// Create a cassette from interactions
    #[must_use]
    pub fn new(name: impl Into<String>, interactions: Vec<Interaction>) -> Self {
        Self {
            name: name.into(),
            interactions,
        }
    }

    /// Cassette name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interactions in recording order
    #[must_use]
    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Number of interactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether the cassette has no interactions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Append an interaction
    pub fn push(&mut self, interaction: Interaction) {
        self.interactions.push(interaction);
    }

    /// Find the first interaction whose request is equivalent to `request`
    ///
    /// Only headers named in `headers_to_check` take part in the comparison.
    #[must_use]
    pub fn interaction_for_request(
        &self,
        request: &Request,
        headers_to_check: &[String],
    ) -> Option<&Interaction> {
        self.interactions
            .iter()
            .find(|interaction| requests_match(&interaction.request, request, headers_to_check))
    }

    /// Parse a cassette from JSON bytes
    ///
    /// # Errors
    ///
    /// Returns error if the data is not a valid cassette
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let file: CassetteFile = serde_json::from_slice(data)
            .map_err(|e| DvrError::InvalidFormat(format!("Failed to parse cassette: {e}")))?;
        Self::try_from(file)
    }

    /// Serialize as pretty-printed JSON with a trailing newline
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let mut data = serde_json::to_vec_pretty(&CassetteFile::from(self))
            .map_err(|e| DvrError::Other(format!("Failed to serialize cassette: {e}")))?;
        data.push(b'\n');
        Ok(data)
    }
}
