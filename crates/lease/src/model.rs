//! Model identifiers in the registry namespace.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// `organization/model-name`, e.g. `NousResearch/Hermes-3-Llama-3.1-8B`.
static MODEL_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*/[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap()
});

/// A validated model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId(String);

impl ModelId {
    /// Parse a user-entered identifier. Surrounding whitespace is ignored.
    ///
    /// # Errors
    /// Returns [`ValidationError::EmptyModel`] for blank input and
    /// [`ValidationError::MalformedModel`] if it is not `org/name`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyModel);
        }
        if !MODEL_ID_PATTERN.is_match(trimmed) {
            return Err(ValidationError::MalformedModel(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ModelId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ModelId> for String {
    fn from(id: ModelId) -> Self {
        id.0
    }
}

impl std::str::FromStr for ModelId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let id = ModelId::parse("NousResearch/Hermes-3-Llama-3.1-8B").unwrap();
        assert_eq!(id.to_string(), "NousResearch/Hermes-3-Llama-3.1-8B");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let id = ModelId::parse("  meta-llama/Llama-3.1-70B\n").unwrap();
        assert_eq!(id.as_str(), "meta-llama/Llama-3.1-70B");
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(ModelId::parse(""), Err(ValidationError::EmptyModel));
        assert_eq!(ModelId::parse("   "), Err(ValidationError::EmptyModel));
    }

    #[test]
    fn test_parse_malformed() {
        for bad in [
            "no-slash",
            "/leading",
            "trailing/",
            "a/b/c",
            "https://huggingface.co/org/model",
            "org/mo del",
            "-org/model",
        ] {
            assert!(
                matches!(ModelId::parse(bad), Err(ValidationError::MalformedModel(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: ModelId = serde_json::from_str("\"org/name\"").unwrap();
        assert_eq!(ok.as_str(), "org/name");
        assert!(serde_json::from_str::<ModelId>("\"nope\"").is_err());
    }
}
