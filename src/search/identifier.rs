//! Identifier classification and PDB to UniProt mapping.

use crate::models::IdentifierKind;
use crate::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Four-character PDB entry id: a digit followed by three alphanumerics.
static PDB_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9][A-Za-z0-9]{3}$").unwrap_or_else(|_| unreachable!()));

/// UniProt accession, per the UniProt accession number format.
static UNIPROT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[OPQ][0-9][A-Z0-9]{3}[0-9]|[A-NR-Z][0-9](?:[A-Z][A-Z0-9]{2}[0-9]){1,2})$")
        .unwrap_or_else(|_| unreachable!())
});

/// A classified user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// PDB entry id, lowercased.
    Pdb(String),
    /// UniProt accession, uppercased.
    Uniprot(String),
    /// Neither.
    Invalid,
}

impl Identifier {
    /// Returns the identifier kind, if valid.
    #[must_use]
    pub const fn kind(&self) -> Option<IdentifierKind> {
        match self {
            Self::Pdb(_) => Some(IdentifierKind::Pdb),
            Self::Uniprot(_) => Some(IdentifierKind::Uniprot),
            Self::Invalid => None,
        }
    }

    /// Returns the normalized identifier, if valid.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Pdb(id) | Self::Uniprot(id) => Some(id),
            Self::Invalid => None,
        }
    }
}

/// Classifies a raw input string by pattern alone.
#[must_use]
pub fn classify_identifier(raw: &str) -> Identifier {
    let trimmed = raw.trim();
    if PDB_PATTERN.is_match(trimmed) {
        return Identifier::Pdb(trimmed.to_lowercase());
    }
    let upper = trimmed.to_uppercase();
    if UNIPROT_PATTERN.is_match(&upper) {
        return Identifier::Uniprot(upper);
    }
    Identifier::Invalid
}

/// Resolves raw user input into a searchable identifier.
#[async_trait]
pub trait IdentifierResolver: Send + Sync {
    /// Classifies the input.
    async fn classify(&self, raw: &str) -> Identifier;

    /// Returns the UniProt accessions linked to a PDB entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoMappingFound`] when the entry has no linked accession.
    async fn uniprot_for_pdb(&self, pdb_id: &str) -> Result<Vec<String>>;
}

/// Pattern-based resolver with an injected PDB to UniProt table.
#[derive(Debug, Clone, Default)]
pub struct PatternIdentifierResolver {
    mappings: HashMap<String, Vec<String>>,
}

impl PatternIdentifierResolver {
    /// Creates a resolver with no mappings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a PDB to UniProt mapping.
    #[must_use]
    pub fn with_mapping<I, S>(mut self, pdb_id: &str, accessions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mappings.insert(
            pdb_id.trim().to_lowercase(),
            accessions.into_iter().map(Into::into).collect(),
        );
        self
    }
}

#[async_trait]
impl IdentifierResolver for PatternIdentifierResolver {
    async fn classify(&self, raw: &str) -> Identifier {
        classify_identifier(raw)
    }

    async fn uniprot_for_pdb(&self, pdb_id: &str) -> Result<Vec<String>> {
        let key = pdb_id.trim().to_lowercase();
        match self.mappings.get(&key) {
            Some(accessions) if !accessions.is_empty() => Ok(accessions.clone()),
            _ => Err(Error::NoMappingFound(pdb_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("1tup", Identifier::Pdb("1tup".into()); "lowercase pdb")]
    #[test_case(" 4HHB ", Identifier::Pdb("4hhb".into()); "padded uppercase pdb")]
    #[test_case("P04637", Identifier::Uniprot("P04637".into()); "six char accession")]
    #[test_case("a0a023gpi8", Identifier::Uniprot("A0A023GPI8".into()); "ten char accession")]
    #[test_case("Q9Y2X3", Identifier::Uniprot("Q9Y2X3".into()); "opq accession")]
    #[test_case("", Identifier::Invalid; "empty")]
    #[test_case("abcd", Identifier::Invalid; "pdb must start with digit")]
    #[test_case("not-an-id", Identifier::Invalid; "garbage")]
    fn test_classify(raw: &str, expected: Identifier) {
        assert_eq!(classify_identifier(raw), expected);
    }

    #[tokio::test]
    async fn test_mapping_lookup() {
        let resolver = PatternIdentifierResolver::new().with_mapping("1TUP", ["P04637"]);
        assert_eq!(
            resolver.uniprot_for_pdb("1tup").await,
            Ok(vec!["P04637".to_string()])
        );
        assert_eq!(
            resolver.uniprot_for_pdb("4hhb").await,
            Err(Error::NoMappingFound("4hhb".into()))
        );
    }

    #[test]
    fn test_kind() {
        assert_eq!(
            Identifier::Pdb("1tup".into()).kind(),
            Some(IdentifierKind::Pdb)
        );
        assert_eq!(Identifier::Invalid.value(), None);
    }
}
