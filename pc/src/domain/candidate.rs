//! Candidate profiles as produced by a search provider

use std::collections::BTreeMap;

use super::id::{ProfileId, canonical_url};

/// A profile surfaced by a search, before it reaches the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub profile_id: ProfileId,
    pub url: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl Candidate {
    pub fn new(profile_id: ProfileId) -> Self {
        Self {
            profile_id,
            url: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Build from a profile URL, deriving the ID from its `/in/{slug}` segment
    pub fn from_url(url: &str) -> Option<Self> {
        let profile_id = ProfileId::from_url(url)?;
        Some(Self::new(profile_id).with_url(url))
    }

    pub fn with_url(mut self, url: impl AsRef<str>) -> Self {
        self.url = Some(canonical_url(url.as_ref()));
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        self.profile_id.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url() {
        let candidate = Candidate::from_url("https://www.example.com/in/jane-doe/?trk=abc").unwrap();
        assert_eq!(candidate.id(), "jane-doe");
        assert_eq!(candidate.url.as_deref(), Some("https://www.example.com/in/jane-doe/"));
        assert!(Candidate::from_url("https://www.example.com/feed/").is_none());
    }

    #[test]
    fn test_with_attribute() {
        let candidate = Candidate::new(ProfileId::new("jane").unwrap())
            .with_attribute("role", "CTO")
            .with_attribute("location", "Paris");
        assert_eq!(candidate.attributes.len(), 2);
        assert_eq!(candidate.attributes.get("role").map(String::as_str), Some("CTO"));
    }
}
