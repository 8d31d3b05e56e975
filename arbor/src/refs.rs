use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefError {
    #[error("empty ref name")]
    Empty,
    #[error("ref name {0:?} contains whitespace")]
    Whitespace(String),
    #[error("ref name {0:?} contains a '..' component")]
    ParentComponent(String),
}

/// A validated ref name: a path-like UTF-8 name resolving to a commit digest.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefName(String);

impl RefName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RefName {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(RefError::Empty);
        }
        if s.chars().any(char::is_whitespace) {
            return Err(RefError::Whitespace(s.to_owned()));
        }
        if s.split('/').any(|component| component == "..") {
            return Err(RefError::ParentComponent(s.to_owned()));
        }
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<&str> for RefName {
    type Error = RefError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl Serialize for RefName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RefName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_refs() {
        for name in ["main", "os/stable/x86_64", "v2.1", "a..b"] {
            assert!(name.parse::<RefName>().is_ok(), "{name}");
        }
    }

    #[test]
    fn test_serde_as_string() {
        let name: RefName = "os/stable".parse().unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"os/stable\"");
        let back: RefName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
        assert!(serde_json::from_str::<RefName>("\"a b\"").is_err());
    }

    #[test]
    fn test_invalid_refs() {
        assert_eq!("".parse::<RefName>(), Err(RefError::Empty));
        assert_eq!(
            "a b".parse::<RefName>(),
            Err(RefError::Whitespace("a b".to_owned()))
        );
        assert_eq!(
            "a\tb".parse::<RefName>(),
            Err(RefError::Whitespace("a\tb".to_owned()))
        );
        assert_eq!(
            "../main".parse::<RefName>(),
            Err(RefError::ParentComponent("../main".to_owned()))
        );
        assert_eq!(
            "os/../main".parse::<RefName>(),
            Err(RefError::ParentComponent("os/../main".to_owned()))
        );
    }
}
