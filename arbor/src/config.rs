//! Repository configuration with parent inheritance. A store's config is a
//! non-empty chain `[child, parent, grandparent, …]`; lookups scan the chain
//! and a plain miss at one link falls through to the next, while malformed
//! input short-circuits.

use nonempty::NonEmpty;

use crate::keyfile::{Error, KeyFile};

#[derive(Clone, Debug)]
pub struct ConfigChain {
    chain: NonEmpty<KeyFile>,
}

impl ConfigChain {
    pub fn new(child: KeyFile) -> Self {
        Self {
            chain: NonEmpty::new(child),
        }
    }

    pub fn with_parent(mut self, parent: KeyFile) -> Self {
        self.chain.push(parent);
        self
    }

    pub fn string(&self, group: &str, key: &str) -> Result<String, Error> {
        let mut missing = None;
        for keyfile in self.chain.iter() {
            match keyfile.string(group, key) {
                Ok(value) => return Ok(value.to_owned()),
                Err(err) if err.is_missing() => {
                    // Report the child's miss if every link misses.
                    missing.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(missing.expect("chain is non-empty"))
    }

    pub fn bool_or(&self, group: &str, key: &str, default: bool) -> Result<bool, Error> {
        for keyfile in self.chain.iter() {
            match keyfile.boolean(group, key) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_missing() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(default)
    }

    /// A list-valued key, or `None` when no link in the chain defines it.
    pub fn string_list(&self, group: &str, key: &str) -> Result<Option<Vec<String>>, Error> {
        for keyfile in self.chain.iter() {
            match keyfile.string_list(group, key) {
                Ok(value) => return Ok(Some(value)),
                Err(err) if err.is_missing() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> ConfigChain {
        let child = KeyFile::parse(
            "[core]\nmode=bare\n[remote \"origin\"]\nurl=https://child.example.com\n",
        )
        .unwrap();
        let parent = KeyFile::parse(
            "[core]\nmode=archive-z2\n[remote \"origin\"]\nurl=https://parent.example.com\ngpg-verify=false\n[remote \"extra\"]\nurl=https://extra.example.com\n",
        )
        .unwrap();
        ConfigChain::new(child).with_parent(parent)
    }

    #[test]
    fn test_child_takes_precedence() {
        let config = chain();
        assert_eq!(config.string("core", "mode").unwrap(), "bare");
        assert_eq!(
            config.string("remote \"origin\"", "url").unwrap(),
            "https://child.example.com"
        );
    }

    #[test]
    fn test_missing_key_falls_through() {
        let config = chain();
        assert_eq!(
            config.bool_or("remote \"origin\"", "gpg-verify", true).unwrap(),
            false
        );
        assert_eq!(
            config.string("remote \"extra\"", "url").unwrap(),
            "https://extra.example.com"
        );
    }

    #[test]
    fn test_exhausted_chain_reports_child_miss() {
        let config = chain();
        let err = config.string("remote \"other\"", "url").unwrap_err();
        assert_eq!(err, Error::MissingGroup("remote \"other\"".to_owned()));
        assert_eq!(config.string_list("core", "branches").unwrap(), None);
        assert!(config.bool_or("core", "fsync", true).unwrap());
    }

    #[test]
    fn test_malformed_value_short_circuits() {
        let child = KeyFile::parse("[remote \"origin\"]\ngpg-verify=maybe\n").unwrap();
        let parent = KeyFile::parse("[remote \"origin\"]\ngpg-verify=true\n").unwrap();
        let config = ConfigChain::new(child).with_parent(parent);
        assert!(matches!(
            config.bool_or("remote \"origin\"", "gpg-verify", true),
            Err(Error::NotBoolean { .. })
        ));
    }
}
