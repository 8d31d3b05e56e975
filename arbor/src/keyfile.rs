//! Parser for the keyfile configuration format used by repository and remote
//! configs: `[group]` or `[remote "name"]` headers followed by `key=value`
//! entries, with `#` and `;` line comments.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("group '{0}' not found")]
    MissingGroup(String),
    #[error("key '{key}' not found in group '{group}'")]
    MissingKey { group: String, key: String },
    #[error("line {0}: malformed group header")]
    MalformedGroup(usize),
    #[error("line {0}: expected 'key=value'")]
    MalformedEntry(usize),
    #[error("line {0}: entry outside of any group")]
    OrphanEntry(usize),
    #[error("group '{group}': key '{key}' is not a boolean: {value:?}")]
    NotBoolean {
        group: String,
        key: String,
        value: String,
    },
}

impl Error {
    /// Whether this is a plain lookup miss, as opposed to malformed input.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::MissingGroup(_) | Self::MissingKey { .. })
    }
}

/// A parsed keyfile. Groups and entries keep their file order; duplicate
/// keys resolve to the last occurrence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyFile {
    groups: Vec<(String, Vec<(String, String)>)>,
}

impl KeyFile {
    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut groups: Vec<(String, Vec<(String, String)>)> = Vec::new();

        for (n, raw) in input.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[') {
                let name = header
                    .strip_suffix(']')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .ok_or(Error::MalformedGroup(n + 1))?;
                groups.push((name.to_owned(), Vec::new()));
            } else if let Some((key, value)) = line.split_once('=') {
                let (_, entries) = groups.last_mut().ok_or(Error::OrphanEntry(n + 1))?;
                entries.push((key.trim().to_owned(), value.trim().to_owned()));
            } else {
                return Err(Error::MalformedEntry(n + 1));
            }
        }

        Ok(Self { groups })
    }

    fn entries(&self, group: &str) -> Option<&[(String, String)]> {
        self.groups
            .iter()
            .find(|(name, _)| name == group)
            .map(|(_, entries)| entries.as_slice())
    }

    pub fn string(&self, group: &str, key: &str) -> Result<&str, Error> {
        let entries = self
            .entries(group)
            .ok_or_else(|| Error::MissingGroup(group.to_owned()))?;
        entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| Error::MissingKey {
                group: group.to_owned(),
                key: key.to_owned(),
            })
    }

    pub fn boolean(&self, group: &str, key: &str) -> Result<bool, Error> {
        match self.string(group, key)? {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            value => Err(Error::NotBoolean {
                group: group.to_owned(),
                key: key.to_owned(),
                value: value.to_owned(),
            }),
        }
    }

    /// A `;`-separated list value. A trailing separator is allowed.
    pub fn string_list(&self, group: &str, key: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .string(group, key)?
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
# repository configuration
[core]
mode=archive-z2
repo_version = 1

[remote "origin"]
url=https://example.com/repo
gpg-verify=false
branches=main;os/stable;
"#;

    #[test]
    fn test_lookup() {
        let keyfile = KeyFile::parse(CONFIG).unwrap();
        assert_eq!(keyfile.string("core", "mode"), Ok("archive-z2"));
        assert_eq!(keyfile.string("core", "repo_version"), Ok("1"));
        assert_eq!(
            keyfile.string("remote \"origin\"", "url"),
            Ok("https://example.com/repo")
        );
        assert_eq!(keyfile.boolean("remote \"origin\"", "gpg-verify"), Ok(false));
        assert_eq!(
            keyfile.string_list("remote \"origin\"", "branches"),
            Ok(vec!["main".to_owned(), "os/stable".to_owned()])
        );
    }

    #[test]
    fn test_missing() {
        let keyfile = KeyFile::parse(CONFIG).unwrap();
        let err = keyfile.string("fsck", "mode").unwrap_err();
        assert_eq!(err, Error::MissingGroup("fsck".to_owned()));
        assert!(err.is_missing());

        let err = keyfile.string("core", "parent").unwrap_err();
        assert_eq!(
            err,
            Error::MissingKey {
                group: "core".to_owned(),
                key: "parent".to_owned()
            }
        );
        assert!(err.is_missing());
    }

    #[test]
    fn test_duplicate_key_last_wins() {
        let keyfile = KeyFile::parse("[core]\nmode=bare\nmode=archive-z2\n").unwrap();
        assert_eq!(keyfile.string("core", "mode"), Ok("archive-z2"));
    }

    #[test]
    fn test_malformed_input() {
        assert_eq!(
            KeyFile::parse("[core\nmode=bare\n"),
            Err(Error::MalformedGroup(1))
        );
        assert_eq!(KeyFile::parse("mode=bare\n"), Err(Error::OrphanEntry(1)));
        assert_eq!(
            KeyFile::parse("[core]\nmode\n"),
            Err(Error::MalformedEntry(2))
        );
        assert!(!KeyFile::parse("[core\n").unwrap_err().is_missing());
    }

    #[test]
    fn test_bad_boolean() {
        let keyfile = KeyFile::parse("[core]\nmode=bare\n").unwrap();
        assert!(matches!(
            keyfile.boolean("core", "mode"),
            Err(Error::NotBoolean { .. })
        ));
    }

    #[test]
    fn test_empty_list() {
        let keyfile = KeyFile::parse("[remote \"a\"]\nbranches=\n").unwrap();
        assert_eq!(keyfile.string_list("remote \"a\"", "branches"), Ok(vec![]));
    }
}
