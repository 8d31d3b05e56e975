//! The [`ObjectStore`] seam: a content-addressed blob store keyed by
//! `(type, digest)`, with a narrow mutable refs namespace driven through a
//! transaction. Reads may run concurrently with writes; implementations
//! synchronize internally.

pub mod memory;

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::checksum::Digest;
use crate::config::ConfigChain;
use crate::object::{self, Commit, DirTree, Metadata, ObjectName, ObjectType};
use crate::refs::RefName;

/// Per-commit dictionary stored alongside a commit, addressable but not
/// content-addressed with it.
pub type DetachedMetadata = Map<String, Value>;

#[derive(Debug, Error)]
#[error("invalid repository mode {0:?}")]
pub struct ModeError(String);

/// Object layout mode of a repository.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepoMode {
    Bare,
    ArchiveZ2,
}

impl RepoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bare => "bare",
            Self::ArchiveZ2 => "archive-z2",
        }
    }
}

impl fmt::Display for RepoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoMode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bare" => Ok(Self::Bare),
            "archive-z2" => Ok(Self::ArchiveZ2),
            other => Err(ModeError(other.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("object {0} not found")]
    NotFound(ObjectName),
    #[error("failed to decode {name}: {err}")]
    Decode {
        name: ObjectName,
        #[source]
        err: object::ParseError,
    },
    #[error("expected a {expected} object, found {actual}")]
    TypeMismatch {
        expected: ObjectType,
        actual: ObjectType,
    },
    #[error("revision {0:?} not found")]
    UnknownRev(String),
    #[error("no transaction in progress")]
    NoTransaction,
    #[error("transaction already in progress")]
    InTransaction,
    #[error("commit {0} failed signature verification")]
    BadSignature(Digest),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// A content-addressed object store.
pub trait ObjectStore {
    /// Whether an object is stored.
    fn has_object(&self, objtype: ObjectType, checksum: &Digest) -> Result<bool, Error>;

    /// Load and decode a stored metadata object.
    fn load_metadata(&self, objtype: ObjectType, checksum: &Digest) -> Result<Metadata, Error>;

    /// Write a metadata object, returning the digest the store computed over
    /// its canonical serialization.
    fn write_metadata(&self, metadata: &Metadata) -> Result<Digest, Error>;

    /// Write a content object from its canonical byte stream, returning the
    /// computed digest.
    fn write_content(&self, object: &[u8]) -> Result<Digest, Error>;

    fn write_detached_commit_metadata(
        &self,
        checksum: &Digest,
        metadata: &DetachedMetadata,
    ) -> Result<(), Error>;

    fn load_detached_commit_metadata(
        &self,
        checksum: &Digest,
    ) -> Result<Option<DetachedMetadata>, Error>;

    /// Resolve a revision of the form `<ref>` or `<remote>/<ref>` to a commit
    /// digest. With `allow_missing`, an unknown revision is `None` rather
    /// than an error.
    fn resolve_rev(&self, rev: &str, allow_missing: bool) -> Result<Option<Digest>, Error>;

    /// Check the signature of a stored commit.
    fn verify_commit(&self, checksum: &Digest) -> Result<(), Error>;

    /// Begin a transaction. Returns whether a previous transaction left
    /// objects behind, in which case stored metadata must be re-walked.
    fn transaction_begin(&self) -> Result<bool, Error>;

    /// Apply staged ref updates and close the transaction.
    fn transaction_commit(&self) -> Result<(), Error>;

    /// Release the transaction without applying staged ref updates. Objects
    /// already written stay in place.
    fn transaction_abort(&self);

    /// Stage a ref update, applied on commit.
    fn transaction_set_ref(
        &self,
        remote: Option<&str>,
        name: &RefName,
        checksum: &Digest,
    ) -> Result<(), Error>;

    fn config(&self) -> &ConfigChain;

    fn load_commit(&self, checksum: &Digest) -> Result<Commit, Error> {
        match self.load_metadata(ObjectType::Commit, checksum)? {
            Metadata::Commit(commit) => Ok(commit),
            other => Err(Error::TypeMismatch {
                expected: ObjectType::Commit,
                actual: other.objtype(),
            }),
        }
    }

    fn load_dirtree(&self, checksum: &Digest) -> Result<DirTree, Error> {
        match self.load_metadata(ObjectType::DirTree, checksum)? {
            Metadata::DirTree(tree) => Ok(tree),
            other => Err(Error::TypeMismatch {
                expected: ObjectType::DirTree,
                actual: other.objtype(),
            }),
        }
    }
}
