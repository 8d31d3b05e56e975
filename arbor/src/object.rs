//! The metadata object model: commits, directory trees and directory
//! metadata, plus the `(digest, type)` naming scheme used on the wire and as
//! table keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checksum::Digest;
use crate::store::RepoMode;

/// Maximum metadata traversal depth.
pub const MAX_RECURSION: u32 = 256;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{0}' is not a valid object type")]
pub struct TypeError(String);

/// The four kinds of repository object. Everything except [`ObjectType::File`]
/// is metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Commit,
    DirTree,
    DirMeta,
    File,
}

impl ObjectType {
    pub fn is_metadata(&self) -> bool {
        !matches!(self, Self::File)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::DirTree => "dirtree",
            Self::DirMeta => "dirmeta",
            Self::File => "file",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commit" => Ok(Self::Commit),
            "dirtree" => Ok(Self::DirTree),
            "dirmeta" => Ok(Self::DirMeta),
            "file" => Ok(Self::File),
            other => Err(TypeError(other.to_owned())),
        }
    }
}

/// An object's full name: its digest paired with its type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectName {
    pub checksum: Digest,
    pub objtype: ObjectType,
}

impl ObjectName {
    pub fn new(checksum: Digest, objtype: ObjectType) -> Self {
        Self { checksum, objtype }
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.checksum, self.objtype)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilenameError {
    #[error("empty filename")]
    Empty,
    #[error("filename {0:?} contains '/'")]
    Slash(String),
    #[error("filename contains a NUL byte")]
    Nul,
    #[error("invalid filename {0:?}")]
    Reserved(String),
}

/// Validate a single path component from an untrusted tree object.
pub fn validate_filename(name: &str) -> Result<(), FilenameError> {
    if name.is_empty() {
        return Err(FilenameError::Empty);
    }
    if name.contains('\0') {
        return Err(FilenameError::Nul);
    }
    if name.contains('/') {
        return Err(FilenameError::Slash(name.to_owned()));
    }
    if name == "." || name == ".." {
        return Err(FilenameError::Reserved(name.to_owned()));
    }
    Ok(())
}

/// A commit names the content tree and metadata tree of one revision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub parent: Option<Digest>,
    pub subject: String,
    pub body: String,
    pub timestamp: u64,
    pub tree_contents: Digest,
    pub tree_meta: Digest,
}

/// A file entry of a directory tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub checksum: Digest,
}

/// A sub-directory entry of a directory tree, naming the subtree and its
/// metadata object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub tree: Digest,
    pub meta: Digest,
}

/// An ordered directory listing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirTree {
    pub files: Vec<FileEntry>,
    pub dirs: Vec<DirEntry>,
}

/// Directory metadata: ownership, permissions and extended attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirMeta {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub xattrs: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{0} is not a metadata object type")]
    NotMetadata(ObjectType),
    #[error("malformed {objtype} object: {err}")]
    Malformed {
        objtype: ObjectType,
        #[source]
        err: serde_json::Error,
    },
}

/// A decoded metadata object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Metadata {
    Commit(Commit),
    DirTree(DirTree),
    DirMeta(DirMeta),
}

impl Metadata {
    pub fn objtype(&self) -> ObjectType {
        match self {
            Self::Commit(_) => ObjectType::Commit,
            Self::DirTree(_) => ObjectType::DirTree,
            Self::DirMeta(_) => ObjectType::DirMeta,
        }
    }

    /// Decode a metadata object according to its type's schema.
    pub fn parse(objtype: ObjectType, bytes: &[u8]) -> Result<Self, ParseError> {
        let malformed = |err| ParseError::Malformed { objtype, err };
        match objtype {
            ObjectType::Commit => serde_json::from_slice(bytes)
                .map(Self::Commit)
                .map_err(malformed),
            ObjectType::DirTree => serde_json::from_slice(bytes)
                .map(Self::DirTree)
                .map_err(malformed),
            ObjectType::DirMeta => serde_json::from_slice(bytes)
                .map(Self::DirMeta)
                .map_err(malformed),
            ObjectType::File => Err(ParseError::NotMetadata(objtype)),
        }
    }

    /// The canonical serialization over which the object's digest is computed.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let encoded = match self {
            Self::Commit(c) => serde_json::to_vec(c),
            Self::DirTree(t) => serde_json::to_vec(t),
            Self::DirMeta(m) => serde_json::to_vec(m),
        };
        encoded.expect("metadata objects always serialize")
    }

    pub fn digest(&self) -> Digest {
        Digest::digest(&self.canonical_bytes())
    }

    pub fn name(&self) -> ObjectName {
        ObjectName::new(self.digest(), self.objtype())
    }
}

fn loose_extension(objtype: ObjectType, mode: RepoMode) -> &'static str {
    match (objtype, mode) {
        (ObjectType::File, RepoMode::ArchiveZ2) => "filez",
        (objtype, _) => objtype.as_str(),
    }
}

/// Loose path of an object relative to an `objects/` directory, with the
/// first two hex digits of the digest as a fan-out prefix.
pub fn loose_path(checksum: &Digest, objtype: ObjectType, mode: RepoMode) -> String {
    let hex = checksum.to_string();
    format!(
        "{}/{}.{}",
        &hex[..2],
        &hex[2..],
        loose_extension(objtype, mode)
    )
}

/// Path of an object relative to a repository root.
pub fn relative_object_path(checksum: &Digest, objtype: ObjectType, mode: RepoMode) -> String {
    format!("objects/{}", loose_path(checksum, objtype, mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(byte: u8) -> Digest {
        Digest::from([byte; 32])
    }

    #[test]
    fn test_validate_filename() {
        assert_eq!(validate_filename("etc"), Ok(()));
        assert_eq!(validate_filename("a b"), Ok(()));
        assert_eq!(validate_filename(""), Err(FilenameError::Empty));
        assert_eq!(validate_filename("a\0b"), Err(FilenameError::Nul));
        assert_eq!(
            validate_filename("a/b"),
            Err(FilenameError::Slash("a/b".to_owned()))
        );
        assert_eq!(
            validate_filename("."),
            Err(FilenameError::Reserved(".".to_owned()))
        );
        assert_eq!(
            validate_filename(".."),
            Err(FilenameError::Reserved("..".to_owned()))
        );
    }

    #[test]
    fn test_object_type_strings() {
        for objtype in [
            ObjectType::Commit,
            ObjectType::DirTree,
            ObjectType::DirMeta,
            ObjectType::File,
        ] {
            assert_eq!(objtype.as_str().parse::<ObjectType>(), Ok(objtype));
        }
        assert!("blob".parse::<ObjectType>().is_err());
        assert!(ObjectType::Commit.is_metadata());
        assert!(!ObjectType::File.is_metadata());
    }

    #[test]
    fn test_metadata_roundtrip() {
        let commit = Metadata::Commit(Commit {
            parent: None,
            subject: "initial".to_owned(),
            body: String::new(),
            timestamp: 1700000000,
            tree_contents: digest(1),
            tree_meta: digest(2),
        });
        let bytes = commit.canonical_bytes();
        let parsed = Metadata::parse(ObjectType::Commit, &bytes).unwrap();
        assert_eq!(parsed, commit);
        assert_eq!(parsed.digest(), commit.digest());
    }

    #[test]
    fn test_metadata_digest_is_stable_and_distinct() {
        let empty = Metadata::DirTree(DirTree::default());
        assert_eq!(empty.digest(), empty.clone().digest());

        let tree = Metadata::DirTree(DirTree {
            files: vec![FileEntry {
                name: "a".to_owned(),
                checksum: digest(3),
            }],
            dirs: vec![],
        });
        assert_ne!(tree.digest(), empty.digest());
    }

    #[test]
    fn test_parse_rejects_wrong_schema() {
        let meta = Metadata::DirMeta(DirMeta::default());
        let bytes = meta.canonical_bytes();
        assert!(Metadata::parse(ObjectType::Commit, &bytes).is_err());
        assert!(matches!(
            Metadata::parse(ObjectType::File, &bytes),
            Err(ParseError::NotMetadata(ObjectType::File))
        ));
    }

    #[test]
    fn test_loose_paths() {
        let checksum = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
            .parse::<Digest>()
            .unwrap();
        assert_eq!(
            relative_object_path(&checksum, ObjectType::Commit, RepoMode::ArchiveZ2),
            "objects/ba/7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad.commit"
        );
        assert_eq!(
            relative_object_path(&checksum, ObjectType::File, RepoMode::ArchiveZ2),
            "objects/ba/7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad.filez"
        );
        assert_eq!(
            loose_path(&checksum, ObjectType::File, RepoMode::Bare),
            "ba/7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad.file"
        );
    }
}
