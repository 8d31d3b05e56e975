//! Core types for arbor repositories: object digests, the metadata object
//! model, ref and filename validation, keyfile configuration, and the
//! [`ObjectStore`] seam implemented by concrete repositories.

pub mod checksum;
pub mod config;
pub mod content;
pub mod keyfile;
pub mod object;
pub mod refs;
pub mod store;

pub use checksum::Digest;
pub use object::{Commit, DirMeta, DirTree, Metadata, ObjectName, ObjectType, MAX_RECURSION};
pub use refs::RefName;
pub use store::{ObjectStore, RepoMode};
