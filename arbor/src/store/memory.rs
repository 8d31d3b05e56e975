//! In-memory [`ObjectStore`] used by the test suites and for prototyping
//! against a fabricated repository.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::checksum::Digest;
use crate::config::ConfigChain;
use crate::object::{Metadata, ObjectName, ObjectType};
use crate::refs::RefName;
use crate::store::{DetachedMetadata, Error, ObjectStore};

#[derive(Default)]
struct Inner {
    objects: HashMap<ObjectName, Vec<u8>>,
    detached: HashMap<Digest, DetachedMetadata>,
    refs: BTreeMap<String, Digest>,
    staged_refs: BTreeMap<String, Digest>,
    bad_signatures: HashSet<Digest>,
    in_transaction: bool,
    dirty: bool,
}

/// An object store backed by in-memory tables. The object pool is
/// append-only: an aborted transaction keeps every object written under it
/// and makes the next transaction resume.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    config: ConfigChain,
}

impl MemoryStore {
    pub fn new(config: ConfigChain) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            config,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a commit so that [`ObjectStore::verify_commit`] rejects it.
    pub fn reject_signature(&self, checksum: Digest) {
        self.write().bad_signatures.insert(checksum);
    }

    /// Names of every stored object, in sorted order.
    pub fn object_names(&self) -> Vec<ObjectName> {
        let mut names: Vec<_> = self.read().objects.keys().copied().collect();
        names.sort();
        names
    }
}

impl ObjectStore for MemoryStore {
    fn has_object(&self, objtype: ObjectType, checksum: &Digest) -> Result<bool, Error> {
        Ok(self
            .read()
            .objects
            .contains_key(&ObjectName::new(*checksum, objtype)))
    }

    fn load_metadata(&self, objtype: ObjectType, checksum: &Digest) -> Result<Metadata, Error> {
        let name = ObjectName::new(*checksum, objtype);
        let inner = self.read();
        let bytes = inner.objects.get(&name).ok_or(Error::NotFound(name))?;
        Metadata::parse(objtype, bytes).map_err(|err| Error::Decode { name, err })
    }

    fn write_metadata(&self, metadata: &Metadata) -> Result<Digest, Error> {
        let bytes = metadata.canonical_bytes();
        let checksum = Digest::digest(&bytes);
        self.write()
            .objects
            .insert(ObjectName::new(checksum, metadata.objtype()), bytes);
        Ok(checksum)
    }

    fn write_content(&self, object: &[u8]) -> Result<Digest, Error> {
        let checksum = Digest::digest(object);
        self.write()
            .objects
            .insert(ObjectName::new(checksum, ObjectType::File), object.to_vec());
        Ok(checksum)
    }

    fn write_detached_commit_metadata(
        &self,
        checksum: &Digest,
        metadata: &DetachedMetadata,
    ) -> Result<(), Error> {
        let mut inner = self.write();
        if !inner.in_transaction {
            return Err(Error::NoTransaction);
        }
        inner.detached.insert(*checksum, metadata.clone());
        Ok(())
    }

    fn load_detached_commit_metadata(
        &self,
        checksum: &Digest,
    ) -> Result<Option<DetachedMetadata>, Error> {
        Ok(self.read().detached.get(checksum).cloned())
    }

    fn resolve_rev(&self, rev: &str, allow_missing: bool) -> Result<Option<Digest>, Error> {
        match self.read().refs.get(rev) {
            Some(checksum) => Ok(Some(*checksum)),
            None if allow_missing => Ok(None),
            None => Err(Error::UnknownRev(rev.to_owned())),
        }
    }

    fn verify_commit(&self, checksum: &Digest) -> Result<(), Error> {
        if self.read().bad_signatures.contains(checksum) {
            return Err(Error::BadSignature(*checksum));
        }
        Ok(())
    }

    fn transaction_begin(&self) -> Result<bool, Error> {
        let mut inner = self.write();
        if inner.in_transaction {
            return Err(Error::InTransaction);
        }
        let resuming = inner.dirty;
        inner.in_transaction = true;
        inner.dirty = true;
        Ok(resuming)
    }

    fn transaction_commit(&self) -> Result<(), Error> {
        let mut inner = self.write();
        if !inner.in_transaction {
            return Err(Error::NoTransaction);
        }
        let staged = std::mem::take(&mut inner.staged_refs);
        inner.refs.extend(staged);
        inner.in_transaction = false;
        inner.dirty = false;
        Ok(())
    }

    fn transaction_abort(&self) {
        let mut inner = self.write();
        inner.staged_refs.clear();
        inner.in_transaction = false;
    }

    fn transaction_set_ref(
        &self,
        remote: Option<&str>,
        name: &RefName,
        checksum: &Digest,
    ) -> Result<(), Error> {
        let mut inner = self.write();
        if !inner.in_transaction {
            return Err(Error::NoTransaction);
        }
        let rev = match remote {
            Some(remote) => format!("{remote}/{name}"),
            None => name.to_string(),
        };
        inner.staged_refs.insert(rev, *checksum);
        Ok(())
    }

    fn config(&self) -> &ConfigChain {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyfile::KeyFile;
    use crate::object::DirMeta;

    fn store() -> MemoryStore {
        let keyfile = KeyFile::parse("[core]\nmode=bare\n").unwrap();
        MemoryStore::new(ConfigChain::new(keyfile))
    }

    #[test]
    fn test_object_roundtrip() {
        let store = store();
        let meta = Metadata::DirMeta(DirMeta::default());

        assert!(!store.has_object(ObjectType::DirMeta, &meta.digest()).unwrap());
        let checksum = store.write_metadata(&meta).unwrap();
        assert_eq!(checksum, meta.digest());
        assert!(store.has_object(ObjectType::DirMeta, &checksum).unwrap());
        assert_eq!(store.load_metadata(ObjectType::DirMeta, &checksum).unwrap(), meta);
        // The same digest under a different type is a different object.
        assert!(!store.has_object(ObjectType::Commit, &checksum).unwrap());
    }

    #[test]
    fn test_refs_apply_on_commit_only() {
        let store = store();
        let checksum = Digest::digest(b"commit");
        let name: RefName = "main".parse().unwrap();

        assert!(!store.transaction_begin().unwrap());
        store
            .transaction_set_ref(Some("origin"), &name, &checksum)
            .unwrap();
        assert_eq!(store.resolve_rev("origin/main", true).unwrap(), None);
        store.transaction_commit().unwrap();
        assert_eq!(
            store.resolve_rev("origin/main", true).unwrap(),
            Some(checksum)
        );
        assert!(matches!(
            store.resolve_rev("origin/other", false),
            Err(Error::UnknownRev(_))
        ));
    }

    #[test]
    fn test_aborted_transaction_resumes() {
        let store = store();
        assert!(!store.transaction_begin().unwrap());
        store.transaction_abort();
        assert!(store.transaction_begin().unwrap());
        store.transaction_commit().unwrap();
        assert!(!store.transaction_begin().unwrap());
        store.transaction_abort();
    }

    #[test]
    fn test_set_ref_outside_transaction() {
        let store = store();
        let name: RefName = "main".parse().unwrap();
        assert!(matches!(
            store.transaction_set_ref(None, &name, &Digest::digest(b"c")),
            Err(Error::NoTransaction)
        ));
    }

    #[test]
    fn test_signature_rejection() {
        let store = store();
        let checksum = Digest::digest(b"commit");
        assert!(store.verify_commit(&checksum).is_ok());
        store.reject_signature(checksum);
        assert!(matches!(
            store.verify_commit(&checksum),
            Err(Error::BadSignature(_))
        ));
    }
}
