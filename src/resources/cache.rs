//! Content-addressed resource caches.

use std::collections::HashMap;

use super::handle::Handle;
use crate::error::GraphicsResult;

/// A resource that can live in a [`ResourceCache`].
pub trait CachedResource: Sized {
    /// What an importer supplies to build the resource.
    type Description;

    /// Resource kind for logging.
    const KIND: &'static str;

    /// Build a candidate resource from its description.
    fn build(desc: Self::Description) -> GraphicsResult<Self>;

    /// Hash of the resource content. Equal content yields equal handles.
    fn content_hash(&self) -> Handle<Self>;

    /// Full content comparison, used to detect hash collisions.
    fn same_content(&self, other: &Self) -> bool;

    /// The canonical empty instance.
    fn default_resource() -> Self;

    fn name(&self) -> &str;
}

/// Maps content hashes to imported resources.
///
/// Importing identical content twice returns the same handle and uploads
/// nothing new. Newly stored resources are queued until the GPU upload
/// driver drains them with [`consume_pending_uploads`]. Entries are never
/// evicted.
///
/// [`consume_pending_uploads`]: ResourceCache::consume_pending_uploads
pub struct ResourceCache<T: CachedResource> {
    entries: HashMap<Handle<T>, T>,
    pending: Vec<Handle<T>>,
    default: Option<Handle<T>>,
    collisions: u64,
}

impl<T: CachedResource> Default for ResourceCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: CachedResource> ResourceCache<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            pending: Vec::new(),
            default: None,
            collisions: 0,
        }
    }

    /// Build a resource from `desc` and store it unless identical content is
    /// already cached.
    pub fn import(&mut self, desc: T::Description) -> GraphicsResult<Handle<T>> {
        let candidate = T::build(desc)?;
        Ok(self.insert(candidate))
    }

    /// Store a built resource, deduplicating by content.
    ///
    /// On a hash hit the candidate is dropped and the existing handle is
    /// returned. If the stored resource's content differs, the collision is
    /// logged and counted but the existing handle is still returned.
    pub fn insert(&mut self, candidate: T) -> Handle<T> {
        let handle = candidate.content_hash();

        if let Some(existing) = self.entries.get(&handle) {
            if existing.same_content(&candidate) {
                log::debug!(
                    "{} '{}' deduplicated to '{}' ({:?})",
                    T::KIND,
                    candidate.name(),
                    existing.name(),
                    handle
                );
            } else {
                log::error!(
                    "{} hash collision: '{}' and '{}' share {:?}; keeping the cached resource",
                    T::KIND,
                    candidate.name(),
                    existing.name(),
                    handle
                );
                self.collisions += 1;
            }
            return handle;
        }

        log::trace!("{} '{}' imported as {:?}", T::KIND, candidate.name(), handle);
        self.entries.insert(handle, candidate);
        self.pending.push(handle);
        handle
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.entries.get(&handle)
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Handle of the canonical default resource, created on first use.
    pub fn get_default(&mut self) -> Handle<T> {
        if let Some(handle) = self.default {
            return handle;
        }
        let handle = self.insert(T::default_resource());
        self.default = Some(handle);
        handle
    }

    /// Take every handle stored since the previous call.
    pub fn consume_pending_uploads(&mut self) -> Vec<Handle<T>> {
        std::mem::take(&mut self.pending)
    }

    /// Put handles whose upload failed back on the pending list, ahead of
    /// anything imported since they were taken.
    pub fn requeue_pending(&mut self, handles: Vec<Handle<T>>) {
        if handles.is_empty() {
            return;
        }
        let newer = std::mem::replace(&mut self.pending, handles);
        self.pending.extend(newer);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of hash hits whose content differed from the cached resource.
    pub fn collisions(&self) -> u64 {
        self.collisions
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.entries.iter().map(|(handle, resource)| (*handle, resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphicsError;

    /// Resource whose hash is only the first byte, so collisions are easy.
    #[derive(Debug, PartialEq)]
    struct Blob(Vec<u8>);

    impl CachedResource for Blob {
        type Description = Vec<u8>;
        const KIND: &'static str = "blob";

        fn build(desc: Vec<u8>) -> GraphicsResult<Self> {
            if desc.is_empty() {
                return Err(GraphicsError::UnsupportedFormat("empty blob".to_string()));
            }
            Ok(Blob(desc))
        }

        fn content_hash(&self) -> Handle<Self> {
            Handle::from_id(self.0[0] as u64 + 1)
        }

        fn same_content(&self, other: &Self) -> bool {
            self == other
        }

        fn default_resource() -> Self {
            Blob(vec![0])
        }

        fn name(&self) -> &str {
            "blob"
        }
    }

    #[test]
    fn test_import_is_idempotent() {
        let mut cache = ResourceCache::<Blob>::new();
        let a = cache.import(vec![1, 2]).unwrap();
        let b = cache.import(vec![1, 2]).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.consume_pending_uploads(), vec![a]);
        assert!(cache.consume_pending_uploads().is_empty());
    }

    #[test]
    fn test_collision_keeps_existing_entry() {
        let mut cache = ResourceCache::<Blob>::new();
        let a = cache.import(vec![1, 2]).unwrap();
        let b = cache.import(vec![1, 3]).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.collisions(), 1);
        assert_eq!(cache.get(a), Some(&Blob(vec![1, 2])));
        assert_eq!(cache.pending_count(), 1);
    }

    #[test]
    fn test_default_is_lazy_and_stable() {
        let mut cache = ResourceCache::<Blob>::new();
        assert!(cache.is_empty());
        let first = cache.get_default();
        let second = cache.get_default();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.consume_pending_uploads(), vec![first]);
    }

    #[test]
    fn test_failed_build_stores_nothing() {
        let mut cache = ResourceCache::<Blob>::new();
        assert!(cache.import(Vec::new()).is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.pending_count(), 0);
        assert!(!cache.contains(Handle::from_id(1)));
    }

    #[test]
    fn test_requeue_goes_ahead_of_newer_imports() {
        let mut cache = ResourceCache::<Blob>::new();
        let a = cache.import(vec![1]).unwrap();
        let b = cache.import(vec![2]).unwrap();
        let taken = cache.consume_pending_uploads();
        assert_eq!(taken, vec![a, b]);

        let c = cache.import(vec![3]).unwrap();
        cache.requeue_pending(vec![b]);
        assert_eq!(cache.consume_pending_uploads(), vec![b, c]);

        cache.requeue_pending(Vec::new());
        assert_eq!(cache.pending_count(), 0);
    }
}
