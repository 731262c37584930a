//! Typed content handles.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Identifier of a cached resource, equal to the hash of its content.
///
/// Two handles are equal exactly when their content hashes are equal. The
/// zero handle is invalid and never names a resource.
pub struct Handle<T> {
    id: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// The invalid handle.
    pub const INVALID: Self = Self {
        id: 0,
        _marker: PhantomData,
    };

    pub(crate) const fn from_id(id: u64) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.id != 0
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Handle({:#018x})", self.id)
        } else {
            write!(f, "Handle(invalid)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_is_invalid() {
        let handle: Handle<String> = Handle::default();
        assert!(!handle.is_valid());
        assert_eq!(handle, Handle::INVALID);
    }

    #[test]
    fn test_handles_as_keys() {
        let mut set = HashSet::new();
        set.insert(Handle::<u32>::from_id(7));
        set.insert(Handle::<u32>::from_id(7));
        set.insert(Handle::<u32>::from_id(9));
        assert_eq!(set.len(), 2);
    }
}
