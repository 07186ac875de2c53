use std::collections::HashSet;
use std::rc::Rc;

use crate::key::KeyPath;

/// Immutable key collection with two representations: an explicit member
/// set, and "all keys except a deleted set".
///
/// Mutating operations return a new `KeySet`. When a call is a no-op (empty
/// input, no net change) the result shares the same backing storage as the
/// receiver, observable via [`KeySet::ptr_eq`]; callers use this for cheap
/// change detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet {
    repr: Repr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Repr {
    Explicit(Rc<HashSet<KeyPath>>),
    AllExcept(Rc<HashSet<KeyPath>>),
}

impl KeySet {
    /// Empty explicit set.
    pub fn new() -> Self {
        Self {
            repr: Repr::Explicit(Rc::new(HashSet::new())),
        }
    }

    pub fn from_keys<I: IntoIterator<Item = KeyPath>>(keys: I) -> Self {
        Self {
            repr: Repr::Explicit(Rc::new(keys.into_iter().collect())),
        }
    }

    /// "All keys" representation with an empty deleted set.
    pub fn all() -> Self {
        Self {
            repr: Repr::AllExcept(Rc::new(HashSet::new())),
        }
    }

    pub fn is_add_all(&self) -> bool {
        matches!(self.repr, Repr::AllExcept(_))
    }

    /// Structural membership test.
    pub fn has(&self, key: &KeyPath) -> bool {
        match &self.repr {
            Repr::Explicit(members) => members.contains(key),
            Repr::AllExcept(deleted) => !deleted.contains(key),
        }
    }

    /// Explicit members; empty for the "all" representation, which has no
    /// enumerable members.
    pub fn values(&self) -> impl Iterator<Item = &KeyPath> {
        let members = match &self.repr {
            Repr::Explicit(members) => Some(members),
            Repr::AllExcept(_) => None,
        };
        members.into_iter().flat_map(|set| set.iter())
    }

    /// Deleted members of the "all" representation.
    pub fn deleted_values(&self) -> impl Iterator<Item = &KeyPath> {
        let deleted = match &self.repr {
            Repr::Explicit(_) => None,
            Repr::AllExcept(deleted) => Some(deleted),
        };
        deleted.into_iter().flat_map(|set| set.iter())
    }

    /// Number of explicit members; `None` for the "all" representation.
    pub fn len(&self) -> Option<usize> {
        match &self.repr {
            Repr::Explicit(members) => Some(members.len()),
            Repr::AllExcept(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Returns a set containing `keys` in addition to the current members.
    pub fn add<I: IntoIterator<Item = KeyPath>>(&self, keys: I) -> KeySet {
        match &self.repr {
            Repr::Explicit(members) => {
                let added: Vec<KeyPath> = keys
                    .into_iter()
                    .filter(|key| !members.contains(key))
                    .collect();
                if added.is_empty() {
                    return self.clone();
                }
                let mut next = (**members).clone();
                next.extend(added);
                Self {
                    repr: Repr::Explicit(Rc::new(next)),
                }
            }
            Repr::AllExcept(deleted) => {
                let restored: Vec<KeyPath> = keys
                    .into_iter()
                    .filter(|key| deleted.contains(key))
                    .collect();
                if restored.is_empty() {
                    return self.clone();
                }
                let mut next = (**deleted).clone();
                for key in &restored {
                    next.remove(key);
                }
                Self {
                    repr: Repr::AllExcept(Rc::new(next)),
                }
            }
        }
    }

    /// Returns a set without `keys`.
    pub fn delete<I: IntoIterator<Item = KeyPath>>(&self, keys: I) -> KeySet {
        match &self.repr {
            Repr::Explicit(members) => {
                let removed: Vec<KeyPath> = keys
                    .into_iter()
                    .filter(|key| members.contains(key))
                    .collect();
                if removed.is_empty() {
                    return self.clone();
                }
                let mut next = (**members).clone();
                for key in &removed {
                    next.remove(key);
                }
                Self {
                    repr: Repr::Explicit(Rc::new(next)),
                }
            }
            Repr::AllExcept(deleted) => {
                let newly_deleted: Vec<KeyPath> = keys
                    .into_iter()
                    .filter(|key| !deleted.contains(key))
                    .collect();
                if newly_deleted.is_empty() {
                    return self.clone();
                }
                let mut next = (**deleted).clone();
                next.extend(newly_deleted);
                Self {
                    repr: Repr::AllExcept(Rc::new(next)),
                }
            }
        }
    }

    /// Switches to the "all keys" representation.
    pub fn add_all(&self) -> KeySet {
        match &self.repr {
            Repr::AllExcept(deleted) if deleted.is_empty() => self.clone(),
            _ => Self::all(),
        }
    }

    /// Switches to the empty explicit representation.
    pub fn clear(&self) -> KeySet {
        match &self.repr {
            Repr::Explicit(members) if members.is_empty() => self.clone(),
            _ => Self::new(),
        }
    }

    /// True when both sets share the same representation and backing storage.
    pub fn ptr_eq(&self, other: &KeySet) -> bool {
        match (&self.repr, &other.repr) {
            (Repr::Explicit(a), Repr::Explicit(b)) => Rc::ptr_eq(a, b),
            (Repr::AllExcept(a), Repr::AllExcept(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Default for KeySet {
    fn default() -> Self {
        Self::new()
    }
}
