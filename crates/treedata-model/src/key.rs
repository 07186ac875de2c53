use std::fmt;

use crate::error::ModelError;

/// One per-level key component.
///
/// Equality and hashing are structural, so composite key paths compare by
/// value without any ad-hoc deep-equality walk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Key {
    Text(String),
    Integer(i64),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Text(value) => f.write_str(value),
            Key::Integer(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Integer(value)
    }
}

/// Ordered sequence of per-level keys identifying a tree node from the root.
///
/// The empty path is the root scope itself; every real row key has at least
/// one component. The string form (`to_path_string` / `Display`) is a JSON
/// array, so path-array and path-array-string keys are one type with
/// serialization as an internal concern.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct KeyPath(Vec<Key>);

impl KeyPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(components: Vec<Key>) -> Self {
        Self(components)
    }

    pub fn components(&self) -> &[Key] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Last component, `None` for the root path.
    pub fn leaf(&self) -> Option<&Key> {
        self.0.last()
    }

    /// Parent path, `None` for the root path.
    pub fn parent(&self) -> Option<KeyPath> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn child(&self, key: impl Into<Key>) -> KeyPath {
        let mut components = self.0.clone();
        components.push(key.into());
        Self(components)
    }

    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Strict descendant test: `self` is below `ancestor`, not equal to it.
    pub fn is_descendant_of(&self, ancestor: &KeyPath) -> bool {
        self.0.len() > ancestor.0.len() && self.starts_with(ancestor)
    }

    /// JSON-array string form of the path.
    pub fn to_path_string(&self) -> String {
        serde_json::to_string(&self.0).expect("key components are always JSON-representable")
    }

    pub fn from_path_string(input: &str) -> Result<Self, ModelError> {
        let components: Vec<Key> =
            serde_json::from_str(input).map_err(|err| ModelError::InvalidKeyPath {
                input: input.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self(components))
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_path_string())
    }
}

impl From<Vec<Key>> for KeyPath {
    fn from(components: Vec<Key>) -> Self {
        Self(components)
    }
}

impl FromIterator<Key> for KeyPath {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a KeyPath {
    type Item = &'a Key;
    type IntoIter = std::slice::Iter<'a, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
