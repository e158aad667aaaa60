//! Tag sets (metric dimensions).

use std::fmt;

/// One `key=value` dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Ordered collection of tags.
///
/// Insertion order is kept for display; a later tag with an existing key
/// replaces the earlier value, so a set never carries duplicate keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Tags {
    inner: Vec<Tag>,
}

impl Tags {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of(pairs: &[(&str, &str)]) -> Self {
        let mut tags = Self::empty();
        for (k, v) in pairs {
            tags.push(Tag::new(*k, *v));
        }
        tags
    }

    pub fn push(&mut self, tag: Tag) {
        match self.inner.iter_mut().find(|t| t.key == tag.key) {
            Some(existing) => existing.value = tag.value,
            None => self.inner.push(tag),
        }
    }

    /// Builder-style `push`.
    pub fn and(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(Tag::new(key, value));
        self
    }

    /// Append every tag of `other`, overriding duplicate keys.
    pub fn extend(mut self, other: &Tags) -> Self {
        for t in other.iter() {
            self.push(t.clone());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.iter().find(|t| t.key == key).map(|t| t.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.inner.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Tags sorted by key; the identity order used by the registry.
    pub fn sorted(&self) -> Vec<Tag> {
        let mut v = self.inner.clone();
        v.sort();
        v
    }
}

impl FromIterator<Tag> for Tags {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut tags = Tags::empty();
        for t in iter {
            tags.push(t);
        }
        tags
    }
}
