use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::Header;

/// All captured values, by field name, in arrival order.
pub type ValueMap = HashMap<String, Vec<Value>>;

/// One occurrence of a field that had no hook registered.
#[derive(Debug, Clone)]
pub struct Value {
    content: Bytes,
    header: Header,
}

impl Value {
    pub(crate) fn new(content: Bytes, header: Header) -> Self {
        Value { content, header }
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// The content as text, invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn into_parts(self) -> (Bytes, Header) {
        (self.content, self.header)
    }
}

/// Handle to the values captured by a parser.
///
/// Clones share the same storage, so a hook can hold one and look at fields
/// decoded before it was called.
#[derive(Debug, Clone, Default)]
pub struct ValueStore {
    inner: Arc<RwLock<ValueMap>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, name: String, value: Value) {
        self.inner.write().entry(name).or_default().push(value);
    }

    /// First value of the field as text.
    pub fn value(&self, name: &str) -> Option<(String, Header)> {
        let map = self.inner.read();
        let first = map.get(name)?.first()?;
        Some((first.text().into_owned(), first.header.clone()))
    }

    /// First value of the field as bytes.
    pub fn value_raw(&self, name: &str) -> Option<(Bytes, Header)> {
        let map = self.inner.read();
        let first = map.get(name)?.first()?;
        Some((first.content.clone(), first.header.clone()))
    }

    /// Every value of the field.
    pub fn values(&self, name: &str) -> Option<Vec<Value>> {
        self.inner.read().get(name).cloned()
    }

    /// Snapshot of everything captured so far.
    pub fn value_map(&self) -> ValueMap {
        self.inner.read().clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(name: &str) -> Header {
        let line = format!("Content-Disposition: form-data; name=\"{}\"", name);
        Header::from_lines(vec![line.as_bytes()]).unwrap()
    }

    #[test]
    fn values_keep_arrival_order() {
        let store = ValueStore::new();
        store.push("a".into(), Value::new(Bytes::from_static(b"1"), header("a")));
        store.push("b".into(), Value::new(Bytes::from_static(b"x"), header("b")));
        store.push("a".into(), Value::new(Bytes::from_static(b"2"), header("a")));
        store.push("a".into(), Value::new(Bytes::from_static(b"1"), header("a")));

        let (first, h) = store.value("a").unwrap();
        assert_eq!(first, "1");
        assert_eq!(h.name(), Some("a"));

        let all: Vec<_> = store.values("a").unwrap().iter().map(|v| v.text().into_owned()).collect();
        assert_eq!(all, vec!["1", "2", "1"]);

        assert_eq!(store.value_map().len(), 2);
        assert!(store.value("missing").is_none());
        assert!(store.values("missing").is_none());
    }

    #[test]
    fn clones_share_storage() {
        let store = ValueStore::new();
        let view = store.clone();
        store.push("f".into(), Value::new(Bytes::from_static(&[0xff, b'a']), header("f")));

        let (raw, _) = view.value_raw("f").unwrap();
        assert_eq!(&raw[..], &[0xff, b'a']);
        assert_eq!(view.value("f").unwrap().0, "\u{fffd}a");
        assert!(view.contains("f"));
    }
}
