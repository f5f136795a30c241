//! Enumeration over a mapping's namespace.
//!
//! Keys are discovered with paged prefix scans, so enumeration never blocks
//! the backend and never sees other namespaces. Scans are not snapshots: an
//! entry removed while an iterator runs is skipped, never reported as an
//! error.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;
use tracing::debug;

use super::RedisDict;
use crate::backend::{Backend, BatchOp, ScanCursor};
use crate::codec::Value;
use crate::error::{DictError, Result};
use crate::keys;

// == Scan Keys ==
/// Lazy paged scan of the user keys under a prefix, in backend order.
pub struct ScanKeys<'a, B: Backend> {
    backend: &'a B,
    namespace_prefix: String,
    prefix: String,
    count: usize,
    cursor: Option<ScanCursor>,
    page: std::vec::IntoIter<String>,
    finished: bool,
}

impl<'a, B: Backend> ScanKeys<'a, B> {
    fn new(dict: &'a RedisDict<B>, search: &str) -> Self {
        Self {
            backend: &dict.backend,
            namespace_prefix: dict.namespace.prefix(),
            prefix: dict.namespace.to_backend_key(search),
            count: dict.config.scan_count,
            cursor: None,
            page: Vec::new().into_iter(),
            finished: false,
        }
    }
}

impl<B: Backend> Iterator for ScanKeys<'_, B> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(backend_key) = self.page.next() {
                match backend_key.strip_prefix(self.namespace_prefix.as_str()) {
                    Some(key) => return Some(Ok(key.to_string())),
                    None => continue,
                }
            }
            if self.finished {
                return None;
            }

            match self
                .backend
                .scan(&self.prefix, self.cursor.as_ref(), self.count)
            {
                Ok(page) => {
                    self.finished = page.next.is_none();
                    self.cursor = page.next;
                    self.page = page.keys.into_iter();
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err.into()));
                }
            }
        }
    }
}

// == Keys ==
enum KeySource<'a, B: Backend> {
    Scanning(ScanKeys<'a, B>),
    /// Insertion-ordered mapping whose order has not been loaded yet
    Pending,
    Ordered(std::vec::IntoIter<String>),
}

/// Lazy iterator over the keys of a mapping.
///
/// Insertion-ordered mappings load and sort the key set on the first call
/// to `next`.
pub struct Keys<'a, B: Backend> {
    dict: &'a RedisDict<B>,
    source: KeySource<'a, B>,
}

impl<'a, B: Backend> Keys<'a, B> {
    fn new(dict: &'a RedisDict<B>) -> Self {
        let source = if dict.config.insertion_order {
            KeySource::Pending
        } else {
            KeySource::Scanning(ScanKeys::new(dict, ""))
        };
        Self { dict, source }
    }
}

impl<B: Backend> Iterator for Keys<'_, B> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.source {
                KeySource::Scanning(scan) => return scan.next(),
                KeySource::Ordered(keys) => return keys.next().map(Ok),
                KeySource::Pending => match self.dict.ordered_keys() {
                    Ok(keys) => self.source = KeySource::Ordered(keys.into_iter()),
                    Err(err) => {
                        self.source = KeySource::Ordered(Vec::new().into_iter());
                        return Some(Err(err));
                    }
                },
            }
        }
    }
}

// == Items ==
/// Lazy iterator over `(key, value)` pairs.
///
/// Values are fetched a page of keys at a time.
pub struct Items<'a, B: Backend> {
    dict: &'a RedisDict<B>,
    keys: Keys<'a, B>,
    ready: VecDeque<(String, Value)>,
}

impl<B: Backend> Iterator for Items<'_, B> {
    type Item = Result<(String, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(Ok(item));
            }

            let mut page = Vec::new();
            while page.len() < self.dict.config.scan_count {
                match self.keys.next() {
                    Some(Ok(key)) => page.push(key),
                    Some(Err(err)) => return Some(Err(err)),
                    None => break,
                }
            }
            if page.is_empty() {
                return None;
            }

            let value_keys: Vec<String> = page
                .iter()
                .map(|key| self.dict.namespace.to_backend_key(key))
                .collect();
            let values = match self.dict.load_many(&value_keys) {
                Ok(values) => values,
                Err(err) => return Some(Err(err)),
            };
            // Entries deleted since the scan come back as None
            self.ready.extend(
                page.into_iter()
                    .zip(values)
                    .filter_map(|(key, value)| value.map(|value| (key, value))),
            );
        }
    }
}

// == Values ==
/// Lazy iterator over the values of a mapping.
pub struct Values<'a, B: Backend> {
    items: Items<'a, B>,
}

impl<B: Backend> Iterator for Values<'_, B> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items
            .next()
            .map(|item| item.map(|(_, value)| value))
    }
}

impl<'a, B: Backend> IntoIterator for &'a RedisDict<B> {
    type Item = Result<(String, Value)>;
    type IntoIter = Items<'a, B>;

    fn into_iter(self) -> Self::IntoIter {
        self.items()
    }
}

impl<B: Backend> RedisDict<B> {
    // == Enumeration ==
    /// Keys starting with `prefix`, in backend order.
    pub fn scan(&self, prefix: &str) -> ScanKeys<'_, B> {
        ScanKeys::new(self, prefix)
    }

    /// Keys of the mapping; in insertion order for insertion-ordered mappings.
    pub fn keys(&self) -> Keys<'_, B> {
        Keys::new(self)
    }

    pub fn values(&self) -> Values<'_, B> {
        Values {
            items: self.items(),
        }
    }

    pub fn items(&self) -> Items<'_, B> {
        Items {
            dict: self,
            keys: self.keys(),
            ready: VecDeque::new(),
        }
    }

    /// Same as [`RedisDict::items`].
    pub fn iter(&self) -> Items<'_, B> {
        self.items()
    }

    /// Number of entries, counted with a full scan.
    pub fn len(&self) -> Result<usize> {
        let mut seen = HashSet::new();
        for key in self.scan("") {
            seen.insert(key?);
        }
        Ok(seen.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.key("")?.is_none())
    }

    /// Any one key starting with `search`.
    pub fn key(&self, search: &str) -> Result<Option<String>> {
        self.scan(search).next().transpose()
    }

    /// Copies every entry into a local map.
    pub fn to_dict(&self) -> Result<IndexMap<String, Value>> {
        self.items().collect()
    }

    /// Same as [`RedisDict::to_dict`].
    pub fn copy(&self) -> Result<IndexMap<String, Value>> {
        self.to_dict()
    }

    /// Compares the entries with a local map, ignoring order.
    pub fn equals(&self, other: &IndexMap<String, Value>) -> Result<bool> {
        let mine = self.to_dict()?;
        Ok(mine.len() == other.len()
            && mine
                .iter()
                .all(|(key, value)| other.get(key) == Some(value)))
    }

    /// Local copy of the entries with `other` merged over them.
    ///
    /// Keys present in both take the value from `other`. Use
    /// [`RedisDict::update`] to merge into the mapping itself.
    pub fn merged(&self, other: &IndexMap<String, Value>) -> Result<IndexMap<String, Value>> {
        let mut merged = self.to_dict()?;
        merged.extend(other.iter().map(|(key, value)| (key.clone(), value.clone())));
        Ok(merged)
    }

    /// Keys in reverse iteration order.
    ///
    /// For insertion-ordered mappings this is newest first.
    pub fn reversed_keys(&self) -> Result<Vec<String>> {
        let mut keys = self.keys().collect::<Result<Vec<_>>>()?;
        keys.reverse();
        Ok(keys)
    }

    // == Bulk Removal ==
    /// Removes every entry and the mapping's metadata keys.
    ///
    /// Entries written by other clients while `clear` runs may survive.
    pub fn clear(&mut self) -> Result<()> {
        let value_prefix = self.namespace.prefix();
        let mut doomed = self.scan_backend(&value_prefix)?;
        doomed.extend(self.scan_backend(&keys::to_type_key(&value_prefix))?);
        doomed.extend(self.scan_backend(&keys::to_order_key(&value_prefix))?);
        doomed.push(keys::order_sequence_key(&self.namespace));

        debug!(
            "Clearing namespace '{}' ({} backend keys)",
            self.namespace,
            doomed.len()
        );
        self.batch(|dict| {
            dict.execute(
                doomed
                    .into_iter()
                    .map(|key| BatchOp::Delete { key })
                    .collect(),
            )
        })
    }

    /// Removes and returns one entry.
    ///
    /// Insertion-ordered mappings pop the most recently inserted entry. When
    /// the selected entry is removed by someone else first, another one is
    /// selected, up to the configured number of attempts.
    pub fn popitem(&mut self) -> Result<(String, Value)> {
        let attempts = self.config.popitem_attempts.max(1);
        for attempt in 1..=attempts {
            let candidate = if self.config.insertion_order {
                self.ordered_keys()?.pop()
            } else {
                self.key("")?
            };
            let key = candidate.ok_or_else(|| DictError::EmptyMapping {
                namespace: self.namespace.to_string(),
            })?;

            if let Some(value) = self.take(&key)? {
                return Ok((key, value));
            }
            debug!(
                "popitem: '{}' vanished before removal (attempt {}/{})",
                key, attempt, attempts
            );
        }

        Err(DictError::ConcurrentModification {
            namespace: self.namespace.to_string(),
            attempts,
        })
    }

    // == Helpers ==
    /// Every key of the mapping sorted by insertion sequence.
    ///
    /// Keys without a sequence number (written by an unordered mapping) sort
    /// last, by key.
    pub(super) fn ordered_keys(&self) -> Result<Vec<String>> {
        let found = self.scan("").collect::<Result<Vec<_>>>()?;
        let order_keys: Vec<String> = found
            .iter()
            .map(|key| keys::to_order_key(&self.namespace.to_backend_key(key)))
            .collect();
        let sequences = self.backend.get_many(&order_keys)?;

        let mut ranked: Vec<(i64, String)> = found
            .into_iter()
            .zip(sequences)
            .map(|(key, sequence)| {
                let rank = sequence
                    .and_then(|sequence| sequence.parse().ok())
                    .unwrap_or(i64::MAX);
                (rank, key)
            })
            .collect();
        ranked.sort();
        ranked.dedup();

        Ok(ranked.into_iter().map(|(_, key)| key).collect())
    }

    /// Raw backend keys starting with `prefix`.
    fn scan_backend(&self, prefix: &str) -> Result<Vec<String>> {
        let mut found = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .backend
                .scan(prefix, cursor.as_ref(), self.config.scan_count)?;
            found.extend(page.keys);
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(found),
            }
        }
    }
}
