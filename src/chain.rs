//! Chained headers and the header index
//!
//! A [`ChainedHeader`] links a header to its parent, so ancestry walks,
//! median-time-past and deployment state can be computed without a database.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::constants::MEDIAN_TIME_SPAN;
use crate::types::*;

#[derive(Debug)]
pub struct ChainedHeader {
    header: BlockHeader,
    hash: Hash,
    height: u32,
    previous: Option<Arc<ChainedHeader>>,
}

impl ChainedHeader {
    pub fn genesis(header: BlockHeader) -> Arc<Self> {
        let hash = header.hash();
        Arc::new(ChainedHeader { header, hash, height: 0, previous: None })
    }

    /// Link `header` on top of `previous`.
    pub fn extend(previous: &Arc<ChainedHeader>, header: BlockHeader) -> Arc<Self> {
        let hash = header.hash();
        Arc::new(ChainedHeader {
            header,
            hash,
            height: previous.height + 1,
            previous: Some(Arc::clone(previous)),
        })
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn previous(&self) -> Option<&Arc<ChainedHeader>> {
        self.previous.as_ref()
    }

    /// Walk back to the ancestor at `height`. `None` if `height` is above this header.
    pub fn get_ancestor(&self, height: u32) -> Option<&ChainedHeader> {
        if height > self.height {
            return None;
        }
        let mut current = self;
        while current.height > height {
            current = current.previous.as_deref()?;
        }
        Some(current)
    }

    /// This header followed by its ancestors down to genesis.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors { next: Some(self) }
    }

    /// Median timestamp of this header and its ten predecessors.
    pub fn median_time_past(&self) -> u32 {
        let mut times: Vec<u32> = self
            .ancestors()
            .take(MEDIAN_TIME_SPAN)
            .map(|h| h.header.timestamp)
            .collect();
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// True if `other` is this header or one of its ancestors.
    pub fn contains(&self, other: &ChainedHeader) -> bool {
        self.get_ancestor(other.height).map_or(false, |a| a.hash == other.hash)
    }
}

// Unlink iteratively so dropping a long chain does not recurse once per header.
impl Drop for ChainedHeader {
    fn drop(&mut self) {
        let mut next = self.previous.take();
        while let Some(header) = next {
            match Arc::try_unwrap(header) {
                Ok(mut owned) => next = owned.previous.take(),
                Err(_) => break,
            }
        }
    }
}

pub struct Ancestors<'a> {
    next: Option<&'a ChainedHeader>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a ChainedHeader;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.previous.as_deref();
        Some(current)
    }
}

/// Lookup of known headers by hash.
pub trait ChainIndex: Send + Sync {
    fn get_by_hash(&self, hash: &Hash) -> Option<Arc<ChainedHeader>>;
    fn tip(&self) -> Option<Arc<ChainedHeader>>;
}

#[derive(Default)]
pub struct MemoryChainIndex {
    headers: RwLock<HashMap<Hash, Arc<ChainedHeader>>>,
    tip: RwLock<Option<Arc<ChainedHeader>>>,
}

impl MemoryChainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a header. The tip moves if the new header is higher.
    pub fn insert(&self, header: Arc<ChainedHeader>) {
        {
            let mut tip = self.tip.write();
            let higher = tip.as_ref().map_or(true, |t| header.height() > t.height());
            if higher {
                *tip = Some(Arc::clone(&header));
            }
        }
        self.headers.write().insert(header.hash(), header);
    }
}

impl ChainIndex for MemoryChainIndex {
    fn get_by_hash(&self, hash: &Hash) -> Option<Arc<ChainedHeader>> {
        self.headers.read().get(hash).cloned()
    }

    fn tip(&self) -> Option<Arc<ChainedHeader>> {
        self.tip.read().clone()
    }
}
