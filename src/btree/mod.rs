//! A read-only B-tree engine shared by the catalog, extents overflow,
//! attributes and hot files trees.
//!
//! Each tree supplies a [`TreeKind`]: how to decode its keys and values and
//! how to order keys. The engine handles node I/O, validation, caching,
//! search and sibling walks.

mod node;

pub use node::{Node, Record, RecordLayout};

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use deku::DekuContainerRead;
use hfs_types_rs::{HEADER_RECORD_SIZE, NODE_DESCRIPTOR_SIZE, NodeKind, USER_DATA_RECORD_SIZE};
use tracing::{debug, trace, warn};

use crate::cache::{NodeCache, cache_key};
use crate::error::{Error, Result};
use crate::fork::ForkStream;
use crate::raw::BTreeHeaderRecord;

/// Smallest node size allowed by TN1150, and the size of the first read of
/// node 0 before the real node size is known.
pub const MIN_NODE_SIZE: usize = 512;
pub const MAX_NODE_SIZE: usize = 32768;

/// Decoding and ordering rules for one kind of B-tree.
pub trait TreeKind {
    type Key: fmt::Debug + Clone;
    type Value: fmt::Debug;

    /// Short name used in errors and logs.
    const NAME: &'static str;

    /// Adjust to the tree's header record, for example its key compare type.
    fn configure(&mut self, _header: &BTreeHeaderRecord) -> Result<()> {
        Ok(())
    }

    /// Decode key bytes, without the key length prefix.
    fn decode_key(&self, bytes: &[u8]) -> Result<Self::Key>;

    fn compare(&self, a: &Self::Key, b: &Self::Key) -> Ordering;

    /// Decode the value of a leaf record.
    fn decode_value(&self, key: &Self::Key, bytes: &[u8]) -> Result<Self::Value>;
}

/// Location of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub node: u32,
    pub index: usize,
}

/// Outcome of [`BTree::search`]. When `found` is false, `position` is where
/// the key would be inserted. It is `None` only for empty trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    pub position: Option<Position>,
    pub found: bool,
}

pub struct BTree<K: TreeKind> {
    kind: K,
    stream: ForkStream,
    tree_id: u32,
    header: BTreeHeaderRecord,
    user_data: Vec<u8>,
    layout: RecordLayout,
    cache: RefCell<NodeCache>,
}

impl<K: TreeKind> fmt::Debug for BTree<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BTree")
            .field("tree", &K::NAME)
            .field("tree_id", &self.tree_id)
            .field("header", &self.header)
            .field("layout", &self.layout)
            .finish()
    }
}

impl<K: TreeKind> BTree<K> {
    /// Open the tree stored in `stream`. `tree_id` scopes its nodes in the
    /// cache; `cache_capacity` of 0 disables caching.
    pub fn open(mut kind: K, stream: ForkStream, tree_id: u32, cache_capacity: usize) -> Result<Self> {
        let mut head = vec![0u8; MIN_NODE_SIZE];
        stream.read_exact_at(&mut head, 0)?;

        let (_rest, descriptor) = crate::raw::NodeDescriptor::from_bytes((&head[..], 0))?;
        if descriptor.kind() != Ok(NodeKind::Header) {
            return Err(Error::invalid(
                "B-tree header node",
                format!("{} tree node 0 has kind {}", K::NAME, descriptor.kind),
            ));
        }

        let (_rest, header) =
            BTreeHeaderRecord::from_bytes((&head[NODE_DESCRIPTOR_SIZE..], 0))?;
        let node_size = header.node_size as usize;
        if !node_size.is_power_of_two() || !(MIN_NODE_SIZE..=MAX_NODE_SIZE).contains(&node_size) {
            return Err(Error::invalid(
                "B-tree header node",
                format!("{} tree has node size {node_size}", K::NAME),
            ));
        }
        if header.total_nodes as u64 * node_size as u64 > stream.len() {
            warn!(
                tree = K::NAME,
                total_nodes = header.total_nodes,
                fork_size = stream.len(),
                "B-tree claims more nodes than its fork holds"
            );
        }

        let mut data = vec![0u8; node_size];
        stream.read_exact_at(&mut data, 0)?;
        let header_node = Node::parse(K::NAME, 0, Arc::from(data))?;
        let user_data = match header_node.record_bytes(1) {
            Ok(bytes) => bytes.to_vec(),
            Err(_) => {
                let start = NODE_DESCRIPTOR_SIZE + HEADER_RECORD_SIZE;
                header_node.data()[start..start + USER_DATA_RECORD_SIZE].to_vec()
            }
        };

        kind.configure(&header)?;
        let layout = RecordLayout::from_header(&header);

        debug!(
            tree = K::NAME,
            node_size,
            depth = header.tree_depth,
            root = header.root_node,
            leaf_records = header.leaf_records,
            total_nodes = header.total_nodes,
            "opened B-tree"
        );

        Ok(BTree {
            kind,
            stream,
            tree_id,
            header,
            user_data,
            layout,
            cache: RefCell::new(NodeCache::new(cache_capacity)),
        })
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn name(&self) -> &'static str {
        K::NAME
    }

    pub fn header(&self) -> &BTreeHeaderRecord {
        &self.header
    }

    /// The 128-byte user data record of the header node.
    pub fn user_data(&self) -> &[u8] {
        &self.user_data
    }

    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    pub fn node_size(&self) -> usize {
        self.header.node_size as usize
    }

    pub fn stream(&self) -> &ForkStream {
        &self.stream
    }

    pub fn is_empty(&self) -> bool {
        self.header.leaf_records == 0 || self.header.root_node == 0
    }

    /// Cache hits, misses and resident nodes.
    pub fn cache_stats(&self) -> (u64, u64, usize) {
        let cache = self.cache.borrow();
        (cache.hits(), cache.misses(), cache.len())
    }

    /// Fetch and verify node `number`. Every key and leaf value is decoded
    /// before the node is handed out or cached.
    pub fn node(&self, number: u32) -> Result<Node> {
        self.fetch(number, true)
    }

    /// Fetch node `number` checking only its descriptor and offset table,
    /// leaving each record to be decoded (and possibly rejected) by the
    /// caller. Such nodes are cached only once they pass verification.
    pub fn node_unverified(&self, number: u32) -> Result<Node> {
        self.fetch(number, false)
    }

    fn fetch(&self, number: u32, verify: bool) -> Result<Node> {
        if number >= self.header.total_nodes {
            return Err(Error::NodeOutOfRange {
                tree: K::NAME,
                node: number,
                total: self.header.total_nodes,
            });
        }

        let key = cache_key(self.tree_id, number);
        let cached = self.cache.borrow_mut().get(key);
        if let Some(data) = cached {
            return Node::parse(K::NAME, number, data);
        }

        let node_size = self.node_size();
        let mut data = vec![0u8; node_size];
        self.stream
            .read_exact_at(&mut data, number as u64 * node_size as u64)?;
        let node = Node::parse(K::NAME, number, Arc::from(data))?;
        if verify {
            self.verify(&node)?;
        } else if let Err(err) = self.verify(&node) {
            debug!(tree = K::NAME, node = number, %err, "handing out damaged node");
            return Ok(node);
        }
        trace!(tree = K::NAME, node = number, kind = %node.kind(), "read node");

        if let Err(err) = self.cache.borrow_mut().set(key, node.data()) {
            warn!(tree = K::NAME, node = number, %err, "continuing without caching node");
        }
        Ok(node)
    }

    fn verify(&self, node: &Node) -> Result<()> {
        match node.kind() {
            NodeKind::Leaf => {
                for index in 0..node.num_records() {
                    self.leaf_record(node, index)?;
                }
            }
            NodeKind::Index => {
                for index in 0..node.num_records() {
                    self.index_record(node, index)?;
                }
            }
            NodeKind::Header | NodeKind::Map => {}
        }
        Ok(())
    }

    fn corrupt(&self, node: &Node, index: usize, err: Error) -> Error {
        Error::corrupt(K::NAME, node.number(), format!("record {index}: {err}"))
    }

    /// Decoded key of record `index` of an index or leaf node.
    pub fn key_at(&self, node: &Node, index: usize) -> Result<K::Key> {
        let record = node.record(index, &self.layout)?;
        self.kind
            .decode_key(record.key)
            .map_err(|err| self.corrupt(node, index, err))
    }

    /// Decoded key and value of record `index` of a leaf node.
    pub fn leaf_record(&self, node: &Node, index: usize) -> Result<(K::Key, K::Value)> {
        let record = node.record(index, &self.layout)?;
        let key = self
            .kind
            .decode_key(record.key)
            .map_err(|err| self.corrupt(node, index, err))?;
        let value = self
            .kind
            .decode_value(&key, record.value)
            .map_err(|err| self.corrupt(node, index, err))?;
        Ok((key, value))
    }

    /// Decoded key and child node number of record `index` of an index node.
    pub fn index_record(&self, node: &Node, index: usize) -> Result<(K::Key, u32)> {
        let record = node.record(index, &self.layout)?;
        let key = self
            .kind
            .decode_key(record.key)
            .map_err(|err| self.corrupt(node, index, err))?;
        let child = match record.value {
            [a, b, c, d, ..] => u32::from_be_bytes([*a, *b, *c, *d]),
            _ => {
                return Err(Error::corrupt(
                    K::NAME,
                    node.number(),
                    format!("record {index}: index record has no child pointer"),
                ));
            }
        };
        Ok((key, child))
    }

    /// All records of a leaf node, in order.
    pub fn records(&self, node: &Node) -> Result<Vec<(K::Key, K::Value)>> {
        (0..node.num_records())
            .map(|index| self.leaf_record(node, index))
            .collect()
    }

    /// Binary search within one node. Returns the number of keys less than
    /// `key`, or the index of an equal key and `true`.
    fn scan(&self, node: &Node, key: &K::Key) -> Result<(usize, bool)> {
        let (mut low, mut high) = (0, node.num_records());
        while low < high {
            let mid = low + (high - low) / 2;
            match self.kind.compare(&self.key_at(node, mid)?, key) {
                Ordering::Less => low = mid + 1,
                Ordering::Equal => return Ok((mid, true)),
                Ordering::Greater => high = mid,
            }
        }
        Ok((low, false))
    }

    /// Descend from the root to the leaf that holds, or would hold, `key`.
    pub fn search(&self, key: &K::Key) -> Result<SearchResult> {
        if self.is_empty() {
            return Ok(SearchResult {
                position: None,
                found: false,
            });
        }

        let mut current = self.header.root_node;
        // One level of slack for trees whose depth field lags behind.
        let max_levels = self.header.tree_depth as usize + 1;
        for _ in 0..max_levels.max(1) {
            let node = self.node(current)?;
            match node.kind() {
                NodeKind::Leaf => {
                    let (index, found) = self.scan(&node, key)?;
                    return Ok(SearchResult {
                        position: Some(Position {
                            node: current,
                            index,
                        }),
                        found,
                    });
                }
                NodeKind::Index => {
                    if node.num_records() == 0 {
                        return Err(Error::corrupt(K::NAME, current, "empty index node"));
                    }
                    let (index, found) = self.scan(&node, key)?;
                    let child = if found { index } else { index.saturating_sub(1) };
                    (_, current) = self.index_record(&node, child)?;
                }
                other => {
                    return Err(Error::corrupt(
                        K::NAME,
                        current,
                        format!("unexpected {other} node during search"),
                    ));
                }
            }
        }

        Err(Error::corrupt(
            K::NAME,
            current,
            format!("search did not reach a leaf within {max_levels} levels"),
        ))
    }

    /// Exact-match lookup.
    pub fn find(&self, key: &K::Key) -> Result<Option<(K::Key, K::Value)>> {
        let result = self.search(key)?;
        match result.position {
            Some(position) if result.found => {
                let node = self.node(position.node)?;
                self.leaf_record(&node, position.index).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Visit nodes along the `forward_link` chain starting at `start` until
    /// the chain ends or `visit` returns `false`.
    pub fn walk(&self, start: u32, visit: impl FnMut(&Node) -> Result<bool>) -> Result<()> {
        self.follow_links(start, true, visit)
    }

    /// Like [`BTree::walk`], but nodes with undecodable records are still
    /// visited. See [`BTree::node_unverified`].
    pub fn walk_unverified(
        &self,
        start: u32,
        visit: impl FnMut(&Node) -> Result<bool>,
    ) -> Result<()> {
        self.follow_links(start, false, visit)
    }

    fn follow_links(
        &self,
        start: u32,
        verify: bool,
        mut visit: impl FnMut(&Node) -> Result<bool>,
    ) -> Result<()> {
        let mut current = start;
        let mut steps = 0u32;
        while current != 0 {
            if steps > self.header.total_nodes {
                return Err(Error::corrupt(
                    K::NAME,
                    current,
                    "sibling chain is longer than the tree",
                ));
            }
            let node = self.fetch(current, verify)?;
            if !visit(&node)? {
                break;
            }
            current = node.forward_link();
            steps += 1;
        }
        Ok(())
    }

    /// Iterate over leaf records starting at `position`, following sibling
    /// links.
    pub fn records_from(&self, position: Option<Position>) -> Result<LeafCursor<'_, K>> {
        let node = match position {
            Some(position) => Some(self.node(position.node)?),
            None => None,
        };
        Ok(LeafCursor {
            tree: self,
            node,
            index: position.map_or(0, |p| p.index),
            steps: 0,
        })
    }

    /// Iterate over every leaf record in key order.
    pub fn iter(&self) -> Result<LeafCursor<'_, K>> {
        let start = (!self.is_empty() && self.header.first_leaf_node != 0).then_some(Position {
            node: self.header.first_leaf_node,
            index: 0,
        });
        self.records_from(start)
    }
}

/// Leaf records in key order. Yields an error, then stops, when a node
/// cannot be read.
pub struct LeafCursor<'t, K: TreeKind> {
    tree: &'t BTree<K>,
    node: Option<Node>,
    index: usize,
    steps: u32,
}

impl<K: TreeKind> LeafCursor<'_, K> {
    /// Node currently being read.
    pub fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }
}

impl<K: TreeKind> Iterator for LeafCursor<'_, K> {
    type Item = Result<(K::Key, K::Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.node.as_ref()?;
            if self.index < node.num_records() {
                let record = self.tree.leaf_record(node, self.index);
                self.index += 1;
                return Some(record);
            }

            let next = node.forward_link();
            let from = node.number();
            if next == 0 {
                self.node = None;
                return None;
            }
            self.steps += 1;
            if self.steps > self.tree.header.total_nodes {
                self.node = None;
                return Some(Err(Error::corrupt(
                    K::NAME,
                    from,
                    "sibling chain is longer than the tree",
                )));
            }
            match self.tree.node(next) {
                Ok(node) if node.kind() == NodeKind::Leaf => {
                    self.node = Some(node);
                    self.index = 0;
                }
                Ok(node) => {
                    self.node = None;
                    return Some(Err(Error::corrupt(
                        K::NAME,
                        next,
                        format!("{} node in the leaf chain", node.kind()),
                    )));
                }
                Err(err) => {
                    self.node = None;
                    return Some(Err(err));
                }
            }
        }
    }
}
