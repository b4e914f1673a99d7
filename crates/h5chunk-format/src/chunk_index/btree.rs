//! Arena-backed B+ tree shared by both B-tree chunk index encodings.
//!
//! Every node stores `(key, payload)` pairs sorted by key. In a leaf the
//! payload is the record; in an internal node it is a child, and the key
//! is the smallest key in that child's subtree. Inserts split full nodes
//! bottom-up, so every leaf sits at the same depth.
//!
//! The on-disk node layout is the same for both encodings:
//!
//! ```text
//! signature(4) version(1) node_type(1) level(2) entries(2)
//! { key, payload } * entries
//! checksum(4)
//! ```
//!
//! where an internal payload is an 8-byte child address. Keys, records and
//! signatures are supplied by a [`NodeFormat`].

use crate::checksum::{seal, verify};
use crate::codec::{put_u16, put_u64, ByteReader};
use crate::error::FormatError;

use super::BlockIo;

/// Default maximum entries per node.
pub const DEFAULT_NODE_CAPACITY: usize = 64;

const MIN_NODE_CAPACITY: usize = 3;
const NODE_PREFIX: usize = 10;
const NODE_VERSION: u8 = 0;

#[derive(Debug, Clone)]
enum Node<K, V> {
    Leaf(Vec<(K, V)>),
    Internal(Vec<(K, usize)>),
}

/// An in-memory B+ tree.
#[derive(Debug, Clone)]
pub struct BTree<K, V> {
    nodes: Vec<Node<K, V>>,
    root: usize,
    depth: usize,
    len: usize,
    capacity: usize,
}

/// Encoding of keys and leaf records for one on-disk flavor.
pub(crate) trait NodeFormat<K, V> {
    /// Structure name used in error messages.
    const STRUCTURE: &'static str;

    fn signature(&self, leaf: bool) -> &'static [u8; 4];
    fn node_type(&self) -> u8;
    fn key_width(&self) -> usize;
    fn record_width(&self) -> usize;
    fn write_key(&self, key: &K, buf: &mut Vec<u8>);
    fn read_key(&self, r: &mut ByteReader<'_>) -> Result<K, FormatError>;
    fn write_record(&self, record: &V, buf: &mut Vec<u8>);
    fn read_record(&self, r: &mut ByteReader<'_>) -> Result<V, FormatError>;
}

impl<K: Ord + Clone, V: Clone> BTree<K, V> {
    /// An empty tree whose nodes hold at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: vec![Node::Leaf(Vec::new())],
            root: 0,
            depth: 0,
            len: 0,
            capacity: capacity.max(MIN_NODE_CAPACITY),
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Levels below the root (0 when the root is a leaf).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Root-to-leaf lookup.
    pub fn get(&self, key: &K) -> Option<&V> {
        let mut node = self.root;
        loop {
            match &self.nodes[node] {
                Node::Leaf(entries) => {
                    return entries
                        .binary_search_by(|(k, _)| k.cmp(key))
                        .ok()
                        .map(|i| &entries[i].1);
                }
                Node::Internal(entries) => {
                    let i = child_slot(entries, key)?;
                    node = entries[i].1;
                }
            }
        }
    }

    /// Insert or replace; returns the replaced record.
    pub fn insert(&mut self, key: K, record: V) -> Option<V> {
        let (replaced, split) = self.insert_into(self.root, key, record);
        if let Some((separator, right)) = split {
            let left = self.root;
            let left_min = self.min_key(left);
            self.nodes
                .push(Node::Internal(vec![(left_min, left), (separator, right)]));
            self.root = self.nodes.len() - 1;
            self.depth += 1;
        }
        if replaced.is_none() {
            self.len += 1;
        }
        replaced
    }

    fn insert_into(&mut self, node: usize, key: K, record: V) -> (Option<V>, Option<(K, usize)>) {
        let capacity = self.capacity;
        let descend = match &mut self.nodes[node] {
            Node::Leaf(entries) => {
                match entries.binary_search_by(|(k, _)| k.cmp(&key)) {
                    Ok(i) => return (Some(std::mem::replace(&mut entries[i].1, record)), None),
                    Err(i) => entries.insert(i, (key, record)),
                }
                if entries.len() <= capacity {
                    return (None, None);
                }
                let right = entries.split_off(entries.len() / 2);
                let separator = right[0].0.clone();
                self.nodes.push(Node::Leaf(right));
                return (None, Some((separator, self.nodes.len() - 1)));
            }
            Node::Internal(entries) => {
                let i = match child_slot(entries, &key) {
                    Some(i) => i,
                    None => {
                        // new global minimum: widen the first child's range
                        entries[0].0 = key.clone();
                        0
                    }
                };
                (i, entries[i].1)
            }
        };

        let (slot, child) = descend;
        let (replaced, split) = self.insert_into(child, key, record);
        let Some((separator, new_child)) = split else {
            return (replaced, None);
        };
        let Node::Internal(entries) = &mut self.nodes[node] else {
            return (replaced, None);
        };
        entries.insert(slot + 1, (separator, new_child));
        if entries.len() <= capacity {
            return (replaced, None);
        }
        let right = entries.split_off(entries.len() / 2);
        let separator = right[0].0.clone();
        self.nodes.push(Node::Internal(right));
        (replaced, Some((separator, self.nodes.len() - 1)))
    }

    fn min_key(&self, node: usize) -> K {
        match &self.nodes[node] {
            Node::Leaf(entries) => entries[0].0.clone(),
            Node::Internal(entries) => entries[0].0.clone(),
        }
    }

    /// All records in key order.
    pub fn iter(&self) -> Vec<(&K, &V)> {
        let mut out = Vec::with_capacity(self.len);
        self.collect_from(self.root, &mut out);
        out
    }

    fn collect_from<'a>(&'a self, node: usize, out: &mut Vec<(&'a K, &'a V)>) {
        match &self.nodes[node] {
            Node::Leaf(entries) => out.extend(entries.iter().map(|(k, v)| (k, v))),
            Node::Internal(entries) => {
                for (_, child) in entries {
                    self.collect_from(*child, out);
                }
            }
        }
    }

    /// Write every node (children first) and return the root address.
    pub(crate) fn persist<F: NodeFormat<K, V>>(
        &self,
        format: &F,
        io: &mut dyn BlockIo,
    ) -> Result<u64, FormatError> {
        self.write_node(self.root, self.depth as u16, format, io)
    }

    fn write_node<F: NodeFormat<K, V>>(
        &self,
        node: usize,
        level: u16,
        format: &F,
        io: &mut dyn BlockIo,
    ) -> Result<u64, FormatError> {
        let mut buf = Vec::new();
        match &self.nodes[node] {
            Node::Leaf(entries) => {
                write_prefix(&mut buf, format, true, 0, entries.len());
                for (k, v) in entries {
                    format.write_key(k, &mut buf);
                    format.write_record(v, &mut buf);
                }
            }
            Node::Internal(entries) => {
                let mut children = Vec::with_capacity(entries.len());
                for (_, child) in entries {
                    children.push(self.write_node(*child, level - 1, format, io)?);
                }
                write_prefix(&mut buf, format, false, level, entries.len());
                for ((k, _), address) in entries.iter().zip(children) {
                    format.write_key(k, &mut buf);
                    put_u64(&mut buf, address);
                }
            }
        }
        seal(&mut buf);
        io.append_block(&buf)
    }

    /// Decode the tree rooted at `root`, checking signatures, checksums,
    /// key order and that every leaf sits at depth `expected_depth` (when
    /// given).
    pub(crate) fn load<F: NodeFormat<K, V>>(
        format: &F,
        root: u64,
        expected_depth: Option<u16>,
        capacity: usize,
        io: &mut dyn BlockIo,
    ) -> Result<Self, FormatError> {
        let mut tree = Self {
            nodes: Vec::new(),
            root: 0,
            depth: 0,
            len: 0,
            capacity: capacity.max(MIN_NODE_CAPACITY),
        };
        let (root_idx, level) = tree.read_node(format, root, expected_depth, None, io)?;
        tree.root = root_idx;
        tree.depth = level as usize;
        Ok(tree)
    }

    /// Read the node at `address`. `bounds` is the `[low, high)` key range
    /// its parent assigns to it.
    fn read_node<F: NodeFormat<K, V>>(
        &mut self,
        format: &F,
        address: u64,
        expected_level: Option<u16>,
        bounds: Option<(&K, Option<&K>)>,
        io: &mut dyn BlockIo,
    ) -> Result<(usize, u16), FormatError> {
        let prefix = io.read_block(address, NODE_PREFIX)?;
        let mut r = ByteReader::new(&prefix);
        r.skip(6)?;
        let level = r.u16()?;
        let count = r.u16()? as usize;
        let leaf = level == 0;
        let payload = if leaf { format.record_width() } else { 8 };
        let raw = io.read_block(address, NODE_PREFIX + count * (format.key_width() + payload) + 4)?;
        let body = verify(&raw, F::STRUCTURE)?;

        let mut r = ByteReader::new(body);
        r.signature(format.signature(leaf), F::STRUCTURE)?;
        let version = r.u8()?;
        let node_type = r.u8()?;
        if version != NODE_VERSION || node_type != format.node_type() {
            return Err(FormatError::malformed(
                F::STRUCTURE,
                format!("node version {version} type {node_type}"),
            ));
        }
        r.skip(4)?;
        if let Some(expected) = expected_level {
            if level != expected {
                return Err(FormatError::malformed(
                    F::STRUCTURE,
                    format!("node at {address} has level {level}, expected {expected}"),
                ));
            }
        }
        if count == 0 && bounds.is_some() {
            return Err(FormatError::malformed(
                F::STRUCTURE,
                format!("empty non-root node at {address}"),
            ));
        }

        let mut keys = Vec::with_capacity(count);
        let mut payloads = Vec::with_capacity(count);
        for _ in 0..count {
            keys.push(format.read_key(&mut r)?);
            payloads.push(if leaf {
                Payload::Record(format.read_record(&mut r)?)
            } else {
                Payload::Child(r.u64()?)
            });
        }
        check_order(&keys, bounds, F::STRUCTURE, address)?;

        let node = if leaf {
            let entries: Vec<(K, V)> = keys
                .into_iter()
                .zip(payloads)
                .filter_map(|(k, p)| match p {
                    Payload::Record(v) => Some((k, v)),
                    Payload::Child(_) => None,
                })
                .collect();
            self.len += entries.len();
            Node::Leaf(entries)
        } else {
            let children: Vec<u64> = payloads
                .into_iter()
                .filter_map(|p| match p {
                    Payload::Child(a) => Some(a),
                    Payload::Record(_) => None,
                })
                .collect();
            let mut entries = Vec::with_capacity(count);
            for (i, child) in children.iter().enumerate() {
                let high = keys.get(i + 1);
                let (idx, _) =
                    self.read_node(format, *child, Some(level - 1), Some((&keys[i], high)), io)?;
                entries.push((keys[i].clone(), idx));
            }
            Node::Internal(entries)
        };
        self.nodes.push(node);
        Ok((self.nodes.len() - 1, level))
    }
}

enum Payload<V> {
    Record(V),
    Child(u64),
}

/// Index of the child whose range holds `key`, or `None` if `key` is
/// below the node's minimum.
fn child_slot<K: Ord>(entries: &[(K, usize)], key: &K) -> Option<usize> {
    match entries.binary_search_by(|(k, _)| k.cmp(key)) {
        Ok(i) => Some(i),
        Err(0) => None,
        Err(i) => Some(i - 1),
    }
}

fn write_prefix<K, V, F: NodeFormat<K, V>>(
    buf: &mut Vec<u8>,
    format: &F,
    leaf: bool,
    level: u16,
    count: usize,
) {
    buf.extend_from_slice(format.signature(leaf));
    buf.extend_from_slice(&[NODE_VERSION, format.node_type()]);
    put_u16(buf, level);
    put_u16(buf, count as u16);
}

fn check_order<K: Ord>(
    keys: &[K],
    bounds: Option<(&K, Option<&K>)>,
    structure: &'static str,
    address: u64,
) -> Result<(), FormatError> {
    if keys.windows(2).any(|w| w[0] >= w[1]) {
        return Err(FormatError::malformed(
            structure,
            format!("keys of node at {address} are not strictly ascending"),
        ));
    }
    if let (Some((low, high)), Some(first), Some(last)) = (bounds, keys.first(), keys.last()) {
        if first != low || high.is_some_and(|h| last >= h) {
            return Err(FormatError::malformed(
                structure,
                format!("keys of node at {address} fall outside the parent's range"),
            ));
        }
    }
    Ok(())
}
