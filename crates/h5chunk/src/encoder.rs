//! Structural object encoding.
//!
//! An [`ObjectGraph`] holds groups and committed datasets; groups link to
//! other objects by name. [`ObjectEncoder`] writes each reachable object as
//! a checksummed header block and returns its address. Children are
//! written before the group that links to them, so a group block only
//! ever refers to addresses that already exist.
//!
//! An object reached a second time after it was written is shared: its
//! existing address is reused. Reaching an object whose encoding is still
//! in progress means the graph has a cycle, which the container cannot
//! represent.

use std::collections::HashMap;

use tracing::{debug, trace};

use h5chunk_format::checksum::{seal, verify};
use h5chunk_format::codec::{put_u16, put_u32, put_u64, ByteReader};
use h5chunk_format::data_layout::DataLayout;
use h5chunk_format::dataspace::Dataspace;
use h5chunk_format::error::FormatError;
use h5chunk_format::filter_pipeline::FilterPipeline;
use h5chunk_io::{FreeSpaceAllocator, Storage};

use crate::dataset::DatasetDescriptor;
use crate::element::{ByteOrder, ElementKind};
use crate::error::{Error, Result};

const GROUP_SIG: &[u8; 4] = b"OGRP";
const DATASET_SIG: &[u8; 4] = b"ODST";
const VERSION: u8 = 0;
/// signature, version, body length
const PREFIX_SIZE: usize = 4 + 1 + 4;

const FLAG_BIG_ENDIAN: u8 = 0x01;
const FLAG_FILTER_EDGE_CHUNKS: u8 = 0x02;

/// Handle to an object within an [`ObjectGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

#[derive(Debug, Clone)]
pub enum Object {
    Group { links: Vec<(String, ObjectId)> },
    Dataset(Box<DatasetDescriptor>),
}

/// In-memory object graph awaiting encoding.
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    objects: Vec<Object>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&mut self) -> ObjectId {
        self.push(Object::Group { links: Vec::new() })
    }

    pub fn add_dataset(&mut self, descriptor: DatasetDescriptor) -> ObjectId {
        self.push(Object::Dataset(Box::new(descriptor)))
    }

    fn push(&mut self, object: Object) -> ObjectId {
        self.objects.push(object);
        ObjectId(self.objects.len() - 1)
    }

    /// Link `target` into `group` under `name`.
    pub fn link(&mut self, group: ObjectId, name: &str, target: ObjectId) -> Result<()> {
        if self.get(target).is_none() {
            return Err(Error::InvalidConfig(format!("unknown link target {target:?}")));
        }
        match self.objects.get_mut(group.0) {
            Some(Object::Group { links }) => {
                if links.iter().any(|(existing, _)| existing == name) {
                    return Err(Error::InvalidConfig(format!("link `{name}` already exists")));
                }
                links.push((name.to_string(), target));
                Ok(())
            }
            Some(Object::Dataset(_)) => Err(Error::InvalidConfig(format!(
                "cannot link `{name}` into a dataset"
            ))),
            None => Err(Error::InvalidConfig(format!("unknown group {group:?}"))),
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum EncodeState {
    InProgress,
    Done(u64),
}

/// Writes objects of a graph to storage. Addresses of finished objects are
/// remembered across calls to [`encode`](Self::encode).
pub struct ObjectEncoder<'a, S: Storage + ?Sized> {
    storage: &'a mut S,
    allocator: &'a mut FreeSpaceAllocator,
    states: HashMap<ObjectId, EncodeState>,
}

impl<'a, S: Storage + ?Sized> ObjectEncoder<'a, S> {
    pub fn new(storage: &'a mut S, allocator: &'a mut FreeSpaceAllocator) -> Self {
        Self {
            storage,
            allocator,
            states: HashMap::new(),
        }
    }

    /// Encode `id` and everything it links to. Returns the object's
    /// address.
    pub fn encode(&mut self, graph: &ObjectGraph, id: ObjectId) -> Result<u64> {
        match self.states.get(&id) {
            Some(EncodeState::Done(address)) => {
                trace!(object = id.0, address, "reusing shared object");
                return Ok(*address);
            }
            Some(EncodeState::InProgress) => {
                return Err(FormatError::CircularEncodeReference(format!(
                    "object {} is reachable from itself",
                    id.0
                ))
                .into());
            }
            None => {}
        }
        let object = graph
            .get(id)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown object {id:?}")))?;

        self.states.insert(id, EncodeState::InProgress);
        let block = match object {
            Object::Group { links } => {
                let mut resolved = Vec::with_capacity(links.len());
                for (name, child) in links {
                    resolved.push((name.as_str(), self.encode(graph, *child)?));
                }
                group_block(&resolved)?
            }
            Object::Dataset(descriptor) => dataset_block(descriptor)?,
        };

        let address = self.allocator.allocate(block.len() as u64)?;
        self.storage.write_at(address, &block)?;
        self.states.insert(id, EncodeState::Done(address));
        debug!(object = id.0, address, bytes = block.len(), "encoded object");
        Ok(address)
    }

    /// Address of an already encoded object.
    pub fn address_of(&self, id: ObjectId) -> Option<u64> {
        match self.states.get(&id) {
            Some(EncodeState::Done(address)) => Some(*address),
            _ => None,
        }
    }
}

fn begin_block(sig: &[u8; 4]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(sig);
    buf.push(VERSION);
    put_u32(&mut buf, 0);
    buf
}

fn finish_block(mut buf: Vec<u8>) -> Result<Vec<u8>> {
    let body_len = u32::try_from(buf.len() - PREFIX_SIZE)
        .map_err(|_| Error::InvalidConfig("object header exceeds 4 GiB".into()))?;
    buf[5..PREFIX_SIZE].copy_from_slice(&body_len.to_le_bytes());
    seal(&mut buf);
    Ok(buf)
}

fn put_message(buf: &mut Vec<u8>, message: &[u8]) -> Result<()> {
    let len = u32::try_from(message.len())
        .map_err(|_| Error::InvalidConfig("message exceeds 4 GiB".into()))?;
    put_u32(buf, len);
    buf.extend_from_slice(message);
    Ok(())
}

fn group_block(links: &[(&str, u64)]) -> Result<Vec<u8>> {
    let mut buf = begin_block(GROUP_SIG);
    put_u32(&mut buf, links.len() as u32);
    for (name, address) in links {
        let len = u16::try_from(name.len())
            .map_err(|_| Error::InvalidConfig(format!("link name of {} bytes", name.len())))?;
        put_u16(&mut buf, len);
        buf.extend_from_slice(name.as_bytes());
        put_u64(&mut buf, *address);
    }
    finish_block(buf)
}

fn dataset_block(desc: &DatasetDescriptor) -> Result<Vec<u8>> {
    let mut buf = begin_block(DATASET_SIG);
    buf.push(desc.kind.tag());
    put_u32(&mut buf, desc.kind.size() as u32);
    let mut flags = 0;
    if desc.byte_order == ByteOrder::BigEndian {
        flags |= FLAG_BIG_ENDIAN;
    }
    if desc.filter_edge_chunks {
        flags |= FLAG_FILTER_EDGE_CHUNKS;
    }
    buf.push(flags);
    put_message(&mut buf, &desc.fill_value)?;
    put_message(&mut buf, &desc.space.serialize())?;
    put_message(&mut buf, &desc.layout.serialize())?;
    put_message(&mut buf, &desc.pipeline.serialize())?;
    finish_block(buf)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// An object header read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedObject {
    /// Links by name to object addresses.
    Group(Vec<(String, u64)>),
    Dataset(Box<DatasetDescriptor>),
}

/// Read and verify the object header at `address`.
pub fn read_object<S: Storage + ?Sized>(storage: &mut S, address: u64) -> Result<DecodedObject> {
    let mut prefix = [0u8; PREFIX_SIZE];
    storage.read_at(address, &mut prefix)?;
    let body_len = u32::from_le_bytes([prefix[5], prefix[6], prefix[7], prefix[8]]) as usize;
    let mut block = vec![0u8; PREFIX_SIZE + body_len + 4];
    storage.read_at(address, &mut block)?;
    Ok(decode_object(&block)?)
}

fn decode_object(block: &[u8]) -> std::result::Result<DecodedObject, FormatError> {
    const STRUCTURE: &str = "object header";
    let body = verify(block, STRUCTURE)?;
    let sig = body.get(..4).unwrap_or_default();
    let mut r = ByteReader::new(body);
    if sig == GROUP_SIG {
        r.signature(GROUP_SIG, STRUCTURE)?;
        check_version(&mut r)?;
        r.u32()?;
        let count = r.u32()? as usize;
        let mut links = Vec::with_capacity(count.min(r.remaining() / 10));
        for _ in 0..count {
            let len = r.u16()? as usize;
            let name = String::from_utf8(r.take(len)?.to_vec())
                .map_err(|_| FormatError::malformed(STRUCTURE, "link name is not UTF-8"))?;
            links.push((name, r.u64()?));
        }
        Ok(DecodedObject::Group(links))
    } else {
        r.signature(DATASET_SIG, STRUCTURE)?;
        check_version(&mut r)?;
        r.u32()?;
        let tag = r.u8()?;
        let size = r.u32()?;
        let kind = ElementKind::from_tag(tag, size).ok_or_else(|| {
            FormatError::malformed(STRUCTURE, format!("element tag {tag} with size {size}"))
        })?;
        let flags = r.u8()?;
        let fill_value = take_message(&mut r)?.to_vec();
        let space = Dataspace::parse(take_message(&mut r)?)?;
        let layout = DataLayout::parse(take_message(&mut r)?)?;
        let pipeline = FilterPipeline::parse(take_message(&mut r)?)?;
        Ok(DecodedObject::Dataset(Box::new(DatasetDescriptor {
            space,
            kind,
            byte_order: if flags & FLAG_BIG_ENDIAN != 0 {
                ByteOrder::BigEndian
            } else {
                ByteOrder::LittleEndian
            },
            layout,
            pipeline,
            fill_value,
            filter_edge_chunks: flags & FLAG_FILTER_EDGE_CHUNKS != 0,
        })))
    }
}

fn check_version(r: &mut ByteReader<'_>) -> std::result::Result<(), FormatError> {
    match r.u8()? {
        VERSION => Ok(()),
        v => Err(FormatError::malformed(
            "object header",
            format!("unsupported version {v}"),
        )),
    }
}

fn take_message<'a>(r: &mut ByteReader<'a>) -> std::result::Result<&'a [u8], FormatError> {
    let len = r.u32()? as usize;
    r.take(len)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
