//! Element kinds and typed element conversion.
//!
//! The kind of a dataset is resolved once, at create or open time. Typed
//! reads and writes go through [`H5Element`], which is implemented for the
//! primitive numeric types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Byte order of stored elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// Byte order of the host.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        }
    }
}

/// Closed set of element kinds a dataset can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Uninterpreted bytes of the given size.
    Opaque(u32),
    /// Fixed-size record; fields are not interpreted here.
    Record(u32),
}

impl ElementKind {
    /// Bytes per element.
    pub fn size(&self) -> usize {
        match self {
            ElementKind::U8 | ElementKind::I8 => 1,
            ElementKind::U16 | ElementKind::I16 => 2,
            ElementKind::U32 | ElementKind::I32 | ElementKind::F32 => 4,
            ElementKind::U64 | ElementKind::I64 | ElementKind::F64 => 8,
            ElementKind::Opaque(n) | ElementKind::Record(n) => *n as usize,
        }
    }

    /// Whether elements are numbers subject to byte order.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ElementKind::Opaque(_) | ElementKind::Record(_))
    }

    /// One-byte tag used by the structural encoder.
    pub(crate) fn tag(&self) -> u8 {
        match self {
            ElementKind::U8 => 0,
            ElementKind::U16 => 1,
            ElementKind::U32 => 2,
            ElementKind::U64 => 3,
            ElementKind::I8 => 4,
            ElementKind::I16 => 5,
            ElementKind::I32 => 6,
            ElementKind::I64 => 7,
            ElementKind::F32 => 8,
            ElementKind::F64 => 9,
            ElementKind::Opaque(_) => 10,
            ElementKind::Record(_) => 11,
        }
    }

    /// Inverse of [`tag`](Self::tag); `size` only matters for opaque and
    /// record kinds.
    pub(crate) fn from_tag(tag: u8, size: u32) -> Option<Self> {
        let kind = match tag {
            0 => ElementKind::U8,
            1 => ElementKind::U16,
            2 => ElementKind::U32,
            3 => ElementKind::U64,
            4 => ElementKind::I8,
            5 => ElementKind::I16,
            6 => ElementKind::I32,
            7 => ElementKind::I64,
            8 => ElementKind::F32,
            9 => ElementKind::F64,
            10 => ElementKind::Opaque(size),
            11 => ElementKind::Record(size),
            _ => return None,
        };
        (kind.size() == size as usize).then_some(kind)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::U8 => write!(f, "u8"),
            ElementKind::U16 => write!(f, "u16"),
            ElementKind::U32 => write!(f, "u32"),
            ElementKind::U64 => write!(f, "u64"),
            ElementKind::I8 => write!(f, "i8"),
            ElementKind::I16 => write!(f, "i16"),
            ElementKind::I32 => write!(f, "i32"),
            ElementKind::I64 => write!(f, "i64"),
            ElementKind::F32 => write!(f, "f32"),
            ElementKind::F64 => write!(f, "f64"),
            ElementKind::Opaque(n) => write!(f, "opaque({n})"),
            ElementKind::Record(n) => write!(f, "record({n})"),
        }
    }
}

/// A Rust type that maps onto one [`ElementKind`].
pub trait H5Element: Copy + Sized {
    const KIND: ElementKind;

    /// Append the encoded element.
    fn write_to(self, order: ByteOrder, out: &mut Vec<u8>);

    /// Decode from exactly `KIND.size()` bytes.
    fn read_from(bytes: &[u8], order: ByteOrder) -> Self;
}

macro_rules! impl_h5element {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl H5Element for $ty {
                const KIND: ElementKind = ElementKind::$kind;

                fn write_to(self, order: ByteOrder, out: &mut Vec<u8>) {
                    match order {
                        ByteOrder::LittleEndian => out.extend_from_slice(&self.to_le_bytes()),
                        ByteOrder::BigEndian => out.extend_from_slice(&self.to_be_bytes()),
                    }
                }

                fn read_from(bytes: &[u8], order: ByteOrder) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                    match order {
                        ByteOrder::LittleEndian => <$ty>::from_le_bytes(raw),
                        ByteOrder::BigEndian => <$ty>::from_be_bytes(raw),
                    }
                }
            }
        )*
    };
}

impl_h5element! {
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

/// Encode a slice of elements.
pub fn encode_elements<T: H5Element>(values: &[T], order: ByteOrder) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::KIND.size());
    for &v in values {
        v.write_to(order, &mut out);
    }
    out
}

/// Decode a byte buffer into elements. Trailing partial elements are
/// ignored.
pub fn decode_elements<T: H5Element>(bytes: &[u8], order: ByteOrder) -> Vec<T> {
    bytes
        .chunks_exact(T::KIND.size())
        .map(|b| T::read_from(b, order))
        .collect()
}
