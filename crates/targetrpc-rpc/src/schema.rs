//! Fixed-layout payload fields.
//!
//! Test firmware packs command and event payloads as plain little-endian
//! structs. A [`PacketSchema`] names those fields so tests can build and read
//! payloads without hand-slicing bytes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, RpcError};
use crate::packet::RpcPacket;

/// Wire type of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    /// Raw bytes of a fixed length.
    Bytes(usize),
}

impl FieldType {
    pub fn size(self) -> usize {
        match self {
            FieldType::U8 | FieldType::I8 => 1,
            FieldType::U16 | FieldType::I16 => 2,
            FieldType::U32 | FieldType::I32 => 4,
            FieldType::Bytes(len) => len,
        }
    }
}

/// A field value read from or written to a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    Bytes(Bytes),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::U8(_) => FieldType::U8,
            FieldValue::I8(_) => FieldType::I8,
            FieldValue::U16(_) => FieldType::U16,
            FieldValue::I16(_) => FieldType::I16,
            FieldValue::U32(_) => FieldType::U32,
            FieldValue::I32(_) => FieldType::I32,
            FieldValue::Bytes(bytes) => FieldType::Bytes(bytes.len()),
        }
    }

    /// Integer fields widened to `i64`; `None` for byte fields.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            FieldValue::U8(v) => Some(v.into()),
            FieldValue::I8(v) => Some(v.into()),
            FieldValue::U16(v) => Some(v.into()),
            FieldValue::I16(v) => Some(v.into()),
            FieldValue::U32(v) => Some(v.into()),
            FieldValue::I32(v) => Some(v.into()),
            FieldValue::Bytes(_) => None,
        }
    }

    fn put(&self, dst: &mut BytesMut) {
        match self {
            FieldValue::U8(v) => dst.put_u8(*v),
            FieldValue::I8(v) => dst.put_i8(*v),
            FieldValue::U16(v) => dst.put_u16_le(*v),
            FieldValue::I16(v) => dst.put_i16_le(*v),
            FieldValue::U32(v) => dst.put_u32_le(*v),
            FieldValue::I32(v) => dst.put_i32_le(*v),
            FieldValue::Bytes(bytes) => dst.put_slice(bytes),
        }
    }

    fn read(ty: FieldType, src: &[u8]) -> Self {
        match ty {
            FieldType::U8 => FieldValue::U8(src[0]),
            FieldType::I8 => FieldValue::I8(src[0] as i8),
            FieldType::U16 => FieldValue::U16(u16::from_le_bytes([src[0], src[1]])),
            FieldType::I16 => FieldValue::I16(i16::from_le_bytes([src[0], src[1]])),
            FieldType::U32 => FieldValue::U32(u32::from_le_bytes([src[0], src[1], src[2], src[3]])),
            FieldType::I32 => FieldValue::I32(i32::from_le_bytes([src[0], src[1], src[2], src[3]])),
            FieldType::Bytes(len) => FieldValue::Bytes(Bytes::copy_from_slice(&src[..len])),
        }
    }
}

/// Decoded fields, in layout order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(Vec<(String, FieldValue)>);

impl Fields {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An ordered little-endian field layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketSchema {
    fields: Vec<(String, FieldType)>,
}

impl PacketSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field.
    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push((name.into(), ty));
        self
    }

    /// Encoded size of one payload, or `None` if it does not fit in `usize`.
    pub fn size(&self) -> Option<usize> {
        self.fields
            .iter()
            .try_fold(0usize, |total, (_, ty)| total.checked_add(ty.size()))
    }

    fn checked_size(&self) -> Result<usize> {
        self.size()
            .ok_or_else(|| RpcError::Schema("layout size overflows usize".to_string()))
    }

    /// Pack `values`, which must match the layout field by field.
    pub fn encode(&self, values: &[FieldValue]) -> Result<Bytes> {
        if values.len() != self.fields.len() {
            return Err(RpcError::Schema(format!(
                "expected {} values, got {}",
                self.fields.len(),
                values.len()
            )));
        }

        let mut buf = BytesMut::with_capacity(self.checked_size()?);
        for ((name, ty), value) in self.fields.iter().zip(values) {
            if value.field_type() != *ty {
                return Err(RpcError::Schema(format!(
                    "field `{name}` is {ty:?}, got {:?}",
                    value.field_type()
                )));
            }
            value.put(&mut buf);
        }
        Ok(buf.freeze())
    }

    /// Read the layout from the start of `payload`. Trailing bytes are ignored.
    pub fn decode(&self, payload: &[u8]) -> Result<Fields> {
        let size = self.checked_size()?;
        if payload.len() < size {
            return Err(RpcError::Schema(format!(
                "payload is {} bytes, layout needs {size}",
                payload.len()
            )));
        }

        let mut offset = 0usize;
        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, ty) in &self.fields {
            fields.push((name.clone(), FieldValue::read(*ty, &payload[offset..])));
            offset += ty.size();
        }
        Ok(Fields(fields))
    }

    /// Decode a packet's payload.
    pub fn decode_packet(&self, packet: &RpcPacket) -> Result<Fields> {
        self.decode(&packet.payload)
    }
}
