//! Fixed-width composite key codec.
//!
//! An index key is the concatenation of its key columns' fixed-width
//! encodings, in key order. Comparison decodes column by column; the
//! byte encoding itself is not order-preserving.

use bytes::{Bytes, BytesMut};
use std::cmp::Ordering;

use opal_common::error::{DbError, Result};
use opal_common::types::TypeId;

use crate::record::{Column, Field, Row, Schema};

/// Maximum key size in bytes.
pub const MAX_KEY_SIZE: usize = 256;

/// Encodes and compares composite keys for one index.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    /// Key columns: (index into the table schema, column definition).
    columns: Vec<(usize, Column)>,
    /// Total key width in bytes.
    key_size: usize,
}

impl KeyCodec {
    /// Builds a codec from a projection of `schema`.
    pub fn new(schema: &Schema, key_column_indices: &[usize]) -> Result<Self> {
        if key_column_indices.is_empty() {
            return Err(DbError::Internal("index has no key columns".into()));
        }
        let mut columns = Vec::with_capacity(key_column_indices.len());
        let mut key_size = 0;
        for &index in key_column_indices {
            let column = schema
                .column(index)
                .ok_or_else(|| DbError::ColumnNotFound(format!("column #{}", index)))?
                .clone();
            key_size += column.width();
            columns.push((index, column));
        }
        if key_size > MAX_KEY_SIZE {
            return Err(DbError::KeyTooLarge {
                size: key_size,
                max: MAX_KEY_SIZE,
            });
        }
        Ok(Self { columns, key_size })
    }

    /// Total key width in bytes.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Schema index of the first (leading) key column.
    pub fn first_column(&self) -> usize {
        self.columns[0].0
    }

    /// Schema indices of all key columns.
    pub fn column_indices(&self) -> Vec<usize> {
        self.columns.iter().map(|(i, _)| *i).collect()
    }

    /// Encodes the key columns of `row`.
    pub fn encode_from_row(&self, row: &Row) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.key_size);
        for (index, column) in &self.columns {
            let field = row
                .field(*index)
                .ok_or_else(|| DbError::Internal("row is narrower than key schema".into()))?;
            encode_field(&mut buf, field, column)?;
        }
        Ok(buf.freeze())
    }

    /// Encodes a key from field values given in key-column order.
    pub fn encode_fields(&self, fields: &[Field]) -> Result<Bytes> {
        if fields.len() != self.columns.len() {
            return Err(DbError::Internal(format!(
                "expected {} key fields, got {}",
                self.columns.len(),
                fields.len()
            )));
        }
        let mut buf = BytesMut::with_capacity(self.key_size);
        for (field, (_, column)) in fields.iter().zip(&self.columns) {
            encode_field(&mut buf, field, column)?;
        }
        Ok(buf.freeze())
    }

    /// Total order on encoded keys.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        debug_assert_eq!(a.len(), self.key_size);
        debug_assert_eq!(b.len(), self.key_size);
        let mut offset = 0;
        for (_, column) in &self.columns {
            let width = column.width();
            let lhs = &a[offset..offset + width];
            let rhs = &b[offset..offset + width];
            let ord = compare_column(column.type_id, lhs, rhs);
            if ord != Ordering::Equal {
                return ord;
            }
            offset += width;
        }
        Ordering::Equal
    }
}

fn encode_field(buf: &mut BytesMut, field: &Field, column: &Column) -> Result<()> {
    let width = column.width();
    match field {
        Field::Null => Err(DbError::Internal(format!(
            "NULL is not a valid key value for column '{}'",
            column.name
        ))),
        Field::Bool(v) if column.type_id == TypeId::Bool => {
            buf.extend_from_slice(&[*v as u8]);
            Ok(())
        }
        Field::Int32(v) if column.type_id == TypeId::Int32 => {
            buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        Field::Int64(v) if column.type_id == TypeId::Int64 => {
            buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        Field::Float64(v) if column.type_id == TypeId::Float64 => {
            buf.extend_from_slice(&v.to_le_bytes());
            Ok(())
        }
        Field::Char(v) if column.type_id == TypeId::Char => {
            let bytes = v.as_bytes();
            if bytes.len() > width {
                return Err(DbError::KeyTooLarge {
                    size: bytes.len(),
                    max: width,
                });
            }
            buf.extend_from_slice(bytes);
            buf.extend(std::iter::repeat(0u8).take(width - bytes.len()));
            Ok(())
        }
        _ => Err(DbError::Internal(format!(
            "key value {:?} does not match column '{}' ({})",
            field.type_id(),
            column.name,
            column.type_id
        ))),
    }
}

fn compare_column(type_id: TypeId, a: &[u8], b: &[u8]) -> Ordering {
    match type_id {
        TypeId::Bool => a[0].cmp(&b[0]),
        TypeId::Int32 => {
            let lhs = i32::from_le_bytes([a[0], a[1], a[2], a[3]]);
            let rhs = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            lhs.cmp(&rhs)
        }
        TypeId::Int64 => {
            let lhs = i64::from_le_bytes([a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7]]);
            let rhs = i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
            lhs.cmp(&rhs)
        }
        TypeId::Float64 => {
            let lhs = f64::from_le_bytes([a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7]]);
            let rhs = f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
            lhs.total_cmp(&rhs)
        }
        TypeId::Char => a.cmp(b),
    }
}
