//! Row, field, and schema codecs.
//!
//! Rows are serialized against a schema as
//! `RowId || (is_null: u8, field bytes)*`. Every column type is fixed
//! width, so a row's byte size is a function of its schema alone; null
//! fields still occupy their column's width (zeroed).

use std::cmp::Ordering;

use opal_common::error::{DbError, Result};
use opal_common::page::{PageId, INVALID_PAGE_ID};
use opal_common::types::TypeId;

/// Unique identifier of a row in a table heap: `(page_id, slot)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId {
    /// Heap page containing the row.
    pub page_id: PageId,
    /// Slot number within the page.
    pub slot: u32,
}

impl RowId {
    /// Serialized size in bytes.
    pub const SIZE: usize = 8;

    /// Invalid row ID.
    pub const INVALID: RowId = RowId {
        page_id: INVALID_PAGE_ID,
        slot: 0,
    };

    /// Creates a new row ID.
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Returns true if this row ID points at a page.
    pub fn is_valid(&self) -> bool {
        self.page_id != INVALID_PAGE_ID
    }

    /// Packs the row ID into a u64; the executor intersects rid sets in
    /// this order.
    pub fn as_u64(&self) -> u64 {
        ((self.page_id as u32 as u64) << 32) | self.slot as u64
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
        buf
    }

    /// Deserializes from bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            page_id: PageId::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot)
    }
}

/// A column definition: name, type, width, and nullability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column type.
    pub type_id: TypeId,
    /// Byte width for `Char` columns; ignored for other types.
    pub length: u32,
    /// Whether the column admits NULL.
    pub nullable: bool,
}

impl Column {
    /// Creates a fixed-type column.
    pub fn new(name: impl Into<String>, type_id: TypeId, nullable: bool) -> Self {
        debug_assert!(type_id != TypeId::Char, "use Column::char for CHAR columns");
        Self {
            name: name.into(),
            type_id,
            length: 0,
            nullable,
        }
    }

    /// Creates a `Char(length)` column.
    pub fn char(name: impl Into<String>, length: u32, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_id: TypeId::Char,
            length,
            nullable,
        }
    }

    /// Byte width of a value of this column.
    pub fn width(&self) -> usize {
        self.type_id
            .fixed_size()
            .unwrap_or(self.length as usize)
    }

    /// Serialized size of the column definition.
    pub fn serialized_size(&self) -> usize {
        4 + self.name.len() + 1 + 4 + 1
    }

    /// Appends the serialized column definition to `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.name.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf.push(self.type_id as u8);
        buf.extend_from_slice(&self.length.to_le_bytes());
        buf.push(self.nullable as u8);
    }

    /// Deserializes a column definition; returns the column and bytes
    /// consumed.
    pub fn deserialize(buf: &[u8]) -> Result<(Column, usize)> {
        if buf.len() < 4 {
            return Err(DbError::Internal("truncated column definition".into()));
        }
        let name_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let rest = &buf[4..];
        if rest.len() < name_len + 6 {
            return Err(DbError::Internal("truncated column definition".into()));
        }
        let name = String::from_utf8(rest[..name_len].to_vec())
            .map_err(|_| DbError::Internal("column name is not UTF-8".into()))?;
        let type_id = TypeId::from_u8(rest[name_len])
            .ok_or_else(|| DbError::Internal("unknown column type".into()))?;
        let length = u32::from_le_bytes([
            rest[name_len + 1],
            rest[name_len + 2],
            rest[name_len + 3],
            rest[name_len + 4],
        ]);
        let nullable = rest[name_len + 5] != 0;
        Ok((
            Column {
                name,
                type_id,
                length,
                nullable,
            },
            4 + name_len + 6,
        ))
    }
}

/// An ordered list of columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Creates a schema from columns.
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Returns the columns.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the column at `index`.
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Resolves a column name to its index.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Fixed byte size of a serialized row of this schema.
    pub fn row_size(&self) -> usize {
        RowId::SIZE + self.columns.iter().map(|c| 1 + c.width()).sum::<usize>()
    }

    /// Serialized size of the schema definition.
    pub fn serialized_size(&self) -> usize {
        4 + self
            .columns
            .iter()
            .map(|c| c.serialized_size())
            .sum::<usize>()
    }

    /// Appends the serialized schema to `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.columns.len() as u32).to_le_bytes());
        for column in &self.columns {
            column.serialize_into(buf);
        }
    }

    /// Deserializes a schema; returns the schema and bytes consumed.
    pub fn deserialize(buf: &[u8]) -> Result<(Schema, usize)> {
        if buf.len() < 4 {
            return Err(DbError::Internal("truncated schema".into()));
        }
        let count = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let mut offset = 4;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            let (column, consumed) = Column::deserialize(&buf[offset..])?;
            columns.push(column);
            offset += consumed;
        }
        Ok((Schema { columns }, offset))
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Char(String),
}

impl Field {
    /// Returns true for the NULL value.
    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    /// Returns the value's type, or None for NULL.
    pub fn type_id(&self) -> Option<TypeId> {
        match self {
            Field::Null => None,
            Field::Bool(_) => Some(TypeId::Bool),
            Field::Int32(_) => Some(TypeId::Int32),
            Field::Int64(_) => Some(TypeId::Int64),
            Field::Float64(_) => Some(TypeId::Float64),
            Field::Char(_) => Some(TypeId::Char),
        }
    }

    /// Compares two values of the same type. Returns None when either
    /// side is NULL or the types differ.
    pub fn compare(&self, other: &Field) -> Option<Ordering> {
        match (self, other) {
            (Field::Bool(a), Field::Bool(b)) => Some(a.cmp(b)),
            (Field::Int32(a), Field::Int32(b)) => Some(a.cmp(b)),
            (Field::Int64(a), Field::Int64(b)) => Some(a.cmp(b)),
            (Field::Float64(a), Field::Float64(b)) => a.partial_cmp(b),
            (Field::Char(a), Field::Char(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Appends the fixed-width encoding of this value for `column`.
    ///
    /// The layout is `is_null: u8` followed by exactly `column.width()`
    /// value bytes (zeroed for NULL).
    pub fn serialize_into(&self, buf: &mut Vec<u8>, column: &Column) -> Result<()> {
        buf.push(self.is_null() as u8);
        let width = column.width();
        match self {
            Field::Null => buf.extend(std::iter::repeat(0u8).take(width)),
            Field::Bool(v) => buf.push(*v as u8),
            Field::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Field::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Field::Float64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Field::Char(v) => {
                let bytes = v.as_bytes();
                if bytes.len() > width {
                    return Err(DbError::Internal(format!(
                        "value exceeds CHAR({}) column '{}'",
                        width, column.name
                    )));
                }
                buf.extend_from_slice(bytes);
                buf.extend(std::iter::repeat(0u8).take(width - bytes.len()));
            }
        }
        if !self.is_null() {
            let expected = self
                .type_id()
                .map(|t| t == column.type_id)
                .unwrap_or(false);
            if !expected {
                return Err(DbError::Internal(format!(
                    "field type {:?} does not match column '{}' ({})",
                    self.type_id(),
                    column.name,
                    column.type_id
                )));
            }
        }
        Ok(())
    }

    /// Decodes a value for `column`; returns the field and bytes
    /// consumed.
    pub fn deserialize(buf: &[u8], column: &Column) -> Result<(Field, usize)> {
        let width = column.width();
        if buf.len() < 1 + width {
            return Err(DbError::Internal("truncated field".into()));
        }
        let is_null = buf[0] != 0;
        let value = &buf[1..1 + width];
        let field = if is_null {
            Field::Null
        } else {
            match column.type_id {
                TypeId::Bool => Field::Bool(value[0] != 0),
                TypeId::Int32 => {
                    Field::Int32(i32::from_le_bytes([value[0], value[1], value[2], value[3]]))
                }
                TypeId::Int64 => Field::Int64(i64::from_le_bytes([
                    value[0], value[1], value[2], value[3], value[4], value[5], value[6], value[7],
                ])),
                TypeId::Float64 => Field::Float64(f64::from_le_bytes([
                    value[0], value[1], value[2], value[3], value[4], value[5], value[6], value[7],
                ])),
                TypeId::Char => {
                    let end = value.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
                    let text = String::from_utf8(value[..end].to_vec())
                        .map_err(|_| DbError::Internal("CHAR value is not UTF-8".into()))?;
                    Field::Char(text)
                }
            }
        };
        Ok((field, 1 + width))
    }
}

/// A row: ordered field values plus the row's heap location.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Heap location; `RowId::INVALID` until the row is stored.
    pub rid: RowId,
    /// Field values, one per schema column.
    pub fields: Vec<Field>,
}

impl Row {
    /// Creates a row not yet stored in a heap.
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            rid: RowId::INVALID,
            fields,
        }
    }

    /// Returns the field at `index`.
    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// Serializes the row against `schema`.
    pub fn serialize(&self, schema: &Schema) -> Result<Vec<u8>> {
        if self.fields.len() != schema.len() {
            return Err(DbError::Internal(format!(
                "row has {} fields, schema has {} columns",
                self.fields.len(),
                schema.len()
            )));
        }
        let mut buf = Vec::with_capacity(schema.row_size());
        buf.extend_from_slice(&self.rid.to_bytes());
        for (field, column) in self.fields.iter().zip(schema.columns()) {
            field.serialize_into(&mut buf, column)?;
        }
        Ok(buf)
    }

    /// Deserializes a row against `schema`.
    pub fn deserialize(buf: &[u8], schema: &Schema) -> Result<Row> {
        if buf.len() < RowId::SIZE {
            return Err(DbError::Internal("truncated row".into()));
        }
        let rid = RowId::from_bytes(&buf[..RowId::SIZE]);
        let mut offset = RowId::SIZE;
        let mut fields = Vec::with_capacity(schema.len());
        for column in schema.columns() {
            let (field, consumed) = Field::deserialize(&buf[offset..], column)?;
            fields.push(field);
            offset += consumed;
        }
        Ok(Row { rid, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", TypeId::Int32, false),
            Column::new("score", TypeId::Float64, true),
            Column::char("name", 16, true),
            Column::new("flag", TypeId::Bool, false),
        ])
    }

    #[test]
    fn test_rowid_packing() {
        let rid = RowId::new(7, 3);
        assert_eq!(rid.as_u64(), (7u64 << 32) | 3);
        assert_eq!(RowId::from_bytes(&rid.to_bytes()), rid);
        assert!(rid.is_valid());
        assert!(!RowId::INVALID.is_valid());
    }

    #[test]
    fn test_rowid_ordering_is_lexicographic() {
        let a = RowId::new(1, 99);
        let b = RowId::new(2, 0);
        assert!(a.as_u64() < b.as_u64());

        let c = RowId::new(2, 1);
        assert!(b.as_u64() < c.as_u64());
    }

    #[test]
    fn test_column_width() {
        assert_eq!(Column::new("a", TypeId::Int32, false).width(), 4);
        assert_eq!(Column::new("b", TypeId::Int64, false).width(), 8);
        assert_eq!(Column::char("c", 20, false).width(), 20);
    }

    #[test]
    fn test_schema_roundtrip() {
        let schema = sample_schema();
        let mut buf = Vec::new();
        schema.serialize_into(&mut buf);
        assert_eq!(buf.len(), schema.serialized_size());

        let (decoded, consumed) = Schema::deserialize(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, schema);
    }

    #[test]
    fn test_schema_column_index() {
        let schema = sample_schema();
        assert_eq!(schema.column_index("id"), Some(0));
        assert_eq!(schema.column_index("name"), Some(2));
        assert_eq!(schema.column_index("missing"), None);
    }

    #[test]
    fn test_row_roundtrip() {
        let schema = sample_schema();
        let mut row = Row::new(vec![
            Field::Int32(42),
            Field::Float64(2.5),
            Field::Char("alice".to_string()),
            Field::Bool(true),
        ]);
        row.rid = RowId::new(5, 1);

        let bytes = row.serialize(&schema).unwrap();
        assert_eq!(bytes.len(), schema.row_size());

        let decoded = Row::deserialize(&bytes, &schema).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_row_with_nulls() {
        let schema = sample_schema();
        let row = Row::new(vec![
            Field::Int32(1),
            Field::Null,
            Field::Null,
            Field::Bool(false),
        ]);

        let bytes = row.serialize(&schema).unwrap();
        // Fixed width regardless of nulls.
        assert_eq!(bytes.len(), schema.row_size());

        let decoded = Row::deserialize(&bytes, &schema).unwrap();
        assert!(decoded.fields[1].is_null());
        assert!(decoded.fields[2].is_null());
    }

    #[test]
    fn test_row_field_count_mismatch() {
        let schema = sample_schema();
        let row = Row::new(vec![Field::Int32(1)]);
        assert!(row.serialize(&schema).is_err());
    }

    #[test]
    fn test_char_overflow_rejected() {
        let schema = Schema::new(vec![Column::char("c", 4, false)]);
        let row = Row::new(vec![Field::Char("too long".to_string())]);
        assert!(row.serialize(&schema).is_err());
    }

    #[test]
    fn test_field_type_mismatch_rejected() {
        let schema = Schema::new(vec![Column::new("n", TypeId::Int32, false)]);
        let row = Row::new(vec![Field::Int64(1)]);
        assert!(row.serialize(&schema).is_err());
    }

    #[test]
    fn test_field_compare() {
        use std::cmp::Ordering;

        assert_eq!(
            Field::Int32(1).compare(&Field::Int32(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Field::Char("b".into()).compare(&Field::Char("a".into())),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Field::Float64(1.0).compare(&Field::Float64(1.0)),
            Some(Ordering::Equal)
        );
        // NULL and cross-type comparisons have no order.
        assert_eq!(Field::Null.compare(&Field::Int32(1)), None);
        assert_eq!(Field::Int32(1).compare(&Field::Int64(1)), None);
    }
}
