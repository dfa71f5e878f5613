//! Type identifiers for OpalDB column types.

use serde::{Deserialize, Serialize};

/// Transaction identifier threaded through mutating APIs.
///
/// Unobserved by the storage core; reserved for latch coupling and
/// lock-manager integration above this layer.
pub type TxnId = u64;

/// Identifier for the supported column types.
///
/// Every type is fixed width so that composite index keys have a fixed
/// byte size. `Char` columns carry their width on the column definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TypeId {
    Bool = 1,
    Int32 = 2,
    Int64 = 3,
    Float64 = 4,
    Char = 5,
}

impl TypeId {
    /// Returns the fixed byte size for this type, or None for `Char`
    /// (whose width comes from the column definition).
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            TypeId::Bool => Some(1),
            TypeId::Int32 => Some(4),
            TypeId::Int64 => Some(8),
            TypeId::Float64 => Some(8),
            TypeId::Char => None,
        }
    }

    /// Decodes a type id from its on-disk byte.
    pub fn from_u8(value: u8) -> Option<TypeId> {
        match value {
            1 => Some(TypeId::Bool),
            2 => Some(TypeId::Int32),
            3 => Some(TypeId::Int64),
            4 => Some(TypeId::Float64),
            5 => Some(TypeId::Char),
            _ => None,
        }
    }

    /// Returns true if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, TypeId::Int32 | TypeId::Int64 | TypeId::Float64)
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TypeId::Bool => "BOOL",
            TypeId::Int32 => "INT32",
            TypeId::Int64 => "INT64",
            TypeId::Float64 => "FLOAT64",
            TypeId::Char => "CHAR",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_sizes() {
        assert_eq!(TypeId::Bool.fixed_size(), Some(1));
        assert_eq!(TypeId::Int32.fixed_size(), Some(4));
        assert_eq!(TypeId::Int64.fixed_size(), Some(8));
        assert_eq!(TypeId::Float64.fixed_size(), Some(8));
        assert_eq!(TypeId::Char.fixed_size(), None);
    }

    #[test]
    fn test_from_u8_roundtrip() {
        for t in [
            TypeId::Bool,
            TypeId::Int32,
            TypeId::Int64,
            TypeId::Float64,
            TypeId::Char,
        ] {
            assert_eq!(TypeId::from_u8(t as u8), Some(t));
        }
        assert_eq!(TypeId::from_u8(0), None);
        assert_eq!(TypeId::from_u8(99), None);
    }

    #[test]
    fn test_is_numeric() {
        assert!(TypeId::Int32.is_numeric());
        assert!(TypeId::Int64.is_numeric());
        assert!(TypeId::Float64.is_numeric());
        assert!(!TypeId::Bool.is_numeric());
        assert!(!TypeId::Char.is_numeric());
    }

    #[test]
    fn test_display() {
        assert_eq!(TypeId::Int32.to_string(), "INT32");
        assert_eq!(TypeId::Char.to_string(), "CHAR");
    }

    #[test]
    fn test_serde_roundtrip() {
        let original = TypeId::Float64;
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: TypeId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
