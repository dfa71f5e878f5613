//! Predicate expressions.

use std::cmp::Ordering;

use opal_common::error::{DbError, Result};
use opal_storage::{Field, Row, ScanOp};

/// Comparison operator of a predicate leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Whether `lhs OP rhs` holds given `lhs.cmp(rhs)`.
    pub fn matches(&self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
        }
    }

    /// The tree scan operator with the same semantics.
    pub fn to_scan_op(self) -> ScanOp {
        match self {
            CmpOp::Eq => ScanOp::Eq,
            CmpOp::Ne => ScanOp::Ne,
            CmpOp::Lt => ScanOp::Lt,
            CmpOp::Le => ScanOp::Le,
            CmpOp::Gt => ScanOp::Gt,
            CmpOp::Ge => ScanOp::Ge,
        }
    }
}

/// A predicate over a row: comparisons against constants combined with
/// boolean connectives.
///
/// Comparisons involving NULL evaluate to false.
#[derive(Debug, Clone)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    /// `row[column] OP value`.
    Cmp {
        column: usize,
        op: CmpOp,
        value: Field,
    },
}

impl Expr {
    /// Conjunction.
    pub fn and(lhs: Expr, rhs: Expr) -> Expr {
        Expr::And(Box::new(lhs), Box::new(rhs))
    }

    /// Disjunction.
    pub fn or(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Or(Box::new(lhs), Box::new(rhs))
    }

    /// Comparison leaf.
    pub fn cmp(column: usize, op: CmpOp, value: Field) -> Expr {
        Expr::Cmp { column, op, value }
    }

    /// Evaluates the predicate against a row.
    pub fn eval(&self, row: &Row) -> bool {
        match self {
            Expr::And(lhs, rhs) => lhs.eval(row) && rhs.eval(row),
            Expr::Or(lhs, rhs) => lhs.eval(row) || rhs.eval(row),
            Expr::Cmp { column, op, value } => row
                .field(*column)
                .and_then(|field| field.compare(value))
                .map(|ordering| op.matches(ordering))
                .unwrap_or(false),
        }
    }

    /// Flattens an AND-only predicate into its comparison leaves; any
    /// other connective is an error.
    pub fn flatten(&self) -> Result<Vec<(usize, CmpOp, &Field)>> {
        let mut comparisons = Vec::new();
        self.flatten_into(&mut comparisons)?;
        Ok(comparisons)
    }

    fn flatten_into<'a>(&'a self, out: &mut Vec<(usize, CmpOp, &'a Field)>) -> Result<()> {
        match self {
            Expr::And(lhs, rhs) => {
                lhs.flatten_into(out)?;
                rhs.flatten_into(out)
            }
            Expr::Cmp { column, op, value } => {
                out.push((*column, *op, value));
                Ok(())
            }
            Expr::Or(..) => Err(DbError::PredicateError(
                "index scan predicates must be conjunctions of comparisons".into(),
            )),
        }
    }
}
