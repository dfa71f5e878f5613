//! Index scan executor.

use tracing::debug;

use opal_catalog::CatalogManager;
use opal_common::error::{DbError, Result};
use opal_storage::{Row, RowId};

use crate::expr::Expr;

/// Plan node for an index scan: the target table, candidate indexes,
/// an AND-of-comparisons predicate, and whether a residual evaluation
/// of the full predicate is still required per row.
#[derive(Debug, Clone)]
pub struct IndexScanPlan {
    pub table_name: String,
    pub index_names: Vec<String>,
    pub predicate: Expr,
    pub need_filter: bool,
}

/// Executes an index scan: per-comparison index probes intersected into
/// one sorted rid set, then resolved against the heap.
pub struct IndexScanExecutor<'a> {
    catalog: &'a CatalogManager,
    plan: IndexScanPlan,
    output: Vec<(Row, RowId)>,
    cursor: usize,
}

/// Sorted-merge intersection of two rid sets ordered by packed rid.
fn intersect(lhs: &[RowId], rhs: &[RowId]) -> Vec<RowId> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < lhs.len() && j < rhs.len() {
        match lhs[i].as_u64().cmp(&rhs[j].as_u64()) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(lhs[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

impl<'a> IndexScanExecutor<'a> {
    /// Creates the executor; [`init`](Self::init) builds the output
    /// buffer.
    pub fn new(catalog: &'a CatalogManager, plan: IndexScanPlan) -> Self {
        Self {
            catalog,
            plan,
            output: Vec::new(),
            cursor: 0,
        }
    }

    /// Runs the scan: flatten the predicate, probe matching indexes,
    /// intersect rid sets, fetch rows, apply the residual filter.
    pub fn init(&mut self) -> Result<()> {
        let catalog = self.catalog;
        let table = catalog.get_table(&self.plan.table_name)?;
        let comparisons = self.plan.predicate.flatten()?;

        // None is the universe sentinel: no constraint applied yet.
        let mut result_rids: Option<Vec<RowId>> = None;

        for (column, op, value) in &comparisons {
            for index_name in &self.plan.index_names {
                let index = catalog.get_index(&self.plan.table_name, index_name)?;
                let codec = index.tree().codec();
                // Only a single-column index keyed on this comparison's
                // column can serve the probe.
                if codec.column_indices().len() != 1 || codec.first_column() != *column {
                    continue;
                }

                let key = codec.encode_fields(std::slice::from_ref(*value))?;
                let mut rids = index.tree().scan_key(&key, op.to_scan_op())?;
                rids.sort_by_key(|rid| rid.as_u64());
                debug!(
                    index = index_name,
                    column, matched = rids.len(),
                    "index probe"
                );

                result_rids = Some(match result_rids.take() {
                    None => rids,
                    Some(existing) => intersect(&existing, &rids),
                });
            }
        }

        let rids = result_rids.ok_or_else(|| {
            DbError::Internal("no candidate index matches the scan predicate".into())
        })?;

        for rid in rids {
            let row = table.heap().get_tuple(rid)?;
            if !self.plan.need_filter || self.plan.predicate.eval(&row) {
                self.output.push((row, rid));
            }
        }
        Ok(())
    }

    /// Returns the next buffered row, or None when exhausted.
    pub fn next(&mut self) -> Option<(Row, RowId)> {
        if self.cursor < self.output.len() {
            let item = self.output[self.cursor].clone();
            self.cursor += 1;
            Some(item)
        } else {
            None
        }
    }
}
