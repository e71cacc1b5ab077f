// src/query_planner.rs
// Query planner - picks between the _id fast path, a secondary index probe,
// and the full collection scan.

use crate::index::{IndexDescriptor, IndexSpec};
use crate::index_key::encode_field;
use crate::value_utils::get_path;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};

/// Query plan - describes how to execute a query
#[derive(Debug, Clone)]
pub enum QueryPlan {
    /// Direct primary-tree get by ObjectId. No cursor, no scan.
    IdLookup(ObjectId),

    /// Probe one index with an equality composite key, fetch documents by
    /// id, and re-apply the filter.
    IndexScan {
        index: IndexDescriptor,
        probe: Vec<u8>,
    },

    /// Full collection scan (no index used)
    CollectionScan,
}

/// Query planner - analyzes filters and selects an execution plan
pub struct QueryPlanner;

impl QueryPlanner {
    pub fn plan(filter: &Document, indexes: &[IndexDescriptor]) -> QueryPlan {
        if let Some(id) = Self::id_fast_path(filter) {
            return QueryPlan::IdLookup(id);
        }
        if let Some(plan) = Self::index_equality_scan(filter, indexes) {
            return plan;
        }
        QueryPlan::CollectionScan
    }

    /// `{_id: <objectid>}` and nothing else.
    fn id_fast_path(filter: &Document) -> Option<ObjectId> {
        if filter.len() != 1 {
            return None;
        }
        match filter.get("_id") {
            Some(Bson::ObjectId(id)) => Some(*id),
            _ => None,
        }
    }

    /// True when the filter is a conjunction of plain top-level equality
    /// predicates - no `$`-operators anywhere at the top level.
    fn equality_only(filter: &Document) -> bool {
        filter.iter().all(|(key, value)| {
            !key.starts_with('$')
                && match value {
                    Bson::Document(sub) => !sub.keys().any(|k| k.starts_with('$')),
                    _ => true,
                }
        })
    }

    /// A field is probe-safe when an equality probe against the index finds
    /// exactly the documents equality matching finds. Arrays fan out to
    /// per-element entries and null also matches missing fields, so both
    /// fall back to the scan.
    fn probe_safe(value: &Bson) -> bool {
        !matches!(value, Bson::Array(_) | Bson::Null | Bson::Undefined)
    }

    fn index_equality_scan(filter: &Document, indexes: &[IndexDescriptor]) -> Option<QueryPlan> {
        if filter.is_empty() || !Self::equality_only(filter) {
            return None;
        }
        if filter
            .iter()
            .any(|(_, value)| !Self::probe_safe(value))
        {
            return None;
        }

        // Best usable index: every spec field present in the filter, most
        // fields matched, ties broken by declaration order.
        let mut best: Option<&IndexDescriptor> = None;
        for candidate in indexes {
            let covered = candidate
                .spec
                .fields
                .iter()
                .all(|(path, _)| filter.get(path).is_some());
            if !covered {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => candidate.spec.fields.len() > current.spec.fields.len(),
            };
            if better {
                best = Some(candidate);
            }
        }

        let index = best?;
        let probe = Self::build_probe(filter, &index.spec);
        Some(QueryPlan::IndexScan {
            index: index.clone(),
            probe,
        })
    }

    /// Composite probe key from the filter's equality values, in spec order.
    fn build_probe(filter: &Document, spec: &IndexSpec) -> Vec<u8> {
        let mut probe = Vec::new();
        for (path, direction) in &spec.fields {
            encode_field(&mut probe, filter.get(path), *direction < 0);
        }
        probe
    }

    /// Human-readable plan description, for diagnostics.
    pub fn explain(filter: &Document, indexes: &[IndexDescriptor]) -> Document {
        match Self::plan(filter, indexes) {
            QueryPlan::IdLookup(id) => doc! {
                "queryPlan": "IdLookup",
                "stage": "PRIMARY_GET",
                "key": id,
                "estimatedCost": "O(log n)",
            },
            QueryPlan::IndexScan { index, .. } => doc! {
                "queryPlan": "IndexScan",
                "stage": "FETCH_WITH_INDEX",
                "indexUsed": index.name,
                "estimatedCost": "O(log n + k)",
            },
            QueryPlan::CollectionScan => doc! {
                "queryPlan": "CollectionScan",
                "stage": "FULL_SCAN",
                "indexUsed": Bson::Null,
                "estimatedCost": "O(n)",
            },
        }
    }
}

/// Dot-path aware equality check used when verifying planner candidates in
/// tests; the cursor re-applies the real matcher at runtime.
#[allow(dead_code)]
pub(crate) fn filter_field<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    get_path(doc, path)
}
