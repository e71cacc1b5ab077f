// mongolite-core/src/cursor.rs
// Find cursor: a pull-based state machine over one collection's matching
// documents. Holds its own read snapshot, so concurrent writes between
// `next` calls cannot disturb the iteration.

use crate::error::{MongoliteError, Result};
use crate::find_options::{
    apply_projection, apply_sort, parse_sort_doc, validate_projection, FindOptions,
};
use crate::index::decode_primary_key;
use crate::query::Matcher;
use crate::query_planner::QueryPlan;
use crate::store::{ReadTxn, StoreRead, TreeId};
use bson::oid::ObjectId;
use bson::Document;
use std::collections::VecDeque;

/// Cursor lifecycle. Configuration setters are only valid while `Fresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Fresh,
    Iterating,
    Exhausted,
}

enum Source {
    /// Single primary get; `None` once consumed.
    Id(Option<ObjectId>),
    /// Index probe: every entry under `probe` in the index sub-tree, the
    /// document fetched by id from the primary tree.
    Index { tree: TreeId, probe: Vec<u8> },
    /// Forward scan of the primary tree.
    Scan,
}

impl std::fmt::Debug for FindCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FindCursor")
            .field("state", &self.state)
            .field("skipped", &self.skipped)
            .field("emitted", &self.emitted)
            .finish()
    }
}

pub struct FindCursor {
    txn: ReadTxn,
    primary: TreeId,
    source: Source,
    matcher: Matcher,
    options: FindOptions,
    state: CursorState,
    /// Last raw key yielded by the underlying iteration; the next fetch
    /// re-seeks just past it.
    resume: Option<Vec<u8>>,
    skipped: usize,
    emitted: usize,
    /// Pre-sorted results when a sort is configured.
    sorted: Option<VecDeque<Document>>,
}

impl FindCursor {
    pub(crate) fn new(txn: ReadTxn, primary: TreeId, plan: QueryPlan, matcher: Matcher) -> Self {
        let source = match plan {
            QueryPlan::IdLookup(id) => Source::Id(Some(id)),
            QueryPlan::IndexScan { index, probe } => Source::Index {
                tree: TreeId::index(&tree_name_of(&primary), &index.name),
                probe,
            },
            QueryPlan::CollectionScan => Source::Scan,
        };
        FindCursor {
            txn,
            primary,
            source,
            matcher,
            options: FindOptions::new(),
            state: CursorState::Fresh,
            resume: None,
            skipped: 0,
            emitted: 0,
            sorted: None,
        }
    }

    fn check_fresh(&self) -> Result<()> {
        if self.state != CursorState::Fresh {
            return Err(MongoliteError::InvalidArgument(
                "cursor options can only be set before iteration starts".to_string(),
            ));
        }
        Ok(())
    }

    /// Discard the first `n` matching documents.
    pub fn set_skip(&mut self, n: usize) -> Result<()> {
        self.check_fresh()?;
        self.options.skip = Some(n);
        Ok(())
    }

    /// Emit at most `n` documents. Zero means unlimited.
    pub fn set_limit(&mut self, n: usize) -> Result<()> {
        self.check_fresh()?;
        self.options.limit = if n == 0 { None } else { Some(n) };
        Ok(())
    }

    /// Sort results by the given spec. Buffers the full matching set before
    /// the first `next`, so this is expensive on large result sets.
    pub fn set_sort(&mut self, spec: &Document) -> Result<()> {
        self.check_fresh()?;
        self.options.sort = Some(parse_sort_doc(spec)?);
        Ok(())
    }

    /// Project returned documents to the requested fields.
    pub fn set_projection(&mut self, projection: &Document) -> Result<()> {
        self.check_fresh()?;
        validate_projection(projection)?;
        self.options.projection = Some(projection.clone());
        Ok(())
    }

    /// Hint: more documents may follow.
    pub fn more(&self) -> bool {
        self.state != CursorState::Exhausted
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Pull the next matching document, honoring skip, limit, sort, and
    /// projection. Returns `None` once exhausted.
    pub fn next(&mut self) -> Result<Option<Document>> {
        if self.state == CursorState::Exhausted {
            return Ok(None);
        }
        if self.state == CursorState::Fresh {
            self.state = CursorState::Iterating;
            if self.options.sort.is_some() {
                match self.collect_sorted() {
                    Ok(buffer) => self.sorted = Some(buffer),
                    Err(e) => {
                        self.state = CursorState::Exhausted;
                        return Err(e);
                    }
                }
            }
        }

        if let Some(limit) = self.options.limit {
            if self.emitted >= limit {
                self.state = CursorState::Exhausted;
                return Ok(None);
            }
        }

        let next = if self.sorted.is_some() {
            self.sorted.as_mut().and_then(|buffer| buffer.pop_front())
        } else {
            match self.next_unsorted() {
                Ok(found) => found,
                Err(e) => {
                    self.state = CursorState::Exhausted;
                    return Err(e);
                }
            }
        };

        match next {
            Some(doc) => {
                self.emitted += 1;
                let projected = match &self.options.projection {
                    Some(projection) => apply_projection(&doc, projection),
                    None => doc,
                };
                Ok(Some(projected))
            }
            None => {
                self.state = CursorState::Exhausted;
                Ok(None)
            }
        }
    }

    /// Close the cursor and release its read transaction. Dropping the
    /// cursor has the same effect.
    pub fn destroy(self) {}

    /// Streaming path: skip then emit.
    fn next_unsorted(&mut self) -> Result<Option<Document>> {
        let skip = self.options.skip.unwrap_or(0);
        loop {
            let doc = match self.fetch_next_match()? {
                Some(doc) => doc,
                None => return Ok(None),
            };
            if self.skipped < skip {
                self.skipped += 1;
                continue;
            }
            return Ok(Some(doc));
        }
    }

    /// Buffered path for sorted queries: match everything, sort, pre-apply
    /// skip.
    fn collect_sorted(&mut self) -> Result<VecDeque<Document>> {
        let mut matches = Vec::new();
        while let Some(doc) = self.fetch_next_match()? {
            matches.push(doc);
        }
        if let Some(sort) = &self.options.sort {
            apply_sort(&mut matches, sort);
        }
        let skip = self.options.skip.unwrap_or(0).min(matches.len());
        Ok(matches.into_iter().skip(skip).collect())
    }

    /// Advance the underlying plan to the next document satisfying the
    /// filter, regardless of skip/limit.
    fn fetch_next_match(&mut self) -> Result<Option<Document>> {
        loop {
            let raw = self.fetch_next_raw()?;
            let doc = match raw {
                Some(doc) => doc,
                None => return Ok(None),
            };
            if self.matcher.matches(&doc) {
                return Ok(Some(doc));
            }
        }
    }

    fn fetch_next_raw(&mut self) -> Result<Option<Document>> {
        match &mut self.source {
            Source::Id(pending) => match pending.take() {
                None => Ok(None),
                Some(id) => match self.txn.get(&self.primary, &id.bytes())? {
                    Some(bytes) => Ok(Some(parse_stored(&bytes)?)),
                    None => Ok(None),
                },
            },
            Source::Scan => {
                let probe = successor(self.resume.as_deref());
                let item = {
                    let mut iter = self.txn.iter_seek(&self.primary, probe.as_deref())?;
                    iter.next().transpose()?
                };
                match item {
                    None => Ok(None),
                    Some((key, bytes)) => {
                        self.resume = Some(key);
                        Ok(Some(parse_stored(&bytes)?))
                    }
                }
            }
            Source::Index { tree, probe } => {
                loop {
                    let seek = match &self.resume {
                        Some(last) => successor(Some(last.as_slice())).unwrap_or_default(),
                        None => probe.clone(),
                    };
                    let item = {
                        let mut iter = self.txn.iter_seek(tree, Some(seek.as_slice()))?;
                        iter.next().transpose()?
                    };
                    let (entry_key, id_bytes) = match item {
                        None => return Ok(None),
                        Some(found) => found,
                    };
                    if !entry_key.starts_with(probe) {
                        return Ok(None);
                    }
                    self.resume = Some(entry_key);
                    let id = decode_primary_key(&id_bytes)?;
                    match self.txn.get(&self.primary, &id.bytes())? {
                        Some(bytes) => return Ok(Some(parse_stored(&bytes)?)),
                        // An index entry without its document would mean a
                        // broken maintenance invariant; skip it on read.
                        None => continue,
                    }
                }
            }
        }
    }
}

fn tree_name_of(primary: &TreeId) -> String {
    String::from_utf8_lossy(&primary.0[2..]).into_owned()
}

/// Immediate successor of `key` in bytewise order.
fn successor(key: Option<&[u8]>) -> Option<Vec<u8>> {
    key.map(|k| {
        let mut next = k.to_vec();
        next.push(0);
        next
    })
}

fn parse_stored(bytes: &[u8]) -> Result<Document> {
    Document::from_reader(&mut &bytes[..])
        .map_err(|e| MongoliteError::Schema(format!("stored document decode failed: {}", e)))
}
