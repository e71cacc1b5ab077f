// src/query.rs
//! Query module for the MongoDB-like filter language.
//!
//! A filter document compiles into a [`Matcher`], a predicate tree that is
//! validated up front (unknown operators and malformed combinators fail at
//! construction) and evaluated side-effect free against candidate documents.

pub mod operators;

use crate::error::Result;
use bson::Document;
use operators::Predicate;

/// Compiled filter predicate.
///
/// Construction validates the filter; matching never fails.
#[derive(Debug, Clone)]
pub struct Matcher {
    predicate: Predicate,
    filter: Document,
}

impl Matcher {
    /// Compile a filter document. An empty filter matches every document.
    pub fn new(filter: &Document) -> Result<Matcher> {
        Ok(Matcher {
            predicate: operators::compile(filter)?,
            filter: filter.clone(),
        })
    }

    /// Check a document against the compiled filter.
    pub fn matches(&self, doc: &Document) -> bool {
        self.predicate.matches(doc)
    }

    /// The filter this matcher was compiled from.
    pub fn filter(&self) -> &Document {
        &self.filter
    }
}

/// One-shot convenience: compile and evaluate in a single call.
pub fn matches_filter(doc: &Document, filter: &Document) -> Result<bool> {
    Ok(Matcher::new(filter)?.matches(doc))
}
