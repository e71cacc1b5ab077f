// mongolite-core/src/store/node.rs
// B+tree node layout: one bincode-encoded node per 4 KiB page, with a u32
// length prefix. Values above the inline threshold live in overflow runs.

use super::PAGE_SIZE;
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};

/// Length prefix ahead of the encoded node.
const NODE_HEADER: usize = 4;

/// Encoded node budget inside one page.
pub(crate) const MAX_NODE_PAYLOAD: usize = PAGE_SIZE - NODE_HEADER;

/// Values longer than this are written to contiguous overflow pages and the
/// leaf keeps only a reference.
pub(crate) const INLINE_MAX: usize = 1024;

/// Longest accepted key. Keeps any single entry well under half a page so a
/// split always produces two fitting halves.
pub(crate) const MAX_KEY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum ValueRepr {
    Inline(Vec<u8>),
    Overflow { page: u64, len: u64 },
}

impl ValueRepr {
    /// Approximate encoded footprint, used only to pick split points.
    fn weight(&self) -> usize {
        match self {
            ValueRepr::Inline(v) => v.len() + 9,
            ValueRepr::Overflow { .. } => 17,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Node {
    Leaf {
        keys: Vec<Vec<u8>>,
        values: Vec<ValueRepr>,
    },
    /// `children.len() == keys.len() + 1`; `keys[i]` is the smallest key
    /// reachable under `children[i + 1]`.
    Branch {
        keys: Vec<Vec<u8>>,
        children: Vec<u64>,
    },
}

impl Node {
    pub(crate) fn empty_leaf() -> Node {
        Node::Leaf {
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    pub(crate) fn encoded_size(&self) -> StoreResult<usize> {
        bincode::serialized_size(self)
            .map(|n| n as usize)
            .map_err(|e| StoreError::Corrupt(format!("node size computation failed: {}", e)))
    }

    pub(crate) fn fits_in_page(&self) -> StoreResult<bool> {
        Ok(self.encoded_size()? <= MAX_NODE_PAYLOAD)
    }

    /// Encode into a fresh page-sized buffer.
    pub(crate) fn encode(&self) -> StoreResult<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| StoreError::Corrupt(format!("node encode failed: {}", e)))?;
        if body.len() > MAX_NODE_PAYLOAD {
            return Err(StoreError::Corrupt(format!(
                "node of {} bytes exceeds the page budget",
                body.len()
            )));
        }
        let mut page = vec![0u8; PAGE_SIZE];
        page[0..NODE_HEADER].copy_from_slice(&(body.len() as u32).to_le_bytes());
        page[NODE_HEADER..NODE_HEADER + body.len()].copy_from_slice(&body);
        Ok(page)
    }

    pub(crate) fn decode(page: &[u8]) -> StoreResult<Node> {
        if page.len() < NODE_HEADER {
            return Err(StoreError::Corrupt("short page".to_string()));
        }
        let len = u32::from_le_bytes(page[0..NODE_HEADER].try_into().unwrap()) as usize;
        if len == 0 || len > MAX_NODE_PAYLOAD || NODE_HEADER + len > page.len() {
            return Err(StoreError::Corrupt(format!(
                "node length {} out of range",
                len
            )));
        }
        bincode::deserialize(&page[NODE_HEADER..NODE_HEADER + len])
            .map_err(|e| StoreError::Corrupt(format!("node decode failed: {}", e)))
    }

    /// Split an overfull leaf roughly in half by byte weight.
    /// Returns `(left, separator, right)`; the separator is the first key of
    /// the right half.
    pub(crate) fn split_leaf(keys: Vec<Vec<u8>>, values: Vec<ValueRepr>) -> (Node, Vec<u8>, Node) {
        debug_assert!(keys.len() >= 2);
        let total: usize = keys
            .iter()
            .zip(values.iter())
            .map(|(k, v)| k.len() + v.weight() + 8)
            .sum();
        let mut acc = 0usize;
        let mut split_at = keys.len() / 2;
        for (i, (k, v)) in keys.iter().zip(values.iter()).enumerate() {
            acc += k.len() + v.weight() + 8;
            if acc * 2 >= total {
                split_at = i + 1;
                break;
            }
        }
        // Both halves must be non-empty.
        let split_at = split_at.clamp(1, keys.len() - 1);

        let mut left_keys = keys;
        let right_keys = left_keys.split_off(split_at);
        let mut left_values = values;
        let right_values = left_values.split_off(split_at);
        let sep = right_keys[0].clone();
        (
            Node::Leaf {
                keys: left_keys,
                values: left_values,
            },
            sep,
            Node::Leaf {
                keys: right_keys,
                values: right_values,
            },
        )
    }

    /// Split an overfull branch: the middle separator is promoted, not kept.
    pub(crate) fn split_branch(keys: Vec<Vec<u8>>, children: Vec<u64>) -> (Node, Vec<u8>, Node) {
        debug_assert!(keys.len() >= 3);
        debug_assert_eq!(children.len(), keys.len() + 1);
        let mid = keys.len() / 2;

        let mut left_keys = keys;
        let mut right_keys = left_keys.split_off(mid);
        let sep = right_keys.remove(0);
        let mut left_children = children;
        let right_children = left_children.split_off(mid + 1);
        (
            Node::Branch {
                keys: left_keys,
                children: left_children,
            },
            sep,
            Node::Branch {
                keys: right_keys,
                children: right_children,
            },
        )
    }
}
