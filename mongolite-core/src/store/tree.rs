// mongolite-core/src/store/tree.rs
// Copy-on-write B+tree operations. Every mutation rewrites the touched path
// into freshly allocated pages and returns the new root; committed pages are
// never modified, which is what keeps read snapshots valid.

use super::node::{Node, ValueRepr, INLINE_MAX, MAX_KEY};
use super::txn::{PageSource, WriteTxn};
use super::{NO_PAGE, PAGE_SIZE};
use crate::error::{StoreError, StoreResult};

/// Outcome of a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PutResult {
    Inserted,
    Replaced,
}

enum Ins {
    One(u64),
    Split(u64, Vec<u8>, u64),
}

enum Del {
    NotFound,
    Kept(u64),
    Empty,
}

/// Materialize a value, following an overflow reference if needed.
pub(crate) fn read_value<P: PageSource + ?Sized>(
    src: &P,
    repr: &ValueRepr,
) -> StoreResult<Vec<u8>> {
    match repr {
        ValueRepr::Inline(bytes) => Ok(bytes.clone()),
        ValueRepr::Overflow { page, len } => {
            let len = *len as usize;
            let mut out = Vec::with_capacity(len);
            let mut remaining = len;
            let mut page_id = *page;
            while remaining > 0 {
                let chunk = remaining.min(PAGE_SIZE);
                let bytes = src.page(page_id)?;
                out.extend_from_slice(&bytes[..chunk]);
                remaining -= chunk;
                page_id += 1;
            }
            Ok(out)
        }
    }
}

fn check_key(key: &[u8]) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::Invalid("empty key".to_string()));
    }
    if key.len() > MAX_KEY {
        return Err(StoreError::KeyTooBig(key.len()));
    }
    Ok(())
}

/// Branch descent: number of separators at or below `key`.
fn child_index(separators: &[Vec<u8>], key: &[u8]) -> usize {
    separators.partition_point(|s| s.as_slice() <= key)
}

/// Point lookup.
pub(crate) fn tree_get<P: PageSource + ?Sized>(
    src: &P,
    root: u64,
    key: &[u8],
) -> StoreResult<Option<Vec<u8>>> {
    check_key(key)?;
    let mut page_id = root;
    if page_id == NO_PAGE {
        return Ok(None);
    }
    loop {
        match Node::decode(src.page(page_id)?)? {
            Node::Branch { keys, children } => {
                page_id = children[child_index(&keys, key)];
            }
            Node::Leaf { keys, values } => {
                return match keys.binary_search_by(|k| k.as_slice().cmp(key)) {
                    Ok(i) => Ok(Some(read_value(src, &values[i])?)),
                    Err(_) => Ok(None),
                };
            }
        }
    }
}

pub(crate) fn tree_contains<P: PageSource + ?Sized>(
    src: &P,
    root: u64,
    key: &[u8],
) -> StoreResult<bool> {
    check_key(key)?;
    let mut page_id = root;
    if page_id == NO_PAGE {
        return Ok(false);
    }
    loop {
        match Node::decode(src.page(page_id)?)? {
            Node::Branch { keys, children } => {
                page_id = children[child_index(&keys, key)];
            }
            Node::Leaf { keys, .. } => {
                return Ok(keys.binary_search_by(|k| k.as_slice().cmp(key)).is_ok());
            }
        }
    }
}

/// Insert or replace `key`. With `overwrite == false` an existing key fails
/// with `KeyExists` before anything is written.
pub(crate) fn tree_put(
    txn: &mut WriteTxn,
    root: u64,
    key: &[u8],
    value: &[u8],
    overwrite: bool,
) -> StoreResult<(u64, PutResult)> {
    check_key(key)?;
    if !overwrite && tree_contains(txn, root, key)? {
        return Err(StoreError::KeyExists);
    }

    let repr = if value.len() > INLINE_MAX {
        txn.write_overflow(value)?
    } else {
        ValueRepr::Inline(value.to_vec())
    };

    if root == NO_PAGE {
        let node = Node::Leaf {
            keys: vec![key.to_vec()],
            values: vec![repr],
        };
        let id = txn.write_node(&node)?;
        return Ok((id, PutResult::Inserted));
    }

    let (ins, result) = put_rec(txn, root, key, repr)?;
    let new_root = match ins {
        Ins::One(id) => id,
        Ins::Split(left, sep, right) => txn.write_node(&Node::Branch {
            keys: vec![sep],
            children: vec![left, right],
        })?,
    };
    Ok((new_root, result))
}

fn put_rec(
    txn: &mut WriteTxn,
    page_id: u64,
    key: &[u8],
    repr: ValueRepr,
) -> StoreResult<(Ins, PutResult)> {
    match Node::decode(txn.page(page_id)?)? {
        Node::Leaf {
            mut keys,
            mut values,
        } => {
            let result = match keys.binary_search_by(|k| k.as_slice().cmp(key)) {
                Ok(i) => {
                    values[i] = repr;
                    PutResult::Replaced
                }
                Err(i) => {
                    keys.insert(i, key.to_vec());
                    values.insert(i, repr);
                    PutResult::Inserted
                }
            };
            let node = Node::Leaf { keys, values };
            if node.fits_in_page()? {
                Ok((Ins::One(txn.write_node(&node)?), result))
            } else {
                let (keys, values) = match node {
                    Node::Leaf { keys, values } => (keys, values),
                    _ => unreachable!(),
                };
                let (left, sep, right) = Node::split_leaf(keys, values);
                let left_id = txn.write_node(&left)?;
                let right_id = txn.write_node(&right)?;
                Ok((Ins::Split(left_id, sep, right_id), result))
            }
        }
        Node::Branch {
            mut keys,
            mut children,
        } => {
            let idx = child_index(&keys, key);
            let (ins, result) = put_rec(txn, children[idx], key, repr)?;
            match ins {
                Ins::One(id) => {
                    children[idx] = id;
                }
                Ins::Split(left, sep, right) => {
                    children[idx] = left;
                    keys.insert(idx, sep);
                    children.insert(idx + 1, right);
                }
            }
            let node = Node::Branch { keys, children };
            if node.fits_in_page()? {
                Ok((Ins::One(txn.write_node(&node)?), result))
            } else {
                let (keys, children) = match node {
                    Node::Branch { keys, children } => (keys, children),
                    _ => unreachable!(),
                };
                let (left, sep, right) = Node::split_branch(keys, children);
                let left_id = txn.write_node(&left)?;
                let right_id = txn.write_node(&right)?;
                Ok((Ins::Split(left_id, sep, right_id), result))
            }
        }
    }
}

/// Delete `key`. Returns the new root and whether a key was removed.
/// Emptied nodes are unlinked; no rebalancing of underfull nodes.
pub(crate) fn tree_delete(
    txn: &mut WriteTxn,
    root: u64,
    key: &[u8],
) -> StoreResult<(u64, bool)> {
    check_key(key)?;
    if root == NO_PAGE {
        return Ok((root, false));
    }
    match del_rec(txn, root, key)? {
        Del::NotFound => Ok((root, false)),
        Del::Kept(id) => Ok((id, true)),
        Del::Empty => Ok((NO_PAGE, true)),
    }
}

fn del_rec(txn: &mut WriteTxn, page_id: u64, key: &[u8]) -> StoreResult<Del> {
    match Node::decode(txn.page(page_id)?)? {
        Node::Leaf {
            mut keys,
            mut values,
        } => match keys.binary_search_by(|k| k.as_slice().cmp(key)) {
            Err(_) => Ok(Del::NotFound),
            Ok(i) => {
                keys.remove(i);
                values.remove(i);
                if keys.is_empty() {
                    Ok(Del::Empty)
                } else {
                    Ok(Del::Kept(txn.write_node(&Node::Leaf { keys, values })?))
                }
            }
        },
        Node::Branch {
            mut keys,
            mut children,
        } => {
            let idx = child_index(&keys, key);
            match del_rec(txn, children[idx], key)? {
                Del::NotFound => Ok(Del::NotFound),
                Del::Kept(id) => {
                    children[idx] = id;
                    Ok(Del::Kept(txn.write_node(&Node::Branch { keys, children })?))
                }
                Del::Empty => {
                    children.remove(idx);
                    if idx == 0 {
                        keys.remove(0);
                    } else {
                        keys.remove(idx - 1);
                    }
                    if children.len() == 1 {
                        // A single remaining child replaces this branch.
                        Ok(Del::Kept(children[0]))
                    } else {
                        Ok(Del::Kept(txn.write_node(&Node::Branch { keys, children })?))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::open_temp;
    use super::super::{StoreRead, TreeId};
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, store) = open_temp();
        let mut txn = store.begin_write().unwrap();
        txn.create_tree("kv").unwrap();
        let tree = TreeId::data("kv");
        txn.put(&tree, b"hello", b"world", true).unwrap();
        txn.put(&tree, b"alpha", b"1", true).unwrap();
        assert_eq!(txn.get(&tree, b"hello").unwrap(), Some(b"world".to_vec()));
        txn.commit().unwrap();

        let read = store.begin_read().unwrap();
        assert_eq!(read.get(&tree, b"alpha").unwrap(), Some(b"1".to_vec()));
        assert_eq!(read.get(&tree, b"missing").unwrap(), None);
    }

    #[test]
    fn test_no_overwrite_reports_key_exists() {
        let (_dir, store) = open_temp();
        let mut txn = store.begin_write().unwrap();
        txn.create_tree("kv").unwrap();
        let tree = TreeId::data("kv");
        txn.put(&tree, b"k", b"v1", false).unwrap();
        assert!(matches!(
            txn.put(&tree, b"k", b"v2", false),
            Err(StoreError::KeyExists)
        ));
        // Overwrite still allowed.
        txn.put(&tree, b"k", b"v2", true).unwrap();
        assert_eq!(txn.get(&tree, b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_many_keys_force_splits() {
        let (_dir, store) = open_temp();
        let mut txn = store.begin_write().unwrap();
        txn.create_tree("kv").unwrap();
        let tree = TreeId::data("kv");
        for i in 0..500u32 {
            let key = format!("key{:05}", i);
            let value = format!("value-{}", i).repeat(4);
            txn.put(&tree, key.as_bytes(), value.as_bytes(), false)
                .unwrap();
        }
        assert_eq!(txn.count(&tree).unwrap(), 500);
        txn.commit().unwrap();

        let read = store.begin_read().unwrap();
        for i in (0..500u32).step_by(37) {
            let key = format!("key{:05}", i);
            let expect = format!("value-{}", i).repeat(4);
            assert_eq!(
                read.get(&tree, key.as_bytes()).unwrap(),
                Some(expect.into_bytes())
            );
        }
    }

    #[test]
    fn test_overflow_values_roundtrip() {
        let (_dir, store) = open_temp();
        let mut txn = store.begin_write().unwrap();
        txn.create_tree("kv").unwrap();
        let tree = TreeId::data("kv");
        let big: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        txn.put(&tree, b"big", &big, true).unwrap();
        txn.commit().unwrap();

        let read = store.begin_read().unwrap();
        assert_eq!(read.get(&tree, b"big").unwrap(), Some(big));
    }

    #[test]
    fn test_delete_and_count() {
        let (_dir, store) = open_temp();
        let mut txn = store.begin_write().unwrap();
        txn.create_tree("kv").unwrap();
        let tree = TreeId::data("kv");
        for i in 0..100u32 {
            txn.put(&tree, format!("k{:03}", i).as_bytes(), b"v", false)
                .unwrap();
        }
        assert!(txn.delete(&tree, b"k050").unwrap());
        assert!(!txn.delete(&tree, b"k050").unwrap());
        assert_eq!(txn.count(&tree).unwrap(), 99);
        txn.commit().unwrap();

        let read = store.begin_read().unwrap();
        assert_eq!(read.get(&tree, b"k050").unwrap(), None);
        assert_eq!(read.get(&tree, b"k051").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn test_delete_everything_empties_tree() {
        let (_dir, store) = open_temp();
        let mut txn = store.begin_write().unwrap();
        txn.create_tree("kv").unwrap();
        let tree = TreeId::data("kv");
        for i in 0..200u32 {
            txn.put(&tree, format!("k{:03}", i).as_bytes(), b"v", false)
                .unwrap();
        }
        for i in 0..200u32 {
            assert!(txn.delete(&tree, format!("k{:03}", i).as_bytes()).unwrap());
        }
        assert_eq!(txn.count(&tree).unwrap(), 0);
        assert_eq!(txn.get(&tree, b"k000").unwrap(), None);
    }

    #[test]
    fn test_value_size_boundaries() {
        let (_dir, store) = open_temp();
        let mut txn = store.begin_write().unwrap();
        txn.create_tree("kv").unwrap();
        let tree = TreeId::data("kv");

        // Around the inline threshold and around exact page multiples.
        for (name, len) in [
            ("inline-max", INLINE_MAX),
            ("inline-plus", INLINE_MAX + 1),
            ("one-page", PAGE_SIZE),
            ("page-minus", PAGE_SIZE - 1),
            ("page-plus", PAGE_SIZE + 1),
            ("three-pages", PAGE_SIZE * 3),
            ("empty", 0),
        ] {
            let value: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            txn.put(&tree, name.as_bytes(), &value, true).unwrap();
            assert_eq!(txn.get(&tree, name.as_bytes()).unwrap(), Some(value));
        }
        txn.commit().unwrap();

        let read = store.begin_read().unwrap();
        assert_eq!(
            read.get(&tree, b"one-page").unwrap().map(|v| v.len()),
            Some(PAGE_SIZE)
        );
        assert_eq!(read.get(&tree, b"empty").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_reopen_preserves_tree_shape() {
        use super::super::StoreOptions;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shape.mglt");
        let options = StoreOptions {
            map_bytes: 2 << 20,
            no_sync: false,
        };
        {
            let store = super::super::Store::open(&path, options.clone()).unwrap();
            let mut txn = store.begin_write().unwrap();
            txn.create_tree("kv").unwrap();
            let tree = TreeId::data("kv");
            for i in 0..300u32 {
                txn.put(&tree, format!("k{:04}", i).as_bytes(), b"v", false)
                    .unwrap();
            }
            for i in (0..300u32).step_by(3) {
                txn.delete(&tree, format!("k{:04}", i).as_bytes()).unwrap();
            }
            txn.commit().unwrap();
        }

        let store = super::super::Store::open(&path, options).unwrap();
        let read = store.begin_read().unwrap();
        let tree = TreeId::data("kv");
        assert_eq!(read.count(&tree).unwrap(), 200);
        let mut seen = 0u32;
        for item in read.iter(&tree).unwrap() {
            let (key, _) = item.unwrap();
            let n: u32 = String::from_utf8(key[1..].to_vec())
                .unwrap()
                .parse()
                .unwrap();
            assert_ne!(n % 3, 0);
            seen += 1;
        }
        assert_eq!(seen, 200);
    }

    #[test]
    fn test_key_limits() {
        let (_dir, store) = open_temp();
        let mut txn = store.begin_write().unwrap();
        txn.create_tree("kv").unwrap();
        let tree = TreeId::data("kv");
        assert!(matches!(
            txn.put(&tree, b"", b"v", true),
            Err(StoreError::Invalid(_))
        ));
        let long_key = vec![b'x'; MAX_KEY + 1];
        assert!(matches!(
            txn.put(&tree, &long_key, b"v", true),
            Err(StoreError::KeyTooBig(_))
        ));
    }

    #[test]
    fn test_snapshot_isolation_across_commit() {
        let (_dir, store) = open_temp();
        let mut txn = store.begin_write().unwrap();
        txn.create_tree("kv").unwrap();
        let tree = TreeId::data("kv");
        txn.put(&tree, b"k", b"old", true).unwrap();
        txn.commit().unwrap();

        let reader = store.begin_read().unwrap();
        let mut txn = store.begin_write().unwrap();
        txn.put(&tree, b"k", b"new", true).unwrap();
        txn.commit().unwrap();

        // The old snapshot still sees the old value.
        assert_eq!(reader.get(&tree, b"k").unwrap(), Some(b"old".to_vec()));
        let fresh = store.begin_read().unwrap();
        assert_eq!(fresh.get(&tree, b"k").unwrap(), Some(b"new".to_vec()));
    }
}
