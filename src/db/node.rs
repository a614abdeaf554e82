use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

use crate::error::{DbError, Result};

/// maximum length, in bytes, of a key or a value
pub const MAX_ENTRY_LEN: usize = 256;

/// a shared, lockable handle to one tree node
pub(crate) type NodeRef = Arc<RwLock<Node>>;

/// an owned read guard on a node; keeps the node alive while held
pub(crate) type NodeReadGuard = ArcRwLockReadGuard<RawRwLock, Node>;

/// an owned write guard on a node; keeps the node alive while held
pub(crate) type NodeWriteGuard = ArcRwLockWriteGuard<RawRwLock, Node>;

/// One node of the binary search tree.
///
/// A node owns its key and value plus the links to its children. The node's
/// rwlock lives in the surrounding [`NodeRef`]; descent code locks a node
/// before reading or rewriting any of these fields.
pub(crate) struct Node {
    pub key: String,
    pub value: String,
    pub left: Option<NodeRef>,
    pub right: Option<NodeRef>,
}

impl Node {
    /// constructs a leaf node, enforcing the per-entry size limit
    ///
    /// # Errors
    /// returns [`DbError::EntryTooLong`] if the key or the value exceeds
    /// [`MAX_ENTRY_LEN`] bytes
    pub fn new(key: &str, value: &str) -> Result<Node> {
        if key.len() > MAX_ENTRY_LEN || value.len() > MAX_ENTRY_LEN {
            return Err(DbError::EntryTooLong);
        }
        Ok(Node {
            key: key.to_string(),
            value: value.to_string(),
            left: None,
            right: None,
        })
    }

    /// the sentinel placed at the top of the tree; its empty key orders
    /// before every real key, so all data lives in its right subtree
    pub fn sentinel() -> Node {
        Node {
            key: String::new(),
            value: String::new(),
            left: None,
            right: None,
        }
    }

    /// wraps this node in its shared, lockable handle
    pub fn into_ref(self) -> NodeRef {
        Arc::new(RwLock::new(self))
    }
}
