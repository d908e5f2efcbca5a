//! Hierarchical native-memory accounting.
//!
//! The tree shape is: root -> per-producer child -> per-stream `base` and
//! `transmit` children (each capped by `maxStreamMemory`) -> per-partition
//! children (uncapped within the stream cap). Every column chunk, builder
//! and flush snapshot is attributed to an explicit child via a
//! [`Reservation`]; releasing a child is a no-op while it still has
//! outstanding reservations, and failing to release everything before
//! `close()` is a usage error (`LeakedBuffers`, modeled here as
//! [`Error::Internal`]).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errors::Error;

struct Inner {
    name: String,
    cap: Option<usize>,
    reserved: AtomicUsize,
    parent: Option<Node>,
}

/// A node in the allocator tree. Cheap to clone (an `Arc` handle).
#[derive(Clone)]
pub struct Node(Arc<Inner>);

impl Node {
    /// Creates a new root node with an optional global cap.
    pub fn root(cap: Option<usize>) -> Self {
        Node(Arc::new(Inner {
            name: "root".to_string(),
            cap,
            reserved: AtomicUsize::new(0),
            parent: None,
        }))
    }

    /// Creates a child of `self` with its own cap (independent of, but
    /// still bounded by, every ancestor's cap).
    pub fn new_child(&self, name: impl Into<String>, cap: Option<usize>) -> Node {
        Node(Arc::new(Inner {
            name: name.into(),
            cap,
            reserved: AtomicUsize::new(0),
            parent: Some(self.clone()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Bytes currently reserved directly under this node (not counting
    /// children, which each track their own reservations independently).
    pub fn reserved(&self) -> usize {
        self.0.reserved.load(Ordering::SeqCst)
    }

    /// Reserves `nbytes`, failing with `OutOfMemory` if doing so would
    /// push this node or any ancestor over its cap. On failure no
    /// reservation is left behind anywhere on the path.
    pub fn allocate(&self, nbytes: usize) -> Result<Reservation, Error> {
        // Walk from self to root checking caps before committing anything,
        // so a failure deep in the tree never leaves a partial reservation.
        let mut node = Some(self.clone());
        while let Some(n) = node {
            if let Some(cap) = n.0.cap {
                let current = n.0.reserved.load(Ordering::SeqCst);
                if current + nbytes > cap {
                    return Err(Error::OutOfMemory {
                        child: n.0.name.clone(),
                        requested: nbytes,
                    });
                }
            }
            node = n.0.parent.clone();
        }

        let mut node = Some(self.clone());
        while let Some(n) = node {
            n.0.reserved.fetch_add(nbytes, Ordering::SeqCst);
            node = n.0.parent.clone();
        }

        Ok(Reservation {
            node: self.clone(),
            nbytes,
        })
    }

    fn release(&self, nbytes: usize) {
        let mut node = Some(self.clone());
        while let Some(n) = node {
            n.0.reserved.fetch_sub(nbytes, Ordering::SeqCst);
            node = n.0.parent.clone();
        }
    }

    /// Closes this node. Requires zero outstanding reservations directly
    /// on the node; the caller is responsible for closing children before
    /// their parents (post-order teardown).
    pub fn close(&self) -> Result<(), Error> {
        if self.reserved() != 0 {
            return Err(Error::Internal(format!(
                "LeakedBuffers: '{}' closed with {} bytes still reserved",
                self.0.name,
                self.reserved()
            )));
        }
        Ok(())
    }
}

/// RAII handle for a single memory reservation. Dropping it releases the
/// bytes back up the tree; this is how buffer ownership transfer between
/// allocators is modeled — `transferTo` moves a `Reservation` rather than
/// copying the reserved bytes.
pub struct Reservation {
    node: Node,
    nbytes: usize,
}

impl Reservation {
    pub fn bytes(&self) -> usize {
        self.nbytes
    }

    /// Moves this reservation's accounting from its current node onto
    /// `dest`, without touching the underlying buffer. Used by
    /// `ColumnBuilder::transfer_to`.
    pub fn transfer_to(mut self, dest: &Node) -> Result<Reservation, Error> {
        let nbytes = self.nbytes;
        self.nbytes = 0; // disarm this reservation's Drop release
        self.node.release(nbytes);
        dest.allocate(nbytes)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.nbytes > 0 {
            self.node.release(self.nbytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_release_returns_to_zero() {
        let root = Node::root(Some(1024));
        {
            let r = root.allocate(100).unwrap();
            assert_eq!(root.reserved(), 100);
            drop(r);
        }
        assert_eq!(root.reserved(), 0);
        assert!(root.close().is_ok());
    }

    #[test]
    fn cap_exceeded_fails_without_partial_reservation() {
        let root = Node::root(Some(100));
        let child = root.new_child("stream", Some(1000));
        assert!(child.allocate(200).is_err());
        assert_eq!(root.reserved(), 0);
        assert_eq!(child.reserved(), 0);
    }

    #[test]
    fn child_cap_independent_of_sibling() {
        let root = Node::root(None);
        let a = root.new_child("a", Some(10));
        let b = root.new_child("b", Some(10));
        let _ra = a.allocate(10).unwrap();
        // b's own cap is untouched by a's reservation.
        let _rb = b.allocate(10).unwrap();
        assert_eq!(root.reserved(), 20);
    }

    #[test]
    fn close_with_outstanding_buffers_is_leaked_buffers() {
        let root = Node::root(None);
        let _r = root.allocate(8).unwrap();
        assert!(root.close().is_err());
    }

    #[test]
    fn transfer_moves_ownership_without_copy() {
        let root = Node::root(None);
        let base = root.new_child("base", None);
        let transmit = root.new_child("transmit", None);
        let r = base.allocate(64).unwrap();
        assert_eq!(base.reserved(), 64);
        let r2 = r.transfer_to(&transmit).unwrap();
        assert_eq!(base.reserved(), 0);
        assert_eq!(transmit.reserved(), 64);
        drop(r2);
        assert_eq!(transmit.reserved(), 0);
    }
}
