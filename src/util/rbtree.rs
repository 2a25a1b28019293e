//! An intrusive red-black tree.
//!
//! The tree never allocates. Each element embeds an [`RBNode`] (parent, left and right links;
//! the color lives in the lowest bit of the parent link), and the caller hands pointers to those
//! embedded nodes to the tree. The ordering comes from a [`RBTreeComparator`], which knows how to
//! get a key out of the element that surrounds an `RBNode`.
//!
//! Keys are unique within a tree. Inserting is a two step process: [`IntrusiveRBTree::cursor`]
//! finds either the node with the key or the spot where it would go, and
//! [`IntrusiveRBTree::insert_at_cursor`] links a new node in at that spot.
//!
//! The tree is not thread safe. Precondition violations (linking a node twice, removing a node
//! from a tree it does not belong to, using a stale cursor) are only caught by debug assertions.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// A pointer to a node that is embedded in some element.
pub type NodePtr = NonNull<RBNode>;
type Link = Option<NodePtr>;

const COLOR_MASK: usize = 1;
const RED: usize = 0;
const BLACK: usize = 1;

/// The linkage embedded in each tree element.
#[repr(C)]
#[derive(Debug)]
pub struct RBNode {
    // Parent pointer, with the color in the lowest bit.
    parent: usize,
    left: Link,
    right: Link,
}

static_assertions::const_assert!(std::mem::align_of::<RBNode>() > COLOR_MASK);

impl Default for RBNode {
    fn default() -> Self {
        Self::new()
    }
}

impl RBNode {
    /// An unlinked node.
    pub const fn new() -> Self {
        RBNode {
            parent: RED,
            left: None,
            right: None,
        }
    }

    pub fn parent(&self) -> Option<NodePtr> {
        NonNull::new((self.parent & !COLOR_MASK) as *mut RBNode)
    }

    pub fn left(&self) -> Option<NodePtr> {
        self.left
    }

    pub fn right(&self) -> Option<NodePtr> {
        self.right
    }

    pub fn is_black(&self) -> bool {
        self.parent & COLOR_MASK == BLACK
    }

    pub fn is_red(&self) -> bool {
        self.parent & COLOR_MASK == RED
    }

    fn set_parent(&mut self, parent: Link) {
        let color = self.parent & COLOR_MASK;
        self.parent = parent.map_or(0, |p| p.as_ptr() as usize) | color;
    }

    fn set_black(&mut self) {
        self.parent |= BLACK;
    }

    fn set_red(&mut self) {
        self.parent &= !COLOR_MASK;
    }

    fn set_color_black(&mut self, black: bool) {
        if black {
            self.set_black()
        } else {
            self.set_red()
        }
    }

    fn unlink(&mut self) {
        *self = RBNode::new();
    }

    /// Is this node the right child of its parent?
    pub fn is_right_child(&self) -> bool {
        match self.parent() {
            Some(p) => unsafe { p.as_ref() }.right == Some(NonNull::from(self)),
            None => false,
        }
    }

    /// The in-order successor of this node.
    pub fn next(&self) -> Option<NodePtr> {
        if let Some(r) = self.right {
            return Some(unsafe { leftmost_of(r) });
        }
        let mut cur = NonNull::from(self);
        let mut parent = self.parent();
        while let Some(p) = parent {
            let p_ref = unsafe { p.as_ref() };
            if p_ref.right != Some(cur) {
                break;
            }
            cur = p;
            parent = p_ref.parent();
        }
        parent
    }

    /// The in-order predecessor of this node.
    pub fn prev(&self) -> Option<NodePtr> {
        if let Some(l) = self.left {
            return Some(unsafe { rightmost_of(l) });
        }
        let mut cur = NonNull::from(self);
        let mut parent = self.parent();
        while let Some(p) = parent {
            let p_ref = unsafe { p.as_ref() };
            if p_ref.left != Some(cur) {
                break;
            }
            cur = p;
            parent = p_ref.parent();
        }
        parent
    }
}

// Raw accessors. All of them require `n` to point to a live node.

unsafe fn r<'a>(n: NodePtr) -> &'a RBNode {
    &*n.as_ptr()
}

unsafe fn w<'a>(n: NodePtr) -> &'a mut RBNode {
    &mut *n.as_ptr()
}

fn is_black_link(l: Link) -> bool {
    l.map_or(true, |n| unsafe { r(n) }.is_black())
}

fn is_red_link(l: Link) -> bool {
    !is_black_link(l)
}

unsafe fn leftmost_of(mut n: NodePtr) -> NodePtr {
    while let Some(l) = r(n).left {
        n = l;
    }
    n
}

unsafe fn rightmost_of(mut n: NodePtr) -> NodePtr {
    while let Some(rt) = r(n).right {
        n = rt;
    }
    n
}

/// Tells the tree how to order its nodes.
pub trait RBTreeComparator {
    type Key: Ord + Copy + fmt::Debug;

    /// Get the key of the element that embeds `node`.
    ///
    /// # Safety
    /// `node` must be embedded in a live element of the type this comparator is written for.
    unsafe fn key_of(node: NodePtr) -> Self::Key;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// The result of a lookup: either an existing node with the key, or the place where a node
/// with the key would be linked. A cursor is invalidated by any modification of the tree.
#[derive(Clone, Copy, Debug)]
pub struct Cursor {
    parent: Link,
    side: Side,
    node: Link,
}

impl Cursor {
    /// Did the lookup find a node with the key?
    pub fn found(&self) -> bool {
        self.node.is_some()
    }

    /// The node with the key, if found.
    pub fn node(&self) -> Option<NodePtr> {
        self.node
    }
}

/// See the module documentation.
pub struct IntrusiveRBTree<C: RBTreeComparator> {
    root: Link,
    num_nodes: usize,
    _comparator: PhantomData<C>,
}

// The tree is not thread-safe. It needs external synchronisation (e.g. using Mutex).
// On the other hand, to put the tree into a Mutex<T>, it must implement Send.
// There is no problem sending the tree between threads.
unsafe impl<C: RBTreeComparator> Send for IntrusiveRBTree<C> {}

impl<C: RBTreeComparator> Default for IntrusiveRBTree<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: RBTreeComparator> IntrusiveRBTree<C> {
    pub const fn new() -> Self {
        IntrusiveRBTree {
            root: None,
            num_nodes: 0,
            _comparator: PhantomData,
        }
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        self.num_nodes
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<NodePtr> {
        self.root
    }

    fn key_of(n: NodePtr) -> C::Key {
        // Every node reachable from the tree was handed to us through one of the unsafe
        // insertion methods, whose contract is that the node stays alive while linked.
        unsafe { C::key_of(n) }
    }

    /// Walk down from `start` (which sits at `(parent, side)`) to find `key`.
    fn descend(&self, mut parent: Link, mut side: Side, start: Link, key: C::Key) -> Cursor {
        let mut cur = start;
        while let Some(n) = cur {
            match key.cmp(&Self::key_of(n)) {
                Ordering::Equal => {
                    return Cursor {
                        parent,
                        side,
                        node: Some(n),
                    }
                }
                Ordering::Less => {
                    parent = Some(n);
                    side = Side::Left;
                    cur = unsafe { r(n) }.left;
                }
                Ordering::Greater => {
                    parent = Some(n);
                    side = Side::Right;
                    cur = unsafe { r(n) }.right;
                }
            }
        }
        Cursor {
            parent,
            side,
            node: None,
        }
    }

    fn cursor_at(n: NodePtr) -> Cursor {
        let node = unsafe { r(n) };
        let side = if node.is_right_child() {
            Side::Right
        } else {
            Side::Left
        };
        Cursor {
            parent: node.parent(),
            side,
            node: Some(n),
        }
    }

    /// Find the node with `key`, or the place where it would be inserted.
    pub fn cursor(&self, key: C::Key) -> Cursor {
        self.descend(None, Side::Left, self.root, key)
    }

    /// Like [`Self::cursor`], but start the search from `hint`, a node of this tree that is
    /// expected to be close to `key`. Repeated lookups of nearby keys then only walk the short
    /// distance between the keys instead of the full height of the tree. The result is the same
    /// as the one of [`Self::cursor`].
    ///
    /// # Safety
    /// `hint` must be linked into this tree.
    pub unsafe fn cursor_with_hint(&self, key: C::Key, hint: NodePtr) -> Cursor {
        // Walk up until we reach the lowest node whose subtree covers the key, i.e. the node
        // whose nearest ancestors on both sides bound the key.
        let mut candidate = hint;
        let mut x = hint;
        let mut lower_bound_ok = false;
        let mut upper_bound_ok = false;
        while let Some(p) = r(x).parent() {
            let pk = Self::key_of(p);
            if key == pk {
                return Self::cursor_at(p);
            }
            if r(p).left == Some(x) {
                // `p` bounds the subtree of `x` from above.
                if !upper_bound_ok {
                    if key < pk {
                        upper_bound_ok = true;
                    } else {
                        candidate = p;
                        lower_bound_ok = false;
                    }
                }
            } else if !lower_bound_ok {
                // `p` bounds the subtree of `x` from below.
                if key > pk {
                    lower_bound_ok = true;
                } else {
                    candidate = p;
                    upper_bound_ok = false;
                }
            }
            if lower_bound_ok && upper_bound_ok {
                break;
            }
            x = p;
        }
        let start = Self::cursor_at(candidate);
        self.descend(start.parent, start.side, Some(candidate), key)
    }

    /// Find the node with `key`.
    pub fn find_node(&self, key: C::Key) -> Option<NodePtr> {
        self.cursor(key).node
    }

    /// Link `node` into the tree at the place described by `cursor`, then rebalance.
    ///
    /// # Safety
    /// `cursor` must come from this tree, must not have found a node, and must not have been
    /// invalidated by a modification of the tree. `node` must not be linked into any tree, its
    /// key must be the key the cursor was created for, and it must stay alive until it is
    /// removed from the tree.
    pub unsafe fn insert_at_cursor(&mut self, node: NodePtr, cursor: &Cursor) {
        debug_assert!(!cursor.found(), "a node with this key exists already");
        let n = w(node);
        n.unlink();
        n.set_parent(cursor.parent);
        match cursor.parent {
            None => {
                debug_assert!(self.root.is_none());
                self.root = Some(node);
            }
            Some(p) => match cursor.side {
                Side::Left => {
                    debug_assert!(r(p).left.is_none());
                    w(p).left = Some(node);
                }
                Side::Right => {
                    debug_assert!(r(p).right.is_none());
                    w(p).right = Some(node);
                }
            },
        }
        self.num_nodes += 1;
        self.fix_insert_violations(node);
    }

    /// Insert `node` under its own key. Returns false, and leaves the tree unchanged, if a node
    /// with the same key exists already.
    ///
    /// # Safety
    /// Same as [`Self::insert_at_cursor`].
    pub unsafe fn insert(&mut self, node: NodePtr) -> bool {
        let cursor = self.cursor(C::key_of(node));
        if cursor.found() {
            return false;
        }
        self.insert_at_cursor(node, &cursor);
        true
    }

    /// Remove the node found by `cursor`.
    ///
    /// # Safety
    /// `cursor` must come from this tree, must have found a node, and must not have been
    /// invalidated by a modification of the tree.
    pub unsafe fn remove_at_cursor(&mut self, cursor: &Cursor) {
        let node = cursor.node.expect("cursor does not point to a node");
        self.remove(node);
    }

    /// Unlink `node` from the tree, then rebalance.
    ///
    /// # Safety
    /// `node` must be linked into this tree.
    pub unsafe fn remove(&mut self, node: NodePtr) {
        debug_assert!(self.num_nodes > 0);
        if r(node).left.is_some() && r(node).right.is_some() {
            // Swap places with the in-order successor, which has no left child. Afterwards the
            // node has at most one child.
            let succ = leftmost_of(r(node).right.unwrap());
            self.swap_with_successor(node, succ);
        }

        let child = r(node).left.or(r(node).right);
        let parent = r(node).parent();
        if let Some(c) = child {
            // A node with a single child is black, and the child is a red leaf.
            debug_assert!(r(node).is_black() && r(c).is_red());
            self.replace_child(parent, node, Some(c));
            w(c).set_parent(parent);
            w(c).set_black();
        } else {
            if r(node).is_black() && parent.is_some() {
                // Removing a black leaf shortens all paths through it. Rebalance while the node
                // is still in place, then cut it off.
                self.fix_remove_violations(node);
            }
            let parent = r(node).parent();
            self.replace_child(parent, node, None);
        }

        self.num_nodes -= 1;
        w(node).unlink();
    }

    /// Node with the largest key less than or equal to `key`.
    pub fn closest_leq(&self, key: C::Key) -> Option<NodePtr> {
        let mut best = None;
        let mut cur = self.root;
        while let Some(n) = cur {
            match Self::key_of(n).cmp(&key) {
                Ordering::Equal => return Some(n),
                Ordering::Less => {
                    best = Some(n);
                    cur = unsafe { r(n) }.right;
                }
                Ordering::Greater => cur = unsafe { r(n) }.left,
            }
        }
        best
    }

    /// Node with the smallest key strictly greater than `key`.
    pub fn closest_gt(&self, key: C::Key) -> Option<NodePtr> {
        let mut best = None;
        let mut cur = self.root;
        while let Some(n) = cur {
            if Self::key_of(n) > key {
                best = Some(n);
                cur = unsafe { r(n) }.left;
            } else {
                cur = unsafe { r(n) }.right;
            }
        }
        best
    }

    /// Node with the smallest key greater than or equal to `key`.
    pub fn closest_geq(&self, key: C::Key) -> Option<NodePtr> {
        let mut best = None;
        let mut cur = self.root;
        while let Some(n) = cur {
            match Self::key_of(n).cmp(&key) {
                Ordering::Equal => return Some(n),
                Ordering::Greater => {
                    best = Some(n);
                    cur = unsafe { r(n) }.left;
                }
                Ordering::Less => cur = unsafe { r(n) }.right,
            }
        }
        best
    }

    pub fn leftmost(&self) -> Option<NodePtr> {
        self.root.map(|n| unsafe { leftmost_of(n) })
    }

    pub fn rightmost(&self) -> Option<NodePtr> {
        self.root.map(|n| unsafe { rightmost_of(n) })
    }

    /// Call `f` on every node in key order. `f` must not modify the tree.
    pub fn visit_in_order<F: FnMut(NodePtr)>(&self, mut f: F) {
        let mut cur = self.leftmost();
        while let Some(n) = cur {
            cur = unsafe { r(n) }.next();
            f(n);
        }
    }

    // Rebalancing

    fn replace_child(&mut self, parent: Link, old: NodePtr, new: Link) {
        match parent {
            None => self.root = new,
            Some(p) => unsafe {
                if r(p).left == Some(old) {
                    w(p).left = new;
                } else {
                    debug_assert_eq!(r(p).right, Some(old));
                    w(p).right = new;
                }
            },
        }
    }

    unsafe fn rotate_left(&mut self, x: NodePtr) {
        let y = r(x).right.expect("rotate_left needs a right child");
        let y_left = r(y).left;
        w(x).right = y_left;
        if let Some(yl) = y_left {
            w(yl).set_parent(Some(x));
        }
        let xp = r(x).parent();
        w(y).set_parent(xp);
        self.replace_child(xp, x, Some(y));
        w(y).left = Some(x);
        w(x).set_parent(Some(y));
    }

    unsafe fn rotate_right(&mut self, x: NodePtr) {
        let y = r(x).left.expect("rotate_right needs a left child");
        let y_right = r(y).right;
        w(x).left = y_right;
        if let Some(yr) = y_right {
            w(yr).set_parent(Some(x));
        }
        let xp = r(x).parent();
        w(y).set_parent(xp);
        self.replace_child(xp, x, Some(y));
        w(y).right = Some(x);
        w(x).set_parent(Some(y));
    }

    /// Exchange the tree positions (and colors) of `a` and its in-order successor `s`.
    /// `a` has two children and `s` is the leftmost node of `a`'s right subtree.
    unsafe fn swap_with_successor(&mut self, a: NodePtr, s: NodePtr) {
        debug_assert!(r(s).left.is_none());
        let a_parent = r(a).parent();
        let a_left = r(a).left.unwrap();
        let a_right = r(a).right.unwrap();
        let s_parent = r(s).parent().unwrap();
        let s_right = r(s).right;
        let a_black = r(a).is_black();
        let s_black = r(s).is_black();

        self.replace_child(a_parent, a, Some(s));
        w(s).set_parent(a_parent);
        w(s).left = Some(a_left);
        w(a_left).set_parent(Some(s));
        if a_right == s {
            w(s).right = Some(a);
            w(a).set_parent(Some(s));
        } else {
            w(s).right = Some(a_right);
            w(a_right).set_parent(Some(s));
            w(s_parent).left = Some(a);
            w(a).set_parent(Some(s_parent));
        }
        w(a).left = None;
        w(a).right = s_right;
        if let Some(sr) = s_right {
            w(sr).set_parent(Some(a));
        }

        w(a).set_color_black(s_black);
        w(s).set_color_black(a_black);
    }

    unsafe fn fix_insert_violations(&mut self, mut n: NodePtr) {
        w(n).set_red();
        loop {
            let Some(mut p) = r(n).parent() else {
                w(n).set_black();
                return;
            };
            if r(p).is_black() {
                return;
            }
            let Some(g) = r(p).parent() else {
                // Red root. Recolor.
                w(p).set_black();
                return;
            };
            if r(g).left == Some(p) {
                let uncle = r(g).right;
                if is_red_link(uncle) {
                    w(p).set_black();
                    w(uncle.unwrap()).set_black();
                    w(g).set_red();
                    n = g;
                    continue;
                }
                if r(p).right == Some(n) {
                    self.rotate_left(p);
                    n = p;
                    p = r(n).parent().unwrap();
                }
                w(p).set_black();
                w(g).set_red();
                self.rotate_right(g);
                return;
            } else {
                let uncle = r(g).left;
                if is_red_link(uncle) {
                    w(p).set_black();
                    w(uncle.unwrap()).set_black();
                    w(g).set_red();
                    n = g;
                    continue;
                }
                if r(p).left == Some(n) {
                    self.rotate_right(p);
                    n = p;
                    p = r(n).parent().unwrap();
                }
                w(p).set_black();
                w(g).set_red();
                self.rotate_left(g);
                return;
            }
        }
    }

    /// `node` is a black leaf that is about to be removed. Restore the black height of all
    /// paths through it, treating it as "doubly black".
    unsafe fn fix_remove_violations(&mut self, node: NodePtr) {
        let mut x = node;
        while Some(x) != self.root && r(x).is_black() {
            let p = r(x).parent().unwrap();
            if r(p).left == Some(x) {
                let mut s = r(p).right.expect("black node without sibling");
                if r(s).is_red() {
                    w(s).set_black();
                    w(p).set_red();
                    self.rotate_left(p);
                    s = r(p).right.unwrap();
                }
                if is_black_link(r(s).left) && is_black_link(r(s).right) {
                    w(s).set_red();
                    x = p;
                } else {
                    if is_black_link(r(s).right) {
                        w(r(s).left.unwrap()).set_black();
                        w(s).set_red();
                        self.rotate_right(s);
                        s = r(p).right.unwrap();
                    }
                    w(s).set_color_black(r(p).is_black());
                    w(p).set_black();
                    w(r(s).right.unwrap()).set_black();
                    self.rotate_left(p);
                    x = self.root.unwrap();
                }
            } else {
                let mut s = r(p).left.expect("black node without sibling");
                if r(s).is_red() {
                    w(s).set_black();
                    w(p).set_red();
                    self.rotate_right(p);
                    s = r(p).left.unwrap();
                }
                if is_black_link(r(s).left) && is_black_link(r(s).right) {
                    w(s).set_red();
                    x = p;
                } else {
                    if is_black_link(r(s).left) {
                        w(r(s).right.unwrap()).set_black();
                        w(s).set_red();
                        self.rotate_left(s);
                        s = r(p).left.unwrap();
                    }
                    w(s).set_color_black(r(p).is_black());
                    w(p).set_black();
                    w(r(s).left.unwrap()).set_black();
                    self.rotate_right(p);
                    x = self.root.unwrap();
                }
            }
        }
        w(x).set_black();
    }

    // Verification

    /// Check all tree invariants. Panics on violation.
    pub fn verify_self(&self) {
        self.verify_self_with(|_| {})
    }

    /// Check all tree invariants, and call `f` on every node so that the caller can check the
    /// elements too. Panics on violation.
    ///
    /// Checked are: the root is black, no red node has a red child, all paths from the root to
    /// a leaf have the same number of black nodes, parent links match child links, keys are
    /// strictly ordered, the node count matches, and the depth is at most `2 * log2(n + 1)`.
    pub fn verify_self_with<F: FnMut(NodePtr)>(&self, mut f: F) {
        let Some(root) = self.root else {
            assert_eq!(self.num_nodes, 0, "empty tree with nonzero node count");
            return;
        };
        let root_ref = unsafe { r(root) };
        assert!(root_ref.is_black(), "root must be black");
        assert!(root_ref.parent().is_none(), "root must not have a parent");

        let mut state = VerifyState {
            black_height: None,
            count: 0,
            max_depth: 0,
        };
        self.verify_node(root, None, None, 1, 0, &mut state, &mut f);

        assert_eq!(state.count, self.num_nodes, "node count mismatch");
        let max_allowed = 2.0 * ((state.count + 1) as f64).log2();
        assert!(
            state.max_depth as f64 <= max_allowed,
            "tree too deep: depth {} with {} nodes",
            state.max_depth,
            state.count
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_node<F: FnMut(NodePtr)>(
        &self,
        n: NodePtr,
        lower: Option<C::Key>,
        upper: Option<C::Key>,
        depth: usize,
        blacks_above: usize,
        state: &mut VerifyState,
        f: &mut F,
    ) {
        let node = unsafe { r(n) };
        let key = Self::key_of(n);
        if let Some(lo) = lower {
            assert!(key > lo, "key {:?} not greater than lower bound {:?}", key, lo);
        }
        if let Some(hi) = upper {
            assert!(key < hi, "key {:?} not less than upper bound {:?}", key, hi);
        }
        if node.is_red() {
            assert!(
                is_black_link(node.left) && is_black_link(node.right),
                "red node {:?} has a red child",
                key
            );
        }
        state.count += 1;
        state.max_depth = state.max_depth.max(depth);
        let blacks = blacks_above + node.is_black() as usize;

        for (child, lo, hi) in [
            (node.left, lower, Some(key)),
            (node.right, Some(key), upper),
        ] {
            match child {
                Some(c) => {
                    assert_eq!(unsafe { r(c) }.parent(), Some(n), "broken parent link");
                    self.verify_node(c, lo, hi, depth + 1, blacks, state, f);
                }
                None => match state.black_height {
                    None => state.black_height = Some(blacks),
                    Some(h) => assert_eq!(h, blacks, "black height differs at {:?}", key),
                },
            }
        }
        f(n);
    }

    // Printing

    /// Print the tree structure, one node per line, indented by depth.
    pub fn print_on(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        self.print_on_with(out, |_, _| Ok(()))
    }

    /// Like [`Self::print_on`], with `f` appending element details to each node's line.
    pub fn print_on_with<F>(&self, out: &mut dyn fmt::Write, mut f: F) -> fmt::Result
    where
        F: FnMut(&mut dyn fmt::Write, NodePtr) -> fmt::Result,
    {
        if let Some(root) = self.root {
            self.print_node(out, root, 0, &mut f)?;
        }
        Ok(())
    }

    fn print_node<F>(
        &self,
        out: &mut dyn fmt::Write,
        n: NodePtr,
        depth: usize,
        f: &mut F,
    ) -> fmt::Result
    where
        F: FnMut(&mut dyn fmt::Write, NodePtr) -> fmt::Result,
    {
        let node = unsafe { r(n) };
        write!(
            out,
            "{:indent$}{:?} ({})",
            "",
            Self::key_of(n),
            if node.is_black() { "B" } else { "R" },
            indent = depth * 2
        )?;
        f(out, n)?;
        writeln!(out)?;
        if let Some(l) = node.left {
            self.print_node(out, l, depth + 1, f)?;
        }
        if let Some(rt) = node.right {
            self.print_node(out, rt, depth + 1, f)?;
        }
        Ok(())
    }
}

struct VerifyState {
    black_height: Option<usize>,
    count: usize,
    max_depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeSet;

    #[repr(C)]
    struct IntNode {
        link: RBNode,
        key: i64,
    }

    struct IntComparator;

    impl RBTreeComparator for IntComparator {
        type Key = i64;
        unsafe fn key_of(node: NodePtr) -> i64 {
            (*(node.as_ptr() as *const IntNode)).key
        }
    }

    type IntTree = IntrusiveRBTree<IntComparator>;

    /// Owns the nodes. Boxes keep their addresses stable.
    struct Nodes(Vec<Box<IntNode>>);

    impl Nodes {
        fn new(keys: impl IntoIterator<Item = i64>) -> Self {
            Nodes(
                keys.into_iter()
                    .map(|key| {
                        Box::new(IntNode {
                            link: RBNode::new(),
                            key,
                        })
                    })
                    .collect(),
            )
        }

        fn ptr(&mut self, i: usize) -> NodePtr {
            NonNull::from(&mut self.0[i].link)
        }
    }

    fn key(n: NodePtr) -> i64 {
        unsafe { IntComparator::key_of(n) }
    }

    fn keys_in_order(tree: &IntTree) -> Vec<i64> {
        let mut keys = vec![];
        tree.visit_in_order(|n| keys.push(key(n)));
        keys
    }

    #[test]
    fn empty_tree() {
        let tree = IntTree::new();
        assert!(tree.is_empty());
        assert_eq!(tree.size(), 0);
        assert!(tree.closest_leq(10).is_none());
        assert!(tree.closest_gt(10).is_none());
        assert!(tree.closest_geq(10).is_none());
        assert!(tree.leftmost().is_none());
        assert!(!tree.cursor(10).found());
        tree.verify_self();
    }

    #[test]
    fn insert_ascending_and_descending() {
        for keys in [(0..1000).collect::<Vec<i64>>(), (0..1000).rev().collect()] {
            let mut nodes = Nodes::new(keys.iter().copied());
            let mut tree = IntTree::new();
            for i in 0..keys.len() {
                assert!(unsafe { tree.insert(nodes.ptr(i)) });
            }
            tree.verify_self();
            assert_eq!(tree.size(), 1000);
            assert_eq!(key(tree.leftmost().unwrap()), 0);
            assert_eq!(key(tree.rightmost().unwrap()), 999);
            assert_eq!(keys_in_order(&tree), (0..1000).collect::<Vec<_>>());
        }
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let mut nodes = Nodes::new([5, 5]);
        let mut tree = IntTree::new();
        assert!(unsafe { tree.insert(nodes.ptr(0)) });
        assert!(!unsafe { tree.insert(nodes.ptr(1)) });
        assert_eq!(tree.size(), 1);
        assert_eq!(tree.find_node(5), Some(nodes.ptr(0)));
    }

    #[test]
    fn closest_queries() {
        let mut nodes = Nodes::new((0..50).map(|k| k * 10));
        let mut tree = IntTree::new();
        for i in 0..50 {
            unsafe { tree.insert(nodes.ptr(i)) };
        }
        assert_eq!(tree.closest_leq(35).map(key), Some(30));
        assert_eq!(tree.closest_leq(30).map(key), Some(30));
        assert_eq!(tree.closest_leq(-1).map(key), None);
        assert_eq!(tree.closest_gt(30).map(key), Some(40));
        assert_eq!(tree.closest_gt(490).map(key), None);
        assert_eq!(tree.closest_geq(31).map(key), Some(40));
        assert_eq!(tree.closest_geq(40).map(key), Some(40));
        assert_eq!(tree.closest_geq(491).map(key), None);
    }

    #[test]
    fn next_and_prev() {
        let mut nodes = Nodes::new(0..100);
        let mut tree = IntTree::new();
        for i in 0..100 {
            unsafe { tree.insert(nodes.ptr(i)) };
        }
        let mut cur = tree.leftmost();
        let mut expected = 0;
        while let Some(n) = cur {
            assert_eq!(key(n), expected);
            expected += 1;
            cur = unsafe { n.as_ref() }.next();
        }
        assert_eq!(expected, 100);

        let mut cur = tree.rightmost();
        while let Some(n) = cur {
            expected -= 1;
            assert_eq!(key(n), expected);
            cur = unsafe { n.as_ref() }.prev();
        }
        assert_eq!(expected, 0);
    }

    #[test]
    fn remove_at_cursor() {
        let mut nodes = Nodes::new(0..20);
        let mut tree = IntTree::new();
        for i in 0..20 {
            unsafe { tree.insert(nodes.ptr(i)) };
        }
        for k in (0..20).step_by(2) {
            let cursor = tree.cursor(k);
            assert!(cursor.found());
            unsafe { tree.remove_at_cursor(&cursor) };
            tree.verify_self();
        }
        assert_eq!(keys_in_order(&tree), (1..20).step_by(2).collect::<Vec<_>>());
        assert!(tree.find_node(4).is_none());
    }

    #[test]
    fn random_insert_remove_against_model() {
        const N: usize = 512;
        let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
        let mut nodes = Nodes::new((0..N as i64).map(|k| k * 3));
        let mut linked = vec![false; N];
        let mut model = BTreeSet::new();
        let mut tree = IntTree::new();

        for step in 0..4000 {
            let i = rng.random_range(0..N);
            let k = (i as i64) * 3;
            if linked[i] {
                unsafe { tree.remove(nodes.ptr(i)) };
                model.remove(&k);
            } else {
                let cursor = tree.cursor(k);
                assert!(!cursor.found());
                unsafe { tree.insert_at_cursor(nodes.ptr(i), &cursor) };
                model.insert(k);
            }
            linked[i] = !linked[i];
            assert_eq!(tree.size(), model.len());

            if step % 16 == 0 {
                tree.verify_self();
            }

            let probe = rng.random_range(-2..(N as i64 * 3 + 2));
            assert_eq!(
                tree.closest_leq(probe).map(key),
                model.range(..=probe).next_back().copied()
            );
            assert_eq!(
                tree.closest_geq(probe).map(key),
                model.range(probe..).next().copied()
            );
            assert_eq!(
                tree.closest_gt(probe).map(key),
                model.range(probe + 1..).next().copied()
            );
        }
        tree.verify_self();
        assert_eq!(keys_in_order(&tree), model.iter().copied().collect::<Vec<_>>());
    }

    #[test]
    fn remove_everything_in_random_order() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut nodes = Nodes::new(0..300);
        let mut tree = IntTree::new();
        for i in 0..300 {
            unsafe { tree.insert(nodes.ptr(i)) };
        }
        let mut order: Vec<usize> = (0..300).collect();
        order.shuffle(&mut rng);
        for i in order {
            unsafe { tree.remove(nodes.ptr(i)) };
            tree.verify_self();
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn cursor_with_hint_matches_cursor() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut nodes = Nodes::new((0..200).map(|k| k * 2));
        let mut tree = IntTree::new();
        for i in 0..200 {
            unsafe { tree.insert(nodes.ptr(i)) };
        }
        for _ in 0..2000 {
            let hint = nodes.ptr(rng.random_range(0..200));
            let k = rng.random_range(-3..403);
            let plain = tree.cursor(k);
            let hinted = unsafe { tree.cursor_with_hint(k, hint) };
            assert_eq!(plain.found(), hinted.found());
            assert_eq!(plain.node(), hinted.node());
            assert_eq!(plain.parent, hinted.parent);
            assert_eq!(plain.side, hinted.side);
        }
    }

    #[test]
    fn insert_with_hint() {
        // Nearby insertions, each using the previously inserted node as hint.
        let mut nodes = Nodes::new((0..500).map(|k| if k % 2 == 0 { k } else { 1000 - k }));
        let mut tree = IntTree::new();
        let mut hint: Option<NodePtr> = None;
        for i in 0..500 {
            let n = nodes.ptr(i);
            let k = key(n);
            let cursor = match hint {
                Some(h) => unsafe { tree.cursor_with_hint(k, h) },
                None => tree.cursor(k),
            };
            unsafe { tree.insert_at_cursor(n, &cursor) };
            hint = Some(n);
        }
        tree.verify_self();
        assert_eq!(tree.size(), 500);
        let keys = keys_in_order(&tree);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn verify_with_visits_every_node() {
        let mut nodes = Nodes::new(0..64);
        let mut tree = IntTree::new();
        for i in 0..64 {
            unsafe { tree.insert(nodes.ptr(i)) };
        }
        let mut visited = 0;
        tree.verify_self_with(|_| visited += 1);
        assert_eq!(visited, 64);
    }

    #[test]
    #[should_panic]
    fn verify_detects_broken_color() {
        let mut nodes = Nodes::new(0..3);
        let mut tree = IntTree::new();
        for i in 0..3 {
            unsafe { tree.insert(nodes.ptr(i)) };
        }
        // Paint the root red.
        unsafe { w(tree.root().unwrap()).set_red() };
        tree.verify_self();
    }

    #[test]
    fn print_tree() {
        let mut nodes = Nodes::new([2, 1, 3]);
        let mut tree = IntTree::new();
        for i in 0..3 {
            unsafe { tree.insert(nodes.ptr(i)) };
        }
        let mut out = String::new();
        tree.print_on(&mut out).unwrap();
        assert_eq!(out, "2 (B)\n  1 (R)\n  3 (R)\n");
    }
}
