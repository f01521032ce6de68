//! Red-black tree over externally stored nodes
//!
//! The tree owns nothing but its root id. Links, colors and ordering live
//! in a `NodeStore`, so directory entries can be tree nodes in place.

use super::entry::Color;
use std::cmp::Ordering;

/// Node storage the tree operates on
pub trait NodeStore {
    fn left(&self, node: u32) -> Option<u32>;
    fn right(&self, node: u32) -> Option<u32>;
    fn parent(&self, node: u32) -> Option<u32>;
    fn color(&self, node: u32) -> Color;

    fn set_left(&mut self, node: u32, left: Option<u32>);
    fn set_right(&mut self, node: u32, right: Option<u32>);
    fn set_parent(&mut self, node: u32, parent: Option<u32>);
    fn set_color(&mut self, node: u32, color: Color);

    fn compare(&self, a: u32, b: u32) -> Ordering;
}

/// Insert hit a node comparing equal to the new one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupied(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RbTree {
    pub root: Option<u32>,
}

impl RbTree {
    pub fn new(root: Option<u32>) -> Self {
        RbTree { root }
    }

    fn is_red<S: NodeStore>(store: &S, node: Option<u32>) -> bool {
        node.is_some_and(|n| store.color(n) == Color::Red)
    }

    fn rotate_left<S: NodeStore>(&mut self, store: &mut S, x: u32) {
        let Some(y) = store.right(x) else { return };

        let y_left = store.left(y);
        store.set_right(x, y_left);
        if let Some(yl) = y_left {
            store.set_parent(yl, Some(x));
        }

        let x_parent = store.parent(x);
        store.set_parent(y, x_parent);
        match x_parent {
            None => self.root = Some(y),
            Some(p) if store.left(p) == Some(x) => store.set_left(p, Some(y)),
            Some(p) => store.set_right(p, Some(y)),
        }

        store.set_left(y, Some(x));
        store.set_parent(x, Some(y));
    }

    fn rotate_right<S: NodeStore>(&mut self, store: &mut S, x: u32) {
        let Some(y) = store.left(x) else { return };

        let y_right = store.right(y);
        store.set_left(x, y_right);
        if let Some(yr) = y_right {
            store.set_parent(yr, Some(x));
        }

        let x_parent = store.parent(x);
        store.set_parent(y, x_parent);
        match x_parent {
            None => self.root = Some(y),
            Some(p) if store.right(p) == Some(x) => store.set_right(p, Some(y)),
            Some(p) => store.set_left(p, Some(y)),
        }

        store.set_right(y, Some(x));
        store.set_parent(x, Some(y));
    }

    /// Insert `node`, whose links are overwritten. Fails without touching
    /// the tree when an equal node is already present.
    pub fn insert<S: NodeStore>(&mut self, store: &mut S, node: u32) -> Result<(), Occupied> {
        let mut parent = None;
        let mut current = self.root;
        let mut went_left = false;

        while let Some(c) = current {
            parent = Some(c);
            match store.compare(node, c) {
                Ordering::Less => {
                    current = store.left(c);
                    went_left = true;
                }
                Ordering::Greater => {
                    current = store.right(c);
                    went_left = false;
                }
                Ordering::Equal => return Err(Occupied(c)),
            }
        }

        store.set_parent(node, parent);
        store.set_left(node, None);
        store.set_right(node, None);
        store.set_color(node, Color::Red);

        match parent {
            None => self.root = Some(node),
            Some(p) if went_left => store.set_left(p, Some(node)),
            Some(p) => store.set_right(p, Some(node)),
        }

        self.insert_fixup(store, node);
        Ok(())
    }

    fn insert_fixup<S: NodeStore>(&mut self, store: &mut S, node: u32) {
        let mut z = node;

        while let Some(p) = store.parent(z) {
            if store.color(p) != Color::Red {
                break;
            }
            let Some(g) = store.parent(p) else { break };

            if store.left(g) == Some(p) {
                let uncle = store.right(g);
                if Self::is_red(store, uncle) {
                    if let Some(u) = uncle {
                        store.set_color(u, Color::Black);
                    }
                    store.set_color(p, Color::Black);
                    store.set_color(g, Color::Red);
                    z = g;
                } else {
                    if store.right(p) == Some(z) {
                        z = p;
                        self.rotate_left(store, z);
                    }
                    let Some(p) = store.parent(z) else { break };
                    store.set_color(p, Color::Black);
                    store.set_color(g, Color::Red);
                    self.rotate_right(store, g);
                }
            } else {
                let uncle = store.left(g);
                if Self::is_red(store, uncle) {
                    if let Some(u) = uncle {
                        store.set_color(u, Color::Black);
                    }
                    store.set_color(p, Color::Black);
                    store.set_color(g, Color::Red);
                    z = g;
                } else {
                    if store.left(p) == Some(z) {
                        z = p;
                        self.rotate_right(store, z);
                    }
                    let Some(p) = store.parent(z) else { break };
                    store.set_color(p, Color::Black);
                    store.set_color(g, Color::Red);
                    self.rotate_left(store, g);
                }
            }
        }

        if let Some(root) = self.root {
            store.set_color(root, Color::Black);
        }
    }

    /// Replace the subtree at `u` with the one at `v`
    fn transplant<S: NodeStore>(&mut self, store: &mut S, u: u32, v: Option<u32>) {
        let u_parent = store.parent(u);
        match u_parent {
            None => self.root = v,
            Some(p) if store.left(p) == Some(u) => store.set_left(p, v),
            Some(p) => store.set_right(p, v),
        }
        if let Some(v) = v {
            store.set_parent(v, u_parent);
        }
    }

    fn minimum<S: NodeStore>(store: &S, mut node: u32) -> u32 {
        while let Some(left) = store.left(node) {
            node = left;
        }
        node
    }

    /// Unlink `node` from the tree. Nodes are never relocated: the removed
    /// node is `node` itself, and its links are cleared.
    pub fn delete<S: NodeStore>(&mut self, store: &mut S, node: u32) {
        let z = node;
        let mut removed_color = store.color(z);
        let x;
        let x_parent;

        match (store.left(z), store.right(z)) {
            (None, right) => {
                x = right;
                x_parent = store.parent(z);
                self.transplant(store, z, right);
            }
            (left, None) => {
                x = left;
                x_parent = store.parent(z);
                self.transplant(store, z, left);
            }
            (Some(z_left), Some(z_right)) => {
                let y = Self::minimum(store, z_right);
                removed_color = store.color(y);
                x = store.right(y);

                if store.parent(y) == Some(z) {
                    x_parent = Some(y);
                    if let Some(xn) = x {
                        store.set_parent(xn, Some(y));
                    }
                } else {
                    x_parent = store.parent(y);
                    self.transplant(store, y, x);
                    let z_right = store.right(z);
                    store.set_right(y, z_right);
                    if let Some(r) = z_right {
                        store.set_parent(r, Some(y));
                    }
                }

                self.transplant(store, z, Some(y));
                store.set_left(y, Some(z_left));
                store.set_parent(z_left, Some(y));
                let z_color = store.color(z);
                store.set_color(y, z_color);
            }
        }

        if removed_color == Color::Black {
            self.delete_fixup(store, x, x_parent);
        }

        store.set_left(z, None);
        store.set_right(z, None);
        store.set_parent(z, None);
    }

    fn delete_fixup<S: NodeStore>(&mut self, store: &mut S, x: Option<u32>, x_parent: Option<u32>) {
        let mut x = x;
        let mut parent = x_parent;

        while x != self.root && !Self::is_red(store, x) {
            let Some(p) = parent else { break };

            if store.left(p) == x {
                let mut w = store.right(p);
                if let Some(wn) = w.filter(|&n| store.color(n) == Color::Red) {
                    store.set_color(wn, Color::Black);
                    store.set_color(p, Color::Red);
                    self.rotate_left(store, p);
                    w = store.right(p);
                }
                let Some(mut wn) = w else {
                    x = Some(p);
                    parent = store.parent(p);
                    continue;
                };

                if !Self::is_red(store, store.left(wn)) && !Self::is_red(store, store.right(wn)) {
                    store.set_color(wn, Color::Red);
                    x = Some(p);
                    parent = store.parent(p);
                } else {
                    if !Self::is_red(store, store.right(wn)) {
                        if let Some(wl) = store.left(wn) {
                            store.set_color(wl, Color::Black);
                        }
                        store.set_color(wn, Color::Red);
                        self.rotate_right(store, wn);
                        let Some(new_w) = store.right(p) else { break };
                        wn = new_w;
                    }
                    let p_color = store.color(p);
                    store.set_color(wn, p_color);
                    store.set_color(p, Color::Black);
                    if let Some(wr) = store.right(wn) {
                        store.set_color(wr, Color::Black);
                    }
                    self.rotate_left(store, p);
                    x = self.root;
                    parent = None;
                }
            } else {
                let mut w = store.left(p);
                if let Some(wn) = w.filter(|&n| store.color(n) == Color::Red) {
                    store.set_color(wn, Color::Black);
                    store.set_color(p, Color::Red);
                    self.rotate_right(store, p);
                    w = store.left(p);
                }
                let Some(mut wn) = w else {
                    x = Some(p);
                    parent = store.parent(p);
                    continue;
                };

                if !Self::is_red(store, store.left(wn)) && !Self::is_red(store, store.right(wn)) {
                    store.set_color(wn, Color::Red);
                    x = Some(p);
                    parent = store.parent(p);
                } else {
                    if !Self::is_red(store, store.left(wn)) {
                        if let Some(wr) = store.right(wn) {
                            store.set_color(wr, Color::Black);
                        }
                        store.set_color(wn, Color::Red);
                        self.rotate_left(store, wn);
                        let Some(new_w) = store.left(p) else { break };
                        wn = new_w;
                    }
                    let p_color = store.color(p);
                    store.set_color(wn, p_color);
                    store.set_color(p, Color::Black);
                    if let Some(wl) = store.left(wn) {
                        store.set_color(wl, Color::Black);
                    }
                    self.rotate_right(store, p);
                    x = self.root;
                    parent = None;
                }
            }
        }

        if let Some(xn) = x {
            store.set_color(xn, Color::Black);
        }
    }

    /// Find the node for which `target_vs(node)` is `Equal`. The closure
    /// compares the target against a node.
    pub fn lookup<S: NodeStore, F>(&self, store: &S, target_vs: F) -> Option<u32>
    where
        F: Fn(u32) -> Ordering,
    {
        let mut current = self.root;
        while let Some(c) = current {
            current = match target_vs(c) {
                Ordering::Equal => return Some(c),
                Ordering::Less => store.left(c),
                Ordering::Greater => store.right(c),
            };
        }
        None
    }

    pub fn visit_in_order<S: NodeStore, F>(&self, store: &S, mut visit: F)
    where
        F: FnMut(u32),
    {
        let mut stack = Vec::new();
        let mut current = self.root;

        while current.is_some() || !stack.is_empty() {
            while let Some(c) = current {
                stack.push(c);
                current = store.left(c);
            }
            if let Some(c) = stack.pop() {
                visit(c);
                current = store.right(c);
            }
        }
    }
}
