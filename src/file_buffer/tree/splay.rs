use super::{is_left_child, parent_of, set_left, set_parent, set_right, NodeRef};

/* Rotations go through the structural setters, so the size aggregates of the
 * rotated pair are correct after every step. The node above the pair is
 * recomputed from a half-rewired child and only becomes correct once a later
 * splay step rotates at its level; a full splay always reaches it. */

/*                        y
 *         x             / \
 *        / \    -->    x   c
 *       a   y         / \
 *          / \       a   b
 *         b   c
 */
fn rotate_left(x: &NodeRef) {
    let y = match x.borrow().right.clone() {
        Some(y) => y,
        None => return,
    };
    let parent = parent_of(x);
    let y_left = y.borrow().left.clone();
    set_right(x, y_left);
    set_parent(&y, parent.as_ref());
    if let Some(p) = &parent {
        if is_left_child(p, x) {
            set_left(p, Some(y.clone()));
        } else {
            set_right(p, Some(y.clone()));
        }
    }
    set_left(&y, Some(x.clone()));
}

/*                        x
 *         y             / \
 *        / \    <--    y   c
 *       a   x         / \
 *          / \       a   b
 *         b   c
 */
fn rotate_right(x: &NodeRef) {
    let y = match x.borrow().left.clone() {
        Some(y) => y,
        None => return,
    };
    let parent = parent_of(x);
    let y_right = y.borrow().right.clone();
    set_left(x, y_right);
    set_parent(&y, parent.as_ref());
    if let Some(p) = &parent {
        if is_left_child(p, x) {
            set_left(p, Some(y.clone()));
        } else {
            set_right(p, Some(y.clone()));
        }
    }
    set_right(&y, Some(x.clone()));
}

/// Rotate `x` up to the root of its tree and return it.
/// See https://en.wikipedia.org/wiki/Splay_tree
pub(crate) fn splay(x: &NodeRef) -> NodeRef {
    while let Some(parent) = parent_of(x) {
        let x_is_left = is_left_child(&parent, x);
        match parent_of(&parent) {
            None => {
                // zig
                if x_is_left {
                    rotate_right(&parent);
                } else {
                    rotate_left(&parent);
                }
            }
            Some(grand) => {
                let parent_is_left = is_left_child(&grand, &parent);
                match (x_is_left, parent_is_left) {
                    // zig-zig
                    (true, true) => {
                        rotate_right(&grand);
                        rotate_right(&parent);
                    }
                    (false, false) => {
                        rotate_left(&grand);
                        rotate_left(&parent);
                    }
                    // zig-zag
                    (true, false) => {
                        rotate_right(&parent);
                        rotate_left(&grand);
                    }
                    (false, true) => {
                        rotate_left(&parent);
                        rotate_right(&grand);
                    }
                }
            }
        }
    }
    x.clone()
}

#[cfg(test)]
mod test {
    use super::super::{check_invariants, contents, get, new_node, set_left, set_right, NodeRef};
    use super::*;
    use crate::file_buffer::data::{BufData, Data};

    fn leaf(b: u8) -> NodeRef {
        new_node(Data::Buf(BufData::new(&[b])))
    }

    /// Left-leaning chain: z at the top, a at the bottom.
    fn chain(bytes: &[u8]) -> (NodeRef, Vec<NodeRef>) {
        let mut nodes = Vec::new();
        let mut top: Option<NodeRef> = None;
        for &b in bytes {
            let n = leaf(b);
            set_left(&n, top.take());
            nodes.push(n.clone());
            top = Some(n);
        }
        (top.unwrap(), nodes)
    }

    #[test]
    fn splay_leaf_of_chain() {
        let (root, nodes) = chain(b"abcdefg");
        assert_eq!(contents(&root), b"abcdefg");

        let new_root = splay(&nodes[0]);
        assert!(parent_of(&new_root).is_none());
        assert_eq!(contents(&new_root), b"abcdefg");
        check_invariants(&new_root);
    }

    #[test]
    fn splay_middle_preserves_order_and_sizes() {
        let (_root, nodes) = chain(b"abcdefg");
        for i in [3, 0, 6, 2, 5, 1, 4] {
            let new_root = splay(&nodes[i]);
            assert!(parent_of(&new_root).is_none());
            assert_eq!(contents(&new_root), b"abcdefg");
            check_invariants(&new_root);
        }
    }

    #[test]
    fn splay_root_is_a_no_op() {
        let (root, _) = chain(b"abc");
        let new_root = splay(&root);
        assert_eq!(contents(&new_root), b"abc");
        check_invariants(&new_root);
    }

    #[test]
    fn splayed_node_carries_its_offset() {
        // splay the node holding each offset and make sure lookups still
        // resolve afterwards; children attach bottom-up so sizes aggregate
        let d = leaf(b'd');
        set_right(&d, Some(leaf(b'e')));
        let c = leaf(b'c');
        set_left(&c, Some(leaf(b'b')));
        set_right(&c, Some(d));
        let a = leaf(b'a');
        set_right(&a, Some(c));
        let mut root = a;
        for offset in 0..5 {
            let (node, in_leaf) = get(&root, offset);
            assert_eq!(in_leaf, 0);
            root = splay(&node);
            assert_eq!(contents(&root), b"abcde");
            assert_eq!(root.borrow().data.as_slice(), [b'a' + offset as u8]);
            check_invariants(&root);
        }
    }
}
