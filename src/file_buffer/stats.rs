use super::data::Data;
use super::tree::NodeRef;

/// Number of buckets in [`Stats::histogram`].
pub const HISTOGRAM_BUCKETS: usize = 24;

/// Snapshot of the tree shape, for debugging and tuning. Collecting it walks
/// the whole tree; keep it off the hot path.
#[derive(Debug, Clone)]
pub struct Stats {
    pub nodes: u64,
    pub inline_leaves: u64,
    pub file_leaves: u64,
    /// Inline leaves that can no longer be appended to.
    pub frozen_leaves: u64,
    pub max_depth: u64,
    pub avg_depth: f64,
    pub min_leaf: u64,
    pub max_leaf: u64,
    pub avg_leaf: f64,
    /// Leaf-size histogram: bucket 0 counts empty leaves, bucket `i` counts
    /// leaves with `len` in `[2^(i-1), 2^i)`; the last bucket absorbs the rest.
    pub histogram: [u64; HISTOGRAM_BUCKETS],
}

pub(crate) fn collect(root: &NodeRef) -> Stats {
    let mut st = Stats {
        nodes: 0,
        inline_leaves: 0,
        file_leaves: 0,
        frozen_leaves: 0,
        max_depth: 0,
        avg_depth: 0.0,
        min_leaf: u64::MAX,
        max_leaf: 0,
        avg_leaf: 0.0,
        histogram: [0; HISTOGRAM_BUCKETS],
    };
    let mut depth_total = 0u64;
    let mut bytes_total = 0u64;
    walk(root, 0, &mut st, &mut depth_total, &mut bytes_total);
    st.avg_depth = depth_total as f64 / st.nodes as f64;
    st.avg_leaf = bytes_total as f64 / st.nodes as f64;
    st
}

fn walk(n: &NodeRef, depth: u64, st: &mut Stats, depth_total: &mut u64, bytes_total: &mut u64) {
    let node = n.borrow();
    if let Some(l) = &node.left {
        walk(l, depth + 1, st, depth_total, bytes_total);
    }
    if let Some(r) = &node.right {
        walk(r, depth + 1, st, depth_total, bytes_total);
    }

    match &node.data {
        Data::Buf(buf) => {
            st.inline_leaves += 1;
            if !buf.appendable() {
                st.frozen_leaves += 1;
            }
        }
        Data::File(_) => st.file_leaves += 1,
    }

    let len = node.data.len();
    st.nodes += 1;
    st.max_depth = st.max_depth.max(depth);
    st.min_leaf = st.min_leaf.min(len);
    st.max_leaf = st.max_leaf.max(len);
    st.histogram[bucket(len)] += 1;
    *depth_total += depth;
    *bytes_total += len;
}

fn bucket(len: u64) -> usize {
    if len == 0 {
        return 0;
    }
    let log2 = 63 - len.leading_zeros() as usize;
    (log2 + 1).min(HISTOGRAM_BUCKETS - 1)
}
