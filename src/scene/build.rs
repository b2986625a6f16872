//! SAH-based BVH builder.
//!
//! Produces a flat node array plus a primitive permutation; leaves index into
//! the permutation, never into the caller's slice directly.

use super::bvh::{Aabb, BvhNode};

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Maximum primitives per leaf before forcing a split.
const MAX_LEAF_SIZE: usize = 4;

/// Built BVH.
#[derive(Debug, Clone)]
pub struct Bvh {
    /// Flat node array (index 0 = root).
    pub nodes: Vec<BvhNode>,
    /// Primitive permutation referenced by leaves.
    pub prim_indices: Vec<usize>,
}

#[derive(Clone, Copy)]
struct Bin {
    bounds: Aabb,
    count: usize,
}

/// Pending range of the permutation to turn into a subtree.
struct Task {
    node: usize,
    start: usize,
    end: usize,
}

/// Build a BVH over primitive bounds.
#[tracing::instrument(skip_all, fields(prim_count = bounds.len()))]
pub fn build_bvh(bounds: &[Aabb]) -> Bvh {
    let n = bounds.len();
    if n == 0 {
        return Bvh {
            nodes: vec![BvhNode::leaf(&Aabb { min: glam::Vec3::ZERO, max: glam::Vec3::ZERO }, 0, 0)],
            prim_indices: Vec::new(),
        };
    }

    let centroids: Vec<glam::Vec3> = bounds.iter().map(Aabb::centroid).collect();
    let mut indices: Vec<usize> = (0..n).collect();
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
    nodes.push(BvhNode::leaf(&Aabb::EMPTY, 0, 0));

    let mut stack = vec![Task { node: 0, start: 0, end: n }];

    while let Some(Task { node, start, end }) = stack.pop() {
        let count = end - start;

        let mut node_bounds = Aabb::EMPTY;
        let mut centroid_bounds = Aabb::EMPTY;
        for &idx in &indices[start..end] {
            node_bounds.grow(&bounds[idx]);
            centroid_bounds.grow_point(centroids[idx]);
        }

        if count <= MAX_LEAF_SIZE {
            nodes[node] = BvhNode::leaf(&node_bounds, start, count);
            continue;
        }

        let split = find_best_split(&indices[start..end], bounds, &centroids, &centroid_bounds);
        let leaf_cost = count as f32 * INTERSECT_COST * node_bounds.area();

        let Some((axis, pos, cost)) = split else {
            nodes[node] = BvhNode::leaf(&node_bounds, start, count);
            continue;
        };
        if cost >= leaf_cost {
            nodes[node] = BvhNode::leaf(&node_bounds, start, count);
            continue;
        }

        let mid = start + partition(&mut indices[start..end], |&idx| centroids[idx][axis] < pos);
        // Degenerate partition: split the range in half
        let mid = if mid == start || mid == end { (start + end) / 2 } else { mid };

        let left = nodes.len();
        nodes.push(BvhNode::leaf(&Aabb::EMPTY, 0, 0));
        nodes.push(BvhNode::leaf(&Aabb::EMPTY, 0, 0));
        nodes[node] = BvhNode::interior(&node_bounds, left);

        stack.push(Task { node: left + 1, start: mid, end });
        stack.push(Task { node: left, start, end: mid });
    }

    tracing::debug!(nodes = nodes.len(), "bvh built");
    Bvh { nodes, prim_indices: indices }
}

/// Binned SAH over all three axes. `None` when every axis is degenerate.
fn find_best_split(
    indices: &[usize],
    bounds: &[Aabb],
    centroids: &[glam::Vec3],
    centroid_bounds: &Aabb,
) -> Option<(usize, f32, f32)> {
    let mut best: Option<(usize, f32, f32)> = None;

    for axis in 0..3 {
        let lo = centroid_bounds.min[axis];
        let extent = centroid_bounds.max[axis] - lo;
        if extent < 1e-8 {
            continue;
        }

        let mut bins = [Bin { bounds: Aabb::EMPTY, count: 0 }; NUM_BINS];
        let inv_extent = NUM_BINS as f32 / extent;
        for &idx in indices {
            let b = (((centroids[idx][axis] - lo) * inv_extent) as usize).min(NUM_BINS - 1);
            bins[b].bounds.grow(&bounds[idx]);
            bins[b].count += 1;
        }

        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = Aabb::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = sweep.area();
            left_count[i] = sweep_count;
        }

        sweep = Aabb::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            let cost = TRAVERSAL_COST
                + INTERSECT_COST
                    * (left_count[i - 1] as f32 * left_area[i - 1] + sweep_count as f32 * sweep.area());
            if best.map_or(true, |(_, _, c)| cost < c) {
                best = Some((axis, lo + (i as f32 / NUM_BINS as f32) * extent, cost));
            }
        }
    }

    best
}

/// In-place partition. Returns the number of elements satisfying `pred`.
fn partition<T, F>(slice: &mut [T], pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn unit_box(x: f32) -> Aabb {
        Aabb {
            min: Vec3::new(x - 0.5, -0.5, 0.0),
            max: Vec3::new(x + 0.5, 0.5, 0.0),
        }
    }

    #[test]
    fn test_empty_bvh() {
        let bvh = build_bvh(&[]);
        assert_eq!(bvh.nodes.len(), 1);
        assert!(bvh.prim_indices.is_empty());
    }

    #[test]
    fn test_small_input_is_single_leaf() {
        let boxes: Vec<_> = (0..3).map(|i| unit_box(i as f32)).collect();
        let bvh = build_bvh(&boxes);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].count, 3);
    }

    #[test]
    fn test_many_prims_build_tree() {
        let boxes: Vec<_> = (0..100).map(|i| unit_box(i as f32 * 2.0)).collect();
        let bvh = build_bvh(&boxes);
        assert!(bvh.nodes.len() > 1);

        let mut sorted = bvh.prim_indices.clone();
        sorted.sort();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());

        let root = bvh.nodes[0].bounds();
        assert!(root.min.x < 0.0);
        assert!(root.max.x > 198.0);
    }
}
