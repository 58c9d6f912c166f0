//! Static k-d tree over track path nodes. Built once per track load,
//! queried every hunt tick for nearest-node lookups.

use race_types::Vec3;

use crate::track::TrackNode;

/// One nearest-neighbour result, closest first in the returned ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub node_id: u32,
    pub distance: f64,
}

struct KdCell {
    /// Index into `points`
    point: usize,
    left: Option<usize>,
    right: Option<usize>,
}

pub struct KdTree {
    points: Vec<TrackNode>,
    cells: Vec<KdCell>,
    root: Option<usize>,
}

impl KdTree {
    /// Median split on x/y/z in rotation. The tree is immutable after this.
    pub fn build(points: Vec<TrackNode>) -> Self {
        let mut tree = Self { points, cells: Vec::new(), root: None };
        if tree.points.is_empty() {
            return tree;
        }
        tree.cells.reserve(tree.points.len());
        let mut order: Vec<usize> = (0..tree.points.len()).collect();
        tree.root = tree.build_cell(&mut order, 0);
        tree
    }

    fn build_cell(&mut self, order: &mut [usize], depth: usize) -> Option<usize> {
        if order.is_empty() {
            return None;
        }
        let axis = depth % 3;
        order.sort_by(|&a, &b| {
            axis_value(&self.points[a].pos, axis)
                .partial_cmp(&axis_value(&self.points[b].pos, axis))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mid = order.len() / 2;
        let slot = self.cells.len();
        self.cells.push(KdCell { point: order[mid], left: None, right: None });

        let (below, rest) = order.split_at_mut(mid);
        let above = &mut rest[1..];
        let left = self.build_cell(below, depth + 1);
        let right = self.build_cell(above, depth + 1);
        self.cells[slot].left = left;
        self.cells[slot].right = right;
        Some(slot)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The `k` nearest track nodes to `p`, closest first.
    pub fn nearest(&self, p: Vec3, k: usize) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }
        let mut best: Vec<(f64, usize)> = Vec::with_capacity(k + 1);
        if let Some(root) = self.root {
            self.search(root, p, 0, k, &mut best);
        }
        best.into_iter()
            .map(|(d2, idx)| Neighbor { node_id: self.points[idx].id, distance: d2.sqrt() })
            .collect()
    }

    fn search(&self, cell_idx: usize, p: Vec3, depth: usize, k: usize, best: &mut Vec<(f64, usize)>) {
        let cell = &self.cells[cell_idx];
        let point = &self.points[cell.point];
        insert_candidate(best, k, p.dist_sq(&point.pos), cell.point);

        let axis = depth % 3;
        let delta = axis_value(&p, axis) - axis_value(&point.pos, axis);
        let (near, far) = if delta <= 0.0 {
            (cell.left, cell.right)
        } else {
            (cell.right, cell.left)
        };
        if let Some(n) = near {
            self.search(n, p, depth + 1, k, best);
        }
        // Cross the split plane only if it could still hold a closer point
        if let Some(f) = far {
            let worst = best.last().map(|(d2, _)| *d2).unwrap_or(f64::INFINITY);
            if best.len() < k || delta * delta < worst {
                self.search(f, p, depth + 1, k, best);
            }
        }
    }
}

fn axis_value(v: &Vec3, axis: usize) -> f64 {
    match axis {
        0 => v.x,
        1 => v.y,
        _ => v.z,
    }
}

/// Keep `best` sorted ascending by squared distance, capped at `k`.
fn insert_candidate(best: &mut Vec<(f64, usize)>, k: usize, d2: f64, idx: usize) {
    let at = best.partition_point(|(d, _)| *d <= d2);
    best.insert(at, (d2, idx));
    if best.len() > k {
        best.pop();
    }
}
