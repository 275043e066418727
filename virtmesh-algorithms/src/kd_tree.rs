//! KD-tree nearest neighbor search over tagged points
//!
//! Points are stored in a single array arranged as an implicit balanced tree:
//! for a range `[lo, hi)` the median (on axis `depth % 3`) sits at
//! `(lo + hi) / 2`, with the lower half to its left and the upper half to its
//! right. Every point carries a caller supplied id (a vertex index), which is
//! what queries report.

use virtmesh_core::{Error, NearestNeighborSearch, Point3f, Result};

/// KD-Tree implementation for nearest neighbor search
#[derive(Debug, Clone, Default)]
pub struct KdTree {
    points: Vec<(Point3f, u32)>,
}

impl KdTree {
    /// Builds a tree over `points`, using each point's slice position as its id
    pub fn new(points: &[Point3f]) -> Result<Self> {
        Self::from_tagged_points(
            points
                .iter()
                .enumerate()
                .map(|(i, p)| (*p, i as u32))
                .collect(),
        )
    }

    /// Builds a tree over `(position, id)` pairs
    pub fn from_tagged_points(mut points: Vec<(Point3f, u32)>) -> Result<Self> {
        if let Some((p, id)) = points
            .iter()
            .find(|(p, _)| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
        {
            return Err(Error::InvalidData(format!(
                "non-finite point {:?} (id {}) cannot be indexed",
                p, id
            )));
        }
        Self::build(&mut points, 0);
        Ok(Self { points })
    }

    fn build(points: &mut [(Point3f, u32)], depth: usize) {
        if points.len() <= 1 {
            return;
        }
        let axis = depth % 3;
        let mid = points.len() / 2;
        points.select_nth_unstable_by(mid, |a, b| a.0[axis].total_cmp(&b.0[axis]));
        let (left, right) = points.split_at_mut(mid);
        Self::build(left, depth + 1);
        Self::build(&mut right[1..], depth + 1);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Closest point to `target`, skipping the point tagged `exclude`.
    /// Returns the id and the distance.
    pub fn closest_point(&self, target: &Point3f, exclude: Option<u32>) -> Option<(u32, f32)> {
        let mut best = KBest::new(1);
        self.search_k(0, self.points.len(), 0, target, exclude, &mut best);
        best.items.first().map(|&(d2, id)| (id, d2.sqrt()))
    }

    /// Every point strictly closer than `max_distance` to `target`, skipping the
    /// point tagged `exclude`, ordered by distance (ties by id)
    pub fn closest_point_set(
        &self,
        target: &Point3f,
        max_distance: f32,
        exclude: Option<u32>,
    ) -> Vec<(u32, f32)> {
        if max_distance <= 0.0 {
            return Vec::new();
        }
        let mut found: Vec<(f32, u32)> = Vec::new();
        let query = RadiusQuery {
            target,
            radius_sq: max_distance * max_distance,
            inclusive: false,
            exclude,
        };
        self.search_radius(0, self.points.len(), 0, &query, &mut found);
        sort_by_distance(&mut found);
        found
            .into_iter()
            .map(|(d2, id)| (id, d2.sqrt()))
            .collect()
    }

    fn search_k(
        &self,
        lo: usize,
        hi: usize,
        depth: usize,
        target: &Point3f,
        exclude: Option<u32>,
        best: &mut KBest,
    ) {
        if lo >= hi {
            return;
        }
        let mid = (lo + hi) / 2;
        let axis = depth % 3;
        let (point, id) = &self.points[mid];

        if exclude != Some(*id) {
            best.offer((point - target).norm_squared(), *id);
        }

        let diff = target[axis] - point[axis];
        let (near, far) = if diff < 0.0 {
            ((lo, mid), (mid + 1, hi))
        } else {
            ((mid + 1, hi), (lo, mid))
        };

        self.search_k(near.0, near.1, depth + 1, target, exclude, best);
        if diff * diff <= best.worst() {
            self.search_k(far.0, far.1, depth + 1, target, exclude, best);
        }
    }

    fn search_radius(
        &self,
        lo: usize,
        hi: usize,
        depth: usize,
        query: &RadiusQuery<'_>,
        out: &mut Vec<(f32, u32)>,
    ) {
        if lo >= hi {
            return;
        }
        let mid = (lo + hi) / 2;
        let axis = depth % 3;
        let (point, id) = &self.points[mid];

        let d2 = (point - query.target).norm_squared();
        if query.exclude != Some(*id) && query.accepts(d2) {
            out.push((d2, *id));
        }

        let diff = query.target[axis] - point[axis];
        let (near, far) = if diff < 0.0 {
            ((lo, mid), (mid + 1, hi))
        } else {
            ((mid + 1, hi), (lo, mid))
        };

        self.search_radius(near.0, near.1, depth + 1, query, out);
        if query.accepts(diff * diff) {
            self.search_radius(far.0, far.1, depth + 1, query, out);
        }
    }
}

impl NearestNeighborSearch for KdTree {
    fn find_k_nearest(&self, query: &Point3f, k: usize) -> Vec<(usize, f32)> {
        if k == 0 {
            return Vec::new();
        }
        let mut best = KBest::new(k);
        self.search_k(0, self.points.len(), 0, query, None, &mut best);
        best.items
            .into_iter()
            .map(|(d2, id)| (id as usize, d2.sqrt()))
            .collect()
    }

    fn find_radius_neighbors(&self, query: &Point3f, radius: f32) -> Vec<(usize, f32)> {
        let mut found = Vec::new();
        let query = RadiusQuery {
            target: query,
            radius_sq: radius * radius,
            inclusive: true,
            exclude: None,
        };
        self.search_radius(0, self.points.len(), 0, &query, &mut found);
        sort_by_distance(&mut found);
        found
            .into_iter()
            .map(|(d2, id)| (id as usize, d2.sqrt()))
            .collect()
    }
}

struct RadiusQuery<'a> {
    target: &'a Point3f,
    radius_sq: f32,
    inclusive: bool,
    exclude: Option<u32>,
}

impl RadiusQuery<'_> {
    fn accepts(&self, distance_sq: f32) -> bool {
        if self.inclusive {
            distance_sq <= self.radius_sq
        } else {
            distance_sq < self.radius_sq
        }
    }
}

/// The `k` smallest `(squared distance, id)` pairs seen so far, kept sorted
struct KBest {
    k: usize,
    items: Vec<(f32, u32)>,
}

impl KBest {
    fn new(k: usize) -> Self {
        Self {
            k,
            items: Vec::with_capacity(k + 1),
        }
    }

    fn worst(&self) -> f32 {
        if self.items.len() < self.k {
            f32::INFINITY
        } else {
            self.items.last().map_or(f32::INFINITY, |&(d2, _)| d2)
        }
    }

    fn offer(&mut self, d2: f32, id: u32) {
        if self.items.len() == self.k && !closer((d2, id), self.items[self.k - 1]) {
            return;
        }
        let at = self.items.partition_point(|&item| closer(item, (d2, id)));
        self.items.insert(at, (d2, id));
        self.items.truncate(self.k);
    }
}

fn closer(a: (f32, u32), b: (f32, u32)) -> bool {
    a.0 < b.0 || (a.0 == b.0 && a.1 < b.1)
}

fn sort_by_distance(items: &mut [(f32, u32)]) {
    items.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_points(count: usize, seed: u64) -> Vec<Point3f> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                Point3f::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                )
            })
            .collect()
    }

    fn brute_force_within(points: &[Point3f], target: &Point3f, radius: f32, exclude: u32) -> Vec<u32> {
        let mut found: Vec<(f32, u32)> = points
            .iter()
            .enumerate()
            .filter(|(i, _)| *i as u32 != exclude)
            .map(|(i, p)| ((p - target).norm_squared(), i as u32))
            .filter(|(d2, _)| *d2 < radius * radius)
            .collect();
        sort_by_distance(&mut found);
        found.into_iter().map(|(_, id)| id).collect()
    }

    #[test]
    fn test_closest_point_matches_brute_force() {
        let points = random_points(500, 7);
        let tree = KdTree::new(&points).unwrap();

        for (i, target) in points.iter().enumerate().take(50) {
            let (id, distance) = tree.closest_point(target, Some(i as u32)).unwrap();
            let expected = points
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, p)| (p - target).norm())
                .fold(f32::INFINITY, f32::min);

            assert_ne!(id, i as u32, "excluded point must never be reported");
            assert_relative_eq!(distance, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_closest_point_set_matches_brute_force() {
        let points = random_points(400, 11);
        let tree = KdTree::new(&points).unwrap();

        for (i, target) in points.iter().enumerate().step_by(17) {
            let found: Vec<u32> = tree
                .closest_point_set(target, 0.3, Some(i as u32))
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            assert_eq!(found, brute_force_within(&points, target, 0.3, i as u32));
        }
    }

    #[test]
    fn test_closest_point_set_is_strict() {
        let points = vec![Point3f::new(0.0, 0.0, 0.0), Point3f::new(1.0, 0.0, 0.0)];
        let tree = KdTree::new(&points).unwrap();

        assert!(tree.closest_point_set(&points[0], 1.0, Some(0)).is_empty());
        assert_eq!(tree.closest_point_set(&points[0], 1.01, Some(0)).len(), 1);
        assert!(tree.closest_point_set(&points[0], 0.0, None).is_empty());
    }

    #[test]
    fn test_closest_point_set_non_positive_distance() {
        let points = vec![Point3f::new(0.0, 0.0, 0.0), Point3f::new(0.0, 0.0, 0.0)];
        let tree = KdTree::new(&points).unwrap();

        assert!(tree.closest_point_set(&points[0], 0.0, Some(0)).is_empty());
        assert!(tree.closest_point_set(&points[0], -1.0, None).is_empty());

        let found = tree.closest_point_set(&points[0], 1e-3, Some(0));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, 1);
        assert_relative_eq!(found[0].1, 0.0);
    }

    #[test]
    fn test_k_nearest_sorted() {
        let points = random_points(200, 3);
        let tree = KdTree::new(&points).unwrap();
        let query = Point3f::new(0.1, -0.2, 0.3);

        let result = tree.find_k_nearest(&query, 5);
        assert_eq!(result.len(), 5);
        assert!(result.windows(2).all(|w| w[0].1 <= w[1].1), "results must be sorted");

        let mut all: Vec<f32> = points.iter().map(|p| (p - query).norm()).collect();
        all.sort_by(f32::total_cmp);
        for (found, expected) in result.iter().zip(&all) {
            assert_relative_eq!(found.1, *expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_radius_neighbors_inclusive() {
        let points = vec![Point3f::new(0.0, 0.0, 0.0), Point3f::new(0.5, 0.0, 0.0)];
        let tree = KdTree::new(&points).unwrap();
        assert_eq!(tree.find_radius_neighbors(&points[0], 0.5).len(), 2);
    }

    #[test]
    fn test_tagged_ids_are_reported() {
        let tree = KdTree::from_tagged_points(vec![
            (Point3f::new(0.0, 0.0, 0.0), 40),
            (Point3f::new(5.0, 0.0, 0.0), 41),
        ])
        .unwrap();
        assert_eq!(tree.closest_point(&Point3f::new(4.0, 0.0, 0.0), None).map(|r| r.0), Some(41));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_rejects_non_finite_points() {
        assert!(KdTree::new(&[Point3f::new(f32::NAN, 0.0, 0.0)]).is_err());
        assert!(KdTree::new(&[]).unwrap().is_empty());
    }
}
