use log::warn;
use rayon::prelude::*;
use tchron_common::{clamp, ParticleId, Vec3};

/// Cap on grid cells per candidate point.
const MAX_CELLS_PER_POINT: usize = 8;
/// Axes with a smaller extent collapse to a single cell.
const DEGENERATE_EXTENT: f64 = 1e-12;

/// Uniform 3D grid over a set of candidate particles, rebuilt every snapshot.
///
/// Particles are sorted by cell with a counting sort: parallel cell
/// assignment, serial count, prefix sum, then scatter into
/// `cell_particle_indices`.
#[derive(Debug)]
pub struct NeighborGrid {
    ids: Vec<ParticleId>,
    positions: Vec<Vec3>,
    origin: Vec3,
    cell_size: f64,
    inv_cell_size: f64,
    dims: [usize; 3],
    // Number of particles in each grid cell
    cell_counts: Vec<u32>,
    // Start index in cell_particle_indices for each grid cell (prefix sum)
    cell_starts: Vec<u32>,
    // Candidate indices sorted by grid cell
    cell_particle_indices: Vec<u32>,
}

impl NeighborGrid {
    /// Builds the grid. `cell_size` of `None` picks roughly one point per cell.
    ///
    /// A requested cell size that would need more than `MAX_CELLS_PER_POINT`
    /// cells per candidate falls back to the derived size. Candidates with
    /// non-finite positions are skipped.
    pub fn build(candidates: Vec<(ParticleId, Vec3)>, cell_size: Option<f64>) -> Self {
        let (ids, positions): (Vec<ParticleId>, Vec<Vec3>) =
            candidates.into_iter().filter(|(_, p)| p.is_finite()).unzip();
        let num_particles = positions.len();

        let (origin, extent) = match positions.first() {
            Some(&first) => {
                let (lo, hi) = positions
                    .iter()
                    .fold((first, first), |(lo, hi), &p| (lo.min(p), hi.max(p)));
                (lo, hi - lo)
            }
            None => (Vec3::zero(), Vec3::zero()),
        };
        let max_cells = cell_limit(num_particles);
        let cell_size = match cell_size.filter(|c| *c > 0.0 && c.is_finite()) {
            Some(c) if cell_count(extent, c) <= max_cells => c,
            Some(c) => {
                warn!(
                    "Neighbour cell size {} needs {:.3e} cells for {} points; using the derived size",
                    c,
                    cell_count(extent, c),
                    num_particles
                );
                auto_cell_size(extent, num_particles)
            }
            None => auto_cell_size(extent, num_particles),
        };
        let inv_cell_size = 1.0 / cell_size;

        let mut dims = [1usize; 3];
        for (axis, e) in extent.to_array().iter().enumerate() {
            dims[axis] = ((e * inv_cell_size).floor() as usize).saturating_add(1).max(1);
        }
        let num_cells = dims[0] * dims[1] * dims[2];

        let mut grid = NeighborGrid {
            ids,
            positions,
            origin,
            cell_size,
            inv_cell_size,
            dims,
            cell_counts: vec![0; num_cells],
            cell_starts: vec![0; num_cells],
            cell_particle_indices: vec![0; num_particles],
        };

        // Phase 1: Assign grid indices to each particle (Parallel).
        let particle_cells: Vec<usize> = grid
            .positions
            .par_iter()
            .map(|&pos| grid.flat_index(grid.cell_coords(pos)))
            .collect();

        // Phase 2: Count particles in each grid cell (Serial).
        for &cell in &particle_cells {
            grid.cell_counts[cell] += 1;
        }

        // Phase 3: Prefix sum over the counts.
        let mut total = 0u32;
        for cell in 0..num_cells {
            grid.cell_starts[cell] = total;
            total += grid.cell_counts[cell];
        }

        // Phase 4: Scatter particle indices into their cell blocks.
        let mut offsets = vec![0u32; num_cells];
        for (particle_idx, &cell) in particle_cells.iter().enumerate() {
            let write_idx = (grid.cell_starts[cell] + offsets[cell]) as usize;
            grid.cell_particle_indices[write_idx] = particle_idx as u32;
            offsets[cell] += 1;
        }

        grid
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    // Cell coordinates for a position, clamped onto the grid
    #[inline(always)]
    fn cell_coords(&self, pos: Vec3) -> [usize; 3] {
        let rel = (pos - self.origin).to_array();
        let mut coords = [0usize; 3];
        for axis in 0..3 {
            let max = (self.dims[axis] - 1) as f64;
            coords[axis] = clamp((rel[axis] * self.inv_cell_size).floor(), 0.0, max) as usize;
        }
        coords
    }

    #[inline(always)]
    fn flat_index(&self, c: [usize; 3]) -> usize {
        (c[2] * self.dims[1] + c[1]) * self.dims[0] + c[0]
    }

    /// Nearest candidate to `pos`, optionally no farther than `max_distance`.
    ///
    /// Searches Chebyshev shells of cells around the query cell and stops
    /// once no unvisited cell can hold anything closer. Equal distances
    /// resolve to the smaller particle id.
    pub fn nearest(&self, pos: Vec3, max_distance: Option<f64>) -> Option<(ParticleId, f64)> {
        if self.is_empty() || !pos.is_finite() {
            return None;
        }
        let max_dist_sq = max_distance.map(|d| d * d).unwrap_or(f64::INFINITY);
        let center = self.cell_coords(pos);
        let max_shell = self.dims.iter().copied().max().unwrap_or(1);

        let mut best: Option<(u32, f64)> = None;
        for shell in 0..=max_shell {
            self.for_each_in_shell(center, shell, |candidate| {
                let dist_sq = pos.distance_squared(self.positions[candidate as usize]);
                if dist_sq > max_dist_sq {
                    return;
                }
                let closer = match best {
                    None => true,
                    Some((b, b_dist_sq)) => {
                        dist_sq < b_dist_sq
                            || (dist_sq == b_dist_sq && self.ids[candidate as usize] < self.ids[b as usize])
                    }
                };
                if closer {
                    best = Some((candidate, dist_sq));
                }
            });

            // Anything in shell + 1 is at least `shell` cells away
            let reach = shell as f64 * self.cell_size;
            let bound_sq = reach * reach;
            match best {
                Some((_, b_dist_sq)) if b_dist_sq < bound_sq => break,
                _ if bound_sq > max_dist_sq => break,
                _ => {}
            }
        }
        best.map(|(idx, dist_sq)| (self.ids[idx as usize], dist_sq.sqrt()))
    }

    /// Calls `f` with every candidate index in cells at Chebyshev distance
    /// exactly `shell` from `center`.
    fn for_each_in_shell<F>(&self, center: [usize; 3], shell: usize, mut f: F)
    where
        F: FnMut(u32),
    {
        let s = shell as i64;
        let c = [center[0] as i64, center[1] as i64, center[2] as i64];
        let in_range = |axis: usize, v: i64| v >= 0 && v < self.dims[axis] as i64;

        for dz in -s..=s {
            let z = c[2] + dz;
            if !in_range(2, z) {
                continue;
            }
            for dy in -s..=s {
                let y = c[1] + dy;
                if !in_range(1, y) {
                    continue;
                }
                // Interior rows of the shell only touch its two x faces
                let on_face = dz.abs() == s || dy.abs() == s;
                let stride = if on_face || s == 0 { 1 } else { 2 * shell };
                for dx in (-s..=s).step_by(stride) {
                    let x = c[0] + dx;
                    if !in_range(0, x) {
                        continue;
                    }
                    let cell = self.flat_index([x as usize, y as usize, z as usize]);
                    let start = self.cell_starts[cell] as usize;
                    let end = start + self.cell_counts[cell] as usize;
                    for &candidate in &self.cell_particle_indices[start..end] {
                        f(candidate);
                    }
                }
            }
        }
    }
}

fn cell_limit(num_particles: usize) -> f64 {
    (MAX_CELLS_PER_POINT * num_particles.max(1)) as f64
}

// Cells a grid of this cell size needs, in f64 so huge counts cannot overflow
fn cell_count(extent: Vec3, cell_size: f64) -> f64 {
    extent
        .to_array()
        .iter()
        .map(|e| (e / cell_size).floor() + 1.0)
        .product()
}

/// Cell edge giving about one point per cell over the non-degenerate axes.
fn auto_cell_size(extent: Vec3, num_particles: usize) -> f64 {
    let axes: Vec<f64> = extent
        .to_array()
        .into_iter()
        .filter(|e| *e > DEGENERATE_EXTENT)
        .collect();
    if axes.is_empty() || num_particles == 0 {
        return 1.0;
    }
    let measure: f64 = axes.iter().product();
    let dimension = axes.len() as f64;
    let size = (measure / num_particles as f64).powf(1.0 / dimension);

    // Keep the cell count bounded for very elongated clouds
    let longest = axes.iter().copied().fold(0.0, f64::max);
    let cells_along_longest = longest / size;
    let limit = cell_limit(num_particles);
    if cells_along_longest.powf(dimension) > limit {
        longest / limit.powf(1.0 / dimension)
    } else {
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn brute_force(points: &[(ParticleId, Vec3)], pos: Vec3) -> (ParticleId, f64) {
        points
            .iter()
            .map(|&(id, p)| (id, pos.distance(p)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .unwrap()
    }

    #[test]
    fn matches_brute_force_on_random_cloud() {
        let mut rng = StdRng::seed_from_u64(7);
        let points: Vec<(ParticleId, Vec3)> = (0..2000)
            .map(|i| {
                let p = Vec3::new(rng.random_range(0.0..500.0), rng.random_range(0.0..200.0), rng.random_range(-50.0..50.0));
                (i as ParticleId, p)
            })
            .collect();
        let grid = NeighborGrid::build(points.clone(), None);
        assert_eq!(grid.len(), 2000);

        for _ in 0..300 {
            // Queries partly outside the cloud's bounding box
            let q = Vec3::new(rng.random_range(-100.0..600.0), rng.random_range(-50.0..250.0), rng.random_range(-80.0..80.0));
            let (id, dist) = grid.nearest(q, None).unwrap();
            let (expected_id, expected_dist) = brute_force(&points, q);
            assert_eq!(id, expected_id);
            assert!((dist - expected_dist).abs() < 1e-9);
        }
    }

    #[test]
    fn flat_clouds_collapse_the_degenerate_axis() {
        // 2D models put every particle at z = 0
        let points: Vec<(ParticleId, Vec3)> = (0..100)
            .map(|i| (i as ParticleId, Vec3::new((i % 10) as f64, (i / 10) as f64, 0.0)))
            .collect();
        let grid = NeighborGrid::build(points, None);
        assert_eq!(grid.dims()[2], 1);
        let (id, dist) = grid.nearest(Vec3::new(3.1, 4.2, 0.0), None).unwrap();
        assert_eq!(id, 43);
        assert!(dist < 0.3);
    }

    #[test]
    fn respects_max_distance() {
        let points = vec![(1, Vec3::new(0.0, 0.0, 0.0)), (2, Vec3::new(10.0, 0.0, 0.0))];
        let grid = NeighborGrid::build(points, Some(1.0));
        assert_eq!(grid.nearest(Vec3::new(4.0, 0.0, 0.0), Some(5.0)).map(|n| n.0), Some(1));
        assert_eq!(grid.nearest(Vec3::new(5.0, 50.0, 0.0), Some(5.0)), None);
        assert_eq!(grid.nearest(Vec3::new(5.0, 50.0, 0.0), None).map(|n| n.0), Some(1));
    }

    #[test]
    fn tiny_requested_cell_size_falls_back() {
        let points = vec![
            (1, Vec3::new(0.0, 0.0, 0.0)),
            (2, Vec3::new(1e6, 0.0, 0.0)),
            (3, Vec3::new(0.0, 1e6, 1e6)),
        ];
        let grid = NeighborGrid::build(points, Some(1e-3));
        let cells: usize = grid.dims().iter().product();
        assert!(cells <= 4 * MAX_CELLS_PER_POINT * 3, "{:?}", grid.dims());
        assert!(grid.cell_size() > 1e3);
        assert_eq!(grid.nearest(Vec3::new(9e5, 1.0, 0.0), None).map(|n| n.0), Some(2));
    }

    #[test]
    fn non_finite_candidates_are_skipped() {
        let points = vec![(1, Vec3::new(f64::NAN, 0.0, 0.0)), (2, Vec3::new(1.0, 1.0, 1.0))];
        let grid = NeighborGrid::build(points, None);
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.nearest(Vec3::zero(), None).map(|n| n.0), Some(2));
    }

    #[test]
    fn ties_go_to_smaller_id() {
        let points = vec![(9, Vec3::new(1.0, 0.0, 0.0)), (4, Vec3::new(-1.0, 0.0, 0.0))];
        let grid = NeighborGrid::build(points, None);
        assert_eq!(grid.nearest(Vec3::zero(), None).map(|n| n.0), Some(4));
    }

    #[test]
    fn empty_grid_finds_nothing() {
        let grid = NeighborGrid::build(Vec::new(), None);
        assert!(grid.is_empty());
        assert_eq!(grid.nearest(Vec3::zero(), None), None);
    }

    #[test]
    fn coincident_points_share_one_cell() {
        let points = vec![(3, Vec3::new(2.0, 2.0, 2.0)), (1, Vec3::new(2.0, 2.0, 2.0))];
        let grid = NeighborGrid::build(points, None);
        assert_eq!(grid.dims(), [1, 1, 1]);
        assert_eq!(grid.nearest(Vec3::new(0.0, 0.0, 0.0), None).map(|n| n.0), Some(1));
    }
}
