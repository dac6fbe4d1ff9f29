use ndarray::Array2;

use crate::error::{Error, Result};
use crate::imgproc::Mask;

/// Discrete pairwise-MRF solver over a site graph. `data_cost` is
/// `(sites, labels)`, `smooth_cost` is `(labels, labels)` and edges are
/// undirected site-index pairs. Returns one label index per site.
pub trait LabelSolver {
    fn solve(
        &self,
        sites: usize,
        labels: usize,
        edges: &[(usize, usize)],
        data_cost: &Array2<i32>,
        smooth_cost: &Array2<i32>,
    ) -> Result<Vec<usize>>;
}

/// 8-connected edges between masked grid cells, each pair listed once.
/// Sites are numbered in row-major order.
pub fn masked_grid_edges(mask: &Mask) -> Vec<(usize, usize)> {
    let (height, width) = mask.dim();
    let mut edges = Vec::new();
    let offsets: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];
    for row in 0..height {
        for col in 0..width {
            if !mask[[row, col]] {
                continue;
            }
            for &(dy, dx) in &offsets {
                let nr = row as isize + dy;
                let nc = col as isize + dx;
                if nr < 0 || nc < 0 || nr >= height as isize || nc >= width as isize {
                    continue;
                }
                let (nr, nc) = (nr as usize, nc as usize);
                if mask[[nr, nc]] {
                    edges.push((row * width + col, nr * width + nc));
                }
            }
        }
    }
    edges
}

/// Iterated conditional modes: greedy per-site updates swept until a
/// fixed point or `max_sweeps`, whichever comes first. Deterministic and
/// dependency-free, good enough for the near-unambiguous label fields
/// this crate produces.
#[derive(Debug, Clone)]
pub struct IcmSolver {
    pub max_sweeps: usize,
}

impl Default for IcmSolver {
    fn default() -> Self {
        Self { max_sweeps: 16 }
    }
}

impl LabelSolver for IcmSolver {
    fn solve(
        &self,
        sites: usize,
        labels: usize,
        edges: &[(usize, usize)],
        data_cost: &Array2<i32>,
        smooth_cost: &Array2<i32>,
    ) -> Result<Vec<usize>> {
        if labels == 0 {
            return Err(Error::InvalidConfig("label set is empty".into()));
        }
        if data_cost.dim() != (sites, labels) {
            return Err(Error::ShapeMismatch(format!(
                "data cost is {:?}, expected ({}, {})",
                data_cost.dim(),
                sites,
                labels
            )));
        }
        if smooth_cost.dim() != (labels, labels) {
            return Err(Error::ShapeMismatch(format!(
                "smoothness cost is {:?}, expected ({}, {})",
                smooth_cost.dim(),
                labels,
                labels
            )));
        }

        let mut neighbors = vec![Vec::new(); sites];
        for &(a, b) in edges {
            if a >= sites || b >= sites {
                return Err(Error::InternalConsistency(format!(
                    "edge ({}, {}) outside {} sites",
                    a, b, sites
                )));
            }
            neighbors[a].push(b);
            neighbors[b].push(a);
        }

        // start from the per-site data optimum, first label on ties
        let mut assignment = Vec::with_capacity(sites);
        for site in 0..sites {
            let mut best = 0usize;
            for label in 1..labels {
                if data_cost[[site, label]] < data_cost[[site, best]] {
                    best = label;
                }
            }
            assignment.push(best);
        }

        for _ in 0..self.max_sweeps {
            let mut changed = false;
            for site in 0..sites {
                let mut best_label = assignment[site];
                let mut best_cost = i64::MAX;
                for label in 0..labels {
                    let mut cost = data_cost[[site, label]] as i64;
                    for &other in &neighbors[site] {
                        cost += smooth_cost[[label, assignment[other]]] as i64;
                    }
                    if cost < best_cost {
                        best_cost = cost;
                        best_label = label;
                    }
                }
                if best_label != assignment[site] {
                    assignment[site] = best_label;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn full_2x2_mask_has_six_edges() {
        let mask = Mask::from_elem((2, 2), true);
        let edges = masked_grid_edges(&mask);
        assert_eq!(edges.len(), 6);
        assert!(edges.contains(&(0, 1)));
        assert!(edges.contains(&(0, 2)));
        assert!(edges.contains(&(0, 3)));
        assert!(edges.contains(&(1, 2)));
        assert!(edges.contains(&(1, 3)));
        assert!(edges.contains(&(2, 3)));
    }

    #[test]
    fn masked_off_cell_drops_its_edges() {
        let mut mask = Mask::from_elem((2, 2), true);
        mask[[0, 0]] = false;
        let edges = masked_grid_edges(&mask);
        assert_eq!(edges.len(), 3);
        assert!(!edges.iter().any(|&(a, b)| a == 0 || b == 0));
    }

    #[test]
    fn smoothness_pulls_weak_site_toward_neighbor() {
        // site 0 strongly prefers label 1, site 1 is indifferent; the
        // pairwise term makes them agree on label 1
        let data = arr2(&[[100, 0], [10, 10]]);
        let smooth = arr2(&[[0, 20], [20, 0]]);
        let solver = IcmSolver::default();
        let labels = solver.solve(2, 2, &[(0, 1)], &data, &smooth).unwrap();
        assert_eq!(labels, vec![1, 1]);
    }

    #[test]
    fn isolated_sites_take_their_data_optimum() {
        let data = arr2(&[[5, 1, 9], [0, 3, 3]]);
        let smooth = Array2::zeros((3, 3));
        let solver = IcmSolver::default();
        let labels = solver.solve(2, 3, &[], &data, &smooth).unwrap();
        assert_eq!(labels, vec![1, 0]);
    }

    #[test]
    fn rejects_misshapen_costs() {
        let data = arr2(&[[1, 2]]);
        let smooth = Array2::zeros((2, 2));
        let solver = IcmSolver::default();
        assert!(solver.solve(2, 2, &[], &data, &smooth).is_err());
    }
}
