use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::error::{Error, Result};
use crate::imgproc::LabelMap;
use crate::Id;

/// What to do when one raw id turns out to span two disjoint components.
/// `Strict` treats it as a propagation defect; `FirstObserved` keeps going,
/// which the bidirectional pass needs since a region can legitimately break
/// apart between sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    Strict,
    FirstObserved,
}

/// Renumbers 8-connected components of the non-zero support into ids
/// `1..=K` in scan order. Touching regions with different raw ids collapse
/// into one component. Returns the new map and, per new id, the raw id its
/// seed cell replaced.
pub fn relabel_components(
    map: &LabelMap,
    policy: MergePolicy,
) -> Result<(LabelMap, BTreeMap<Id, Id>)> {
    let (height, width) = map.dim();
    let mut relabeled = LabelMap::zeros((height, width));
    let mut replaced = BTreeMap::new();
    let mut claimed = BTreeSet::new();
    let mut next: Id = 1;
    let mut stack = Vec::new();

    for row in 0..height {
        for col in 0..width {
            if map[[row, col]] == 0 || relabeled[[row, col]] != 0 {
                continue;
            }
            let source = map[[row, col]];
            if !claimed.insert(source) {
                match policy {
                    MergePolicy::Strict => {
                        return Err(Error::InternalConsistency(format!(
                            "raw id {} split across multiple components",
                            source
                        )))
                    }
                    MergePolicy::FirstObserved => {
                        warn!(raw = source, "raw id split across components, keeping first")
                    }
                }
            }
            let new_id = next;
            next += 1;
            replaced.insert(new_id, source);

            relabeled[[row, col]] = new_id;
            stack.push((row, col));
            while let Some((r, c)) = stack.pop() {
                for dy in -1isize..=1 {
                    for dx in -1isize..=1 {
                        if dy == 0 && dx == 0 {
                            continue;
                        }
                        let (nr, nc) = (r as isize + dy, c as isize + dx);
                        if nr < 0 || nc < 0 || nr >= height as isize || nc >= width as isize {
                            continue;
                        }
                        let (nr, nc) = (nr as usize, nc as usize);
                        if map[[nr, nc]] != 0 && relabeled[[nr, nc]] == 0 {
                            relabeled[[nr, nc]] = new_id;
                            stack.push((nr, nc));
                        }
                    }
                }
            }
        }
    }

    Ok((relabeled, replaced))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn idempotent_on_canonical_labels() {
        let map = arr2(&[[1, 0, 2], [1, 0, 2]]);
        let (first, _) = relabel_components(&map, MergePolicy::Strict).unwrap();
        assert_eq!(first, map);
        let (second, sources) = relabel_components(&first, MergePolicy::Strict).unwrap();
        assert_eq!(second, first);
        assert_eq!(sources.get(&1), Some(&1));
        assert_eq!(sources.get(&2), Some(&2));
    }

    #[test]
    fn touching_ids_collapse_into_one_component() {
        let map = arr2(&[[1, 2]]);
        let (relabeled, sources) = relabel_components(&map, MergePolicy::Strict).unwrap();
        assert_eq!(relabeled, arr2(&[[1, 1]]));
        assert_eq!(sources.len(), 1);
        assert_eq!(sources.get(&1), Some(&1));
    }

    #[test]
    fn scan_order_renumbering_records_sources() {
        let map = arr2(&[[5, 0, 3]]);
        let (relabeled, sources) = relabel_components(&map, MergePolicy::Strict).unwrap();
        assert_eq!(relabeled, arr2(&[[1, 0, 2]]));
        assert_eq!(sources.get(&1), Some(&5));
        assert_eq!(sources.get(&2), Some(&3));
    }

    #[test]
    fn split_raw_id_errors_or_keeps_first() {
        let map = arr2(&[[7, 0, 7]]);
        let err = relabel_components(&map, MergePolicy::Strict).unwrap_err();
        assert!(matches!(err, Error::InternalConsistency(_)));

        let (relabeled, sources) = relabel_components(&map, MergePolicy::FirstObserved).unwrap();
        assert_eq!(relabeled, arr2(&[[1, 0, 2]]));
        assert_eq!(sources.get(&1), Some(&7));
        assert_eq!(sources.get(&2), Some(&7));
    }

    #[test]
    fn diagonal_contact_is_connected() {
        let map = arr2(&[[4, 0], [0, 4]]);
        let (relabeled, _) = relabel_components(&map, MergePolicy::Strict).unwrap();
        assert_eq!(relabeled, arr2(&[[1, 0], [0, 1]]));
    }
}
