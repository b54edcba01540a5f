//! Removal of redundant services.
//!
//! The search intentionally over-produces: every branch direction and every
//! segmentation cut yields its own route. This pass removes services that
//! add nothing over another service: equal, reversed, or fully contained.

use crate::rc::RcMap;

/// `a` occurs as a contiguous run inside the strictly longer `b`.
fn is_subroute(a: &[i64], b: &[i64]) -> bool {
    !a.is_empty() && a.len() < b.len() && b.windows(a.len()).any(|window| window == a)
}

/// Find one service to remove, scanning pairs in id order: equal or
/// reverse-equal pairs lose their larger id; a service contained in another
/// (directly or reversed) loses outright.
fn find_removable(rcmap: &RcMap) -> Option<i64> {
    for a in rcmap.services.values() {
        for b in rcmap.services.values() {
            if a.id == b.id {
                continue;
            }
            let reversed_a: Vec<i64> = a.station_ids.iter().rev().copied().collect();
            if a.station_ids.len() == b.station_ids.len() {
                if a.station_ids == b.station_ids || reversed_a == b.station_ids {
                    return Some(a.id.max(b.id));
                }
                continue;
            }
            if is_subroute(&a.station_ids, &b.station_ids)
                || is_subroute(&reversed_a, &b.station_ids)
            {
                return Some(a.id);
            }
        }
    }
    None
}

/// Prune until no service is equal to, the reverse of, or a sub-route of
/// another. Terminates because every step removes one service.
pub fn prune_services(rcmap: &mut RcMap) {
    while let Some(id) = find_removable(rcmap) {
        rcmap.services.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rc::RcService;

    fn rcmap_with(routes: Vec<Vec<i64>>) -> RcMap {
        let mut rcmap = RcMap::default();
        for (i, station_ids) in routes.into_iter().enumerate() {
            let id = i as i64 + 1;
            rcmap.services.insert(
                id,
                RcService {
                    id,
                    station_ids,
                    is_loop: false,
                },
            );
        }
        rcmap
    }

    #[test]
    fn equal_services_keep_the_smaller_id() {
        let mut rcmap = rcmap_with(vec![vec![1, 2, 3], vec![1, 2, 3]]);
        prune_services(&mut rcmap);
        assert_eq!(rcmap.services.len(), 1);
        assert!(rcmap.services.contains_key(&1));
    }

    #[test]
    fn reversed_services_count_as_equal() {
        let mut rcmap = rcmap_with(vec![vec![1, 2, 3], vec![3, 2, 1]]);
        prune_services(&mut rcmap);
        assert_eq!(rcmap.services.len(), 1);
        assert!(rcmap.services.contains_key(&1));
    }

    #[test]
    fn subroutes_are_removed_in_either_direction() {
        let mut rcmap = rcmap_with(vec![vec![2, 3], vec![1, 2, 3, 4], vec![3, 2]]);
        prune_services(&mut rcmap);
        assert_eq!(rcmap.services.len(), 1);
        assert_eq!(rcmap.services[&2].station_ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn chains_collapse_to_the_longest_service() {
        let mut rcmap = rcmap_with(vec![vec![1, 2], vec![1, 2, 3], vec![1, 2, 3, 4]]);
        prune_services(&mut rcmap);
        assert_eq!(rcmap.services.len(), 1);
        assert_eq!(rcmap.services[&3].station_ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn distinct_services_survive() {
        let mut rcmap = rcmap_with(vec![vec![1, 2, 5], vec![1, 2, 6], vec![2, 1, 7]]);
        prune_services(&mut rcmap);
        assert_eq!(rcmap.services.len(), 3);
    }

    #[test]
    fn non_contiguous_subsequences_are_not_subroutes() {
        // 1-3 skips station 2 and is not a contiguous run of 1-2-3
        let mut rcmap = rcmap_with(vec![vec![1, 3], vec![1, 2, 3]]);
        prune_services(&mut rcmap);
        assert_eq!(rcmap.services.len(), 2);
    }
}
