//! Breadth-first enumeration of services.
//!
//! The search walks every maximal run of tracks from every line end (and,
//! for segmented lines, from interior cut points). There is no visited set:
//! the goal is every route, not a shortest one. Combinatorial growth is
//! bounded by the per-entry station budget.

use super::track::{Track, TrackKind, TrackTable, build_tracks, next_tracks};
use crate::error::ConvertError;
use crate::geometry::{GeoMap, Line, PointKind};
use crate::rc::{RcMap, RcService};
use ahash::AHashSet;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
struct RouteEntry {
    tracks: Vec<Track>,
    budget: i64,
}

impl RouteEntry {
    fn new() -> Self {
        RouteEntry {
            tracks: Vec::new(),
            budget: i64::MAX,
        }
    }

    /// Append a track, clamping to the segment limit of the track's line
    /// and then spending budget at stations. A route over a line with limit
    /// N therefore carries at most N stations.
    fn push(&mut self, track: Track, geomap: &GeoMap) {
        self.budget = self.budget.min(segment_limit(geomap, track.line_id));
        if geomap.points.get(&track.point_id).map(|p| p.kind) == Some(PointKind::Station) {
            self.budget -= 1;
        }
        self.tracks.push(track);
    }

    fn is_full(&self) -> bool {
        self.budget <= 0
    }
}

fn segment_limit(geomap: &GeoMap, line_id: i64) -> i64 {
    geomap
        .config
        .segmented_lines
        .get(&line_id)
        .copied()
        .unwrap_or(geomap.config.max_length)
}

fn check_cancel(cancel: Option<&AtomicBool>) -> Result<(), ConvertError> {
    match cancel {
        Some(flag) if flag.load(Ordering::Relaxed) => Err(ConvertError::Cancelled),
        _ => Ok(()),
    }
}

/// Append a service built from the station points along `point_ids`.
/// Consecutive equal emit ids collapse when configured; anything shorter
/// than two stations is dropped.
fn emit_station_run(geomap: &GeoMap, rcmap: &mut RcMap, point_ids: &[i64], is_loop: bool) {
    let mut station_ids: Vec<i64> = Vec::new();
    for pid in point_ids {
        let Some(point) = geomap.points.get(pid) else {
            continue;
        };
        if point.kind != PointKind::Station {
            continue;
        }
        let emit_id = geomap.station_emit_id(point.id);
        if geomap.config.merge_consecutive_duplicates && station_ids.last() == Some(&emit_id) {
            continue;
        }
        station_ids.push(emit_id);
    }
    if station_ids.len() < 2 {
        return;
    }
    let id = rcmap.services.len() as i64 + 1;
    rcmap.services.insert(
        id,
        RcService {
            id,
            station_ids,
            is_loop,
        },
    );
}

fn emit_route(geomap: &GeoMap, rcmap: &mut RcMap, tracks: &[Track]) {
    if tracks.len() < 2 {
        return;
    }
    let point_ids: Vec<i64> = tracks.iter().map(|t| t.point_id).collect();
    emit_station_run(geomap, rcmap, &point_ids, false);
}

fn seed(line: &Line, index: usize, forward: bool, geomap: &GeoMap) -> RouteEntry {
    let mut entry = RouteEntry::new();
    entry.push(
        Track {
            point_id: line.point_ids[index],
            line_id: line.id,
            index_in_line: index,
            forward,
            kind: TrackKind::Normal,
        },
        geomap,
    );
    entry
}

/// Run the route search over all lines (or the masked subset) and emit the
/// discovered services into `rcmap`. Simple lines bypass the search and
/// emit their station run directly.
pub fn search_services(
    geomap: &GeoMap,
    rcmap: &mut RcMap,
    mask: Option<&AHashSet<i64>>,
    cancel: Option<&AtomicBool>,
) -> Result<(), ConvertError> {
    let table: TrackTable = build_tracks(geomap, mask);

    let mut queue: VecDeque<RouteEntry> = VecDeque::new();
    for line in geomap.lines.values() {
        if let Some(mask) = mask {
            if !mask.contains(&line.id) {
                continue;
            }
        }
        let len = line.point_ids.len();
        if len < 2 {
            continue;
        }
        if line.is_simple {
            emit_station_run(geomap, rcmap, &line.point_ids, line.is_loop);
            continue;
        }

        queue.push_back(seed(line, 0, true, geomap));
        queue.push_back(seed(line, len - 1, false, geomap));

        // Segmented lines are additionally cut at interior points so the
        // overlapping shorter routes cover the whole line within the
        // random-walk bound.
        if let Some(&segment_length) = geomap.config.segmented_lines.get(&line.id) {
            let interval = segment_length - geomap.config.max_rc_steps;
            if interval > 0 {
                let mut i = interval as usize;
                while i + 1 < len {
                    queue.push_back(seed(line, i, true, geomap));
                    queue.push_back(seed(line, i, false, geomap));
                    i += interval as usize;
                }
            }
        }
    }

    while let Some(entry) = queue.pop_front() {
        check_cancel(cancel)?;
        let last = *entry.tracks.last().expect("route entries are never empty");
        let nexts = next_tracks(geomap, &table, last);
        if nexts.is_empty() || entry.is_full() {
            emit_route(geomap, rcmap, &entry.tracks);
            continue;
        }
        for next in nexts {
            let mut extended = entry.clone();
            extended.push(next, geomap);
            queue.push_back(extended);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ConvertConfig, GeoMap, Point, PointDir, Position};
    use ahash::AHashMap;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicBool;

    fn station(id: i64, x: f64, y: f64) -> Point {
        Point {
            id,
            size: 1.0,
            name: String::new(),
            pos: Position::new(x, y),
            dir: PointDir::Orthogonal,
            kind: PointKind::Station,
        }
    }

    fn line(id: i64, point_ids: Vec<i64>, is_loop: bool) -> Line {
        Line {
            id,
            name: String::new(),
            point_ids,
            is_loop,
            is_simple: false,
            parent_id: -1,
        }
    }

    fn geomap(points: Vec<Point>, lines: Vec<Line>) -> GeoMap {
        GeoMap {
            width: 1000.0,
            height: 1000.0,
            points: points.into_iter().map(|p| (p.id, p)).collect(),
            lines: lines.into_iter().map(|l| (l.id, l)).collect(),
            station_groups: BTreeMap::new(),
            point_to_group: AHashMap::new(),
            config: ConvertConfig::default(),
        }
    }

    #[test]
    fn straight_line_yields_forward_and_backward_routes() {
        let map = geomap(
            vec![station(1, 0.0, 0.0), station(2, 10.0, 0.0), station(3, 20.0, 0.0)],
            vec![line(1, vec![1, 2, 3], false)],
        );
        let mut rcmap = RcMap::default();
        search_services(&map, &mut rcmap, None, None).unwrap();
        let runs: Vec<&Vec<i64>> = rcmap.services.values().map(|s| &s.station_ids).collect();
        assert_eq!(runs.len(), 2);
        assert!(runs.contains(&&vec![1, 2, 3]));
        assert!(runs.contains(&&vec![3, 2, 1]));
    }

    #[test]
    fn simple_line_takes_the_fast_path() {
        let mut map = geomap(
            vec![station(1, 0.0, 0.0), station(2, 10.0, 0.0), station(3, 20.0, 0.0)],
            vec![line(1, vec![1, 2, 3], false)],
        );
        map.lines.get_mut(&1).unwrap().is_simple = true;
        let mut rcmap = RcMap::default();
        search_services(&map, &mut rcmap, None, None).unwrap();
        assert_eq!(rcmap.services.len(), 1);
        assert_eq!(rcmap.services[&1].station_ids, vec![1, 2, 3]);
        assert!(!rcmap.services[&1].is_loop);
    }

    #[test]
    fn simple_loop_preserves_the_loop_flag() {
        let mut map = geomap(
            vec![
                station(1, 0.0, 0.0),
                station(2, 10.0, 0.0),
                station(3, 10.0, 10.0),
                station(4, 0.0, 10.0),
            ],
            vec![line(1, vec![1, 2, 3, 4, 1], true)],
        );
        map.lines.get_mut(&1).unwrap().is_simple = true;
        let mut rcmap = RcMap::default();
        search_services(&map, &mut rcmap, None, None).unwrap();
        assert_eq!(rcmap.services.len(), 1);
        let service = &rcmap.services[&1];
        assert_eq!(service.station_ids, vec![1, 2, 3, 4, 1]);
        assert!(service.is_loop);
    }

    #[test]
    fn grouped_stations_collapse_consecutive_ids() {
        let mut map = geomap(
            vec![station(1, 0.0, 0.0), station(2, 5.0, 0.0), station(3, 100.0, 0.0)],
            vec![line(1, vec![1, 2, 3], false)],
        );
        map.station_groups.insert(
            1,
            crate::geometry::StationGroup {
                id: 1,
                station_ids: vec![1, 2],
            },
        );
        map.point_to_group.insert(1, 1);
        map.point_to_group.insert(2, 1);
        map.lines.get_mut(&1).unwrap().is_simple = true;
        let mut rcmap = RcMap::default();
        search_services(&map, &mut rcmap, None, None).unwrap();
        assert_eq!(rcmap.services[&1].station_ids, vec![1, 3]);
    }

    #[test]
    fn short_runs_are_discarded() {
        let mut map = geomap(
            vec![station(1, 0.0, 0.0), station(2, 5.0, 0.0)],
            vec![line(1, vec![1, 2], false)],
        );
        // both stations share a group, so the run collapses to one id
        map.station_groups.insert(
            1,
            crate::geometry::StationGroup {
                id: 1,
                station_ids: vec![1, 2],
            },
        );
        map.point_to_group.insert(1, 1);
        map.point_to_group.insert(2, 1);
        let mut rcmap = RcMap::default();
        search_services(&map, &mut rcmap, None, None).unwrap();
        assert!(rcmap.services.is_empty());
    }

    #[test]
    fn segment_limit_bounds_route_length() {
        let points: Vec<Point> = (1..=30).map(|i| station(i, i as f64 * 50.0, 0.0)).collect();
        let ids: Vec<i64> = (1..=30).collect();
        let mut map = geomap(points, vec![line(1, ids, false)]);
        map.config.segmented_lines.insert(1, 17);
        let mut rcmap = RcMap::default();
        search_services(&map, &mut rcmap, None, None).unwrap();
        assert!(!rcmap.services.is_empty());
        for service in rcmap.services.values() {
            assert!(service.station_ids.len() <= 17);
        }
        // interior seeds produce runs that start away from the endpoints
        assert!(rcmap
            .services
            .values()
            .any(|s| s.station_ids.first() != Some(&1) && s.station_ids.first() != Some(&30)));
    }

    #[test]
    fn cancellation_stops_the_search() {
        let map = geomap(
            vec![station(1, 0.0, 0.0), station(2, 10.0, 0.0)],
            vec![line(1, vec![1, 2], false)],
        );
        let cancel = AtomicBool::new(true);
        let mut rcmap = RcMap::default();
        let err = search_services(&map, &mut rcmap, None, Some(&cancel)).unwrap_err();
        assert!(matches!(err, ConvertError::Cancelled));
    }
}
