//! Directed traversal tokens over the geometric lines.
//!
//! Every occurrence of a point on a line yields one track per traversal
//! role. Interior occurrences carry a plain forward and backward track; line
//! ends additionally carry either a terminal track (open lines) or a
//! wrap-around track (loops). The successor oracle walks these tokens,
//! optionally crossing onto friend and merged lines.

use crate::geometry::{GeoMap, PointKind};
use ahash::{AHashMap, AHashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Normal,
    WrapAround { next_index: usize },
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Track {
    pub point_id: i64,
    pub line_id: i64,
    pub index_in_line: usize,
    pub forward: bool,
    pub kind: TrackKind,
}

impl Track {
    pub fn is_end(self) -> bool {
        matches!(self.kind, TrackKind::Terminal)
    }

    /// Index of the next point along this track's direction, if any.
    pub fn next_index(self) -> Option<usize> {
        match self.kind {
            TrackKind::Terminal => None,
            TrackKind::WrapAround { next_index } => Some(next_index),
            TrackKind::Normal => {
                if self.forward {
                    Some(self.index_in_line + 1)
                } else {
                    self.index_in_line.checked_sub(1)
                }
            }
        }
    }
}

/// Tracks grouped by the point they are anchored at.
pub type TrackTable = AHashMap<i64, Vec<Track>>;

/// Build the track table for every line in the map. When `mask` is given,
/// lines outside it contribute no tracks at all. Point ids missing from the
/// point table are skipped.
pub fn build_tracks(geomap: &GeoMap, mask: Option<&AHashSet<i64>>) -> TrackTable {
    let mut table: TrackTable = AHashMap::new();

    for line in geomap.lines.values() {
        if let Some(mask) = mask {
            if !mask.contains(&line.id) {
                continue;
            }
        }
        let len = line.point_ids.len();
        for (i, &pid) in line.point_ids.iter().enumerate() {
            if !geomap.points.contains_key(&pid) {
                log::debug!("line {} references missing point {pid}", line.id);
                continue;
            }
            let mut push = |forward: bool, kind: TrackKind| {
                table.entry(pid).or_default().push(Track {
                    point_id: pid,
                    line_id: line.id,
                    index_in_line: i,
                    forward,
                    kind,
                });
            };
            if i + 1 < len {
                push(true, TrackKind::Normal);
            }
            if i > 0 {
                push(false, TrackKind::Normal);
            }
            if i == 0 && line.is_loop {
                push(false, TrackKind::WrapAround { next_index: len - 1 });
            }
            if i + 1 == len && line.is_loop {
                push(true, TrackKind::WrapAround { next_index: 0 });
            }
            if i == 0 && !line.is_loop {
                push(false, TrackKind::Terminal);
            }
            if i + 1 == len && !line.is_loop {
                push(true, TrackKind::Terminal);
            }
        }
    }

    table
}

/// Enumerate the legal continuations of `track`.
///
/// Same-line candidates at the next index continue when their direction
/// matches (a terminal candidate is accepted regardless, as the stop marker
/// of the run). Candidates on other lines continue unconditionally through a
/// merged pair, or through a friend pair when the turn geometry permits.
/// When several candidates exist, terminal ones are dropped; stopping is
/// only a fallback.
pub fn next_tracks(geomap: &GeoMap, table: &TrackTable, track: Track) -> Vec<Track> {
    let mut result = Vec::new();
    let Some(j) = track.next_index() else {
        return result;
    };
    let Some(line) = geomap.lines.get(&track.line_id) else {
        return result;
    };
    let next_pid = line.point_ids[j];
    let Some(candidates) = table.get(&next_pid) else {
        return result;
    };

    for &candidate in candidates {
        if candidate.line_id == track.line_id && candidate.index_in_line == j {
            if candidate.forward == track.forward || candidate.is_end() {
                result.push(candidate);
            }
            continue;
        }
        if candidate.is_end() {
            continue;
        }
        if geomap
            .config
            .merged_lines
            .contains(&(track.line_id, candidate.line_id))
        {
            result.push(candidate);
            continue;
        }
        if !geomap
            .config
            .friend_lines
            .contains(&(track.line_id, candidate.line_id))
        {
            continue;
        }
        let Some(k) = candidate.next_index() else {
            continue;
        };
        let pid_after = geomap.lines[&candidate.line_id].point_ids[k];
        if geomap.can_move_through(track.point_id, next_pid, pid_after) {
            result.push(candidate);
        }
    }

    if result.len() > 1 {
        result.retain(|t| !t.is_end());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ConvertConfig, GeoMap, Line, Point, PointDir, Position};
    use std::collections::BTreeMap;

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
    fn open_line_track_roles() {
        let map = geomap(
            vec![station(1, 0.0, 0.0), station(2, 10.0, 0.0), station(3, 20.0, 0.0)],
            vec![line(1, vec![1, 2, 3], false)],
        );
        let table = build_tracks(&map, None);

        // first point: forward continuation plus backward terminal
        let first = &table[&1];
        assert_eq!(first.len(), 2);
        assert!(first.iter().any(|t| t.forward && t.kind == TrackKind::Normal));
        assert!(first.iter().any(|t| !t.forward && t.kind == TrackKind::Terminal));

        // interior point: both directions, no terminals
        let mid = &table[&2];
        assert_eq!(mid.len(), 2);
        assert!(mid.iter().all(|t| t.kind == TrackKind::Normal));

        let last = &table[&3];
        assert_eq!(last.len(), 2);
        assert!(last.iter().any(|t| t.forward && t.kind == TrackKind::Terminal));
    }

    #[test]
    fn loop_line_gets_wraparound_tracks() {
        let map = geomap(
            vec![
                station(1, 0.0, 0.0),
                station(2, 10.0, 0.0),
                station(3, 10.0, 10.0),
            ],
            vec![line(1, vec![1, 2, 3, 1], true)],
        );
        let table = build_tracks(&map, None);

        let first = &table[&1];
        // index 0: forward normal + backward wrap; index 3: backward normal + forward wrap
        assert_eq!(first.len(), 4);
        assert!(first
            .iter()
            .any(|t| t.kind == TrackKind::WrapAround { next_index: 3 } && !t.forward));
        assert!(first
            .iter()
            .any(|t| t.kind == TrackKind::WrapAround { next_index: 0 } && t.forward));
        assert!(first.iter().all(|t| t.kind != TrackKind::Terminal));
    }

    #[test]
    fn same_line_successor_follows_direction() {
        let map = geomap(
            vec![station(1, 0.0, 0.0), station(2, 10.0, 0.0), station(3, 20.0, 0.0)],
            vec![line(1, vec![1, 2, 3], false)],
        );
        let table = build_tracks(&map, None);

        let start = Track {
            point_id: 1,
            line_id: 1,
            index_in_line: 0,
            forward: true,
            kind: TrackKind::Normal,
        };
        let nexts = next_tracks(&map, &table, start);
        assert_eq!(nexts.len(), 1);
        assert_eq!(nexts[0].point_id, 2);
        assert!(nexts[0].forward);

        // from the middle forward, the only candidate at the last point is
        // the forward terminal
        let mid = nexts[0];
        let nexts = next_tracks(&map, &table, mid);
        assert_eq!(nexts.len(), 1);
        assert_eq!(nexts[0].kind, TrackKind::Terminal);

        // terminals have no successors
        assert!(next_tracks(&map, &table, nexts[0]).is_empty());
    }

    #[test]
    fn merged_lines_continue_unconditionally() {
        // L1 ends at point 3 where L2 begins, sharp reversal geometry.
        let mut map = geomap(
            vec![
                station(1, 0.0, 0.0),
                station(2, 10.0, 0.0),
                station(3, 20.0, 0.0),
                station(4, 10.0, 5.0),
            ],
            vec![line(1, vec![1, 2, 3], false), line(2, vec![3, 4], false)],
        );
        map.config.merged_lines.insert((1, 2));
        map.config.merged_lines.insert((2, 1));
        let table = build_tracks(&map, None);

        let mid = Track {
            point_id: 2,
            line_id: 1,
            index_in_line: 1,
            forward: true,
            kind: TrackKind::Normal,
        };
        let nexts = next_tracks(&map, &table, mid);
        // L2's forward track wins over L1's terminal after the tie-break
        assert_eq!(nexts.len(), 1);
        assert_eq!(nexts[0].line_id, 2);
    }

    #[test]
    fn friend_lines_respect_turn_geometry() {
        // L1 runs east through point 2; L2 branches north from it and L3
        // doubles back west. Only the L2 turn is non-reflex.
        let mut map = geomap(
            vec![
                station(1, 0.0, 0.0),
                station(2, 10.0, 0.0),
                station(3, 20.0, 0.0),
                station(4, 10.0, 10.0),
                station(5, 0.0, -1.0),
            ],
            vec![
                line(1, vec![1, 2, 3], false),
                line(2, vec![2, 4], false),
                line(3, vec![2, 5], false),
            ],
        );
        for pair in [(1, 2), (2, 1), (1, 3), (3, 1)] {
            map.config.friend_lines.insert(pair);
        }
        let table = build_tracks(&map, None);

        let start = Track {
            point_id: 1,
            line_id: 1,
            index_in_line: 0,
            forward: true,
            kind: TrackKind::Normal,
        };
        let nexts = next_tracks(&map, &table, start);
        let onto_l2 = nexts.iter().filter(|t| t.line_id == 2).count();
        let onto_l3 = nexts.iter().filter(|t| t.line_id == 3).count();
        assert_eq!(onto_l2, 1);
        assert_eq!(onto_l3, 0);
        // same-line continuation survives alongside the friend branch
        assert!(nexts.iter().any(|t| t.line_id == 1 && t.point_id == 2));
    }

    #[test]
    fn masked_lines_are_invisible() {
        let map = geomap(
            vec![station(1, 0.0, 0.0), station(2, 10.0, 0.0)],
            vec![line(1, vec![1, 2], false), line(2, vec![2, 1], false)],
        );
        let mask: AHashSet<i64> = [1].into_iter().collect();
        let table = build_tracks(&map, Some(&mask));
        assert!(table[&1].iter().all(|t| t.line_id == 1));
        assert!(table[&2].iter().all(|t| t.line_id == 1));
    }
}
