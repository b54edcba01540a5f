//! Parsing of the AARC diagram document and the optional conversion config
//! into a [`GeoMap`].
//!
//! The document is tolerant in shape (sizes may arrive as numbers or numeric
//! strings, config entries may reference lines by id or by name), so the
//! loosely-typed parts go through `serde_json::Value` while the rigid parts
//! use plain serde structs.

use crate::auxiliary::insert_auxiliary_points;
use crate::error::ConvertError;
use crate::geometry::{
    ConvertConfig, GeoMap, Line, LinkKind, LinkMode, Point, PointDir, PointKind, Position,
    StationGroup,
};
use ahash::AHashMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(rename = "cvsSize")]
    cvs_size: Option<[f64; 2]>,
    #[serde(default)]
    points: Vec<RawPoint>,
    #[serde(default)]
    lines: Vec<RawLine>,
    #[serde(rename = "pointLinks", default)]
    point_links: Vec<RawPointLink>,
    config: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    id: i64,
    #[serde(default)]
    name: String,
    pos: [f64; 2],
    dir: i64,
    sta: i64,
}

#[derive(Debug, Deserialize)]
struct RawLine {
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    pts: Vec<i64>,
    #[serde(rename = "type", default)]
    line_type: i64,
    #[serde(rename = "isFake", default)]
    is_fake: bool,
    parent: Option<i64>,
    #[serde(rename = "ptSize")]
    pt_size: Option<Value>,
    width: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawPointLink {
    pts: [i64; 2],
    #[serde(rename = "type")]
    link_type: i64,
}

/// A number that may arrive as a JSON number or a numeric string.
fn loose_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn link_kind_from_index(index: i64) -> Option<LinkKind> {
    match index {
        0 => Some(LinkKind::ThickLine),
        1 => Some(LinkKind::ThinLine),
        2 => Some(LinkKind::DottedLine1),
        3 => Some(LinkKind::DottedLine2),
        4 => Some(LinkKind::Group),
        _ => None,
    }
}

fn link_kind_from_name(name: &str) -> Option<LinkKind> {
    match name {
        "ThickLine" => Some(LinkKind::ThickLine),
        "ThinLine" => Some(LinkKind::ThinLine),
        "DottedLine1" => Some(LinkKind::DottedLine1),
        "DottedLine2" => Some(LinkKind::DottedLine2),
        "Group" => Some(LinkKind::Group),
        _ => None,
    }
}

fn link_mode_from_name(name: &str) -> Option<LinkMode> {
    match name {
        "Connect" => Some(LinkMode::Connect),
        "Group" => Some(LinkMode::Group),
        "None" => Some(LinkMode::None),
        _ => None,
    }
}

/// Resolve a config reference to a loaded line: an integer id, or a line
/// name. Name lookups take the lowest-id match so resolution is stable.
fn resolve_line(lines: &BTreeMap<i64, Line>, value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            let id = n.as_i64()?;
            lines.contains_key(&id).then_some(id)
        }
        Value::String(name) => lines
            .values()
            .find(|line| line.name == *name)
            .map(|line| line.id),
        _ => None,
    }
}

struct MapBuilder {
    map: GeoMap,
    max_line_id: i64,
}

impl MapBuilder {
    fn connect_lines(&mut self, line1_id: i64, line2_id: i64, forced: bool) {
        if line1_id == line2_id && !forced {
            return;
        }
        self.map.config.friend_lines.insert((line1_id, line2_id));
        self.map.config.friend_lines.insert((line2_id, line1_id));
    }

    fn merge_lines(&mut self, line1_id: i64, line2_id: i64, forced: bool) {
        if line1_id == line2_id && !forced {
            return;
        }
        self.map.config.merged_lines.insert((line1_id, line2_id));
        self.map.config.merged_lines.insert((line2_id, line1_id));
    }

    /// Put two stations into one group, merging whole groups when both are
    /// already grouped. A fresh group takes the first station's id.
    fn join_stations(&mut self, station1_id: i64, station2_id: i64) {
        if station1_id == station2_id {
            return;
        }
        let group1 = self.map.point_to_group.get(&station1_id).copied();
        let group2 = self.map.point_to_group.get(&station2_id).copied();
        match (group1, group2) {
            (Some(g1), Some(g2)) => {
                if g1 == g2 {
                    return;
                }
                let absorbed = self.map.station_groups.remove(&g2).unwrap();
                for sid in &absorbed.station_ids {
                    self.map.point_to_group.insert(*sid, g1);
                }
                self.map
                    .station_groups
                    .get_mut(&g1)
                    .unwrap()
                    .station_ids
                    .extend(absorbed.station_ids);
            }
            (Some(g1), None) => {
                self.map
                    .station_groups
                    .get_mut(&g1)
                    .unwrap()
                    .station_ids
                    .push(station2_id);
                self.map.point_to_group.insert(station2_id, g1);
            }
            (None, Some(g2)) => {
                self.map
                    .station_groups
                    .get_mut(&g2)
                    .unwrap()
                    .station_ids
                    .push(station1_id);
                self.map.point_to_group.insert(station1_id, g2);
            }
            (None, None) => {
                let group_id = station1_id;
                self.map.station_groups.insert(
                    group_id,
                    StationGroup {
                        id: group_id,
                        station_ids: vec![station1_id, station2_id],
                    },
                );
                self.map.point_to_group.insert(station1_id, group_id);
                self.map.point_to_group.insert(station2_id, group_id);
            }
        }
    }
}

/// Parse the AARC document plus an optional conversion config into a fully
/// normalized [`GeoMap`], ready for the conversion pipeline.
pub fn parse_geomap(aarc: &Value, config: &Value) -> Result<GeoMap, ConvertError> {
    let doc: RawDocument = serde_json::from_value(aarc.clone())
        .map_err(|e| ConvertError::InvalidDocument(e.to_string()))?;

    let (width, height) = match doc.cvs_size {
        Some([w, h]) => (w, h),
        None => (1024.0, 1024.0),
    };

    let mut builder = MapBuilder {
        map: GeoMap {
            width,
            height,
            points: BTreeMap::new(),
            lines: BTreeMap::new(),
            station_groups: BTreeMap::new(),
            point_to_group: AHashMap::new(),
            config: ConvertConfig::default(),
        },
        max_line_id: 0,
    };

    for raw in &doc.points {
        builder.map.points.insert(
            raw.id,
            Point {
                id: raw.id,
                size: 1.0,
                name: raw.name.clone(),
                pos: Position::new(raw.pos[0], raw.pos[1]),
                dir: if raw.dir == 1 {
                    PointDir::Diagonal
                } else {
                    PointDir::Orthogonal
                },
                kind: if raw.sta == 1 {
                    PointKind::Station
                } else {
                    PointKind::Node
                },
            },
        );
    }

    // Map from line width (at 1/100 precision) to the station size that the
    // diagram editor associates with it.
    let mut width_to_point_size: AHashMap<i64, f64> = AHashMap::new();
    if let Some(lw_map) = doc
        .config
        .as_ref()
        .and_then(|c| c.get("lineWidthMapped"))
        .and_then(Value::as_object)
    {
        for (key, value) in lw_map {
            let Ok(line_width) = key.trim().parse::<f64>() else {
                continue;
            };
            if let Some(size) = value.get("staSize").and_then(Value::as_f64) {
                width_to_point_size.insert((line_width * 100.0 + 0.5) as i64, size);
            }
        }
    }

    for raw in &doc.lines {
        if raw.line_type != 0 || raw.is_fake {
            continue;
        }
        let is_loop = raw.pts.len() >= 2 && raw.pts.first() == raw.pts.last();
        let parent_id = raw.parent.unwrap_or(-1);
        builder.map.lines.insert(
            raw.id,
            Line {
                id: raw.id,
                name: raw.name.clone(),
                point_ids: raw.pts.clone(),
                is_loop,
                is_simple: false,
                parent_id,
            },
        );
        if let Some(parent) = raw.parent {
            builder.connect_lines(raw.id, parent, false);
        }
        builder.max_line_id = builder.max_line_id.max(raw.id);

        let mut point_size = raw.pt_size.as_ref().and_then(loose_f64).unwrap_or(0.0);
        if point_size < 1e-3 {
            point_size = match raw.width.as_ref().and_then(loose_f64) {
                Some(line_width) => {
                    let key = (line_width * 100.0 + 0.5) as i64;
                    width_to_point_size.get(&key).copied().unwrap_or(line_width)
                }
                None => 1.0,
            };
        }
        for pid in &raw.pts {
            if let Some(point) = builder.map.points.get_mut(pid) {
                point.size = point.size.max(point_size);
            }
        }
    }

    parse_config(&mut builder, config);

    insert_auxiliary_points(&mut builder.map);

    for link in &doc.point_links {
        let Some(kind) = link_kind_from_index(link.link_type) else {
            continue;
        };
        let mode = builder
            .map
            .config
            .link_modes
            .get(&kind)
            .copied()
            .unwrap_or(LinkMode::None);
        match mode {
            LinkMode::None => {}
            LinkMode::Connect => {
                builder.max_line_id += 1;
                let id = builder.max_line_id;
                builder.map.lines.insert(
                    id,
                    Line {
                        id,
                        name: format!("PointLink_{id}"),
                        point_ids: vec![link.pts[0], link.pts[1]],
                        is_loop: false,
                        is_simple: false,
                        parent_id: -1,
                    },
                );
            }
            LinkMode::Group => builder.join_stations(link.pts[0], link.pts[1]),
        }
    }

    // Stations drawn close together act as one interchange. The threshold
    // scales with the mean of the two station sizes.
    let station_ids: Vec<i64> = builder
        .map
        .points
        .values()
        .filter(|p| p.kind == PointKind::Station)
        .map(|p| p.id)
        .collect();
    for (i, &id1) in station_ids.iter().enumerate() {
        for &id2 in &station_ids[i + 1..] {
            let p1 = &builder.map.points[&id1];
            let p2 = &builder.map.points[&id2];
            let distance = builder.map.config.auto_group_distance * (p1.size + p2.size) / 2.0;
            if (p1.pos - p2.pos).length() <= distance + 1e-3 {
                builder.join_stations(id1, id2);
            }
        }
    }

    // Branches of the same parent line continue into each other.
    let parented: Vec<(i64, i64)> = builder
        .map
        .lines
        .values()
        .filter(|l| l.parent_id != -1)
        .map(|l| (l.id, l.parent_id))
        .collect();
    for (i, &(id1, parent1)) in parented.iter().enumerate() {
        for &(id2, parent2) in &parented[i + 1..] {
            if parent1 == parent2 {
                builder.connect_lines(id1, id2, false);
            }
        }
    }

    let map = &mut builder.map;

    // A segmentation length within the random-walk bound would make every
    // route trivial; lift such values just above it.
    let max_rc_steps = map.config.max_rc_steps;
    for seg_len in map.config.segmented_lines.values_mut() {
        if *seg_len >= 0 && *seg_len <= max_rc_steps {
            *seg_len = max_rc_steps + 1;
        }
    }

    // A line that retraces its own points periodically is a loop that was
    // drawn in several passes; keep one period.
    for line in map.lines.values_mut() {
        if line.is_loop {
            continue;
        }
        let mut period = 0usize;
        for i in 1..line.point_ids.len() {
            if period == 0 && line.point_ids[i] == line.point_ids[0] {
                period = i;
            } else if period != 0 && line.point_ids[i] != line.point_ids[i % period] {
                period = 0;
                break;
            }
        }
        if period != 0 {
            line.is_loop = true;
            line.point_ids.truncate(period + 1);
        }
    }

    derive_simple_flags(map);

    Ok(builder.map)
}

/// A line is simple when the route search cannot produce anything beyond the
/// line itself: not segmented, no friend or merged partner, and no station
/// visited twice (the duplicated seam point of a loop does not count).
fn derive_simple_flags(map: &mut GeoMap) {
    let mut simple_ids: Vec<i64> = Vec::new();
    'lines: for line in map.lines.values() {
        if map.config.segmented_lines.contains_key(&line.id) {
            continue;
        }
        let mentioned = |pairs: &ahash::AHashSet<(i64, i64)>| {
            pairs.iter().any(|&(a, b)| a == line.id || b == line.id)
        };
        if mentioned(&map.config.friend_lines) || mentioned(&map.config.merged_lines) {
            continue;
        }
        let limit = if line.is_loop {
            line.point_ids.len().saturating_sub(1)
        } else {
            line.point_ids.len()
        };
        let mut seen = ahash::AHashSet::new();
        for pid in &line.point_ids[..limit] {
            if map.points.get(pid).map(|p| p.kind) == Some(PointKind::Station) && !seen.insert(*pid)
            {
                continue 'lines;
            }
        }
        simple_ids.push(line.id);
    }
    for id in simple_ids {
        map.lines.get_mut(&id).unwrap().is_simple = true;
    }
}

fn parse_config(builder: &mut MapBuilder, config: &Value) {
    if let Some(v) = config.get("max_length").and_then(Value::as_i64) {
        if v > 0 {
            builder.map.config.max_length = v;
        }
    }
    if let Some(v) = config.get("max_rc_steps").and_then(Value::as_i64) {
        if v > 0 {
            builder.map.config.max_rc_steps = v;
        }
    }
    if let Some(v) = config.get("max_iterations").and_then(Value::as_i64) {
        if v > 0 {
            builder.map.config.max_iterations = v;
        }
    }
    if let Some(v) = config
        .get("merge_consecutive_duplicates")
        .and_then(Value::as_bool)
    {
        builder.map.config.merge_consecutive_duplicates = v;
    }
    if let Some(v) = config.get("optimize_segmentation").and_then(Value::as_bool) {
        builder.map.config.optimize_segmentation = v;
    }

    if let Some(modes) = config.get("link_modes").and_then(Value::as_object) {
        for (key, value) in modes {
            let (Some(kind), Some(mode)) = (
                link_kind_from_name(key),
                value.as_str().and_then(link_mode_from_name),
            ) else {
                continue;
            };
            builder.map.config.link_modes.insert(kind, mode);
        }
    }

    for (key, merged) in [("friend_lines", false), ("merged_lines", true)] {
        let Some(pairs) = config.get(key).and_then(Value::as_array) else {
            continue;
        };
        for pair in pairs {
            let Some(pair) = pair.as_array() else {
                continue;
            };
            if pair.len() != 2 {
                continue;
            }
            let (Some(a), Some(b)) = (
                resolve_line(&builder.map.lines, &pair[0]),
                resolve_line(&builder.map.lines, &pair[1]),
            ) else {
                continue;
            };
            if merged {
                builder.merge_lines(a, b, true);
            } else {
                builder.connect_lines(a, b, true);
            }
        }
    }

    // segmented_lines entries come in three shapes: a bare id/name, an array
    // of ids/names sharing one optimizer group, or an object carrying an
    // explicit segment length. Bare and array forms get a negative group key
    // derived from their position.
    let Some(entries) = config.get("segmented_lines").and_then(Value::as_array) else {
        return;
    };
    for (index, entry) in entries.iter().enumerate() {
        let group_key = -((index + 1) as i64);
        match entry {
            Value::Array(members) => {
                for member in members {
                    if let Some(line_id) = resolve_line(&builder.map.lines, member) {
                        builder.map.config.segmented_lines.insert(line_id, group_key);
                    }
                }
            }
            Value::String(_) | Value::Number(_) => {
                if let Some(line_id) = resolve_line(&builder.map.lines, entry) {
                    builder.map.config.segmented_lines.insert(line_id, group_key);
                }
            }
            Value::Object(obj) => {
                if !obj.contains_key("line") && !obj.contains_key("lines") {
                    continue;
                }
                let seg_len = match obj.get("segment_length").and_then(Value::as_i64) {
                    Some(v) if v > 0 => v,
                    _ => group_key,
                };
                if let Some(line_ref) = obj.get("line") {
                    if let Some(line_id) = resolve_line(&builder.map.lines, line_ref) {
                        builder.map.config.segmented_lines.insert(line_id, seg_len);
                    }
                } else if let Some(members) = obj.get("lines").and_then(Value::as_array) {
                    for member in members {
                        if let Some(line_id) = resolve_line(&builder.map.lines, member) {
                            builder.map.config.segmented_lines.insert(line_id, seg_len);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc_with_line(pts: Vec<i64>) -> Value {
        let points: Vec<Value> = pts
            .iter()
            .collect::<std::collections::BTreeSet<_>>()
            .iter()
            .map(|&&id| json!({"id": id, "pos": [id as f64 * 100.0, 0.0], "dir": 0, "sta": 1}))
            .collect();
        json!({
            "cvsSize": [1000.0, 1000.0],
            "points": points,
            "lines": [{"id": 1, "name": "A line", "pts": pts}],
        })
    }

    #[test]
    fn parses_canvas_points_and_lines() {
        let map = parse_geomap(&doc_with_line(vec![1, 2, 3]), &Value::Null).unwrap();
        assert_eq!(map.width, 1000.0);
        assert_eq!(map.height, 1000.0);
        assert_eq!(map.points.len(), 3);
        assert_eq!(map.lines[&1].point_ids, vec![1, 2, 3]);
        assert!(!map.lines[&1].is_loop);
        assert!(map.lines[&1].is_simple);
    }

    #[test]
    fn skips_fake_and_typed_lines() {
        let doc = json!({
            "points": [{"id": 1, "pos": [0.0, 0.0], "dir": 0, "sta": 1}],
            "lines": [
                {"id": 1, "pts": [1], "isFake": true},
                {"id": 2, "pts": [1], "type": 3},
            ],
        });
        let map = parse_geomap(&doc, &Value::Null).unwrap();
        assert!(map.lines.is_empty());
    }

    #[test]
    fn detects_periodic_loops() {
        // 1-2-3-1-2-3-1 retraces with period 3.
        let map = parse_geomap(&doc_with_line(vec![1, 2, 3, 1, 2, 3, 1]), &Value::Null).unwrap();
        let line = &map.lines[&1];
        assert!(line.is_loop);
        assert_eq!(line.point_ids, vec![1, 2, 3, 1]);
    }

    #[test]
    fn groups_nearby_stations() {
        let doc = json!({
            "points": [
                {"id": 1, "pos": [0.0, 0.0], "dir": 0, "sta": 1},
                {"id": 2, "pos": [10.0, 0.0], "dir": 0, "sta": 1},
                {"id": 3, "pos": [500.0, 500.0], "dir": 0, "sta": 1},
            ],
            "lines": [],
        });
        let map = parse_geomap(&doc, &Value::Null).unwrap();
        assert_eq!(map.station_groups.len(), 1);
        let group = map.station_groups.values().next().unwrap();
        assert_eq!(group.id, 1);
        assert_eq!(group.station_ids, vec![1, 2]);
        assert_eq!(map.point_to_group.get(&1), Some(&1));
        assert_eq!(map.point_to_group.get(&2), Some(&1));
        assert!(!map.point_to_group.contains_key(&3));
    }

    #[test]
    fn group_link_joins_and_connect_link_adds_line() {
        let doc = json!({
            "points": [
                {"id": 1, "pos": [0.0, 0.0], "dir": 0, "sta": 1},
                {"id": 2, "pos": [900.0, 0.0], "dir": 0, "sta": 1},
                {"id": 3, "pos": [0.0, 900.0], "dir": 0, "sta": 1},
            ],
            "lines": [{"id": 7, "pts": [1, 2]}],
            "pointLinks": [
                {"pts": [1, 2], "type": 4},
                {"pts": [2, 3], "type": 0},
            ],
        });
        let map = parse_geomap(&doc, &Value::Null).unwrap();
        assert_eq!(map.station_groups.len(), 1);
        // the thick-line link appends a fresh two-point line after id 7
        assert_eq!(map.lines[&8].point_ids, vec![2, 3]);
        assert!(!map.lines[&8].is_loop);
    }

    #[test]
    fn parent_lines_become_friends() {
        let doc = json!({
            "points": [
                {"id": 1, "pos": [0.0, 0.0], "dir": 0, "sta": 1},
                {"id": 2, "pos": [800.0, 0.0], "dir": 0, "sta": 1},
                {"id": 3, "pos": [0.0, 800.0], "dir": 0, "sta": 1},
            ],
            "lines": [
                {"id": 1, "pts": [1, 2]},
                {"id": 2, "pts": [1, 3], "parent": 1},
                {"id": 3, "pts": [2, 3], "parent": 1},
            ],
        });
        let map = parse_geomap(&doc, &Value::Null).unwrap();
        assert!(map.config.friend_lines.contains(&(2, 1)));
        assert!(map.config.friend_lines.contains(&(1, 2)));
        // siblings of the same parent
        assert!(map.config.friend_lines.contains(&(2, 3)));
        assert!(!map.lines[&1].is_simple);
    }

    #[test]
    fn config_resolves_names_and_normalizes_segment_lengths() {
        let doc = json!({
            "points": [
                {"id": 1, "pos": [0.0, 0.0], "dir": 0, "sta": 1},
                {"id": 2, "pos": [800.0, 0.0], "dir": 0, "sta": 1},
            ],
            "lines": [
                {"id": 1, "name": "Red", "pts": [1, 2]},
                {"id": 2, "name": "Blue", "pts": [2, 1]},
            ],
        });
        let config = json!({
            "max_rc_steps": 10,
            "merged_lines": [["Red", 2]],
            "segmented_lines": [
                {"line": "Red", "segment_length": 5},
                "Blue",
            ],
        });
        let map = parse_geomap(&doc, &config).unwrap();
        assert!(map.config.merged_lines.contains(&(1, 2)));
        // 5 <= max_rc_steps, lifted to 11
        assert_eq!(map.config.segmented_lines[&1], 11);
        // bare entry keeps its optimizer group key (2nd position)
        assert_eq!(map.config.segmented_lines[&2], -2);
    }

    #[test]
    fn segmented_group_arrays_share_a_key() {
        let doc = json!({
            "points": [
                {"id": 1, "pos": [0.0, 0.0], "dir": 0, "sta": 1},
                {"id": 2, "pos": [800.0, 0.0], "dir": 0, "sta": 1},
            ],
            "lines": [
                {"id": 1, "pts": [1, 2]},
                {"id": 2, "pts": [2, 1]},
                {"id": 3, "pts": [1, 2]},
            ],
        });
        let config = json!({ "segmented_lines": [[1, 2], [3]] });
        let map = parse_geomap(&doc, &config).unwrap();
        assert_eq!(map.config.segmented_lines[&1], -1);
        assert_eq!(map.config.segmented_lines[&2], -1);
        assert_eq!(map.config.segmented_lines[&3], -2);
    }

    #[test]
    fn point_sizes_follow_width_mapping() {
        let doc = json!({
            "config": {"lineWidthMapped": {"2.5": {"staSize": 4.0}}},
            "points": [
                {"id": 1, "pos": [0.0, 0.0], "dir": 0, "sta": 1},
                {"id": 2, "pos": [600.0, 0.0], "dir": 0, "sta": 1},
            ],
            "lines": [{"id": 1, "pts": [1, 2], "width": "2.5"}],
        });
        let map = parse_geomap(&doc, &Value::Null).unwrap();
        assert_eq!(map.points[&1].size, 4.0);
    }

    #[test]
    fn rejects_malformed_documents() {
        let doc = json!({"points": [{"id": "not a number"}]});
        assert!(parse_geomap(&doc, &Value::Null).is_err());
    }
}
