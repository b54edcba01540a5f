//! Insertion of auxiliary corner points.
//!
//! Diagram polylines connect points whose directional style (orthogonal or
//! diagonal) constrains how a segment may leave them. A segment that cannot
//! be drawn as one straight stroke gets auxiliary node points spliced in so
//! that every stroke is either axis-aligned or at 45 degrees. This runs once
//! while the geometric map is built; the route search later treats auxiliary
//! points as ordinary nodes.

use crate::geometry::{EPSILON, GeoMap, Point, PointDir, PointKind, Position, Vec2};

fn is_zero(val: f64) -> bool {
    val.abs() < EPSILON
}

/// Which of the eight direction sectors (modulo half-turn) a segment falls
/// in. `Horizontal`..`BelowAntidiagonal` follow the plane counter-clockwise
/// starting at the x axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentRel {
    Same,
    Horizontal,
    BelowDiagonal,
    Diagonal,
    AboveDiagonal,
    Vertical,
    AboveAntidiagonal,
    Antidiagonal,
    BelowAntidiagonal,
}

impl SegmentRel {
    /// Sectors that need no auxiliary corner regardless of point styles.
    fn is_straight(self) -> bool {
        matches!(
            self,
            SegmentRel::Horizontal
                | SegmentRel::Vertical
                | SegmentRel::Diagonal
                | SegmentRel::Antidiagonal
        )
    }
}

/// Where the corner(s) of a bent segment are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CornerFill {
    /// Single corner near the upper end.
    Top,
    /// Single corner near the lower end.
    Bottom,
    /// Two corners, leaving both endpoints along a diagonal stroke.
    MidDiag,
    /// Two corners, leaving both endpoints along an axis-aligned stroke.
    MidOrtho,
}

fn classify(x_diff: f64, y_diff: f64) -> (SegmentRel, bool) {
    if is_zero(x_diff) {
        if is_zero(y_diff) {
            return (SegmentRel::Same, false);
        }
        return (SegmentRel::Vertical, y_diff > 0.0);
    }
    if is_zero(y_diff) {
        return (SegmentRel::Horizontal, x_diff > 0.0);
    }
    if is_zero(x_diff - y_diff) {
        return (SegmentRel::Diagonal, x_diff > 0.0);
    }
    if is_zero(x_diff + y_diff) {
        return (SegmentRel::Antidiagonal, y_diff > 0.0);
    }
    if (y_diff > 0.0 && x_diff > y_diff) || (y_diff < 0.0 && x_diff < y_diff) {
        return (SegmentRel::BelowDiagonal, y_diff > 0.0);
    }
    if (x_diff > 0.0 && y_diff > x_diff) || (x_diff < 0.0 && y_diff < x_diff) {
        return (SegmentRel::AboveDiagonal, x_diff > 0.0);
    }
    if (y_diff > 0.0 && -x_diff < y_diff) || (y_diff < 0.0 && x_diff < -y_diff) {
        return (SegmentRel::AboveAntidiagonal, y_diff > 0.0);
    }
    (SegmentRel::BelowAntidiagonal, x_diff < 0.0)
}

fn corner_fill_unordered(
    a: Position,
    b: Position,
    x_diff: f64,
    y_diff: f64,
    rel: SegmentRel,
    fill: CornerFill,
) -> Vec<Position> {
    if rel.is_straight() {
        return Vec::new();
    }

    match rel {
        SegmentRel::BelowDiagonal => {
            let bias = -x_diff + y_diff;
            match fill {
                CornerFill::Top => vec![Position::new(a.x + bias, a.y)],
                CornerFill::Bottom => vec![Position::new(b.x - bias, b.y)],
                CornerFill::MidOrtho => {
                    let bias = bias / 2.0;
                    vec![
                        Position::new(a.x + bias, a.y),
                        Position::new(b.x - bias, b.y),
                    ]
                }
                CornerFill::MidDiag => {
                    let bias = -y_diff / 2.0;
                    vec![
                        Position::new(a.x + bias, a.y + bias),
                        Position::new(b.x - bias, b.y - bias),
                    ]
                }
            }
        }
        SegmentRel::AboveDiagonal => {
            let bias = x_diff - y_diff;
            match fill {
                CornerFill::Top => vec![Position::new(b.x, b.y - bias)],
                CornerFill::Bottom => vec![Position::new(a.x, a.y + bias)],
                CornerFill::MidOrtho => {
                    let bias = bias / 2.0;
                    vec![
                        Position::new(a.x, a.y + bias),
                        Position::new(b.x, b.y - bias),
                    ]
                }
                CornerFill::MidDiag => {
                    let bias = -x_diff / 2.0;
                    vec![
                        Position::new(a.x + bias, a.y + bias),
                        Position::new(b.x - bias, b.y - bias),
                    ]
                }
            }
        }
        SegmentRel::AboveAntidiagonal => {
            let bias = -x_diff - y_diff;
            match fill {
                CornerFill::Top => vec![Position::new(b.x, b.y - bias)],
                CornerFill::Bottom => vec![Position::new(a.x, a.y + bias)],
                CornerFill::MidOrtho => {
                    let bias = bias / 2.0;
                    vec![
                        Position::new(a.x, a.y + bias),
                        Position::new(b.x, b.y - bias),
                    ]
                }
                CornerFill::MidDiag => {
                    let bias = -x_diff / 2.0;
                    vec![
                        Position::new(a.x + bias, a.y - bias),
                        Position::new(b.x - bias, b.y + bias),
                    ]
                }
            }
        }
        SegmentRel::BelowAntidiagonal => {
            let bias = x_diff + y_diff;
            match fill {
                CornerFill::Top => vec![Position::new(a.x - bias, a.y)],
                CornerFill::Bottom => vec![Position::new(b.x + bias, b.y)],
                CornerFill::MidOrtho => {
                    let bias = bias / 2.0;
                    vec![
                        Position::new(a.x - bias, a.y),
                        Position::new(b.x + bias, b.y),
                    ]
                }
                CornerFill::MidDiag => {
                    let bias = y_diff / 2.0;
                    vec![
                        Position::new(a.x + bias, a.y - bias),
                        Position::new(b.x - bias, b.y + bias),
                    ]
                }
            }
        }
        _ => Vec::new(),
    }
}

fn corner_fill(
    a: Position,
    b: Position,
    x_diff: f64,
    y_diff: f64,
    rel: SegmentRel,
    reversed: bool,
    fill: CornerFill,
) -> Vec<Position> {
    let mut corners = corner_fill_unordered(a, b, x_diff, y_diff, rel, fill);
    if reversed {
        corners.reverse();
    }
    corners
}

/// A polyline segment with its planned auxiliary corners. `ill` grades how
/// well-posed the segment is: 0 fine, 1 corrected with corners, 2 cannot be
/// drawn with the endpoint styles at all.
#[derive(Debug, Clone)]
struct PlannedSegment {
    a: Position,
    corners: Vec<Position>,
    b: Position,
    ill: u8,
}

#[derive(Debug, Clone, Copy)]
struct Ray {
    origin: Position,
    dir: Vec2,
}

impl Ray {
    fn between(from: Position, to: Position) -> Ray {
        let dir = to - from;
        let len = dir.length();
        if len < EPSILON {
            return Ray {
                origin: from,
                dir: Vec2::default(),
            };
        }
        Ray {
            origin: from,
            dir: dir / len,
        }
    }

    fn perpendicular_to(self, other: Ray) -> bool {
        self.dir.dot(other.dir).abs() < EPSILON
    }

    fn parallel_to(self, other: Ray) -> bool {
        self.dir.cross(other.dir).abs() < EPSILON
    }

    fn distance_to(self, point: Position) -> f64 {
        self.dir.cross(point - self.origin).abs()
    }

    fn rotated_90(self) -> Ray {
        Ray {
            origin: self.origin,
            dir: self.dir.perpendicular(),
        }
    }

    fn intersect(self, other: Ray, perp_only: bool) -> Option<Position> {
        if self.parallel_to(other) {
            return None;
        }
        if perp_only && !self.perpendicular_to(other) {
            return None;
        }
        let diff = other.origin - self.origin;
        let cross = self.dir.cross(other.dir);
        if cross.abs() < EPSILON {
            return None;
        }
        let t = diff.cross(other.dir) / cross;
        Some(self.origin + self.dir * t)
    }
}

fn plan_segment(point_a: &Point, point_b: &Point) -> PlannedSegment {
    let mut x_diff = point_a.pos.x - point_b.pos.x;
    let mut y_diff = point_a.pos.y - point_b.pos.y;

    let (rel, reversed) = classify(x_diff, y_diff);
    if rel == SegmentRel::Same {
        return PlannedSegment {
            a: point_a.pos,
            corners: Vec::new(),
            b: point_b.pos,
            ill: 0,
        };
    }

    let (mut pa, mut pb) = (point_a, point_b);
    if reversed {
        std::mem::swap(&mut pa, &mut pb);
        x_diff = -x_diff;
        y_diff = -y_diff;
    }

    let mut ill = 0u8;
    let corners = if pa.dir == pb.dir {
        let fill = if pa.dir == PointDir::Diagonal {
            CornerFill::MidDiag
        } else {
            CornerFill::MidOrtho
        };
        let corners = corner_fill(pa.pos, pb.pos, x_diff, y_diff, rel, reversed, fill);
        if corners.is_empty() {
            // A straight stroke exists, but may be incompatible with the
            // shared style: orthogonal points cannot leave at 45 degrees,
            // diagonal points cannot leave along an axis.
            let incompatible = match pa.dir {
                PointDir::Orthogonal => {
                    matches!(rel, SegmentRel::Diagonal | SegmentRel::Antidiagonal)
                }
                PointDir::Diagonal => {
                    matches!(rel, SegmentRel::Horizontal | SegmentRel::Vertical)
                }
            };
            ill = if incompatible { 2 } else { 0 };
        } else {
            ill = 1;
        }
        corners
    } else if pa.dir == PointDir::Diagonal {
        let fill = if matches!(rel, SegmentRel::AboveDiagonal | SegmentRel::AboveAntidiagonal) {
            CornerFill::Top
        } else {
            CornerFill::Bottom
        };
        corner_fill(pa.pos, pb.pos, x_diff, y_diff, rel, reversed, fill)
    } else {
        let fill = if matches!(rel, SegmentRel::AboveDiagonal | SegmentRel::AboveAntidiagonal) {
            CornerFill::Bottom
        } else {
            CornerFill::Top
        };
        corner_fill(pa.pos, pb.pos, x_diff, y_diff, rel, reversed, fill)
    };

    PlannedSegment {
        a: point_a.pos,
        corners,
        b: point_b.pos,
        ill,
    }
}

/// Correct an end segment against its single neighbor. `neib_ref -> share`
/// fixes the neighbor's stroke direction; the corrected corner must sit on
/// that ray's extension, perpendicular to the stroke through the tip.
fn correct_end(
    neib_ref: Position,
    share: Position,
    this_ref: Option<Position>,
    this_tip: Position,
) -> Option<Position> {
    let neib_ray = Ray::between(neib_ref, share);
    match this_ref {
        None => {
            if neib_ray.distance_to(this_tip) < EPSILON {
                // Tip already lies on the extension.
                return None;
            }
            let mut this_ray = neib_ray.rotated_90();
            this_ray.origin = this_tip;
            neib_ray.intersect(this_ray, true)
        }
        Some(reference) => {
            let mut this_ray = Ray::between(reference, share);
            this_ray.origin = this_tip;
            if neib_ray.perpendicular_to(this_ray) {
                neib_ray.intersect(this_ray, true)
            } else {
                None
            }
        }
    }
}

/// Rework ill-posed segments using their neighbors' stroke directions.
fn justify_ill_segments(segs: &mut [PlannedSegment]) {
    if segs.len() <= 1 {
        return;
    }

    let ill_idxs: Vec<usize> = (0..segs.len()).filter(|&i| segs[i].ill > 0).collect();

    for i in ill_idxs {
        if i > 0 && i < segs.len() - 1 {
            let prev_seg = &segs[i - 1];
            let next_seg = &segs[i + 1];

            let prev_helps = prev_seg.ill < segs[i].ill;
            let next_helps = next_seg.ill < segs[i].ill;
            if !(prev_helps && next_helps) {
                continue;
            }

            let prev_ref = prev_seg.corners.last().copied().unwrap_or(prev_seg.a);
            let next_ref = next_seg.corners.first().copied().unwrap_or(next_seg.b);
            let prev_ray = Ray::between(prev_ref, prev_seg.b);
            let next_ray = Ray::between(next_ref, next_seg.a);

            if let Some(corner) = prev_ray.intersect(next_ray, true) {
                segs[i].corners = vec![corner];
            }
        } else if i == segs.len() - 1 {
            let prev_seg = &segs[i - 1];
            let can_help = prev_seg.ill <= segs[i].ill && prev_seg.ill < 2;
            if !(segs[i].ill > 0 && can_help) {
                continue;
            }
            let neib_ref = prev_seg.corners.last().copied().unwrap_or(prev_seg.a);
            let share = segs[i].a;
            let this_ref = if segs[i].corners.len() > 1 {
                Some(segs[i].corners[0])
            } else {
                None
            };
            let this_tip = segs[i].b;
            if let Some(corner) = correct_end(neib_ref, share, this_ref, this_tip) {
                segs[i].corners = vec![corner];
            }
        } else {
            let next_seg = &segs[i + 1];
            let can_help = next_seg.ill <= segs[i].ill && next_seg.ill < 2;
            if !(segs[i].ill > 0 && can_help) {
                continue;
            }
            let neib_ref = next_seg.corners.first().copied().unwrap_or(next_seg.b);
            let share = segs[i].b;
            let this_ref = if segs[i].corners.len() > 1 {
                Some(segs[i].corners[1])
            } else {
                None
            };
            let this_tip = segs[i].a;
            if let Some(corner) = correct_end(neib_ref, share, this_ref, this_tip) {
                segs[i].corners = vec![corner];
            }
        }
    }
}

/// Splice auxiliary corner points into every line of the map. New points get
/// fresh ids after the current maximum and are plain orthogonal nodes.
pub fn insert_auxiliary_points(map: &mut GeoMap) {
    let mut next_id = map.points.keys().next_back().copied().unwrap_or(0) + 1;

    let line_ids: Vec<i64> = map.lines.keys().copied().collect();
    for line_id in line_ids {
        let line = &map.lines[&line_id];
        if line.point_ids.len() < 2 {
            continue;
        }
        let point_ids = line.point_ids.clone();
        let is_ring = line.is_loop;

        // A dangling point reference makes corner planning meaningless for
        // the whole polyline; leave such lines untouched.
        if point_ids.iter().any(|pid| !map.points.contains_key(pid)) {
            log::warn!("line {line_id} references missing points, skipping auxiliary pass");
            continue;
        }

        let seg = |a: i64, b: i64, map: &GeoMap| plan_segment(&map.points[&a], &map.points[&b]);

        let mut segs: Vec<PlannedSegment> = Vec::new();
        if is_ring && point_ids.len() >= 3 {
            // Margin segment ahead of the seam so the first real segment has
            // a neighbor to correct against.
            segs.push(seg(point_ids[point_ids.len() - 2], point_ids[0], map));
        }
        for window in point_ids.windows(2) {
            segs.push(seg(window[0], window[1], map));
        }
        if is_ring && point_ids.len() >= 3 {
            segs.push(seg(point_ids[point_ids.len() - 1], point_ids[1], map));
        }

        justify_ill_segments(&mut segs);

        if segs.is_empty() {
            continue;
        }
        if is_ring && segs.len() > 2 {
            segs.remove(0);
            segs.pop();
        }

        let mut new_point_ids = vec![point_ids[0]];
        for (i, planned) in segs.iter().enumerate() {
            for corner in &planned.corners {
                let aux = Point {
                    id: next_id,
                    size: 1.0,
                    name: String::new(),
                    pos: *corner,
                    dir: PointDir::Orthogonal,
                    kind: PointKind::Node,
                };
                map.points.insert(next_id, aux);
                new_point_ids.push(next_id);
                next_id += 1;
            }
            if i + 1 < point_ids.len() {
                new_point_ids.push(point_ids[i + 1]);
            }
        }
        if !is_ring && new_point_ids.last() != point_ids.last() {
            new_point_ids.push(*point_ids.last().unwrap());
        }

        map.lines.get_mut(&line_id).unwrap().point_ids = new_point_ids;
    }
}
