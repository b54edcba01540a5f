use ahash::{AHashMap, AHashSet};
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub, SubAssign};

pub const EPSILON: f64 = 1e-9;

/// 2D vector over the diagram plane. Also used as an absolute position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

pub type Position = Vec2;

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self {
        Vec2 { x, y }
    }

    pub fn dot(self, other: Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn cross(self, other: Vec2) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn normalized(self) -> Vec2 {
        let len = self.length();
        Vec2::new(self.x / len, self.y / len)
    }

    /// Rotated 90 degrees counter-clockwise.
    pub fn perpendicular(self) -> Vec2 {
        Vec2::new(-self.y, self.x)
    }

    pub fn angle(self) -> f64 {
        self.y.atan2(self.x)
    }

    pub fn polar(angle: f64, length: f64) -> Vec2 {
        Vec2::new(angle.cos() * length, angle.sin() * length)
    }

    pub fn is_nan(self) -> bool {
        self.x.is_nan() || self.y.is_nan()
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;
    fn mul(self, scalar: f64) -> Vec2 {
        Vec2::new(self.x * scalar, self.y * scalar)
    }
}

impl Div<f64> for Vec2 {
    type Output = Vec2;
    fn div(self, scalar: f64) -> Vec2 {
        Vec2::new(self.x / scalar, self.y / scalar)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, other: Vec2) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, other: Vec2) {
        self.x -= other.x;
        self.y -= other.y;
    }
}

impl MulAssign<f64> for Vec2 {
    fn mul_assign(&mut self, scalar: f64) {
        self.x *= scalar;
        self.y *= scalar;
    }
}

impl DivAssign<f64> for Vec2 {
    fn div_assign(&mut self, scalar: f64) {
        self.x /= scalar;
        self.y /= scalar;
    }
}

/// Directional style of a point, constraining how segments leave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointDir {
    Orthogonal,
    Diagonal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointKind {
    Node,
    Station,
}

#[derive(Debug, Clone)]
pub struct Point {
    pub id: i64,
    pub size: f64,
    pub name: String,
    pub pos: Position,
    pub dir: PointDir,
    pub kind: PointKind,
}

#[derive(Debug, Clone)]
pub struct Line {
    pub id: i64,
    pub name: String,
    pub point_ids: Vec<i64>,
    pub is_loop: bool,
    pub is_simple: bool,
    pub parent_id: i64,
}

#[derive(Debug, Clone)]
pub struct StationGroup {
    pub id: i64,
    pub station_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    ThickLine,
    ThinLine,
    DottedLine1,
    DottedLine2,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Connect,
    Group,
    None,
}

/// Options steering the conversion. All fields have working defaults; the
/// optional config document overrides them selectively.
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    pub max_length: i64,
    pub max_rc_steps: i64,
    pub auto_group_distance: f64,
    pub merge_consecutive_duplicates: bool,
    pub optimize_segmentation: bool,
    pub max_iterations: i64,
    pub link_modes: AHashMap<LinkKind, LinkMode>,
    pub friend_lines: AHashSet<(i64, i64)>,
    pub merged_lines: AHashSet<(i64, i64)>,
    /// Positive values are segment lengths in stations. Negative values are
    /// optimizer group keys, resolved before any route search runs.
    pub segmented_lines: BTreeMap<i64, i64>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        let mut link_modes = AHashMap::new();
        link_modes.insert(LinkKind::ThickLine, LinkMode::Connect);
        link_modes.insert(LinkKind::ThinLine, LinkMode::Connect);
        link_modes.insert(LinkKind::DottedLine1, LinkMode::None);
        link_modes.insert(LinkKind::DottedLine2, LinkMode::None);
        link_modes.insert(LinkKind::Group, LinkMode::Group);
        ConvertConfig {
            max_length: 128,
            max_rc_steps: 16,
            auto_group_distance: 25.0,
            merge_consecutive_duplicates: true,
            optimize_segmentation: false,
            max_iterations: 4,
            link_modes,
            friend_lines: AHashSet::new(),
            merged_lines: AHashSet::new(),
            segmented_lines: BTreeMap::new(),
        }
    }
}

/// The geometric transit diagram after parsing and normalization: the
/// read-only input of the conversion pipeline.
///
/// Points, lines and groups live in ordered maps so that every walk over
/// them is reproducible; the whole pipeline must be a pure function of this
/// structure.
#[derive(Debug, Clone)]
pub struct GeoMap {
    pub width: f64,
    pub height: f64,
    pub points: BTreeMap<i64, Point>,
    pub lines: BTreeMap<i64, Line>,
    pub station_groups: BTreeMap<i64, StationGroup>,
    pub point_to_group: AHashMap<i64, i64>,
    pub config: ConvertConfig,
}

impl GeoMap {
    /// Whether a run may continue p1 -> p2 -> p3 without doubling back: the
    /// turn at p2 must not be reflex (non-negative dot product).
    pub fn can_move_through(&self, p1_id: i64, p2_id: i64, p3_id: i64) -> bool {
        let (Some(p1), Some(p2), Some(p3)) = (
            self.points.get(&p1_id),
            self.points.get(&p2_id),
            self.points.get(&p3_id),
        ) else {
            return false;
        };
        (p2.pos - p1.pos).dot(p3.pos - p2.pos) >= 0.0
    }

    /// Arithmetic mean of the member station positions. Members missing from
    /// the point table are skipped.
    pub fn group_pos(&self, group_id: i64) -> Position {
        let Some(group) = self.station_groups.get(&group_id) else {
            return Position::default();
        };
        let mut sum = Position::default();
        let mut count = 0usize;
        for station_id in &group.station_ids {
            if let Some(point) = self.points.get(station_id) {
                sum += point.pos;
                count += 1;
            }
        }
        if count == 0 {
            return Position::default();
        }
        sum / count as f64
    }

    pub fn normalized_pos(&self, pos: Position) -> Position {
        Position::new(pos.x / self.width, pos.y / self.height)
    }

    /// Emit id of a station point: its group id when grouped, its own id
    /// otherwise.
    pub fn station_emit_id(&self, point_id: i64) -> i64 {
        self.point_to_group.get(&point_id).copied().unwrap_or(point_id)
    }
}
