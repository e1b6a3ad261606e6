use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let x_diff = self.x - other.x;
        let y_diff = self.y - other.y;
        (x_diff.powi(2) + y_diff.powi(2)).sqrt()
    }

    pub fn manhattan_distance(&self, other: &Point) -> f64 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// Snap both coordinates to multiples of `step`.
    pub fn quantize(&self, step: f64) -> Point {
        if step <= 0.0 {
            return *self;
        }
        Point {
            x: (self.x / step).round() * step,
            y: (self.y / step).round() * step,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned rectangle in diagram coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Rect { x, y, w, h }
    }

    pub fn from_corners(a: Point, b: Point) -> Self {
        let left = a.x.min(b.x);
        let top = a.y.min(b.y);
        Rect {
            x: left,
            y: top,
            w: a.x.max(b.x) - left,
            h: a.y.max(b.y) - top,
        }
    }

    pub fn left(&self) -> f64 {
        self.x
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.w / 2.0,
            y: self.y + self.h / 2.0,
        }
    }

    pub fn area(&self) -> f64 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// A box with zero width or height has not been laid out yet.
    pub fn is_measurable(&self) -> bool {
        self.w > 0.0 && self.h > 0.0
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.w.is_finite() && self.h.is_finite()
    }

    pub fn inflate(&self, margin: f64) -> Rect {
        Rect {
            x: self.x - margin,
            y: self.y - margin,
            w: self.w + 2.0 * margin,
            h: self.h + 2.0 * margin,
        }
    }

    /// Strict AABB overlap: rectangles that merely touch do not overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.left() < other.right()
            && other.left() < self.right()
            && self.top() < other.bottom()
            && other.top() < self.bottom()
    }

    pub fn union(&self, other: &Rect) -> Rect {
        let left = self.left().min(other.left());
        let top = self.top().min(other.top());
        Rect {
            x: left,
            y: top,
            w: self.right().max(other.right()) - left,
            h: self.bottom().max(other.bottom()) - top,
        }
    }
}

/// Box shapes as hosts report them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawBox {
    Xywh { x: f64, y: f64, w: f64, h: f64 },
    Ltrb { left: f64, top: f64, right: f64, bottom: f64 },
}

impl RawBox {
    /// Convert to a [`Rect`] with non-negative extent. Non-finite input yields `None`.
    pub fn normalize(&self) -> Option<Rect> {
        let rect = match *self {
            RawBox::Xywh { x, y, w, h } => {
                Rect::from_corners(Point::new(x, y), Point::new(x + w, y + h))
            }
            RawBox::Ltrb {
                left,
                top,
                right,
                bottom,
            } => Rect::from_corners(Point::new(left, top), Point::new(right, bottom)),
        };
        if rect.is_finite() {
            Some(rect)
        } else {
            None
        }
    }
}

impl From<Rect> for RawBox {
    fn from(rect: Rect) -> Self {
        RawBox::Xywh {
            x: rect.x,
            y: rect.y,
            w: rect.w,
            h: rect.h,
        }
    }
}

/// Order in which an elbow route travels the two axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisOrder {
    XThenY,
    YThenX,
}

impl AxisOrder {
    pub fn parse(value: &str) -> Option<AxisOrder> {
        match value.trim().to_ascii_lowercase().as_str() {
            "x" | "h" | "horizontal" | "x-then-y" | "x_then_y" | "xy" => Some(AxisOrder::XThenY),
            "y" | "v" | "vertical" | "y-then-x" | "y_then_x" | "yx" => Some(AxisOrder::YThenX),
            _ => None,
        }
    }

    /// The corner point of the single-elbow route from `start` to `end`.
    pub fn elbow(&self, start: Point, end: Point) -> Point {
        match self {
            AxisOrder::XThenY => Point::new(end.x, start.y),
            AxisOrder::YThenX => Point::new(start.x, end.y),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Direction::Up, Direction::Down, Direction::Left, Direction::Right];

    pub fn delta(&self) -> (i64, i64) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[default]
    Auto,
    Top,
    Bottom,
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Align {
    Start,
    #[default]
    Center,
    End,
}

/// Where on the target box a connector attaches.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorRule {
    pub side: Side,
    pub align: Align,
    pub gap: f64,
}

impl AnchorRule {
    /// The side of `target` this rule attaches to when approached from `start`.
    pub fn effective_side(&self, start: Point, target: &Rect) -> Side {
        if self.side != Side::Auto {
            return self.side;
        }
        let center = target.center();
        let dx = start.x - center.x;
        let dy = start.y - center.y;
        let half_w = (target.w / 2.0).max(f64::EPSILON);
        let half_h = (target.h / 2.0).max(f64::EPSILON);
        if (dx / half_w).abs() >= (dy / half_h).abs() {
            if dx < 0.0 {
                Side::Left
            } else {
                Side::Right
            }
        } else if dy < 0.0 {
            Side::Top
        } else {
            Side::Bottom
        }
    }

    pub fn resolve(&self, start: Point, target: &Rect) -> Point {
        let along = |lo: f64, hi: f64| match self.align {
            Align::Start => lo,
            Align::Center => (lo + hi) / 2.0,
            Align::End => hi,
        };
        match self.effective_side(start, target) {
            Side::Top => Point::new(along(target.left(), target.right()), target.top() - self.gap),
            Side::Bottom => Point::new(along(target.left(), target.right()), target.bottom() + self.gap),
            Side::Left => Point::new(target.left() - self.gap, along(target.top(), target.bottom())),
            Side::Right | Side::Auto => Point::new(target.right() + self.gap, along(target.top(), target.bottom())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_ltrb_and_flipped_boxes() {
        let ltrb = RawBox::Ltrb {
            left: 10.0,
            top: 20.0,
            right: 30.0,
            bottom: 60.0,
        };
        assert_eq!(ltrb.normalize(), Some(Rect::new(10.0, 20.0, 20.0, 40.0)));

        let flipped = RawBox::Xywh {
            x: 10.0,
            y: 10.0,
            w: -5.0,
            h: 5.0,
        };
        assert_eq!(flipped.normalize(), Some(Rect::new(5.0, 10.0, 5.0, 5.0)));

        let broken = RawBox::Xywh {
            x: f64::NAN,
            y: 0.0,
            w: 1.0,
            h: 1.0,
        };
        assert_eq!(broken.normalize(), None);
    }

    #[test]
    fn raw_box_deserializes_either_shape() {
        let xywh: RawBox = serde_json::from_str(r#"{"x":1,"y":2,"w":3,"h":4}"#).unwrap();
        let ltrb: RawBox = serde_json::from_str(r#"{"left":1,"top":2,"right":4,"bottom":6}"#).unwrap();
        assert_eq!(xywh.normalize(), ltrb.normalize());
    }

    #[test]
    fn touching_rectangles_do_not_overlap() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(10.0, 0.0, 10.0, 10.0);
        let c = Rect::new(9.0, 9.0, 10.0, 10.0);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
    }

    #[test]
    fn auto_side_faces_the_start_point() {
        let target = Rect::new(100.0, 0.0, 40.0, 20.0);
        let rule = AnchorRule {
            gap: 4.0,
            ..AnchorRule::default()
        };
        assert_eq!(rule.effective_side(Point::new(0.0, 10.0), &target), Side::Left);
        assert_eq!(rule.resolve(Point::new(0.0, 10.0), &target), Point::new(96.0, 10.0));
        assert_eq!(rule.effective_side(Point::new(120.0, 200.0), &target), Side::Bottom);
    }

    #[test]
    fn alignment_moves_along_the_side() {
        let target = Rect::new(0.0, 0.0, 40.0, 20.0);
        let rule = AnchorRule {
            side: Side::Top,
            align: Align::End,
            gap: 0.0,
        };
        assert_eq!(rule.resolve(Point::new(0.0, -50.0), &target), Point::new(40.0, 0.0));
    }

    #[test]
    fn axis_order_elbows() {
        let start = Point::new(0.0, 0.0);
        let end = Point::new(100.0, 50.0);
        assert_eq!(AxisOrder::XThenY.elbow(start, end), Point::new(100.0, 0.0));
        assert_eq!(AxisOrder::YThenX.elbow(start, end), Point::new(0.0, 50.0));
        assert_eq!(AxisOrder::parse("x-then-y"), Some(AxisOrder::XThenY));
        assert_eq!(AxisOrder::parse("diagonal"), None);
    }
}
