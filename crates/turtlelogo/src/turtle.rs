use std::f64::consts::FRAC_PI_2;

use kurbo::{Point, Rect, Vec2};

use crate::error::ErrorKind;

pub const NUM_COLOURS: i64 = 106;
pub const COL_BLACK: i64 = 90;
pub const COL_WHITE: i64 = 105;
pub const WIN_DEFAULT_COLOUR: i64 = COL_BLACK;
pub const TURTLE_SIZE: f64 = 20.0;

/// What happens when the turtle reaches the window edge.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Edge {
    #[default]
    Unbounded,
    Fenced,
    Wrapped,
}

impl Edge {
    pub fn name(self) -> &'static str {
        match self {
            Edge::Unbounded => "UNBOUNDED",
            Edge::Fenced => "FENCED",
            Edge::Wrapped => "WRAPPED",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum LineStyle {
    #[default]
    Solid,
    Dash,
    DoubleDash,
}

impl LineStyle {
    pub fn name(self) -> &'static str {
        match self {
            LineStyle::Solid => "SOLID",
            LineStyle::Dash => "DASH",
            LineStyle::DoubleDash => "DOUBLE_DASH",
        }
    }

    pub fn parse(s: &str) -> Option<LineStyle> {
        [LineStyle::Solid, LineStyle::Dash, LineStyle::DoubleDash]
            .into_iter()
            .find(|style| style.name().eq_ignore_ascii_case(s))
    }
}

/// A drawn line.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Segment {
    pub from: Point,
    pub to: Point,
    pub colour: i64,
    pub width: i64,
    pub style: LineStyle,
}

/// A snapshot of the turtle, as reported by `TF`.
#[derive(Clone, Debug, PartialEq)]
pub struct TurtleFacts {
    pub pos: Point,
    pub heading: f64,
    pub size: f64,
    pub line_width: i64,
    pub colour: i64,
    pub pen_down: bool,
    pub visible: bool,
    pub filling: bool,
    pub edge: Edge,
    pub style: LineStyle,
    pub window_shown: bool,
}

/// Whatever draws the turtle. Headings are in degrees, 0 is up and angles
/// grow clockwise. The origin is the top left corner of the window.
pub trait Renderer {
    fn reset(&mut self);
    /// Forget everything drawn, leaving the turtle alone.
    fn clear(&mut self);
    fn home(&mut self);
    fn position(&self) -> Point;
    fn heading(&self) -> f64;
    fn window(&self) -> Rect;
    fn set_pos(&mut self, to: Point) -> Result<(), ErrorKind>;
    fn set_heading(&mut self, degrees: f64);
    fn set_visible(&mut self, visible: bool);
    fn set_pen_down(&mut self, down: bool);
    fn set_colour(&mut self, colour: i64) -> Result<(), ErrorKind>;
    fn set_background(&mut self, colour: i64) -> Result<(), ErrorKind>;
    fn set_size(&mut self, size: f64) -> Result<(), ErrorKind>;
    fn set_line_width(&mut self, width: i64) -> Result<(), ErrorKind>;
    fn set_line_style(&mut self, style: LineStyle);
    fn set_edge(&mut self, edge: Edge);
    /// Start recording lines for the next `fill`.
    fn start_fill(&mut self) -> Result<(), ErrorKind>;
    fn fill(&mut self) -> Result<(), ErrorKind>;
    fn dot(&mut self, at: Point);
    fn show_window(&mut self, shown: bool);
    fn resize(&mut self, width: f64, height: f64);
    fn facts(&self) -> TurtleFacts;

    fn forward(&mut self, dist: f64) -> Result<(), ErrorKind> {
        let dir = Vec2::from_angle(self.heading().to_radians() - FRAC_PI_2);
        let to = self.position() + dir * dist;
        self.set_pos(to)
    }

    fn turn(&mut self, degrees: f64) {
        self.set_heading(self.heading() + degrees);
    }

    fn face(&mut self, target: Point) {
        let d = target - self.position();
        // Screen y grows downwards.
        let heading = d.x.atan2(-d.y).to_degrees();
        self.set_heading(heading);
    }
}

fn check_colour(colour: i64) -> Result<(), ErrorKind> {
    if (0..NUM_COLOURS).contains(&colour) {
        Ok(())
    } else {
        Err(ErrorKind::InvalidColour)
    }
}

/// Lines recorded between `start_fill` and `fill`.
#[derive(Clone, Debug, Default)]
pub struct Fill {
    pub filled: bool,
    pub colour: i64,
    pub outline: Vec<Segment>,
}

/// A turtle with no window. It keeps everything it would have drawn.
#[derive(Clone, Debug)]
pub struct HeadlessTurtle {
    win: Rect,
    pos: Point,
    heading: f64,
    visible: bool,
    pen_down: bool,
    colour: i64,
    background: i64,
    size: f64,
    line_width: i64,
    style: LineStyle,
    edge: Edge,
    recording_fill: bool,
    window_shown: bool,
    pub segments: Vec<Segment>,
    pub fills: Vec<Fill>,
    pub dots: Vec<(i64, Point)>,
}

impl HeadlessTurtle {
    pub fn new(width: f64, height: f64) -> HeadlessTurtle {
        let mut turtle = HeadlessTurtle {
            win: Rect::new(0.0, 0.0, width, height),
            pos: Point::ORIGIN,
            heading: 0.0,
            visible: true,
            pen_down: true,
            colour: COL_WHITE,
            background: WIN_DEFAULT_COLOUR,
            size: TURTLE_SIZE,
            line_width: 1,
            style: LineStyle::Solid,
            edge: Edge::Unbounded,
            recording_fill: false,
            window_shown: true,
            segments: Vec::new(),
            fills: Vec::new(),
            dots: Vec::new(),
        };
        turtle.reset();
        turtle
    }

    pub fn background(&self) -> i64 {
        self.background
    }

    fn wrap(&mut self) {
        let (w, h) = (self.win.width(), self.win.height());
        if self.pos.x < 0.0 {
            self.pos.x += w;
        } else if self.pos.x >= w {
            self.pos.x -= w;
        }
        if self.pos.y < 0.0 {
            self.pos.y += h;
        } else if self.pos.y >= h {
            self.pos.y -= h;
        }
    }
}

impl Renderer for HeadlessTurtle {
    fn reset(&mut self) {
        self.visible = true;
        self.pen_down = true;
        self.colour = COL_WHITE;
        self.recording_fill = false;
        self.size = TURTLE_SIZE;
        self.edge = Edge::Unbounded;
        self.background = WIN_DEFAULT_COLOUR;
        self.line_width = 1;
        self.style = LineStyle::Solid;
        self.clear();
        self.home();
    }

    fn clear(&mut self) {
        self.segments.clear();
        self.fills.clear();
        self.dots.clear();
    }

    fn home(&mut self) {
        self.pos = self.win.center();
        self.heading = 0.0;
    }

    fn position(&self) -> Point {
        self.pos
    }

    fn heading(&self) -> f64 {
        self.heading
    }

    fn window(&self) -> Rect {
        self.win
    }

    fn set_pos(&mut self, to: Point) -> Result<(), ErrorKind> {
        if to == self.pos {
            return Ok(());
        }
        if self.edge == Edge::Fenced
            && (to.x < 0.0 || to.y < 0.0 || to.x >= self.win.width() || to.y >= self.win.height())
        {
            return Err(ErrorKind::TurtleOutOfBounds);
        }
        let from = self.pos;
        self.pos = to;
        if self.pen_down {
            let seg = Segment {
                from,
                to,
                colour: self.colour,
                width: self.line_width,
                style: self.style,
            };
            self.segments.push(seg);
            if self.recording_fill {
                if let Some(fill) = self.fills.last_mut() {
                    fill.outline.push(seg);
                }
            }
        }
        if self.edge == Edge::Wrapped {
            self.wrap();
        }
        Ok(())
    }

    fn set_heading(&mut self, degrees: f64) {
        self.heading = degrees.rem_euclid(360.0);
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn set_pen_down(&mut self, down: bool) {
        self.pen_down = down;
    }

    fn set_colour(&mut self, colour: i64) -> Result<(), ErrorKind> {
        check_colour(colour)?;
        self.colour = colour;
        Ok(())
    }

    fn set_background(&mut self, colour: i64) -> Result<(), ErrorKind> {
        check_colour(colour)?;
        self.background = colour;
        Ok(())
    }

    fn set_size(&mut self, size: f64) -> Result<(), ErrorKind> {
        if size < 0.0 {
            return Err(ErrorKind::InvalidArg);
        }
        self.size = size;
        Ok(())
    }

    fn set_line_width(&mut self, width: i64) -> Result<(), ErrorKind> {
        if width < 1 {
            return Err(ErrorKind::InvalidArg);
        }
        self.line_width = width;
        Ok(())
    }

    fn set_line_style(&mut self, style: LineStyle) {
        self.style = style;
    }

    fn set_edge(&mut self, edge: Edge) {
        self.edge = edge;
    }

    fn start_fill(&mut self) -> Result<(), ErrorKind> {
        if self.edge == Edge::Wrapped {
            return Err(ErrorKind::CantFill);
        }
        self.recording_fill = true;
        // An outline needs at least a triangle.
        if self.fills.last().map_or(false, |f| f.outline.len() < 3) {
            self.fills.pop();
        }
        if self.fills.last().map_or(true, |f| !f.outline.is_empty()) {
            self.fills.push(Fill {
                filled: false,
                colour: self.colour,
                outline: Vec::new(),
            });
        }
        Ok(())
    }

    fn fill(&mut self) -> Result<(), ErrorKind> {
        if self.edge == Edge::Wrapped {
            return Err(ErrorKind::CantFill);
        }
        self.recording_fill = false;
        let Some(fill) = self.fills.last_mut() else {
            return Ok(());
        };
        if fill.outline.len() < 3 {
            self.fills.pop();
        } else {
            fill.filled = true;
            fill.colour = self.colour;
        }
        Ok(())
    }

    fn dot(&mut self, at: Point) {
        self.dots.push((self.colour, at));
    }

    fn show_window(&mut self, shown: bool) {
        self.window_shown = shown;
    }

    fn resize(&mut self, width: f64, height: f64) {
        self.win = Rect::new(0.0, 0.0, width, height);
    }

    fn facts(&self) -> TurtleFacts {
        TurtleFacts {
            pos: self.pos,
            heading: self.heading,
            size: self.size,
            line_width: self.line_width,
            colour: self.colour,
            pen_down: self.pen_down,
            visible: self.visible,
            filling: self.recording_fill,
            edge: self.edge,
            style: self.style,
            window_shown: self.window_shown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point, b: Point) -> bool {
        (a - b).hypot() < 1e-9
    }

    #[test]
    fn moves_from_the_centre() {
        let mut t = HeadlessTurtle::new(800.0, 600.0);
        assert_eq!(t.position(), Point::new(400.0, 300.0));
        t.forward(100.0).unwrap();
        assert!(close(t.position(), Point::new(400.0, 200.0)));
        t.turn(90.0);
        t.forward(50.0).unwrap();
        assert!(close(t.position(), Point::new(450.0, 200.0)));
        assert_eq!(t.segments.len(), 2);

        t.set_pen_down(false);
        t.forward(-50.0).unwrap();
        assert_eq!(t.segments.len(), 2);
    }

    #[test]
    fn headings_normalise() {
        let mut t = HeadlessTurtle::new(100.0, 100.0);
        t.turn(-90.0);
        assert_eq!(t.heading(), 270.0);
        t.turn(450.0);
        assert_eq!(t.heading(), 0.0);

        t.face(Point::new(50.0, 100.0));
        assert_eq!(t.heading(), 180.0);
        t.face(Point::new(0.0, 50.0));
        assert_eq!(t.heading(), 270.0);
        t.face(Point::new(100.0, 0.0));
        assert!((t.heading() - 45.0).abs() < 1e-9);
    }

    #[test]
    fn edges() {
        let mut t = HeadlessTurtle::new(100.0, 100.0);
        t.set_edge(Edge::Fenced);
        assert_eq!(t.forward(60.0), Err(ErrorKind::TurtleOutOfBounds));
        assert_eq!(t.position(), Point::new(50.0, 50.0));

        t.set_edge(Edge::Wrapped);
        t.forward(60.0).unwrap();
        assert!(close(t.position(), Point::new(50.0, 90.0)));
        assert_eq!(t.start_fill(), Err(ErrorKind::CantFill));
    }

    #[test]
    fn fills_need_a_triangle() {
        let mut t = HeadlessTurtle::new(100.0, 100.0);
        t.start_fill().unwrap();
        t.forward(10.0).unwrap();
        t.fill().unwrap();
        assert!(t.fills.is_empty());

        t.start_fill().unwrap();
        for _ in 0..3 {
            t.forward(10.0).unwrap();
            t.turn(120.0);
        }
        t.fill().unwrap();
        assert_eq!(t.fills.len(), 1);
        assert!(t.fills[0].filled);
        assert!(!t.facts().filling);
    }

    #[test]
    fn colours_are_checked() {
        let mut t = HeadlessTurtle::new(100.0, 100.0);
        assert_eq!(t.set_colour(106), Err(ErrorKind::InvalidColour));
        assert_eq!(t.set_background(-1), Err(ErrorKind::InvalidColour));
        t.set_colour(3).unwrap();
        assert_eq!(t.facts().colour, 3);
        assert_eq!(LineStyle::parse("double_dash"), Some(LineStyle::DoubleDash));
    }
}
