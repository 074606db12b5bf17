//! Freehand whiteboard: committed strokes plus one stroke in progress.
//!
//! Segments are painted as they are drawn; `redraw` replays everything from
//! a blank background and yields the same pixels. Erase strokes paint with
//! `DestinationOut`, and the surface is put back to `SourceOver` after every
//! segment and every stroke.

use crate::render::{Color, CompositeMode, Point, Surface};

/// Page colour. Erased pixels turn transparent and show the page through.
pub const BACKGROUND: Color = Color::WHITE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    Draw,
    Erase,
}

impl Tool {
    pub fn width(self) -> f32 {
        match self {
            Self::Draw => 2.0,
            Self::Erase => 20.0,
        }
    }

    fn composite(self) -> CompositeMode {
        match self {
            Self::Draw => CompositeMode::SourceOver,
            Self::Erase => CompositeMode::DestinationOut,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Stroke {
    pub points: Vec<Point>,
    pub color: Color,
    pub width: f32,
    pub tool: Tool,
}

pub struct Whiteboard<S: Surface> {
    surface: S,
    strokes: Vec<Stroke>,
    current: Option<Stroke>,
}

impl<S: Surface> Whiteboard<S> {
    pub fn new(mut surface: S) -> Self {
        surface.set_composite(CompositeMode::SourceOver);
        surface.fill(BACKGROUND);
        Self {
            surface,
            strokes: Vec::new(),
            current: None,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn in_progress(&self) -> Option<&Stroke> {
        self.current.as_ref()
    }

    pub fn is_drawing(&self) -> bool {
        self.current.is_some()
    }

    /// Begin a stroke at `point`. An unfinished stroke is thrown away.
    pub fn start_stroke(&mut self, point: Point, tool: Tool, color: Color) {
        let discarded = self.current.take();
        if discarded.is_some_and(|s| s.points.len() > 1) {
            // Its segments are already on the surface.
            self.redraw();
        }
        self.current = Some(Stroke {
            points: vec![point],
            color,
            width: tool.width(),
            tool,
        });
    }

    /// Add a point and paint the new segment. No-op when not drawing.
    pub fn extend_stroke(&mut self, point: Point) -> bool {
        let Some(stroke) = self.current.as_mut() else {
            return false;
        };
        let from = stroke.points.last().copied().unwrap_or(point);
        stroke.points.push(point);
        paint_segment(&mut self.surface, stroke, from, point);
        true
    }

    pub fn commit_stroke(&mut self) -> bool {
        match self.current.take() {
            Some(stroke) => {
                self.strokes.push(stroke);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
        self.current = None;
        self.redraw();
    }

    /// Repaint from scratch: background, committed strokes, then the
    /// stroke in progress.
    pub fn redraw(&mut self) {
        self.surface.set_composite(CompositeMode::SourceOver);
        self.surface.fill(BACKGROUND);
        for stroke in &self.strokes {
            paint_stroke(&mut self.surface, stroke);
        }
        if let Some(stroke) = &self.current {
            paint_stroke(&mut self.surface, stroke);
        }
    }
}

fn paint_segment<S: Surface>(surface: &mut S, stroke: &Stroke, from: Point, to: Point) {
    surface.set_composite(stroke.tool.composite());
    surface.line(from, to, stroke.color, stroke.width);
    surface.set_composite(CompositeMode::SourceOver);
}

fn paint_stroke<S: Surface>(surface: &mut S, stroke: &Stroke) {
    surface.set_composite(stroke.tool.composite());
    for pair in stroke.points.windows(2) {
        surface.line(pair[0], pair[1], stroke.color, stroke.width);
    }
    surface.set_composite(CompositeMode::SourceOver);
}
