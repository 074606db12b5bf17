//! 2D drawing surface used by the whiteboard.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(0xFF, 0xFF, 0xFF);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB` (the leading `#` is optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// How new paint combines with what is already there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeMode {
    /// Paint over existing pixels.
    SourceOver,
    /// Clear existing pixels where painted.
    DestinationOut,
}

pub trait Surface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Paint every pixel with `color` under the current composite mode.
    fn fill(&mut self, color: Color);
    fn composite(&self) -> CompositeMode;
    fn set_composite(&mut self, mode: CompositeMode);
    /// Round-capped line of `width` from `from` to `to`.
    fn line(&mut self, from: Point, to: Point, color: Color, width: f32);
}

pub type Rgba = [u8; 4];

pub const TRANSPARENT: Rgba = [0, 0, 0, 0];

/// In-memory RGBA surface. Lines are rasterised by stamping discs along the
/// segment, so repainting the same segment always touches the same pixels.
#[derive(Clone, Debug)]
pub struct Raster {
    width: u32,
    height: u32,
    pixels: Vec<Rgba>,
    mode: CompositeMode,
}

impl Raster {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![TRANSPARENT; width as usize * height as usize],
            mode: CompositeMode::SourceOver,
        }
    }

    pub fn pixels(&self) -> &[Rgba] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Nothing visible on a white page: every pixel is opaque white or
    /// has been erased to transparent.
    pub fn is_blank(&self) -> bool {
        let white = opaque(Color::WHITE);
        self.pixels.iter().all(|p| *p == white || *p == TRANSPARENT)
    }

    fn put(&mut self, index: usize, color: Color) {
        let value = match self.mode {
            CompositeMode::SourceOver => opaque(color),
            CompositeMode::DestinationOut => TRANSPARENT,
        };
        if let Some(px) = self.pixels.get_mut(index) {
            *px = value;
        }
    }

    fn stamp(&mut self, cx: f32, cy: f32, radius: f32, color: Color) {
        let max_x = i64::from(self.width) - 1;
        let max_y = i64::from(self.height) - 1;
        let x0 = ((cx - radius).floor() as i64).max(0);
        let x1 = ((cx + radius).ceil() as i64).min(max_x);
        let y0 = ((cy - radius).floor() as i64).max(0);
        let y1 = ((cy + radius).ceil() as i64).min(max_y);
        let r2 = radius * radius;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= r2 {
                    self.put(y as usize * self.width as usize + x as usize, color);
                }
            }
        }
    }
}

fn opaque(color: Color) -> Rgba {
    [color.r, color.g, color.b, 0xFF]
}

impl Surface for Raster {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn fill(&mut self, color: Color) {
        for index in 0..self.pixels.len() {
            self.put(index, color);
        }
    }

    fn composite(&self) -> CompositeMode {
        self.mode
    }

    fn set_composite(&mut self, mode: CompositeMode) {
        self.mode = mode;
    }

    fn line(&mut self, from: Point, to: Point, color: Color, width: f32) {
        let radius = (width / 2.0).max(0.5);
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        let length = (dx * dx + dy * dy).sqrt();
        let steps = (length * 2.0).ceil().max(1.0) as u32;
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            self.stamp(from.x + dx * t, from.y + dy * t, radius, color);
        }
    }
}
