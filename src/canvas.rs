//! The whiteboard's raster surface and the brush that paints stroke segments onto it.

use std::cell::{Cell, RefCell};

use image::{Rgba, RgbaImage};

use crate::{
    cmd::Tool,
    datauri::{DataUri, DataUriError},
    input::{Geometry, Point, Segment, Surface, SurfaceId},
    math::{vec2, Rect, Vec2u},
};

pub const MIN_WIDTH: f32 = 1.0;
pub const MAX_WIDTH: f32 = 20.0;

/// Erasing uses a wider tip than drawing.
const ERASER_SCALE: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Paint {
    /// Source-over compositing of this (straight alpha) color.
    Ink([u8; 4]),
    /// Destination-out: removes coverage from whatever is underneath.
    Erase,
}

/// RGBA pixel buffer, transparent when blank.
pub struct Raster {
    image: RgbaImage,
}

impl Raster {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
        }
    }

    pub fn size(&self) -> Vec2u {
        vec2(self.image.width(), self.image.height())
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn clear(&mut self) {
        self.image.fill(0);
    }

    /// Whether every pixel is fully transparent black.
    pub fn is_blank(&self) -> bool {
        self.image.as_raw().iter().all(|&b| b == 0)
    }

    pub fn to_data_uri(&self) -> Result<DataUri, DataUriError> {
        DataUri::encode_png(&self.image)
    }

    /// Paints a round-capped line of the given width from `from` to `to`.
    ///
    /// With `from == to` this is a filled disc of diameter `width`.
    pub fn stroke(&mut self, from: Point, to: Point, width: f32, paint: Paint) {
        let radius = width / 2.0;
        let (w, h) = self.image.dimensions();
        let reach = radius + 1.0;
        let x0 = (from.x().min(to.x()) - reach).floor().max(0.0) as u32;
        let y0 = (from.y().min(to.y()) - reach).floor().max(0.0) as u32;
        let x1 = ((from.x().max(to.x()) + reach).ceil().max(0.0) as u32).min(w);
        let y1 = ((from.y().max(to.y()) + reach).ceil().max(0.0) as u32).min(h);

        for y in y0..y1 {
            for x in x0..x1 {
                let center = vec2(x as f32 + 0.5, y as f32 + 0.5);
                let dist = distance_to_segment(center, from, to);
                let coverage = (radius + 0.5 - dist).clamp(0.0, 1.0);
                if coverage > 0.0 {
                    let px = self.image.get_pixel_mut(x, y);
                    *px = composite(*px, paint, coverage);
                }
            }
        }
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let ab = b - a;
    let len_sq = ab.dot(ab);
    if len_sq == 0.0 {
        return p.dist(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.dist(a + ab * t)
}

fn composite(dst: Rgba<u8>, paint: Paint, coverage: f32) -> Rgba<u8> {
    let dst_a = f32::from(dst[3]) / 255.0;
    let (out_a, rgb) = match paint {
        Paint::Ink(src) => {
            let src_a = f32::from(src[3]) / 255.0 * coverage;
            let out_a = src_a + dst_a * (1.0 - src_a);
            let rgb = [0, 1, 2].map(|i| {
                if out_a <= 0.0 {
                    return 0.0;
                }
                (f32::from(src[i]) * src_a + f32::from(dst[i]) * dst_a * (1.0 - src_a)) / out_a
            });
            (out_a, rgb)
        }
        Paint::Erase => (
            dst_a * (1.0 - coverage),
            [0, 1, 2].map(|i| f32::from(dst[i])),
        ),
    };

    let alpha = (out_a * 255.0).round() as u8;
    if alpha == 0 {
        // Fully transparent pixels carry no color, so erased areas count as blank again.
        return Rgba([0; 4]);
    }
    let [r, g, b] = rgb.map(|c| c.round().clamp(0.0, 255.0) as u8);
    Rgba([r, g, b, alpha])
}

/// Paint settings applied to every segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Brush {
    pub tool: Tool,
    pub color: [u8; 4],
    pub width: f32,
}

impl Brush {
    /// Diameter of the tip for the current tool.
    pub fn tip_width(&self) -> f32 {
        match self.tool {
            Tool::Pen => self.width,
            Tool::Eraser => self.width * ERASER_SCALE,
        }
    }

    pub fn paint(&self) -> Paint {
        match self.tool {
            Tool::Pen => Paint::Ink(self.color),
            Tool::Eraser => Paint::Erase,
        }
    }

    pub fn set_width(&mut self, width: f32) {
        self.width = width.clamp(MIN_WIDTH, MAX_WIDTH);
    }

    /// Renders one segment: the line from the previous sample plus a disc at the current one,
    /// so slow strokes stay continuous and round.
    pub fn render(&self, segment: Segment<'_, Raster>) {
        segment.context.stroke(
            segment.prev,
            segment.current,
            self.tip_width(),
            self.paint(),
        );
    }
}

/// The whiteboard surface: a raster plus where it is currently shown.
pub struct Canvas {
    id: SurfaceId,
    layout: Cell<Rect>,
    raster: RefCell<Raster>,
    dirty: Cell<bool>,
}

impl Canvas {
    pub fn new(id: SurfaceId, width: u32, height: u32) -> Self {
        Self {
            id,
            layout: Cell::new(Rect::ZERO),
            raster: RefCell::new(Raster::new(width, height)),
            dirty: Cell::new(true),
        }
    }

    pub fn set_layout(&self, display: Rect) {
        self.layout.set(display);
    }

    pub fn layout(&self) -> Rect {
        self.layout.get()
    }

    pub fn raster(&self) -> std::cell::Ref<'_, Raster> {
        self.raster.borrow()
    }

    pub fn clear(&self) {
        self.raster.borrow_mut().clear();
        self.dirty.set(true);
    }

    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }

    /// Returns whether the raster changed since the last call.
    pub fn take_dirty(&self) -> bool {
        self.dirty.replace(false)
    }
}

impl Surface for Canvas {
    type Context = Raster;

    fn id(&self) -> SurfaceId {
        self.id
    }

    fn geometry(&self) -> Geometry {
        Geometry {
            display: self.layout.get(),
            pixel_size: self.raster.borrow().size().into(),
        }
    }

    fn with_context<R>(&self, f: impl FnOnce(&mut Raster) -> R) -> Option<R> {
        let mut raster = self.raster.try_borrow_mut().ok()?;
        Some(f(&mut raster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLACK: [u8; 4] = [0, 0, 0, 255];

    fn pen(width: f32) -> Brush {
        Brush {
            tool: Tool::Pen,
            color: BLACK,
            width,
        }
    }

    fn segment(raster: &mut Raster, prev: Point, current: Point) -> Segment<'_, Raster> {
        Segment {
            context: raster,
            current,
            prev,
        }
    }

    #[test]
    fn dot_is_a_disc_of_the_brush_width() {
        let mut raster = Raster::new(20, 20);
        let p = vec2(10.0, 10.0);
        pen(6.0).render(segment(&mut raster, p, p));

        assert_eq!(raster.image().get_pixel(10, 10), &Rgba(BLACK));
        assert_eq!(raster.image().get_pixel(11, 8), &Rgba(BLACK));
        assert_eq!(raster.image().get_pixel(10, 16), &Rgba([0; 4]));
        assert_eq!(raster.image().get_pixel(0, 0), &Rgba([0; 4]));
    }

    #[test]
    fn line_connects_samples() {
        let mut raster = Raster::new(40, 10);
        pen(2.0).render(segment(&mut raster, vec2(5.0, 5.0), vec2(35.0, 5.0)));
        for x in 5..35 {
            assert_eq!(raster.image().get_pixel(x, 4)[3], 255, "gap at x={x}");
        }
        assert_eq!(raster.image().get_pixel(20, 8)[3], 0);
    }

    #[test]
    fn eraser_clears_ink_and_is_wider() {
        let mut raster = Raster::new(40, 40);
        pen(10.0).render(segment(&mut raster, vec2(20.0, 20.0), vec2(20.0, 20.0)));
        assert!(!raster.is_blank());

        let eraser = Brush {
            tool: Tool::Eraser,
            ..pen(3.0)
        };
        assert_eq!(eraser.tip_width(), 12.0);
        eraser.render(segment(&mut raster, vec2(20.0, 20.0), vec2(20.0, 20.0)));
        assert!(raster.is_blank());
    }

    #[test]
    fn ink_blends_over_existing_pixels() {
        let mut raster = Raster::new(4, 4);
        raster.stroke(vec2(2.0, 2.0), vec2(2.0, 2.0), 8.0, Paint::Ink([255, 0, 0, 255]));
        raster.stroke(vec2(2.0, 2.0), vec2(2.0, 2.0), 8.0, Paint::Ink([0, 0, 255, 128]));
        let px = raster.image().get_pixel(1, 1);
        assert_eq!(px[3], 255);
        assert!(px[0] > 100 && px[2] > 100, "{px:?}");
    }

    #[test]
    fn clear_makes_raster_blank() {
        let mut raster = Raster::new(8, 8);
        assert!(raster.is_blank());
        raster.stroke(vec2(1.0, 1.0), vec2(6.0, 6.0), 2.0, Paint::Ink(BLACK));
        assert!(!raster.is_blank());
        raster.clear();
        assert!(raster.is_blank());
    }

    #[test]
    fn strokes_outside_the_raster_are_clipped() {
        let mut raster = Raster::new(8, 8);
        raster.stroke(vec2(-50.0, -50.0), vec2(-40.0, -40.0), 4.0, Paint::Ink(BLACK));
        raster.stroke(vec2(50.0, 50.0), vec2(60.0, 60.0), 4.0, Paint::Ink(BLACK));
        assert!(raster.is_blank());
        raster.stroke(vec2(-5.0, 4.0), vec2(20.0, 4.0), 2.0, Paint::Ink(BLACK));
        assert_eq!(raster.image().get_pixel(0, 3)[3], 255);
        assert_eq!(raster.image().get_pixel(7, 4)[3], 255);
    }

    #[test]
    fn width_is_clamped() {
        let mut brush = pen(5.0);
        brush.set_width(100.0);
        assert_eq!(brush.width, MAX_WIDTH);
        brush.set_width(0.0);
        assert_eq!(brush.width, MIN_WIDTH);
    }

    #[test]
    fn canvas_reports_display_and_pixel_geometry() {
        let canvas = Canvas::new(SurfaceId(3), 1280, 720);
        canvas.set_layout(Rect::new(vec2(10.0, 20.0), vec2(640.0, 360.0)));
        let geometry = canvas.geometry();
        assert_eq!(geometry.pixel_size, vec2(1280.0, 720.0));
        assert_eq!(geometry.to_pixels(vec2(330.0, 200.0)), Some(vec2(640.0, 360.0)));
        assert!(canvas.take_dirty());
        assert!(!canvas.take_dirty());
    }
}
