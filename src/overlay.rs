//! Overlay rendering.
//!
//! Detection boxes arrive in source-frame pixels. The display canvas may have a
//! different backing resolution, so every box goes through a `ScaleFactor` first.
//! Counts are recomputed from scratch for each frame (no smoothing).

use ab_glyph::{FontRef, PxScale};
use anyhow::{anyhow, Context, Result};
use image::codecs::png::PngEncoder;
use image::{imageops, ImageEncoder, Rgb, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::detect::{BBox, Detection, ObjectClass};
use crate::frame::Frame;

/// Height of the filled label tag above each box.
pub const LABEL_TAG_HEIGHT: f32 = 20.0;
/// Horizontal padding added to the measured label width.
pub const LABEL_TAG_PADDING: f32 = 8.0;
/// Label glyph size in pixels.
pub const LABEL_FONT_SIZE: f32 = 16.0;
/// Fallback advance per character when the label font cannot be parsed.
pub const LABEL_CHAR_WIDTH: f32 = 8.0;
const LABEL_TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
static LABEL_FONT_BYTES: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");
/// Stroke width of the box outline.
pub const BOX_LINE_WIDTH: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleFactor {
    pub x: f32,
    pub y: f32,
}

impl ScaleFactor {
    /// Scale from native frame resolution to canvas backing resolution.
    pub fn between(native: (u32, u32), canvas: (u32, u32)) -> Self {
        let axis = |canvas: u32, native: u32| {
            if native == 0 {
                1.0
            } else {
                canvas as f32 / native as f32
            }
        };
        Self {
            x: axis(canvas.0, native.0),
            y: axis(canvas.1, native.1),
        }
    }

    pub fn identity() -> Self {
        Self { x: 1.0, y: 1.0 }
    }
}

/// Axis-aligned rectangle anchored at its top-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// Map a center-based source box into display space.
pub fn display_rect(bbox: &BBox, scale: ScaleFactor) -> DisplayRect {
    let x = bbox.x * scale.x;
    let y = bbox.y * scale.y;
    let width = bbox.width * scale.x;
    let height = bbox.height * scale.y;
    DisplayRect {
        left: x - width / 2.0,
        top: y - height / 2.0,
        width,
        height,
    }
}

/// The two category toggles. Read once per processed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFilter {
    pub attentive: bool,
    pub inattentive: bool,
}

impl Default for CategoryFilter {
    fn default() -> Self {
        Self {
            attentive: true,
            inattentive: true,
        }
    }
}

impl CategoryFilter {
    /// True when the detection is a student whose category is switched on.
    pub fn allows(&self, class: &ObjectClass) -> bool {
        match class {
            ObjectClass::Attentive => self.attentive,
            ObjectClass::Unattentive => self.inattentive,
            _ => false,
        }
    }
}

/// Per-frame counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameTally {
    pub students: u32,
    pub attentive: u32,
    pub phones: u32,
}

impl FrameTally {
    /// Students and attentive counts respect the filter; phones are counted regardless.
    pub fn count(detections: &[Detection], filter: &CategoryFilter) -> Self {
        let mut tally = FrameTally::default();
        for det in detections {
            if filter.allows(&det.class) {
                tally.students += 1;
                if det.class == ObjectClass::Attentive {
                    tally.attentive += 1;
                }
            }
            if det.class == ObjectClass::Phone {
                tally.phones += 1;
            }
        }
        tally
    }

    pub fn percentage(&self) -> u8 {
        attentiveness_percentage(self.attentive, self.students)
    }
}

/// round(attentive / max(students, 1) * 100). An empty frame reports 0%.
pub fn attentiveness_percentage(attentive: u32, students: u32) -> u8 {
    let denom = students.max(1) as f64;
    let pct = (attentive as f64 / denom * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

#[derive(Clone, Debug, PartialEq)]
pub struct OverlayBox {
    pub label: String,
    pub color: Rgb<u8>,
    pub rect: DisplayRect,
    pub tag: DisplayRect,
}

/// Everything needed to draw one processed frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OverlayPlan {
    pub boxes: Vec<OverlayBox>,
    pub tally: FrameTally,
    pub percentage: u8,
}

impl OverlayPlan {
    pub fn build(detections: &[Detection], filter: &CategoryFilter, scale: ScaleFactor) -> Self {
        let boxes = detections
            .iter()
            .filter(|det| filter.allows(&det.class))
            .map(|det| {
                let rect = display_rect(&det.bbox, scale);
                let label = det.class.label().to_string();
                let tag = DisplayRect {
                    left: rect.left,
                    top: rect.top - LABEL_TAG_HEIGHT,
                    width: label_width(&label) + LABEL_TAG_PADDING,
                    height: LABEL_TAG_HEIGHT,
                };
                OverlayBox {
                    label,
                    color: det.color,
                    rect,
                    tag,
                }
            })
            .collect();
        let tally = FrameTally::count(detections, filter);
        Self {
            boxes,
            percentage: tally.percentage(),
            tally,
        }
    }
}

fn label_font() -> Result<FontRef<'static>> {
    FontRef::try_from_slice(LABEL_FONT_BYTES).map_err(|err| anyhow!("label font: {err}"))
}

/// Rendered width of a label at `LABEL_FONT_SIZE`.
pub fn label_width(label: &str) -> f32 {
    match label_font() {
        Ok(font) => text_size(PxScale::from(LABEL_FONT_SIZE), &font, label).0 as f32,
        Err(_) => label.chars().count() as f32 * LABEL_CHAR_WIDTH,
    }
}

/// Draw the plan over the frame, resized to the canvas backing resolution.
pub fn render_overlay(frame: &Frame, plan: &OverlayPlan, canvas: (u32, u32)) -> Result<RgbaImage> {
    let rgb = frame.to_image()?;
    let mut canvas_img: RgbaImage = image::DynamicImage::ImageRgb8(rgb).into_rgba8();
    if canvas_img.dimensions() != canvas && canvas.0 > 0 && canvas.1 > 0 {
        canvas_img = imageops::resize(
            &canvas_img,
            canvas.0,
            canvas.1,
            imageops::FilterType::Triangle,
        );
    }

    let font = label_font()?;
    let scale = PxScale::from(LABEL_FONT_SIZE);
    for item in &plan.boxes {
        let color = Rgba([item.color[0], item.color[1], item.color[2], 255]);
        for inset in 0..BOX_LINE_WIDTH {
            if let Some(rect) = pixel_rect(&item.rect, inset) {
                draw_hollow_rect_mut(&mut canvas_img, rect, color);
            }
        }
        if let Some(tag) = pixel_rect(&item.tag, 0) {
            draw_filled_rect_mut(&mut canvas_img, tag, color);
        }
        draw_text_mut(
            &mut canvas_img,
            LABEL_TEXT_COLOR,
            item.tag.left.round() as i32,
            item.tag.top.round() as i32 + 2,
            scale,
            &font,
            &item.label,
        );
    }
    Ok(canvas_img)
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .context("encode overlay png")?;
    Ok(out)
}

/// Whole-pixel rectangle shrunk by `inset` on every side; `None` once it collapses.
fn pixel_rect(rect: &DisplayRect, inset: u32) -> Option<Rect> {
    let inset = inset as i32;
    let left = rect.left.round() as i32 + inset;
    let top = rect.top.round() as i32 + inset;
    let right = (rect.left + rect.width).round() as i32 - inset;
    let bottom = (rect.top + rect.height).round() as i32 - inset;
    if right <= left || bottom <= top {
        return None;
    }
    Some(Rect::at(left, top).of_size((right - left) as u32, (bottom - top) as u32))
}
