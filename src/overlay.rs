//! Per-class counting and frame annotation.
//!
//! - `ClassCountTable`: class name to count, keys in first-seen order.
//! - `Annotator`: draws detection boxes, their labels and the count summary.
//!
//! Text is rendered with the bundled DejaVu Sans unless another
//! TrueType/OpenType font is configured.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::Rgb;
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detect::{Detection, LabelVocabulary};
use crate::frame::Frame;

/// Summary text colour.
pub const SUMMARY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Gap between the top edge of the frame and the summary text.
pub const SUMMARY_TOP_MARGIN: i32 = 10;

/// DejaVu Sans, used when no font is configured.
pub const DEFAULT_FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

const PALETTE: [[u8; 3]; 10] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [52, 69, 147],
    [203, 56, 255],
];

// ----------------------------------------------------------------------------
// ClassCountTable
// ----------------------------------------------------------------------------

/// Occurrences per class name, in first-seen order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassCountTable {
    entries: Vec<(String, u64)>,
}

impl ClassCountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `class_ids` through `labels`.
    pub fn from_class_ids(class_ids: &[u32], labels: &LabelVocabulary) -> Self {
        let mut table = Self::new();
        for &class_id in class_ids {
            table.increment(&labels.name(class_id));
        }
        table
    }

    pub fn increment(&mut self, name: &str) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((name.to_string(), 1)),
        }
    }

    pub fn entries(&self) -> &[(String, u64)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `"<name>: <count>, <name>: <count>"`; empty when nothing was counted.
    pub fn summary(&self) -> String {
        self.entries
            .iter()
            .map(|(name, count)| format!("{name}: {count}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// ----------------------------------------------------------------------------
// Annotator
// ----------------------------------------------------------------------------

/// Font and stroke settings for overlays.
#[derive(Clone)]
pub struct OverlayStyle {
    /// `None` draws boxes only.
    pub font: Option<FontArc>,
    /// Summary text height in pixels.
    pub font_scale: f32,
    /// Stroke thickness in pixels, for boxes and summary text.
    pub thickness: u32,
}

impl OverlayStyle {
    pub fn load_font(path: &Path) -> Result<FontArc> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        FontArc::try_from_vec(bytes).map_err(|_| anyhow!("invalid font file {}", path.display()))
    }

    pub fn bundled_font() -> Result<FontArc> {
        FontArc::try_from_slice(DEFAULT_FONT).map_err(|_| anyhow!("bundled font is invalid"))
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            font: Self::bundled_font().ok(),
            font_scale: 28.0,
            thickness: 2,
        }
    }
}

/// Draws detections and count summaries onto frames.
#[derive(Clone, Default)]
pub struct Annotator {
    style: OverlayStyle,
}

impl Annotator {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    /// Box and label per detection.
    pub fn draw_detections(
        &self,
        frame: &mut Frame,
        detections: &[Detection],
        labels: &LabelVocabulary,
    ) {
        let (width, height) = frame.dimensions();
        let label_scale = PxScale::from((self.style.font_scale * 0.6).max(8.0));
        for det in detections {
            let color = Rgb(PALETTE[det.class_id as usize % PALETTE.len()]);
            let x1 = det.bbox.x1.clamp(0.0, width as f32 - 1.0) as i32;
            let y1 = det.bbox.y1.clamp(0.0, height as f32 - 1.0) as i32;
            let x2 = det.bbox.x2.clamp(0.0, width as f32 - 1.0) as i32;
            let y2 = det.bbox.y2.clamp(0.0, height as f32 - 1.0) as i32;
            for inset in 0..self.style.thickness as i32 {
                let w = x2 - x1 - 2 * inset;
                let h = y2 - y1 - 2 * inset;
                if w < 1 || h < 1 {
                    break;
                }
                let rect = Rect::at(x1 + inset, y1 + inset).of_size(w as u32, h as u32);
                draw_hollow_rect_mut(frame.image_mut(), rect, color);
            }

            if let Some(font) = &self.style.font {
                let text = box_label(det, labels);
                let (_, text_h) = text_size(label_scale, font, &text);
                let ty = (y1 - text_h as i32 - 2).max(0);
                draw_text_mut(frame.image_mut(), color, x1, ty, label_scale, font, &text);
            }
        }
    }

    /// Summary centred horizontally, `SUMMARY_TOP_MARGIN` below the top.
    /// Returns false when nothing was drawn (empty summary or text disabled).
    pub fn draw_summary(&self, frame: &mut Frame, summary: &str) -> bool {
        if summary.is_empty() {
            return false;
        }
        let Some(font) = &self.style.font else {
            return false;
        };
        let scale = PxScale::from(self.style.font_scale);
        let (text_w, _) = text_size(scale, font, summary);
        let x = (frame.width() as i32 - text_w as i32) / 2;
        // Thickness is emulated by re-drawing with one-pixel offsets.
        for offset in 0..self.style.thickness.max(1) as i32 {
            draw_text_mut(
                frame.image_mut(),
                SUMMARY_COLOR,
                x + offset,
                SUMMARY_TOP_MARGIN,
                scale,
                font,
                summary,
            );
        }
        true
    }
}

fn box_label(det: &Detection, labels: &LabelVocabulary) -> String {
    let name = labels.name(det.class_id);
    match det.track_id {
        Some(id) => format!("{} {} {:.2}", id, name, det.confidence),
        None => format!("{} {:.2}", name, det.confidence),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;

    #[test]
    fn summary_lists_each_class_once_in_first_seen_order() {
        let labels = LabelVocabulary::coco();
        let table = ClassCountTable::from_class_ids(&[2, 0, 2, 2, 7, 0], &labels);
        assert_eq!(table.summary(), "car: 3, person: 2, truck: 1");
        assert_eq!(
            table.entries(),
            &[
                ("car".to_string(), 3),
                ("person".to_string(), 2),
                ("truck".to_string(), 1)
            ]
        );
    }

    #[test]
    fn empty_detections_give_empty_summary() {
        let table = ClassCountTable::from_class_ids(&[], &LabelVocabulary::coco());
        assert!(table.is_empty());
        assert_eq!(table.summary(), "");
    }

    #[test]
    fn empty_summary_draws_nothing() -> Result<()> {
        let annotator = Annotator::default();
        let mut frame = Frame::filled(64, 32, [0, 0, 0])?;
        let before = frame.clone();
        assert!(!annotator.draw_summary(&mut frame, ""));
        assert_eq!(frame, before);
        Ok(())
    }

    fn boxes_only() -> Annotator {
        Annotator::new(OverlayStyle {
            font: None,
            ..OverlayStyle::default()
        })
    }

    /// Bounds `(min_x, max_x, min_y, max_y)` and count of pure-green text pixels.
    fn green_pixels(frame: &Frame) -> Option<(u32, u32, u32, u32, usize)> {
        let mut bounds: Option<(u32, u32, u32, u32, usize)> = None;
        for (x, y, px) in frame.image().enumerate_pixels() {
            if px[0] == 0 && px[2] == 0 && px[1] > 0 {
                let b = bounds.get_or_insert((x, x, y, y, 0));
                b.0 = b.0.min(x);
                b.1 = b.1.max(x);
                b.2 = b.2.min(y);
                b.3 = b.3.max(y);
                b.4 += 1;
            }
        }
        bounds
    }

    #[test]
    fn bundled_font_is_the_default() -> Result<()> {
        OverlayStyle::bundled_font()?;
        assert!(OverlayStyle::default().font.is_some());
        Ok(())
    }

    #[test]
    fn summary_is_centred_green_below_top_margin() -> Result<()> {
        let annotator = Annotator::default();
        let mut frame = Frame::filled(720, 405, [0, 0, 0])?;
        assert!(annotator.draw_summary(&mut frame, "car: 2"));

        let (min_x, max_x, min_y, max_y, _) =
            green_pixels(&frame).ok_or_else(|| anyhow!("summary text was not drawn"))?;
        assert!(min_y >= SUMMARY_TOP_MARGIN as u32, "text starts at row {min_y}");
        assert!(max_y < SUMMARY_TOP_MARGIN as u32 + 2 * 28, "text ends at row {max_y}");

        let left = min_x as i64;
        let right = (frame.width() - 1 - max_x) as i64;
        assert!(
            (left - right).abs() <= 8,
            "text spans {min_x}..={max_x}, not centred"
        );
        Ok(())
    }

    #[test]
    fn summary_thickness_widens_strokes() -> Result<()> {
        let draw = |thickness| -> Result<usize> {
            let annotator = Annotator::new(OverlayStyle {
                thickness,
                ..OverlayStyle::default()
            });
            let mut frame = Frame::filled(720, 405, [0, 0, 0])?;
            annotator.draw_summary(&mut frame, "person: 1");
            Ok(green_pixels(&frame).map(|b| b.4).unwrap_or(0))
        };
        let thin = draw(1)?;
        let thick = draw(3)?;
        assert!(thin > 0);
        assert!(thick > thin, "thin={thin} thick={thick}");
        Ok(())
    }

    #[test]
    fn summary_without_font_is_skipped() -> Result<()> {
        let mut frame = Frame::filled(64, 32, [0, 0, 0])?;
        assert!(!boxes_only().draw_summary(&mut frame, "car: 1"));
        Ok(())
    }

    #[test]
    fn boxes_are_drawn_with_class_colour() -> Result<()> {
        let annotator = boxes_only();
        let mut frame = Frame::filled(64, 64, [0, 0, 0])?;
        let det = Detection::new(2, BBox::new(10.0, 10.0, 30.0, 30.0), 0.9);
        annotator.draw_detections(&mut frame, &[det], &LabelVocabulary::coco());
        assert_eq!(frame.image().get_pixel(10, 10), &Rgb(PALETTE[2]));
        assert_eq!(frame.image().get_pixel(11, 20), &Rgb(PALETTE[2]));
        assert_eq!(frame.image().get_pixel(20, 20), &Rgb([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn out_of_frame_boxes_are_clamped() -> Result<()> {
        let annotator = boxes_only();
        let mut frame = Frame::filled(16, 16, [0, 0, 0])?;
        let det = Detection::new(0, BBox::new(-50.0, -50.0, 500.0, 500.0), 0.9);
        annotator.draw_detections(&mut frame, &[det], &LabelVocabulary::coco());
        assert_eq!(frame.image().get_pixel(0, 0), &Rgb(PALETTE[0]));
        Ok(())
    }

    #[test]
    fn box_label_includes_track_id_when_tracking() {
        let labels = LabelVocabulary::coco();
        let mut det = Detection::new(0, BBox::new(0.0, 0.0, 1.0, 1.0), 0.9);
        assert_eq!(box_label(&det, &labels), "person 0.90");
        det.track_id = Some(4);
        assert_eq!(box_label(&det, &labels), "4 person 0.90");
    }
}
