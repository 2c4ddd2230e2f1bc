use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BBox, Detection, ObjectClass};
use crate::frame::Frame;

/// Seats as fractions of the frame: (center x, center y, width, height).
const SEATS: [(f32, f32, f32, f32); 3] = [
    (0.2, 0.55, 0.18, 0.35),
    (0.5, 0.5, 0.18, 0.35),
    (0.8, 0.55, 0.18, 0.35),
];

/// Stub backend for demos. Produces a deterministic classroom scene from the frame index.
///
/// Three seated students cycle between attentive and unattentive at different rates,
/// and a phone shows up on every third detected frame.
pub struct StubBackend {
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { calls: 0 }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        let (fw, fh) = (frame.width as f32, frame.height as f32);

        let mut detections = Vec::with_capacity(SEATS.len() + 1);
        for (seat, (cx, cy, w, h)) in SEATS.iter().enumerate() {
            let period = seat as u64 + 2;
            let class = if (frame.index / 5 + seat as u64) % period == 0 {
                ObjectClass::Unattentive
            } else {
                ObjectClass::Attentive
            };
            detections.push(Detection::new(
                class,
                BBox::new(cx * fw, cy * fh, w * fw, h * fh),
                0.9,
            ));
        }

        if self.calls % 3 == 0 {
            detections.push(Detection::new(
                ObjectClass::Phone,
                BBox::new(0.55 * fw, 0.8 * fh, 0.06 * fw, 0.08 * fh),
                0.7,
            ));
        }

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_scales_seats_to_frame() {
        let mut backend = StubBackend::new();
        let frame = Frame::from_rgb(0, 100, 50, vec![0u8; 100 * 50 * 3]).unwrap();

        let detections = backend.detect(&frame).unwrap();
        assert_eq!(detections.len(), 3);
        assert!(detections.iter().all(|d| d.class.is_student()));
        let middle = detections[1].bbox;
        assert!((middle.x - 50.0).abs() < 1e-3);
        assert!((middle.y - 25.0).abs() < 1e-3);
        assert!((middle.width - 18.0).abs() < 1e-3);
        assert!((middle.height - 17.5).abs() < 1e-3);
    }

    #[test]
    fn stub_backend_adds_phone_every_third_call() {
        let mut backend = StubBackend::new();
        let frame = Frame::from_rgb(0, 10, 10, vec![0u8; 300]).unwrap();

        let phones: Vec<usize> = (0..6)
            .map(|_| {
                backend
                    .detect(&frame)
                    .unwrap()
                    .iter()
                    .filter(|d| d.class == ObjectClass::Phone)
                    .count()
            })
            .collect();
        assert_eq!(phones, vec![0, 0, 1, 0, 0, 1]);
    }
}
