use image::Rgb;
use serde::{Deserialize, Serialize};

/// One model output instance.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class: ObjectClass,
    pub bbox: BBox,
    pub confidence: f32,
    /// Display color for the box and label tag.
    pub color: Rgb<u8>,
}

impl Detection {
    /// Build a detection with the palette color for its class.
    pub fn new(class: ObjectClass, bbox: BBox, confidence: f32) -> Self {
        let color = color_for_label(class.label());
        Self {
            class,
            bbox,
            confidence,
            color,
        }
    }
}

/// Bounding box in source-frame pixels. `x`/`y` is the center of the box.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectClass {
    Attentive,
    Unattentive,
    Phone,
    Other(String),
}

impl ObjectClass {
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "attentive" => ObjectClass::Attentive,
            "unattentive" => ObjectClass::Unattentive,
            "phone" => ObjectClass::Phone,
            other => ObjectClass::Other(other.to_string()),
        }
    }

    /// Label as emitted by the model.
    pub fn label(&self) -> &str {
        match self {
            ObjectClass::Attentive => "attentive",
            ObjectClass::Unattentive => "unattentive",
            ObjectClass::Phone => "phone",
            ObjectClass::Other(label) => label,
        }
    }

    pub fn is_student(&self) -> bool {
        matches!(self, ObjectClass::Attentive | ObjectClass::Unattentive)
    }
}

impl Serialize for ObjectClass {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for ObjectClass {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(ObjectClass::from_label(&label))
    }
}

impl std::fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

const PALETTE: [[u8; 3]; 8] = [
    [0xC7, 0xFC, 0x00],
    [0xFF, 0x00, 0xFF],
    [0x86, 0x22, 0xFF],
    [0xFE, 0x00, 0x56],
    [0x00, 0xFF, 0xCE],
    [0xFF, 0x80, 0x00],
    [0x00, 0xB7, 0xEB],
    [0xFF, 0xFF, 0x00],
];

/// Stable palette color for a class label.
///
/// The hosted API returns no colors, so the same label always maps to the same slot.
pub fn color_for_label(label: &str) -> Rgb<u8> {
    // FNV-1a keeps the mapping stable across runs and platforms.
    let mut hash: u32 = 0x811c_9dc5;
    for byte in label.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    Rgb(PALETTE[hash as usize % PALETTE.len()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_labels() {
        assert_eq!(ObjectClass::from_label("attentive"), ObjectClass::Attentive);
        assert_eq!(
            ObjectClass::from_label("unattentive"),
            ObjectClass::Unattentive
        );
        assert_eq!(ObjectClass::from_label("phone"), ObjectClass::Phone);
        assert_eq!(
            ObjectClass::from_label("laptop"),
            ObjectClass::Other("laptop".to_string())
        );
    }

    #[test]
    fn only_attentive_and_unattentive_are_students() {
        assert!(ObjectClass::Attentive.is_student());
        assert!(ObjectClass::Unattentive.is_student());
        assert!(!ObjectClass::Phone.is_student());
        assert!(!ObjectClass::Other("person".into()).is_student());
    }

    #[test]
    fn palette_is_stable_per_label() {
        assert_eq!(color_for_label("phone"), color_for_label("phone"));
        let det = Detection::new(ObjectClass::Attentive, BBox::default(), 0.9);
        assert_eq!(det.color, color_for_label("attentive"));
    }

    #[test]
    fn class_serializes_as_label() {
        let json = serde_json::to_string(&ObjectClass::Unattentive).unwrap();
        assert_eq!(json, "\"unattentive\"");
        let back: ObjectClass = serde_json::from_str("\"phone\"").unwrap();
        assert_eq!(back, ObjectClass::Phone);
    }
}
