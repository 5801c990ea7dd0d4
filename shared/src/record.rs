//! Drawable records and their mapping to store documents.
//!
//! Writers always go through [`DrawRecord::to_document`]. Readers go through
//! [`decode`], which tolerates partial or legacy documents by skipping them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::{Document, StoredDocument};
use crate::Point;

pub const IMAGE_KIND: &str = "image";

const FIELD_KIND: &str = "kind";
const FIELD_AUTHOR: &str = "authorId";

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("segment coordinates must be finite")]
    NonFiniteCoordinate,
    #[error("brush size must be finite")]
    NonFiniteSize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Segment {
    pub from: Point,
    pub to: Point,
    pub color: String,
    pub size: f32,
    pub author_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImagePlacement {
    pub url: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub author_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DrawRecord {
    Segment(Segment),
    Image(ImagePlacement),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Drawable {
    Line {
        from: Point,
        to: Point,
        color: String,
        width: f32,
    },
    Blit {
        url: String,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

pub fn encode_segment(
    prev: Point,
    curr: Point,
    color: &str,
    size: f32,
    author_id: &str,
) -> Result<Segment, RecordError> {
    if !prev.is_finite() || !curr.is_finite() {
        return Err(RecordError::NonFiniteCoordinate);
    }
    if !size.is_finite() {
        return Err(RecordError::NonFiniteSize);
    }
    Ok(Segment {
        from: prev,
        to: curr,
        color: color.to_string(),
        size,
        author_id: author_id.to_string(),
    })
}

impl DrawRecord {
    pub fn author_id(&self) -> &str {
        match self {
            DrawRecord::Segment(segment) => &segment.author_id,
            DrawRecord::Image(image) => &image.author_id,
        }
    }

    pub fn to_document(&self) -> Document {
        let mut document = Document::new();
        match self {
            DrawRecord::Segment(segment) => {
                document.set_number("x1", segment.from.x as f64);
                document.set_number("y1", segment.from.y as f64);
                document.set_number("x2", segment.to.x as f64);
                document.set_number("y2", segment.to.y as f64);
                document.set_text("color", segment.color.clone());
                document.set_number("size", segment.size as f64);
                document.set_text(FIELD_AUTHOR, segment.author_id.clone());
            }
            DrawRecord::Image(image) => {
                document.set_text(FIELD_KIND, IMAGE_KIND);
                document.set_text("url", image.url.clone());
                document.set_number("x", image.x as f64);
                document.set_number("y", image.y as f64);
                document.set_number("width", image.width as f64);
                document.set_number("height", image.height as f64);
                document.set_text(FIELD_AUTHOR, image.author_id.clone());
            }
        }
        document
    }

    /// Reads a record back from a document. The variant is picked by the
    /// `kind` field; documents missing a required field give `None`.
    pub fn from_document(document: &Document) -> Option<Self> {
        let author_id = document.text(FIELD_AUTHOR).unwrap_or_default().to_string();
        if document.text(FIELD_KIND) == Some(IMAGE_KIND) {
            return Some(DrawRecord::Image(ImagePlacement {
                url: document.text("url").filter(|url| !url.is_empty())?.to_string(),
                x: document.number("x")? as f32,
                y: document.number("y")? as f32,
                width: document.number("width")? as f32,
                height: document.number("height")? as f32,
                author_id,
            }));
        }
        Some(DrawRecord::Segment(Segment {
            from: Point::new(document.number("x1")? as f32, document.number("y1")? as f32),
            to: Point::new(document.number("x2")? as f32, document.number("y2")? as f32),
            color: document.text("color")?.to_string(),
            size: document.number("size")? as f32,
            author_id,
        }))
    }

    pub fn drawable(&self) -> Drawable {
        match self {
            DrawRecord::Segment(segment) => Drawable::Line {
                from: segment.from,
                to: segment.to,
                color: segment.color.clone(),
                width: segment.size,
            },
            DrawRecord::Image(image) => Drawable::Blit {
                url: image.url.clone(),
                x: image.x,
                y: image.y,
                width: image.width,
                height: image.height,
            },
        }
    }
}

pub fn decode(stored: &StoredDocument) -> Option<Drawable> {
    DrawRecord::from_document(&stored.document).map(|record| record.drawable())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ServerTime;

    fn stored(document: Document) -> StoredDocument {
        StoredDocument {
            id: "d".to_string(),
            server_time: ServerTime::new(1, 1),
            document,
        }
    }

    #[test]
    fn encode_segment_rejects_non_finite_input() {
        let ok = Point::new(1.0, 2.0);
        let bad = Point::new(f32::NAN, 2.0);
        assert_eq!(
            encode_segment(ok, bad, "#000", 3.0, "u"),
            Err(RecordError::NonFiniteCoordinate)
        );
        assert_eq!(
            encode_segment(ok, ok, "#000", f32::INFINITY, "u"),
            Err(RecordError::NonFiniteSize)
        );
    }

    #[test]
    fn segment_decodes_to_line() {
        let segment =
            encode_segment(Point::new(10.0, 10.0), Point::new(50.0, 50.0), "#ff0000", 5.0, "alice")
                .unwrap();
        let document = DrawRecord::Segment(segment.clone()).to_document();
        assert_eq!(document.text("authorId"), Some("alice"));
        assert_eq!(
            decode(&stored(document)),
            Some(Drawable::Line {
                from: segment.from,
                to: segment.to,
                color: "#ff0000".to_string(),
                width: 5.0,
            })
        );
    }

    #[test]
    fn image_decodes_to_blit() {
        let record = DrawRecord::Image(ImagePlacement {
            url: "data:image/png;base64,AAAA".to_string(),
            x: 250.0,
            y: 375.0,
            width: 500.0,
            height: 250.0,
            author_id: "bob".to_string(),
        });
        let document = record.to_document();
        assert_eq!(DrawRecord::from_document(&document), Some(record));
        assert!(matches!(decode(&stored(document)), Some(Drawable::Blit { .. })));
    }

    #[test]
    fn malformed_documents_are_skipped() {
        let mut empty = Document::new();
        empty.set_text("note", "legacy");
        assert_eq!(decode(&stored(empty)), None);

        let mut partial_segment = Document::new();
        partial_segment.set_number("x1", 1.0);
        partial_segment.set_number("y1", 1.0);
        partial_segment.set_text("color", "#000");
        assert_eq!(decode(&stored(partial_segment)), None);

        let mut image_without_url = Document::new();
        image_without_url.set_text("kind", "image");
        image_without_url.set_number("x", 0.0);
        image_without_url.set_number("y", 0.0);
        image_without_url.set_number("width", 1.0);
        image_without_url.set_number("height", 1.0);
        assert_eq!(decode(&stored(image_without_url)), None);
    }

    #[test]
    fn missing_author_is_tolerated() {
        let mut document = DrawRecord::Segment(
            encode_segment(Point::new(0.0, 0.0), Point::new(1.0, 1.0), "#000", 2.0, "u").unwrap(),
        )
        .to_document();
        document.fields.remove("authorId");
        let record = DrawRecord::from_document(&document).unwrap();
        assert_eq!(record.author_id(), "");
    }
}
