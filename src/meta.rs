//! Frame list exchanged with callers of [`crate::decode`] and [`crate::encode`].
//!
//! Pixels never travel through it, only references to frame artifacts:
//!
//! ```json
//! {
//!   "file": "in.gif",
//!   "frames": [
//!     { "delay": { "numerator": 1, "denominator": 10 }, "file": "out/frame_0000.png", "left": 0, "top": 0 }
//!   ]
//! }
//! ```
use serde::{Deserialize, Serialize};

use crate::common::Delay;
use crate::error::Error;

/// An animation as a list of frame artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GifMeta {
    /// The GIF file this describes.
    pub file: String,
    /// Frames in display order.
    pub frames: Vec<FrameMeta>,
}

/// One frame artifact and its placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameMeta {
    /// Time the frame is shown, in seconds.
    pub delay: Delay,
    /// PNG file path, or a `data:image/png;base64,` URI.
    pub file: String,
    /// Offset from the left border of the screen.
    pub left: u16,
    /// Offset from the top border of the screen.
    pub top: u16,
}

impl GifMeta {
    /// Parses and validates metadata. Unknown or missing fields are rejected.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let meta: GifMeta =
            serde_json::from_str(json).map_err(|err| Error::Metadata(err.to_string()))?;
        meta.validate()?;
        Ok(meta)
    }

    /// Serializes to pretty printed JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|err| Error::Metadata(err.to_string()))
    }

    /// Checks that every delay has a non-zero denominator.
    pub fn validate(&self) -> Result<(), Error> {
        match self
            .frames
            .iter()
            .position(|frame| frame.delay.denominator == 0)
        {
            Some(index) => Err(Error::Metadata(format!(
                "frame {index}: delay denominator is zero"
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn json_schema() {
        let meta = GifMeta {
            file: "in.gif".into(),
            frames: vec![FrameMeta {
                delay: Delay::from_centiseconds(20),
                file: "frame_0000.png".into(),
                left: 3,
                top: 4,
            }],
        };
        let json = meta.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "file": "in.gif",
                "frames": [{
                    "delay": { "numerator": 1, "denominator": 5 },
                    "file": "frame_0000.png",
                    "left": 3,
                    "top": 4
                }]
            })
        );
        assert_eq!(GifMeta::from_json(&json).unwrap(), meta);
    }

    #[test]
    fn rejects_loose_input() {
        for json in [
            r#"{"file": "a.gif"}"#,
            r#"{"file": "a.gif", "frames": [], "extra": 1}"#,
            r#"{"file": "a.gif", "frames": [{"delay": {"numerator": 1, "denominator": 10}, "file": "f.png", "left": 0}]}"#,
            r#"{"file": "a.gif", "frames": [{"delay": {"numerator": 1, "denominator": 0}, "file": "f.png", "left": 0, "top": 0}]}"#,
            r#"{"file": "a.gif", "frames": [{"delay": 10, "file": "f.png", "left": 0, "top": 0}]}"#,
            r#"{"file": "a.gif", "frames": [{"delay": {"numerator": 1, "denominator": 10}, "file": "f.png", "left": -1, "top": 0}]}"#,
        ] {
            match GifMeta::from_json(json) {
                Err(Error::Metadata(_)) => {}
                other => panic!("{json} gave {other:?}"),
            }
        }
    }
}
