//! JSON-lines observation feed from the external face pipeline.
//!
//! Each line carries one frame's detector output:
//!
//! ```json
//! {"faces":[{"bbox":[top,right,bottom,left],"embedding":[0.01, ...]}],
//!  "landmarks":[{"bbox":[top,right,bottom,left],"points":[[x,y], ...68]}]}
//! ```
//!
//! The feed is both the frame source and the face pipeline: the "frame" is
//! the decoded line, and detection/embedding/landmark calls read from it.

use rollcall_core::source::{FacePipeline, FrameSource};
use rollcall_core::{BoundingBox, Embedding, FaceLandmarks};
use serde::Deserialize;
use std::convert::Infallible;
use std::fs::File;
use std::io::{BufRead, BufReader};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("failed to open feed {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("feed read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame on line {line}: {source}")]
    Malformed {
        line: u64,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedLandmarks {
    pub bbox: BoundingBox,
    pub points: Vec<(f32, f32)>,
}

/// One decoded line of the feed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedFrame {
    #[serde(default)]
    pub faces: Vec<FeedFace>,
    #[serde(default)]
    pub landmarks: Vec<FeedLandmarks>,
}

pub struct JsonlFeed {
    reader: Box<dyn BufRead + Send>,
    line: String,
    line_no: u64,
}

impl JsonlFeed {
    /// Open a feed file, or stdin when `path` is `-`.
    pub fn open(path: &str) -> Result<Self, FeedError> {
        if path == "-" {
            return Ok(Self::from_reader(BufReader::new(std::io::stdin())));
        }
        let file = File::open(path).map_err(|source| FeedError::Open {
            path: path.to_string(),
            source,
        })?;
        Ok(Self::from_reader(BufReader::new(file)))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Box::new(reader),
            line: String::new(),
            line_no: 0,
        }
    }
}

impl FrameSource for JsonlFeed {
    type Frame = FeedFrame;
    type Error = FeedError;

    fn next_frame(&mut self) -> Result<Option<FeedFrame>, FeedError> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_str(trimmed)
                .map(Some)
                .map_err(|source| FeedError::Malformed {
                    line: self.line_no,
                    source,
                });
        }
    }
}

impl FacePipeline<FeedFrame> for JsonlFeed {
    type Error = Infallible;

    fn detect_faces(&mut self, frame: &FeedFrame) -> Result<Vec<BoundingBox>, Infallible> {
        Ok(frame.faces.iter().map(|f| f.bbox).collect())
    }

    /// `boxes` are the ones [`detect_faces`](Self::detect_faces) returned,
    /// so they line up with `frame.faces` by position.
    fn embed(
        &mut self,
        frame: &FeedFrame,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Embedding>, Infallible> {
        Ok(frame
            .faces
            .iter()
            .zip(boxes)
            .map(|(f, _)| f.embedding.clone())
            .collect())
    }

    fn landmark_regions(&mut self, frame: &FeedFrame) -> Result<Vec<BoundingBox>, Infallible> {
        Ok(frame.landmarks.iter().map(|l| l.bbox).collect())
    }

    fn landmarks(&mut self, frame: &FeedFrame, bbox: &BoundingBox) -> Option<FaceLandmarks> {
        let entry = frame.landmarks.iter().find(|l| l.bbox == *bbox)?;
        FaceLandmarks::from_points(entry.points.clone())
    }
}
