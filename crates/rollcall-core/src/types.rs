use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Storage format for the attendance `date` column.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Storage format for the attendance `time` column.
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Number of points in the dlib-style facial landmark layout.
pub const LANDMARK_POINTS: usize = 68;

/// Face embedding vector. Dimension is fixed by the external pipeline (e.g. 128).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// True if every component is finite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// Face bounding box in frame pixel coordinates, `(top, right, bottom, left)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl BoundingBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    /// Integer box center `(x, y)`, widened so any `i32` box is valid.
    pub fn center(&self) -> (i64, i64) {
        (
            (i64::from(self.left) + i64::from(self.right)) / 2,
            (i64::from(self.top) + i64::from(self.bottom)) / 2,
        )
    }

    /// Manhattan distance between the centers of two boxes.
    pub fn center_distance(&self, other: &BoundingBox) -> i64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).abs() + (ay - by).abs()
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.top, b.right, b.bottom, b.left]
    }
}

/// One detected face in one frame.
#[derive(Debug, Clone)]
pub struct Probe {
    pub embedding: Embedding,
    pub bbox: BoundingBox,
}

/// Six-point eye contour, indices 1..6 clockwise from the outer corner.
pub type EyeContour = [(f32, f32); 6];

/// 68-point facial landmark set.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    points: Vec<(f32, f32)>,
}

impl FaceLandmarks {
    /// Returns `None` unless exactly 68 points are supplied.
    pub fn from_points(points: Vec<(f32, f32)>) -> Option<Self> {
        (points.len() == LANDMARK_POINTS).then_some(Self { points })
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }

    /// Subject's right eye (points 36..42).
    pub fn right_eye(&self) -> EyeContour {
        self.eye(36)
    }

    /// Subject's left eye (points 42..48).
    pub fn left_eye(&self) -> EyeContour {
        self.eye(42)
    }

    fn eye(&self, start: usize) -> EyeContour {
        let mut eye = [(0.0, 0.0); 6];
        eye.copy_from_slice(&self.points[start..start + 6]);
        eye
    }
}

/// Landmarks extracted for one detected face region.
#[derive(Debug, Clone)]
pub struct LandmarkSet {
    pub bbox: BoundingBox,
    pub landmarks: FaceLandmarks,
}

/// Identity profile metadata, keyed by identity id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub id: String,
    pub name: String,
    pub program: String,
    pub branch: String,
    pub mobile: String,
    #[serde(default)]
    pub email: String,
}

/// One committed attendance event, as held by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity_id: String,
    pub name: String,
    pub program: String,
    pub branch: String,
    pub mobile: String,
    /// `%Y-%m-%d`
    pub date: String,
    /// `%H:%M:%S`
    pub time: String,
}

impl AttendanceRecord {
    /// Build a record for `identity_id` from `profile`, stamped at `now`
    /// (second precision).
    pub fn new(identity_id: &str, profile: &IdentityProfile, now: NaiveDateTime) -> Self {
        Self {
            identity_id: identity_id.to_string(),
            name: profile.name.clone(),
            program: profile.program.clone(),
            branch: profile.branch.clone(),
            mobile: profile.mobile.clone(),
            date: now.format(DATE_FORMAT).to_string(),
            time: now.format(TIME_FORMAT).to_string(),
        }
    }

    /// Parse the stored date and time. `None` if either column is malformed.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        let date = NaiveDate::parse_from_str(self.date.trim(), DATE_FORMAT).ok()?;
        let time = NaiveTime::parse_from_str(self.time.trim(), TIME_FORMAT).ok()?;
        Some(date.and_time(time))
    }
}
