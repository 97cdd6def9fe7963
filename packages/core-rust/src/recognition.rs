//! Recognition records: the structured output of a plate-recognition call.
//!
//! A [`RecognitionRecord`] upholds three invariants, enforced on construction
//! and checked by [`RecognitionRecord::validate`]:
//!
//! - every confidence value lies in `[0, 100]`;
//! - the candidate list is non-empty whenever a plate is reported;
//! - the four corners wind clockwise in screen coordinates (y grows downward).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::plate::matches_template;

/// Lower/upper bound for every confidence value.
pub const MIN_CONFIDENCE: f64 = 0.0;
pub const MAX_CONFIDENCE: f64 = 100.0;

/// Clamps a confidence into `[0, 100]`. NaN becomes 0.
#[must_use]
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        MIN_CONFIDENCE
    } else {
        value.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Image-space point (pixels, y down).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Corners of an axis-aligned box, clockwise from the top-left.
#[must_use]
pub fn rect_corners(x: f64, y: f64, width: f64, height: f64) -> [Point; 4] {
    [
        Point::new(x, y),
        Point::new(x + width, y),
        Point::new(x + width, y + height),
        Point::new(x, y + height),
    ]
}

/// Shoelace signed area. Positive means clockwise on screen.
#[must_use]
pub fn signed_area(corners: &[Point; 4]) -> f64 {
    let mut twice = 0.0;
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        twice += a.x * b.y - b.x * a.y;
    }
    twice / 2.0
}

/// Reorders corners to clockwise winding starting at the corner closest to
/// the image origin.
#[must_use]
pub fn normalize_corners(corners: [Point; 4]) -> [Point; 4] {
    let mut ordered = if signed_area(&corners) < 0.0 {
        [corners[0], corners[3], corners[2], corners[1]]
    } else {
        corners
    };

    let start = ordered
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (a.x + a.y)
                .partial_cmp(&(b.x + b.y))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map_or(0, |(i, _)| i);
    ordered.rotate_left(start);
    ordered
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One alternative reading of a plate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub plate: String,
    pub confidence: f64,
    pub matches_template: bool,
}

impl Candidate {
    /// Builds a candidate, clamping confidence and computing the template flag.
    pub fn new(plate: impl Into<String>, confidence: f64) -> Self {
        let plate = plate.into();
        let matches_template = matches_template(&plate);
        Self {
            plate,
            confidence: clamp_confidence(confidence),
            matches_template,
        }
    }
}

/// Invariant violations found by [`RecognitionRecord::validate`].
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("malformed record JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{field} confidence {value} outside [0, 100]")]
    ConfidenceOutOfRange { field: &'static str, value: f64 },
    #[error("plate '{plate}' reported without candidates")]
    MissingCandidates { plate: String },
    #[error("corners wind counter-clockwise")]
    CounterClockwise,
}

/// Structured output of one detected plate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionRecord {
    pub plate: String,
    pub confidence: f64,
    pub corners: [Point; 4],
    /// Alternative readings, best first. The primary reading is always first.
    pub candidates: Vec<Candidate>,
    pub region: String,
    pub region_confidence: f64,
    pub processing_time_ms: f64,
}

impl RecognitionRecord {
    /// Builds a record, normalizing confidences and corner winding and
    /// seeding the candidate list with the primary reading.
    pub fn new(
        plate: impl Into<String>,
        confidence: f64,
        corners: [Point; 4],
        region: impl Into<String>,
        region_confidence: f64,
        processing_time_ms: f64,
    ) -> Self {
        let plate = plate.into();
        let confidence = clamp_confidence(confidence);
        let candidates = if plate.is_empty() {
            Vec::new()
        } else {
            vec![Candidate::new(plate.clone(), confidence)]
        };
        Self {
            plate,
            confidence,
            corners: normalize_corners(corners),
            candidates,
            region: region.into(),
            region_confidence: clamp_confidence(region_confidence),
            processing_time_ms: processing_time_ms.max(0.0),
        }
    }

    /// Overrides the template flag of the primary candidate.
    #[must_use]
    pub fn with_template_flag(mut self, matches: bool) -> Self {
        if let Some(primary) = self.candidates.first_mut() {
            primary.matches_template = matches;
        }
        self
    }

    /// Appends alternative readings after the primary one.
    #[must_use]
    pub fn with_alternatives(mut self, alternatives: impl IntoIterator<Item = Candidate>) -> Self {
        self.candidates.extend(alternatives.into_iter().map(|mut c| {
            c.confidence = clamp_confidence(c.confidence);
            c
        }));
        self
    }

    /// Checks the record invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), RecordError> {
        check_confidence("plate", self.confidence)?;
        check_confidence("region", self.region_confidence)?;
        for candidate in &self.candidates {
            check_confidence("candidate", candidate.confidence)?;
        }
        if !self.plate.is_empty() && self.candidates.is_empty() {
            return Err(RecordError::MissingCandidates {
                plate: self.plate.clone(),
            });
        }
        if signed_area(&self.corners) < 0.0 {
            return Err(RecordError::CounterClockwise);
        }
        Ok(())
    }

    /// Encodes the record to its wire JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (non-finite floats).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a record from wire JSON and validates it.
    ///
    /// # Errors
    ///
    /// Returns `RecordError::Malformed` for bad JSON, or the violated invariant.
    pub fn from_json(json: &str) -> Result<Self, RecordError> {
        let record: Self = serde_json::from_str(json)?;
        record.validate()?;
        Ok(record)
    }
}

fn check_confidence(field: &'static str, value: f64) -> Result<(), RecordError> {
    if (MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&value) {
        Ok(())
    } else {
        Err(RecordError::ConfidenceOutOfRange { field, value })
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Decoded output of one recognition call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionReport {
    /// Detected plates, highest confidence first.
    pub records: Vec<RecognitionRecord>,
    pub processing_time_ms: f64,
    pub regions_analyzed: Option<u32>,
    pub engine: Option<String>,
}

impl RecognitionReport {
    /// Highest-confidence record, if any plate was detected.
    #[must_use]
    pub fn best(&self) -> Option<&RecognitionRecord> {
        self.records.first()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Recognition output from several engines for the same image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineComparison {
    pub engines: BTreeMap<String, Vec<RecognitionRecord>>,
}

impl EngineComparison {
    /// Mean confidence of an engine's records; `None` for unknown engines,
    /// `0.0` for engines that found nothing.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_confidence(&self, engine: &str) -> Option<f64> {
        let records = self.engines.get(engine)?;
        if records.is_empty() {
            return Some(0.0);
        }
        Some(records.iter().map(|r| r.confidence).sum::<f64>() / records.len() as f64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
