//! Decoding of the JSON produced by recognition backends.
//!
//! Three shapes are understood:
//!
//! - **Scan report** (`process_image_file`, recognition scripts):
//!   `{success, processing_time, plates_detected: [{plate_number, confidence,
//!   region, coordinates: {x, y, width, height}}], regions_analyzed, alpr_engine}`
//! - **Engine results** (`process_with_specific_engine`, `process_with_best_engine`):
//!   `[{plate, confidence, coordinates: {x1, y1, x2, y2}, matches_template}]`,
//!   bare or wrapped as `{success, engine, results}`
//! - **Engine comparison** (`compare_all_engines`):
//!   `{success, results_by_engine: {name: [engine result, ...]}}`

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::recognition::{
    rect_corners, Candidate, EngineComparison, Point, RecognitionRecord, RecognitionReport,
    RecordError,
};

const DEFAULT_REGION: &str = "us";

/// Errors decoding backend output.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid recognition JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("backend reported failure: {0}")]
    Reported(String),
    #[error("expected 4 corner points, got {0}")]
    BadCoordinates(usize),
    #[error("invalid recognition record: {0}")]
    Record(#[from] RecordError),
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireCoordinates {
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    Span {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
    },
    Quad(Vec<[f64; 2]>),
}

impl WireCoordinates {
    fn corners(&self) -> Result<[Point; 4], DecodeError> {
        match self {
            WireCoordinates::Rect {
                x,
                y,
                width,
                height,
            } => Ok(rect_corners(*x, *y, *width, *height)),
            WireCoordinates::Span { x1, y1, x2, y2 } => {
                Ok(rect_corners(*x1, *y1, x2 - x1, y2 - y1))
            }
            WireCoordinates::Quad(points) => match points.as_slice() {
                [a, b, c, d] => Ok([a, b, c, d].map(|p| Point::new(p[0], p[1]))),
                other => Err(DecodeError::BadCoordinates(other.len())),
            },
        }
    }
}

/// `matches_template` arrives as `0`/`1` from some engines and as a bool from others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireFlag {
    Bool(bool),
    Int(i64),
}

impl WireFlag {
    fn as_bool(&self) -> bool {
        match self {
            WireFlag::Bool(b) => *b,
            WireFlag::Int(i) => *i != 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    plate: String,
    confidence: f64,
    #[serde(default)]
    matches_template: Option<WireFlag>,
}

#[derive(Debug, Deserialize)]
struct WireDetectedPlate {
    plate_number: String,
    confidence: f64,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_confidence: Option<f64>,
    coordinates: WireCoordinates,
    #[serde(default)]
    candidates: Vec<WireCandidate>,
}

#[derive(Debug, Deserialize)]
struct WireScanReport {
    success: bool,
    #[serde(default)]
    processing_time: f64,
    #[serde(default)]
    plates_detected: Vec<WireDetectedPlate>,
    #[serde(default)]
    regions_analyzed: Option<u32>,
    #[serde(default)]
    alpr_engine: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireEngineResult {
    plate: String,
    confidence: f64,
    coordinates: WireCoordinates,
    #[serde(default)]
    matches_template: Option<WireFlag>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireEngineResults {
    Wrapped {
        success: bool,
        #[serde(default, alias = "best_engine")]
        engine: Option<String>,
        #[serde(default)]
        results: Vec<WireEngineResult>,
        #[serde(default)]
        error: Option<String>,
    },
    Bare(Vec<WireEngineResult>),
}

#[derive(Debug, Deserialize)]
struct WireComparison {
    success: bool,
    #[serde(default)]
    results_by_engine: BTreeMap<String, Vec<WireEngineResult>>,
    #[serde(default)]
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

fn reported(error: Option<String>) -> DecodeError {
    DecodeError::Reported(error.unwrap_or_else(|| "unspecified error".to_string()))
}

fn sort_by_confidence(records: &mut [RecognitionRecord]) {
    records.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn detected_to_record(
    plate: WireDetectedPlate,
    processing_time_ms: f64,
) -> Result<RecognitionRecord, DecodeError> {
    let corners = plate.coordinates.corners()?;
    let record = RecognitionRecord::new(
        plate.plate_number,
        plate.confidence,
        corners,
        plate.region.unwrap_or_else(|| DEFAULT_REGION.to_string()),
        plate.region_confidence.unwrap_or(0.0),
        processing_time_ms,
    )
    .with_alternatives(plate.candidates.into_iter().map(|c| {
        let mut candidate = Candidate::new(c.plate, c.confidence);
        if let Some(flag) = c.matches_template {
            candidate.matches_template = flag.as_bool();
        }
        candidate
    }));
    record.validate()?;
    Ok(record)
}

fn engine_result_to_record(result: WireEngineResult) -> Result<RecognitionRecord, DecodeError> {
    let corners = result.coordinates.corners()?;
    let mut record = RecognitionRecord::new(
        result.plate,
        result.confidence,
        corners,
        DEFAULT_REGION,
        0.0,
        0.0,
    );
    if let Some(flag) = result.matches_template {
        record = record.with_template_flag(flag.as_bool());
    }
    record.validate()?;
    Ok(record)
}

fn engine_results_to_records(
    results: Vec<WireEngineResult>,
) -> Result<Vec<RecognitionRecord>, DecodeError> {
    let mut records = results
        .into_iter()
        .map(engine_result_to_record)
        .collect::<Result<Vec<_>, _>>()?;
    sort_by_confidence(&mut records);
    Ok(records)
}

/// Decodes a scan report. `success: false` becomes [`DecodeError::Reported`].
///
/// # Errors
///
/// Returns an error for malformed JSON, a reported failure, or a detection
/// that cannot form a valid record.
pub fn decode_scan_report(json: &str) -> Result<RecognitionReport, DecodeError> {
    let wire: WireScanReport = serde_json::from_str(json)?;
    if !wire.success {
        return Err(reported(wire.error));
    }

    let processing_time_ms = (wire.processing_time * 1000.0).max(0.0);
    let mut records = wire
        .plates_detected
        .into_iter()
        .map(|p| detected_to_record(p, processing_time_ms))
        .collect::<Result<Vec<_>, _>>()?;
    sort_by_confidence(&mut records);

    tracing::debug!(
        plates = records.len(),
        processing_time_ms,
        engine = wire.alpr_engine.as_deref().unwrap_or("unknown"),
        "decoded scan report"
    );

    Ok(RecognitionReport {
        records,
        processing_time_ms,
        regions_analyzed: wire.regions_analyzed,
        engine: wire.alpr_engine,
    })
}

/// Decodes per-engine results, bare or wrapped.
///
/// # Errors
///
/// Returns an error for malformed JSON, a reported failure, or invalid records.
pub fn decode_engine_results(json: &str) -> Result<RecognitionReport, DecodeError> {
    let (engine, results) = match serde_json::from_str::<WireEngineResults>(json)? {
        WireEngineResults::Wrapped {
            success: false,
            error,
            ..
        } => return Err(reported(error)),
        WireEngineResults::Wrapped {
            engine, results, ..
        } => (engine, results),
        WireEngineResults::Bare(results) => (None, results),
    };

    Ok(RecognitionReport {
        records: engine_results_to_records(results)?,
        processing_time_ms: 0.0,
        regions_analyzed: None,
        engine,
    })
}

/// Decodes an engine comparison.
///
/// # Errors
///
/// Returns an error for malformed JSON, a reported failure, or invalid records.
pub fn decode_engine_comparison(json: &str) -> Result<EngineComparison, DecodeError> {
    let wire: WireComparison = serde_json::from_str(json)?;
    if !wire.success {
        return Err(reported(wire.error));
    }

    let engines = wire
        .results_by_engine
        .into_iter()
        .map(|(name, results)| Ok((name, engine_results_to_records(results)?)))
        .collect::<Result<BTreeMap<_, _>, DecodeError>>()?;
    Ok(EngineComparison { engines })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SCAN_REPORT: &str = r#"{
        "success": true,
        "processing_time": 1.25,
        "plates_detected": [
            {
                "plate_number": "XYZ789",
                "confidence": 75.0,
                "region": "us",
                "coordinates": {"x": 300, "y": 120, "width": 90, "height": 30},
                "aspect_ratio": 3.0,
                "area": 2700
            },
            {
                "plate_number": "ABC123",
                "confidence": 95.0,
                "region": "us",
                "coordinates": {"x": 10, "y": 20, "width": 120, "height": 40},
                "aspect_ratio": 3.0,
                "area": 4800
            }
        ],
        "regions_analyzed": 5,
        "image_info": {"original_size": "1280x960"},
        "alpr_engine": "chaquopy_predator_cv2"
    }"#;

    #[test]
    fn scan_report_decodes_and_sorts() {
        let report = decode_scan_report(SCAN_REPORT).unwrap();
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.best().unwrap().plate, "ABC123");
        assert!((report.processing_time_ms - 1250.0).abs() < 1e-9);
        assert_eq!(report.regions_analyzed, Some(5));
        assert_eq!(report.engine.as_deref(), Some("chaquopy_predator_cv2"));

        let best = report.best().unwrap();
        assert_eq!(best.corners, rect_corners(10.0, 20.0, 120.0, 40.0));
        assert_eq!(best.candidates.len(), 1);
        assert!(best.candidates[0].matches_template);
        assert!((best.processing_time_ms - 1250.0).abs() < 1e-9);
    }

    #[test]
    fn scan_report_failure_is_reported() {
        let err = decode_scan_report(r#"{"error": "Unable to load image", "success": false}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Reported(msg) if msg == "Unable to load image"));
    }

    #[test]
    fn scan_report_without_plates_is_empty() {
        let json = r#"{"success": true, "processing_time": 0.4, "plates_detected": []}"#;
        let report = decode_scan_report(json).unwrap();
        assert!(report.is_empty());
        assert!(report.best().is_none());
    }

    #[test]
    fn scan_report_clamps_confidence() {
        let json = r#"{"success": true, "plates_detected": [
            {"plate_number": "ABC123", "confidence": 104.5,
             "coordinates": {"x": 0, "y": 0, "width": 10, "height": 5}}
        ]}"#;
        let report = decode_scan_report(json).unwrap();
        assert!((report.records[0].confidence - 100.0).abs() < f64::EPSILON);
        assert_eq!(report.records[0].region, "us");
    }

    #[test]
    fn engine_results_bare_with_span_coordinates() {
        let json = r#"[
            {"plate": "8ABC123", "confidence": 80.0,
             "coordinates": {"x1": 5, "y1": 6, "x2": 105, "y2": 36},
             "matches_template": 0}
        ]"#;
        let report = decode_engine_results(json).unwrap();
        let rec = &report.records[0];
        assert_eq!(rec.corners, rect_corners(5.0, 6.0, 100.0, 30.0));
        assert!(!rec.candidates[0].matches_template);
        assert!(report.engine.is_none());
    }

    #[test]
    fn engine_results_wrapped() {
        let json = r#"{"success": true, "engine": "opencv_standard", "count": 1, "results": [
            {"plate": "ABC123", "confidence": 91.0,
             "coordinates": {"x1": 0, "y1": 0, "x2": 40, "y2": 10},
             "matches_template": 1, "engine": "opencv_standard"}
        ]}"#;
        let report = decode_engine_results(json).unwrap();
        assert_eq!(report.engine.as_deref(), Some("opencv_standard"));
        assert!(report.records[0].candidates[0].matches_template);
    }

    #[test]
    fn engine_results_wrapped_failure() {
        let json =
            r#"{"success": false, "engine": "opencv_standard", "error": "boom", "results": []}"#;
        assert!(matches!(
            decode_engine_results(json),
            Err(DecodeError::Reported(m)) if m == "boom"
        ));
    }

    #[test]
    fn quad_coordinates_need_four_points() {
        let json = r#"[{"plate": "ABC123", "confidence": 50,
            "coordinates": [[0, 0], [10, 0], [10, 5]]}]"#;
        assert!(matches!(
            decode_engine_results(json),
            Err(DecodeError::BadCoordinates(3))
        ));
    }

    #[test]
    fn quad_coordinates_are_normalized() {
        let json = r#"[{"plate": "ABC123", "confidence": 50,
            "coordinates": [[0, 0], [0, 5], [10, 5], [10, 0]]}]"#;
        let report = decode_engine_results(json).unwrap();
        assert_eq!(report.records[0].corners, rect_corners(0.0, 0.0, 10.0, 5.0));
    }

    #[test]
    fn comparison_decodes_per_engine() {
        let json = r#"{
            "success": true,
            "engines_tested": 2,
            "results_by_engine": {
                "opencv_standard": [
                    {"plate": "ABC123", "confidence": 60,
                     "coordinates": {"x1": 0, "y1": 0, "x2": 40, "y2": 10}},
                    {"plate": "XYZ789", "confidence": 90,
                     "coordinates": {"x1": 0, "y1": 0, "x2": 40, "y2": 10}}
                ],
                "opencv_conservative": []
            }
        }"#;
        let cmp = decode_engine_comparison(json).unwrap();
        assert_eq!(cmp.engines.len(), 2);
        assert_eq!(cmp.engines["opencv_standard"][0].plate, "XYZ789");
        assert!(cmp.engines["opencv_conservative"].is_empty());
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        assert!(matches!(decode_scan_report("not json"), Err(DecodeError::Json(_))));
    }
}
