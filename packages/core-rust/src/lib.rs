//! `PlateBridge` Core: channels, result envelopes, argument values, and
//! recognition records shared by the bridge and its callers.

pub mod channel;
pub mod envelope;
pub mod plate;
pub mod recognition;
pub mod types;
pub mod wire;

pub use channel::Channel;
pub use envelope::{Envelope, ErrorCode, Payload};
pub use recognition::{
    Candidate, EngineComparison, Point, RecognitionRecord, RecognitionReport, RecordError,
};
pub use types::Value;
pub use wire::{decode_engine_comparison, decode_engine_results, decode_scan_report, DecodeError};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
