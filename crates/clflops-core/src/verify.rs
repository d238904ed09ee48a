//! Sampled verification of device output against the host reference.

use tracing::debug;

use crate::kernels::reference_transform;
use crate::staging::{SampleStream, StreamCheckpoint};

/// Absolute tolerance between device output and host reference.
pub const VERIFY_TOLERANCE: f32 = 1.0e-6;

/// The verification sample is `1 / SAMPLE_DIVISOR` of the workload.
pub const SAMPLE_DIVISOR: usize = 100;

/// Number of leading elements read back for verification.
///
/// One percent of the workload, but at least one element when the workload
/// is not empty.
pub fn sample_size(total_elements: usize) -> usize {
    if total_elements == 0 {
        0
    } else {
        (total_elements / SAMPLE_DIVISOR).max(1)
    }
}

/// Check `sampled_output` against the values drawn from `checkpoint`, using
/// the default tolerance.
pub fn verify(sampled_output: &[f32], checkpoint: &StreamCheckpoint) -> bool {
    Verifier::default().verify(sampled_output, checkpoint)
}

/// Element-wise comparison with a fixed absolute tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verifier {
    tolerance: f32,
}

impl Verifier {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Replay the inputs from `checkpoint` and compare.
    pub fn verify(&self, sampled_output: &[f32], checkpoint: &StreamCheckpoint) -> bool {
        let inputs = SampleStream::resume(checkpoint).fill(sampled_output.len());
        self.compare(sampled_output, &inputs)
    }

    /// Compare `output[i]` to `reference_transform(inputs[i])`.
    ///
    /// Stops at the first element that is not finite or out of tolerance.
    pub fn compare(&self, output: &[f32], inputs: &[f32]) -> bool {
        if output.len() != inputs.len() {
            debug!("Sample length {} != reference length {}", output.len(), inputs.len());
            return false;
        }
        for (i, (&got, &input)) in output.iter().zip(inputs).enumerate() {
            let expected = reference_transform(input);
            if !got.is_finite() {
                debug!("Element {i}: non-finite output {got}");
                return false;
            }
            let error = (got - expected).abs();
            if !(error <= self.tolerance) {
                debug!("Element {i}: got {got}, expected {expected} (error {error:e})");
                return false;
            }
        }
        true
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(VERIFY_TOLERANCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_one_percent() {
        assert_eq!(sample_size(0), 0);
        assert_eq!(sample_size(1), 1);
        assert_eq!(sample_size(99), 1);
        assert_eq!(sample_size(100), 1);
        assert_eq!(sample_size(128_000_000), 1_280_000);
    }

    #[test]
    fn accepts_exact_sqrt() {
        let inputs = [0.0_f32, 0.25, 0.5, 0.81];
        let output: Vec<f32> = inputs.iter().map(|x| x.sqrt()).collect();
        assert!(Verifier::default().compare(&output, &inputs));
    }

    #[test]
    fn accepts_error_within_tolerance() {
        let inputs = [0.25_f32];
        assert!(Verifier::default().compare(&[0.5 + 5.0e-7], &inputs));
    }

    #[test]
    fn rejects_error_past_tolerance() {
        let inputs = [0.25_f32, 0.64];
        assert!(!Verifier::default().compare(&[0.5, 0.8 + 1.0e-5], &inputs));
    }

    #[test]
    fn rejects_nan_and_inf() {
        let inputs = [0.25_f32];
        assert!(!Verifier::default().compare(&[f32::NAN], &inputs));
        assert!(!Verifier::default().compare(&[f32::INFINITY], &inputs));
    }

    #[test]
    fn rejects_untransformed_input() {
        let inputs = [0.25_f32];
        assert!(!Verifier::default().compare(&inputs, &inputs));
    }

    #[test]
    fn rejects_length_mismatch() {
        assert!(!Verifier::default().compare(&[0.5], &[0.25, 0.36]));
    }

    #[test]
    fn verify_replays_stream() {
        let checkpoint = StreamCheckpoint { seed: 11, word_pos: 0 };
        let inputs = SampleStream::new(11).fill(64);
        let output: Vec<f32> = inputs.iter().map(|x| x.sqrt()).collect();
        assert!(verify(&output, &checkpoint));

        let other = StreamCheckpoint { seed: 12, word_pos: 0 };
        assert!(!verify(&output, &other));
    }

    #[test]
    fn empty_sample_verifies() {
        assert!(verify(&[], &StreamCheckpoint { seed: 0, word_pos: 0 }));
    }
}
