//! Synthetic input generation and blocking host/device transfers.
//!
//! Inputs come from an explicitly owned [`SampleStream`]: a `ChaCha8Rng`
//! seeded from a `u64`, drawing `Uniform[0, 1)` `f32` values. A
//! [`StreamCheckpoint`] (seed plus stream word position) taken before each
//! draw lets the verifier replay the exact values the device received.

use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::backend::ComputeBackend;
use crate::error::{BenchError, Result};

/// Seed used when none is configured.
pub const DEFAULT_SEED: u64 = 5489;

/// Size of one workload element in bytes.
pub const ELEMENT_BYTES: u64 = std::mem::size_of::<f32>() as u64;

/// Position in a seeded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamCheckpoint {
    pub seed: u64,
    pub word_pos: u128,
}

/// Deterministic `Uniform[0, 1)` stream of `f32`.
#[derive(Debug, Clone)]
pub struct SampleStream {
    seed: u64,
    rng: ChaCha8Rng,
    dist: Uniform<f32>,
}

impl SampleStream {
    /// Start a stream at the beginning of `seed`.
    pub fn new(seed: u64) -> Self {
        Self { seed, rng: ChaCha8Rng::seed_from_u64(seed), dist: Uniform::new(0.0, 1.0) }
    }

    /// Re-create a stream positioned exactly at `checkpoint`.
    pub fn resume(checkpoint: &StreamCheckpoint) -> Self {
        let mut stream = Self::new(checkpoint.seed);
        stream.rng.set_word_pos(checkpoint.word_pos);
        stream
    }

    /// Current position.
    pub fn checkpoint(&self) -> StreamCheckpoint {
        StreamCheckpoint { seed: self.seed, word_pos: self.rng.get_word_pos() }
    }

    /// Draw the next value.
    pub fn next_value(&mut self) -> f32 {
        self.dist.sample(&mut self.rng)
    }

    /// Draw `count` values.
    pub fn fill(&mut self, count: usize) -> Vec<f32> {
        (0..count).map(|_| self.next_value()).collect()
    }
}

/// Host-resident input together with the stream position it was drawn from.
#[derive(Debug, Clone)]
pub struct Workload {
    data: Vec<f32>,
    origin: StreamCheckpoint,
}

impl Workload {
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes occupied by the elements.
    pub fn byte_len(&self) -> u64 {
        self.data.len() as u64 * ELEMENT_BYTES
    }

    /// Stream position of element 0.
    pub fn origin(&self) -> &StreamCheckpoint {
        &self.origin
    }
}

/// Owns the generator; successive workloads continue the same stream.
#[derive(Debug, Clone)]
pub struct Stager {
    stream: SampleStream,
}

impl Stager {
    pub fn new(seed: u64) -> Self {
        Self { stream: SampleStream::new(seed) }
    }

    /// Fill `byte_count / 4` elements from the stream.
    ///
    /// # Errors
    ///
    /// [`BenchError::InvalidArgument`] if the element count does not fit in
    /// host memory addressing.
    pub fn generate(&mut self, byte_count: u64) -> Result<Workload> {
        let count = element_count(byte_count)?;
        let origin = self.stream.checkpoint();
        debug!("Generating {} elements from seed {} at word {}", count, origin.seed, origin.word_pos);
        let data = self.stream.fill(count);
        Ok(Workload { data, origin })
    }
}

impl Default for Stager {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

/// Number of whole `f32` elements in `byte_count` bytes.
pub fn element_count(byte_count: u64) -> Result<usize> {
    usize::try_from(byte_count / ELEMENT_BYTES).map_err(|_| {
        BenchError::InvalidArgument(format!("{byte_count} bytes exceeds host addressable memory"))
    })
}

/// Copy the whole workload into a new device buffer (blocking).
pub fn upload<B: ComputeBackend>(
    backend: &B,
    program: &B::Program,
    workload: &Workload,
) -> Result<B::Buffer> {
    debug!("Uploading {} bytes to {}", workload.byte_len(), backend.name());
    backend.upload(program, workload.as_slice())
}

/// Read the first `count` elements of a device buffer (blocking).
pub fn download_sample<B: ComputeBackend>(
    backend: &B,
    program: &B::Program,
    buffer: &B::Buffer,
    count: usize,
) -> Result<Vec<f32>> {
    backend.download(program, buffer, count)
}
