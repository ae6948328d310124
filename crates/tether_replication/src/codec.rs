//! # Wire Form
//!
//! Fixed-size, zero-copy encoding of one pose sample.
//!
//! ```text
//! offset  size  field
//!      0     8  server_time   f64
//!      8     4  entity_id     u32
//!     12     4  reserved      u32 (zero)
//!     16    12  position      [f32; 3]
//!     28    16  orientation   [f32; 4]  (x, y, z, w)
//!     44    12  velocity      [f32; 3]
//!                              = 56 bytes
//! ```
//!
//! Fields are in host byte order; every supported target is little-endian.
//! Decoding never trusts the bytes: the sample is validated before it is
//! handed out.

use bytemuck::{Pod, Zeroable};
use tether_shared::{Quaternion, Vec3};

use crate::error::{ReplicationError, ReplicationResult};
use crate::sample::PoseSample;
use crate::EntityId;

/// Encoded size of one sample in bytes.
pub const WIRE_SAMPLE_SIZE: usize = std::mem::size_of::<WirePoseSample>();

/// One pose sample as it travels on the wire.
///
/// Total size: 56 bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct WirePoseSample {
    /// Sender-synchronized capture time.
    pub server_time: f64,
    /// Target entity.
    pub entity_id: u32,
    /// Padding, always zero.
    pub reserved: u32,
    /// Position.
    pub position: [f32; 3],
    /// Orientation, `(x, y, z, w)`.
    pub orientation: [f32; 4],
    /// Linear velocity.
    pub velocity: [f32; 3],
}

impl WirePoseSample {
    /// Packs a sample for `entity`.
    #[must_use]
    pub const fn new(entity: EntityId, sample: &PoseSample) -> Self {
        Self {
            server_time: sample.server_time,
            entity_id: entity.0,
            reserved: 0,
            position: sample.position.to_array(),
            orientation: sample.orientation.to_array(),
            velocity: sample.velocity.to_array(),
        }
    }

    /// Target entity.
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        EntityId(self.entity_id)
    }

    /// Unpacked sample, not yet validated.
    #[must_use]
    pub const fn sample(&self) -> PoseSample {
        PoseSample {
            position: Vec3::from_array(self.position),
            orientation: Quaternion::from_array(self.orientation),
            velocity: Vec3::from_array(self.velocity),
            server_time: self.server_time,
        }
    }
}

/// Appends the encoded sample to `out`.
pub fn encode_into(entity: EntityId, sample: &PoseSample, out: &mut Vec<u8>) {
    out.extend_from_slice(bytemuck::bytes_of(&WirePoseSample::new(entity, sample)));
}

/// Encodes one sample.
#[must_use]
pub fn encode(entity: EntityId, sample: &PoseSample) -> [u8; WIRE_SAMPLE_SIZE] {
    let mut bytes = [0u8; WIRE_SAMPLE_SIZE];
    bytes.copy_from_slice(bytemuck::bytes_of(&WirePoseSample::new(entity, sample)));
    bytes
}

/// Decodes and validates the first sample in `bytes`. Trailing bytes are
/// ignored.
///
/// # Errors
///
/// `Truncated` for a short buffer, `InvalidSample` for a malformed one.
pub fn decode(bytes: &[u8], unit_tolerance: f32) -> ReplicationResult<(EntityId, PoseSample)> {
    let Some(slice) = bytes.get(..WIRE_SAMPLE_SIZE) else {
        return Err(ReplicationError::Truncated {
            needed: WIRE_SAMPLE_SIZE,
            got: bytes.len(),
        });
    };
    let wire: WirePoseSample = bytemuck::pod_read_unaligned(slice);
    let sample = wire.sample().validated(unit_tolerance)?;
    Ok((wire.entity(), sample))
}

/// Decodes a datagram of back-to-back samples. Malformed samples are
/// reported to `on_sample` as errors and skipped; a trailing partial
/// sample ends decoding with `Truncated`.
pub fn decode_batch(
    bytes: &[u8],
    unit_tolerance: f32,
    mut on_sample: impl FnMut(ReplicationResult<(EntityId, PoseSample)>),
) {
    let mut chunks = bytes.chunks_exact(WIRE_SAMPLE_SIZE);
    for chunk in &mut chunks {
        on_sample(decode(chunk, unit_tolerance));
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        tracing::warn!(trailing = rest.len(), "partial pose sample at end of datagram");
        on_sample(Err(ReplicationError::Truncated {
            needed: WIRE_SAMPLE_SIZE,
            got: rest.len(),
        }));
    }
}
