//! Binary world-state codec.
//!
//! A [`WorldStateSnapshot`] is the per-tick broadcast of every replicated
//! pose. It has a fixed little-endian layout so peers in any language can
//! read it without a schema library:
//!
//! ```text
//! tick: u32
//! time: u64                      (server wall clock, ms since the epoch)
//! pose_count: u32
//! pose[pose_count]:
//!     network_id: u32
//!     position: f32[3]
//!     rotation: f32[4]           (x, y, z, w)
//!     linear_velocity: f32[3]
//!     angular_velocity: f32[3]
//! ik_pose_count: u32
//! ik_pose[ik_pose_count]:
//!     network_id: u32
//!     head_position: f32[3]   head_rotation: f32[4]
//!     left_position: f32[3]   left_rotation: f32[4]
//!     right_position: f32[3]  right_rotation: f32[4]
//! ```
//!
//! `time` is stamped at encode time from the wall clock and ignores whatever
//! the caller put in the snapshot; peers use it for latency estimation. Two
//! encodings of the same snapshot therefore differ in those eight bytes.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::DecodeError;
use crate::ids::NetworkId;

/// Bytes before the first list: tick + time.
pub const HEADER_LEN: usize = 4 + 8;

/// Encoded size of one [`PoseRecord`].
pub const POSE_RECORD_LEN: usize = 4 + 4 * (3 + 4 + 3 + 3);

/// Encoded size of one [`IkPoseRecord`].
pub const IK_POSE_RECORD_LEN: usize = 4 + 4 * 3 * (3 + 4);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseRecord {
    pub network_id: NetworkId,
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IkPoseRecord {
    pub network_id: NetworkId,
    pub head_position: Vec3,
    pub head_rotation: Quat,
    pub left_position: Vec3,
    pub left_rotation: Quat,
    pub right_position: Vec3,
    pub right_rotation: Quat,
}

/// One tick of replicated state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldStateSnapshot {
    /// Wrapping simulation tick.
    pub tick: u32,
    /// Milliseconds since the Unix epoch at encode time.
    pub time: u64,
    pub pose: Vec<PoseRecord>,
    pub ik_pose: Vec<IkPoseRecord>,
}

impl WorldStateSnapshot {
    #[must_use]
    pub fn new(tick: u32) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pose.is_empty() && self.ik_pose.is_empty()
    }

    /// Size of this snapshot once encoded.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN
            + 4
            + self.pose.len() * POSE_RECORD_LEN
            + 4
            + self.ik_pose.len() * IK_POSE_RECORD_LEN
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Encode a snapshot, stamping `time` with the current wall clock.
#[must_use]
pub fn encode(snapshot: &WorldStateSnapshot) -> Vec<u8> {
    encode_at(snapshot, now_millis())
}

fn encode_at(snapshot: &WorldStateSnapshot, time: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(snapshot.encoded_len());
    out.extend_from_slice(&snapshot.tick.to_le_bytes());
    out.extend_from_slice(&time.to_le_bytes());

    out.extend_from_slice(&(snapshot.pose.len() as u32).to_le_bytes());
    for pose in &snapshot.pose {
        out.extend_from_slice(&pose.network_id.0.to_le_bytes());
        put_vec3(&mut out, pose.position);
        put_quat(&mut out, pose.rotation);
        put_vec3(&mut out, pose.linear_velocity);
        put_vec3(&mut out, pose.angular_velocity);
    }

    out.extend_from_slice(&(snapshot.ik_pose.len() as u32).to_le_bytes());
    for ik in &snapshot.ik_pose {
        out.extend_from_slice(&ik.network_id.0.to_le_bytes());
        put_vec3(&mut out, ik.head_position);
        put_quat(&mut out, ik.head_rotation);
        put_vec3(&mut out, ik.left_position);
        put_quat(&mut out, ik.left_rotation);
        put_vec3(&mut out, ik.right_position);
        put_quat(&mut out, ik.right_rotation);
    }
    out
}

fn put_vec3(out: &mut Vec<u8>, v: Vec3) {
    for component in v.to_array() {
        out.extend_from_slice(&component.to_le_bytes());
    }
}

fn put_quat(out: &mut Vec<u8>, q: Quat) {
    for component in q.to_array() {
        out.extend_from_slice(&component.to_le_bytes());
    }
}

/// Decode a snapshot.
///
/// Every list length is checked against the bytes that remain before any
/// record is read. Rejected buffers are logged with their contents.
///
/// # Errors
///
/// Returns [`DecodeError`] if the buffer is truncated, a list length is
/// inconsistent with the buffer size, or bytes remain after the last list.
pub fn decode(bytes: &[u8]) -> Result<WorldStateSnapshot, DecodeError> {
    decode_inner(bytes).inspect_err(|error| {
        warn!(len = bytes.len(), buffer = ?bytes, %error, "couldn't deserialize world state");
    })
}

fn decode_inner(bytes: &[u8]) -> Result<WorldStateSnapshot, DecodeError> {
    let mut reader = Reader::new(bytes);
    let tick = reader.u32("tick")?;
    let time = reader.u64("time")?;

    let pose_count = reader.list_len("pose", POSE_RECORD_LEN)?;
    let mut pose = Vec::with_capacity(pose_count);
    for _ in 0..pose_count {
        pose.push(PoseRecord {
            network_id: NetworkId(reader.u32("pose.network_id")?),
            position: reader.vec3("pose.position")?,
            rotation: reader.quat("pose.rotation")?,
            linear_velocity: reader.vec3("pose.linear_velocity")?,
            angular_velocity: reader.vec3("pose.angular_velocity")?,
        });
    }

    let ik_count = reader.list_len("ik_pose", IK_POSE_RECORD_LEN)?;
    let mut ik_pose = Vec::with_capacity(ik_count);
    for _ in 0..ik_count {
        ik_pose.push(IkPoseRecord {
            network_id: NetworkId(reader.u32("ik_pose.network_id")?),
            head_position: reader.vec3("ik_pose.head_position")?,
            head_rotation: reader.quat("ik_pose.head_rotation")?,
            left_position: reader.vec3("ik_pose.left_position")?,
            left_rotation: reader.quat("ik_pose.left_rotation")?,
            right_position: reader.vec3("ik_pose.right_position")?,
            right_rotation: reader.quat("ik_pose.right_rotation")?,
        });
    }

    if reader.remaining() > 0 {
        return Err(DecodeError::TrailingBytes(reader.remaining()));
    }

    Ok(WorldStateSnapshot {
        tick,
        time,
        pose,
        ik_pose,
    })
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let end = self.offset + N;
        let Some(chunk) = self.bytes.get(self.offset..end) else {
            return Err(DecodeError::Truncated {
                field,
                offset: self.offset,
                needed: N,
                remaining: self.remaining(),
            });
        };
        let mut out = [0u8; N];
        out.copy_from_slice(chunk);
        self.offset = end;
        Ok(out)
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        self.take::<4>(field).map(u32::from_le_bytes)
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        self.take::<8>(field).map(u64::from_le_bytes)
    }

    fn f32(&mut self, field: &'static str) -> Result<f32, DecodeError> {
        self.take::<4>(field).map(f32::from_le_bytes)
    }

    fn vec3(&mut self, field: &'static str) -> Result<Vec3, DecodeError> {
        Ok(Vec3::new(self.f32(field)?, self.f32(field)?, self.f32(field)?))
    }

    fn quat(&mut self, field: &'static str) -> Result<Quat, DecodeError> {
        Ok(Quat::from_xyzw(
            self.f32(field)?,
            self.f32(field)?,
            self.f32(field)?,
            self.f32(field)?,
        ))
    }

    /// Read a list length and check the records fit in what is left.
    fn list_len(&mut self, list: &'static str, record_len: usize) -> Result<usize, DecodeError> {
        let count = self.u32(list)?;
        let needed = u64::from(count) * record_len as u64;
        if needed > self.remaining() as u64 {
            return Err(DecodeError::BadListLength {
                list,
                count,
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(count as usize)
    }
}
