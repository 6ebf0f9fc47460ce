//! The 28-byte node record — the sole binary unit on the wire.
//!
//! Layout (little-endian, fixed regardless of host):
//!
//! | offset | size | field |
//! |-------:|-----:|-------|
//! | 0      | 4    | slot (u32) |
//! | 4      | 12   | position x, y, z (f32) |
//! | 16     | 12   | velocity x, y, z (f32) |
//!
//! A frame is an integral multiple of 28 bytes with no header or count
//! prefix. Decoding sanitizes every float: NaN coerces to 0, values beyond
//! the wire caps clamp to them (±∞ included). The decoder reports whether
//! any sanitizing happened so callers can count it.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Size of one encoded node record in bytes.
pub const RECORD_SIZE: usize = 28;

/// Wire cap on position components, metres.
pub const POSITION_LIMIT: f32 = 1000.0;

/// Wire cap on velocity components, metres per tick.
pub const VELOCITY_LIMIT: f32 = 0.05;

/// Compact node identity on the wire, stable for the lifetime of the
/// current graph generation. String identifiers never appear in binary
/// frames — the identity table is the only bridge.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Slot(pub u32);

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for Slot {
    fn from(raw: u32) -> Self {
        Slot(raw)
    }
}

/// Three-component vector, f32 per axis to match the wire exactly.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Vec3 { x, y, z }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// One node's identity, position, and velocity — the decoded form of a
/// 28-byte record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeRecord {
    pub slot: Slot,
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Result of decoding a binary frame.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub records: Vec<NodeRecord>,
    /// True when any component was clamped or NaN-coerced during decode.
    /// Not an error — counted by callers for diagnostics.
    pub clamped: bool,
}

/// Encode records into a headerless binary frame. Values are written
/// bit-exact; sanitizing happens on the decode side so that encoding stays
/// canonical.
pub fn encode(records: &[NodeRecord]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(records.len() * RECORD_SIZE);
    for rec in records {
        buf.put_u32_le(rec.slot.0);
        buf.put_f32_le(rec.position.x);
        buf.put_f32_le(rec.position.y);
        buf.put_f32_le(rec.position.z);
        buf.put_f32_le(rec.velocity.x);
        buf.put_f32_le(rec.velocity.y);
        buf.put_f32_le(rec.velocity.z);
    }
    buf.freeze().to_vec()
}

/// Decode a headerless binary frame.
///
/// Fails with [`ProtoError::MalformedFrame`] when the length is not a
/// multiple of [`RECORD_SIZE`] — no partial records are produced. An empty
/// frame decodes to zero records and is a legal no-op.
pub fn decode(mut body: &[u8]) -> Result<DecodedFrame, ProtoError> {
    if body.len() % RECORD_SIZE != 0 {
        return Err(ProtoError::MalformedFrame(body.len()));
    }

    let mut clamped = false;
    let mut records = Vec::with_capacity(body.len() / RECORD_SIZE);

    while body.has_remaining() {
        let slot = Slot(body.get_u32_le());
        let position = Vec3 {
            x: sanitize(body.get_f32_le(), POSITION_LIMIT, &mut clamped),
            y: sanitize(body.get_f32_le(), POSITION_LIMIT, &mut clamped),
            z: sanitize(body.get_f32_le(), POSITION_LIMIT, &mut clamped),
        };
        let velocity = Vec3 {
            x: sanitize(body.get_f32_le(), VELOCITY_LIMIT, &mut clamped),
            y: sanitize(body.get_f32_le(), VELOCITY_LIMIT, &mut clamped),
            z: sanitize(body.get_f32_le(), VELOCITY_LIMIT, &mut clamped),
        };
        records.push(NodeRecord { slot, position, velocity });
    }

    Ok(DecodedFrame { records, clamped })
}

/// NaN coerces to 0; anything beyond ±limit (infinities included) clamps
/// to the cap.
fn sanitize(value: f32, limit: f32, clamped: &mut bool) -> f32 {
    if value.is_nan() {
        *clamped = true;
        0.0
    } else if value > limit {
        *clamped = true;
        limit
    } else if value < -limit {
        *clamped = true;
        -limit
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_record_round_trip() {
        let records = vec![
            NodeRecord {
                slot: Slot(7),
                position: Vec3::new(1.0, 2.0, 3.0),
                velocity: Vec3::ZERO,
            },
            NodeRecord {
                slot: Slot(9),
                position: Vec3::new(-1.0, -2.0, -3.0),
                velocity: Vec3::new(0.01, 0.0, 0.0),
            },
        ];

        let bytes = encode(&records);
        assert_eq!(bytes.len(), 56);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.records, records);
        assert!(!decoded.clamped);
    }

    #[test]
    fn malformed_length_produces_no_partial_records() {
        let err = decode(&[0u8; 29]).unwrap_err();
        match err {
            ProtoError::MalformedFrame(len) => assert_eq!(len, 29),
            other => panic!("expected MalformedFrame, got {other:?}"),
        }
    }

    #[test]
    fn empty_frame_is_a_legal_noop() {
        let decoded = decode(&[]).unwrap();
        assert!(decoded.records.is_empty());
        assert!(!decoded.clamped);
    }

    #[test]
    fn decode_clamps_and_reports() {
        let records = vec![NodeRecord {
            slot: Slot(1),
            position: Vec3::new(2000.0, f32::NAN, f32::NEG_INFINITY),
            velocity: Vec3::new(0.5, 0.0, 0.0),
        }];

        let decoded = decode(&encode(&records)).unwrap();
        assert!(decoded.clamped);

        let rec = &decoded.records[0];
        assert_eq!(rec.position, Vec3::new(1000.0, 0.0, -1000.0));
        assert_eq!(rec.velocity, Vec3::new(0.05, 0.0, 0.0));
    }

    #[test]
    fn in_range_values_survive_bit_exact() {
        let records = vec![NodeRecord {
            slot: Slot(u32::MAX),
            position: Vec3::new(999.999, -999.999, 0.125),
            velocity: Vec3::new(0.05, -0.05, 0.04999),
        }];
        let decoded = decode(&encode(&records)).unwrap();
        assert_eq!(decoded.records, records);
        assert!(!decoded.clamped);
    }

    #[test]
    fn layout_is_little_endian() {
        let records = vec![NodeRecord {
            slot: Slot(0x0403_0201),
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
        }];
        let bytes = encode(&records);
        assert_eq!(&bytes[..4], &[0x01, 0x02, 0x03, 0x04]);
    }
}
