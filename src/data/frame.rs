//! Wire encodings for the two message kinds sharing the client connection
//!
//! Pose frames are `b'P'` followed by `N * 3` little-endian `f32`s. Serial lines are sent either
//! raw, exactly as read from the device, or tagged as `b'S'`, a little-endian `u16` length and the
//! line text without its terminator.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::{LandmarkVector, COORDS_PER_LANDMARK};
use crate::error::{Error, Result};

/// Tag byte that starts every pose frame
pub const POSE_TAG: u8 = b'P';

/// Tag byte that starts a serial line in [`SerialFraming::Tagged`] mode
pub const SERIAL_TAG: u8 = b'S';

/// Size of one encoded coordinate
const FLOAT_SIZE: usize = std::mem::size_of::<f32>();

/// Encoded size of a pose frame carrying `landmarks` points
pub fn pose_frame_len(landmarks: usize) -> usize {
    1 + landmarks * COORDS_PER_LANDMARK * FLOAT_SIZE
}

/// Serializes a landmark vector into a tagged pose frame
pub fn encode_pose(landmarks: &LandmarkVector) -> Bytes {
    let mut buf = BytesMut::with_capacity(pose_frame_len(landmarks.len()));
    buf.put_u8(POSE_TAG);
    for value in landmarks.flat_iter() {
        buf.put_f32_le(value);
    }
    buf.freeze()
}

/// Parses a tagged pose frame back into a landmark vector
pub fn decode_pose(mut payload: &[u8]) -> Result<LandmarkVector> {
    if payload.is_empty() {
        return Err(Error::frame("empty payload"));
    }

    let tag = payload.get_u8();
    if tag != POSE_TAG {
        return Err(Error::frame(format!("unexpected tag {tag:#04x}")));
    }

    if payload.len() % (COORDS_PER_LANDMARK * FLOAT_SIZE) != 0 {
        return Err(Error::frame(format!(
            "{} body bytes is not a whole number of landmarks",
            payload.len()
        )));
    }

    let mut values = Vec::with_capacity(payload.len() / FLOAT_SIZE);
    while payload.has_remaining() {
        values.push(payload.get_f32_le());
    }

    LandmarkVector::from_flat(values).ok_or_else(|| Error::frame("partial landmark"))
}

/// How serial lines are put on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SerialFraming {
    /// Forward the line untouched, terminator included
    #[default]
    Raw,
    /// Prefix the line with a tag byte and its length so receivers can tell it from pose frames
    Tagged,
}

impl SerialFraming {
    /// Encodes one line read from the device
    pub fn encode(self, line: &str) -> Result<Bytes> {
        match self {
            Self::Raw => Ok(Bytes::copy_from_slice(line.as_bytes())),
            Self::Tagged => {
                let text = line.trim_end_matches(['\r', '\n']);
                let len = u16::try_from(text.len())
                    .map_err(|_| Error::frame(format!("serial line of {} bytes", text.len())))?;

                let mut buf = BytesMut::with_capacity(3 + text.len());
                buf.put_u8(SERIAL_TAG);
                buf.put_u16_le(len);
                buf.put_slice(text.as_bytes());
                Ok(buf.freeze())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::BODY_LANDMARKS;

    fn assert_bit_exact(a: &LandmarkVector, b: &LandmarkVector) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.flat_iter().zip(b.flat_iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn round_trips_bit_exact() {
        for len in [0, 1, BODY_LANDMARKS, 10_000] {
            let original = LandmarkVector::fuzz(len);
            let encoded = encode_pose(&original);

            assert_eq!(encoded.len(), pose_frame_len(len));
            assert_eq!(encoded[0], POSE_TAG);
            assert_bit_exact(&original, &decode_pose(&encoded).unwrap());
        }
    }

    #[test]
    fn preserves_special_floats() {
        let original = LandmarkVector::from_points(&[
            (f32::NAN, -0.0, f32::INFINITY),
            (f32::MIN_POSITIVE, 1e-40, -1.5),
        ]);
        assert_bit_exact(&original, &decode_pose(&encode_pose(&original)).unwrap());
    }

    #[test]
    fn layout_is_little_endian() {
        let encoded = encode_pose(&LandmarkVector::from_points(&[(1.0, 0.0, -2.0)]));
        assert_eq!(
            &encoded[..],
            &[b'P', 0, 0, 0x80, 0x3f, 0, 0, 0, 0, 0, 0, 0, 0xc0]
        );
    }

    #[test]
    fn decode_rejects_malformed() {
        assert!(decode_pose(&[]).is_err());
        assert!(decode_pose(&[b'S', 0, 0, 0, 0]).is_err());
        assert!(decode_pose(&[b'P', 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn raw_framing_is_verbatim() {
        let encoded = SerialFraming::Raw.encode("temp=21.5\r\n").unwrap();
        assert_eq!(&encoded[..], b"temp=21.5\r\n");
    }

    #[test]
    fn tagged_framing_strips_terminator() {
        let encoded = SerialFraming::Tagged.encode("temp=21.5\r\n").unwrap();
        assert_eq!(&encoded[..3], &[b'S', 9, 0]);
        assert_eq!(&encoded[3..], b"temp=21.5");
    }

    #[test]
    fn tagged_framing_rejects_oversized_lines() {
        let line = "x".repeat(u16::MAX as usize + 1);
        assert!(SerialFraming::Tagged.encode(&line).is_err());
    }
}
