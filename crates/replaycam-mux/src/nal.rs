//! H.264 NAL unit parsing and AVCC conversion.
//!
//! Encoders emit **Annex B** access units, where NAL units are separated by
//! `00 00 01` or `00 00 00 01` start codes. MP4 samples use **AVCC**, where
//! each NAL unit is preceded by its 4-byte big-endian length and parameter sets
//! live in the track's `avcC` box instead of the sample data.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

/// NAL unit types relevant for H.264.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NalUnitType {
    /// Non-IDR slice (P/B frame).
    NonIdrSlice = 1,
    /// IDR slice (keyframe).
    IdrSlice = 5,
    /// Supplemental Enhancement Information.
    Sei = 6,
    /// Sequence Parameter Set.
    Sps = 7,
    /// Picture Parameter Set.
    Pps = 8,
    /// Access Unit Delimiter.
    Aud = 9,
    /// Other/unknown NAL type.
    Other = 0,
}

impl From<u8> for NalUnitType {
    fn from(header: u8) -> Self {
        match header & 0x1F {
            1 => NalUnitType::NonIdrSlice,
            5 => NalUnitType::IdrSlice,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::Aud,
            _ => NalUnitType::Other,
        }
    }
}

/// A NAL unit without its start code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    /// The NAL unit type.
    pub nal_type: NalUnitType,
    /// Header byte and payload.
    pub data: Bytes,
}

/// Finds the next start code at or after `from`.
///
/// Returns `(position, length)` of the start code.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 3 < data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Split an Annex B byte stream into NAL units.
///
/// Bytes before the first start code are ignored, as are empty units.
pub fn parse_annex_b(data: &[u8]) -> Vec<NalUnit> {
    let mut nals = Vec::new();
    let Some((mut pos, mut code_len)) = find_start_code(data, 0) else {
        return nals;
    };

    loop {
        let start = pos + code_len;
        let next = find_start_code(data, start);
        let end = next.map_or(data.len(), |(p, _)| p);

        if start < end {
            let unit = &data[start..end];
            nals.push(NalUnit {
                nal_type: NalUnitType::from(unit[0]),
                data: Bytes::copy_from_slice(unit),
            });
        }

        match next {
            Some((p, len)) => {
                pos = p;
                code_len = len;
            }
            None => break,
        }
    }

    nals
}

/// Join NAL units with 4-byte big-endian length prefixes.
pub fn nals_to_avcc(nals: &[NalUnit]) -> Bytes {
    let size = nals.iter().map(|n| 4 + n.data.len()).sum();
    let mut buf = BytesMut::with_capacity(size);

    for nal in nals {
        buf.put_u32(nal.data.len() as u32);
        buf.put_slice(&nal.data);
    }

    buf.freeze()
}

/// Extract the SPS and PPS from Annex B codec configuration data.
///
/// The last SPS and PPS win if several are present.
pub fn extract_sps_pps(annex_b_headers: &[u8]) -> Option<(Bytes, Bytes)> {
    let mut sps = None;
    let mut pps = None;

    for nal in parse_annex_b(annex_b_headers) {
        match nal.nal_type {
            NalUnitType::Sps => {
                debug!(len = nal.data.len(), "Found SPS NAL unit");
                sps = Some(nal.data);
            }
            NalUnitType::Pps => {
                debug!(len = nal.data.len(), "Found PPS NAL unit");
                pps = Some(nal.data);
            }
            _ => {}
        }
    }

    sps.zip(pps)
}

/// Drop parameter sets and access unit delimiters, which belong in the
/// container header rather than in samples.
pub fn filter_parameter_sets(nals: Vec<NalUnit>) -> Vec<NalUnit> {
    nals.into_iter()
        .filter(|nal| {
            !matches!(
                nal.nal_type,
                NalUnitType::Sps | NalUnitType::Pps | NalUnitType::Aud
            )
        })
        .collect()
}

/// Convert one Annex B access unit into an AVCC sample payload.
pub fn annex_b_to_sample(access_unit: &[u8]) -> Bytes {
    let nals = filter_parameter_sets(parse_annex_b(access_unit));
    trace!(nal_count = nals.len(), "Converted access unit");
    nals_to_avcc(&nals)
}
