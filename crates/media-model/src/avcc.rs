//! AVC decoder configuration record (`avcC`).
//!
//! Layout produced here:
//!
//! ```text
//! 0x01                      configurationVersion
//! sps[1] sps[2] sps[3]      profile, compatibility, level
//! 0xFF                      4-byte NAL length prefixes
//! 0xE1                      one SPS (high bits reserved-set)
//! u16be len, SPS bytes
//! 0x01                      one PPS
//! u16be len, PPS bytes
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::{EncodedSample, ModelError};

const CONFIGURATION_VERSION: u8 = 0x01;
const LENGTH_SIZE_MINUS_ONE: u8 = 0xFF;
const ONE_SPS: u8 = 0xE1;
const ONE_PPS: u8 = 0x01;

/// Build an `avcC` record from a single SPS and PPS.
pub fn build_avc_decoder_config(sps: &[u8], pps: &[u8]) -> Result<Bytes, ModelError> {
    if sps.len() < 4 {
        return Err(ModelError::ParameterSetTooShort { len: sps.len() });
    }
    if pps.is_empty() {
        return Err(ModelError::ParameterSetTooShort { len: 0 });
    }
    let sps_len =
        u16::try_from(sps.len()).map_err(|_| ModelError::ParameterSetTooLong { len: sps.len() })?;
    let pps_len =
        u16::try_from(pps.len()).map_err(|_| ModelError::ParameterSetTooLong { len: pps.len() })?;

    let mut record = BytesMut::with_capacity(7 + 2 + sps.len() + 1 + 2 + pps.len());
    record.put_u8(CONFIGURATION_VERSION);
    record.put_slice(&sps[1..4]);
    record.put_u8(LENGTH_SIZE_MINUS_ONE);
    record.put_u8(ONE_SPS);
    record.put_u16(sps_len);
    record.put_slice(sps);
    record.put_u8(ONE_PPS);
    record.put_u16(pps_len);
    record.put_slice(pps);

    Ok(record.freeze())
}

/// Derive the `avcC` record from the parameter sets of a track's first sample.
///
/// Returns `None` when the sample carries no AVC parameter sets (or they are
/// unusable), in which case no record can be produced.
pub fn avc_decoder_config_from_sample(sample: &EncodedSample) -> Option<Bytes> {
    let avc = sample.description.as_ref()?.avc.as_ref()?;
    let sps = avc.sps.first()?;
    let pps = avc.pps.first()?;
    build_avc_decoder_config(sps, pps).ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{AvcParameterSets, SampleDescription, SampleKind};

    const SPS: [u8; 6] = [0x67, 0x64, 0x00, 0x28, 0xAC, 0xD9];
    const PPS: [u8; 4] = [0x68, 0xEB, 0xE3, 0xCB];

    fn first_sample(description: Option<SampleDescription>) -> EncodedSample {
        EncodedSample {
            track_id: 1,
            sequence: 0,
            kind: SampleKind::Key,
            dts: 0,
            cts: 0,
            duration: 1001,
            timescale: 30_000,
            data: Bytes::new(),
            description: description.map(Arc::new),
        }
    }

    #[test]
    fn test_record_layout_is_byte_exact() {
        let record = build_avc_decoder_config(&SPS, &PPS).unwrap();
        let expected: Vec<u8> = [
            &[0x01, 0x64, 0x00, 0x28, 0xFF, 0xE1][..],
            &[0x00, 0x06],
            &SPS,
            &[0x01, 0x00, 0x04],
            &PPS,
        ]
        .concat();
        assert_eq!(record.as_ref(), expected.as_slice());
        assert_eq!(record.len(), 6 + 2 + SPS.len() + 1 + 2 + PPS.len());
    }

    #[test]
    fn test_short_sps_is_rejected() {
        let err = build_avc_decoder_config(&[0x67, 0x64], &PPS).unwrap_err();
        assert!(matches!(err, ModelError::ParameterSetTooShort { len: 2 }));
    }

    #[test]
    fn test_record_from_sample_uses_first_parameter_sets() {
        let sample = first_sample(Some(SampleDescription {
            avc: Some(AvcParameterSets {
                sps: vec![Bytes::from_static(&SPS), Bytes::from_static(&[0x67, 1, 2, 3])],
                pps: vec![Bytes::from_static(&PPS)],
            }),
        }));
        let record = avc_decoder_config_from_sample(&sample).unwrap();
        assert_eq!(&record[1..4], &SPS[1..4]);
    }

    #[test]
    fn test_missing_parameter_sets_yield_no_record() {
        assert!(avc_decoder_config_from_sample(&first_sample(None)).is_none());
        let no_pps = first_sample(Some(SampleDescription {
            avc: Some(AvcParameterSets {
                sps: vec![Bytes::from_static(&SPS)],
                pps: vec![],
            }),
        }));
        assert!(avc_decoder_config_from_sample(&no_pps).is_none());
    }
}
