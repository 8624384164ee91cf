use log::warn;

use crate::can::signals::{canonical, vendor_table, Endianness, SignalDefinition};
use crate::can::vendor::VendorId;
use crate::types::CanFrame;

/// Decode one frame against the active vendor's signal table.
///
/// Unmatched IDs are silently dropped; CAN buses carry plenty of traffic
/// we don't care about. A signal whose field doesn't fit in the frame's DLC
/// is skipped and logged; the rest of the frame still decodes.
pub fn decode(frame: &CanFrame, active_vendor: VendorId) -> Vec<(&'static str, f64)> {
    if active_vendor == VendorId::Unknown {
        return decode_obd2(frame);
    }

    let mut out = Vec::new();
    for def in vendor_table(active_vendor) {
        if def.can_id != frame.id {
            continue;
        }
        match extract_raw(frame, def) {
            Some(raw) => out.push((def.name, raw as f64 * def.scale + def.offset)),
            None => warn!(
                "skipping {} on {:#x}: field [{}..{}) exceeds dlc {}",
                def.name,
                frame.id,
                def.byte_offset,
                def.byte_offset + def.byte_width(),
                frame.dlc
            ),
        }
    }
    out
}

/// Extract the raw unsigned field for `def`, or `None` if the frame's DLC
/// is too short for it.
pub fn extract_raw(frame: &CanFrame, def: &SignalDefinition) -> Option<u32> {
    let start = usize::from(def.byte_offset);
    let width = usize::from(def.byte_width());
    if start + width > usize::from(frame.dlc.min(8)) {
        return None;
    }

    let bytes = &frame.data[start..start + width];
    let mut raw: u32 = 0;
    match def.endianness {
        Endianness::Big => {
            for &b in bytes {
                raw = (raw << 8) | u32::from(b);
            }
        }
        Endianness::Little => {
            for &b in bytes.iter().rev() {
                raw = (raw << 8) | u32::from(b);
            }
        }
    }
    if def.bit_length < 32 {
        raw &= (1u32 << def.bit_length) - 1;
    }
    Some(raw)
}

/// Write a raw value back into a frame payload, the exact inverse of
/// `extract_raw`. Used by tests and by the simulated CAN source.
pub fn encode_raw(data: &mut [u8; 8], def: &SignalDefinition, raw: u32) {
    let start = usize::from(def.byte_offset);
    let width = usize::from(def.byte_width());
    let masked = if def.bit_length < 32 {
        raw & ((1u32 << def.bit_length) - 1)
    } else {
        raw
    };
    for i in 0..width {
        let shift = match def.endianness {
            Endianness::Little => 8 * i,
            Endianness::Big => 8 * (width - 1 - i),
        };
        data[start + i] = ((masked >> shift) & 0xFF) as u8;
    }
}

/// Convert a physical value back to its nearest raw step for `def`.
pub fn quantize(def: &SignalDefinition, value: f64) -> u32 {
    ((value - def.offset) / def.scale).round().max(0.0) as u32
}

// OBD-II mode 01 response layout: [len, 0x41, pid, A, B, ...].
const OBD_RESPONSE_ID_MIN: u32 = 0x7E8;
const OBD_RESPONSE_ID_MAX: u32 = 0x7EF;
const OBD_MODE_CURRENT_DATA_RESPONSE: u8 = 0x41;

const PID_ENGINE_COOLANT_TEMP: u8 = 0x05;
const PID_ENGINE_RPM: u8 = 0x0C;
const PID_VEHICLE_SPEED: u8 = 0x0D;
const PID_INTAKE_AIR_TEMP: u8 = 0x0F;
const PID_THROTTLE_POS: u8 = 0x11;

const KMH_TO_MPH: f64 = 0.621371;

/// Generic OBD-II PID decoding, used whenever the vendor is unknown.
/// Scalings per SAE J1979.
pub fn decode_obd2(frame: &CanFrame) -> Vec<(&'static str, f64)> {
    if !(OBD_RESPONSE_ID_MIN..=OBD_RESPONSE_ID_MAX).contains(&frame.id) || frame.dlc < 4 {
        return Vec::new();
    }
    if frame.data[1] != OBD_MODE_CURRENT_DATA_RESPONSE {
        return Vec::new();
    }

    let pid = frame.data[2];
    let a = f64::from(frame.data[3]);

    match pid {
        // Two-byte PID: byte B is required, single-byte responses are not.
        PID_ENGINE_RPM => {
            if frame.dlc < 5 {
                return Vec::new();
            }
            let b = f64::from(frame.data[4]);
            vec![(canonical::RPM, (a * 256.0 + b) / 4.0)]
        }
        PID_VEHICLE_SPEED => vec![(canonical::VEHICLE_SPEED_MPH, a * KMH_TO_MPH)],
        PID_ENGINE_COOLANT_TEMP => vec![(canonical::COOLANT_TEMP_C, a - 40.0)],
        PID_INTAKE_AIR_TEMP => vec![(canonical::INTAKE_AIR_TEMP_C, a - 40.0)],
        PID_THROTTLE_POS => vec![(canonical::TPS, a * 100.0 / 255.0)],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CanChannel;

    fn frame(id: u32, data: [u8; 8], dlc: u8) -> CanFrame {
        CanFrame {
            id,
            data,
            dlc,
            channel: CanChannel::Can0,
            timestamp_ns: 1_000,
        }
    }

    #[test]
    fn test_holley_rpm_tps_decode() {
        // 0x45 * 50 + 50 = 3500 rpm, 0x2D = 45 % TPS.
        let f = frame(0x180, [0x45, 0x0E, 0x2D, 0x00, 0x00, 0x00, 0x00, 0x00], 8);
        let signals = decode(&f, VendorId::Holley);
        let rpm = signals.iter().find(|(n, _)| *n == canonical::RPM).unwrap().1;
        let tps = signals.iter().find(|(n, _)| *n == canonical::TPS).unwrap().1;
        assert_eq!(rpm, 3500.0);
        assert_eq!(tps, 45.0);
    }

    #[test]
    fn test_unmatched_id_silently_dropped() {
        let f = frame(0x7FF, [0xFF; 8], 8);
        assert!(decode(&f, VendorId::Holley).is_empty());
    }

    #[test]
    fn test_short_dlc_skips_signal_not_frame() {
        // dlc 3 truncates MAP (bytes 3-4) and AFR (byte 5) but the first
        // three single-byte signals still decode.
        let f = frame(0x180, [0x45, 0x0E, 0x2D, 0x00, 0x00, 0x00, 0x00, 0x00], 3);
        let signals = decode(&f, VendorId::Holley);
        assert_eq!(signals.len(), 3);
        assert!(signals.iter().all(|(n, _)| *n != canonical::MAP_KPA));
    }

    #[test]
    fn test_big_endian_extraction() {
        // AEM RPM: 0x1C3A = 7226 raw, * 0.39063 ≈ 2822.7 rpm.
        let f = frame(
            0x01F0_A000,
            [0x1C, 0x3A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
            8,
        );
        let signals = decode(&f, VendorId::Aem);
        let rpm = signals.iter().find(|(n, _)| *n == canonical::RPM).unwrap().1;
        assert!((rpm - 7226.0 * 0.39063).abs() < 1e-9);
    }

    #[test]
    fn test_obd2_fallback_for_unknown_vendor() {
        // Mode 01 PID 0x0C response: RPM = (0x1A*256 + 0xF8)/4 = 1726.
        let f = frame(0x7E8, [0x04, 0x41, 0x0C, 0x1A, 0xF8, 0x00, 0x00, 0x00], 8);
        let signals = decode(&f, VendorId::Unknown);
        assert_eq!(signals, vec![(canonical::RPM, 1726.0)]);
    }

    #[test]
    fn test_obd2_single_byte_pid_with_minimal_dlc() {
        // Mode 01 PID 0x0D in a 4-byte response: 100 km/h ≈ 62.14 mph.
        let f = frame(0x7E8, [0x03, 0x41, 0x0D, 0x64, 0x00, 0x00, 0x00, 0x00], 4);
        let signals = decode(&f, VendorId::Unknown);
        assert_eq!(signals.len(), 1);
        let (name, mph) = signals[0];
        assert_eq!(name, canonical::VEHICLE_SPEED_MPH);
        assert!((mph - 100.0 * KMH_TO_MPH).abs() < 1e-9);

        // RPM genuinely needs byte B; a 4-byte response stays empty.
        let f = frame(0x7E8, [0x03, 0x41, 0x0C, 0x1A, 0x00, 0x00, 0x00, 0x00], 4);
        assert!(decode(&f, VendorId::Unknown).is_empty());
    }

    #[test]
    fn test_roundtrip_within_one_step() {
        // Decoding then re-encoding reproduces the raw value exactly for
        // every signal in every vendor table.
        for vendor in [VendorId::Holley, VendorId::Aem] {
            for def in vendor_table(vendor) {
                let mut data = [0u8; 8];
                let raw = 0x2Du32 & ((1u32 << def.bit_length.min(31)) - 1);
                encode_raw(&mut data, def, raw);
                let f = frame(def.can_id, data, 8);
                let extracted = extract_raw(&f, def).unwrap();
                assert_eq!(extracted, raw, "{}", def.name);

                let value = extracted as f64 * def.scale + def.offset;
                let requantized = quantize(def, value);
                assert!(
                    (i64::from(requantized) - i64::from(raw)).abs() <= 1,
                    "{} drifted more than one quantization step",
                    def.name
                );
            }
        }
    }
}
