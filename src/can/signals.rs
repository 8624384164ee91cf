use crate::can::vendor::VendorId;
use crate::error::ConfigError;

/// Canonical signal names. Snapshot keys always come from this list;
/// vendor-specific spellings are resolved through `ALIASES` at decode time.
pub mod canonical {
    pub const RPM: &str = "rpm";
    pub const TPS: &str = "tps";
    pub const COOLANT_TEMP_C: &str = "coolant_temp_c";
    pub const OIL_PRESSURE_PSI: &str = "oil_pressure_psi";
    pub const FUEL_PRESSURE_PSI: &str = "fuel_pressure_psi";
    pub const MAP_KPA: &str = "map_kpa";
    pub const AFR: &str = "afr";
    pub const BATTERY_VOLTAGE: &str = "battery_voltage";
    pub const DRIVEN_WHEEL_SPEED_MPH: &str = "driven_wheel_speed_mph";
    pub const VEHICLE_SPEED_MPH: &str = "vehicle_speed_mph";
    pub const INTAKE_AIR_TEMP_C: &str = "intake_air_temp_c";

    // Filled in by the aggregator, not the CAN decoder.
    pub const GPS_SPEED_MPS: &str = "gps_speed_mps";
    pub const GPS_HEADING_DEG: &str = "gps_heading_deg";
    pub const GPS_ALTITUDE_M: &str = "gps_altitude_m";
    pub const ACCEL_LONG_MPS2: &str = "accel_long_mps2";
    pub const ACCEL_LAT_MPS2: &str = "accel_lat_mps2";
    pub const YAW_RATE_RADS: &str = "yaw_rate_rads";

    pub const ALL: &[&str] = &[
        RPM,
        TPS,
        COOLANT_TEMP_C,
        OIL_PRESSURE_PSI,
        FUEL_PRESSURE_PSI,
        MAP_KPA,
        AFR,
        BATTERY_VOLTAGE,
        DRIVEN_WHEEL_SPEED_MPH,
        VEHICLE_SPEED_MPH,
        INTAKE_AIR_TEMP_C,
        GPS_SPEED_MPS,
        GPS_HEADING_DEG,
        GPS_ALTITUDE_M,
        ACCEL_LONG_MPS2,
        ACCEL_LAT_MPS2,
        YAW_RATE_RADS,
    ];
}

/// Raw vendor spellings mapped to exactly one canonical name each.
/// Unknown spellings are dropped at decode time, never guessed.
pub const ALIASES: &[(&str, &str)] = &[
    ("RPM", canonical::RPM),
    ("Engine Speed", canonical::RPM),
    ("EngineSpeed", canonical::RPM),
    ("TPS", canonical::TPS),
    ("Throttle Position", canonical::TPS),
    ("ThrottlePos", canonical::TPS),
    ("CTS", canonical::COOLANT_TEMP_C),
    ("Coolant Temp", canonical::COOLANT_TEMP_C),
    ("CoolantTemp", canonical::COOLANT_TEMP_C),
    ("Oil Pressure", canonical::OIL_PRESSURE_PSI),
    ("OilPress", canonical::OIL_PRESSURE_PSI),
    ("Fuel Pressure", canonical::FUEL_PRESSURE_PSI),
    ("FuelPress", canonical::FUEL_PRESSURE_PSI),
    ("MAP", canonical::MAP_KPA),
    ("Manifold Pressure", canonical::MAP_KPA),
    ("AFR", canonical::AFR),
    ("Lambda1_AFR", canonical::AFR),
    ("Battery", canonical::BATTERY_VOLTAGE),
    ("VBat", canonical::BATTERY_VOLTAGE),
    ("Driven Wheel Speed", canonical::DRIVEN_WHEEL_SPEED_MPH),
    ("WheelSpeed", canonical::DRIVEN_WHEEL_SPEED_MPH),
    ("Vehicle Speed", canonical::VEHICLE_SPEED_MPH),
    ("VSS", canonical::VEHICLE_SPEED_MPH),
    ("IAT", canonical::INTAKE_AIR_TEMP_C),
    ("Air Temp", canonical::INTAKE_AIR_TEMP_C),
];

/// Resolve a raw vendor signal name to its canonical name, or `None` if the
/// spelling is unknown.
pub fn resolve_alias(raw: &str) -> Option<&'static str> {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == raw)
        .map(|(_, canon)| *canon)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// One decodable field within a vendor's CAN broadcast.
/// Loaded at startup from the static vendor table; never mutated.
#[derive(Clone, Debug)]
pub struct SignalDefinition {
    pub name: &'static str,
    pub can_id: u32,
    pub byte_offset: u8,
    pub bit_length: u8,
    pub endianness: Endianness,
    pub scale: f64,
    pub offset: f64,
    pub vendor: VendorId,
}

impl SignalDefinition {
    /// Bytes this signal occupies starting at `byte_offset`.
    pub fn byte_width(&self) -> u8 {
        self.bit_length.div_ceil(8)
    }
}

/// Holley EFI V2 broadcast layout (0x180-0x182).
///
/// 0x180: byte 0 RPM (x50 + 50), byte 1 fuel pressure (x0.5 psi),
///        byte 2 TPS (%), bytes 3-4 MAP (x0.1 kPa LE), byte 5 AFR (x0.1).
/// 0x181: bytes 0-1 coolant (x0.1 - 40 °C LE), bytes 2-3 oil pressure
///        (x0.1 psi LE), bytes 4-5 battery (x0.01 V LE).
/// 0x182: bytes 0-1 driven wheel speed (x0.01 mph LE).
const HOLLEY: &[SignalDefinition] = &[
    SignalDefinition {
        name: canonical::RPM,
        can_id: 0x180,
        byte_offset: 0,
        bit_length: 8,
        endianness: Endianness::Little,
        scale: 50.0,
        offset: 50.0,
        vendor: VendorId::Holley,
    },
    SignalDefinition {
        name: canonical::FUEL_PRESSURE_PSI,
        can_id: 0x180,
        byte_offset: 1,
        bit_length: 8,
        endianness: Endianness::Little,
        scale: 0.5,
        offset: 0.0,
        vendor: VendorId::Holley,
    },
    SignalDefinition {
        name: canonical::TPS,
        can_id: 0x180,
        byte_offset: 2,
        bit_length: 8,
        endianness: Endianness::Little,
        scale: 1.0,
        offset: 0.0,
        vendor: VendorId::Holley,
    },
    SignalDefinition {
        name: canonical::MAP_KPA,
        can_id: 0x180,
        byte_offset: 3,
        bit_length: 16,
        endianness: Endianness::Little,
        scale: 0.1,
        offset: 0.0,
        vendor: VendorId::Holley,
    },
    SignalDefinition {
        name: canonical::AFR,
        can_id: 0x180,
        byte_offset: 5,
        bit_length: 8,
        endianness: Endianness::Little,
        scale: 0.1,
        offset: 0.0,
        vendor: VendorId::Holley,
    },
    SignalDefinition {
        name: canonical::COOLANT_TEMP_C,
        can_id: 0x181,
        byte_offset: 0,
        bit_length: 16,
        endianness: Endianness::Little,
        scale: 0.1,
        offset: -40.0,
        vendor: VendorId::Holley,
    },
    SignalDefinition {
        name: canonical::OIL_PRESSURE_PSI,
        can_id: 0x181,
        byte_offset: 2,
        bit_length: 16,
        endianness: Endianness::Little,
        scale: 0.1,
        offset: 0.0,
        vendor: VendorId::Holley,
    },
    SignalDefinition {
        name: canonical::BATTERY_VOLTAGE,
        can_id: 0x181,
        byte_offset: 4,
        bit_length: 16,
        endianness: Endianness::Little,
        scale: 0.01,
        offset: 0.0,
        vendor: VendorId::Holley,
    },
    SignalDefinition {
        name: canonical::DRIVEN_WHEEL_SPEED_MPH,
        can_id: 0x182,
        byte_offset: 0,
        bit_length: 16,
        endianness: Endianness::Little,
        scale: 0.01,
        offset: 0.0,
        vendor: VendorId::Holley,
    },
];

/// AEM Infinity broadcast layout (29-bit IDs, big-endian fields).
const AEM: &[SignalDefinition] = &[
    SignalDefinition {
        name: canonical::RPM,
        can_id: 0x01F0_A000,
        byte_offset: 0,
        bit_length: 16,
        endianness: Endianness::Big,
        scale: 0.39063,
        offset: 0.0,
        vendor: VendorId::Aem,
    },
    SignalDefinition {
        name: canonical::TPS,
        can_id: 0x01F0_A000,
        byte_offset: 4,
        bit_length: 16,
        endianness: Endianness::Big,
        scale: 0.0015259,
        offset: 0.0,
        vendor: VendorId::Aem,
    },
    SignalDefinition {
        name: canonical::INTAKE_AIR_TEMP_C,
        can_id: 0x01F0_A000,
        byte_offset: 6,
        bit_length: 8,
        endianness: Endianness::Big,
        scale: 1.0,
        offset: 0.0,
        vendor: VendorId::Aem,
    },
    SignalDefinition {
        name: canonical::AFR,
        can_id: 0x01F0_A003,
        byte_offset: 0,
        bit_length: 8,
        endianness: Endianness::Big,
        scale: 0.057227,
        offset: 7.325,
        vendor: VendorId::Aem,
    },
    SignalDefinition {
        name: canonical::VEHICLE_SPEED_MPH,
        can_id: 0x01F0_A003,
        byte_offset: 2,
        bit_length: 16,
        endianness: Endianness::Big,
        scale: 0.00390625,
        offset: 0.0,
        vendor: VendorId::Aem,
    },
    SignalDefinition {
        name: canonical::BATTERY_VOLTAGE,
        can_id: 0x01F0_A003,
        byte_offset: 6,
        bit_length: 16,
        endianness: Endianness::Big,
        scale: 0.0002455,
        offset: 0.0,
        vendor: VendorId::Aem,
    },
    SignalDefinition {
        name: canonical::COOLANT_TEMP_C,
        can_id: 0x01F0_A004,
        byte_offset: 0,
        bit_length: 8,
        endianness: Endianness::Big,
        scale: 1.0,
        offset: 0.0,
        vendor: VendorId::Aem,
    },
    SignalDefinition {
        name: canonical::OIL_PRESSURE_PSI,
        can_id: 0x01F0_A004,
        byte_offset: 2,
        bit_length: 8,
        endianness: Endianness::Big,
        scale: 0.580151,
        offset: 0.0,
        vendor: VendorId::Aem,
    },
];

/// All signal definitions for one vendor. Empty for `Unknown`, which falls
/// back to generic OBD-II PID decoding.
pub fn vendor_table(vendor: VendorId) -> &'static [SignalDefinition] {
    match vendor {
        VendorId::Holley => HOLLEY,
        VendorId::Aem => AEM,
        VendorId::Unknown => &[],
    }
}

/// Startup validation of the static tables: every signal name must be
/// canonical, fields must fit in an 8-byte frame, scales must be non-zero.
pub fn validate_tables() -> Result<(), ConfigError> {
    for vendor in [VendorId::Holley, VendorId::Aem] {
        for def in vendor_table(vendor) {
            if !canonical::ALL.contains(&def.name) {
                return Err(ConfigError::InvalidSignalTable(format!(
                    "{:?}/{:#x}: '{}' is not a canonical name",
                    vendor, def.can_id, def.name
                )));
            }
            if def.bit_length == 0 || def.bit_length > 32 {
                return Err(ConfigError::InvalidSignalTable(format!(
                    "{:?}/{:#x}/{}: bit_length {} unsupported",
                    vendor, def.can_id, def.name, def.bit_length
                )));
            }
            if usize::from(def.byte_offset) + usize::from(def.byte_width()) > 8 {
                return Err(ConfigError::InvalidSignalTable(format!(
                    "{:?}/{:#x}/{}: field exceeds 8-byte frame",
                    vendor, def.can_id, def.name
                )));
            }
            if def.scale == 0.0 {
                return Err(ConfigError::InvalidSignalTable(format!(
                    "{:?}/{:#x}/{}: zero scale",
                    vendor, def.can_id, def.name
                )));
            }
        }
    }

    // Alias table: each raw spelling maps to exactly one canonical name.
    for (i, (raw, canon)) in ALIASES.iter().enumerate() {
        if !canonical::ALL.contains(canon) {
            return Err(ConfigError::InvalidSignalTable(format!(
                "alias '{}' targets unknown canonical name '{}'",
                raw, canon
            )));
        }
        if ALIASES[..i].iter().any(|(other, _)| other == raw) {
            return Err(ConfigError::InvalidSignalTable(format!(
                "alias '{}' defined more than once",
                raw
            )));
        }
    }
    Ok(())
}
