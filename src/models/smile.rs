//! Device model derived from the Smile XML exports.
//!
//! Notes
//! - Identifiers are the gateway's own 32-hex-digit ids, kept as strings.
//! - Everything here is recomputed from a snapshot on every query; nothing
//!   is cached between polls.

use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

// =====================
// Gateway identification
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ProductType {
    Thermostat,
    Power,
}

/// Firmware generation and product line, resolved once at connect time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum GatewayProfile {
    LegacyThermostat,
    LegacyPower,
    ModernThermostat,
    ModernPower,
}

impl GatewayProfile {
    pub fn new(product: ProductType, legacy: bool) -> Self {
        match (product, legacy) {
            (ProductType::Thermostat, true) => GatewayProfile::LegacyThermostat,
            (ProductType::Thermostat, false) => GatewayProfile::ModernThermostat,
            (ProductType::Power, true) => GatewayProfile::LegacyPower,
            (ProductType::Power, false) => GatewayProfile::ModernPower,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, GatewayProfile::LegacyThermostat | GatewayProfile::LegacyPower)
    }

    pub fn product_type(&self) -> ProductType {
        match self {
            GatewayProfile::LegacyThermostat | GatewayProfile::ModernThermostat => ProductType::Thermostat,
            GatewayProfile::LegacyPower | GatewayProfile::ModernPower => ProductType::Power,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmileVersion {
    pub raw: String,
    /// Only the major version selects behaviour.
    pub major: u64,
}

impl SmileVersion {
    /// Parse a dotted numeric firmware string such as `3.1.11`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let core = trimmed.split(['-', '+']).next().unwrap_or_default();
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        if !parts.all(|p| p.parse::<u64>().is_ok()) {
            return None;
        }
        Some(SmileVersion {
            raw: trimmed.to_string(),
            major,
        })
    }
}

impl core::fmt::Display for SmileVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// What connect learned about the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmileInfo {
    pub profile: GatewayProfile,
    /// Marketing name from the compatibility table ("Anna", "Adam", "P1").
    pub name: String,
    pub model: String,
    pub version: SmileVersion,
    pub hostname: Option<String>,
}

// =====================
// Classes and tags
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApplianceClass {
    Gateway,
    HeaterCentral,
    Thermostat,
    ZoneThermostat,
    ThermostaticRadiatorValve,
    /// A thermostat-family appliance that lost the master election in its zone.
    ThermoSensor,
    OpenThermGateway,
    Other(String),
}

impl ApplianceClass {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "gateway" => ApplianceClass::Gateway,
            "heater_central" => ApplianceClass::HeaterCentral,
            "thermostat" => ApplianceClass::Thermostat,
            "zone_thermostat" => ApplianceClass::ZoneThermostat,
            "thermostatic_radiator_valve" => ApplianceClass::ThermostaticRadiatorValve,
            "thermo_sensor" => ApplianceClass::ThermoSensor,
            "open_therm_gateway" => ApplianceClass::OpenThermGateway,
            other => ApplianceClass::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ApplianceClass::Gateway => "gateway",
            ApplianceClass::HeaterCentral => "heater_central",
            ApplianceClass::Thermostat => "thermostat",
            ApplianceClass::ZoneThermostat => "zone_thermostat",
            ApplianceClass::ThermostaticRadiatorValve => "thermostatic_radiator_valve",
            ApplianceClass::ThermoSensor => "thermo_sensor",
            ApplianceClass::OpenThermGateway => "open_therm_gateway",
            ApplianceClass::Other(s) => s.as_str(),
        }
    }

    /// Master election rank; `None` for classes that never control a zone.
    pub fn thermostat_priority(&self) -> Option<u8> {
        match self {
            ApplianceClass::Thermostat => Some(3),
            ApplianceClass::ZoneThermostat => Some(2),
            ApplianceClass::ThermostaticRadiatorValve => Some(1),
            _ => None,
        }
    }

    pub fn is_thermostat_family(&self) -> bool {
        self.thermostat_priority().is_some()
    }
}

impl Serialize for ApplianceClass {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    Home,
    Power,
    Gas,
    Temperature,
    Thermostat,
    Plug,
    SwitchGroup,
}

pub type TagSet = BTreeSet<Tag>;

// =====================
// Inventory
// =====================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub types: TagSet,
    pub members: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Appliance {
    pub id: String,
    pub name: String,
    pub class: ApplianceClass,
    pub location: Option<String>,
    pub types: TagSet,
}

/// A location that carries thermostats, with its elected master.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermostatZone {
    pub location: Location,
    pub master: Option<String>,
    pub master_priority: u8,
    pub slaves: BTreeSet<String>,
}

/// One row of the device listing handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub name: String,
    pub class: ApplianceClass,
    pub types: TagSet,
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}

/// Heating and cooling setpoint of a preset.
pub type PresetSetpoints = (f64, f64);
pub type PresetMap = BTreeMap<String, PresetSetpoints>;

// =====================
// Device data
// =====================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DeviceValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    List(Vec<String>),
    Presets(PresetMap),
}

impl DeviceValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DeviceValue::Int(v) => Some(*v as f64),
            DeviceValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DeviceValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// Flat per-device readings; absent keys mean "not applicable".
pub type DeviceData = BTreeMap<String, DeviceValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: String,
    pub message: String,
}
