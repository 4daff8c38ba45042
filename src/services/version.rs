//! Gateway identification: legacy vs. modern firmware, product line, and the
//! compatibility table lookup.

use crate::models::smile::{GatewayProfile, ProductType, SmileInfo, SmileVersion};
use crate::session::SmileError;
use crate::xml::Element;
use log::{debug, error};

/// Firmware version reported for legacy Anna, which exports none.
const LEGACY_ANNA_VERSION: &str = "1.8.0";
const LEGACY_ANNA_MODEL: &str = "smile_thermo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compatibility {
    pub product: ProductType,
    pub friendly_name: &'static str,
    /// Forces legacy handling regardless of what the probe saw.
    pub legacy: bool,
}

static SMILES: [(&str, Compatibility); 8] = [
    (
        "smile_open_therm_v3",
        Compatibility {
            product: ProductType::Thermostat,
            friendly_name: "Adam",
            legacy: false,
        },
    ),
    (
        "smile_open_therm_v2",
        Compatibility {
            product: ProductType::Thermostat,
            friendly_name: "Adam",
            legacy: false,
        },
    ),
    (
        "smile_thermo_v4",
        Compatibility {
            product: ProductType::Thermostat,
            friendly_name: "Anna",
            legacy: false,
        },
    ),
    (
        "smile_thermo_v3",
        Compatibility {
            product: ProductType::Thermostat,
            friendly_name: "Anna",
            legacy: false,
        },
    ),
    (
        "smile_thermo_v1",
        Compatibility {
            product: ProductType::Thermostat,
            friendly_name: "Anna",
            legacy: true,
        },
    ),
    (
        "smile_v4",
        Compatibility {
            product: ProductType::Power,
            friendly_name: "P1",
            legacy: false,
        },
    ),
    (
        "smile_v3",
        Compatibility {
            product: ProductType::Power,
            friendly_name: "P1",
            legacy: false,
        },
    ),
    (
        "smile_v2",
        Compatibility {
            product: ProductType::Power,
            friendly_name: "P1",
            legacy: true,
        },
    ),
];

pub fn lookup(key: &str) -> Option<&'static Compatibility> {
    SMILES
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, c)| c)
}

/// Outcome of inspecting the domain objects export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Identified {
        model: String,
        version: String,
        hostname: Option<String>,
        legacy: bool,
    },
    /// Legacy P1: model and firmware are only published in `/system/status.xml`.
    NeedsStatus,
}

pub fn probe(domain_objects: &Element) -> Result<Probe, SmileError> {
    let dsmrmain = domain_objects.descendant_path(&["module", "protocols", "dsmrmain"]);
    let network = domain_objects.descendant_path(&["module", "protocols", "network_router", "network"]);

    let is_plugwise = domain_objects
        .descendant_path_all(&["module", "vendor_name"])
        .iter()
        .any(|n| n.text() == Some("Plugwise"));
    if !is_plugwise && dsmrmain.is_none() {
        error!("Connected but expected vendor markers not returned");
        return Err(SmileError::ConnectionFailed(
            "no Plugwise vendor or dsmrmain marker in domain objects".to_string(),
        ));
    }

    if let Some(gateway) = domain_objects.find_descendant("gateway") {
        let model = gateway.child_text("vendor_model");
        let version = gateway.child_text("firmware_version");
        return match (model, version) {
            (Some(model), Some(version)) => Ok(Probe::Identified {
                model: model.to_string(),
                version: version.to_string(),
                hostname: gateway.child_text("hostname").map(str::to_string),
                legacy: false,
            }),
            _ => {
                error!("Unable to find model or version information");
                Err(SmileError::UnsupportedDevice("gateway without model or firmware version".to_string()))
            }
        };
    }

    let anna = domain_objects
        .descendants_named("appliance")
        .into_iter()
        .any(|a| a.child_text("type") == Some("thermostat"));
    if anna {
        return Ok(Probe::Identified {
            model: LEGACY_ANNA_MODEL.to_string(),
            version: LEGACY_ANNA_VERSION.to_string(),
            hostname: None,
            legacy: true,
        });
    }
    if dsmrmain.is_some() {
        return Ok(Probe::NeedsStatus);
    }
    if network.is_some() {
        error!("Stretch hubs are not supported");
        return Err(SmileError::UnsupportedDevice("stretch".to_string()));
    }
    error!("Connected but no gateway device information found");
    Err(SmileError::ConnectionFailed("no gateway device information found".to_string()))
}

/// Read model and firmware from a legacy P1 `status.xml`.
pub fn probe_status(status: &Element) -> Result<Probe, SmileError> {
    let version = status.descendant_path(&["system", "version"]).and_then(Element::text);
    let model = status.descendant_path(&["system", "product"]).and_then(Element::text);
    match (model, version) {
        (Some(model), Some(version)) => Ok(Probe::Identified {
            model: model.to_string(),
            version: version.to_string(),
            hostname: status
                .descendant_path(&["network", "hostname"])
                .and_then(Element::text)
                .map(str::to_string),
            legacy: true,
        }),
        _ => Err(SmileError::ConnectionFailed("status.xml without product or version".to_string())),
    }
}

/// Map probe results onto the compatibility table.
pub fn resolve(model: &str, version: &str, hostname: Option<String>, legacy: bool) -> Result<SmileInfo, SmileError> {
    let parsed = SmileVersion::parse(version)
        .ok_or_else(|| SmileError::UnsupportedDevice(format!("unparseable firmware version {:?}", version)))?;
    let key = format!("{}_v{}", model, parsed.major);
    debug!("Plugwise identified as {}", key);

    let Some(entry) = lookup(&key) else {
        error!("Smile identified as {:?} is not supported", key);
        return Err(SmileError::UnsupportedDevice(key));
    };

    Ok(SmileInfo {
        profile: GatewayProfile::new(entry.product, legacy || entry.legacy),
        name: entry.friendly_name.to_string(),
        model: model.to_string(),
        version: parsed,
        hostname,
    })
}
