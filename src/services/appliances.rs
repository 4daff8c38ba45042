use crate::models::smile::{Appliance, ApplianceClass, GatewayProfile, Tag, TagSet};
use crate::services::locations::LocationIndex;
use crate::snapshot::{GatewaySnapshot, detect_measurement_tags};
use crate::xml::Element;
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ApplianceIndex {
    /// Document order; master election depends on it.
    pub appliances: Vec<Appliance>,
    pub gateway_id: Option<String>,
    pub heater_id: Option<String>,
}

#[cfg(test)]
impl ApplianceIndex {
    pub fn get(&self, id: &str) -> Option<&Appliance> {
        self.appliances.iter().find(|a| a.id == id)
    }
}

pub fn resolve_appliances(snapshot: &GatewaySnapshot, locations: &LocationIndex) -> ApplianceIndex {
    if snapshot.profile() == GatewayProfile::LegacyPower {
        return legacy_power_appliance(snapshot, locations);
    }

    let elements = snapshot.appliance_elements();

    let mut gateway_id = None;
    let mut heater_id = None;
    for element in &elements {
        match element.child_text("type") {
            Some("gateway") => gateway_id = element.id().map(str::to_string),
            Some("heater_central") => heater_id = element.id().map(str::to_string),
            _ => {}
        }
    }
    // Legacy Anna has no separate gateway entity; the boiler stands in for it.
    if snapshot.profile() == GatewayProfile::LegacyThermostat {
        gateway_id = heater_id.clone();
    }

    let home_types = locations.home().map(|l| l.types.clone()).unwrap_or_default();

    let mut appliances = Vec::new();
    for element in elements {
        let (Some(id), Some(raw_class)) = (element.id(), element.child_text("type")) else {
            debug!("Skipping appliance without id or type");
            continue;
        };
        let class = ApplianceClass::parse(raw_class);
        if class == ApplianceClass::OpenThermGateway {
            continue;
        }

        let mut id = id.to_string();
        let mut name = element.child_text("name").unwrap_or_default().to_string();
        let location = element.child("location").and_then(Element::id).map(str::to_string);

        let mut types = if location.is_some() {
            detect_measurement_tags(element)
        } else {
            let canonical = match class {
                ApplianceClass::Gateway => gateway_id.as_ref(),
                ApplianceClass::HeaterCentral => heater_id.as_ref(),
                _ => None,
            };
            if let Some(canonical) = canonical {
                id = canonical.clone();
                name = snapshot.info.name.clone();
            }
            home_types.clone()
        };

        if let Some(tag) = functional_tag(element) {
            types.insert(tag);
        }

        appliances.push(Appliance {
            id,
            name,
            class,
            location,
            types,
        });
    }

    debug!(
        "Resolved {} appliance(s), gateway={:?}, heater={:?}",
        appliances.len(),
        gateway_id,
        heater_id
    );
    ApplianceIndex {
        appliances,
        gateway_id,
        heater_id,
    }
}

/// Legacy P1 exports no appliances; the home location doubles as the meter.
fn legacy_power_appliance(snapshot: &GatewaySnapshot, locations: &LocationIndex) -> ApplianceIndex {
    let Some(home) = locations.home_location.clone() else {
        debug!("Legacy P1 without a home location; no appliances");
        return ApplianceIndex {
            appliances: Vec::new(),
            gateway_id: None,
            heater_id: None,
        };
    };
    ApplianceIndex {
        appliances: vec![Appliance {
            id: home.clone(),
            name: snapshot.info.name.clone(),
            class: ApplianceClass::Gateway,
            location: Some(home.clone()),
            types: TagSet::from([Tag::Power, Tag::Home]),
        }],
        gateway_id: Some(home),
        heater_id: None,
    }
}

/// Capability implied by the appliance's actuators. A relay wins over a
/// thermostat functionality when both are exposed.
pub fn functional_tag(appliance: &Element) -> Option<Tag> {
    let relay = !appliance
        .descendant_path_all(&["actuator_functionalities", "relay_functionality"])
        .is_empty()
        || !appliance.descendant_path_all(&["actuators", "relay"]).is_empty();
    if relay {
        return Some(Tag::Plug);
    }
    let thermostat = !appliance
        .descendant_path_all(&["actuator_functionalities", "thermostat_functionality"])
        .is_empty();
    thermostat.then_some(Tag::Thermostat)
}
