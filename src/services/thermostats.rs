//! Master/slave election per zone and the device listing built on it.

use crate::models::smile::{ApplianceClass, Device, Tag, TagSet, ThermostatZone};
use crate::services::appliances::{ApplianceIndex, resolve_appliances};
use crate::services::locations::{LocationIndex, resolve_locations};
use crate::snapshot::GatewaySnapshot;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

const SWITCH_GROUP_TYPES: [&str; 2] = ["switching", "report"];

/// Location types widened with the types of the appliances placed there.
pub fn match_locations(locations: &LocationIndex, appliances: &ApplianceIndex) -> LocationIndex {
    let mut matched = locations.clone();
    for appliance in &appliances.appliances {
        let Some(loc_id) = appliance.location.as_ref() else {
            continue;
        };
        if let Some(location) = matched.locations.get_mut(loc_id) {
            location.types.extend(appliance.types.iter().copied());
        }
    }
    matched
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThermostatScan {
    pub zones: BTreeMap<String, ThermostatZone>,
    pub home_location: Option<String>,
    /// Highest ranked thermostat seen in any zone.
    pub thermo_master: Option<String>,
}

impl ThermostatScan {
    pub fn is_slave(&self, loc_id: &str, appliance_id: &str) -> bool {
        self.zones
            .get(loc_id)
            .is_some_and(|zone| zone.slaves.contains(appliance_id))
    }
}

pub fn scan_thermostats(snapshot: &GatewaySnapshot, locations: &LocationIndex, appliances: &ApplianceIndex) -> ThermostatScan {
    let legacy = snapshot.profile().is_legacy();
    let matched = match_locations(locations, appliances);
    let home = matched.home_location.clone();

    let mut zones = BTreeMap::new();
    let mut thermo_master = None;
    let mut high_priority = 0;

    for (loc_id, location) in &matched.locations {
        let is_home = home.as_deref() == Some(loc_id.as_str());
        let is_zone = (location.types.contains(&Tag::Thermostat) && !is_home) || (is_home && legacy);
        if !is_zone {
            continue;
        }

        let mut zone = ThermostatZone {
            location: location.clone(),
            master: None,
            master_priority: 0,
            slaves: BTreeSet::new(),
        };

        for appliance in &appliances.appliances {
            let Some(priority) = appliance.class.thermostat_priority() else {
                continue;
            };
            let placed_here = match appliance.location.as_ref() {
                Some(l) => l == loc_id,
                None => legacy,
            };
            if placed_here {
                if priority > zone.master_priority {
                    if let Some(previous) = zone.master.take() {
                        zone.slaves.insert(previous);
                    }
                    zone.master_priority = priority;
                    zone.master = Some(appliance.id.clone());
                } else {
                    zone.slaves.insert(appliance.id.clone());
                }
            }
            if priority > high_priority {
                high_priority = priority;
                thermo_master = Some(appliance.id.clone());
            }
        }

        if zone.master.is_none() {
            debug!("Location {} has no (master) thermostat", zone.location.name);
        }
        zones.insert(loc_id.clone(), zone);
    }

    ThermostatScan {
        zones,
        home_location: home,
        thermo_master,
    }
}

/// `None` without any master, `Some(true)` with exactly one.
pub fn single_master_thermostat(scan: &ThermostatScan) -> Option<bool> {
    match scan.zones.values().filter(|z| z.master_priority > 0).count() {
        0 => None,
        1 => Some(true),
        _ => Some(false),
    }
}

/// Every resolver output for one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
    pub locations: LocationIndex,
    pub appliances: ApplianceIndex,
    pub thermostats: ThermostatScan,
    pub devices: BTreeMap<String, Device>,
}

impl Inventory {
    pub fn resolve(snapshot: &GatewaySnapshot) -> Self {
        let locations = resolve_locations(snapshot);
        let appliances = resolve_appliances(snapshot, &locations);
        let thermostats = scan_thermostats(snapshot, &locations, &appliances);
        let devices = all_devices(snapshot, &appliances, &thermostats);
        Inventory {
            locations,
            appliances,
            thermostats,
            devices,
        }
    }
}

pub fn all_devices(snapshot: &GatewaySnapshot, appliances: &ApplianceIndex, scan: &ThermostatScan) -> BTreeMap<String, Device> {
    let mut devices = BTreeMap::new();

    for appliance in &appliances.appliances {
        let location = appliance.location.clone().or_else(|| scan.home_location.clone());
        let mut class = appliance.class.clone();
        if location.as_deref().is_some_and(|l| scan.is_slave(l, &appliance.id)) {
            class = ApplianceClass::ThermoSensor;
        }
        devices.insert(
            appliance.id.clone(),
            Device {
                name: appliance.name.clone(),
                class,
                types: appliance.types.clone(),
                location,
                members: Vec::new(),
            },
        );
    }

    devices.extend(switch_groups(snapshot));
    devices
}

/// Switching and report groups from the domain objects export.
pub fn switch_groups(snapshot: &GatewaySnapshot) -> BTreeMap<String, Device> {
    let domain = &snapshot.domain_objects;
    let mut groups = BTreeMap::new();

    for group in domain.children_named("group") {
        let (Some(group_id), Some(group_type)) = (group.id(), group.child_text("type")) else {
            continue;
        };
        if !SWITCH_GROUP_TYPES.contains(&group_type) {
            continue;
        }
        let members = domain
            .children_named("appliance")
            .filter(|a| a.path_all(&["groups", "group"]).iter().any(|g| g.id() == Some(group_id)))
            .filter_map(|a| a.id().map(str::to_string))
            .collect();
        groups.insert(
            group_id.to_string(),
            Device {
                name: group.child_text("name").unwrap_or_default().to_string(),
                class: ApplianceClass::Other(group_type.to_string()),
                types: TagSet::from([Tag::SwitchGroup]),
                location: None,
                members,
            },
        );
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::load_snapshot;

    fn assert_election_invariants(scan: &ThermostatScan, inventory: &Inventory) {
        for zone in scan.zones.values() {
            let Some(master) = zone.master.as_ref() else {
                assert_eq!(zone.master_priority, 0);
                continue;
            };
            assert!(!zone.slaves.contains(master));
            let master_rank = inventory
                .appliances
                .get(master)
                .and_then(|a| a.class.thermostat_priority())
                .expect("master is a thermostat");
            assert_eq!(master_rank, zone.master_priority);
            for slave in &zone.slaves {
                let rank = inventory
                    .appliances
                    .get(slave)
                    .and_then(|a| a.class.thermostat_priority())
                    .expect("slave is a thermostat");
                assert!(rank <= master_rank);
            }
        }
    }

    #[test]
    fn election_invariants_hold_for_every_fixture() {
        for setup in ["adam_plus_anna", "anna_v4", "legacy_anna", "p1v3", "smile_p1_v2"] {
            let snap = load_snapshot(setup);
            let inventory = Inventory::resolve(&snap);
            assert_election_invariants(&inventory.thermostats, &inventory);
        }
    }

    #[test]
    fn adam_lists_trailing_valve_as_sensor() {
        let snap = load_snapshot("adam_plus_anna");
        let inventory = Inventory::resolve(&snap);
        let living = &inventory.thermostats.zones["f2bf9048bef64cc5b6d5110154e33c81"];
        assert_eq!(living.master.as_deref(), Some("ee62cad889f94e8ca3d09021f03a660b"));
        assert_eq!(living.master_priority, 3);
        assert!(living.slaves.contains("f1fee6043d3642a9b0a65297455f008e"));

        let valve = &inventory.devices["f1fee6043d3642a9b0a65297455f008e"];
        assert_eq!(valve.class, ApplianceClass::ThermoSensor);
        let anna = &inventory.devices["ee62cad889f94e8ca3d09021f03a660b"];
        assert_eq!(anna.class, ApplianceClass::Thermostat);
        assert_eq!(inventory.thermostats.thermo_master.as_deref(), Some("ee62cad889f94e8ca3d09021f03a660b"));
    }

    #[test]
    fn later_thermostat_demotes_sitting_master() {
        const ANNA: &str = "ee62cad889f94e8ca3d09021f03a660b";
        const VALVE: &str = "f1fee6043d3642a9b0a65297455f008e";

        let mut snap = load_snapshot("adam_plus_anna");
        let doc = snap.appliances.as_mut().expect("appliances document");
        let valve_at = doc.children.iter().position(|a| a.id() == Some(VALVE)).expect("valve");
        let anna_at = doc.children.iter().position(|a| a.id() == Some(ANNA)).expect("anna");
        assert!(anna_at < valve_at);
        let valve = doc.children.remove(valve_at);
        doc.children.insert(anna_at, valve);

        let inventory = Inventory::resolve(&snap);
        let order: Vec<&str> = inventory.appliances.appliances.iter().map(|a| a.id.as_str()).collect();
        assert!(order.iter().position(|id| *id == VALVE) < order.iter().position(|id| *id == ANNA));

        let living = &inventory.thermostats.zones["f2bf9048bef64cc5b6d5110154e33c81"];
        assert_eq!(living.master.as_deref(), Some(ANNA));
        assert_eq!(living.master_priority, 3);
        assert_eq!(living.slaves, BTreeSet::from([VALVE.to_string()]));
        assert_eq!(inventory.devices[VALVE].class, ApplianceClass::ThermoSensor);
        assert_eq!(inventory.devices[ANNA].class, ApplianceClass::Thermostat);
        assert_election_invariants(&inventory.thermostats, &inventory);
    }

    #[test]
    fn bathroom_elects_zone_thermostat() {
        let snap = load_snapshot("adam_plus_anna");
        let inventory = Inventory::resolve(&snap);
        let bathroom = &inventory.thermostats.zones["08963fec7c53423ca5680aa4cb502c63"];
        assert_eq!(bathroom.master.as_deref(), Some("d3da73bde12a47d5a6b8f9dad971f2ec"));
        assert_eq!(bathroom.master_priority, 2);
        assert_eq!(single_master_thermostat(&inventory.thermostats), Some(false));
    }

    #[test]
    fn location_types_include_appliance_types() {
        let snap = load_snapshot("anna_v4");
        let inventory = Inventory::resolve(&snap);
        let matched = match_locations(&inventory.locations, &inventory.appliances);
        assert!(matched.locations["eb5309212bf5407bb143e5bfa3b18aee"].types.contains(&Tag::Thermostat));
        assert_eq!(single_master_thermostat(&inventory.thermostats), Some(true));
    }

    #[test]
    fn legacy_zone_collects_location_less_thermostats() {
        let snap = load_snapshot("legacy_anna");
        let inventory = Inventory::resolve(&snap);
        let zone = &inventory.thermostats.zones["0"];
        assert_eq!(zone.master.as_deref(), Some("0d0c3ea4de8f4b5c9d2a7e4d5c0b8f71"));
        assert!(zone.slaves.is_empty());
        assert_eq!(single_master_thermostat(&inventory.thermostats), Some(true));
    }

    #[test]
    fn power_gateways_have_no_master() {
        let inventory = Inventory::resolve(&load_snapshot("p1v3"));
        assert!(inventory.thermostats.zones.is_empty());
        assert_eq!(single_master_thermostat(&inventory.thermostats), None);
    }

    #[test]
    fn switch_groups_are_listed_with_members() {
        let snap = load_snapshot("adam_plus_anna");
        let devices = Inventory::resolve(&snap).devices;
        let group = &devices["e8ef2a01ed3b4139a53bf749204fe6b4"];
        assert_eq!(group.class.as_str(), "switching");
        assert_eq!(group.types, TagSet::from([Tag::SwitchGroup]));
        assert_eq!(group.members, vec!["aa6b0002df0a46e1b1eb94beb61eddfe".to_string()]);
        assert!(!devices.values().any(|d| d.class.as_str() == "pumping"));
    }

    #[test]
    fn devices_default_to_home_location() {
        let snap = load_snapshot("anna_v4");
        let devices = Inventory::resolve(&snap).devices;
        let gateway = &devices["0d266432d64443e283b5d708ae98b455"];
        assert_eq!(gateway.location.as_deref(), Some("0466eae8520144c78afb29628384edeb"));
    }
}
