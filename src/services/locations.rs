use crate::models::smile::{GatewayProfile, Location, Tag, TagSet};
use crate::snapshot::{GatewaySnapshot, detect_measurement_tags};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Id of the zone fabricated for legacy gateways that export no locations.
pub const LEGACY_LOCATION_ID: &str = "0";
const LEGACY_LOCATION_NAME: &str = "Legacy";
const HOME_NAME: &str = "Home";

#[derive(Debug, Clone, PartialEq)]
pub struct LocationIndex {
    pub locations: BTreeMap<String, Location>,
    /// `None` when no location could be identified as the whole-house one.
    pub home_location: Option<String>,
}

impl LocationIndex {
    pub fn home(&self) -> Option<&Location> {
        self.home_location.as_ref().and_then(|id| self.locations.get(id))
    }
}

pub fn resolve_locations(snapshot: &GatewaySnapshot) -> LocationIndex {
    let profile = snapshot.profile();
    let elements = snapshot.location_elements();

    if elements.is_empty() && profile.is_legacy() {
        return legacy_location(snapshot);
    }

    let mut locations = BTreeMap::new();
    let mut home_location = None;

    for element in elements {
        let Some(id) = element.id() else {
            debug!("Skipping location without id");
            continue;
        };
        let mut name = element.child_text("name").unwrap_or_default().to_string();
        let mut types = TagSet::new();
        let members: BTreeSet<String> = element
            .descendant_path_all(&["appliances", "appliance"])
            .into_iter()
            .filter_map(|a| a.id().map(str::to_string))
            .collect();

        if name == HOME_NAME {
            home_location = Some(id.to_string());
            types.insert(Tag::Home);
            types.extend(detect_measurement_tags(element));
        }

        // Legacy P1 exports do not name the house location "Home"; the one
        // carrying the meter services is it.
        let has_services = element
            .find_descendant("services")
            .is_some_and(|services| !services.children.is_empty());
        if profile == GatewayProfile::LegacyPower && has_services {
            name = HOME_NAME.to_string();
            home_location = Some(id.to_string());
            types.insert(Tag::Home);
            types.insert(Tag::Power);
        }

        locations.insert(
            id.to_string(),
            Location {
                id: id.to_string(),
                name,
                types,
                members,
            },
        );
    }

    if home_location.is_none() {
        debug!("No home location found among {} location(s)", locations.len());
    }

    LocationIndex {
        locations,
        home_location,
    }
}

fn legacy_location(snapshot: &GatewaySnapshot) -> LocationIndex {
    let known = if snapshot.appliances.is_some() {
        snapshot.appliance_elements()
    } else {
        snapshot.domain_objects.children_named("appliance").collect()
    };
    let members: BTreeSet<String> = known
        .into_iter()
        .filter_map(|a| a.id().map(str::to_string))
        .collect();

    debug!("Fabricating legacy location holding {} appliance(s)", members.len());

    let location = Location {
        id: LEGACY_LOCATION_ID.to_string(),
        name: LEGACY_LOCATION_NAME.to_string(),
        types: TagSet::from([Tag::Temperature]),
        members,
    };
    LocationIndex {
        locations: BTreeMap::from([(LEGACY_LOCATION_ID.to_string(), location)]),
        home_location: Some(LEGACY_LOCATION_ID.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::load_snapshot;

    #[test]
    fn legacy_anna_gets_single_synthetic_zone() {
        let snap = load_snapshot("legacy_anna");
        let index = resolve_locations(&snap);
        assert_eq!(index.locations.len(), 1);
        assert_eq!(index.home_location.as_deref(), Some(LEGACY_LOCATION_ID));
        let zone = index.home().expect("synthetic zone");
        assert_eq!(zone.types, TagSet::from([Tag::Temperature]));
        let all: BTreeSet<String> = snap
            .appliance_elements()
            .into_iter()
            .filter_map(|a| a.id().map(str::to_string))
            .collect();
        assert!(!all.is_empty());
        assert_eq!(zone.members, all);
    }

    #[test]
    fn legacy_p1_without_locations_gets_temperature_zone() {
        let mut snap = load_snapshot("smile_p1_v2");
        snap.locations.children.clear();
        let index = resolve_locations(&snap);
        let zone = index.home().expect("synthetic zone");
        assert_eq!(zone.id, LEGACY_LOCATION_ID);
        assert_eq!(zone.name, LEGACY_LOCATION_NAME);
        assert_eq!(zone.types, TagSet::from([Tag::Temperature]));
    }

    #[test]
    fn modern_home_is_tagged_from_logs() {
        let snap = load_snapshot("anna_v4");
        let index = resolve_locations(&snap);
        assert_eq!(index.home_location.as_deref(), Some("0466eae8520144c78afb29628384edeb"));
        let home = index.home().expect("home");
        assert!(home.types.contains(&Tag::Home));
        assert!(home.types.contains(&Tag::Temperature));
        let living = &index.locations["eb5309212bf5407bb143e5bfa3b18aee"];
        assert!(living.types.is_empty());
        assert!(living.members.contains("01b85360fdd243d0aaad4d6ac2a5ba7e"));
    }

    #[test]
    fn legacy_p1_home_comes_from_services() {
        let snap = load_snapshot("smile_p1_v2");
        let index = resolve_locations(&snap);
        let home = index.home().expect("home");
        assert_eq!(home.id, "938696c4bcdb4b8a9a595cb38ed43913");
        assert_eq!(home.name, "Home");
        assert_eq!(home.types, TagSet::from([Tag::Home, Tag::Power]));
    }
}
