//! Document store and the typed query layer over it.
//!
//! A [`GatewaySnapshot`] holds the documents fetched in one refresh cycle and
//! is replaced as a whole by the next one. Resolvers in `services` are pure
//! functions of a snapshot; every lookup that used to be a hand-formatted
//! path expression lives here as a named function.

use crate::models::smile::{DeviceValue, GatewayProfile, SmileInfo, Tag, TagSet};
use crate::utils::format_measure;
use crate::xml::Element;

/// Measurements that tag a location (or a location-less appliance) with a capability.
pub const HOME_MEASUREMENTS: [(&str, Tag); 4] = [
    ("electricity_consumed", Tag::Power),
    ("electricity_produced", Tag::Power),
    ("gas_consumed", Tag::Gas),
    ("outdoor_temperature", Tag::Temperature),
];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LogKind {
    Point,
    Cumulative,
    Interval,
}

impl LogKind {
    /// Iteration order used by the tariff scan.
    pub const ALL: [LogKind; 3] = [LogKind::Point, LogKind::Cumulative, LogKind::Interval];

    pub fn element(&self) -> &'static str {
        match self {
            LogKind::Point => "point_log",
            LogKind::Cumulative => "cumulative_log",
            LogKind::Interval => "interval_log",
        }
    }

    /// Key suffix in device data (`point`, `cumulative`, `interval`).
    pub fn suffix(&self) -> &'static str {
        match self {
            LogKind::Point => "point",
            LogKind::Cumulative => "cumulative",
            LogKind::Interval => "interval",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewaySnapshot {
    pub info: SmileInfo,
    /// Absent on legacy P1 gateways, which export no appliance list.
    pub appliances: Option<Element>,
    pub direct_objects: Option<Element>,
    pub domain_objects: Element,
    pub locations: Element,
}

impl GatewaySnapshot {
    pub fn profile(&self) -> GatewayProfile {
        self.info.profile
    }

    pub fn appliance_elements(&self) -> Vec<&Element> {
        self.appliances
            .as_ref()
            .map(|doc| doc.children_named("appliance").collect())
            .unwrap_or_default()
    }

    pub fn location_elements(&self) -> Vec<&Element> {
        self.locations.children_named("location").collect()
    }

    /// Document holding per-appliance logs: legacy firmware only fills them in
    /// the domain objects export.
    pub fn measurement_source(&self) -> &Element {
        if self.profile().is_legacy() {
            &self.domain_objects
        } else {
            self.appliances.as_ref().unwrap_or(&self.domain_objects)
        }
    }

    pub fn rules(&self) -> Vec<&Element> {
        self.domain_objects.children_named("rule").collect()
    }

    pub fn rule(&self, rule_id: &str) -> Option<&Element> {
        self.rules().into_iter().find(|r| r.id() == Some(rule_id))
    }

    /// Ids of rules built from template `tag` that apply to `loc_id`.
    pub fn rule_ids_by_tag(&self, tag: &str, loc_id: &str) -> Vec<String> {
        self.rules()
            .into_iter()
            .filter(|rule| {
                rule.descendants_named("template")
                    .iter()
                    .any(|t| t.attr("tag") == Some(tag))
            })
            .filter(|rule| rule_targets_location(rule, loc_id))
            .filter_map(|rule| rule.id().map(str::to_string))
            .collect()
    }

    /// Ids of rules named `name` that apply to `loc_id`.
    pub fn rule_ids_by_name(&self, name: &str, loc_id: &str) -> Vec<String> {
        self.rules()
            .into_iter()
            .filter(|rule| rule.child_text("name") == Some(name))
            .filter(|rule| rule_targets_location(rule, loc_id))
            .filter_map(|rule| rule.id().map(str::to_string))
            .collect()
    }

    /// Latest point-log reading of `kind` on the domain object `object#id`.
    pub fn object_value(&self, object: &str, id: &str, kind: &str) -> Option<DeviceValue> {
        self.domain_objects
            .descendants_named(object)
            .into_iter()
            .filter(|el| el.id() == Some(id))
            .flat_map(|el| el.path_all(&["logs", LogKind::Point.element()]))
            .filter(|log| log.child_text("type") == Some(kind))
            .find_map(|log| log.path(&["period", "measurement"]))
            .and_then(Element::text)
            .and_then(format_measure)
    }

    /// The location entity carrying logs, skipping the bare `<location id=".."/>`
    /// references appliances hold.
    pub fn logged_location(&self, loc_id: &str) -> Option<&Element> {
        self.domain_objects
            .descendants_named("location")
            .into_iter()
            .find(|el| el.id() == Some(loc_id) && el.child("logs").is_some())
    }
}

fn rule_targets_location(rule: &Element, loc_id: &str) -> bool {
    rule.descendant_path_all(&["contexts", "context", "zone", "location"])
        .iter()
        .any(|l| l.id() == Some(loc_id))
}

/// Logs of `log` granularity and measurement `kind` anywhere below `node`.
pub fn find_logs<'a>(node: &'a Element, kind: &str, log: LogKind) -> impl Iterator<Item = &'a Element> {
    node.descendants()
        .filter(|e| e.name == "logs")
        .flat_map(move |logs| logs.children_named(log.element()))
        .filter(move |l| l.child_text("type") == Some(kind))
}

/// First `period/measurement` of the matching log below `node`.
pub fn find_measurement<'a>(node: &'a Element, kind: &str, log: LogKind) -> Option<&'a Element> {
    find_logs(node, kind, log).find_map(|l| l.path(&["period", "measurement"]))
}

/// Measurement of the matching log whose `attr` equals `tariff`.
pub fn find_tariff_measurement<'a>(
    node: &'a Element,
    kind: &str,
    log: LogKind,
    attr: &str,
    tariff: &str,
) -> Option<&'a Element> {
    find_logs(node, kind, log)
        .flat_map(|l| l.path_all(&["period", "measurement"]))
        .find(|m| m.attr(attr) == Some(tariff))
}

/// Capability tags implied by the point logs below `node`.
///
/// Outdoor temperature counts as soon as it is logged; energy measurements
/// only when the log is tied to an electricity meter.
pub fn detect_measurement_tags(node: &Element) -> TagSet {
    let mut tags = TagSet::new();
    for (kind, tag) in HOME_MEASUREMENTS {
        let Some(log) = find_logs(node, kind, LogKind::Point).next() else {
            continue;
        };
        if kind == "outdoor_temperature" {
            tags.insert(tag);
        }
        let metered = log
            .find_descendant("electricity_point_meter")
            .and_then(|meter| meter.id())
            .is_some_and(|id| !id.is_empty());
        if metered {
            tags.insert(tag);
        }
    }
    tags
}
