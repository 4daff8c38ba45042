//! Presets, schedules and their activity state, read from the rules in the
//! domain objects export.
//!
//! Modern gateways scope rules to locations through `contexts/context/zone`;
//! legacy Anna has exactly one schedule plus a handful of preset rules and no
//! location scoping at all.

use crate::models::smile::{PresetMap, PresetSetpoints};
use crate::snapshot::GatewaySnapshot;
use crate::xml::Element;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, NaiveTime};
use log::debug;

pub const PRESET_RULE_TAG: &str = "zone_setpoint_and_state_based_on_preset";
pub const SCHEDULE_RULE_TAG: &str = "zone_preset_based_on_time_and_presence_with_override";
const PRESET_RULE_NAME: &str = "Thermostat presets";
const WEEKDAYS: [&str; 7] = ["mo", "tu", "we", "th", "fr", "sa", "su"];

pub fn active_preset(snapshot: &GatewaySnapshot, loc_id: &str) -> Option<String> {
    if snapshot.profile().is_legacy() {
        let then = snapshot
            .rules()
            .into_iter()
            .filter(|r| r.child_text("active") == Some("true"))
            .find_map(|r| r.path(&["directives", "when", "then"]))?;
        return then.attr("icon").map(str::to_string);
    }
    snapshot
        .domain_objects
        .descendants_named("location")
        .into_iter()
        .filter(|l| l.id() == Some(loc_id))
        .find_map(|l| l.child_text("preset"))
        .map(str::to_string)
}

pub fn presets(snapshot: &GatewaySnapshot, loc_id: &str) -> PresetMap {
    if snapshot.profile().is_legacy() {
        return legacy_presets(snapshot);
    }

    let mut rule_ids = snapshot.rule_ids_by_tag(PRESET_RULE_TAG, loc_id);
    if rule_ids.is_empty() {
        rule_ids = snapshot.rule_ids_by_name(PRESET_RULE_NAME, loc_id);
    }

    let mut presets = PresetMap::new();
    for rule in rule_ids.iter().filter_map(|id| snapshot.rule(id)) {
        for directive in rule.path_all(&["directives"]).into_iter().flat_map(|d| d.children.iter()) {
            let (Some(name), Some(then)) = (directive.attr("preset"), directive.child("then")) else {
                continue;
            };
            match preset_setpoints(then) {
                Some(setpoints) => {
                    presets.insert(name.to_string(), setpoints);
                }
                None => debug!("Preset {} in rule {:?} has no usable setpoint", name, rule.id()),
            }
        }
    }
    presets
}

/// `(setpoint, 0)` for heating-only presets, otherwise the heating/cooling pair.
fn preset_setpoints(then: &Element) -> Option<PresetSetpoints> {
    let first = then.attributes.first().map(|(k, _)| k.as_str());
    if first == Some("setpoint") {
        let setpoint = then.attr("setpoint")?.parse().ok()?;
        return Some((setpoint, 0.0));
    }
    let heating = then.attr("heating_setpoint")?.parse().ok()?;
    let cooling = then.attr("cooling_setpoint")?.parse().ok()?;
    Some((heating, cooling))
}

fn legacy_presets(snapshot: &GatewaySnapshot) -> PresetMap {
    snapshot
        .rules()
        .into_iter()
        .flat_map(|r| r.path_all(&["directives", "when", "then"]))
        .filter_map(|then| {
            let icon = then.attr("icon")?;
            let temperature = then.attr("temperature")?.parse().ok()?;
            Some((icon.to_string(), (temperature, 0.0)))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScheduleState {
    pub available: Vec<String>,
    pub selected: Option<String>,
    /// Setpoint the active window of the schedules asks for right now.
    pub schedule_temperature: Option<f64>,
}

impl ScheduleState {
    fn record(&mut self, name: &str, active: bool) {
        if !self.available.iter().any(|n| n == name) {
            self.available.push(name.to_string());
        }
        if active {
            self.selected = Some(name.to_string());
        }
    }
}

pub fn schedule_state(snapshot: &GatewaySnapshot, loc_id: &str, now: NaiveDateTime) -> ScheduleState {
    if snapshot.profile().is_legacy() {
        return legacy_schedule_state(snapshot);
    }

    let mut state = ScheduleState::default();
    let mut preset_map = None;

    for rule in snapshot
        .rule_ids_by_tag(SCHEDULE_RULE_TAG, loc_id)
        .iter()
        .filter_map(|id| snapshot.rule(id))
    {
        let name = rule.child_text("name").unwrap_or_default();
        state.record(name, rule.child_text("active") == Some("true"));

        let Some(directives) = rule.child("directives") else {
            continue;
        };
        for directive in &directives.children {
            let (Some(window), Some(then)) = (directive.attr("time"), directive.child("then")) else {
                continue;
            };
            let setpoint = match then.attr("preset") {
                Some(preset) => preset_map
                    .get_or_insert_with(|| presets(snapshot, loc_id))
                    .get(preset)
                    .map(|(heating, _)| *heating),
                None => then.attr("setpoint").and_then(|s| s.parse().ok()),
            };
            let Some(setpoint) = setpoint else {
                continue;
            };
            if window_contains(window, now) {
                state.schedule_temperature = Some(setpoint);
            }
        }
    }
    state
}

fn legacy_schedule_state(snapshot: &GatewaySnapshot) -> ScheduleState {
    let mut state = ScheduleState::default();
    let name = snapshot
        .domain_objects
        .descendants_named("rule")
        .into_iter()
        .filter_map(|r| r.child_text("name"))
        .filter(|n| !n.contains("preset"))
        .last();

    let active = snapshot
        .domain_objects
        .children_named("appliance")
        .filter(|a| a.child_text("type") == Some("thermostat"))
        .flat_map(|a| a.path_all(&["logs", "point_log"]))
        .filter(|log| log.child_text("type") == Some("schedule_state"))
        .find_map(|log| log.path(&["period", "measurement"]))
        .and_then(Element::text)
        == Some("on");

    if let Some(name) = name {
        state.record(name, active);
    }
    state
}

/// Whether `now` falls in a directive window such as `[mo 07:00,mo 08:00)`.
///
/// Either end's weekday has to match today; the times are compared as a
/// daily window that may wrap past midnight.
pub fn window_contains(window: &str, now: NaiveDateTime) -> bool {
    let Some((start, end)) = window.split_once(',') else {
        return false;
    };
    let (Some((start_day, start_time)), Some((end_day, end_time))) =
        (parse_moment(start.trim_start_matches('[')), parse_moment(end.trim_end_matches(')')))
    else {
        debug!("Unparseable schedule window {:?}", window);
        return false;
    };

    let today = now.weekday().num_days_from_monday() as usize;
    if start_day != today && end_day != today {
        return false;
    }
    let time = now.time();
    if start_time <= end_time {
        start_time <= time && time < end_time
    } else {
        start_time <= time || time < end_time
    }
}

fn parse_moment(raw: &str) -> Option<(usize, NaiveTime)> {
    let (day, time) = raw.trim().split_once(' ')?;
    let day = WEEKDAYS.iter().position(|d| *d == day)?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M").ok()?;
    Some((day, time))
}

/// Name of the schedule rule with the newest `modified_date`.
pub fn last_used(snapshot: &GatewaySnapshot, loc_id: &str) -> Option<String> {
    let mut newest: Option<(DateTime<FixedOffset>, &str)> = None;
    for rule in snapshot
        .rule_ids_by_tag(SCHEDULE_RULE_TAG, loc_id)
        .iter()
        .filter_map(|id| snapshot.rule(id))
    {
        let Some(name) = rule.child_text("name") else {
            continue;
        };
        let Some(modified) = rule
            .child_text("modified_date")
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        else {
            debug!("Schedule {} has no readable modified_date", name);
            continue;
        };
        if newest.is_none_or(|(stamp, _)| modified >= stamp) {
            newest = Some((modified, name));
        }
    }
    newest.map(|(_, name)| name.to_string())
}
