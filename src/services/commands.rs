//! XML payloads for state changes.
//!
//! Every builder resolves its target against the current snapshot and
//! returns `None` (or an empty list) when the target does not exist, so
//! callers can report "not applicable" without touching the network.

use crate::client::{APPLIANCES, LOCATIONS, RULES};
use crate::models::smile::GatewayProfile;
use crate::services::schedules::presets;
use crate::snapshot::GatewaySnapshot;
use crate::utils::format_setpoint;
use crate::xml::Element;
use log::{debug, warn};
use quick_xml::escape::escape;

/// One PUT against the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub path: String,
    pub body: String,
}

pub fn set_temperature(snapshot: &GatewaySnapshot, loc_id: &str, temperature: f64) -> Option<Command> {
    let path = match snapshot.profile() {
        GatewayProfile::LegacyThermostat | GatewayProfile::LegacyPower => {
            let thermostat = snapshot
                .appliance_elements()
                .into_iter()
                .find(|a| a.child_text("type") == Some("thermostat"))
                .and_then(Element::id)?;
            format!("{};id={}/thermostat", APPLIANCES, thermostat)
        }
        _ => {
            let functionality = snapshot
                .locations
                .children_named("location")
                .filter(|l| l.id() == Some(loc_id))
                .find_map(|l| l.path(&["actuator_functionalities", "thermostat_functionality"]))
                .and_then(Element::id)?;
            format!("{};id={}/thermostat;id={}", LOCATIONS, loc_id, functionality)
        }
    };
    Some(Command {
        path,
        body: format!(
            "<thermostat_functionality><setpoint>{}</setpoint></thermostat_functionality>",
            format_setpoint(temperature)
        ),
    })
}

pub fn set_preset(snapshot: &GatewaySnapshot, loc_id: &str, preset: &str) -> Option<Command> {
    if snapshot.profile().is_legacy() {
        return set_preset_legacy(snapshot, preset);
    }

    let location = snapshot
        .locations
        .children_named("location")
        .find(|l| l.id() == Some(loc_id))?;
    if !presets(snapshot, loc_id).contains_key(preset) {
        debug!("Preset {} not available for location {}", preset, loc_id);
        return None;
    }

    let name = location.child_text("name").unwrap_or_default();
    let kind = location.child_text("type").unwrap_or_default();
    Some(Command {
        path: format!("{};id={}", LOCATIONS, loc_id),
        body: format!(
            "<locations><location id=\"{}\"><name>{}</name><type>{}</type><preset>{}</preset></location></locations>",
            escape(loc_id),
            escape(name),
            escape(kind),
            escape(preset)
        ),
    })
}

/// Legacy presets are rules; activating one means activating its rule.
fn set_preset_legacy(snapshot: &GatewaySnapshot, preset: &str) -> Option<Command> {
    let rule_id = snapshot
        .rules()
        .into_iter()
        .find(|r| {
            r.path_all(&["directives", "when", "then"])
                .iter()
                .any(|then| then.attr("icon") == Some(preset))
        })
        .and_then(Element::id)?;
    Some(Command {
        path: RULES.to_string(),
        body: format!("<rules><rule id=\"{}\"><active>true</active></rule></rules>", escape(rule_id)),
    })
}

/// One command per rule named `name`; legacy gateways have at most one.
pub fn set_schedule_state(snapshot: &GatewaySnapshot, loc_id: &str, name: &str, active: bool) -> Vec<Command> {
    let legacy = snapshot.profile().is_legacy();
    let rule_ids: Vec<String> = if legacy {
        snapshot
            .rules()
            .into_iter()
            .filter(|r| r.child_text("name") == Some(name))
            .filter_map(Element::id)
            .last()
            .map(str::to_string)
            .into_iter()
            .collect()
    } else {
        snapshot.rule_ids_by_name(name, loc_id)
    };

    // The template tag closes differently on legacy firmware.
    let template_close = if legacy { " />" } else { "/>" };

    let mut commands = Vec::new();
    for rule_id in rule_ids {
        let template = snapshot
            .rule(&rule_id)
            .and_then(|r| r.children_named("template").filter_map(Element::id).last());
        let Some(template) = template else {
            warn!("Schedule rule {} has no template; not sending", rule_id);
            continue;
        };
        commands.push(Command {
            path: format!("{};id={}", RULES, rule_id),
            body: format!(
                "<rules><rule id=\"{}\"><name><![CDATA[{}]]></name><template id=\"{}\"{}<active>{}</active></rule></rules>",
                escape(&rule_id),
                cdata_text(name),
                escape(template),
                template_close,
                active
            ),
        });
    }
    commands
}

/// `text` safe inside a CDATA section: a literal `]]>` is split across two sections.
fn cdata_text(text: &str) -> String {
    text.replace("]]>", "]]]]><![CDATA[>")
}

/// Relay switch for an appliance, or for every member of a switching group.
///
/// All-or-nothing: `None` as soon as one target lacks a relay.
pub fn set_relay_state(snapshot: &GatewaySnapshot, appliance_id: &str, members: &[String], on: bool) -> Option<Vec<Command>> {
    let state = if on { "on" } else { "off" };
    let targets: Vec<&str> = if members.is_empty() {
        vec![appliance_id]
    } else {
        members.iter().map(String::as_str).collect()
    };

    targets
        .into_iter()
        .map(|target| {
            let relay = snapshot
                .appliance_elements()
                .into_iter()
                .filter(|a| a.id() == Some(target))
                .find_map(|a| a.path(&["actuator_functionalities", "relay_functionality"]))
                .and_then(Element::id)?;
            Some(Command {
                path: format!("{};id={}/relay;id={}", APPLIANCES, target, relay),
                body: format!("<relay_functionality><state>{}</state></relay_functionality>", state),
            })
        })
        .collect()
}
