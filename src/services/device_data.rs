//! Flat per-device readings assembled from measurement logs, rules and the
//! home location's meters.

use crate::models::smile::{ApplianceClass, DeviceData, DeviceValue, Tag};
use crate::services::power::power_data;
use crate::services::schedules::{active_preset, last_used, presets, schedule_state};
use crate::services::thermostats::Inventory;
use crate::snapshot::{GatewaySnapshot, LogKind, find_measurement};
use crate::utils::{format_measure, round_to};
use crate::xml::Element;
use chrono::NaiveDateTime;
use log::debug;

/// Raw log type and the key it is reported under.
pub const DEVICE_MEASUREMENTS: [(&str, &str); 23] = [
    ("temperature", "temperature"),
    ("thermostat", "setpoint"),
    ("boiler_temperature", "water_temperature"),
    ("domestic_hot_water_state", "dhw_state"),
    ("intended_boiler_temperature", "intended_boiler_temperature"),
    ("intended_central_heating_state", "heating_state"),
    ("modulation_level", "modulation_level"),
    ("return_water_temperature", "return_temperature"),
    ("compressor_state", "compressor_state"),
    ("cooling_state", "cooling_state"),
    ("slave_boiler_state", "slave_boiler_state"),
    ("flame_state", "flame_state"),
    ("central_heater_water_pressure", "water_pressure"),
    ("outdoor_temperature", "outdoor_temperature"),
    ("schedule_temperature", "schedule_temperature"),
    ("boiler_state", "boiler_state"),
    ("intended_boiler_state", "intended_boiler_state"),
    ("battery", "battery"),
    ("temperature_difference", "temperature_difference"),
    ("valve_position", "valve_position"),
    ("electricity_consumed", "electricity_consumed"),
    ("electricity_produced", "electricity_produced"),
    ("relay", "relay"),
];

/// Readings above this are a stale power-on artefact.
const MAX_WATER_PRESSURE: f64 = 3.5;
/// Log types whose presence means a local heat source is installed.
const ACTIVE_DEVICE_MARKERS: [&str; 2] = ["compressor_state", "flame_state"];

fn measured_appliances<'a>(snapshot: &'a GatewaySnapshot, dev_id: &str) -> impl Iterator<Item = &'a Element> {
    snapshot
        .measurement_source()
        .descendants()
        .filter(move |a| a.name == "appliance" && a.id() == Some(dev_id))
}

/// Allow-listed readings of one appliance.
pub fn appliance_measurements(snapshot: &GatewaySnapshot, dev_id: &str) -> DeviceData {
    let legacy = snapshot.profile().is_legacy();
    let mut data = DeviceData::new();

    for appliance in measured_appliances(snapshot, dev_id) {
        for (kind, name) in DEVICE_MEASUREMENTS {
            if let Some(raw) = find_measurement(appliance, kind, LogKind::Point).and_then(Element::text) {
                if legacy && kind == "domestic_hot_water_state" {
                    continue;
                }
                if kind == "central_heater_water_pressure"
                    && raw.trim().parse::<f64>().is_ok_and(|p| p > MAX_WATER_PRESSURE)
                {
                    debug!("Dropping implausible water pressure {} on {}", raw, dev_id);
                    continue;
                }
                if let Some(value) = format_measure(raw) {
                    data.insert(name.to_string(), value);
                }
            }

            for log in [LogKind::Interval, LogKind::Cumulative] {
                let Some(raw) = find_measurement(appliance, kind, log).and_then(Element::text) else {
                    continue;
                };
                if let Some(value) = format_measure(raw) {
                    data.insert(format!("{}_{}", name, log.suffix()), value);
                }
            }
        }
    }
    data
}

/// A heat pump or gas boiler reporting its own state.
fn active_device_present(snapshot: &GatewaySnapshot) -> bool {
    snapshot
        .measurement_source()
        .descendants_named("appliance")
        .into_iter()
        .any(|a| ACTIVE_DEVICE_MARKERS.iter().any(|m| find_measurement(a, m, LogKind::Point).is_some()))
}

fn open_valves(snapshot: &GatewaySnapshot) -> usize {
    snapshot
        .appliance_elements()
        .into_iter()
        .filter_map(|a| find_measurement(a, "valve_position", LogKind::Point))
        .filter_map(Element::text)
        .filter(|v| v.trim().parse::<f64>().is_ok_and(|p| p > 0.0))
        .count()
}

/// Everything known about `dev_id`; `None` for ids not in the device listing.
pub fn device_data(
    snapshot: &GatewaySnapshot,
    inventory: &Inventory,
    dev_id: &str,
    now: NaiveDateTime,
) -> Option<DeviceData> {
    let details = inventory.devices.get(dev_id)?;
    let legacy = snapshot.profile().is_legacy();
    let mut data = appliance_measurements(snapshot, dev_id);

    // Legacy Anna reports the boiler through its own pair of states.
    if data.contains_key("boiler_state") {
        match data.remove("intended_boiler_state") {
            Some(intended) => {
                data.insert("heating_state".to_string(), intended);
            }
            None => {
                data.remove("heating_state");
            }
        }
        data.remove("boiler_state");
    }
    // Thermostats on Adam also log the boiler's intent.
    if data.contains_key("setpoint") {
        data.remove("heating_state");
    }

    if snapshot.info.name == "Adam" && details.class == ApplianceClass::HeaterCentral && !active_device_present(snapshot) {
        data.insert("heating_state".to_string(), DeviceValue::Bool(open_valves(snapshot) > 0));
    }

    let loc_id = details.location.as_deref().unwrap_or_default();

    if details.class.is_thermostat_family() {
        if let Some(preset) = active_preset(snapshot, loc_id) {
            data.insert("active_preset".to_string(), DeviceValue::Text(preset));
        }
        data.insert("presets".to_string(), DeviceValue::Presets(presets(snapshot, loc_id)));

        let schedules = schedule_state(snapshot, loc_id, now);
        if !legacy {
            match schedules.schedule_temperature {
                Some(t) => {
                    data.insert("schedule_temperature".to_string(), DeviceValue::Float(t));
                }
                None => {
                    data.remove("schedule_temperature");
                }
            }
        }
        let last = if legacy {
            Some(schedules.available.concat()).filter(|s| !s.is_empty())
        } else {
            last_used(snapshot, loc_id)
        };
        if let Some(selected) = schedules.selected {
            data.insert("selected_schedule".to_string(), DeviceValue::Text(selected));
        }
        data.insert("available_schedules".to_string(), DeviceValue::List(schedules.available));
        if let Some(last) = last {
            data.insert("last_used".to_string(), DeviceValue::Text(last));
        }
    }

    if details.class == ApplianceClass::Thermostat {
        let illuminance = snapshot
            .object_value("appliance", dev_id, "illuminance")
            .and_then(|v| v.as_f64());
        if let Some(lux) = illuminance {
            data.insert("illuminance".to_string(), DeviceValue::Float(round_to(lux, 1)));
        }
    }

    let is_gateway = details.class == ApplianceClass::Gateway || inventory.appliances.gateway_id.as_deref() == Some(dev_id);
    if is_gateway {
        // Anna only logs the outdoor temperature on the home location.
        if !data.contains_key("outdoor_temperature") {
            let outdoor = inventory
                .locations
                .home_location
                .as_deref()
                .and_then(|home| snapshot.object_value("location", home, "outdoor_temperature"));
            if let Some(outdoor) = outdoor {
                data.insert("outdoor_temperature".to_string(), outdoor);
            }
        }
        if let Some(power) = power_data(snapshot, loc_id) {
            data.extend(power);
        }
    }

    if details.types.contains(&Tag::SwitchGroup) {
        let any_on = details
            .members
            .iter()
            .any(|m| appliance_measurements(snapshot, m).get("relay").and_then(DeviceValue::as_bool) == Some(true));
        data.insert("relay".to_string(), DeviceValue::Bool(any_on));
    }

    Some(data)
}
