use crate::models::smile::{DeviceData, DeviceValue, GatewayProfile, ProductType};
use crate::snapshot::{GatewaySnapshot, LogKind, find_measurement, find_tariff_measurement};
use crate::utils::round_to;
use crate::xml::Element;
use log::debug;

/// Home measurements that carry tariff splits.
const TARIFF_MEASUREMENTS: [&str; 3] = ["electricity_consumed", "electricity_produced", "gas_consumed"];
/// Tariff attribute value and the key fragment it maps to.
const TARIFFS: [(&str, &str); 2] = [("nl_peak", "peak"), ("nl_offpeak", "off_peak")];

/// Meter readings and net electricity per granularity for `loc_id`.
///
/// `None` when the location has no logs or none of them match.
pub fn power_data(snapshot: &GatewaySnapshot, loc_id: &str) -> Option<DeviceData> {
    let location = snapshot.logged_location(loc_id)?;
    let profile = snapshot.profile();
    let tariff_attr = match profile {
        GatewayProfile::LegacyPower => "tariff_indicator",
        _ => "tariff",
    };
    let unsplit_fallback = profile.product_type() == ProductType::Power;

    let mut data = DeviceData::new();
    for measurement in TARIFF_MEASUREMENTS {
        for kind in LogKind::ALL {
            for (tariff, peak) in TARIFFS {
                let Some(node) = tariff_node(location, measurement, kind, tariff_attr, tariff, unsplit_fallback) else {
                    continue;
                };
                let Some(value) = node.text().and_then(|t| t.trim().parse::<f64>().ok()) else {
                    debug!("Unreadable {} {} reading at {}", measurement, kind.suffix(), loc_id);
                    continue;
                };

                if measurement.starts_with("gas") {
                    data.insert(
                        format!("{}_{}", measurement, kind.suffix()),
                        DeviceValue::Float(round_to(value, 3)),
                    );
                    continue;
                }

                let value = round_to(value, 1);
                let sign = if measurement.ends_with("produced") { -1.0 } else { 1.0 };
                let net_key = format!("net_electricity_{}", kind.suffix());
                let net = data.get(&net_key).and_then(DeviceValue::as_f64).unwrap_or_default();
                data.insert(net_key, DeviceValue::Float(net + sign * value));
                data.insert(
                    format!("{}_{}_{}", measurement, peak, kind.suffix()),
                    DeviceValue::Float(value),
                );
            }
        }
    }

    (!data.is_empty()).then_some(data)
}

/// Tariff-qualified measurement, or for power products without tariff
/// splits the unqualified one (offered once, as peak).
fn tariff_node<'a>(
    location: &'a Element,
    measurement: &str,
    kind: LogKind,
    attr: &str,
    tariff: &str,
    unsplit_fallback: bool,
) -> Option<&'a Element> {
    if let Some(node) = find_tariff_measurement(location, measurement, kind, attr, tariff) {
        return Some(node);
    }
    if !unsplit_fallback || tariff != TARIFFS[0].0 {
        return None;
    }
    find_measurement(location, measurement, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::load_snapshot;

    fn f(data: &DeviceData, key: &str) -> Option<f64> {
        data.get(key).and_then(DeviceValue::as_f64)
    }

    fn assert_net_balances(data: &DeviceData) {
        for kind in LogKind::ALL {
            let g = kind.suffix();
            let Some(net) = f(data, &format!("net_electricity_{}", g)) else {
                continue;
            };
            let part = |m: &str, p: &str| f(data, &format!("electricity_{}_{}_{}", m, p, g)).unwrap_or_default();
            let expected = part("consumed", "peak") + part("consumed", "off_peak")
                - part("produced", "peak")
                - part("produced", "off_peak");
            assert!((net - expected).abs() < 1e-9, "{}: {} != {}", g, net, expected);
        }
    }

    #[test]
    fn p1_v3_tariff_split() {
        let snap = load_snapshot("p1v3");
        let data = power_data(&snap, "cd3e822288064775a7c4afcdd70bdda2").expect("power data");
        assert_eq!(f(&data, "electricity_consumed_peak_point"), Some(644.0));
        assert_eq!(f(&data, "electricity_produced_peak_cumulative"), Some(0.0));
        assert_eq!(f(&data, "net_electricity_point"), Some(644.0));
        assert_eq!(f(&data, "gas_consumed_cumulative"), Some(584.431));
        assert!(!data.contains_key("gas_consumed_peak_cumulative"));
        assert_net_balances(&data);
    }

    #[test]
    fn legacy_p1_uses_tariff_indicator() {
        let snap = load_snapshot("smile_p1_v2");
        let data = power_data(&snap, "938696c4bcdb4b8a9a595cb38ed43913").expect("power data");
        assert_eq!(f(&data, "electricity_consumed_peak_point"), Some(458.0));
        assert_eq!(f(&data, "electricity_produced_peak_cumulative"), Some(1296136.0));
        assert_eq!(f(&data, "electricity_produced_off_peak_cumulative"), Some(482598.0));
        assert_eq!(f(&data, "gas_consumed_cumulative"), Some(584.433));
        assert_eq!(f(&data, "net_electricity_point"), Some(458.0));
        assert_net_balances(&data);
    }

    #[test]
    fn thermostat_without_meters_has_no_power_data() {
        let snap = load_snapshot("anna_v4");
        assert_eq!(power_data(&snap, "0466eae8520144c78afb29628384edeb"), None);
        assert_eq!(power_data(&snap, "not-a-location"), None);
    }
}
