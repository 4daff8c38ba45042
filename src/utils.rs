use crate::models::smile::DeviceValue;

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Coerce a raw measurement: integer, then float rounded to 2 decimals, then
/// the literal `on`/`off`. Anything else is dropped.
///
/// The order matters: setpoints such as `20.5` must never read as booleans,
/// and relay states must never read as numbers.
pub fn format_measure(raw: &str) -> Option<DeviceValue> {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Some(DeviceValue::Int(v));
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        return v.is_finite().then(|| DeviceValue::Float(round_to(v, 2)));
    }
    match trimmed {
        "on" => Some(DeviceValue::Bool(true)),
        "off" => Some(DeviceValue::Bool(false)),
        _ => None,
    }
}

/// Render a setpoint the way the gateway's own clients send it (`20.0`, `22.5`).
pub fn format_setpoint(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}
