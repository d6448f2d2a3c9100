use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

lazy_static! {
    /* Data lines start with a digit and carry the A-B:C.D.E structure */
    static ref DATA_REFERENCE: Regex = Regex::new(r"^[0-9].*:").unwrap();
}

/// Unit recognized from the `*<unit>` suffix of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Ampere,
    /// Decoded from `*kW`, the value is already scaled to watts
    Watt,
    KilowattHour,
    Volt,
    CubicMeter,
    Unrecognized,
}

impl Unit {
    pub fn to_str(&self) -> &'static str {
        match self {
            Unit::Ampere => "A",
            Unit::Watt => "W",
            Unit::KilowattHour => "kWh",
            Unit::Volt => "V",
            Unit::CubicMeter => "m3",
            Unit::Unrecognized => "",
        }
    }
}

/// A decoded field value. `Raw` is the pass-through for anything the
/// decoder does not understand and must never be used as a number.
#[derive(Debug, Clone, PartialEq)]
pub enum MeterValue {
    Integer(i64),
    Float(f64),
    Raw(String),
}

impl MeterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MeterValue::Integer(i) => Some(*i as f64),
            MeterValue::Float(f) => Some(*f),
            MeterValue::Raw(_) => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, MeterValue::Integer(_))
    }
}

impl fmt::Display for MeterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeterValue::Integer(i) => write!(f, "{}", i),
            MeterValue::Float(v) => write!(f, "{}", v),
            MeterValue::Raw(s) => write!(f, "{}", s),
        }
    }
}

enum Scale {
    Float,
    KiloToInteger,
}

/* Order matters: *kWh has to be tried before *kW */
const SUFFIXES: [(&str, Unit, Scale); 5] = [
    ("*A", Unit::Ampere, Scale::Float),
    ("*kWh", Unit::KilowattHour, Scale::Float),
    ("*kW", Unit::Watt, Scale::KiloToInteger),
    ("*V", Unit::Volt, Scale::Float),
    ("*m3", Unit::CubicMeter, Scale::Float),
];

/// Strip the unit suffix of a field and convert the rest into a number.
///
/// Examples:
/// - `00004.239*m3` → `Float(4.239)`, `CubicMeter`
/// - `01.234*kW` → `Integer(1234)`, `Watt` (fractional watts are truncated)
/// - `181007192000S` → `Raw("181007192000S")`, `Unrecognized`
pub fn decode_value(raw: &str) -> (MeterValue, Unit) {
    for (suffix, unit, scale) in SUFFIXES.iter() {
        let number = match raw.strip_suffix(*suffix) {
            Some(n) => n.trim(),
            None => continue,
        };

        let value = match scale {
            Scale::Float => number.parse::<f64>().ok().map(MeterValue::Float),
            Scale::KiloToInteger => kilo_to_integer(number).map(MeterValue::Integer),
        };

        match value {
            Some(v) => return (v, *unit),
            None => {
                debug!("Value ##{}## has unit {} but no numeric part", raw, unit.to_str());
                break;
            }
        }
    }

    debug!("No unit suffix matched for ##{}##, passing it through", raw);
    (MeterValue::Raw(raw.to_string()), Unit::Unrecognized)
}

/// Decimal kilo value to its integer milli value, digits past the third
/// decimal are cut off. Works on the digits so `1.001` stays `1001`.
fn kilo_to_integer(number: &str) -> Option<i64> {
    let (negative, digits) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number.strip_prefix('+').unwrap_or(number)),
    };

    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let milli = fraction
        .bytes()
        .chain(std::iter::repeat(b'0'))
        .take(3)
        .fold(0i64, |acc, b| acc * 10 + i64::from(b - b'0'));

    let scaled = whole.checked_mul(1000)?.checked_add(milli)?;
    Some(if negative { -scaled } else { scaled })
}

/// Header (`/ISK5...`), footer (`!1A2B`) and empty lines are not data lines
pub fn is_data_reference(reference: &str) -> bool {
    DATA_REFERENCE.is_match(reference)
}

pub fn get_obis_description(obis_code: &str) -> Option<&'static str> {
    let descriptions = get_standard_obis_descriptions();
    descriptions.get(obis_code).copied()
}

pub fn get_standard_obis_descriptions() -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();

    // Energy values
    map.insert("1-0:1.8.1", "Electricity delivered to client (tariff 1)");
    map.insert("1-0:1.8.2", "Electricity delivered to client (tariff 2)");
    map.insert("1-0:2.8.1", "Electricity delivered by client (tariff 1)");
    map.insert("1-0:2.8.2", "Electricity delivered by client (tariff 2)");
    map.insert("0-0:96.14.0", "Tariff indicator");

    // Power values
    map.insert("1-0:1.7.0", "Actual electricity power delivered (+P)");
    map.insert("1-0:2.7.0", "Actual electricity power received (-P)");
    map.insert("1-0:21.7.0", "Active power + (L1)");
    map.insert("1-0:41.7.0", "Active power + (L2)");
    map.insert("1-0:61.7.0", "Active power + (L3)");
    map.insert("1-0:22.7.0", "Active power - (L1)");
    map.insert("1-0:42.7.0", "Active power - (L2)");
    map.insert("1-0:62.7.0", "Active power - (L3)");

    // Voltage values
    map.insert("1-0:32.7.0", "Voltage (L1)");
    map.insert("1-0:52.7.0", "Voltage (L2)");
    map.insert("1-0:72.7.0", "Voltage (L3)");

    // Current values
    map.insert("1-0:31.7.0", "Current (L1)");
    map.insert("1-0:51.7.0", "Current (L2)");
    map.insert("1-0:71.7.0", "Current (L3)");

    // Power quality
    map.insert("0-0:96.7.21", "Number of power failures");
    map.insert("0-0:96.7.9", "Number of long power failures");
    map.insert("1-0:32.32.0", "Number of voltage sags (L1)");
    map.insert("1-0:32.36.0", "Number of voltage swells (L1)");

    // Timestamp and identification
    map.insert("0-0:1.0.0", "Date and time");
    map.insert("0-0:96.1.1", "Equipment identifier");
    map.insert("1-3:0.2.8", "DSMR version");

    // Gas
    map.insert("0-1:24.1.0", "Gas device type");
    map.insert("0-1:96.1.0", "Gas equipment identifier");
    map.insert("0-1:24.2.1", "Gas delivered (last 5 minute value)");

    map
}
