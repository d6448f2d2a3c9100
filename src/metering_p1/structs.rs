use crate::obis_utils::{MeterValue, Unit};

/// One decoded data line, only alive while the line is processed
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReading {
    pub reference: String,
    pub fields: Vec<String>,
    pub value: MeterValue,
    pub unit: Unit,
}
