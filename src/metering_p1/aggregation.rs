use super::registry::{ReferenceRegistry, WindowMode};
use super::structs::DecodedReading;
use super::P1Error;
use crate::obis_utils::MeterValue;
use log::debug;

/// Decides per reading whether something has to be published.
///
/// Meters may send a telegram every second, which is far too much for
/// slowly changing values. A reference can therefore average its last N
/// readings or only pass every Mth reading on.
pub struct AggregationEngine {
    registry: ReferenceRegistry,
}

impl AggregationEngine {
    pub fn new(registry: ReferenceRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ReferenceRegistry {
        &self.registry
    }

    /// Returns the value to publish once a window is complete, `None` while
    /// the reading is only accumulated or the reference is not published.
    pub fn accept(&mut self, reading: &DecodedReading) -> Result<Option<MeterValue>, P1Error> {
        let entry = self.registry.entry_mut(&reading.reference)?;
        if !entry.config.publish {
            return Ok(None);
        }

        let state = &mut entry.state;
        match entry.config.window {
            WindowMode::Immediate => Ok(Some(reading.value.clone())),
            WindowMode::Average(n) => {
                let value = reading.value.as_f64().ok_or_else(|| P1Error::NotNumeric {
                    reference: reading.reference.clone(),
                    value: reading.value.to_string(),
                })?;

                state.accumulated += value;
                state.integral &= reading.value.is_integer();

                if state.remaining == 1 {
                    let average = state.accumulated / n as f64;
                    /* Watts stay whole watts, like the kW conversion itself */
                    let value = if state.integral {
                        MeterValue::Integer(average as i64)
                    } else {
                        MeterValue::Float(average)
                    };
                    state.reset(entry.config.window);
                    Ok(Some(value))
                } else {
                    state.remaining -= 1;
                    debug!("{}: {} readings left to average", reading.reference, state.remaining);
                    Ok(None)
                }
            }
            WindowMode::Count(m) => {
                if state.remaining == 1 {
                    state.remaining = m;
                    Ok(Some(reading.value.clone()))
                } else {
                    state.remaining -= 1;
                    Ok(None)
                }
            }
        }
    }
}
