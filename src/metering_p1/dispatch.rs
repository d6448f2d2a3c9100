use super::registry::ReferenceConfig;
use super::P1Error;
use crate::mqtt::PublishData;
use crate::obis_utils::MeterValue;
use log::info;

pub struct PublishDispatcher {
    topic_base: String,
}

impl PublishDispatcher {
    pub fn new(topic_base: &str) -> Self {
        Self { topic_base: topic_base.to_string() }
    }

    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.topic_base, suffix)
    }

    /// Build the message for a value that is due. Without a topic suffix
    /// nothing is sent, the reading is dropped by the caller.
    pub fn dispatch(&self, reference: &str, config: &ReferenceConfig, value: &MeterValue) -> Result<PublishData, P1Error> {
        let suffix = config
            .topic_suffix
            .as_ref()
            .ok_or_else(|| P1Error::MissingTopic(reference.to_string()))?;

        let topic = self.topic(suffix);
        info!("mqtt topic: {}, value: {}", topic, value);

        Ok(PublishData {
            topic,
            payload: value.to_string(),
            qos: 0,
            retain: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering_p1::registry::WindowMode;

    fn config(suffix: Option<&str>) -> ReferenceConfig {
        ReferenceConfig {
            value_field: 1,
            publish: true,
            topic_suffix: suffix.map(|s| s.to_string()),
            window: WindowMode::Immediate,
        }
    }

    #[test]
    fn test_dispatch() {
        let d = PublishDispatcher::new("meter");
        let data = d.dispatch("1-0:1.7.0", &config(Some("power")), &MeterValue::Integer(344)).unwrap();
        assert_eq!(data.topic, "meter/power");
        assert_eq!(data.payload, "344");

        let raw = d
            .dispatch("0-0:1.0.0", &config(Some("time")), &MeterValue::Raw("181007192000S".to_string()))
            .unwrap();
        assert_eq!(raw.payload, "181007192000S");
    }

    #[test]
    fn test_missing_topic() {
        let d = PublishDispatcher::new("meter");
        let result = d.dispatch("1-0:1.7.0", &config(None), &MeterValue::Integer(1));
        assert!(matches!(result, Err(P1Error::MissingTopic(r)) if r == "1-0:1.7.0"));
    }
}
