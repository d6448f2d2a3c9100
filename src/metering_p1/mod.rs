use crate::mqtt::{PublishData, Transmission};
use crate::obis_utils;
use log::{debug, info, warn};
use std::collections::HashMap;
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;

pub mod aggregation;
pub mod dispatch;
pub mod registry;
pub mod serial;
pub mod structs;
pub mod telegram;

use aggregation::AggregationEngine;
use dispatch::PublishDispatcher;
use registry::{ReferenceConfig, ReferenceRegistry};
use serial::LineReader;
use structs::DecodedReading;

#[derive(Error, Debug)]
pub enum P1Error {
    #[error("OBIS reference {reference} wants field {field}, but the line only has {available}")]
    MissingField { reference: String, field: usize, available: usize },
    #[error("OBIS reference {0} is not configured")]
    NotConfigured(String),
    #[error("OBIS reference {0} is set to publish, but is missing the key mqtt_topic")]
    MissingTopic(String),
    #[error("OBIS reference {reference} averages values, but ##{value}## is not a number")]
    NotNumeric { reference: String, value: String },
    #[error("Could not open the serial port {device}: {source}")]
    SerialOpen { device: String, source: tokio_serial::Error },
    #[error("The serial port is not open anymore")]
    TransportClosed,
    #[error("Reading from the serial port failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("The MQTT transmission channel is closed")]
    ChannelClosed,
}

/// Turns telegram lines into publishable messages.
///
/// Everything stateful lives in the aggregation engine, so one processor
/// belongs to exactly one meter.
pub struct P1Processor {
    engine: AggregationEngine,
    dispatcher: PublishDispatcher,
}

impl P1Processor {
    pub fn new(references: HashMap<String, ReferenceConfig>, topic_base: &str) -> Self {
        Self {
            engine: AggregationEngine::new(ReferenceRegistry::new(references)),
            dispatcher: PublishDispatcher::new(topic_base),
        }
    }

    #[cfg(test)]
    pub fn engine(&self) -> &AggregationEngine {
        &self.engine
    }

    /// `Ok(None)` means the line was consumed but nothing is due for publishing
    pub fn process_line(&mut self, line: &str) -> Result<Option<PublishData>, P1Error> {
        let telegram_line = match telegram::parse_line(line) {
            Some(l) => l,
            None => return Ok(None),
        };

        let field_nr = self.engine.registry().value_field(&telegram_line.reference);
        let raw = telegram_line.field(field_nr)?;
        let (value, unit) = obis_utils::decode_value(raw);

        let reading = DecodedReading {
            reference: telegram_line.reference,
            fields: telegram_line.fields,
            value,
            unit,
        };

        let value = match self.engine.accept(&reading)? {
            Some(v) => v,
            None => return Ok(None),
        };

        let config = self.engine.registry().publish_config(&reading.reference)?;
        let data = self.dispatcher.dispatch(&reading.reference, config, &value)?;
        Ok(Some(data))
    }

    pub fn log_references(&self) {
        for (reference, config) in self.engine.registry().references() {
            if !config.publish {
                continue;
            }
            let description = obis_utils::get_obis_description(reference).unwrap_or("unknown");
            info!(
                "Publishing {} ({}) on {:?} every {} reading(s)",
                reference,
                description,
                config.topic_suffix,
                config.window.size()
            );
        }
    }
}

pub struct P1Manager {
    sender: Sender<Transmission>,
    processor: P1Processor,
}

impl P1Manager {
    pub fn new(sender: Sender<Transmission>, processor: P1Processor) -> Self {
        Self { sender, processor }
    }

    /// Reads lines until the transport fails. Only fatal errors are returned,
    /// problems with a single line are logged and the line is skipped.
    /// Messages that find the transmission channel full are dropped, reading
    /// the serial port never waits for the MQTT side.
    pub async fn start_thread<R: AsyncBufRead + Unpin>(&mut self, mut lines: LineReader<R>) -> Result<(), P1Error> {
        info!("Starting P1 thread");
        self.processor.log_references();

        loop {
            let line = lines.next_line().await?;
            debug!("{}", line);

            match self.processor.process_line(&line) {
                Ok(Some(data)) => match self.sender.try_send(Transmission::Publish(data)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(Transmission::Publish(dropped))) => {
                        warn!("MQTT is not keeping up, dropping {} for {}", dropped.payload, dropped.topic);
                    }
                    Err(TrySendError::Closed(_)) => return Err(P1Error::ChannelClosed),
                },
                Ok(None) => {}
                Err(P1Error::NotConfigured(reference)) => {
                    debug!("No configuration for {}, not publishing", reference);
                }
                Err(e) => {
                    warn!("{}", e);
                }
            }
        }
    }
}
