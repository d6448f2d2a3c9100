pub mod reconnect;

use crate::config::MqttConfig;
use log::{debug, error, info, warn};
use reconnect::{reconnect_with, ReconnectPolicy};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{Receiver, Sender};

#[derive(Error, Debug)]
pub enum MqttError {
    #[error("Giving up reconnecting to the MQTT server after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishData {
    pub topic: String,
    pub payload: String,
    pub qos: u8,
    pub retain: bool,
}

pub enum Transmission {
    Publish(PublishData),
}

pub fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

/// Owns the rumqttc event loop and brings the connection back when it drops
pub struct MqttConnection {
    eventloop: EventLoop,
    policy: ReconnectPolicy,
}

impl MqttConnection {
    pub async fn start_thread(mut self) -> Result<(), MqttError> {
        info!("MQTT Eventloop started");
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Successfully connected to the MQTT server");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Unexpected disconnection from MQTT ({}), trying to reconnect", e);
                    let attempts = reconnect_with(&self.policy, &mut self.eventloop).await?;
                    info!("Successfully reconnected to the MQTT server after {} attempt(s)", attempts);
                }
            }
        }
    }
}

pub struct MqttManager {
    rx: Receiver<Transmission>,
    client: AsyncClient,
}

impl MqttManager {
    pub fn new(config: &MqttConfig) -> (Self, Sender<Transmission>, MqttConnection) {
        let (mtx, mrx) = tokio::sync::mpsc::channel(100);

        info!("MQTT connection to {}:{} starting up", config.host, config.port);
        let mut mqttoptions = MqttOptions::new(config.client_name.clone(), config.host.clone(), config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive));
        if let Some(user) = &config.user {
            mqttoptions.set_credentials(user.clone(), config.pass.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 10);

        let connection = MqttConnection {
            eventloop,
            policy: config.reconnect_policy(),
        };

        (MqttManager { rx: mrx, client }, mtx, connection)
    }

    /// Publishes every transmission in order. The client queue is bounded,
    /// so this waits while the event loop is busy reconnecting.
    pub async fn start_thread(&mut self) {
        while let Some(transmission) = self.rx.recv().await {
            match transmission {
                Transmission::Publish(publish_data) => {
                    let topic = publish_data.topic.clone();
                    match self.client.publish(
                        publish_data.topic,
                        qos_from_u8(publish_data.qos),
                        publish_data.retain,
                        publish_data.payload.clone(),
                    ).await {
                        Err(e) => { error!("Error sending to {}: {}", topic, e); },
                        Ok(_) => { debug!("published message {} on topic {}", publish_data.payload, topic); }
                    }
                }
            }
        }

        error!("Transmission channel closed, MQTT manager exits");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn config() -> MqttConfig {
        MqttConfig {
            host: "localhost".to_string(),
            port: 1883,
            user: Some("smartmeter".to_string()),
            pass: None,
            client_name: "smartmeter".to_string(),
            keep_alive: 45,
            topic_base: "meter".to_string(),
            reconnect_delay: 3,
            max_reconnect_attempts: Some(4),
        }
    }

    /* One MQTT control packet: fixed header byte and body */
    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut length = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            length |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; length];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    /// Accepts one client, acknowledges its CONNECT and collects QoS 0
    /// publishes as (topic, payload) until `expected` arrived
    async fn broker(listener: TcpListener, expected: usize) -> Vec<(String, String)> {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        while received.len() < expected {
            let (header, body) = read_packet(&mut stream).await.unwrap();
            match header >> 4 {
                1 => stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap(),
                3 => {
                    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                    let topic = String::from_utf8(body[2..2 + topic_len].to_vec()).unwrap();
                    let payload = String::from_utf8(body[2 + topic_len..].to_vec()).unwrap();
                    received.push((topic, payload));
                }
                12 => stream.write_all(&[0xd0, 0x00]).await.unwrap(),
                _ => {}
            }
        }
        received
    }

    #[test]
    fn test_qos_from_u8() {
        assert_eq!(qos_from_u8(0), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2), QoS::ExactlyOnce);
        assert_eq!(qos_from_u8(7), QoS::AtMostOnce);
    }

    #[test]
    fn test_new_uses_reconnect_policy() {
        let (_manager, _tx, connection) = MqttManager::new(&config());
        assert_eq!(connection.policy.delay, Duration::from_secs(3));
        assert_eq!(connection.policy.max_attempts, Some(4));
    }

    #[tokio::test]
    async fn test_burst_reaches_connected_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config();
        config.host = "127.0.0.1".to_string();
        config.port = listener.local_addr().unwrap().port();
        config.user = None;
        let broker = tokio::spawn(broker(listener, 40));

        let (mut manager, tx, connection) = MqttManager::new(&config);
        let connection_task = tokio::spawn(connection.start_thread());
        let manager_task = tokio::spawn(async move { manager.start_thread().await });

        /* more than the client queue of 10 holds at once */
        for i in 0..40 {
            let data = PublishData {
                topic: "meter/power".to_string(),
                payload: i.to_string(),
                qos: 0,
                retain: false,
            };
            tx.send(Transmission::Publish(data)).await.unwrap();
        }

        let received = tokio::time::timeout(Duration::from_secs(10), broker)
            .await
            .expect("broker did not receive every message")
            .unwrap();
        connection_task.abort();
        manager_task.abort();

        let expected: Vec<(String, String)> =
            (0..40).map(|i| ("meter/power".to_string(), i.to_string())).collect();
        assert_eq!(received, expected);
    }
}
