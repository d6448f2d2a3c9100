use super::MqttError;
use log::{error, warn};
use rumqttc::{ConnectionError, Event, EventLoop, Packet};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Linear retry: same delay between every attempt, optionally capped
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn gives_up_after(&self, attempts: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts >= max,
            None => false,
        }
    }
}

/// Anything that can re-establish its connection to the broker
pub trait Reconnect {
    type Error: Display;

    fn reconnect(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl Reconnect for EventLoop {
    type Error = ConnectionError;

    /* rumqttc connects on poll, we are back once the broker acknowledged */
    async fn reconnect(&mut self) -> Result<(), ConnectionError> {
        loop {
            if let Event::Incoming(Packet::ConnAck(_)) = self.poll().await? {
                return Ok(());
            }
        }
    }
}

/// Try to reconnect until it works or the policy runs out of attempts.
/// Returns the number of attempts that were needed.
pub async fn reconnect_with<T: Reconnect>(policy: &ReconnectPolicy, target: &mut T) -> Result<u32, MqttError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match target.reconnect().await {
            Ok(()) => return Ok(attempts),
            Err(e) => {
                if policy.gives_up_after(attempts) {
                    error!("Could not reconnect to the MQTT server after {} attempts: {}", attempts, e);
                    return Err(MqttError::ReconnectExhausted { attempts });
                }
                warn!(
                    "Could not reconnect to the MQTT server ({}). Trying again in {} seconds",
                    e,
                    policy.delay.as_secs()
                );
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
