use p1mqtt::{metering_p1::serial, Config, MqttManager, P1Manager, P1Processor};
use std::process::ExitCode;
use log::{error, info};

/* Everything that stops the bridge without being asked to */
const EXIT_FATAL: u8 = 99;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::load();

    // Initialize logging, the config may ask for debug output
    let default_filter = std::env::var("P1_LOG_LEVEL").unwrap_or(match &config {
        Ok(c) if c.debug => "debug".to_string(),
        _ => "info".to_string(),
    });
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("could not open/read config: {}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let references = match config.references() {
        Ok(r) => r,
        Err(e) => {
            error!("invalid OBIS configuration: {}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };
    info!("Configuration loaded with {} OBIS references", references.len());

    let (mut mqtt, tx, connection) = MqttManager::new(&config.mqtt);
    let mqtt_task = tokio::spawn(async move {
        mqtt.start_thread().await;
    });
    let mut connection_task = tokio::spawn(connection.start_thread());

    let lines = match serial::open_serial(&config.serial) {
        Ok(l) => l,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    let processor = P1Processor::new(references, &config.mqtt.topic_base);
    let mut p1 = P1Manager::new(tx, processor);

    let exit = tokio::select! {
        result = p1.start_thread(lines) => {
            if let Err(e) = result {
                error!("{}", e);
            }
            ExitCode::from(EXIT_FATAL)
        }
        result = &mut connection_task => {
            match result {
                Ok(Err(e)) => error!("{}", e),
                Ok(Ok(())) => error!("MQTT connection ended"),
                Err(e) => error!("MQTT connection task failed: {}", e),
            }
            ExitCode::from(EXIT_FATAL)
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            ExitCode::SUCCESS
        }
    };

    mqtt_task.abort();
    connection_task.abort();
    exit
}
