//! MQTT publisher
//!
//! Periodically reads every configured notification and publishes the value
//! plus read metadata as retained messages under `<prefix>/<id>/`.

use anyhow::{anyhow, Context};
use chrono::{Local, SecondsFormat};
use kamstrup_core::client::MeterClient;
use kamstrup_core::config::{MqttConfig, Notification};
use kamstrup_core::protocol::RegisterValue;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

const CLIENT_ID: &str = "kamstrup-meter-reader";
const READ_RETRIES: usize = 5;
const READ_BACKOFF: Duration = Duration::from_millis(1000);

/// Connect to the broker and start the publish loop in the background
pub async fn start_publisher(
    config: MqttConfig,
    clients: Arc<BTreeMap<String, MeterClient>>,
) -> anyhow::Result<()> {
    let mut options = MqttOptions::new(CLIENT_ID, config.host.clone(), config.port);
    if !config.user.is_empty() {
        options.set_credentials(config.user.clone(), config.pass.clone());
    }
    options.set_keep_alive(Duration::from_secs(30));

    let (mqtt, mut eventloop) = AsyncClient::new(options, 64);
    wait_for_connack(&mut eventloop)
        .await
        .with_context(|| format!("connecting to {}:{}", config.host, config.port))?;
    info!("Connected to MQTT broker {}:{}", config.host, config.port);

    tokio::spawn(drive_eventloop(eventloop));
    tokio::spawn(publish_loop(config, clients, mqtt));
    Ok(())
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> anyhow::Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => continue,
            Err(e) => return Err(anyhow!(e)),
        }
    }
}

/// Keep polling so rumqttc flushes publishes and reconnects after errors
async fn drive_eventloop(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(event) => debug!("MQTT event: {:?}", event),
            Err(e) => {
                error!("MQTT connection error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn publish_loop(
    config: MqttConfig,
    clients: Arc<BTreeMap<String, MeterClient>>,
    mqtt: AsyncClient,
) {
    let period = config.interval();
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        ticker.tick().await;

        for notification in &config.notifications {
            let Some(client) = clients.get(&notification.device).cloned() else {
                continue;
            };

            let register = notification.register;
            let (value, attempts) = match tokio::task::spawn_blocking(move || {
                client.read_register_with_retry(register, READ_RETRIES, READ_BACKOFF)
            })
            .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("read task for {} failed: {}", notification.id, e);
                    continue;
                }
            };

            let now = Local::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            for (topic, payload) in messages(&config, notification, &value, attempts, &now) {
                if let Err(e) = mqtt.publish(topic.clone(), QoS::AtMostOnce, true, payload).await {
                    warn!("unable to publish {}: {}", topic, e);
                }
            }

            match value {
                Ok(reading) => info!(
                    "Published value {:.4} to {}",
                    reading.value,
                    config.topic(&notification.id, "value")
                ),
                Err(e) => warn!("{}: read failed after {} attempt(s): {}", notification.id, attempts, e),
            }
        }
    }
}

/// Topic/payload pairs for one read outcome
fn messages(
    config: &MqttConfig,
    notification: &Notification,
    value: &RegisterValue,
    attempts: usize,
    now: &str,
) -> Vec<(String, String)> {
    let topic = |path: &str| config.topic(&notification.id, path);

    let mut out = vec![
        (topic("meta/latest-attempt-at"), now.to_string()),
        (topic("meta/read-attempts"), attempts.to_string()),
        (topic("meta/latest-attempt-errored"), value.is_err().to_string()),
    ];

    match value {
        Ok(reading) => {
            out.push((topic("value"), format!("{:.4}", reading.value)));
            out.push((topic("meta/latest-reading-at"), now.to_string()));
        }
        Err(e) => {
            out.push((topic("meta/latest-error"), e.to_string()));
            out.push((topic("meta/latest-error-at"), now.to_string()));
        }
    }

    out
}
