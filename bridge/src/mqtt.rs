//! MQTT transport built on rumqttc.
//!
//! The event loop task owns the connection. Inbound publishes are handed to a
//! [`MessageBus`]; subscriptions are re-issued on every ConnAck because a
//! clean session forgets them. rumqttc reconnects on the next poll after an
//! error, so the loop only has to keep polling.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeFilter, SubscribeReasonCode, TlsConfiguration, Transport,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use wavenet_core::bus::validate_filter;
use wavenet_core::{BusMessage, MessageBus, Publisher, WavenetError};

use crate::config::MqttConfig;
use crate::Result;

/// WAV payloads are far larger than the rumqttc default packet limit
const MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;
const REQUEST_CHANNEL_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Subscribed,
}

impl ConnectionState {
    /// State after a successfully polled event.
    pub fn on_event(self, event: &Event) -> Self {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
                ConnectionState::Connected
            }
            Event::Incoming(Packet::ConnAck(_)) => ConnectionState::Disconnected,
            Event::Incoming(Packet::SubAck(_)) if self == ConnectionState::Connected => {
                ConnectionState::Subscribed
            }
            Event::Incoming(Packet::Disconnect) | Event::Outgoing(Outgoing::Disconnect) => {
                ConnectionState::Disconnected
            }
            _ => self,
        }
    }
}

/// Outbound side handed to the gateway
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, message: BusMessage) -> wavenet_core::Result<()> {
        debug!(target: "mqtt", topic = %message.topic, bytes = message.payload.len(), "Publishing");
        self.client
            .publish(message.topic, QoS::AtMostOnce, false, message.payload)
            .await
            .map_err(|e| WavenetError::Transport(e.to_string()))
    }
}

pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    filters: Vec<String>,
    state: watch::Sender<ConnectionState>,
}

impl MqttTransport {
    /// Build the client. Nothing connects until [`MqttTransport::run`] polls.
    pub fn new(cfg: &MqttConfig, filters: Vec<String>) -> Result<Self> {
        for filter in &filters {
            validate_filter(filter)?;
        }

        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.max(5)));
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some(username) = &cfg.username {
            options.set_credentials(username.clone(), cfg.password.clone().unwrap_or_default());
        }
        if cfg.tls {
            let transport = match &cfg.tls_ca_certs {
                Some(path) => Transport::Tls(TlsConfiguration::Simple {
                    ca: std::fs::read(path)?,
                    alpn: None,
                    client_auth: None,
                }),
                None => Transport::tls_with_default_config(),
            };
            options.set_transport(transport);
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        info!(target: "mqtt", host = %cfg.host, port = cfg.port, tls = cfg.tls, client_id = %cfg.client_id, "MQTT client configured");
        Ok(Self {
            client,
            eventloop,
            filters,
            state,
        })
    }

    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Poll the connection until `shutdown` flips to true, forwarding inbound
    /// publishes into `bus`. Disconnects cleanly on the way out.
    pub async fn run(mut self, bus: MessageBus, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = self.eventloop.poll() => match event {
                    Ok(event) => self.on_event(event, &bus).await,
                    Err(e) => {
                        if *self.state.borrow() != ConnectionState::Disconnected {
                            warn!(target: "mqtt", error = %e, "Connection lost; reconnecting");
                        } else {
                            debug!(target: "mqtt", error = %e, "Connect failed; retrying");
                        }
                        self.state.send_replace(ConnectionState::Disconnected);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        }
        self.disconnect().await;
    }

    async fn on_event(&mut self, event: Event, bus: &MessageBus) {
        let previous = *self.state.borrow();
        let next = previous.on_event(&event);
        if next != previous {
            debug!(target: "mqtt", from = ?previous, to = ?next, "Connection state");
            self.state.send_replace(next);
        }

        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    warn!(target: "mqtt", code = ?ack.code, "Broker refused connection");
                    return;
                }
                info!(target: "mqtt", session_present = ack.session_present, "Connected");
                self.subscribe_all();
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                let refused = ack
                    .return_codes
                    .iter()
                    .filter(|c| matches!(c, SubscribeReasonCode::Failure))
                    .count();
                if refused > 0 {
                    warn!(target: "mqtt", refused, "Broker refused subscriptions");
                } else {
                    info!(target: "mqtt", filters = ?self.filters, "Subscribed");
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let message = BusMessage::new(publish.topic, publish.payload.to_vec());
                bus.dispatch(message).await;
            }
            _ => {}
        }
    }

    fn subscribe_all(&self) {
        let filters = self
            .filters
            .iter()
            .map(|f| SubscribeFilter::new(f.clone(), QoS::AtMostOnce));
        // try_*: this runs inside the event loop, which is what drains the queue
        if let Err(e) = self.client.try_subscribe_many(filters) {
            warn!(target: "mqtt", error = %e, "Failed to queue subscriptions");
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!(target: "mqtt", error = %e, "Disconnect request failed");
            return;
        }
        let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            warn!(target: "mqtt", "Timed out flushing disconnect");
        }
        self.state.send_replace(ConnectionState::Disconnected);
        info!(target: "mqtt", "Disconnected");
    }
}
