//! [BrokerDialer] implementation on top of `rumqttc`.

use std::collections::VecDeque;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, NetworkOptions, Outgoing, Packet, QoS,
    SubscribeFilter, SubscribeReasonCode, Transport,
};
use tracing::debug;

use crate::{
    broker::{BrokerDialer, BrokerError, BrokerEvent, BrokerLink, SubscriptionGrant},
    config::{BrokerEndpoint, BrokerOptions, ConfigError},
    util::mask_password,
};

/// Capacity of the request channel between [AsyncClient] and [EventLoop].
const REQUEST_CAPACITY: usize = 10;

pub struct MqttDialer {
    options: BrokerOptions,
    endpoint: BrokerEndpoint,
}

impl MqttDialer {
    pub fn new(options: BrokerOptions) -> Result<Self, ConfigError> {
        let endpoint = options.endpoint()?;
        Ok(Self { options, endpoint })
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut mqtt = MqttOptions::new(
            self.options.client_id.clone(),
            self.endpoint.host.clone(),
            self.endpoint.port,
        );
        mqtt.set_keep_alive(self.options.keep_alive)
            .set_clean_session(self.options.clean_session);
        if self.endpoint.tls {
            mqtt.set_transport(Transport::tls_with_default_config());
        }
        mqtt
    }
}

impl BrokerDialer for MqttDialer {
    type Link = MqttLink;

    fn dial(&self) -> MqttLink {
        let (client, mut eventloop) = AsyncClient::new(self.mqtt_options(), REQUEST_CAPACITY);
        let mut network = NetworkOptions::new();
        network.set_connection_timeout(self.options.connect_timeout.as_secs());
        eventloop.set_network_options(network);
        MqttLink {
            client,
            eventloop,
            pending: VecDeque::new(),
        }
    }

    fn endpoint(&self) -> String {
        mask_password(&self.options.url)
    }
}

pub struct MqttLink {
    client: AsyncClient,
    eventloop: EventLoop,
    /// Topics of subscribe requests still waiting for their SUBACK.
    pending: VecDeque<Vec<String>>,
}

impl MqttLink {
    fn grants(&mut self, codes: Vec<SubscribeReasonCode>) -> Vec<SubscriptionGrant> {
        let topics = self.pending.pop_front().unwrap_or_default();
        topics
            .into_iter()
            .zip(codes)
            .map(|(topic, code)| SubscriptionGrant {
                topic,
                qos: match code {
                    SubscribeReasonCode::Success(qos) => Some(qos as u8),
                    SubscribeReasonCode::Failure => None,
                },
            })
            .collect()
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn poll(&mut self) -> Result<BrokerEvent, BrokerError> {
        let event = match self.eventloop.poll().await {
            Ok(event) => event,
            Err(e) => {
                // requests in flight die with the connection
                self.pending.clear();
                return Err(BrokerError::connection(e));
            }
        };
        let event = match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                debug!(session_present = ack.session_present, "CONNACK");
                BrokerEvent::Connected
            }
            Event::Incoming(Packet::Publish(publish)) => BrokerEvent::Publish {
                topic: publish.topic,
                payload: publish.payload,
            },
            Event::Incoming(Packet::SubAck(ack)) => {
                BrokerEvent::Subscribed(self.grants(ack.return_codes))
            }
            Event::Incoming(Packet::Disconnect) => BrokerEvent::Closed,
            _ => BrokerEvent::Other,
        };
        Ok(event)
    }

    async fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), QoS::AtMostOnce));
        // the request channel is only drained by `poll`, which is not
        // running while this is
        self.client
            .try_subscribe_many(filters)
            .map_err(BrokerError::subscribe)?;
        self.pending.push_back(topics.to_vec());
        Ok(())
    }

    fn can_resume(&self) -> bool {
        true
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        self.client
            .disconnect()
            .await
            .map_err(BrokerError::disconnect)?;
        // the request only leaves once the event loop is driven
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(BrokerError::disconnect(e)),
            }
        }
    }
}
