use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::InboundMessage;

/// How long the message loop blocks on the connection before checking for a stop request
const LOOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Pause between automatic reconnects of a running message loop
const LOOP_RECONNECT_PAUSE: Duration = Duration::from_millis(500);
/// How long a stopping loop may take to flush the DISCONNECT on its own
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Broker connection is closing")]
    NotConnected,
}

/// Publishing half of a broker connection
///
/// Kept by the UI thread while the connection itself is owned by the
/// reconnect worker or the message loop.
pub trait Publish: Send {
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), LinkError>;
}

/// Broker connection handle driven by the reconnect worker
pub trait PublishClient: Send {
    /// One blocking connect attempt, `true` once the broker accepted the session
    fn connect_attempt(&mut self) -> bool;

    /// Hands the live connection to the inbound message loop
    fn start_message_loop(&mut self);

    fn stop_message_loop(&mut self);

    fn disconnect(&mut self);

    fn publisher(&self) -> Box<dyn Publish>;

    fn state(&self) -> ConnectionState;
}

/// Cloneable publisher backed by the rumqttc request channel
///
/// Refuses to queue anything once the link asked for a disconnect.
#[derive(Clone)]
pub struct MqttPublisher {
    client: Client,
    closing: CancellationToken,
}

impl Publish for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), LinkError> {
        if self.closing.is_cancelled() {
            return Err(LinkError::NotConnected);
        }
        self.client.try_publish(topic, qos, false, payload)?;
        Ok(())
    }
}

struct MessageLoop {
    stop: CancellationToken,
    handle: thread::JoinHandle<()>,
}

/// rumqttc-backed [`PublishClient`]
///
/// The connection stays inside the link until the message loop starts; from
/// then on it lives on the loop thread, which also re-subscribes after the
/// event loop reconnects on its own. Stopping the loop always goes through
/// an MQTT DISCONNECT that the loop flushes before it exits.
pub struct MqttLink {
    config: MqttConfig,
    client: Client,
    connection: Option<Connection>,
    inbound: mpsc::Sender<InboundMessage>,
    state: Arc<watch::Sender<ConnectionState>>,
    closing: CancellationToken,
    message_loop: Option<MessageLoop>,
}

impl MqttLink {
    pub fn new(config: MqttConfig, inbound: mpsc::Sender<InboundMessage>) -> Self {
        let mut mqtt_options = MqttOptions::new(
            config.client_id.clone(),
            config.broker.host.clone(),
            config.broker.port,
        );
        mqtt_options.set_keep_alive(config.keep_alive);

        let (client, connection) = Client::new(mqtt_options, config.request_capacity);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        debug!(
            "Created MQTT link {} -> {} with {} subscriptions",
            config.client_id,
            config.broker,
            config.subbed_topics.len()
        );

        MqttLink {
            config,
            client,
            connection: Some(connection),
            inbound,
            state: Arc::new(state),
            closing: CancellationToken::new(),
            message_loop: None,
        }
    }

    /// Queues a single DISCONNECT; later calls are no-ops
    fn request_disconnect(&mut self) {
        if self.closing.is_cancelled() {
            return;
        }
        self.closing.cancel();
        match self.client.try_disconnect() {
            Ok(()) => debug!("Disconnect requested from {}", self.config.broker),
            Err(e) => warn!("Failed to request disconnect: {}", e),
        }
    }
}

impl PublishClient for MqttLink {
    fn connect_attempt(&mut self) -> bool {
        let Some(connection) = self.connection.as_mut() else {
            warn!("Connect attempt while the message loop owns the connection");
            return false;
        };

        self.state.send_replace(ConnectionState::Connecting);
        match connection.recv_timeout(self.config.connect_timeout) {
            Ok(Ok(Event::Incoming(Packet::ConnAck(ack))))
                if ack.code == ConnectReturnCode::Success =>
            {
                info!("Connected to broker {}", self.config.broker);
                self.state.send_replace(ConnectionState::Connected);
                subscribe_all(&self.client, &self.config.subbed_topics);
                true
            }
            Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                warn!("Broker {} refused the session: {:?}", self.config.broker, ack.code);
                self.state.send_replace(ConnectionState::Disconnected);
                false
            }
            Ok(Ok(event)) => {
                debug!("Ignoring event before ConnAck: {:?}", event);
                false
            }
            Ok(Err(e)) => {
                debug!("Connect attempt to {} failed: {}", self.config.broker, e);
                self.state.send_replace(ConnectionState::Disconnected);
                false
            }
            Err(e) => {
                debug!("Connect attempt to {} timed out: {:?}", self.config.broker, e);
                self.state.send_replace(ConnectionState::Disconnected);
                false
            }
        }
    }

    fn start_message_loop(&mut self) {
        let Some(connection) = self.connection.take() else {
            warn!("Message loop already running");
            return;
        };

        let stop = CancellationToken::new();
        let message_loop = MessageLoopContext {
            client: self.client.clone(),
            topics: self.config.subbed_topics.clone(),
            reconnect_timeout: self.config.connect_timeout,
            inbound: self.inbound.clone(),
            state: self.state.clone(),
            stop: stop.clone(),
        };

        let spawned = thread::Builder::new()
            .name("mqtt-message-loop".to_string())
            .spawn(move || message_loop.run(connection));

        match spawned {
            Ok(handle) => {
                info!("MQTT message loop started");
                self.message_loop = Some(MessageLoop { stop, handle });
            }
            Err(e) => {
                error!("Failed to spawn MQTT message loop: {}", e);
                self.state.send_replace(ConnectionState::Disconnected);
            }
        }
    }

    /// Lets the loop flush a DISCONNECT, then cancels it if it is still busy
    ///
    /// Both waits are bounded; a loop stuck in a reconnect is detached and
    /// exits on its own once its current poll returns.
    fn stop_message_loop(&mut self) {
        let Some(MessageLoop { stop, handle }) = self.message_loop.take() else {
            return;
        };
        self.request_disconnect();

        let handle = match join_within(handle, DISCONNECT_GRACE) {
            Ok(()) => {
                info!("MQTT message loop stopped");
                return;
            }
            Err(handle) => handle,
        };

        debug!("Message loop still busy after disconnect request, cancelling");
        stop.cancel();
        let limit = self.config.connect_timeout + LOOP_RECONNECT_PAUSE + LOOP_POLL_INTERVAL;
        match join_within(handle, limit) {
            Ok(()) => info!("MQTT message loop stopped"),
            Err(_) => warn!("MQTT message loop did not stop in time, detaching it"),
        }
    }

    fn disconnect(&mut self) {
        self.request_disconnect();
        self.state.send_replace(ConnectionState::Disconnected);
    }

    fn publisher(&self) -> Box<dyn Publish> {
        Box::new(MqttPublisher {
            client: self.client.clone(),
            closing: self.closing.clone(),
        })
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.stop_message_loop();
    }
}

fn subscribe_all(client: &Client, topics: &[(String, QoS)]) {
    for (topic, qos) in topics {
        match client.try_subscribe(topic.clone(), *qos) {
            Ok(()) => debug!("Subscribed to {} with {:?}", topic, qos),
            Err(e) => error!("Failed to subscribe to {}: {}", topic, e),
        }
    }
}

fn join_within(
    handle: thread::JoinHandle<()>,
    limit: Duration,
) -> Result<(), thread::JoinHandle<()>> {
    let deadline = Instant::now() + limit;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(handle);
        }
        thread::sleep(Duration::from_millis(10));
    }
    if handle.join().is_err() {
        error!("MQTT message loop panicked");
    }
    Ok(())
}

/// Everything the loop thread needs besides the connection itself
struct MessageLoopContext {
    client: Client,
    topics: Vec<(String, QoS)>,
    /// Poll bound while the event loop is re-establishing the session
    reconnect_timeout: Duration,
    inbound: mpsc::Sender<InboundMessage>,
    state: Arc<watch::Sender<ConnectionState>>,
    stop: CancellationToken,
}

impl MessageLoopContext {
    /// A reconnect (TCP connect, CONNECT, ConnAck) happens inside a single
    /// poll, so that poll must not be cut short by the idle interval.
    fn poll_timeout(&self) -> Duration {
        match *self.state.borrow() {
            ConnectionState::Connecting => self.reconnect_timeout,
            ConnectionState::Connected | ConnectionState::Disconnected => LOOP_POLL_INTERVAL,
        }
    }

    fn run(self, mut connection: Connection) {
        while !self.stop.is_cancelled() {
            match connection.recv_timeout(self.poll_timeout()) {
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    let msg = InboundMessage::from_topic(
                        publish.topic.clone(),
                        publish.payload.to_vec(),
                    );
                    debug!("Received {}", msg);
                    match self.inbound.try_send(msg) {
                        Ok(()) => {}
                        Err(TrySendError::Full(msg)) => {
                            warn!("Inbound queue full, dropping message on {}", msg.topic)
                        }
                        Err(TrySendError::Closed(_)) => {
                            warn!("Inbound receiver gone, leaving message loop");
                            break;
                        }
                    }
                }
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    info!("Reconnected to broker: {:?}", ack.code);
                    self.state.send_replace(ConnectionState::Connected);
                    subscribe_all(&self.client, &self.topics);
                }
                Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => {
                    info!("Disconnect sent, leaving message loop");
                    break;
                }
                Ok(Ok(event)) => debug!("MQTT event: {:?}", event),
                Ok(Err(e)) => {
                    if self.stop.is_cancelled() {
                        break;
                    }
                    warn!("MQTT connection error: {}", e);
                    self.state.send_replace(ConnectionState::Connecting);
                    thread::sleep(LOOP_RECONNECT_PAUSE);
                }
                Err(_) => {}
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::config::BrokerAddress;
    use crate::mqtt::testing::broker;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TOPIC: &str = "switchboard-1/out";

    fn link_to(
        port: u16,
        connect_timeout: Duration,
    ) -> (MqttLink, mpsc::Receiver<InboundMessage>) {
        let address = BrokerAddress {
            host: "127.0.0.1".to_string(),
            port,
        };
        let mut config = MqttConfig::new(address, vec![(TOPIC.to_string(), QoS::ExactlyOnce)]);
        config.connect_timeout = connect_timeout;
        let (tx, rx) = mpsc::channel(8);
        (MqttLink::new(config, tx), rx)
    }

    fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[test]
    fn accepted_connack_connects_and_subscribes() {
        let (listener, port) = broker::listen();
        let server = thread::spawn(move || {
            let mut stream = broker::accept(&listener);
            broker::handshake(&mut stream, &broker::CONNACK_ACCEPTED);
            let first = broker::read_packet(&mut stream).unwrap();
            (first, broker::headers_until_close(&mut stream))
        });

        let (mut link, _inbound) = link_to(port, Duration::from_secs(2));
        assert!(link.connect_attempt());
        assert_eq!(link.state(), ConnectionState::Connected);

        link.start_message_loop();
        link.disconnect();
        link.stop_message_loop();

        let ((header, body), rest) = server.join().unwrap();
        assert_eq!(header, broker::SUBSCRIBE);
        assert!(body.windows(TOPIC.len()).any(|w| w == TOPIC.as_bytes()));
        assert_eq!(rest.last(), Some(&broker::DISCONNECT));
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn refused_connack_fails_the_attempt() {
        let (listener, port) = broker::listen();
        let server = thread::spawn(move || {
            let mut stream = broker::accept(&listener);
            broker::handshake(&mut stream, &broker::CONNACK_NOT_AUTHORIZED);
        });

        let (mut link, _inbound) = link_to(port, Duration::from_secs(2));
        assert!(!link.connect_attempt());
        assert_eq!(link.state(), ConnectionState::Disconnected);
        server.join().unwrap();
    }

    #[test]
    fn silent_broker_times_out_the_attempt() {
        let (listener, port) = broker::listen();
        let server = thread::spawn(move || {
            let mut stream = broker::accept(&listener);
            let _ = broker::read_packet(&mut stream);
            thread::sleep(Duration::from_millis(800));
        });

        let (mut link, _inbound) = link_to(port, Duration::from_millis(200));
        let started = Instant::now();
        assert!(!link.connect_attempt());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(link.state(), ConnectionState::Disconnected);
        server.join().unwrap();
    }

    #[test]
    fn inbound_publish_reaches_the_channel() {
        let (listener, port) = broker::listen();
        let server = thread::spawn(move || {
            let mut stream = broker::accept(&listener);
            broker::handshake(&mut stream, &broker::CONNACK_ACCEPTED);
            let _subscribe = broker::read_packet(&mut stream);
            stream
                .write_all(&broker::publish_packet(TOPIC, &[0x08, 0x01]))
                .unwrap();
            broker::headers_until_close(&mut stream)
        });

        let (mut link, mut inbound) = link_to(port, Duration::from_secs(2));
        assert!(link.connect_attempt());
        link.start_message_loop();

        let mut received = None;
        assert!(wait_until(Duration::from_secs(3), || {
            received = inbound.try_recv().ok();
            received.is_some()
        }));
        let message = received.unwrap();
        assert_eq!(message.topic, TOPIC);
        assert_eq!(message.payload, vec![0x08, 0x01]);

        drop(link);
        assert_eq!(server.join().unwrap().last(), Some(&broker::DISCONNECT));
    }

    #[test]
    fn stopping_the_loop_still_sends_disconnect() {
        let (listener, port) = broker::listen();
        let server = thread::spawn(move || {
            let mut stream = broker::accept(&listener);
            broker::handshake(&mut stream, &broker::CONNACK_ACCEPTED);
            broker::headers_until_close(&mut stream)
        });

        let (mut link, _inbound) = link_to(port, Duration::from_secs(2));
        let publisher = link.publisher();
        assert!(link.connect_attempt());
        link.start_message_loop();

        link.stop_message_loop();
        link.disconnect();

        assert!(server.join().unwrap().contains(&broker::DISCONNECT));
        assert!(matches!(
            publisher.publish(TOPIC, vec![1], QoS::AtMostOnce),
            Err(LinkError::NotConnected)
        ));
    }

    #[test]
    fn reconnects_to_a_broker_with_a_slow_handshake() {
        let (listener, port) = broker::listen();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        let server = thread::spawn(move || {
            let mut first = broker::accept(&listener);
            broker::handshake(&mut first, &broker::CONNACK_ACCEPTED);
            counter.fetch_add(1, Ordering::SeqCst);
            let _subscribe = broker::read_packet(&mut first);
            thread::sleep(Duration::from_millis(300));
            drop(first);

            let mut second = broker::accept(&listener);
            let _connect = broker::read_packet(&mut second);
            thread::sleep(Duration::from_millis(300));
            second.write_all(&broker::CONNACK_ACCEPTED).unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            broker::headers_until_close(&mut second)
        });

        let (mut link, _inbound) = link_to(port, Duration::from_secs(2));
        assert!(link.connect_attempt());
        link.start_message_loop();

        let reconnected = wait_until(Duration::from_secs(4), || {
            accepted.load(Ordering::SeqCst) == 2 && link.state() == ConnectionState::Connected
        });
        assert!(reconnected, "link stuck in {:?}", link.state());

        drop(link);
        let headers = server.join().unwrap();
        assert!(headers.contains(&broker::SUBSCRIBE));
        assert_eq!(headers.last(), Some(&broker::DISCONNECT));
    }
}
