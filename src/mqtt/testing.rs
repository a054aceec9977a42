//! Hand-written fakes for the broker traits

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rumqttc::QoS;

use super::mqtt_handler::{ConnectionState, LinkError, Publish, PublishClient};

#[derive(Default)]
struct Counters {
    attempts: AtomicUsize,
    loop_starts: AtomicUsize,
    loop_stops: AtomicUsize,
    disconnects: AtomicUsize,
}

/// Read side of a [`ScriptedClient`], usable after the client moved away
#[derive(Clone, Default)]
pub struct ClientTally {
    counters: Arc<Counters>,
    published: Arc<Mutex<Vec<(String, Vec<u8>, QoS)>>>,
}

impl ClientTally {
    pub fn attempts(&self) -> usize {
        self.counters.attempts.load(Ordering::SeqCst)
    }

    pub fn loop_starts(&self) -> usize {
        self.counters.loop_starts.load(Ordering::SeqCst)
    }

    pub fn loop_stops(&self) -> usize {
        self.counters.loop_stops.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.counters.disconnects.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>, QoS)> {
        self.published.lock().unwrap().clone()
    }
}

/// Client whose connect attempts fail a fixed number of times
pub struct ScriptedClient {
    failures_left: Option<usize>,
    attempt_delay: Duration,
    state: ConnectionState,
    tally: ClientTally,
}

impl ScriptedClient {
    pub fn failing_times(failures: usize) -> (Self, ClientTally) {
        Self::build(Some(failures), Duration::ZERO)
    }

    pub fn never_connecting(attempt_delay: Duration) -> (Self, ClientTally) {
        Self::build(None, attempt_delay)
    }

    fn build(failures_left: Option<usize>, attempt_delay: Duration) -> (Self, ClientTally) {
        let tally = ClientTally::default();
        let client = ScriptedClient {
            failures_left,
            attempt_delay,
            state: ConnectionState::Disconnected,
            tally: tally.clone(),
        };
        (client, tally)
    }
}

impl PublishClient for ScriptedClient {
    fn connect_attempt(&mut self) -> bool {
        self.tally.counters.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.attempt_delay.is_zero() {
            thread::sleep(self.attempt_delay);
        }
        match self.failures_left.as_mut() {
            Some(0) => {
                self.state = ConnectionState::Connected;
                true
            }
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        }
    }

    fn start_message_loop(&mut self) {
        self.tally.counters.loop_starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop_message_loop(&mut self) {
        self.tally.counters.loop_stops.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnect(&mut self) {
        self.tally.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        self.state = ConnectionState::Disconnected;
    }

    fn publisher(&self) -> Box<dyn Publish> {
        Box::new(RecordingPublisher {
            published: self.tally.published.clone(),
            fail: false,
        })
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

/// Publisher that records every call
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<(String, Vec<u8>, QoS)>>>,
    fail: bool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        RecordingPublisher {
            fail: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>, QoS)> {
        self.published.lock().unwrap().clone()
    }
}

impl Publish for RecordingPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), LinkError> {
        if self.fail {
            return Err(LinkError::NotConnected);
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload, qos));
        Ok(())
    }
}

/// Minimal MQTT 3.1.1 broker side over a plain TCP socket
pub mod broker {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Duration;

    pub const CONNECT: u8 = 0x10;
    pub const SUBSCRIBE: u8 = 0x82;
    pub const DISCONNECT: u8 = 0xe0;
    pub const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
    pub const CONNACK_NOT_AUTHORIZED: [u8; 4] = [0x20, 0x02, 0x00, 0x05];

    /// Listener on an ephemeral localhost port
    pub fn listen() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    pub fn accept(listener: &TcpListener) -> TcpStream {
        let (stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream
    }

    /// Reads one control packet; `None` once the client closed the socket
    pub fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).ok()?;
        let header = byte[0];

        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            stream.read_exact(&mut byte).ok()?;
            remaining |= usize::from(byte[0] & 0x7f) << shift;
            if byte[0] & 0x80 == 0 {
                break;
            }
            shift += 7;
        }

        let mut body = vec![0u8; remaining];
        stream.read_exact(&mut body).ok()?;
        Some((header, body))
    }

    /// Reads the client's CONNECT and answers with `connack`
    pub fn handshake(stream: &mut TcpStream, connack: &[u8]) {
        let (header, _) = read_packet(stream).unwrap();
        assert_eq!(header, CONNECT);
        stream.write_all(connack).unwrap();
    }

    /// Headers of every packet until DISCONNECT or the socket closes
    pub fn headers_until_close(stream: &mut TcpStream) -> Vec<u8> {
        let mut headers = Vec::new();
        while let Some((header, _)) = read_packet(stream) {
            headers.push(header);
            if header == DISCONNECT {
                break;
            }
        }
        headers
    }

    /// QoS 0 PUBLISH from broker to client
    pub fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
        body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        body.extend_from_slice(topic.as_bytes());
        body.extend_from_slice(payload);

        let mut packet = vec![0x30];
        let mut remaining = body.len();
        loop {
            let mut byte = (remaining % 128) as u8;
            remaining /= 128;
            if remaining > 0 {
                byte |= 0x80;
            }
            packet.push(byte);
            if remaining == 0 {
                break;
            }
        }
        packet.extend_from_slice(&body);
        packet
    }
}
