//! # MQTT Integration Module
//!
//! Carries switch states from the panel to the broker and feedback back.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs            - Broker address, client options, reconnect pacing
//! ├── message_manager.rs   - Protobuf envelope and inbound message type
//! ├── mqtt_handler.rs      - PublishClient contract and the rumqttc link
//! ├── reconnect_worker.rs  - Cancellable retry loop (statum state machine)
//! └── session.rs           - Lockin/reset lifecycle on the UI thread
//! ```
//!
//! ## Threading
//!
//! - **UI thread**: owns the [`session::BrokerSession`] and publishes through
//!   the client's cloneable publishing half
//! - **reconnect-worker**: one per lockin, owns the link until connected
//! - **mqtt-message-loop**: drives the rumqttc connection afterwards and
//!   forwards incoming publishes over an `mpsc` channel
//!
//! Nothing here blocks the UI thread: completion of a lockin is observed by
//! polling once per frame.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
pub mod reconnect_worker;
pub mod session;

#[cfg(test)]
pub mod testing;
