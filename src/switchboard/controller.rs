//! State of one switchboard and the publish path for its changes
//!
//! Press/release/mode-change events run through [`next_state`], a pure
//! function, before the controller decides whether the bank changed and has
//! to be published. Remote feedback takes the silent path: it overwrites the
//! bank without publishing so that echoes never loop back onto the broker.

use chrono::{DateTime, Local};
use rumqttc::QoS;
use tracing::{debug, error, info, info_span, warn, Span};

use super::codec::{self, CodecError, EncodedBankValue, SwitchBank, SwitchState, SWITCH_COUNT};
use crate::mqtt::message_manager::{encode_envelope, Origin};
use crate::mqtt::mqtt_handler::{LinkError, Publish};

/// Delivery level for switch updates (MQTT QoS 2)
pub const PUBLISH_QOS: QoS = QoS::ExactlyOnce;

/// UI input for a single switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchEvent {
    Press,
    Release,
    /// Hold behaviour switched on (`true`) or off
    ModeChange(bool),
}

/// Resolves the next state of one switch
///
/// Latching switches flip on press and ignore release. Momentary (hold)
/// switches follow the button. Any mode change drops the switch to inactive.
pub fn next_state(current: SwitchState, hold: bool, event: SwitchEvent) -> SwitchState {
    match (event, hold) {
        (SwitchEvent::Press, true) => SwitchState::Active,
        (SwitchEvent::Release, true) => SwitchState::Inactive,
        (SwitchEvent::Press, false) => current.toggled(),
        (SwitchEvent::Release, false) => current,
        (SwitchEvent::ModeChange(_), _) => SwitchState::Inactive,
    }
}

/// Where a board publishes and how its envelopes are tagged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardIdentity {
    /// 1-based board number
    pub index: usize,
    pub origin: Origin,
}

impl BoardIdentity {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            origin: Origin::for_board(index),
        }
    }

    pub fn topic(&self) -> String {
        board_topic(self.index)
    }

    pub fn key(&self) -> String {
        board_key(self.index)
    }
}

pub fn board_topic(index: usize) -> String {
    format!("switchboard-{}/out", index)
}

pub fn board_key(index: usize) -> String {
    format!("sb_{}", index)
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Failed to publish switch state: {0}")]
    Publish(#[from] LinkError),

    #[error("No switchboard {0}")]
    UnknownBoard(usize),
}

/// Remote value observed on the board's topic, not yet shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedRemoteValue {
    pub value: EncodedBankValue,
    pub observed_at: DateTime<Local>,
}

pub struct SwitchBankController {
    identity: BoardIdentity,
    bank: SwitchBank,
    hold: [bool; SWITCH_COUNT],
    cached: Option<CachedRemoteValue>,
    span: Span,
}

impl SwitchBankController {
    pub fn new(identity: BoardIdentity) -> Self {
        let span = info_span!("board", key = %identity.key(), topic = %identity.topic());
        Self {
            identity,
            bank: SwitchBank::default(),
            hold: [false; SWITCH_COUNT],
            cached: None,
            span,
        }
    }

    pub fn identity(&self) -> &BoardIdentity {
        &self.identity
    }

    pub fn bank(&self) -> &SwitchBank {
        &self.bank
    }

    pub fn is_hold(&self, index: usize) -> bool {
        self.hold.get(index).copied().unwrap_or(false)
    }

    pub fn cached(&self) -> Option<CachedRemoteValue> {
        self.cached
    }

    /// Applies one UI event and publishes the whole bank if it changed
    ///
    /// Returns the published value, or `None` when the event left the bank
    /// untouched. On a publish failure the local state keeps the change.
    pub fn on_event(
        &mut self,
        index: usize,
        event: SwitchEvent,
        publisher: &dyn Publish,
    ) -> Result<Option<EncodedBankValue>, ControllerError> {
        let _entered = self.span.clone().entered();

        let current = self.bank.get(index)?;
        let hold = self.hold[index];
        if let SwitchEvent::ModeChange(new_hold) = event {
            self.hold[index] = new_hold;
            debug!("Switch {} hold behaviour set to {}", index, new_hold);
        }

        let next = next_state(current, hold, event);
        if next == current {
            return Ok(None);
        }
        self.bank.set(index, next)?;
        debug!("Switch {} {:?} -> {:?} on {:?}", index, current, next, event);

        self.publish(publisher).map(Some)
    }

    /// Encodes the full bank and sends it in the board's envelope
    pub fn publish(&self, publisher: &dyn Publish) -> Result<EncodedBankValue, ControllerError> {
        let value = codec::encode(&self.bank);
        let payload = encode_envelope(self.identity.origin, value);
        match publisher.publish(&self.identity.topic(), payload, PUBLISH_QOS) {
            Ok(()) => {
                info!(
                    parent: &self.span,
                    "Published {} ({} active)",
                    value,
                    self.bank.active_count()
                );
                Ok(value)
            }
            Err(e) => {
                error!(parent: &self.span, "Publishing {} failed: {}", value, e);
                Err(e.into())
            }
        }
    }

    /// Overwrites every switch from a remote value without publishing
    pub fn apply_remote_value(&mut self, value: EncodedBankValue) {
        let bank = codec::decode(value);
        if bank != self.bank {
            info!(parent: &self.span, "Applying remote state {} over {}", bank, self.bank);
        }
        self.bank = bank;
    }

    /// Remembers the last value seen on the wire until it is applied
    pub fn cache_remote_state(&mut self, value: EncodedBankValue, observed_at: DateTime<Local>) {
        debug!(parent: &self.span, "Caching remote state {}", value);
        self.cached = Some(CachedRemoteValue { value, observed_at });
    }

    /// Applies the cached remote value; `false` if nothing was observed yet
    pub fn apply_cached(&mut self) -> bool {
        match self.cached {
            Some(cached) => {
                self.apply_remote_value(cached.value);
                true
            }
            None => {
                warn!(parent: &self.span, "No cached state to apply");
                false
            }
        }
    }

    /// All switches inactive and latching again, nothing published
    pub fn reset(&mut self) {
        self.bank = SwitchBank::default();
        self.hold = [false; SWITCH_COUNT];
        debug!(parent: &self.span, "Board reset");
    }
}
