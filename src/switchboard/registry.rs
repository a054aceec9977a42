//! All switchboards of the panel and routing of inbound feedback

use rumqttc::QoS;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::codec::{EncodedBankValue, SWITCH_COUNT};
use super::controller::{
    board_key, BoardIdentity, ControllerError, SwitchBankController, SwitchEvent, PUBLISH_QOS,
};
use crate::mqtt::message_manager::{decode_envelope, InboundMessage};
use crate::mqtt::mqtt_handler::Publish;
use crate::persistence::BoardLayout;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("Topic {0} is not a switchboard topic")]
    ForeignTopic(String),

    #[error("Received topic for unknown board: {0}")]
    UnknownBoard(String),
}

/// One board with its display names
pub struct Board {
    pub controller: SwitchBankController,
    pub names: Vec<String>,
}

impl Board {
    pub fn key(&self) -> String {
        self.controller.identity().key()
    }
}

pub struct BoardRegistry {
    boards: Vec<Board>,
}

impl BoardRegistry {
    /// Boards are numbered in layout order, starting at 1
    pub fn from_layout(layout: &[BoardLayout]) -> Self {
        let boards = layout
            .iter()
            .enumerate()
            .map(|(position, board)| {
                let number = position + 1;
                if board.key != board_key(number) {
                    debug!("Config entry {} becomes switchboard {}", board.key, number);
                }
                Board {
                    controller: SwitchBankController::new(BoardIdentity::new(number)),
                    names: board.names.to_vec(),
                }
            })
            .collect::<Vec<_>>();

        info!("Created {} switchboard(s)", boards.len());
        Self { boards }
    }

    pub fn boards(&self) -> &[Board] {
        &self.boards
    }

    pub fn boards_mut(&mut self) -> &mut [Board] {
        &mut self.boards
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    /// Topics the client subscribes to, one per board
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.boards
            .iter()
            .map(|board| (board.controller.identity().topic(), PUBLISH_QOS))
            .collect()
    }

    /// Forwards a UI event to the board at `position` (0-based)
    pub fn on_event(
        &mut self,
        position: usize,
        switch: usize,
        event: SwitchEvent,
        publisher: &dyn Publish,
    ) -> Result<Option<EncodedBankValue>, ControllerError> {
        let board = self
            .boards
            .get_mut(position)
            .ok_or(ControllerError::UnknownBoard(position + 1))?;
        board.controller.on_event(switch, event, publisher)
    }

    /// Resolves `switchboard-{N}/out` to the board's position
    pub fn route(&self, topic: &str) -> Result<usize, RouteError> {
        let number = topic
            .strip_prefix("switchboard-")
            .and_then(|rest| rest.strip_suffix("/out"))
            .and_then(|number| number.parse::<usize>().ok())
            .ok_or_else(|| RouteError::ForeignTopic(topic.to_string()))?;

        self.boards
            .iter()
            .position(|board| board.controller.identity().index == number)
            .ok_or_else(|| RouteError::UnknownBoard(topic.to_string()))
    }

    /// Caches the value carried by an inbound message; never publishes
    ///
    /// Anything that cannot be routed or decoded is logged and dropped.
    pub fn handle_inbound(&mut self, message: &InboundMessage) {
        let position = match self.route(&message.topic) {
            Ok(position) => position,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };

        let board = &mut self.boards[position];
        match decode_envelope(board.controller.identity().origin, &message.payload) {
            Ok(value) => board
                .controller
                .cache_remote_state(value, message.received_at),
            Err(e) => error!("Failed to parse message from {}: {}", message.topic, e),
        }
    }

    /// Caches a value for the board with key `sb_{N}`
    pub fn cache_remote_state(
        &mut self,
        board_key: &str,
        value: EncodedBankValue,
    ) -> Result<(), RouteError> {
        let board = self
            .boards
            .iter_mut()
            .find(|board| board.key() == board_key)
            .ok_or_else(|| RouteError::UnknownBoard(board_key.to_string()))?;
        board
            .controller
            .cache_remote_state(value, chrono::Local::now());
        Ok(())
    }

    /// Adopts every cached remote value; returns how many boards had one
    pub fn apply_cached(&mut self) -> usize {
        let mut applied = 0;
        for board in &mut self.boards {
            if board.controller.cached().is_some() && board.controller.apply_cached() {
                applied += 1;
            }
        }
        info!("Applied cached state to {} board(s)", applied);
        applied
    }

    pub fn reset_all(&mut self) {
        for board in &mut self.boards {
            board.controller.reset();
        }
        debug!("All boards reset");
    }

    /// Current names keyed `sb_{N}` → `sw_{i}` for saving
    pub fn names_snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.boards
            .iter()
            .map(|board| {
                let mut names = board.names.clone();
                names.resize(SWITCH_COUNT, String::new());
                (board_key(board.controller.identity().index), names)
            })
            .collect()
    }
}
