//! # Persistence Module
//!
//! ## Why This Module Exists
//! The panel keeps two things across restarts: the display names of every
//! switch and the broker address the operator used last. Both live in one
//! TOML file; this module defines its data model and turns whatever the file
//! contains into a complete board layout.
//!
//! ## Error Handling Strategy
//! Loading never prevents startup. Missing or malformed entries degrade to
//! defaults (`SW {i}` names, one board) and are reported through `tracing`.
//! File operations use `color_eyre` for context, in [`config_store`].
//!
//! ## Layout
//! - [`config_store`] - path resolution, async load/save
//! - [`persistence_worker`] - background task serving save requests from the UI

pub mod config_store;
pub mod persistence_worker;

use crate::mqtt::config::BrokerAddress;
use crate::switchboard::codec::SWITCH_COUNT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Names of one board as written in the file
///
/// Both the keyed form (`sw_0 = "Pump"`) and a plain array are accepted.
/// Anything else is kept so the file still parses, and replaced by defaults.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum BoardNames {
    Table(BTreeMap<String, String>),
    List(Vec<String>),
    Invalid(toml::Value),
}

/// Complete content of the configuration file
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub broker: BrokerAddress,
    #[serde(default)]
    pub switch_names: BTreeMap<String, BoardNames>,
}

/// Normalized board ready to be turned into a controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoardLayout {
    pub key: String,
    pub names: [String; SWITCH_COUNT],
}

pub fn default_names() -> [String; SWITCH_COUNT] {
    std::array::from_fn(|i| format!("SW {}", i))
}

/// Numeric suffix of keys like `sb_3` or `sw_11`
fn key_number(key: &str, prefix: &str) -> Option<usize> {
    key.strip_prefix(prefix)?.parse().ok()
}

fn complete_names(board: &str, names: Vec<String>) -> [String; SWITCH_COUNT] {
    if names.len() > SWITCH_COUNT {
        warn!(
            "Board {} lists {} names, ignoring all past {}",
            board,
            names.len(),
            SWITCH_COUNT
        );
    }
    std::array::from_fn(|i| match names.get(i) {
        Some(name) if !name.trim().is_empty() => name.clone(),
        _ => format!("SW {}", i),
    })
}

impl BoardNames {
    fn ordered(&self, board: &str) -> Vec<String> {
        match self {
            BoardNames::Table(table) => {
                let mut pairs = table
                    .iter()
                    .filter_map(|(key, name)| match key_number(key, "sw_") {
                        Some(number) => Some((number, name.clone())),
                        None => {
                            warn!("Ignoring switch key {} on board {}", key, board);
                            None
                        }
                    })
                    .collect::<Vec<_>>();
                pairs.sort_by_key(|(number, _)| *number);
                pairs.into_iter().map(|(_, name)| name).collect()
            }
            BoardNames::List(list) => list.clone(),
            BoardNames::Invalid(value) => {
                warn!(
                    "Names of board {} are neither a table nor a list ({}), using defaults",
                    board,
                    value.type_str()
                );
                Vec::new()
            }
        }
    }
}

impl SwitchboardConfig {
    /// Boards sorted by number with exactly 12 names each
    ///
    /// Falls back to a single default board when none is configured.
    pub fn layout(&self) -> Vec<BoardLayout> {
        let mut boards = self
            .switch_names
            .iter()
            .filter_map(|(key, names)| match key_number(key, "sb_") {
                Some(number) => Some((number, key, names)),
                None => {
                    warn!("Ignoring switchboard key {}", key);
                    None
                }
            })
            .collect::<Vec<_>>();
        boards.sort_by_key(|(number, _, _)| *number);

        let layout = boards
            .into_iter()
            .map(|(_, key, names)| BoardLayout {
                key: key.clone(),
                names: complete_names(key, names.ordered(key)),
            })
            .collect::<Vec<_>>();

        if layout.is_empty() {
            warn!("No switchboards defined in switch_names; defaulting to one board with 12 switches.");
            return vec![BoardLayout {
                key: "sb_1".to_string(),
                names: default_names(),
            }];
        }
        layout
    }

    /// Config as written by "save switch names"
    pub fn from_names(broker: BrokerAddress, names: BTreeMap<String, Vec<String>>) -> Self {
        let switch_names = names
            .into_iter()
            .map(|(board, names)| {
                let table = names
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| (format!("sw_{}", i), name))
                    .collect();
                (board, BoardNames::Table(table))
            })
            .collect();
        Self {
            broker,
            switch_names,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> SwitchboardConfig {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn empty_config_yields_one_default_board() {
        let layout = SwitchboardConfig::default().layout();
        assert_eq!(layout.len(), 1);
        assert_eq!(layout[0].key, "sb_1");
        assert_eq!(layout[0].names[11], "SW 11");
    }

    #[test]
    fn tables_are_sorted_numerically_and_blank_names_defaulted() {
        let config = parse(
            r#"
            [switch_names.sb_10]
            sw_0 = "Late"

            [switch_names.sb_2]
            sw_10 = "Ten"
            sw_2 = "Two"
            sw_0 = ""
            "#,
        );
        let layout = config.layout();
        assert_eq!(layout.iter().map(|b| b.key.as_str()).collect::<Vec<_>>(), ["sb_2", "sb_10"]);
        assert_eq!(layout[0].names[0], "SW 0");
        assert_eq!(layout[0].names[1], "Two");
        assert_eq!(layout[0].names[2], "Ten");
        assert_eq!(layout[0].names[3], "SW 3");
        assert_eq!(layout[1].names[0], "Late");
    }

    #[test]
    fn lists_and_invalid_entries_are_accepted() {
        let config = parse(
            r#"
            [broker]
            host = "broker.local"

            [switch_names]
            sb_1 = ["A", "", "C"]
            sb_2 = 42
            bogus = ["x"]
            "#,
        );
        assert_eq!(config.broker.host, "broker.local");
        assert_eq!(config.broker.port, 1883);

        let layout = config.layout();
        assert_eq!(layout.len(), 2);
        assert_eq!(layout[0].names[..3], ["A", "SW 1", "C"]);
        assert_eq!(layout[1].names, default_names());
    }

    #[test]
    fn long_lists_are_truncated() {
        let names = (0..15).map(|i| format!("N{}", i)).collect::<Vec<_>>();
        let config = SwitchboardConfig {
            switch_names: BTreeMap::from([("sb_1".to_string(), BoardNames::List(names))]),
            ..Default::default()
        };
        assert_eq!(config.layout()[0].names[11], "N11");
    }

    #[test]
    fn saved_names_load_back_as_the_same_layout() {
        let mut names = BTreeMap::new();
        names.insert("sb_1".to_string(), default_names().to_vec());
        names.get_mut("sb_1").unwrap()[11] = "Valve".to_string();

        let config = SwitchboardConfig::from_names(BrokerAddress::default(), names);
        let text = toml::to_string_pretty(&config).unwrap();
        let reloaded: SwitchboardConfig = toml::from_str(&text).unwrap();

        assert_eq!(reloaded.layout()[0].names[11], "Valve");
        assert_eq!(reloaded.layout()[0].names[10], "SW 10");
    }
}
