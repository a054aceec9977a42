//! # User Interface Module
//!
//! eframe application for the switchboard panel. The UI thread owns every
//! switch bank and the broker session; background work (reconnect worker,
//! MQTT message loop, persistence worker) reports back through channels that
//! are drained once per frame.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Broker [host] [port]  Lock in  Reset  Apply cached  Save ●│
//! ├──────────────────────────────────────────────────────────┤
//! │ sb_1   [0] [1] [2] [3]  [4]  [5]                          │
//! │        [6] [7] [8] [9] [10] [11]                          │
//! │ sb_2   ...                                                │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod common;
pub mod switch_widget;

use std::time::Duration;

use eframe::egui::{self, Button, RichText, ScrollArea, TextEdit, Ui, Vec2};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use self::common::{create_frame, UiColors};
use self::switch_widget::SwitchWidget;
use crate::mqtt::config::{BrokerAddress, MqttConfig};
use crate::mqtt::message_manager::InboundMessage;
use crate::mqtt::mqtt_handler::{ConnectionState, MqttLink, PublishClient};
use crate::mqtt::session::{BrokerSession, ClientFactory, SessionPhase};
use crate::persistence::persistence_worker::ConfigAction;
use crate::persistence::SwitchboardConfig;
use crate::switchboard::codec::SWITCH_COUNT;
use crate::switchboard::registry::BoardRegistry;

const REPAINT_INTERVAL: Duration = Duration::from_millis(100);
const SWITCHES_PER_ROW: usize = SWITCH_COUNT / 2;

pub struct SwitchboardApp {
    registry: BoardRegistry,
    widgets: Vec<[SwitchWidget; SWITCH_COUNT]>,
    session: BrokerSession,
    inbound: mpsc::Receiver<InboundMessage>,

    host: String,
    port: String,
    status: String,

    config_sender: mpsc::Sender<ConfigAction>,
    pending_save: Option<oneshot::Receiver<color_eyre::Result<()>>>,
}

impl SwitchboardApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        config: &SwitchboardConfig,
        config_sender: mpsc::Sender<ConfigAction>,
    ) -> Self {
        cc.egui_ctx.set_theme(egui::Theme::Dark);

        let registry = BoardRegistry::from_layout(&config.layout());
        let (inbound_tx, inbound) = mpsc::channel::<InboundMessage>(100);
        let subscriptions = registry.subscriptions();
        let factory: ClientFactory = Box::new(move |address: &BrokerAddress| {
            let config = MqttConfig::new(address.clone(), subscriptions.clone());
            Box::new(MqttLink::new(config, inbound_tx.clone())) as Box<dyn PublishClient>
        });
        let session = BrokerSession::new(factory, MqttConfig::default().reconnect);

        Self {
            widgets: vec![Default::default(); registry.len()],
            registry,
            session,
            inbound,
            host: config.broker.host.clone(),
            port: config.broker.port.to_string(),
            status: String::new(),
            config_sender,
            pending_save: None,
        }
    }

    fn drain_inbound(&mut self) {
        loop {
            match self.inbound.try_recv() {
                Ok(message) => self.registry.handle_inbound(&message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("Inbound channel closed");
                    break;
                }
            }
        }
    }

    fn poll_session(&mut self) {
        if let Some(outcome) = self.session.poll() {
            self.status = if outcome.success() {
                "Connected".to_string()
            } else {
                "Connect loop cancelled".to_string()
            };
        }
    }

    fn poll_save(&mut self) {
        let Some(rx) = self.pending_save.as_mut() else {
            return;
        };
        match rx.try_recv() {
            Ok(Ok(())) => {
                self.status = "Switch names saved".to_string();
                self.pending_save = None;
            }
            Ok(Err(e)) => {
                error!("Failed to save config: {:#}", e);
                self.status = "Saving switch names failed".to_string();
                self.pending_save = None;
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
            Err(oneshot::error::TryRecvError::Closed) => {
                error!("Persistence worker dropped the save request");
                self.pending_save = None;
            }
        }
    }

    fn broker_address(&self) -> Option<BrokerAddress> {
        let host = self.host.trim();
        if host.is_empty() {
            warn!("Broker host is empty");
            return None;
        }
        match self.port.trim().parse::<u16>() {
            Ok(port) => Some(BrokerAddress {
                host: host.to_string(),
                port,
            }),
            Err(e) => {
                warn!("Invalid broker port {:?}: {}", self.port, e);
                None
            }
        }
    }

    fn on_lock_in(&mut self) {
        let Some(address) = self.broker_address() else {
            self.status = "Invalid broker address".to_string();
            return;
        };
        match self.session.lock_in(address) {
            Ok(()) => self.status = "Connecting...".to_string(),
            Err(e) => {
                warn!("{}", e);
                self.status = e.to_string();
            }
        }
    }

    fn on_reset(&mut self) {
        self.session.reset();
        self.registry.reset_all();
        self.widgets.iter_mut().flatten().for_each(SwitchWidget::clear);
        self.status = "Reset".to_string();
    }

    fn on_save_names(&mut self) {
        let broker = self.broker_address().unwrap_or_default();
        let config = SwitchboardConfig::from_names(broker, self.registry.names_snapshot());
        let (response_tx, response_rx) = oneshot::channel();

        match self.config_sender.try_send(ConfigAction::Save {
            config,
            response_tx,
        }) {
            Ok(()) => self.pending_save = Some(response_rx),
            Err(TrySendError::Full(_)) => warn!("Persistence worker busy, save skipped"),
            Err(TrySendError::Closed(_)) => error!("Persistence worker is gone"),
        }
    }

    fn toolbar(&mut self, ui: &mut Ui) {
        let phase_idle = self.session.phase() == SessionPhase::Idle;

        ui.horizontal(|ui| {
            ui.heading("Broker");
            ui.add_enabled(
                phase_idle,
                TextEdit::singleline(&mut self.host).desired_width(160.0),
            );
            ui.add_enabled(
                phase_idle,
                TextEdit::singleline(&mut self.port).desired_width(60.0),
            );

            if ui.add_enabled(phase_idle, Button::new("Lock in")).clicked() {
                self.on_lock_in();
            }
            if ui.add_enabled(!phase_idle, Button::new("Reset")).clicked() {
                self.on_reset();
            }
            if ui.button("Apply cached").clicked() {
                let applied = self.registry.apply_cached();
                self.status = format!("Applied cached state to {} board(s)", applied);
            }
            if ui
                .add_enabled(self.pending_save.is_none(), Button::new("Save names"))
                .clicked()
            {
                self.on_save_names();
            }

            let status_color = match self.session.connection_state() {
                ConnectionState::Connected => UiColors::ACTIVE,
                ConnectionState::Connecting => UiColors::PENDING,
                ConnectionState::Disconnected => UiColors::INACTIVE,
            };
            ui.colored_label(status_color, "\u{2B24}");
            if let Some(address) = self.session.address() {
                ui.label(address.to_string());
            }
            ui.label(&self.status);
        });
    }

    fn boards(&mut self, ui: &mut Ui) {
        let Self {
            registry,
            widgets,
            session,
            ..
        } = self;

        ScrollArea::vertical().show(ui, |ui| {
            for position in 0..registry.len() {
                let board = &mut registry.boards_mut()[position];
                let key = board.key();
                let mut events = Vec::new();

                create_frame(UiColors::INNER_BG, UiColors::BORDER).show(ui, |ui| {
                    ui.horizontal(|ui| {
                        ui.label(RichText::new(&key).size(30.0));
                        ui.vertical(|ui| {
                            for row in 0..SWITCH_COUNT / SWITCHES_PER_ROW {
                                ui.horizontal(|ui| {
                                    for i in row * SWITCHES_PER_ROW..(row + 1) * SWITCHES_PER_ROW {
                                        let state = match board.controller.bank().get(i) {
                                            Ok(state) => state,
                                            Err(_) => continue,
                                        };
                                        let hold = board.controller.is_hold(i);
                                        let emitted = widgets[position][i].show(
                                            ui,
                                            &mut board.names[i],
                                            state,
                                            hold,
                                            session.publisher().is_some(),
                                        );
                                        events.extend(emitted.into_iter().map(|event| (i, event)));
                                    }
                                });
                            }
                        });
                    });
                });

                let Some(publisher) = session.publisher() else {
                    continue;
                };
                for (switch, event) in events {
                    if let Err(e) = registry.on_event(position, switch, event, publisher) {
                        warn!("Switch {} on {}: {}", switch, key, e);
                    }
                }
            }
        });
    }
}

impl eframe::App for SwitchboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_inbound();
        self.poll_session();
        self.poll_save();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.ctx().request_repaint_after(REPAINT_INTERVAL);

            create_frame(UiColors::MAIN_BG, UiColors::BORDER).show(ui, |ui| {
                ui.set_min_size(Vec2::new(ui.available_width(), 0.0));
                self.toolbar(ui);
            });
            ui.add_space(4.0);
            self.boards(ui);
        });
    }
}

impl Drop for SwitchboardApp {
    fn drop(&mut self) {
        info!("Shutting down broker session");
        self.session.shutdown();
    }
}
