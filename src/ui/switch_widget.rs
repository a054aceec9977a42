//! Button, hold checkbox and name field of one switch
//!
//! egui reports a click only after release, so press and release are derived
//! from the pointer state of the button between two frames.

use eframe::egui::{vec2, Button, Checkbox, RichText, TextEdit, Ui};

use super::common::UiColors;
use crate::switchboard::codec::SwitchState;
use crate::switchboard::controller::SwitchEvent;

const BUTTON_SIZE: f32 = 64.0;

/// Per-switch UI memory that survives between frames
#[derive(Debug, Default, Clone)]
pub struct SwitchWidget {
    was_down: bool,
}

impl SwitchWidget {
    /// Renders the switch and returns the events produced this frame
    pub fn show(
        &mut self,
        ui: &mut Ui,
        name: &mut String,
        state: SwitchState,
        hold: bool,
        enabled: bool,
    ) -> Vec<SwitchEvent> {
        let mut events = Vec::new();

        ui.vertical(|ui| {
            ui.set_width(BUTTON_SIZE + 16.0);

            let fill = if state.is_active() {
                UiColors::ACTIVE
            } else {
                UiColors::INACTIVE
            };
            let button = Button::new(RichText::new(name.as_str()).strong())
                .fill(fill)
                .min_size(vec2(BUTTON_SIZE, BUTTON_SIZE));
            let response = ui.add_enabled(enabled, button);

            let down = enabled && response.is_pointer_button_down_on();
            match (self.was_down, down) {
                (false, true) => events.push(SwitchEvent::Press),
                (true, false) => events.push(SwitchEvent::Release),
                _ => {}
            }
            self.was_down = down;

            let mut new_hold = hold;
            if ui
                .add_enabled(enabled, Checkbox::new(&mut new_hold, "Hold behaviour"))
                .changed()
            {
                events.push(SwitchEvent::ModeChange(new_hold));
            }

            ui.add(TextEdit::singleline(name).desired_width(BUTTON_SIZE + 8.0));
        });

        events
    }

    /// Forgets a press still in progress, e.g. after the panel was disabled
    pub fn clear(&mut self) {
        self.was_down = false;
    }
}
