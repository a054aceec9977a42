use eframe::egui::{Color32, Frame, Stroke};

/// Dark panel palette plus the switch colors
pub struct UiColors;

impl UiColors {
    pub const MAIN_BG: Color32 = Color32::from_rgb(30, 30, 30);

    pub const INNER_BG: Color32 = Color32::from_rgb(25, 25, 25);

    pub const BORDER: Color32 = Color32::from_rgb(60, 60, 60);

    /// Switch on / broker connected
    pub const ACTIVE: Color32 = Color32::from_rgb(0, 255, 0);

    /// Switch off / broker disconnected
    pub const INACTIVE: Color32 = Color32::from_rgb(237, 47, 33);

    /// Lockin in progress
    pub const PENDING: Color32 = Color32::from_rgb(230, 180, 30);
}

pub fn create_frame(bg_color: Color32, border_color: Color32) -> Frame {
    Frame::new()
        .stroke(Stroke::new(1.0, border_color))
        .fill(bg_color)
        .inner_margin(4)
        .outer_margin(2)
}
