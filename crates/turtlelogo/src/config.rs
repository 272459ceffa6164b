use crate::io::MAX_HISTORY_LINES;

pub const WIN_WIDTH: u32 = 800;
pub const WIN_HEIGHT: u32 = 600;

/// Startup settings for a session.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub win_width: u32,
    pub win_height: u32,
    /// Console only when false: turtle commands fail.
    pub graphics: bool,
    pub show_window: bool,
    /// Indent procedure listings between LABEL and GO.
    pub indent_labels: bool,
    /// Procedure file loaded on start and on every restart.
    pub load_file: Option<String>,
    /// Code run on start and on every restart.
    pub run_text: Option<String>,
    pub history_lines: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            win_width: WIN_WIDTH,
            win_height: WIN_HEIGHT,
            graphics: true,
            show_window: true,
            indent_labels: false,
            load_file: None,
            run_text: None,
            history_lines: MAX_HISTORY_LINES,
        }
    }
}
