//! Console printer with ANSI color support.

use serde::{Deserialize, Serialize};

/// Colors available for console output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterColor {
    Red,
    Green,
    Yellow,
    Blue,
    Cyan,
    BoldRed,
    BoldGreen,
    BoldYellow,
    BoldBlue,
    BoldCyan,
}

impl PrinterColor {
    fn ansi_code(&self) -> &'static str {
        match self {
            Self::Red => "\x1b[31m",
            Self::Green => "\x1b[32m",
            Self::Yellow => "\x1b[33m",
            Self::Blue => "\x1b[34m",
            Self::Cyan => "\x1b[36m",
            Self::BoldRed => "\x1b[1;31m",
            Self::BoldGreen => "\x1b[1;32m",
            Self::BoldYellow => "\x1b[1;33m",
            Self::BoldBlue => "\x1b[1;34m",
            Self::BoldCyan => "\x1b[1;36m",
        }
    }
}

const RESET: &str = "\x1b[0m";

/// Writes colored lines to stdout.
#[derive(Debug, Clone, Default)]
pub struct Printer;

impl Printer {
    /// Print a message in the given color, followed by a newline.
    pub fn print(&self, message: &str, color: PrinterColor) {
        println!("{}{}{}", color.ansi_code(), message, RESET);
    }

    /// Print a message without any coloring.
    pub fn print_plain(&self, message: &str) {
        println!("{}", message);
    }
}
