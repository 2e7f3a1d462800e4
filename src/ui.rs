//! Console status lines and spinners for the CLI binaries.

use std::fmt::Display;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

pub fn ok(msg: impl Display) {
    println!("{} {msg}", style("[OK]").green().bold());
}

pub fn info(msg: impl Display) {
    println!("{} {msg}", style("[INFO]").cyan().bold());
}

pub fn warn(msg: impl Display) {
    eprintln!("{} {msg}", style("[WARN]").yellow().bold());
}

pub fn error(msg: impl Display) {
    eprintln!("{} {msg}", style("[ERROR]").red().bold());
}

/// Spinner for a stage of unknown length. Hidden when stderr is not a terminal.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn start(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(s) = ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "])
            .template("{spinner:.green} {msg} {elapsed:.dim}")
        {
            bar.set_style(s);
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_message(message.into());
        Self { bar }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }

    /// Clear the spinner and print an `[OK]` line.
    pub fn done(self, msg: impl Display) {
        self.bar.finish_and_clear();
        ok(msg);
    }

    /// Clear the spinner and print an `[ERROR]` line.
    pub fn fail(self, msg: impl Display) {
        self.bar.finish_and_clear();
        error(msg);
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}
