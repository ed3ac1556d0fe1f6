//! Global progress-bar / message output. The CLI hands `&PBAR` around
//! implicitly (a `pub static`) rather than threading a handle through every
//! command function, the same shape wasm-pack's `progressbar` module uses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

pub struct ProgressOutput {
    quiet: AtomicBool,
    bar: Mutex<Option<ProgressBar>>,
}

impl ProgressOutput {
    pub const fn new() -> Self {
        ProgressOutput { quiet: AtomicBool::new(false), bar: Mutex::new(None) }
    }

    pub fn set_quiet(&self, quiet: bool) {
        self.quiet.store(quiet, Ordering::SeqCst);
        if quiet {
            self.done();
        }
    }

    fn is_quiet(&self) -> bool {
        self.quiet.load(Ordering::SeqCst)
    }

    /// Starts (or restarts) a spinner carrying `message`.
    pub fn step(&self, emoji: console::Emoji, message: &str) {
        if self.is_quiet() {
            return;
        }
        self.done();
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.dim.bold} {msg}") {
            bar.set_style(style);
        }
        bar.set_message(format!("{}{}", emoji, message));
        bar.enable_steady_tick(Duration::from_millis(80));
        *self.bar.lock().unwrap() = Some(bar);
    }

    /// Prints a message above the running spinner, or straight to stderr
    /// when there is none.
    pub fn info(&self, message: &str) {
        if self.is_quiet() {
            return;
        }
        self.println(message.to_string());
    }

    pub fn warn(&self, message: &str) {
        if self.is_quiet() {
            return;
        }
        self.println(format!("{}: {}", style("warning").yellow().bold(), message));
    }

    /// Errors are printed even in quiet mode.
    pub fn error(&self, message: &str) {
        self.println(format!("{}: {}", style("error").red().bold(), message));
    }

    fn println(&self, text: String) {
        match self.bar.lock().unwrap().as_ref() {
            Some(bar) => bar.println(text),
            None => eprintln!("{}", text),
        }
    }

    /// Stops and clears the spinner, if one is running.
    pub fn done(&self) {
        if let Some(bar) = self.bar.lock().unwrap().take() {
            bar.finish_and_clear();
        }
    }
}

impl Default for ProgressOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_suppresses_info_and_step() {
        let pbar = ProgressOutput::new();
        pbar.set_quiet(true);
        pbar.info("should not panic");
        pbar.step(console::Emoji("x", ""), "should not panic");
        assert!(pbar.bar.lock().unwrap().is_none());
    }
}
