//! Output formatting module

pub mod json;
pub mod reporter;
pub mod styles;

use console::Term;
use owo_colors::OwoColorize as _;
pub use reporter::TerminalReporter;
pub use styles::Styles;

use crate::domain::{ClusterState, RunReport, StatePair};

/// Output context carrying styling and terminal state.
pub struct OutputContext {
    /// Stylesheet for colored output.
    pub styles: Styles,
    /// Whether stdout is a TTY.
    pub is_tty: bool,
    /// Whether to suppress non-error output.
    pub quiet: bool,
}

impl OutputContext {
    /// Create output context based on CLI flags and environment.
    #[must_use]
    pub fn new(no_color: bool, quiet: bool) -> Self {
        let is_tty = Term::stdout().is_term();
        let use_colors = !no_color && is_tty && std::env::var("NO_COLOR").is_err();

        let mut styles = Styles::default();
        if use_colors {
            styles.colorize();
        }

        Self {
            styles,
            is_tty,
            quiet,
        }
    }

    /// Print a success message prefixed with `✓`. Suppressed when `quiet`.
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "✓".style(self.styles.success));
        }
    }

    /// Print a warning message prefixed with `⚠`. Suppressed when `quiet`.
    pub fn warn(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "⚠".style(self.styles.warning));
        }
    }

    /// Print an error message prefixed with `✗` to stderr. Never suppressed.
    pub fn error(&self, msg: &str) {
        eprintln!("  {} {msg}", "✗".style(self.styles.error));
    }

    /// Print a section header. Suppressed when `quiet`.
    pub fn header(&self, msg: &str) {
        if !self.quiet {
            println!("  {}", msg.style(self.styles.header));
        }
    }

    /// Print a key-value pair with the key dimmed. Suppressed when `quiet`.
    pub fn kv(&self, key: &str, value: &str) {
        if !self.quiet {
            println!("  {}  {value}", key.style(self.styles.dim));
        }
    }

    /// A cluster state, colored by how it compares to the desired state.
    #[must_use]
    pub fn state_label(&self, state: ClusterState, desired: ClusterState) -> String {
        let style = match state {
            ClusterState::Unknown => self.styles.warning,
            s if s == desired => self.styles.success,
            _ => self.styles.bold,
        };
        state.as_str().style(style).to_string()
    }

    /// Print an observed/desired pair. Always printed: it is the command's result.
    pub fn state_pair(&self, label: &str, pair: &StatePair) {
        println!(
            "  {:<8} cluster {} => desired {}",
            label.style(self.styles.dim),
            self.state_label(pair.observed, pair.desired),
            pair.desired.as_str().style(self.styles.bold),
        );
    }

    /// Print the end-of-run summary of `apply`.
    pub fn run_report(&self, report: &RunReport) {
        println!();
        self.state_pair("initial", &report.initial);
        self.state_pair("final", &report.final_state);
        if report.cancelled {
            self.warn("cancelled; no changes were made");
        }
        if report.bootstrapped {
            self.success("GitOps bootstrapped");
        }
        for failure in &report.profile_failures {
            self.error(&format!("profile {}: {}", failure.profile, failure.message));
        }
        let elapsed = report.finished_at - report.started_at;
        self.kv("elapsed", &format!("{}s", elapsed.num_seconds()));
    }
}
