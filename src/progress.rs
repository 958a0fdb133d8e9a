//! Progress reporting for apply runs

use colored::Colorize;
use converge::{ChangeRecord, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over the assertion sweep
pub struct ApplyProgress {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl ApplyProgress {
    pub fn new(quiet: bool) -> Self {
        Self { bar: None, quiet }
    }

    fn println(&self, msg: String) {
        if self.quiet {
            return;
        }
        match &self.bar {
            Some(bar) => bar.println(msg),
            None => println!("{}", msg),
        }
    }
}

impl ProgressCallback for ApplyProgress {
    fn on_run_start(&mut self, count: usize) {
        if self.quiet {
            return;
        }
        let bar = ProgressBar::new(count as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:30.cyan/dim} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        self.bar = Some(bar);
    }

    fn on_assertion_start(&mut self, id: &str, _description: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(id.to_string());
        }
    }

    fn on_assertion_complete(&mut self, record: &ChangeRecord) {
        let line = if record.changed {
            format!("{} {} ({})", "±".yellow(), record.assertion, record.resource_type)
        } else {
            format!("{} {}", "✓".green(), record.assertion.dimmed())
        };
        self.println(line);
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    fn on_assertion_skipped(&mut self, id: &str, reason: &str) {
        self.println(format!("{} {} ({})", "-".dimmed(), id.dimmed(), reason.dimmed()));
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    fn on_handler(&mut self, name: &str) {
        self.println(format!("{} handler: {}", "↻".blue(), name));
    }

    fn on_run_complete(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
