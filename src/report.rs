//! Human-facing output: progress, confirmation prompts, and the final
//! report.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{ApplyReport, Confirm, ItemId, ItemReport, Outcome, ProgressSink};

/// Progress bar over the items of one run.
pub struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("  {spinner} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for BarSink {
    fn on_item_start(&self, id: &ItemId) {
        self.bar.set_message(id.to_string());
    }

    fn on_item_done(&self, id: &ItemId, outcome: &Outcome) {
        self.bar.set_message(format!("{} {id}", symbol(outcome)));
        self.bar.inc(1);
    }
}

/// Per-item confirmation through the terminal.
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, id: &ItemId, details: &str) -> anyhow::Result<bool> {
        println!();
        println!("  {}", id.to_string().bold());
        for line in details.lines() {
            println!("    {line}");
        }
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Fix {id}?"))
            .default(true)
            .interact()?;
        Ok(confirmed)
    }
}

fn symbol(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Correct => "○".dimmed().to_string(),
        Outcome::Fixed { .. } => "✓".green().to_string(),
        Outcome::WouldFix { .. } => "~".yellow().to_string(),
        Outcome::Failed { .. } => "✗".red().to_string(),
        Outcome::Skipped { .. } => "⊘".yellow().to_string(),
    }
}

/// Print the full apply report.
pub fn print_apply(node: &str, report: &ApplyReport, verbose: bool) {
    println!();
    for entry in &report.entries {
        let detail = match &entry.outcome {
            Outcome::Correct => {
                if !verbose {
                    continue;
                }
                String::new()
            }
            Outcome::Fixed { aspects } => format!("fixed {}", aspects.join(", ")).dimmed().to_string(),
            Outcome::WouldFix { aspects } => {
                format!("would fix: {}", aspects.join(", ")).dimmed().to_string()
            }
            Outcome::Failed { error } => error.red().to_string(),
            Outcome::Skipped { reason } => reason.to_string().dimmed().to_string(),
        };
        println!("  {} {:<40} {}", symbol(&entry.outcome), entry.id.to_string(), detail);
    }
    for action in &report.actions {
        if action.success {
            println!(
                "  {} {:<40} {}",
                "✓".green(),
                action.action,
                format!("triggered by {}", action.triggered_by).dimmed()
            );
        } else {
            println!(
                "  {} {:<40} {}",
                "✗".red(),
                action.action,
                action.error.as_deref().unwrap_or("failed").red()
            );
        }
    }

    let summary = &report.summary;
    println!();
    if summary.is_success() {
        println!("  {} {} converged", "✓".green().bold(), node.bold());
    } else {
        println!("  {} {} finished with errors", "✗".red().bold(), node.bold());
    }
    if summary.correct > 0 {
        println!("    • {} items already correct", summary.correct);
    }
    if summary.fixed > 0 {
        println!("    • {} items fixed", summary.fixed);
    }
    if summary.would_fix > 0 {
        println!("    • {} items would be fixed", summary.would_fix);
    }
    if summary.skipped > 0 {
        println!("    • {} items skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "items".red());
    }
}

/// Print the verify report in human form.
pub fn print_verify(node: &str, reports: &[ItemReport]) {
    println!();
    let mut incorrect = 0usize;
    for report in reports {
        if let Some(error) = &report.error {
            incorrect += 1;
            println!("  {} {:<40} {}", "✗".red(), report.id, error.red());
        } else if report.correct {
            println!("  {} {}", "○".dimmed(), report.id);
        } else {
            incorrect += 1;
            println!(
                "  {} {:<40} {}",
                "~".yellow(),
                report.id,
                format!("needs fixing: {}", report.needs_fixing.join(", ")).dimmed()
            );
        }
    }
    println!();
    if incorrect == 0 {
        println!("  {} {} matches its declared state", "✓".green().bold(), node.bold());
    } else {
        println!(
            "  {} {} has {} incorrect item(s)",
            "~".yellow().bold(),
            node.bold(),
            incorrect
        );
    }
}
