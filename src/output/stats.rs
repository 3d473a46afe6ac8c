//! Decision and status reporting.

use console::style;

use crate::sync::{CourseSnapshot, Decision, DialogPayload, PolicyDecision};

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Human-readable byte size with binary multiples, e.g. `110.0 MB`.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// One-line explanation of a policy decision.
pub fn describe_decision(decision: &PolicyDecision) -> &'static str {
    match decision {
        PolicyDecision::ProceedSilently => "Download started",
        PolicyDecision::Confirm(_) => "Large download, confirmation needed",
        PolicyDecision::WarnCellular(_) => "Not on Wi-Fi, download would use mobile data",
        PolicyDecision::BlockStorage(_) => "Not enough free storage",
        PolicyDecision::BlockWifiRequired(_) => "Downloads are set to Wi-Fi only",
        PolicyDecision::BlockNoConnection(_) => "No network connection",
        PolicyDecision::BlockFailedRetry(_) => "Download failed, retry available",
        PolicyDecision::ConfirmRemoval(_) => "Already downloaded, remove instead?",
    }
}

fn print_payload(payload: &DialogPayload) {
    for item in &payload.items {
        println!("  {:<40} {:>10}", item.title, format_size(item.size_bytes));
    }
    println!(
        "  {:<40} {:>10}",
        style("Total").bold(),
        style(format_size(payload.total_bytes)).bold()
    );
    if let Some(free) = payload.free_bytes {
        println!("  {:<40} {:>10}", "Free storage", style(format_size(free)).red());
    }
}

/// Print a request's decision and its dialog payload.
pub fn print_decision(decision: &Decision) {
    println!();
    println!(
        "{} {}",
        style(format!("[{}]", decision.decision)).bold(),
        describe_decision(&decision.decision)
    );
    if let Some(payload) = decision.decision.payload() {
        print_payload(payload);
    }
    if let Some(task) = &decision.task {
        println!(
            "  Queued {} block(s), {} skipped",
            task.accepted.len(),
            task.skipped.len()
        );
    }
    println!();
}

/// Print a course's rolled-up state and size accounting.
pub fn print_course_status(course_id: &str, snapshot: &CourseSnapshot) {
    let sizes = &snapshot.sizes;

    println!();
    println!("{}", style(format!("Course {}:", course_id)).bold());
    println!("  State:      {}", style(snapshot.state).cyan());
    println!("  Total:      {}", format_size(sizes.total_bytes));
    println!("  Downloaded: {}", format_size(sizes.downloaded_bytes));
    println!("  Remaining:  {}", format_size(sizes.remaining_bytes));
    println!("  Progress:   {:.0}%", sizes.progress * 100.0);

    if !sizes.largest.is_empty() {
        println!("  Largest downloads:");
        for download in &sizes.largest {
            println!(
                "    {:<38} {:>10}",
                download.title,
                format_size(download.size_bytes)
            );
        }
    }
}

/// Print the outcome of a download run.
pub fn print_summary(completed: usize, failed: usize, cancelled: usize) {
    println!(
        "Downloaded: {} ({} failed, {} cancelled)",
        style(completed).green(),
        style(failed).red(),
        style(cancelled).yellow()
    );
}
