//! Terminal output helpers.

use chrono::{DateTime, Local, Utc};

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{message}");
}

/// Print an error and, when one applies, what the user can do about it.
pub fn print_error(error: &anyhow::Error) {
    eprintln!("Error: {error:#}");
    if let Some(hint) = error
        .downcast_ref::<o365mail_core::Error>()
        .and_then(|e| e.remediation().hint())
    {
        eprintln!("Hint: {hint}");
    }
}

/// Print a labelled row.
pub fn print_row(label: &str, value: &str) {
    println!("  {:<18} {}", format!("{label}:"), value);
}

/// Print a divider line.
pub fn print_divider() {
    println!("{}", "-".repeat(50));
}

/// Print a heading.
pub fn print_heading(text: &str) {
    println!("\n{text}");
    print_divider();
}

/// Local wall-clock rendering of a timestamp.
pub fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `1h 5m`, `12m` or `45s`; never negative.
pub fn format_remaining(remaining: chrono::Duration) -> String {
    let secs = remaining.num_seconds().max(0);
    let (hours, minutes) = (secs / 3600, (secs % 3600) / 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{secs}s")
    }
}
