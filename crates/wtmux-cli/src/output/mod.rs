//! Output formatting utilities for the CLI
//!
//! Renders demo reports as tables and prints colored status lines.

use tabled::{settings::Style, Table, Tabled};

use crate::commands::{DemoReport, Direction, StreamOutcome};

/// Format stream outcomes as an ASCII table
///
/// Returns "No streams opened" if the list is empty.
pub fn format_streams(streams: &[StreamOutcome]) -> String {
    if streams.is_empty() {
        return "No streams opened".to_string();
    }

    #[derive(Tabled)]
    struct StreamRow {
        #[tabled(rename = "STREAM")]
        id: String,
        #[tabled(rename = "KIND")]
        kind: &'static str,
        #[tabled(rename = "SENT")]
        sent: usize,
        #[tabled(rename = "RESULT")]
        result: String,
    }

    let rows: Vec<StreamRow> = streams
        .iter()
        .map(|s| StreamRow {
            id: s.stream_id.to_string(),
            kind: match s.direction {
                Direction::Bidirectional => "bidi",
                Direction::Unidirectional => "uni",
            },
            sent: s.sent,
            result: match &s.result {
                Ok(len) => format!("{} bytes", len),
                Err(reason) => truncate(reason, 48),
            },
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format a demo report as a human-readable summary
pub fn format_report(report: &DemoReport) -> String {
    let mut output = String::new();
    output.push_str(&format!("Session: {}\n", report.session_id));
    output.push_str(&format!(
        "Delivered: {}/{}\n",
        report.delivered(),
        report.streams.len()
    ));
    output.push_str(&format!("Peer saw: {}\n\n", report.peer_close));
    output.push_str(&format_streams(&report.streams));
    output
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow
///
/// Outputs to stderr.
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
