use std::fmt::Write;

use crate::models::MetricStatus;

/// `<user_id> <metric><flag>`, e.g. `42 peso1`.
pub fn format_line(status: &MetricStatus) -> String {
    format!(
        "{} {}{}",
        status.user_id,
        status.kind.label(),
        if status.overdue { '1' } else { '0' }
    )
}

pub fn render_text(statuses: &[MetricStatus]) -> String {
    let mut output = String::new();
    for status in statuses {
        let _ = writeln!(output, "{}", format_line(status));
    }
    output
}

/// One JSON object per line.
pub fn render_json(statuses: &[MetricStatus]) -> serde_json::Result<String> {
    let mut output = String::new();
    for status in statuses {
        output.push_str(&serde_json::to_string(status)?);
        output.push('\n');
    }
    Ok(output)
}
