use chrono::{DateTime, Utc};

use super::schema::AuditEntry;

pub const EMPTY_AUDIT_LOG: &str = "No audit entries found for this process.";

const RULE: &str = "========================================";

/// Plain-text audit report. Entries are written in the order given.
pub fn render_report(process_id: &str, entries: &[AuditEntry], generated_at: DateTime<Utc>) -> String {
    if entries.is_empty() {
        return EMPTY_AUDIT_LOG.to_string();
    }

    let mut out = String::new();
    out.push_str("AUDIT LOG REPORT\n");
    out.push_str(&format!("Process ID: {}\n", process_id));
    out.push_str(&format!("Generated: {}\n", generated_at.format("%Y-%m-%d %H:%M:%S UTC")));
    out.push_str(&format!("Total Entries: {}\n", entries.len()));
    out.push_str(RULE);
    out.push_str("\n\n");

    for entry in entries {
        out.push_str(&format!(
            "[{}] {} by {}\n",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.action.label(),
            entry.actor
        ));
        out.push_str(&format!("  {}\n\n", entry.description));
    }

    out.push_str(RULE);
    out.push_str("\nEND OF AUDIT LOG\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_db::AuditAction;
    use chrono::TimeZone;

    #[test]
    fn test_empty_log_is_sentinel() {
        assert_eq!(render_report("p", &[], Utc::now()), EMPTY_AUDIT_LOG);
    }

    #[test]
    fn test_report_layout() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let entry = AuditEntry {
            id: "1-abc".into(),
            process_id: "p1".into(),
            action: AuditAction::SubmittedForReview,
            description: "Ready for sign-off".into(),
            actor: "Dana".into(),
            timestamp: at,
        };
        let report = render_report("p1", &[entry], at);
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "AUDIT LOG REPORT");
        assert_eq!(lines[1], "Process ID: p1");
        assert_eq!(lines[2], "Generated: 2024-05-01 09:30:00 UTC");
        assert_eq!(lines[3], "Total Entries: 1");
        assert!(report.contains("[2024-05-01 09:30:00 UTC] Submitted for Review by Dana\n  Ready for sign-off\n"));
        assert_eq!(lines.last(), Some(&"END OF AUDIT LOG"));
    }
}
