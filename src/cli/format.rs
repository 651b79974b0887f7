//! Output formatting for CLI display.

use crate::dispatch::RunSummary;

use super::status::StatusCounts;

/// Format a finished run for the terminal.
pub(super) fn format_summary(summary: &RunSummary) -> String {
    let mut lines = vec![
        format!("{} repositories in snapshot", summary.total),
        format!(
            "  {} already settled, {} duplicates",
            summary.skipped, summary.duplicates
        ),
        format!(
            "  {} submitted, {} persisted (peak {} in flight)",
            summary.submitted, summary.persisted, summary.peak_in_flight
        ),
    ];
    if summary.undone() > 0 {
        lines.push(format!(
            "  {} left undone ({} faulted, {} timed out); run again to retry",
            summary.undone(),
            summary.discarded,
            summary.requeued
        ));
    }
    lines.join("\n")
}

pub(super) fn format_status(total: usize, counts: &StatusCounts) -> String {
    let settled = counts.succeeded + counts.rejected + counts.failed;
    format!(
        "{settled}/{total} settled\n  \
         succeeded: {} ({} code lines)\n  \
         rejected:  {}\n  \
         failed:    {}\n  \
         undone:    {}",
        counts.succeeded, counts.code_lines, counts.rejected, counts.failed, counts.undone
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_run_has_no_undone_line() {
        let summary = RunSummary {
            total: 12,
            skipped: 2,
            duplicates: 0,
            submitted: 10,
            persisted: 10,
            peak_in_flight: 5,
            ..RunSummary::default()
        };
        assert_eq!(
            format_summary(&summary),
            "12 repositories in snapshot\n  \
             2 already settled, 0 duplicates\n  \
             10 submitted, 10 persisted (peak 5 in flight)"
        );
    }

    #[test]
    fn undone_work_is_called_out() {
        let summary = RunSummary {
            total: 4,
            submitted: 4,
            persisted: 1,
            discarded: 2,
            requeued: 1,
            peak_in_flight: 4,
            ..RunSummary::default()
        };
        assert!(
            format_summary(&summary)
                .ends_with("3 left undone (2 faulted, 1 timed out); run again to retry")
        );
    }

    #[test]
    fn status_lists_every_outcome() {
        let counts = StatusCounts {
            succeeded: 3,
            rejected: 1,
            failed: 2,
            undone: 4,
            code_lines: 1200,
        };
        let text = format_status(10, &counts);
        assert!(text.starts_with("6/10 settled"));
        assert!(text.contains("succeeded: 3 (1200 code lines)"));
        assert!(text.contains("undone:    4"));
    }
}
