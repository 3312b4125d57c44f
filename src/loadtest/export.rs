//! CSV export: one summary row per iteration.
//!
//! File layout (UTF-8, comma separated):
//!
//! ```text
//! PARAM,AVG_TIME,RUN,FAILED
//! 50,142ms,1,0
//! ```
//!
//! `RUN` counts executions per `PARAM` across invocations and is derived from
//! the rows already in the file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use super::metrics::IterationStats;
use crate::error::LoadTestError;

pub const CSV_HEADER: &str = "PARAM,AVG_TIME,RUN,FAILED";

/// One exported summary row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    /// Concurrency level of the run
    pub param: usize,
    pub avg_time_ms: u64,
    pub run: u64,
    pub failed: u8,
}

impl SummaryRow {
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{}ms,{},{}",
            self.param, self.avg_time_ms, self.run, self.failed
        )
    }
}

/// Next run index for `param`: one past the highest `RUN` among rows whose
/// `PARAM` matches, or 1 when there is none or the file cannot be read.
pub fn next_run_index(path: &Path, param: usize) -> u64 {
    let Ok(content) = fs::read_to_string(path) else {
        return 1;
    };

    let mut lines = content.lines();
    let Some(header) = lines.next() else {
        return 1;
    };
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    let (Some(param_idx), Some(run_idx)) = (
        columns.iter().position(|c| *c == "PARAM"),
        columns.iter().position(|c| *c == "RUN"),
    ) else {
        return 1;
    };

    let param = param.to_string();
    lines
        .map(|line| line.split(',').map(str::trim).collect::<Vec<_>>())
        .filter(|fields| fields.get(param_idx) == Some(&param.as_str()))
        .filter_map(|fields| fields.get(run_idx).and_then(|run| parse_run(run)))
        .max()
        .map(|max| max + 1)
        .unwrap_or(1)
}

/// Digits of a RUN cell; anything else in the cell is ignored
fn parse_run(cell: &str) -> Option<u64> {
    let digits: String = cell.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Append the summary row of one iteration to `path`, writing the header
/// first when the file is new or empty.
pub fn export_to_csv(
    path: &Path,
    concurrent_users: usize,
    stats: &IterationStats,
) -> Result<SummaryRow, LoadTestError> {
    let existing_len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let needs_header = existing_len == 0;

    let row = SummaryRow {
        param: concurrent_users,
        avg_time_ms: stats.avg_time_ms,
        run: next_run_index(path, concurrent_users),
        failed: stats.failed_flag(),
    };

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    let mut out = String::new();
    if needs_header {
        out.push_str(CSV_HEADER);
        out.push('\n');
    } else if !ends_with_newline(path)? {
        out.push('\n');
    }
    out.push_str(&row.to_csv_line());
    out.push('\n');

    file.write_all(out.as_bytes())?;

    tracing::debug!(
        output = %path.display(),
        param = row.param,
        run = row.run,
        "Appended summary row"
    );

    Ok(row)
}

fn ends_with_newline(path: &Path) -> std::io::Result<bool> {
    let content = fs::read(path)?;
    Ok(content.last().map(|b| *b == b'\n').unwrap_or(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::runner::RequestResult;
    use std::time::Duration;

    fn stats(ms: u64, failures: usize) -> IterationStats {
        let mut results = vec![RequestResult {
            user: "user1".to_string(),
            duration: Duration::from_millis(ms),
            success: true,
            post_count: 5,
            error: None,
        }];
        for _ in 0..failures {
            results.push(RequestResult {
                user: "user2".to_string(),
                duration: Duration::from_millis(1),
                success: false,
                post_count: 0,
                error: Some("boom".to_string()),
            });
        }
        IterationStats::from_results(&results, Duration::from_millis(ms))
    }

    #[test]
    fn test_empty_file_gets_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conc.csv");
        fs::write(&path, "").unwrap();

        export_to_csv(&path, 10, &stats(7, 1)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "PARAM,AVG_TIME,RUN,FAILED\n10,7ms,1,1\n");
    }

    #[test]
    fn test_fresh_file_gets_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conc.csv");

        let row = export_to_csv(&path, 50, &stats(142, 0)).unwrap();

        assert_eq!(row.run, 1);
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "PARAM,AVG_TIME,RUN,FAILED\n50,142ms,1,0\n");
    }

    #[test]
    fn test_run_index_per_param() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conc.csv");

        export_to_csv(&path, 10, &stats(100, 0)).unwrap();
        export_to_csv(&path, 50, &stats(200, 0)).unwrap();
        export_to_csv(&path, 10, &stats(110, 1)).unwrap();
        export_to_csv(&path, 50, &stats(210, 0)).unwrap();
        export_to_csv(&path, 10, &stats(120, 0)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "PARAM,AVG_TIME,RUN,FAILED",
                "10,100ms,1,0",
                "50,200ms,1,0",
                "10,110ms,2,1",
                "50,210ms,2,0",
                "10,120ms,3,0",
            ]
        );
        assert_eq!(content.matches(CSV_HEADER).count(), 1);
    }

    #[test]
    fn test_next_run_index_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_run_index(&dir.path().join("absent.csv"), 50), 1);
    }

    #[test]
    fn test_next_run_index_strips_non_digits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conc.csv");
        fs::write(
            &path,
            "PARAM,AVG_TIME,RUN,FAILED\r\n50,142ms,run 4,0\r\n50,150ms,2,0\r\n5,99ms,9,0\r\n",
        )
        .unwrap();

        assert_eq!(next_run_index(&path, 50), 5);
        assert_eq!(next_run_index(&path, 5), 10);
        assert_eq!(next_run_index(&path, 500), 1);
    }

    #[test]
    fn test_next_run_index_reordered_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conc.csv");
        fs::write(&path, "RUN,PARAM,AVG_TIME,FAILED\n3,50,10ms,0\n").unwrap();

        assert_eq!(next_run_index(&path, 50), 4);
    }

    #[test]
    fn test_next_run_index_without_header_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conc.csv");
        fs::write(&path, "a,b\n1,2\n").unwrap();

        assert_eq!(next_run_index(&path, 1), 1);
    }

    #[test]
    fn test_append_to_file_without_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conc.csv");
        fs::write(&path, "PARAM,AVG_TIME,RUN,FAILED\n50,142ms,1,0").unwrap();

        let row = export_to_csv(&path, 50, &stats(150, 0)).unwrap();

        assert_eq!(row.run, 2);
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "PARAM,AVG_TIME,RUN,FAILED\n50,142ms,1,0\n50,150ms,2,0\n"
        );
    }

    #[test]
    fn test_all_failed_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conc.csv");
        let results = vec![RequestResult {
            user: "user1".to_string(),
            duration: Duration::from_millis(30),
            success: false,
            post_count: 0,
            error: Some("unavailable".to_string()),
        }];
        let stats = IterationStats::from_results(&results, Duration::from_millis(30));

        let row = export_to_csv(&path, 1, &stats).unwrap();
        assert_eq!(row.to_csv_line(), "1,0ms,1,1");
    }

    #[test]
    fn test_export_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("conc.csv");

        let err = export_to_csv(&path, 1, &stats(10, 0)).unwrap_err();
        assert!(matches!(err, LoadTestError::Export(_)));
    }
}
