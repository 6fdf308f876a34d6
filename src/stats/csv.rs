use std::fmt::Write as _;
use std::path::Path;

use crate::stats::{RequesterStats, RunReport};

pub const CSV_HEADER: &str = "Title,Requests,Errors,avg Thread Duetime,Total RespSize,Avg RespSize,Requests/sec,Transfer/sec,Avg Req Time,Fastest Request,Slowest Request\n";

/// Generate CSV output from a RunReport, one row per step title.
pub fn generate_csv(report: &RunReport) -> String {
    let mut out = String::from(CSV_HEADER);
    for stats in &report.stats {
        out.push_str(&csv_row(stats, report.responders));
    }
    out
}

/// Write the CSV report, replacing any existing file.
pub fn write_csv(path: &Path, report: &RunReport) -> std::io::Result<()> {
    std::fs::write(path, generate_csv(report))
}

pub fn csv_row(stats: &RequesterStats, responders: usize) -> String {
    let mut row = format!("{},{},{},", stats.title, stats.num_requests, stats.num_errs);

    let Some(summary) = stats.summary(responders) else {
        row.push_str("0,0,0,0,0,0,0,0\n");
        return row;
    };

    let _ = writeln!(
        row,
        "{:?},{},{:.2},{:.2},{:.2},{:?},{:?},{:?}",
        summary.avg_thread_duration,
        stats.tot_resp_size,
        summary.avg_resp_size as f64,
        summary.req_rate,
        summary.bytes_rate,
        summary.avg_req_time,
        stats.min_request_time,
        stats.max_request_time
    );
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{StatsAggregator, TOTAL_TASK};
    use tokio::time::Duration;

    #[test]
    fn test_csv_generation() {
        let mut agg = StatsAggregator::new();

        let mut login = RequesterStats::new("login");
        login.record(Duration::from_millis(100), 300);
        login.record(Duration::from_millis(300), 500);
        login.record_error();
        agg.add(login);

        let mut total = RequesterStats::new(TOTAL_TASK);
        total.record(Duration::from_secs(2), 800);
        agg.add(total);

        let csv = generate_csv(&agg.into_report());
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(format!("{}\n", lines[0]), CSV_HEADER);
        assert_eq!(
            lines[1],
            "login,2,1,400ms,800,400.00,5.00,2000.00,200ms,100ms,300ms"
        );
        assert_eq!(
            lines[2],
            "total task,1,0,2s,800,800.00,0.50,400.00,2s,2s,2s"
        );
    }

    #[test]
    fn test_zero_request_row() {
        let mut broken = RequesterStats::new("broken");
        broken.record_error();
        broken.record_error();
        assert_eq!(csv_row(&broken, 3), "broken,0,2,0,0,0,0,0,0,0,0\n");
    }

    #[test]
    fn test_write_csv_truncates() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "stale contents that are longer than the report\n".repeat(20)).unwrap();

        let mut agg = StatsAggregator::new();
        agg.add(RequesterStats::new(TOTAL_TASK));
        let report = agg.into_report();
        write_csv(file.path(), &report).unwrap();

        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), generate_csv(&report));
    }

    #[test]
    fn test_every_row_has_eleven_columns() {
        let mut agg = StatsAggregator::new();
        agg.add(RequesterStats::new("empty"));
        let mut ok = RequesterStats::new("ok");
        ok.record(Duration::from_millis(5), 10);
        agg.add(ok);

        let csv = agg.into_report().to_csv();
        for line in csv.lines() {
            assert_eq!(line.split(',').count(), 11, "bad row: {}", line);
        }
    }
}
