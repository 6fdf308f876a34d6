use std::collections::BTreeMap;
use std::fmt::Write as _;

use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::utils::ByteSize;

pub mod csv;

/// Title of the per-worker record that marks the worker as finished.
pub const TOTAL_TASK: &str = "total task";

/// Producer side of the stats pipeline.
pub type StatsSender = mpsc::UnboundedSender<RequesterStats>;
pub type StatsReceiver = mpsc::UnboundedReceiver<RequesterStats>;

pub fn stats_channel() -> (StatsSender, StatsReceiver) {
    mpsc::unbounded_channel()
}

/// Accumulated request statistics for one step title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequesterStats {
    pub title: String,
    pub num_requests: u64,
    pub num_errs: u64,
    pub tot_duration: Duration,
    /// `Duration::MAX` until the first request is recorded
    pub min_request_time: Duration,
    pub max_request_time: Duration,
    pub tot_resp_size: u64,
}

impl RequesterStats {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            num_requests: 0,
            num_errs: 0,
            tot_duration: Duration::ZERO,
            min_request_time: Duration::MAX,
            max_request_time: Duration::ZERO,
            tot_resp_size: 0,
        }
    }

    pub fn record(&mut self, duration: Duration, resp_size: u64) {
        self.num_requests += 1;
        self.tot_resp_size += resp_size;
        self.tot_duration += duration;
        self.min_request_time = self.min_request_time.min(duration);
        self.max_request_time = self.max_request_time.max(duration);
    }

    pub fn record_error(&mut self) {
        self.num_errs += 1;
    }

    /// Fold another accumulator into this one. Order of merges does not
    /// matter.
    pub fn merge(&mut self, other: &RequesterStats) {
        self.num_errs += other.num_errs;
        self.num_requests += other.num_requests;
        self.tot_resp_size += other.tot_resp_size;
        self.tot_duration += other.tot_duration;
        self.min_request_time = self.min_request_time.min(other.min_request_time);
        self.max_request_time = self.max_request_time.max(other.max_request_time);
    }

    pub fn is_total(&self) -> bool {
        self.title == TOTAL_TASK
    }

    /// Derived metrics, `None` when nothing succeeded.
    pub fn summary(&self, responders: usize) -> Option<StatsSummary> {
        if self.num_requests == 0 {
            return None;
        }
        // Durations are summed across concurrent workers, so average them
        // per responder before turning them into rates.
        let avg_thread_duration = div_duration(self.tot_duration, responders as u64);
        let secs = avg_thread_duration.as_secs_f64();
        let (req_rate, bytes_rate) = if secs > 0.0 {
            (
                self.num_requests as f64 / secs,
                self.tot_resp_size as f64 / secs,
            )
        } else {
            (0.0, 0.0)
        };

        Some(StatsSummary {
            avg_thread_duration,
            req_rate,
            bytes_rate,
            avg_req_time: div_duration(self.tot_duration, self.num_requests),
            avg_resp_size: self.tot_resp_size / self.num_requests,
        })
    }

    /// Human readable block for one title.
    pub fn render(&self, responders: usize) -> String {
        let mut out = format!("\nTitle:\t\t\t{}\n", self.title);
        let Some(summary) = self.summary(responders) else {
            let _ = writeln!(out, "Number of Errors:\t{}", self.num_errs);
            return out;
        };

        let _ = writeln!(
            out,
            "{} requests in {:?}, {} read ({})",
            self.num_requests,
            summary.avg_thread_duration,
            ByteSize(self.tot_resp_size as f64),
            ByteSize(summary.avg_resp_size as f64)
        );
        let _ = writeln!(out, "Requests/sec:\t\t{:.2}", summary.req_rate);
        let _ = writeln!(out, "Transfer/sec:\t\t{}", ByteSize(summary.bytes_rate));
        let _ = writeln!(out, "Avg Req Time:\t\t{:?}", summary.avg_req_time);
        let _ = writeln!(out, "Fastest Request:\t{:?}", self.min_request_time);
        let _ = writeln!(out, "Slowest Request:\t{:?}", self.max_request_time);
        let _ = writeln!(out, "Number of Errors:\t{}", self.num_errs);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSummary {
    pub avg_thread_duration: Duration,
    pub req_rate: f64,
    pub bytes_rate: f64,
    pub avg_req_time: Duration,
    pub avg_resp_size: u64,
}

/// Consumer side: merges records by title and counts finished workers.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    stats: BTreeMap<String, RequesterStats>,
    responders: usize,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one record. Returns true when it was a worker's final record.
    pub fn add(&mut self, stats: RequesterStats) -> bool {
        let finished = stats.is_total();
        match self.stats.get_mut(&stats.title) {
            Some(existing) => existing.merge(&stats),
            None => {
                self.stats.insert(stats.title.clone(), stats);
            }
        }
        if finished {
            self.responders += 1;
        }
        finished
    }

    pub fn responders(&self) -> usize {
        self.responders
    }

    pub fn get(&self, title: &str) -> Option<&RequesterStats> {
        self.stats.get(title)
    }

    pub fn into_report(self) -> RunReport {
        RunReport {
            stats: self.stats.into_values().collect(),
            responders: self.responders,
        }
    }
}

/// Final per-title results of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Sorted by title
    pub stats: Vec<RequesterStats>,
    pub responders: usize,
}

impl RunReport {
    pub fn get(&self, title: &str) -> Option<&RequesterStats> {
        self.stats.iter().find(|s| s.title == title)
    }

    pub fn render(&self) -> String {
        self.stats
            .iter()
            .map(|s| s.render(self.responders))
            .collect()
    }

    pub fn to_csv(&self) -> String {
        csv::generate_csv(self)
    }
}

/// `d / n` without narrowing `n`; a zero divisor is treated as one.
fn div_duration(d: Duration, n: u64) -> Duration {
    let nanos = d.as_nanos() / u128::from(n.max(1));
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stats(title: &str, durations: &[u64], errors: u64) -> RequesterStats {
        let mut s = RequesterStats::new(title);
        for &ms in durations {
            s.record(Duration::from_millis(ms), 100);
        }
        for _ in 0..errors {
            s.record_error();
        }
        s
    }

    #[test]
    fn test_record_math() {
        let s = stats("api", &[10, 30, 20], 1);
        assert_eq!(s.num_requests, 3);
        assert_eq!(s.num_errs, 1);
        assert_eq!(s.tot_duration, Duration::from_millis(60));
        assert_eq!(s.min_request_time, Duration::from_millis(10));
        assert_eq!(s.max_request_time, Duration::from_millis(30));
        assert_eq!(s.tot_resp_size, 300);
    }

    #[test]
    fn test_unset_minimum_never_wins() {
        let mut empty = RequesterStats::new("api");
        empty.record_error();
        let mut merged = stats("api", &[250], 0);
        merged.merge(&empty);
        assert_eq!(merged.min_request_time, Duration::from_millis(250));
        assert_eq!(merged.num_errs, 1);
    }

    #[test]
    fn test_summary_divides_by_responders() {
        let mut s = RequesterStats::new(TOTAL_TASK);
        for _ in 0..100 {
            s.record(Duration::from_millis(20), 1000);
        }
        // Two workers each ran for one second.
        let summary = s.summary(2).unwrap();
        assert_eq!(summary.avg_thread_duration, Duration::from_secs(1));
        assert!((summary.req_rate - 100.0).abs() < 1e-9);
        assert!((summary.bytes_rate - 100_000.0).abs() < 1e-6);
        assert_eq!(summary.avg_req_time, Duration::from_millis(20));
        assert_eq!(summary.avg_resp_size, 1000);
    }

    #[test]
    fn test_summary_with_huge_request_count() {
        let mut s = RequesterStats::new("busy");
        s.num_requests = 1 << 32;
        s.tot_duration = Duration::from_secs(1 << 32);
        s.tot_resp_size = 1 << 33;

        let summary = s.summary(1).unwrap();
        assert_eq!(summary.avg_req_time, Duration::from_secs(1));
        assert_eq!(summary.avg_resp_size, 2);
        assert_eq!(summary.avg_thread_duration, Duration::from_secs(1 << 32));
    }

    #[test]
    fn test_render_zero_requests_only_errors() {
        let s = stats("broken", &[], 4);
        let out = s.render(1);
        assert!(out.contains("Title:\t\t\tbroken"));
        assert!(out.contains("Number of Errors:\t4"));
        assert!(!out.contains("Requests/sec"));
    }

    #[test]
    fn test_render_full_block() {
        let out = stats("login", &[10, 20], 0).render(1);
        assert!(out.contains("2 requests in 30ms, 200.00bytes read (100.00bytes)"));
        assert!(out.contains("Requests/sec:\t\t66.67"));
        assert!(out.contains("Avg Req Time:\t\t15ms"));
        assert!(out.contains("Fastest Request:\t10ms"));
        assert!(out.contains("Slowest Request:\t20ms"));
    }

    #[test]
    fn test_aggregator_counts_responders() {
        let mut agg = StatsAggregator::new();
        assert!(!agg.add(stats("login", &[5], 0)));
        assert!(!agg.add(stats("login", &[15], 1)));
        assert!(agg.add(stats(TOTAL_TASK, &[100], 0)));
        assert!(agg.add(stats(TOTAL_TASK, &[200], 0)));

        assert_eq!(agg.responders(), 2);
        let login = agg.get("login").unwrap();
        assert_eq!(login.num_requests, 2);
        assert_eq!(login.num_errs, 1);

        let report = agg.into_report();
        assert_eq!(report.responders, 2);
        let titles: Vec<_> = report.stats.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["login", TOTAL_TASK]);
        assert_eq!(report.get(TOTAL_TASK).unwrap().num_requests, 2);
    }

    #[test]
    fn test_report_render_contains_all_titles() {
        let mut agg = StatsAggregator::new();
        agg.add(stats("a", &[1], 0));
        agg.add(stats("b", &[], 2));
        agg.add(stats(TOTAL_TASK, &[1], 0));
        let text = agg.into_report().render();
        assert!(text.contains("Title:\t\t\ta"));
        assert!(text.contains("Title:\t\t\tb"));
        assert!(text.contains("Title:\t\t\ttotal task"));
    }

    fn arb_stats() -> impl Strategy<Value = RequesterStats> {
        (
            prop::collection::vec((0u64..10_000, 0u64..100_000), 0..20),
            0u64..50,
        )
            .prop_map(|(requests, errors)| {
                let mut s = RequesterStats::new("step");
                for (micros, size) in requests {
                    s.record(Duration::from_micros(micros), size);
                }
                s.num_errs = errors;
                s
            })
    }

    proptest! {
        #[test]
        fn prop_merge_is_associative(a in arb_stats(), b in arb_stats(), c in arb_stats()) {
            let mut left = a.clone();
            left.merge(&b);
            left.merge(&c);

            let mut bc = b.clone();
            bc.merge(&c);
            let mut right = a.clone();
            right.merge(&bc);

            prop_assert_eq!(left, right);
        }

        #[test]
        fn prop_merge_is_commutative(a in arb_stats(), b in arb_stats()) {
            let mut ab = a.clone();
            ab.merge(&b);
            let mut ba = b.clone();
            ba.merge(&a);
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn prop_merge_tracks_global_extremes(parts in prop::collection::vec(arb_stats(), 1..6)) {
            let mut merged = RequesterStats::new("step");
            for p in parts.iter().rev() {
                merged.merge(p);
            }
            let min = parts.iter().map(|p| p.min_request_time).min().unwrap();
            let max = parts.iter().map(|p| p.max_request_time).max().unwrap();
            prop_assert_eq!(merged.min_request_time, min);
            prop_assert_eq!(merged.max_request_time, max);
        }
    }
}
