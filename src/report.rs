//! Reduction of a run's records into summary statistics.

use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

use crate::record::Record;

/// Statistics for one completed run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// Every record collected during the run, in arrival order
    #[serde(skip)]
    pub records: Vec<Record>,

    pub total: usize,
    #[serde(rename = "total_time_ms", serialize_with = "as_millis")]
    pub total_time: Duration,
    pub req_per_sec: f64,

    #[serde(rename = "avg_req_time_ms", serialize_with = "as_millis")]
    pub avg_req_time: Duration,
    #[serde(rename = "median_req_ms", serialize_with = "as_millis")]
    pub median_req: Duration,
    #[serde(rename = "fastest_req_ms", serialize_with = "as_millis")]
    pub fastest_req: Duration,
    #[serde(rename = "the_99th_req_ms", serialize_with = "as_millis")]
    pub the_99th_req: Duration,
    #[serde(rename = "slowest_req_ms", serialize_with = "as_millis")]
    pub slowest_req: Duration,

    pub avg_body_size: f64,
    pub byte_per_sec: f64,

    pub status_err: usize,
    pub status_200: usize,
    pub status_300: usize,
    pub status_400: usize,
    pub status_500: usize,
}

impl Report {
    /// Reduce `records` collected over `elapsed` wall time into a report.
    ///
    /// Percentiles are read at the index `len * p / 100` of the sorted
    /// successful durations (integer floor, no interpolation). Rates divide by
    /// `elapsed` as-is, so a near-zero run yields non-finite values.
    pub fn from_records(records: Vec<Record>, elapsed: Duration) -> Self {
        let mut bytes_total: u64 = 0;
        let mut time_total = Duration::ZERO;
        let (mut s_err, mut s200, mut s300, mut s400, mut s500) = (0, 0, 0, 0, 0);
        let mut durations = Vec::with_capacity(records.len());

        for record in &records {
            let code = if record.is_success() {
                record.status_code
            } else {
                0
            };
            match code {
                0..=199 => s_err += 1,
                200..=299 => s200 += 1,
                300..=399 => s300 += 1,
                400..=499 => s400 += 1,
                _ => s500 += 1,
            }

            if record.is_success() {
                bytes_total += record.body_length;
                time_total += record.duration;
                durations.push(record.duration);
            }
        }
        durations.sort_unstable();

        let count = durations.len();
        let (avg_req_time, avg_body_size) = if count > 0 {
            (
                Duration::from_nanos((time_total.as_nanos() / count as u128) as u64),
                bytes_total as f64 / count as f64,
            )
        } else {
            (Duration::ZERO, 0.0)
        };

        let (fastest_req, median_req, the_99th_req, slowest_req) = match durations.len() {
            0 => (Duration::ZERO, Duration::ZERO, Duration::ZERO, Duration::ZERO),
            len => (
                durations[0],
                durations[len / 2],
                durations[len * 99 / 100],
                durations[len - 1],
            ),
        };

        let secs = elapsed.as_secs_f64();

        Self {
            total: records.len(),
            records,
            total_time: elapsed,
            req_per_sec: count as f64 / secs,

            avg_req_time,
            median_req,
            fastest_req,
            the_99th_req,
            slowest_req,

            avg_body_size,
            byte_per_sec: bytes_total as f64 / secs,

            status_err: s_err,
            status_200: s200,
            status_300: s300,
            status_400: s400,
            status_500: s500,
        }
    }

    /// Number of attempts that completed a round trip
    pub fn success_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_success()).count()
    }

    /// Export the report as JSON (per-record data omitted)
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    fn share(&self, count: usize) -> f64 {
        (count * 100) as f64 / self.records.len() as f64
    }
}

fn as_millis<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(d.as_secs_f64() * 1e3)
}

fn ms(d: Duration) -> f64 {
    d.as_micros() as f64 / 1e3
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total calls  : {:>8}", self.total)?;
        writeln!(f, "Total time   : {:>8.2} s", self.total_time.as_secs_f64())?;
        writeln!(f, "Requests/sec : {:>8.2}", self.req_per_sec)?;
        writeln!(f)?;

        writeln!(f, "Avg Req Time : {:>8.2} ms", ms(self.avg_req_time))?;
        writeln!(f, "Fastest  Req : {:>8.2} ms", ms(self.fastest_req))?;
        writeln!(f, "Median   Req : {:>8.2} ms", ms(self.median_req))?;
        writeln!(f, "99%      Req : {:>8.2} ms", ms(self.the_99th_req))?;
        writeln!(f, "Slowest  Req : {:>8.2} ms", ms(self.slowest_req))?;
        writeln!(f)?;

        writeln!(f, "Avg body size: {:>8.2} KB", self.avg_body_size / 1e3)?;
        writeln!(f, "Transfer /sec: {:>8.2} MB", self.byte_per_sec / 1e6)?;
        writeln!(f)?;

        let rows = [
            ("20X", self.status_200),
            ("30X", self.status_300),
            ("40X", self.status_400),
            ("50X", self.status_500),
            ("Err", self.status_err),
        ];
        for (label, count) in rows {
            writeln!(
                f,
                "{} Responses: {:>8} ({:>6.2}%)",
                label,
                count,
                self.share(count)
            )?;
        }
        Ok(())
    }
}
