use std::net::IpAddr;
use std::time::Duration;

/// A point-in-time copy of the statistics of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Statistics {
    /// The address being pinged.
    pub target_addr: IpAddr,
    /// The number of echo requests sent.
    pub packets_sent: usize,
    /// The number of echo replies matched to a request.
    pub packets_received: usize,
    /// The number of further replies for requests which were already matched.
    pub duplicates_received: usize,
    /// The percentage of requests without a reply.
    pub packet_loss_pct: f64,
    /// The minimum round trip time, zero if nothing was received.
    pub min_rtt: Duration,
    /// The maximum round trip time, zero if nothing was received.
    pub max_rtt: Duration,
    /// The mean round trip time, zero if nothing was received.
    pub avg_rtt: Duration,
    /// The population standard deviation of the round trip times.
    pub stddev_rtt: Duration,
    /// The error which ended the run, if any.
    pub error: Option<String>,
}

/// Streaming aggregation of the round trip times of a run.
///
/// The mean and variance are maintained with Welford's algorithm so no
/// history of round trip times is retained.
#[derive(Debug, Clone)]
pub struct StatisticsAggregator {
    target_addr: IpAddr,
    packets_sent: usize,
    packets_received: usize,
    duplicates_received: usize,
    min_rtt: Option<Duration>,
    max_rtt: Option<Duration>,
    /// The running mean in nanoseconds.
    mean: f64,
    /// The running sum of squared differences from the mean.
    m2: f64,
    error: Option<String>,
}

impl StatisticsAggregator {
    #[must_use]
    pub const fn new(target_addr: IpAddr) -> Self {
        Self {
            target_addr,
            packets_sent: 0,
            packets_received: 0,
            duplicates_received: 0,
            min_rtt: None,
            max_rtt: None,
            mean: 0_f64,
            m2: 0_f64,
            error: None,
        }
    }

    pub fn record_sent(&mut self) {
        self.packets_sent += 1;
    }

    pub fn record_received(&mut self, rtt: Duration) {
        self.packets_received += 1;
        self.min_rtt = Some(self.min_rtt.map_or(rtt, |min| min.min(rtt)));
        self.max_rtt = Some(self.max_rtt.map_or(rtt, |max| max.max(rtt)));
        let sample = rtt.as_nanos() as f64;
        let delta = sample - self.mean;
        self.mean += delta / self.packets_received as f64;
        let delta2 = sample - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn record_duplicate(&mut self) {
        self.duplicates_received += 1;
    }

    /// Record the error which ended the run.
    pub fn set_error(&mut self, error: String) {
        self.error = Some(error);
    }

    #[must_use]
    pub fn snapshot(&self) -> Statistics {
        let packet_loss_pct = if self.packets_sent == 0 {
            0_f64
        } else {
            let lost = self.packets_sent.saturating_sub(self.packets_received);
            lost as f64 * 100_f64 / self.packets_sent as f64
        };
        let variance = if self.packets_received == 0 {
            0_f64
        } else {
            self.m2 / self.packets_received as f64
        };
        Statistics {
            target_addr: self.target_addr,
            packets_sent: self.packets_sent,
            packets_received: self.packets_received,
            duplicates_received: self.duplicates_received,
            packet_loss_pct,
            min_rtt: self.min_rtt.unwrap_or_default(),
            max_rtt: self.max_rtt.unwrap_or_default(),
            avg_rtt: nanos_to_duration(self.mean),
            stddev_rtt: nanos_to_duration(variance.sqrt()),
            error: self.error.clone(),
        }
    }
}

fn nanos_to_duration(nanos: f64) -> Duration {
    Duration::from_nanos(nanos.max(0_f64).round() as u64)
}
