//! Coarse phase timings, reported at exit under `-d stats`.

use std::time::{Duration, Instant};

struct Metric {
    name: &'static str,
    count: usize,
    total: Duration,
}

#[derive(Default)]
pub struct Metrics {
    metrics: Vec<Metric>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    /// Run `f`, attributing its wall time to `name`.
    pub fn measure<T>(&mut self, name: &'static str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        match self.metrics.iter_mut().find(|m| m.name == name) {
            Some(metric) => {
                metric.count += 1;
                metric.total += elapsed;
            }
            None => self.metrics.push(Metric {
                name,
                count: 1,
                total: elapsed,
            }),
        }
        result
    }

    pub fn report(&self) {
        println!("{:<20}\t{:>6}\t{:>9}\t{:>10}", "metric", "count", "avg (us)", "total (ms)");
        for metric in &self.metrics {
            let total_us = metric.total.as_micros();
            let avg_us = total_us / metric.count.max(1) as u128;
            println!(
                "{:<20}\t{:>6}\t{:>9}\t{:>10.1}",
                metric.name,
                metric.count,
                avg_us,
                total_us as f64 / 1000.0
            );
        }
    }
}
