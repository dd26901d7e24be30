//! Timed bodies. They share the handle and namespace of the run, exactly like
//! the correctness cases.

use crate::fixtures::{payload_len, random_bytes, random_name, random_window};
use crate::outcome::HarnessError;
use crate::settings::SuiteSettings;
use backend_spec::{Backend, BackendError, FileType, Handle};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchMeasurement {
    pub name: &'static str,
    pub iterations: usize,
    /// Bytes moved across all iterations.
    pub bytes: u64,
    pub elapsed: Duration,
}

impl BenchMeasurement {
    pub fn per_iteration(&self) -> Duration {
        self.elapsed / self.iterations.max(1) as u32
    }

    pub fn throughput_mib_s(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes as f64 / (1024.0 * 1024.0) / secs
    }
}

#[derive(Debug, Clone, Default)]
pub struct BenchReport {
    pub measurements: Vec<BenchMeasurement>,
}

impl BenchReport {
    pub fn get(&self, name: &str) -> Option<&BenchMeasurement> {
        self.measurements.iter().find(|m| m.name == name)
    }
}

struct Timer {
    name: &'static str,
    iterations: usize,
    bytes: u64,
    elapsed: Duration,
}

impl Timer {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            iterations: 0,
            bytes: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn record(&mut self, started: Instant, bytes: usize) {
        self.elapsed += started.elapsed();
        self.iterations += 1;
        self.bytes += bytes as u64;
    }

    fn finish(self) -> BenchMeasurement {
        let measurement = BenchMeasurement {
            name: self.name,
            iterations: self.iterations,
            bytes: self.bytes,
            elapsed: self.elapsed,
        };
        info!(
            bench = measurement.name,
            iterations = measurement.iterations,
            per_iteration = ?measurement.per_iteration(),
            mib_s = measurement.throughput_mib_s(),
            "benchmark finished"
        );
        measurement
    }
}

fn failed(case: &str, err: impl std::fmt::Display) -> HarnessError {
    HarnessError::Benchmark {
        case: case.to_string(),
        message: err.to_string(),
    }
}

/// Runs every benchmark; stops at the first failing one and returns what was measured.
pub async fn run_benchmarks(
    backend: &dyn Backend,
    settings: &SuiteSettings,
) -> (BenchReport, Option<HarnessError>) {
    let iterations = settings.bench_iterations.max(1);
    let size = payload_len(settings.tuning.minimal_data);
    let mut report = BenchReport::default();

    match bench_save(backend, iterations, size).await {
        Ok(m) => report.measurements.push(m),
        Err(err) => return (report, Some(err)),
    }

    let data = random_bytes(size);
    let handle = Handle::new(FileType::Data, random_name());
    if let Err(err) = backend.save(&handle, &data).await {
        return (report, Some(failed("setup", err)));
    }

    let result = bench_reads(backend, &handle, &data, iterations, &mut report).await;
    // Best effort; teardown sweeps whatever is left.
    let _ = backend.remove(&handle).await;

    (report, result.err())
}

async fn bench_save(
    backend: &dyn Backend,
    iterations: usize,
    size: usize,
) -> Result<BenchMeasurement, HarnessError> {
    let mut timer = Timer::new("save");
    let data = random_bytes(size);
    for _ in 0..iterations {
        let handle = Handle::new(FileType::Data, random_name());
        let started = Instant::now();
        backend
            .save(&handle, &data)
            .await
            .map_err(|err| failed("save", err))?;
        timer.record(started, data.len());
        backend
            .remove(&handle)
            .await
            .map_err(|err| failed("save", err))?;
    }
    Ok(timer.finish())
}

async fn bench_reads(
    backend: &dyn Backend,
    handle: &Handle,
    data: &[u8],
    iterations: usize,
    report: &mut BenchReport,
) -> Result<(), HarnessError> {
    let mut timer = Timer::new("load_full");
    for _ in 0..iterations {
        let started = Instant::now();
        let got = backend
            .load(handle, 0, 0)
            .await
            .map_err(|err| failed("load_full", err))?;
        timer.record(started, got.len());
        if got.len() != data.len() {
            return Err(failed(
                "load_full",
                format!("read {} bytes, want {}", got.len(), data.len()),
            ));
        }
    }
    report.measurements.push(timer.finish());

    let mut timer = Timer::new("load_partial");
    for _ in 0..iterations {
        let (offset, length) = random_window(data.len());
        let started = Instant::now();
        let got = backend
            .load(handle, length, offset)
            .await
            .map_err(|err| failed("load_partial", err))?;
        timer.record(started, got.len());
        let start = offset as usize;
        let want = if length == 0 {
            &data[start..]
        } else {
            &data[start..start + length]
        };
        if got != want {
            return Err(failed(
                "load_partial",
                format!("window at {offset} (+{length}) differs"),
            ));
        }
    }
    report.measurements.push(timer.finish());

    let mut timer = Timer::new("test_existence");
    for _ in 0..iterations {
        let started = Instant::now();
        let found = backend
            .test(handle)
            .await
            .map_err(|err| failed("test_existence", err))?;
        timer.record(started, 0);
        if !found {
            return Err(failed(
                "test_existence",
                BackendError::not_found(handle.to_string()),
            ));
        }
    }
    report.measurements.push(timer.finish());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_handles_zero_elapsed() {
        let m = BenchMeasurement {
            name: "save",
            iterations: 0,
            bytes: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(m.throughput_mib_s(), 0.0);
        assert_eq!(m.per_iteration(), Duration::ZERO);
    }

    #[test]
    fn throughput_is_mebibytes_per_second() {
        let m = BenchMeasurement {
            name: "load_full",
            iterations: 4,
            bytes: 4 * 1024 * 1024,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(m.throughput_mib_s(), 2.0);
        assert_eq!(m.per_iteration(), Duration::from_millis(500));
    }
}
