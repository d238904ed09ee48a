//! Report rendering.
//!
//! Results go to stdout; per-device diagnostics (build failures, invalid
//! computations, runtime failures) go to stderr. Text reports stream through
//! [`TextProgress`] while the run progresses; in JSON mode the whole run is
//! one document on stdout.

use std::io::{self, Write};

use clflops_core::{
    describe, Device, DeviceOutcome, DeviceReport, RunObserver, RunSummary, StrategyOutcome,
};
use serde::{Deserialize, Serialize};

/// Width of the strategy label column.
const LABEL_WIDTH: usize = 15;

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text (default).
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format '{other}'. Expected one of: text, json")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// `"Range Based:   0.012345 s  81.234M Elements Per Second"`.
pub fn strategy_line(outcome: &StrategyOutcome) -> String {
    let label = format!("{}:", outcome.strategy().label());
    match outcome {
        StrategyOutcome::Measured(result) => format!(
            "{label:<LABEL_WIDTH$}{:.6} s  {:.3}M Elements Per Second",
            result.elapsed_seconds,
            result.mega_elements_per_second()
        ),
        StrategyOutcome::InvalidComputation { .. } => {
            format!("{label:<LABEL_WIDTH$}invalid computation")
        }
    }
}

/// Write the device listing.
pub fn write_listing(
    devices: &[Device],
    format: OutputFormat,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => write!(out, "{}", describe(devices))?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, devices)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Write the benchmark reports.
pub fn write_summary(
    summary: &RunSummary,
    format: OutputFormat,
    out: &mut impl Write,
    err: &mut impl Write,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => write_text(summary, out, err)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &JsonSummary::new(summary))?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn write_text(summary: &RunSummary, out: &mut impl Write, err: &mut impl Write) -> io::Result<()> {
    let mut progress = TextProgress::new(out, err);
    for report in &summary.reports {
        progress.device_started(&report.device);
        for outcome in report.strategies() {
            progress.strategy_finished(&report.device, outcome);
        }
        progress.device_finished(report);
    }
    progress.finish()
}

/// Text report written as the run progresses.
///
/// The device name is printed before its program is built and every strategy
/// line as soon as it is measured; both streams are flushed after each event.
/// The first write error stops further output and is returned by
/// [`finish`](Self::finish).
pub struct TextProgress<W: Write, E: Write> {
    out: W,
    err: E,
    failure: Option<io::Error>,
}

impl<W: Write, E: Write> TextProgress<W, E> {
    pub fn new(out: W, err: E) -> Self {
        Self { out, err, failure: None }
    }

    /// Flush both streams and surface the first write error.
    pub fn finish(mut self) -> io::Result<()> {
        if let Some(e) = self.failure.take() {
            return Err(e);
        }
        self.out.flush()?;
        self.err.flush()
    }

    fn emit(&mut self, write: impl FnOnce(&mut W, &mut E) -> io::Result<()>) {
        if self.failure.is_some() {
            return;
        }
        let result = write(&mut self.out, &mut self.err)
            .and_then(|()| self.out.flush())
            .and_then(|()| self.err.flush());
        if let Err(e) = result {
            self.failure = Some(e);
        }
    }
}

impl<W: Write, E: Write> RunObserver for TextProgress<W, E> {
    fn device_started(&mut self, device: &Device) {
        self.emit(|out, _| writeln!(out, "{}", device.name));
    }

    fn strategy_finished(&mut self, _device: &Device, outcome: &StrategyOutcome) {
        self.emit(|out, err| {
            writeln!(out, "{}", strategy_line(outcome))?;
            if !outcome.is_valid() {
                writeln!(err, "Invalid computation from device.")?;
            }
            Ok(())
        });
    }

    fn device_finished(&mut self, report: &DeviceReport) {
        self.emit(|out, err| {
            match &report.outcome {
                DeviceOutcome::BuildFailed { log } => {
                    writeln!(
                        err,
                        "Error building program for '{}'. Verify OpenCL installation.",
                        report.device.name
                    )?;
                    writeln!(out, "{log}")?;
                }
                DeviceOutcome::Failed { reason, .. } => {
                    writeln!(err, "Benchmark aborted on '{}': {reason}", report.device.name)?;
                }
                DeviceOutcome::Completed { .. } => {}
            }
            writeln!(out)
        });
    }
}

/// JSON view of a run with FLOPS filled in per measurement.
#[derive(Serialize)]
struct JsonSummary<'a> {
    backend: &'a str,
    workload_elements: usize,
    ops_per_element: u32,
    success: bool,
    devices: Vec<JsonDevice<'a>>,
}

#[derive(Serialize)]
struct JsonDevice<'a> {
    device: &'a Device,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    build_log: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    strategies: Vec<JsonStrategy<'a>>,
}

#[derive(Serialize)]
struct JsonStrategy<'a> {
    #[serde(flatten)]
    outcome: &'a StrategyOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    flops: Option<f64>,
}

impl<'a> JsonSummary<'a> {
    fn new(summary: &'a RunSummary) -> Self {
        let ops = summary.ops_per_element;
        let devices = summary
            .reports
            .iter()
            .map(|report| {
                let (status, build_log, reason) = match &report.outcome {
                    DeviceOutcome::Completed { .. } => ("completed", None, None),
                    DeviceOutcome::BuildFailed { log } => ("build_failed", Some(log.as_str()), None),
                    DeviceOutcome::Failed { reason, .. } => ("failed", None, Some(reason.as_str())),
                };
                let strategies = report
                    .strategies()
                    .iter()
                    .map(|outcome| JsonStrategy {
                        outcome,
                        flops: match outcome {
                            StrategyOutcome::Measured(result) => Some(result.flops(ops)),
                            StrategyOutcome::InvalidComputation { .. } => None,
                        },
                    })
                    .collect();
                JsonDevice { device: &report.device, status, build_log, reason, strategies }
            })
            .collect();
        Self {
            backend: &summary.backend,
            workload_elements: summary.workload_elements,
            ops_per_element: ops,
            success: summary.exit_ok(),
            devices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clflops_core::{BenchmarkResult, Strategy};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn device(index: usize) -> Device {
        Device {
            index,
            platform_index: 0,
            ordinal: index,
            platform_vendor: "Acme".into(),
            platform_name: "Acme CL".into(),
            name: format!("Acme GPU {index}"),
            max_compute_units: 8,
        }
    }

    fn measured(strategy: Strategy) -> StrategyOutcome {
        StrategyOutcome::Measured(BenchmarkResult::new(strategy, 1_000_000, Duration::from_millis(10)))
    }

    fn summary(reports: Vec<DeviceReport>) -> RunSummary {
        RunSummary { backend: "host".into(), workload_elements: 1_000_000, ops_per_element: 2, reports }
    }

    fn render(s: &RunSummary, format: OutputFormat) -> (String, String) {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        write_summary(s, format, &mut out, &mut err).unwrap();
        (String::from_utf8(out).unwrap(), String::from_utf8(err).unwrap())
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn labels_are_padded_to_fifteen() {
        assert_eq!(
            strategy_line(&measured(Strategy::Range)),
            "Range Based:   0.010000 s  100.000M Elements Per Second"
        );
        assert_eq!(
            strategy_line(&measured(Strategy::Element)),
            "Element Based: 0.010000 s  100.000M Elements Per Second"
        );
    }

    #[test]
    fn text_report_per_device() {
        let s = summary(vec![DeviceReport {
            device: device(0),
            outcome: DeviceOutcome::Completed {
                strategies: vec![
                    measured(Strategy::Range),
                    StrategyOutcome::InvalidComputation { strategy: Strategy::Element },
                ],
            },
        }]);
        let (out, err) = render(&s, OutputFormat::Text);
        assert_eq!(
            out,
            "Acme GPU 0\n\
             Range Based:   0.010000 s  100.000M Elements Per Second\n\
             Element Based: invalid computation\n\n"
        );
        assert_eq!(err, "Invalid computation from device.\n");
    }

    #[test]
    fn build_log_goes_to_stdout_header_to_stderr() {
        let s = summary(vec![DeviceReport {
            device: device(1),
            outcome: DeviceOutcome::BuildFailed { log: "error: expected ';'".into() },
        }]);
        let (out, err) = render(&s, OutputFormat::Text);
        assert_eq!(out, "Acme GPU 1\nerror: expected ';'\n\n");
        assert!(err.contains("Verify OpenCL installation."));
    }

    #[test]
    fn json_report_carries_flops_and_status() {
        let s = summary(vec![
            DeviceReport {
                device: device(0),
                outcome: DeviceOutcome::Completed { strategies: vec![measured(Strategy::Range)] },
            },
            DeviceReport {
                device: device(1),
                outcome: DeviceOutcome::Failed {
                    reason: "clEnqueueNDRangeKernel failed: -5".into(),
                    strategies: vec![],
                },
            },
        ]);
        let (out, err) = render(&s, OutputFormat::Json);
        assert!(err.is_empty());
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["devices"][0]["status"], "completed");
        assert_eq!(json["devices"][0]["strategies"][0]["status"], "measured");
        assert_eq!(json["devices"][0]["strategies"][0]["strategy"], "range");
        let flops = json["devices"][0]["strategies"][0]["flops"].as_f64().unwrap();
        assert!((flops - 2.0e8).abs() < 1.0);
        assert_eq!(json["devices"][1]["status"], "failed");
        assert!(json["devices"][1]["reason"].as_str().unwrap().contains("-5"));
    }

    /// Writer shared between the progress and the test, counting flushes.
    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<(Vec<u8>, usize)>>);

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.borrow().0.clone()).unwrap()
        }

        fn flushes(&self) -> usize {
            self.0.borrow().1
        }
    }

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().0.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.0.borrow_mut().1 += 1;
            Ok(())
        }
    }

    #[test]
    fn progress_prints_each_event_immediately() {
        let (out, err) = (Shared::default(), Shared::default());
        let mut progress = TextProgress::new(out.clone(), err.clone());
        let dev = device(0);

        progress.device_started(&dev);
        assert_eq!(out.text(), "Acme GPU 0\n");
        assert_eq!(out.flushes(), 1);

        progress.strategy_finished(&dev, &measured(Strategy::Range));
        assert_eq!(
            out.text(),
            "Acme GPU 0\nRange Based:   0.010000 s  100.000M Elements Per Second\n"
        );
        assert_eq!(out.flushes(), 2);

        let invalid = StrategyOutcome::InvalidComputation { strategy: Strategy::Element };
        progress.strategy_finished(&dev, &invalid);
        assert_eq!(err.text(), "Invalid computation from device.\n");

        progress.device_finished(&DeviceReport {
            device: dev,
            outcome: DeviceOutcome::Completed { strategies: Vec::new() },
        });
        assert!(out.text().ends_with("Element Based: invalid computation\n\n"));
        progress.finish().unwrap();
    }

    #[test]
    fn progress_streams_a_host_run_device_by_device() {
        use clflops_core::{run_benchmark_observed, BenchRequest, HostBackend};

        let (out, err) = (Shared::default(), Shared::default());
        let mut progress = TextProgress::new(out.clone(), err.clone());
        let req = BenchRequest { workload_bytes: 400, ..BenchRequest::default() };
        run_benchmark_observed(&HostBackend::new(2, 2), &req, &mut progress).unwrap();
        progress.finish().unwrap();

        let text = out.text();
        let first = text.find("Host Reference Device 0").unwrap();
        let second = text.find("Host Reference Device 1").unwrap();
        assert!(first < second);
        assert_eq!(text[first..second].matches("Elements Per Second").count(), 2);
        assert!(out.flushes() >= 8);
        assert!(err.text().is_empty());
    }

    #[test]
    fn progress_keeps_the_first_write_error() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut progress = TextProgress::new(Broken, Vec::new());
        progress.device_started(&device(0));
        progress.strategy_finished(&device(0), &measured(Strategy::Range));
        let e = progress.finish().unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn listing_json_is_an_array() {
        let mut out = Vec::new();
        write_listing(&[device(0), device(1)], OutputFormat::Json, &mut out).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[1]["name"], "Acme GPU 1");
    }

    #[test]
    fn listing_text_groups_by_platform() {
        let mut out = Vec::new();
        write_listing(&[device(0), device(1)], OutputFormat::Text, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Acme Acme CL:\n[0] Acme GPU 0\n[1] Acme GPU 1\n");
    }
}
