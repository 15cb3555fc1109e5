use std::path::PathBuf;

use crate::executor::{BuildEvent, ReportSink};
use crate::pipeline::Pipeline;
use crate::targets::TargetId;

mod report;

pub use report::{ArtifactLocation, FailedTarget, REPORT_FILE, Report};

/// Runs the pipeline for each requested target in order. A failed target
/// never stops the ones after it.
pub struct Orchestrator<'a> {
    pipeline: Pipeline<'a>,
    sink: &'a dyn ReportSink,
    report_path: Option<PathBuf>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(pipeline: Pipeline<'a>, sink: &'a dyn ReportSink) -> Self {
        let report_path = Some(pipeline.paths().builds_dir.join(REPORT_FILE));
        Self {
            pipeline,
            sink,
            report_path,
        }
    }

    /// Do not write `report.json`.
    pub fn without_report_file(mut self) -> Self {
        self.report_path = None;
        self
    }

    pub fn run(&self, targets: &[TargetId]) -> Report {
        self.sink.emit(BuildEvent::RunStarted {
            targets: targets.to_vec(),
        });

        let total = targets.len();
        let mut results = Vec::with_capacity(total);
        for (index, &target) in targets.iter().enumerate() {
            self.sink.emit(BuildEvent::TargetStarted {
                target,
                index,
                total,
            });
            let result = self.pipeline.run(target, self.sink);
            tracing::info!(
                target_id = %target,
                ok = result.is_success(),
                elapsed_ms = result.elapsed_ms,
                "target finished"
            );
            self.sink.emit(BuildEvent::TargetFinished {
                result: result.clone(),
            });
            results.push(result);
        }

        let report = Report::from_results(results);
        if let Some(path) = &self.report_path {
            if let Err(e) = report.write_json(path) {
                self.sink.emit(BuildEvent::Warning {
                    target: None,
                    message: format!("could not write build report: {e}"),
                });
            }
        }
        self.sink.emit(BuildEvent::RunFinished {
            report: report.clone(),
        });
        report
    }
}
