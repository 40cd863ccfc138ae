//! Reactions to individual lines of tool output.
//!
//! Every stdout line is offered to every processor of the chain. Processors
//! match on fixed markers and never short-circuit each other; they record
//! their effects on the [`LineContext`] for the supervisor to apply.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{debug::DebugHandshake, error::SupervisorError};

pub const REPORT_PATH_MARKER: &str = "Successfully generated html-report to => ";
pub const ATTACH_DEBUGGER_MARKER: &str = "Runner Ready for Debugging";
pub const NO_DEBUGGER_MARKER: &str = "No debugger attached";

static TRAILING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*$").expect("valid trailing number regex"));

/// Per-line view of the run a processor reacts on.
pub struct LineContext<'a> {
    pub debug: &'a DebugHandshake,
    report_path: Option<PathBuf>,
    failure: Option<SupervisorError>,
}

impl<'a> LineContext<'a> {
    #[must_use]
    pub fn new(debug: &'a DebugHandshake) -> Self {
        Self {
            debug,
            report_path: None,
            failure: None,
        }
    }

    pub fn record_report_path(&mut self, path: PathBuf) {
        self.report_path = Some(path);
    }

    /// Ask the supervisor to surface `error` and cancel the run. The first
    /// failure of a line wins.
    pub fn fail(&mut self, error: SupervisorError) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
    }

    #[must_use]
    pub fn report_path(&self) -> Option<&PathBuf> {
        self.report_path.as_ref()
    }

    #[must_use]
    pub fn failure(&self) -> Option<&SupervisorError> {
        self.failure.as_ref()
    }

    #[must_use]
    pub fn into_effects(self) -> (Option<PathBuf>, Option<SupervisorError>) {
        (self.report_path, self.failure)
    }
}

pub trait LineProcessor: Send + Sync {
    fn can_process(&self, line: &str) -> bool;
    fn process(&self, line: &str, context: &mut LineContext<'_>);
}

/// Records where the html report was written.
pub struct ReportPathProcessor;

impl LineProcessor for ReportPathProcessor {
    fn can_process(&self, line: &str) -> bool {
        line.contains(REPORT_PATH_MARKER)
    }

    fn process(&self, line: &str, context: &mut LineContext<'_>) {
        let Some((_, path)) = line.split_once(REPORT_PATH_MARKER) else {
            return;
        };
        let path = path.trim();
        if !path.is_empty() {
            log::info!("html report generated at {path}");
            context.record_report_path(PathBuf::from(path));
        }
    }
}

/// Attaches the debugger once the runner announces it is waiting for one.
pub struct DebuggerAttachedProcessor;

impl LineProcessor for DebuggerAttachedProcessor {
    fn can_process(&self, line: &str) -> bool {
        line.contains(ATTACH_DEBUGGER_MARKER)
    }

    fn process(&self, line: &str, context: &mut LineContext<'_>) {
        let process_id = TRAILING_NUMBER
            .captures(line)
            .and_then(|captures| captures[1].parse::<u32>().ok());
        if let Err(error) = context.debug.runner_ready(process_id) {
            context.fail(error);
        }
    }
}

/// The runner timed out waiting for a debugger.
pub struct DebuggerNotAttachedProcessor;

impl LineProcessor for DebuggerNotAttachedProcessor {
    fn can_process(&self, line: &str) -> bool {
        line.contains(NO_DEBUGGER_MARKER)
    }

    fn process(&self, _line: &str, context: &mut LineContext<'_>) {
        let error = context.debug.not_attached();
        context.fail(error);
    }
}

/// Fixed, ordered set of processors evaluated against every line.
pub struct ProcessorChain {
    processors: Vec<Box<dyn LineProcessor>>,
}

impl Default for ProcessorChain {
    fn default() -> Self {
        Self {
            processors: vec![
                Box::new(ReportPathProcessor),
                Box::new(DebuggerAttachedProcessor),
                Box::new(DebuggerNotAttachedProcessor),
            ],
        }
    }
}

impl ProcessorChain {
    #[must_use]
    pub fn new(processors: Vec<Box<dyn LineProcessor>>) -> Self {
        Self { processors }
    }

    /// Offer `line` to every processor. Returns how many matched.
    pub fn dispatch(&self, line: &str, context: &mut LineContext<'_>) -> usize {
        let mut matched = 0;
        for processor in &self.processors {
            if processor.can_process(line) {
                processor.process(line, context);
                matched += 1;
            }
        }
        matched
    }
}
