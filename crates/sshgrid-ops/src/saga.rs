//! Saga — an ordered list of named steps run against shared state.
//!
//! Steps run strictly in order. A fatal step that fails stops the saga and
//! the error records which step failed and which steps had already
//! completed. Nothing is compensated: completed steps stay done and the
//! operator decides what to do next. A best-effort step that fails is
//! logged and recorded as a warning, and the saga continues.

use tracing::{info, warn};

use crate::error::{OpsError, OpsResult};

type StepFn<'a, S> = Box<dyn FnOnce(&mut S) -> OpsResult<()> + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepPolicy {
    Fatal,
    BestEffort,
}

struct SagaStep<'a, S> {
    name: String,
    policy: StepPolicy,
    run: StepFn<'a, S>,
}

/// A best-effort step that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepWarning {
    pub step: String,
    pub message: String,
}

/// Outcome of a saga that ran to the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SagaReport {
    pub completed: Vec<String>,
    pub warnings: Vec<StepWarning>,
}

pub struct Saga<'a, S> {
    name: String,
    steps: Vec<SagaStep<'a, S>>,
}

impl<'a, S> Saga<'a, S> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            steps: Vec::new(),
        }
    }

    /// Append a step whose failure aborts the saga.
    pub fn step(mut self, name: impl Into<String>, run: impl FnOnce(&mut S) -> OpsResult<()> + 'a) -> Self {
        self.steps.push(SagaStep {
            name: name.into(),
            policy: StepPolicy::Fatal,
            run: Box::new(run),
        });
        self
    }

    /// Append a step whose failure is only a warning.
    pub fn best_effort(
        mut self,
        name: impl Into<String>,
        run: impl FnOnce(&mut S) -> OpsResult<()> + 'a,
    ) -> Self {
        self.steps.push(SagaStep {
            name: name.into(),
            policy: StepPolicy::BestEffort,
            run: Box::new(run),
        });
        self
    }

    /// Append a step only when `cond` holds.
    pub fn step_if(
        self,
        cond: bool,
        name: impl Into<String>,
        run: impl FnOnce(&mut S) -> OpsResult<()> + 'a,
    ) -> Self {
        if cond { self.step(name, run) } else { self }
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn run(self, state: &mut S) -> OpsResult<SagaReport> {
        let total = self.steps.len();
        let mut report = SagaReport::default();
        info!(saga = %self.name, steps = total, "saga started");

        for (index, step) in self.steps.into_iter().enumerate() {
            info!(saga = %self.name, step = %step.name, "[{}/{}] {}", index + 1, total, step.name);
            match (step.run)(state) {
                Ok(()) => report.completed.push(step.name),
                Err(err) => match step.policy {
                    StepPolicy::Fatal => {
                        warn!(
                            saga = %self.name,
                            step = %step.name,
                            completed = report.completed.len(),
                            error = %err.chain(),
                            "saga aborted"
                        );
                        return Err(OpsError::SagaAborted {
                            saga: self.name,
                            step: step.name,
                            completed: report.completed,
                            source: Box::new(err),
                        });
                    }
                    StepPolicy::BestEffort => {
                        let message = err.chain();
                        warn!(saga = %self.name, step = %step.name, error = %message, "step failed, continuing");
                        report.warnings.push(StepWarning {
                            step: step.name,
                            message,
                        });
                    }
                },
            }
        }

        info!(
            saga = %self.name,
            completed = report.completed.len(),
            warnings = report.warnings.len(),
            "saga completed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail(msg: &str) -> OpsResult<()> {
        Err(OpsError::Precondition(msg.to_string()))
    }

    #[test]
    fn runs_steps_in_order() {
        let mut log: Vec<&str> = Vec::new();
        let report = Saga::new("test")
            .step("a", |log: &mut Vec<&str>| {
                log.push("a");
                Ok(())
            })
            .step("b", |log| {
                log.push("b");
                Ok(())
            })
            .run(&mut log)
            .unwrap();

        assert_eq!(log, vec!["a", "b"]);
        assert_eq!(report.completed, vec!["a", "b"]);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn fatal_failure_stops_and_reports_boundary() {
        let mut log: Vec<&str> = Vec::new();
        let err = Saga::new("test")
            .step("a", |log: &mut Vec<&str>| {
                log.push("a");
                Ok(())
            })
            .step("b", |_| fail("b broke"))
            .step("c", |log| {
                log.push("c");
                Ok(())
            })
            .run(&mut log)
            .unwrap_err();

        assert_eq!(log, vec!["a"]);
        match err {
            OpsError::SagaAborted {
                saga,
                step,
                completed,
                source,
            } => {
                assert_eq!(saga, "test");
                assert_eq!(step, "b");
                assert_eq!(completed, vec!["a"]);
                assert!(matches!(*source, OpsError::Precondition(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn best_effort_failure_is_a_warning() {
        let mut count = 0;
        let report = Saga::new("test")
            .best_effort("flaky", |_: &mut i32| fail("nope"))
            .step("after", |n| {
                *n += 1;
                Ok(())
            })
            .run(&mut count)
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(report.completed, vec!["after"]);
        assert_eq!(
            report.warnings,
            vec![StepWarning {
                step: "flaky".to_string(),
                message: "nope".to_string(),
            }]
        );
    }

    #[test]
    fn conditional_steps() {
        let saga: Saga<'_, ()> = Saga::new("test")
            .step_if(false, "skipped", |_| Ok(()))
            .step_if(true, "kept", |_| Ok(()));
        assert_eq!(saga.step_names(), vec!["kept"]);
    }

    #[test]
    fn empty_saga_succeeds() {
        let report = Saga::new("empty").run(&mut ()).unwrap();
        assert_eq!(report, SagaReport::default());
    }
}
