//! Sequential step runner with reverse-order cleanup.
//!
//! ```text
//! for step in steps:
//!     cancelled? ──► stop
//!     step.run(ctx) ──► Continue ──► next
//!                  └──► Halt     ──► stop
//! cleanup completed steps, last first
//! ```
//!
//! Only steps whose `run` returned [`StepAction::Continue`] are cleaned up.
//! Cleanup errors are logged and swallowed so every completed step gets its
//! teardown regardless of what failed before it.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::context::BuildContext;

/// What a step asks the pipeline to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Continue,
    Halt,
}

/// How the pipeline terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    Halted,
    Cancelled,
}

/// A unit of pipeline work with a paired teardown.
#[async_trait]
pub trait Step: Send {
    /// Short kebab-case identifier used in logs.
    fn name(&self) -> &'static str;

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction;

    /// Release whatever `run` acquired. Only called when `run` returned
    /// [`StepAction::Continue`].
    async fn cleanup(&mut self, _ctx: &mut BuildContext) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order, then clean up the completed ones in reverse.
    ///
    /// The outcome is also recorded on `ctx` (`halted` / `cancelled`) before
    /// cleanup starts, so teardown can tell a failed build from a good one.
    pub async fn run(&mut self, ctx: &mut BuildContext) -> PipelineOutcome {
        let mut completed = 0usize;
        let mut outcome = PipelineOutcome::Completed;

        for step in self.steps.iter_mut() {
            if ctx.cancel.is_cancelled() {
                info!(target: "pipeline", step = step.name(), "cancelled before step");
                outcome = PipelineOutcome::Cancelled;
                break;
            }

            debug!(target: "pipeline", step = step.name(), "running");
            match step.run(ctx).await {
                StepAction::Continue => completed += 1,
                StepAction::Halt => {
                    outcome = if ctx.cancel.is_cancelled() {
                        PipelineOutcome::Cancelled
                    } else {
                        PipelineOutcome::Halted
                    };
                    info!(target: "pipeline", step = step.name(), ?outcome, "step stopped the build");
                    break;
                }
            }
        }

        match outcome {
            PipelineOutcome::Completed => {}
            PipelineOutcome::Halted => ctx.halted = true,
            PipelineOutcome::Cancelled => ctx.cancelled = true,
        }

        for step in self.steps[..completed].iter_mut().rev() {
            debug!(target: "pipeline", step = step.name(), "cleanup");
            if let Err(e) = step.cleanup(ctx).await {
                warn!(target: "pipeline", step = step.name(), error = %format!("{e:#}"), "cleanup failed");
            }
        }

        outcome
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::{RawConfig, with_defaults};
    use crate::context::Termination;
    use crate::vm::driver::BhyveDriver;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        action: StepAction,
        fail_cleanup: bool,
        cancel_on_run: Option<CancellationToken>,
        journal: Journal,
    }

    #[async_trait]
    impl Step for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&mut self, _ctx: &mut BuildContext) -> StepAction {
            self.journal.lock().unwrap().push(format!("run:{}", self.name));
            if let Some(token) = &self.cancel_on_run {
                token.cancel();
            }
            self.action
        }

        async fn cleanup(&mut self, _ctx: &mut BuildContext) -> anyhow::Result<()> {
            self.journal.lock().unwrap().push(format!("cleanup:{}", self.name));
            if self.fail_cleanup {
                anyhow::bail!("teardown of {} failed", self.name);
            }
            Ok(())
        }
    }

    fn step(name: &'static str, action: StepAction, journal: &Journal) -> Box<dyn Step> {
        Box::new(Recorder {
            name,
            action,
            fail_cleanup: false,
            cancel_on_run: None,
            journal: journal.clone(),
        })
    }

    fn context(cancel: CancellationToken) -> BuildContext {
        let config = Arc::new(with_defaults(RawConfig::default()));
        let driver = Arc::new(BhyveDriver::new(config.tools.bhyve.clone()));
        BuildContext::new(config, driver, cancel)
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn halt_cleans_up_earlier_steps_in_reverse() {
        let journal = Journal::default();
        let mut pipeline = Pipeline::new(vec![
            step("one", StepAction::Continue, &journal),
            step("two", StepAction::Continue, &journal),
            step("three", StepAction::Halt, &journal),
            step("four", StepAction::Continue, &journal),
        ]);
        let mut ctx = context(CancellationToken::new());

        let outcome = pipeline.run(&mut ctx).await;

        assert_eq!(outcome, PipelineOutcome::Halted);
        assert_eq!(
            entries(&journal),
            ["run:one", "run:two", "run:three", "cleanup:two", "cleanup:one"],
            "halting step is never cleaned up and later steps never run"
        );
        assert_eq!(ctx.termination(), Termination::Halted);
    }

    #[tokio::test]
    async fn completed_build_still_releases_resources() {
        let journal = Journal::default();
        let mut pipeline = Pipeline::new(vec![
            step("one", StepAction::Continue, &journal),
            step("two", StepAction::Continue, &journal),
        ]);
        let mut ctx = context(CancellationToken::new());

        assert_eq!(pipeline.run(&mut ctx).await, PipelineOutcome::Completed);
        assert_eq!(
            entries(&journal),
            ["run:one", "run:two", "cleanup:two", "cleanup:one"]
        );
        assert!(ctx.succeeded());
    }

    #[tokio::test]
    async fn failing_cleanup_does_not_stop_other_cleanups() {
        let journal = Journal::default();
        let mut pipeline = Pipeline::new(vec![
            step("one", StepAction::Continue, &journal),
            Box::new(Recorder {
                name: "two",
                action: StepAction::Continue,
                fail_cleanup: true,
                cancel_on_run: None,
                journal: journal.clone(),
            }),
            step("three", StepAction::Halt, &journal),
        ]);
        let mut ctx = context(CancellationToken::new());

        assert_eq!(pipeline.run(&mut ctx).await, PipelineOutcome::Halted);
        assert_eq!(
            entries(&journal),
            ["run:one", "run:two", "run:three", "cleanup:two", "cleanup:one"]
        );
    }

    #[tokio::test]
    async fn cancellation_is_checked_before_each_step() {
        let journal = Journal::default();
        let cancel = CancellationToken::new();
        let mut pipeline = Pipeline::new(vec![
            step("one", StepAction::Continue, &journal),
            Box::new(Recorder {
                name: "two",
                action: StepAction::Continue,
                fail_cleanup: false,
                cancel_on_run: Some(cancel.clone()),
                journal: journal.clone(),
            }),
            step("three", StepAction::Continue, &journal),
        ]);
        let mut ctx = context(cancel);

        assert_eq!(pipeline.run(&mut ctx).await, PipelineOutcome::Cancelled);
        assert_eq!(
            entries(&journal),
            ["run:one", "run:two", "cleanup:two", "cleanup:one"],
            "the step after cancellation must not start"
        );
        assert_eq!(ctx.termination(), Termination::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let journal = Journal::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut pipeline = Pipeline::new(vec![step("one", StepAction::Continue, &journal)]);
        let mut ctx = context(cancel);

        assert_eq!(pipeline.run(&mut ctx).await, PipelineOutcome::Cancelled);
        assert!(entries(&journal).is_empty());
    }

    #[tokio::test]
    async fn halt_after_cancellation_is_classified_as_cancelled() {
        let journal = Journal::default();
        let cancel = CancellationToken::new();
        let mut pipeline = Pipeline::new(vec![Box::new(Recorder {
            name: "waiter",
            action: StepAction::Halt,
            fail_cleanup: false,
            cancel_on_run: Some(cancel.clone()),
            journal: journal.clone(),
        })]);
        let mut ctx = context(cancel);

        assert_eq!(pipeline.run(&mut ctx).await, PipelineOutcome::Cancelled);
    }
}
