//! Microtask executor for Boa's promise job queue
//!
//! Boa hands promise reactions (`then`/`catch` handlers) and generic jobs to
//! a `JobExecutor`. This executor only queues them; the session drains the
//! queue explicitly after every evaluation and every settled background task,
//! so promise reactions always run on the controller thread, between events.
//!
//! Native async jobs are not used: background work (file reads, HTTP
//! fetches, timers) runs as tokio tasks that report back through the event
//! channel instead.

use boa_engine::{context::Context, job::{GenericJob, Job, JobExecutor, PromiseJob}};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Queue of pending promise and generic jobs.
#[derive(Default)]
pub struct MicrotaskExecutor {
    /// Promise reactions, run before any generic job
    promise_jobs: RefCell<VecDeque<PromiseJob>>,
    generic_jobs: RefCell<VecDeque<GenericJob>>,
}

impl MicrotaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending_jobs(&self) -> bool {
        !self.promise_jobs.borrow().is_empty() || !self.generic_jobs.borrow().is_empty()
    }

    /// Runs jobs until both queues are empty and returns how many ran.
    ///
    /// Jobs may enqueue further jobs; those run in the same call. All promise
    /// jobs run before the next generic job. A job that throws is logged and
    /// does not stop the drain.
    pub fn drain(&self, context: &mut Context) -> usize {
        let mut ran = 0;
        loop {
            if let Some(job) = pop(&self.promise_jobs) {
                if let Err(err) = job.call(context) {
                    tracing::warn!("Uncaught error in promise job: {err}");
                }
            } else if let Some(job) = pop(&self.generic_jobs) {
                if let Err(err) = job.call(context) {
                    tracing::warn!("Uncaught error in generic job: {err}");
                }
            } else {
                break;
            }
            ran += 1;
        }

        context.clear_kept_objects();
        ran
    }
}

/// Pops without holding the borrow while the job runs.
fn pop<T>(queue: &RefCell<VecDeque<T>>) -> Option<T> {
    queue.borrow_mut().pop_front()
}

impl JobExecutor for MicrotaskExecutor {
    fn enqueue_job(self: Rc<Self>, job: Job, _context: &mut Context) {
        match job {
            Job::PromiseJob(job) => self.promise_jobs.borrow_mut().push_back(job),
            Job::GenericJob(job) => self.generic_jobs.borrow_mut().push_back(job),
            _ => tracing::warn!("Unsupported job type enqueued, ignoring"),
        }
    }

    fn run_jobs(self: Rc<Self>, context: &mut Context) -> boa_engine::JsResult<()> {
        self.drain(context);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::{js_string, JsValue, Source};

    fn context_with(executor: &Rc<MicrotaskExecutor>) -> Context {
        Context::builder()
            .job_executor(executor.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_executor_is_idle() {
        let executor = MicrotaskExecutor::new();
        assert!(!executor.has_pending_jobs());

        let mut context = Context::default();
        assert_eq!(executor.drain(&mut context), 0);
    }

    #[test]
    fn test_generic_jobs_run_in_order() {
        let executor = Rc::new(MicrotaskExecutor::new());
        let mut context = Context::default();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for n in 0..3 {
            let seen = Rc::clone(&seen);
            let realm = context.realm().clone();
            let job = Job::GenericJob(GenericJob::new(
                move |_| {
                    seen.borrow_mut().push(n);
                    Ok(JsValue::undefined())
                },
                realm,
            ));
            executor.clone().enqueue_job(job, &mut context);
        }

        assert!(executor.has_pending_jobs());
        assert_eq!(executor.drain(&mut context), 3);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
        assert!(!executor.has_pending_jobs());
    }

    #[test]
    fn test_promise_reactions_wait_for_drain() {
        let executor = Rc::new(MicrotaskExecutor::new());
        let mut context = context_with(&executor);

        context
            .eval(Source::from_bytes("var seen = 'no'; Promise.resolve('yes').then(v => { seen = v; });"))
            .unwrap();
        let before = context.global_object().get(js_string!("seen"), &mut context).unwrap();
        assert_eq!(before.as_string().map(|s| s.to_std_string_escaped()), Some("no".to_owned()));

        assert!(executor.drain(&mut context) >= 1);
        let after = context.global_object().get(js_string!("seen"), &mut context).unwrap();
        assert_eq!(after.as_string().map(|s| s.to_std_string_escaped()), Some("yes".to_owned()));
    }

    #[test]
    fn test_chained_reactions_run_in_one_drain() {
        let executor = Rc::new(MicrotaskExecutor::new());
        let mut context = context_with(&executor);

        context
            .eval(Source::from_bytes(
                "var depth = 0; Promise.resolve().then(() => depth++).then(() => depth++).then(() => depth++);",
            ))
            .unwrap();
        let drained = executor.drain(&mut context);

        let depth = context.global_object().get(js_string!("depth"), &mut context).unwrap();
        assert_eq!(depth.as_number(), Some(3.0));
        assert!(drained >= 3);
        assert!(!executor.has_pending_jobs());
    }
}
