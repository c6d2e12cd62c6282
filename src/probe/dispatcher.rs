//! Fan-out of the full (question × model × repetition) probe batch.

use super::executor::{ProbeRequest, ProbeRunner};
use crate::models::{ModelSpec, Question, VisibilityAnswer};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything needed to enumerate a run's probes.
#[derive(Debug, Clone)]
pub struct ProbePlan {
    pub run_id: String,
    pub brand: String,
    pub questions: Vec<Question>,
    pub models: Vec<ModelSpec>,
    pub repetitions: u32,
}

impl ProbePlan {
    /// Number of probes in the batch.
    pub fn len(&self) -> usize {
        self.questions.len() * self.models.len() * self.repetitions as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The cross-product, ordered question → model → repetition.
    pub fn requests(&self) -> Vec<ProbeRequest> {
        let mut requests = Vec::with_capacity(self.len());
        for question in &self.questions {
            for model in &self.models {
                for run in 1..=self.repetitions {
                    requests.push(ProbeRequest {
                        run_id: self.run_id.clone(),
                        question_id: question.id.clone(),
                        question: question.question.clone(),
                        model: model.id.clone(),
                        run,
                        brand: self.brand.clone(),
                    });
                }
            }
        }
        requests
    }
}

/// Issues every probe of a plan concurrently.
pub struct Dispatcher<R: ProbeRunner> {
    runner: Arc<R>,
}

impl<R: ProbeRunner> Clone for Dispatcher<R> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
        }
    }
}

impl<R: ProbeRunner> Dispatcher<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self { runner }
    }

    /// Fire-and-forget: spawn every probe and return the number issued.
    ///
    /// Results are only observable through the run store.
    pub fn dispatch_detached(&self, plan: &ProbePlan) -> usize {
        let requests = plan.requests();
        let count = requests.len();
        info!("Dispatching {} probes for run {} (detached)", count, plan.run_id);

        for request in requests {
            let runner = Arc::clone(&self.runner);
            tokio::spawn(async move {
                let label = format!("{} / {} run {}", request.question_id, request.model, request.run);
                let record = runner.run_probe(request).await;
                debug!("Probe {} finished (failed: {})", label, record.failed);
            });
        }

        count
    }

    /// Spawn every probe and wait for all of them.
    ///
    /// Always returns one record per request, in request order. A probe task
    /// that panics or is cancelled is reported as a failed record.
    pub async fn dispatch_all(&self, plan: &ProbePlan) -> Vec<VisibilityAnswer> {
        let requests = plan.requests();
        info!(
            "Dispatching {} probes for run {} (await all)",
            requests.len(),
            plan.run_id
        );

        let handles: Vec<_> = requests
            .iter()
            .cloned()
            .map(|request| {
                let runner = Arc::clone(&self.runner);
                tokio::spawn(async move { runner.run_probe(request).await })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .zip(requests)
            .map(|(joined, request)| match joined {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        "Probe task for {} / {} run {} did not finish: {}",
                        request.question_id, request.model, request.run, e
                    );
                    VisibilityAnswer::failed(
                        request.question_id,
                        request.model,
                        request.run,
                        format!("Probe task aborted: {}", e),
                    )
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::questions;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn plan(repetitions: u32) -> ProbePlan {
        ProbePlan {
            run_id: "r1".to_string(),
            brand: "Acme".to_string(),
            questions: questions(3),
            models: vec![
                ModelSpec::new("a/one", "One"),
                ModelSpec::new("b/two", "Two"),
                ModelSpec::new("c/three", "Three"),
            ],
            repetitions,
        }
    }

    struct CountingRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProbeRunner for CountingRunner {
        async fn run_probe(&self, request: ProbeRequest) -> VisibilityAnswer {
            self.calls.fetch_add(1, Ordering::SeqCst);
            VisibilityAnswer::succeeded(request.question_id, request.model, request.run, "x", false, None)
        }
    }

    /// Fails one specific triple, panics on another.
    struct FlakyRunner;

    #[async_trait]
    impl ProbeRunner for FlakyRunner {
        async fn run_probe(&self, request: ProbeRequest) -> VisibilityAnswer {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if request.question_id == "Q2" && request.model == "b/two" && request.run == 1 {
                return VisibilityAnswer::failed(request.question_id, request.model, request.run, "boom");
            }
            if request.question_id == "Q3" && request.model == "c/three" && request.run == 3 {
                panic!("runner bug");
            }
            VisibilityAnswer::succeeded(request.question_id, request.model, request.run, "ok", true, Some(1))
        }
    }

    #[test]
    fn test_cross_product() {
        let plan = plan(3);
        let requests = plan.requests();
        assert_eq!(plan.len(), 27);
        assert_eq!(requests.len(), 27);
        assert_eq!(requests[0].question_id, "Q1");
        assert_eq!(requests[0].model, "a/one");
        assert_eq!(requests[0].run, 1);
        assert_eq!(requests[2].run, 3);
        assert_eq!(requests[3].model, "b/two");
        assert_eq!(requests[26].question_id, "Q3");

        let mut keys: Vec<_> = requests
            .iter()
            .map(|r| (r.question_id.clone(), r.model.clone(), r.run))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 27);
    }

    #[tokio::test]
    async fn test_dispatch_all_collects_every_record() {
        let dispatcher = Dispatcher::new(Arc::new(FlakyRunner));
        let records = dispatcher.dispatch_all(&plan(3)).await;

        assert_eq!(records.len(), 27);
        let failed: Vec<_> = records.iter().filter(|r| r.failed).collect();
        assert_eq!(failed.len(), 2);
        assert!(failed
            .iter()
            .any(|r| r.error.as_deref().unwrap_or("").contains("Probe task aborted")));
        assert_eq!(records[26].question_id, "Q3");
        assert_eq!(records[26].model, "c/three");
        assert!(records[26].failed);
    }

    #[tokio::test]
    async fn test_dispatch_detached_issues_all() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(Arc::clone(&runner));

        assert_eq!(dispatcher.dispatch_detached(&plan(2)), 18);

        for _ in 0..100 {
            if runner.calls.load(Ordering::SeqCst) == 18 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(runner.calls.load(Ordering::SeqCst), 18);
    }
}
