//! Test helper utilities: an in-process rendering service with counters

use async_trait::async_trait;
use imagegen_orchestrator::config::OrchestratorConfig;
use imagegen_orchestrator::services::comfy::{
    HistoryEntry, ImageRef, NodeOutput, RenderService, ServiceError,
};
use imagegen_orchestrator::services::orchestrator::Orchestrator;
use imagegen_orchestrator::services::template::JobTemplate;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::fixtures::minimal_template;

#[derive(Default)]
struct Counters {
    next_id: usize,
    remaining_polls: HashMap<String, usize>,
    in_flight: usize,
    peak_in_flight: usize,
    submit_calls: usize,
    view_calls: usize,
    prompts: Vec<String>,
}

/// Fake rendering service. Every job finishes with one image after a fixed
/// number of history polls; a job counts as in flight from submit until its
/// terminal history reply.
pub struct InstrumentedService {
    polls_to_finish: usize,
    submit_delay: Duration,
    counters: Mutex<Counters>,
}

impl InstrumentedService {
    pub fn new(polls_to_finish: usize, submit_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            polls_to_finish: polls_to_finish.max(1),
            submit_delay,
            counters: Mutex::new(Counters::default()),
        })
    }

    pub fn peak_in_flight(&self) -> usize {
        self.counters.lock().unwrap().peak_in_flight
    }

    pub fn in_flight(&self) -> usize {
        self.counters.lock().unwrap().in_flight
    }

    pub fn submit_calls(&self) -> usize {
        self.counters.lock().unwrap().submit_calls
    }

    pub fn view_calls(&self) -> usize {
        self.counters.lock().unwrap().view_calls
    }

    /// Prompt texts in the order the service received them.
    pub fn prompts(&self) -> Vec<String> {
        self.counters.lock().unwrap().prompts.clone()
    }
}

#[async_trait]
impl RenderService for InstrumentedService {
    async fn submit(&self, graph: &[u8]) -> Result<String, ServiceError> {
        let graph: Value = serde_json::from_slice(graph)?;
        let job_id = {
            let mut counters = self.counters.lock().unwrap();
            counters.submit_calls += 1;
            counters.next_id += 1;
            counters.in_flight += 1;
            counters.peak_in_flight = counters.peak_in_flight.max(counters.in_flight);
            counters.prompts.push(
                graph["45"]["inputs"]["text"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            );
            let job_id = format!("job-{}", counters.next_id);
            counters
                .remaining_polls
                .insert(job_id.clone(), self.polls_to_finish);
            job_id
        };
        tokio::time::sleep(self.submit_delay).await;
        Ok(job_id)
    }

    async fn history(&self, job_id: &str) -> Result<Option<HistoryEntry>, ServiceError> {
        let mut counters = self.counters.lock().unwrap();
        let Some(remaining) = counters.remaining_polls.get_mut(job_id) else {
            return Ok(None);
        };
        *remaining -= 1;
        if *remaining > 0 {
            return Ok(None);
        }
        counters.remaining_polls.remove(job_id);
        counters.in_flight -= 1;

        let outputs = vec![(
            "9".to_string(),
            NodeOutput {
                images: vec![ImageRef {
                    filename: format!("{job_id}.png"),
                    subfolder: String::new(),
                    kind: "output".to_string(),
                }],
            },
        )];
        Ok(Some(HistoryEntry { outputs }))
    }

    async fn view(&self, filename: &str) -> Result<Vec<u8>, ServiceError> {
        self.counters.lock().unwrap().view_calls += 1;
        Ok(format!("image:{filename}").into_bytes())
    }

    async fn ping(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Orchestrator over `service` with a fast poll loop writing into `output_dir`.
pub fn build_orchestrator(
    service: Arc<dyn RenderService>,
    output_dir: &Path,
    slots: usize,
) -> Orchestrator {
    let config = OrchestratorConfig {
        poll_interval: Duration::from_millis(2),
        poll_max_attempts: 50,
        max_concurrent_jobs: slots,
        output_dir: output_dir.to_path_buf(),
        ..OrchestratorConfig::default()
    };
    let template = JobTemplate::from_value(minimal_template()).expect("template");
    Orchestrator::new(service, template, config)
}
