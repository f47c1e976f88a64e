//! Run orchestrator
//!
//! One run progresses through:
//! INIT → DISCOVER → NO_NEW_ITEMS | PER_ITEM_LOOP → COMPLETE
//!
//! Discovery failure is fatal. The item loop covers new items in source
//! order, then registered items an earlier run left incomplete. Every fetch
//! and branch failure is appended to the run's error list and the loop moves
//! on; the final verdict is failure iff that list is non-empty.

use crate::invoker::StepInvoker;
use chrono::{DateTime, Utc};
use scout_common::envelope::{
    DiscoveryRequest, ErrorEntry, ItemRequest, Stage, StepResponse,
};
use scout_common::models::FilingRecord;
use scout_common::retry::with_timeout;
use scout_common::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Orchestrator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Init,
    Discover,
    NoNewItems,
    PerItemLoop,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Failure,
}

/// Phase transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub old_phase: RunPhase,
    pub new_phase: RunPhase,
    pub transitioned_at: DateTime<Utc>,
}

/// Working state of one run
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub run_id: Uuid,
    pub phase: RunPhase,
    /// New items in source order, then pending items
    pub items: Vec<FilingRecord>,
    /// How many of `items` are pending items from earlier runs
    pub pending_count: usize,
    /// Index of the item being processed
    pub cursor: usize,
    pub errors: Vec<ErrorEntry>,
    pub transitions: Vec<PhaseTransition>,
    pub verdict: Option<Verdict>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            phase: RunPhase::Init,
            items: Vec::new(),
            pending_count: 0,
            cursor: 0,
            errors: Vec::new(),
            transitions: Vec::new(),
            verdict: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn transition_to(&mut self, new_phase: RunPhase) -> &PhaseTransition {
        let transition = PhaseTransition {
            old_phase: self.phase,
            new_phase,
            transitioned_at: Utc::now(),
        };
        info!(
            run_id = %self.run_id,
            from = ?transition.old_phase,
            to = ?new_phase,
            "Run phase transition"
        );
        self.phase = new_phase;
        self.transitions.push(transition);
        &self.transitions[self.transitions.len() - 1]
    }

    /// Enter COMPLETE with the verdict implied by the error list
    fn complete(&mut self) -> Verdict {
        let verdict = if self.errors.is_empty() {
            Verdict::Success
        } else {
            Verdict::Failure
        };
        self.verdict = Some(verdict);
        self.transition_to(RunPhase::Complete);
        self.ended_at = Some(Utc::now());
        verdict
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-item counters for the run summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    pub fetched: usize,
    pub fetch_skipped: usize,
    pub fetch_failed: usize,
    pub fully_enriched: usize,
    pub partially_enriched: usize,
    pub enrichment_failed: usize,
}

/// Final outcome of one run (printed as the JSON summary line)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: String,
    pub verdict: Verdict,
    pub processed_count: usize,
    pub new_items: usize,
    /// Items revisited because an earlier run left them incomplete
    pub pending_items: usize,
    pub counts: ItemCounts,
    pub errors: Vec<ErrorEntry>,
    pub transitions: Vec<PhaseTransition>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl RunReport {
    /// 0 for success (including no new items), 1 for a failure verdict
    pub fn exit_code(&self) -> u8 {
        match self.verdict {
            Verdict::Success => 0,
            Verdict::Failure => 1,
        }
    }

    /// Failed items as `(key, stage, message)` lines for the run log
    pub fn failure_lines(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| {
                format!(
                    "{} [{}]: {}",
                    e.item_key.as_deref().unwrap_or("<run>"),
                    e.stage,
                    e.message
                )
            })
            .collect()
    }
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub discovery: DiscoveryRequest,
    /// Deadline for any single step invocation
    pub step_timeout: Duration,
    /// Discovery invocations before the run fails (initial call plus retries)
    pub discovery_attempts: u32,
}

pub struct Orchestrator {
    invoker: Arc<dyn StepInvoker>,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(invoker: Arc<dyn StepInvoker>, settings: RunSettings) -> Self {
        Self { invoker, settings }
    }

    /// Execute one run to completion
    pub async fn run(&self) -> RunReport {
        let mut state = ExecutionState::new();
        let mut counts = ItemCounts::default();
        info!(run_id = %state.run_id, "Starting run");

        state.transition_to(RunPhase::Discover);
        let discovered = match self.discover_with_retry().await {
            Ok(response) => response,
            Err(e) => {
                error!(run_id = %state.run_id, error = %e, "Discovery failed, aborting run");
                state.errors.push(ErrorEntry {
                    item_key: None,
                    stage: Stage::Discovery,
                    message: e.to_string(),
                });
                state.complete();
                return report(state, counts, 0, "failed");
            }
        };
        let processed_count = discovered.processed_count;
        state.pending_count = discovered.pending_items.len();
        state.items = discovered.new_items;
        state.items.extend(discovered.pending_items);

        if state.items.is_empty() {
            state.transition_to(RunPhase::NoNewItems);
            state.complete();
            return report(state, counts, processed_count, "no_new_items");
        }

        state.transition_to(RunPhase::PerItemLoop);
        let items = std::mem::take(&mut state.items);
        for (index, item) in items.iter().enumerate() {
            state.cursor = index;
            self.process_item(item, &mut state.errors, &mut counts).await;
        }
        state.items = items;

        let status = match state.complete() {
            Verdict::Success => "completed",
            Verdict::Failure => "completed_with_errors",
        };
        report(state, counts, processed_count, status)
    }

    async fn discover_with_retry(&self) -> Result<scout_common::envelope::DiscoveryResponse> {
        let attempts = self.settings.discovery_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let call = self.invoker.discover(&self.settings.discovery);
            match with_timeout("discovery", self.settings.step_timeout, call).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < attempts => {
                    warn!(attempt, error = %e, "Discovery failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch then enrich one item, appending any failures to `errors`
    async fn process_item(
        &self,
        item: &FilingRecord,
        errors: &mut Vec<ErrorEntry>,
        counts: &mut ItemCounts,
    ) {
        let key = item.accession_number.clone();
        let request = ItemRequest::from(item);

        let fetched = with_timeout(
            "fetch",
            self.settings.step_timeout,
            self.invoker.fetch(&request),
        )
        .await
        .unwrap_or_else(|e| StepResponse::failed(e.to_string()));

        let locator = match (&fetched.output_locator, fetched.is_success()) {
            (Some(locator), true) => locator.clone(),
            _ => {
                let message = if fetched.is_success() {
                    "fetch succeeded without an output locator".to_string()
                } else {
                    fetched.failure_reason().to_string()
                };
                warn!(item = %key, error = %message, "Fetch failed, skipping enrichment");
                counts.fetch_failed += 1;
                errors.push(ErrorEntry {
                    item_key: Some(key),
                    stage: Stage::Fetch,
                    message,
                });
                return;
            }
        };
        if fetched.skipped {
            counts.fetch_skipped += 1;
        } else {
            counts.fetched += 1;
        }

        let request = request.with_document(locator);
        let enriched = with_timeout(
            "enrichment",
            self.settings.step_timeout,
            self.invoker.enrich(&request),
        )
        .await;

        // Branch deadlines sit inside the step deadline, so this only fires
        // when the step itself hangs; no branch result is known then.
        let enriched = match enriched {
            Ok(enriched) => enriched,
            Err(e) => {
                let message = e.to_string();
                warn!(item = %key, error = %message, "Enrichment step failed");
                counts.enrichment_failed += 1;
                errors.push(ErrorEntry {
                    item_key: Some(key),
                    stage: Stage::Enrichment,
                    message,
                });
                return;
            }
        };

        if enriched.fully_completed() {
            counts.fully_enriched += 1;
        } else if enriched.partially_completed() {
            counts.partially_enriched += 1;
        } else {
            counts.enrichment_failed += 1;
        }

        for (stage, response) in enriched.branches() {
            if !response.is_success() {
                warn!(item = %key, stage = %stage, error = response.failure_reason(), "Enrichment branch failed");
                errors.push(ErrorEntry {
                    item_key: Some(key.clone()),
                    stage,
                    message: response.failure_reason().to_string(),
                });
            }
        }
    }
}

fn report(state: ExecutionState, counts: ItemCounts, processed_count: usize, status: &str) -> RunReport {
    RunReport {
        run_id: state.run_id,
        status: status.to_string(),
        verdict: state.verdict.unwrap_or(Verdict::Failure),
        processed_count,
        new_items: state.items.len() - state.pending_count,
        pending_items: state.pending_count,
        counts,
        errors: state.errors,
        transitions: state.transitions,
        started_at: state.started_at,
        ended_at: state.ended_at.unwrap_or_else(Utc::now),
    }
}
