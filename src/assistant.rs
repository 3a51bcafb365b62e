//! Pipeline orchestrator: one user question in, one delivered reply out.
//!
//! The pipeline is a straight-line state machine with two early terminal
//! branches (non-queryable questions, entity clarification). Nothing is
//! retained between questions; a clarified question restarts from scratch.

use crate::code_execution::AnalysisService;
use crate::customer_matcher::{load_customer_catalog, CustomerMatcher, MatchOutcome};
use crate::error::Result;
use crate::intent::{FilterSpec, IntentDescription};
use crate::llm::CompletionModel;
use crate::metadata::TableMetadata;
use crate::prompts;
use crate::query_builder::build_query;
use crate::response_parser::extract_json_object;
use crate::slack::Transport;
use crate::time::resolve_data_week;
use crate::warehouse::{QueryResult, Warehouse};
use chrono::Local;
use itertools::Itertools;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Row count above which the answer is delegated to the analysis
/// collaborator instead of direct synthesis.
const ROW_THRESHOLD: usize = 100;

const FALLBACK_REFUSAL: &str = "I can only help with questions about the reporting data.";

/// Terminal state of one processed question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not queryable or confirmation demanded; the classifier's reply was
    /// delivered instead.
    Rejected,
    /// Entity resolution needs the user's help; a clarification was sent.
    Clarifying,
    /// A full answer was delivered.
    Delivered,
    /// The pipeline failed and a generic error reply was delivered.
    Failed,
}

pub struct Assistant {
    llm: Arc<dyn CompletionModel>,
    warehouse: Arc<dyn Warehouse>,
    transport: Arc<dyn Transport>,
    analysis: Arc<dyn AnalysisService>,
    matcher: CustomerMatcher,
    table: TableMetadata,
}

impl Assistant {
    pub fn new(
        llm: Arc<dyn CompletionModel>,
        warehouse: Arc<dyn Warehouse>,
        transport: Arc<dyn Transport>,
        analysis: Arc<dyn AnalysisService>,
        table: TableMetadata,
    ) -> Self {
        Self {
            llm,
            warehouse,
            transport,
            analysis,
            matcher: CustomerMatcher::default(),
            table,
        }
    }

    /// Process one question and always deliver something: the answer, a
    /// clarification, or a failure reply. Never panics the caller's task.
    pub async fn handle_question(&self, channel: &str, thread_ts: &str, text: &str) -> Outcome {
        match self.process(channel, thread_ts, text).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "pipeline failed");
                let reply = format!("Error processing your question: {}", e);
                if let Err(send_err) = self
                    .transport
                    .send_message(channel, &reply, Some(thread_ts))
                    .await
                {
                    error!(error = %send_err, "could not deliver failure reply");
                }
                Outcome::Failed
            }
        }
    }

    async fn process(&self, channel: &str, thread_ts: &str, text: &str) -> Result<Outcome> {
        let request_id = Uuid::new_v4();
        info!(%request_id, %channel, "processing question");

        // The whole thread is the question; fall back to the triggering
        // message when history is unavailable.
        let mut question = match self.transport.thread_history(channel, thread_ts).await {
            Ok(history) if !history.trim().is_empty() => history,
            Ok(_) => text.to_string(),
            Err(e) => {
                warn!(error = %e, "thread history unavailable, using event text");
                text.to_string()
            }
        };

        // Received -> Classified
        let raw = self
            .llm
            .complete(&prompts::classification_prompt(&question))
            .await?;
        let intent: IntentDescription = serde_json::from_value(extract_json_object(&raw)?)?;
        debug!(?intent, "intent classified");

        // Classified -> Rejected
        if !intent.is_queryable || intent.confirmation_required {
            let reply = intent
                .reply_to_user
                .unwrap_or_else(|| FALLBACK_REFUSAL.to_string());
            self.transport
                .send_message(channel, &reply, Some(thread_ts))
                .await?;
            return Ok(Outcome::Rejected);
        }

        let placeholder = self
            .transport
            .send_message(channel, "Thinking...", Some(thread_ts))
            .await?;

        // Classified -> EntityResolving
        if intent.client_related && !intent.clients_mentioned.is_empty() {
            let catalog = load_customer_catalog(self.warehouse.as_ref(), &self.table).await?;
            match self
                .matcher
                .match_customers(&intent.clients_mentioned, &catalog)
            {
                MatchOutcome::DirectMatch { exact } => {
                    let names = exact.iter().join(", ");
                    info!(%names, "customers resolved");
                    question = format!("{}\n\nResolved customer names: {}", question, names);
                }
                MatchOutcome::AmbiguousMatch { candidates } => {
                    let listing = candidates.iter().map(|c| format!("- {}", c)).join("\n");
                    self.transport
                        .update_message(
                            channel,
                            &placeholder,
                            &format!(
                                "I found several possible customers. Which one did you mean?\n{}",
                                listing
                            ),
                        )
                        .await?;
                    return Ok(Outcome::Clarifying);
                }
                MatchOutcome::NotFound => {
                    self.transport
                        .update_message(
                            channel,
                            &placeholder,
                            "I could not find any customer matching that name.",
                        )
                        .await?;
                    return Ok(Outcome::Clarifying);
                }
            }
        }

        // EntityResolved -> FilterBuilt
        let raw = self
            .llm
            .complete(&prompts::filter_extraction_prompt(&question, &self.table))
            .await?;
        let mut spec: FilterSpec = serde_json::from_value(extract_json_object(&raw)?)?;
        resolve_data_week(&mut spec.filters, Local::now().date_naive());
        let sql = build_query(&spec, &self.table);
        debug!(%sql, "query built");

        // FilterBuilt -> Executed. Degrade over fail: an execution error
        // becomes an empty result set at this boundary only.
        let table = match self.warehouse.run_query(&sql).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "query failed, continuing with an empty result set");
                QueryResult::default()
            }
        };
        info!(rows = table.row_count(), "query executed");

        // Executed -> Formatted
        let answer = if table.row_count() > ROW_THRESHOLD || intent.chart_or_file_requested {
            self.analysis.analyze(&question, &table).await?
        } else {
            self.synthesize(&question, &table).await?
        };

        // Formatted -> Delivered
        self.transport
            .update_message(channel, &placeholder, &answer)
            .await?;
        info!(%request_id, "answer delivered");
        Ok(Outcome::Delivered)
    }

    async fn synthesize(&self, question: &str, table: &QueryResult) -> Result<String> {
        let rows_json = serde_json::to_string(&table.rows)?;
        let answer = self
            .llm
            .complete(&prompts::synthesis_prompt(question, &rows_json, &self.table))
            .await?;
        Ok(answer.trim().to_string())
    }
}
