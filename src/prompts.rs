//! Prompt templates for the classifier stages.
//!
//! The schema legend is rendered from the table configuration so the
//! prompts never drift from the allow-list the query builder enforces.

use crate::metadata::TableMetadata;
use itertools::Itertools;

fn schema_legend(meta: &TableMetadata) -> String {
    meta.allowed_columns
        .iter()
        .map(|column| {
            let type_tag = meta
                .column_type(column)
                .map(|t| format!("{:?}", t).to_lowercase())
                .unwrap_or_else(|| "unknown".to_string());
            format!("- {} ({})", column, type_tag)
        })
        .join("\n")
}

/// First stage: decide whether the question is answerable with a query,
/// and whether it names customers.
pub fn classification_prompt(question: &str) -> String {
    format!(
        r#"You are the routing stage of a financial reporting assistant. The user asks
questions about weekly revenue and gross profit data in a chat thread.

Classify the conversation below and return ONLY valid JSON with this shape:
{{
  "is_queryable": true|false,
  "reply_to_user": "only when is_queryable is false: a short, polite reply",
  "client_related": true|false,
  "clients_mentioned": ["free-text customer fragments, in mention order"],
  "confirmation_required": true|false,
  "chart_or_file_requested": true|false
}}

Rules:
1. is_queryable is false for greetings, meta questions, or anything the
   reporting table cannot answer. Always fill reply_to_user in that case.
2. client_related is true when the question is about specific customers;
   copy the names exactly as the user typed them into clients_mentioned.
3. confirmation_required is true only when the question is so ambiguous
   that running a query would likely answer the wrong thing.
4. chart_or_file_requested is true when the user asks for a chart, a file,
   an export, or a downloadable artifact.

Conversation:
{question}

Respond with JSON only."#,
        question = question
    )
}

/// Second stage: translate the question into structured filters and
/// metrics over the allow-listed columns.
pub fn filter_extraction_prompt(question: &str, meta: &TableMetadata) -> String {
    format!(
        r#"You translate natural-language business questions into structured JSON
filters for a single reporting table.

### Table columns:
{legend}

### Rules:
1. Return ONLY valid JSON with the structure:
   {{
     "filters": {{"column_name": ["value1", "value2"]}},
     "metrics": ["revenue", "gross_profit"]
   }}
2. Filters and metrics may only use the columns listed above.
3. About data_week (the snapshot week, always a Monday):
   - If the user does not mention any week, use ["CURRENT"].
   - "last week" means ["PREVIOUS"].
   - Week-over-week comparisons mean ["CURRENT", "PREVIOUS"].
   - Never invent concrete dates for data_week; use the tokens.
4. Dates in other columns use the YYYY-MM-DD format.
5. Metrics the user asks to total go into "metrics"; columns the user wants
   the breakdown by also go into "metrics" after the measures.

### Example:
User: "Revenue and gross profit for ES Staffing, week over week"
JSON:
{{
  "filters": {{
    "country": ["ES"],
    "service_type": ["Staffing"],
    "data_week": ["CURRENT", "PREVIOUS"]
  }},
  "metrics": ["revenue", "gross_profit", "country"]
}}

### Actual user question:
{question}

Respond with JSON only."#,
        legend = schema_legend(meta),
        question = question
    )
}

/// Direct synthesis over a small result set.
pub fn synthesis_prompt(question: &str, rows_json: &str, meta: &TableMetadata) -> String {
    format!(
        r#"You are a data analyst. I will give you a question and a dataset in JSON
format. The dataset was queried from a table with these columns:
{legend}

Question:
{question}

Data (JSON):
{rows}

Based on the dataset, answer the question clearly and accurately. If the
dataset is empty, say that no data matched the question."#,
        legend = schema_legend(meta),
        question = question,
        rows = rows_json
    )
}
