//! Built-in demo capability adapters (spec §4.2).
//!
//! These ship with the runtime to exercise the flight-booking scenario of
//! §8. Per the Non-goals/Out-of-scope section, their `run` bodies are
//! intentionally simple deterministic stand-ins, not real integrations.

use crate::adapter::{CapabilityAdapter, CommitOutcome, PreparedInputs};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use warp_core::CapabilityError;

fn require_field<'a>(
    inputs: &'a PreparedInputs,
    step_name: &str,
    field: &str,
) -> Result<&'a Value, CapabilityError> {
    inputs.get(field).ok_or_else(|| CapabilityError::InvalidInput {
        step_name: step_name.to_string(),
        reason: format!("missing required field '{field}'"),
    })
}

/// Searches the web for a free-text query. Stand-in: echoes a synthetic
/// result set derived from the query.
pub struct WebSearch;

#[async_trait]
impl CapabilityAdapter for WebSearch {
    fn node_name(&self) -> &str {
        "web_search"
    }

    fn prepare(&self, inputs: PreparedInputs) -> Result<PreparedInputs, CapabilityError> {
        require_field(&inputs, "web_search", "query")?;
        Ok(inputs)
    }

    async fn run(
        &self,
        prepared: PreparedInputs,
        _cancel: CancellationToken,
    ) -> Result<Value, CapabilityError> {
        let query = prepared.get("query").and_then(Value::as_str).unwrap_or("");
        Ok(json!({
            "results": [format!("result for '{query}'")],
        }))
    }

    fn commit(
        &self,
        _prepared: &PreparedInputs,
        result: &Value,
    ) -> Result<CommitOutcome, CapabilityError> {
        let mut outputs = Map::new();
        outputs.insert("search_results".to_string(), result.clone());
        Ok(CommitOutcome::new(outputs))
    }
}

/// Searches for flights between an origin and destination. Stand-in: emits
/// a fixed itinerary shaped by the inputs.
pub struct FlightSearch;

#[async_trait]
impl CapabilityAdapter for FlightSearch {
    fn node_name(&self) -> &str {
        "flight_search"
    }

    fn prepare(&self, inputs: PreparedInputs) -> Result<PreparedInputs, CapabilityError> {
        require_field(&inputs, "flight_search", "origin")?;
        require_field(&inputs, "flight_search", "destination")?;
        Ok(inputs)
    }

    async fn run(
        &self,
        prepared: PreparedInputs,
        _cancel: CancellationToken,
    ) -> Result<Value, CapabilityError> {
        let origin = prepared.get("origin").and_then(Value::as_str).unwrap_or("");
        let destination = prepared
            .get("destination")
            .and_then(Value::as_str)
            .unwrap_or("");
        Ok(json!({
            "flights": [{
                "origin": origin,
                "destination": destination,
                "price_usd": 450,
                "carrier": "Demo Air",
            }],
        }))
    }

    fn commit(
        &self,
        _prepared: &PreparedInputs,
        result: &Value,
    ) -> Result<CommitOutcome, CapabilityError> {
        let mut outputs = Map::new();
        outputs.insert("flight_options".to_string(), result.clone());
        Ok(CommitOutcome::new(outputs))
    }
}

/// Analyzes candidate options against a budget. Stand-in: filters by a
/// `max_price_usd` field if present.
pub struct CostAnalysis;

#[async_trait]
impl CapabilityAdapter for CostAnalysis {
    fn node_name(&self) -> &str {
        "cost_analysis"
    }

    fn prepare(&self, inputs: PreparedInputs) -> Result<PreparedInputs, CapabilityError> {
        require_field(&inputs, "cost_analysis", "flight_options")?;
        Ok(inputs)
    }

    async fn run(
        &self,
        prepared: PreparedInputs,
        _cancel: CancellationToken,
    ) -> Result<Value, CapabilityError> {
        let budget = prepared
            .get("max_price_usd")
            .and_then(Value::as_f64)
            .unwrap_or(f64::MAX);
        let empty = vec![];
        let flights = prepared
            .get("flight_options")
            .and_then(|v| v.get("flights"))
            .and_then(Value::as_array)
            .unwrap_or(&empty);
        let within_budget: Vec<Value> = flights
            .iter()
            .filter(|f| f.get("price_usd").and_then(Value::as_f64).unwrap_or(0.0) <= budget)
            .cloned()
            .collect();
        Ok(json!({ "affordable_options": within_budget }))
    }

    fn commit(
        &self,
        _prepared: &PreparedInputs,
        result: &Value,
    ) -> Result<CommitOutcome, CapabilityError> {
        let mut outputs = Map::new();
        outputs.insert("cost_summary".to_string(), result.clone());
        Ok(CommitOutcome::new(outputs))
    }
}

/// Ranks affordable options against free-text stated preferences.
/// Stand-in: picks the first affordable option.
pub struct PreferenceMatcher;

#[async_trait]
impl CapabilityAdapter for PreferenceMatcher {
    fn node_name(&self) -> &str {
        "preference_matcher"
    }

    fn prepare(&self, inputs: PreparedInputs) -> Result<PreparedInputs, CapabilityError> {
        require_field(&inputs, "preference_matcher", "cost_summary")?;
        Ok(inputs)
    }

    async fn run(
        &self,
        prepared: PreparedInputs,
        _cancel: CancellationToken,
    ) -> Result<Value, CapabilityError> {
        let best = prepared
            .get("cost_summary")
            .and_then(|v| v.get("affordable_options"))
            .and_then(Value::as_array)
            .and_then(|options| options.first())
            .cloned();
        match best {
            Some(option) => Ok(json!({ "recommended_option": option })),
            None => Err(CapabilityError::InvalidInput {
                step_name: "preference_matcher".to_string(),
                reason: "no affordable options to recommend".to_string(),
            }),
        }
    }

    fn commit(
        &self,
        _prepared: &PreparedInputs,
        result: &Value,
    ) -> Result<CommitOutcome, CapabilityError> {
        let mut outputs = Map::new();
        outputs.insert("recommendation".to_string(), result.clone());
        Ok(CommitOutcome::new(outputs))
    }
}

/// A user-interaction node (§4.6): the Executor recognizes this adapter by
/// name and suspends on it rather than invoking `run` directly, emitting
/// `user_question` and awaiting `user_response`. Its `prepare`/`run`/
/// `commit` are still implemented so it behaves uniformly once the
/// Interaction Stage has resolved an answer into the scratchpad.
pub struct UserQuery;

#[async_trait]
impl CapabilityAdapter for UserQuery {
    fn node_name(&self) -> &str {
        "user_query"
    }

    fn prepare(&self, inputs: PreparedInputs) -> Result<PreparedInputs, CapabilityError> {
        require_field(&inputs, "user_query", "prompt")?;
        Ok(inputs)
    }

    async fn run(
        &self,
        prepared: PreparedInputs,
        _cancel: CancellationToken,
    ) -> Result<Value, CapabilityError> {
        // The Executor substitutes the user's reply before invoking `run`
        // for a user-interaction node; by the time we get here, `response`
        // has already been placed in `prepared` by the Interaction Stage.
        let response = prepared.get("response").cloned().unwrap_or(Value::Null);
        Ok(json!({ "response": response }))
    }

    fn commit(
        &self,
        _prepared: &PreparedInputs,
        result: &Value,
    ) -> Result<CommitOutcome, CapabilityError> {
        let mut outputs = Map::new();
        outputs.insert(
            "user_answer".to_string(),
            result.get("response").cloned().unwrap_or(Value::Null),
        );
        Ok(CommitOutcome::new(outputs))
    }
}

/// Books a flight. Sensitive tier: gated by a permission request before the
/// Executor invokes it (§4.1, §4.4). Stand-in: fabricates a confirmation
/// code.
pub struct FlightBooking;

#[async_trait]
impl CapabilityAdapter for FlightBooking {
    fn node_name(&self) -> &str {
        "flight_booking"
    }

    fn prepare(&self, inputs: PreparedInputs) -> Result<PreparedInputs, CapabilityError> {
        require_field(&inputs, "flight_booking", "recommended_option")?;
        Ok(inputs)
    }

    async fn run(
        &self,
        prepared: PreparedInputs,
        _cancel: CancellationToken,
    ) -> Result<Value, CapabilityError> {
        let option = prepared
            .get("recommended_option")
            .cloned()
            .unwrap_or(Value::Null);
        Ok(json!({
            "confirmation_code": "WARP-DEMO-0001",
            "booked_option": option,
        }))
    }

    fn commit(
        &self,
        _prepared: &PreparedInputs,
        result: &Value,
    ) -> Result<CommitOutcome, CapabilityError> {
        let mut outputs = Map::new();
        outputs.insert("booking_confirmation".to_string(), result.clone());
        Ok(CommitOutcome::new(outputs))
    }
}

/// Captures payment for a booking. Critical tier: always gated, highest
/// stakes. Stand-in: fabricates a transaction id, never touches a real
/// payment processor.
pub struct PaymentProcessing;

#[async_trait]
impl CapabilityAdapter for PaymentProcessing {
    fn node_name(&self) -> &str {
        "payment_processing"
    }

    fn prepare(&self, inputs: PreparedInputs) -> Result<PreparedInputs, CapabilityError> {
        require_field(&inputs, "payment_processing", "booking_confirmation")?;
        Ok(inputs)
    }

    async fn run(
        &self,
        prepared: PreparedInputs,
        _cancel: CancellationToken,
    ) -> Result<Value, CapabilityError> {
        let booking = prepared
            .get("booking_confirmation")
            .cloned()
            .unwrap_or(Value::Null);
        Ok(json!({
            "transaction_id": "WARP-TXN-0001",
            "booking": booking,
            "status": "captured",
        }))
    }

    fn commit(
        &self,
        _prepared: &PreparedInputs,
        result: &Value,
    ) -> Result<CommitOutcome, CapabilityError> {
        let mut outputs = Map::new();
        outputs.insert("payment_receipt".to_string(), result.clone());
        Ok(CommitOutcome::new(outputs))
    }
}

/// Assembles a human-readable summary from prior step outputs. Stand-in:
/// joins whatever text fields it can find.
pub struct ResultSummarizer;

#[async_trait]
impl CapabilityAdapter for ResultSummarizer {
    fn node_name(&self) -> &str {
        "result_summarizer"
    }

    fn prepare(&self, inputs: PreparedInputs) -> Result<PreparedInputs, CapabilityError> {
        Ok(inputs)
    }

    async fn run(
        &self,
        prepared: PreparedInputs,
        _cancel: CancellationToken,
    ) -> Result<Value, CapabilityError> {
        let summary = prepared
            .values()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Ok(json!({ "summary": summary }))
    }

    fn commit(
        &self,
        _prepared: &PreparedInputs,
        result: &Value,
    ) -> Result<CommitOutcome, CapabilityError> {
        let mut outputs = Map::new();
        outputs.insert(
            "summary".to_string(),
            result.get("summary").cloned().unwrap_or(Value::Null),
        );
        Ok(CommitOutcome::new(outputs))
    }
}
