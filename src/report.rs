use crate::domain::result::AggregationResult;

pub const NO_RECEIPTS: &str = "No receipts found";

/// One-line, user-facing rendering. Diagnostics stay in the JSON form.
pub fn render(result: &AggregationResult) -> String {
    match result {
        AggregationResult::NoReceipts { .. } => NO_RECEIPTS.to_string(),
        AggregationResult::Total { amount, .. } => format!("Total spent: ${amount}"),
    }
}

pub fn render_json(result: &AggregationResult) -> serde_json::Result<String> {
    serde_json::to_string_pretty(result)
}
