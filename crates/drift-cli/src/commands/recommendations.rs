//! Recommendation review commands

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use tabled::Tabled;

use crate::client::{ApiClient, Recommendation, ReviewRequest};
use crate::output::{
    color_status, format_currency, format_timestamp, print_error, print_info, print_json,
    print_success, print_table, truncate_id, OutputFormat,
};

/// Row for recommendations table
#[derive(Tabled)]
struct RecommendationRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Scenario")]
    scenario: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Savings/mo")]
    savings: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Last Seen")]
    last_detected: String,
}

impl From<&Recommendation> for RecommendationRow {
    fn from(r: &Recommendation) -> Self {
        Self {
            id: truncate_id(&r.id),
            scenario: r.scenario_id.clone(),
            resource: r.resource_id.clone(),
            resource_type: r.resource_type.clone(),
            action: r.action.describe(),
            savings: format_currency(r.detection.potential_savings),
            status: color_status(&r.status),
            last_detected: format_timestamp(&r.last_detected_at),
        }
    }
}

/// Human decisions and follow-ups on a recommendation
#[derive(Debug, Clone, PartialEq)]
pub enum Review {
    Approve,
    Reject,
    Snooze { until: DateTime<Utc> },
    Schedule { at: DateTime<Utc> },
    Execute,
}

impl Review {
    fn path_segment(&self) -> &'static str {
        match self {
            Review::Approve => "approve",
            Review::Reject => "reject",
            Review::Snooze { .. } => "snooze",
            Review::Schedule { .. } => "schedule",
            Review::Execute => "execute",
        }
    }

    fn body(&self) -> ReviewRequest {
        match self {
            Review::Snooze { until } => ReviewRequest {
                until: Some(until.to_rfc3339()),
                at: None,
            },
            Review::Schedule { at } => ReviewRequest {
                until: None,
                at: Some(at.to_rfc3339()),
            },
            _ => ReviewRequest::default(),
        }
    }
}

/// List recommendations, optionally filtered by status
pub async fn list_recommendations(
    client: &ApiClient,
    status: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let path = match &status {
        Some(status) => format!("api/v1/recommendations?status={}", status.to_lowercase()),
        None => "api/v1/recommendations".to_string(),
    };

    let recommendations: Vec<Recommendation> = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&recommendations)?,
        OutputFormat::Table => {
            let total: f64 = recommendations
                .iter()
                .filter(|r| r.status == "pending")
                .map(|r| r.detection.potential_savings)
                .sum();
            let count = recommendations.len();

            let rows: Vec<RecommendationRow> =
                recommendations.iter().map(RecommendationRow::from).collect();
            print_table(rows, "No recommendations found");

            if count > 0 {
                println!(
                    "\nTotal: {} recommendations, {} pending savings per month",
                    count,
                    format_currency(total)
                );
            }
        }
    }

    Ok(())
}

/// Send one review decision and show the updated recommendation
pub async fn review_recommendation(
    client: &ApiClient,
    id: &str,
    review: Review,
    format: OutputFormat,
) -> Result<()> {
    let path = format!("api/v1/recommendations/{}/{}", id, review.path_segment());
    let updated: Recommendation = client.post(&path, Some(&review.body())).await?;

    match format {
        OutputFormat::Json => print_json(&updated)?,
        OutputFormat::Table => {
            match (&review, &updated.execution_result) {
                (Review::Execute, Some(result)) if !result.success => {
                    print_error(&format!("Execution of {} failed: {}", id, result.message));
                }
                (Review::Execute, Some(result)) => {
                    print_success(&format!("Recommendation {} executed ({})", id, result.outcome));
                    println!("Message: {}", result.message);
                }
                _ => print_success(&format!(
                    "Recommendation {} is now {}",
                    id,
                    color_status(&updated.status)
                )),
            }
            println!("Resource: {} ({})", updated.resource_id, updated.resource_type);
            println!("Action: {}", updated.action.describe());
            if let Some(until) = &updated.snoozed_until {
                print_info(&format!("Snoozed until {}", format_timestamp(until)));
            }
            if let Some(at) = &updated.scheduled_for {
                print_info(&format!("Scheduled for {}", format_timestamp(at)));
            }
        }
    }

    Ok(())
}

/// Parse an RFC 3339 timestamp or a relative offset such as `30m`, `12h`, `7d`
pub fn parse_when(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(input) {
        return Ok(at.with_timezone(&Utc));
    }

    let input = input.trim();
    if input.len() < 2 {
        bail!("invalid time '{}': use RFC 3339 or an offset like 12h", input);
    }
    let (amount, unit) = input.split_at(input.len() - 1);
    let amount: i64 = amount
        .parse()
        .with_context(|| format!("invalid time '{}': use RFC 3339 or an offset like 12h", input))?;
    if amount <= 0 {
        bail!("offset must be positive: {}", input);
    }

    let offset = match unit {
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        "w" => Duration::weeks(amount),
        _ => bail!("unknown time unit '{}' (expected m, h, d or w)", unit),
    };
    Ok(now + offset)
}
