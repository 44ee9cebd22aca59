//! Trigger a drift tick and render its report

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, TickRequest, TickResponse};
use crate::output::{
    color_status, format_currency, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct DetectionRow {
    #[tabled(rename = "Scenario")]
    scenario: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Savings/mo")]
    savings: String,
}

#[derive(Tabled)]
struct ExecutionRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Run one tick, optionally overriding the stored execution mode
pub async fn run_tick(client: &ApiClient, mode: Option<String>, format: OutputFormat) -> Result<()> {
    let request = TickRequest { mode };
    let response: TickResponse = client.post("api/v1/tick", Some(&request)).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => print_report(&response),
    }

    Ok(())
}

fn print_report(response: &TickResponse) {
    let report = &response.report;
    print_success(&format!(
        "Tick {} finished in {}ms ({} mode, from {})",
        report.tick_id,
        response.timing.total_ms,
        color_status(&report.mode),
        report.mode_source
    ));

    for failure in &report.summary.category_failures {
        print_warning(&format!(
            "Could not scan {}: {}",
            failure.resource_type, failure.error
        ));
    }
    for row in &report.summary.invalid_rows {
        print_warning(&format!(
            "Skipped invalid {} row {}: {}",
            row.resource_type,
            row.id.as_deref().unwrap_or("(no id)"),
            row.reason
        ));
    }

    println!(
        "\nDetections: {} ({} auto-safe), potential savings {} per month",
        response.detections.len(),
        response.auto_safe_count,
        format_currency(report.summary.total_potential_savings)
    );
    let rows: Vec<DetectionRow> = response
        .detections
        .iter()
        .map(|d| DetectionRow {
            scenario: d.scenario_id.clone(),
            resource: d.resource_id.clone(),
            resource_type: d.resource_type.clone(),
            savings: format_currency(d.potential_savings),
        })
        .collect();
    print_table(rows, "No waste detected");

    if let Some(skip) = &report.execution_skipped {
        print_info(&format!("Execution skipped: {}", skip.replace('_', " ")));
    }
    if !response.execution_results.is_empty() {
        println!("\nExecutions:");
        let rows: Vec<ExecutionRow> = response
            .execution_results
            .iter()
            .map(|r| ExecutionRow {
                resource: r.resource_id.clone(),
                action: r.action.clone(),
                outcome: color_status(&r.outcome),
                duration: format!("{}ms", r.duration_ms),
                message: r.message.clone(),
            })
            .collect();
        print_table(rows, "No actions executed");
    }

    let recs = &report.recommendations;
    println!(
        "\nRecommendations: {} created, {} refreshed, {} suppressed, {} failed",
        recs.created, recs.refreshed, recs.suppressed, recs.failed
    );
    if recs.resolved > 0 {
        print_info(&format!(
            "{} open recommendation(s) closed by automatic remediation",
            recs.resolved
        ));
    }
    if !report.policy_blocked.is_empty() {
        print_info(&format!(
            "{} auto-safe detections held for review by policy",
            report.policy_blocked.len()
        ));
    }
    if report.ignored_count > 0 {
        print_info(&format!(
            "{} detections on ignored resources",
            report.ignored_count
        ));
    }
    if report.summary.insufficient_data > 0 {
        print_info(&format!(
            "{} checks skipped for missing metrics",
            report.summary.insufficient_data
        ));
    }
}
