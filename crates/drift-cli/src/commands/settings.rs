//! Agent status, execution mode, scenarios and resource policies

use anyhow::Result;
use tabled::Tabled;

use crate::client::{
    AgentHealth, ApiClient, ModeRequest, ModeStatus, PolicyRequest, PolicyResponse, Scenario,
};
use crate::output::{
    check_mark, color_status, format_timestamp, print_info, print_json, print_success, print_table,
    OutputFormat,
};

#[derive(Tabled)]
struct ScenarioRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    resource_type: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Auto-safe")]
    auto_safe: String,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Checked")]
    checked_at: String,
}

/// Show the current execution mode
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: ModeStatus = client.get("api/v1/status").await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            println!("Mode: {}", color_status(&status.mode));
            match &status.last_updated {
                Some(ts) => println!("Last updated: {}", format_timestamp(ts)),
                None => print_info("Mode has never been set; manual is the default"),
            }
        }
    }

    Ok(())
}

/// Persist a new execution mode
pub async fn set_mode(client: &ApiClient, mode: &str, format: OutputFormat) -> Result<()> {
    let request = ModeRequest {
        mode: mode.to_string(),
    };
    let status: ModeStatus = client.put("api/v1/settings/mode", &request).await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            print_success(&format!("Execution mode set to {}", color_status(&status.mode)))
        }
    }

    Ok(())
}

/// List the scenarios the agent evaluates
pub async fn list_scenarios(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let scenarios: Vec<Scenario> = client.get("api/v1/scenarios").await?;

    match format {
        OutputFormat::Json => print_json(&scenarios)?,
        OutputFormat::Table => {
            let rows: Vec<ScenarioRow> = scenarios
                .iter()
                .map(|s| ScenarioRow {
                    id: s.id.clone(),
                    resource_type: s.resource_type.clone(),
                    action: s.action.describe(),
                    auto_safe: check_mark(s.auto_safe),
                    description: s.description.clone(),
                })
                .collect();
            print_table(rows, "No scenarios enabled");
        }
    }

    Ok(())
}

/// Change a resource's optimization policy
pub async fn set_policy(
    client: &ApiClient,
    kind: &str,
    id: &str,
    policy: &str,
    format: OutputFormat,
) -> Result<()> {
    let path = format!("api/v1/resources/{}/{}/policy", kind, id);
    let request = PolicyRequest {
        policy: policy.to_string(),
    };
    let response: PolicyResponse = client.put(&path, &request).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            let resource = &response.resource;
            print_success(&format!(
                "Policy for {} {} set to {}",
                resource.resource_type,
                resource.id,
                resource.optimization_policy.as_deref().unwrap_or(policy)
            ));
            println!("Environment: {}", resource.env);
            if resource.locked == Some(true) {
                print_info("Resource is locked; it will only ever be recommended");
            }
        }
    }

    Ok(())
}

/// Show component health as reported by `/healthz`
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: AgentHealth = client.get("healthz").await?;

    match format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => {
            println!("Agent: {}", color_status(&health.status));
            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, c)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&c.status),
                    message: c.message.clone().unwrap_or_default(),
                    checked_at: format_timestamp(&c.checked_at),
                })
                .collect();
            print_table(rows, "No components registered");
        }
    }

    Ok(())
}
