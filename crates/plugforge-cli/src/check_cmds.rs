//! `plugforge validate`, `simulate` and `render`: read-only analyses of a
//! plugin.

use std::path::Path;

use anyhow::{Context, Result, bail};

use plugforge_core::{
    Command, PluginState, Severity, StepStatus, generate_command_markdown, simulate_command,
    validate_plugin,
};

/// Pick the command named (or with id) `wanted`, or every command.
fn select_commands<'a>(state: &'a PluginState, wanted: Option<&str>) -> Result<Vec<&'a Command>> {
    match wanted {
        Some(name) => {
            let command = state
                .command_named(name)
                .or_else(|| state.command(name))
                .with_context(|| format!("no command named {name:?} in {}", state.plugin_name))?;
            Ok(vec![command])
        }
        None => Ok(state.commands.iter().collect()),
    }
}

// -----------------------------------------------------------------------
// validate
// -----------------------------------------------------------------------

/// Run the validate command.
pub fn run_validate(state: &PluginState, json: bool) -> Result<()> {
    let report = validate_plugin(state);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        );
    } else {
        println!("Plugin: {} v{}", state.plugin_name, state.version);
        for issue in &report.issues {
            println!("  {issue}");
        }
        println!(
            "{} error(s), {} warning(s), {} info",
            report.count(Severity::Error),
            report.count(Severity::Warning),
            report.count(Severity::Info),
        );
    }

    if !report.is_valid {
        bail!(
            "validation failed with {} error(s)",
            report.count(Severity::Error)
        );
    }
    Ok(())
}

// -----------------------------------------------------------------------
// simulate
// -----------------------------------------------------------------------

fn status_marker(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Success => "ok",
        StepStatus::Warning => "warn",
        StepStatus::Error => "FAIL",
    }
}

/// Run the simulate command over one or all commands.
pub fn run_simulate(state: &PluginState, command: Option<&str>, json: bool) -> Result<()> {
    let commands = select_commands(state, command)?;
    if commands.is_empty() {
        println!("No commands to simulate.");
        return Ok(());
    }

    let mut failed = Vec::new();
    let mut results = Vec::with_capacity(commands.len());
    for command in commands {
        let result = simulate_command(command, state);
        if !result.is_valid {
            failed.push(command.name.clone());
        }
        results.push((command, result));
    }

    if json {
        let entries: Vec<serde_json::Value> = results
            .iter()
            .map(|(command, result)| {
                serde_json::to_value(result)
                    .map(|result| serde_json::json!({ "command": command.name, "result": result }))
            })
            .collect::<Result<_, _>>()
            .context("failed to serialize simulation")?;
        println!("{}", serde_json::Value::Array(entries));
    } else {
        for (command, result) in &results {
            println!("{}", command.name);
            for (i, step) in result.steps.iter().enumerate() {
                println!(
                    "  {:>2}. [{:<4}] {}: {}",
                    i + 1,
                    status_marker(step.status),
                    step.node_name,
                    step.description
                );
                for warning in &step.warnings {
                    println!("        - {warning}");
                }
            }
            if !result.omitted_node_ids.is_empty() {
                println!(
                    "  note: {} node(s) were never reached and not simulated: {}",
                    result.omitted_node_ids.len(),
                    result.omitted_node_ids.join(", ")
                );
            }
            println!();
        }
    }

    if !failed.is_empty() {
        bail!("simulation found errors in: {}", failed.join(", "));
    }
    Ok(())
}

// -----------------------------------------------------------------------
// render
// -----------------------------------------------------------------------

/// Run the render command: markdown for one or all commands.
///
/// With `output` set, one command writes to that file and several write
/// `<slug>.md` files into that directory.
pub async fn run_render(
    state: &PluginState,
    command: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let commands = select_commands(state, command)?;

    let Some(output) = output else {
        let docs: Vec<String> = commands
            .iter()
            .map(|c| generate_command_markdown(c))
            .collect();
        print!("{}", docs.join("\n"));
        return Ok(());
    };

    if let [single] = commands.as_slice() {
        tokio::fs::write(output, generate_command_markdown(single))
            .await
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("Wrote {}", output.display());
        return Ok(());
    }

    tokio::fs::create_dir_all(output)
        .await
        .with_context(|| format!("failed to create {}", output.display()))?;
    for command in commands {
        let mut slug = plugforge_core::package::slugify(&command.name);
        if slug.is_empty() {
            slug = command.id.clone();
        }
        let path = output.join(format!("{slug}.md"));
        tokio::fs::write(&path, generate_command_markdown(command))
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}
