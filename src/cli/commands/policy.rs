use std::path::Path;

use colored::Colorize;

use keytrust::core::errors::{KeyTrustError, Result};
use keytrust::core::models::trust_context::OperationContext;
use keytrust::core::models::trust_policy::{RuleAction, TrustPolicy};

use crate::cli::PolicyAction;
use crate::cli::context::Workspace;
use crate::cli::output;

/// Execute the `keytrust policy` command.
pub fn execute(action: &PolicyAction) -> Result<()> {
    let workspace = Workspace::open()?;
    let trust = workspace.trust.as_ref();

    match action {
        PolicyAction::Add { file, replace } => {
            let policy = read_policy(file)?;
            let saved = if *replace && trust.get_policy(&policy.policy_id).is_ok() {
                trust.update_policy(policy)?
            } else {
                trust.create_policy(policy)?
            };
            output::success(&format!(
                "Saved policy '{}' (priority {}, {} rules)",
                saved.policy_id,
                saved.priority,
                saved.rules.len()
            ));
            Ok(())
        }
        PolicyAction::List => {
            let policies = trust.list_policies()?;
            output::header(&format!("Policies ({})", policies.len()));
            if policies.is_empty() {
                output::warning("No policies: every operation is allowed by default");
            }
            for policy in &policies {
                print_policy(policy);
            }
            Ok(())
        }
        PolicyAction::Remove { id } => {
            trust.remove_policy(id)?;
            output::success(&format!("Removed policy '{id}'"));
            Ok(())
        }
        PolicyAction::Enable { id } => {
            trust.set_policy_active(id, true)?;
            output::success(&format!("Enabled policy '{id}'"));
            Ok(())
        }
        PolicyAction::Disable { id } => {
            trust.set_policy_active(id, false)?;
            output::success(&format!("Disabled policy '{id}'"));
            Ok(())
        }
        PolicyAction::Eval {
            operation,
            fingerprint,
            key_name,
        } => {
            let mut context = OperationContext::new().operation(operation);
            if let Some(fp) = fingerprint {
                context = context.fingerprint(fp);
            }
            if let Some(name) = key_name {
                context = context.key_name(name);
            }

            let decision = trust.evaluate_operation(&context)?;
            if decision.allowed {
                output::success(&format!("Allowed: {}", decision.reason));
                Ok(())
            } else {
                output::warning(&format!("Denied: {}", decision.reason));
                std::process::exit(2);
            }
        }
    }
}

fn read_policy(path: &Path) -> Result<TrustPolicy> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| KeyTrustError::Format {
        what: "policy file",
        detail: format!("{}: {e}", path.display()),
    })
}

fn print_policy(policy: &TrustPolicy) {
    let state = if policy.is_active {
        "active".green()
    } else {
        "inactive".dimmed()
    };
    println!(
        "\n  {} {} (priority {}) {}",
        policy.policy_id.bold(),
        policy.name,
        policy.priority,
        state
    );
    if !policy.description.is_empty() {
        println!("    {}", policy.description.dimmed());
    }
    for (index, rule) in policy.rules.iter().enumerate() {
        let action = match rule.action {
            RuleAction::Allow => "allow".green(),
            RuleAction::Deny => "deny".red(),
        };
        println!(
            "    {}. {action} {} = {}",
            index + 1,
            rule.matcher.type_name(),
            rule.matcher.value()
        );
    }
}
