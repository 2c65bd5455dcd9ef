//! Output rendering for capsyncctl.
//!
//! Formatting returns strings so the layouts can be tested; `print_*` wrappers
//! write them to stdout.

use std::fmt::Write;

use capsync_core::Capability;

use crate::client::SkippedDefinition;

pub fn print_capability_list(capabilities: &[Capability], skipped: &[SkippedDefinition]) {
    print!("{}", format_capability_list(capabilities, skipped));
}

pub fn print_capability_details(capability: &Capability) {
    print!("{}", format_capability_details(capability));
}

/// Tabular catalog listing, followed by definitions that were skipped.
pub fn format_capability_list(
    capabilities: &[Capability],
    skipped: &[SkippedDefinition],
) -> String {
    let mut out = String::new();
    if capabilities.is_empty() {
        out.push_str("No capabilities found.\n");
    } else {
        let _ = writeln!(
            out,
            "{:<24}  {:<8}  {:<40}  {:<24}",
            "NAME", "TYPE", "DEFINITION", "APPLIES TO"
        );
        let _ = writeln!(out, "{}", "-".repeat(102));
        for cap in capabilities {
            let _ = writeln!(
                out,
                "{:<24}  {:<8}  {:<40}  {:<24}",
                truncate(&cap.name, 24),
                cap.kind.as_str(),
                truncate(&cap.crd_name, 40),
                format_applies_to(cap),
            );
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "{} capability(s)", capabilities.len());
    }

    if !skipped.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Skipped:");
        for skip in skipped {
            let _ = writeln!(out, "  {} ({}): {}", skip.name, skip.kind, skip.reason);
        }
    }
    out
}

/// Detailed view of one capability and its parameters.
pub fn format_capability_details(cap: &Capability) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Capability: {}", cap.name);
    let _ = writeln!(out);
    let _ = writeln!(out, "  Type:           {}", cap.kind.as_str());
    let _ = writeln!(out, "  Definition:     {}", cap.crd_name);
    let _ = writeln!(out, "  Canonical Name: {}", cap.canonical_name);
    let _ = writeln!(out, "  Template:       {}", cap.definition_path.display());
    if cap.is_trait() {
        let _ = writeln!(out, "  Applies To:     {}", format_applies_to(cap));
    }

    let _ = writeln!(out);
    if cap.parameters.is_empty() {
        let _ = writeln!(out, "  Parameters: none");
        return out;
    }
    let _ = writeln!(out, "  Parameters:");
    let _ = writeln!(
        out,
        "    {:<20}  {:<6}  {:<8}  {:<8}  {:<12}  USAGE",
        "NAME", "SHORT", "TYPE", "REQUIRED", "DEFAULT"
    );
    let _ = writeln!(out, "    {}", "-".repeat(80));
    for param in &cap.parameters {
        let default = param
            .default
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "    {:<20}  {:<6}  {:<8}  {:<8}  {:<12}  {}",
            truncate(&param.name, 20),
            param.short.as_deref().unwrap_or("-"),
            param.param_type.as_str(),
            if param.required { "yes" } else { "no" },
            truncate(&default, 12),
            param.usage.as_deref().unwrap_or(""),
        );
    }
    out
}

fn format_applies_to(cap: &Capability) -> String {
    if cap.applies_to().is_empty() {
        "-".to_string()
    } else {
        cap.applies_to().join(",")
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
