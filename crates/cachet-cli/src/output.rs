use std::collections::BTreeSet;

use cachet_cache::{MaintenanceReport, Tier};
use colored::Colorize;
use tabled::builder::Builder;
use tabled::settings::Style;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

fn yes_no(flag: bool) -> String {
    if flag {
        "yes".green().to_string()
    } else {
        "no".dimmed().to_string()
    }
}

pub fn print_tiers(valid: &BTreeSet<Tier>, configured: &[Tier], available: &BTreeSet<Tier>) {
    let mut builder = Builder::default();
    builder.push_record(["Tier", "Configured", "Available"]);
    for tier in valid {
        builder.push_record([
            tier.to_string(),
            yes_no(configured.contains(tier)),
            yes_no(available.contains(tier)),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
}

pub fn print_report(report: &MaintenanceReport) {
    let mut builder = Builder::default();
    builder.push_record(["Action", "Tiers", "Result"]);
    for outcome in report.outcomes() {
        let tiers = outcome
            .tiers
            .iter()
            .map(Tier::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let result = match &outcome.result {
            Ok(removed) => format!("{removed} removed").green().to_string(),
            Err(e) => e.to_string().red().to_string(),
        };
        builder.push_record([outcome.action.to_string(), tiers, result]);
    }
    println!("{}", builder.build().with(Style::rounded()));

    if report.is_success() {
        print_success(&format!("{} entries removed", report.removed()));
    }
}
