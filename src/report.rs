//! Daily aggregate report over the result store

use crate::store::FraudSummary;
use chrono::{NaiveDate, NaiveDateTime};
use std::fmt::Write;

const RULE: &str = "============================================================";
const DIVIDER: &str = "────────────────────────────────────────────────────────────";

/// Render the plain-text daily report for `date`
pub fn render_daily_report(summary: &FraudSummary, date: NaiveDate, generated_at: NaiveDateTime) -> String {
    let mut out = String::new();
    let line = |out: &mut String, label: &str, value: String| {
        let _ = writeln!(out, "{:<27}{}", label, value);
    };

    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "DAILY FRAUD DETECTION REPORT");
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "Date: {}", date.format("%Y-%m-%d"));
    let _ = writeln!(out, "Report Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S"));
    out.push('\n');

    let _ = writeln!(out, "TRANSACTION SUMMARY:");
    let _ = writeln!(out, "{DIVIDER}");
    line(&mut out, "Total Transactions:", format!("{:>10}", group_thousands(summary.total_transactions)));
    line(&mut out, "Legitimate:", format!("{:>10}", group_thousands(summary.legitimate_count)));
    line(&mut out, "Fraudulent:", format!("{:>10}", group_thousands(summary.fraud_count)));
    line(&mut out, "Fraud Rate:", format!("{:>9.2}%", summary.fraud_rate()));
    out.push('\n');

    let _ = writeln!(out, "FINANCIAL IMPACT:");
    let _ = writeln!(out, "{DIVIDER}");
    line(&mut out, "Total Transaction Volume:", format!("${:>10}", money(summary.total_amount)));
    line(&mut out, "Average Transaction:", format!("${:>10}", money(summary.avg_amount)));
    line(&mut out, "Fraud Amount Flagged:", format!("${:>10}", money(summary.fraud_amount)));
    out.push('\n');

    let _ = writeln!(out, "FRAUD DETECTION METRICS:");
    let _ = writeln!(out, "{DIVIDER}");
    line(&mut out, "Avg Fraud Probability:", format!("{:>9.4}", summary.avg_fraud_probability));
    line(&mut out, "Max Fraud Probability:", format!("{:>9.4}", summary.max_fraud_probability));
    out.push('\n');
    let _ = writeln!(out, "{RULE}");

    out
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

/// Two-decimal amount with thousands separators
fn money(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}{}.{:02}", group_thousands(cents / 100), cents % 100)
}
