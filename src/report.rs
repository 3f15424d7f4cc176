//! Human-readable run summary (Markdown).

use crate::coordinator::RunReport;
use crate::engine::runner::Selection;
use crate::engine::tracker::Transition;
use std::fmt::Write;

fn price(value: Option<f64>, currency: &str) -> String {
    match value {
        Some(v) => format!("{:.2} {}", v, currency),
        None => "-".to_string(),
    }
}

fn change(route_previous: Option<f64>, current: f64) -> String {
    match route_previous {
        Some(prev) if prev > 0.0 => {
            let pct = (current - prev) / prev * 100.0;
            format!("{:+.2} ({:+.1}%)", current - prev, pct)
        }
        Some(prev) => format!("{:+.2}", current - prev),
        None => "new".to_string(),
    }
}

/// Escape pipes so free text can't break a table row.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    let s = &report.stats;

    let _ = writeln!(out, "# Fare watch run {}", report.run_id);
    let _ = writeln!(out);
    let _ = writeln!(out, "- Started: {}", report.started_utc.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "- Duration: {:.1}s", s.duration_ms as f64 / 1000.0);
    match report.abort_reason() {
        Some(reason) => {
            let _ = writeln!(out, "- **Stopped early:** {}", reason);
        }
        None => {
            let _ = writeln!(out, "- Completed all routes");
        }
    }
    let _ = writeln!(
        out,
        "- Calls: {} ok / {} error of {} queried ({} instances planned), success rate {:.0}%",
        s.calls_ok,
        s.calls_error,
        s.instances_queried,
        s.instances_total,
        s.success_rate * 100.0
    );
    let _ = writeln!(
        out,
        "- HTTP: {} requests, {} retries, {} re-auths, {} rate limited",
        s.http_requests, s.retries, s.reauths, s.rate_limited
    );
    let _ = writeln!(out, "- Offers saved: {}, alerts: {}", s.offers_saved, s.alerts);

    let _ = writeln!(out);
    let _ = writeln!(out, "## This run");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Route | Pick | Carrier | Stops | Dates | vs previous best | Best |");
    let _ = writeln!(out, "|---|---|---|---|---|---|---|");
    for route in &report.routes {
        let (pick, carrier, stops, dates, delta) = match &route.selection {
            Selection::Picked(offer) => {
                let c = &offer.canonical;
                let i = &offer.instance;
                (
                    price(Some(c.price_total), &route.currency),
                    c.carrier.clone(),
                    c.stops.to_string(),
                    format!("{} {}/{}", i.destination, i.departure_date, i.return_date),
                    change(route.previous_best, c.price_total),
                )
            }
            other => (
                other.label().to_string(),
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
            ),
        };
        let best = match route.transition {
            Some(Transition::Created) => "recorded",
            Some(Transition::Lowered { .. }) => "**new low**",
            Some(Transition::Filled) => "first price",
            Some(Transition::Kept) => "kept",
            None => "untouched",
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} |",
            cell(&route.label),
            pick,
            carrier,
            stops,
            dates,
            delta,
            best
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Current best");
    let _ = writeln!(out);
    if report.best.is_empty() {
        let _ = writeln!(out, "No best prices recorded yet.");
    } else {
        let _ = writeln!(out, "| Route key | Price | Carrier | Stops | Dates | Note |");
        let _ = writeln!(out, "|---|---|---|---|---|---|");
        for (key, record) in &report.best {
            let dates = match (record.departure_date, record.return_date) {
                (Some(d), Some(r)) => format!("{}/{}", d, r),
                _ => "-".to_string(),
            };
            let note = match record.note {
                Some(n) => serde_json::to_value(n)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default(),
                None => String::new(),
            };
            let _ = writeln!(
                out,
                "| `{}` | {} | {} | {} | {} | {} |",
                key,
                price(record.price_total, &record.currency),
                record.carrier.as_deref().unwrap_or("-"),
                record.stops.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
                dates,
                note
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Diagnostics");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Route | Queried | OK | Failed | Note | First error |");
    let _ = writeln!(out, "|---|---|---|---|---|---|");
    for row in report.diagnostics() {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            cell(&row.label),
            row.coverage,
            row.ok,
            row.failed,
            row.note.as_str(),
            row.first_error.as_deref().map(cell).unwrap_or_default()
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Alerts");
    let _ = writeln!(out);
    if report.alerts.is_empty() {
        let _ = writeln!(out, "None.");
    } else {
        for alert in &report.alerts {
            let _ = writeln!(out, "- {}", alert.message);
        }
    }
    out
}
