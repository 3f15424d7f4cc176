// Per-route diagnostics for the run summary

use crate::coordinator::RouteReport;
use crate::engine::runner::Selection;

/// Why a route ended the run the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticNote {
    Picked,
    /// Picked, but some calls failed.
    PartialFailures,
    NoOffersReturned,
    NoEligibleOffers,
    AllCallsFailed,
    /// Rule produced no instances.
    NoInstances,
    /// Skipped after the run stopped early.
    NotQueried,
}

impl DiagnosticNote {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticNote::Picked => "ok",
            DiagnosticNote::PartialFailures => "ok, some calls failed",
            DiagnosticNote::NoOffersReturned => "no offers returned",
            DiagnosticNote::NoEligibleOffers => "no eligible offers",
            DiagnosticNote::AllCallsFailed => "all calls failed",
            DiagnosticNote::NoInstances => "no date pairs to query",
            DiagnosticNote::NotQueried => "not queried",
        }
    }
}

/// Diagnostic row for the summary table
#[derive(Debug, Clone)]
pub struct DiagnosticRow {
    pub route_key: String,
    pub label: String,
    /// "queried/total"
    pub coverage: String,
    pub ok: usize,
    pub failed: usize,
    pub note: DiagnosticNote,
    pub first_error: Option<String>,
}

fn note_for(route: &RouteReport) -> DiagnosticNote {
    match &route.selection {
        Selection::Picked(_) if route.failed > 0 => DiagnosticNote::PartialFailures,
        Selection::Picked(_) => DiagnosticNote::Picked,
        Selection::NoOffersReturned => DiagnosticNote::NoOffersReturned,
        Selection::NoEligibleOffers => DiagnosticNote::NoEligibleOffers,
        Selection::AllCallsFailed => DiagnosticNote::AllCallsFailed,
        Selection::NotQueried if route.instances_total == 0 => DiagnosticNote::NoInstances,
        Selection::NotQueried => DiagnosticNote::NotQueried,
    }
}

/// Build one diagnostic row per route, in run order.
pub fn build_diagnostic_rows(routes: &[RouteReport]) -> Vec<DiagnosticRow> {
    routes
        .iter()
        .map(|route| DiagnosticRow {
            route_key: route.route_key.clone(),
            label: route.label.clone(),
            coverage: format!("{}/{}", route.queried, route.instances_total),
            ok: route.succeeded,
            failed: route.failed,
            note: note_for(route),
            first_error: route.first_error.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(selection: Selection, total: usize, queried: usize, failed: usize) -> RouteReport {
        RouteReport {
            route_key: "K".to_string(),
            route_id: "r".to_string(),
            label: "Route".to_string(),
            currency: "BRL".to_string(),
            instances_total: total,
            queried,
            succeeded: queried - failed,
            failed,
            selection,
            previous_best: None,
            transition: None,
            first_error: (failed > 0).then(|| "HTTP 500".to_string()),
        }
    }

    #[test]
    fn test_notes() {
        let rows = build_diagnostic_rows(&[
            route(Selection::NotQueried, 0, 0, 0),
            route(Selection::NotQueried, 4, 0, 0),
            route(Selection::AllCallsFailed, 2, 2, 2),
            route(Selection::NoOffersReturned, 2, 2, 1),
        ]);
        let notes: Vec<DiagnosticNote> = rows.iter().map(|r| r.note).collect();
        assert_eq!(
            notes,
            vec![
                DiagnosticNote::NoInstances,
                DiagnosticNote::NotQueried,
                DiagnosticNote::AllCallsFailed,
                DiagnosticNote::NoOffersReturned,
            ]
        );
        assert_eq!(rows[1].coverage, "0/4");
        assert_eq!(rows[2].first_error.as_deref(), Some("HTTP 500"));
    }
}
