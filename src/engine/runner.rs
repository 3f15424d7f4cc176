use super::rules;
use crate::feed::client::{CallStats, FlightQueryClient, QueryError};
use crate::feed::offer::{normalize, CanonicalOffer, Offer, RawOffer};
use crate::feed::FlightApi;
use crate::route::{RouteInstance, RouteSpec};
use chrono::{DateTime, NaiveDate, Utc};

/// One query call as it went.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    pub instance: RouteInstance,
    pub at: DateTime<Utc>,
    pub result: EventResult,
}

#[derive(Debug, Clone)]
pub enum EventResult {
    Ok {
        offers_count: usize,
        /// Offers dropped by the normalizer.
        skipped: usize,
        cheapest: Option<CanonicalOffer>,
    },
    Error(QueryError),
}

/// Outcome of the "pick best" policy for one route.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Picked(Offer),
    NoOffersReturned,
    AllCallsFailed,
    NoEligibleOffers,
    NotQueried,
}

impl Selection {
    pub fn label(&self) -> &'static str {
        match self {
            Selection::Picked(_) => "picked",
            Selection::NoOffersReturned => "no offers returned",
            Selection::AllCallsFailed => "all calls failed",
            Selection::NoEligibleOffers => "no eligible offers",
            Selection::NotQueried => "not queried",
        }
    }

    pub fn offer(&self) -> Option<&Offer> {
        match self {
            Selection::Picked(offer) => Some(offer),
            _ => None,
        }
    }
}

/// Everything collected for one RouteSpec during a run.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub spec: RouteSpec,
    pub route_key: String,
    pub instances_total: usize,
    pub queried: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Accumulated in instance order.
    pub offers: Vec<Offer>,
    /// First per-instance error, kept as the route's diagnostic sample.
    pub first_error: Option<String>,
    pub events: Vec<QueryEvent>,
}

impl RouteOutcome {
    fn new(spec: &RouteSpec, instances_total: usize) -> Self {
        Self {
            spec: spec.clone(),
            route_key: spec.route_key(),
            instances_total,
            queried: 0,
            succeeded: 0,
            failed: 0,
            offers: Vec::new(),
            first_error: None,
            events: Vec::new(),
        }
    }

    /// Max-stops ceiling in effect: `watch.max_stops`, tightened to 0 for
    /// direct-only routes.
    pub fn max_stops(&self) -> Option<u32> {
        let configured = self.spec.watch.as_ref().and_then(|w| w.max_stops);
        if self.spec.direct_only {
            Some(0)
        } else {
            configured
        }
    }

    pub fn selection(&self) -> Selection {
        if self.queried == 0 {
            return Selection::NotQueried;
        }
        if self.succeeded == 0 {
            return Selection::AllCallsFailed;
        }
        if self.offers.is_empty() {
            return Selection::NoOffersReturned;
        }
        let preferred = self
            .spec
            .watch
            .as_ref()
            .map(|w| w.prefer_carriers.as_slice())
            .unwrap_or(&[]);
        match pick_best(&self.offers, self.max_stops(), preferred) {
            Some(offer) => Selection::Picked(offer.clone()),
            None => Selection::NoEligibleOffers,
        }
    }
}

/// Cheapest offer by `price_total` after the max-stops filter and, when any
/// candidate flies a preferred carrier, the carrier restriction. Ties go to
/// the earliest departure date, then to the first offer encountered.
pub fn pick_best<'a>(
    offers: &'a [Offer],
    max_stops: Option<u32>,
    preferred: &[String],
) -> Option<&'a Offer> {
    let eligible: Vec<&Offer> = offers
        .iter()
        .filter(|o| max_stops.is_none_or(|max| o.canonical.stops <= max))
        .collect();

    let is_preferred =
        |o: &Offer| preferred.iter().any(|p| p.eq_ignore_ascii_case(&o.canonical.carrier));
    let candidates: Vec<&Offer> = if eligible.iter().any(|o| is_preferred(*o)) {
        eligible.into_iter().filter(|o| is_preferred(*o)).collect()
    } else {
        eligible
    };

    let mut best: Option<&'a Offer> = None;
    for offer in candidates {
        let better = best.is_none_or(|b| {
            let (price, current) = (offer.canonical.price_total, b.canonical.price_total);
            price < current
                || (price == current && offer.instance.departure_date < b.instance.departure_date)
        });
        if better {
            best = Some(offer);
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Run-wide consecutive-429 breaker tripped.
    RateLimit,
    /// Credentials rejected; nothing further can succeed.
    Auth(String),
}

impl StopReason {
    pub fn describe(&self) -> String {
        match self {
            StopReason::RateLimit => "rate-limit circuit breaker tripped".to_string(),
            StopReason::Auth(msg) => format!("authentication failed: {}", msg),
        }
    }
}

#[derive(Debug)]
pub struct RunnerOutput {
    pub outcomes: Vec<RouteOutcome>,
    pub stop: Option<StopReason>,
    pub stats: CallStats,
}

/// Drives the query client across every instance of every RouteSpec,
/// one call at a time.
pub struct RouteRunner<A> {
    client: FlightQueryClient<A>,
    today: NaiveDate,
}

impl<A: FlightApi> RouteRunner<A> {
    pub fn new(client: FlightQueryClient<A>, today: NaiveDate) -> Self {
        Self { client, today }
    }

    pub fn client(&self) -> &FlightQueryClient<A> {
        &self.client
    }

    /// Query all specs in order. Once a stop reason is hit the remaining
    /// instances (and specs) are reported but not queried.
    pub async fn run(&mut self, specs: &[RouteSpec]) -> RunnerOutput {
        let mut outcomes = Vec::with_capacity(specs.len());
        let mut stop = None;
        for spec in specs {
            let instances = rules::expand(spec, self.today);
            let mut outcome = RouteOutcome::new(spec, instances.len());
            if stop.is_none() {
                if instances.is_empty() {
                    tracing::info!(route = %outcome.route_key, "no instances to query");
                }
                stop = self.run_instances(&mut outcome, instances).await;
            }
            tracing::info!(
                route = %outcome.route_key,
                queried = outcome.queried,
                ok = outcome.succeeded,
                failed = outcome.failed,
                offers = outcome.offers.len(),
                "route done"
            );
            outcomes.push(outcome);
        }
        RunnerOutput {
            outcomes,
            stop,
            stats: self.client.stats(),
        }
    }

    async fn run_instances(
        &mut self,
        outcome: &mut RouteOutcome,
        instances: Vec<RouteInstance>,
    ) -> Option<StopReason> {
        for instance in instances {
            outcome.queried += 1;
            let result = self.client.search(&instance).await;
            let at = Utc::now();
            match result {
                Ok(values) => {
                    outcome.succeeded += 1;
                    let offers_count = values.len();
                    let mut skipped = 0;
                    let mut cheapest: Option<CanonicalOffer> = None;
                    for value in values {
                        match RawOffer::from_value(value).and_then(|raw| normalize(&raw)) {
                            Ok(canonical) => {
                                if cheapest
                                    .as_ref()
                                    .is_none_or(|c| canonical.price_total < c.price_total)
                                {
                                    cheapest = Some(canonical.clone());
                                }
                                outcome.offers.push(Offer {
                                    canonical,
                                    instance: instance.clone(),
                                });
                            }
                            Err(e) => {
                                skipped += 1;
                                tracing::warn!(request = %instance.describe(), error = %e, "skipping offer");
                            }
                        }
                    }
                    tracing::debug!(request = %instance.describe(), offers = offers_count, "query ok");
                    outcome.events.push(QueryEvent {
                        instance,
                        at,
                        result: EventResult::Ok {
                            offers_count,
                            skipped,
                            cheapest,
                        },
                    });
                }
                Err(e) => {
                    outcome.failed += 1;
                    tracing::warn!(route = %outcome.route_key, error = %e, "query failed");
                    if outcome.first_error.is_none() {
                        outcome.first_error = Some(e.to_string());
                    }
                    let stop = if e.is_fatal() {
                        Some(StopReason::Auth(e.to_string()))
                    } else if self.client.breaker_tripped() {
                        Some(StopReason::RateLimit)
                    } else {
                        None
                    };
                    outcome.events.push(QueryEvent {
                        instance,
                        at,
                        result: EventResult::Error(e),
                    });
                    if stop.is_some() {
                        tracing::error!(route = %outcome.route_key, reason = ?stop, "stopping run early");
                        return stop;
                    }
                }
            }
        }
        None
    }
}
