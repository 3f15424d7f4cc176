//! Offer normalization.
//!
//! Upstream offers arrive in more than one shape. Each shape is a variant of
//! [`RawOffer`]; [`normalize`] is the only place that decides which field wins.

use crate::route::RouteInstance;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const UNKNOWN_CARRIER: &str = "UNKNOWN";
/// Stop count for offers without usable itinerary data. Sorts last and fails
/// any max-stops filter.
pub const UNKNOWN_STOPS: u32 = 99;

/// A price that may be a JSON number or a numeric string ("355.34").
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(f64),
    Text(String),
}

impl Amount {
    pub fn value(&self) -> Option<f64> {
        let v = match self {
            Amount::Number(n) => Some(*n),
            Amount::Text(s) => s.trim().parse::<f64>().ok(),
        };
        v.filter(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct PriceBreakdown {
    #[serde(default)]
    pub base: Option<Amount>,
    #[serde(default)]
    pub total: Option<Amount>,
    #[serde(default, rename = "grandTotal")]
    pub grand_total: Option<Amount>,
    #[serde(default, rename = "grand_total")]
    pub grand_total_snake: Option<Amount>,
}

// Synonymous keys are separate fields: a serde alias would reject an offer
// carrying both spellings as a duplicate field.

/// Search API shape: nested price object, validating carriers, itineraries of segments.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StructuredOffer {
    pub price: PriceBreakdown,
    /// Top-level totals some producers add next to the nested price.
    #[serde(default)]
    pub price_total: Option<Amount>,
    #[serde(default)]
    pub total_price: Option<Amount>,
    #[serde(default)]
    pub total: Option<Amount>,
    #[serde(default)]
    pub carrier: Option<Value>,
    #[serde(default)]
    pub validating_airline: Option<Value>,
    #[serde(default)]
    pub airline: Option<Value>,
    #[serde(default, rename = "validatingAirlineCodes")]
    pub validating_carriers: Option<Value>,
    #[serde(default)]
    pub validating_airline_codes: Option<Value>,
    #[serde(default)]
    pub stops: Option<Value>,
    #[serde(default)]
    pub number_of_stops: Option<Value>,
    #[serde(default)]
    pub itineraries: Option<Value>,
}

/// Flattened shape with top-level price, carrier and stops.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimplifiedOffer {
    #[serde(default)]
    pub price_total: Option<Amount>,
    #[serde(default)]
    pub total_price: Option<Amount>,
    #[serde(default)]
    pub price: Option<Amount>,
    #[serde(default)]
    pub total: Option<Amount>,
    #[serde(default)]
    pub price_base: Option<Amount>,
    #[serde(default)]
    pub base_price: Option<Amount>,
    #[serde(default)]
    pub carrier: Option<Value>,
    #[serde(default)]
    pub validating_airline: Option<Value>,
    #[serde(default)]
    pub airline: Option<Value>,
    #[serde(default)]
    pub stops: Option<Value>,
    #[serde(default)]
    pub number_of_stops: Option<Value>,
    #[serde(default)]
    pub itineraries: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawOffer {
    Structured(StructuredOffer),
    Simplified(SimplifiedOffer),
}

/// The canonical record every later stage works with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOffer {
    pub price_base: f64,
    pub price_total: f64,
    pub carrier: String,
    pub stops: u32,
}

/// A canonical offer together with the instance that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub canonical: CanonicalOffer,
    pub instance: RouteInstance,
}

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("unrecognized offer shape: {0}")]
    Malformed(String),
    #[error("offer carries no usable price")]
    MissingPrice,
    #[error("offer price is negative ({0})")]
    NegativePrice(f64),
}

/// Uniform view over the shapes, consumed by the precedence rules below.
/// Candidate lists are in precedence order.
struct Fields<'a> {
    flat_total: Option<f64>,
    flat_base: Option<f64>,
    breakdown: Option<&'a PriceBreakdown>,
    carriers: Vec<&'a Value>,
    validating: Vec<&'a Value>,
    stops: Vec<&'a Value>,
    itineraries: Option<&'a Value>,
}

/// First amount in the list that parses to a finite number.
fn first_amount(candidates: &[Option<&Amount>]) -> Option<f64> {
    candidates.iter().flatten().find_map(|a| a.value())
}

fn present<'a>(candidates: &[Option<&'a Value>]) -> Vec<&'a Value> {
    candidates.iter().flatten().copied().collect()
}

impl RawOffer {
    pub fn from_value(value: Value) -> Result<Self, NormalizeError> {
        if !value.is_object() {
            return Err(NormalizeError::Malformed(format!("expected an object, got {}", value)));
        }
        serde_json::from_value(value).map_err(|e| NormalizeError::Malformed(e.to_string()))
    }

    fn fields(&self) -> Fields<'_> {
        match self {
            RawOffer::Structured(o) => Fields {
                flat_total: first_amount(&[
                    o.price_total.as_ref(),
                    o.total_price.as_ref(),
                    o.total.as_ref(),
                ]),
                flat_base: None,
                breakdown: Some(&o.price),
                carriers: present(&[
                    o.carrier.as_ref(),
                    o.validating_airline.as_ref(),
                    o.airline.as_ref(),
                ]),
                validating: present(&[
                    o.validating_carriers.as_ref(),
                    o.validating_airline_codes.as_ref(),
                ]),
                stops: present(&[o.stops.as_ref(), o.number_of_stops.as_ref()]),
                itineraries: o.itineraries.as_ref(),
            },
            RawOffer::Simplified(o) => Fields {
                flat_total: first_amount(&[
                    o.price_total.as_ref(),
                    o.total_price.as_ref(),
                    o.price.as_ref(),
                    o.total.as_ref(),
                ]),
                flat_base: first_amount(&[o.price_base.as_ref(), o.base_price.as_ref()]),
                breakdown: None,
                carriers: present(&[
                    o.carrier.as_ref(),
                    o.validating_airline.as_ref(),
                    o.airline.as_ref(),
                ]),
                validating: Vec::new(),
                stops: present(&[o.stops.as_ref(), o.number_of_stops.as_ref()]),
                itineraries: o.itineraries.as_ref(),
            },
        }
    }
}

/// Map one raw offer to its canonical form.
///
/// Price: top-level total (`price_total`, `total_price`, a scalar `price`,
/// `total`), else `grandTotal`, else nested `total`; base from the flat or
/// nested base. A lone base or total is mirrored into the other.
/// Carrier: `carrier`, `validating_airline`, `airline`, else first validating carrier, else the first
/// segment's carrier, else [`UNKNOWN_CARRIER`]. Stops: explicit count, else
/// max over itineraries of `segments - 1`, else [`UNKNOWN_STOPS`].
pub fn normalize(raw: &RawOffer) -> Result<CanonicalOffer, NormalizeError> {
    let f = raw.fields();

    let total = f.flat_total.or_else(|| {
        f.breakdown.and_then(|b| {
            first_amount(&[
                b.grand_total.as_ref(),
                b.grand_total_snake.as_ref(),
                b.total.as_ref(),
            ])
        })
    });
    let base = f
        .flat_base
        .or_else(|| f.breakdown.and_then(|b| b.base.as_ref().and_then(Amount::value)));

    let (price_base, price_total) = match (base, total) {
        (Some(b), Some(t)) => (b, t),
        (Some(b), None) => (b, b),
        (None, Some(t)) => (t, t),
        (None, None) => return Err(NormalizeError::MissingPrice),
    };
    if price_total < 0.0 || price_base < 0.0 {
        return Err(NormalizeError::NegativePrice(price_total.min(price_base)));
    }

    let carrier = f
        .carriers
        .iter()
        .find_map(|v| first_code(v))
        .or_else(|| f.validating.iter().find_map(|v| first_code(v)))
        .or_else(|| f.itineraries.and_then(first_segment_carrier))
        .unwrap_or_else(|| UNKNOWN_CARRIER.to_string());

    let stops = f
        .stops
        .iter()
        .find_map(|v| stop_count(v))
        .or_else(|| f.itineraries.and_then(itinerary_stops))
        .unwrap_or(UNKNOWN_STOPS);

    Ok(CanonicalOffer {
        price_base,
        price_total,
        carrier,
        stops,
    })
}

/// A carrier code from a scalar or the first entry of a list.
fn first_code(value: &Value) -> Option<String> {
    let code = match value {
        Value::String(s) => s.as_str(),
        Value::Array(items) => items.first()?.as_str()?,
        _ => return None,
    };
    let code = code.trim();
    (!code.is_empty()).then(|| code.to_uppercase())
}

fn first_segment_carrier(itineraries: &Value) -> Option<String> {
    let segment = itineraries
        .as_array()?
        .first()?
        .get("segments")?
        .as_array()?
        .first()?;
    segment
        .get("carrierCode")
        .or_else(|| segment.get("carrier_code"))
        .and_then(first_code)
}

fn stop_count(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Max stops over all itineraries. Any malformed itinerary poisons the count.
fn itinerary_stops(itineraries: &Value) -> Option<u32> {
    let list = itineraries.as_array()?;
    if list.is_empty() {
        return None;
    }
    let mut worst = 0u32;
    for itinerary in list {
        let segments = itinerary.get("segments")?.as_array()?;
        if segments.is_empty() {
            return None;
        }
        worst = worst.max(segments.len() as u32 - 1);
    }
    Some(worst)
}
