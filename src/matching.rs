//! Property matching against the lead's search profile.

use tracing::debug;

use crate::lead::{Direction, Lead, Message, Property};

/// How many times we ask for missing search details before broadening.
pub const DETAIL_REQUEST_LIMIT: usize = 3;

/// Markers that identify an outbound message as a detail request.
const DETAIL_ASK_MARKERS: &[&str] = &[
    "que barrio",
    "qué barrio",
    "cuantos ambientes",
    "cuántos ambientes",
    "presupuesto",
];

/// Filter criteria derived from a lead's profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchCriteria {
    pub neighborhood: Option<String>,
    pub rooms: Option<u32>,
    pub budget: Option<f64>,
}

/// Result of a catalog search.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// Nothing matched; ask for more detail or broaden.
    NoMatch,
    /// Exactly one candidate, offer it for confirmation.
    Single(Property),
    /// Several candidates, list them as suggestions.
    Multiple(Vec<Property>),
}

impl SearchCriteria {
    pub fn from_lead(lead: &Lead) -> Self {
        Self {
            neighborhood: lead.neighborhood.clone(),
            rooms: lead.rooms,
            budget: lead.budget,
        }
    }

    /// Whether there is anything to search by at all.
    pub fn is_empty(&self) -> bool {
        self.neighborhood.is_none() && self.rooms.is_none() && self.budget.is_none()
    }

    fn matches(&self, property: &Property) -> bool {
        if !property.active {
            return false;
        }
        if let Some(neighborhood) = &self.neighborhood {
            if !property.neighborhood.eq_ignore_ascii_case(neighborhood) {
                return false;
            }
        }
        if let Some(rooms) = self.rooms {
            if property.rooms < rooms {
                return false;
            }
        }
        if let Some(budget) = self.budget {
            if property.price > budget {
                return false;
            }
        }
        true
    }

    /// Search the catalog. Matches are sorted by closeness to the budget when
    /// one is known, otherwise larger units first, cheaper first within size.
    pub fn search(&self, catalog: &[Property], limit: usize) -> SearchOutcome {
        if self.is_empty() {
            return SearchOutcome::NoMatch;
        }

        let mut matches: Vec<Property> = catalog
            .iter()
            .filter(|p| self.matches(p))
            .cloned()
            .collect();

        match self.budget {
            Some(budget) => matches.sort_by(|a, b| {
                let da = (a.price - budget).abs();
                let db = (b.price - budget).abs();
                da.total_cmp(&db)
            }),
            None => matches.sort_by(|a, b| {
                b.rooms.cmp(&a.rooms).then(a.price.total_cmp(&b.price))
            }),
        }
        matches.truncate(limit);

        debug!(count = matches.len(), "Catalog search");
        match matches.len() {
            0 => SearchOutcome::NoMatch,
            1 => SearchOutcome::Single(matches.remove(0)),
            _ => SearchOutcome::Multiple(matches),
        }
    }

    /// Relax the criteria one step: drop budget first, then rooms, then
    /// neighborhood. Returns `false` when there was nothing left to drop.
    pub fn broaden(&mut self) -> bool {
        if self.budget.take().is_some() {
            return true;
        }
        if self.rooms.take().is_some() {
            return true;
        }
        self.neighborhood.take().is_some()
    }
}

/// Count outbound detail requests in the recent history. Drives the
/// ask-vs-broaden decision when a search keeps coming up empty.
pub fn count_detail_requests(history: &[Message]) -> usize {
    history
        .iter()
        .filter(|m| m.direction == Direction::Out)
        .filter(|m| {
            let text = m.text.to_lowercase();
            DETAIL_ASK_MARKERS.iter().any(|marker| text.contains(marker))
        })
        .count()
}

/// Human price: `$1.5M`, `$150k`, `$900`.
pub fn format_price(price: f64) -> String {
    if price >= 1_000_000.0 {
        let millions = price / 1_000_000.0;
        if millions.fract() == 0.0 {
            format!("${}M", millions as u64)
        } else {
            format!("${:.1}M", millions)
        }
    } else if price >= 1_000.0 {
        format!("${}k", (price / 1_000.0).round() as u64)
    } else {
        format!("${}", price.round() as u64)
    }
}

/// One-line description used in suggestion lists and prompts.
pub fn format_property(property: &Property) -> String {
    format!(
        "{} - {} amb en {} - {}",
        property.title,
        property.rooms,
        property.neighborhood,
        format_price(property.price)
    )
}

/// Numbered list for a multi-candidate reply.
pub fn format_property_list(properties: &[Property]) -> String {
    properties
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{}. {}", i + 1, format_property(p)))
        .collect::<Vec<_>>()
        .join("\n")
}
