//! Qualification data — the yes/no signals that gate a property visit.

use serde::{Deserialize, Serialize};

/// Names of the required qualification fields, in the order they are asked.
pub const REQUIRED_FIELDS: [&str; 5] = [
    "propiedad_confirmada",
    "comprador_confirmado",
    "motivo",
    "financiacion",
    "listo_para_cerrar",
];

/// Qualification signals attached to a lead.
///
/// Flags only move false→true (or unknown→known) during normal message
/// processing. The only way back is an explicit operator [`reset`].
///
/// [`reset`]: QualificationData::reset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualificationData {
    /// One concrete property has been confirmed.
    pub property_confirmed: bool,
    /// The lead is buying for themselves (or the decision maker attends).
    pub buyer_confirmed: bool,
    /// Motive is clear (relocation or investment).
    pub motive_confirmed: bool,
    /// Timeline is realistic. Advisory — does not gate qualification.
    pub timeline_confirmed: bool,
    /// Funding is in place (savings, credit, pre-approval).
    pub financing_confirmed: bool,
    /// The lead says they can move forward if the property fits.
    pub ready_to_close: bool,
    /// The lead is the decision maker. Advisory.
    pub decision_maker: bool,
    /// Needs to sell another property first. Unknown until mentioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_to_sell: Option<bool>,
    /// Has mortgage pre-approval. Unknown until mentioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_preapproval: Option<bool>,
}

impl QualificationData {
    /// Whether the lead qualifies for a visit.
    ///
    /// Exactly five fields gate the decision; timeline, decision-maker and
    /// the tri-state flags are advisory only.
    pub fn is_qualified(&self) -> bool {
        self.property_confirmed
            && self.buyer_confirmed
            && self.motive_confirmed
            && self.financing_confirmed
            && self.ready_to_close
    }

    /// Ordered list of required fields that are still unmet.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let checks = [
            (self.property_confirmed, REQUIRED_FIELDS[0]),
            (self.buyer_confirmed, REQUIRED_FIELDS[1]),
            (self.motive_confirmed, REQUIRED_FIELDS[2]),
            (self.financing_confirmed, REQUIRED_FIELDS[3]),
            (self.ready_to_close, REQUIRED_FIELDS[4]),
        ];
        checks
            .into_iter()
            .filter_map(|(set, name)| (!set).then_some(name))
            .collect()
    }

    /// Merge a partial update. Monotonic: a flag already `true` stays `true`,
    /// a tri-state already known keeps its value.
    pub fn merge(&mut self, update: &QualificationUpdate) {
        self.property_confirmed |= update.property_confirmed.unwrap_or(false);
        self.buyer_confirmed |= update.buyer_confirmed.unwrap_or(false);
        self.motive_confirmed |= update.motive_confirmed.unwrap_or(false);
        self.timeline_confirmed |= update.timeline_confirmed.unwrap_or(false);
        self.financing_confirmed |= update.financing_confirmed.unwrap_or(false);
        self.ready_to_close |= update.ready_to_close.unwrap_or(false);
        self.decision_maker |= update.decision_maker.unwrap_or(false);
        if self.needs_to_sell.is_none() {
            self.needs_to_sell = update.needs_to_sell;
        }
        if self.has_preapproval.is_none() {
            self.has_preapproval = update.has_preapproval;
        }
    }

    /// Operator reset — clears every flag back to its initial state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Partial update to [`QualificationData`]. Only keys present are applied.
///
/// Produced by the signal extractor (rule layer, optionally refined by the
/// LLM) and merged into the lead's persisted qualification data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualificationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_confirmed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_confirmed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motive_confirmed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline_confirmed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financing_confirmed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_to_close: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_maker: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_to_sell: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_preapproval: Option<bool>,
}

impl QualificationUpdate {
    /// Whether the update carries any signal at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fill keys that are unset in `self` from `other`. Used to layer LLM
    /// refinement under the rule layer: rules win, refinement only fills gaps.
    pub fn fill_missing_from(&mut self, other: &QualificationUpdate) {
        macro_rules! fill {
            ($field:ident) => {
                if self.$field.is_none() {
                    self.$field = other.$field;
                }
            };
        }
        fill!(property_confirmed);
        fill!(buyer_confirmed);
        fill!(motive_confirmed);
        fill!(timeline_confirmed);
        fill!(financing_confirmed);
        fill!(ready_to_close);
        fill!(decision_maker);
        fill!(needs_to_sell);
        fill!(has_preapproval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_required_true() -> QualificationData {
        QualificationData {
            property_confirmed: true,
            buyer_confirmed: true,
            motive_confirmed: true,
            financing_confirmed: true,
            ready_to_close: true,
            ..Default::default()
        }
    }

    #[test]
    fn five_field_gate() {
        let q = all_required_true();
        assert!(q.is_qualified());
        assert!(q.missing_fields().is_empty());
    }

    #[test]
    fn advisory_flags_do_not_gate() {
        let mut q = all_required_true();
        q.timeline_confirmed = false;
        q.decision_maker = false;
        q.needs_to_sell = Some(true);
        q.has_preapproval = Some(false);
        assert!(q.is_qualified());
    }

    #[test]
    fn missing_fields_ordered() {
        let q = QualificationData {
            buyer_confirmed: true,
            financing_confirmed: true,
            ..Default::default()
        };
        assert_eq!(
            q.missing_fields(),
            vec!["propiedad_confirmada", "motivo", "listo_para_cerrar"]
        );
        assert!(!q.is_qualified());
    }

    #[test]
    fn merge_is_monotonic() {
        let mut q = QualificationData {
            buyer_confirmed: true,
            needs_to_sell: Some(false),
            ..Default::default()
        };
        // An update cannot flip buyer_confirmed back or overwrite a known
        // tri-state value.
        let update = QualificationUpdate {
            buyer_confirmed: Some(false),
            motive_confirmed: Some(true),
            needs_to_sell: Some(true),
            ..Default::default()
        };
        q.merge(&update);
        assert!(q.buyer_confirmed);
        assert!(q.motive_confirmed);
        assert_eq!(q.needs_to_sell, Some(false));
    }

    #[test]
    fn missing_fields_non_increasing_under_merges() {
        let mut q = QualificationData::default();
        let updates = [
            QualificationUpdate {
                buyer_confirmed: Some(true),
                ..Default::default()
            },
            QualificationUpdate::default(),
            QualificationUpdate {
                motive_confirmed: Some(true),
                financing_confirmed: Some(true),
                ..Default::default()
            },
        ];
        let mut previous = q.missing_fields().len();
        for update in &updates {
            q.merge(update);
            let now = q.missing_fields().len();
            assert!(now <= previous);
            previous = now;
        }
    }

    #[test]
    fn reset_clears_everything() {
        let mut q = all_required_true();
        q.reset();
        assert_eq!(q, QualificationData::default());
        assert_eq!(q.missing_fields().len(), 5);
    }

    #[test]
    fn fill_missing_prefers_rule_layer() {
        let mut rule = QualificationUpdate {
            buyer_confirmed: Some(true),
            ..Default::default()
        };
        let refinement = QualificationUpdate {
            buyer_confirmed: Some(false),
            financing_confirmed: Some(true),
            ..Default::default()
        };
        rule.fill_missing_from(&refinement);
        assert_eq!(rule.buyer_confirmed, Some(true));
        assert_eq!(rule.financing_confirmed, Some(true));
    }

    #[test]
    fn serde_round_trip() {
        let q = all_required_true();
        let json = serde_json::to_string(&q).unwrap();
        let back: QualificationData = serde_json::from_str(&json).unwrap();
        assert_eq!(q, back);
    }
}
