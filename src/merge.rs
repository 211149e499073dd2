//! The three-way merge engine: rule hierarchy and conflict resolution.
//!
//! Grounded in `examples/original_source/database.py`'s `_compute_merge`
//! (the `MergeRule`/`MergeChoice` token alphabet and the per-record,
//! per-field resolution passes). Rather than the Python draft's bare
//! string tokens (`""`/`"f"`/`"r"`/`"p"`/`"t"`/`"p!"`/`"t!"`), this crate
//! models the rule alphabet as a closed enum and the merge node's rule
//! trees (`default`/`field_rules`/`records`) as typed structs rather than
//! an opaque [`crate::container::Value`] tree, since their shape is fixed
//! by the database's own semantics rather than user-supplied schema.

use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::container::Value;
use crate::id::Id;
use crate::version::{DefaultRules, InheritPriority, Merge, RecordRules};

/// The merge rule alphabet. `Primary`/`Tributary` apply only on an actual
/// conflict (both sides changed the same field); `PrimaryAlways`/
/// `TributaryAlways` force that side even when only one side changed.
/// `Inherit`/`InheritField`/`InheritRecord` are never themselves a
/// resolution — they express a tie-break preference consulted only when
/// both a field-level and a record-level rule are explicit and disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rule {
    #[default]
    Inherit,
    InheritField,
    InheritRecord,
    Primary,
    Tributary,
    PrimaryAlways,
    TributaryAlways,
}

impl Rule {
    pub fn is_explicit(self) -> bool {
        matches!(
            self,
            Rule::Primary | Rule::Tributary | Rule::PrimaryAlways | Rule::TributaryAlways
        )
    }
}

/// Resolves the single effective rule for `record`/`field`, applying the
/// four-level hierarchy: `record_field_rule` wins outright if explicit;
/// otherwise, between a (possibly absent) `field_rule` and `record_rule`,
/// an explicit one on either side wins if the other isn't explicit; if
/// both are explicit, the first available inherit-variant preference
/// (checked in order: the `record_field_rule` itself, then `field_rule`,
/// then `record_rule`) breaks the tie, falling back to
/// `default.inherit_priority`; if neither is explicit, `default.all`.
fn resolve_rule(
    record_field_rule: Option<Rule>,
    field_rule: Option<Rule>,
    record_rule: Option<Rule>,
    default: &DefaultRules,
) -> Rule {
    if let Some(r) = record_field_rule {
        if r.is_explicit() {
            return r;
        }
    }

    let field_explicit = field_rule.filter(|r| r.is_explicit());
    let record_explicit = record_rule.filter(|r| r.is_explicit());

    match (field_explicit, record_explicit) {
        (Some(f), None) => f,
        (None, Some(r)) => r,
        (None, None) => default.all,
        (Some(f), Some(r)) => {
            let preference = [record_field_rule, field_rule, record_rule]
                .into_iter()
                .flatten()
                .find(|r| !r.is_explicit());
            match preference {
                Some(Rule::InheritField) => f,
                Some(Rule::InheritRecord) => r,
                _ => match default.inherit_priority {
                    InheritPriority::Field => f,
                    InheritPriority::Record => r,
                },
            }
        }
    }
}

fn choose(rule: Rule, primary_changed: bool, tributary_changed: bool, primary: &Value, tributary: &Value, base: &Value) -> Value {
    match rule {
        Rule::PrimaryAlways => primary.clone(),
        Rule::TributaryAlways => tributary.clone(),
        _ => match (primary_changed, tributary_changed) {
            (false, false) => base.clone(),
            (true, false) => primary.clone(),
            (false, true) => tributary.clone(),
            (true, true) => match rule {
                Rule::Tributary => tributary.clone(),
                _ => primary.clone(),
            },
        },
    }
}

/// Which side the choice function selected; used at the per-record level
/// where "the chosen side" needs to be distinguishable from "the chosen
/// side's value", since that side may not have the record at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Primary,
    Tributary,
}

/// The record-level counterpart of [`choose`]: same rule semantics, but
/// reports which side won rather than a value, since a record missing from
/// the winning side must be treated as a deletion rather than a null field.
fn choose_side(rule: Rule, primary_edited: bool, tributary_edited: bool) -> Side {
    match rule {
        Rule::PrimaryAlways => Side::Primary,
        Rule::TributaryAlways => Side::Tributary,
        _ => match (primary_edited, tributary_edited) {
            (false, false) => Side::Primary,
            (true, false) => Side::Primary,
            (false, true) => Side::Tributary,
            (true, true) => match rule {
                Rule::Tributary => Side::Tributary,
                _ => Side::Primary,
            },
        },
    }
}

fn field_value(record: &Value, field: &str) -> Value {
    record
        .as_map()
        .and_then(|m| m.get(field))
        .cloned()
        .unwrap_or(Value::Null)
}

fn sorted_keys(maps: &[&BTreeMap<String, Value>]) -> Vec<String> {
    maps.iter().flat_map(|m| m.keys().cloned()).sorted().dedup().collect()
}

/// Three-way merges a single record's three states (at the lowest common
/// ancestor, the primary branch, and the tributary branch) under the
/// merge node's rule configuration.
pub fn merge_record(merge: &Merge, record_id: &Id, base: &Value, primary: &Value, tributary: &Value) -> Value {
    let empty_map = BTreeMap::new();
    let base_map = base.as_map().unwrap_or(&empty_map);
    let primary_map = primary.as_map().unwrap_or(&empty_map);
    let tributary_map = tributary.as_map().unwrap_or(&empty_map);

    let record_rules = merge.records.get(record_id);
    let record_rule = record_rules.and_then(|r| r.rule);

    let mut out = BTreeMap::new();
    for field in sorted_keys(&[base_map, primary_map, tributary_map]) {
        let base_v = field_value(base, &field);
        let primary_v = field_value(primary, &field);
        let tributary_v = field_value(tributary, &field);

        let primary_changed = primary_v != base_v;
        let tributary_changed = tributary_v != base_v;

        if !primary_changed && !tributary_changed {
            if !base_v.is_null() {
                out.insert(field, base_v);
            }
            continue;
        }

        let record_field_rule = record_rules.and_then(|r| r.fields.get(&field).copied());
        let field_rule = merge.field_rules.get(&field).copied();
        let rule = resolve_rule(record_field_rule, field_rule, record_rule, &merge.default);

        let resolved = choose(rule, primary_changed, tributary_changed, &primary_v, &tributary_v, &base_v);
        if !resolved.is_null() {
            out.insert(field, resolved);
        }
    }

    Value::Map(out)
}

/// Three-way merges an entire record map, per-record pass: every id
/// present in `primary ∪ tributary` gets one of two treatments:
/// present on both sides, it enters the per-field pass ([`merge_record`]);
/// present (or edited) on only one side, the record's general rule
/// (`records[id].all` else `default.all`) picks a side wholesale via the
/// same choice semantics as the field pass, and a chosen side that is
/// missing the record is treated as a deletion rather than resurrected.
pub fn compute_merge(
    merge: &Merge,
    base: &BTreeMap<Id, Value>,
    primary: &BTreeMap<Id, Value>,
    tributary: &BTreeMap<Id, Value>,
) -> BTreeMap<Id, Value> {
    let ids = primary.keys().chain(tributary.keys()).sorted().dedup();

    let mut out = BTreeMap::new();
    for id in ids {
        let present_in_primary = primary.contains_key(id);
        let present_in_tributary = tributary.contains_key(id);

        if present_in_primary && present_in_tributary {
            let empty = Value::map();
            let base_v = base.get(id).unwrap_or(&empty);
            out.insert(id.clone(), merge_record(merge, id, base_v, &primary[id], &tributary[id]));
            continue;
        }

        let empty = Value::map();
        let base_v = base.get(id).unwrap_or(&empty);
        let primary_v = primary.get(id).unwrap_or(&empty);
        let tributary_v = tributary.get(id).unwrap_or(&empty);
        let primary_edited = primary_v != base_v;
        let tributary_edited = tributary_v != base_v;

        let general_rule = merge
            .records
            .get(id)
            .and_then(|r| r.rule)
            .filter(|r| r.is_explicit())
            .unwrap_or(merge.default.all);

        match choose_side(general_rule, primary_edited, tributary_edited) {
            Side::Primary if present_in_primary => {
                out.insert(id.clone(), primary_v.clone());
            }
            Side::Tributary if present_in_tributary => {
                out.insert(id.clone(), tributary_v.clone());
            }
            // The chosen side doesn't have the record: preserve the
            // deletion by writing nothing.
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Common;

    fn merge_with(default_all: Rule) -> Merge {
        Merge {
            common: Common::default(),
            previous: Id::root_version(),
            tributary: Id::root_version(),
            default: DefaultRules {
                all: default_all,
                inherit_priority: InheritPriority::Field,
            },
            field_rules: BTreeMap::new(),
            records: BTreeMap::new(),
        }
    }

    fn map(pairs: &[(&str, Value)]) -> Value {
        Value::Map(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn non_conflicting_changes_both_survive() {
        let merge = merge_with(Rule::Primary);
        let base = map(&[("a", Value::Number(1.0)), ("b", Value::Number(1.0))]);
        let primary = map(&[("a", Value::Number(2.0)), ("b", Value::Number(1.0))]);
        let tributary = map(&[("a", Value::Number(1.0)), ("b", Value::Number(2.0))]);

        let out = merge_record(&merge, &Id::root_version(), &base, &primary, &tributary);
        assert_eq!(out, map(&[("a", Value::Number(2.0)), ("b", Value::Number(2.0))]));
    }

    #[test]
    fn conflict_falls_back_to_default_all() {
        let merge = merge_with(Rule::Tributary);
        let base = map(&[("a", Value::Number(1.0))]);
        let primary = map(&[("a", Value::Number(2.0))]);
        let tributary = map(&[("a", Value::Number(3.0))]);

        let out = merge_record(&merge, &Id::root_version(), &base, &primary, &tributary);
        assert_eq!(out, map(&[("a", Value::Number(3.0))]));
    }

    #[test]
    fn explicit_record_field_rule_wins_over_default() {
        let mut merge = merge_with(Rule::Tributary);
        merge.records.insert(
            Id::root_version(),
            RecordRules {
                rule: None,
                fields: BTreeMap::from([("a".to_string(), Rule::Primary)]),
            },
        );
        let base = map(&[("a", Value::Number(1.0))]);
        let primary = map(&[("a", Value::Number(2.0))]);
        let tributary = map(&[("a", Value::Number(3.0))]);

        let out = merge_record(&merge, &Id::root_version(), &base, &primary, &tributary);
        assert_eq!(out, map(&[("a", Value::Number(2.0))]));
    }

    #[test]
    fn always_rule_overrides_unilateral_change() {
        let mut merge = merge_with(Rule::Primary);
        merge.records.insert(
            Id::root_version(),
            RecordRules {
                rule: None,
                fields: BTreeMap::from([("a".to_string(), Rule::TributaryAlways)]),
            },
        );
        let base = map(&[("a", Value::Number(1.0))]);
        let primary = map(&[("a", Value::Number(2.0))]);
        let tributary = map(&[("a", Value::Number(1.0))]); // unchanged

        let out = merge_record(&merge, &Id::root_version(), &base, &primary, &tributary);
        assert_eq!(out, map(&[("a", Value::Number(1.0))]));
    }

    #[test]
    fn tie_break_prefers_record_field_inherit_variant() {
        let mut merge = merge_with(Rule::Primary);
        merge.field_rules.insert("a".to_string(), Rule::Tributary);
        merge.records.insert(
            Id::root_version(),
            RecordRules {
                rule: Some(Rule::Primary),
                fields: BTreeMap::from([("a".to_string(), Rule::InheritRecord)]),
            },
        );
        let base = map(&[("a", Value::Number(1.0))]);
        let primary = map(&[("a", Value::Number(2.0))]);
        let tributary = map(&[("a", Value::Number(3.0))]);

        let out = merge_record(&merge, &Id::root_version(), &base, &primary, &tributary);
        // InheritRecord breaks the field/record tie toward the record rule (Primary)
        assert_eq!(out, map(&[("a", Value::Number(2.0))]));
    }

    fn record_id(seq: &str) -> Id {
        Id::compose(Some(crate::id::IdType::Record), "", seq)
    }

    /// A record only primary has ever touched (absent from the LCA and
    /// from tributary entirely) still obeys an explicit `t!` general rule
    /// rather than surviving just because it's the only side that has it.
    #[test]
    fn record_level_always_rule_overrides_record_present_on_one_side_only() {
        let mut merge = merge_with(Rule::Primary);
        let id = record_id("ba");
        merge.records.insert(
            id.clone(),
            RecordRules {
                rule: Some(Rule::TributaryAlways),
                fields: BTreeMap::new(),
            },
        );

        let base: BTreeMap<Id, Value> = BTreeMap::new();
        let primary = BTreeMap::from([(id.clone(), map(&[("name", Value::from("new"))]))]);
        let tributary: BTreeMap<Id, Value> = BTreeMap::new();

        let out = compute_merge(&merge, &base, &primary, &tributary);
        assert!(!out.contains_key(&id), "tributary-always should drop a record tributary never had");
    }

    /// A record deleted on the tributary side is not resurrected by a
    /// unilateral primary edit when the rule picks tributary.
    #[test]
    fn record_deleted_on_chosen_side_preserves_deletion() {
        let mut merge = merge_with(Rule::Primary);
        let id = record_id("ba");
        merge.records.insert(
            id.clone(),
            RecordRules {
                rule: Some(Rule::TributaryAlways),
                fields: BTreeMap::new(),
            },
        );

        let base = BTreeMap::from([(id.clone(), map(&[("name", Value::from("old"))]))]);
        let primary = BTreeMap::from([(id.clone(), map(&[("name", Value::from("new"))]))]);
        let tributary: BTreeMap<Id, Value> = BTreeMap::new(); // tributary deleted it

        let out = compute_merge(&merge, &base, &primary, &tributary);
        assert!(!out.contains_key(&id));
    }

    /// Merge identity: an all-primary-always rule set reproduces `primary`
    /// exactly, and all-tributary-always reproduces `tributary` exactly,
    /// regardless of what the LCA looked like.
    #[test]
    fn merge_identity_with_always_rules() {
        let id_a = record_id("ba");
        let id_b = record_id("be");
        let base = BTreeMap::from([(id_a.clone(), map(&[("x", Value::Number(1.0))]))]);
        let primary = BTreeMap::from([
            (id_a.clone(), map(&[("x", Value::Number(2.0))])),
            (id_b.clone(), map(&[("x", Value::Number(9.0))])),
        ]);
        let tributary = BTreeMap::from([(id_a.clone(), map(&[("x", Value::Number(3.0))]))]);

        let primary_wins = merge_with(Rule::PrimaryAlways);
        assert_eq!(compute_merge(&primary_wins, &base, &primary, &tributary), primary);

        let tributary_wins = merge_with(Rule::TributaryAlways);
        assert_eq!(compute_merge(&tributary_wins, &base, &primary, &tributary), tributary);
    }

    fn arb_records() -> impl proptest::strategy::Strategy<Value = BTreeMap<Id, Value>> {
        use proptest::prelude::*;
        prop::collection::btree_map(
            "[a-z]{2,4}".prop_map(|seq| record_id(&seq)),
            any::<i16>().prop_map(|n| map(&[("x", Value::Number(n as f64))])),
            0..5,
        )
    }

    proptest::proptest! {
        /// Merge identity, property form: for arbitrary base/
        /// primary/tributary record maps, an all-primary-always rule set
        /// reproduces `primary` exactly and all-tributary-always reproduces
        /// `tributary` exactly.
        #[test]
        fn merge_identity_property(
            base in arb_records(),
            primary in arb_records(),
            tributary in arb_records(),
        ) {
            let primary_wins = merge_with(Rule::PrimaryAlways);
            proptest::prop_assert_eq!(compute_merge(&primary_wins, &base, &primary, &tributary), primary.clone());

            let tributary_wins = merge_with(Rule::TributaryAlways);
            proptest::prop_assert_eq!(compute_merge(&tributary_wins, &base, &primary, &tributary), tributary.clone());
        }

        /// When the LCA, primary, and tributary all coincide, the merge
        /// result equals that shared state regardless of rule set.
        #[test]
        fn merge_with_no_divergence_is_identity(
            shared in arb_records(),
            default_all in prop::sample::select(vec![
                Rule::Primary, Rule::Tributary, Rule::PrimaryAlways, Rule::TributaryAlways,
            ]),
        ) {
            let merge = merge_with(default_all);
            proptest::prop_assert_eq!(compute_merge(&merge, &shared, &shared, &shared), shared);
        }
    }
}
