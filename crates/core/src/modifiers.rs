//! Resolution of modifiers into the final shape of an emitted metric.
//!
//! For one emission the engine starts from the definition defaults, applies
//! every matching always-apply rule in registration order and then the
//! call-site modifiers. Tag additions merge by key with later ones winning, so
//! call-site tags override rule tags. Tag removals run after all additions.
//! Every other modifier folds left to right.

use std::collections::BTreeSet;

use tally_plugin_protocol::{
    MetricRecord, MetricType, Modifier, RuleId, Tags, Timestamp, TypedValue,
};

use crate::namespace::{Namespace, Selector};
use crate::registry::MetricDefinition;

/// Modifiers applied to every matching metric of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct AlwaysApplyRule {
    pub id: RuleId,
    pub selector: Selector,
    pub modifiers: Vec<Modifier>,
}

impl AlwaysApplyRule {
    #[must_use]
    pub fn new(id: RuleId, selector: Selector, modifiers: Vec<Modifier>) -> Self {
        Self {
            id,
            selector,
            modifiers,
        }
    }
}

#[derive(Debug)]
struct Resolution {
    tags: Tags,
    removed: BTreeSet<String>,
    description: String,
    unit: String,
    timestamp: Option<Timestamp>,
    metric_type: MetricType,
}

impl Resolution {
    fn apply(&mut self, modifier: &Modifier) {
        match modifier {
            Modifier::AddTags(tags) => {
                self.tags
                    .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Modifier::RemoveTags(keys) => self.removed.extend(keys.iter().cloned()),
            Modifier::SetTimestamp(ts) => self.timestamp = Some(*ts),
            Modifier::SetDescription(text) => self.description.clone_from(text),
            Modifier::SetUnit(unit) => self.unit.clone_from(unit),
            Modifier::SetMetricType(kind) => self.metric_type = *kind,
        }
    }
}

/// Build the record for one emission.
pub fn resolve(
    namespace: &Namespace,
    value: TypedValue,
    definition: Option<&MetricDefinition>,
    rules: &[AlwaysApplyRule],
    call_site: &[Modifier],
) -> MetricRecord {
    let mut resolution = Resolution {
        tags: Tags::new(),
        removed: BTreeSet::new(),
        description: definition.map(|d| d.description.clone()).unwrap_or_default(),
        unit: definition.map(|d| d.unit.clone()).unwrap_or_default(),
        timestamp: None,
        metric_type: MetricType::Unknown,
    };

    let from_rules = rules
        .iter()
        .filter(|rule| rule.selector.matches(namespace))
        .flat_map(|rule| rule.modifiers.iter());
    for modifier in from_rules.chain(call_site) {
        resolution.apply(modifier);
    }

    let Resolution {
        mut tags,
        removed,
        description,
        unit,
        timestamp,
        metric_type,
    } = resolution;
    tags.retain(|key, _| !removed.contains(key));

    MetricRecord {
        namespace: namespace.to_string(),
        value,
        tags,
        description,
        unit,
        timestamp: timestamp.unwrap_or_else(Timestamp::now),
        metric_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(selector: &str, modifiers: Vec<Modifier>) -> AlwaysApplyRule {
        AlwaysApplyRule::new(RuleId::new(0), Selector::parse(selector).unwrap(), modifiers)
    }

    fn emit(ns: &str, rules: &[AlwaysApplyRule], call_site: &[Modifier]) -> MetricRecord {
        resolve(
            &Namespace::parse(ns).unwrap(),
            TypedValue::Int64(1),
            None,
            rules,
            call_site,
        )
    }

    #[test]
    fn test_rule_tags_apply_and_call_site_overrides() {
        let rules = [rule(
            "group1/*",
            vec![Modifier::add_tags([("env", "rule"), ("keep", "yes")])],
        )];
        let record = emit(
            "group1/metric1",
            &rules,
            &[Modifier::add_tags([("env", "call")])],
        );
        assert_eq!(record.tag("env"), Some("call"));
        assert_eq!(record.tag("keep"), Some("yes"));

        let other = emit("group2/metric1", &rules, &[]);
        assert!(other.tags.is_empty());
    }

    #[test]
    fn test_rules_apply_in_registration_order() {
        let rules = [
            rule("*", vec![Modifier::unit("first"), Modifier::add_tags([("k", "1")])]),
            rule("a/*", vec![Modifier::unit("second"), Modifier::add_tags([("k", "2")])]),
        ];
        let record = emit("a/b", &rules, &[]);
        assert_eq!(record.unit, "second");
        assert_eq!(record.tag("k"), Some("2"));
    }

    #[test]
    fn test_removals_run_after_all_additions() {
        let rules = [rule("a/*", vec![Modifier::remove_tags(["drop"])])];
        let record = emit(
            "a/b",
            &rules,
            &[Modifier::add_tags([("drop", "x"), ("stay", "y")])],
        );
        assert_eq!(record.tag("drop"), None);
        assert_eq!(record.tag("stay"), Some("y"));
    }

    #[test]
    fn test_definition_defaults_and_overrides() {
        let definition = MetricDefinition {
            namespace: Namespace::parse("a/b").unwrap(),
            unit: "b".into(),
            is_default: true,
            description: "defined".into(),
        };
        let ns = Namespace::parse("a/b").unwrap();

        let plain = resolve(&ns, TypedValue::Bool(true), Some(&definition), &[], &[]);
        assert_eq!(plain.unit, "b");
        assert_eq!(plain.description, "defined");
        assert_eq!(plain.metric_type, MetricType::Unknown);

        let overridden = resolve(
            &ns,
            TypedValue::Bool(true),
            Some(&definition),
            &[],
            &[
                Modifier::description("first"),
                Modifier::description("custom"),
                Modifier::timestamp(5, 6),
                Modifier::metric_type(MetricType::Gauge),
            ],
        );
        assert_eq!(overridden.description, "custom");
        assert_eq!(overridden.unit, "b");
        assert_eq!(overridden.timestamp, Timestamp::new(5, 6));
        assert_eq!(overridden.metric_type, MetricType::Gauge);
    }
}
