// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! In-place edits of a PrometheusRule spec. Alerting rules are identified by
//! alert name.

use crate::types::v1::prometheus_rule::{PrometheusRuleSpec, Rule, RuleGroup};

pub fn contains_rule(spec: &PrometheusRuleSpec, name: &str) -> bool {
    spec.groups
        .iter()
        .flat_map(|g| &g.rules)
        .any(|r| r.alert_name() == name)
}

/// Appends `rule` to `group`, creating the group when missing.
pub fn add_rule(spec: &mut PrometheusRuleSpec, group: &str, rule: Rule) {
    match spec.groups.iter_mut().find(|g| g.name == group) {
        Some(g) => g.rules.push(rule),
        None => spec.groups.push(RuleGroup {
            name: group.to_string(),
            rules: vec![rule],
            ..Default::default()
        }),
    }
}

/// Drops every rule named `name` and any group left empty. Returns whether
/// something was removed.
pub fn remove_rule(spec: &mut PrometheusRuleSpec, name: &str) -> bool {
    let mut removed = false;
    for group in spec.groups.iter_mut() {
        let before = group.rules.len();
        group.rules.retain(|r| r.alert_name() != name);
        removed |= group.rules.len() != before;
    }
    if removed {
        spec.groups.retain(|g| !g.rules.is_empty());
    }
    removed
}

/// Replaces the rule with the same alert name.
///
/// The first copy found in `group` is overwritten in place and other copies
/// are dropped; without a copy in `group` the rule moves there. Returns
/// `false` when the spec holds no rule of that name.
pub fn update_rule(spec: &mut PrometheusRuleSpec, group: &str, rule: Rule) -> bool {
    let name = rule.alert_name().to_string();
    if !contains_rule(spec, &name) {
        return false;
    }

    let slot = spec
        .groups
        .iter()
        .position(|g| g.name == group)
        .and_then(|gi| {
            spec.groups[gi]
                .rules
                .iter()
                .position(|r| r.alert_name() == name)
                .map(|ri| (gi, ri))
        });

    match slot {
        Some((gi, ri)) => {
            spec.groups[gi].rules[ri] = rule.clone();
            for (i, g) in spec.groups.iter_mut().enumerate() {
                let mut index = 0;
                g.rules.retain(|r| {
                    let keep = r.alert_name() != name || (i == gi && index == ri);
                    index += 1;
                    keep
                });
            }
            spec.groups.retain(|g| !g.rules.is_empty());
        }
        None => {
            remove_rule(spec, &name);
            add_rule(spec, group, rule);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    fn rule(name: &str, expr: &str) -> Rule {
        Rule {
            alert: Some(name.to_string()),
            expr: IntOrString::String(expr.to_string()),
            ..Default::default()
        }
    }

    fn names(spec: &PrometheusRuleSpec) -> Vec<(String, String, String)> {
        spec.groups
            .iter()
            .flat_map(|g| {
                g.rules
                    .iter()
                    .map(|r| (g.name.clone(), r.alert_name().to_string(), r.expr_string()))
            })
            .collect()
    }

    #[test]
    fn test_add_creates_and_appends_group() {
        let mut spec = PrometheusRuleSpec::default();
        add_rule(&mut spec, "g", rule("a", "up"));
        add_rule(&mut spec, "g", rule("b", "up"));
        add_rule(&mut spec, "h", rule("c", "up"));
        assert_eq!(spec.groups.len(), 2);
        assert_eq!(spec.groups[0].rules.len(), 2);
    }

    #[test]
    fn test_remove_drops_empty_groups() {
        let mut spec = PrometheusRuleSpec::default();
        add_rule(&mut spec, "g", rule("a", "up"));
        add_rule(&mut spec, "h", rule("a", "up"));
        add_rule(&mut spec, "h", rule("b", "up"));

        assert!(remove_rule(&mut spec, "a"));
        assert_eq!(names(&spec), vec![("h".into(), "b".into(), "up".into())]);
        assert!(!remove_rule(&mut spec, "a"));
    }

    #[test]
    fn test_update_in_place_keeps_position_and_drops_copies() {
        let mut spec = PrometheusRuleSpec::default();
        add_rule(&mut spec, "g", rule("x", "up"));
        add_rule(&mut spec, "g", rule("a", "old"));
        add_rule(&mut spec, "g", rule("y", "up"));
        add_rule(&mut spec, "h", rule("a", "stale"));

        assert!(update_rule(&mut spec, "g", rule("a", "new")));
        assert_eq!(
            names(&spec),
            vec![
                ("g".into(), "x".into(), "up".into()),
                ("g".into(), "a".into(), "new".into()),
                ("g".into(), "y".into(), "up".into()),
            ]
        );
    }

    #[test]
    fn test_update_moves_rule_between_groups() {
        let mut spec = PrometheusRuleSpec::default();
        add_rule(&mut spec, "h", rule("a", "old"));
        assert!(update_rule(&mut spec, "g", rule("a", "new")));
        assert_eq!(names(&spec), vec![("g".into(), "a".into(), "new".into())]);
    }

    #[test]
    fn test_update_missing_rule() {
        let mut spec = PrometheusRuleSpec::default();
        add_rule(&mut spec, "g", rule("b", "up"));
        let before = spec.clone();
        assert!(!update_rule(&mut spec, "g", rule("a", "new")));
        assert_eq!(spec, before);
    }
}
