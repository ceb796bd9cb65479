//! Result and metric merging
//!
//! Pure coalescing and tagging rules used when joined children and whole
//! sessions are folded together. Provenance tagging lives here and only
//! here.

use std::collections::HashMap;
use std::hash::Hash;

use crate::session::Session;
use crate::value::{ActionKey, MetricKey, TaggedKey, Value};

/// Write `value` under `key`, newest first
pub fn coalesce<K: Eq + Hash>(map: &mut HashMap<K, Vec<Value>>, key: K, value: Value) {
    map.entry(key).or_default().insert(0, value);
}

/// Merge `incoming` into `dest`; within each key the merged-in values come first
pub fn merge<K: Eq + Hash>(dest: &mut HashMap<K, Vec<Value>>, incoming: HashMap<K, Vec<Value>>) {
    for (key, mut values) in incoming {
        let slot = dest.entry(key).or_default();
        values.append(slot);
        *slot = values;
    }
}

/// Merge a result map into a session's results
pub fn merge_results(session: &mut Session, incoming: HashMap<ActionKey, Vec<Value>>) {
    merge(&mut session.results, incoming);
}

/// Merge a metric map into a session's metrics
pub fn merge_metrics(session: &mut Session, incoming: HashMap<MetricKey, Vec<Value>>) {
    merge(&mut session.metrics, incoming);
}

/// Wrap a joined child's results as `{async, key, value}` entries under the task name
pub fn tag_results(
    name: &str,
    results: HashMap<ActionKey, Vec<Value>>,
) -> HashMap<ActionKey, Vec<Value>> {
    let tagged = results
        .into_iter()
        .flat_map(|(key, values)| {
            values.into_iter().map(move |value| Value::Async {
                key: TaggedKey::Result(key.clone()),
                value: Box::new(value),
            })
        })
        .collect::<Vec<_>>();

    if tagged.is_empty() {
        return HashMap::new();
    }

    let mut map = HashMap::new();
    map.insert(ActionKey::Async { name: name.to_string() }, tagged);
    map
}

/// Wrap a joined child's metrics as `{async, key, value}` entries under the task name
pub fn tag_metrics(
    name: &str,
    metrics: HashMap<MetricKey, Vec<Value>>,
) -> HashMap<MetricKey, Vec<Value>> {
    let tagged = metrics
        .into_iter()
        .flat_map(|(key, values)| {
            values.into_iter().map(move |value| Value::Async {
                key: TaggedKey::Metric(key.clone()),
                value: Box::new(value),
            })
        })
        .collect::<Vec<_>>();

    if tagged.is_empty() {
        return HashMap::new();
    }

    let mut map = HashMap::new();
    map.insert(MetricKey::custom(name), tagged);
    map
}

/// Fold completed sessions into one, overlaying each value with its session name
pub fn merge_sessions(sessions: Vec<Session>) -> Option<Session> {
    let mut iter = sessions.into_iter();
    let mut base = iter.next()?;
    overlay_session_name(&mut base);

    for mut next in iter {
        overlay_session_name(&mut next);
        merge(&mut base.results, std::mem::take(&mut next.results));
        merge(&mut base.metrics, std::mem::take(&mut next.metrics));
    }

    Some(base)
}

fn overlay_session_name(session: &mut Session) {
    let name = session.name().to_string();

    for values in session.results.values_mut() {
        for value in values.iter_mut() {
            let inner = std::mem::replace(value, Value::Null);
            *value = Value::Named {
                session: name.clone(),
                value: Box::new(inner),
            };
        }
    }

    for values in session.metrics.values_mut() {
        for value in values.iter_mut() {
            let inner = std::mem::replace(value, Value::Null);
            *value = Value::Named {
                session: name.clone(),
                value: Box::new(inner),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::session_named;

    fn key(name: &str) -> MetricKey {
        MetricKey::custom(name)
    }

    #[test]
    fn test_coalesce_newest_first() {
        let mut map = HashMap::new();
        coalesce(&mut map, key("x"), Value::Int(1));
        coalesce(&mut map, key("x"), Value::Int(2));
        coalesce(&mut map, key("x"), Value::Int(3));

        assert_eq!(
            map.get(&key("x")).unwrap(),
            &vec![Value::Int(3), Value::Int(2), Value::Int(1)]
        );
    }

    #[test]
    fn test_merge_incoming_first() {
        let mut dest = HashMap::new();
        coalesce(&mut dest, key("x"), Value::String("b".into()));

        let mut incoming = HashMap::new();
        coalesce(&mut incoming, key("x"), Value::String("a".into()));

        merge(&mut dest, incoming);

        assert_eq!(
            dest.get(&key("x")).unwrap(),
            &vec![Value::String("a".into()), Value::String("b".into())]
        );
    }

    #[test]
    fn test_tag_results_round_trip() {
        let child_key = ActionKey::Function { name: "work".into() };
        let mut results = HashMap::new();
        coalesce(&mut results, child_key.clone(), Value::Int(42));

        let tagged = tag_results("work", results);
        let entries = tagged
            .get(&ActionKey::Async { name: "work".into() })
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0],
            Value::Async {
                key: TaggedKey::Result(child_key),
                value: Box::new(Value::Int(42)),
            }
        );
    }

    #[test]
    fn test_tag_empty_maps() {
        assert!(tag_results("work", HashMap::new()).is_empty());
        assert!(tag_metrics("work", HashMap::new()).is_empty());
    }

    #[test]
    fn test_merge_sessions_overlays_names() {
        let mut a = session_named("a");
        let mut b = session_named("b");
        coalesce(&mut a.results, ActionKey::Function { name: "x".into() }, Value::Int(1));
        coalesce(&mut b.results, ActionKey::Function { name: "x".into() }, Value::Int(2));

        let merged = merge_sessions(vec![a, b]).unwrap();
        let entries = merged
            .results
            .get(&ActionKey::Function { name: "x".into() })
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].session_name(), Some("b"));
        assert_eq!(entries[1].session_name(), Some("a"));
        assert_eq!(entries[0].untagged(), &Value::Int(2));
    }

    #[test]
    fn test_merge_sessions_empty() {
        assert!(merge_sessions(Vec::new()).is_none());
    }
}
