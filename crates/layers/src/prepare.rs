use std::borrow::Cow;

use foundation::{Feature, Time, TimeInterval};
use serde_json::Value;
use streaming::TimeConfig;

/// Parses the named string properties that hold JSON text.
///
/// Values that are not strings or not valid JSON are left as they are.
pub fn parse_json_properties<'a>(feature: &'a Feature, names: &[String]) -> Cow<'a, Feature> {
    let mut parsed = Cow::Borrowed(feature);
    for name in names {
        let Some(Value::String(text)) = feature.property(name) else {
            continue;
        };
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            parsed.to_mut().properties.insert(name.clone(), value);
        }
    }
    parsed
}

fn time_of(feature: &Feature, property: &str) -> Option<f64> {
    let t = match feature.property(property)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    t.is_finite().then_some(t)
}

/// Interval per feature, in input order, or `None` when the source is not
/// time-dynamic.
///
/// With a fixed `interval` each feature spans `[t, t + interval)`. Otherwise
/// it lasts until the next distinct time and the latest one stays open.
pub fn time_intervals(
    features: &[Feature],
    time: Option<&TimeConfig>,
) -> Option<Vec<Option<TimeInterval>>> {
    let time = time?;
    let times: Vec<Option<f64>> = features.iter().map(|f| time_of(f, &time.property)).collect();

    let mut distinct: Vec<f64> = times.iter().flatten().copied().collect();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();

    let intervals = times
        .into_iter()
        .map(|t| {
            let t = t?;
            let end = match time.interval {
                Some(length) => Some(t + length),
                None => distinct.get(distinct.partition_point(|x| *x <= t)).copied(),
            };
            Some(match end {
                Some(end) => TimeInterval::bounded(Time(t), Time(end)),
                None => TimeInterval::open(Time(t)),
            })
        })
        .collect();
    Some(intervals)
}

#[cfg(test)]
mod tests {
    use super::{parse_json_properties, time_intervals};
    use foundation::{Feature, Time, TimeInterval};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::borrow::Cow;
    use streaming::TimeConfig;

    #[test]
    fn json_properties_parse_when_valid() {
        let feature = Feature::new("a")
            .with_property("meta", r#"{"height": 3}"#)
            .with_property("broken", "{nope")
            .with_property("plain", "{\"x\": 1}");
        let names = vec!["meta".to_string(), "broken".to_string(), "missing".to_string()];

        let parsed = parse_json_properties(&feature, &names);
        assert_eq!(parsed.property("meta"), Some(&json!({ "height": 3 })));
        assert_eq!(parsed.property("broken"), Some(&json!("{nope")));
        assert_eq!(parsed.property("plain"), Some(&json!("{\"x\": 1}")));
    }

    #[test]
    fn untouched_features_are_borrowed() {
        let feature = Feature::new("a").with_property("meta", 3);
        assert!(matches!(
            parse_json_properties(&feature, &["meta".to_string()]),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn intervals_run_to_the_next_time() {
        let features = vec![
            Feature::new("late").with_property("t", 20),
            Feature::new("early").with_property("t", 10),
            Feature::new("same").with_property("t", "10"),
            Feature::new("none"),
        ];
        let config = TimeConfig { property: "t".into(), interval: None };

        assert_eq!(
            time_intervals(&features, Some(&config)).unwrap(),
            vec![
                Some(TimeInterval::open(Time(20.0))),
                Some(TimeInterval::bounded(Time(10.0), Time(20.0))),
                Some(TimeInterval::bounded(Time(10.0), Time(20.0))),
                None,
            ]
        );
    }

    #[test]
    fn each_time_ends_at_its_successor() {
        let features: Vec<Feature> = [30, 0, 10, 20, 10]
            .into_iter()
            .enumerate()
            .map(|(i, t)| Feature::new(format!("f{i}")).with_property("t", t))
            .collect();
        let config = TimeConfig { property: "t".into(), interval: None };

        let ends: Vec<Option<Time>> = time_intervals(&features, Some(&config))
            .unwrap()
            .into_iter()
            .map(|interval| interval.and_then(|i| i.end))
            .collect();
        assert_eq!(
            ends,
            vec![None, Some(Time(10.0)), Some(Time(20.0)), Some(Time(30.0)), Some(Time(20.0))]
        );
    }

    #[test]
    fn fixed_intervals() {
        let features = vec![Feature::new("a").with_property("t", 5)];
        let config = TimeConfig { property: "t".into(), interval: Some(2.5) };
        assert_eq!(
            time_intervals(&features, Some(&config)).unwrap(),
            vec![Some(TimeInterval::bounded(Time(5.0), Time(7.5)))]
        );
        assert_eq!(time_intervals(&features, None), None);
    }
}
