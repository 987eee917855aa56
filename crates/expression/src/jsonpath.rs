//! Small JSONPath evaluator over `serde_json` values.
//!
//! Supports `$`, `.name`, `['name']`, `[n]`, `[*]`, `.*`, `[start:end:step]`,
//! unions like `[0,2]` and recursive descent `..name`. Filters are not
//! supported.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Selector {
    Key(String),
    Index(i64),
    Wildcard,
    Slice {
        start: Option<i64>,
        end: Option<i64>,
        step: i64,
    },
    Union(Vec<Selector>),
    Descendant(Box<Selector>),
}

/// All values `path` selects from `root`, in document order.
pub fn select<'a>(root: &'a Value, path: &str) -> Result<Vec<&'a Value>, String> {
    let selectors = compile(path)?;
    let mut current = vec![root];
    for selector in &selectors {
        let mut next = Vec::new();
        for node in current {
            apply(selector, node, &mut next);
        }
        current = next;
    }
    Ok(current)
}

fn apply<'a>(selector: &Selector, node: &'a Value, out: &mut Vec<&'a Value>) {
    match selector {
        Selector::Key(key) => {
            if let Some(v) = node.as_object().and_then(|m| m.get(key)) {
                out.push(v);
            }
        }
        Selector::Index(index) => {
            if let Some(items) = node.as_array() {
                let len = items.len() as i64;
                let i = if *index < 0 { len.checked_add(*index) } else { Some(*index) };
                if let Some(i) = i.filter(|i| (0..len).contains(i)) {
                    out.push(&items[i as usize]);
                }
            }
        }
        Selector::Wildcard => match node {
            Value::Array(items) => out.extend(items.iter()),
            Value::Object(map) => out.extend(map.values()),
            _ => {}
        },
        Selector::Slice { start, end, step } => {
            let Some(items) = node.as_array() else {
                return;
            };
            let len = items.len() as i64;
            let clamp = |v: i64| {
                if v < 0 {
                    len.saturating_add(v).max(0)
                } else {
                    v.min(len)
                }
            };
            // Huge steps end the walk instead of overflowing.
            if *step > 0 {
                let mut i = start.map(clamp).unwrap_or(0);
                let stop = end.map(clamp).unwrap_or(len);
                while i < stop {
                    out.push(&items[i as usize]);
                    let Some(next) = i.checked_add(*step) else {
                        break;
                    };
                    i = next;
                }
            } else {
                let mut i = start.map(|s| clamp(s).min(len - 1)).unwrap_or(len - 1);
                let stop = end.map(clamp).unwrap_or(-1);
                while i > stop && i >= 0 {
                    out.push(&items[i as usize]);
                    let Some(next) = i.checked_add(*step) else {
                        break;
                    };
                    i = next;
                }
            }
        }
        Selector::Union(parts) => {
            for part in parts {
                apply(part, node, out);
            }
        }
        Selector::Descendant(inner) => {
            let mut stack = vec![node];
            let mut visited = Vec::new();
            while let Some(n) = stack.pop() {
                visited.push(n);
                match n {
                    Value::Array(items) => stack.extend(items.iter().rev()),
                    Value::Object(map) => {
                        let children: Vec<&Value> = map.values().collect();
                        stack.extend(children.into_iter().rev());
                    }
                    _ => {}
                }
            }
            for n in visited {
                apply(inner, n, out);
            }
        }
    }
}

fn compile(path: &str) -> Result<Vec<Selector>, String> {
    let Some(mut rest) = path.trim().strip_prefix('$') else {
        return Err("must start with $".to_string());
    };

    let mut selectors = Vec::new();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("..") {
            let (selector, remaining) = if after.starts_with('[') {
                bracket(after)?
            } else {
                dot_name(after)?
            };
            selectors.push(Selector::Descendant(Box::new(selector)));
            rest = remaining;
        } else if let Some(after) = rest.strip_prefix('.') {
            let (selector, remaining) = dot_name(after)?;
            selectors.push(selector);
            rest = remaining;
        } else if rest.starts_with('[') {
            let (selector, remaining) = bracket(rest)?;
            selectors.push(selector);
            rest = remaining;
        } else {
            return Err(format!("unexpected \"{rest}\""));
        }
    }
    Ok(selectors)
}

fn dot_name(input: &str) -> Result<(Selector, &str), String> {
    if let Some(rest) = input.strip_prefix('*') {
        return Ok((Selector::Wildcard, rest));
    }
    let end = input
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$' || c == '-'))
        .unwrap_or(input.len());
    if end == 0 {
        return Err("expected a property name".to_string());
    }
    Ok((Selector::Key(input[..end].to_string()), &input[end..]))
}

fn bracket(input: &str) -> Result<(Selector, &str), String> {
    let body_and_rest = &input[1..];
    let close = closing_bracket(body_and_rest).ok_or("unclosed [")?;
    let body = body_and_rest[..close].trim();
    let rest = &body_and_rest[close + 1..];

    if body == "*" {
        return Ok((Selector::Wildcard, rest));
    }
    if body.starts_with('?') || body.starts_with('(') {
        return Err("filter and script expressions are not supported".to_string());
    }

    let mut parts = split_union(body)
        .into_iter()
        .map(|part| bracket_item(part.trim()))
        .collect::<Result<Vec<_>, _>>()?;
    let selector = if parts.len() == 1 {
        parts.remove(0)
    } else {
        Selector::Union(parts)
    };
    Ok((selector, rest))
}

fn bracket_item(item: &str) -> Result<Selector, String> {
    if let Some(quoted) = unquote(item) {
        return Ok(Selector::Key(quoted.to_string()));
    }
    if item.contains(':') {
        let bounds: Vec<&str> = item.split(':').map(str::trim).collect();
        if bounds.len() > 3 {
            return Err(format!("bad slice \"{item}\""));
        }
        let number = |s: &str| -> Result<Option<i64>, String> {
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse().map(Some).map_err(|_| format!("bad slice \"{item}\""))
            }
        };
        let step = match bounds.get(2) {
            Some(s) => number(s)?.unwrap_or(1),
            None => 1,
        };
        if step == 0 {
            return Err("slice step cannot be zero".to_string());
        }
        return Ok(Selector::Slice {
            start: number(bounds[0])?,
            end: number(bounds.get(1).copied().unwrap_or(""))?,
            step,
        });
    }
    item.parse::<i64>()
        .map(Selector::Index)
        .map_err(|_| format!("bad selector \"{item}\""))
}

fn unquote(item: &str) -> Option<&str> {
    ['\'', '"'].into_iter().find_map(|q| {
        item.strip_prefix(q)
            .and_then(|s| s.strip_suffix(q))
    })
}

/// Index of the `]` closing the bracket, skipping quoted sections.
fn closing_bracket(input: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ']') => return Some(i),
            _ => {}
        }
    }
    None
}

fn split_union(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ',') => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::select;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn doc() -> Value {
        json!({
            "firstName": "John",
            "address": { "city": "Nara", "postalCode": "630-0192" },
            "phoneNumbers": [
                { "type": "iPhone", "number": "0123-4567-8888" },
                { "type": "home", "number": "0123-4567-8910" }
            ]
        })
    }

    fn owned(values: Vec<&Value>) -> Vec<Value> {
        values.into_iter().cloned().collect()
    }

    #[test]
    fn dot_and_bracket_children() {
        let d = doc();
        assert_eq!(owned(select(&d, "$.address.city").unwrap()), vec![json!("Nara")]);
        assert_eq!(
            owned(select(&d, "$['address']['postalCode']").unwrap()),
            vec![json!("630-0192")]
        );
        assert_eq!(
            owned(select(&d, "$.phoneNumbers[-1].type").unwrap()),
            vec![json!("home")]
        );
    }

    #[test]
    fn slices_and_wildcards() {
        let d = doc();
        assert_eq!(
            owned(select(&d, "$.phoneNumbers[:1].type").unwrap()),
            vec![json!("iPhone")]
        );
        assert_eq!(
            owned(select(&d, "$.phoneNumbers[*].type").unwrap()),
            vec![json!("iPhone"), json!("home")]
        );
        assert_eq!(
            owned(select(&d, "$.phoneNumbers[::-1].type").unwrap()),
            vec![json!("home"), json!("iPhone")]
        );
        assert_eq!(select(&d, "$.address.*").unwrap().len(), 2);
    }

    #[test]
    fn unions_and_recursive_descent() {
        let d = doc();
        assert_eq!(
            owned(select(&d, "$.phoneNumbers[0,1].number").unwrap()),
            vec![json!("0123-4567-8888"), json!("0123-4567-8910")]
        );
        assert_eq!(
            owned(select(&d, "$..type").unwrap()),
            vec![json!("iPhone"), json!("home")]
        );
    }

    #[test]
    fn extreme_steps_and_indexes_stay_in_bounds() {
        let d = json!({ "a": [1, 2, 3] });
        assert_eq!(owned(select(&d, "$.a[1::9223372036854775807]").unwrap()), vec![json!(2)]);
        assert_eq!(owned(select(&d, "$.a[::-9223372036854775808]").unwrap()), vec![json!(3)]);
        assert!(select(&d, "$.a[-9223372036854775808]").unwrap().is_empty());
        assert_eq!(
            owned(select(&d, "$.a[-9223372036854775808:]").unwrap()),
            vec![json!(1), json!(2), json!(3)]
        );
    }

    #[test]
    fn missing_paths_select_nothing() {
        let d = doc();
        assert!(select(&d, "$.nope").unwrap().is_empty());
        assert!(select(&d, "$.phoneNumbers[7]").unwrap().is_empty());
    }

    #[test]
    fn rejects_unsupported_syntax() {
        let d = doc();
        assert!(select(&d, "address.city").is_err());
        assert!(select(&d, "$.phoneNumbers[?(@.type)]").is_err());
        assert!(select(&d, "$.phoneNumbers[0").is_err());
        assert!(select(&d, "$.").is_err());
    }
}
