use std::borrow::Cow;
use std::collections::BTreeMap;

use foundation::Feature;

use crate::ast::Node;
use crate::error::{EvalError, ParseError};
use crate::eval::evaluate;
use crate::lower::lower;
use crate::parser::parse;
use crate::syntax::Syntax;
use crate::value::Value;

/// Named text fragments substituted into expressions before parsing.
pub type Defines = BTreeMap<String, String>;

/// Replaces every `${key}` for a defined `key` with `(value)`.
pub fn expand_defines<'a>(text: &'a str, defines: Option<&Defines>) -> Cow<'a, str> {
    let Some(defines) = defines.filter(|d| !d.is_empty()) else {
        return Cow::Borrowed(text);
    };
    let mut expanded = Cow::Borrowed(text);
    for (key, value) in defines {
        let placeholder = format!("${{{key}}}");
        if expanded.contains(&placeholder) {
            expanded = Cow::Owned(expanded.replace(&placeholder, &format!("({value})")));
        }
    }
    expanded
}

/// A parsed, ready-to-evaluate style expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    /// Parses `text` after substituting `defines`.
    ///
    /// `feature` is needed only when the text contains JSON-path references,
    /// which are resolved at parse time.
    pub fn new(
        text: &str,
        feature: Option<&Feature>,
        defines: Option<&Defines>,
    ) -> Result<Self, ParseError> {
        let expanded = expand_defines(text, defines);
        let syntax = parse(&expanded)?;
        Self::from_syntax(expanded.into_owned(), &syntax, feature)
    }

    /// Builds from an already parsed tree, e.g. one kept in a syntax cache.
    pub fn from_syntax(
        source: impl Into<String>,
        syntax: &Syntax,
        feature: Option<&Feature>,
    ) -> Result<Self, ParseError> {
        Ok(Self {
            source: source.into(),
            root: lower(syntax, feature)?,
        })
    }

    pub fn evaluate(&self, feature: &Feature) -> Result<Value, EvalError> {
        evaluate(&self.root, feature)
    }

    /// Expression text after define substitution.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Node {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::{Defines, Expression, expand_defines};
    use crate::error::ParseError;
    use crate::value::Value;
    use foundation::Feature;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(12, "fast")]
    #[case(5, "slow")]
    #[case(10, "slow")]
    fn speed_classification(#[case] speed: i64, #[case] expected: &str) {
        let expr = Expression::new("${speed} > 10 ? 'fast' : 'slow'", None, None).unwrap();
        let feature = Feature::new("a").with_property("speed", speed);
        assert_eq!(expr.evaluate(&feature).unwrap(), Value::from(expected));
    }

    #[test]
    fn defines_expand_in_parentheses() {
        let defines = Defines::from([("limit".to_string(), "5 + 5".to_string())]);
        assert_eq!(
            expand_defines("${speed} > ${limit}", Some(&defines)),
            "${speed} > (5 + 5)"
        );

        let expr = Expression::new("${limit} * 2", None, Some(&defines)).unwrap();
        assert_eq!(expr.source(), "(5 + 5) * 2");
        assert_eq!(expr.evaluate(&Feature::new("a")).unwrap(), Value::Number(20.0));
    }

    #[test]
    fn undefined_names_stay_as_variables() {
        let defines = Defines::from([("other".to_string(), "1".to_string())]);
        assert_eq!(expand_defines("${speed}", Some(&defines)), "${speed}");
        assert_eq!(expand_defines("${speed}", None), "${speed}");
    }

    #[test]
    fn parse_errors_surface() {
        assert_eq!(
            Expression::new("1 2", None, None).unwrap_err(),
            ParseError::MultipleExpressions
        );
        assert_eq!(
            Expression::new("1 == 2", None, None).unwrap_err(),
            ParseError::UnsupportedOperator("==".into())
        );
        assert!(Expression::new("${speed", None, None).is_err());
    }

    #[test]
    fn json_path_bakes_in_the_parse_time_feature() {
        let feature = Feature::new("a").with_property("phones", json!([{ "type": "home" }]));
        let expr = Expression::new("${$.phones[0].type} === 'home'", Some(&feature), None).unwrap();
        assert_eq!(expr.evaluate(&feature).unwrap(), Value::Bool(true));
    }
}
