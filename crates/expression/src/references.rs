use std::collections::BTreeSet;

use crate::ast::VariableRef;
use crate::lexer::{Token, template_names, tokenize};

/// Feature data an expression can observe.
///
/// Two features that agree on every referenced property (and on the id when
/// `id` is referenced) evaluate to the same result, unless `whole_feature`
/// is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    pub names: BTreeSet<String>,
    /// JSON-path or `feature` access, or text that did not scan.
    pub whole_feature: bool,
}

impl References {
    pub fn uses_id(&self) -> bool {
        self.names.contains("id")
    }

    fn add(&mut self, name: &str) {
        let variable = VariableRef::new(name);
        self.names.insert(variable.root().to_string());
        self.names.insert(variable.name);
    }
}

/// Scans `text` (after define substitution) for referenced properties.
pub fn references(text: &str) -> References {
    let mut refs = References::default();
    let Ok(tokens) = tokenize(text) else {
        refs.whole_feature = true;
        return refs;
    };
    for token in tokens {
        match token.value {
            Token::Variable(name) => refs.add(&name),
            Token::Str(s) => template_names(&s).for_each(|name| refs.add(name)),
            Token::Ident(name) if name.starts_with("tiles3d_") => refs.add(&name),
            Token::Ident(name) if name == "feature" => refs.whole_feature = true,
            Token::JsonPath(_) => refs.whole_feature = true,
            _ => {}
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::references;
    use pretty_assertions::assert_eq;

    fn names(text: &str) -> Vec<String> {
        references(text).names.into_iter().collect()
    }

    #[test]
    fn collects_variables_and_template_names() {
        assert_eq!(
            names("${speed} > 10 ? '${name} fast' : 'slow'"),
            vec!["name".to_string(), "speed".to_string()]
        );
        assert!(!references("${speed}").whole_feature);
    }

    #[test]
    fn paths_record_their_root() {
        assert_eq!(
            names("${a.b[0]}"),
            vec!["a".to_string(), "a.b[0]".to_string()]
        );
    }

    #[test]
    fn id_is_tracked() {
        assert!(references("${id} === 'x'").uses_id());
        assert!(!references("${ids}").uses_id());
    }

    #[test]
    fn feature_and_json_path_need_everything() {
        assert!(references("feature.id").whole_feature);
        assert!(references("${$.a}").whole_feature);
        assert!(references("'unterminated").whole_feature);
    }
}
