//! Typed expression tree evaluated by [`crate::eval::evaluate`].

use crate::functions::{ColorFn, Conversion, MathFn1, MathFn2, Method};
use crate::syntax::{BinaryOp, UnaryOp};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Literal(Value),
    Variable(VariableRef),
    /// `tiles3d_*` names provided by the host for 3D tiles.
    BuiltinVariable(String),
    /// String literal with `${name}` placeholders.
    VariableInString(String),
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Ternary {
        test: Box<Node>,
        consequent: Box<Node>,
        alternate: Box<Node>,
    },
    Member {
        object: MemberBase,
        property: Box<Node>,
    },
    FunctionCall {
        callee: Callee,
        args: Vec<Node>,
    },
    Array(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberBase {
    /// The `feature` object itself.
    Feature,
    Node(Box<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    Math1(MathFn1),
    Math2(MathFn2),
    IsNaN,
    IsFinite,
    Convert(Conversion),
    RegExp,
    Color(ColorFn),
    Method { object: Box<Node>, method: Method },
}

/// Reference to a feature property.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableRef {
    pub name: String,
    /// Path segments when `name` looks like `a.b[0]`; used only when no
    /// property carries the full name.
    pub path: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl VariableRef {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let path = split_path(&name).unwrap_or_default();
        Self { name, path }
    }

    /// Property holding the root of the path (or the whole name).
    pub fn root(&self) -> &str {
        match self.path.first() {
            Some(PathSegment::Key(key)) => key,
            _ => &self.name,
        }
    }
}

/// `a.b[0]` into segments; `None` for plain names or unparsable paths.
fn split_path(name: &str) -> Option<Vec<PathSegment>> {
    if !name.contains(['.', '[']) {
        return None;
    }

    let mut segments = Vec::new();
    let mut rest = name;
    let mut key = String::new();
    while let Some(ch) = rest.chars().next() {
        match ch {
            '.' => {
                if key.is_empty() && !matches!(segments.last(), Some(PathSegment::Index(_))) {
                    return None;
                }
                if !key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut key)));
                }
                rest = &rest[1..];
            }
            '[' => {
                if !key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut key)));
                }
                let close = rest.find(']')?;
                let index = rest[1..close].trim().parse::<usize>().ok()?;
                segments.push(PathSegment::Index(index));
                rest = &rest[close + 1..];
            }
            _ => {
                key.push(ch);
                rest = &rest[ch.len_utf8()..];
            }
        }
    }
    if !key.is_empty() {
        segments.push(PathSegment::Key(key));
    }

    matches!(segments.first(), Some(PathSegment::Key(_))).then_some(segments)
}

#[cfg(test)]
mod tests {
    use super::{PathSegment, VariableRef};

    #[test]
    fn plain_names_have_no_path() {
        let v = VariableRef::new("road-type");
        assert!(v.path.is_empty());
        assert_eq!(v.root(), "road-type");
    }

    #[test]
    fn dotted_and_indexed_names_split() {
        let v = VariableRef::new("a.b[2].c");
        assert_eq!(
            v.path,
            vec![
                PathSegment::Key("a".into()),
                PathSegment::Key("b".into()),
                PathSegment::Index(2),
                PathSegment::Key("c".into()),
            ]
        );
        assert_eq!(v.root(), "a");
    }

    #[test]
    fn malformed_paths_are_treated_as_plain_names() {
        assert!(VariableRef::new(".a").path.is_empty());
        assert!(VariableRef::new("a[x]").path.is_empty());
        assert!(VariableRef::new("[0]").path.is_empty());
    }
}
