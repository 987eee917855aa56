use foundation::Feature;
use serde_json::Value as Json;

use crate::ast::{Callee, MemberBase, Node, VariableRef};
use crate::error::ParseError;
use crate::functions::{ColorFn, Conversion, MathFn1, MathFn2, Method};
use crate::jsonpath;
use crate::syntax::{BinaryOp, Syntax};
use crate::value::{RegExp, Value};

const BUILTIN_PREFIX: &str = "tiles3d_";

/// Lowers a parsed tree into typed nodes.
///
/// JSON-path references are resolved here against `feature`'s properties and
/// must select exactly one value.
pub fn lower(syntax: &Syntax, feature: Option<&Feature>) -> Result<Node, ParseError> {
    Lowering { feature }.node(syntax)
}

struct Lowering<'a> {
    feature: Option<&'a Feature>,
}

impl Lowering<'_> {
    fn node(&self, syntax: &Syntax) -> Result<Node, ParseError> {
        Ok(match syntax {
            Syntax::Number(n) => Node::Literal(Value::Number(*n)),
            Syntax::String(s) if s.contains("${") => Node::VariableInString(s.clone()),
            Syntax::String(s) => Node::Literal(Value::String(s.clone())),
            Syntax::Identifier(name) => identifier(name)?,
            Syntax::Variable(name) => Node::Variable(VariableRef::new(name.as_str())),
            Syntax::JsonPath(path) => Node::Literal(self.json_path(path)?),
            Syntax::Array(items) => Node::Array(self.nodes(items)?),
            Syntax::Unary { op, operand } => Node::Unary {
                op: *op,
                operand: Box::new(self.node(operand)?),
            },
            Syntax::Binary { op, left, right } => {
                if matches!(op, BinaryOp::LooseEq | BinaryOp::LooseNe) {
                    return Err(ParseError::UnsupportedOperator(op.as_str().to_string()));
                }
                Node::Binary {
                    op: *op,
                    left: Box::new(self.node(left)?),
                    right: Box::new(self.node(right)?),
                }
            }
            Syntax::Conditional {
                test,
                consequent,
                alternate,
            } => Node::Ternary {
                test: Box::new(self.node(test)?),
                consequent: Box::new(self.node(consequent)?),
                alternate: Box::new(self.node(alternate)?),
            },
            Syntax::Member {
                object,
                property,
                computed,
            } => self.member(object, property, *computed)?,
            Syntax::Call { callee, args } => self.call(callee, args)?,
        })
    }

    fn nodes(&self, items: &[Syntax]) -> Result<Vec<Node>, ParseError> {
        items.iter().map(|s| self.node(s)).collect()
    }

    fn member(&self, object: &Syntax, property: &Syntax, computed: bool) -> Result<Node, ParseError> {
        let property = match (property, computed) {
            (Syntax::Identifier(name), false) => Node::Literal(Value::String(name.clone())),
            (property, _) => self.node(property)?,
        };

        let object = match object {
            Syntax::Identifier(name) if name == "feature" => MemberBase::Feature,
            Syntax::Identifier(name) if name == "Math" || name == "Number" => {
                return constant(name, &property);
            }
            other => MemberBase::Node(Box::new(self.node(other)?)),
        };
        Ok(Node::Member {
            object,
            property: Box::new(property),
        })
    }

    fn call(&self, callee: &Syntax, args: &[Syntax]) -> Result<Node, ParseError> {
        match callee {
            Syntax::Identifier(name) => self.function(name, args),
            Syntax::Member {
                object,
                property,
                computed: false,
            } => {
                let Syntax::Identifier(method_name) = property.as_ref() else {
                    return Err(ParseError::UnknownFunction(format!("{property:?}")));
                };
                let method = Method::from_name(method_name)
                    .ok_or_else(|| ParseError::UnknownFunction(method_name.clone()))?;
                if args.len() != method.arity() {
                    return Err(ParseError::Arity {
                        function: method.name().to_string(),
                        expected: if method.arity() == 0 {
                            "no arguments"
                        } else {
                            "exactly one argument"
                        },
                    });
                }
                Ok(Node::FunctionCall {
                    callee: Callee::Method {
                        object: Box::new(self.node(object)?),
                        method,
                    },
                    args: self.nodes(args)?,
                })
            }
            other => Err(ParseError::UnknownFunction(describe(other))),
        }
    }

    fn function(&self, name: &str, args: &[Syntax]) -> Result<Node, ParseError> {
        let arity = |expected: &'static str| ParseError::Arity {
            function: name.to_string(),
            expected,
        };

        let callee = if let Some(f) = MathFn1::from_name(name) {
            if args.len() != 1 {
                return Err(arity("exactly one argument"));
            }
            Callee::Math1(f)
        } else if let Some(f) = MathFn2::from_name(name) {
            if args.len() != 2 {
                return Err(arity("exactly two arguments"));
            }
            Callee::Math2(f)
        } else if name == "isNaN" || name == "isFinite" {
            match args.len() {
                0 => return Ok(Node::Literal(Value::Bool(name == "isNaN"))),
                1 if name == "isNaN" => Callee::IsNaN,
                1 => Callee::IsFinite,
                _ => return Err(arity("at most one argument")),
            }
        } else if let Some(conversion) = Conversion::from_name(name) {
            match args.len() {
                0 => return Ok(Node::Literal(conversion.default_value())),
                1 => Callee::Convert(conversion),
                _ => return Err(arity("at most one argument")),
            }
        } else if name == "regExp" {
            match args.len() {
                0 => return Ok(Node::Literal(Value::RegExp(empty_regexp()?))),
                1 | 2 => Callee::RegExp,
                _ => return Err(arity("one or two arguments")),
            }
        } else if let Some(color) = ColorFn::from_name(name) {
            let (min, max) = color.arity();
            if args.len() < min || args.len() > max {
                return Err(arity(match color {
                    ColorFn::Color => "one or two arguments",
                    ColorFn::Rgb | ColorFn::Hsl => "exactly three arguments",
                    ColorFn::Rgba | ColorFn::Hsla => "exactly four arguments",
                }));
            }
            Callee::Color(color)
        } else {
            return Err(ParseError::UnknownFunction(name.to_string()));
        };

        Ok(Node::FunctionCall {
            callee,
            args: self.nodes(args)?,
        })
    }

    fn json_path(&self, path: &str) -> Result<Value, ParseError> {
        let feature = self.feature.ok_or_else(|| ParseError::JsonPathWithoutFeature {
            path: path.to_string(),
        })?;
        let root = Json::Object(feature.properties.clone());
        let results = jsonpath::select(&root, path).map_err(|reason| {
            ParseError::InvalidJsonPath {
                path: path.to_string(),
                reason,
            }
        })?;
        match results.as_slice() {
            [only] => Ok(Value::from(*only)),
            [] => Err(ParseError::JsonPathEmpty {
                path: path.to_string(),
            }),
            many => Err(ParseError::JsonPathAmbiguous {
                path: path.to_string(),
                count: many.len(),
            }),
        }
    }
}

fn identifier(name: &str) -> Result<Node, ParseError> {
    Ok(Node::Literal(match name {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        "undefined" => Value::Undefined,
        "NaN" => Value::Number(f64::NAN),
        "Infinity" => Value::Number(f64::INFINITY),
        _ if name.starts_with(BUILTIN_PREFIX) => {
            return Ok(Node::BuiltinVariable(name.to_string()));
        }
        _ => return Err(ParseError::UndefinedIdentifier(name.to_string())),
    }))
}

fn constant(object: &str, property: &Node) -> Result<Node, ParseError> {
    let Node::Literal(Value::String(name)) = property else {
        return Err(ParseError::UnknownConstant(object.to_string()));
    };
    let value = match (object, name.as_str()) {
        ("Math", "PI") => std::f64::consts::PI,
        ("Math", "E") => std::f64::consts::E,
        ("Number", "POSITIVE_INFINITY") => f64::INFINITY,
        ("Number", "NEGATIVE_INFINITY") => f64::NEG_INFINITY,
        _ => return Err(ParseError::UnknownConstant(format!("{object}.{name}"))),
    };
    Ok(Node::Literal(Value::Number(value)))
}

fn empty_regexp() -> Result<RegExp, ParseError> {
    RegExp::new("", "").map_err(|e| ParseError::UnknownFunction(e.to_string()))
}

fn describe(syntax: &Syntax) -> String {
    match syntax {
        Syntax::Identifier(name) | Syntax::Variable(name) => name.clone(),
        Syntax::String(s) => format!("'{s}'"),
        Syntax::Number(n) => n.to_string(),
        _ => "expression".to_string(),
    }
}
