use foundation::Feature;
use serde_json::Value as Json;

use crate::ast::{Callee, MemberBase, Node, PathSegment, VariableRef};
use crate::error::EvalError;
use crate::functions::{Method, argument_error};
use crate::lexer::template_names;
use crate::syntax::{BinaryOp, UnaryOp};
use crate::value::{RegExp, Value};

// Substitutions can themselves produce `${...}`; stop after a few rounds.
const MAX_TEMPLATE_PASSES: usize = 8;

/// Evaluates a lowered tree against one feature.
pub fn evaluate(node: &Node, feature: &Feature) -> Result<Value, EvalError> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Variable(variable) => Ok(variable_value(variable, feature)),
        Node::BuiltinVariable(name) => Ok(feature
            .property(name)
            .map(Value::from)
            .unwrap_or(Value::Undefined)),
        Node::VariableInString(template) => Ok(Value::String(interpolate(template, feature))),
        Node::Unary { op, operand } => unary(*op, evaluate(operand, feature)?),
        Node::Binary { op, left, right } => binary(*op, left, right, feature),
        Node::Ternary {
            test,
            consequent,
            alternate,
        } => match evaluate(test, feature)? {
            Value::Bool(true) => evaluate(consequent, feature),
            Value::Bool(false) => evaluate(alternate, feature),
            other => Err(EvalError::ConditionNotBoolean(other.to_string())),
        },
        Node::Member { object, property } => {
            let key = evaluate(property, feature)?;
            Ok(match object {
                MemberBase::Feature => feature_member(feature, &key),
                MemberBase::Node(object) => evaluate(object, feature)?.member(&key),
            })
        }
        Node::FunctionCall { callee, args } => call(callee, args, feature),
        Node::Array(items) => items
            .iter()
            .map(|item| evaluate(item, feature))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
    }
}

fn variable_value(variable: &VariableRef, feature: &Feature) -> Value {
    if let Some(value) = feature.property(&variable.name) {
        return Value::from(value);
    }
    if variable.name == "id" {
        return Value::String(feature.id.clone());
    }
    walk_path(&variable.path, feature)
        .map(Value::from)
        .unwrap_or_else(|| Value::String(String::new()))
}

fn walk_path<'a>(path: &[PathSegment], feature: &'a Feature) -> Option<&'a Json> {
    let (PathSegment::Key(root), rest) = path.split_first()? else {
        return None;
    };
    rest.iter()
        .try_fold(feature.property(root)?, |value, segment| match segment {
            PathSegment::Key(key) => value.get(key.as_str()),
            PathSegment::Index(index) => value.get(*index),
        })
}

fn interpolate(template: &str, feature: &Feature) -> String {
    let mut text = template.to_string();
    for _ in 0..MAX_TEMPLATE_PASSES {
        let names: Vec<String> = template_names(&text).map(str::to_string).collect();
        if names.is_empty() {
            break;
        }
        for name in names {
            let replacement = match feature.property(&name) {
                Some(value) => Value::from(value).to_string(),
                None if name == "id" => feature.id.clone(),
                None => String::new(),
            };
            text = text.replacen(&format!("${{{name}}}"), &replacement, 1);
        }
    }
    text
}

fn feature_member(feature: &Feature, key: &Value) -> Value {
    let key = key.to_string();
    feature
        .attribute(&key)
        .or_else(|| feature.property(&key).cloned())
        .map(Value::from)
        .unwrap_or(Value::Undefined)
}

fn unary(op: UnaryOp, operand: Value) -> Result<Value, EvalError> {
    let mismatch = |expected| EvalError::UnaryType {
        operator: op.as_str(),
        expected,
        operand: operand.to_string(),
    };
    match (op, &operand) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Not, _) => Err(mismatch("boolean")),
        (UnaryOp::Negate, Value::Number(n)) => Ok(Value::Number(-n)),
        (UnaryOp::Plus, Value::Number(n)) => Ok(Value::Number(*n)),
        (UnaryOp::Negate | UnaryOp::Plus, _) => Err(mismatch("number")),
    }
}

fn binary(op: BinaryOp, left: &Node, right: &Node, feature: &Feature) -> Result<Value, EvalError> {
    let operands = || -> Result<(Value, Value), EvalError> {
        Ok((evaluate(left, feature)?, evaluate(right, feature)?))
    };
    match op {
        BinaryOp::And | BinaryOp::Or => logical(op, left, right, feature),
        // Loose equality never survives lowering; treat it as strict.
        BinaryOp::StrictEq | BinaryOp::LooseEq => {
            let (l, r) = operands()?;
            Ok(Value::Bool(l.strict_equals(&r)))
        }
        BinaryOp::StrictNe | BinaryOp::LooseNe => {
            let (l, r) = operands()?;
            Ok(Value::Bool(!l.strict_equals(&r)))
        }
        BinaryOp::Match | BinaryOp::NotMatch => {
            let (l, r) = operands()?;
            let matched = match (&l, &r) {
                (Value::RegExp(re), Value::String(s)) | (Value::String(s), Value::RegExp(re)) => {
                    re.test(s)
                }
                _ => return Err(mismatch(op, "one RegExp and one string", &l, &r)),
            };
            Ok(Value::Bool(matched == (op == BinaryOp::Match)))
        }
        BinaryOp::Add => numeric(op, operands()?, |a, b| Value::Number(a + b)),
        BinaryOp::Sub => numeric(op, operands()?, |a, b| Value::Number(a - b)),
        BinaryOp::Mul => numeric(op, operands()?, |a, b| Value::Number(a * b)),
        BinaryOp::Div => numeric(op, operands()?, |a, b| Value::Number(a / b)),
        BinaryOp::Rem => numeric(op, operands()?, |a, b| Value::Number(a % b)),
        BinaryOp::Lt => numeric(op, operands()?, |a, b| Value::Bool(a < b)),
        BinaryOp::Le => numeric(op, operands()?, |a, b| Value::Bool(a <= b)),
        BinaryOp::Gt => numeric(op, operands()?, |a, b| Value::Bool(a > b)),
        BinaryOp::Ge => numeric(op, operands()?, |a, b| Value::Bool(a >= b)),
    }
}

fn numeric(
    op: BinaryOp,
    (left, right): (Value, Value),
    apply: impl FnOnce(f64, f64) -> Value,
) -> Result<Value, EvalError> {
    match (&left, &right) {
        (Value::Number(a), Value::Number(b)) => Ok(apply(*a, *b)),
        _ => Err(mismatch(op, "number", &left, &right)),
    }
}

fn mismatch(op: BinaryOp, expected: &'static str, left: &Value, right: &Value) -> EvalError {
    EvalError::BinaryType {
        operator: op.as_str(),
        expected,
        left: left.to_string(),
        right: right.to_string(),
    }
}

fn logical(op: BinaryOp, left: &Node, right: &Node, feature: &Feature) -> Result<Value, EvalError> {
    let lhs = evaluate(left, feature)?;
    let Value::Bool(l) = lhs else {
        return Err(mismatch(op, "boolean", &lhs, &Value::Undefined));
    };
    if (op == BinaryOp::And && !l) || (op == BinaryOp::Or && l) {
        return Ok(Value::Bool(l));
    }
    match evaluate(right, feature)? {
        Value::Bool(r) => Ok(Value::Bool(r)),
        other => Err(mismatch(op, "boolean", &lhs, &other)),
    }
}

fn call(callee: &Callee, args: &[Node], feature: &Feature) -> Result<Value, EvalError> {
    let args = evaluate_all(args, feature)?;
    match callee {
        Callee::Math1(f) => match args.as_slice() {
            [Value::Number(x)] => Ok(Value::Number(f.apply(*x))),
            _ => Err(argument_error(f.name(), "a number argument", &args)),
        },
        Callee::Math2(f) => match args.as_slice() {
            [Value::Number(a), Value::Number(b)] => Ok(Value::Number(f.apply(*a, *b))),
            _ => Err(argument_error(f.name(), "number arguments", &args)),
        },
        Callee::IsNaN => Ok(Value::Bool(first(&args).to_number().is_nan())),
        Callee::IsFinite => Ok(Value::Bool(first(&args).to_number().is_finite())),
        Callee::Convert(conversion) => Ok(conversion.apply(&first(&args))),
        Callee::RegExp => {
            let pattern = first(&args).to_string();
            let flags = args.get(1).map(Value::to_string).unwrap_or_default();
            RegExp::new(&pattern, &flags).map(Value::RegExp)
        }
        Callee::Color(color) => color.apply(&args),
        Callee::Method { object, method } => {
            call_method(evaluate(object, feature)?, *method, &args)
        }
    }
}

fn call_method(receiver: Value, method: Method, args: &[Value]) -> Result<Value, EvalError> {
    match (method, &receiver, args) {
        (Method::ToString, _, _) => Ok(Value::String(receiver.to_string())),
        (Method::Test, Value::RegExp(re), [Value::String(s)]) => Ok(Value::Bool(re.test(s))),
        (Method::Exec, Value::RegExp(re), [Value::String(s)]) => Ok(re.exec(s)),
        (Method::Test | Method::Exec, _, _) => {
            let mut all = vec![receiver.clone()];
            all.extend(args.iter().cloned());
            Err(argument_error(
                method.name(),
                "a RegExp receiver and a string argument",
                &all,
            ))
        }
    }
}

fn evaluate_all(args: &[Node], feature: &Feature) -> Result<Vec<Value>, EvalError> {
    args.iter().map(|arg| evaluate(arg, feature)).collect()
}

fn first(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or(Value::Undefined)
}
