use thiserror::Error;

/// Failure to turn expression text into an evaluable tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Unexpected character '{ch}' at {offset}.")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("Unclosed quote after {offset}.")]
    UnterminatedString { offset: usize },
    #[error("Unmatched {{ at {offset}.")]
    UnmatchedBrace { offset: usize },
    #[error("Unexpected {found} at {offset}.")]
    UnexpectedToken { found: String, offset: usize },
    #[error("Unexpected end of expression.")]
    UnexpectedEnd,
    #[error("Provide exactly one expression.")]
    MultipleExpressions,
    #[error("Unexpected operator \"{0}\".")]
    UnsupportedOperator(String),
    #[error("{0} is not defined.")]
    UndefinedIdentifier(String),
    #[error("Unknown constant \"{0}\".")]
    UnknownConstant(String),
    #[error("Unexpected function call \"{0}\".")]
    UnknownFunction(String),
    #[error("Function \"{function}\" requires {expected}.")]
    Arity {
        function: String,
        expected: &'static str,
    },
    #[error("{path} is not a valid JSONPath: {reason}")]
    InvalidJsonPath { path: String, reason: String },
    #[error("JSONPath {path} gives none.")]
    JsonPathEmpty { path: String },
    #[error("JSONPath {path} should give only one result, got {count}.")]
    JsonPathAmbiguous { path: String, count: usize },
    #[error("JSONPath {path} needs a feature to evaluate against.")]
    JsonPathWithoutFeature { path: String },
}

/// Runtime failure while evaluating a well-formed expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("Operator \"{operator}\" requires {expected} arguments. Arguments are {left} and {right}.")]
    BinaryType {
        operator: &'static str,
        expected: &'static str,
        left: String,
        right: String,
    },
    #[error("Operator \"{operator}\" requires a {expected} argument. Argument is {operand}.")]
    UnaryType {
        operator: &'static str,
        expected: &'static str,
        operand: String,
    },
    #[error("Function \"{function}\" requires {expected}. Arguments are {args}.")]
    ArgumentType {
        function: &'static str,
        expected: &'static str,
        args: String,
    },
    #[error("Condition must evaluate to a boolean. Condition is {0}.")]
    ConditionNotBoolean(String),
    #[error("Invalid regular expression /{pattern}/{flags}: {reason}")]
    InvalidRegExp {
        pattern: String,
        flags: String,
        reason: String,
    },
    #[error("Invalid color \"{0}\".")]
    InvalidColor(String),
}

/// Either half of an expression's life cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}
