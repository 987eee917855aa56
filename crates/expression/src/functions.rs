//! Built-in functions callable from style expressions.

use crate::error::EvalError;
use crate::value::Value;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MathFn1 {
    Abs,
    Sqrt,
    Cos,
    Sin,
    Tan,
    Acos,
    Asin,
    Atan,
    Radians,
    Degrees,
    Sign,
    Floor,
    Ceil,
    Round,
    Exp,
    Exp2,
    Log,
    Log2,
    Fract,
}

impl MathFn1 {
    pub const ALL: [MathFn1; 19] = [
        MathFn1::Abs,
        MathFn1::Sqrt,
        MathFn1::Cos,
        MathFn1::Sin,
        MathFn1::Tan,
        MathFn1::Acos,
        MathFn1::Asin,
        MathFn1::Atan,
        MathFn1::Radians,
        MathFn1::Degrees,
        MathFn1::Sign,
        MathFn1::Floor,
        MathFn1::Ceil,
        MathFn1::Round,
        MathFn1::Exp,
        MathFn1::Exp2,
        MathFn1::Log,
        MathFn1::Log2,
        MathFn1::Fract,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MathFn1::Abs => "abs",
            MathFn1::Sqrt => "sqrt",
            MathFn1::Cos => "cos",
            MathFn1::Sin => "sin",
            MathFn1::Tan => "tan",
            MathFn1::Acos => "acos",
            MathFn1::Asin => "asin",
            MathFn1::Atan => "atan",
            MathFn1::Radians => "radians",
            MathFn1::Degrees => "degrees",
            MathFn1::Sign => "sign",
            MathFn1::Floor => "floor",
            MathFn1::Ceil => "ceil",
            MathFn1::Round => "round",
            MathFn1::Exp => "exp",
            MathFn1::Exp2 => "exp2",
            MathFn1::Log => "log",
            MathFn1::Log2 => "log2",
            MathFn1::Fract => "fract",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn apply(self, x: f64) -> f64 {
        match self {
            MathFn1::Abs => x.abs(),
            MathFn1::Sqrt => x.sqrt(),
            MathFn1::Cos => x.cos(),
            MathFn1::Sin => x.sin(),
            MathFn1::Tan => x.tan(),
            MathFn1::Acos => x.acos(),
            MathFn1::Asin => x.asin(),
            MathFn1::Atan => x.atan(),
            MathFn1::Radians => x.to_radians(),
            MathFn1::Degrees => x.to_degrees(),
            MathFn1::Sign => {
                if x.is_nan() || x == 0.0 {
                    x
                } else {
                    x.signum()
                }
            }
            MathFn1::Floor => x.floor(),
            MathFn1::Ceil => x.ceil(),
            // Halves round towards positive infinity.
            MathFn1::Round => (x + 0.5).floor(),
            MathFn1::Exp => x.exp(),
            MathFn1::Exp2 => x.exp2(),
            MathFn1::Log => x.ln(),
            MathFn1::Log2 => x.log2(),
            MathFn1::Fract => x - x.floor(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MathFn2 {
    Atan2,
    Pow,
    Min,
    Max,
}

impl MathFn2 {
    pub fn name(self) -> &'static str {
        match self {
            MathFn2::Atan2 => "atan2",
            MathFn2::Pow => "pow",
            MathFn2::Min => "min",
            MathFn2::Max => "max",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [MathFn2::Atan2, MathFn2::Pow, MathFn2::Min, MathFn2::Max]
            .into_iter()
            .find(|f| f.name() == name)
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            MathFn2::Atan2 => a.atan2(b),
            MathFn2::Pow => a.powf(b),
            MathFn2::Min => {
                if a.is_nan() || b.is_nan() {
                    f64::NAN
                } else {
                    a.min(b)
                }
            }
            MathFn2::Max => {
                if a.is_nan() || b.is_nan() {
                    f64::NAN
                } else {
                    a.max(b)
                }
            }
        }
    }
}

/// `Boolean()`, `Number()` and `String()`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Conversion {
    Boolean,
    Number,
    String,
}

impl Conversion {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Boolean" => Some(Conversion::Boolean),
            "Number" => Some(Conversion::Number),
            "String" => Some(Conversion::String),
            _ => None,
        }
    }

    /// Result of calling with no arguments.
    pub fn default_value(self) -> Value {
        match self {
            Conversion::Boolean => Value::Bool(false),
            Conversion::Number => Value::Number(0.0),
            Conversion::String => Value::String(String::new()),
        }
    }

    pub fn apply(self, value: &Value) -> Value {
        match self {
            Conversion::Boolean => Value::Bool(value.is_truthy()),
            Conversion::Number => Value::Number(value.to_number()),
            Conversion::String => Value::String(value.to_string()),
        }
    }
}

/// Methods callable on a value: `regExp(...).test(s)` and friends.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Method {
    Test,
    Exec,
    ToString,
}

impl Method {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "test" => Some(Method::Test),
            "exec" => Some(Method::Exec),
            "toString" => Some(Method::ToString),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::Test => "test",
            Method::Exec => "exec",
            Method::ToString => "toString",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Method::Test | Method::Exec => 1,
            Method::ToString => 0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ColorFn {
    Color,
    Rgb,
    Rgba,
    Hsl,
    Hsla,
}

impl ColorFn {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "color" => Some(ColorFn::Color),
            "rgb" => Some(ColorFn::Rgb),
            "rgba" => Some(ColorFn::Rgba),
            "hsl" => Some(ColorFn::Hsl),
            "hsla" => Some(ColorFn::Hsla),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColorFn::Color => "color",
            ColorFn::Rgb => "rgb",
            ColorFn::Rgba => "rgba",
            ColorFn::Hsl => "hsl",
            ColorFn::Hsla => "hsla",
        }
    }

    /// Accepted argument counts, inclusive.
    pub fn arity(self) -> (usize, usize) {
        match self {
            ColorFn::Color => (1, 2),
            ColorFn::Rgb | ColorFn::Hsl => (3, 3),
            ColorFn::Rgba | ColorFn::Hsla => (4, 4),
        }
    }

    /// Produces a `#rrggbb` (or `#rrggbbaa` when translucent) string.
    pub fn apply(self, args: &[Value]) -> Result<Value, EvalError> {
        let rgba = match self {
            ColorFn::Color => {
                let Some(Value::String(css)) = args.first() else {
                    return Err(argument_error(self.name(), "a CSS color string", args));
                };
                let [r, g, b, a] =
                    parse_css_color(css).ok_or_else(|| EvalError::InvalidColor(css.clone()))?;
                let alpha = match args.get(1) {
                    None => a,
                    Some(Value::Number(alpha)) => *alpha,
                    Some(_) => return Err(argument_error(self.name(), "a number alpha", args)),
                };
                [r, g, b, alpha]
            }
            ColorFn::Rgb | ColorFn::Rgba => {
                let n = numbers(self.name(), args)?;
                [
                    n[0] / 255.0,
                    n[1] / 255.0,
                    n[2] / 255.0,
                    n.get(3).copied().unwrap_or(1.0),
                ]
            }
            ColorFn::Hsl | ColorFn::Hsla => {
                let n = numbers(self.name(), args)?;
                let [r, g, b] = hsl_to_rgb(n[0], n[1], n[2]);
                [r, g, b, n.get(3).copied().unwrap_or(1.0)]
            }
        };
        Ok(Value::String(to_hex(rgba)))
    }
}

fn numbers(function: &'static str, args: &[Value]) -> Result<Vec<f64>, EvalError> {
    args.iter()
        .map(|v| v.as_number())
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| argument_error(function, "number arguments", args))
}

pub(crate) fn argument_error(function: &'static str, expected: &'static str, args: &[Value]) -> EvalError {
    EvalError::ArgumentType {
        function,
        expected,
        args: args
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> [f64; 3] {
    let h = h.rem_euclid(1.0);
    let s = s.clamp(0.0, 1.0);
    let l = l.clamp(0.0, 1.0);
    if s == 0.0 {
        return [l, l, l];
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    let channel = |t: f64| {
        let t = t.rem_euclid(1.0);
        if t < 1.0 / 6.0 {
            p + (q - p) * 6.0 * t
        } else if t < 0.5 {
            q
        } else if t < 2.0 / 3.0 {
            p + (q - p) * (2.0 / 3.0 - t) * 6.0
        } else {
            p
        }
    };
    [channel(h + 1.0 / 3.0), channel(h), channel(h - 1.0 / 3.0)]
}

fn to_hex([r, g, b, a]: [f64; 4]) -> String {
    let byte = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    if byte(a) == 255 {
        format!("#{:02x}{:02x}{:02x}", byte(r), byte(g), byte(b))
    } else {
        format!(
            "#{:02x}{:02x}{:02x}{:02x}",
            byte(r),
            byte(g),
            byte(b),
            byte(a)
        )
    }
}

const NAMED_COLORS: &[(&str, [u8; 3])] = &[
    ("black", [0, 0, 0]),
    ("white", [255, 255, 255]),
    ("red", [255, 0, 0]),
    ("lime", [0, 255, 0]),
    ("green", [0, 128, 0]),
    ("blue", [0, 0, 255]),
    ("yellow", [255, 255, 0]),
    ("cyan", [0, 255, 255]),
    ("aqua", [0, 255, 255]),
    ("magenta", [255, 0, 255]),
    ("fuchsia", [255, 0, 255]),
    ("gray", [128, 128, 128]),
    ("grey", [128, 128, 128]),
    ("silver", [192, 192, 192]),
    ("maroon", [128, 0, 0]),
    ("olive", [128, 128, 0]),
    ("navy", [0, 0, 128]),
    ("purple", [128, 0, 128]),
    ("teal", [0, 128, 128]),
    ("orange", [255, 165, 0]),
];

/// Parses `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa` and basic color names.
fn parse_css_color(css: &str) -> Option<[f64; 4]> {
    let css = css.trim();
    if css.eq_ignore_ascii_case("transparent") {
        return Some([0.0, 0.0, 0.0, 0.0]);
    }
    if let Some((_, [r, g, b])) = NAMED_COLORS
        .iter()
        .find(|(name, _)| css.eq_ignore_ascii_case(name))
    {
        return Some([*r as f64 / 255.0, *g as f64 / 255.0, *b as f64 / 255.0, 1.0]);
    }

    let hex = css.strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let digits: Vec<u8> = match hex.len() {
        3 | 4 => hex
            .chars()
            .map(|c| u8::from_str_radix(&c.to_string().repeat(2), 16).ok())
            .collect::<Option<_>>()?,
        6 | 8 => (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
            .collect::<Option<_>>()?,
        _ => return None,
    };
    let channel = |i: usize| digits.get(i).map(|d| *d as f64 / 255.0);
    Some([channel(0)?, channel(1)?, channel(2)?, channel(3).unwrap_or(1.0)])
}

#[cfg(test)]
mod tests {
    use super::{ColorFn, Conversion, MathFn1, MathFn2};
    use crate::value::Value;

    #[test]
    fn unary_math_functions() {
        assert_eq!(MathFn1::from_name("fract"), Some(MathFn1::Fract));
        assert_eq!(MathFn1::Fract.apply(2.75), 0.75);
        assert_eq!(MathFn1::Fract.apply(-0.25), 0.75);
        assert_eq!(MathFn1::Exp2.apply(3.0), 8.0);
        assert_eq!(MathFn1::Round.apply(2.5), 3.0);
        assert_eq!(MathFn1::Round.apply(-2.5), -2.0);
        assert_eq!(MathFn1::Sign.apply(-4.0), -1.0);
        assert!((MathFn1::Degrees.apply(std::f64::consts::PI) - 180.0).abs() < 1e-9);
        assert!(MathFn1::from_name("cbrt").is_none());
    }

    #[test]
    fn binary_math_functions() {
        assert_eq!(MathFn2::Pow.apply(2.0, 10.0), 1024.0);
        assert_eq!(MathFn2::Min.apply(3.0, -1.0), -1.0);
        assert!(MathFn2::Max.apply(f64::NAN, 1.0).is_nan());
    }

    #[test]
    fn conversions_and_defaults() {
        assert_eq!(Conversion::Boolean.default_value(), Value::Bool(false));
        assert_eq!(Conversion::Number.default_value(), Value::Number(0.0));
        assert_eq!(Conversion::String.default_value(), Value::String(String::new()));
        assert_eq!(Conversion::Number.apply(&Value::from("12.5")), Value::Number(12.5));
        assert_eq!(Conversion::String.apply(&Value::Number(3.0)), Value::from("3"));
        assert_eq!(Conversion::Boolean.apply(&Value::from("")), Value::Bool(false));
    }

    #[test]
    fn colors_normalize_to_hex() {
        let rgb = ColorFn::Rgb
            .apply(&[Value::Number(255.0), Value::Number(128.0), Value::Number(0.0)])
            .unwrap();
        assert_eq!(rgb, Value::from("#ff8000"));

        let hsla = ColorFn::Hsla
            .apply(&[0.0.into(), 1.0.into(), 0.5.into(), 0.5.into()])
            .unwrap();
        assert_eq!(hsla, Value::from("#ff000080"));

        assert_eq!(
            ColorFn::Color.apply(&[Value::from("#0F0")]).unwrap(),
            Value::from("#00ff00")
        );
        assert_eq!(
            ColorFn::Color
                .apply(&[Value::from("white"), Value::Number(0.0)])
                .unwrap(),
            Value::from("#ffffff00")
        );
        assert!(ColorFn::Color.apply(&[Value::from("#12")]).is_err());
        assert!(ColorFn::Rgb.apply(&["a".into(), 0.0.into(), 0.0.into()]).is_err());
    }
}
