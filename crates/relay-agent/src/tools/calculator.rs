use async_trait::async_trait;

use super::{Tool, ToolResult};

/// `calculate_equation`: evaluates an arithmetic expression.
///
/// Supports `+ - * / % ^`, parentheses, unary signs, the constants `pi` and
/// `e`, and the functions `sqrt abs ln log sin cos tan floor ceil round`.
pub struct CalculateEquation;

#[async_trait]
impl Tool for CalculateEquation {
    fn name(&self) -> &str {
        "calculate_equation"
    }

    fn description(&self) -> &str {
        "Evaluates a mathematical equation. Not required for simple arithmetic."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "equation": {
                    "type": "string",
                    "description": "The mathematical equation to evaluate."
                }
            },
            "required": ["equation"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(equation) = input.get("equation").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: equation");
        };
        match evaluate(equation) {
            Ok(value) => ToolResult::success(format_number(value)),
            Err(e) => ToolResult::error(format!("Invalid equation: {e}")),
        }
    }
}

/// Deepest nesting of parentheses, calls and unary signs accepted.
const MAX_DEPTH: usize = 256;

pub fn evaluate(expr: &str) -> Result<f64, String> {
    let mut parser = Parser {
        chars: expr.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
        depth: 0,
    };
    if parser.chars.is_empty() {
        return Err("empty expression".to_string());
    }
    let value = parser.expr()?;
    if let Some(c) = parser.peek() {
        return Err(format!("unexpected '{c}' at position {}", parser.pos));
    }
    if !value.is_finite() {
        return Err("result is not a finite number".to_string());
    }
    Ok(value)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        loop {
            if self.eat('*') {
                value *= self.unary()?;
            } else if self.eat('/') {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err("division by zero".to_string());
                }
                value /= rhs;
            } else if self.eat('%') {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err("modulo by zero".to_string());
                }
                value %= rhs;
            } else {
                return Ok(value);
            }
        }
    }

    // Every recursive path goes through `unary`, so the depth bound lives here.
    fn unary(&mut self) -> Result<f64, String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("expression nested too deeply".to_string());
        }
        let value = self.signed();
        self.depth -= 1;
        value
    }

    // unary := ('-' | '+') unary | power
    fn signed(&mut self) -> Result<f64, String> {
        if self.eat('-') {
            return Ok(-self.unary()?);
        }
        if self.eat('+') {
            return self.unary();
        }
        self.power()
    }

    // power := primary ('^' unary)?   (right-associative)
    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        if self.eat('^') {
            let exp = self.unary()?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.expr()?;
                if !self.eat(')') {
                    return Err("missing closing parenthesis".to_string());
                }
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.identifier(),
            Some(c) => Err(format!("unexpected '{c}' at position {}", self.pos)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        // Exponent, only when followed by digits so `2e` is not swallowed.
        if matches!(self.peek(), Some('e' | 'E')) {
            let digits_at = match self.chars.get(self.pos + 1) {
                Some('+' | '-') => self.pos + 2,
                _ => self.pos + 1,
            };
            if matches!(self.chars.get(digits_at), Some(c) if c.is_ascii_digit()) {
                self.pos = digits_at;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map_err(|_| format!("invalid number '{text}'"))
    }

    fn identifier(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect::<String>().to_lowercase();

        match name.as_str() {
            "pi" => return Ok(std::f64::consts::PI),
            "e" => return Ok(std::f64::consts::E),
            _ => {}
        }

        if !self.eat('(') {
            return Err(format!("unknown identifier '{name}'"));
        }
        let arg = self.expr()?;
        if !self.eat(')') {
            return Err("missing closing parenthesis".to_string());
        }

        let value = match name.as_str() {
            "sqrt" => {
                if arg < 0.0 {
                    return Err("square root of a negative number".to_string());
                }
                arg.sqrt()
            }
            "abs" => arg.abs(),
            "ln" => arg.ln(),
            "log" => arg.log10(),
            "sin" => arg.sin(),
            "cos" => arg.cos(),
            "tan" => arg.tan(),
            "floor" => arg.floor(),
            "ceil" => arg.ceil(),
            "round" => arg.round(),
            _ => return Err(format!("unknown function '{name}'")),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("2 ^ 3 ^ 2").unwrap(), 512.0);
        assert_eq!(evaluate("-2 ^ 2").unwrap(), -4.0);
        assert_eq!(evaluate("2 ^ -1").unwrap(), 0.5);
        assert_eq!(evaluate("10 - 4 - 3").unwrap(), 3.0);
        assert_eq!(evaluate("17 % 5").unwrap(), 2.0);
    }

    #[test]
    fn functions_constants_and_exponents() {
        assert_eq!(evaluate("sqrt(16) + abs(-2)").unwrap(), 6.0);
        assert_eq!(evaluate("1.5e3").unwrap(), 1500.0);
        assert!((evaluate("2 * pi").unwrap() - std::f64::consts::TAU).abs() < 1e-12);
    }

    #[test]
    fn invalid_input_is_rejected() {
        assert!(evaluate("").is_err());
        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("1 + * 2").is_err());
        assert!(evaluate("foo(2)").is_err());
        assert!(evaluate("3)").is_err());
        assert!(evaluate("2e").is_err());
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let parens = format!("{}1{}", "(".repeat(5_000), ")".repeat(5_000));
        assert_eq!(evaluate(&parens).unwrap_err(), "expression nested too deeply");

        let signs = format!("{}1", "-".repeat(200_000));
        assert_eq!(evaluate(&signs).unwrap_err(), "expression nested too deeply");

        let calls = format!("{}1{}", "abs(".repeat(1_000), ")".repeat(1_000));
        assert!(evaluate(&calls).is_err());
    }

    #[test]
    fn moderate_nesting_still_evaluates() {
        let parens = format!("{}7{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&parens).unwrap(), 7.0);
        assert_eq!(evaluate("--1").unwrap(), 1.0);
    }

    #[test]
    fn integers_format_without_fraction() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.5), "0.5");
    }

    #[tokio::test]
    async fn tool_reports_result_and_errors() {
        let tool = CalculateEquation;
        let ok = tool.execute(serde_json::json!({ "equation": "6 * 7" })).await;
        assert!(!ok.is_error);
        assert_eq!(ok.content, "42");

        let bad = tool.execute(serde_json::json!({ "equation": "6 *" })).await;
        assert!(bad.is_error);
        assert!(bad.content.starts_with("Invalid equation"));

        let missing = tool.execute(serde_json::json!({})).await;
        assert!(missing.is_error);

        let nested = format!("{}1{}", "(".repeat(5_000), ")".repeat(5_000));
        let deep = tool.execute(serde_json::json!({ "equation": nested })).await;
        assert!(deep.is_error);
        assert_eq!(deep.content, "Invalid equation: expression nested too deeply");
    }
}
