//! Randomness tools: `generate_random_number` and `generate_random_string`.

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;

use super::{Tool, ToolResult};

const ALPHANUMERIC: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_COUNT: u64 = 1_000;
const MAX_LENGTH: u64 = 10_000;

pub struct GenerateRandomNumber;

#[async_trait]
impl Tool for GenerateRandomNumber {
    fn name(&self) -> &str {
        "generate_random_number"
    }

    fn description(&self) -> &str {
        "Generates a random integer between the specified min and max values. \
         This must be used when randomness is requested."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "min": {
                    "type": "integer",
                    "description": "The minimum value of the random number (inclusive)."
                },
                "max": {
                    "type": "integer",
                    "description": "The maximum value of the random number (inclusive)."
                },
                "n": {
                    "type": "integer",
                    "description": "The number of ints to generate. Defaults to 1."
                }
            },
            "required": ["min", "max", "n"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let (Some(min), Some(max)) = (int_arg(&input, "min"), int_arg(&input, "max")) else {
            return ToolResult::error("missing required parameters: min, max");
        };
        let n = match count_arg(&input) {
            Ok(n) => n,
            Err(e) => return ToolResult::error(e),
        };
        let values = random_ints(min, max, n);
        ToolResult::success(render(values.into_iter().map(Value::from).collect()))
    }
}

pub struct GenerateRandomString;

#[async_trait]
impl Tool for GenerateRandomString {
    fn name(&self) -> &str {
        "generate_random_string"
    }

    fn description(&self) -> &str {
        "Generates a random string of the specified length."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "length": {
                    "type": "integer",
                    "description": "The length of the random string to generate."
                },
                "charset": {
                    "type": "string",
                    "description": "The character set to use for the random string. Defaults to alphanumeric characters."
                },
                "n": {
                    "type": "integer",
                    "description": "The number of strings to generate. Defaults to 1."
                }
            },
            "required": ["length", "charset", "n"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value) -> ToolResult {
        let Some(length) = int_arg(&input, "length").filter(|l| *l >= 0) else {
            return ToolResult::error("missing or negative parameter: length");
        };
        if length as u64 > MAX_LENGTH {
            return ToolResult::error(format!("length must be at most {MAX_LENGTH}"));
        }
        let charset = match input.get("charset").and_then(Value::as_str) {
            Some(c) if !c.is_empty() => c,
            _ => ALPHANUMERIC,
        };
        let n = match count_arg(&input) {
            Ok(n) => n,
            Err(e) => return ToolResult::error(e),
        };
        let strings = random_strings(length as usize, charset, n);
        ToolResult::success(render(strings.into_iter().map(Value::from).collect()))
    }
}

/// `n` integers drawn uniformly from `min..=max`; the bounds may come in
/// either order.
pub fn random_ints(min: i64, max: i64, n: usize) -> Vec<i64> {
    let (lo, hi) = if min > max { (max, min) } else { (min, max) };
    let mut rng = rand::thread_rng();
    (0..n).map(|_| rng.gen_range(lo..=hi)).collect()
}

/// `n` strings of `length` characters drawn from `charset` (alphanumerics
/// when empty).
pub fn random_strings(length: usize, charset: &str, n: usize) -> Vec<String> {
    let charset = if charset.is_empty() { ALPHANUMERIC } else { charset };
    let chars: Vec<char> = charset.chars().collect();
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| (0..length).map(|_| chars[rng.gen_range(0..chars.len())]).collect())
        .collect()
}

/// A single value is returned bare, several as a JSON array.
fn render(mut values: Vec<Value>) -> String {
    if values.len() == 1 {
        match values.remove(0) {
            Value::String(s) => s,
            other => other.to_string(),
        }
    } else {
        Value::Array(values).to_string()
    }
}

fn int_arg(input: &Value, key: &str) -> Option<i64> {
    let value = input.get(key)?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

fn count_arg(input: &Value) -> Result<usize, String> {
    match int_arg(input, "n") {
        None => Ok(1),
        Some(n) if n >= 1 && n as u64 <= MAX_COUNT => Ok(n as usize),
        Some(_) => Err(format!("n must be between 1 and {MAX_COUNT}")),
    }
}
