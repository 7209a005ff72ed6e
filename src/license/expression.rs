use serde_json::Value;

use super::spdx::normalize;

/// Tokens produced by [`tokenize_spdx`].
#[derive(Debug, PartialEq, Clone)]
enum Token {
    Id(String),
    And,
    Or,
    With,
    LParen,
    RParen,
}

/// Tokenize an SPDX license expression into a flat [`Vec<Token>`].
fn tokenize_spdx(expr: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '(' {
            tokens.push(Token::LParen);
            chars.next();
        } else if c == ')' {
            tokens.push(Token::RParen);
            chars.next();
        } else {
            let mut s = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '(' || c == ')' {
                    break;
                }
                s.push(c);
                chars.next();
            }
            let token = match s.to_ascii_uppercase().as_str() {
                "AND" => Token::And,
                "OR" => Token::Or,
                "WITH" => Token::With,
                _ => Token::Id(s),
            };
            tokens.push(token);
        }
    }
    tokens
}

/// A package's declared license, flattened for a report row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredLicense {
    /// License ids joined by `,`.
    pub license: String,
    /// The original expression when it had to be split.
    pub caveat: Option<String>,
}

impl DeclaredLicense {
    /// Flatten a license string.
    ///
    /// `(MIT OR Apache-2.0)` becomes `MIT,Apache-2.0` with the expression kept
    /// as the caveat. `WITH` exceptions stay attached to their license.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let tokens = tokenize_spdx(raw);
        let compound = tokens
            .iter()
            .any(|t| matches!(t, Token::And | Token::Or | Token::LParen));
        if !compound {
            return DeclaredLicense {
                license: normalize(raw),
                caveat: None,
            };
        }

        let mut ids: Vec<String> = Vec::new();
        let mut tokens = tokens.into_iter().peekable();
        while let Some(token) = tokens.next() {
            let Token::Id(id) = token else { continue };
            let mut id = normalize(&id);
            if matches!(tokens.peek(), Some(Token::With)) {
                tokens.next();
                if let Some(Token::Id(exception)) = tokens.next() {
                    id = format!("{id} WITH {exception}");
                }
            }
            if !id.is_empty() && !ids.contains(&id) {
                ids.push(id);
            }
        }
        DeclaredLicense {
            license: ids.join(","),
            caveat: Some(format!("License: {raw}")),
        }
    }

    /// Read a license from a package manifest field.
    ///
    /// Accepts a string, an object with `type` or `name`, or an array of those.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Object(map) => map
                .get("type")
                .or_else(|| map.get("name"))
                .and_then(Value::as_str)
                .map(Self::parse)
                .unwrap_or_default(),
            Value::Array(items) => {
                let mut ids: Vec<String> = Vec::new();
                let mut caveats: Vec<String> = Vec::new();
                for item in items {
                    let part = Self::from_value(item);
                    for id in part.license.split(',').filter(|s| !s.is_empty()) {
                        if !ids.iter().any(|i| i == id) {
                            ids.push(id.to_string());
                        }
                    }
                    caveats.extend(part.caveat);
                }
                DeclaredLicense {
                    license: ids.join(","),
                    caveat: if caveats.is_empty() {
                        None
                    } else {
                        Some(caveats.join(", "))
                    },
                }
            }
            _ => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_license() {
        let l = DeclaredLicense::parse("MIT License");
        assert_eq!(l.license, "MIT");
        assert_eq!(l.caveat, None);
    }

    #[test]
    fn test_or_expression_is_flattened() {
        let l = DeclaredLicense::parse("(MIT OR Apache-2.0)");
        assert_eq!(l.license, "MIT,Apache-2.0");
        assert_eq!(l.caveat.as_deref(), Some("License: (MIT OR Apache-2.0)"));
    }

    #[test]
    fn test_with_exception_stays_attached() {
        let l = DeclaredLicense::parse("GPL-2.0 WITH Classpath-exception-2.0 OR MIT");
        assert_eq!(l.license, "GPL-2.0 WITH Classpath-exception-2.0,MIT");
    }

    #[test]
    fn test_from_manifest_values() {
        assert_eq!(DeclaredLicense::from_value(&json!({"type": "ISC"})).license, "ISC");
        assert_eq!(
            DeclaredLicense::from_value(&json!([{"type": "MIT"}, "BSD-3-Clause", "MIT"])).license,
            "MIT,BSD-3-Clause"
        );
        assert_eq!(DeclaredLicense::from_value(&json!(null)), DeclaredLicense::default());
    }
}
