//! Textual policy model: request/policy definitions, an effect combinator and
//! a boolean matcher over `r.*` and `p.*` fields.
//!
//! ```text
//! [request_definition]
//! r = sub, obj, act
//!
//! [policy_definition]
//! p = sub, obj, act, eft
//!
//! [policy_effect]
//! e = some(where (p.eft == allow)) && !some(where (p.eft == deny))
//!
//! [matchers]
//! m = r.sub == p.sub && keyMatch(r.obj, p.obj) && (r.act == p.act || p.act == "*")
//! ```

use dashmap::DashMap;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{Effect, PolicyRule};

pub const DEFAULT_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act, eft

[policy_effect]
e = some(where (p.eft == allow)) && !some(where (p.eft == deny))

[matchers]
m = r.sub == p.sub && keyMatch(r.obj, p.obj) && (r.act == p.act || p.act == "*")
"#;

const POLICY_FIELDS: &[&str] = &["sub", "obj", "act", "eft"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Missing section [{0}]")]
    MissingSection(&'static str),

    #[error("Invalid line {0}: {1}")]
    InvalidLine(usize, String),

    #[error("Unsupported policy effect: {0}")]
    UnsupportedEffect(String),

    #[error("Unknown field {0}")]
    UnknownField(String),

    #[error("Unknown function {0}")]
    UnknownFunction(String),

    #[error("Matcher syntax error: {0}")]
    Syntax(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectMode {
    /// Allowed when some matching rule allows and none denies.
    DenyOverrides,
    /// Allowed when some matching rule allows.
    AllowOverrides,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Request(usize),
    Policy(&'static str),
    Literal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    KeyMatch,
    KeyMatch2,
    RegexMatch,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Eq(Operand, Operand),
    Ne(Operand, Operand),
    Call(Func, Operand, Operand),
}

pub struct PolicyModel {
    request_fields: Vec<String>,
    effect: EffectMode,
    matcher: Expr,
    regexes: DashMap<String, Option<Regex>>,
}

impl std::fmt::Debug for PolicyModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyModel")
            .field("request_fields", &self.request_fields)
            .field("effect", &self.effect)
            .finish()
    }
}

impl PolicyModel {
    pub fn parse(text: &str) -> Result<Self, ModelError> {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current: Option<String> = None;

        for (n, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                current = Some(name.trim().to_string());
                continue;
            }
            let section = current
                .as_ref()
                .ok_or_else(|| ModelError::InvalidLine(n + 1, line.to_string()))?;
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| ModelError::InvalidLine(n + 1, line.to_string()))?;
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }

        let get = |section: &'static str, key: &str| {
            sections
                .get(section)
                .and_then(|s| s.get(key))
                .cloned()
                .ok_or(ModelError::MissingSection(section))
        };

        let request_fields: Vec<String> = get("request_definition", "r")?
            .split(',')
            .map(|f| f.trim().to_string())
            .collect();
        let policy_fields: Vec<String> = get("policy_definition", "p")?
            .split(',')
            .map(|f| f.trim().to_string())
            .collect();
        if let Some(unknown) = policy_fields
            .iter()
            .find(|f| !POLICY_FIELDS.contains(&f.as_str()))
        {
            return Err(ModelError::UnknownField(format!("p.{}", unknown)));
        }

        let effect = parse_effect(&get("policy_effect", "e")?)?;
        let tokens = tokenize(&get("matchers", "m")?)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            request_fields: &request_fields,
            policy_fields: &policy_fields,
        };
        let matcher = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(ModelError::Syntax(format!(
                "unexpected {:?}",
                parser.tokens[parser.pos]
            )));
        }

        Ok(Self {
            request_fields,
            effect,
            matcher,
            regexes: DashMap::new(),
        })
    }

    pub fn default_model() -> Result<Self, ModelError> {
        Self::parse(DEFAULT_MODEL)
    }

    pub fn effect_mode(&self) -> EffectMode {
        self.effect
    }

    /// Decide a request (values in `request_definition` order) against `rules`.
    pub fn evaluate(&self, request: &[&str], rules: &[PolicyRule]) -> bool {
        if request.len() != self.request_fields.len() {
            return false;
        }

        let mut allowed = false;
        for rule in rules {
            if !self.eval(&self.matcher, request, rule) {
                continue;
            }
            match rule.eft {
                Effect::Deny if self.effect == EffectMode::DenyOverrides => return false,
                Effect::Allow => {
                    allowed = true;
                    if self.effect == EffectMode::AllowOverrides {
                        return true;
                    }
                }
                Effect::Deny => {}
            }
        }
        allowed
    }

    fn eval(&self, expr: &Expr, request: &[&str], rule: &PolicyRule) -> bool {
        match expr {
            Expr::Or(a, b) => self.eval(a, request, rule) || self.eval(b, request, rule),
            Expr::And(a, b) => self.eval(a, request, rule) && self.eval(b, request, rule),
            Expr::Not(a) => !self.eval(a, request, rule),
            Expr::Eq(a, b) => resolve(a, request, rule) == resolve(b, request, rule),
            Expr::Ne(a, b) => resolve(a, request, rule) != resolve(b, request, rule),
            Expr::Call(func, a, b) => {
                let key = resolve(a, request, rule);
                let pattern = resolve(b, request, rule);
                match func {
                    Func::KeyMatch => key_match(key, pattern),
                    Func::KeyMatch2 => self.regex_match(key, &key_match2_regex(pattern)),
                    Func::RegexMatch => self.regex_match(key, pattern),
                }
            }
        }
    }

    fn regex_match(&self, value: &str, pattern: &str) -> bool {
        if let Some(cached) = self.regexes.get(pattern) {
            return cached.as_ref().is_some_and(|re| re.is_match(value));
        }
        let compiled = Regex::new(pattern).ok();
        if compiled.is_none() {
            tracing::warn!(pattern = %pattern, "Invalid regex in policy");
        }
        let matched = compiled.as_ref().is_some_and(|re| re.is_match(value));
        self.regexes.insert(pattern.to_string(), compiled);
        matched
    }
}

fn resolve<'a>(operand: &'a Operand, request: &[&'a str], rule: &'a PolicyRule) -> &'a str {
    match operand {
        Operand::Request(i) => request.get(*i).copied().unwrap_or(""),
        Operand::Policy(name) => rule.field(name).unwrap_or(""),
        Operand::Literal(s) => s,
    }
}

/// `/a/b` matches `/a/*`; without `*` the keys must be equal.
pub fn key_match(key: &str, pattern: &str) -> bool {
    match pattern.find('*') {
        None => key == pattern,
        Some(i) => key.len() >= i && key.as_bytes()[..i] == pattern.as_bytes()[..i],
    }
}

/// Regex equivalent of a `keyMatch2` pattern: `:name` matches one segment,
/// `*` matches anything.
fn key_match2_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            ':' => {
                while chars
                    .peek()
                    .is_some_and(|c| c.is_alphanumeric() || *c == '_')
                {
                    chars.next();
                }
                out.push_str("[^/]+");
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

fn parse_effect(text: &str) -> Result<EffectMode, ModelError> {
    let normalized: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .replace("p_eft", "p.eft");

    const ALLOW: &str = "some(where(p.eft==allow))";
    const NO_DENY: &str = "!some(where(p.eft==deny))";

    if normalized == ALLOW {
        Ok(EffectMode::AllowOverrides)
    } else if normalized == format!("{}&&{}", ALLOW, NO_DENY)
        || normalized == format!("{}&&{}", NO_DENY, ALLOW)
    {
        Ok(EffectMode::DenyOverrides)
    } else {
        Err(ModelError::UnsupportedEffect(text.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ModelError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::EqEq);
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Bang);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::AndAnd);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::OrOr);
                i += 2;
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&q| q == c)
                    .ok_or_else(|| ModelError::Syntax("unterminated string".to_string()))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(ModelError::Syntax(format!("unexpected character {:?}", other))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    request_fields: &'a [String],
    policy_fields: &'a [String],
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ModelError> {
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            other => Err(ModelError::Syntax(format!(
                "expected {:?}, found {:?}",
                expected, other
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ModelError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.pos += 1;
            left = Expr::Or(Box::new(left), Box::new(self.parse_and()?));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ModelError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.pos += 1;
            left = Expr::And(Box::new(left), Box::new(self.parse_unary()?));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ModelError> {
        if self.peek() == Some(&Token::Bang) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ModelError> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }

        if let (Some(Token::Ident(name)), Some(Token::LParen)) =
            (self.tokens.get(self.pos), self.tokens.get(self.pos + 1))
        {
            let func = match name.as_str() {
                "keyMatch" => Func::KeyMatch,
                "keyMatch2" => Func::KeyMatch2,
                "regexMatch" => Func::RegexMatch,
                other => return Err(ModelError::UnknownFunction(other.to_string())),
            };
            self.pos += 2;
            let a = self.parse_operand()?;
            self.expect(Token::Comma)?;
            let b = self.parse_operand()?;
            self.expect(Token::RParen)?;
            return Ok(Expr::Call(func, a, b));
        }

        let left = self.parse_operand()?;
        match self.next() {
            Some(Token::EqEq) => Ok(Expr::Eq(left, self.parse_operand()?)),
            Some(Token::NotEq) => Ok(Expr::Ne(left, self.parse_operand()?)),
            other => Err(ModelError::Syntax(format!(
                "expected comparison, found {:?}",
                other
            ))),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, ModelError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Operand::Literal(s)),
            Some(Token::Ident(name)) => self.field(&name),
            other => Err(ModelError::Syntax(format!(
                "expected operand, found {:?}",
                other
            ))),
        }
    }

    fn field(&self, name: &str) -> Result<Operand, ModelError> {
        let unknown = || ModelError::UnknownField(name.to_string());
        if let Some(field) = name.strip_prefix("r.") {
            return self
                .request_fields
                .iter()
                .position(|f| f == field)
                .map(Operand::Request)
                .ok_or_else(unknown);
        }
        if let Some(field) = name.strip_prefix("p.") {
            if !self.policy_fields.iter().any(|f| f == field) {
                return Err(unknown());
            }
            return POLICY_FIELDS
                .iter()
                .find(|f| **f == field)
                .map(|f| Operand::Policy(*f))
                .ok_or_else(unknown);
        }
        // Bare words compare as literals, e.g. `p.eft == allow`.
        Ok(Operand::Literal(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(obj: &str, act: &str, eft: Effect) -> PolicyRule {
        PolicyRule {
            sub: "alice".to_string(),
            obj: obj.to_string(),
            act: act.to_string(),
            eft,
        }
    }

    #[test]
    fn test_default_model_parses() {
        let model = PolicyModel::default_model().unwrap();
        assert_eq!(model.effect_mode(), EffectMode::DenyOverrides);
    }

    #[test]
    fn test_key_match() {
        assert!(key_match("/oauth/application/42", "/oauth/application/*"));
        assert!(key_match("/org/1", "/org/1*"));
        assert!(key_match("/org/1/member", "/org/1*"));
        assert!(key_match("/anything", "/*"));
        assert!(!key_match("/user", "/org/*"));
        assert!(key_match("/user", "/user"));
        assert!(!key_match("/user/1", "/user"));
    }

    #[test]
    fn test_key_match2() {
        let text = DEFAULT_MODEL.replace("keyMatch(", "keyMatch2(");
        let model = PolicyModel::parse(&text).unwrap();
        let rules = [rule("/user/:id/policy", "read", Effect::Allow)];
        assert!(model.evaluate(&["alice", "/user/7/policy", "read"], &rules));
        assert!(!model.evaluate(&["alice", "/user/7/8/policy", "read"], &rules));
    }

    #[test]
    fn test_deny_overrides() {
        let model = PolicyModel::default_model().unwrap();
        let rules = [
            rule("/oauth/application/*", "read", Effect::Allow),
            rule("/oauth/application/42", "read", Effect::Deny),
        ];
        assert!(!model.evaluate(&["alice", "/oauth/application/42", "read"], &rules));
        assert!(model.evaluate(&["alice", "/oauth/application/9", "read"], &rules));
        assert!(!model.evaluate(&["alice", "/oauth/application/9", "delete"], &rules));
        assert!(!model.evaluate(&["bob", "/oauth/application/9", "read"], &rules));
    }

    #[test]
    fn test_allow_overrides() {
        let text = DEFAULT_MODEL.replace(
            "some(where (p.eft == allow)) && !some(where (p.eft == deny))",
            "some(where (p.eft == allow))",
        );
        let model = PolicyModel::parse(&text).unwrap();
        let rules = [
            rule("/x", "read", Effect::Deny),
            rule("/x", "read", Effect::Allow),
        ];
        assert!(model.evaluate(&["alice", "/x", "read"], &rules));
    }

    #[test]
    fn test_wildcard_action() {
        let model = PolicyModel::default_model().unwrap();
        let rules = [rule("/org/1*", "*", Effect::Allow)];
        assert!(model.evaluate(&["alice", "/org/1/policy", "delete"], &rules));
    }

    #[test]
    fn test_regex_match_and_negation() {
        let text = DEFAULT_MODEL.replace(
            r#"m = r.sub == p.sub && keyMatch(r.obj, p.obj) && (r.act == p.act || p.act == "*")"#,
            r#"m = r.sub == p.sub && regexMatch(r.obj, p.obj) && !(r.act != p.act)"#,
        );
        let model = PolicyModel::parse(&text).unwrap();
        let rules = [rule("^/report/[0-9]+$", "read", Effect::Allow)];
        assert!(model.evaluate(&["alice", "/report/12", "read"], &rules));
        assert!(!model.evaluate(&["alice", "/report/x", "read"], &rules));
        assert!(!model.evaluate(&["alice", "/report/12", "write"], &rules));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            PolicyModel::parse("[request_definition]\nr = sub, obj, act").unwrap_err(),
            ModelError::MissingSection("policy_definition")
        );
        let bad_fn = DEFAULT_MODEL.replace("keyMatch(", "globMatch(");
        assert_eq!(
            PolicyModel::parse(&bad_fn).unwrap_err(),
            ModelError::UnknownFunction("globMatch".to_string())
        );
        let bad_field = DEFAULT_MODEL.replace("r.act == p.act", "r.verb == p.act");
        assert!(matches!(
            PolicyModel::parse(&bad_field),
            Err(ModelError::UnknownField(_))
        ));
        let bad_effect = DEFAULT_MODEL.replace("!some(where (p.eft == deny))", "priority(p.eft)");
        assert!(matches!(
            PolicyModel::parse(&bad_effect),
            Err(ModelError::UnsupportedEffect(_))
        ));
    }
}
