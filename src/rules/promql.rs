// Copyright 2025 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! A PromQL parser sufficient to print expressions in canonical form and to
//! scope every series selector to a label value.
//!
//! Canonical form puts single spaces around binary operators, renders every
//! label matcher with a double-quoted value and normalises numbers and
//! durations, so two spellings of the same expression print identically.
//!
//! Metric and label names that are not plain identifiers may be written as
//! quoted strings, as in `{"my.metric", "my.label"="x"}`. Such names are
//! printed quoted; quoted names that are plain identifiers print bare.

use crate::rules::duration;
use snafu::Snafu;
use std::fmt;

#[derive(Debug, Snafu, PartialEq)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("parse error at char {}: {message}", pos + 1))]
    Parse { pos: usize, message: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

const AGGREGATORS: &[&str] = &[
    "sum",
    "avg",
    "count",
    "min",
    "max",
    "group",
    "stddev",
    "stdvar",
    "topk",
    "bottomk",
    "count_values",
    "quantile",
    "limitk",
    "limit_ratio",
];

const PARAMETERISED_AGGREGATORS: &[&str] = &[
    "topk",
    "bottomk",
    "count_values",
    "quantile",
    "limitk",
    "limit_ratio",
];

const KEYWORDS: &[&str] = &[
    "and",
    "or",
    "unless",
    "atan2",
    "by",
    "without",
    "on",
    "ignoring",
    "group_left",
    "group_right",
    "bool",
    "offset",
];

const FUNCTIONS: &[&str] = &[
    "abs",
    "absent",
    "absent_over_time",
    "acos",
    "acosh",
    "asin",
    "asinh",
    "atan",
    "atanh",
    "avg_over_time",
    "ceil",
    "changes",
    "clamp",
    "clamp_max",
    "clamp_min",
    "cos",
    "cosh",
    "count_over_time",
    "day_of_month",
    "day_of_week",
    "day_of_year",
    "days_in_month",
    "deg",
    "delta",
    "deriv",
    "double_exponential_smoothing",
    "exp",
    "floor",
    "histogram_avg",
    "histogram_count",
    "histogram_fraction",
    "histogram_quantile",
    "histogram_stddev",
    "histogram_stdvar",
    "histogram_sum",
    "holt_winters",
    "hour",
    "idelta",
    "increase",
    "info",
    "irate",
    "label_join",
    "label_replace",
    "last_over_time",
    "ln",
    "log10",
    "log2",
    "mad_over_time",
    "max_over_time",
    "min_over_time",
    "minute",
    "month",
    "pi",
    "predict_linear",
    "present_over_time",
    "quantile_over_time",
    "rad",
    "rate",
    "resets",
    "round",
    "scalar",
    "sgn",
    "sin",
    "sinh",
    "sort",
    "sort_by_label",
    "sort_by_label_desc",
    "sort_desc",
    "sqrt",
    "stddev_over_time",
    "stdvar_over_time",
    "sum_over_time",
    "tan",
    "tanh",
    "time",
    "timestamp",
    "vector",
    "year",
];

const COMPARISONS: &[&str] = &["==", "!=", "<=", ">=", "<", ">"];

/// Deepest nesting of sub-expressions accepted by the parser.
const MAX_DEPTH: usize = 128;

/// Prints `input` in canonical form.
pub fn format_expr(input: &str) -> Result<String> {
    Ok(parse(input)?.to_string())
}

/// Forces every series selector in `input` to carry `name="value"`,
/// replacing any matcher on the same label, and prints the result in
/// canonical form.
pub fn inject_label_matcher(input: &str, name: &str, value: &str) -> Result<String> {
    let mut expr = parse(input)?;
    expr.enforce_matcher(&Matcher {
        name: name.to_string(),
        op: MatchOp::Equal,
        value: value.to_string(),
    });
    Ok(expr.to_string())
}

pub fn parse(input: &str) -> Result<Expr> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.chars().count(),
        depth: 0,
    };
    let expr = parser.parse_expr()?;
    if let Some((pos, token)) = parser.tokens.get(parser.pos) {
        return ParseSnafu {
            pos: *pos,
            message: format!("unexpected {token}"),
        }
        .fail();
    }
    Ok(expr)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Duration(u64),
    Str(String),
    Op(&'static str),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    At,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "identifier {s:?}"),
            Token::Number(n) => write!(f, "number {}", format_number(*n)),
            Token::Duration(d) => write!(f, "duration {}", duration::format(*d)),
            Token::Str(s) => write!(f, "string {s:?}"),
            Token::Op(op) => write!(f, "operator {op:?}"),
            Token::LParen => f.write_str("\"(\""),
            Token::RParen => f.write_str("\")\""),
            Token::LBrace => f.write_str("\"{\""),
            Token::RBrace => f.write_str("\"}\""),
            Token::LBracket => f.write_str("\"[\""),
            Token::RBracket => f.write_str("\"]\""),
            Token::Comma => f.write_str("\",\""),
            Token::Colon => f.write_str("\":\""),
            Token::At => f.write_str("\"@\""),
        }
    }
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn error<T>(&self, pos: usize, message: impl Into<String>) -> Result<T> {
        ParseSnafu {
            pos,
            message: message.into(),
        }
        .fail()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn tokenize(mut self) -> Result<Vec<(usize, Token)>> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek_at(0) {
            let start = self.pos;
            if c.is_whitespace() {
                self.pos += 1;
                continue;
            }
            if c == '#' {
                while self.peek_at(0).is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
                continue;
            }

            let token = match c {
                '(' => self.single(Token::LParen),
                ')' => self.single(Token::RParen),
                '{' => self.single(Token::LBrace),
                '}' => self.single(Token::RBrace),
                '[' => self.single(Token::LBracket),
                ']' => self.single(Token::RBracket),
                ',' => self.single(Token::Comma),
                ':' if !self.peek_at(1).is_some_and(is_ident_start) => self.single(Token::Colon),
                '@' => self.single(Token::At),
                '"' | '\'' | '`' => self.string(c)?,
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit())) =>
                {
                    self.number()?
                }
                c if is_ident_start(c) => self.ident(),
                _ => self.operator()?,
            };
            tokens.push((start, token));
        }
        Ok(tokens)
    }

    fn single(&mut self, token: Token) -> Token {
        self.pos += 1;
        token
    }

    fn ident(&mut self) -> Token {
        let start = self.pos;
        while self.peek_at(0).is_some_and(is_ident_char) {
            self.pos += 1;
        }
        Token::Ident(self.chars[start..self.pos].iter().collect())
    }

    fn operator(&mut self) -> Result<Token> {
        const TWO: [&str; 6] = ["==", "!=", "<=", ">=", "=~", "!~"];
        const ONE: [&str; 9] = ["+", "-", "*", "/", "%", "^", "<", ">", "="];

        let pair: String = self.chars[self.pos..].iter().take(2).collect();
        if let Some(op) = TWO.iter().find(|op| **op == pair) {
            self.pos += 2;
            return Ok(Token::Op(*op));
        }
        let single: String = self.chars[self.pos..].iter().take(1).collect();
        if let Some(op) = ONE.iter().find(|op| **op == single) {
            self.pos += 1;
            return Ok(Token::Op(*op));
        }
        self.error(self.pos, format!("unexpected character {single:?}"))
    }

    fn number(&mut self) -> Result<Token> {
        let start = self.pos;
        while let Some(c) = self.peek_at(0) {
            let exponent_sign = (c == '+' || c == '-')
                && matches!(self.chars.get(self.pos.wrapping_sub(1)), Some('e' | 'E'))
                && self.peek_at(1).is_some_and(|n| n.is_ascii_digit())
                && !self.chars[start..self.pos]
                    .iter()
                    .any(|c| *c == 'x' || *c == 'X');
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        let digits = text.replace('_', "");
        if let Some(hex) = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
        {
            if let Ok(value) = u64::from_str_radix(hex, 16) {
                return Ok(Token::Number(value as f64));
            }
        } else if let Ok(value) = digits.parse::<f64>() {
            return Ok(Token::Number(value));
        }
        match duration::parse(&text) {
            Ok(millis) => Ok(Token::Duration(millis)),
            Err(_) => self.error(start, format!("bad number or duration syntax: {text:?}")),
        }
    }

    fn string(&mut self, quote: char) -> Result<Token> {
        let start = self.pos;
        self.pos += 1;
        let mut value = Vec::new();
        loop {
            let Some(c) = self.peek_at(0) else {
                return self.error(start, "unterminated quoted string");
            };
            self.pos += 1;
            if c == quote {
                return match String::from_utf8(value) {
                    Ok(value) => Ok(Token::Str(value)),
                    Err(_) => self.error(start, "invalid UTF-8 in quoted string"),
                };
            }
            if quote != '`' && c == '\n' {
                return self.error(start, "unterminated quoted string");
            }
            if c == '\\' && quote != '`' {
                self.escape(quote, &mut value)?;
            } else {
                push_char(&mut value, c);
            }
        }
    }

    // Escapes follow Go string literals. `\xNN` and octal escapes produce
    // single bytes; the whole string must still be valid UTF-8.
    fn escape(&mut self, quote: char, out: &mut Vec<u8>) -> Result<()> {
        let start = self.pos - 1;
        let Some(c) = self.peek_at(0) else {
            return self.error(start, "unterminated quoted string");
        };
        self.pos += 1;
        let simple = match c {
            'a' => Some('\x07'),
            'b' => Some('\x08'),
            'f' => Some('\x0c'),
            'n' => Some('\n'),
            'r' => Some('\r'),
            't' => Some('\t'),
            'v' => Some('\x0b'),
            '\\' => Some('\\'),
            c if c == quote => Some(c),
            _ => None,
        };
        if let Some(c) = simple {
            push_char(out, c);
            return Ok(());
        }
        match c {
            'x' => {
                let value = self.digits(start, 2, 16)?;
                out.push(value as u8);
            }
            'u' | 'U' => {
                let value = self.digits(start, if c == 'u' { 4 } else { 8 }, 16)?;
                let Some(c) = char::from_u32(value) else {
                    return self.error(start, "escape sequence is an invalid Unicode code point");
                };
                push_char(out, c);
            }
            '0'..='7' => {
                self.pos -= 1;
                let value = self.digits(start, 3, 8)?;
                let Ok(byte) = u8::try_from(value) else {
                    return self.error(start, "octal escape value > 255");
                };
                out.push(byte);
            }
            other => return self.error(start, format!("unknown escape sequence \\{other}")),
        }
        Ok(())
    }

    fn digits(&mut self, start: usize, count: usize, radix: u32) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            let Some(digit) = self.peek_at(0).and_then(|c| c.to_digit(radix)) else {
                return self.error(start, "invalid escape sequence");
            };
            value = value * radix + digit;
            self.pos += 1;
        }
        Ok(value)
    }
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

/// Quotes `value` as a double-quoted string literal that lexes back to the
/// same value.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\x07' => out.push_str("\\a"),
            '\x08' => out.push_str("\\b"),
            '\x0c' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0b' => out.push_str("\\v"),
            c if (c as u32) < 0x20 || c == '\x7f' => out.push_str(&format!("\\x{:02x}", c as u32)),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_ident_start) && chars.all(is_ident_char)
}

fn is_label_name(name: &str) -> bool {
    is_metric_name(name) && !name.contains(':')
}

fn label_name(name: &str) -> String {
    if is_label_name(name) {
        name.to_string()
    } else {
        quote(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

impl MatchOp {
    fn from_token(op: &str) -> Option<Self> {
        match op {
            "=" => Some(MatchOp::Equal),
            "!=" => Some(MatchOp::NotEqual),
            "=~" => Some(MatchOp::Regex),
            "!~" => Some(MatchOp::NotRegex),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            MatchOp::Equal => "=",
            MatchOp::NotEqual => "!=",
            MatchOp::Regex => "=~",
            MatchOp::NotRegex => "!~",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Matcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            label_name(&self.name),
            self.op.as_str(),
            quote(&self.value)
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VectorSelector {
    pub metric: Option<String>,
    pub matchers: Vec<Matcher>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Range {
    Matrix(u64),
    Subquery { range: u64, step: Option<u64> },
}

#[derive(Clone, Debug, PartialEq)]
pub enum AtModifier {
    Timestamp(f64),
    Start,
    End,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Grouping {
    pub without: bool,
    pub labels: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VectorMatching {
    pub ignoring: bool,
    pub labels: Vec<String>,
    /// `group_left` or `group_right` plus the labels copied from the "one" side.
    pub group: Option<(&'static str, Vec<String>)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BinaryOp {
    pub op: &'static str,
    pub return_bool: bool,
    pub matching: Option<VectorMatching>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    String(String),
    Selector(VectorSelector),
    Paren(Box<Expr>),
    Unary {
        op: &'static str,
        expr: Box<Expr>,
    },
    /// Operators are kept in source order; printing does not depend on
    /// precedence because parentheses are preserved.
    Binary {
        first: Box<Expr>,
        rest: Vec<(BinaryOp, Expr)>,
    },
    Aggregate {
        op: String,
        grouping: Option<Grouping>,
        param: Option<Box<Expr>>,
        expr: Box<Expr>,
    },
    Call {
        func: String,
        args: Vec<Expr>,
    },
    Modified {
        expr: Box<Expr>,
        range: Option<Range>,
        at: Option<AtModifier>,
        offset: Option<i64>,
    },
}

impl Expr {
    fn enforce_matcher(&mut self, matcher: &Matcher) {
        match self {
            Expr::Number(_) | Expr::String(_) => {}
            Expr::Selector(selector) => {
                selector.matchers.retain(|m| m.name != matcher.name);
                selector.matchers.push(matcher.clone());
            }
            Expr::Paren(expr) | Expr::Unary { expr, .. } | Expr::Modified { expr, .. } => {
                expr.enforce_matcher(matcher)
            }
            Expr::Binary { first, rest } => {
                first.enforce_matcher(matcher);
                for (_, expr) in rest {
                    expr.enforce_matcher(matcher);
                }
            }
            Expr::Aggregate { param, expr, .. } => {
                if let Some(param) = param {
                    param.enforce_matcher(matcher);
                }
                expr.enforce_matcher(matcher);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.enforce_matcher(matcher);
                }
            }
        }
    }
}

fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        value.to_string()
    }
}

fn label_list(labels: &[String]) -> String {
    let labels: Vec<String> = labels.iter().map(|l| label_name(l)).collect();
    format!("({})", labels.join(", "))
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => f.write_str(&format_number(*n)),
            Expr::String(s) => f.write_str(&quote(s)),
            Expr::Selector(selector) => {
                let mut items = Vec::new();
                match &selector.metric {
                    Some(metric) if is_metric_name(metric) => f.write_str(metric)?,
                    Some(metric) => items.push(quote(metric)),
                    None => {}
                }
                items.extend(selector.matchers.iter().map(|m| m.to_string()));
                if !items.is_empty() || selector.metric.is_none() {
                    write!(f, "{{{}}}", items.join(","))?;
                }
                Ok(())
            }
            Expr::Paren(expr) => write!(f, "({expr})"),
            Expr::Unary { op, expr } => write!(f, "{op}{expr}"),
            Expr::Binary { first, rest } => {
                write!(f, "{first}")?;
                for (op, expr) in rest {
                    write!(f, " {}", op.op)?;
                    if op.return_bool {
                        f.write_str(" bool")?;
                    }
                    if let Some(matching) = &op.matching {
                        let keyword = if matching.ignoring { "ignoring" } else { "on" };
                        write!(f, " {keyword} {}", label_list(&matching.labels))?;
                        if let Some((group, include)) = &matching.group {
                            write!(f, " {group}")?;
                            if !include.is_empty() {
                                write!(f, " {}", label_list(include))?;
                            }
                        }
                    }
                    write!(f, " {expr}")?;
                }
                Ok(())
            }
            Expr::Aggregate {
                op,
                grouping,
                param,
                expr,
            } => {
                f.write_str(op)?;
                if let Some(grouping) = grouping {
                    let keyword = if grouping.without { "without" } else { "by" };
                    write!(f, " {keyword} {} ", label_list(&grouping.labels))?;
                }
                match param {
                    Some(param) => write!(f, "({param}, {expr})"),
                    None => write!(f, "({expr})"),
                }
            }
            Expr::Call { func, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{func}({})", args.join(", "))
            }
            Expr::Modified {
                expr,
                range,
                at,
                offset,
            } => {
                write!(f, "{expr}")?;
                match range {
                    Some(Range::Matrix(range)) => write!(f, "[{}]", duration::format(*range))?,
                    Some(Range::Subquery { range, step }) => {
                        let step = step.map(duration::format).unwrap_or_default();
                        write!(f, "[{}:{step}]", duration::format(*range))?
                    }
                    None => {}
                }
                match at {
                    Some(AtModifier::Timestamp(ts)) => write!(f, " @ {ts:.3}")?,
                    Some(AtModifier::Start) => f.write_str(" @ start()")?,
                    Some(AtModifier::End) => f.write_str(" @ end()")?,
                    None => {}
                }
                if let Some(offset) = offset {
                    let sign = if *offset < 0 { "-" } else { "" };
                    write!(f, " offset {sign}{}", duration::format(offset.unsigned_abs()))?;
                }
                Ok(())
            }
        }
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(pos, _)| *pos)
            .unwrap_or(self.end)
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T> {
        ParseSnafu {
            pos: self.position(),
            message: message.into(),
        }
        .fail()
    }

    fn unexpected<T>(&self, context: &str) -> Result<T> {
        match self.peek() {
            Some(token) => self.error(format!("unexpected {token} in {context}")),
            None => self.error(format!("unexpected end of input in {context}")),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, context: &str) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            self.unexpected(context)
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(id)) if id.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn peek_binary_op(&self) -> Option<&'static str> {
        match self.peek()? {
            Token::Op(op) if *op != "=" && *op != "=~" && *op != "!~" => Some(*op),
            Token::Ident(id) => ["and", "or", "unless", "atan2"]
                .into_iter()
                .find(|kw| id.eq_ignore_ascii_case(kw)),
            _ => None,
        }
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_DEPTH {
            return self.error(format!("expression nests deeper than {MAX_DEPTH} levels"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.nested(Self::parse_binary)
    }

    fn parse_binary(&mut self) -> Result<Expr> {
        let first = self.parse_unary()?;
        let mut rest = Vec::new();
        while let Some(op) = self.peek_binary_op() {
            self.pos += 1;
            let mut binary = BinaryOp {
                op,
                return_bool: false,
                matching: None,
            };
            if self.eat_keyword("bool") {
                if !COMPARISONS.contains(&op) {
                    return self.error("bool modifier can only be used on comparison operators");
                }
                binary.return_bool = true;
            }
            let ignoring = self.peek_keyword("ignoring");
            if ignoring || self.peek_keyword("on") {
                self.pos += 1;
                let labels = self.parse_label_list()?;
                let group = match ["group_left", "group_right"]
                    .into_iter()
                    .find(|kw| self.peek_keyword(kw))
                {
                    Some(group) => {
                        self.pos += 1;
                        let include = if self.peek() == Some(&Token::LParen) {
                            self.parse_label_list()?
                        } else {
                            Vec::new()
                        };
                        Some((group, include))
                    }
                    None => None,
                };
                binary.matching = Some(VectorMatching {
                    ignoring,
                    labels,
                    group,
                });
            }
            let rhs = self.parse_unary()?;
            rest.push((binary, rhs));
        }

        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Binary {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Op(op @ ("+" | "-"))) => {
                let op = *op;
                self.pos += 1;
                // Signs fold into number literals, so `+Inf` and `Inf` agree.
                Ok(match self.nested(Self::parse_unary)? {
                    Expr::Number(n) if op == "-" => Expr::Number(-n),
                    Expr::Number(n) => Expr::Number(n),
                    expr => Expr::Unary {
                        op,
                        expr: Box::new(expr),
                    },
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let expr = self.parse_primary()?;

        let mut range = None;
        if self.eat(&Token::LBracket) {
            let first = self.parse_duration("range")?;
            range = Some(if self.eat(&Token::Colon) {
                let step = if self.peek() == Some(&Token::RBracket) {
                    None
                } else {
                    Some(self.parse_duration("subquery step")?)
                };
                Range::Subquery { range: first, step }
            } else {
                if !matches!(expr, Expr::Selector(_)) {
                    return self.error("ranges are only allowed for vector selectors");
                }
                Range::Matrix(first)
            });
            self.expect(&Token::RBracket, "range")?;
        }

        let mut at = None;
        let mut offset = None;
        loop {
            if self.eat_keyword("offset") {
                if offset.is_some() {
                    return self.error("offset may not be set multiple times");
                }
                let negative = self.eat(&Token::Op("-"));
                let millis = i64::try_from(self.parse_duration("offset")?)
                    .or_else(|_| self.error("offset is out of range"))?;
                offset = Some(if negative { -millis } else { millis });
            } else if self.eat(&Token::At) {
                if at.is_some() {
                    return self.error("@ may not be set multiple times");
                }
                at = Some(self.parse_at()?);
            } else {
                break;
            }
        }

        if range.is_none() && at.is_none() && offset.is_none() {
            return Ok(expr);
        }
        if range.is_none() && !matches!(expr, Expr::Selector(_)) {
            return self.error("offset and @ modifiers must follow a selector or subquery");
        }
        Ok(Expr::Modified {
            expr: Box::new(expr),
            range,
            at,
            offset,
        })
    }

    fn parse_at(&mut self) -> Result<AtModifier> {
        if self.eat_keyword("start") || self.eat_keyword("end") {
            let start = matches!(
                self.tokens.get(self.pos - 1),
                Some((_, Token::Ident(id))) if id.eq_ignore_ascii_case("start")
            );
            self.expect(&Token::LParen, "@ modifier")?;
            self.expect(&Token::RParen, "@ modifier")?;
            return Ok(if start {
                AtModifier::Start
            } else {
                AtModifier::End
            });
        }
        let negative = self.eat(&Token::Op("-"));
        match self.peek() {
            Some(Token::Number(ts)) => {
                let ts = if negative { -*ts } else { *ts };
                self.pos += 1;
                Ok(AtModifier::Timestamp(ts))
            }
            _ => self.unexpected("@ modifier"),
        }
    }

    fn parse_duration(&mut self, context: &str) -> Result<u64> {
        match self.peek() {
            Some(Token::Duration(millis)) => {
                let millis = *millis;
                self.pos += 1;
                Ok(millis)
            }
            Some(Token::Number(seconds)) if *seconds >= 0.0 => {
                let millis = duration::from_seconds(*seconds);
                self.pos += 1;
                Ok(millis)
            }
            _ => self.unexpected(context),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let Some(token) = self.peek().cloned() else {
            return self.unexpected("expression");
        };
        match token {
            Token::Number(n) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Token::Str(s) => {
                self.pos += 1;
                Ok(Expr::String(s))
            }
            Token::LParen => {
                self.pos += 1;
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen, "parenthesized expression")?;
                Ok(Expr::Paren(Box::new(expr)))
            }
            Token::LBrace => {
                let (metric, matchers) = self.parse_matchers()?;
                if metric.is_none() && matchers.iter().all(matches_empty) {
                    return self.error(
                        "vector selector must contain at least one non-empty matcher",
                    );
                }
                Ok(Expr::Selector(VectorSelector { metric, matchers }))
            }
            Token::Ident(id) => self.parse_identifier(id),
            _ => self.unexpected("expression"),
        }
    }

    fn parse_identifier(&mut self, id: String) -> Result<Expr> {
        let lower = id.to_ascii_lowercase();
        let next = self.peek_nth(1);
        let opens_call = next == Some(&Token::LParen);

        if AGGREGATORS.contains(&lower.as_str())
            && (opens_call
                || matches!(next, Some(Token::Ident(kw))
                    if kw.eq_ignore_ascii_case("by") || kw.eq_ignore_ascii_case("without")))
        {
            self.pos += 1;
            return self.parse_aggregate(lower);
        }
        if opens_call {
            if !FUNCTIONS.contains(&id.as_str()) {
                return self.error(format!("unknown function with name {id:?}"));
            }
            self.pos += 2;
            let mut args = Vec::new();
            if !self.eat(&Token::RParen) {
                loop {
                    args.push(self.parse_expr()?);
                    if self.eat(&Token::Comma) {
                        continue;
                    }
                    self.expect(&Token::RParen, "function call")?;
                    break;
                }
            }
            return Ok(Expr::Call { func: id, args });
        }
        if lower == "inf" || lower == "nan" {
            self.pos += 1;
            return Ok(Expr::Number(if lower == "inf" {
                f64::INFINITY
            } else {
                f64::NAN
            }));
        }
        if KEYWORDS.contains(&lower.as_str()) {
            return self.unexpected("expression");
        }

        self.pos += 1;
        let matchers = if self.peek() == Some(&Token::LBrace) {
            let (quoted, matchers) = self.parse_matchers()?;
            if quoted.is_some() {
                return self.error(format!("metric name {id:?} must not be set twice"));
            }
            matchers
        } else {
            Vec::new()
        };
        Ok(Expr::Selector(VectorSelector {
            metric: Some(id),
            matchers,
        }))
    }

    fn parse_aggregate(&mut self, op: String) -> Result<Expr> {
        let mut grouping = self.parse_grouping()?;
        self.expect(&Token::LParen, "aggregation")?;
        let first = self.parse_expr()?;
        let (param, expr) = if self.eat(&Token::Comma) {
            (Some(Box::new(first)), self.parse_expr()?)
        } else {
            (None, first)
        };
        self.expect(&Token::RParen, "aggregation")?;
        if grouping.is_none() {
            grouping = self.parse_grouping()?;
        }

        let needs_param = PARAMETERISED_AGGREGATORS.contains(&op.as_str());
        if needs_param != param.is_some() {
            return self.error(if needs_param {
                format!("no parameter given for aggregation {op}")
            } else {
                format!("aggregation {op} takes no parameter")
            });
        }

        Ok(Expr::Aggregate {
            op,
            grouping,
            param,
            expr: Box::new(expr),
        })
    }

    fn parse_grouping(&mut self) -> Result<Option<Grouping>> {
        let without = self.peek_keyword("without");
        if !without && !self.peek_keyword("by") {
            return Ok(None);
        }
        self.pos += 1;
        Ok(Some(Grouping {
            without,
            labels: self.parse_label_list()?,
        }))
    }

    fn parse_label_list(&mut self) -> Result<Vec<String>> {
        self.expect(&Token::LParen, "grouping labels")?;
        let mut labels = Vec::new();
        loop {
            match self.peek().cloned() {
                Some(Token::RParen) => {
                    self.pos += 1;
                    return Ok(labels);
                }
                Some(Token::Ident(label) | Token::Str(label)) => {
                    self.pos += 1;
                    labels.push(label);
                }
                _ => return self.unexpected("grouping labels"),
            }
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen, "grouping labels")?;
                return Ok(labels);
            }
        }
    }

    /// Parses a braced matcher list. A lone quoted string in the list is
    /// the metric name and is returned separately.
    fn parse_matchers(&mut self) -> Result<(Option<String>, Vec<Matcher>)> {
        self.expect(&Token::LBrace, "label matching")?;
        let mut metric = None;
        let mut matchers = Vec::new();
        loop {
            let name = match self.peek().cloned() {
                Some(Token::RBrace) => {
                    self.pos += 1;
                    return Ok((metric, matchers));
                }
                Some(Token::Ident(name)) => {
                    self.pos += 1;
                    name
                }
                Some(Token::Str(name)) => {
                    self.pos += 1;
                    let names_label = matches!(
                        self.peek(),
                        Some(Token::Op(op)) if MatchOp::from_token(op).is_some()
                    );
                    if !names_label {
                        if metric.is_some() {
                            return self.error("metric name must not be set twice");
                        }
                        metric = Some(name);
                        if !self.eat(&Token::Comma) {
                            self.expect(&Token::RBrace, "label matching")?;
                            return Ok((metric, matchers));
                        }
                        continue;
                    }
                    name
                }
                _ => return self.unexpected("label matching"),
            };
            let op = match self.peek() {
                Some(Token::Op(op)) => MatchOp::from_token(op),
                _ => None,
            };
            let Some(op) = op else {
                return self.unexpected("label matching");
            };
            self.pos += 1;
            let Some(Token::Str(value)) = self.peek().cloned() else {
                return self.unexpected("label matching");
            };
            self.pos += 1;
            matchers.push(Matcher { name, op, value });

            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBrace, "label matching")?;
                return Ok((metric, matchers));
            }
        }
    }
}

// A matcher that also matches the empty string selects series lacking the
// label entirely.
fn matches_empty(matcher: &Matcher) -> bool {
    match matcher.op {
        MatchOp::Equal => matcher.value.is_empty(),
        MatchOp::NotEqual => !matcher.value.is_empty(),
        MatchOp::Regex => matcher.value.is_empty() || matcher.value == ".*",
        MatchOp::NotRegex => matcher.value == ".+",
    }
}
