//! Lexer and precedence-climbing parser for the expression language.
use crate::ast::{BinaryOp, Literal, Node, TypeName, UnaryOp};
use crate::error::{ParseError, ParseResult};
use crate::types::Primitive;

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Identifier(String),
    Int(i32),
    Long(i64),
    /// `2147483648` or `9223372036854775808L`, valid only as the operand of unary minus.
    MinMagnitude {
        long: bool,
    },
    Float(f32),
    Double(f64),
    Char(char),
    Str(String),
    True,
    False,
    Null,
    New,
    InstanceOf,
    Dot,
    Comma,
    Question,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Tilde,
    Bang,
    Amp,
    AmpAmp,
    Pipe,
    PipePipe,
    Caret,
    Shl,
    Shr,
    UShr,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Identifier(name) => format!("identifier {name}"),
            Token::Eof => "end of input".to_string(),
            other => format!("{other:?}"),
        }
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    len: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            len: input.len(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        self.chars.next().map(|(_, c)| c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map_or(self.len, |(i, _)| *i)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn consume_while<F>(&mut self, mut predicate: F) -> String
    where
        F: FnMut(char) -> bool,
    {
        let mut buf = String::new();
        while let Some(ch) = self.peek() {
            if !predicate(ch) {
                break;
            }
            buf.push(ch);
            self.bump();
        }
        buf
    }

    fn skip_whitespace(&mut self) {
        self.consume_while(char::is_whitespace);
    }

    fn tokenize(mut self) -> ParseResult<Vec<(Token, usize)>> {
        let mut out = Vec::new();
        loop {
            self.skip_whitespace();
            let offset = self.offset();
            let token = self.next_token(offset)?;
            let done = token == Token::Eof;
            out.push((token, offset));
            if done {
                return Ok(out);
            }
        }
    }

    fn next_token(&mut self, offset: usize) -> ParseResult<Token> {
        let Some(ch) = self.peek() else {
            return Ok(Token::Eof);
        };
        if is_ident_start(ch) {
            let ident = self.consume_while(is_ident_part);
            return Ok(match ident.as_str() {
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                "new" => Token::New,
                "instanceof" => Token::InstanceOf,
                _ => Token::Identifier(ident),
            });
        }
        if ch.is_ascii_digit() {
            return self.lex_number(offset);
        }
        self.bump();
        let assignment = Err(ParseError::Assignment { offset });
        let token = match ch {
            '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => {
                return self.lex_fraction(String::from("0."), offset);
            }
            '.' => Token::Dot,
            ',' => Token::Comma,
            '?' => Token::Question,
            ':' => Token::Colon,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '~' => Token::Tilde,
            '"' => return self.lex_string(offset),
            '\'' => return self.lex_char(offset),
            '+' | '-' | '*' | '/' | '%' | '^' if self.peek() == Some('=') => return assignment,
            '+' if self.peek() == Some('+') => return assignment,
            '-' if self.peek() == Some('-') => return assignment,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '^' => Token::Caret,
            '!' if self.eat('=') => Token::NotEq,
            '!' => Token::Bang,
            '=' if self.eat('=') => Token::EqEq,
            '=' => return assignment,
            '&' if self.eat('&') => Token::AmpAmp,
            '&' if self.peek() == Some('=') => return assignment,
            '&' => Token::Amp,
            '|' if self.eat('|') => Token::PipePipe,
            '|' if self.peek() == Some('=') => return assignment,
            '|' => Token::Pipe,
            '<' if self.eat('<') => {
                if self.peek() == Some('=') {
                    return assignment;
                }
                Token::Shl
            }
            '<' if self.eat('=') => Token::Le,
            '<' => Token::Lt,
            '>' if self.eat('>') => {
                let token = if self.eat('>') { Token::UShr } else { Token::Shr };
                if self.peek() == Some('=') {
                    return assignment;
                }
                token
            }
            '>' if self.eat('=') => Token::Ge,
            '>' => Token::Gt,
            other => return Err(ParseError::UnexpectedChar { ch: other, offset }),
        };
        Ok(token)
    }

    fn lex_number(&mut self, offset: usize) -> ParseResult<Token> {
        if self.peek() == Some('0') {
            self.bump();
            if matches!(self.peek(), Some('x' | 'X')) {
                self.bump();
                let digits = self.consume_while(|c| c.is_ascii_hexdigit() || c == '_');
                let long = matches!(self.peek(), Some('l' | 'L'));
                if long {
                    self.bump();
                }
                let digits = digits.replace('_', "");
                let invalid = || ParseError::InvalidNumber {
                    text: format!("0x{digits}"),
                    offset,
                };
                let value = u64::from_str_radix(&digits, 16).map_err(|_| invalid())?;
                return if long {
                    Ok(Token::Long(value as i64))
                } else {
                    u32::try_from(value)
                        .map(|v| Token::Int(v as i32))
                        .map_err(|_| invalid())
                };
            }
            let rest = self.consume_while(|c| c.is_ascii_digit() || c == '_');
            return self.lex_integer_or_fraction(format!("0{rest}"), offset);
        }
        let digits = self.consume_while(|c| c.is_ascii_digit() || c == '_');
        self.lex_integer_or_fraction(digits, offset)
    }

    fn lex_integer_or_fraction(&mut self, digits: String, offset: usize) -> ParseResult<Token> {
        let digits = digits.replace('_', "");
        match self.peek() {
            Some('.') => {
                self.bump();
                self.lex_fraction(format!("{digits}."), offset)
            }
            Some('e' | 'E' | 'f' | 'F' | 'd' | 'D') => self.lex_fraction(digits, offset),
            Some('l' | 'L') => {
                self.bump();
                if digits == "9223372036854775808" {
                    return Ok(Token::MinMagnitude { long: true });
                }
                digits
                    .parse::<i64>()
                    .map(Token::Long)
                    .map_err(|_| ParseError::InvalidNumber {
                        text: format!("{digits}L"),
                        offset,
                    })
            }
            _ if digits == "2147483648" => Ok(Token::MinMagnitude { long: false }),
            _ => digits
                .parse::<i32>()
                .map(Token::Int)
                .map_err(|_| ParseError::InvalidNumber {
                    text: digits,
                    offset,
                }),
        }
    }

    fn lex_fraction(&mut self, mut text: String, offset: usize) -> ParseResult<Token> {
        text.push_str(&self.consume_while(|c| c.is_ascii_digit()));
        if matches!(self.peek(), Some('e' | 'E')) {
            self.bump();
            text.push('e');
            if let Some(sign @ ('+' | '-')) = self.peek() {
                self.bump();
                text.push(sign);
            }
            text.push_str(&self.consume_while(|c| c.is_ascii_digit()));
        }
        let invalid = |text: &str| ParseError::InvalidNumber {
            text: text.to_string(),
            offset,
        };
        match self.peek() {
            Some('f' | 'F') => {
                self.bump();
                text.parse::<f32>().map(Token::Float).map_err(|_| invalid(&text))
            }
            Some('d' | 'D') => {
                self.bump();
                text.parse::<f64>().map(Token::Double).map_err(|_| invalid(&text))
            }
            _ => text.parse::<f64>().map(Token::Double).map_err(|_| invalid(&text)),
        }
    }

    fn lex_escape(&mut self) -> ParseResult<char> {
        let offset = self.offset();
        let escaped = match self.bump() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('b') => '\u{8}',
            Some('f') => '\u{c}',
            Some('0') => '\0',
            Some('\\') => '\\',
            Some('\'') => '\'',
            Some('"') => '"',
            Some('u') => {
                let hex: String = (0..4).filter_map(|_| self.bump()).collect();
                u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == 4)
                    .and_then(char::from_u32)
                    .ok_or(ParseError::InvalidEscape { offset })?
            }
            _ => return Err(ParseError::InvalidEscape { offset }),
        };
        Ok(escaped)
    }

    fn lex_string(&mut self, offset: usize) -> ParseResult<Token> {
        let mut buf = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(Token::Str(buf)),
                Some('\\') => buf.push(self.lex_escape()?),
                Some(c) => buf.push(c),
                None => {
                    return Err(ParseError::Unterminated {
                        what: "string",
                        offset,
                    })
                }
            }
        }
    }

    fn lex_char(&mut self, offset: usize) -> ParseResult<Token> {
        let unterminated = ParseError::Unterminated {
            what: "character",
            offset,
        };
        let ch = match self.bump() {
            Some('\\') => self.lex_escape()?,
            Some('\'') | None => return Err(unterminated),
            Some(c) => c,
        };
        if self.eat('\'') {
            Ok(Token::Char(ch))
        } else {
            Err(unterminated)
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> ParseResult<Self> {
        Ok(Self {
            tokens: Lexer::new(input).tokenize()?,
            pos: 0,
        })
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        self.tokens
            .get(self.pos + ahead)
            .or_else(|| self.tokens.last())
            .map_or(&Token::Eof, |(token, _)| token)
    }

    fn lookahead(&self) -> &Token {
        self.peek_at(0)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |(_, offset)| *offset)
    }

    fn bump(&mut self) -> Token {
        let token = self.lookahead().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::Expected {
            expected: expected.to_string(),
            found: self.lookahead().describe(),
            offset: self.offset(),
        }
    }

    fn expect(&mut self, token: Token, expected: &str) -> ParseResult<()> {
        if *self.lookahead() == token {
            self.bump();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        match self.lookahead() {
            Token::Identifier(name) => {
                let name = name.clone();
                self.bump();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn parse(&mut self) -> ParseResult<Node> {
        let node = self.parse_conditional()?;
        if *self.lookahead() != Token::Eof {
            return Err(self.unexpected("end of input"));
        }
        Ok(node)
    }

    fn parse_conditional(&mut self) -> ParseResult<Node> {
        let cond = self.parse_binary(0)?;
        if *self.lookahead() != Token::Question {
            return Ok(cond);
        }
        self.bump();
        let then = self.parse_conditional()?;
        self.expect(Token::Colon, "':'")?;
        let otherwise = self.parse_conditional()?;
        Ok(Node::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_binary(&mut self, min_prec: u8) -> ParseResult<Node> {
        let mut left = self.parse_unary()?;
        loop {
            if *self.lookahead() == Token::InstanceOf {
                if INSTANCEOF_PRECEDENCE < min_prec {
                    break;
                }
                self.bump();
                let ty = self.parse_type()?;
                left = Node::InstanceOf {
                    expr: Box::new(left),
                    ty,
                };
                continue;
            }
            let Some((op, prec)) = self.infix_binding_power() else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.bump();
            let right = self.parse_binary(prec + 1)?;
            left = Node::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Node> {
        let op = match self.lookahead() {
            Token::Plus => UnaryOp::Plus,
            Token::Minus => UnaryOp::Minus,
            Token::Tilde => UnaryOp::BitNot,
            Token::Bang => UnaryOp::Not,
            Token::LParen => {
                if let Some(ty) = self.try_cast_prefix() {
                    let expr = self.parse_unary()?;
                    return Ok(Node::Cast {
                        ty,
                        expr: Box::new(expr),
                    });
                }
                return self.parse_postfix();
            }
            _ => return self.parse_postfix(),
        };
        self.bump();
        // `-2147483648` and `-9223372036854775808L` only exist as negated literals.
        if op == UnaryOp::Minus {
            if let Some(literal) = self.negated_min_literal() {
                return Ok(Node::Literal(literal));
            }
        }
        let expr = self.parse_unary()?;
        Ok(Node::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn negated_min_literal(&mut self) -> Option<Literal> {
        let literal = match self.lookahead() {
            Token::MinMagnitude { long: false } => Literal::Int(i32::MIN),
            Token::MinMagnitude { long: true } => Literal::Long(i64::MIN),
            _ => return None,
        };
        self.bump();
        Some(literal)
    }

    /// Recognizes `(Type)` when followed by something that can start a cast operand.
    fn try_cast_prefix(&mut self) -> Option<TypeName> {
        let start = self.pos;
        // Closing nested type arguments may split shift tokens in place.
        let snapshot = self.tokens[start..].to_vec();
        match self.scan_cast_prefix() {
            Some(ty) => Some(ty),
            None => {
                self.tokens.truncate(start);
                self.tokens.extend(snapshot);
                self.pos = start;
                None
            }
        }
    }

    fn scan_cast_prefix(&mut self) -> Option<TypeName> {
        self.bump();
        let primitive = match self.lookahead() {
            Token::Identifier(name) => Primitive::from_name(name).is_some(),
            _ => return None,
        };
        let ty = self.parse_type().ok()?;
        if *self.lookahead() != Token::RParen {
            return None;
        }
        self.bump();
        let operand_follows = match self.lookahead() {
            Token::Plus | Token::Minus => primitive && ty.dims == 0,
            Token::Identifier(_)
            | Token::Int(_)
            | Token::Long(_)
            | Token::MinMagnitude { .. }
            | Token::Float(_)
            | Token::Double(_)
            | Token::Char(_)
            | Token::Str(_)
            | Token::True
            | Token::False
            | Token::Null
            | Token::New
            | Token::LParen
            | Token::Bang
            | Token::Tilde => true,
            _ => false,
        };
        operand_follows.then_some(ty)
    }

    fn parse_postfix(&mut self) -> ParseResult<Node> {
        let mut node = self.parse_primary()?;
        loop {
            match self.lookahead() {
                Token::Dot => {
                    self.bump();
                    let name = self.expect_identifier()?;
                    if *self.lookahead() == Token::LParen {
                        let args = self.parse_args()?;
                        node = Node::Call {
                            target: Some(Box::new(node)),
                            name,
                            args,
                        };
                    } else {
                        node = Node::Field {
                            target: Box::new(node),
                            name,
                        };
                    }
                }
                Token::LBracket => {
                    self.bump();
                    let index = self.parse_conditional()?;
                    self.expect(Token::RBracket, "']'")?;
                    node = Node::Index {
                        array: Box::new(node),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(node),
            }
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Node> {
        let literal = match self.lookahead() {
            Token::Int(v) => Literal::Int(*v),
            Token::Long(v) => Literal::Long(*v),
            Token::Float(v) => Literal::Float(*v),
            Token::Double(v) => Literal::Double(*v),
            Token::Char(c) => Literal::Char(*c),
            Token::Str(s) => Literal::Str(s.clone()),
            Token::True => Literal::Bool(true),
            Token::False => Literal::Bool(false),
            Token::Null => Literal::Null,
            Token::Identifier(name) => {
                let name = name.clone();
                self.bump();
                if *self.lookahead() == Token::LParen {
                    let args = self.parse_args()?;
                    return Ok(Node::Call {
                        target: None,
                        name,
                        args,
                    });
                }
                return Ok(Node::Name(name));
            }
            Token::LParen => {
                self.bump();
                let inner = self.parse_conditional()?;
                self.expect(Token::RParen, "')'")?;
                return Ok(inner);
            }
            Token::New => return self.parse_new(),
            Token::MinMagnitude { long } => {
                return Err(ParseError::InvalidNumber {
                    text: if *long {
                        "9223372036854775808L".to_string()
                    } else {
                        "2147483648".to_string()
                    },
                    offset: self.offset(),
                })
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.bump();
        Ok(Node::Literal(literal))
    }

    fn parse_args(&mut self) -> ParseResult<Vec<Node>> {
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();
        if *self.lookahead() != Token::RParen {
            loop {
                args.push(self.parse_conditional()?);
                if *self.lookahead() == Token::Comma {
                    self.bump();
                    continue;
                }
                break;
            }
        }
        self.expect(Token::RParen, "')'")?;
        Ok(args)
    }

    fn parse_new(&mut self) -> ParseResult<Node> {
        self.expect(Token::New, "new")?;
        let element = self.parse_type_without_dims()?;
        match self.lookahead() {
            Token::LParen => {
                let args = self.parse_args()?;
                Ok(Node::New { ty: element, args })
            }
            Token::LBracket => {
                let mut dims = Vec::new();
                let mut extra_dims = 0;
                while *self.lookahead() == Token::LBracket {
                    self.bump();
                    if *self.lookahead() == Token::RBracket {
                        self.bump();
                        extra_dims += 1;
                        continue;
                    }
                    if extra_dims > 0 {
                        return Err(self.unexpected("']'"));
                    }
                    dims.push(self.parse_conditional()?);
                    self.expect(Token::RBracket, "']'")?;
                }
                let init = if dims.is_empty() {
                    match self.parse_array_init()? {
                        Node::ArrayInit(items) => Some(items),
                        _ => None,
                    }
                } else {
                    None
                };
                Ok(Node::NewArray {
                    element,
                    dims,
                    extra_dims,
                    init,
                })
            }
            _ => Err(self.unexpected("'(' or '['")),
        }
    }

    fn parse_array_init(&mut self) -> ParseResult<Node> {
        self.expect(Token::LBrace, "'{'")?;
        let mut items = Vec::new();
        while *self.lookahead() != Token::RBrace {
            let item = if *self.lookahead() == Token::LBrace {
                self.parse_array_init()?
            } else {
                self.parse_conditional()?
            };
            items.push(item);
            if *self.lookahead() == Token::Comma {
                self.bump();
            } else {
                break;
            }
        }
        self.expect(Token::RBrace, "'}'")?;
        Ok(Node::ArrayInit(items))
    }

    fn parse_type(&mut self) -> ParseResult<TypeName> {
        let mut ty = self.parse_type_without_dims()?;
        while *self.lookahead() == Token::LBracket && *self.peek_at(1) == Token::RBracket {
            self.bump();
            self.bump();
            ty.dims += 1;
        }
        Ok(ty)
    }

    fn parse_type_without_dims(&mut self) -> ParseResult<TypeName> {
        let mut name = self.expect_identifier()?;
        while *self.lookahead() == Token::Dot {
            self.bump();
            name.push('.');
            name.push_str(&self.expect_identifier()?);
        }
        let mut args = Vec::new();
        if *self.lookahead() == Token::Lt {
            self.bump();
            loop {
                args.push(self.parse_type()?);
                if *self.lookahead() == Token::Comma {
                    self.bump();
                    continue;
                }
                break;
            }
            self.close_type_args()?;
        }
        Ok(TypeName {
            name,
            args,
            dims: 0,
        })
    }

    /// Consumes one `>`, splitting `>>` and `>>>` tokens closing nested type arguments.
    fn close_type_args(&mut self) -> ParseResult<()> {
        let rest = match self.lookahead() {
            Token::Gt => None,
            Token::Shr => Some(Token::Gt),
            Token::UShr => Some(Token::Shr),
            _ => return Err(self.unexpected("'>'")),
        };
        match rest {
            None => {
                self.bump();
            }
            Some(rest) => {
                if let Some(slot) = self.tokens.get_mut(self.pos) {
                    slot.0 = rest;
                    slot.1 += 1;
                }
            }
        }
        Ok(())
    }

    fn infix_binding_power(&self) -> Option<(BinaryOp, u8)> {
        let op = match self.lookahead() {
            Token::PipePipe => (BinaryOp::Or, 1),
            Token::AmpAmp => (BinaryOp::And, 2),
            Token::Pipe => (BinaryOp::BitOr, 3),
            Token::Caret => (BinaryOp::BitXor, 4),
            Token::Amp => (BinaryOp::BitAnd, 5),
            Token::EqEq => (BinaryOp::Eq, 6),
            Token::NotEq => (BinaryOp::Ne, 6),
            Token::Lt => (BinaryOp::Lt, INSTANCEOF_PRECEDENCE),
            Token::Gt => (BinaryOp::Gt, INSTANCEOF_PRECEDENCE),
            Token::Le => (BinaryOp::Le, INSTANCEOF_PRECEDENCE),
            Token::Ge => (BinaryOp::Ge, INSTANCEOF_PRECEDENCE),
            Token::Shl => (BinaryOp::Shl, 8),
            Token::Shr => (BinaryOp::Shr, 8),
            Token::UShr => (BinaryOp::UShr, 8),
            Token::Plus => (BinaryOp::Add, 9),
            Token::Minus => (BinaryOp::Sub, 9),
            Token::Star => (BinaryOp::Mul, 10),
            Token::Slash => (BinaryOp::Div, 10),
            Token::Percent => (BinaryOp::Rem, 10),
            _ => return None,
        };
        Some(op)
    }
}

const INSTANCEOF_PRECEDENCE: u8 = 7;

/// Parses expression text into a [`Node`] tree.
pub fn parse(input: &str) -> ParseResult<Node> {
    Parser::new(input)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_generics_close_with_shift_tokens() {
        let node = parse("(Map<String, List<String>>) x").unwrap();
        let Node::Cast { ty, .. } = node else {
            panic!("expected a cast");
        };
        assert_eq!(ty.to_string(), "Map<String, List<String>>");
    }

    #[test]
    fn parenthesized_names_are_not_casts() {
        assert_eq!(
            parse("(a) + b").unwrap(),
            Node::Binary {
                op: BinaryOp::Add,
                left: Box::new(Node::Name("a".into())),
                right: Box::new(Node::Name("b".into())),
            }
        );
    }
}
