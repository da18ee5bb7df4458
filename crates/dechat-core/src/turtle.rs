//! A small Turtle reader and writer helpers.
//!
//! Covers what pods serve for profiles, containers, messages and access
//! descriptors: `@prefix`/`PREFIX`, `@base`/`BASE`, relative IRIs, prefixed
//! names, `a`, predicate (`;`) and object (`,`) lists, blank node labels and
//! property lists, string literals (short and long form, escapes, language
//! tags, datatypes), numbers and booleans. RDF collections are rejected.

use std::collections::HashMap;

use thiserror::Error;
use url::Url;

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("turtle syntax error on line {line}: {message}")]
pub struct TurtleError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Iri(String),
    Blank(String),
    Literal {
        value: String,
        datatype: Option<String>,
        lang: Option<String>,
    },
}

impl Term {
    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    /// IRI or literal lexical value; blank nodes have none.
    pub fn value(&self) -> Option<&str> {
        match self {
            Term::Iri(iri) => Some(iri),
            Term::Literal { value, .. } => Some(value),
            Term::Blank(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
}

/// Parsed document: a flat list of triples in document order.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    triples: Vec<Triple>,
}

impl Graph {
    /// Parse `input`, resolving relative IRIs against `base`.
    pub fn parse(input: &str, base: &str) -> Result<Self, TurtleError> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            base: Url::parse(base).ok(),
            prefixes: HashMap::new(),
            blank_counter: 0,
            triples: Vec::new(),
        };
        parser.document()?;
        Ok(Self {
            triples: parser.triples,
        })
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Objects of `(subject, predicate, ?)`.
    pub fn objects<'a>(
        &'a self,
        subject: &str,
        predicate: &str,
    ) -> impl Iterator<Item = &'a Term> {
        self.triples.iter().filter_map(move |t| match &t.subject {
            Term::Iri(s) if s == subject && t.predicate == predicate => Some(&t.object),
            _ => None,
        })
    }

    pub fn object(&self, subject: &str, predicate: &str) -> Option<&Term> {
        self.objects(subject, predicate).next()
    }

    /// IRI subjects declared with `a <type_iri>`.
    pub fn subjects_of_type<'a>(&'a self, type_iri: &str) -> impl Iterator<Item = &'a str> {
        self.triples.iter().filter_map(move |t| match (&t.subject, &t.object) {
            (Term::Iri(s), Term::Iri(o)) if t.predicate == RDF_TYPE && o == type_iri => {
                Some(s.as_str())
            }
            _ => None,
        })
    }
}

/// Escape `text` for use inside a double-quoted Turtle string.
pub fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

// -- Lexer --

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Iri(String),
    PName { prefix: String, local: String },
    Blank(String),
    Str(String),
    Lang(String),
    Datatype,
    Number { lexical: String, datatype: &'static str },
    Bool(bool),
    A,
    AtPrefix,
    AtBase,
    SparqlPrefix,
    SparqlBase,
    Punct(char),
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn err(&self, message: impl Into<String>) -> TurtleError {
        TurtleError {
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn tokenize(mut self) -> Result<Vec<(Tok, usize)>, TurtleError> {
        let mut out = Vec::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
                continue;
            }
            if c == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
                continue;
            }
            let line = self.line;
            let tok = match c {
                '<' => self.iri()?,
                '"' | '\'' => self.string(c)?,
                '@' => self.at_word()?,
                '^' => {
                    self.bump();
                    if self.bump() != Some('^') {
                        return Err(self.err("expected '^^'"));
                    }
                    Tok::Datatype
                }
                '_' if self.peek_at(1) == Some(':') => {
                    self.pos += 2;
                    Tok::Blank(self.name_chars())
                }
                ';' | ',' | '.' | '[' | ']' | '(' | ')' => {
                    self.bump();
                    Tok::Punct(c)
                }
                c if c.is_ascii_digit() || c == '+' || c == '-' => self.number()?,
                _ => self.word()?,
            };
            out.push((tok, line));
        }
        Ok(out)
    }

    fn iri(&mut self) -> Result<Tok, TurtleError> {
        self.bump();
        let mut iri = String::new();
        loop {
            match self.bump() {
                Some('>') => return Ok(Tok::Iri(iri)),
                Some('\\') => iri.push(self.unicode_escape()?),
                Some(c) if c == '\n' => return Err(self.err("newline inside IRI")),
                Some(c) => iri.push(c),
                None => return Err(self.err("unterminated IRI")),
            }
        }
    }

    fn unicode_escape(&mut self) -> Result<char, TurtleError> {
        let len = match self.bump() {
            Some('u') => 4,
            Some('U') => 8,
            _ => return Err(self.err("invalid escape")),
        };
        let mut hex = String::with_capacity(len);
        for _ in 0..len {
            hex.push(self.bump().ok_or_else(|| self.err("truncated escape"))?);
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.err(format!("invalid code point \\u{hex}")))
    }

    fn string(&mut self, quote: char) -> Result<Tok, TurtleError> {
        let long = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if long { 3 } else { 1 };
        let mut value = String::new();
        loop {
            let c = self.bump().ok_or_else(|| self.err("unterminated string"))?;
            match c {
                '\\' => {
                    let escaped = match self.peek() {
                        Some('u') | Some('U') => self.unicode_escape()?,
                        Some(e) => {
                            self.bump();
                            match e {
                                't' => '\t',
                                'b' => '\u{8}',
                                'n' => '\n',
                                'r' => '\r',
                                'f' => '\u{c}',
                                '"' | '\'' | '\\' => e,
                                _ => return Err(self.err(format!("invalid escape \\{e}"))),
                            }
                        }
                        None => return Err(self.err("unterminated string")),
                    };
                    value.push(escaped);
                }
                c if c == quote && !long => return Ok(Tok::Str(value)),
                c if c == quote && self.peek() == Some(quote) && self.peek_at(1) == Some(quote) => {
                    self.pos += 2;
                    return Ok(Tok::Str(value));
                }
                '\n' if !long => return Err(self.err("newline inside string")),
                c => value.push(c),
            }
        }
    }

    fn at_word(&mut self) -> Result<Tok, TurtleError> {
        self.bump();
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '-' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        match word.as_str() {
            "prefix" => Ok(Tok::AtPrefix),
            "base" => Ok(Tok::AtBase),
            "" => Err(self.err("empty language tag")),
            _ => Ok(Tok::Lang(word)),
        }
    }

    fn number(&mut self) -> Result<Tok, TurtleError> {
        let mut lexical = String::new();
        if let Some(sign @ ('+' | '-')) = self.peek() {
            lexical.push(sign);
            self.bump();
        }
        let mut datatype = "integer";
        let mut digits = 0;
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            lexical.push(c);
            digits += 1;
            self.bump();
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            datatype = "decimal";
            lexical.push('.');
            self.bump();
            while let Some(c) = self.peek().filter(char::is_ascii_digit) {
                lexical.push(c);
                digits += 1;
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            datatype = "double";
            lexical.push('e');
            self.bump();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                lexical.push(sign);
                self.bump();
            }
            while let Some(c) = self.peek().filter(char::is_ascii_digit) {
                lexical.push(c);
                self.bump();
            }
        }
        if digits == 0 {
            return Err(self.err("expected a number"));
        }
        Ok(Tok::Number { lexical, datatype })
    }

    fn name_chars(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '%') {
                name.push(c);
                self.bump();
            } else if c == '\\' {
                self.bump();
                if let Some(e) = self.bump() {
                    name.push(e);
                }
            } else {
                break;
            }
        }
        // a trailing '.' terminates the statement
        while name.ends_with('.') {
            name.pop();
            self.pos -= 1;
        }
        name
    }

    fn word(&mut self) -> Result<Tok, TurtleError> {
        let start = self.line;
        let word = self.name_chars();
        if word.is_empty() {
            let c = self.peek().unwrap_or(' ');
            return Err(TurtleError {
                line: start,
                message: format!("unexpected character {c:?}"),
            });
        }
        if let Some((prefix, local)) = word.split_once(':') {
            return Ok(Tok::PName {
                prefix: prefix.to_string(),
                local: local.to_string(),
            });
        }
        match word.as_str() {
            "a" => Ok(Tok::A),
            "true" => Ok(Tok::Bool(true)),
            "false" => Ok(Tok::Bool(false)),
            w if w.eq_ignore_ascii_case("prefix") => Ok(Tok::SparqlPrefix),
            w if w.eq_ignore_ascii_case("base") => Ok(Tok::SparqlBase),
            _ => Err(self.err(format!("unexpected word {word:?}"))),
        }
    }
}

// -- Parser --

struct Parser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
    base: Option<Url>,
    prefixes: HashMap<String, String>,
    blank_counter: usize,
    triples: Vec<Triple>,
}

impl Parser {
    fn err(&self, message: impl Into<String>) -> TurtleError {
        let line = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |(_, line)| *line);
        TurtleError {
            line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Result<Tok, TurtleError> {
        let tok = self
            .tokens
            .get(self.pos)
            .map(|(t, _)| t.clone())
            .ok_or_else(|| self.err("unexpected end of document"))?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, punct: char) -> Result<(), TurtleError> {
        match self.next()? {
            Tok::Punct(c) if c == punct => Ok(()),
            other => {
                self.pos -= 1;
                Err(self.err(format!("expected '{punct}', found {other:?}")))
            }
        }
    }

    fn eat(&mut self, punct: char) -> bool {
        if self.peek() == Some(&Tok::Punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn document(&mut self) -> Result<(), TurtleError> {
        while let Some(tok) = self.peek().cloned() {
            match tok {
                Tok::AtPrefix => {
                    self.pos += 1;
                    self.prefix_decl()?;
                    self.expect('.')?;
                }
                Tok::SparqlPrefix => {
                    self.pos += 1;
                    self.prefix_decl()?;
                }
                Tok::AtBase => {
                    self.pos += 1;
                    self.base_decl()?;
                    self.expect('.')?;
                }
                Tok::SparqlBase => {
                    self.pos += 1;
                    self.base_decl()?;
                }
                _ => {
                    self.triples_statement()?;
                    self.expect('.')?;
                }
            }
        }
        Ok(())
    }

    fn prefix_decl(&mut self) -> Result<(), TurtleError> {
        let prefix = match self.next()? {
            Tok::PName { prefix, local } if local.is_empty() => prefix,
            other => return Err(self.err(format!("expected prefix name, found {other:?}"))),
        };
        let iri = match self.next()? {
            Tok::Iri(raw) => self.resolve(&raw),
            other => return Err(self.err(format!("expected IRI, found {other:?}"))),
        };
        self.prefixes.insert(prefix, iri);
        Ok(())
    }

    fn base_decl(&mut self) -> Result<(), TurtleError> {
        match self.next()? {
            Tok::Iri(raw) => {
                let resolved = self.resolve(&raw);
                self.base = Url::parse(&resolved).ok();
                Ok(())
            }
            other => Err(self.err(format!("expected IRI, found {other:?}"))),
        }
    }

    fn resolve(&self, raw: &str) -> String {
        match &self.base {
            Some(base) => base.join(raw).map(String::from).unwrap_or_else(|_| raw.to_string()),
            None => raw.to_string(),
        }
    }

    fn expand(&self, prefix: &str, local: &str) -> Result<String, TurtleError> {
        self.prefixes
            .get(prefix)
            .map(|ns| format!("{ns}{local}"))
            .ok_or_else(|| self.err(format!("undeclared prefix {prefix:?}")))
    }

    fn fresh_blank(&mut self) -> Term {
        self.blank_counter += 1;
        Term::Blank(format!("b{}", self.blank_counter))
    }

    fn triples_statement(&mut self) -> Result<(), TurtleError> {
        if self.eat('[') {
            let subject = self.fresh_blank();
            if !self.eat(']') {
                self.predicate_object_list(&subject)?;
                self.expect(']')?;
            }
            // `[ ... ] .` is a complete statement on its own
            if self.peek() != Some(&Tok::Punct('.')) {
                self.predicate_object_list(&subject)?;
            }
            return Ok(());
        }
        let subject = match self.next()? {
            Tok::Iri(raw) => Term::Iri(self.resolve(&raw)),
            Tok::PName { prefix, local } => Term::Iri(self.expand(&prefix, &local)?),
            Tok::Blank(label) => Term::Blank(label),
            Tok::Punct('(') => return Err(self.err("collections are not supported")),
            other => return Err(self.err(format!("expected subject, found {other:?}"))),
        };
        self.predicate_object_list(&subject)
    }

    fn predicate_object_list(&mut self, subject: &Term) -> Result<(), TurtleError> {
        loop {
            let predicate = match self.next()? {
                Tok::A => RDF_TYPE.to_string(),
                Tok::Iri(raw) => self.resolve(&raw),
                Tok::PName { prefix, local } => self.expand(&prefix, &local)?,
                other => return Err(self.err(format!("expected predicate, found {other:?}"))),
            };
            loop {
                let object = self.object()?;
                self.triples.push(Triple {
                    subject: subject.clone(),
                    predicate: predicate.clone(),
                    object,
                });
                if !self.eat(',') {
                    break;
                }
            }
            if !self.eat(';') {
                return Ok(());
            }
            // repeated and trailing ';' are allowed
            while self.eat(';') {}
            if matches!(self.peek(), Some(Tok::Punct('.' | ']')) | None) {
                return Ok(());
            }
        }
    }

    fn object(&mut self) -> Result<Term, TurtleError> {
        match self.next()? {
            Tok::Iri(raw) => Ok(Term::Iri(self.resolve(&raw))),
            Tok::PName { prefix, local } => Ok(Term::Iri(self.expand(&prefix, &local)?)),
            Tok::Blank(label) => Ok(Term::Blank(label)),
            Tok::Punct('[') => {
                let node = self.fresh_blank();
                if !self.eat(']') {
                    self.predicate_object_list(&node)?;
                    self.expect(']')?;
                }
                Ok(node)
            }
            Tok::Punct('(') => Err(self.err("collections are not supported")),
            Tok::Number { lexical, datatype } => Ok(Term::Literal {
                value: lexical,
                datatype: Some(format!("{XSD}{datatype}")),
                lang: None,
            }),
            Tok::Bool(b) => Ok(Term::Literal {
                value: b.to_string(),
                datatype: Some(format!("{XSD}boolean")),
                lang: None,
            }),
            Tok::Str(value) => {
                let mut datatype = None;
                let mut lang = None;
                match self.peek() {
                    Some(Tok::Lang(_)) => {
                        if let Tok::Lang(tag) = self.next()? {
                            lang = Some(tag);
                        }
                    }
                    Some(Tok::Datatype) => {
                        self.pos += 1;
                        datatype = Some(match self.next()? {
                            Tok::Iri(raw) => self.resolve(&raw),
                            Tok::PName { prefix, local } => self.expand(&prefix, &local)?,
                            other => {
                                return Err(self.err(format!("expected datatype, found {other:?}")));
                            }
                        });
                    }
                    _ => {}
                }
                Ok(Term::Literal {
                    value,
                    datatype,
                    lang,
                })
            }
            other => Err(self.err(format!("expected object, found {other:?}"))),
        }
    }
}
