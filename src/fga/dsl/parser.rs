//! OpenFGA DSL to JSON schema translation
//!
//! The DSL is line oriented: `model`, `schema`, `type`, `relations` and
//! `define` each own a line, and `condition` blocks run until their closing
//! brace. Relation expressions are parsed with a small recursive-descent
//! parser over a per-line token stream.
//!
//! References (relations used in rewrites, types in `[...]` restrictions,
//! conditions after `with`) are collected while parsing and resolved once the
//! whole model is known, so relations may be used before they are defined.

use std::collections::HashMap;

use super::param_type_name;
use crate::fga::schema::{
    AuthorizationModel, Condition, ConditionParamType, Difference, Metadata, ObjectRelation,
    RelationMetadata, RelationReference, TupleToUserset, TypeDefinition, Userset, Usersets,
    Wildcard, SCHEMA_VERSION,
};
use crate::Error;

const KEYWORDS: &[&str] = &["or", "and", "but", "not", "from", "with"];

/// Parse DSL text into the JSON schema accepted by the OpenFGA API
pub fn parse(source: &str) -> Result<AuthorizationModel, Error> {
    let lines: Vec<&str> = source.lines().collect();
    let mut parser = ModelParser::new(&lines);
    parser.run()?;
    parser.resolve()?;
    Ok(parser.model)
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_identifier_char)
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_keyword(s: &str) -> bool {
    KEYWORDS.contains(&s)
}

/// 1-based column of a byte offset
fn column_at(line: &str, offset: usize) -> usize {
    line[..offset].chars().count() + 1
}

/// Byte offset of `inner`, which must be a subslice of `outer`
fn offset_in(outer: &str, inner: &str) -> usize {
    inner.as_ptr() as usize - outer.as_ptr() as usize
}

/// Cut a `#` comment; `#` only starts a comment at line start or after whitespace
fn strip_comment(line: &str) -> &str {
    let mut previous: Option<char> = None;
    for (i, c) in line.char_indices() {
        if c == '#' && previous.map_or(true, char::is_whitespace) {
            return &line[..i];
        }
        previous = Some(c);
    }
    line
}

/// First word and the remainder, both subslices of `s`
fn split_keyword(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim()),
        None => (s, &s[s.len()..]),
    }
}

/// A name used somewhere in the model, checked after parsing completes
enum Reference {
    Relation {
        type_index: usize,
        relation: String,
        line: usize,
        column: usize,
    },
    TupleToUserset {
        type_index: usize,
        tupleset: String,
        computed: String,
        line: usize,
        tupleset_column: usize,
        computed_column: usize,
    },
    DirectType {
        reference: RelationReference,
        line: usize,
        column: usize,
    },
}

struct ModelParser<'a> {
    lines: &'a [&'a str],
    model: AuthorizationModel,
    model_line: Option<usize>,
    seen_schema: bool,
    current_type: Option<usize>,
    in_relations: bool,
    references: Vec<Reference>,
}

impl<'a> ModelParser<'a> {
    fn new(lines: &'a [&'a str]) -> Self {
        Self {
            lines,
            model: AuthorizationModel {
                schema_version: SCHEMA_VERSION.to_string(),
                ..Default::default()
            },
            model_line: None,
            seen_schema: false,
            current_type: None,
            in_relations: false,
            references: Vec::new(),
        }
    }

    fn run(&mut self) -> Result<(), Error> {
        let mut idx = 0;
        while idx < self.lines.len() {
            let line_no = idx + 1;
            let code = strip_comment(self.lines[idx]);
            let trimmed = code.trim();
            if trimmed.is_empty() {
                idx += 1;
                continue;
            }
            let column = column_at(code, offset_in(code, trimmed));
            let (keyword, rest) = split_keyword(trimmed);

            match keyword {
                "model" => {
                    self.expect_bare(line_no, code, keyword, rest)?;
                    if self.model_line.is_some() {
                        return Err(Error::translation(
                            line_no,
                            column,
                            "duplicate 'model' declaration",
                        ));
                    }
                    self.model_line = Some(line_no);
                }
                "schema" => {
                    if self.model_line.is_none() {
                        return Err(Error::translation(
                            line_no,
                            column,
                            "expected 'model' before 'schema'",
                        ));
                    }
                    if self.seen_schema {
                        return Err(Error::translation(
                            line_no,
                            column,
                            "duplicate 'schema' declaration",
                        ));
                    }
                    if rest != SCHEMA_VERSION {
                        let rest_column = column_at(code, offset_in(code, rest));
                        return Err(Error::translation(
                            line_no,
                            rest_column,
                            format!("unsupported schema version '{rest}', expected {SCHEMA_VERSION}"),
                        ));
                    }
                    self.seen_schema = true;
                }
                "type" => {
                    self.expect_header(line_no, column)?;
                    self.parse_type(line_no, code, rest)?;
                }
                "relations" => {
                    self.expect_bare(line_no, code, keyword, rest)?;
                    if self.current_type.is_none() {
                        return Err(Error::translation(
                            line_no,
                            column,
                            "'relations' must follow a type declaration",
                        ));
                    }
                    self.in_relations = true;
                }
                "define" => {
                    if !self.in_relations {
                        return Err(Error::translation(
                            line_no,
                            column,
                            "'define' must appear inside a type's 'relations' block",
                        ));
                    }
                    self.parse_define(line_no, code, rest)?;
                }
                "condition" => {
                    self.expect_header(line_no, column)?;
                    idx = self.parse_condition(idx)?;
                    continue;
                }
                "module" | "extend" => {
                    return Err(Error::translation(
                        line_no,
                        column,
                        "modular models are not supported",
                    ));
                }
                other => {
                    return Err(Error::translation(
                        line_no,
                        column,
                        format!("unexpected '{other}'"),
                    ));
                }
            }
            idx += 1;
        }

        match self.model_line {
            None => Err(Error::translation(1, 1, "expected 'model' declaration")),
            Some(line) if !self.seen_schema => Err(Error::translation(
                line,
                1,
                format!("expected 'schema {SCHEMA_VERSION}' after 'model'"),
            )),
            Some(_) => Ok(()),
        }
    }

    fn expect_header(&self, line_no: usize, column: usize) -> Result<(), Error> {
        if self.model_line.is_none() || !self.seen_schema {
            return Err(Error::translation(
                line_no,
                column,
                format!("expected 'model' and 'schema {SCHEMA_VERSION}' first"),
            ));
        }
        Ok(())
    }

    fn expect_bare(
        &self,
        line_no: usize,
        code: &str,
        keyword: &str,
        rest: &str,
    ) -> Result<(), Error> {
        if rest.is_empty() {
            return Ok(());
        }
        Err(Error::translation(
            line_no,
            column_at(code, offset_in(code, rest)),
            format!("unexpected '{rest}' after '{keyword}'"),
        ))
    }

    fn parse_type(&mut self, line_no: usize, code: &str, name: &str) -> Result<(), Error> {
        let column = column_at(code, offset_in(code, name));
        if !is_identifier(name) {
            return Err(Error::translation(line_no, column, format!("invalid type name '{name}'")));
        }
        if self.model.type_definitions.iter().any(|t| t.type_name == name) {
            return Err(Error::translation(
                line_no,
                column,
                format!("type '{name}' is already defined"),
            ));
        }

        self.model.type_definitions.push(TypeDefinition {
            type_name: name.to_string(),
            ..Default::default()
        });
        self.current_type = Some(self.model.type_definitions.len() - 1);
        self.in_relations = false;
        Ok(())
    }

    fn parse_define(&mut self, line_no: usize, code: &str, rest: &str) -> Result<(), Error> {
        let Some(type_index) = self.current_type else {
            return Err(Error::internal("define without current type"));
        };
        let rest_offset = offset_in(code, rest);
        let Some(colon) = rest.find(':') else {
            return Err(Error::translation(
                line_no,
                column_at(code, code.len()),
                "expected ':' after relation name",
            ));
        };

        let raw_name = &rest[..colon];
        let name = raw_name.trim();
        let name_column = column_at(code, rest_offset);
        if !is_identifier(name) || is_keyword(name) {
            return Err(Error::translation(
                line_no,
                name_column,
                format!("invalid relation name '{name}'"),
            ));
        }
        let type_name = self.model.type_definitions[type_index].type_name.clone();
        if self.model.type_definitions[type_index].relations.contains_key(name) {
            return Err(Error::translation(
                line_no,
                name_column,
                format!("relation '{name}' is already defined on type '{type_name}'"),
            ));
        }

        let tokens = tokenize(line_no, code, rest_offset + colon + 1)?;
        let mut expr = ExprParser {
            tokens: &tokens,
            pos: 0,
            line: line_no,
            end_column: column_at(code, code.len()),
            type_index,
            direct: None,
            references: &mut self.references,
        };
        let rewrite = expr.parse_all()?;
        let direct = expr.direct.take().unwrap_or_default();

        let definition = &mut self.model.type_definitions[type_index];
        definition.relations.insert(name.to_string(), rewrite);
        definition
            .metadata
            .get_or_insert_with(Metadata::default)
            .relations
            .insert(
                name.to_string(),
                RelationMetadata {
                    directly_related_user_types: direct,
                },
            );
        Ok(())
    }

    /// Parse a condition block starting at line index `start`; returns the next line index
    fn parse_condition(&mut self, start: usize) -> Result<usize, Error> {
        let line_no = start + 1;
        let code = strip_comment(self.lines[start]);
        let header_offset = offset_in(code, code.trim_start()) + "condition".len();
        let header = &code[header_offset..];

        let Some(open) = header.find('(') else {
            return Err(Error::translation(
                line_no,
                column_at(code, code.len()),
                "expected '(' after condition name",
            ));
        };
        let name = header[..open].trim();
        let name_column = column_at(code, offset_in(code, header[..open].trim_start()));
        if !is_identifier(name) {
            return Err(Error::translation(
                line_no,
                name_column,
                format!("invalid condition name '{name}'"),
            ));
        }
        if self.model.conditions.contains_key(name) {
            return Err(Error::translation(
                line_no,
                name_column,
                format!("condition '{name}' is already defined"),
            ));
        }

        let params_offset = header_offset + open + 1;
        let Some(close) = code[params_offset..].find(')') else {
            return Err(Error::translation(
                line_no,
                column_at(code, code.len()),
                "expected ')' after condition parameters",
            ));
        };
        let params_text = &code[params_offset..params_offset + close];
        let parameters = parse_parameters(line_no, code, params_text)?;

        let after = code[params_offset + close + 1..].trim_start();
        if !after.starts_with('{') {
            return Err(Error::translation(
                line_no,
                column_at(code, offset_in(code, after)),
                "expected '{' to open the condition body",
            ));
        }

        let mut depth = 1usize;
        let mut body = String::new();
        let mut idx = start;
        let mut base = code;
        let mut segment = &after[1..];
        loop {
            if let Some(end) = find_closing(segment, &mut depth) {
                body.push_str(&segment[..end]);
                let trailing = segment[end + 1..].trim();
                if !trailing.is_empty() {
                    return Err(Error::translation(
                        idx + 1,
                        column_at(base, offset_in(base, trailing)),
                        "unexpected text after condition body",
                    ));
                }
                break;
            }
            body.push_str(segment);
            body.push('\n');
            idx += 1;
            if idx >= self.lines.len() {
                return Err(Error::translation(
                    line_no,
                    name_column,
                    format!("condition '{name}' is missing its closing '}}'"),
                ));
            }
            base = self.lines[idx];
            segment = base;
        }

        let expression = body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if expression.is_empty() {
            return Err(Error::translation(
                line_no,
                name_column,
                format!("condition '{name}' has an empty expression"),
            ));
        }

        self.model.conditions.insert(
            name.to_string(),
            Condition {
                name: name.to_string(),
                expression,
                parameters,
            },
        );
        self.current_type = None;
        self.in_relations = false;
        Ok(idx + 1)
    }

    fn resolve(&self) -> Result<(), Error> {
        let types: HashMap<&str, &TypeDefinition> = self
            .model
            .type_definitions
            .iter()
            .map(|t| (t.type_name.as_str(), t))
            .collect();

        for reference in &self.references {
            match reference {
                Reference::Relation {
                    type_index,
                    relation,
                    line,
                    column,
                } => {
                    let definition = &self.model.type_definitions[*type_index];
                    if !definition.relations.contains_key(relation) {
                        return Err(undefined_relation(*line, *column, relation, definition));
                    }
                }
                Reference::TupleToUserset {
                    type_index,
                    tupleset,
                    computed,
                    line,
                    tupleset_column,
                    computed_column,
                } => {
                    let definition = &self.model.type_definitions[*type_index];
                    if !definition.relations.contains_key(tupleset) {
                        return Err(undefined_relation(
                            *line,
                            *tupleset_column,
                            tupleset,
                            definition,
                        ));
                    }
                    let related = direct_types(definition, tupleset);
                    if related.is_empty()
                        || related
                            .iter()
                            .any(|r| r.relation.is_some() || r.wildcard.is_some())
                    {
                        return Err(Error::translation(
                            *line,
                            *tupleset_column,
                            format!("'{tupleset}' can only be used after 'from' if it is directly assignable to plain types"),
                        ));
                    }
                    let reachable = related.iter().any(|r| {
                        types
                            .get(r.type_name.as_str())
                            .is_some_and(|t| t.relations.contains_key(computed))
                    });
                    if !reachable {
                        return Err(Error::translation(
                            *line,
                            *computed_column,
                            format!("relation '{computed}' is not defined on any type related through '{tupleset}'"),
                        ));
                    }
                }
                Reference::DirectType {
                    reference,
                    line,
                    column,
                } => {
                    let Some(definition) = types.get(reference.type_name.as_str()) else {
                        return Err(Error::translation(
                            *line,
                            *column,
                            format!("type '{}' is not defined", reference.type_name),
                        ));
                    };
                    if let Some(relation) = &reference.relation {
                        if !definition.relations.contains_key(relation) {
                            return Err(undefined_relation(*line, *column, relation, definition));
                        }
                    }
                    if !reference.condition.is_empty()
                        && !self.model.conditions.contains_key(&reference.condition)
                    {
                        return Err(Error::translation(
                            *line,
                            *column,
                            format!("condition '{}' is not defined", reference.condition),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn undefined_relation(
    line: usize,
    column: usize,
    relation: &str,
    definition: &TypeDefinition,
) -> Error {
    Error::translation(
        line,
        column,
        format!(
            "relation '{relation}' is not defined on type '{}'",
            definition.type_name
        ),
    )
}

fn direct_types<'d>(definition: &'d TypeDefinition, relation: &str) -> &'d [RelationReference] {
    definition
        .metadata
        .as_ref()
        .and_then(|m| m.relations.get(relation))
        .map(|r| r.directly_related_user_types.as_slice())
        .unwrap_or_default()
}

/// Byte index of the brace closing the current block, tracking nesting in `depth`
fn find_closing(segment: &str, depth: &mut usize) -> Option<usize> {
    for (i, c) in segment.char_indices() {
        match c {
            '{' => *depth += 1,
            '}' => {
                *depth -= 1;
                if *depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_parameters(
    line_no: usize,
    code: &str,
    text: &str,
) -> Result<std::collections::BTreeMap<String, ConditionParamType>, Error> {
    let mut parameters = std::collections::BTreeMap::new();
    if text.trim().is_empty() {
        return Ok(parameters);
    }

    for part in text.split(',') {
        let column = column_at(code, offset_in(code, part.trim_start()));
        let Some((name, type_text)) = part.split_once(':') else {
            return Err(Error::translation(line_no, column, "expected 'name: type' parameter"));
        };
        let name = name.trim();
        if !is_identifier(name) {
            return Err(Error::translation(
                line_no,
                column,
                format!("invalid parameter name '{name}'"),
            ));
        }
        let type_text = type_text.trim();
        let Some(param_type) = parse_param_type(type_text) else {
            return Err(Error::translation(
                line_no,
                column,
                format!("unknown parameter type '{type_text}'"),
            ));
        };
        if parameters.insert(name.to_string(), param_type).is_some() {
            return Err(Error::translation(
                line_no,
                column,
                format!("duplicate parameter '{name}'"),
            ));
        }
    }
    Ok(parameters)
}

fn parse_param_type(text: &str) -> Option<ConditionParamType> {
    if let Some(open) = text.find('<') {
        let inner = text[open + 1..].strip_suffix('>')?;
        let outer = text[..open].trim();
        if outer != "map" && outer != "list" {
            return None;
        }
        return Some(ConditionParamType {
            type_name: param_type_name(outer)?.to_string(),
            generic_types: vec![parse_param_type(inner.trim())?],
        });
    }
    Some(ConditionParamType {
        type_name: param_type_name(text)?.to_string(),
        generic_types: Vec::new(),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tok<'a> {
    Ident(&'a str),
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Colon,
    Star,
    Hash,
}

impl std::fmt::Display for Tok<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tok::Ident(s) => write!(f, "'{s}'"),
            Tok::LBracket => write!(f, "'['"),
            Tok::RBracket => write!(f, "']'"),
            Tok::LParen => write!(f, "'('"),
            Tok::RParen => write!(f, "')'"),
            Tok::Comma => write!(f, "','"),
            Tok::Colon => write!(f, "':'"),
            Tok::Star => write!(f, "'*'"),
            Tok::Hash => write!(f, "'#'"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Token<'a> {
    tok: Tok<'a>,
    column: usize,
}

fn tokenize(line_no: usize, code: &str, start: usize) -> Result<Vec<Token<'_>>, Error> {
    let text = &code[start..];
    let base = column_at(code, start);
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        let column = base + text[..i].chars().count();
        let single = match c {
            '[' => Some(Tok::LBracket),
            ']' => Some(Tok::RBracket),
            '(' => Some(Tok::LParen),
            ')' => Some(Tok::RParen),
            ',' => Some(Tok::Comma),
            ':' => Some(Tok::Colon),
            '*' => Some(Tok::Star),
            '#' => Some(Tok::Hash),
            _ => None,
        };
        if let Some(tok) = single {
            chars.next();
            tokens.push(Token { tok, column });
            continue;
        }
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if !is_identifier_char(c) {
            return Err(Error::translation(line_no, column, format!("unexpected character '{c}'")));
        }

        let mut end = i;
        while let Some(&(j, d)) = chars.peek() {
            if !is_identifier_char(d) {
                break;
            }
            end = j + d.len_utf8();
            chars.next();
        }
        tokens.push(Token {
            tok: Tok::Ident(&text[i..end]),
            column,
        });
    }
    Ok(tokens)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operator {
    Or,
    And,
    ButNot,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operator::Or => write!(f, "or"),
            Operator::And => write!(f, "and"),
            Operator::ButNot => write!(f, "but not"),
        }
    }
}

struct ExprParser<'t, 'a, 'r> {
    tokens: &'t [Token<'a>],
    pos: usize,
    line: usize,
    end_column: usize,
    type_index: usize,
    direct: Option<Vec<RelationReference>>,
    references: &'r mut Vec<Reference>,
}

impl<'a> ExprParser<'_, 'a, '_> {
    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_is(&self, tok: Tok<'_>) -> bool {
        self.peek().is_some_and(|t| t.tok == tok)
    }

    fn error_at(&self, token: Option<Token<'_>>, msg: impl Into<String>) -> Error {
        let column = token.map(|t| t.column).unwrap_or(self.end_column);
        Error::translation(self.line, column, msg)
    }

    fn expect_identifier(&mut self, msg: &str) -> Result<(String, usize), Error> {
        match self.next() {
            Some(Token {
                tok: Tok::Ident(name),
                column,
            }) if !is_keyword(name) => Ok((name.to_string(), column)),
            token => Err(self.error_at(token, msg)),
        }
    }

    fn parse_all(&mut self) -> Result<Userset, Error> {
        let rewrite = self.parse_expr()?;
        if let Some(token) = self.peek() {
            return Err(self.error_at(Some(token), format!("unexpected {}", token.tok)));
        }
        Ok(rewrite)
    }

    fn parse_expr(&mut self) -> Result<Userset, Error> {
        let first = self.parse_operand()?;
        let mut rest = Vec::new();
        let mut operator: Option<Operator> = None;

        while let Some(token) = self.peek() {
            let op = match token.tok {
                Tok::Ident("or") => Operator::Or,
                Tok::Ident("and") => Operator::And,
                Tok::Ident("but") => Operator::ButNot,
                Tok::RParen => break,
                other => {
                    return Err(self.error_at(
                        Some(token),
                        format!("expected 'or', 'and' or 'but not', found {other}"),
                    ));
                }
            };
            self.pos += 1;
            if op == Operator::ButNot && self.next().map(|t| t.tok) != Some(Tok::Ident("not")) {
                return Err(self.error_at(Some(token), "expected 'not' after 'but'"));
            }
            if let Some(previous) = operator {
                if previous != op {
                    return Err(self.error_at(
                        Some(token),
                        format!("cannot mix '{previous}' and '{op}' without parentheses"),
                    ));
                }
            }
            operator = Some(op);
            rest.push(self.parse_operand()?);
        }

        Ok(match operator {
            None => first,
            Some(Operator::Or) => Userset::Union(Usersets {
                child: std::iter::once(first).chain(rest).collect(),
            }),
            Some(Operator::And) => Userset::Intersection(Usersets {
                child: std::iter::once(first).chain(rest).collect(),
            }),
            Some(Operator::ButNot) => rest.into_iter().fold(first, |base, subtract| {
                Userset::Difference(Difference {
                    base: Box::new(base),
                    subtract: Box::new(subtract),
                })
            }),
        })
    }

    fn parse_operand(&mut self) -> Result<Userset, Error> {
        let token = self.next();
        match token {
            Some(Token {
                tok: Tok::LParen, ..
            }) => {
                let inner = self.parse_expr()?;
                match self.next() {
                    Some(Token {
                        tok: Tok::RParen, ..
                    }) => Ok(inner),
                    other => Err(self.error_at(other, "expected ')'")),
                }
            }
            Some(Token {
                tok: Tok::LBracket, ..
            }) => {
                if self.direct.is_some() {
                    return Err(self.error_at(
                        token,
                        "type restrictions may only be declared once per relation",
                    ));
                }
                let types = self.parse_direct_types()?;
                self.direct = Some(types);
                Ok(Userset::This(Wildcard {}))
            }
            Some(Token {
                tok: Tok::Ident(name),
                column,
            }) if !is_keyword(name) => {
                if self.peek_is(Tok::Ident("from")) {
                    self.pos += 1;
                    let (tupleset, tupleset_column) =
                        self.expect_identifier("expected a relation after 'from'")?;
                    self.references.push(Reference::TupleToUserset {
                        type_index: self.type_index,
                        tupleset: tupleset.clone(),
                        computed: name.to_string(),
                        line: self.line,
                        tupleset_column,
                        computed_column: column,
                    });
                    Ok(Userset::TupleToUserset(TupleToUserset {
                        tupleset: ObjectRelation::relation(tupleset),
                        computed_userset: ObjectRelation::relation(name),
                    }))
                } else {
                    self.references.push(Reference::Relation {
                        type_index: self.type_index,
                        relation: name.to_string(),
                        line: self.line,
                        column,
                    });
                    Ok(Userset::ComputedUserset(ObjectRelation::relation(name)))
                }
            }
            _ => Err(self.error_at(token, "expected a relation, '[' or '('")),
        }
    }

    fn parse_direct_types(&mut self) -> Result<Vec<RelationReference>, Error> {
        let mut types: Vec<RelationReference> = Vec::new();
        loop {
            let (type_name, column) = self.expect_identifier("expected a type")?;
            let mut reference = RelationReference {
                type_name,
                ..Default::default()
            };

            if self.peek_is(Tok::Colon) {
                self.pos += 1;
                match self.next() {
                    Some(Token { tok: Tok::Star, .. }) => reference.wildcard = Some(Wildcard {}),
                    other => return Err(self.error_at(other, "expected '*' after ':'")),
                }
            } else if self.peek_is(Tok::Hash) {
                self.pos += 1;
                let (relation, _) = self.expect_identifier("expected a relation after '#'")?;
                reference.relation = Some(relation);
            }

            if self.peek_is(Tok::Ident("with")) {
                self.pos += 1;
                let (condition, _) = self.expect_identifier("expected a condition after 'with'")?;
                reference.condition = condition;
            }

            if types.contains(&reference) {
                return Err(Error::translation(self.line, column, "duplicate type restriction"));
            }
            self.references.push(Reference::DirectType {
                reference: reference.clone(),
                line: self.line,
                column,
            });
            types.push(reference);

            match self.next() {
                Some(Token {
                    tok: Tok::Comma, ..
                }) => continue,
                Some(Token {
                    tok: Tok::RBracket, ..
                }) => return Ok(types),
                other => return Err(self.error_at(other, "expected ',' or ']'")),
            }
        }
    }
}
