//! Interface Description Parser
//!
//! Parses the C header shipped next to a native library into an
//! [`Interface`]: the typed table of functions, records, enums and integer
//! constants a binding validates once at load time and answers lookups
//! from afterwards.
//!
//! Only the declaration subset used by shipped headers is understood:
//! prototypes, typedefs, structs/unions with C layout, enums, fixed arrays,
//! function pointers and integer `#define`s. Bit-fields and `long double`
//! are rejected.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use super::types::{CType, FfiSignature, FfiType};
use super::{NativeError, NativeResult};

/// Words that never change a declaration's meaning for binding purposes
const IGNORED_WORDS: &[&str] = &[
    "extern",
    "static",
    "inline",
    "__inline",
    "const",
    "volatile",
    "restrict",
    "__restrict",
    "register",
    "__cdecl",
    "__stdcall",
];

/// Largest object a value or record may span
pub const MAX_OBJECT_SIZE: usize = isize::MAX as usize;

const PRIMITIVE_WORDS: &[&str] = &[
    "void", "char", "short", "int", "long", "signed", "unsigned", "float", "double", "_Bool",
    "bool",
];

/// Memory layout of a declared struct or union
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub tag: String,
    pub fields: Vec<FieldLayout>,
    pub size: usize,
    pub align: usize,
    pub is_union: bool,
}

impl RecordLayout {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: CType,
    pub offset: usize,
}

/// The declared callable surface of a native library
#[derive(Debug, Clone, Default)]
pub struct Interface {
    typedefs: HashMap<String, CType>,
    /// `None` while only forward-declared
    records: HashMap<String, Option<RecordLayout>>,
    enums: HashSet<String>,
    constants: HashMap<String, i64>,
    functions: BTreeMap<String, FfiSignature>,
    anonymous: usize,
}

impl Interface {
    /// Parse a header's text
    pub fn parse(source: &str) -> NativeResult<Self> {
        let mut iface = Interface::default();
        let code = iface.collect_defines(&strip_comments(source));
        let tokens = tokenize(&code)?;
        let mut parser = Parser::new(tokens, Scope::Declare(&mut iface));
        parser.parse_translation_unit()?;
        Ok(iface)
    }

    pub fn function(&self, name: &str) -> Option<&FfiSignature> {
        self.functions.get(name)
    }

    /// Declared functions, ordered by name
    pub fn functions(&self) -> impl Iterator<Item = &FfiSignature> {
        self.functions.values()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Enum member or integer `#define`
    pub fn constant(&self, name: &str) -> Option<i64> {
        self.constants.get(name).copied()
    }

    /// Layout of a completed record
    pub fn record(&self, tag: &str) -> Option<&RecordLayout> {
        self.records.get(tag).and_then(Option::as_ref)
    }

    pub fn typedef(&self, name: &str) -> Option<&CType> {
        self.typedefs.get(name)
    }

    /// Resolve a C type name such as `"OrtValue*"`, `"int64_t[4]"` or
    /// `"struct tensor"` against this interface.
    pub fn resolve_type(&self, name: &str) -> NativeResult<CType> {
        let tokens = tokenize(name)?;
        let mut parser = Parser::new(tokens, Scope::Lookup(self));
        let base = parser.parse_base_type()?;
        let (declared, ty) = parser.parse_declarator(base)?;
        if let Some(declared) = declared {
            return Err(NativeError::binding(format!(
                "Unexpected identifier '{}' in type name '{}'",
                declared, name
            )));
        }
        if let Some(token) = parser.peek() {
            return Err(NativeError::binding(format!(
                "Unexpected '{}' in type name '{}'",
                token, name
            )));
        }
        Ok(ty)
    }

    /// Size in bytes, `None` for `void`, incomplete records and arrays
    /// larger than [`MAX_OBJECT_SIZE`]
    pub fn size_of(&self, ty: &CType) -> Option<usize> {
        match ty {
            CType::Void => None,
            CType::Scalar(t) => Some(t.size()),
            CType::Pointer(_) | CType::Function => Some(std::mem::size_of::<usize>()),
            CType::Array(elem, len) => self
                .size_of(elem)?
                .checked_mul(*len)
                .filter(|&size| size <= MAX_OBJECT_SIZE),
            CType::Record(tag) => self.record(tag).map(|r| r.size),
            CType::Enum(_) => Some(4),
        }
    }

    pub fn align_of(&self, ty: &CType) -> Option<usize> {
        match ty {
            CType::Void => None,
            CType::Scalar(t) => Some(t.size()),
            CType::Pointer(_) | CType::Function => Some(std::mem::align_of::<usize>()),
            CType::Array(elem, _) => self.align_of(elem),
            CType::Record(tag) => self.record(tag).map(|r| r.align),
            CType::Enum(_) => Some(4),
        }
    }

    /// Record integer `#define`s and return the remaining, non-preprocessor
    /// source.
    fn collect_defines(&mut self, source: &str) -> String {
        let mut code = String::with_capacity(source.len());
        let mut lines = source.lines();
        while let Some(line) = lines.next() {
            if !line.trim_start().starts_with('#') {
                code.push_str(line);
                code.push('\n');
                continue;
            }

            let mut directive = line.trim().to_string();
            while directive.ends_with('\\') {
                directive.pop();
                match lines.next() {
                    Some(next) => directive.push_str(next),
                    None => break,
                }
            }

            let Some(rest) = directive[1..].trim_start().strip_prefix("define") else {
                continue;
            };
            let rest = rest.trim_start();
            let name_len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            let (name, body) = rest.split_at(name_len);
            // Function-like macros and valueless guards carry no constant
            if name.is_empty() || body.starts_with('(') || body.trim().is_empty() {
                continue;
            }
            if let Some(value) = self.eval_define(body) {
                self.constants.insert(name.to_string(), value);
            }
        }
        code
    }

    fn eval_define(&self, body: &str) -> Option<i64> {
        let tokens = tokenize(body).ok()?;
        let mut parser = Parser::new(tokens, Scope::Lookup(self));
        let value = parser.parse_const_expr().ok()?;
        parser.peek().is_none().then_some(value)
    }

    fn next_anonymous_tag(&mut self) -> String {
        let tag = format!("__anon_{}", self.anonymous);
        self.anonymous += 1;
        tag
    }

    fn layout_record(
        &self,
        tag: String,
        fields: Vec<(String, CType)>,
        is_union: bool,
    ) -> NativeResult<RecordLayout> {
        let mut layouts = Vec::with_capacity(fields.len());
        let mut offset = 0usize;
        let mut size = 0usize;
        let mut align = 1usize;

        for (name, ty) in fields {
            let (Some(field_size), Some(field_align)) = (self.size_of(&ty), self.align_of(&ty))
            else {
                return Err(NativeError::binding(format!(
                    "Field '{}' of '{}' has incomplete type {}",
                    name, tag, ty
                )));
            };
            align = align.max(field_align);
            let field_offset = if is_union {
                0
            } else {
                align_up(offset, field_align).ok_or_else(|| too_large(&tag))?
            };
            offset = field_offset
                .checked_add(field_size)
                .filter(|&end| end <= MAX_OBJECT_SIZE)
                .ok_or_else(|| too_large(&tag))?;
            size = size.max(offset);
            layouts.push(FieldLayout {
                name,
                ty,
                offset: field_offset,
            });
        }

        let size = align_up(size, align).ok_or_else(|| too_large(&tag))?;
        Ok(RecordLayout {
            tag,
            fields: layouts,
            size,
            align,
            is_union,
        })
    }
}

fn align_up(value: usize, align: usize) -> Option<usize> {
    value
        .checked_next_multiple_of(align)
        .filter(|&aligned| aligned <= MAX_OBJECT_SIZE)
}

fn too_large(tag: &str) -> NativeError {
    NativeError::binding(format!("Record '{}' is too large", tag))
}

// =============================================================================
// Lexing
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Number(i64),
    Str(String),
    Punct(char),
    Shl,
    Shr,
    Ellipsis,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{}", s),
            Token::Number(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Punct(c) => write!(f, "{}", c),
            Token::Shl => write!(f, "<<"),
            Token::Shr => write!(f, ">>"),
            Token::Ellipsis => write!(f, "..."),
        }
    }
}

/// Replace comments with a single space, leaving string literals intact
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                out.push(c);
                while let Some(s) = chars.next() {
                    out.push(s);
                    if s == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if s == '"' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for s in chars.by_ref() {
                    if s == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for s in chars.by_ref() {
                    if s == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && s == '/' {
                        break;
                    }
                    prev = s;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

fn tokenize(source: &str) -> NativeResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = parse_int_literal(&text).ok_or_else(|| {
                NativeError::binding(format!("Unsupported numeric literal '{}'", text))
            })?;
            tokens.push(Token::Number(value));
        } else if c == '"' {
            let start = i + 1;
            i += 1;
            while i < chars.len() && chars[i] != '"' {
                if chars[i] == '\\' {
                    i += 1;
                }
                i += 1;
            }
            tokens.push(Token::Str(chars[start..i.min(chars.len())].iter().collect()));
            i += 1;
        } else if source_has(&chars, i, "...") {
            tokens.push(Token::Ellipsis);
            i += 3;
        } else if source_has(&chars, i, "<<") {
            tokens.push(Token::Shl);
            i += 2;
        } else if source_has(&chars, i, ">>") {
            tokens.push(Token::Shr);
            i += 2;
        } else if "{}()[];,*=:-+~|&/".contains(c) {
            tokens.push(Token::Punct(c));
            i += 1;
        } else {
            return Err(NativeError::binding(format!(
                "Unexpected character '{}' in interface description",
                c
            )));
        }
    }

    Ok(tokens)
}

fn source_has(chars: &[char], at: usize, pattern: &str) -> bool {
    pattern
        .chars()
        .enumerate()
        .all(|(k, p)| chars.get(at + k) == Some(&p))
}

/// Decimal, hex and octal literals with optional `u`/`l` suffixes
fn parse_int_literal(text: &str) -> Option<i64> {
    let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let value = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()? as i64
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8).ok()? as i64
    } else {
        digits.parse::<u64>().ok()? as i64
    };
    Some(value)
}

// =============================================================================
// Parsing
// =============================================================================

/// Whether the parser may add declarations
enum Scope<'a> {
    Declare(&'a mut Interface),
    Lookup(&'a Interface),
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    scope: Scope<'a>,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Token>, scope: Scope<'a>) -> Self {
        Self {
            tokens,
            pos: 0,
            scope,
        }
    }

    fn iface(&self) -> &Interface {
        match &self.scope {
            Scope::Declare(iface) => &**iface,
            Scope::Lookup(iface) => *iface,
        }
    }

    fn iface_mut(&mut self) -> NativeResult<&mut Interface> {
        match &mut self.scope {
            Scope::Declare(iface) => Ok(&mut **iface),
            Scope::Lookup(_) => Err(NativeError::binding(
                "Type names cannot declare new types",
            )),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn at_punct(&self, c: char) -> bool {
        self.peek() == Some(&Token::Punct(c))
    }

    fn at_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn expect_punct(&mut self, c: char) -> NativeResult<()> {
        match self.bump() {
            Some(Token::Punct(p)) if p == c => Ok(()),
            Some(other) => Err(NativeError::binding(format!(
                "Expected '{}', found '{}'",
                c, other
            ))),
            None => Err(NativeError::binding(format!(
                "Expected '{}', found end of input",
                c
            ))),
        }
    }

    fn expect_ident(&mut self) -> NativeResult<String> {
        match self.bump() {
            Some(Token::Ident(name)) => Ok(name),
            Some(other) => Err(NativeError::binding(format!(
                "Expected identifier, found '{}'",
                other
            ))),
            None => Err(NativeError::binding("Expected identifier, found end of input")),
        }
    }

    /// Skip a balanced `( ... )` group starting at the current token
    fn skip_group(&mut self) -> NativeResult<()> {
        self.expect_punct('(')?;
        let mut depth = 1;
        while depth > 0 {
            match self.bump() {
                Some(Token::Punct('(')) => depth += 1,
                Some(Token::Punct(')')) => depth -= 1,
                Some(_) => {}
                None => return Err(NativeError::binding("Unbalanced parentheses")),
            }
        }
        Ok(())
    }

    /// Skip qualifiers and compiler attributes
    fn skip_ignored(&mut self) -> NativeResult<()> {
        loop {
            match self.peek() {
                Some(Token::Ident(w)) if IGNORED_WORDS.contains(&w.as_str()) => {
                    self.pos += 1;
                }
                Some(Token::Ident(w)) if w == "__attribute__" || w == "__declspec" => {
                    self.pos += 1;
                    self.skip_group()?;
                }
                _ => return Ok(()),
            }
        }
    }

    fn parse_translation_unit(&mut self) -> NativeResult<()> {
        while let Some(token) = self.peek() {
            match token {
                Token::Punct(';') | Token::Punct('}') => {
                    self.pos += 1;
                }
                // extern "C" { ... }
                Token::Ident(w) if w == "extern" && matches!(self.peek_at(1), Some(Token::Str(_))) => {
                    self.pos += 2;
                    if self.at_punct('{') {
                        self.pos += 1;
                    }
                }
                Token::Ident(w) if w == "typedef" => {
                    self.pos += 1;
                    self.parse_typedef()?;
                }
                _ => self.parse_declaration()?,
            }
        }
        Ok(())
    }

    fn parse_typedef(&mut self) -> NativeResult<()> {
        let base = self.parse_base_type()?;
        loop {
            let (name, mut ty) = self.parse_declarator(base.clone())?;
            if self.at_punct('(') {
                self.skip_group()?;
                ty = CType::Function;
            }
            let name = name.ok_or_else(|| NativeError::binding("Typedef without a name"))?;
            self.iface_mut()?.typedefs.insert(name, ty);

            if self.at_punct(',') {
                self.pos += 1;
                continue;
            }
            self.skip_ignored()?;
            return self.expect_punct(';');
        }
    }

    fn parse_declaration(&mut self) -> NativeResult<()> {
        let base = self.parse_base_type()?;
        if self.at_punct(';') {
            self.pos += 1;
            return Ok(());
        }

        loop {
            let (name, ty) = self.parse_declarator(base.clone())?;
            if self.at_punct('(') {
                let name = name.ok_or_else(|| NativeError::binding("Function without a name"))?;
                let (params, variadic) = self.parse_params()?;
                let signature = FfiSignature {
                    name: name.clone(),
                    params,
                    return_type: ty,
                    variadic,
                };
                self.iface_mut()?.functions.insert(name, signature);
            }
            // Global variables are not part of the callable surface

            self.skip_ignored()?;
            if self.at_punct(',') {
                self.pos += 1;
                continue;
            }
            return self.expect_punct(';');
        }
    }

    fn parse_params(&mut self) -> NativeResult<(Vec<CType>, bool)> {
        self.expect_punct('(')?;
        let mut params = Vec::new();
        let mut variadic = false;

        if self.at_punct(')') {
            self.pos += 1;
            return Ok((params, variadic));
        }
        if self.at_word("void") && self.peek_at(1) == Some(&Token::Punct(')')) {
            self.pos += 2;
            return Ok((params, variadic));
        }

        loop {
            if self.peek() == Some(&Token::Ellipsis) {
                self.pos += 1;
                variadic = true;
            } else {
                let base = self.parse_base_type()?;
                let (_, ty) = self.parse_declarator(base)?;
                // Array parameters decay to pointers
                let ty = match ty {
                    CType::Array(elem, _) => CType::Pointer(elem),
                    other => other,
                };
                params.push(ty);
            }

            match self.bump() {
                Some(Token::Punct(',')) => continue,
                Some(Token::Punct(')')) => return Ok((params, variadic)),
                Some(other) => {
                    return Err(NativeError::binding(format!(
                        "Expected ',' or ')' in parameter list, found '{}'",
                        other
                    )))
                }
                None => return Err(NativeError::binding("Unterminated parameter list")),
            }
        }
    }

    fn parse_base_type(&mut self) -> NativeResult<CType> {
        let mut words: Vec<String> = Vec::new();

        loop {
            self.skip_ignored()?;
            let Some(Token::Ident(word)) = self.peek().cloned() else {
                break;
            };

            if PRIMITIVE_WORDS.contains(&word.as_str()) {
                self.pos += 1;
                words.push(word);
                continue;
            }
            if !words.is_empty() {
                break;
            }

            match word.as_str() {
                "struct" | "union" => {
                    self.pos += 1;
                    let ty = self.parse_record(word == "union")?;
                    self.skip_ignored()?;
                    return Ok(ty);
                }
                "enum" => {
                    self.pos += 1;
                    let ty = self.parse_enum()?;
                    self.skip_ignored()?;
                    return Ok(ty);
                }
                _ => {}
            }

            if let Some(scalar) = FfiType::from_str(&word) {
                self.pos += 1;
                self.skip_ignored()?;
                return Ok(CType::Scalar(scalar));
            }
            if let Some(ty) = self.iface().typedefs.get(&word).cloned() {
                self.pos += 1;
                self.skip_ignored()?;
                return Ok(ty);
            }
            return Err(NativeError::binding(format!("Unknown type '{}'", word)));
        }

        if words.is_empty() {
            return Err(NativeError::binding(match self.peek() {
                Some(token) => format!("Expected type, found '{}'", token),
                None => "Expected type, found end of input".to_string(),
            }));
        }
        primitive_type(&words)
    }

    fn parse_record(&mut self, is_union: bool) -> NativeResult<CType> {
        let tag = match self.peek() {
            Some(Token::Ident(_)) => Some(self.expect_ident()?),
            _ => None,
        };

        if !self.at_punct('{') {
            let tag = tag.ok_or_else(|| NativeError::binding("Anonymous record without a body"))?;
            match &mut self.scope {
                Scope::Declare(iface) => {
                    iface.records.entry(tag.clone()).or_insert(None);
                }
                Scope::Lookup(iface) => {
                    if !iface.records.contains_key(&tag) {
                        return Err(NativeError::binding(format!("Unknown type 'struct {}'", tag)));
                    }
                }
            }
            return Ok(CType::Record(tag));
        }

        let tag = match tag {
            Some(tag) => tag,
            None => self.iface_mut()?.next_anonymous_tag(),
        };
        self.iface_mut()?.records.entry(tag.clone()).or_insert(None);

        self.expect_punct('{')?;
        let mut fields = Vec::new();
        while !self.at_punct('}') {
            let base = self.parse_base_type()?;
            loop {
                let (name, ty) = self.parse_declarator(base.clone())?;
                if self.at_punct(':') {
                    return Err(NativeError::binding(format!(
                        "Bit-fields are not supported (in '{}')",
                        tag
                    )));
                }
                let name = name.ok_or_else(|| {
                    NativeError::binding(format!("Unnamed field in '{}'", tag))
                })?;
                fields.push((name, ty));
                if self.at_punct(',') {
                    self.pos += 1;
                    continue;
                }
                self.expect_punct(';')?;
                break;
            }
        }
        self.expect_punct('}')?;

        let layout = self.iface().layout_record(tag.clone(), fields, is_union)?;
        self.iface_mut()?.records.insert(tag.clone(), Some(layout));
        Ok(CType::Record(tag))
    }

    fn parse_enum(&mut self) -> NativeResult<CType> {
        let tag = match self.peek() {
            Some(Token::Ident(_)) => Some(self.expect_ident()?),
            _ => None,
        };

        if !self.at_punct('{') {
            let tag = tag.ok_or_else(|| NativeError::binding("Anonymous enum without a body"))?;
            if let Scope::Lookup(iface) = &self.scope {
                if !iface.enums.contains(&tag) {
                    return Err(NativeError::binding(format!("Unknown type 'enum {}'", tag)));
                }
            }
            return Ok(CType::Enum(tag));
        }

        let tag = match tag {
            Some(tag) => tag,
            None => self.iface_mut()?.next_anonymous_tag(),
        };

        self.expect_punct('{')?;
        let mut next = 0i64;
        while !self.at_punct('}') {
            let name = self.expect_ident()?;
            if self.at_punct('=') {
                self.pos += 1;
                next = self.parse_const_expr()?;
            }
            self.iface_mut()?.constants.insert(name, next);
            next = next.wrapping_add(1);
            if self.at_punct(',') {
                self.pos += 1;
            } else if !self.at_punct('}') {
                return Err(NativeError::binding(format!(
                    "Expected ',' or '}}' in enum '{}'",
                    tag
                )));
            }
        }
        self.expect_punct('}')?;

        self.iface_mut()?.enums.insert(tag.clone());
        Ok(CType::Enum(tag))
    }

    /// Pointer stars, optional name, array dimensions and the
    /// `(*name)(params)` function pointer form.
    fn parse_declarator(&mut self, base: CType) -> NativeResult<(Option<String>, CType)> {
        let mut ty = base;
        self.skip_ignored()?;
        while self.at_punct('*') {
            self.pos += 1;
            ty = ty.pointer_to();
            self.skip_ignored()?;
        }

        if self.at_punct('(') && self.peek_at(1) == Some(&Token::Punct('*')) {
            self.pos += 2;
            self.skip_ignored()?;
            let name = match self.peek() {
                Some(Token::Ident(_)) => Some(self.expect_ident()?),
                _ => None,
            };
            self.expect_punct(')')?;
            self.skip_group()?;
            return Ok((name, CType::Function));
        }

        let name = match self.peek() {
            Some(Token::Ident(_)) => Some(self.expect_ident()?),
            _ => None,
        };

        let mut dims = Vec::new();
        while self.at_punct('[') {
            self.pos += 1;
            if self.at_punct(']') {
                self.pos += 1;
                dims.push(0);
                continue;
            }
            let len = self.parse_const_expr()?;
            let len = usize::try_from(len)
                .map_err(|_| NativeError::binding(format!("Negative array length {}", len)))?;
            if len > MAX_OBJECT_SIZE {
                return Err(NativeError::binding(format!("Array length {} is too large", len)));
            }
            dims.push(len);
            self.expect_punct(']')?;
        }
        for len in dims.into_iter().rev() {
            ty = CType::Array(Box::new(ty), len);
        }

        Ok((name, ty))
    }

    // Constant expressions: | & << >> + - * / with C precedence

    fn parse_const_expr(&mut self) -> NativeResult<i64> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, min_prec: u8) -> NativeResult<i64> {
        let mut lhs = self.parse_unary()?;
        loop {
            let (prec, op) = match self.peek() {
                Some(Token::Punct('|')) => (1, '|'),
                Some(Token::Punct('&')) => (2, '&'),
                Some(Token::Shl) => (3, '<'),
                Some(Token::Shr) => (3, '>'),
                Some(Token::Punct('+')) => (4, '+'),
                Some(Token::Punct('-')) => (4, '-'),
                Some(Token::Punct('*')) => (5, '*'),
                Some(Token::Punct('/')) => (5, '/'),
                _ => return Ok(lhs),
            };
            if prec < min_prec {
                return Ok(lhs);
            }
            self.pos += 1;
            let rhs = self.parse_binary(prec + 1)?;
            lhs = match op {
                '|' => lhs | rhs,
                '&' => lhs & rhs,
                '<' => lhs.wrapping_shl(rhs as u32),
                '>' => lhs.wrapping_shr(rhs as u32),
                '+' => lhs.wrapping_add(rhs),
                '-' => lhs.wrapping_sub(rhs),
                '*' => lhs.wrapping_mul(rhs),
                _ => {
                    if rhs == 0 {
                        return Err(NativeError::binding("Division by zero in constant"));
                    }
                    lhs.wrapping_div(rhs)
                }
            };
        }
    }

    fn parse_unary(&mut self) -> NativeResult<i64> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Punct('-')) => Ok(self.parse_unary()?.wrapping_neg()),
            Some(Token::Punct('+')) => self.parse_unary(),
            Some(Token::Punct('~')) => Ok(!self.parse_unary()?),
            Some(Token::Punct('(')) => {
                let value = self.parse_const_expr()?;
                self.expect_punct(')')?;
                Ok(value)
            }
            Some(Token::Ident(name)) => self.iface().constant(&name).ok_or_else(|| {
                NativeError::binding(format!("Unknown constant '{}' in expression", name))
            }),
            Some(other) => Err(NativeError::binding(format!(
                "Unexpected '{}' in constant expression",
                other
            ))),
            None => Err(NativeError::binding("Unexpected end of constant expression")),
        }
    }
}

/// Combine C primitive keywords (`unsigned long long`, `signed char`, ...)
fn primitive_type(words: &[String]) -> NativeResult<CType> {
    let has = |w: &str| words.iter().any(|x| x == w);
    let longs = words.iter().filter(|w| *w == "long").count();
    let unsigned = has("unsigned");

    let ty = if has("void") {
        CType::Void
    } else if has("_Bool") || has("bool") {
        CType::Scalar(FfiType::Bool)
    } else if has("float") {
        CType::Scalar(FfiType::F32)
    } else if has("double") {
        if longs > 0 {
            return Err(NativeError::binding("'long double' is not supported"));
        }
        CType::Scalar(FfiType::F64)
    } else if has("char") {
        CType::Scalar(if unsigned {
            FfiType::U8
        } else if has("signed") {
            FfiType::I8
        } else {
            FfiType::Char
        })
    } else if has("short") {
        CType::Scalar(if unsigned { FfiType::U16 } else { FfiType::I16 })
    } else if longs >= 2 || (longs == 1 && std::mem::size_of::<libc::c_long>() == 8) {
        CType::Scalar(if unsigned { FfiType::U64 } else { FfiType::I64 })
    } else {
        CType::Scalar(if unsigned { FfiType::U32 } else { FfiType::I32 })
    };
    Ok(ty)
}
