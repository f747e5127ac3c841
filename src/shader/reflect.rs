// src/shader/reflect.rs
//! Program introspection over preprocessed WGSL.
//!
//! Parses `struct` declarations and `@group(g) @binding(b) var ...`
//! declarations, then computes uniform-address-space layouts using WGSL's
//! alignment and size rules. The material system reads the `material`
//! block from here to size and fill its GPU uniform buffer; both device
//! backends use the binding list to resolve draw resources by name.

use std::collections::BTreeMap;

use glam::Mat4;
use thiserror::Error;

use crate::gpu::UniformValue;
use crate::shader::ShaderStage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReflectError {
    #[error("unexpected end of source while parsing {context}")]
    UnexpectedEnd { context: &'static str },
    #[error("expected {expected} but found `{found}`")]
    Unexpected { expected: &'static str, found: String },
    #[error("unknown type `{0}`")]
    UnknownType(String),
}

// ----------------------------------------------------------------------------
// Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    F32,
    I32,
    U32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Scalar(ScalarKind),
    Vector(u8, ScalarKind),
    /// Columns × rows of `f32`.
    Matrix(u8, u8),
    /// Element type and length; `None` for runtime-sized arrays.
    Array(Box<FieldType>, Option<u32>),
    Struct(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: FieldType,
    pub offset: u32,
    pub size: u32,
}

/// Byte layout of a uniform block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockLayout {
    pub type_name: String,
    pub size: u32,
    pub fields: Vec<FieldLayout>,
}

impl BlockLayout {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Pack values looked up by field name. Missing or mismatched fields stay zeroed.
    pub fn pack<F>(&self, mut lookup: F) -> Vec<u8>
    where
        F: FnMut(&str) -> Option<UniformValue>,
    {
        let mut bytes = vec![0u8; self.size as usize];
        for field in &self.fields {
            let Some(value) = lookup(&field.name) else { continue };
            let at = field.offset as usize;
            if !write_value(&mut bytes[at..at + field.size as usize], &field.ty, value) {
                log::debug!(
                    "uniform {}.{} ignores a value of the wrong type ({:?})",
                    self.type_name,
                    field.name,
                    value
                );
            }
        }
        bytes
    }
}

fn write_value(dst: &mut [u8], ty: &FieldType, value: UniformValue) -> bool {
    fn put(dst: &mut [u8], src: &[f32]) {
        dst[..src.len() * 4].copy_from_slice(bytemuck::cast_slice(src));
    }
    match (ty, value) {
        (FieldType::Scalar(ScalarKind::F32), UniformValue::Float(v)) => put(dst, &[v]),
        (FieldType::Scalar(ScalarKind::I32), UniformValue::Int(v)) => {
            dst[..4].copy_from_slice(&v.to_ne_bytes())
        }
        (FieldType::Scalar(ScalarKind::U32), UniformValue::UInt(v)) => {
            dst[..4].copy_from_slice(&v.to_ne_bytes())
        }
        (FieldType::Vector(2, ScalarKind::F32), UniformValue::Vec2(v)) => put(dst, &v.to_array()),
        (FieldType::Vector(3, ScalarKind::F32), UniformValue::Vec3(v)) => put(dst, &v.to_array()),
        (FieldType::Vector(3, ScalarKind::F32), UniformValue::Vec4(v)) => {
            put(dst, &v.truncate().to_array())
        }
        (FieldType::Vector(4, ScalarKind::F32), UniformValue::Vec4(v)) => put(dst, &v.to_array()),
        (FieldType::Matrix(4, 4), UniformValue::Mat4(m)) => put(dst, &m.to_cols_array()),
        (FieldType::Matrix(3, 3), UniformValue::Mat4(m)) => {
            // mat3x3 columns are padded to 16 bytes.
            let cols = Mat4::to_cols_array_2d(&m);
            for (i, col) in cols.iter().take(3).enumerate() {
                put(&mut dst[i * 16..], &col[..3]);
            }
        }
        _ => return false,
    }
    true
}

// ----------------------------------------------------------------------------
// Bindings
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingKind {
    Uniform { type_name: String },
    Storage { read_only: bool },
    Texture,
    DepthTexture,
    Sampler,
    ComparisonSampler,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBinding {
    pub group: u32,
    pub binding: u32,
    pub name: String,
    pub kind: BindingKind,
    pub vertex: bool,
    pub fragment: bool,
}

/// Everything a backend needs to bind a program's resources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramReflection {
    /// Sorted by (group, binding).
    pub bindings: Vec<ResourceBinding>,
    /// Uniform block layouts keyed by variable name.
    pub blocks: BTreeMap<String, BlockLayout>,
}

impl ProgramReflection {
    pub fn block(&self, name: &str) -> Option<&BlockLayout> {
        self.blocks.get(name)
    }

    pub fn binding(&self, name: &str) -> Option<&ResourceBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    pub fn textures(&self) -> impl Iterator<Item = &ResourceBinding> {
        self.bindings
            .iter()
            .filter(|b| matches!(b.kind, BindingKind::Texture | BindingKind::DepthTexture))
    }

    /// Highest bind group used, if any.
    pub fn max_group(&self) -> Option<u32> {
        self.bindings.iter().map(|b| b.group).max()
    }

    /// Combine the reflections of the vertex and fragment stage.
    pub fn merge(mut self, other: ProgramReflection) -> ProgramReflection {
        for binding in other.bindings {
            match self
                .bindings
                .iter_mut()
                .find(|b| b.group == binding.group && b.binding == binding.binding)
            {
                Some(existing) => {
                    existing.vertex |= binding.vertex;
                    existing.fragment |= binding.fragment;
                }
                None => self.bindings.push(binding),
            }
        }
        for (name, block) in other.blocks {
            self.blocks.entry(name).or_insert(block);
        }
        self.bindings.sort_by_key(|b| (b.group, b.binding));
        self
    }
}

// ----------------------------------------------------------------------------
// Lexer
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Punct(char),
}

fn tokenize(source: &str) -> Vec<Token> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
        } else if source[i..].starts_with("//") {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
        } else if source[i..].starts_with("/*") {
            match source[i + 2..].find("*/") {
                Some(end) => i += end + 4,
                None => i = bytes.len(),
            }
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(Token::Ident(source[start..i].to_string()));
        } else if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                i += 1;
            }
            tokens.push(Token::Number(source[start..i].to_string()));
        } else {
            let ch = source[i..].chars().next().unwrap_or(' ');
            tokens.push(Token::Punct(ch));
            i += ch.len_utf8();
        }
    }
    tokens
}

struct Cursor<'t> {
    tokens: &'t [Token],
    at: usize,
}

impl<'t> Cursor<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.at)
    }

    fn next(&mut self, context: &'static str) -> Result<&'t Token, ReflectError> {
        let token = self
            .tokens
            .get(self.at)
            .ok_or(ReflectError::UnexpectedEnd { context })?;
        self.at += 1;
        Ok(token)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char, expected: &'static str) -> Result<(), ReflectError> {
        match self.next(expected)? {
            Token::Punct(p) if *p == c => Ok(()),
            other => Err(unexpected(expected, other)),
        }
    }

    fn ident(&mut self, expected: &'static str) -> Result<&'t str, ReflectError> {
        match self.next(expected)? {
            Token::Ident(name) => Ok(name),
            other => Err(unexpected(expected, other)),
        }
    }

    fn number(&mut self, expected: &'static str) -> Result<u32, ReflectError> {
        match self.next(expected)? {
            Token::Number(n) => n
                .trim_end_matches(|c: char| c.is_ascii_alphabetic())
                .parse()
                .map_err(|_| unexpected(expected, &Token::Number(n.clone()))),
            other => Err(unexpected(expected, other)),
        }
    }

    /// Skip `@name` or `@name(...)`.
    fn skip_attribute(&mut self) -> Result<(), ReflectError> {
        self.ident("attribute name")?;
        if self.eat_punct('(') {
            let mut depth = 1;
            while depth > 0 {
                match self.next("attribute arguments")? {
                    Token::Punct('(') => depth += 1,
                    Token::Punct(')') => depth -= 1,
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

fn unexpected(expected: &'static str, found: &Token) -> ReflectError {
    let found = match found {
        Token::Ident(s) | Token::Number(s) => s.clone(),
        Token::Punct(c) => c.to_string(),
    };
    ReflectError::Unexpected { expected, found }
}

/// A parsed type expression: a name plus generic arguments.
#[derive(Debug, Clone, PartialEq)]
enum TypeExpr {
    Named(String, Vec<TypeExpr>),
    Count(u32),
}

fn parse_type(cursor: &mut Cursor<'_>) -> Result<TypeExpr, ReflectError> {
    if let Some(Token::Number(_)) = cursor.peek() {
        return Ok(TypeExpr::Count(cursor.number("array length")?));
    }
    let name = cursor.ident("type name")?.to_string();
    let mut args = Vec::new();
    if cursor.eat_punct('<') {
        loop {
            args.push(parse_type(cursor)?);
            if cursor.eat_punct(',') {
                // Trailing commas such as `var<storage, read>` parse as idents.
                if cursor.eat_punct('>') {
                    break;
                }
                continue;
            }
            cursor.expect_punct('>', "`>`")?;
            break;
        }
    }
    Ok(TypeExpr::Named(name, args))
}

fn scalar(name: &str) -> Option<ScalarKind> {
    match name {
        "f32" => Some(ScalarKind::F32),
        "i32" => Some(ScalarKind::I32),
        "u32" => Some(ScalarKind::U32),
        _ => None,
    }
}

fn field_type(expr: &TypeExpr) -> Result<FieldType, ReflectError> {
    let TypeExpr::Named(name, args) = expr else {
        return Err(ReflectError::UnknownType(format!("{expr:?}")));
    };
    let first_scalar = || match args.first() {
        Some(TypeExpr::Named(s, _)) => scalar(s),
        _ => None,
    };
    if let Some(kind) = scalar(name) {
        return Ok(FieldType::Scalar(kind));
    }
    let ty = match name.as_str() {
        "vec2" | "vec3" | "vec4" => {
            let n = name.as_bytes()[3] - b'0';
            FieldType::Vector(n, first_scalar().ok_or_else(|| ReflectError::UnknownType(name.clone()))?)
        }
        "vec2f" | "vec3f" | "vec4f" => FieldType::Vector(name.as_bytes()[3] - b'0', ScalarKind::F32),
        "vec2u" | "vec3u" | "vec4u" => FieldType::Vector(name.as_bytes()[3] - b'0', ScalarKind::U32),
        "vec2i" | "vec3i" | "vec4i" => FieldType::Vector(name.as_bytes()[3] - b'0', ScalarKind::I32),
        "mat3x3" | "mat3x3f" => FieldType::Matrix(3, 3),
        "mat4x4" | "mat4x4f" => FieldType::Matrix(4, 4),
        "array" => {
            let element = args
                .first()
                .ok_or_else(|| ReflectError::UnknownType("array".into()))?;
            let count = match args.get(1) {
                Some(TypeExpr::Count(n)) => Some(*n),
                _ => None,
            };
            FieldType::Array(Box::new(field_type(element)?), count)
        }
        other => FieldType::Struct(other.to_string()),
    };
    Ok(ty)
}

// ----------------------------------------------------------------------------
// Layout
// ----------------------------------------------------------------------------

fn round_up(align: u32, value: u32) -> u32 {
    value.div_ceil(align) * align
}

struct StructDecl {
    fields: Vec<(String, FieldType)>,
}

/// (alignment, size) in the uniform address space.
fn align_size(ty: &FieldType, structs: &BTreeMap<String, StructDecl>) -> Result<(u32, u32), ReflectError> {
    Ok(match ty {
        FieldType::Scalar(_) => (4, 4),
        FieldType::Vector(2, _) => (8, 8),
        FieldType::Vector(3, _) => (16, 12),
        FieldType::Vector(_, _) => (16, 16),
        FieldType::Matrix(cols, rows) => {
            let (col_align, col_size) = align_size(&FieldType::Vector(*rows, ScalarKind::F32), structs)?;
            (col_align, *cols as u32 * round_up(col_align, col_size))
        }
        FieldType::Array(element, count) => {
            let (align, size) = align_size(element, structs)?;
            let align = round_up(16, align);
            let stride = round_up(align, size);
            (align, stride * count.unwrap_or(1))
        }
        FieldType::Struct(name) => {
            let decl = structs
                .get(name)
                .ok_or_else(|| ReflectError::UnknownType(name.clone()))?;
            let layout = struct_layout(name, decl, structs)?;
            let align = decl
                .fields
                .iter()
                .map(|(_, t)| align_size(t, structs).map(|(a, _)| a))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .max()
                .unwrap_or(4);
            (round_up(16, align), layout.size)
        }
    })
}

fn struct_layout(
    name: &str,
    decl: &StructDecl,
    structs: &BTreeMap<String, StructDecl>,
) -> Result<BlockLayout, ReflectError> {
    let mut offset = 0;
    let mut max_align = 4;
    let mut fields = Vec::with_capacity(decl.fields.len());
    for (field_name, ty) in &decl.fields {
        let (align, size) = align_size(ty, structs)?;
        offset = round_up(align, offset);
        fields.push(FieldLayout {
            name: field_name.clone(),
            ty: ty.clone(),
            offset,
            size,
        });
        offset += size;
        max_align = max_align.max(align);
    }
    Ok(BlockLayout {
        type_name: name.to_string(),
        size: round_up(round_up(16, max_align), offset.max(1)),
        fields,
    })
}

// ----------------------------------------------------------------------------
// Parsing
// ----------------------------------------------------------------------------

/// Reflect one stage, preprocessed for `stage`.
pub fn reflect(source: &str, stage: ShaderStage) -> Result<ProgramReflection, ReflectError> {
    let tokens = tokenize(source);
    let mut structs = BTreeMap::new();
    let mut bindings = Vec::new();
    let mut uniform_types = Vec::new();

    let mut cursor = Cursor { tokens: &tokens, at: 0 };
    while let Some(token) = cursor.peek() {
        match token {
            Token::Ident(word) if word == "struct" => {
                cursor.at += 1;
                let name = cursor.ident("struct name")?.to_string();
                structs.insert(name, parse_struct_body(&mut cursor)?);
            }
            Token::Punct('@') if is_group_attribute(&cursor) => {
                let (group, binding) = parse_group_binding(&mut cursor)?;
                let (name, kind) = parse_var(&mut cursor)?;
                if let BindingKind::Uniform { type_name } = &kind {
                    uniform_types.push((name.clone(), type_name.clone()));
                }
                bindings.push(ResourceBinding {
                    group,
                    binding,
                    name,
                    kind,
                    vertex: stage == ShaderStage::Vertex,
                    fragment: stage == ShaderStage::Fragment,
                });
            }
            _ => cursor.at += 1,
        }
    }

    let mut blocks = BTreeMap::new();
    for (var, type_name) in uniform_types {
        let decl = structs
            .get(&type_name)
            .ok_or_else(|| ReflectError::UnknownType(type_name.clone()))?;
        blocks.insert(var, struct_layout(&type_name, decl, &structs)?);
    }
    bindings.sort_by_key(|b: &ResourceBinding| (b.group, b.binding));
    Ok(ProgramReflection { bindings, blocks })
}

fn is_group_attribute(cursor: &Cursor<'_>) -> bool {
    matches!(cursor.tokens.get(cursor.at + 1), Some(Token::Ident(name)) if name == "group")
}

fn parse_struct_body(cursor: &mut Cursor<'_>) -> Result<StructDecl, ReflectError> {
    cursor.expect_punct('{', "`{`")?;
    let mut fields = Vec::new();
    loop {
        if cursor.eat_punct('}') {
            break;
        }
        if cursor.eat_punct(',') {
            continue;
        }
        while cursor.eat_punct('@') {
            cursor.skip_attribute()?;
        }
        let name = cursor.ident("field name")?.to_string();
        cursor.expect_punct(':', "`:`")?;
        let ty = parse_type(cursor)?;
        fields.push((name, field_type(&ty)?));
    }
    Ok(StructDecl { fields })
}

fn parse_group_binding(cursor: &mut Cursor<'_>) -> Result<(u32, u32), ReflectError> {
    let mut group = None;
    let mut binding = None;
    while cursor.eat_punct('@') {
        let attribute = cursor.ident("attribute")?;
        cursor.expect_punct('(', "`(`")?;
        let value = cursor.number("binding index")?;
        cursor.expect_punct(')', "`)`")?;
        match attribute {
            "group" => group = Some(value),
            "binding" => binding = Some(value),
            _ => {}
        }
    }
    match (group, binding) {
        (Some(g), Some(b)) => Ok((g, b)),
        _ => Err(ReflectError::Unexpected {
            expected: "@group and @binding",
            found: "incomplete binding".into(),
        }),
    }
}

fn parse_var(cursor: &mut Cursor<'_>) -> Result<(String, BindingKind), ReflectError> {
    let keyword = cursor.ident("`var`")?;
    if keyword != "var" {
        return Err(ReflectError::Unexpected {
            expected: "`var`",
            found: keyword.to_string(),
        });
    }
    let mut address_space = Vec::new();
    if cursor.eat_punct('<') {
        loop {
            address_space.push(cursor.ident("address space")?.to_string());
            if cursor.eat_punct('>') {
                break;
            }
            cursor.expect_punct(',', "`,`")?;
        }
    }
    let name = cursor.ident("variable name")?.to_string();
    cursor.expect_punct(':', "`:`")?;
    let ty = parse_type(cursor)?;
    cursor.expect_punct(';', "`;`")?;

    let TypeExpr::Named(type_name, _) = &ty else {
        return Err(ReflectError::UnknownType(format!("{ty:?}")));
    };
    let kind = match address_space.first().map(String::as_str) {
        Some("uniform") => BindingKind::Uniform {
            type_name: type_name.clone(),
        },
        Some("storage") => BindingKind::Storage {
            read_only: address_space.get(1).map_or(true, |access| access == "read"),
        },
        Some(other) => return Err(ReflectError::UnknownType(other.to_string())),
        None => match type_name.as_str() {
            "sampler" => BindingKind::Sampler,
            "sampler_comparison" => BindingKind::ComparisonSampler,
            "texture_depth_2d" => BindingKind::DepthTexture,
            t if t.starts_with("texture_") => BindingKind::Texture,
            other => return Err(ReflectError::UnknownType(other.to_string())),
        },
    };
    Ok((name, kind))
}
