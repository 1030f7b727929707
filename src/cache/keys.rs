//! Canonical cache keys for calls.
//!
//! A call is reduced to `[master:][partition:]module.name(args)` where `args`
//! lists every declared parameter in order (taken from keywords, positionals,
//! or defaults), then variadic positionals, then variadic keywords sorted by
//! name. Two calls that bind the same values produce the same key no matter
//! how the caller spelled them.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write;

use super::error::KeyError;

/// A call argument with a literal rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Arg>),
    Tuple(Vec<Arg>),
}

impl Arg {
    /// Render as a literal, e.g. `'text'`, `3`, `(1, 2)`.
    pub fn literal(&self) -> Result<String, KeyError> {
        let mut out = String::new();
        self.write_literal(&mut out)?;
        Ok(out)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Arg::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Arg::Float(value) => Some(*value),
            Arg::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Arg::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(value) => Some(value),
            _ => None,
        }
    }

    fn write_literal(&self, out: &mut String) -> Result<(), KeyError> {
        match self {
            Arg::None => out.push_str("None"),
            Arg::Bool(value) => out.push_str(if *value { "true" } else { "false" }),
            Arg::Int(value) => {
                let _ = write!(out, "{value}");
            }
            Arg::Float(value) => {
                if !value.is_finite() {
                    return Err(KeyError::Unrenderable {
                        value: format!("{value}"),
                        reason: "non-finite float".to_string(),
                    });
                }
                let _ = write!(out, "{value:?}");
            }
            Arg::Str(value) => {
                out.push('\'');
                for ch in value.chars() {
                    match ch {
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\t' => out.push_str("\\t"),
                        ch if ch.is_control() => {
                            let _ = write!(out, "\\u{{{:x}}}", ch as u32);
                        }
                        ch => out.push(ch),
                    }
                }
                out.push('\'');
            }
            Arg::Bytes(bytes) => {
                out.push_str("b'");
                for byte in bytes {
                    match byte {
                        b'\\' => out.push_str("\\\\"),
                        b'\'' => out.push_str("\\'"),
                        0x20..=0x7e => out.push(*byte as char),
                        _ => {
                            let _ = write!(out, "\\x{byte:02x}");
                        }
                    }
                }
                out.push('\'');
            }
            Arg::List(items) => {
                out.push('[');
                write_items(items, out)?;
                out.push(']');
            }
            Arg::Tuple(items) => {
                out.push('(');
                write_items(items, out)?;
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
        }
        Ok(())
    }
}

fn write_items(items: &[Arg], out: &mut String) -> Result<(), KeyError> {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        item.write_literal(out)?;
    }
    Ok(())
}

macro_rules! arg_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Arg {
            fn from(value: $ty) -> Self {
                Arg::Int(i64::from(value))
            }
        })*
    };
}

arg_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl From<f32> for Arg {
    fn from(value: f32) -> Self {
        Arg::Float(f64::from(value))
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Str(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Str(value)
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Arg::Bytes(value.to_vec())
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Arg::None, Into::into)
    }
}

impl<T: Into<Arg>> From<Vec<T>> for Arg {
    fn from(value: Vec<T>) -> Self {
        Arg::List(value.into_iter().map(Into::into).collect())
    }
}

/// Positional and keyword arguments of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub positional: Vec<Arg>,
    pub keywords: Vec<(String, Arg)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Arg>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kw(mut self, name: impl Into<String>, value: impl Into<Arg>) -> Self {
        let name = name.into();
        self.keywords.retain(|(existing, _)| *existing != name);
        self.keywords.push((name, value.into()));
        self
    }

    /// Positional argument `index`.
    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.positional.get(index)
    }

    /// Keyword argument `name`.
    pub fn keyword(&self, name: &str) -> Option<&Arg> {
        self.keywords
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// `prefix` followed by these positionals; keywords are kept.
    pub(crate) fn prefixed(&self, prefix: &[Arg]) -> Args {
        let mut positional = prefix.to_vec();
        positional.extend(self.positional.iter().cloned());
        Args {
            positional,
            keywords: self.keywords.clone(),
        }
    }
}

/// Build [`Args`] from positional values.
///
/// ```
/// use memora::args;
/// let call = args![1, "two", 3.5].kw("flag", true);
/// assert_eq!(call.positional.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => { $crate::Args::new() };
    ($($value:expr),+ $(,)?) => {
        $crate::Args::new()$(.arg($value))+
    };
}

/// Declared parameters of a computation.
///
/// Parameter names exclude variadic collectors; defaults align with the last
/// parameters, so `f(a, b=2)` is `params(["a", "b"]).defaults([2])`.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    module: String,
    name: String,
    params: Vec<String>,
    defaults: Vec<Arg>,
    variadic: bool,
    variadic_keywords: bool,
}

impl Signature {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            params: Vec::new(),
            defaults: Vec::new(),
            variadic: false,
            variadic_keywords: false,
        }
    }

    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn defaults<I, A>(mut self, defaults: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.defaults = defaults.into_iter().map(Into::into).collect();
        self
    }

    /// Accept extra positional arguments.
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// Accept extra keyword arguments.
    pub fn variadic_keywords(mut self) -> Self {
        self.variadic_keywords = true;
        self
    }

    /// `module.name`, the qualified name used in keys.
    pub fn qualified_name(&self) -> String {
        if self.module.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.module, self.name)
        }
    }

    pub fn param_names(&self) -> &[String] {
        &self.params
    }

    fn default_for(&self, index: usize) -> Option<&Arg> {
        let first_defaulted = self.params.len().checked_sub(self.defaults.len())?;
        index
            .checked_sub(first_defaulted)
            .and_then(|offset| self.defaults.get(offset))
    }

    fn validate(&self) -> Result<(), KeyError> {
        if self.defaults.len() > self.params.len() {
            return Err(KeyError::InvalidSignature {
                function: self.qualified_name(),
                reason: format!(
                    "{} defaults for {} parameters",
                    self.defaults.len(),
                    self.params.len()
                ),
            });
        }
        for (index, param) in self.params.iter().enumerate() {
            if self.params[..index].contains(param) {
                return Err(KeyError::InvalidSignature {
                    function: self.qualified_name(),
                    reason: format!("duplicate parameter `{param}`"),
                });
            }
        }
        Ok(())
    }
}

/// Derive the canonical key for calling `signature` with `args`.
///
/// `master_key` parts render as literals joined by `,`; `partition` is an
/// already-rendered instance discriminator.
pub fn derive_key(
    master_key: &[Arg],
    partition: Option<&str>,
    signature: &Signature,
    args: &Args,
) -> Result<String, KeyError> {
    signature.validate()?;
    let function = signature.qualified_name();

    let mut keywords: BTreeMap<&str, &Arg> = BTreeMap::new();
    for (name, value) in &args.keywords {
        keywords.insert(name.as_str(), value);
    }
    let mut positional: VecDeque<&Arg> = args.positional.iter().collect();

    let mut bound: Vec<Option<&Arg>> = Vec::with_capacity(signature.params.len());
    for param in &signature.params {
        let value = keywords
            .remove(param.as_str())
            .or_else(|| positional.pop_front());
        bound.push(value);
    }

    if !positional.is_empty() && !signature.variadic {
        return Err(KeyError::UnexpectedArgument {
            function,
            expected: signature.params.len(),
            given: args.positional.len(),
        });
    }
    if let Some(name) = keywords.keys().next().filter(|_| !signature.variadic_keywords) {
        return Err(KeyError::UnexpectedKeyword {
            function,
            name: (*name).to_string(),
        });
    }

    // Parameters render in declaration order; extra positionals only exist
    // when every parameter was filled, so they always follow.
    let mut rendered: Vec<String> = Vec::new();
    for (index, value) in bound.into_iter().enumerate() {
        let value = match value {
            Some(value) => value,
            None => signature
                .default_for(index)
                .ok_or_else(|| KeyError::MissingArgument {
                    function: function.clone(),
                    name: signature.params[index].clone(),
                })?,
        };
        rendered.push(value.literal()?);
    }
    for value in positional {
        rendered.push(value.literal()?);
    }
    for (name, value) in keywords {
        rendered.push(format!("{name}={}", value.literal()?));
    }

    let mut key = String::new();
    if !master_key.is_empty() {
        let parts = master_key
            .iter()
            .map(Arg::literal)
            .collect::<Result<Vec<_>, _>>()?;
        key.push_str(&parts.join(","));
        key.push(':');
    }
    if let Some(partition) = partition {
        key.push_str(partition);
        key.push(':');
    }
    let _ = write!(key, "{function}({})", rendered.join(", "));
    Ok(key)
}
