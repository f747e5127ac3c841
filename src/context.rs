// src/context.rs
//! Error context and early-return helpers.
//!
//! [`Context`] adds `.context()` / `.with_context()` to any `Result` whose
//! error converts into [`Error`]; [`OptionContext`] turns a `None` into an
//! error carrying the message. `bail!` and `ensure!` return formatted
//! [`Error::Custom`] errors, `load_ensure!` returns [`Error::Load`].

use crate::error::{Error, Result};

pub trait Context<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Like [`Context::context`], but the message is only built on error.
    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> Context<T> for std::result::Result<T, E> {
    fn context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|err| err.into().context(context))
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|err| err.into().context(f()))
    }
}

pub trait OptionContext<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T>;
    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T> OptionContext<T> for Option<T> {
    fn context<C: Into<String>>(self, context: C) -> Result<T> {
        self.ok_or_else(|| Error::custom(context))
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.ok_or_else(|| Error::custom(f()))
    }
}

/// Return early with a formatted [`Error::Custom`].
#[macro_export]
macro_rules! bail {
    ($($arg:tt)+) => {
        return Err($crate::error::Error::format(format_args!($($arg)+)))
    };
}

/// `bail!` unless `cond` holds.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            $crate::bail!($($arg)+);
        }
    };
}

/// `ensure!` for loader input: fails with [`Error::Load`].
#[macro_export]
macro_rules! load_ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            return Err($crate::error::Error::Load(format!($($arg)+)));
        }
    };
}

pub use crate::{bail, ensure, load_ensure};

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: &str) -> Result<u32> {
        ensure!(!value.is_empty(), "empty input");
        value
            .parse::<u32>()
            .map_err(|e| Error::custom(e.to_string()))
            .with_context(|| format!("parsing {value:?}"))
    }

    fn checked_count(count: usize) -> Result<usize> {
        load_ensure!(count % 3 == 0, "triangle indices count {} is not divisible by 3", count);
        Ok(count / 3)
    }

    #[test]
    fn test_ensure_and_context() {
        assert_eq!(parse("12").ok(), Some(12));
        assert_eq!(parse("").unwrap_err().to_string(), "empty input");
        assert!(parse("x").unwrap_err().to_string().starts_with("parsing \"x\""));
    }

    #[test]
    fn test_load_ensure_builds_load_error() {
        assert_eq!(checked_count(6).ok(), Some(2));
        assert!(checked_count(4).unwrap_err().is_load());
    }

    fn pick(items: &[u32], index: usize) -> Result<u32> {
        ensure!(index < items.len(), "index {index} out of range for {} items", items.len());
        match items[index] {
            0 => bail!("item {index} is zero"),
            item => Ok(item),
        }
    }

    #[test]
    fn test_macros_format_inline_arguments() {
        assert_eq!(pick(&[3, 0], 0).ok(), Some(3));
        assert_eq!(pick(&[3, 0], 5).unwrap_err().to_string(), "index 5 out of range for 2 items");
        let err = pick(&[3, 0], 1).unwrap_err();
        assert!(err.is_custom());
        assert_eq!(err.to_string(), "item 1 is zero");
    }

    #[test]
    fn test_option_context() {
        let missing: Option<u8> = None;
        assert_eq!(missing.context("nothing here").unwrap_err().to_string(), "nothing here");
    }
}
