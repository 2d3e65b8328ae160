//! Source-text program artifact and its parsed tree.
//!
//! A `Program` is the unit every other component operates on: the raw
//! text as received, plus the syn tree it parses to. Programs are never
//! mutated in place; transformers produce a new `Program` from new text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("source does not parse: {0}")]
    Syntax(String),
    #[error("source contains no free function to analyze")]
    NoEntryFunction,
}

/// An immutable source artifact plus its parsed tree.
#[derive(Debug, Clone)]
pub struct Program {
    source: String,
    ast: syn::File,
    entry: syn::ItemFn,
}

impl Program {
    /// Parse source text. The first free function in the file becomes the
    /// entry point; a file without one is rejected because every shape
    /// property and probe execution anchors there.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let ast: syn::File =
            syn::parse_str(source).map_err(|err| ParseError::Syntax(err.to_string()))?;
        let entry = ast
            .items
            .iter()
            .find_map(|item| match item {
                syn::Item::Fn(item_fn) => Some(item_fn.clone()),
                _ => None,
            })
            .ok_or(ParseError::NoEntryFunction)?;
        Ok(Self {
            source: source.to_string(),
            ast,
            entry,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &syn::File {
        &self.ast
    }

    /// The first free function in the file.
    pub fn entry_fn(&self) -> &syn::ItemFn {
        &self.entry
    }

    /// Number of value parameters the entry function takes.
    pub fn entry_arity(&self) -> usize {
        self.entry
            .sig
            .inputs
            .iter()
            .filter(|arg| matches!(arg, syn::FnArg::Typed(_)))
            .count()
    }

    /// Canonical rendering of the parsed tree, independent of the
    /// whitespace and layout of the original text.
    pub fn normalized_source(&self) -> String {
        prettyplease::unparse(&self.ast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_finds_entry() {
        let program = Program::parse("fn f(n: i64) -> i64 { n }").expect("must parse");
        assert_eq!(program.entry_fn().sig.ident.to_string(), "f");
        assert_eq!(program.entry_arity(), 1);
    }

    #[test]
    fn rejects_malformed_source() {
        let err = Program::parse("fn f( {").expect_err("must not parse");
        assert!(matches!(err, ParseError::Syntax(_)));
    }

    #[test]
    fn rejects_file_without_function() {
        let err = Program::parse("const X: i64 = 1;").expect_err("no entry function");
        assert!(matches!(err, ParseError::NoEntryFunction));
    }

    #[test]
    fn normalization_ignores_whitespace() {
        let a = Program::parse("fn f(n: i64) -> i64 { n }").unwrap();
        let b = Program::parse("fn f(n: i64)\n    -> i64 {\n    n\n}").unwrap();
        assert_eq!(a.normalized_source(), b.normalized_source());
    }
}
