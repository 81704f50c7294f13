//! Reference string grammars.
//!
//! - import reference: `unit.path[:attr.path]`, e.g. `math:add`, `counter:Counter`
//! - namespace reference: `$name.attr.path`, e.g. `$runner.results`

use crate::fault::Error;
use regex::Regex;
use std::sync::LazyLock;

static IMPORT_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\w+(\.\w+)*(:\w+(\.\w+)*)?$").expect("import reference grammar")
});

static NAMESPACE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$\w+(\.\w+)*$").expect("namespace reference grammar"));

static DOTTED_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+(\.\w+)*$").expect("dotted path grammar"));

pub const SIGIL: char = '$';

pub fn is_import_ref(reference: &str) -> bool {
    IMPORT_REF.is_match(reference)
}

pub fn is_namespace_ref(reference: &str) -> bool {
    NAMESPACE_REF.is_match(reference)
}

pub fn strip_sigil(reference: &str) -> &str {
    reference.strip_prefix(SIGIL).unwrap_or(reference)
}

/// Segments of a sigil-less namespace path.
pub fn namespace_path(path: &str) -> Result<Vec<&str>, Error> {
    if !DOTTED_PATH.is_match(path) {
        return Err(Error::MalformedReference(path.to_string()));
    }
    Ok(path.split('.').collect())
}

/// A parsed import reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef<'a> {
    /// Catalog path of the unit, e.g. `math` or `lab.devices`
    pub unit: &'a str,
    /// Attribute path walked on the unit, in order
    pub attrs: Vec<&'a str>,
}

impl<'a> ImportRef<'a> {
    pub fn parse(reference: &'a str) -> Result<Self, Error> {
        if !is_import_ref(reference) {
            return Err(Error::MalformedReference(reference.to_string()));
        }
        Ok(match reference.split_once(':') {
            Some((unit, attrs)) => Self {
                unit,
                attrs: attrs.split('.').collect(),
            },
            None => Self {
                unit: reference,
                attrs: Vec::new(),
            },
        })
    }
}
