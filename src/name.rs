//! Generic names - structured identifiers
//!
//! A [`GenericName`] is the parsed form of a (possibly qualified, possibly
//! generic) identifier such as `pkg.List<Item>`. It carries the dotted name
//! and any generic argument names, and supports the segment operations the
//! resolver needs: qualifier stripping, last-segment truncation, and
//! prefix/suffix matching.

use serde::{Deserialize, Serialize};

/// Separator between qualified-name segments.
pub const QUALIFIER: char = '.';

/// A structured identifier: a dotted name plus optional generic arguments.
///
/// `::`-style qualifiers are normalised to `.` on construction, so every
/// downstream comparison works on a single separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GenericName {
    name: String,
    arguments: Vec<GenericName>,
}

impl GenericName {
    /// Build a name from raw source text
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().replace("::", "."),
            arguments: Vec::new(),
        }
    }

    /// Build a name carrying generic arguments (e.g. `Map` with `[K, V]`)
    pub fn with_arguments(name: impl Into<String>, arguments: Vec<GenericName>) -> Self {
        let mut built = Self::new(name);
        built.arguments = arguments;
        built
    }

    /// The dotted name without generic arguments
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Generic argument names, outermost level only
    pub fn arguments(&self) -> &[GenericName] {
        &self.arguments
    }

    /// Append a generic argument
    pub fn add_argument(&mut self, argument: GenericName) {
        self.arguments.push(argument);
    }

    /// The unique display form: name plus formatted generic arguments
    pub fn uniq_name(&self) -> String {
        if self.arguments.is_empty() {
            return self.name.clone();
        }
        let args: Vec<String> = self.arguments.iter().map(|a| a.uniq_name()).collect();
        format!("{}<{}>", self.name, args.join(","))
    }

    /// Whether the name starts with the qualifier separator (absolute name)
    pub fn is_absolute(&self) -> bool {
        self.name.starts_with(QUALIFIER)
    }

    /// Strip a single leading qualifier separator, if present
    pub fn strip_qualifier(&self) -> GenericName {
        match self.name.strip_prefix(QUALIFIER) {
            Some(rest) => GenericName::with_arguments(rest, self.arguments.clone()),
            None => self.clone(),
        }
    }

    /// Whether the name contains more than one segment
    pub fn is_qualified(&self) -> bool {
        self.name.contains(QUALIFIER)
    }

    /// Dotted segments in order
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.name.split(QUALIFIER)
    }

    /// Drop the last dotted segment; `None` when only one segment remains
    pub fn truncate_last_segment(&self) -> Option<GenericName> {
        let index = self.name.rfind(QUALIFIER)?;
        Some(GenericName::new(&self.name[..index]))
    }

    /// Compose `self.other`, the way dot-chains build qualified references
    pub fn join(&self, other: &GenericName) -> GenericName {
        GenericName::new(format!("{}{}{}", self.name, QUALIFIER, other.name))
    }

    /// Suffix match of a (possibly partial) name against a qualified name.
    ///
    /// `b.c` matches `a.b.c` but not `ab.c`; a separator-free qualified name
    /// must match exactly.
    pub fn suffix_match(name: &str, qualified: &str) -> bool {
        if qualified.contains(QUALIFIER) {
            let dotted = if name.starts_with(QUALIFIER) {
                name.to_string()
            } else {
                format!("{}{}", QUALIFIER, name)
            };
            qualified.ends_with(&dotted)
        } else {
            qualified == name
        }
    }
}

impl From<&str> for GenericName {
    fn from(name: &str) -> Self {
        GenericName::new(name)
    }
}

impl std::fmt::Display for GenericName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uniq_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separator_normalisation() {
        let name = GenericName::new("std::vec::Vec");
        assert_eq!(name.as_str(), "std.vec.Vec");
    }

    #[test]
    fn test_uniq_name_with_arguments() {
        let name = GenericName::with_arguments(
            "Map",
            vec![GenericName::new("K"), GenericName::new("V")],
        );
        assert_eq!(name.uniq_name(), "Map<K,V>");
        assert_eq!(name.as_str(), "Map");
    }

    #[test]
    fn test_absolute_and_strip() {
        let name = GenericName::new(".pkg.Type");
        assert!(name.is_absolute());
        assert_eq!(name.strip_qualifier().as_str(), "pkg.Type");
        assert!(!GenericName::new("pkg.Type").is_absolute());
    }

    #[test]
    fn test_truncate_last_segment() {
        let name = GenericName::new("a.b.c");
        let shorter = name.truncate_last_segment().unwrap();
        assert_eq!(shorter.as_str(), "a.b");
        assert_eq!(shorter.truncate_last_segment().unwrap().as_str(), "a");
        assert!(GenericName::new("a").truncate_last_segment().is_none());
    }

    #[test]
    fn test_suffix_match() {
        assert!(GenericName::suffix_match("b.c", "a.b.c"));
        assert!(!GenericName::suffix_match("b.c", "ab.c"));
        assert!(GenericName::suffix_match("c", "c"));
        assert!(!GenericName::suffix_match("c", "bc"));
    }

    #[test]
    fn test_join() {
        let left = GenericName::new("a");
        let right = GenericName::new("b");
        assert_eq!(left.join(&right).as_str(), "a.b");
    }
}
