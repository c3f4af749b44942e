//! Per-language collaborators
//!
//! The core engine is language-neutral; everything language-specific hides
//! behind two seams:
//! - [`ImportLookup`]: maps a file's import declarations to concrete
//!   entities/files, and answers single-name imported-type lookups
//! - [`BuiltInTypeSet`]: predicates for built-in type names and for name
//!   prefixes treated wholesale as built-in
//!
//! One import strategy ships: [`QualifiedImportLookup`], for languages
//! whose imports name entities by qualified name.

use crate::entity::repo::EntityRepo;
use crate::entity::EntityId;
use crate::name::GenericName;

/// Shape of an import declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// Imports a whole file (e.g. an include)
    File,
    /// Imports a single named entity
    Symbol,
    /// Imports every member of a package/namespace
    Package,
}

/// A raw import declaration recorded on a file entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub kind: ImportKind,
    /// The imported name as written in source
    pub content: String,
}

impl Import {
    pub fn new(kind: ImportKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }

    pub fn symbol(content: impl Into<String>) -> Self {
        Self::new(ImportKind::Symbol, content)
    }

    pub fn file(content: impl Into<String>) -> Self {
        Self::new(ImportKind::File, content)
    }
}

/// Import-lookup strategy, one per source language.
pub trait ImportLookup {
    /// Entities an import list establishes dependency relations to
    fn imported_relation_entities(&self, imports: &[Import], repo: &EntityRepo) -> Vec<EntityId>;

    /// Types an import list brings into scope; names that could not be
    /// bound are pushed to `unresolved`
    fn imported_types(
        &self,
        imports: &[Import],
        repo: &EntityRepo,
        unresolved: &mut Vec<String>,
    ) -> Vec<EntityId>;

    /// Files an import list brings into scope
    fn imported_files(&self, imports: &[Import], repo: &EntityRepo) -> Vec<EntityId>;

    /// Look up a single imported type by name within a file
    fn lookup_imported_type(
        &self,
        name: &str,
        file: EntityId,
        repo: &EntityRepo,
    ) -> Option<EntityId>;

    /// Whether the language supports flat lookup of any global name
    /// without an import
    fn supports_global_name_lookup(&self) -> bool {
        false
    }
}

/// Built-in-type collaborator, one per language.
pub trait BuiltInTypeSet {
    /// Exact built-in type name
    fn is_built_in(&self, name: &str) -> bool;

    /// Name prefix treated wholesale as built-in (e.g. a whole namespace)
    fn is_built_in_prefix(&self, name: &str) -> bool;
}

/// Built-in set with no members
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBuiltIn;

impl BuiltInTypeSet for NullBuiltIn {
    fn is_built_in(&self, _name: &str) -> bool {
        false
    }

    fn is_built_in_prefix(&self, _name: &str) -> bool {
        false
    }
}

/// Built-in set backed by static name and prefix lists
#[derive(Debug, Clone, Default)]
pub struct StaticBuiltIns {
    names: Vec<String>,
    prefixes: Vec<String>,
}

impl StaticBuiltIns {
    pub fn new(
        names: impl IntoIterator<Item = impl Into<String>>,
        prefixes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }
}

impl BuiltInTypeSet for StaticBuiltIns {
    fn is_built_in(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    fn is_built_in_prefix(&self, name: &str) -> bool {
        self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}

/// Import strategy for languages whose imports name entities by qualified
/// name (Java-style `import pkg.Type`). No flat global lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualifiedImportLookup;

impl ImportLookup for QualifiedImportLookup {
    fn imported_relation_entities(&self, imports: &[Import], repo: &EntityRepo) -> Vec<EntityId> {
        imports
            .iter()
            .filter_map(|import| repo.get_by_name(&import.content))
            .collect()
    }

    fn imported_types(
        &self,
        imports: &[Import],
        repo: &EntityRepo,
        unresolved: &mut Vec<String>,
    ) -> Vec<EntityId> {
        let mut types = Vec::new();
        for import in imports {
            if import.kind == ImportKind::File {
                continue;
            }
            match repo.get_by_name(&import.content) {
                Some(id) => {
                    // a package import brings in every declared type below it
                    if import.kind == ImportKind::Package {
                        let children: Vec<EntityId> = repo
                            .get(id)
                            .map(|e| e.children().to_vec())
                            .unwrap_or_default();
                        types.extend(
                            children
                                .into_iter()
                                .filter(|&c| repo.get(c).is_some_and(|e| e.is_type())),
                        );
                    } else {
                        types.push(id);
                    }
                }
                None => unresolved.push(import.content.clone()),
            }
        }
        types
    }

    fn imported_files(&self, imports: &[Import], repo: &EntityRepo) -> Vec<EntityId> {
        imports
            .iter()
            .filter(|import| import.kind == ImportKind::File)
            .filter_map(|import| repo.get_by_name(&import.content))
            .filter(|&id| repo.get(id).is_some_and(|e| e.is_file()))
            .collect()
    }

    fn lookup_imported_type(
        &self,
        name: &str,
        file: EntityId,
        repo: &EntityRepo,
    ) -> Option<EntityId> {
        let imports = repo.get(file)?.as_file()?.imports.clone();
        for import in &imports {
            if import.content == name || GenericName::suffix_match(name, &import.content) {
                if let Some(id) = repo.get_by_name(&import.content) {
                    if repo.type_of(id).is_some() {
                        return Some(id);
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_built_in() {
        let builtins = NullBuiltIn;
        assert!(!builtins.is_built_in("Int"));
        assert!(!builtins.is_built_in_prefix("java.io.File"));
    }

    #[test]
    fn test_static_built_ins() {
        let builtins = StaticBuiltIns::new(["Int", "Bool"], ["java."]);
        assert!(builtins.is_built_in("Int"));
        assert!(!builtins.is_built_in("Socket"));
        assert!(builtins.is_built_in_prefix("java.io.File"));
        assert!(!builtins.is_built_in_prefix("kotlin.io.File"));
    }
}
