//! Name resolution scopes
//!
//! A scope holds the relations visible at one query level, in FROM order.
//! Subqueries chain to their parent scope so correlated references resolve.
//! Outer-join nullability is applied to relation columns as the FROM clause
//! is folded left to right.

use crate::catalog::normalize_name;
use crate::types::SemanticType;

/// One visible column of a relation.
#[derive(Debug, Clone)]
pub(crate) struct ScopeColumn {
    /// Display name.
    pub name: String,
    /// Normalized lookup key.
    pub key: String,
    pub ty: SemanticType,
    pub nullable: bool,
    /// (table display, column display) when the column originates in a base
    /// table; `None` for computed subquery/CTE columns.
    pub origin: Option<(String, String)>,
}

impl ScopeColumn {
    pub fn new(
        name: impl Into<String>,
        ty: SemanticType,
        nullable: bool,
        origin: Option<(String, String)>,
    ) -> Self {
        let name = name.into();
        let key = normalize_name(&name);
        Self {
            name,
            key,
            ty,
            nullable,
            origin,
        }
    }
}

/// A named relation in scope: a table, view, CTE, or FROM subquery.
#[derive(Debug, Clone)]
pub(crate) struct Relation {
    /// Normalized alias or base name; `None` for anonymous subqueries,
    /// whose columns are only reachable unqualified.
    pub label: Option<String>,
    /// Display name for diagnostics.
    pub display: String,
    pub columns: Vec<ScopeColumn>,
}

impl Relation {
    pub fn matches(&self, qualifier: &str) -> bool {
        self.label
            .as_deref()
            .is_some_and(|l| l == normalize_name(qualifier))
    }

    /// Mark every column nullable, for the null-extended side of an outer join.
    pub fn nullify(&mut self) {
        for col in &mut self.columns {
            col.nullable = true;
        }
    }
}

#[derive(Debug)]
pub(crate) enum Lookup<'a> {
    Found(&'a ScopeColumn),
    /// Display names of every relation holding a candidate.
    Ambiguous(Vec<String>),
    NotFound,
}

#[derive(Debug, Default)]
pub(crate) struct Scope<'a> {
    pub relations: Vec<Relation>,
    pub parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    pub fn child_of(parent: &'a Scope<'a>) -> Self {
        Self {
            relations: Vec::new(),
            parent: Some(parent),
        }
    }

    pub fn relation(&self, qualifier: &str) -> Option<&Relation> {
        self.relations
            .iter()
            .find(|r| r.matches(qualifier))
            .or_else(|| self.parent.and_then(|p| p.relation(qualifier)))
    }

    /// Resolve `qualifier.column`.
    pub fn lookup_qualified(&self, qualifier: &str, column: &str) -> Lookup<'_> {
        match self.relation(qualifier) {
            Some(relation) => {
                let key = normalize_name(column);
                match relation.columns.iter().find(|c| c.key == key) {
                    Some(col) => Lookup::Found(col),
                    None => Lookup::NotFound,
                }
            }
            None => Lookup::NotFound,
        }
    }

    /// Resolve a bare column against the innermost scope that has any
    /// candidate; ambiguity within one scope level is an error.
    pub fn lookup_bare(&self, column: &str) -> Lookup<'_> {
        let key = normalize_name(column);
        let mut hits: Vec<(&Relation, &ScopeColumn)> = Vec::new();
        for relation in &self.relations {
            for col in &relation.columns {
                if col.key == key {
                    hits.push((relation, col));
                }
            }
        }
        match hits.len() {
            0 => match self.parent {
                Some(parent) => parent.lookup_bare(column),
                None => Lookup::NotFound,
            },
            1 => Lookup::Found(hits[0].1),
            _ => Lookup::Ambiguous(hits.iter().map(|(r, _)| r.display.clone()).collect()),
        }
    }

    /// All visible columns in source order, for `*` expansion.
    pub fn all_columns(&self) -> impl Iterator<Item = &ScopeColumn> {
        self.relations.iter().flat_map(|r| r.columns.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_relation(label: &str) -> Relation {
        Relation {
            label: Some(label.to_string()),
            display: label.to_string(),
            columns: vec![
                ScopeColumn::new("id", SemanticType::Integer, false, None),
                ScopeColumn::new("name", SemanticType::Text, false, None),
            ],
        }
    }

    #[test]
    fn test_qualified_lookup() {
        let scope = Scope {
            relations: vec![users_relation("u")],
            parent: None,
        };
        assert!(matches!(scope.lookup_qualified("u", "id"), Lookup::Found(_)));
        assert!(matches!(scope.lookup_qualified("u", "ID"), Lookup::Found(_)));
        assert!(matches!(
            scope.lookup_qualified("u", "missing"),
            Lookup::NotFound
        ));
        assert!(matches!(
            scope.lookup_qualified("x", "id"),
            Lookup::NotFound
        ));
    }

    #[test]
    fn test_bare_ambiguous() {
        let scope = Scope {
            relations: vec![users_relation("a"), users_relation("b")],
            parent: None,
        };
        match scope.lookup_bare("id") {
            Lookup::Ambiguous(candidates) => assert_eq!(candidates, vec!["a", "b"]),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn test_parent_chain() {
        let outer = Scope {
            relations: vec![users_relation("u")],
            parent: None,
        };
        let inner = Scope::child_of(&outer);
        assert!(matches!(inner.lookup_bare("name"), Lookup::Found(_)));
        assert!(matches!(inner.lookup_qualified("u", "name"), Lookup::Found(_)));
    }

    #[test]
    fn test_nullify() {
        let mut relation = users_relation("u");
        relation.nullify();
        assert!(relation.columns.iter().all(|c| c.nullable));
    }
}
