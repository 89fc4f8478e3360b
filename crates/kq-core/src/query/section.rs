//! Composite clauses: bool query sections and sorting.

use super::Clause;
use crate::sql::SortOrder;

/// Boolean operator a section applies to its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Must,
    MustNot,
    Should,
    Filter,
    /// Stands in for a malformed `bool` query; always vacuous.
    Empty,
}

/// Insertion-ordered children combined by one operator.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    kind: SectionKind,
    children: Vec<Clause>,
}

impl Section {
    pub fn new(kind: SectionKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
        }
    }

    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    pub fn append_child(&mut self, child: Clause) -> &mut Self {
        self.children.push(child);
        self
    }

    pub fn children(&self) -> &[Clause] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [Clause] {
        &mut self.children
    }

    fn child_fragments(&self) -> Vec<String> {
        self.children
            .iter()
            .map(Clause::render)
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn render(&self) -> String {
        let fragments = self.child_fragments();
        if fragments.is_empty() {
            return String::new();
        }
        match self.kind {
            SectionKind::Must | SectionKind::Filter => format!("({})", fragments.join(" AND ")),
            SectionKind::Should => format!("({})", fragments.join(" OR ")),
            SectionKind::MustNot => {
                let negated: Vec<String> = fragments.iter().map(|f| format!("NOT {}", f)).collect();
                format!("({})", negated.join(" AND "))
            }
            SectionKind::Empty => String::new(),
        }
    }
}

/// Elasticsearch `bool` query.
#[derive(Debug, Clone, PartialEq)]
pub struct BoolSection {
    pub must: Section,
    pub must_not: Section,
    pub should: Section,
    pub filter: Section,
}

impl Default for BoolSection {
    fn default() -> Self {
        Self {
            must: Section::new(SectionKind::Must),
            must_not: Section::new(SectionKind::MustNot),
            should: Section::new(SectionKind::Should),
            filter: Section::new(SectionKind::Filter),
        }
    }
}

impl BoolSection {
    /// Must, must-not and filter are ANDed; should only applies when all
    /// three of them are vacuous.
    pub fn render(&self) -> String {
        let parts: Vec<String> = [&self.must, &self.must_not, &self.filter]
            .into_iter()
            .map(Section::render)
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            return self.should.render();
        }
        parts.join(" AND ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortClause {
    pub field: String,
    pub order: SortOrder,
}

impl SortClause {
    pub fn render(&self) -> String {
        format!("{} {}", self.field, self.order.as_str())
    }
}

/// The request's `sort` list, rendered as an `ORDER BY` expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSection {
    clauses: Vec<SortClause>,
}

impl SortSection {
    pub fn push(&mut self, field: impl Into<String>, order: SortOrder) {
        self.clauses.push(SortClause {
            field: field.into(),
            order,
        });
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(|c| c.field.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn render(&self) -> String {
        self.clauses
            .iter()
            .map(SortClause::render)
            .collect::<Vec<_>>()
            .join(",")
    }
}
