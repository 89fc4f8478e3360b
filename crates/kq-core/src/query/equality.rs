//! Structural comparison of condition trees.
//!
//! Weaker than `PartialEq`: children of a section are compared as a
//! multiset, and leaves are compared by their rendered SQL ignoring case.
//! Request JSON does not fix the order in which children are collected, so
//! this is what tests compare parsed trees with.

use super::{BoolSection, Clause, Section};

pub fn clauses_equivalent(first: &Clause, second: &Clause) -> bool {
    match (first, second) {
        (Clause::Section(a), Clause::Section(b)) => sections_equivalent(a, b),
        (Clause::Bool(a), Clause::Bool(b)) => bools_equivalent(a, b),
        (Clause::Section(_), _) | (_, Clause::Section(_)) => false,
        (Clause::Bool(_), _) | (_, Clause::Bool(_)) => false,
        (a, b) => a.render().to_lowercase() == b.render().to_lowercase(),
    }
}

fn bools_equivalent(first: &BoolSection, second: &BoolSection) -> bool {
    sections_equivalent(&first.must, &second.must)
        && sections_equivalent(&first.should, &second.should)
        && sections_equivalent(&first.must_not, &second.must_not)
        && sections_equivalent(&first.filter, &second.filter)
}

fn sections_equivalent(first: &Section, second: &Section) -> bool {
    let (a, b) = (first.children(), second.children());
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    a.iter().all(|child| {
        let matched = b
            .iter()
            .enumerate()
            .find(|(i, other)| !used[*i] && clauses_equivalent(child, other))
            .map(|(i, _)| i);
        match matched {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}
