//! OpenFGA modeling language
//!
//! [`parse`] turns DSL text into the JSON schema the server accepts,
//! [`print`] goes the other way, and [`equivalent`] compares two models by
//! meaning rather than by text.

mod parser;
mod printer;

pub use parser::parse;
pub use printer::print;

use crate::fga::schema::{AuthorizationModel, Userset};
use crate::Error;

/// DSL keyword to wire name for condition parameter types
const PARAM_TYPES: &[(&str, &str)] = &[
    ("any", "TYPE_NAME_ANY"),
    ("bool", "TYPE_NAME_BOOL"),
    ("string", "TYPE_NAME_STRING"),
    ("int", "TYPE_NAME_INT"),
    ("uint", "TYPE_NAME_UINT"),
    ("double", "TYPE_NAME_DOUBLE"),
    ("duration", "TYPE_NAME_DURATION"),
    ("timestamp", "TYPE_NAME_TIMESTAMP"),
    ("ipaddress", "TYPE_NAME_IPADDRESS"),
    ("map", "TYPE_NAME_MAP"),
    ("list", "TYPE_NAME_LIST"),
];

pub(crate) fn param_type_name(keyword: &str) -> Option<&'static str> {
    PARAM_TYPES
        .iter()
        .find(|(k, _)| *k == keyword)
        .map(|(_, name)| *name)
}

pub(crate) fn param_type_keyword(name: &str) -> Option<&'static str> {
    PARAM_TYPES
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(keyword, _)| *keyword)
}

/// Whether two DSL documents describe the same model
///
/// Ignores comments, whitespace, declaration order, operand order of `or` and
/// `and`, and nesting of same-operator groups. Fails if either side does not
/// translate.
pub fn equivalent(a: &str, b: &str) -> Result<bool, Error> {
    Ok(canonical(parse(a)?) == canonical(parse(b)?))
}

/// Normal form used for comparison
pub fn canonical(mut model: AuthorizationModel) -> AuthorizationModel {
    model.id.clear();
    model
        .type_definitions
        .sort_by(|a, b| a.type_name.cmp(&b.type_name));

    for definition in &mut model.type_definitions {
        for rewrite in definition.relations.values_mut() {
            canonicalize_rewrite(rewrite);
        }
        if let Some(metadata) = &mut definition.metadata {
            metadata.relations.retain(|name, r| {
                !r.directly_related_user_types.is_empty() && definition.relations.contains_key(name)
            });
            for relation in metadata.relations.values_mut() {
                relation.directly_related_user_types.sort();
                relation.directly_related_user_types.dedup();
            }
        }
        if definition
            .metadata
            .as_ref()
            .is_some_and(|m| m.relations.is_empty())
        {
            definition.metadata = None;
        }
    }

    for condition in model.conditions.values_mut() {
        condition.expression = condition
            .expression
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
    }
    model
}

fn canonicalize_rewrite(rewrite: &mut Userset) {
    match rewrite {
        Userset::This(_) => {}
        Userset::ComputedUserset(r) => r.object.clear(),
        Userset::TupleToUserset(t) => {
            t.tupleset.object.clear();
            t.computed_userset.object.clear();
        }
        Userset::Union(u) => {
            u.child = flatten(std::mem::take(&mut u.child), |c| match c {
                Userset::Union(inner) => Ok(inner.child),
                other => Err(other),
            });
        }
        Userset::Intersection(i) => {
            i.child = flatten(std::mem::take(&mut i.child), |c| match c {
                Userset::Intersection(inner) => Ok(inner.child),
                other => Err(other),
            });
        }
        Userset::Difference(d) => {
            canonicalize_rewrite(&mut d.base);
            canonicalize_rewrite(&mut d.subtract);
        }
    }
}

/// Canonicalize children, splice same-operator groups into the parent and sort
fn flatten(
    children: Vec<Userset>,
    same_kind: impl Fn(Userset) -> Result<Vec<Userset>, Userset>,
) -> Vec<Userset> {
    let mut out = Vec::with_capacity(children.len());
    let mut pending = children;
    while let Some(mut child) = pending.pop() {
        canonicalize_rewrite(&mut child);
        match same_kind(child) {
            Ok(grandchildren) => out.extend(grandchildren),
            Err(other) => out.push(other),
        }
    }
    let mut keyed: Vec<(String, Userset)> = out
        .into_iter()
        .map(|c| (serde_json::to_string(&c).unwrap_or_default(), c))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.0 == b.0);
    keyed.into_iter().map(|(_, c)| c).collect()
}
