//! Offline validation of OpenFGAStore bundles
//!
//! Checks a store definition (the `spec.store` of an OpenFGAStore, or a
//! plain OpenFGA store file) without talking to a server: the model must
//! translate, every tuple must fit the model, and every test must reference
//! types and relations the model defines.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde_yaml::Value;

use crate::crd::{ModelTest, OpenFGAStore, StoreDefinition, TupleKey};
use crate::fga::dsl;
use crate::fga::schema::{AuthorizationModel, RelationReference, TypeDefinition};
use crate::Error;

/// A single problem found in a bundle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issue {
    /// Where in the bundle, e.g. `tuples[2]` or `tests[viewers].check[0]`
    pub location: String,
    /// What is wrong
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Result of validating a bundle
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    /// Problems found, in bundle order
    pub issues: Vec<Issue>,
    /// Number of tuples checked (inline plus tuple file)
    pub tuples: usize,
    /// Number of tests checked
    pub tests: usize,
}

impl ValidationReport {
    /// Whether the bundle is valid
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    fn push(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.issues.push(Issue {
            location: location.into(),
            message: message.into(),
        });
    }
}

/// Read a bundle from disk
///
/// Accepts an `OpenFGAStore` manifest, a bare `OpenFGAStoreSpec` (with a
/// `store` key) or an OpenFGA store file.
pub fn load_bundle(path: &Path) -> Result<StoreDefinition, Error> {
    let text = read(path)?;
    let value: Value = serde_yaml::from_str(&text)
        .map_err(|e| Error::serialization(format!("{}: {e}", path.display())))?;

    let definition = if value.get("kind").and_then(Value::as_str) == Some("OpenFGAStore") {
        serde_yaml::from_value::<OpenFGAStore>(value).map(|o| o.spec.store)
    } else if let Some(store) = value.get("store") {
        serde_yaml::from_value::<StoreDefinition>(store.clone())
    } else {
        serde_yaml::from_value::<StoreDefinition>(value)
    };
    definition.map_err(|e| Error::serialization(format!("{}: {e}", path.display())))
}

/// Validate a store definition; relative file references resolve against `base_dir`
///
/// Returns `Err` only when the bundle cannot be read at all (missing model,
/// unreadable files). Problems with its content are reported as issues.
pub fn validate_bundle(
    definition: &StoreDefinition,
    base_dir: &Path,
) -> Result<ValidationReport, Error> {
    let mut report = ValidationReport::default();

    let source = match (&definition.model, &definition.model_file) {
        (Some(inline), Some(_)) => {
            report.push("model_file", "ignored because an inline model is set");
            inline.clone()
        }
        (Some(inline), None) => inline.clone(),
        (None, Some(file)) => read(&base_dir.join(file))?,
        (None, None) => {
            return Err(Error::validation(
                "bundle declares neither model nor model_file",
            ))
        }
    };

    let model = match dsl::parse(&source) {
        Ok(model) => model,
        Err(e) => {
            report.push("model", e.to_string());
            return Ok(report);
        }
    };
    let checker = Checker { model: &model };

    for (i, tuple) in definition.tuples.iter().enumerate() {
        checker.tuple(&mut report, &format!("tuples[{i}]"), tuple);
    }
    if let Some(file) = &definition.tuple_file {
        for (i, tuple) in load_tuples(&base_dir.join(file))?.iter().enumerate() {
            checker.tuple(&mut report, &format!("{file}[{i}]"), tuple);
            report.tuples += 1;
        }
    }
    report.tuples += definition.tuples.len();

    let mut names = BTreeSet::new();
    for test in &definition.tests {
        if !names.insert(test.name.as_str()) {
            report.push(format!("tests[{}]", test.name), "duplicate test name");
        }
        checker.test(&mut report, test);
    }
    report.tests = definition.tests.len();

    Ok(report)
}

fn read(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::validation(format!("cannot read {}: {e}", path.display())))
}

/// Tuple list from a YAML or JSON file
fn load_tuples(path: &Path) -> Result<Vec<TupleKey>, Error> {
    let text = read(path)?;
    let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        serde_json::from_str(&text).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(&text).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| Error::serialization(format!("{}: {e}", path.display())))
}

/// `type:id`
fn split_object(object: &str) -> Option<(&str, &str)> {
    object
        .split_once(':')
        .filter(|(t, id)| !t.is_empty() && !id.is_empty())
}

/// A tuple subject: `type:id`, `type:*` or `type:id#relation`
struct Subject<'a> {
    type_name: &'a str,
    wildcard: bool,
    relation: Option<&'a str>,
}

fn split_subject(user: &str) -> Option<Subject<'_>> {
    let (object, relation) = match user.split_once('#') {
        Some((object, relation)) if !relation.is_empty() => (object, Some(relation)),
        Some(_) => return None,
        None => (user, None),
    };
    let (type_name, id) = split_object(object)?;
    let wildcard = id == "*";
    if wildcard && relation.is_some() {
        return None;
    }
    Some(Subject {
        type_name,
        wildcard,
        relation,
    })
}

struct Checker<'m> {
    model: &'m AuthorizationModel,
}

impl<'m> Checker<'m> {
    fn type_def(&self, name: &str) -> Option<&'m TypeDefinition> {
        self.model.type_definitions.iter().find(|t| t.type_name == name)
    }

    /// Resolve `type:id` and check `relation` exists on the type
    fn object_relation(
        &self,
        report: &mut ValidationReport,
        at: &str,
        object: &str,
        relation: &str,
    ) -> Option<&'m TypeDefinition> {
        let Some((type_name, _)) = split_object(object) else {
            report.push(at, format!("invalid object '{object}', expected 'type:id'"));
            return None;
        };
        let Some(definition) = self.type_def(type_name) else {
            report.push(at, format!("type '{type_name}' is not defined"));
            return None;
        };
        if !definition.relations.contains_key(relation) {
            report.push(at, format!("relation '{relation}' is not defined on type '{type_name}'"));
            return None;
        }
        Some(definition)
    }

    fn subject<'u>(
        &self,
        report: &mut ValidationReport,
        at: &str,
        user: &'u str,
    ) -> Option<Subject<'u>> {
        let Some(subject) = split_subject(user) else {
            report.push(at, format!("invalid user '{user}'"));
            return None;
        };
        let Some(definition) = self.type_def(subject.type_name) else {
            report.push(at, format!("type '{}' is not defined", subject.type_name));
            return None;
        };
        if let Some(relation) = subject.relation {
            if !definition.relations.contains_key(relation) {
                report.push(
                    at,
                    format!("relation '{relation}' is not defined on type '{}'", subject.type_name),
                );
                return None;
            }
        }
        Some(subject)
    }

    fn tuple(&self, report: &mut ValidationReport, at: &str, tuple: &TupleKey) {
        let object = self.object_relation(report, at, &tuple.object, &tuple.relation);
        let subject = self.subject(report, at, &tuple.user);
        let (Some(definition), Some(subject)) = (object, subject) else {
            return;
        };

        let condition = tuple.condition.as_ref().map(|c| c.name.as_str()).unwrap_or("");
        if !condition.is_empty() && !self.model.conditions.contains_key(condition) {
            report.push(at, format!("condition '{condition}' is not defined"));
            return;
        }

        let allowed = definition
            .metadata
            .as_ref()
            .and_then(|m| m.relations.get(&tuple.relation))
            .map(|r| r.directly_related_user_types.as_slice())
            .unwrap_or_default();
        if !allowed.iter().any(|r| admits(r, &subject, condition)) {
            report.push(
                at,
                format!(
                    "'{}' is not directly assignable to {}#{}",
                    tuple.user, definition.type_name, tuple.relation
                ),
            );
        }
    }

    fn test(&self, report: &mut ValidationReport, test: &ModelTest) {
        let at = |what: &str, i: usize| format!("tests[{}].{what}[{i}]", test.name);

        for (i, tuple) in test.tuples.iter().enumerate() {
            self.tuple(report, &at("tuples", i), tuple);
        }
        for (i, check) in test.check.iter().enumerate() {
            let location = at("check", i);
            self.subject(report, &location, &check.user);
            for relation in check.assertions.keys() {
                self.object_relation(report, &location, &check.object, relation);
            }
        }
        for (i, list) in test.list_objects.iter().enumerate() {
            let location = at("list_objects", i);
            self.subject(report, &location, &list.user);
            let Some(definition) = self.type_def(&list.object_type) else {
                report.push(&location, format!("type '{}' is not defined", list.object_type));
                continue;
            };
            for (relation, objects) in &list.assertions {
                if !definition.relations.contains_key(relation) {
                    report.push(
                        &location,
                        format!(
                            "relation '{relation}' is not defined on type '{}'",
                            list.object_type
                        ),
                    );
                }
                for object in objects {
                    if split_object(object).map(|(t, _)| t) != Some(list.object_type.as_str()) {
                        report.push(
                            &location,
                            format!(
                                "expected object '{object}' is not of type '{}'",
                                list.object_type
                            ),
                        );
                    }
                }
            }
        }
        for (i, list) in test.list_users.iter().enumerate() {
            let location = at("list_users", i);
            for filter in &list.user_filter {
                match self.type_def(&filter.user_type) {
                    None => report.push(
                        &location,
                        format!("type '{}' is not defined", filter.user_type),
                    ),
                    Some(definition) => {
                        if let Some(relation) = filter.relation.as_deref() {
                            if !definition.relations.contains_key(relation) {
                                report.push(
                                    &location,
                                    format!(
                                        "relation '{relation}' is not defined on type '{}'",
                                        filter.user_type
                                    ),
                                );
                            }
                        }
                    }
                }
            }
            for (relation, expected) in &list.assertions {
                self.object_relation(report, &location, &list.object, relation);
                for user in &expected.users {
                    self.subject(report, &location, user);
                }
            }
        }
    }
}

/// Whether a directly related user type admits `subject` with `condition`
fn admits(reference: &RelationReference, subject: &Subject<'_>, condition: &str) -> bool {
    reference.type_name == subject.type_name
        && reference.condition == condition
        && reference.wildcard.is_some() == subject.wildcard
        && reference.relation.as_deref() == subject.relation
}
