//! JSON schema to OpenFGA DSL

use super::param_type_keyword;
use crate::fga::schema::{
    AuthorizationModel, ConditionParamType, RelationReference, Userset, SCHEMA_VERSION,
};

/// Render a model as DSL text that [`super::parse`] accepts
pub fn print(model: &AuthorizationModel) -> String {
    let version = if model.schema_version.is_empty() {
        SCHEMA_VERSION
    } else {
        model.schema_version.as_str()
    };
    let mut out = format!("model\n  schema {version}\n");

    for definition in &model.type_definitions {
        out.push_str(&format!("\ntype {}\n", definition.type_name));
        if definition.relations.is_empty() {
            continue;
        }
        out.push_str("  relations\n");
        for (name, rewrite) in &definition.relations {
            let direct = definition
                .metadata
                .as_ref()
                .and_then(|m| m.relations.get(name))
                .map(|r| r.directly_related_user_types.as_slice())
                .unwrap_or_default();
            out.push_str(&format!(
                "    define {name}: {}\n",
                print_rewrite(rewrite, direct, false)
            ));
        }
    }

    for (name, condition) in &model.conditions {
        let params = condition
            .parameters
            .iter()
            .map(|(param, ty)| format!("{param}: {}", print_param_type(ty)))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!("\ncondition {name}({params}) {{\n"));
        for line in condition.expression.lines() {
            out.push_str(&format!("  {}\n", line.trim()));
        }
        out.push_str("}\n");
    }
    out
}

fn print_rewrite(rewrite: &Userset, direct: &[RelationReference], nested: bool) -> String {
    let joined = |children: &[Userset], op: &str| {
        let text = children
            .iter()
            .map(|c| print_rewrite(c, direct, true))
            .collect::<Vec<_>>()
            .join(op);
        if nested {
            format!("({text})")
        } else {
            text
        }
    };

    match rewrite {
        Userset::This(_) => {
            let types = direct.iter().map(print_reference).collect::<Vec<_>>().join(", ");
            format!("[{types}]")
        }
        Userset::ComputedUserset(r) => r.relation.clone(),
        Userset::TupleToUserset(t) => {
            format!("{} from {}", t.computed_userset.relation, t.tupleset.relation)
        }
        Userset::Union(u) => joined(&u.child, " or "),
        Userset::Intersection(i) => joined(&i.child, " and "),
        Userset::Difference(d) => {
            let text = format!(
                "{} but not {}",
                print_rewrite(&d.base, direct, true),
                print_rewrite(&d.subtract, direct, true)
            );
            if nested {
                format!("({text})")
            } else {
                text
            }
        }
    }
}

fn print_reference(reference: &RelationReference) -> String {
    let mut out = reference.type_name.clone();
    if reference.wildcard.is_some() {
        out.push_str(":*");
    } else if let Some(relation) = &reference.relation {
        out.push('#');
        out.push_str(relation);
    }
    if !reference.condition.is_empty() {
        out.push_str(" with ");
        out.push_str(&reference.condition);
    }
    out
}

fn print_param_type(param: &ConditionParamType) -> String {
    let keyword = param_type_keyword(&param.type_name)
        .map(str::to_string)
        .unwrap_or_else(|| {
            param
                .type_name
                .trim_start_matches("TYPE_NAME_")
                .to_lowercase()
        });
    match param.generic_types.first() {
        Some(inner) => format!("{keyword}<{}>", print_param_type(inner)),
        None => keyword,
    }
}
