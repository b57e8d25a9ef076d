use std::collections::HashMap;
use std::sync::Arc;

use graphql_parser::query::{
    Definition, Directive, Document, FragmentDefinition, OperationDefinition, Selection as AstSelection,
    SelectionSet, TypeCondition, Value, VariableDefinition,
};
use serde::Serialize;
use serde_json::Map;

use crate::error::PlanningError;
use crate::schema::UnifiedSchema;

pub const TYPENAME: &str = "__typename";
const INTROSPECTION_FIELDS: [&str; 2] = ["__schema", "__type"];
/// Prefix of the aliases the gateway fetches its own fields under when the
/// operation already uses their names as response keys.
const KEY_ALIAS_PREFIX: &str = "__key_";
const TYPENAME_KEY_ALIAS: &str = "__key___typename";

pub fn key_alias(field: &str) -> String {
    format!("{KEY_ALIAS_PREFIX}{field}")
}

/// Runtime type of a backend object, preferring the `__typename` the gateway asked for.
pub fn runtime_type(object: &Map<String, serde_json::Value>) -> Option<&str> {
    object
        .get(TYPENAME_KEY_ALIAS)
        .or_else(|| object.get(TYPENAME))
        .and_then(serde_json::Value::as_str)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        }
    }
}

/// Selection tree with fragments expanded and static conditions folded.
#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    Field(FieldSelection),
    /// Kept only when the type condition differs from the parent type.
    InlineFragment(InlineFragment),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSelection {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, Value<'static, String>)>,
    /// Conditions depending on variables, forwarded to backends as-is.
    pub directives: Vec<Directive<'static, String>>,
    pub selections: Vec<Selection>,
}

impl FieldSelection {
    pub fn new(name: impl Into<String>) -> Self {
        FieldSelection {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            directives: Vec::new(),
            selections: Vec::new(),
        }
    }

    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn is_introspection(&self) -> bool {
        INTROSPECTION_FIELDS.contains(&self.name.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InlineFragment {
    pub type_condition: String,
    pub selections: Vec<Selection>,
}

/// Adds `selection`, merging it into an existing identical field or fragment.
pub fn push_selection(selections: &mut Vec<Selection>, selection: Selection) {
    match selection {
        Selection::Field(field) => {
            let existing = selections.iter_mut().find_map(|candidate| match candidate {
                Selection::Field(existing)
                    if existing.response_key() == field.response_key()
                        && existing.name == field.name
                        && existing.arguments == field.arguments
                        && existing.directives == field.directives =>
                {
                    Some(existing)
                }
                _ => None,
            });
            match existing {
                Some(existing) => {
                    for child in field.selections {
                        push_selection(&mut existing.selections, child);
                    }
                }
                None => selections.push(Selection::Field(field)),
            }
        }
        Selection::InlineFragment(fragment) => {
            let existing = selections.iter_mut().find_map(|candidate| match candidate {
                Selection::InlineFragment(existing) if existing.type_condition == fragment.type_condition => {
                    Some(existing)
                }
                _ => None,
            });
            match existing {
                Some(existing) => {
                    for child in fragment.selections {
                        push_selection(&mut existing.selections, child);
                    }
                }
                None => selections.push(Selection::InlineFragment(fragment)),
            }
        }
    }
}

/// A request's operation resolved against one schema snapshot.
///
/// Built once per request and never mutated by planning or execution.
#[derive(Debug)]
pub struct OperationContext {
    pub schema: Arc<UnifiedSchema>,
    pub operation: OperationDefinition<'static, String>,
    pub operation_name: Option<String>,
    pub kind: OperationKind,
    pub root_type: String,
    pub variable_definitions: Vec<VariableDefinition<'static, String>>,
    pub fragments: HashMap<String, FragmentDefinition<'static, String>>,
    pub selections: Vec<Selection>,
}

impl OperationContext {
    pub fn new(
        schema: Arc<UnifiedSchema>,
        document: &Document<'static, String>,
        operation_name: Option<&str>,
    ) -> Result<Self, PlanningError> {
        let operation = select_operation(document, operation_name)?.clone();

        let (kind, variable_definitions, selection_set) = match &operation {
            OperationDefinition::SelectionSet(selection_set) => (OperationKind::Query, Vec::new(), selection_set),
            OperationDefinition::Query(query) => (
                OperationKind::Query,
                query.variable_definitions.clone(),
                &query.selection_set,
            ),
            OperationDefinition::Mutation(mutation) => (
                OperationKind::Mutation,
                mutation.variable_definitions.clone(),
                &mutation.selection_set,
            ),
            OperationDefinition::Subscription(_) => return Err(PlanningError::SubscriptionsUnsupported),
        };

        let root_type = match kind {
            OperationKind::Query => schema.query_type.clone(),
            OperationKind::Mutation => schema
                .mutation_type
                .clone()
                .ok_or_else(|| PlanningError::UnknownType("Mutation".to_string()))?,
        };

        let fragments: HashMap<String, FragmentDefinition<'static, String>> = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                Definition::Fragment(fragment) => Some((fragment.name.clone(), fragment.clone())),
                Definition::Operation(_) => None,
            })
            .collect();

        let normalizer = Normalizer {
            schema: &schema,
            fragments: &fragments,
        };
        let selections = normalizer.normalize(&root_type, selection_set, &[], &mut Vec::new())?;

        Ok(OperationContext {
            operation_name: operation_name.map(str::to_string),
            schema,
            kind,
            root_type,
            variable_definitions,
            fragments,
            selections,
            operation,
        })
    }

    pub fn variable_definition(&self, name: &str) -> Option<&VariableDefinition<'static, String>> {
        self.variable_definitions.iter().find(|definition| definition.name == name)
    }
}

fn select_operation<'d>(
    document: &'d Document<'static, String>,
    operation_name: Option<&str>,
) -> Result<&'d OperationDefinition<'static, String>, PlanningError> {
    let mut operations = document.definitions.iter().filter_map(|definition| match definition {
        Definition::Operation(operation) => Some(operation),
        Definition::Fragment(_) => None,
    });

    match operation_name {
        Some(name) => operations
            .find(|operation| operation_name_of(operation) == Some(name))
            .ok_or_else(|| PlanningError::UnknownOperation(name.to_string())),
        None => {
            let first = operations.next().ok_or(PlanningError::NoOperation)?;
            if operations.next().is_some() {
                return Err(PlanningError::AmbiguousOperation);
            }
            Ok(first)
        }
    }
}

fn operation_name_of<'d>(operation: &'d OperationDefinition<'static, String>) -> Option<&'d str> {
    match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(query) => query.name.as_deref(),
        OperationDefinition::Mutation(mutation) => mutation.name.as_deref(),
        OperationDefinition::Subscription(subscription) => subscription.name.as_deref(),
    }
}

struct Normalizer<'a> {
    schema: &'a UnifiedSchema,
    fragments: &'a HashMap<String, FragmentDefinition<'static, String>>,
}

impl Normalizer<'_> {
    /// `inherited` holds variable conditions of enclosing fragments, pushed down
    /// onto every field they contain. `visiting` guards against fragment cycles.
    fn normalize(
        &self,
        parent_type: &str,
        selection_set: &SelectionSet<'static, String>,
        inherited: &[Directive<'static, String>],
        visiting: &mut Vec<String>,
    ) -> Result<Vec<Selection>, PlanningError> {
        let mut selections = Vec::new();

        for item in &selection_set.items {
            match item {
                AstSelection::Field(field) => {
                    let Some(mut directives) = fold_conditions(&field.directives) else {
                        continue;
                    };
                    directives.extend(inherited.iter().cloned());

                    let mut normalized = FieldSelection {
                        alias: field.alias.clone(),
                        name: field.name.clone(),
                        arguments: field.arguments.clone(),
                        directives,
                        selections: Vec::new(),
                    };

                    if field.name == TYPENAME || normalized.is_introspection() {
                        push_selection(&mut selections, Selection::Field(normalized));
                        continue;
                    }

                    let definition = self
                        .schema
                        .field(parent_type, &field.name)
                        .ok_or_else(|| PlanningError::UnknownField {
                            type_name: parent_type.to_string(),
                            field: field.name.clone(),
                        })?;

                    if !field.selection_set.items.is_empty() {
                        normalized.selections =
                            self.normalize(&definition.ty.name, &field.selection_set, &[], visiting)?;
                    }
                    push_selection(&mut selections, Selection::Field(normalized));
                }
                AstSelection::FragmentSpread(spread) => {
                    let Some(mut directives) = fold_conditions(&spread.directives) else {
                        continue;
                    };
                    directives.extend(inherited.iter().cloned());

                    let fragment = self
                        .fragments
                        .get(&spread.fragment_name)
                        .ok_or_else(|| PlanningError::UnknownFragment(spread.fragment_name.clone()))?;
                    if visiting.contains(&spread.fragment_name) {
                        return Err(PlanningError::UnknownFragment(spread.fragment_name.clone()));
                    }
                    let TypeCondition::On(type_condition) = &fragment.type_condition;

                    visiting.push(spread.fragment_name.clone());
                    self.expand(
                        &mut selections,
                        parent_type,
                        type_condition,
                        &fragment.selection_set,
                        &directives,
                        visiting,
                    )?;
                    visiting.pop();
                }
                AstSelection::InlineFragment(inline) => {
                    let Some(mut directives) = fold_conditions(&inline.directives) else {
                        continue;
                    };
                    directives.extend(inherited.iter().cloned());

                    let type_condition = match &inline.type_condition {
                        Some(TypeCondition::On(type_condition)) => type_condition.as_str(),
                        None => parent_type,
                    };
                    self.expand(
                        &mut selections,
                        parent_type,
                        type_condition,
                        &inline.selection_set,
                        &directives,
                        visiting,
                    )?;
                }
            }
        }

        Ok(selections)
    }

    fn expand(
        &self,
        selections: &mut Vec<Selection>,
        parent_type: &str,
        type_condition: &str,
        selection_set: &SelectionSet<'static, String>,
        directives: &[Directive<'static, String>],
        visiting: &mut Vec<String>,
    ) -> Result<(), PlanningError> {
        if !self.schema.is_composite(type_condition) {
            return Err(PlanningError::UnknownType(type_condition.to_string()));
        }

        let inner = self.normalize(type_condition, selection_set, directives, visiting)?;
        if type_condition == parent_type {
            for selection in inner {
                push_selection(selections, selection);
            }
        } else if !inner.is_empty() {
            push_selection(
                selections,
                Selection::InlineFragment(InlineFragment {
                    type_condition: type_condition.to_string(),
                    selections: inner,
                }),
            );
        }
        Ok(())
    }
}

/// Resolves `@skip`/`@include` with literal arguments.
///
/// Returns `None` when the selection is statically excluded, otherwise the
/// directives that still have to be evaluated against variables.
fn fold_conditions(directives: &[Directive<'static, String>]) -> Option<Vec<Directive<'static, String>>> {
    let mut remaining = Vec::new();
    for directive in directives {
        let excluded_when = match directive.name.as_str() {
            "skip" => true,
            "include" => false,
            _ => {
                remaining.push(directive.clone());
                continue;
            }
        };
        match condition_argument(directive) {
            Some(Value::Boolean(value)) if *value == excluded_when => return None,
            Some(Value::Boolean(_)) => {}
            _ => remaining.push(directive.clone()),
        }
    }
    Some(remaining)
}

fn condition_argument<'d>(directive: &'d Directive<'static, String>) -> Option<&'d Value<'static, String>> {
    directive
        .arguments
        .iter()
        .find(|(name, _)| name == "if")
        .map(|(_, value)| value)
}

/// Evaluates the variable-dependent `@skip`/`@include` left after folding.
pub fn is_included(directives: &[Directive<'static, String>], variables: &Map<String, serde_json::Value>) -> bool {
    directives.iter().all(|directive| {
        let excluded_when = match directive.name.as_str() {
            "skip" => true,
            "include" => false,
            _ => return true,
        };
        let value = match condition_argument(directive) {
            Some(Value::Variable(name)) => variables.get(name).and_then(serde_json::Value::as_bool),
            Some(Value::Boolean(value)) => Some(*value),
            _ => None,
        };
        value != Some(excluded_when)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::compose;
    use crate::schema::ServiceDefinition;
    use graphql_parser::parse_query;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> Arc<UnifiedSchema> {
        let products = ServiceDefinition {
            name: "products".to_string(),
            url: "http://products/graphql".to_string(),
            schema: r#"
                type Query { products: [Product!]! }
                type Product @key(fields: "id") { id: ID! name: String sku: String }
            "#
            .to_string(),
        };
        Arc::new(compose(&[products]).unwrap())
    }

    fn context(query: &str, operation_name: Option<&str>) -> Result<OperationContext, PlanningError> {
        let document = parse_query::<String>(query).unwrap().into_static();
        OperationContext::new(schema(), &document, operation_name)
    }

    fn field_names(selections: &[Selection]) -> Vec<String> {
        selections
            .iter()
            .map(|selection| match selection {
                Selection::Field(field) => field.response_key().to_string(),
                Selection::InlineFragment(fragment) => format!("... on {}", fragment.type_condition),
            })
            .collect()
    }

    #[test]
    fn expands_fragments_and_merges_duplicate_fields() {
        let context = context(
            r#"
            query Products { products { id ...Details ... on Product { name } } }
            fragment Details on Product { name sku }
            "#,
            None,
        )
        .unwrap();

        let Selection::Field(products) = &context.selections[0] else {
            panic!("expected a field");
        };
        assert_eq!(field_names(&products.selections), vec!["id", "name", "sku"]);
    }

    #[test]
    fn folds_static_conditions_and_keeps_variable_ones() {
        let context = context(
            r#"
            query($withSku: Boolean!) {
              products {
                id @include(if: false)
                name @skip(if: false)
                sku @include(if: $withSku)
              }
            }
            "#,
            None,
        )
        .unwrap();

        let Selection::Field(products) = &context.selections[0] else {
            panic!("expected a field");
        };
        assert_eq!(field_names(&products.selections), vec!["name", "sku"]);
        let Selection::Field(sku) = &products.selections[1] else {
            panic!("expected a field");
        };
        assert_eq!(sku.directives.len(), 1);
        assert!(is_included(&sku.directives, json!({"withSku": true}).as_object().unwrap()));
        assert!(!is_included(&sku.directives, json!({"withSku": false}).as_object().unwrap()));
    }

    #[test]
    fn selects_operations_by_name() {
        let query = "query A { products { id } } query B { products { name } }";
        assert_eq!(context(query, None).unwrap_err(), PlanningError::AmbiguousOperation);
        assert_eq!(
            context(query, Some("C")).unwrap_err(),
            PlanningError::UnknownOperation("C".to_string())
        );

        let context = context(query, Some("B")).unwrap();
        assert_eq!(context.kind, OperationKind::Query);
        assert_eq!(context.operation_name.as_deref(), Some("B"));
    }

    #[test]
    fn rejects_unknown_fields_fragments_and_subscriptions() {
        assert_eq!(
            context("{ products { price } }", None).unwrap_err(),
            PlanningError::UnknownField {
                type_name: "Product".to_string(),
                field: "price".to_string()
            }
        );
        assert_eq!(
            context("{ products { ...Missing } }", None).unwrap_err(),
            PlanningError::UnknownFragment("Missing".to_string())
        );
        assert_eq!(
            context("subscription { products { id } }", None).unwrap_err(),
            PlanningError::SubscriptionsUnsupported
        );
        assert_eq!(
            context("mutation { products { id } }", None).unwrap_err(),
            PlanningError::UnknownType("Mutation".to_string())
        );
    }

    #[test]
    fn runtime_type_prefers_the_reserved_typename() {
        assert_eq!(key_alias(TYPENAME), TYPENAME_KEY_ALIAS);

        let aliased = json!({ "__typename": "lamp", "__key___typename": "Product" });
        assert_eq!(runtime_type(aliased.as_object().unwrap()), Some("Product"));

        let plain = json!({ "__typename": "Product" });
        assert_eq!(runtime_type(plain.as_object().unwrap()), Some("Product"));
        assert_eq!(runtime_type(json!({}).as_object().unwrap()), None);
    }
}
