use graphql_parser::Pos;
use graphql_parser::query::{self as ast, Type, Value};
use indexmap::{IndexMap, IndexSet};

use crate::error::PlanningError;
use crate::operation::{
    FieldSelection, InlineFragment, OperationContext, OperationKind, Selection, TYPENAME, key_alias, push_selection,
};
use crate::plan::{FetchNode, FlattenNode, PathElement, PlanNode, QueryPlan, Representation, ResponsePath};
use crate::schema::{FieldSet, FieldSetItem};

pub(crate) const REPRESENTATIONS_VAR: &str = "representations";
pub(crate) const ENTITIES: &str = "_entities";

/// Builds the execution plan of an operation.
///
/// A pure function of the schema snapshot and the operation, so plans can be cached.
pub fn build_query_plan(context: &OperationContext) -> Result<QueryPlan, PlanningError> {
    let planner = QueryPlanner { context };
    let plan = planner.plan()?;
    tracing::trace!("query plan\n{plan}");
    Ok(plan)
}

/// Fields assigned to one service at one point of the response.
#[derive(Debug)]
struct FetchGroup {
    service: String,
    /// Where the group's results are merged; empty for root fetches.
    merge_path: ResponsePath,
    /// Set for entity fetches.
    representation: Option<Representation>,
    selections: Vec<Selection>,
    /// Groups needing keys this group fetches.
    dependents: Vec<FetchGroup>,
}

impl FetchGroup {
    fn root(service: &str) -> Self {
        FetchGroup {
            service: service.to_string(),
            merge_path: ResponsePath::default(),
            representation: None,
            selections: Vec::new(),
            dependents: Vec::new(),
        }
    }
}

struct QueryPlanner<'a> {
    context: &'a OperationContext,
}

impl QueryPlanner<'_> {
    fn plan(&self) -> Result<QueryPlan, PlanningError> {
        let root_type = self.context.root_type.as_str();
        let mut groups: Vec<FetchGroup> = Vec::new();

        for selection in &self.context.selections {
            // Fragments on the root type were inlined during normalization.
            let Selection::Field(field) = selection else {
                continue;
            };
            if field.name == TYPENAME || field.is_introspection() {
                continue;
            }

            let service = self
                .context
                .schema
                .field(root_type, &field.name)
                .and_then(|definition| definition.service.clone())
                .ok_or_else(|| PlanningError::UnresolvableField {
                    type_name: root_type.to_string(),
                    field: field.name.clone(),
                })?;

            // Mutations run in document order, so only consecutive fields share a fetch.
            let index = match self.context.kind {
                OperationKind::Query => groups.iter().position(|group| group.service == service),
                OperationKind::Mutation => groups
                    .last()
                    .filter(|group| group.service == service)
                    .map(|_| groups.len() - 1),
            };
            let index = index.unwrap_or_else(|| {
                groups.push(FetchGroup::root(&service));
                groups.len() - 1
            });

            let group = &mut groups[index];
            self.plan_selections(
                &group.service,
                root_type,
                std::slice::from_ref(selection),
                &self.context.selections,
                &ResponsePath::default(),
                &mut group.selections,
                &mut group.dependents,
            )?;
        }

        let nodes = groups
            .into_iter()
            .map(|group| self.group_node(group))
            .collect::<Result<Vec<_>, _>>()?;

        let node = match self.context.kind {
            OperationKind::Query => PlanNode::parallel(nodes),
            OperationKind::Mutation => PlanNode::sequence(nodes),
        };
        Ok(QueryPlan { node })
    }

    /// Assigns `selections` of `parent_type` at `path` to `service`, appending
    /// what `service` resolves to `out` and everything else to `dependents`.
    ///
    /// `siblings` is the operation's whole selection set at `path`, whose
    /// response keys fields added by the planner must not collide with.
    #[allow(clippy::too_many_arguments)]
    fn plan_selections(
        &self,
        service: &str,
        parent_type: &str,
        selections: &[Selection],
        siblings: &[Selection],
        path: &ResponsePath,
        out: &mut Vec<Selection>,
        dependents: &mut Vec<FetchGroup>,
    ) -> Result<(), PlanningError> {
        let schema = &self.context.schema;

        for selection in selections {
            let field = match selection {
                Selection::InlineFragment(fragment) => {
                    let mut inner = Vec::new();
                    self.plan_selections(
                        service,
                        &fragment.type_condition,
                        &fragment.selections,
                        siblings,
                        path,
                        &mut inner,
                        dependents,
                    )?;
                    if !inner.is_empty() {
                        push_selection(
                            out,
                            Selection::InlineFragment(InlineFragment {
                                type_condition: fragment.type_condition.clone(),
                                selections: inner,
                            }),
                        );
                    }
                    continue;
                }
                Selection::Field(field) => field,
            };

            if field.name == TYPENAME {
                push_selection(out, selection.clone());
                continue;
            }

            let parent = schema
                .composite(parent_type)
                .ok_or_else(|| PlanningError::UnknownType(parent_type.to_string()))?;
            let definition = parent.fields.get(&field.name).ok_or_else(|| PlanningError::UnknownField {
                type_name: parent_type.to_string(),
                field: field.name.clone(),
            })?;

            if parent.resolvable_by(service, &field.name) {
                let mut local = FieldSelection {
                    selections: Vec::new(),
                    ..field.clone()
                };
                if !field.selections.is_empty() {
                    let mut child_path = path.join(PathElement::Key(field.response_key().to_string()));
                    if definition.ty.is_list {
                        child_path = child_path.join(PathElement::Flatten);
                    }
                    let child_type = definition.ty.name.as_str();
                    if schema.composite(child_type).is_some_and(|ty| ty.is_abstract()) {
                        for injected in injected_selections(&[typename_item()], &field.selections) {
                            push_selection(&mut local.selections, injected);
                        }
                    }
                    self.plan_selections(
                        service,
                        child_type,
                        &field.selections,
                        &field.selections,
                        &child_path,
                        &mut local.selections,
                        dependents,
                    )?;
                }
                push_selection(out, Selection::Field(local));
                continue;
            }

            // The field lives in another service: fetch the key here, then the
            // field through an entity fetch once the key is known.
            let owner = definition
                .service
                .as_deref()
                .ok_or_else(|| PlanningError::UnresolvableField {
                    type_name: parent_type.to_string(),
                    field: field.name.clone(),
                })?;
            let key = definition
                .key
                .as_ref()
                .filter(|key| key.top_level_names().all(|name| parent.resolvable_by(service, name)))
                .or_else(|| parent.representation_key(service, owner))
                .ok_or_else(|| PlanningError::NoUsableKey {
                    type_name: parent_type.to_string(),
                    service: service.to_string(),
                })?;

            let identity: Vec<FieldSetItem> = std::iter::once(typename_item()).chain(key.0.iter().cloned()).collect();
            for injected in injected_selections(&identity, siblings)
                .into_iter()
                .chain(injected_selections(&definition.requires.0, siblings))
            {
                push_selection(out, injected);
            }

            let index = dependents.iter().position(|group| {
                group.service == owner
                    && group.merge_path == *path
                    && group
                        .representation
                        .as_ref()
                        .is_some_and(|representation| representation.type_name == parent_type)
            });
            let index = index.unwrap_or_else(|| {
                dependents.push(FetchGroup {
                    service: owner.to_string(),
                    merge_path: path.clone(),
                    representation: Some(Representation {
                        type_name: parent_type.to_string(),
                        key: key.clone(),
                        requires: FieldSet::default(),
                        aliases: injected_aliases(&identity, siblings),
                    }),
                    selections: injected_selections(&identity, siblings),
                    dependents: Vec::new(),
                });
                dependents.len() - 1
            });

            let group = &mut dependents[index];
            if let Some(representation) = &mut group.representation {
                for item in &definition.requires.0 {
                    if !representation.requires.0.contains(item) {
                        representation.requires.0.push(item.clone());
                    }
                }
                representation
                    .aliases
                    .extend(injected_aliases(&definition.requires.0, siblings));
            }
            self.plan_selections(
                owner,
                parent_type,
                std::slice::from_ref(selection),
                siblings,
                path,
                &mut group.selections,
                &mut group.dependents,
            )?;
        }

        Ok(())
    }

    fn group_node(&self, group: FetchGroup) -> Result<PlanNode, PlanningError> {
        let fetch = PlanNode::Fetch(self.fetch_node(&group));
        let fetch = if group.merge_path.is_empty() {
            fetch
        } else {
            PlanNode::Flatten(FlattenNode {
                path: group.merge_path.clone(),
                node: Box::new(fetch),
            })
        };

        let dependents = group
            .dependents
            .into_iter()
            .map(|dependent| self.group_node(dependent))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(match PlanNode::parallel(dependents) {
            Some(dependents) => PlanNode::Sequence {
                nodes: vec![fetch, dependents],
            },
            None => fetch,
        })
    }

    fn fetch_node(&self, group: &FetchGroup) -> FetchNode {
        let mut used_variables = IndexSet::new();
        collect_variables(&group.selections, &mut used_variables);
        let variable_usages: Vec<String> = self
            .context
            .variable_definitions
            .iter()
            .map(|definition| definition.name.clone())
            .filter(|name| used_variables.contains(name))
            .collect();

        let mut variable_definitions = Vec::new();
        if group.representation.is_some() {
            variable_definitions.push(ast::VariableDefinition {
                position: Pos::default(),
                name: REPRESENTATIONS_VAR.to_string(),
                var_type: representations_type(),
                default_value: None,
            });
        }
        variable_definitions.extend(
            variable_usages
                .iter()
                .filter_map(|name| self.context.variable_definition(name))
                .cloned(),
        );

        let kind = match group.representation {
            Some(_) => OperationKind::Query,
            None => self.context.kind,
        };

        let (root_selections, response_keys) = match &group.representation {
            Some(representation) => {
                let entities = Selection::Field(FieldSelection {
                    arguments: vec![(
                        REPRESENTATIONS_VAR.to_string(),
                        Value::Variable(REPRESENTATIONS_VAR.to_string()),
                    )],
                    selections: vec![Selection::InlineFragment(InlineFragment {
                        type_condition: representation.type_name.clone(),
                        selections: group.selections.clone(),
                    })],
                    ..FieldSelection::new(ENTITIES)
                });
                (selection_set(std::slice::from_ref(&entities)), vec![ENTITIES.to_string()])
            }
            None => {
                let response_keys = group
                    .selections
                    .iter()
                    .filter_map(|selection| match selection {
                        Selection::Field(field) => Some(field.response_key().to_string()),
                        Selection::InlineFragment(_) => None,
                    })
                    .collect();
                (selection_set(&group.selections), response_keys)
            }
        };

        let definition = match kind {
            OperationKind::Mutation => ast::OperationDefinition::Mutation(ast::Mutation {
                position: Pos::default(),
                name: None,
                variable_definitions,
                directives: Vec::new(),
                selection_set: root_selections,
            }),
            OperationKind::Query if variable_definitions.is_empty() => {
                ast::OperationDefinition::SelectionSet(root_selections)
            }
            OperationKind::Query => ast::OperationDefinition::Query(ast::Query {
                position: Pos::default(),
                name: None,
                variable_definitions,
                directives: Vec::new(),
                selection_set: root_selections,
            }),
        };

        FetchNode {
            service_name: group.service.clone(),
            operation_kind: kind,
            operation: render(definition),
            variable_usages,
            response_keys,
            requires: group.representation.clone(),
        }
    }
}

fn typename_item() -> FieldSetItem {
    FieldSetItem {
        name: TYPENAME.to_string(),
        selections: Vec::new(),
    }
}

fn field_selection(item: &FieldSetItem) -> FieldSelection {
    FieldSelection {
        selections: item
            .selections
            .iter()
            .map(|child| Selection::Field(field_selection(child)))
            .collect(),
        ..FieldSelection::new(item.name.clone())
    }
}

/// Selections for fields the planner needs next to the operation's own `siblings`.
///
/// A field whose response key the operation already uses for a different field
/// is fetched under a reserved alias.
fn injected_selections(items: &[FieldSetItem], siblings: &[Selection]) -> Vec<Selection> {
    items
        .iter()
        .map(|item| {
            let mut field = field_selection(item);
            if collides(item, siblings) {
                field.alias = Some(key_alias(&item.name));
            }
            Selection::Field(field)
        })
        .collect()
}

/// The aliases `injected_selections` gives `items`, by field name.
fn injected_aliases(items: &[FieldSetItem], siblings: &[Selection]) -> IndexMap<String, String> {
    items
        .iter()
        .filter(|item| collides(item, siblings))
        .map(|item| (item.name.clone(), key_alias(&item.name)))
        .collect()
}

/// Does a selection in `siblings` use `item.name` as response key for a field
/// `item` cannot be merged with?
fn collides(item: &FieldSetItem, siblings: &[Selection]) -> bool {
    siblings.iter().any(|selection| match selection {
        Selection::Field(field) => {
            field.response_key() == item.name
                && (field.name != item.name
                    || !field.arguments.is_empty()
                    || item.selections.iter().any(|child| collides(child, &field.selections)))
        }
        Selection::InlineFragment(fragment) => collides(item, &fragment.selections),
    })
}

fn collect_variables(selections: &[Selection], used: &mut IndexSet<String>) {
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                for (_, value) in &field.arguments {
                    collect_value_variables(value, used);
                }
                for directive in &field.directives {
                    for (_, value) in &directive.arguments {
                        collect_value_variables(value, used);
                    }
                }
                collect_variables(&field.selections, used);
            }
            Selection::InlineFragment(fragment) => collect_variables(&fragment.selections, used),
        }
    }
}

fn collect_value_variables(value: &Value<'static, String>, used: &mut IndexSet<String>) {
    match value {
        Value::Variable(name) => {
            used.insert(name.clone());
        }
        Value::List(items) => items.iter().for_each(|item| collect_value_variables(item, used)),
        Value::Object(fields) => fields.values().for_each(|item| collect_value_variables(item, used)),
        _ => {}
    }
}

/// `[_Any!]!`
fn representations_type() -> Type<'static, String> {
    Type::NonNullType(Box::new(Type::ListType(Box::new(Type::NonNullType(Box::new(
        Type::NamedType("_Any".to_string()),
    ))))))
}

fn selection_set(selections: &[Selection]) -> ast::SelectionSet<'static, String> {
    let items = selections
        .iter()
        .map(|selection| match selection {
            Selection::Field(field) => ast::Selection::Field(ast::Field {
                position: Pos::default(),
                alias: field.alias.clone(),
                name: field.name.clone(),
                arguments: field.arguments.clone(),
                directives: field.directives.clone(),
                selection_set: selection_set(&field.selections),
            }),
            Selection::InlineFragment(fragment) => ast::Selection::InlineFragment(ast::InlineFragment {
                position: Pos::default(),
                type_condition: Some(ast::TypeCondition::On(fragment.type_condition.clone())),
                directives: Vec::new(),
                selection_set: selection_set(&fragment.selections),
            }),
        })
        .collect();
    ast::SelectionSet {
        span: (Pos::default(), Pos::default()),
        items,
    }
}

/// Prints a sub-query without insignificant whitespace.
fn render(definition: ast::OperationDefinition<'static, String>) -> String {
    let document = ast::Document {
        definitions: vec![ast::Definition::Operation(definition)],
    };
    let text = document.to_string();
    graphql_parser::minify_query(text.clone()).unwrap_or_else(|e| {
        tracing::warn!("failed to minify sub-query: {e}");
        text
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::composer::compose;
    use crate::schema::{ServiceDefinition, UnifiedSchema};
    use graphql_parser::parse_query;
    use pretty_assertions::assert_eq;

    fn service(name: &str, schema: &str) -> ServiceDefinition {
        ServiceDefinition {
            name: name.to_string(),
            url: format!("http://{name}/graphql"),
            schema: schema.to_string(),
        }
    }

    fn schema() -> Arc<UnifiedSchema> {
        let products = service(
            "products",
            r#"
            type Query {
              products: [Product!]!
              topProduct: Product
              search(term: String!, first: Int = 5): [Searchable]
            }
            type Mutation { createProduct(name: String!): Product }
            interface Searchable { title: String }
            type Product implements Searchable @key(fields: "id") {
              id: ID!
              name: String
              title: String
              weight: Float
            }
            "#,
        );
        let pricing = service(
            "pricing",
            r#"
            type Query { currencies: [String] }
            type Mutation { setDiscount(percent: Int!): Int }
            extend type Product @key(fields: "id") {
              id: ID! @external
              weight: Float @external
              price(currency: String): Float
              shippingCost: Float @requires(fields: "weight")
              seller: Seller
            }
            type Seller @key(fields: "id") { id: ID! rating: Float }
            "#,
        );
        let reviews = service(
            "reviews",
            r#"
            extend type Product @key(fields: "id") {
              id: ID! @external
              reviews: [Review]
            }
            type Review { body: String }
            extend type Query { latestReviews: [Review] }
            "#,
        );
        Arc::new(compose(&[products, pricing, reviews]).unwrap())
    }

    fn plan(query: &str) -> QueryPlan {
        let document = parse_query::<String>(query).unwrap().into_static();
        let context = OperationContext::new(schema(), &document, None).unwrap();
        build_query_plan(&context).unwrap()
    }

    fn fetch(node: &PlanNode) -> &FetchNode {
        match node {
            PlanNode::Fetch(fetch) => fetch,
            PlanNode::Flatten(flatten) => fetch(&flatten.node),
            other => panic!("expected a fetch, got {other:?}"),
        }
    }

    #[test]
    fn plans_an_entity_join_as_a_sequence() {
        let plan = plan("{ products { name price } }");

        let Some(PlanNode::Sequence { nodes }) = &plan.node else {
            panic!("expected a sequence, got {plan}");
        };
        assert_eq!(nodes.len(), 2);

        let products = fetch(&nodes[0]);
        assert_eq!(products.service_name, "products");
        assert_eq!(products.operation, "{products{name __typename id}}");
        assert_eq!(products.requires, None);

        let PlanNode::Flatten(flatten) = &nodes[1] else {
            panic!("expected a flatten node");
        };
        assert_eq!(flatten.path.to_string(), "products.@");
        let pricing = fetch(&nodes[1]);
        assert_eq!(pricing.service_name, "pricing");
        assert_eq!(
            pricing.operation,
            "query($representations:[_Any!]!){_entities(representations:$representations){...on Product{__typename id price}}}"
        );
        let requires = pricing.requires.as_ref().unwrap();
        assert_eq!(requires.type_name, "Product");
        assert_eq!(requires.key.to_string(), "id");
    }

    #[test]
    fn planning_is_deterministic() {
        let query = "{ topProduct { name reviews { body } price shippingCost } currencies latestReviews { body } }";
        assert_eq!(plan(query), plan(query));
        assert_eq!(plan(query).to_string(), plan(query).to_string());
    }

    #[test]
    fn independent_root_fields_run_in_parallel() {
        let plan = plan("{ currencies latestReviews { body } products { id } }");
        let Some(PlanNode::Parallel { nodes }) = &plan.node else {
            panic!("expected a parallel node, got {plan}");
        };
        let services: Vec<_> = nodes.iter().map(|node| fetch(node).service_name.as_str()).collect();
        assert_eq!(services, vec!["pricing", "reviews", "products"]);
    }

    #[test]
    fn entity_fetches_of_different_services_run_in_parallel() {
        let plan = plan("{ topProduct { name price reviews { body } } }");
        let Some(PlanNode::Sequence { nodes }) = &plan.node else {
            panic!("expected a sequence, got {plan}");
        };
        let Some(PlanNode::Parallel { nodes: dependents }) = nodes.get(1) else {
            panic!("expected parallel entity fetches, got {plan}");
        };
        assert_eq!(fetch(&dependents[0]).service_name, "pricing");
        assert_eq!(fetch(&dependents[1]).service_name, "reviews");
        let PlanNode::Flatten(flatten) = &dependents[1] else {
            panic!("expected a flatten node");
        };
        assert_eq!(flatten.path.to_string(), "topProduct");
    }

    #[test]
    fn requires_fields_are_fetched_and_sent_in_representations() {
        let plan = plan("{ topProduct { shippingCost } }");
        let fetches = plan.fetch_nodes();
        assert_eq!(fetches[0].operation, "{topProduct{__typename id weight}}");
        let requires = fetches[1].requires.as_ref().unwrap();
        assert_eq!(requires.requires.to_string(), "weight");
    }

    #[test]
    fn nested_entities_chain_through_the_owning_service() {
        let sellers = plan("{ products { seller { rating } } }");
        let fetches = sellers.fetch_nodes();
        assert_eq!(fetches.len(), 2);
        assert_eq!(fetches[1].service_name, "pricing");
        assert!(fetches[1].operation.contains("seller{rating}"));

        let joined = plan("{ products { reviews { body } price } }");
        assert_eq!(joined.fetch_nodes().len(), 3);
    }

    #[test]
    fn forwards_only_used_variables_with_their_definitions() {
        let plan = plan(
            r#"query($term: String!, $currency: String = "EUR", $unused: Int) {
                 search(term: $term) { title }
                 topProduct { price(currency: $currency) }
               }"#,
        );
        let fetches = plan.fetch_nodes();
        let products = fetches.iter().find(|fetch| fetch.requires.is_none()).unwrap();
        assert_eq!(products.variable_usages, vec!["term".to_string()]);
        assert!(products.operation.starts_with("query($term:String!){"));
        assert!(products.operation.contains("search(term:$term){__typename title}"));

        let pricing = fetches.iter().find(|fetch| fetch.requires.is_some()).unwrap();
        assert_eq!(pricing.variable_usages, vec!["currency".to_string()]);
        assert!(
            pricing
                .operation
                .starts_with("query($representations:[_Any!]!$currency:String=\"EUR\"){")
        );
    }

    #[test]
    fn mutations_run_in_document_order() {
        let plan = plan(r#"mutation { a: createProduct(name: "a") { id } setDiscount(percent: 5) b: createProduct(name: "b") { id } }"#);
        let Some(PlanNode::Sequence { nodes }) = &plan.node else {
            panic!("expected a sequence, got {plan}");
        };
        let services: Vec<_> = nodes.iter().map(|node| fetch(node).service_name.as_str()).collect();
        assert_eq!(services, vec!["products", "pricing", "products"]);
        assert_eq!(fetch(&nodes[0]).operation, r#"mutation{a:createProduct(name:"a"){id}}"#);
    }

    #[test]
    fn introspection_only_operations_have_no_fetches() {
        let plan = plan("{ __typename __schema { queryType { name } } }");
        assert_eq!(plan.node, None);
    }

    #[test]
    fn variable_conditions_are_forwarded() {
        let plan = plan("query($withPrice: Boolean!) { products { name price @include(if: $withPrice) } }");
        let fetches = plan.fetch_nodes();
        assert!(fetches[1].operation.contains("price@include(if:$withPrice)"));
        assert_eq!(fetches[1].variable_usages, vec!["withPrice".to_string()]);
    }

    #[test]
    fn key_fields_move_to_reserved_aliases_when_their_names_are_taken() {
        let products = plan("{ products { id: name price } }");
        let fetches = products.fetch_nodes();
        assert_eq!(fetches[0].operation, "{products{id:name __typename __key_id:id}}");
        assert_eq!(
            fetches[1].operation,
            "query($representations:[_Any!]!){_entities(representations:$representations){...on Product{__typename __key_id:id price}}}"
        );
        let representation = fetches[1].requires.as_ref().unwrap();
        assert_eq!(representation.response_key("id"), "__key_id");
        assert_eq!(representation.response_key(TYPENAME), TYPENAME);

        let typename = plan("{ topProduct { __typename: name shippingCost } }");
        let fetches = typename.fetch_nodes();
        assert_eq!(
            fetches[0].operation,
            "{topProduct{__typename:name __key___typename:__typename id weight}}"
        );
        assert_eq!(fetches[1].requires.as_ref().unwrap().response_key(TYPENAME), "__key___typename");
    }

    #[test]
    fn strings_in_arguments_are_escaped() {
        let plan = plan(r#"mutation { createProduct(name: "say \"hi\"") { id } }"#);
        assert_eq!(plan.fetch_nodes()[0].operation, r#"mutation{createProduct(name:"say \"hi\""){id}}"#);
    }
}
