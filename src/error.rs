use std::fmt;

use thiserror::Error;

/// A single schema composition failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error("Failed to parse schema for service {service}: {message}")]
    InvalidSchema { service: String, message: String },
    #[error("Service name {0} is registered more than once")]
    DuplicateService(String),
    #[error("Root field {type_name}.{field} is defined by both {first} and {second}")]
    DuplicateRootField {
        type_name: String,
        field: String,
        first: String,
        second: String,
    },
    #[error("Entity {type_name} is defined by both {first} and {second}; one of them must use `extend type`")]
    DuplicateEntity {
        type_name: String,
        first: String,
        second: String,
    },
    #[error("Value type {type_name} has inconsistent definitions in {first} and {second}")]
    InconsistentValueType {
        type_name: String,
        first: String,
        second: String,
    },
    #[error("Service {service} extends {type_name}, but no service defines it")]
    OrphanedExtension { service: String, type_name: String },
    #[error("Service {service} extends {type_name} without declaring a @key")]
    MissingKey { service: String, type_name: String },
    #[error("Service {service} declares @key(fields: \"{fields}\") on {type_name}, which matches no key of the owning service")]
    InconsistentKey {
        service: String,
        type_name: String,
        fields: String,
    },
    #[error("Key field {type_name}.{field} declared by {service} does not exist")]
    UnknownKeyField {
        service: String,
        type_name: String,
        field: String,
    },
    #[error("Field {type_name}.{field} is resolved by both {first} and {second}")]
    AmbiguousField {
        type_name: String,
        field: String,
        first: String,
        second: String,
    },
    #[error("Field {type_name}.{field} is marked @external in {service} but the owning service does not define it")]
    UnknownExternalField {
        service: String,
        type_name: String,
        field: String,
    },
    #[error("Field {type_name}.{field} in {service} requires {required}, which is not an @external field")]
    InvalidRequires {
        service: String,
        type_name: String,
        field: String,
        required: String,
    },
    #[error("Field {type_name}.{field} in {service} has unknown type {field_type}")]
    UnknownType {
        service: String,
        type_name: String,
        field: String,
        field_type: String,
    },
    #[error("None of the services defines root query fields")]
    EmptyQuery,
}

/// Every error reported by one composition attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositionErrors(pub Vec<CompositionError>);

impl CompositionErrors {
    pub fn push(&mut self, error: CompositionError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompositionError> {
        self.0.iter()
    }
}

impl fmt::Display for CompositionErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schema composition failed with {} error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompositionErrors {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("Failed to parse query: {0}")]
    InvalidQuery(String),
    #[error("Unknown operation named \"{0}\"")]
    UnknownOperation(String),
    #[error("Operation name is required when the document contains several operations")]
    AmbiguousOperation,
    #[error("The document contains no operation")]
    NoOperation,
    #[error("Subscriptions are not supported")]
    SubscriptionsUnsupported,
    #[error("Unknown fragment \"{0}\"")]
    UnknownFragment(String),
    #[error("Unknown type \"{0}\"")]
    UnknownType(String),
    #[error("Cannot query field \"{field}\" on type \"{type_name}\"")]
    UnknownField { type_name: String, field: String },
    #[error("Field {type_name}.{field} is not resolvable by any service")]
    UnresolvableField { type_name: String, field: String },
    #[error("Entity {type_name} has no key usable by service {service}")]
    NoUsableKey { type_name: String, service: String },
}

/// Failure of a single backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Service {0} is not registered")]
    UnknownService(String),
    #[error("Failed to send request to {service}: {reason}")]
    Transport { service: String, reason: String },
    #[error("Failed to parse response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },
}

impl FetchError {
    pub fn service(&self) -> &str {
        match self {
            FetchError::UnknownService(service)
            | FetchError::Transport { service, .. }
            | FetchError::InvalidResponse { service, .. } => service,
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheWriteError {
    #[error("Failed to estimate query plan size: {0}")]
    Estimate(#[from] serde_json::Error),
    #[error("Query plan of {size} bytes exceeds the cache budget of {budget} bytes")]
    TooLarge { size: u64, budget: u64 },
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Composition(#[from] CompositionErrors),
    #[error(transparent)]
    Planning(#[from] PlanningError),
    #[error("Failed to load service list: {0}")]
    ServiceList(String),
    #[error("The gateway has no schema loaded")]
    NotReady,
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Config(#[from] serde_yaml::Error),
}
