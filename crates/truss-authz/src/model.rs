use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical namespace for direct subjects with no explicit namespace.
pub const PROFILE_NAMESPACE: &str = "profile";

/// An object a permission applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Namespace the object lives in.
    pub namespace: String,
    /// Object identifier.
    pub id: String,
}

impl ObjectRef {
    /// Creates an object reference.
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }
}

/// The subject side of a relation tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// A concrete entity in a namespace.
    Direct {
        /// Namespace of the entity.
        namespace: String,
        /// Entity identifier.
        id: String,
    },
    /// All entities holding `relation` on `object` in `namespace`.
    Set {
        /// Namespace of the referenced object.
        namespace: String,
        /// Referenced object id.
        object: String,
        /// Relation on the referenced object.
        relation: String,
    },
}

impl Subject {
    /// A direct subject in the canonical profile namespace.
    pub fn profile(id: impl Into<String>) -> Self {
        Subject::Direct {
            namespace: PROFILE_NAMESPACE.to_string(),
            id: id.into(),
        }
    }

    /// Compact display form used in errors and audit records.
    pub fn display(&self) -> String {
        match self {
            Subject::Direct { namespace, id } => format!("{namespace}:{id}"),
            Subject::Set {
                namespace,
                object,
                relation,
            } => format!("{namespace}:{object}#{relation}"),
        }
    }
}

/// A relation tuple: subject stands in `relation` to the object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationTuple {
    /// Namespace of the object.
    pub namespace: String,
    /// Object identifier.
    pub object: String,
    /// Relation name.
    pub relation: String,
    /// The subject.
    pub subject: Subject,
}

/// One permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    /// Object the permission applies to.
    pub object: ObjectRef,
    /// Permission (relation) to check.
    pub permission: String,
    /// Subject requesting access.
    pub subject: Subject,
}

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    /// Whether access is granted.
    pub allowed: bool,
    /// Human-readable reason.
    pub reason: String,
    /// When the decision was made.
    pub checked_at: DateTime<Utc>,
}

impl CheckResult {
    pub(crate) fn new(allowed: bool, reason: impl Into<String>) -> Self {
        Self {
            allowed,
            reason: reason.into(),
            checked_at: Utc::now(),
        }
    }
}

/// Wire form of a subject set, shared by bodies and query parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireSubjectSet {
    pub namespace: String,
    pub object: String,
    pub relation: String,
}

/// Wire form of a relation tuple as the store serializes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireTuple {
    pub namespace: String,
    pub object: String,
    pub relation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_set: Option<WireSubjectSet>,
}

impl WireTuple {
    pub(crate) fn from_tuple(tuple: &RelationTuple) -> Self {
        let (subject_id, subject_set) = match &tuple.subject {
            Subject::Direct { namespace, id } => {
                // Direct subjects in the canonical namespace travel as a
                // bare id; anything else keeps its namespace prefix.
                if namespace == PROFILE_NAMESPACE {
                    (Some(id.clone()), None)
                } else {
                    (Some(format!("{namespace}:{id}")), None)
                }
            }
            Subject::Set {
                namespace,
                object,
                relation,
            } => (
                None,
                Some(WireSubjectSet {
                    namespace: namespace.clone(),
                    object: object.clone(),
                    relation: relation.clone(),
                }),
            ),
        };
        Self {
            namespace: tuple.namespace.clone(),
            object: tuple.object.clone(),
            relation: tuple.relation.clone(),
            subject_id,
            subject_set,
        }
    }

    pub(crate) fn into_tuple(self) -> RelationTuple {
        let subject = match (self.subject_id, self.subject_set) {
            (_, Some(set)) => Subject::Set {
                namespace: set.namespace,
                object: set.object,
                relation: set.relation,
            },
            (Some(id), None) => match id.split_once(':') {
                Some((namespace, bare)) => Subject::Direct {
                    namespace: namespace.to_string(),
                    id: bare.to_string(),
                },
                None => Subject::profile(id),
            },
            (None, None) => Subject::profile(String::new()),
        };
        RelationTuple {
            namespace: self.namespace,
            object: self.object,
            relation: self.relation,
            subject,
        }
    }
}
