//! Observed container state
//!
//! The state manager looks up a workspace's containers by label and
//! classifies what it finds. Queries are non-destructive; the engine's label
//! store is the single source of truth, so there is nothing to persist on
//! our side.

use crate::engine::{ContainerSummary, Engine};
use crate::errors::Result;
use crate::identity::WorkspaceIdentity;
use crate::labels::{LabelSet, LABEL_MANAGED, LABEL_WORKSPACE_ID, LABEL_WORKSPACE_NAME};
use chrono::{DateTime, FixedOffset};
use std::fmt;
use tracing::{debug, instrument, warn};

/// Classified state of a workspace's primary container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// No managed container exists
    Absent,
    /// Exists but is not running
    Created,
    /// Running and current
    Running,
    /// Running or created, but the recorded config hash no longer matches
    Stale,
    /// Managed marker present but the label set is malformed, duplicated, or
    /// from an unrecognized schema
    Broken,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Absent => write!(f, "absent"),
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Stale => write!(f, "stale"),
            ContainerState::Broken => write!(f, "broken"),
        }
    }
}

/// A container recognized as ours via its label set
#[derive(Debug, Clone)]
pub struct ManagedContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    pub status: String,
    pub created_at: Option<DateTime<FixedOffset>>,
    pub labels: LabelSet,
    /// True when the labels came from an earlier schema version
    pub legacy: bool,
}

/// What the state manager observed for a workspace
#[derive(Debug, Clone)]
pub struct Observation {
    pub state: ContainerState,
    /// The primary container, when one was identified
    pub container: Option<ManagedContainer>,
    /// Non-primary managed containers (compose plans)
    pub secondaries: Vec<ManagedContainer>,
    /// Why the state is BROKEN, when it is
    pub broken_reason: Option<String>,
}

impl Observation {
    fn broken(reason: String, container: Option<ManagedContainer>) -> Self {
        Observation {
            state: ContainerState::Broken,
            container,
            secondaries: Vec::new(),
            broken_reason: Some(reason),
        }
    }
}

/// Looks up and classifies a workspace's containers
pub struct StateManager<'a> {
    engine: &'a Engine,
}

impl<'a> StateManager<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Observe the workspace's containers and classify the primary.
    ///
    /// When `desired_config_hash` is given, a hash mismatch (or a legacy
    /// label schema, whose hashes are incomparable) reports STALE.
    #[instrument(skip(self, identity))]
    pub async fn observe(
        &self,
        identity: &WorkspaceIdentity,
        desired_config_hash: Option<&str>,
    ) -> Result<Observation> {
        let mut matches = self
            .engine
            .list_containers(
                &[
                    (LABEL_MANAGED.to_string(), "true".to_string()),
                    (
                        LABEL_WORKSPACE_ID.to_string(),
                        identity.workspace_id.clone(),
                    ),
                ],
                true,
            )
            .await?;

        // A renamed workspace document must not orphan its container: when a
        // project name is supplied, also consult candidates matching only the
        // name label.
        if let Some(name) = &identity.project_name {
            let by_name = self
                .engine
                .list_containers(
                    &[
                        (LABEL_MANAGED.to_string(), "true".to_string()),
                        (LABEL_WORKSPACE_NAME.to_string(), name.clone()),
                    ],
                    true,
                )
                .await?;
            for candidate in by_name {
                if !matches.iter().any(|m| m.id == candidate.id) {
                    matches.push(candidate);
                }
            }
        }

        let observation = classify(&matches, desired_config_hash);
        debug!(state = %observation.state, "Observed workspace state");
        Ok(observation)
    }
}

/// Classify a set of label-matched containers into an observation.
pub fn classify(matches: &[ContainerSummary], desired_config_hash: Option<&str>) -> Observation {
    if matches.is_empty() {
        return Observation {
            state: ContainerState::Absent,
            container: None,
            secondaries: Vec::new(),
            broken_reason: None,
        };
    }

    let mut primaries: Vec<ManagedContainer> = Vec::new();
    let mut secondaries: Vec<ManagedContainer> = Vec::new();
    for summary in matches {
        match to_managed(summary) {
            Ok(container) => {
                if container.labels.primary {
                    primaries.push(container);
                } else {
                    secondaries.push(container);
                }
            }
            Err(reason) => {
                warn!(container = %summary.name, reason = %reason, "Managed container with malformed labels");
                return Observation::broken(
                    format!("container '{}': {}", summary.name, reason),
                    None,
                );
            }
        }
    }

    let primary = match primaries.len() {
        0 => {
            return Observation::broken(
                "managed containers exist but none is primary".to_string(),
                None,
            )
        }
        1 => primaries.into_iter().next().expect("length checked"),
        n => {
            return Observation::broken(format!("{} containers claim to be primary", n), None)
        }
    };

    let state = if primary.legacy {
        // Legacy hashes are not comparable; force migration.
        ContainerState::Stale
    } else if let Some(desired) = desired_config_hash {
        if primary.labels.hash_config != desired {
            ContainerState::Stale
        } else if primary.running {
            ContainerState::Running
        } else {
            ContainerState::Created
        }
    } else if primary.running {
        ContainerState::Running
    } else {
        ContainerState::Created
    };

    Observation {
        state,
        container: Some(primary),
        secondaries,
        broken_reason: None,
    }
}

fn to_managed(summary: &ContainerSummary) -> std::result::Result<ManagedContainer, String> {
    let (labels, legacy) = LabelSet::parse(&summary.labels).map_err(|e| e.to_string())?;
    Ok(ManagedContainer {
        id: summary.id.clone(),
        name: summary.name.clone(),
        image: summary.image.clone(),
        running: summary.is_running(),
        status: summary.status.clone(),
        created_at: summary.created_at,
        labels,
        legacy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{BuildMethod, CURRENT_SCHEMA_VERSION, LABEL_SCHEMA_VERSION};
    use std::collections::HashMap;

    fn summary(name: &str, running: bool, labels: HashMap<String, String>) -> ContainerSummary {
        ContainerSummary {
            id: format!("id-{}", name),
            name: name.to_string(),
            image: "alpine".to_string(),
            state: if running { "running" } else { "exited" }.to_string(),
            status: String::new(),
            labels,
            created_at: None,
        }
    }

    fn label_map(primary: bool) -> HashMap<String, String> {
        LabelSet {
            workspace_id: "0123456789abcdef".to_string(),
            workspace_name: String::new(),
            workspace_path: "/w".to_string(),
            workspace_root_hash: String::new(),
            primary,
            build_method: BuildMethod::Image,
            compose_project: String::new(),
            hash_config: "h".repeat(64),
            hash_overall: String::new(),
        }
        .to_map()
    }

    #[test]
    fn parse_failure_surfaces_as_error() {
        let mut labels = label_map(true);
        labels.remove(crate::labels::LABEL_HASH_CONFIG);
        let s = summary("broken", true, labels);
        assert!(to_managed(&s).is_err());
    }

    #[test]
    fn legacy_schema_is_flagged() {
        let mut labels = label_map(true);
        labels.insert(LABEL_SCHEMA_VERSION.to_string(), "1".to_string());
        let s = summary("old", true, labels);
        let managed = to_managed(&s).unwrap();
        assert!(managed.legacy);
    }

    #[test]
    fn current_schema_is_not_legacy() {
        let mut labels = label_map(true);
        labels.insert(
            LABEL_SCHEMA_VERSION.to_string(),
            CURRENT_SCHEMA_VERSION.to_string(),
        );
        let managed = to_managed(&summary("new", false, labels)).unwrap();
        assert!(!managed.legacy);
        assert!(!managed.running);
    }

    #[test]
    fn no_matches_classifies_as_absent() {
        let observation = classify(&[], Some("hash"));
        assert_eq!(observation.state, ContainerState::Absent);
        assert!(observation.container.is_none());
    }

    #[test]
    fn matching_hash_classifies_running_or_created() {
        let desired = "h".repeat(64);
        let running = classify(&[summary("a", true, label_map(true))], Some(&desired));
        assert_eq!(running.state, ContainerState::Running);
        let created = classify(&[summary("a", false, label_map(true))], Some(&desired));
        assert_eq!(created.state, ContainerState::Created);
    }

    #[test]
    fn hash_mismatch_classifies_as_stale() {
        let observation = classify(&[summary("a", true, label_map(true))], Some("different"));
        assert_eq!(observation.state, ContainerState::Stale);
        // The container is still reported so the caller can recreate it.
        assert!(observation.container.is_some());
    }

    #[test]
    fn legacy_schema_classifies_as_stale_even_with_matching_hash() {
        let desired = "h".repeat(64);
        let mut labels = label_map(true);
        labels.insert(LABEL_SCHEMA_VERSION.to_string(), "1".to_string());
        let observation = classify(&[summary("old", true, labels)], Some(&desired));
        assert_eq!(observation.state, ContainerState::Stale);
    }

    #[test]
    fn two_primaries_classify_as_broken() {
        let observation = classify(
            &[
                summary("a", true, label_map(true)),
                summary("b", true, label_map(true)),
            ],
            None,
        );
        assert_eq!(observation.state, ContainerState::Broken);
        assert!(observation
            .broken_reason
            .as_deref()
            .unwrap()
            .contains("primary"));
    }

    #[test]
    fn matches_without_any_primary_classify_as_broken() {
        let observation = classify(&[summary("svc", true, label_map(false))], None);
        assert_eq!(observation.state, ContainerState::Broken);
    }

    #[test]
    fn malformed_labels_classify_as_broken_with_the_container_named() {
        let mut labels = label_map(true);
        labels.remove(crate::labels::LABEL_WORKSPACE_ID);
        let observation = classify(&[summary("hurt", true, labels)], None);
        assert_eq!(observation.state, ContainerState::Broken);
        assert!(observation
            .broken_reason
            .as_deref()
            .unwrap()
            .contains("hurt"));
    }

    #[test]
    fn secondaries_ride_along_with_the_primary() {
        let observation = classify(
            &[
                summary("dev", true, label_map(true)),
                summary("db", false, label_map(false)),
            ],
            None,
        );
        assert_eq!(observation.state, ContainerState::Running);
        assert_eq!(observation.secondaries.len(), 1);
        assert_eq!(observation.secondaries[0].name, "db");
    }
}
