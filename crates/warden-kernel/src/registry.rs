//! Instance registry
//!
//! Registration, heartbeat, staleness sweeps, closing, and resume
//! resolution for supervisor instances. Every lifecycle change emits its
//! event on the instance's own log.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use warden_core::checkpoint::validate_context_percent;
use warden_core::error::KernelError;
use warden_core::event::EventType;
use warden_core::instance::{generate_instance_id, Instance, InstanceStatus, InstanceType};
use warden_storage::{HeartbeatUpdate, InstanceFilter, KernelStore, Page, Pagination};

use crate::events::EventService;

/// Strategy that produced a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStrategy {
    /// Exact instance id match
    Exact,
    /// Unique id-prefix match (prefix of at least four characters)
    Partial,
    /// Match on the instance's current epic
    Epic,
    /// Match on project name
    Project,
    /// Newest active instance overall (empty hint)
    Newest,
}

/// Outcome of resume resolution
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A single instance was selected
    Resolved {
        instance: Instance,
        strategy: ResolutionStrategy,
    },

    /// Several candidates matched; the caller must disambiguate
    Ambiguous {
        matches: Vec<Instance>,
        hint: String,
    },
}

/// Registry of supervisor instances
pub struct InstanceRegistry<S: KernelStore> {
    store: Arc<S>,
    events: Arc<EventService<S>>,
    stale_threshold_seconds: u64,
}

impl<S: KernelStore> InstanceRegistry<S> {
    pub fn new(
        store: Arc<S>,
        events: Arc<EventService<S>>,
        stale_threshold: std::time::Duration,
    ) -> Self {
        Self {
            store,
            events,
            stale_threshold_seconds: stale_threshold.as_secs(),
        }
    }

    /// Register a new instance with a fresh id
    #[instrument(skip(self, metadata))]
    pub async fn register(
        &self,
        project: &str,
        instance_type: InstanceType,
        metadata: Option<serde_json::Value>,
    ) -> Result<Instance, KernelError> {
        if project.trim().is_empty() {
            return Err(KernelError::Validation("project must not be empty".into()));
        }

        // An external transcript session may be attached at registration
        let claude_session_uuid = metadata
            .as_ref()
            .and_then(|m| m.get("claude_session_uuid"))
            .and_then(|v| v.as_str())
            .and_then(|s| uuid::Uuid::parse_str(s).ok());

        let now = Utc::now();
        let instance = Instance {
            instance_id: generate_instance_id(),
            project: project.to_string(),
            instance_type,
            status: InstanceStatus::Active,
            registration_time: now,
            last_heartbeat: now,
            context_window_percent: 0.0,
            current_epic: None,
            claude_session_uuid,
            metadata,
        };

        self.store.insert_instance(instance.clone()).await?;
        self.events
            .append(
                &instance.instance_id,
                EventType::InstanceRegistered,
                json!({
                    "project": instance.project,
                    "instance_type": instance.instance_type.to_string(),
                }),
                None,
            )
            .await?;

        info!(instance_id = %instance.instance_id, %project, "instance registered");
        Ok(instance)
    }

    /// Record a heartbeat, optionally updating context usage and epic
    ///
    /// A heartbeat on a stale instance flips it back to active. Heartbeats
    /// are idempotent: re-applying the same arguments yields the same row.
    #[instrument(skip(self))]
    pub async fn heartbeat(
        &self,
        instance_id: &str,
        context_percent: Option<f64>,
        current_epic: Option<String>,
    ) -> Result<Instance, KernelError> {
        if let Some(percent) = context_percent {
            validate_context_percent(percent)?;
        }

        let instance = self
            .store
            .heartbeat_instance(
                instance_id,
                Utc::now(),
                HeartbeatUpdate {
                    context_window_percent: context_percent,
                    current_epic,
                },
            )
            .await?;

        let mut data = serde_json::Map::new();
        if let Some(percent) = context_percent {
            data.insert("context_window_percent".into(), json!(percent));
        }
        if let Some(epic) = &instance.current_epic {
            data.insert("current_epic".into(), json!(epic));
        }
        self.events
            .append(
                instance_id,
                EventType::InstanceHeartbeat,
                serde_json::Value::Object(data),
                None,
            )
            .await?;

        Ok(instance)
    }

    /// Mark every over-age active instance stale, emitting `instance_stale`
    ///
    /// Returns the ids of the instances that were swept.
    #[instrument(skip(self))]
    pub async fn mark_stale_sweep(&self) -> Result<Vec<String>, KernelError> {
        let now = Utc::now();

        // Collect candidates first; marking instances stale while paging
        // over the active listing would shift its offsets.
        let mut candidates = Vec::new();
        let mut pagination = Pagination {
            offset: 0,
            limit: 200,
        };
        loop {
            let page = self
                .store
                .list_instances(InstanceFilter::active(), pagination)
                .await?;
            let batch_len = page.items.len();
            candidates.extend(
                page.items
                    .into_iter()
                    .filter(|i| i.is_stale_at(now, self.stale_threshold_seconds)),
            );
            if batch_len < pagination.limit as usize {
                break;
            }
            pagination.offset += pagination.limit;
        }

        let mut swept = Vec::new();
        for instance in candidates {
            let age_seconds = instance.heartbeat_age_seconds(now);
            self.store
                .mark_instance_stale(&instance.instance_id)
                .await?;
            self.events
                .append(
                    &instance.instance_id,
                    EventType::InstanceStale,
                    json!({"age_seconds": age_seconds}),
                    None,
                )
                .await?;
            warn!(instance_id = %instance.instance_id, age_seconds, "instance marked stale");
            swept.push(instance.instance_id);
        }

        debug!(count = swept.len(), "stale sweep finished");
        Ok(swept)
    }

    /// Close an instance; terminal
    #[instrument(skip(self))]
    pub async fn close(&self, instance_id: &str, reason: &str) -> Result<Instance, KernelError> {
        let instance = self.store.close_instance(instance_id, reason).await?;
        info!(%instance_id, %reason, "instance closed");
        Ok(instance)
    }

    /// Fetch instance details by exact id
    pub async fn get(&self, instance_id: &str) -> Result<Instance, KernelError> {
        Ok(self.store.get_instance(instance_id).await?)
    }

    /// Resolve a resume hint to an instance
    ///
    /// Strategies are tried in order: EXACT id, PARTIAL id prefix, EPIC,
    /// PROJECT, NEWEST (empty hint only). A prefix shorter than four
    /// characters is never auto-selected; its matches come back for
    /// disambiguation. Several active instances in the same project resolve
    /// to the most recently heartbeaten one only via the EPIC strategy;
    /// PROJECT matches across instances always disambiguate.
    #[instrument(skip(self))]
    pub async fn resolve(&self, hint: &str) -> Result<Resolution, KernelError> {
        let hint = hint.trim();

        if hint.is_empty() {
            let page = self
                .store
                .list_instances(InstanceFilter::active(), Pagination { offset: 0, limit: 1 })
                .await?;
            return match page.items.into_iter().next() {
                Some(instance) => Ok(Resolution::Resolved {
                    instance,
                    strategy: ResolutionStrategy::Newest,
                }),
                None => Err(KernelError::NotFound("no active instances".into())),
            };
        }

        // EXACT
        if let Ok(instance) = self.store.get_instance(hint).await {
            return Ok(Resolution::Resolved {
                instance,
                strategy: ResolutionStrategy::Exact,
            });
        }

        // PARTIAL
        let prefix_matches = self
            .store
            .list_instances(
                InstanceFilter {
                    id_prefix: Some(hint.to_string()),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await?
            .items;
        if !prefix_matches.is_empty() {
            if hint.len() >= 4 {
                if let [only] = prefix_matches.as_slice() {
                    return Ok(Resolution::Resolved {
                        instance: only.clone(),
                        strategy: ResolutionStrategy::Partial,
                    });
                }
            }
            return Ok(Resolution::Ambiguous {
                matches: prefix_matches,
                hint: hint.to_string(),
            });
        }

        // EPIC
        let epic_matches = self
            .store
            .list_instances(
                InstanceFilter {
                    status: Some(InstanceStatus::Active),
                    current_epic: Some(hint.to_string()),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await?
            .items;
        if let Some(first) = epic_matches.first() {
            let single_project = epic_matches.iter().all(|i| i.project == first.project);
            if single_project {
                // Listing is heartbeat-descending, so the first entry wins ties
                return Ok(Resolution::Resolved {
                    instance: first.clone(),
                    strategy: ResolutionStrategy::Epic,
                });
            }
            return Ok(Resolution::Ambiguous {
                matches: epic_matches,
                hint: hint.to_string(),
            });
        }

        // PROJECT
        let project_matches = self
            .store
            .list_instances(
                InstanceFilter {
                    status: Some(InstanceStatus::Active),
                    project: Some(hint.to_string()),
                    ..Default::default()
                },
                Pagination::default(),
            )
            .await?
            .items;
        match project_matches.as_slice() {
            [] => Err(KernelError::NotFound(format!(
                "no instance matches hint '{hint}'"
            ))),
            [only] => Ok(Resolution::Resolved {
                instance: only.clone(),
                strategy: ResolutionStrategy::Project,
            }),
            _ => Ok(Resolution::Ambiguous {
                matches: project_matches,
                hint: hint.to_string(),
            }),
        }
    }

    /// Paginated listing of stale instances
    pub async fn list_stale(&self, pagination: Pagination) -> Result<Page<Instance>, KernelError> {
        Ok(self
            .store
            .list_instances(InstanceFilter::stale(), pagination)
            .await?)
    }

    /// Paginated listing of active instances
    pub async fn list_active(
        &self,
        pagination: Pagination,
    ) -> Result<Page<Instance>, KernelError> {
        Ok(self
            .store
            .list_instances(InstanceFilter::active(), pagination)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use warden_storage::InMemoryKernelStore;

    use crate::locks::InstanceLocks;

    fn registry() -> (InstanceRegistry<InMemoryKernelStore>, Arc<InMemoryKernelStore>) {
        let store = Arc::new(InMemoryKernelStore::new());
        let locks = Arc::new(InstanceLocks::new());
        let events = Arc::new(EventService::new(store.clone(), locks));
        (
            InstanceRegistry::new(store.clone(), events, Duration::from_secs(120)),
            store,
        )
    }

    #[tokio::test]
    async fn test_register_emits_event() {
        let (registry, store) = registry();
        let instance = registry
            .register("checkout", InstanceType::Ps, None)
            .await
            .unwrap();

        assert_eq!(instance.status, InstanceStatus::Active);
        let events = store
            .load_events(&instance.instance_id, None, None)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::InstanceRegistered);
        assert_eq!(events[0].event_data["project"], json!("checkout"));
    }

    #[tokio::test]
    async fn test_register_attaches_transcript_session() {
        let (registry, _) = registry();
        let session = uuid::Uuid::now_v7();
        let instance = registry
            .register(
                "checkout",
                InstanceType::Ps,
                Some(json!({"claude_session_uuid": session.to_string()})),
            )
            .await
            .unwrap();
        assert_eq!(instance.claude_session_uuid, Some(session));
    }

    #[tokio::test]
    async fn test_register_rejects_empty_project() {
        let (registry, _) = registry();
        let result = registry.register("  ", InstanceType::Ps, None).await;
        assert!(matches!(result, Err(KernelError::Validation(_))));
    }

    #[tokio::test]
    async fn test_heartbeat_validates_percent_and_emits() {
        let (registry, store) = registry();
        let instance = registry
            .register("checkout", InstanceType::Ps, None)
            .await
            .unwrap();

        let result = registry
            .heartbeat(&instance.instance_id, Some(120.0), None)
            .await;
        assert!(matches!(result, Err(KernelError::Validation(_))));

        let updated = registry
            .heartbeat(&instance.instance_id, Some(55.0), Some("E1".into()))
            .await
            .unwrap();
        assert_eq!(updated.context_window_percent, 55.0);
        assert_eq!(updated.current_epic.as_deref(), Some("E1"));

        let events = store
            .load_events(&instance.instance_id, None, None)
            .await
            .unwrap();
        assert_eq!(events.last().unwrap().event_type, EventType::InstanceHeartbeat);
    }

    #[tokio::test]
    async fn test_heartbeat_idempotent_fields() {
        let (registry, _) = registry();
        let instance = registry
            .register("checkout", InstanceType::Ps, None)
            .await
            .unwrap();

        let first = registry
            .heartbeat(&instance.instance_id, Some(10.0), Some("E1".into()))
            .await
            .unwrap();
        let second = registry
            .heartbeat(&instance.instance_id, Some(10.0), Some("E1".into()))
            .await
            .unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.context_window_percent, second.context_window_percent);
        assert_eq!(first.current_epic, second.current_epic);
    }

    #[tokio::test]
    async fn test_sweep_marks_overdue_instances() {
        let (registry, store) = registry();
        let instance = registry
            .register("checkout", InstanceType::Ps, None)
            .await
            .unwrap();

        // Age the heartbeat past the threshold
        store
            .heartbeat_instance(
                &instance.instance_id,
                Utc::now() - chrono::Duration::seconds(200),
                HeartbeatUpdate::default(),
            )
            .await
            .unwrap();

        let swept = registry.mark_stale_sweep().await.unwrap();
        assert_eq!(swept, vec![instance.instance_id.clone()]);

        let row = registry.get(&instance.instance_id).await.unwrap();
        assert_eq!(row.status, InstanceStatus::Stale);

        let events = store
            .load_events(&instance.instance_id, None, None)
            .await
            .unwrap();
        let stale = events
            .iter()
            .find(|e| e.event_type == EventType::InstanceStale)
            .unwrap();
        assert!(stale.event_data["age_seconds"].as_i64().unwrap() >= 120);

        // A fresh instance is untouched by a second sweep
        let swept = registry.mark_stale_sweep().await.unwrap();
        assert!(swept.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_exact_and_prefix() {
        let (registry, _) = registry();
        let instance = registry
            .register("checkout", InstanceType::Ps, None)
            .await
            .unwrap();

        match registry.resolve(&instance.instance_id).await.unwrap() {
            Resolution::Resolved { strategy, .. } => {
                assert_eq!(strategy, ResolutionStrategy::Exact)
            }
            other => panic!("expected exact resolution, got {other:?}"),
        }

        let prefix = &instance.instance_id[..6];
        match registry.resolve(prefix).await.unwrap() {
            Resolution::Resolved { instance: found, strategy } => {
                assert_eq!(found.instance_id, instance.instance_id);
                assert_eq!(strategy, ResolutionStrategy::Partial);
            }
            other => panic!("expected partial resolution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_short_prefix_requires_disambiguation() {
        let (registry, _) = registry();
        let instance = registry
            .register("checkout", InstanceType::Ps, None)
            .await
            .unwrap();

        let short = &instance.instance_id[..3];
        match registry.resolve(short).await.unwrap() {
            Resolution::Ambiguous { matches, hint } => {
                assert_eq!(hint, short);
                assert_eq!(matches.len(), 1);
            }
            other => panic!("expected disambiguation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_by_project_disambiguates_multiple() {
        let (registry, _) = registry();
        registry
            .register("checkout", InstanceType::Ps, None)
            .await
            .unwrap();
        registry
            .register("checkout", InstanceType::Ms, None)
            .await
            .unwrap();

        match registry.resolve("checkout").await.unwrap() {
            Resolution::Ambiguous { matches, .. } => assert_eq!(matches.len(), 2),
            other => panic!("expected disambiguation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_by_epic_prefers_recent_heartbeat_within_project() {
        let (registry, _) = registry();
        let older = registry
            .register("checkout", InstanceType::Ps, None)
            .await
            .unwrap();
        let newer = registry
            .register("checkout", InstanceType::Ms, None)
            .await
            .unwrap();

        registry
            .heartbeat(&older.instance_id, None, Some("E9".into()))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        registry
            .heartbeat(&newer.instance_id, None, Some("E9".into()))
            .await
            .unwrap();

        match registry.resolve("E9").await.unwrap() {
            Resolution::Resolved { instance, strategy } => {
                assert_eq!(strategy, ResolutionStrategy::Epic);
                assert_eq!(instance.instance_id, newer.instance_id);
            }
            other => panic!("expected epic resolution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_empty_hint_newest_active() {
        let (registry, _) = registry();
        assert!(matches!(
            registry.resolve("").await,
            Err(KernelError::NotFound(_))
        ));

        registry
            .register("alpha", InstanceType::Ps, None)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newest = registry
            .register("beta", InstanceType::Ps, None)
            .await
            .unwrap();

        match registry.resolve("").await.unwrap() {
            Resolution::Resolved { instance, strategy } => {
                assert_eq!(strategy, ResolutionStrategy::Newest);
                assert_eq!(instance.instance_id, newest.instance_id);
            }
            other => panic!("expected newest resolution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_unknown_hint_not_found() {
        let (registry, _) = registry();
        registry
            .register("checkout", InstanceType::Ps, None)
            .await
            .unwrap();
        assert!(matches!(
            registry.resolve("no-such-hint").await,
            Err(KernelError::NotFound(_))
        ));
    }
}
