//! Command log service
//!
//! Every user-visible or tool-visible command is recorded here. Parameters,
//! results, and error messages pass through the redactor before the store
//! ever sees them; what is persisted is what retrieval returns.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use warden_core::command::{CommandEntry, CommandStats, NewCommandEntry};
use warden_core::error::KernelError;
use warden_core::redact::Redactor;
use warden_storage::{CommandFilter, KernelStore, Page, Pagination};

use crate::locks::InstanceLocks;

/// Redacting command log
pub struct CommandLogService<S: KernelStore> {
    store: Arc<S>,
    redactor: Arc<Redactor>,
    locks: Arc<InstanceLocks>,
}

impl<S: KernelStore> CommandLogService<S> {
    pub fn new(store: Arc<S>, redactor: Arc<Redactor>, locks: Arc<InstanceLocks>) -> Self {
        Self {
            store,
            redactor,
            locks,
        }
    }

    /// Record a command, redacting sensitive fields first
    #[instrument(skip(self, entry), fields(instance_id = %entry.instance_id, action = %entry.action))]
    pub async fn log(&self, mut entry: NewCommandEntry) -> Result<i64, KernelError> {
        entry.parameters = entry.parameters.map(|p| self.redactor.redact(&p));
        entry.result = entry.result.map(|r| self.redactor.redact(&r));
        entry.error_message = entry.error_message.map(|m| self.redactor.redact_str(&m));
        entry.context_data = entry.context_data.map(|c| self.redactor.redact(&c));

        let lock = self.locks.for_instance(&entry.instance_id);
        let _guard = lock.lock().await;

        let stored = self.store.insert_command(entry, Utc::now()).await?;
        debug!(id = stored.id, "command logged");
        Ok(stored.id)
    }

    /// Search the log, newest first
    #[instrument(skip(self, filter))]
    pub async fn search(
        &self,
        filter: CommandFilter,
        pagination: Pagination,
    ) -> Result<Page<CommandEntry>, KernelError> {
        Ok(self.store.search_commands(filter, pagination).await?)
    }

    /// Fetch one entry by primary key
    pub async fn get(&self, id: i64) -> Result<CommandEntry, KernelError> {
        Ok(self.store.get_command(id).await?)
    }

    /// Success/failure counts for an instance
    pub async fn stats(&self, instance_id: &str) -> Result<CommandStats, KernelError> {
        Ok(self.store.command_stats(instance_id).await?)
    }
}
