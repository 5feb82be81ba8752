// src/core/store.rs

//! The persistence seam. The scan engine only talks to the `Store` trait;
//! `MemoryStore` is the in-process implementation used by the binary and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::error::StoreError;
use crate::core::models::{
    ApiEndpoint, Asset, AssetAssociation, ScheduledTask, TaskExecution, TaskStatus, Webpage,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Partial update of a task execution; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPatch {
    pub status: Option<TaskStatus>,
    pub stage: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub assets_found: Option<usize>,
}

/// Transactional record store consumed by the scan engine.
///
/// Unique keys: `Asset.url` and `Webpage.(asset_id, url)`.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_scheduled_task(&self, task: ScheduledTask) -> StoreResult<ScheduledTask>;
    async fn update_scheduled_task(&self, task: ScheduledTask) -> StoreResult<ScheduledTask>;
    async fn find_scheduled_task(&self, id: Uuid) -> StoreResult<Option<ScheduledTask>>;

    async fn create_task_execution(&self, execution: TaskExecution) -> StoreResult<TaskExecution>;
    async fn update_task_execution(&self, id: Uuid, patch: ExecutionPatch) -> StoreResult<TaskExecution>;
    async fn find_task_execution(&self, id: Uuid) -> StoreResult<Option<TaskExecution>>;

    /// Inserts, or replaces the record with the same URL while keeping its id.
    async fn upsert_asset(&self, asset: Asset) -> StoreResult<Asset>;
    async fn create_asset(&self, asset: Asset) -> StoreResult<Asset>;
    async fn update_asset(&self, asset: Asset) -> StoreResult<Asset>;
    async fn find_asset_by_url(&self, url: &str) -> StoreResult<Option<Asset>>;
    async fn assets_for_execution(&self, execution_id: Uuid) -> StoreResult<Vec<Asset>>;

    /// Inserts, or replaces the page with the same `(asset_id, url)` while keeping its id.
    async fn upsert_webpage(&self, page: Webpage) -> StoreResult<Webpage>;
    async fn webpages_for_asset(&self, asset_id: Uuid) -> StoreResult<Vec<Webpage>>;

    async fn create_association(&self, association: AssetAssociation) -> StoreResult<AssetAssociation>;
    async fn associations_from(&self, asset_id: Uuid) -> StoreResult<Vec<AssetAssociation>>;

    async fn create_api_endpoint(&self, endpoint: ApiEndpoint) -> StoreResult<ApiEndpoint>;
    async fn api_endpoints_for_asset(&self, asset_id: Uuid) -> StoreResult<Vec<ApiEndpoint>>;
}

/// Serializable dump of every table.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub scheduled_tasks: Vec<ScheduledTask>,
    pub task_executions: Vec<TaskExecution>,
    pub assets: Vec<Asset>,
    pub webpages: Vec<Webpage>,
    pub associations: Vec<AssetAssociation>,
    pub api_endpoints: Vec<ApiEndpoint>,
}

#[derive(Default)]
struct Tables {
    scheduled_tasks: Vec<ScheduledTask>,
    executions: Vec<TaskExecution>,
    assets: Vec<Asset>,
    asset_by_url: HashMap<String, usize>,
    webpages: Vec<Webpage>,
    webpage_by_key: HashMap<(Uuid, String), usize>,
    associations: Vec<AssetAssociation>,
    api_endpoints: Vec<ApiEndpoint>,
}

/// In-memory store; every operation runs under a single write or read lock.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let tables = self.tables.read().await;
        StoreSnapshot {
            scheduled_tasks: tables.scheduled_tasks.clone(),
            task_executions: tables.executions.clone(),
            assets: tables.assets.clone(),
            webpages: tables.webpages.clone(),
            associations: tables.associations.clone(),
            api_endpoints: tables.api_endpoints.clone(),
        }
    }
}

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound { entity, id: id.to_string() }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_scheduled_task(&self, task: ScheduledTask) -> StoreResult<ScheduledTask> {
        let mut tables = self.tables.write().await;
        tables.scheduled_tasks.push(task.clone());
        Ok(task)
    }

    async fn update_scheduled_task(&self, task: ScheduledTask) -> StoreResult<ScheduledTask> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .scheduled_tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| not_found("ScheduledTask", task.id))?;
        *slot = task.clone();
        Ok(task)
    }

    async fn find_scheduled_task(&self, id: Uuid) -> StoreResult<Option<ScheduledTask>> {
        let tables = self.tables.read().await;
        Ok(tables.scheduled_tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn create_task_execution(&self, execution: TaskExecution) -> StoreResult<TaskExecution> {
        let mut tables = self.tables.write().await;
        tables.executions.push(execution.clone());
        Ok(execution)
    }

    async fn update_task_execution(&self, id: Uuid, patch: ExecutionPatch) -> StoreResult<TaskExecution> {
        let mut tables = self.tables.write().await;
        let execution = tables
            .executions
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| not_found("TaskExecution", id))?;
        if let Some(status) = patch.status {
            execution.status = status;
        }
        if let Some(stage) = patch.stage {
            execution.stage = stage;
        }
        if let Some(end_time) = patch.end_time {
            execution.end_time = Some(end_time);
        }
        if let Some(duration) = patch.duration {
            execution.duration = Some(duration);
        }
        if let Some(assets_found) = patch.assets_found {
            execution.assets_found = assets_found;
        }
        Ok(execution.clone())
    }

    async fn find_task_execution(&self, id: Uuid) -> StoreResult<Option<TaskExecution>> {
        let tables = self.tables.read().await;
        Ok(tables.executions.iter().find(|e| e.id == id).cloned())
    }

    async fn upsert_asset(&self, mut asset: Asset) -> StoreResult<Asset> {
        let mut tables = self.tables.write().await;
        if let Some(&index) = tables.asset_by_url.get(&asset.url) {
            let existing = &mut tables.assets[index];
            asset.id = existing.id;
            asset.created_at = existing.created_at;
            asset.updated_at = Utc::now();
            *existing = asset.clone();
        } else {
            let index = tables.assets.len();
            tables.asset_by_url.insert(asset.url.clone(), index);
            tables.assets.push(asset.clone());
        }
        Ok(asset)
    }

    async fn create_asset(&self, asset: Asset) -> StoreResult<Asset> {
        let mut tables = self.tables.write().await;
        if tables.asset_by_url.contains_key(&asset.url) {
            return Err(StoreError::UniqueViolation { entity: "Asset", key: asset.url });
        }
        let index = tables.assets.len();
        tables.asset_by_url.insert(asset.url.clone(), index);
        tables.assets.push(asset.clone());
        Ok(asset)
    }

    async fn update_asset(&self, mut asset: Asset) -> StoreResult<Asset> {
        let mut tables = self.tables.write().await;
        let index = tables
            .assets
            .iter()
            .position(|a| a.id == asset.id)
            .ok_or_else(|| not_found("Asset", asset.id))?;
        if tables.assets[index].url != asset.url {
            if tables.asset_by_url.contains_key(&asset.url) {
                return Err(StoreError::UniqueViolation { entity: "Asset", key: asset.url });
            }
            let old_url = tables.assets[index].url.clone();
            tables.asset_by_url.remove(&old_url);
            tables.asset_by_url.insert(asset.url.clone(), index);
        }
        asset.updated_at = Utc::now();
        tables.assets[index] = asset.clone();
        Ok(asset)
    }

    async fn find_asset_by_url(&self, url: &str) -> StoreResult<Option<Asset>> {
        let tables = self.tables.read().await;
        Ok(tables.asset_by_url.get(url).map(|&i| tables.assets[i].clone()))
    }

    async fn assets_for_execution(&self, execution_id: Uuid) -> StoreResult<Vec<Asset>> {
        let tables = self.tables.read().await;
        Ok(tables
            .assets
            .iter()
            .filter(|a| a.task_execution_id == Some(execution_id))
            .cloned()
            .collect())
    }

    async fn upsert_webpage(&self, mut page: Webpage) -> StoreResult<Webpage> {
        let mut tables = self.tables.write().await;
        let key = (page.asset_id, page.url.clone());
        if let Some(&index) = tables.webpage_by_key.get(&key) {
            page.id = tables.webpages[index].id;
            tables.webpages[index] = page.clone();
        } else {
            let index = tables.webpages.len();
            tables.webpage_by_key.insert(key, index);
            tables.webpages.push(page.clone());
        }
        Ok(page)
    }

    async fn webpages_for_asset(&self, asset_id: Uuid) -> StoreResult<Vec<Webpage>> {
        let tables = self.tables.read().await;
        Ok(tables.webpages.iter().filter(|p| p.asset_id == asset_id).cloned().collect())
    }

    async fn create_association(&self, association: AssetAssociation) -> StoreResult<AssetAssociation> {
        let mut tables = self.tables.write().await;
        tables.associations.push(association.clone());
        Ok(association)
    }

    async fn associations_from(&self, asset_id: Uuid) -> StoreResult<Vec<AssetAssociation>> {
        let tables = self.tables.read().await;
        Ok(tables.associations.iter().filter(|a| a.source_asset_id == asset_id).cloned().collect())
    }

    async fn create_api_endpoint(&self, endpoint: ApiEndpoint) -> StoreResult<ApiEndpoint> {
        let mut tables = self.tables.write().await;
        tables.api_endpoints.push(endpoint.clone());
        Ok(endpoint)
    }

    async fn api_endpoints_for_asset(&self, asset_id: Uuid) -> StoreResult<Vec<ApiEndpoint>> {
        let tables = self.tables.read().await;
        Ok(tables.api_endpoints.iter().filter(|e| e.asset_id == asset_id).cloned().collect())
    }
}
