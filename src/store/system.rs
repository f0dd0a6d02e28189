use super::stats::{api_stats, ApiStats};
use crate::db::{Condition, Document, ListParams, Model, ModelBinder, Page, Query, Sort};
use crate::error::{Error, Result};
use crate::model::LogicalDb;
use crate::schema::system::{default_settings, ApiLog, Notification, SettingCategory, SystemSettings};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

/// Notifications, API logs and settings on the operations database.
#[derive(Debug, Clone)]
pub struct SystemStore {
    pub notifications: Model<Notification>,
    pub api_logs: Model<ApiLog>,
    pub settings: Model<SystemSettings>,
}

impl SystemStore {
    pub fn bind(binder: &ModelBinder) -> Result<Self> {
        let db = LogicalDb::Operations.as_str();
        Ok(Self {
            notifications: binder.bind(db)?,
            api_logs: binder.bind(db)?,
            settings: binder.bind(db)?,
        })
    }

    pub async fn notify(&self, notification: Notification) -> Result<Document<Notification>> {
        let doc = self.notifications.create(notification).await?;
        debug!(user_id = %doc.user_id, kind = ?doc.notification_type, "notification queued");
        Ok(doc)
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<u64> {
        self.notifications
            .count(&Query::new().eq("userId", user_id).eq("isRead", false))
            .await
    }

    pub async fn notifications_for(
        &self,
        user_id: &str,
        params: &ListParams,
    ) -> Result<Page<Document<Notification>>> {
        self.notifications
            .list_with(params, Query::new().eq("userId", user_id))
            .await
    }

    pub async fn mark_read(&self, id: &str) -> Result<Document<Notification>> {
        let mut notification = self.notifications.get(id).await?;
        notification.data.mark_read(Utc::now());
        self.notifications.replace(notification).await
    }

    pub async fn record_click(&self, id: &str) -> Result<Document<Notification>> {
        let mut notification = self.notifications.get(id).await?;
        notification.data.record_click(Utc::now());
        self.notifications.replace(notification).await
    }

    /// Returns how many notifications changed.
    #[instrument(skip_all)]
    pub async fn mark_all_read(&self, user_id: &str) -> Result<u64> {
        let now = Utc::now();
        let unread = self
            .notifications
            .find(&Query::new().eq("userId", user_id).eq("isRead", false))
            .await?;
        let mut changed = 0;
        for mut notification in unread {
            notification.data.mark_read(now);
            self.notifications.replace(notification).await?;
            changed += 1;
        }
        Ok(changed)
    }

    /// Drops notifications whose expiry has passed.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let removed = self
            .notifications
            .delete_where(
                &Query::new()
                    .filter(Condition::Exists("expiresAt".into()))
                    .filter(Condition::Before("expiresAt".into(), now)),
            )
            .await?;
        if removed > 0 {
            info!(removed, "expired notifications deleted");
        }
        Ok(removed)
    }

    pub async fn log_api_call(&self, log: ApiLog) -> Result<Document<ApiLog>> {
        let doc = self.api_logs.create(log).await?;
        if !doc.success {
            warn!(url = %doc.url, status = ?doc.status_code, "outbound api call failed");
        }
        Ok(doc)
    }

    /// Most recent failed calls first.
    pub async fn recent_api_errors(&self, limit: u32) -> Result<Vec<Document<ApiLog>>> {
        let query = Query::new()
            .eq("success", false)
            .sort(Sort::desc("timestamp"))
            .limit(limit);
        self.api_logs.find(&query).await
    }

    pub async fn api_stats(&self, since: Option<DateTime<Utc>>) -> Result<ApiStats> {
        api_stats(&self.api_logs, since).await
    }

    /// Inserts any default setting whose key is missing. Returns how many were added.
    #[instrument(skip_all)]
    pub async fn seed_default_settings(&self) -> Result<usize> {
        let mut added = 0;
        for setting in default_settings() {
            if self.find_setting(&setting.key).await?.is_some() {
                continue;
            }
            self.settings.create(setting).await?;
            added += 1;
        }
        info!(added, "default settings seeded");
        Ok(added)
    }

    async fn find_setting(&self, key: &str) -> Result<Option<Document<SystemSettings>>> {
        self.settings.find_one(&Query::new().eq("key", key)).await
    }

    pub async fn setting(&self, key: &str) -> Result<Document<SystemSettings>> {
        self.find_setting(key).await?.ok_or_else(|| Error::NotFound {
            model: "SystemSettings",
            id: key.to_string(),
        })
    }

    pub async fn settings_by_category(
        &self,
        category: SettingCategory,
    ) -> Result<Vec<Document<SystemSettings>>> {
        let query = Query::new()
            .eq("category", serde_json::to_value(category)?)
            .sort(Sort::asc("key"));
        self.settings.find(&query).await
    }

    /// Settings safe to expose to clients.
    pub async fn public_settings(&self) -> Result<Vec<Document<SystemSettings>>> {
        let query = Query::new().eq("isPublic", true).sort(Sort::asc("key"));
        self.settings.find(&query).await
    }

    /// Changes a setting's value, bumping its version.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn set_setting(
        &self,
        key: &str,
        value: Value,
        modified_by: Option<&str>,
    ) -> Result<Document<SystemSettings>> {
        let mut setting = self.setting(key).await?;
        if setting.is_readonly {
            return Err(Error::Rejected(format!("Setting {key} is readonly")));
        }
        setting
            .check_value(&value)
            .map_err(|message| Error::validation("SystemSettings", "value", message))?;
        setting.data.value = value;
        setting.data.version += 1;
        setting.data.last_modified_by = modified_by.map(str::to_owned);
        let saved = self.settings.replace(setting).await?;
        info!(version = saved.version, "setting updated");
        Ok(saved)
    }

    /// Restores the default value.
    pub async fn reset_setting(&self, key: &str) -> Result<Document<SystemSettings>> {
        let setting = self.setting(key).await?;
        let default = setting.default_value.clone();
        self.set_setting(key, default, None).await
    }

    /// A setting's value deserialized into `T`.
    pub async fn setting_value<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let setting = self.setting(key).await?;
        Ok(serde_json::from_value(setting.data.value)?)
    }

    /// Marks every channel of a notification as sent.
    pub async fn mark_sent(&self, id: &str) -> Result<Document<Notification>> {
        let mut notification = self.notifications.get(id).await?;
        let now = Utc::now();
        for channel in &mut notification.data.channels {
            channel.sent = true;
            channel.sent_at = Some(now);
        }
        self.notifications.replace(notification).await
    }

    /// Unread high and urgent notifications, newest first.
    pub async fn urgent_unread(&self, user_id: &str) -> Result<Vec<Document<Notification>>> {
        let query = Query::new()
            .eq("userId", user_id)
            .eq("isRead", false)
            .filter(Condition::In(
                "priority".into(),
                vec![json!("high"), json!("urgent")],
            ))
            .sort(Sort::desc("createdAt"));
        self.notifications.find(&query).await
    }
}
