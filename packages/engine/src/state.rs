use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::EngineConfig;
use crate::notify::{NotificationEvent, Notifier, notify_best_effort};
use crate::provisioning::Provisioner;

#[derive(Clone)]
pub struct EngineState {
    pub db: DatabaseConnection,
    pub provisioner: Arc<dyn Provisioner>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<EngineConfig>,
}

impl EngineState {
    pub fn new(
        db: DatabaseConnection,
        provisioner: Arc<dyn Provisioner>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            provisioner,
            notifier,
            config: Arc::new(config),
        }
    }

    pub async fn notify(&self, user_id: i32, event: NotificationEvent, payload: serde_json::Value) {
        notify_best_effort(self.notifier.as_ref(), user_id, event, payload).await;
    }
}
