use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;

pub const NO_DATA: &str = "no data yet";

/// Receives the rendering of every evaluated snapshot.
pub trait StatusSink {
    fn publish(&self, status: String) -> impl Future<Output = ()> + Send;
}

/// Last rendered snapshot, shared between the monitor loop and status queries.
#[derive(Clone, Debug, Default)]
pub struct LastStatus {
    inner: Arc<RwLock<Option<String>>>,
}

impl LastStatus {
    pub async fn get(&self) -> String {
        self.inner
            .read()
            .await
            .clone()
            .unwrap_or_else(|| NO_DATA.to_string())
    }
}

impl StatusSink for LastStatus {
    async fn publish(&self, status: String) {
        *self.inner.write().await = Some(status);
    }
}
