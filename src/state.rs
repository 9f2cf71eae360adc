use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use crate::{
    auth::{
        otp::{OtpRepo, PgOtpRepo},
        repo::{PgUserRepo, UserRepo},
    },
    config::AppConfig,
    documents::{
        embedding::{Embedder, OpenAiEmbedder},
        repo::{DocumentRepo, PgDocumentRepo},
    },
    mail::{LogMailer, Mailer, SmtpMailer},
    storage::{self, StorageClient},
    vendors::repo::{PgVendorRepo, VendorRepo},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserRepo>,
    pub otps: Arc<dyn OtpRepo>,
    pub vendors: Arc<dyn VendorRepo>,
    pub documents: Arc<dyn DocumentRepo>,
    pub storage: Arc<dyn StorageClient>,
    pub embedder: Arc<dyn Embedder>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init(config: AppConfig, db: PgPool) -> anyhow::Result<Self> {
        let storage = storage::from_config(&config.storage).await?;
        let embedder = Arc::new(OpenAiEmbedder::new(&config.embedding)?) as Arc<dyn Embedder>;

        let mailer: Arc<dyn Mailer> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpMailer::new(smtp)?),
            None => {
                info!("SMTP_HOST not set, mail will be written to the log");
                Arc::new(LogMailer)
            }
        };

        Ok(Self {
            config: Arc::new(config),
            users: Arc::new(PgUserRepo::new(db.clone())),
            otps: Arc::new(PgOtpRepo::new(db.clone())),
            vendors: Arc::new(PgVendorRepo::new(db.clone())),
            documents: Arc::new(PgDocumentRepo::new(db)),
            storage,
            embedder,
            mailer,
        })
    }

    /// State backed by in-memory fakes, for tests.
    #[cfg(test)]
    pub fn fake() -> Self {
        crate::testing::fakes().state
    }
}
