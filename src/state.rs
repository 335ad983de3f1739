use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    auth::{
        credentials::CredentialStore,
        jwt::JwtKeys,
        password::Argon2Hasher,
        repo::{MemoryUserRepo, PgUserRepo, UserRepo},
        services::AuthService,
    },
    config::AppConfig,
    db,
    mail::{mailer_from_config, Mailer, Notifier},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: AuthService,
    pub storage: &'static str,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let (repo, storage): (Arc<dyn UserRepo>, &'static str) = match &config.database_url {
            Some(url) => {
                let pool = db::connect(url, config.max_connections).await?;
                (Arc::new(PgUserRepo::new(pool)), "postgres")
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory user store");
                (Arc::new(MemoryUserRepo::new()), "memory")
            }
        };

        let mailer = mailer_from_config(&config.mail)?;
        Self::from_parts(Arc::new(config), repo, mailer, storage)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        repo: Arc<dyn UserRepo>,
        mailer: Arc<dyn Mailer>,
        storage: &'static str,
    ) -> anyhow::Result<Self> {
        let credentials = CredentialStore::new(repo, Argon2Hasher::new(&config.password)?);
        let tokens = JwtKeys::new(&config.jwt);
        let notifier = Notifier::new(mailer, &config.mail);
        Ok(Self {
            auth: AuthService::new(credentials, tokens, notifier),
            config,
            storage,
        })
    }

    /// Memory-backed state with cheap hashing, plus a handle on its store.
    #[cfg(test)]
    pub fn fake(mailer: Arc<dyn Mailer>) -> (Self, Arc<MemoryUserRepo>) {
        use crate::config::{JwtConfig, MailConfig, PasswordConfig};

        let config = Arc::new(AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            database_url: None,
            max_connections: 1,
            frontend_url: None,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
            },
            password: PasswordConfig {
                memory_kib: 8,
                iterations: 1,
                parallelism: 1,
            },
            mail: MailConfig {
                smtp: None,
                from: "noreply@test.local".into(),
                app_name: "Test".into(),
                app_url: "http://localhost".into(),
            },
        });
        let repo = Arc::new(MemoryUserRepo::new());
        let state = Self::from_parts(config, repo.clone(), mailer, "memory")
            .expect("test state builds");
        (state, repo)
    }
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
