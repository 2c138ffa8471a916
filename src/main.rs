use std::net::TcpListener;
use std::sync::Arc;

use sessiond::auth::BcryptVerifier;
use sessiond::configuration::{get_configuration, Settings, StorageBackend};
use sessiond::session::{InMemorySessionStore, PgSessionStore, SessionStore};
use sessiond::startup::run;
use sessiond::state::AppState;
use sessiond::telemetry::init_telemetry;
use sessiond::users::{InMemoryUserStore, PgUserStore, UserStore};
use sqlx::postgres::PgPoolOptions;

fn io_error(kind: std::io::ErrorKind, message: &'static str) -> std::io::Error {
    std::io::Error::new(kind, message)
}

async fn build_stores(
    configuration: &Settings,
) -> std::io::Result<(Arc<dyn SessionStore>, Arc<dyn UserStore>)> {
    match configuration.application.storage {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, sessions will not survive a restart");
            Ok((
                Arc::new(InMemorySessionStore::new()),
                Arc::new(InMemoryUserStore::new()),
            ))
        }
        StorageBackend::Postgres => {
            // 데이터베이스 연결 풀 생성
            tracing::info!("Attempting to connect to database");
            let pool = PgPoolOptions::new()
                .max_connections(configuration.database.max_connections)
                .connect(&configuration.database.connection_string())
                .await
                .map_err(|e| {
                    tracing::error!("Failed to create connection pool: {}", e);
                    io_error(std::io::ErrorKind::ConnectionRefused, "Database connection error")
                })?;

            // 마이그레이션 적용
            sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                io_error(std::io::ErrorKind::Other, "Database migration error")
            })?;
            tracing::info!("Database connection pool created successfully");

            Ok((
                Arc::new(PgSessionStore::new(pool.clone())),
                Arc::new(PgUserStore::new(pool)),
            ))
        }
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // 구조화된 로깅 초기화
    init_telemetry();

    tracing::info!("Starting application");

    // 설정 로드
    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(io_error(std::io::ErrorKind::InvalidInput, "Configuration error"));
        }
    };

    // 세션/사용자 저장소 선택
    let (sessions, users) = build_stores(&configuration).await?;

    let state = AppState::build(
        &configuration.jwt,
        configuration.cookie.clone(),
        &configuration.auth,
        sessions,
        users,
        Arc::new(BcryptVerifier::new(configuration.auth.bcrypt_cost)),
    )
    .map_err(|e| {
        tracing::error!("Failed to initialise application state: {}", e);
        io_error(std::io::ErrorKind::InvalidInput, "Application state error")
    })?;

    // 서버 주소 설정
    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    // 서버 실행
    run(listener, state)?.await
}
