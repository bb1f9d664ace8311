#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]
use anyhow::Result;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;
use testcontainers::{ContainerRequest, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

pub const RUNTIME_ROLE: &str = "app_runtime";
pub const RUNTIME_PASSWORD: &str = "runtime_pass";

pub struct PgUnderTest {
    /// Superuser (owner) credentials, used for setup and migrations.
    pub admin: PgConnectOptions,
    /// Unprivileged role that is subject to RLS policies.
    pub runtime: PgConnectOptions,
    _cleanup: Option<Box<dyn FnOnce() + Send + Sync>>,
}

/// Bring up a `PostgreSQL` test container with an admin and a runtime role.
///
/// # Errors
/// Returns an error if the container fails to start or become ready.
pub async fn bring_up_postgres() -> Result<PgUnderTest> {
    let container_request = ContainerRequest::from(Postgres::default())
        .with_env_var("POSTGRES_PASSWORD", "pass")
        .with_env_var("POSTGRES_USER", "user")
        .with_env_var("POSTGRES_DB", "app");

    let container = container_request.start().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    wait_for_tcp("127.0.0.1", port, Duration::from_secs(20)).await?;

    let base = PgConnectOptions::new()
        .host("127.0.0.1")
        .port(port)
        .database("app");

    Ok(PgUnderTest {
        admin: base.clone().username("user").password("pass"),
        runtime: base.username(RUNTIME_ROLE).password(RUNTIME_PASSWORD),
        _cleanup: Some(Box::new(move || drop(container))),
    })
}

async fn wait_for_tcp(host: &str, port: u16, timeout: Duration) -> Result<()> {
    use tokio::{
        net::TcpStream,
        time::{Instant, sleep},
    };
    let deadline = Instant::now() + timeout;
    loop {
        if TcpStream::connect((host, port)).await.is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            anyhow::bail!("Timeout waiting for {host}:{port}");
        }
        sleep(Duration::from_millis(200)).await;
    }
}
