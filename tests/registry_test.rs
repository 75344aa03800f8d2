//! Integration tests for the connection registry.
//!
//! None of these need a running server: engines connect lazily, and the
//! health checks target a port nothing listens on.

use pg_registry::config::RegistrySettings;
use pg_registry::db::{ConnectionRegistry, DatabaseAdmin};
use pg_registry::error::RegistryError;
use pg_registry::models::ConnectionConfig;
use std::sync::Arc;
use std::time::Duration;

fn offline(name: &str, superuser: bool) -> ConnectionConfig {
    ConnectionConfig::new(name, "127.0.0.1", "app", "secret", "appdb")
        .unwrap()
        .with_port(1)
        .unwrap()
        .with_pool_timeout(Duration::from_secs(1))
        .with_superuser(superuser)
}

fn registry() -> ConnectionRegistry {
    ConnectionRegistry::new(RegistrySettings::new([
        offline("default", false),
        offline("reports", false),
        offline("admin", true),
    ]))
    .with_dispose_timeout(Duration::from_secs(1))
}

#[tokio::test]
async fn test_get_engine_returns_cached_handle() {
    let registry = registry();

    let first = registry.get_engine(Some("reports")).await.unwrap();
    let second = registry.get_engine(Some("reports")).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.engines_created(), 1);
    assert_eq!(first.name(), "reports");
}

#[tokio::test]
async fn test_default_connection_resolution() {
    let registry = registry();

    let by_default = registry.get_engine(None).await.unwrap();
    let by_name = registry.get_engine(Some("default")).await.unwrap();

    assert!(Arc::ptr_eq(&by_default, &by_name));
    assert_eq!(registry.engines_created(), 1);
}

#[tokio::test]
async fn test_missing_default_connection_fails_lazily() {
    let settings = RegistrySettings::new([offline("main", false)]);
    let registry = ConnectionRegistry::new(settings);

    let err = registry.get_engine(None).await.unwrap_err();
    assert!(matches!(err, RegistryError::UnknownConnection { ref name, .. } if name == "default"));
    assert!(registry.get_engine(Some("main")).await.is_ok());
}

#[tokio::test]
async fn test_unknown_connection_never_creates_engine() {
    let registry = registry();

    let err = registry.get_engine(Some("doesnotexist")).await.unwrap_err();
    match err {
        RegistryError::UnknownConnection { name, available } => {
            assert_eq!(name, "doesnotexist");
            assert_eq!(available, "admin, default, reports");
        }
        other => panic!("Expected UnknownConnection, got {:?}", other),
    }

    assert!(registry.get_session(Some("doesnotexist")).await.is_err());
    assert_eq!(registry.engines_created(), 0);
    assert_eq!(registry.engine_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_access_creates_one_engine() {
    let registry = Arc::new(registry());

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_session(Some("default")).await })
        })
        .collect();

    for task in tasks {
        let session = task.await.unwrap().unwrap();
        assert_eq!(session.connection_name(), "default");
    }

    assert_eq!(registry.engines_created(), 1);
    assert_eq!(registry.engine_count().await, 1);
}

#[tokio::test]
async fn test_session_factory_shares_engine() {
    let registry = registry();

    let factory = registry.get_session_factory(Some("reports")).await.unwrap();
    let engine = registry.get_engine(Some("reports")).await.unwrap();

    assert!(Arc::ptr_eq(factory.engine(), &engine));
    let session = factory.session();
    assert!(!session.in_transaction());
    assert_eq!(registry.engines_created(), 1);
}

#[tokio::test]
async fn test_health_check_unreachable_returns_false() {
    let registry = registry();

    assert!(!registry.health_check(Some("default")).await);
    assert!(!registry.health_check(Some("doesnotexist")).await);
}

#[tokio::test]
async fn test_close_all_is_idempotent() {
    let registry = registry();

    registry.close_all().await;

    let engine = registry.get_engine(Some("admin")).await.unwrap();
    registry.get_engine(Some("default")).await.unwrap();
    assert_eq!(registry.engine_count().await, 2);

    registry.close_all().await;
    assert!(engine.is_closed());
    assert_eq!(registry.engine_count().await, 0);
    assert!(!registry.has_engine("admin").await);

    registry.close_all().await;

    // A closed registry builds fresh engines on demand
    let fresh = registry.get_engine(Some("admin")).await.unwrap();
    assert!(!Arc::ptr_eq(&engine, &fresh));
    assert_eq!(registry.engines_created(), 3);
    registry.close_all().await;
}

#[tokio::test]
async fn test_list_connections_without_engines() {
    let registry = registry();

    assert_eq!(
        registry.list_connections(),
        vec!["admin", "default", "reports"]
    );
    assert_eq!(registry.engine_count().await, 0);
}

#[tokio::test]
async fn test_is_superuser_connection_before_engine_creation() {
    let registry = registry();

    assert!(registry.is_superuser_connection(Some("admin")).unwrap());
    assert!(!registry.is_superuser_connection(Some("reports")).unwrap());
    assert!(!registry.is_superuser_connection(None).unwrap());
    assert!(matches!(
        registry.is_superuser_connection(Some("missing")),
        Err(RegistryError::UnknownConnection { .. })
    ));
    assert_eq!(registry.engines_created(), 0);
}

#[tokio::test]
async fn test_superuser_resolution_is_lexicographic() {
    let settings = RegistrySettings::new([
        offline("zeta", true),
        offline("alpha", true),
        offline("default", false),
    ]);
    let registry = ConnectionRegistry::new(settings);

    assert_eq!(registry.resolve_superuser(None).unwrap().name, "alpha");
    let engine = registry.superuser_engine(None).await.unwrap();
    assert_eq!(engine.name(), "alpha");
}

#[tokio::test]
async fn test_admin_errors_without_superuser() {
    let settings = RegistrySettings::new([offline("default", false)]);
    let admin = DatabaseAdmin::new(Arc::new(ConnectionRegistry::new(settings)));

    assert!(matches!(
        admin.database_exists("app", None).await,
        Err(RegistryError::NoSuperuserConnection)
    ));
    assert!(matches!(
        admin.create_database("app", None, Some("default")).await,
        Err(RegistryError::NotSuperuser { .. })
    ));
    assert!(matches!(
        admin.drop_database("postgres", None, false).await,
        Err(RegistryError::ProtectedDatabase { .. })
    ));
    assert!(matches!(
        admin.drop_database("template1", Some("doesnotexist"), true).await,
        Err(RegistryError::ProtectedDatabase { .. })
    ));
    assert_eq!(admin.registry().engines_created(), 0);
}

#[tokio::test]
async fn test_with_session_without_server() {
    let registry = registry();

    let value: Result<&str, RegistryError> = registry
        .with_session(None, |_session| Box::pin(async move { Ok("done") }))
        .await;
    assert_eq!(value.unwrap(), "done");

    let err: Result<(), RegistryError> = registry
        .with_session(Some("missing"), |_session| Box::pin(async move { Ok(()) }))
        .await;
    assert!(matches!(err, Err(RegistryError::UnknownConnection { .. })));
}

#[tokio::test]
async fn test_session_against_unreachable_server_reports_connectivity() {
    let registry = registry();
    let mut session = registry.get_session(None).await.unwrap();

    let err = session.execute("SELECT 1").await.unwrap_err();
    assert!(matches!(err, RegistryError::Connectivity { .. }));
    assert!(err.is_retryable());

    session.close().await;
    assert!(session.is_closed());
}
