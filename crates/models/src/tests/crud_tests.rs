use crate::db::connect_memory;
use crate::{api_token, server, service};
use anyhow::Result;
use sea_orm::EntityTrait;

#[tokio::test]
async fn service_create_find_and_touch() -> Result<()> {
    let db = connect_memory().await?;

    let created = service::create(&db, "dashboard", false).await?;
    let found = service::find_by_name(&db, "dashboard").await?.expect("service row");
    assert_eq!(found.id, created.id);
    assert!(found.last_activity.is_none());

    service::set_admin(&db, created.id, true).await?;
    let now = chrono::Utc::now().into();
    assert!(service::touch(&db, "dashboard", now).await?);
    assert!(!service::touch(&db, "missing", now).await?);

    let reloaded = service::Entity::find_by_id(created.id).one(&db).await?.expect("reload");
    assert!(reloaded.admin);
    assert!(reloaded.last_activity.is_some());
    Ok(())
}

#[tokio::test]
async fn service_name_required() -> Result<()> {
    let db = connect_memory().await?;
    assert!(service::create(&db, "  ", false).await.is_err());
    Ok(())
}

#[tokio::test]
async fn server_replace_keeps_single_row() -> Result<()> {
    let db = connect_memory().await?;
    let svc = service::create(&db, "dashboard", false).await?;

    server::replace(&db, svc.id, "http", "0.0.0.0", 9000, "/services/dashboard/").await?;
    server::replace(&db, svc.id, "http", "0.0.0.0", 9001, "/services/dashboard/").await?;
    let row = server::find_for_service(&db, svc.id).await?.expect("server row");
    assert_eq!(row.port, 9001);
    assert_eq!(row.cookie_name, server::SERVICE_COOKIE_NAME);
    assert_eq!(server::Entity::find().all(&db).await?.len(), 1);

    assert!(server::set_ip(&db, svc.id, "10.1.2.3").await?);
    let row = server::find_for_service(&db, svc.id).await?.expect("server row");
    assert_eq!(row.ip, "10.1.2.3");

    assert_eq!(server::delete_for_service(&db, svc.id).await?, 1);
    assert!(server::find_for_service(&db, svc.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn delete_except_removes_orphans_and_dependants() -> Result<()> {
    let db = connect_memory().await?;
    let keep = service::create(&db, "keep", false).await?;
    let gone = service::create(&db, "gone", false).await?;
    server::replace(&db, gone.id, "http", "127.0.0.1", 8888, "/services/gone/").await?;
    api_token::create(&db, gone.id, "abcd", "$argon2id$fakehashvalue", "test").await?;

    let removed = service::delete_except(&db, &["keep".to_string()]).await?;
    assert_eq!(removed, 1);
    assert!(service::find_by_name(&db, "keep").await?.is_some());
    assert!(service::find_by_name(&db, "gone").await?.is_none());
    assert!(server::find_for_service(&db, gone.id).await?.is_none());
    assert!(api_token::find_by_prefix(&db, "abcd").await?.is_empty());
    assert_eq!(keep.name, "keep");
    Ok(())
}
