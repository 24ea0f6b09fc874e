use crate::db::connect_memory;
use crate::service;
use anyhow::Result;
use sea_orm::TransactionTrait;

/// Test basic transaction commit
#[tokio::test]
async fn test_transaction_commit() -> Result<()> {
    let db = connect_memory().await?;

    let txn = db.begin().await?;
    let created = service::create(&txn, "committed", false).await?;
    txn.commit().await?;

    let found = service::find_by_name(&db, "committed").await?;
    assert_eq!(found.map(|s| s.id), Some(created.id));
    Ok(())
}

/// Test transaction rollback
#[tokio::test]
async fn test_transaction_rollback() -> Result<()> {
    let db = connect_memory().await?;

    let txn = db.begin().await?;
    service::create(&txn, "rolled_back", false).await?;
    txn.rollback().await?;

    assert!(service::find_by_name(&db, "rolled_back").await?.is_none());
    Ok(())
}
