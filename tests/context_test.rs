use fieldops_materials::{
    catalog, config::AppConfig, MaterialsContext, NewMaterial, UsageType, WithdrawRequest,
};
use futures::future::join_all;
use tempfile::TempDir;

fn file_config(dir: &TempDir) -> AppConfig {
    AppConfig {
        local_cache_backend: "file".to_string(),
        local_cache_dir: dir.path().to_string_lossy().into_owned(),
        ..Default::default()
    }
}

#[tokio::test]
async fn initializes_from_seed_and_subscribes() {
    let context = MaterialsContext::initialize(AppConfig::in_memory())
        .await
        .unwrap();

    assert!(context.is_subscribed());
    assert_eq!(
        context.store().snapshot().len(),
        catalog::seed_materials().len()
    );
    assert!(context.remote().is_empty());

    context.shutdown().await;
}

#[tokio::test]
async fn offline_context_still_serves_withdrawals() {
    let config = AppConfig {
        remote_backend: "offline".to_string(),
        ..AppConfig::in_memory()
    };
    let context = MaterialsContext::initialize(config).await.unwrap();
    assert!(!context.is_subscribed());

    let (result, handles) = context
        .engine()
        .withdraw_materials_tracked(&[WithdrawRequest::new("elec-004", 30)]);
    assert!(result.is_success());
    join_all(handles).await;

    assert_eq!(
        context.store().get_material_by_id("elec-004").map(|m| m.stock),
        Some(50)
    );
    context.shutdown().await;
}

#[tokio::test]
async fn confirmed_materials_are_rehydrated_after_restart() {
    let dir = TempDir::new().unwrap();

    let context = MaterialsContext::initialize(file_config(&dir)).await.unwrap();
    let added = context
        .store()
        .add_material(NewMaterial {
            id: Some("tool-777".to_string()),
            name: "Fish tape 30m".to_string(),
            category: "tools".to_string(),
            usage_type: UsageType::Returnable,
            unit: "pcs".to_string(),
            stock: 2,
            min_stock: 1,
        })
        .await
        .unwrap();
    assert!(!added.is_local);
    context.shutdown().await;

    let context = MaterialsContext::initialize(file_config(&dir)).await.unwrap();
    let remote = context.remote();
    assert_eq!(remote.document("tool-777").map(|m| m.stock), Some(2));

    let reloaded = context.store().get_material_by_id("tool-777").unwrap();
    assert!(!reloaded.is_local);
    assert_eq!(
        context.store().snapshot().len(),
        catalog::seed_materials().len() + 1
    );
    context.shutdown().await;
}

#[tokio::test]
async fn unknown_cache_backend_fails_initialization() {
    let config = AppConfig {
        local_cache_backend: "tape-drive".to_string(),
        ..Default::default()
    };
    assert!(MaterialsContext::initialize(config).await.is_err());
}
