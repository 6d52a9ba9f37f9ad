use shared::{
    domain::LoadBalancerAlgorithm,
    pagination::{offset_for_page, total_pages},
};
use storage::{DynamicAccessKeyFields, Storage};

const PAGE_SIZE: u32 = 10;

#[tokio::test]
async fn filtered_pages_stay_consistent_with_count_across_removal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database_url = format!(
        "sqlite://{}",
        dir.path().join("listing.db").to_string_lossy().replace('\\', "/")
    );
    let storage = Storage::new(&database_url).await.expect("db");

    for i in 0..11 {
        storage
            .create_dynamic_access_key(&DynamicAccessKeyFields {
                name: format!("team-{i}"),
                path: format!("team-path-{i}"),
                prefix: None,
                load_balancer_algorithm: LoadBalancerAlgorithm::default(),
                expires_at: None,
            })
            .await
            .expect("create");
    }
    storage
        .create_dynamic_access_key(&DynamicAccessKeyFields {
            name: "unrelated".into(),
            path: "unrelated".into(),
            prefix: None,
            load_balancer_algorithm: LoadBalancerAlgorithm::default(),
            expires_at: None,
        })
        .await
        .expect("create");

    let count = storage
        .count_dynamic_access_keys(Some("team"))
        .await
        .expect("count");
    assert_eq!(count, 11);
    assert_eq!(total_pages(count, PAGE_SIZE), 2);

    let second = storage
        .list_dynamic_access_keys(Some("team"), offset_for_page(2, PAGE_SIZE), PAGE_SIZE)
        .await
        .expect("page 2");
    assert_eq!(second.len(), 1);

    storage
        .remove_dynamic_access_key(second[0].id)
        .await
        .expect("remove");

    let count = storage
        .count_dynamic_access_keys(Some("team"))
        .await
        .expect("count");
    assert_eq!(count, 10);
    assert_eq!(total_pages(count, PAGE_SIZE), 1);
    let second = storage
        .list_dynamic_access_keys(Some("team"), offset_for_page(2, PAGE_SIZE), PAGE_SIZE)
        .await
        .expect("page 2");
    assert!(second.is_empty());
}
