// SPDX-License-Identifier: MIT OR Apache-2.0

/// Macro to run the same test logic against all store backend implementations.
///
/// The body runs once against a `MemoryStore` and once against a temporary `SqliteStore`. In both
/// cases a transaction is active while the body runs and committed afterwards.
///
/// ## Example
///
/// ```rust
/// # use rolekeeper_core::CommunityId;
/// # use rolekeeper_store::assert_all_stores;
/// # use rolekeeper_store::policies::PolicyStore;
/// # async fn run() {
/// assert_all_stores!(|store| async {
///     let policy = store.community_policy(CommunityId::new(1)).await.unwrap();
///     assert!(policy.log_channel.is_none());
/// });
/// # }
/// ```
#[macro_export]
macro_rules! assert_all_stores {
    (|$store:ident| $test_body:expr) => {
        // Test with MemoryStore.
        {
            use $crate::Transaction as _;

            let memory_store = $crate::memory::MemoryStore::default();
            let permit = memory_store.begin().await.unwrap();
            let $store = memory_store.clone();
            $test_body.await;
            memory_store.commit(permit).await.unwrap();
        }

        // Test with SqliteStore.
        {
            use $crate::Transaction as _;

            let sqlite_store = $crate::sqlite::SqliteStore::temporary().await;
            let permit = sqlite_store.begin().await.unwrap();
            let $store = sqlite_store.clone();
            $test_body.await;
            sqlite_store.commit(permit).await.unwrap();
        }
    };
}
