//! Router driven against a simulated cluster.

use bytes::Bytes;
use common::{RequestKind, RouterConfig, RouterError};
use router::{LoggingNotificationSystem, Router};
use sim_datanode::SimCluster;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn router_for(cluster: &SimCluster, config: RouterConfig) -> Router {
    Router::new(
        config,
        cluster.map().clone(),
        cluster.network().clone(),
        Arc::new(LoggingNotificationSystem),
    )
    .unwrap()
}

async fn settle(router: &Router) {
    for _ in 0..10 {
        router.tick().await.unwrap();
        if router.active_operations() == 0 {
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn put_get_delete_round_trip() {
    let cluster = SimCluster::uniform(2, 2, 4).unwrap();
    let router = router_for(&cluster, RouterConfig::default());

    let put = router.put_blob(Bytes::from_static(b"immutable bytes"));
    settle(&router).await;
    let blob_id = put.await.unwrap();
    let id = blob_id.to_string();

    let get = router.get_blob(&id);
    settle(&router).await;
    assert_eq!(get.await.unwrap(), Bytes::from_static(b"immutable bytes"));

    let delete = router.delete_blob(&id);
    settle(&router).await;
    assert_eq!(delete.await, Ok(()));

    let get_again = router.get_blob(&id);
    settle(&router).await;
    assert_eq!(get_again.await, Err(RouterError::BlobDeleted));

    // Deleting twice is still a success.
    let delete_again = router.delete_blob(&id);
    settle(&router).await;
    assert_eq!(delete_again.await, Ok(()));

    let snapshot = router.metrics().snapshot();
    assert_eq!(snapshot.operation(RequestKind::Delete).unwrap().completed, 2);
    assert_eq!(snapshot.operation(RequestKind::Get).unwrap().failed, 1);
    router.close().await;
}

#[tokio::test(start_paused = true)]
async fn background_loop_serves_callbacks() {
    let cluster = SimCluster::uniform(1, 3, 2).unwrap();
    let router = router_for(&cluster, RouterConfig::default());
    router.start();

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let blob_id = router
        .put_blob_with_callback(Bytes::from_static(b"payload"), move |outcome| {
            assert!(outcome.is_ok());
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let seen = calls.clone();
    router
        .delete_blob_with_callback(&blob_id.to_string(), move |outcome| {
            assert_eq!(outcome, Ok(()));
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    router.close().await;
    assert!(cluster.network().is_closed());
}

#[tokio::test(start_paused = true)]
async fn local_replicas_are_contacted_first_for_gets() {
    let cluster = SimCluster::uniform(2, 2, 1).unwrap();
    let config = RouterConfig {
        datacenter_name: "dc2".to_string(),
        get_request_parallelism: 1,
        ..RouterConfig::default()
    };
    let router = router_for(&cluster, config);

    let put = router.put_blob(Bytes::from_static(b"x"));
    settle(&router).await;
    let id = put.await.unwrap().to_string();

    let before: Vec<u64> = cluster.nodes().iter().map(|n| n.requests_seen()).collect();
    let get = router.get_blob(&id);
    settle(&router).await;
    get.await.unwrap();
    let after: Vec<u64> = cluster.nodes().iter().map(|n| n.requests_seen()).collect();

    let contacted: Vec<_> = cluster
        .nodes()
        .iter()
        .zip(before.iter().zip(after.iter()))
        .filter(|(_, (b, a))| a > b)
        .map(|(node, _)| node.id().hostname.clone())
        .collect();
    assert_eq!(contacted, vec!["dc2-node1".to_string()]);
}
