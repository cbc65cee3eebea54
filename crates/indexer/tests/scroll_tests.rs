//! Scroll session tests: exhaustiveness and cursor states.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use helios_indexer::backends::memory::InMemoryCluster;
use helios_indexer::error::CursorState;
use helios_indexer::scroll::{ScrollManager, ScrollSession, SessionState};
use helios_indexer::types::{SearchRequest, SortField};

use common::*;

const TTL: Duration = Duration::from_secs(60);

fn manager(cluster: &Arc<InMemoryCluster>) -> ScrollManager {
    ScrollManager::new(cluster.clone(), scroll_config(2000, TTL))
}

/// Walks a session to its end, returning ids in page order and page sizes.
async fn drain(
    manager: &ScrollManager,
    request: SearchRequest,
    page_size: usize,
) -> (ScrollSession, Vec<String>, Vec<usize>) {
    let (mut session, first) = manager.open_with(request, page_size, TTL).await.unwrap();
    let mut ids: Vec<String> = first.hits.iter().map(|h| h.id.clone()).collect();
    let mut pages = vec![first.hits.len()];

    while session.state() == SessionState::Open {
        let page = manager.continue_scan(&mut session).await.unwrap();
        assert!(page.hits.len() <= page_size);
        pages.push(page.hits.len());
        ids.extend(page.hits.into_iter().map(|h| h.id));
    }
    (session, ids, pages)
}

// ============================================================================
// Exhaustiveness
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_every_page_size_visits_every_match_once() {
    let cluster = seeded_cluster(23);
    let manager = manager(&cluster);
    let expected: Vec<String> = (0..23).map(doc_id).collect();

    for page_size in [1, 2, 5, 7, 22, 23, 24, 100] {
        let (session, ids, _) = drain(&manager, SearchRequest::new(INDEX), page_size).await;

        assert_unique(&ids);
        assert_eq!(ids, expected, "page size {}", page_size);
        assert!(session.is_exhausted());
    }
    assert_eq!(cluster.open_scroll_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exact_multiple_ends_with_empty_page() {
    let cluster = seeded_cluster(10);
    let (_, ids, pages) = drain(&manager(&cluster), SearchRequest::new(INDEX), 5).await;

    assert_eq!(ids.len(), 10);
    assert_eq!(pages, vec![5, 5, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_scan_follows_session_sort() {
    let cluster = seeded_cluster(12);
    let request = SearchRequest::new(INDEX).with_sort(SortField::desc("n"));
    let (session, ids, _) = drain(&manager(&cluster), request, 5).await;

    let expected: Vec<String> = (0..12).rev().map(doc_id).collect();
    assert_eq!(ids, expected);
    assert_eq!(session.sort(), &[SortField::desc("n")]);
}

#[tokio::test(start_paused = true)]
async fn test_scan_with_query_visits_only_matches() {
    let cluster = seeded_cluster(20);
    let request = SearchRequest::new(INDEX).with_query(json!({"term": {"active": true}}));
    let (_, ids, _) = drain(&manager(&cluster), request, 3).await;

    let expected: Vec<String> = (0..20).step_by(2).map(doc_id).collect();
    assert_eq!(ids, expected);
}

#[tokio::test(start_paused = true)]
async fn test_empty_result_is_exhausted_on_open() {
    let cluster = seeded_cluster(5);
    let request = SearchRequest::new(INDEX).with_query(json!({"match_none": {}}));
    let (session, first) = manager(&cluster).open_with(request, 10, TTL).await.unwrap();

    assert!(first.hits.is_empty());
    assert_eq!(session.state(), SessionState::Exhausted);
    assert_eq!(cluster.open_scroll_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_scan_all_collects_everything() {
    let cluster = seeded_cluster(4500);
    let hits = manager(&cluster).scan_all(SearchRequest::new(INDEX)).await.unwrap();

    assert_eq!(hits.len(), 4500);
    let ids: Vec<String> = hits.into_iter().map(|h| h.id).collect();
    assert_unique(&ids);
}

// ============================================================================
// Cursor states
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_continue_after_exhaustion_is_invalid() {
    let cluster = seeded_cluster(3);
    let manager = manager(&cluster);
    let (mut session, _, _) = drain(&manager, SearchRequest::new(INDEX), 2).await;

    assert_invalid_cursor(
        manager.continue_scan(&mut session).await,
        CursorState::Exhausted,
    );
}

#[tokio::test(start_paused = true)]
async fn test_continue_after_ttl_is_expired() {
    let cluster = seeded_cluster(10);
    let manager = manager(&cluster);
    let ttl = Duration::from_secs(1);
    let (mut session, _) = manager
        .open_with(SearchRequest::new(INDEX), 3, ttl)
        .await
        .unwrap();

    tokio::time::advance(Duration::from_millis(500)).await;
    manager.continue_scan(&mut session).await.unwrap();

    tokio::time::advance(Duration::from_millis(1500)).await;
    assert_invalid_cursor(
        manager.continue_scan(&mut session).await,
        CursorState::Expired,
    );
    assert_eq!(session.state(), SessionState::Expired);

    // Stays expired.
    assert_invalid_cursor(
        manager.continue_scan(&mut session).await,
        CursorState::Expired,
    );
}

#[tokio::test(start_paused = true)]
async fn test_each_continue_resets_ttl() {
    let cluster = seeded_cluster(10);
    let manager = manager(&cluster);
    let ttl = Duration::from_secs(1);
    let (mut session, _) = manager
        .open_with(SearchRequest::new(INDEX), 2, ttl)
        .await
        .unwrap();

    for _ in 0..4 {
        tokio::time::advance(Duration::from_millis(900)).await;
        manager.continue_scan(&mut session).await.unwrap();
    }
    assert_eq!(session.pages(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_lost_context_is_expired() {
    let cluster = seeded_cluster(10);
    let manager = manager(&cluster);
    let (mut session, _) = manager
        .open_with(SearchRequest::new(INDEX), 3, TTL)
        .await
        .unwrap();

    cluster.drop_scroll_contexts();
    assert_invalid_cursor(
        manager.continue_scan(&mut session).await,
        CursorState::Expired,
    );
}

#[tokio::test(start_paused = true)]
async fn test_closed_session_is_invalid_and_released() {
    let cluster = seeded_cluster(10);
    let manager = manager(&cluster);
    let (mut session, _) = manager
        .open_with(SearchRequest::new(INDEX), 3, TTL)
        .await
        .unwrap();
    assert_eq!(cluster.open_scroll_count(), 1);

    manager.close(&mut session).await;
    assert_eq!(cluster.open_scroll_count(), 0);
    assert_invalid_cursor(
        manager.continue_scan(&mut session).await,
        CursorState::Closed,
    );
}
