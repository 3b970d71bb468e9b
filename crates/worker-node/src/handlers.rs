//! Maps incoming request frames onto `VectorEngine` calls and their
//! response frames. A decode or engine failure on `search_request` degrades
//! to an empty result list rather than an error frame; `store_request`
//! reports the failure in its own `status` field instead.

use worker_engine::VectorEngine;
use worker_protocol::{SearchRequest, SearchResponse, SearchResultItem, StoreRequest, StoreResponse, StoreStatus};

pub async fn handle_store(req: StoreRequest, engine: &VectorEngine, node_id: &str) -> StoreResponse {
    let values = match worker_core::vector::decode_vectors(&req.vectors_b64) {
        Ok(values) => values,
        Err(err) => {
            return StoreResponse {
                request_id: req.request_id,
                node_id: node_id.to_string(),
                stored_count: 0,
                status: StoreStatus::Error,
                error_message: Some(err.to_string()),
            }
        }
    };

    let (n, _) = req.shape;
    if !engine.can_accept(n) {
        return StoreResponse {
            request_id: req.request_id,
            node_id: node_id.to_string(),
            stored_count: 0,
            status: StoreStatus::Full,
            error_message: None,
        };
    }

    match engine
        .add_vectors(&req.collection_id, req.shard_id.as_deref(), &values, req.shape, req.doc_ids)
        .await
    {
        Ok(stored_count) => StoreResponse {
            request_id: req.request_id,
            node_id: node_id.to_string(),
            stored_count,
            status: StoreStatus::Ok,
            error_message: None,
        },
        Err(err) => StoreResponse {
            request_id: req.request_id,
            node_id: node_id.to_string(),
            stored_count: 0,
            status: StoreStatus::Error,
            error_message: Some(err.to_string()),
        },
    }
}

pub async fn handle_search(req: SearchRequest, engine: &VectorEngine, node_id: &str) -> SearchResponse {
    let query = match worker_core::vector::decode_vectors(&req.query_b64) {
        Ok(query) => query,
        Err(_) => {
            return SearchResponse {
                request_id: req.request_id,
                node_id: node_id.to_string(),
                results: Vec::new(),
            }
        }
    };

    let hits = engine
        .search(&req.collection_id, req.shard_id.as_deref(), &query, req.top_k)
        .await;

    SearchResponse {
        request_id: req.request_id,
        node_id: node_id.to_string(),
        results: hits
            .into_iter()
            .map(|hit| SearchResultItem {
                doc_id: hit.doc_id,
                score: hit.score,
            })
            .collect(),
    }
}
