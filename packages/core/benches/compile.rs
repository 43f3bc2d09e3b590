//! Compilation and in-memory execution benchmarks
//!
//! Run with: `cargo bench -p unistore-core`
//!
//! - Query IR -> SQL fragment and document filter
//! - Aggregation IR -> grouped SQL and faceted pipeline
//! - Find and aggregate against the in-memory document store

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;
use unistore_core::aggregation::{compile_pipeline, compile_sql};
use unistore_core::{
    Aggregation, BoolQuery, BucketOrder, CallContext, Database, DateHistogramAggregation,
    Dialect, DocumentStore, FieldDefinition, QueryNode, QueryOptions, RecordBuilder,
    SemanticType, TableModel, TermsAggregation,
};

fn sample_query() -> QueryNode {
    BoolQuery::new()
        .must(QueryNode::range("amount").gte(json!(10)).lt(json!(500)).into())
        .must_not(QueryNode::term("status", json!("void")))
        .should(QueryNode::term("customer", json!("acme")))
        .should(QueryNode::text_match("note", "urgent"))
        .should(QueryNode::wildcard("sku", "AB-*"))
        .min_should_match(2)
        .into()
}

fn sample_aggregations() -> Vec<Aggregation> {
    vec![
        Aggregation::sum("total", "amount"),
        Aggregation::count("orders", "id"),
        TermsAggregation::new("by_status", "status")
            .size(10)
            .order(BucketOrder::desc("status_total"))
            .sub_aggregation(Aggregation::sum("status_total", "amount"))
            .sub_aggregation(
                DateHistogramAggregation::new("per_day", "created_at", "day").into(),
            )
            .into(),
    ]
}

fn bench_query_compile(c: &mut Criterion) {
    let query = sample_query();

    c.bench_function("query_to_sql", |b| {
        b.iter(|| black_box(&query).to_sql(Dialect::Sqlite).unwrap())
    });

    c.bench_function("query_to_document_filter", |b| {
        b.iter(|| black_box(&query).to_document_query().unwrap())
    });
}

fn bench_aggregation_compile(c: &mut Criterion) {
    let query = sample_query();
    let filter = query.to_sql(Dialect::Postgres).unwrap();
    let aggregations = sample_aggregations();

    c.bench_function("aggregation_to_sql", |b| {
        b.iter(|| compile_sql(black_box(&aggregations), "orders", &filter, Dialect::Postgres).unwrap())
    });

    c.bench_function("aggregation_to_pipeline", |b| {
        b.iter(|| compile_pipeline(&query, black_box(&aggregations)).unwrap())
    });
}

/// Seed an in-memory store with `count` orders
async fn seeded_store(count: usize) -> Arc<DocumentStore> {
    let ctx = CallContext::background();
    let store = Arc::new(DocumentStore::in_memory());
    let model = TableModel::builder("orders")
        .field(FieldDefinition::new("id", SemanticType::String))
        .field(FieldDefinition::new("customer", SemanticType::String))
        .field(FieldDefinition::new("status", SemanticType::String))
        .field(FieldDefinition::new("amount", SemanticType::Int))
        .field(FieldDefinition::new("created_at", SemanticType::String))
        .primary_key(["id"])
        .build()
        .unwrap();
    store.migrate(&ctx, &model).await.unwrap();

    let statuses = ["open", "paid", "refunded", "void"];
    let customers = ["acme", "globex", "initech"];
    let builder = RecordBuilder::new();
    let records = (0..count)
        .map(|i| {
            builder
                .from_value(json!({
                    "id": format!("o-{i}"),
                    "customer": customers[i % customers.len()],
                    "status": statuses[i % statuses.len()],
                    "amount": (i * 7) % 600,
                    "created_at": format!("2024-03-{:02}T{:02}:00:00Z", i % 28 + 1, i % 24),
                }))
                .unwrap()
        })
        .collect();
    store.batch_create(&ctx, "orders", records, &[]).await.unwrap();
    store
}

fn bench_memory_store(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = rt.block_on(seeded_store(1000));
    let ctx = CallContext::background();
    let query = sample_query();
    let aggregations = sample_aggregations();

    c.bench_function("memory_find_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .find(&ctx, "orders", &query, &QueryOptions::new().order_by("amount").limit(50))
                    .await
                    .unwrap()
            })
        })
    });

    c.bench_function("memory_aggregate_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .aggregate(&ctx, "orders", &QueryNode::match_all(), &aggregations)
                    .await
                    .unwrap()
            })
        })
    });
}

criterion_group!(
    benches,
    bench_query_compile,
    bench_aggregation_compile,
    bench_memory_store
);
criterion_main!(benches);
