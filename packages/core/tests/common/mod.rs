//! Scenarios shared by the row-store and document-store integration tests
//!
//! Every scenario runs against a `&dyn Database`, so both backends are held to
//! the same observable behaviour.

#![allow(dead_code)]

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use unistore_core::{
    Aggregation, BoolQuery, BucketOrder, CallContext, CompileError, CompositeAggregation,
    CreateOption, Database, DatabaseError, DateHistogramAggregation, Entity, EntityStore,
    FieldKind, FieldSpec, KeyMap, QueryNode, QueryOptions, Repository, SortDirection,
    TermsAggregation,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub customer: String,
    pub status: String,
    pub amount: i64,
    pub paid: bool,
    pub created_at: String,
}

impl Entity for Order {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::new("id", FieldKind::String, "id,primary"),
        FieldSpec::new("customer", FieldKind::String, "customer,size=64"),
        FieldSpec::new("status", FieldKind::String, "status,index"),
        FieldSpec::new("amount", FieldKind::Int, "amount"),
        FieldSpec::new("paid", FieldKind::Bool, "paid"),
        FieldSpec::new("created_at", FieldKind::String, "created_at"),
    ];

    fn table_name() -> String {
        "orders".to_string()
    }
}

/// Catalogue item with optional and non-scalar fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub id: String,
    pub sku: Option<String>,
    pub label: Option<String>,
    pub category: String,
    pub price: Option<f64>,
    pub listed_at: Option<DateTime<Utc>>,
    pub ttl: Option<Duration>,
    pub tags: Option<Vec<String>>,
    pub attributes: Value,
}

impl Entity for Item {
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec::new("id", FieldKind::String, "id,primary"),
        FieldSpec::new("sku", FieldKind::String, "sku"),
        FieldSpec::new("label", FieldKind::String, "label"),
        FieldSpec::new("category", FieldKind::String, "category,index"),
        FieldSpec::new("price", FieldKind::Float, "price"),
        FieldSpec::new("listed_at", FieldKind::Date, "listed_at"),
        FieldSpec::new("ttl", FieldKind::Duration, "ttl"),
        FieldSpec::new("tags", FieldKind::Json, "tags"),
        FieldSpec::new("attributes", FieldKind::Json, "attributes"),
    ];

    fn table_name() -> String {
        "items".to_string()
    }
}

fn item(id: &str, sku: &str, label: Option<&str>, category: &str, price: Option<f64>) -> Item {
    Item {
        id: id.to_string(),
        sku: Some(sku.to_string()),
        label: label.map(str::to_string),
        category: category.to_string(),
        price,
        ..Default::default()
    }
}

/// Four stored items plus `i-5`, written without `label` or `price` at all
pub fn sample_items() -> Vec<Item> {
    let mut first = item("i-1", "AB-100", Some("sale"), "a", Some(-1.5));
    first.listed_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).single();
    first.ttl = Some(Duration::from_millis(1_500));
    first.tags = Some(vec!["red".to_string(), "large".to_string()]);
    first.attributes = json!({"color": "red", "size": 2});

    vec![
        first,
        item("i-2", "AB-205", Some("new"), "a", Some(-2.5)),
        item("i-3", "50%_off", None, "b", None),
        item("i-4", "50xxoff", None, "c", Some(3.0)),
    ]
}

async fn seeded_items(db: Arc<dyn Database>) -> Result<Repository<Item>> {
    let ctx = CallContext::background();
    let items = Repository::<Item>::new(db.clone())?;
    items.migrate(&ctx).await?;
    items.batch_create(&ctx, &sample_items(), &[]).await?;

    let sparse = db
        .get_builder()
        .from_value(json!({"id": "i-5", "sku": "ab-9", "category": "b"}))?;
    db.create(&ctx, "items", sparse, &[]).await?;
    Ok(items)
}

fn item_ids(items: &[Item]) -> Vec<&str> {
    items.iter().map(|i| i.id.as_str()).collect()
}

pub fn order(id: &str, customer: &str, status: &str, amount: i64, created_at: &str) -> Order {
    Order {
        id: id.to_string(),
        customer: customer.to_string(),
        status: status.to_string(),
        amount,
        paid: status == "paid",
        created_at: created_at.to_string(),
    }
}

/// Five orders over three customers, three statuses and three days
pub fn sample_orders() -> Vec<Order> {
    vec![
        order("o-1", "acme", "open", 10, "2024-03-01T09:00:00Z"),
        order("o-2", "acme", "paid", 120, "2024-03-01T15:00:00Z"),
        order("o-3", "globex", "paid", 80, "2024-03-02T10:00:00Z"),
        order("o-4", "initech", "paid", 200, "2024-03-03T11:00:00Z"),
        order("o-5", "globex", "refunded", 40, "2024-03-03T12:00:00Z"),
    ]
}

pub fn key(id: &str) -> KeyMap {
    let mut key = KeyMap::new();
    key.insert("id".to_string(), json!(id));
    key
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn seeded(db: Arc<dyn Database>) -> Result<Repository<Order>> {
    let ctx = CallContext::background();
    let orders = Repository::<Order>::new(db)?;
    orders.migrate(&ctx).await?;
    orders.batch_create(&ctx, &sample_orders(), &[]).await?;
    Ok(orders)
}

fn ids(orders: &[Order]) -> Vec<&str> {
    orders.iter().map(|o| o.id.as_str()).collect()
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

pub async fn migrate_is_idempotent(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let orders = Repository::<Order>::new(db)?;
    orders.migrate(&ctx).await?;
    orders.migrate(&ctx).await?;
    assert_eq!(orders.count(&ctx, &QueryNode::match_all()).await?, 0);
    Ok(())
}

pub async fn entity_round_trip(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let orders = seeded(db).await?;

    let fetched = orders.get(&ctx, "o-2").await?;
    assert_eq!(fetched, sample_orders()[1]);

    let mut changed = fetched.clone();
    changed.status = "refunded".to_string();
    changed.paid = false;
    orders.update(&ctx, &changed).await?;
    assert_eq!(orders.get(&ctx, "o-2").await?, changed);

    orders.delete(&ctx, &changed).await?;
    let missing = orders.get(&ctx, "o-2").await;
    assert!(matches!(missing, Err(ref e) if e.is_not_found()));
    assert_eq!(
        missing.err().map(|e| e.to_string()),
        Some("record not found".to_string())
    );
    Ok(())
}

pub async fn missing_keys_are_not_found(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let orders = seeded(db.clone()).await?;
    let builder = db.get_builder();
    let record = builder.from_value(json!({"id": "o-404", "status": "paid"}))?;

    assert!(db.update(&ctx, "orders", &key("o-404"), record).await.is_err_and(|e| e.is_not_found()));
    assert!(db.delete(&ctx, "orders", &key("o-404")).await.is_err_and(|e| e.is_not_found()));
    assert!(orders.delete_by_key(&ctx, "o-404").await.is_err_and(|e| e.is_not_found()));
    Ok(())
}

pub async fn conflict_modifiers(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let orders = seeded(db.clone()).await?;
    let original = sample_orders()[0].clone();

    let mut replacement = original.clone();
    replacement.status = "paid".to_string();
    replacement.amount = 999;

    let plain = orders.create(&ctx, &replacement, &[]).await;
    assert!(matches!(plain, Err(ref e) if e.is_conflict()), "got {plain:?}");

    orders
        .create(&ctx, &replacement, &[CreateOption::IgnoreConflict])
        .await?;
    assert_eq!(orders.get(&ctx, "o-1").await?, original);

    orders
        .create(&ctx, &replacement, &[CreateOption::UpdateOnConflict])
        .await?;
    assert_eq!(orders.get(&ctx, "o-1").await?, replacement);

    let both = orders
        .create(
            &ctx,
            &replacement,
            &[CreateOption::IgnoreConflict, CreateOption::UpdateOnConflict],
        )
        .await;
    assert!(matches!(both, Err(DatabaseError::ConflictingCreateOptions)));

    // Modifiers also insert when there is no collision
    let fresh = order("o-9", "umbrella", "open", 5, "2024-03-04T08:00:00Z");
    orders
        .batch_create(&ctx, std::slice::from_ref(&fresh), &[CreateOption::IgnoreConflict])
        .await?;
    assert_eq!(orders.get(&ctx, "o-9").await?, fresh);
    Ok(())
}

pub async fn batch_update_length_mismatch(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    seeded(db.clone()).await?;

    let record = db.get_builder().from_value(json!({"status": "void"}))?;
    let result = db
        .batch_update(&ctx, "orders", &[key("o-1"), key("o-2")], vec![record])
        .await;
    assert!(matches!(
        result,
        Err(DatabaseError::LengthMismatch { keys: 2, records: 1 })
    ));

    let untouched = db.get(&ctx, "orders", &key("o-1")).await?;
    assert_eq!(untouched.get("status"), Some(&json!("open")));
    Ok(())
}

pub async fn batch_update_and_delete(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let orders = seeded(db.clone()).await?;

    let mut first = sample_orders()[0].clone();
    let mut second = sample_orders()[1].clone();
    first.amount = 11;
    second.amount = 121;
    orders.batch_update(&ctx, &[first.clone(), second.clone()]).await?;
    assert_eq!(orders.get(&ctx, "o-1").await?, first);
    assert_eq!(orders.get(&ctx, "o-2").await?, second);

    orders.batch_delete(&ctx, &[first, second]).await?;
    assert_eq!(orders.count(&ctx, &QueryNode::match_all()).await?, 3);
    Ok(())
}

pub async fn drop_table_is_idempotent(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let orders = seeded(db.clone()).await?;

    orders.drop_table(&ctx).await?;
    orders.drop_table(&ctx).await?;
    db.drop_table(&ctx, "never_created").await?;

    let after_drop = orders.create(&ctx, &sample_orders()[0], &[]).await;
    assert!(after_drop.is_err(), "create after drop should fail");
    Ok(())
}

pub async fn find_with_options(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let orders = seeded(db).await?;

    let paid = QueryNode::term("status", "paid");
    let by_amount = orders
        .find(&ctx, &paid, &QueryOptions::new().order_by("amount").desc())
        .await?;
    assert_eq!(ids(&by_amount), vec!["o-4", "o-2", "o-3"]);

    let page = orders
        .find(
            &ctx,
            &QueryNode::match_all(),
            &QueryOptions::new().order_by("amount").limit(2).offset(1),
        )
        .await?;
    assert_eq!(ids(&page), vec!["o-5", "o-3"]);

    let skipped = orders
        .find(
            &ctx,
            &QueryNode::match_all(),
            &QueryOptions::new().order_by("id").offset(3),
        )
        .await?;
    assert_eq!(ids(&skipped), vec!["o-4", "o-5"]);

    let query: QueryNode = BoolQuery::new()
        .must(QueryNode::range("amount").gte(40).lt(150).into())
        .must_not(QueryNode::term("customer", "globex"))
        .into();
    let filtered = orders
        .find(&ctx, &query, &QueryOptions::new().order_by("id"))
        .await?;
    assert_eq!(ids(&filtered), vec!["o-2"]);

    let fuzzy = orders
        .find(
            &ctx,
            &QueryNode::text_match("customer", "GLOB"),
            &QueryOptions::new().order_by("id"),
        )
        .await?;
    assert_eq!(ids(&fuzzy), vec!["o-3", "o-5"]);

    assert!(orders.exists(&ctx, &QueryNode::term("customer", "initech")).await?);
    assert!(orders
        .find_one(&ctx, &QueryNode::term("customer", "nobody"))
        .await?
        .is_none());
    Ok(())
}

/// Records satisfying 0, 1, 2 and 3 of the should-clauses
pub async fn min_should_match(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let orders = Repository::<Order>::new(db)?;
    orders.migrate(&ctx).await?;
    orders
        .batch_create(
            &ctx,
            &[
                order("m-0", "other", "open", 1, "2024-03-01T00:00:00Z"),
                order("m-1", "acme", "open", 1, "2024-03-01T00:00:00Z"),
                order("m-2", "acme", "paid", 1, "2024-03-01T00:00:00Z"),
                order("m-3", "acme", "paid", 500, "2024-03-01T00:00:00Z"),
            ],
            &[],
        )
        .await?;

    let should = |n: Option<usize>| -> QueryNode {
        let query = BoolQuery::new()
            .should(QueryNode::term("customer", "acme"))
            .should(QueryNode::term("status", "paid"))
            .should(QueryNode::range("amount").gte(100).into());
        match n {
            Some(n) => query.min_should_match(n).into(),
            None => query.into(),
        }
    };
    let options = QueryOptions::new().order_by("id");

    assert_eq!(ids(&orders.find(&ctx, &should(None), &options).await?), vec!["m-1", "m-2", "m-3"]);
    assert_eq!(ids(&orders.find(&ctx, &should(Some(1)), &options).await?), vec!["m-1", "m-2", "m-3"]);
    assert_eq!(ids(&orders.find(&ctx, &should(Some(2)), &options).await?), vec!["m-2", "m-3"]);
    assert_eq!(ids(&orders.find(&ctx, &should(Some(3)), &options).await?), vec!["m-3"]);

    let invalid = orders.find(&ctx, &should(Some(4)), &options).await;
    assert!(matches!(invalid, Err(DatabaseError::Compile(_))));
    Ok(())
}

pub async fn aggregations(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let orders = seeded(db).await?;

    let result = orders
        .aggregate(
            &ctx,
            &QueryNode::match_all(),
            &[
                Aggregation::sum("total", "amount"),
                Aggregation::avg("average", "amount"),
                Aggregation::max("largest", "amount"),
                Aggregation::count("orders", "id"),
                TermsAggregation::new("by_status", "status")
                    .order(BucketOrder::desc("status_total"))
                    .sub_aggregation(Aggregation::sum("status_total", "amount"))
                    .into(),
            ],
        )
        .await?;

    assert_eq!(as_f64(result.metric("total")), Some(450.0));
    assert_eq!(as_f64(result.metric("average")), Some(90.0));
    assert_eq!(as_f64(result.metric("largest")), Some(200.0));
    assert_eq!(result.metric("orders"), Some(&json!(5)));

    let by_status = result.buckets("by_status").expect("by_status buckets");
    let keys: Vec<&Value> = by_status.iter().map(|b| &b.key).collect();
    assert_eq!(keys, vec![&json!("paid"), &json!("refunded"), &json!("open")]);
    assert_eq!(by_status[0].doc_count, 3);
    assert_eq!(as_f64(by_status[0].metric("status_total")), Some(400.0));
    Ok(())
}

pub async fn nested_and_filtered_aggregations(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let orders = seeded(db).await?;

    let nested = orders
        .aggregate(
            &ctx,
            &QueryNode::match_all(),
            &[TermsAggregation::new("by_customer", "customer")
                .size(2)
                .sub_aggregation(TermsAggregation::new("by_status", "status").into())
                .into()],
        )
        .await?;
    let customers = nested.buckets("by_customer").expect("by_customer buckets");
    assert_eq!(customers.len(), 2);
    // Equal counts break ties by key
    assert_eq!(customers[0].key, json!("acme"));
    assert_eq!(customers[1].key, json!("globex"));
    let acme_statuses: Vec<&Value> = customers[0]
        .buckets("by_status")
        .expect("nested buckets")
        .iter()
        .map(|b| &b.key)
        .collect();
    assert_eq!(acme_statuses, vec![&json!("open"), &json!("paid")]);

    let daily = orders
        .aggregate(
            &ctx,
            &QueryNode::term("paid", true),
            &[DateHistogramAggregation::new("per_day", "created_at", "day").into()],
        )
        .await?;
    let days: Vec<(Value, u64)> = daily
        .buckets("per_day")
        .expect("per_day buckets")
        .iter()
        .map(|b| (b.key.clone(), b.doc_count))
        .collect();
    assert_eq!(
        days,
        vec![
            (json!("2024-03-01"), 1),
            (json!("2024-03-02"), 1),
            (json!("2024-03-03"), 1)
        ]
    );

    let composite = orders
        .aggregate(
            &ctx,
            &QueryNode::match_all(),
            &[CompositeAggregation::new("pairs")
                .source("customer", "customer", SortDirection::Asc)
                .source("status", "status", SortDirection::Desc)
                .size(3)
                .into()],
        )
        .await?;
    let pairs: Vec<&Value> = composite
        .buckets("pairs")
        .expect("pairs buckets")
        .iter()
        .map(|b| &b.key)
        .collect();
    assert_eq!(
        pairs,
        vec![
            &json!({"customer": "acme", "status": "paid"}),
            &json!({"customer": "acme", "status": "open"}),
            &json!({"customer": "globex", "status": "refunded"}),
        ]
    );

    let empty = orders
        .aggregate(
            &ctx,
            &QueryNode::term("status", "nonexistent"),
            &[
                Aggregation::sum("total", "amount"),
                Aggregation::avg("average", "amount"),
                TermsAggregation::new("by_status", "status").into(),
            ],
        )
        .await?;
    assert_eq!(empty.metric("total"), Some(&json!(0)));
    assert_eq!(empty.metric("average"), Some(&Value::Null));
    assert_eq!(empty.buckets("by_status").map(<[_]>::len), Some(0));
    Ok(())
}

pub async fn with_tx_commits_and_rolls_back(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let orders = Repository::<Order>::new(db.clone())?;
    orders.migrate(&ctx).await?;

    let committed = order("t-1", "acme", "open", 10, "2024-03-01T00:00:00Z");
    let entity = committed.clone();
    orders
        .with_tx(&ctx, move |tx| {
            Box::pin(async move {
                let ctx = CallContext::background();
                tx.create(&ctx, &entity, &[]).await
            })
        })
        .await?;
    assert_eq!(orders.get(&ctx, "t-1").await?, committed);

    let discarded = order("t-2", "acme", "open", 10, "2024-03-01T00:00:00Z");
    let result: std::result::Result<(), DatabaseError> = orders
        .with_tx(&ctx, move |tx| {
            Box::pin(async move {
                let ctx = CallContext::background();
                tx.create(&ctx, &discarded, &[]).await?;
                Err(DatabaseError::Configuration("abort".to_string()))
            })
        })
        .await;
    assert!(matches!(result, Err(DatabaseError::Configuration(_))));
    assert!(orders.get(&ctx, "t-2").await.is_err_and(|e| e.is_not_found()));

    let tx = db.begin_tx(&ctx).await?;
    assert!(matches!(
        tx.begin_tx(&ctx).await,
        Err(DatabaseError::NestedTransaction)
    ));
    tx.rollback(&ctx).await?;
    Ok(())
}

pub async fn cancelled_context_fails_fast(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    seeded(db.clone()).await?;

    let (cancelled, handle) = CallContext::background().with_cancel();
    handle.cancel();
    assert!(matches!(
        db.get(&cancelled, "orders", &key("o-1")).await,
        Err(DatabaseError::Cancelled)
    ));

    let expired = ctx.clone().with_timeout(std::time::Duration::ZERO);
    assert!(matches!(
        db.find(&expired, "orders", &QueryNode::match_all(), &QueryOptions::new())
            .await,
        Err(DatabaseError::DeadlineExceeded)
    ));
    Ok(())
}

pub async fn typed_fields_round_trip(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let items = seeded_items(db).await?;

    let stored = items.get(&ctx, "i-1").await?;
    assert_eq!(stored, sample_items()[0]);
    assert_eq!(stored.ttl, Some(Duration::from_millis(1_500)));
    assert_eq!(
        stored.listed_at.map(|at| at.to_rfc3339()),
        Some("2024-03-01T09:30:00+00:00".to_string())
    );

    let mut changed = stored.clone();
    changed.price = Some(19.25);
    changed.ttl = Some(Duration::new(90, 5));
    changed.tags = Some(vec![]);
    changed.attributes = json!({"color": "blue", "dims": [1, 2]});
    changed.listed_at = Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 59).single();
    items.update(&ctx, &changed).await?;
    assert_eq!(items.get(&ctx, "i-1").await?, changed);

    // Null and never-written fields both come back as None
    assert_eq!(items.get(&ctx, "i-2").await?, sample_items()[1]);
    let sparse = items.get(&ctx, "i-5").await?;
    assert_eq!(sparse.label, None);
    assert_eq!(sparse.price, None);
    assert_eq!(sparse.tags, None);
    assert_eq!(sparse.sku.as_deref(), Some("ab-9"));
    Ok(())
}

pub async fn wildcard_queries(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let items = seeded_items(db).await?;
    let by_id = QueryOptions::new().order_by("id");

    let prefix = QueryNode::wildcard("sku", "AB-*");
    assert_eq!(item_ids(&items.find(&ctx, &prefix, &by_id).await?), vec!["i-1", "i-2", "i-5"]);
    assert_eq!(items.count(&ctx, &prefix).await?, 3);

    let single = QueryNode::wildcard("sku", "AB-?00");
    assert_eq!(item_ids(&items.find(&ctx, &single, &by_id).await?), vec!["i-1"]);

    // `%` and `_` in the pattern are literal characters
    let literal = QueryNode::wildcard("sku", "50%_off");
    assert_eq!(item_ids(&items.find(&ctx, &literal, &by_id).await?), vec!["i-3"]);
    assert_eq!(items.count(&ctx, &literal).await?, 1);

    let spanning = QueryNode::wildcard("sku", "50*off");
    assert_eq!(item_ids(&items.find(&ctx, &spanning, &by_id).await?), vec!["i-3", "i-4"]);
    Ok(())
}

/// Exists treats a stored null and an absent field the same way
pub async fn exists_queries(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let items = seeded_items(db).await?;
    let by_id = QueryOptions::new().order_by("id");

    let labelled = QueryNode::exists("label");
    assert_eq!(item_ids(&items.find(&ctx, &labelled, &by_id).await?), vec!["i-1", "i-2"]);
    assert_eq!(items.count(&ctx, &labelled).await?, 2);

    let priced = QueryNode::exists("price");
    assert_eq!(items.count(&ctx, &priced).await?, 3);

    let unlabelled: QueryNode = BoolQuery::new().must_not(labelled).into();
    assert_eq!(item_ids(&items.find(&ctx, &unlabelled, &by_id).await?), vec!["i-3", "i-4", "i-5"]);
    assert_eq!(items.count(&ctx, &unlabelled).await?, 3);
    Ok(())
}

/// `must_not` keeps records whose field is null or absent
pub async fn negation_keeps_missing_fields(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let items = seeded_items(db).await?;
    let by_id = QueryOptions::new().order_by("id");

    let not_on_sale: QueryNode = BoolQuery::new()
        .must_not(QueryNode::term("label", "sale"))
        .into();
    assert_eq!(
        item_ids(&items.find(&ctx, &not_on_sale, &by_id).await?),
        vec!["i-2", "i-3", "i-4", "i-5"]
    );
    assert_eq!(items.count(&ctx, &not_on_sale).await?, 4);

    let not_discounted: QueryNode = BoolQuery::new()
        .must(QueryNode::term("category", "b"))
        .must_not(QueryNode::range("price").lt(0).into())
        .into();
    assert_eq!(
        item_ids(&items.find(&ctx, &not_discounted, &by_id).await?),
        vec!["i-3", "i-5"]
    );

    let not_matching: QueryNode = BoolQuery::new()
        .must_not(QueryNode::wildcard("label", "s*"))
        .into();
    assert_eq!(items.count(&ctx, &not_matching).await?, 4);
    Ok(())
}

/// Regexp runs on the document store; the SQLite row store rejects it up front
pub async fn regexp_queries(db: Arc<dyn Database>, supported: bool) -> Result<()> {
    let ctx = CallContext::background();
    let items = seeded_items(db).await?;
    let pattern = QueryNode::regexp("sku", "^AB-[0-9]+$");
    let found = items
        .find(&ctx, &pattern, &QueryOptions::new().order_by("id"))
        .await;
    let counted = items.count(&ctx, &pattern).await;

    if supported {
        // Case sensitive, unlike wildcard
        assert_eq!(item_ids(&found?), vec!["i-1", "i-2"]);
        assert_eq!(counted?, 2);
    } else {
        for result in [found.map(|_| ()), counted.map(|_| ())] {
            assert!(
                matches!(
                    result,
                    Err(DatabaseError::Compile(CompileError::Unsupported { .. }))
                ),
                "got {result:?}"
            );
        }
    }
    Ok(())
}

/// Buckets whose summed values are all missing sort as a sum of 0
pub async fn metric_order_treats_empty_sum_as_zero(db: Arc<dyn Database>) -> Result<()> {
    let ctx = CallContext::background();
    let items = seeded_items(db).await?;

    let result = items
        .aggregate(
            &ctx,
            &QueryNode::match_all(),
            &[TermsAggregation::new("by_category", "category")
                .order(BucketOrder::asc("category_total"))
                .sub_aggregation(Aggregation::sum("category_total", "price"))
                .into()],
        )
        .await?;

    let buckets = result.buckets("by_category").expect("by_category buckets");
    let ordered: Vec<(&Value, Option<f64>)> = buckets
        .iter()
        .map(|b| (&b.key, as_f64(b.metric("category_total"))))
        .collect();
    assert_eq!(
        ordered,
        vec![
            (&json!("a"), Some(-4.0)),
            (&json!("b"), Some(0.0)),
            (&json!("c"), Some(3.0)),
        ]
    );
    Ok(())
}
