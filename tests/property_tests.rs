//! Property-based tests using proptest.
//!
//! Invariants covered:
//! - task identity ignores filter key order and how numbers are written
//! - multi-value fan-out issues one request per value and merges without
//!   duplicate ids
//! - post-filtering keeps exactly the records matching a text filter
//! - sum formatting round-trips the rounded total
//! - classifier output parsing never panics on arbitrary input

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use proptest::prelude::*;

use crm_query::aggregate::{clean_numeric, format_decimal, sum_field};
use crm_query::classifier::parse_tasks;
use crm_query::config::EngineConfig;
use crm_query::fanout::{merge_unique, MultiValueExecutor};
use crm_query::fetch::post_filter::retain_matching;
use crm_query::fetch::FetchRequest;
use crm_query::identity::{Continuation, TaskIdentity};
use crm_query::status::NoopReporter;
use crm_query::types::{FilterMap, FilterValue, Record};
use crm_query::upstream::InMemoryRecordApi;
use crm_query::{Catalog, QueryEngine};

// ─── Arbitrary Strategies ───────────────────────────────────────────────────

fn arb_filters() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z_]{1,12}", "[A-Za-z ]{0,10}", 0..8)
}

fn arb_statuses() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop::sample::select(vec!["Open", "Closed", "Pending", "Reopened", "open_hold"]),
        0..30,
    )
    .prop_map(|v| v.into_iter().map(str::to_string).collect())
}

fn build(entries: impl Iterator<Item = (String, String)>) -> FilterMap {
    let mut map = FilterMap::new();
    for (key, value) in entries {
        map.insert(key, FilterValue::text(value));
    }
    map
}

// ─── Identity ───────────────────────────────────────────────────────────────

proptest! {
    /// Insertion order of filters never changes the identity.
    #[test]
    fn identity_ignores_insertion_order(entries in arb_filters(), module in "[A-Z][a-z]{2,10}") {
        let forward = build(entries.clone().into_iter());
        let reverse = build(entries.into_iter().rev());
        prop_assert_eq!(
            TaskIdentity::compute(&module, &forward),
            TaskIdentity::compute(&module, &reverse)
        );
    }

    /// A continuation for another query always restarts at page one.
    #[test]
    fn foreign_continuation_restarts(last_page in 0u32..10_000, entries in arb_filters()) {
        let current = TaskIdentity::compute("Cases", &build(entries.into_iter()));
        let foreign = TaskIdentity::compute("Leads", &FilterMap::new());
        let next = Continuation::Next { identity: foreign, last_page };
        prop_assert_eq!(next.resolve_page(&current), 1);

        let same = Continuation::Next { identity: current.clone(), last_page };
        prop_assert_eq!(same.resolve_page(&current), last_page.saturating_add(1).max(1));
    }

    /// `n`, `n.0`, `"n"` and `"> n"` describe the same comparison.
    #[test]
    fn identity_ignores_number_spelling(n in -1_000_000i64..1_000_000) {
        let id = |value: serde_json::Value| {
            TaskIdentity::compute("Opportunities", &FilterMap::from_json(&serde_json::json!({ "amount": value })))
        };
        let int = id(serde_json::json!({"operator": ">", "value": n}));
        prop_assert_eq!(&id(serde_json::json!({"operator": ">", "value": n as f64})), &int);
        prop_assert_eq!(&id(serde_json::json!({"operator": ">", "value": n.to_string()})), &int);
        prop_assert_eq!(&id(serde_json::json!(format!("> {n}"))), &int);
        prop_assert_ne!(&id(serde_json::json!({"operator": ">=", "value": n})), &int);
    }
}

// ─── Fan-out ────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// N distinct values produce N upstream requests and a duplicate-free union.
    #[test]
    fn fanout_issues_one_request_per_value(
        values in prop::sample::subsequence(vec!["Open", "Closed", "Pending", "Reopened"], 1..=4),
        statuses in arb_statuses(),
    ) {
        let values: Vec<String> = values.into_iter().map(str::to_string).collect();
        let records: Vec<Record> = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| Record::new(format!("r{i}"), "Cases").with("status", s.as_str()))
            .collect();
        let api = Arc::new(InMemoryRecordApi::new().with_records("Cases", records));
        let engine = QueryEngine::builder(api.clone())
            .config(EngineConfig::new("https://crm.test/api"))
            .build()
            .unwrap();

        let request = FetchRequest::new("Cases")
            .with_filters(FilterMap::new().with("status", FilterValue::list(values.clone())));
        let (_, parts) = MultiValueExecutor::split(&request).unwrap();
        prop_assert_eq!(parts.len(), values.len());
        prop_assert!(parts.iter().all(|(_, sub)| sub.filters.multi_value_field().is_none()));

        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = rt.block_on(async { engine.search(&request, &NoopReporter).await.unwrap() });

        prop_assert_eq!(api.requests_for("Cases").len(), values.len());
        let ids: HashSet<&str> = result.records.iter().map(|r| r.id.as_str()).collect();
        prop_assert_eq!(ids.len(), result.records.len());
        prop_assert_eq!(result.count, result.records.len());
    }

    /// Merging keeps the first occurrence of every id and nothing else.
    #[test]
    fn merge_unique_is_a_union(sets in prop::collection::vec(prop::collection::vec(0u8..20, 0..10), 0..5)) {
        let record_sets: Vec<Vec<Record>> = sets
            .iter()
            .map(|ids| ids.iter().map(|i| Record::new(i.to_string(), "Cases")).collect())
            .collect();
        let merged = merge_unique(record_sets);

        let expected: HashSet<String> = sets.iter().flatten().map(u8::to_string).collect();
        let got: Vec<String> = merged.iter().map(|r| r.id.clone()).collect();
        let unique: HashSet<String> = got.iter().cloned().collect();
        prop_assert_eq!(unique.len(), got.len());
        prop_assert_eq!(unique, expected);
    }
}

// ─── Post-filter and aggregation ────────────────────────────────────────────

proptest! {
    /// A text filter keeps exactly the records whose field contains it.
    #[test]
    fn text_post_filter_is_sound_and_complete(
        statuses in arb_statuses(),
        needle in prop::sample::select(vec!["open", "OPEN", "clo", "pend", "hold"]),
    ) {
        let records: Vec<Record> = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| Record::new(format!("r{i}"), "Cases").with("status", s.as_str()))
            .collect();
        let mut kept = records.clone();
        let filters = FilterMap::new().with("status", FilterValue::text(needle));
        let today = chrono::NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        retain_matching(&mut kept, &filters, today);

        let lowered = needle.to_lowercase();
        let expected: Vec<&str> = statuses
            .iter()
            .filter(|s| s.to_lowercase().contains(&lowered))
            .map(String::as_str)
            .collect();
        let got: Vec<String> = kept.iter().filter_map(|r| r.text("status")).collect();
        prop_assert_eq!(got, expected);
    }

    /// The formatted total parses back to the rounded numeric total.
    #[test]
    fn sum_formatting_round_trips(amounts in prop::collection::vec(0u32..10_000_000, 0..20)) {
        let records: Vec<Record> = amounts
            .iter()
            .enumerate()
            .map(|(i, cents)| {
                let text = format!("{}.{:02}", cents / 100, cents % 100);
                Record::new(format!("o{i}"), "Opportunities").with("amount", text)
            })
            .collect();
        let summary = sum_field(&records, "amount");
        let reparsed = clean_numeric(&format_decimal(summary.total)).unwrap();
        prop_assert!((reparsed - summary.total).abs() < 0.005);
        prop_assert_eq!(summary.records_processed, amounts.len());
        prop_assert_eq!(
            summary.records_with_amount,
            amounts.iter().filter(|c| **c > 0).count()
        );
    }
}

// ─── Fuzz: classifier output ────────────────────────────────────────────────

proptest! {
    /// Arbitrary oracle output never panics and only yields known modules.
    #[test]
    fn parse_tasks_handles_arbitrary_text(raw in ".{0,400}") {
        let catalog = Catalog::builtin().unwrap();
        for task in parse_tasks(&raw, &catalog) {
            prop_assert!(catalog.contains(&task.module));
        }
    }

    /// Arbitrary JSON-shaped task lists never panic.
    #[test]
    fn parse_tasks_handles_arbitrary_json(
        task_type in "[a-z]{0,8}",
        module in "[A-Za-z ]{0,12}",
        limit in proptest::option::of(-5i64..500),
    ) {
        let raw = serde_json::json!({
            "tasks": [{"type": task_type, "module": module, "limit": limit}]
        })
        .to_string();
        let catalog = Catalog::builtin().unwrap();
        for task in parse_tasks(&raw, &catalog) {
            prop_assert!(catalog.contains(&task.module));
            prop_assert!(task.limit.is_none_or(|l| l > 0));
        }
    }
}
