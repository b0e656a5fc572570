//! End-to-end engine scenarios.

use std::sync::Arc;

use lantern::clock::FakeClock;
use lantern::docstore::{UsageReport, UsageType};
use lantern::document::Document;
use lantern::engine::{EngineOptions, SearchEngine};
use lantern::error::LanternError;
use lantern::query::{RankBy, ResultSpec, ScoringSpec, SearchSpec};
use lantern::schema::{
    Cardinality, PropertyConfig, Schema, SchemaType, StringIndexingConfig, TermMatchType,
    TokenizerKind,
};
use lantern::storage::MemoryStorage;

fn indexed_prefix() -> StringIndexingConfig {
    StringIndexingConfig {
        term_match_type: TermMatchType::Prefix,
        tokenizer: TokenizerKind::Plain,
    }
}

/// email{title?, body?} plus message{body?}, both indexed for prefix match.
fn message_schema() -> Schema {
    Schema::new(vec![
        SchemaType::new(
            "email",
            vec![
                PropertyConfig::string("title", Cardinality::Optional, indexed_prefix()),
                PropertyConfig::string("body", Cardinality::Optional, indexed_prefix()),
            ],
        ),
        SchemaType::new(
            "message",
            vec![PropertyConfig::string(
                "body",
                Cardinality::Optional,
                indexed_prefix(),
            )],
        ),
    ])
}

fn message_doc(uri: &str, body: &str) -> Document {
    Document::builder("namespace", uri, "message")
        .creation_time_ms(100)
        .string_property("body", body)
        .build()
}

fn engine_with(
    options: EngineOptions,
    storage: &Arc<MemoryStorage>,
    clock: &Arc<FakeClock>,
) -> SearchEngine {
    let engine = SearchEngine::new(
        options,
        Arc::clone(storage) as Arc<dyn lantern::storage::Storage>,
        Arc::clone(clock) as Arc<dyn lantern::clock::Clock>,
    );
    engine.initialize().unwrap();
    engine
}

fn prefix_search(query: &str) -> SearchSpec {
    SearchSpec {
        query: query.to_string(),
        term_match_type: TermMatchType::Prefix,
        ..Default::default()
    }
}

fn result_uris(results: &lantern::query::SearchResults) -> Vec<String> {
    results
        .results
        .iter()
        .map(|r| r.document.uri.clone())
        .collect()
}

fn search_uris(engine: &SearchEngine, query: &str) -> Vec<String> {
    let results = engine
        .search(prefix_search(query), ScoringSpec::default(), ResultSpec::default())
        .unwrap();
    result_uris(&results)
}

#[test]
fn test_prefix_truncation_with_tiny_token_limit() {
    let storage = Arc::new(MemoryStorage::new());
    let clock = FakeClock::at(1000);
    let mut options = EngineOptions::default();
    options.max_token_length = 1;
    let engine = engine_with(options, &storage, &clock);

    engine.set_schema(message_schema(), false).unwrap();
    engine.put(message_doc("uri1", "message body")).unwrap();

    // Every token was truncated to one byte, and so are query terms, so
    // both of these reduce to "m" and match.
    assert_eq!(search_uris(&engine, "me"), vec!["uri1"]);
    assert_eq!(search_uris(&engine, "massage"), vec!["uri1"]);
}

#[test]
fn test_pagination() {
    let storage = Arc::new(MemoryStorage::new());
    let clock = FakeClock::at(1000);
    let engine = engine_with(EngineOptions::default(), &storage, &clock);
    engine.set_schema(message_schema(), false).unwrap();

    for i in 1..=5 {
        engine
            .put(message_doc(&format!("uri{i}"), "message body"))
            .unwrap();
    }

    let result_spec = ResultSpec {
        num_per_page: 2,
        ..Default::default()
    };
    let page1 = engine
        .search(prefix_search("message"), ScoringSpec::default(), result_spec)
        .unwrap();
    assert_eq!(result_uris(&page1), vec!["uri5", "uri4"]);
    assert_ne!(page1.next_page_token, 0);

    let page2 = engine.get_next_page(page1.next_page_token).unwrap();
    assert_eq!(result_uris(&page2), vec!["uri3", "uri2"]);
    assert_ne!(page2.next_page_token, 0);

    let page3 = engine.get_next_page(page2.next_page_token).unwrap();
    assert_eq!(result_uris(&page3), vec!["uri1"]);
    assert_eq!(page3.next_page_token, 0);

    // The token was consumed with the final page.
    let page4 = engine.get_next_page(page2.next_page_token).unwrap();
    assert!(page4.results.is_empty());
    assert_eq!(page4.next_page_token, 0);
}

#[test]
fn test_delete_by_schema_type() {
    let storage = Arc::new(MemoryStorage::new());
    let clock = FakeClock::at(1000);
    let engine = engine_with(EngineOptions::default(), &storage, &clock);
    engine.set_schema(message_schema(), false).unwrap();

    let email = Document::builder("namespace", "email1", "email")
        .creation_time_ms(100)
        .string_property("body", "message tagged email")
        .build();
    engine.put(email.clone()).unwrap();
    engine.put(message_doc("message1", "message body")).unwrap();

    engine.delete_by_schema_type("message").unwrap();

    assert!(matches!(
        engine.get("namespace", "message1"),
        Err(LanternError::NotFound(_))
    ));
    assert_eq!(engine.get("namespace", "email1").unwrap(), email);
    assert_eq!(search_uris(&engine, "message"), vec!["email1"]);
}

#[test]
fn test_incompatible_schema_change_requires_force() {
    let storage = Arc::new(MemoryStorage::new());
    let clock = FakeClock::at(1000);
    let engine = engine_with(EngineOptions::default(), &storage, &clock);
    engine.set_schema(message_schema(), false).unwrap();

    engine
        .put(
            Document::builder("namespace", "email1", "email")
                .creation_time_ms(100)
                .string_property("title", "hello")
                .build(),
        )
        .unwrap();

    let replacement = Schema::new(vec![SchemaType::new(
        "message",
        vec![PropertyConfig::string(
            "body",
            Cardinality::Optional,
            indexed_prefix(),
        )],
    )]);

    match engine.set_schema(replacement.clone(), false) {
        Err(LanternError::FailedPrecondition(msg)) => {
            assert!(msg.contains("email"), "message should name the type: {msg}");
        }
        other => panic!("expected FailedPrecondition, got {other:?}"),
    }
    // Nothing changed.
    assert!(engine.get("namespace", "email1").is_ok());

    let result = engine.set_schema(replacement, true).unwrap();
    assert!(!result.is_compatible);
    assert_eq!(result.incompatible_schema_types, vec!["email".to_string()]);
    assert_eq!(result.deleted_schema_types, vec!["email".to_string()]);

    // The forced change deleted every email document already.
    assert!(matches!(
        engine.delete_by_schema_type("email"),
        Err(LanternError::NotFound(_))
    ));
}

#[test]
fn test_ttl_expiry() {
    let storage = Arc::new(MemoryStorage::new());
    let clock = FakeClock::at(150);
    let engine = engine_with(EngineOptions::default(), &storage, &clock);
    engine.set_schema(message_schema(), false).unwrap();

    engine
        .put(
            Document::builder("namespace", "uri1", "message")
                .creation_time_ms(100)
                .ttl_ms(500)
                .string_property("body", "message body")
                .build(),
        )
        .unwrap();

    clock.set_now_ms(400);
    assert_eq!(search_uris(&engine, "message"), vec!["uri1"]);
    assert!(engine.get("namespace", "uri1").is_ok());

    clock.set_now_ms(700);
    assert!(search_uris(&engine, "message").is_empty());
    assert!(matches!(
        engine.get("namespace", "uri1"),
        Err(LanternError::NotFound(_))
    ));
}

#[test]
fn test_partial_log_loss_recovery() {
    let storage = Arc::new(MemoryStorage::new());
    let clock = FakeClock::at(1000);
    {
        let engine = engine_with(EngineOptions::default(), &storage, &clock);
        engine.set_schema(message_schema(), false).unwrap();
        engine.put(message_doc("uri1", "message body")).unwrap();
        engine.persist_to_disk().unwrap();
    }

    // A stray byte lands on the log tail after a clean shutdown.
    let mut raw = storage.get_raw("document_dir/document_log").unwrap();
    raw.push(0x5A);
    storage.put_raw("document_dir/document_log", raw);

    let engine = SearchEngine::new(
        EngineOptions::default(),
        Arc::clone(&storage) as Arc<dyn lantern::storage::Storage>,
        Arc::clone(&clock) as Arc<dyn lantern::clock::Clock>,
    );
    let stats = engine.initialize().unwrap();
    assert_eq!(
        stats.document_store_recovery_cause,
        lantern::engine::RecoveryCause::DataLoss
    );
    assert_eq!(
        stats.document_store_data_status,
        lantern::docstore::DataStatus::PartialLoss
    );

    // The last good document survived.
    assert_eq!(
        engine.get("namespace", "uri1").unwrap(),
        message_doc("uri1", "message body")
    );
    assert_eq!(search_uris(&engine, "message"), vec!["uri1"]);
}

#[test]
fn test_usage_ranking() {
    let storage = Arc::new(MemoryStorage::new());
    let clock = FakeClock::at(1000);
    let engine = engine_with(EngineOptions::default(), &storage, &clock);
    engine.set_schema(message_schema(), false).unwrap();

    for uri in ["uri1", "uri2", "uri3"] {
        engine.put(message_doc(uri, "message body")).unwrap();
    }

    let report = |uri: &str| UsageReport {
        namespace: "namespace".to_string(),
        uri: uri.to_string(),
        usage_type: UsageType::Type1,
        usage_timestamp_ms: 500,
    };
    engine.report_usage(report("uri3")).unwrap();
    engine.report_usage(report("uri3")).unwrap();
    engine.report_usage(report("uri2")).unwrap();

    let results = engine
        .search(
            prefix_search("m"),
            ScoringSpec {
                rank_by: RankBy::UsageType1Count,
                ..Default::default()
            },
            ResultSpec::default(),
        )
        .unwrap();
    assert_eq!(result_uris(&results), vec!["uri3", "uri2", "uri1"]);
}

#[test]
fn test_optimize_frees_space() {
    let storage = Arc::new(MemoryStorage::new());
    let clock = FakeClock::at(1000);
    let engine = engine_with(EngineOptions::default(), &storage, &clock);
    engine.set_schema(message_schema(), false).unwrap();

    engine.put(message_doc("uri1", "message body")).unwrap();
    engine.put(message_doc("uri2", "another message")).unwrap();
    engine.delete("namespace", "uri1").unwrap();

    let info = engine.get_optimize_info().unwrap();
    assert_eq!(info.optimizable_docs, 1);

    let stats = engine.optimize().unwrap();
    assert!(
        stats.log_size_after < stats.log_size_before,
        "log must shrink: {stats:?}"
    );
    assert!(matches!(
        engine.get("namespace", "uri1"),
        Err(LanternError::NotFound(_))
    ));
    assert_eq!(search_uris(&engine, "message"), vec!["uri2"]);
    engine.persist_to_disk().unwrap();
    drop(engine);

    // The deletion is durable across a restart.
    let engine = engine_with(EngineOptions::default(), &storage, &clock);
    assert!(matches!(
        engine.get("namespace", "uri1"),
        Err(LanternError::NotFound(_))
    ));
    assert_eq!(search_uris(&engine, "message"), vec!["uri2"]);
}
