use dsc_db::{create_pool, open_database, run_migrations, DbRuntimeSettings};

#[test]
fn db_initialization_creates_connector_tables() {
    let pool = create_pool(":memory:", DbRuntimeSettings::default()).expect("failed to create pool");
    let conn = pool.get().expect("failed to get connection");
    let applied = run_migrations(&conn).expect("failed to run migrations");
    assert_eq!(applied, 6);

    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .expect("failed to prepare table query");
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .expect("failed to execute table query")
        .map(|r| r.expect("failed to read table name"))
        .collect();

    assert_eq!(
        tables,
        vec![
            "_dsc_migrations",
            "agreement_artifacts",
            "agreements",
            "artifacts",
            "catalogs",
            "contract_offers",
            "exchange_event_log",
            "pending_requests",
            "resources",
            "subscriptions",
        ]
    );
}

#[test]
fn file_backed_pool_shares_schema_across_connections() {
    let file = tempfile::NamedTempFile::new().expect("failed to create temp file");
    let path = file.path().to_str().expect("temp path should be utf-8");
    let pool = open_database(
        path,
        DbRuntimeSettings {
            busy_timeout_ms: 1_000,
            pool_max_size: 2,
        },
    )
    .expect("failed to open database");

    let writer = pool.get().expect("writer connection");
    writer
        .execute(
            "INSERT INTO subscriptions (target, location, subscriber) VALUES (?1, ?2, ?3)",
            [
                "https://p.example/resources/1",
                "https://c.example/hooks",
                "https://c.example",
            ],
        )
        .expect("insert subscription");

    let reader = pool.get().expect("reader connection");
    let count: i64 = reader
        .query_row("SELECT COUNT(*) FROM subscriptions", [], |row| row.get(0))
        .expect("count subscriptions");
    assert_eq!(count, 1);
}
