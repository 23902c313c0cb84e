//! End-to-end engine scenarios: init through branching, fanout, merge,
//! and maintenance gating.

use cinch_core::{CinchError, Column, ColumnType, ConnectionContext, Value};
use cinch_engine::{Engine, QueryParams};
use cinch_storage::{metadata_store, MaintenanceScope, ProjectLayout};
use tempfile::TempDir;

fn setup() -> (TempDir, Engine, ConnectionContext) {
    // Keep maintenance transitions instant under test.
    std::env::set_var("CINCHDB_SKIP_MAINTENANCE_DELAY", "1");
    let dir = TempDir::new().unwrap();
    let engine = Engine::new();
    engine.init_project(dir.path()).unwrap();
    let ctx = ConnectionContext::new(dir.path(), "main", "main");
    (dir, engine, ctx)
}

fn teardown(engine: Engine) {
    // The pool owns every tenant handle; tests must release them all.
    engine.close_all();
    assert_eq!(engine.pool().open_connections(), 0);
}

#[test]
fn scenario_init_create_insert_query() {
    let (_dir, engine, ctx) = setup();

    engine
        .create_table(
            &ctx,
            "users",
            vec![Column::new("email", ColumnType::Text, false)],
        )
        .unwrap();

    engine
        .execute_write(
            &ctx,
            "INSERT INTO users (id, email) VALUES (?1, ?2)",
            vec![Value::from("u1"), Value::from("a@b")].into(),
        )
        .unwrap();

    let rows = engine
        .execute(&ctx, "SELECT COUNT(*) AS n FROM users", QueryParams::None)
        .unwrap();
    assert_eq!(rows[0].get("n").unwrap().as_integer(), Some(1));

    let info = engine.get_table(&ctx, "users").unwrap();
    let names: Vec<&str> = info.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "created_at", "updated_at", "email"]);

    teardown(engine);
}

#[test]
fn scenario_branching_isolates_schema() {
    let (dir, engine, ctx) = setup();
    engine
        .create_table(
            &ctx,
            "users",
            vec![Column::new("email", ColumnType::Text, false)],
        )
        .unwrap();

    engine.create_branch(&ctx, "main", "feature").unwrap();
    let feature = ConnectionContext::new(dir.path(), "main", "feature");

    engine
        .add_column(&feature, "users", Column::new("age", ColumnType::Integer, true))
        .unwrap();

    assert_eq!(engine.list_columns(&ctx, "users").unwrap().len(), 4);
    assert_eq!(engine.list_columns(&feature, "users").unwrap().len(), 5);

    // Tenant files are physically distinct.
    let layout = ProjectLayout::new(dir.path());
    assert_ne!(
        layout.tenant_path("main", "main", "main"),
        layout.tenant_path("main", "feature", "main")
    );
    assert!(layout.tenant_path("main", "feature", "main").exists());

    teardown(engine);
}

#[test]
fn scenario_multi_tenant_fanout() {
    let (dir, engine, ctx) = setup();
    engine.create_tenant(&ctx, "t1").unwrap();
    engine.create_tenant(&ctx, "t2").unwrap();

    engine
        .create_table(
            &ctx,
            "orders",
            vec![Column::new("total", ColumnType::Real, true)],
        )
        .unwrap();

    let store = metadata_store(dir.path()).unwrap();
    let head = cinch_storage::ChangeLog::for_branch(
        &ProjectLayout::new(dir.path()),
        "main",
        "main",
    )
    .head()
    .unwrap()
    .unwrap();

    for tenant in ["main", "t1", "t2"] {
        let tctx = ctx.clone().with_tenant(tenant);
        let rows = engine
            .execute(&tctx, "SELECT COUNT(*) AS n FROM orders", QueryParams::None)
            .unwrap();
        assert_eq!(rows[0].get("n").unwrap().as_integer(), Some(0), "{tenant}");

        // Every tenant converged on the log head.
        assert_eq!(
            store.get_schema_version("main", "main", tenant).unwrap(),
            Some(head),
            "{tenant}"
        );
    }

    teardown(engine);
}

#[test]
fn scenario_merge_feature_into_main() {
    let (dir, engine, ctx) = setup();
    engine
        .create_table(
            &ctx,
            "users",
            vec![Column::new("email", ColumnType::Text, false)],
        )
        .unwrap();
    engine.create_branch(&ctx, "main", "feature").unwrap();

    let feature = ConnectionContext::new(dir.path(), "main", "feature");
    engine
        .add_column(&feature, "users", Column::new("age", ColumnType::Integer, true))
        .unwrap();

    let layout = ProjectLayout::new(dir.path());
    let main_log = cinch_storage::ChangeLog::for_branch(&layout, "main", "main");
    let before = main_log.read().unwrap().len();

    let outcome = engine.merge_branches(&ctx, "feature", "main").unwrap();
    assert_eq!(outcome.applied.len(), 1);
    assert!(engine
        .list_columns(&ctx, "users")
        .unwrap()
        .iter()
        .any(|c| c.name == "age"));
    assert_eq!(main_log.read().unwrap().len(), before + 1);

    let outcome = engine.merge_branches(&ctx, "feature", "main").unwrap();
    assert!(outcome.applied.is_empty());
    assert_eq!(main_log.read().unwrap().len(), before + 1);

    teardown(engine);
}

#[test]
fn scenario_maintenance_blocks_mutation_not_reads() {
    let (dir, engine, ctx) = setup();
    engine
        .create_table(
            &ctx,
            "users",
            vec![Column::new("email", ColumnType::Text, false)],
        )
        .unwrap();

    let store = metadata_store(dir.path()).unwrap();
    store
        .enter_maintenance(MaintenanceScope::Database, "main", "migrating storage")
        .unwrap();

    let err = engine.create_table(&ctx, "blocked", vec![]).unwrap_err();
    assert!(matches!(err, CinchError::Maintenance(_)));
    assert!(err.to_string().contains("migrating storage"));

    assert!(matches!(
        engine.execute_write(
            &ctx,
            "INSERT INTO users (id, email) VALUES ('u1', 'a@b')",
            QueryParams::None,
        ),
        Err(CinchError::Maintenance(_))
    ));

    // Reads are not gated.
    engine
        .execute(&ctx, "SELECT COUNT(*) FROM users", QueryParams::None)
        .unwrap();

    store
        .exit_maintenance(MaintenanceScope::Database, "main")
        .unwrap();
    engine.create_table(&ctx, "unblocked", vec![]).unwrap();

    teardown(engine);
}

#[test]
fn scenario_merge_conflict_lists_ids_and_mutates_nothing() {
    let (dir, engine, ctx) = setup();
    engine
        .create_table(
            &ctx,
            "users",
            vec![Column::new("email", ColumnType::Text, false)],
        )
        .unwrap();
    engine.create_branch(&ctx, "main", "a").unwrap();
    engine.create_branch(&ctx, "main", "b").unwrap();

    let a = ConnectionContext::new(dir.path(), "main", "a");
    let b = ConnectionContext::new(dir.path(), "main", "b");
    let change_a = engine
        .add_column(&a, "users", Column::new("x", ColumnType::Integer, true))
        .unwrap();
    let change_b = engine
        .add_column(&b, "users", Column::new("x", ColumnType::Text, true))
        .unwrap();

    let err = engine.merge_branches(&ctx, "b", "a").unwrap_err();
    let CinchError::MergeConflict { conflicting, .. } = err else {
        panic!("expected MergeConflict, got {err:?}");
    };
    assert!(conflicting.contains(&change_a.id));
    assert!(conflicting.contains(&change_b.id));

    let columns = engine.list_columns(&a, "users").unwrap();
    let x = columns.iter().find(|c| c.name == "x").unwrap();
    assert_eq!(x.col_type, "INTEGER");

    teardown(engine);
}

#[test]
fn property_replay_matches_main_tenant_schema() {
    let (dir, engine, ctx) = setup();
    engine
        .create_table(
            &ctx,
            "users",
            vec![Column::new("email", ColumnType::Text, false)],
        )
        .unwrap();
    engine
        .add_column(&ctx, "users", Column::new("age", ColumnType::Integer, true))
        .unwrap();
    engine.rename_column(&ctx, "users", "age", "years").unwrap();
    engine
        .create_view(&ctx, "emails", "SELECT email FROM users")
        .unwrap();

    // A brand-new tenant is produced purely by replaying the log; its
    // schema must equal main's.
    engine.create_tenant(&ctx, "fresh").unwrap();

    let dump = |tenant: &str| -> Vec<(String, String)> {
        let tctx = ctx.clone().with_tenant(tenant);
        engine
            .execute(
                &tctx,
                "SELECT type, name FROM sqlite_master \
                 WHERE name NOT LIKE 'sqlite_%' ORDER BY type, name",
                QueryParams::None,
            )
            .unwrap()
            .into_iter()
            .map(|row| {
                (
                    row.get("type").unwrap().as_text().unwrap().to_string(),
                    row.get("name").unwrap().as_text().unwrap().to_string(),
                )
            })
            .collect()
    };

    assert_eq!(dump("main"), dump("fresh"));

    // Both sit at the log head.
    let store = metadata_store(dir.path()).unwrap();
    let head = cinch_storage::ChangeLog::for_branch(&ProjectLayout::new(dir.path()), "main", "main")
        .head()
        .unwrap();
    assert_eq!(store.get_schema_version("main", "main", "fresh").unwrap(), head);

    teardown(engine);
}

#[test]
fn property_change_log_ids_strictly_increase() {
    let (dir, engine, ctx) = setup();
    engine.create_table(&ctx, "a", vec![]).unwrap();
    engine.create_table(&ctx, "b", vec![]).unwrap();
    engine.drop_table(&ctx, "a").unwrap();
    engine.create_table(&ctx, "c", vec![]).unwrap();

    let changes = cinch_storage::ChangeLog::for_branch(
        &ProjectLayout::new(dir.path()),
        "main",
        "main",
    )
    .read()
    .unwrap();
    for pair in changes.windows(2) {
        assert!(pair[0].id < pair[1].id);
    }

    teardown(engine);
}

#[test]
fn property_divergent_tenant_recovers_via_replay() {
    let (dir, engine, ctx) = setup();
    engine.create_table(&ctx, "users", vec![]).unwrap();
    engine.create_tenant(&ctx, "t1").unwrap();

    // Flag t1 divergent, as a failed fanout would.
    let store = metadata_store(dir.path()).unwrap();
    store.set_divergent("main", "main", "t1", true).unwrap();

    engine.create_table(&ctx, "orders", vec![]).unwrap();

    engine.replay_tenant(&ctx, "t1").unwrap();
    assert!(!store.is_divergent("main", "main", "t1").unwrap());

    let t1 = ctx.clone().with_tenant("t1");
    engine
        .execute(&t1, "SELECT COUNT(*) FROM orders", QueryParams::None)
        .unwrap();

    teardown(engine);
}
