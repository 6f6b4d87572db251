use super::*;
use proptest::prelude::*;

fn policy() -> SecurityPolicy {
    SecurityPolicy::default()
        .with_blocked_tables(vec!["audit_*".to_string(), "internal.*".to_string()])
        .with_blocked_columns("users", vec!["ssn".to_string(), "password_hash".to_string()])
        .with_sensitive_columns(vec!["api_key".to_string()])
        .with_require_where_clause(vec!["orders".to_string()])
        .with_max_join_tables(3)
}

fn assert_valid(sql: &str) {
    let result = validate(sql, &policy());
    assert!(result.valid, "expected '{}' to be valid, got {:?}", sql, result.reason);
}

fn assert_violation(sql: &str) -> String {
    let result = validate(sql, &policy());
    assert!(!result.valid, "expected '{}' to be rejected", sql);
    assert_eq!(result.failure, Some(FailureClass::Policy), "for '{}'", sql);
    assert_eq!(result.error_kind(), Some(ErrorKind::SecurityViolation));
    result.reason.unwrap_or_default()
}

#[test]
fn test_plain_selects_are_accepted() {
    assert_valid("SELECT COUNT(*) FROM users");
    assert_valid("SELECT id, name FROM users WHERE created_at > now() - interval '7 days'");
    assert_valid("SELECT u.name, count(*) FROM users u GROUP BY u.name ORDER BY 2 DESC LIMIT 10");
    assert_valid("select 1");
    assert_valid("SELECT id FROM users;");
}

#[test]
fn test_non_select_statements_are_rejected_by_name() {
    let cases = [
        ("INSERT INTO users (name) VALUES ('x')", "INSERT"),
        ("UPDATE users SET name = 'x' WHERE id = 1", "UPDATE"),
        ("DELETE FROM users WHERE active = false", "DELETE"),
        ("DROP TABLE users", "DROP"),
        ("CREATE TABLE t (id int)", "CREATE"),
        ("ALTER TABLE users ADD COLUMN x int", "ALTER"),
        ("TRUNCATE users", "TRUNCATE"),
        ("GRANT SELECT ON users TO reporting", "GRANT"),
        ("SET search_path TO public", "SET"),
        ("CALL refresh_stats()", "CALL"),
        ("COPY users TO STDOUT", "COPY"),
    ];

    for (sql, keyword) in cases {
        let reason = assert_violation(sql);
        assert!(
            reason.contains(keyword),
            "reason for '{}' should name {}: {}",
            sql,
            keyword,
            reason
        );
    }
}

#[test]
fn test_parse_failures_are_distinguishable() {
    for sql in ["", "   ", "-- only a comment", "/* nothing */", "SELEC * FROM users", "SELECT * FROM"] {
        let result = validate(sql, &policy());
        assert!(!result.valid, "'{}' should be rejected", sql);
        assert_eq!(result.failure, Some(FailureClass::Parse), "for '{}'", sql);
        assert_eq!(result.error_kind(), Some(ErrorKind::SqlParseError));
    }
}

#[test]
fn test_multiple_statements_are_rejected() {
    let reason = assert_violation("SELECT 1; DROP TABLE users");
    assert!(reason.contains("Multiple statements"));
    assert_violation("SELECT 1; SELECT 2");
}

#[test]
fn test_with_chain_and_set_operations() {
    assert_valid("WITH active AS (SELECT id FROM users WHERE active) SELECT count(*) FROM active");
    assert_valid("SELECT id FROM users UNION SELECT user_id FROM sessions");
    assert_valid("(SELECT id FROM users) EXCEPT (SELECT user_id FROM bans)");
    assert_violation("VALUES (1), (2)");
}

#[test]
fn test_unqualified_tables_checked_against_search_path() {
    // `secrets` reads `internal.secrets` when `internal` is on the search path
    let validator = SqlValidator::new(&policy())
        .with_search_path(vec!["internal".to_string(), "public".to_string()]);
    let result = validator.validate("SELECT * FROM secrets");
    assert!(!result.valid);
    assert!(result.reason.unwrap_or_default().contains("secrets"));

    assert!(validate("SELECT * FROM secrets", &policy()).valid);
    assert!(validator.validate("SELECT * FROM public.secrets").valid);
}

#[test]
fn test_validator_for_config_uses_configured_schemas() {
    let mut config = AppConfig::default();
    config.security = policy();
    config.databases = vec![
        crate::config::DatabaseConfig::new("app", "postgres://reader@localhost/app")
            .with_schemas(vec!["public".to_string(), "internal".to_string()]),
    ];
    let result = SqlValidator::for_config(&config).validate("SELECT * FROM flags");
    assert!(!result.valid);
}

#[test]
fn test_dangerous_functions_are_rejected_anywhere() {
    let reason = assert_violation("SELECT pg_sleep(10)");
    assert!(reason.contains("pg_sleep"));
    assert_violation("SELECT PG_SLEEP(1)");
    assert_violation("SELECT id FROM users WHERE id = (SELECT 1 FROM pg_catalog.pg_sleep(1))");
    assert_violation("SELECT upper(pg_read_file('/etc/passwd'))");
    assert_violation("SELECT * FROM pg_ls_dir('.')");
    assert_violation("SELECT query_to_xml('delete from users', true, false, '')");
    assert_violation("SELECT dblink_get_result('conn')");
    assert_violation("SELECT loread(lo_open(16400, 262144), 1000000)");
    assert_violation("SELECT lowrite(lo_open(16400, 131072), 'x'::bytea)");
    assert_violation("SELECT lo_create(0)");
    assert_violation("SELECT * FROM pg_ls_waldir()");
    assert_violation("SELECT name FROM pg_ls_logdir() ORDER BY modification DESC");
    assert_violation("SELECT * FROM pg_catalog.pg_ls_tmpdir()");
}

#[test]
fn test_configured_functions_are_rejected() {
    let policy = policy().with_blocked_functions(vec!["current_setting".to_string()]);
    let result = validate("SELECT current_setting('server_version')", &policy);
    assert!(!result.valid);
    assert!(validate("SELECT version()", &policy).valid);
}

#[test]
fn test_blocked_table_patterns() {
    let reason = assert_violation("SELECT * FROM audit_logs");
    assert!(reason.contains("audit_logs"));
    assert_violation("SELECT * FROM public.AUDIT_EVENTS");
    assert_violation("SELECT * FROM users WHERE id IN (SELECT user_id FROM audit_logs)");
    assert_violation("SELECT * FROM internal.flags");
    assert_violation("WITH audit_logs AS (SELECT * FROM audit_logs) SELECT * FROM audit_logs");
    assert_valid("SELECT * FROM auditors");
    assert_valid("SELECT * FROM public.flags");
}

#[test]
fn test_blocked_columns() {
    assert_violation("SELECT ssn FROM users");
    assert_violation("SELECT u.password_hash FROM users u");
    assert_violation("SELECT name FROM users WHERE SSN = '123'");
    assert_violation("SELECT users.ssn FROM users");
    assert_valid("SELECT name, email FROM users");
    assert_valid("SELECT o.ssn FROM orders o WHERE o.id = 1");
}

#[test]
fn test_sensitive_columns_are_rejected_unqualified() {
    let reason = assert_violation("SELECT api_key FROM integrations");
    assert!(reason.contains("api_key"));
}

#[test]
fn test_wildcards_over_restricted_tables() {
    let reason = assert_violation("SELECT * FROM users");
    assert!(reason.contains("users"));
    assert_violation("SELECT u.* FROM users u JOIN sessions s ON s.user_id = u.id");
    assert_violation("SELECT u FROM users u");
    assert_valid("SELECT s.* FROM users u JOIN sessions s ON s.user_id = u.id");
    assert_valid("SELECT * FROM sessions");

    // Row wildcards passed to functions or row constructors
    let reason = assert_violation("SELECT row_to_json(u.*) FROM users u");
    assert!(reason.contains("users"));
    assert_violation("SELECT to_jsonb(users.*) FROM users");
    assert_violation("SELECT ROW(u.*) FROM users u");
    assert_violation("SELECT json_agg(u.*) FROM users u WHERE u.id < 10");
    assert_violation("SELECT id FROM sessions WHERE EXISTS (SELECT to_json(u.*) FROM users u)");
    assert_valid("SELECT row_to_json(s.*) FROM users u JOIN sessions s ON s.user_id = u.id");
    assert_valid("SELECT count(*) FROM users");
}

#[test]
fn test_nested_query_safety() {
    let reason = assert_violation("SELECT * INTO backup_sessions FROM sessions");
    assert!(reason.contains("INTO"));
    assert_violation("SELECT * FROM sessions WHERE id IN (SELECT id FROM sessions FOR UPDATE)");

    let result = validate(
        "WITH gone AS (DELETE FROM sessions RETURNING id) SELECT * FROM gone",
        &policy(),
    );
    assert!(!result.valid);
}

#[test]
fn test_where_requirement() {
    let reason = assert_violation("SELECT * FROM orders");
    assert!(reason.contains("WHERE"));
    assert_valid("SELECT * FROM orders WHERE id = 42");
    assert_violation("SELECT count(*) FROM sessions s JOIN orders o ON o.session_id = s.id");
    assert_violation("SELECT * FROM (SELECT * FROM orders) o WHERE o.id = 1");
    assert_valid("SELECT * FROM sessions");
}

#[test]
fn test_table_count_limit() {
    assert_valid("SELECT 1 FROM a JOIN b ON a.id = b.id JOIN c ON c.id = b.id");
    let reason = assert_violation(
        "SELECT 1 FROM a JOIN b ON a.id = b.id JOIN c ON c.id = b.id JOIN d ON d.id = c.id",
    );
    assert!(reason.contains("maximum is 3"));
    // Self joins count once
    assert_valid("SELECT 1 FROM a x JOIN a y ON x.id = y.parent_id JOIN b ON b.id = x.id");
}

#[test]
fn test_explain_handling() {
    let reason = assert_violation("EXPLAIN SELECT * FROM sessions");
    assert!(reason.contains("EXPLAIN"));

    let policy = policy().with_allow_explain(true);
    assert!(validate("EXPLAIN SELECT * FROM sessions", &policy).valid);

    let result = validate("EXPLAIN ANALYZE DELETE FROM sessions", &policy);
    assert!(!result.valid);
    assert!(result.reason.unwrap_or_default().contains("DELETE"));

    assert!(!validate("EXPLAIN SELECT * FROM audit_logs", &policy).valid);
}

#[test]
fn test_into_result_maps_error_kinds() {
    let err = validate("DROP TABLE users", &policy())
        .into_result()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityViolation);

    let err = validate("SELEC 1", &policy()).into_result().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SqlParseError);

    assert!(validate("SELECT 1", &policy()).into_result().is_ok());
}

#[test]
fn test_normalize_sql() {
    let normalized = normalize_sql("select   id\n  from   users\nwhere id = 1").unwrap();
    assert_eq!(normalized, "SELECT id FROM users WHERE id = 1");

    assert_eq!(
        normalize_sql("SELECT 1; SELECT 2").unwrap_err().kind(),
        ErrorKind::SecurityViolation
    );
    assert_eq!(
        normalize_sql("nonsense here").unwrap_err().kind(),
        ErrorKind::SqlParseError
    );
}

#[test]
fn test_extract_tables() {
    let tables = extract_tables(
        "WITH recent AS (SELECT * FROM Orders WHERE id > 1) \
         SELECT * FROM users u JOIN recent r ON r.user_id = u.id JOIN public.users pu ON pu.id = u.id",
    )
    .unwrap();
    assert_eq!(tables, vec!["orders", "public.users", "users"]);
}

#[test]
fn test_validator_is_reusable() {
    let validator = SqlValidator::new(&policy());
    assert!(validator.validate("SELECT 1").valid);
    assert!(!validator.validate("DELETE FROM users").valid);
    assert!(validator.validate("SELECT 2").valid);
}

proptest! {
    #[test]
    fn prop_validate_is_idempotent(sql in "[a-zA-Z0-9_ *(),.=';-]{0,80}") {
        let policy = policy();
        let first = validate(&sql, &policy);
        let second = validate(&sql, &policy);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_generated_selects_from_blocked_tables_are_rejected(suffix in "[a-z]{1,12}") {
        let sql = format!("SELECT id FROM audit_{} WHERE id = 1", suffix);
        let result = validate(&sql, &policy());
        prop_assert!(!result.valid);
        prop_assert_eq!(result.failure, Some(FailureClass::Policy));
    }
}
