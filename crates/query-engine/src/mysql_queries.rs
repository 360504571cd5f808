//! MySQL/MariaDB SQL text for each logical query. Grounded on
//! `performance_schema`, available on MySQL 5.7+/MariaDB 10.2+ with
//! `performance_schema = ON`; no third-party extension is required, unlike
//! the PostgreSQL side.

pub const VERSION_CHECK: &str = "SELECT VERSION() AS version_string";

pub const PERFORMANCE_SCHEMA_CHECK: &str =
    "SELECT @@performance_schema AS enabled";

pub const SLOW_QUERIES: &str = r#"
    SELECT
        DIGEST AS query_id,
        LEFT(DIGEST_TEXT, 4095) AS query_text,
        SCHEMA_NAME AS database_name,
        COUNT_STAR AS execution_count,
        (SUM_TIMER_WAIT / COUNT_STAR / 1000000) AS avg_elapsed_time_ms,
        (SUM_ROWS_EXAMINED / COUNT_STAR) AS avg_rows_examined,
        (SUM_ROWS_SENT / COUNT_STAR) AS avg_rows_sent
    FROM performance_schema.events_statements_summary_by_digest
    WHERE SCHEMA_NAME IS NOT NULL
        AND DIGEST_TEXT NOT LIKE 'EXPLAIN%'
    ORDER BY avg_elapsed_time_ms DESC
    LIMIT 200
"#;

pub const WAIT_EVENTS: &str = r#"
    SELECT
        t.PROCESSLIST_ID AS pid,
        ewc.EVENT_NAME AS wait_event,
        (ewc.TIMER_WAIT / 1000000) AS wait_time_ms,
        t.PROCESSLIST_STATE AS state,
        t.PROCESSLIST_USER AS usename,
        t.PROCESSLIST_DB AS database_name,
        LEFT(t.PROCESSLIST_INFO, 4095) AS query_text
    FROM performance_schema.events_waits_current ewc
    JOIN performance_schema.threads t ON ewc.THREAD_ID = t.THREAD_ID
    WHERE t.PROCESSLIST_STATE IS NOT NULL
    ORDER BY wait_time_ms DESC
    LIMIT 200
"#;

pub const BLOCKING_SESSIONS: &str = r#"
    SELECT
        blocking.trx_mysql_thread_id AS blocking_pid,
        blocked.trx_mysql_thread_id AS blocked_pid,
        LEFT(blocking_thread.PROCESSLIST_INFO, 4095) AS blocking_query,
        LEFT(blocked_thread.PROCESSLIST_INFO, 4095) AS blocked_query,
        blocking_thread.PROCESSLIST_USER AS blocking_user,
        blocked_thread.PROCESSLIST_USER AS blocked_user,
        TIMESTAMPDIFF(MICROSECOND, blocking.trx_started, NOW()) / 1000 AS blocking_duration_ms,
        TIMESTAMPDIFF(MICROSECOND, blocked.trx_started, NOW()) / 1000 AS blocked_duration_ms
    FROM information_schema.innodb_lock_waits w
    JOIN information_schema.innodb_trx blocking ON w.blocking_trx_id = blocking.trx_id
    JOIN information_schema.innodb_trx blocked ON w.requesting_trx_id = blocked.trx_id
    JOIN performance_schema.threads blocking_thread ON blocking.trx_mysql_thread_id = blocking_thread.PROCESSLIST_ID
    JOIN performance_schema.threads blocked_thread ON blocked.trx_mysql_thread_id = blocked_thread.PROCESSLIST_ID
    LIMIT 200
"#;

pub const INDIVIDUAL_QUERIES: &str = r#"
    SELECT
        t.PROCESSLIST_ID AS pid,
        esc.DIGEST AS query_id,
        LEFT(t.PROCESSLIST_INFO, 4095) AS query_text,
        t.PROCESSLIST_STATE AS state,
        t.PROCESSLIST_USER AS usename,
        t.PROCESSLIST_DB AS database_name,
        t.PROCESSLIST_COMMAND AS backend_type
    FROM performance_schema.threads t
    LEFT JOIN performance_schema.events_statements_current esc ON t.THREAD_ID = esc.THREAD_ID
    WHERE t.PROCESSLIST_COMMAND != 'Sleep'
        AND t.PROCESSLIST_ID != CONNECTION_ID()
    LIMIT 200
"#;

pub const EXPLAIN_PREFIX: &str = "EXPLAIN FORMAT=JSON ";
