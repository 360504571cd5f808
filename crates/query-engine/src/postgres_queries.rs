//! PostgreSQL SQL text for each logical query, one connection per database
//! instance (see `DatabaseDriver`), so no cross-database `datname IN (...)`
//! filtering is needed — every variant reads from the connection's own
//! `current_database()`.

pub const EXTENSION_CHECK: &str = "SELECT extname, extversion FROM pg_extension";

pub const VERSION_CHECK: &str =
    "SELECT current_setting('server_version_num')::bigint AS version_num";

pub const RDS_CHECK: &str = "SELECT 1 FROM pg_extension WHERE extname = 'rds_tools'";

pub const SLOW_QUERIES_PRE_13: &str = r#"
    SELECT
        pss.queryid AS query_id,
        LEFT(pss.query, 4095) AS query_text,
        current_database() AS database_name,
        pss.calls AS execution_count,
        (pss.total_time / NULLIF(pss.calls, 0)) AS avg_elapsed_time_ms,
        (pss.shared_blks_read::float8 / NULLIF(pss.calls, 0)) AS avg_disk_reads,
        (pss.shared_blks_written::float8 / NULLIF(pss.calls, 0)) AS avg_disk_writes
    FROM pg_stat_statements pss
    WHERE pss.query NOT ILIKE 'EXPLAIN%'
    ORDER BY avg_elapsed_time_ms DESC
    LIMIT 200
"#;

pub const SLOW_QUERIES_13_PLUS: &str = r#"
    SELECT
        pss.queryid AS query_id,
        LEFT(pss.query, 4095) AS query_text,
        current_database() AS database_name,
        pss.calls AS execution_count,
        (pss.total_exec_time / NULLIF(pss.calls, 0)) AS avg_elapsed_time_ms,
        (pss.shared_blks_read::float8 / NULLIF(pss.calls, 0)) AS avg_disk_reads,
        (pss.shared_blks_written::float8 / NULLIF(pss.calls, 0)) AS avg_disk_writes
    FROM pg_stat_statements pss
    WHERE pss.query NOT ILIKE 'EXPLAIN%'
    ORDER BY avg_elapsed_time_ms DESC
    LIMIT 200
"#;

pub const WAIT_EVENTS_SAMPLING: &str = r#"
    WITH wait_history AS (
        SELECT
            event_time,
            pid,
            wait_event_type,
            wait_event,
            LAG(event_time) OVER (PARTITION BY pid ORDER BY event_time) AS prev_time
        FROM pg_wait_sampling_history
        WHERE event_time > NOW() - INTERVAL '5 minutes'
    )
    SELECT
        wh.pid,
        wh.wait_event_type,
        wh.wait_event,
        EXTRACT(EPOCH FROM (wh.event_time - wh.prev_time)) * 1000 AS wait_time_ms,
        psa.state,
        psa.usename,
        current_database() AS database_name,
        psa.query_id AS query_id,
        LEFT(psa.query, 4095) AS query_text
    FROM wait_history wh
    JOIN pg_stat_activity psa ON wh.pid = psa.pid
    WHERE wh.prev_time IS NOT NULL
        AND psa.state != 'idle'
    ORDER BY wait_time_ms DESC
    LIMIT 200
"#;

pub const WAIT_EVENTS_ACTIVITY: &str = r#"
    SELECT
        pid,
        wait_event_type,
        wait_event,
        0::float8 AS wait_time_ms,
        state,
        usename,
        current_database() AS database_name,
        query_id AS query_id,
        LEFT(query, 4095) AS query_text
    FROM pg_stat_activity
    WHERE state != 'idle'
        AND wait_event IS NOT NULL
    LIMIT 200
"#;

pub const BLOCKING_LEGACY: &str = r#"
    SELECT
        blocking.pid AS blocking_pid,
        blocked.pid AS blocked_pid,
        LEFT(blocking.query, 4095) AS blocking_query,
        LEFT(blocked.query, 4095) AS blocked_query,
        blocking.usename AS blocking_user,
        blocked.usename AS blocked_user,
        EXTRACT(EPOCH FROM (NOW() - blocking.query_start)) * 1000 AS blocking_duration_ms,
        EXTRACT(EPOCH FROM (NOW() - blocked.query_start)) * 1000 AS blocked_duration_ms
    FROM pg_stat_activity blocked
    JOIN pg_stat_activity blocking ON blocking.pid = ANY(pg_blocking_pids(blocked.pid))
    LIMIT 200
"#;

pub const BLOCKING_MODERN: &str = r#"
    SELECT
        blocking.pid AS blocking_pid,
        blocked.pid AS blocked_pid,
        LEFT(blocking.query, 4095) AS blocking_query,
        LEFT(blocked.query, 4095) AS blocked_query,
        blocking.usename AS blocking_user,
        blocked.usename AS blocked_user,
        EXTRACT(EPOCH FROM (NOW() - blocking.query_start)) * 1000 AS blocking_duration_ms,
        EXTRACT(EPOCH FROM (NOW() - blocked.query_start)) * 1000 AS blocked_duration_ms,
        blocking.queryid AS blocking_queryid,
        blocked.queryid AS blocked_queryid
    FROM pg_stat_activity blocked
    JOIN pg_stat_activity blocking ON blocking.pid = ANY(pg_blocking_pids(blocked.pid))
    LIMIT 200
"#;

pub const INDIVIDUAL_QUERIES: &str = r#"
    SELECT
        pid,
        queryid AS query_id,
        LEFT(query, 4095) AS query_text,
        state,
        wait_event_type,
        wait_event,
        usename,
        current_database() AS database_name,
        backend_type
    FROM pg_stat_activity
    WHERE state != 'idle'
        AND pid != pg_backend_pid()
    LIMIT 200
"#;

pub const EXPLAIN_PREFIX: &str = "EXPLAIN (FORMAT JSON, VERBOSE false) ";
