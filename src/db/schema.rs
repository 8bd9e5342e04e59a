use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS decisions (
            decision_id  TEXT PRIMARY KEY,
            alert_id     TEXT NOT NULL,
            address      TEXT NOT NULL,
            risk_level   TEXT NOT NULL,
            action       TEXT NOT NULL,
            confidence   REAL NOT NULL,
            risk_score   REAL NOT NULL,
            rule_version INTEGER NOT NULL,
            decided_at   TEXT NOT NULL, -- RFC 3339, UTC, microseconds
            supersedes   TEXT,
            record       TEXT NOT NULL  -- full DecisionRecord as JSON
        );

        CREATE INDEX IF NOT EXISTS idx_decisions_address ON decisions(address, decided_at);
        CREATE INDEX IF NOT EXISTS idx_decisions_risk_level ON decisions(risk_level);
        CREATE INDEX IF NOT EXISTS idx_decisions_action ON decisions(action);
        CREATE INDEX IF NOT EXISTS idx_decisions_decided ON decisions(decided_at);
        CREATE INDEX IF NOT EXISTS idx_decisions_supersedes ON decisions(supersedes);
        ",
    )?;
    Ok(())
}
