use std::error::Error;

use sqlite_relay::prelude::*;
use sqlite_relay::sql;
use tokio::runtime::Runtime;

#[test]
fn woven_statement_renders_and_executes() -> Result<(), Box<dyn Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let client = Client::worker(DriverConfig::ephemeral())?;

        let (sql, params) = sql!("SELECT " {1} "+" {2} " AS s");
        assert_eq!(sql, "SELECT ?+? AS s");
        assert_eq!(params, vec![SqlValue::Int(1), SqlValue::Int(2)]);

        let rows = client.query(sql, params).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("s"), Some(&SqlValue::Int(3)));

        client.close().await?;
        Ok::<(), Box<dyn Error>>(())
    })
}

#[test]
fn weave_helper_matches_macro_output() {
    let stmt = Statement::weave(&["SELECT ", "+", " AS s"], vec![1.into(), 2.into()]);
    assert_eq!(stmt.sql, "SELECT ?+? AS s");
    assert_eq!(stmt.params, vec![SqlValue::Int(1), SqlValue::Int(2)]);

    // A single part with no values passes through untouched.
    let plain = Statement::weave(&["SELECT count(*) FROM k"], vec![]);
    assert_eq!(plain.sql, "SELECT count(*) FROM k");
    assert!(plain.params.is_empty());
}

#[test]
fn mixed_value_types_interpolate() -> Result<(), Box<dyn Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let client = Client::worker(DriverConfig::ephemeral())?;
        client
            .run("CREATE TABLE t (a INT, b TEXT, c REAL)", vec![])
            .await?;

        let (sql, params) = sql!("INSERT INTO t VALUES (" {10} ", " {"ten"} ", " {10.5} ")");
        assert_eq!(sql, "INSERT INTO t VALUES (?, ?, ?)");
        client.run(sql, params).await?;

        let row = client
            .get("SELECT a, b, c FROM t", vec![])
            .await?
            .expect("row inserted");
        assert_eq!(row.get("a"), Some(&SqlValue::Int(10)));
        assert_eq!(row.get("b"), Some(&SqlValue::Text("ten".into())));
        assert_eq!(row.get("c"), Some(&SqlValue::Float(10.5)));

        client.close().await?;
        Ok::<(), Box<dyn Error>>(())
    })
}
