use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use seatd::catalog::Catalog;
use seatd::engine::Engine;
use seatd::store::{AllocationStore, InMemoryStore, WalStore};
use seatd::wire::{self, SeatdFactory};

// ── Test infrastructure ──────────────────────────────────────

async fn start_server(store: Arc<dyn AllocationStore>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let engine = Arc::new(Engine::new(Arc::new(Catalog::restaurant_default()), store));
    let factory = Arc::new(SeatdFactory::new(engine));
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let factory = factory.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, factory).await;
            });
        }
    });
    addr
}

async fn start_memory_server() -> SocketAddr {
    start_server(Arc::new(InMemoryStore::new())).await
}

fn temp_wal(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("seatd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("seatd")
        .user("seatd");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn col(row: &SimpleQueryRow, name: &str) -> String {
    row.get(name).unwrap_or("").to_string()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn reserve_best_fit_over_the_wire() {
    let addr = start_memory_server().await;
    let client = connect(addr).await;

    let result = rows(&client, "INSERT INTO reservations (slot, size) VALUES (19, 2)").await;
    assert_eq!(result.len(), 1);
    assert_eq!(col(&result[0], "status"), "reserved");
    assert_eq!(col(&result[0], "table_id"), "Banana");
    assert_eq!(col(&result[0], "slot"), "19");
    assert!(Ulid::from_string(&col(&result[0], "id")).is_ok());

    let listed = rows(&client, "SELECT * FROM reservations").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(col(&listed[0], "id"), col(&result[0], "id"));
    assert_eq!(col(&listed[0], "size"), "2");
}

#[tokio::test]
async fn batch_reports_every_request() {
    let addr = start_memory_server().await;
    let client = connect(addr).await;

    let result = rows(
        &client,
        "INSERT INTO reservations (slot, size) VALUES (12, 4), (12, 4), (12, 0), (12, 1)",
    )
    .await;
    let statuses: Vec<_> = result.iter().map(|r| col(r, "status")).collect();
    // One row per VALUES tuple, in request order.
    assert_eq!(statuses, ["reserved", "no_capacity", "rejected", "reserved"]);
    assert_eq!(col(&result[0], "table_id"), "Date");
    assert_eq!(result[1].get("id"), None);
    assert_eq!(col(&result[1], "size"), "4");
    assert_eq!(result[2].get("table_id"), None);
    assert_eq!(col(&result[2], "size"), "0");
    assert_eq!(col(&result[3], "table_id"), "Apple");
    assert_eq!(col(&result[3], "size"), "1");
}

#[tokio::test]
async fn late_slot_is_free_and_reservable() {
    let addr = start_memory_server().await;
    let client = connect(addr).await;

    let free = rows(&client, "SELECT * FROM free_tables WHERE slot = 30").await;
    assert_eq!(free.len(), 4);

    let result = rows(
        &client,
        "INSERT INTO reservations (slot, size) VALUES (30, 1), (30, 5)",
    )
    .await;
    assert_eq!(col(&result[0], "status"), "reserved");
    assert_eq!(col(&result[0], "table_id"), "Apple");
    assert_eq!(col(&result[0], "slot"), "30");
    // Larger than every table is a capacity answer, not a rejection.
    assert_eq!(col(&result[1], "status"), "no_capacity");

    let free = rows(&client, "SELECT * FROM free_tables WHERE slot = 30").await;
    let free_ids: Vec<_> = free.iter().map(|r| col(r, "table_id")).collect();
    assert_eq!(free_ids, ["Banana", "Cherry", "Date"]);
}

#[tokio::test]
async fn free_tables_and_catalog() {
    let addr = start_memory_server().await;
    let client = connect(addr).await;

    let tables = rows(&client, "SELECT * FROM tables").await;
    let ids: Vec<_> = tables.iter().map(|r| col(r, "table_id")).collect();
    assert_eq!(ids, ["Apple", "Banana", "Cherry", "Date"]);

    rows(&client, "INSERT INTO reservations (slot, size) VALUES (8, 3)").await;
    let free = rows(&client, "SELECT * FROM free_tables WHERE slot = 8").await;
    let free_ids: Vec<_> = free.iter().map(|r| col(r, "table_id")).collect();
    assert_eq!(free_ids, ["Apple", "Banana", "Date"]);
    assert_eq!(col(&free[2], "capacity"), "4");

    let other = rows(&client, "SELECT * FROM free_tables WHERE slot = 9").await;
    assert_eq!(other.len(), 4);
}

#[tokio::test]
async fn cancel_reports_row_count() {
    let addr = start_memory_server().await;
    let client = connect(addr).await;

    let result = rows(&client, "INSERT INTO reservations (slot, size) VALUES (20, 1)").await;
    let id = col(&result[0], "id");

    let removed = client
        .execute("DELETE FROM reservations WHERE id = $1", &[&id.as_str()])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    let again = client
        .execute("DELETE FROM reservations WHERE id = $1", &[&id.as_str()])
        .await
        .unwrap();
    assert_eq!(again, 0);

    assert!(rows(&client, "SELECT * FROM reservations").await.is_empty());
}

#[tokio::test]
async fn bad_statements_are_errors() {
    let addr = start_memory_server().await;
    let client = connect(addr).await;

    for sql in [
        "SELECT * FROM bookings",
        "DELETE FROM reservations WHERE id = 'not-a-ulid'",
        "INSERT INTO reservations (slot, size) VALUES (1, -1)",
        "SELECT * FROM free_tables",
    ] {
        let err = client.simple_query(sql).await.unwrap_err();
        let code = err.code().map(|c| c.code().to_string());
        assert_eq!(code.as_deref(), Some("42601"), "{sql}: {err}");
    }

    // The connection survives errors.
    assert_eq!(rows(&client, "SELECT * FROM tables").await.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_never_share_a_table() {
    let addr = start_memory_server().await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        handles.push(tokio::spawn(async move {
            let client = connect(addr).await;
            let result = rows(
                &client,
                "INSERT INTO reservations (slot, size) VALUES (18, 1)",
            )
            .await;
            col(&result[0], "table_id")
        }));
    }
    let mut won = Vec::new();
    for h in handles {
        let table = h.await.unwrap();
        if !table.is_empty() {
            won.push(table);
        }
    }

    assert!(won.len() <= 4);
    let unique: HashSet<_> = won.iter().collect();
    assert_eq!(unique.len(), won.len());

    let client = connect(addr).await;
    assert_eq!(rows(&client, "SELECT * FROM reservations").await.len(), won.len());
}

#[tokio::test]
async fn wal_store_survives_restart() {
    let path = temp_wal("reservations.wal");

    let kept = {
        let addr = start_server(Arc::new(WalStore::open(&path).unwrap())).await;
        let client = connect(addr).await;
        let result = rows(
            &client,
            "INSERT INTO reservations (slot, size) VALUES (7, 2), (7, 2)",
        )
        .await;
        let dropped = col(&result[1], "id");
        client
            .simple_query(&format!("DELETE FROM reservations WHERE id = '{dropped}'"))
            .await
            .unwrap();
        col(&result[0], "id")
    };

    let store = WalStore::open(&path).unwrap();
    let records = store.scan_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id.to_string(), kept);
    assert_eq!(records[0].resource_id, "Banana");
}
