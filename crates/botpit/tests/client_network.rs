//! End-to-end client pool behaviour over real sockets.

use std::time::Duration;

use botpit::ClientNetwork;
use pitio::JsonSocket;
use pitproto::Message;
use serde_json::{json, Value};

async fn connect(pool_addr: std::net::SocketAddr) -> JsonSocket {
    JsonSocket::connect(("127.0.0.1", pool_addr.port()))
        .await
        .expect("connect to pool")
}

fn token_msg(token: &str) -> Message {
    Message::new("token", vec![Value::String(token.into())])
}

#[tokio::test]
async fn wrong_token_client_is_dropped() {
    let pool = ClientNetwork::new();
    let id = pool.define_client("T").await.unwrap();
    let addr = pool.listen(0).await.unwrap();

    let mut client = connect(addr).await;
    // a bare JSON string is not a Message; the pool must reject silently
    client.send("T").await.unwrap();

    assert!(!pool.wait_for_client_timeout(id, Duration::from_secs(1)).await);
    assert!(!pool.is_connected(id).await);

    // the socket was closed server-side; sending eventually fails
    let mut failed = false;
    for _ in 0..50 {
        if client.send(&Message::named("nothing!")).await.is_err() {
            failed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(failed, "rejected client could still send");

    pool.terminate().await;
}

#[tokio::test]
async fn correct_token_client_binds() {
    let pool = ClientNetwork::new();
    let id = pool.define_client("T").await.unwrap();
    let addr = pool.listen(0).await.unwrap();

    let mut client = connect(addr).await;
    client.send(&token_msg("T")).await.unwrap();

    pool.wait_for_client(id).await;
    assert!(pool.is_connected(id).await);
    assert_eq!(pool.number_of_connected().await, 1);

    // the bound socket stays open; free-form messages are accepted
    client
        .send(&serde_json::json!({"name": "nothing", "args": null}))
        .await
        .unwrap();

    pool.terminate().await;
}

#[tokio::test]
async fn fan_out_to_one_hundred_clients() {
    let n = 100;
    let pool = ClientNetwork::new();
    let mut tokens = Vec::new();
    for i in 0..n {
        let token = format!("client token #{i}");
        let id = pool.define_client(&token).await.unwrap();
        assert_eq!(id, i);
        tokens.push(token);
    }
    let addr = pool.listen(0).await.unwrap();

    let mut clients = Vec::new();
    for token in &tokens {
        let mut client = connect(addr).await;
        client.send(&token_msg(token)).await.unwrap();
        clients.push(client);
    }
    pool.wait_for_all_clients().await;
    assert_eq!(pool.number_of_connected().await, n);

    for (i, _) in clients.iter().enumerate() {
        pool.queue(i, Message::new("test", vec![json!("arg0"), json!(i * 31)]))
            .await;
    }
    pool.send_all_blocking().await;

    for (i, client) in clients.iter_mut().enumerate() {
        let msg: Message = client.recv().await.unwrap();
        assert_eq!(msg.name, "test");
        assert_eq!(msg.args, vec![json!("arg0"), json!(i * 31)]);
    }

    pool.terminate().await;
    pool.omit_all_clients().await.unwrap();
}

#[tokio::test]
async fn per_slot_order_survives_many_rounds() {
    let n = 10;
    let rounds = 100;
    let pool = ClientNetwork::new();
    for i in 0..n {
        pool.define_client(&format!("t{i}")).await.unwrap();
    }
    let addr = pool.listen(0).await.unwrap();

    let mut clients = Vec::new();
    for i in 0..n {
        let mut client = connect(addr).await;
        client.send(&token_msg(&format!("t{i}"))).await.unwrap();
        clients.push(client);
    }
    pool.wait_for_all_clients().await;

    for round in 0..rounds {
        for i in 0..n {
            pool.queue(i, Message::new("turn", vec![json!(round), json!(i)]))
                .await;
        }
        pool.send_all_blocking().await;
        for (i, client) in clients.iter_mut().enumerate() {
            let msg: Message = client.recv().await.unwrap();
            assert_eq!(msg.args, vec![json!(round), json!(i)]);
        }
    }

    pool.terminate().await;
}

#[tokio::test]
async fn receive_window_gates_validity() {
    let pool = ClientNetwork::new();
    let id = pool.define_client("T").await.unwrap();
    let addr = pool.listen(0).await.unwrap();

    let mut client = connect(addr).await;
    client.send(&token_msg("T")).await.unwrap();
    pool.wait_for_client(id).await;

    let m = |i: u32| Message::new(format!("m{i}"), vec![json!(i)]);

    // before the window: received but never validated
    client.send(&m(1)).await.unwrap();
    client.send(&m(2)).await.unwrap();
    pool.wait_for_client_message_timeout(id, Duration::from_millis(500)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    pool.start_receiving_all().await;
    client.send(&m(3)).await.unwrap();
    pool.wait_for_client_message_timeout(id, Duration::from_millis(500)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.stop_receiving_all();

    // after the window: discarded again
    client.send(&m(4)).await.unwrap();
    client.send(&m(5)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let valid = pool.received_message(id).await.expect("m3 must be valid");
    assert_eq!(valid.name, "m3");

    // the next window starts clean
    pool.start_receiving_all().await;
    assert!(pool.received_message(id).await.is_none());

    pool.terminate().await;
}

#[tokio::test]
async fn late_first_message_yields_no_valid_input() {
    let pool = ClientNetwork::new();
    let id = pool.define_client("T").await.unwrap();
    let addr = pool.listen(0).await.unwrap();

    pool.start_receiving_all().await;
    let mut client = connect(addr).await;
    client.send(&token_msg("T")).await.unwrap();
    pool.wait_for_client(id).await;
    pool.stop_receiving_all();

    // first game message lands only after the window closed
    client.send(&Message::new("late", vec![json!([])])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(pool.received_message(id).await.is_none());
    assert!(pool.received_event(id).await.is_none());

    pool.terminate().await;
}

#[tokio::test]
async fn received_event_decodes_args() {
    let pool = ClientNetwork::new();
    let id = pool.define_client("T").await.unwrap();
    let addr = pool.listen(0).await.unwrap();

    let mut client = connect(addr).await;
    client.send(&token_msg("T")).await.unwrap();
    pool.wait_for_client(id).await;

    pool.start_receiving_all().await;
    client
        .send(&Message::new(
            "events",
            vec![json!([
                {"type": "move", "args": ["north"]},
                {"type": "shoot", "args": [3, 4]}
            ])],
        ))
        .await
        .unwrap();
    pool.wait_for_client_message_timeout(id, Duration::from_millis(500)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.stop_receiving_all();

    let events = pool.received_event(id).await.expect("events decode");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, "move");
    assert_eq!(events[1].args, vec![json!(3), json!(4)]);

    pool.terminate().await;
}

#[tokio::test]
async fn rebind_replaces_the_socket() {
    let pool = ClientNetwork::new();
    let id = pool.define_client("T").await.unwrap();
    let addr = pool.listen(0).await.unwrap();

    let mut first = connect(addr).await;
    first.send(&token_msg("T")).await.unwrap();
    pool.wait_for_client(id).await;

    let mut second = connect(addr).await;
    second.send(&token_msg("T")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    pool.queue(id, Message::named("fresh")).await;
    pool.send_all_blocking().await;

    let msg: Message = second.recv().await.unwrap();
    assert_eq!(msg.name, "fresh");

    pool.terminate().await;
}
