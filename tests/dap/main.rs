//! Drives `DapServer` end to end over in-memory duplex streams, against the
//! mock hgdb backend in `tests/support`, per the scenarios in spec.md §8.

#[path = "../support/mod.rs"]
mod support;

use hgdb_adapter::dap::protocol::Framed;
use hgdb_adapter::dap::DapServer;
use serde_json::{json, Value};
use support::{single_instance_break, MockServer};
use tokio::io::{duplex, DuplexStream};

type TestFramed = Framed<DuplexStream, DuplexStream>;

/// The "IDE" side of the wire: sends framed DAP requests, reads framed
/// responses/events back.
struct Client {
    io: TestFramed,
    seq: i64,
}

impl Client {
    async fn request(&mut self, command: &str, arguments: Value) -> Value {
        self.seq += 1;
        let seq = self.seq;
        self.io
            .write_message(&json!({
                "seq": seq,
                "type": "request",
                "command": command,
                "arguments": arguments,
            }))
            .await
            .unwrap();
        loop {
            let msg = self.io.read_message().await.unwrap().expect("server closed the connection");
            if msg["type"] == "response" && msg["request_seq"] == seq {
                return msg;
            }
        }
    }

    async fn event(&mut self, expected: &str) -> Value {
        loop {
            let msg = self.io.read_message().await.unwrap().expect("server closed the connection");
            if msg["type"] == "event" && msg["event"] == expected {
                return msg;
            }
        }
    }
}

/// Reply to `payloads.len()` requests the adapter sends to the mock server,
/// in order, with the given payloads. Run concurrently with a `Client`
/// request that needs those replies to resolve.
async fn drain_and_ack(mock: &mut MockServer, payloads: Vec<Value>) {
    for payload in payloads {
        let req = mock.recv_request().await;
        mock.reply(req["token"].as_str().expect("token"), payload);
    }
}

fn wire() -> (Client, DapServer<DuplexStream, DuplexStream>) {
    let (client_write, server_read) = duplex(64 * 1024);
    let (server_write, client_read) = duplex(64 * 1024);
    let client = Client { io: Framed::new(client_read, client_write), seq: 0 };
    let server = DapServer::new(server_read, server_write);
    (client, server)
}

/// spec.md §8 S1: launch, set one breakpoint, hit it, read threads/stack/
/// scopes/variables for the stopped instance.
#[tokio::test]
async fn verify_continue_and_hit_round_trip() {
    let mut mock = MockServer::start().await;
    let (mut client, mut server) = wire();
    let driver = tokio::spawn(async move { server.run().await });

    let (launch, _) = tokio::join!(
        client.request(
            "launch",
            json!({
                "program": "top.db",
                "runtimeIP": "127.0.0.1",
                "runtimePort": mock.port,
            }),
        ),
        drain_and_ack(&mut mock, vec![json!({ "status": "connected" }), json!([])]),
    );
    assert_eq!(launch["success"], true);

    let (set_bps, _) = tokio::join!(
        client.request(
            "setBreakpoints",
            json!({
                "source": { "path": "/local/top.sv" },
                "breakpoints": [{ "line": 5 }],
            }),
        ),
        drain_and_ack(
            &mut mock,
            vec![
                json!({}),
                json!([{ "id": 1, "line_num": 5, "column_num": 1 }]),
                json!({}),
            ],
        ),
    );
    assert_eq!(set_bps["body"]["breakpoints"][0]["verified"], true);
    assert_eq!(set_bps["body"]["breakpoints"][0]["id"], 1);

    mock.push_break(single_instance_break(1, 1, json!({ "x": "42" })));
    let stopped = client.event("stopped").await;
    assert_eq!(stopped["body"]["threadId"], 1);
    assert_eq!(stopped["body"]["reason"], "breakpoint");

    let threads = client.request("threads", json!({})).await;
    assert_eq!(threads["body"]["threads"][0]["id"], 1);

    let stack = client.request("stackTrace", json!({ "threadId": 1 })).await;
    let frames = stack["body"]["stackFrames"].as_array().unwrap();
    assert_eq!(frames.len(), 1);
    let frame_id = frames[0]["id"].as_i64().unwrap();

    let scopes = client.request("scopes", json!({ "frameId": frame_id })).await;
    let local_ref = scopes["body"]["scopes"][0]["variablesReference"].as_i64().unwrap();
    assert_ne!(local_ref, 0);

    let vars = client.request("variables", json!({ "variablesReference": local_ref })).await;
    let vars = vars["body"]["variables"].as_array().unwrap();
    assert!(vars.iter().any(|v| v["name"] == "x" && v["value"] == "42"));

    driver.abort();
}

/// spec.md §8: `setVariable` round-trips through `set-value` and the
/// adapter's response resolves even though the round trip happens entirely
/// inside one DAP request's dispatch — the regression this test guards is
/// the adapter hanging because nothing else was pumping the transport.
#[tokio::test]
async fn set_variable_round_trips_through_a_nested_request() {
    let mut mock = MockServer::start().await;
    let (mut client, mut server) = wire();
    let driver = tokio::spawn(async move { server.run().await });

    tokio::join!(
        client.request(
            "launch",
            json!({ "program": "top.db", "runtimeIP": "127.0.0.1", "runtimePort": mock.port }),
        ),
        drain_and_ack(&mut mock, vec![json!({ "status": "connected" }), json!([])]),
    );

    mock.push_break(single_instance_break(1, 1, json!({ "x": "1" })));
    client.event("stopped").await;

    let stack = client.request("stackTrace", json!({ "threadId": 1 })).await;
    let frame_id = stack["body"]["stackFrames"][0]["id"].as_i64().unwrap();
    let scopes = client.request("scopes", json!({ "frameId": frame_id })).await;
    let local_ref = scopes["body"]["scopes"][0]["variablesReference"].as_i64().unwrap();
    client.request("variables", json!({ "variablesReference": local_ref })).await;

    let (set_var, _) = tokio::join!(
        client.request(
            "setVariable",
            json!({ "variablesReference": local_ref, "name": "x", "value": "9" }),
        ),
        drain_and_ack(&mut mock, vec![json!({})]),
    );
    assert_eq!(set_var["success"], true);

    driver.abort();
}

/// spec.md §4.8 `dataBreakpointInfo`/`setDataBreakpoints`: the `variablesReference`
/// `dataBreakpointInfo` receives is a handle-table ref, not the composite
/// instance id `setDataBreakpoints` ultimately needs — this guards that the
/// round trip through the handle table actually resolves to an instance the
/// adapter recognizes, so the data breakpoint commits instead of silently
/// dropping.
#[tokio::test]
async fn data_breakpoint_info_resolves_handle_and_commits() {
    let mut mock = MockServer::start().await;
    let (mut client, mut server) = wire();
    let driver = tokio::spawn(async move { server.run().await });

    tokio::join!(
        client.request(
            "launch",
            json!({ "program": "top.db", "runtimeIP": "127.0.0.1", "runtimePort": mock.port }),
        ),
        drain_and_ack(&mut mock, vec![json!({ "status": "connected" }), json!([])]),
    );

    mock.push_break(single_instance_break(1, 1, json!({ "x": "1" })));
    client.event("stopped").await;

    let stack = client.request("stackTrace", json!({ "threadId": 1 })).await;
    let frame_id = stack["body"]["stackFrames"][0]["id"].as_i64().unwrap();
    let scopes = client.request("scopes", json!({ "frameId": frame_id })).await;
    let local_ref = scopes["body"]["scopes"][0]["variablesReference"].as_i64().unwrap();
    client.request("variables", json!({ "variablesReference": local_ref })).await;

    let info = client
        .request("dataBreakpointInfo", json!({ "variablesReference": local_ref, "name": "x" }))
        .await;
    let data_id = info["body"]["dataId"].as_str().expect("resolved instance yields a dataId").to_string();

    let (set_bps, _) = tokio::join!(
        client.request(
            "setDataBreakpoints",
            json!({ "breakpoints": [{ "dataId": data_id, "name": "x" }] }),
        ),
        drain_and_ack(&mut mock, vec![json!({}), json!({})]),
    );
    assert_eq!(set_bps["body"]["breakpoints"][0]["verified"], true);

    driver.abort();
}

/// spec.md §4.8 `cancel`: the request itself always gets a normal response
/// (it is the thing it names that's suppressed, not itself).
#[tokio::test]
async fn cancel_request_itself_succeeds() {
    let (mut client, mut server) = wire();
    let driver = tokio::spawn(async move { server.run().await });

    let cancel = client.request("cancel", json!({ "requestId": 7 })).await;
    assert_eq!(cancel["success"], true);

    driver.abort();
}
